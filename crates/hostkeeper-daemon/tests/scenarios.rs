//! End-to-end scenarios through the public API.

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use hostkeeper_daemon::transaction::{StageError, rollback};
use hostkeeper_daemon::{
    ArgValue, ExitCode, HostControl, HostSettings, ProcFs, RunState, ServiceHandle, ServiceHost,
    ServiceIdentity, StagedTransaction, TransactionError, build_command_line, parse_command_line,
};

#[test]
fn test_three_stage_install_with_failing_second_stage() {
    let log = Arc::new(Mutex::new(Vec::<String>::new()));

    let stage = |name: &'static str, fails: bool| {
        let log = log.clone();
        move |_: &mut ()| -> Result<(), StageError> {
            log.lock().unwrap().push(format!("execute {}", name));
            if fails { Err(format!("{} failed", name).into()) } else { Ok(()) }
        }
    };
    let undo = |name: &'static str| {
        let log = log.clone();
        rollback(move |_: &mut ()| {
            log.lock().unwrap().push(format!("rollback {}", name));
            Ok(())
        })
    };

    let tx = StagedTransaction::new("install")
        .stage("write descriptor", stage("1", false), undo("1"))
        .stage("mark executable", stage("2", true), undo("2"))
        .stage("register", stage("3", false), undo("3"));

    let err = tx.execute(&mut ()).unwrap_err();

    assert_eq!(
        *log.lock().unwrap(),
        vec!["execute 1", "execute 2", "rollback 2", "rollback 1"]
    );
    match err {
        TransactionError::ExecutionFailed {
            failure,
            rollback_errors,
        } => {
            assert_eq!(failure.stage, "mark executable");
            assert!(failure.to_string().contains("2 failed"));
            assert!(rollback_errors.is_empty());
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_parse_and_rebuild_launch_line() {
    let args = parse_command_line(r#"-name "My Service" --verbose start"#);
    assert_eq!(args.get("name"), Some(&ArgValue::Param("My Service".to_string())));
    assert_eq!(args.get("verbose"), Some(&ArgValue::Switch(true)));
    assert_eq!(args.get("start"), Some(&ArgValue::Verb));

    let rebuilt = build_command_line(&args);
    assert_eq!(parse_command_line(&rebuilt), args);
}

#[test]
fn test_process_record_from_status_file() {
    let root = tempfile::TempDir::new().unwrap();
    let dir = root.path().join("1234");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("stat"), "1234 (myproc) S 1 1234 1234 0 -1").unwrap();

    let record = ProcFs::with_root(root.path()).read(1234);
    assert_eq!(record.process_id, 1234);
    assert_eq!(record.process_name, "myproc");
    assert_eq!(record.run_state, RunState::InterruptibleWait);
}

struct RefusesToStart {
    stops: Arc<AtomicUsize>,
}

#[async_trait]
impl ServiceHandle for RefusesToStart {
    async fn start(&self, _control: Arc<dyn HostControl>) -> bool {
        false
    }

    async fn stop(&self, _control: Arc<dyn HostControl>) -> bool {
        self.stops.fetch_add(1, Ordering::SeqCst);
        true
    }
}

#[tokio::test]
async fn test_host_start_returning_false() {
    let stops = Arc::new(AtomicUsize::new(0));
    let settings = HostSettings::new(ServiceIdentity::new("refuser")).with_fault_handler(false);
    let host = ServiceHost::new(settings, RefusesToStart { stops: stops.clone() });

    let code = tokio::time::timeout(Duration::from_secs(5), host.run())
        .await
        .unwrap();

    assert_eq!(code, ExitCode::AbnormalExit);
    assert_eq!(stops.load(Ordering::SeqCst), 0);
}
