//! Staged transactions with reverse-order compensation.
//!
//! A [`StagedTransaction`] is an ordered list of stages, each with a
//! forward action and an optional rollback. Every stage is pushed onto the
//! rollback stack *before* it runs, so a stage that fails half-way is
//! rolled back together with everything that ran before it.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::fault::{isolated, panic_message};

/// Error type returned by stage bodies.
pub type StageError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Boxed stage body.
pub type StageFn<C> = Box<dyn Fn(&mut C) -> Result<(), StageError> + Send + Sync>;

/// Receives a structured event before and after every stage step.
pub type LogFn = Arc<dyn Fn(&TransactionEvent<'_>) + Send + Sync>;

/// Which half of a stage was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Execute,
    Rollback,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Execute => write!(f, "execute"),
            Phase::Rollback => write!(f, "rollback"),
        }
    }
}

/// Point in the transaction a log event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Begin,
    End,
}

/// Log event emitted around each stage step.
#[derive(Debug, Clone, Copy)]
pub struct TransactionEvent<'a> {
    pub transaction: &'a str,
    pub stage: &'a str,
    pub phase: Phase,
    pub step: Step,
}

impl fmt::Display for TransactionEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self.step {
            Step::Begin => "begin",
            Step::End => "end",
        };
        write!(
            f,
            "{}: {} {} stage '{}'",
            self.transaction, step, self.phase, self.stage
        )
    }
}

/// A single stage step that failed.
#[derive(Debug, Error)]
#[error("can't {phase} stage '{stage}': {source}")]
pub struct StageFailure {
    pub stage: String,
    pub phase: Phase,
    #[source]
    pub source: StageError,
}

/// Aggregate failure of a transaction.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// A forward stage failed; everything executed so far was rolled back.
    #[error("{failure}{}", describe_rollback_errors(.rollback_errors))]
    ExecutionFailed {
        #[source]
        failure: StageFailure,
        rollback_errors: Vec<StageFailure>,
    },

    /// One or more rollback steps failed during a standalone rollback.
    #[error("rollback failed with {} error(s): {}", .errors.len(), join_failures(.errors))]
    RollbackFailed { errors: Vec<StageFailure> },
}

impl TransactionError {
    /// Name of the stage whose forward action failed, if any.
    pub fn failed_stage(&self) -> Option<&str> {
        match self {
            TransactionError::ExecutionFailed { failure, .. } => Some(&failure.stage),
            TransactionError::RollbackFailed { .. } => None,
        }
    }

    /// All rollback failures carried by this error.
    pub fn rollback_errors(&self) -> &[StageFailure] {
        match self {
            TransactionError::ExecutionFailed {
                rollback_errors, ..
            } => rollback_errors,
            TransactionError::RollbackFailed { errors } => errors,
        }
    }
}

fn join_failures(errors: &[StageFailure]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn describe_rollback_errors(errors: &[StageFailure]) -> String {
    if errors.is_empty() {
        String::new()
    } else {
        format!(" (rollback errors: {})", join_failures(errors))
    }
}

struct Stage<C> {
    name: String,
    execute: Option<StageFn<C>>,
    rollback: Option<StageFn<C>>,
}

/// Ordered, rollback-capable sequence of stages over a context `C`.
pub struct StagedTransaction<C> {
    name: String,
    stages: Vec<Stage<C>>,
    log: LogFn,
}

fn default_log() -> LogFn {
    Arc::new(|event: &TransactionEvent<'_>| {
        debug!(
            transaction = event.transaction,
            stage = event.stage,
            phase = %event.phase,
            "{}",
            event
        );
    })
}

impl<C> StagedTransaction<C> {
    /// Create an empty transaction.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            log: default_log(),
        }
    }

    /// Replace the log function.
    pub fn with_log(mut self, log: LogFn) -> Self {
        self.log = log;
        self
    }

    /// Append a stage with a forward action and an optional rollback.
    ///
    /// # Panics
    ///
    /// Panics if `name` is empty.
    pub fn stage<E>(mut self, name: impl Into<String>, execute: E, rollback: Option<StageFn<C>>) -> Self
    where
        E: Fn(&mut C) -> Result<(), StageError> + Send + Sync + 'static,
    {
        let name = name.into();
        assert!(!name.is_empty(), "stage name must not be empty");
        self.stages.push(Stage {
            name,
            execute: Some(Box::new(execute)),
            rollback,
        });
        self
    }

    /// Append a stage that only has a rollback action.
    pub fn rollback_only<R>(mut self, name: impl Into<String>, rollback: R) -> Self
    where
        R: Fn(&mut C) -> Result<(), StageError> + Send + Sync + 'static,
    {
        let name = name.into();
        assert!(!name.is_empty(), "stage name must not be empty");
        self.stages.push(Stage {
            name,
            execute: None,
            rollback: Some(Box::new(rollback)),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|s| s.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order, rolling back on the first failure.
    pub fn execute(&self, context: &mut C) -> Result<(), TransactionError> {
        self.execute_with_hooks(context, &mut || {}, &mut || {})
    }

    /// Like [`execute`](Self::execute), calling `before_rollback` and
    /// `after_rollback` around the compensation pass if one happens.
    pub fn execute_with_hooks(
        &self,
        context: &mut C,
        before_rollback: &mut dyn FnMut(),
        after_rollback: &mut dyn FnMut(),
    ) -> Result<(), TransactionError> {
        let mut executed: Vec<&Stage<C>> = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            executed.push(stage);

            if let Err(failure) = self.run_step(stage, Phase::Execute, context) {
                before_rollback();
                let rollback_errors = executed
                    .iter()
                    .rev()
                    .filter_map(|s| self.run_step(s, Phase::Rollback, context).err())
                    .collect();
                after_rollback();

                return Err(TransactionError::ExecutionFailed {
                    failure,
                    rollback_errors,
                });
            }
        }

        Ok(())
    }

    /// Roll back every stage in reverse declaration order.
    pub fn rollback(&self, context: &mut C) -> Result<(), TransactionError> {
        let errors: Vec<StageFailure> = self
            .stages
            .iter()
            .rev()
            .filter_map(|s| self.run_step(s, Phase::Rollback, context).err())
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TransactionError::RollbackFailed { errors })
        }
    }

    fn run_step(&self, stage: &Stage<C>, phase: Phase, context: &mut C) -> Result<(), StageFailure> {
        let body = match phase {
            Phase::Execute => stage.execute.as_ref(),
            Phase::Rollback => stage.rollback.as_ref(),
        };
        let Some(body) = body else {
            return Ok(());
        };

        self.emit(&stage.name, phase, Step::Begin);

        let outcome = match catch_unwind(AssertUnwindSafe(|| isolated(|| body(context)))) {
            Ok(result) => result,
            Err(payload) => Err(format!("stage panicked: {}", panic_message(payload.as_ref())).into()),
        };

        self.emit(&stage.name, phase, Step::End);

        outcome.map_err(|source| StageFailure {
            stage: stage.name.clone(),
            phase,
            source,
        })
    }

    fn emit(&self, stage: &str, phase: Phase, step: Step) {
        let event = TransactionEvent {
            transaction: &self.name,
            stage,
            phase,
            step,
        };
        // Logging never influences the outcome.
        let _ = catch_unwind(AssertUnwindSafe(|| isolated(|| (self.log)(&event))));
    }
}

/// Box a rollback closure for [`StagedTransaction::stage`].
pub fn rollback<C, R>(rollback: R) -> Option<StageFn<C>>
where
    R: Fn(&mut C) -> Result<(), StageError> + Send + Sync + 'static,
{
    Some(Box::new(rollback))
}

#[cfg(test)]
#[path = "transaction_tests.rs"]
mod tests;
