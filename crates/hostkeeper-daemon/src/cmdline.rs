//! Launch-line grammar shared by the installer and the status resolver.
//!
//! Tokens are whitespace separated except for double-quoted segments:
//!
//! - `-name value` is a parameter,
//! - `--name` is a boolean switch,
//! - any other token is a verb.
//!
//! Keys are matched case-insensitively and keep the position of their
//! first occurrence, so re-serialising a parsed line preserves its order.

use std::sync::LazyLock;

use regex::Regex;

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"("[^"]*")|([^\s]+)"#).expect("token pattern is valid"));

/// Value attached to a command-line key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    /// Bare word, e.g. `start`.
    Verb,
    /// `--name`; a `false` switch is dropped when serialised.
    Switch(bool),
    /// `-name "value"`; an empty value is dropped when serialised.
    Param(String),
}

/// Ordered, case-insensitive mapping of command-line keys to values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLineArgs {
    entries: Vec<(String, ArgValue)>,
}

impl CommandLineArgs {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(key))
    }

    /// Insert or overwrite a key. An existing key keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, value: ArgValue) {
        let key = key.into();
        match self.position(&key) {
            Some(index) => self.entries[index].1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn set_param(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.insert(key, ArgValue::Param(value.into()));
    }

    pub fn set_switch(&mut self, key: impl Into<String>, value: bool) {
        self.insert(key, ArgValue::Switch(value));
    }

    pub fn add_verb(&mut self, key: impl Into<String>) {
        self.insert(key, ArgValue::Verb);
    }

    pub fn get(&self, key: &str) -> Option<&ArgValue> {
        self.position(key).map(|index| &self.entries[index].1)
    }

    /// Parameter value for `key`, if `key` was given as a parameter.
    pub fn param(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(ArgValue::Param(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn switch(&self, key: &str) -> bool {
        matches!(self.get(key), Some(ArgValue::Switch(true)))
    }

    pub fn is_verb(&self, key: &str) -> bool {
        matches!(self.get(key), Some(ArgValue::Verb))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<ArgValue> {
        self.position(key).map(|index| self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, ArgValue)> for CommandLineArgs {
    fn from_iter<I: IntoIterator<Item = (K, ArgValue)>>(iter: I) -> Self {
        let mut args = CommandLineArgs::new();
        for (key, value) in iter {
            args.insert(key, value);
        }
        args
    }
}

fn tokenize(command_line: &str) -> impl Iterator<Item = &str> {
    TOKEN.find_iter(command_line).map(|m| m.as_str())
}

fn parse_tokens<'a>(tokens: impl Iterator<Item = &'a str>) -> CommandLineArgs {
    let mut result = CommandLineArgs::new();
    let mut pending_param: Option<&str> = None;

    for token in tokens {
        if let Some(name) = pending_param.take() {
            result.set_param(name, token.trim_matches('"'));
            continue;
        }

        let bytes = token.as_bytes();
        if bytes.len() >= 2 && bytes[0] == b'-' && bytes[1] != b'-' {
            pending_param = Some(&token[1..]);
        } else if bytes.len() >= 3 && bytes[0] == b'-' && bytes[1] == b'-' && bytes[2] != b'-' {
            result.set_switch(&token[2..], true);
        } else {
            result.add_verb(token);
        }
    }

    result
}

/// Parse a command line that does not start with the program name.
pub fn parse_command_line(command_line: &str) -> CommandLineArgs {
    parse_tokens(tokenize(command_line))
}

/// Parse a full process command line, skipping the program token.
pub fn parse_process_command_line(command_line: &str) -> CommandLineArgs {
    parse_tokens(tokenize(command_line).skip(1))
}

fn escape_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Serialise arguments back into a launch line.
///
/// A parameter with an empty value is omitted, so an empty parameter and
/// an absent one produce the same output.
pub fn build_command_line(args: &CommandLineArgs) -> String {
    let mut parts = Vec::with_capacity(args.len());

    for (key, value) in args.iter() {
        match value {
            ArgValue::Verb => parts.push(key.to_string()),
            ArgValue::Switch(true) => parts.push(format!("--{}", key)),
            ArgValue::Switch(false) => {}
            ArgValue::Param(value) if value.is_empty() => {}
            ArgValue::Param(value) => parts.push(format!("-{} \"{}\"", key, escape_value(value))),
        }
    }

    parts.join(" ")
}

/// Rebuild the current process arguments (without the program name)
/// into the normalised launch-line form.
pub fn normalize_command_line<I, S>(args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let joined = args
        .into_iter()
        .map(|a| {
            let a = a.as_ref();
            if a.chars().any(char::is_whitespace) && !a.starts_with('"') {
                format!("\"{}\"", a)
            } else {
                a.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    build_command_line(&parse_command_line(&joined))
}

#[cfg(test)]
#[path = "cmdline_tests.rs"]
mod tests;
