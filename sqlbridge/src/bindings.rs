///
/// Pending parameter values for a multi-statement query.
///
/// A query's arguments are queued in source order. Each prepared statement
/// claims the values its placeholders ask for:
/// - a positional placeholder takes the first pending anonymous value
/// - a named placeholder takes the pending value given for that name,
///   else a value already claimed under that name, else the first name
///   found after pulling the next pending parameter map into the named table
///
/// A placeholder nothing satisfies binds NULL. Commands sit in the same queue
/// and run once they reach its front, between statements.
///

use std::collections::VecDeque;
use std::fmt;

use indexmap::IndexMap;

use crate::query::SqlCommand;
use crate::value::Value;

/// Sigils the engine accepts in front of a parameter name.
const PARAMETER_PREFIXES: [char; 4] = ['?', ':', '@', '$'];

pub(crate) fn strip_prefix(name: &str) -> &str {
    name.strip_prefix(PARAMETER_PREFIXES).unwrap_or(name)
}

pub(crate) enum Pending {
    Anon(Value),
    Named(String, Value),
    Params(IndexMap<String, Value>),
    Command(Box<dyn SqlCommand>),
}

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pending::Anon(v) => f.debug_tuple("Anon").field(v).finish(),
            Pending::Named(k, v) => f.debug_tuple("Named").field(k).field(v).finish(),
            Pending::Params(map) => f.debug_tuple("Params").field(map).finish(),
            Pending::Command(_) => f.write_str("Command"),
        }
    }
}

#[derive(Debug, Default)]
pub struct Bindings {
    pending: VecDeque<Pending>,
    named: IndexMap<String, Value>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_anon(&mut self, value: impl Into<Value>) {
        self.pending.push_back(Pending::Anon(value.into()));
    }

    pub fn push_named(&mut self, name: &str, value: impl Into<Value>) {
        self.pending
            .push_back(Pending::Named(strip_prefix(name).to_string(), value.into()));
    }

    pub fn push_params(&mut self, params: IndexMap<String, Value>) {
        let params = params
            .into_iter()
            .map(|(k, v)| (strip_prefix(&k).to_string(), v))
            .collect();
        self.pending.push_back(Pending::Params(params));
    }

    pub fn push_command(&mut self, command: Box<dyn SqlCommand>) {
        self.pending.push_back(Pending::Command(command));
    }

    /// Claims the value for the next positional placeholder.
    pub fn claim_anon(&mut self) -> Value {
        let position = self
            .pending
            .iter()
            .position(|p| matches!(p, Pending::Anon(_)));
        match position.and_then(|i| self.pending.remove(i)) {
            Some(Pending::Anon(value)) => value,
            _ => Value::Null,
        }
    }

    /// Claims the value for a named placeholder, as declared in the SQL
    /// (with or without its sigil).
    pub fn claim_named(&mut self, declared: &str) -> Value {
        let key = strip_prefix(declared);

        let position = self
            .pending
            .iter()
            .position(|p| matches!(p, Pending::Named(name, _) if name == key));
        if let Some(Pending::Named(name, value)) = position.and_then(|i| self.pending.remove(i)) {
            self.named.insert(name, value.clone());
            return value;
        }

        if let Some(value) = self.named.get(key) {
            return value.clone();
        }

        let position = self
            .pending
            .iter()
            .position(|p| matches!(p, Pending::Params(_)));
        if let Some(Pending::Params(params)) = position.and_then(|i| self.pending.remove(i)) {
            self.named.extend(params);
        }
        self.named.get(key).cloned().unwrap_or(Value::Null)
    }

    /// Takes the command at the front of the queue, if there is one.
    pub(crate) fn next_command(&mut self) -> Option<Box<dyn SqlCommand>> {
        match self.pending.front() {
            Some(Pending::Command(_)) => match self.pending.pop_front() {
                Some(Pending::Command(command)) => Some(command),
                _ => None,
            },
            _ => None,
        }
    }

    /// Takes every remaining command in order, dropping unclaimed values.
    pub(crate) fn drain_commands(&mut self) -> Vec<Box<dyn SqlCommand>> {
        self.pending
            .drain(..)
            .filter_map(|p| match p {
                Pending::Command(command) => Some(command),
                _ => None,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
