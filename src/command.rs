//! Out-of-band control plane for a running crawl.
//!
//! A [`CommandChannel`] lets an operator thread interact with the loop
//! without sharing memory: commands go in through [`put_command`], the loop
//! drains them once per iteration, and replies come back through result
//! slots keyed by command id. Built-in command names cover a stats snapshot
//! and a graceful stop; user command handlers are registered at build time.
//!
//! [`put_command`]: CommandChannel::put_command

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

/// Built-in command: reply with the current stats snapshot.
pub const COMMAND_STATS: &str = "stats";
/// Built-in command: request a graceful shutdown.
pub const COMMAND_STOP: &str = "stop";

/// One queued control command.
#[derive(Debug, Clone)]
pub struct Command {
    /// Id to retrieve the result under.
    pub id: u64,
    /// Command handler name.
    pub name: String,
    /// Arbitrary command payload.
    pub payload: Value,
}

struct Inner {
    next_id: AtomicU64,
    tx: kanal::Sender<Command>,
    rx: kanal::Receiver<Command>,
    results: DashMap<u64, Value>,
}

/// Shared command/result mailbox between operator threads and the loop.
///
/// Clones share the same mailbox.
#[derive(Clone)]
pub struct CommandChannel {
    inner: Arc<Inner>,
}

impl CommandChannel {
    /// Creates an empty channel.
    pub fn new() -> Self {
        let (tx, rx) = kanal::unbounded();
        CommandChannel {
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(1),
                tx,
                rx,
                results: DashMap::new(),
            }),
        }
    }

    /// Enqueues a command and returns the id its result will appear under.
    pub fn put_command(&self, name: impl Into<String>, payload: Value) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.inner.tx.send(Command {
            id,
            name: name.into(),
            payload,
        });
        id
    }

    /// Removes and returns the oldest pending command, if any.
    pub fn pop_command(&self) -> Option<Command> {
        self.inner.rx.try_recv().ok().flatten()
    }

    /// Stores the result for command `id`.
    pub fn put_result(&self, id: u64, result: Value) {
        self.inner.results.insert(id, result);
    }

    /// Removes and returns the result for command `id`, if present yet.
    pub fn pop_result(&self, id: u64) -> Option<Value> {
        self.inner.results.remove(&id).map(|(_, value)| value)
    }
}

impl Default for CommandChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn commands_round_trip_through_result_slots() {
        let channel = CommandChannel::new();
        let operator = channel.clone();

        let id = operator.put_command(COMMAND_STATS, Value::Null);
        let command = channel.pop_command().unwrap();
        assert_eq!(command.id, id);
        assert_eq!(command.name, COMMAND_STATS);

        channel.put_result(id, json!({"request": 5}));
        assert_eq!(operator.pop_result(id).unwrap()["request"], 5);
        assert!(operator.pop_result(id).is_none());
    }

    #[test]
    fn pop_command_on_empty_channel_is_none() {
        let channel = CommandChannel::new();
        assert!(channel.pop_command().is_none());
    }

    #[test]
    fn ids_are_distinct() {
        let channel = CommandChannel::new();
        let first = channel.put_command(COMMAND_STOP, Value::Null);
        let second = channel.put_command(COMMAND_STOP, Value::Null);
        assert_ne!(first, second);
    }
}
