//! The replicated operation log: an ordered sequence of `LogEntry`,
//! 1-based indexed by op-number so that position `i` always holds the
//! operation with op-number `i`, without an off-by-one at every call site.

use crate::identifiers::ClientId;
use crate::viewstamp::OpNumber;
use std::ops::Index;

/// One accepted client operation: the command text, the client's request
/// number, and which client it came from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogEntry {
    pub command: String,
    pub request_number: u64,
    pub client_id: ClientId,
}

impl LogEntry {
    pub fn new(command: String, request_number: u64, client_id: ClientId) -> Self {
        Self {
            command,
            request_number,
            client_id,
        }
    }
}

/// A 1-based, append-only log. It never shrinks: view-change always
/// adopts the candidate with the longest agreeing log, so entries are
/// only ever appended, or replaced wholesale on `StartView`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Log {
    entries: Vec<LogEntry>,
}

impl Log {
    pub fn op_number(&self) -> OpNumber {
        OpNumber::from(self.entries.len() as u64)
    }

    pub fn push(&mut self, entry: LogEntry) -> OpNumber {
        self.entries.push(entry);
        self.op_number()
    }

    pub fn get(&self, op_number: OpNumber) -> Option<&LogEntry> {
        let index = op_number.as_u64().checked_sub(1)?;
        self.entries.get(index as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries strictly after `from` (exclusive) up to and including `to`
    /// (inclusive), in op-number order. Used to build a `StartView`/
    /// `DoViewChange` log payload.
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// The catchup slice: entries with op-number strictly between `from`
    /// and `to`, excluding both ends. Both sides of a transfer must agree
    /// on this exact boundary or a lagging replica silently misses one
    /// entry.
    pub fn slice_exclusive(&self, from: OpNumber, to: OpNumber) -> Vec<LogEntry> {
        let start = from.as_u64() + 1;
        let end = to.as_u64();
        (start..end)
            .filter_map(|n| self.get(OpNumber::from(n)).cloned())
            .collect()
    }

    /// Replace the whole log wholesale, as a view-change winner's adopted
    /// log replaces whatever a replica had before.
    pub fn replace(&mut self, entries: Vec<LogEntry>) {
        self.entries = entries;
    }

    pub fn as_slice(&self) -> &[LogEntry] {
        &self.entries
    }
}

impl Index<OpNumber> for Log {
    type Output = LogEntry;

    fn index(&self, index: OpNumber) -> &Self::Output {
        self.get(index).expect("op-number out of range")
    }
}
