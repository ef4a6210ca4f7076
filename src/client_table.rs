//! Per-client memo of the most recent accepted request and, if committed,
//! its response — the basis of exactly-once client semantics.

use crate::identifiers::ClientId;
use std::collections::HashMap;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientTableEntry {
    pub request_number: u64,
    pub response: Option<String>,
}

impl ClientTableEntry {
    fn new(request_number: u64) -> Self {
        Self {
            request_number,
            response: None,
        }
    }
}

/// At most one entry per client; entries are updated in place and never
/// deleted.
#[derive(Clone, Debug, Default)]
pub struct ClientTable {
    entries: HashMap<ClientId, ClientTableEntry>,
}

impl ClientTable {
    pub fn get(&self, client: ClientId) -> Option<&ClientTableEntry> {
        self.entries.get(&client)
    }

    /// Install a fresh in-flight entry for `client`'s newly accepted
    /// request, discarding any prior response.
    pub fn start(&mut self, client: ClientId, request_number: u64) {
        self.entries
            .insert(client, ClientTableEntry::new(request_number));
    }

    /// Record the response for the entry's current request number. A
    /// no-op if the entry has since moved on to a newer request (can
    /// happen after a view-change replay races a late commit).
    pub fn complete(&mut self, client: ClientId, request_number: u64, response: String) {
        if let Some(entry) = self.entries.get_mut(&client) {
            if entry.request_number == request_number {
                entry.response = Some(response);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ClientId, &ClientTableEntry)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn client() -> ClientId {
        ClientId::from("127.0.0.1:9000".parse::<SocketAddr>().unwrap())
    }

    #[test]
    fn start_then_complete_records_response() {
        let mut table = ClientTable::default();
        table.start(client(), 0);
        assert!(table.get(client()).unwrap().response.is_none());

        table.complete(client(), 0, "update_performed_successfully".into());
        assert_eq!(
            table.get(client()).unwrap().response.as_deref(),
            Some("update_performed_successfully")
        );
    }

    #[test]
    fn starting_a_newer_request_clears_the_old_response() {
        let mut table = ClientTable::default();
        table.start(client(), 0);
        table.complete(client(), 0, "update_performed_successfully".into());

        table.start(client(), 1);
        assert!(table.get(client()).unwrap().response.is_none());
        assert_eq!(table.get(client()).unwrap().request_number, 1);
    }

    #[test]
    fn complete_is_a_no_op_for_a_stale_request_number() {
        let mut table = ClientTable::default();
        table.start(client(), 1);
        table.complete(client(), 0, "late".into());
        assert!(table.get(client()).unwrap().response.is_none());
    }
}
