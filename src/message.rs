//! The typed wire messages exchanged between clients and replicas.
//! `crate::codec` handles the colon/dash/comma text encoding into and out
//! of these types; keeping the message set as a struct-per-variant enum
//! (rather than one flat struct with optional fields) keeps each
//! message's required fields visible in its own type.

use crate::identifiers::ClientId;
use crate::log::LogEntry;
use crate::viewstamp::{OpNumber, View};
use std::net::SocketAddr;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Message {
    ClientRequest(ClientRequest),
    ServerResponse(ServerResponse),
    Prepare(Prepare),
    PrepareOk(PrepareOk),
    Commit(Commit),
    CatchupRequest(CatchupRequest),
    CatchupResponse(CatchupResponse),
    StartViewChange(StartViewChange),
    DoViewChange(DoViewChange),
    StartView(StartView),
}

/// `request_number` is kept as the raw wire text rather than a parsed
/// `u64`: replying `non_numeric_request_number` to the client when it
/// fails to parse is the replica engine's job, since only it has the
/// client's address in hand — the codec itself drops malformed messages
/// silently and has no client to answer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientRequest {
    pub command: String,
    pub request_number: String,
}

impl From<ClientRequest> for Message {
    fn from(value: ClientRequest) -> Self {
        Message::ClientRequest(value)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerResponse {
    pub view: View,
    pub response: String,
}

impl From<ServerResponse> for Message {
    fn from(value: ServerResponse) -> Self {
        Message::ServerResponse(value)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Prepare {
    pub view: View,
    pub command: String,
    pub request_number: u64,
    pub client_id: ClientId,
    pub op_number: OpNumber,
    pub commit_number: OpNumber,
}

impl From<Prepare> for Message {
    fn from(value: Prepare) -> Self {
        Message::Prepare(value)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PrepareOk {
    pub view: View,
    pub op_number: OpNumber,
    pub client_id: ClientId,
    pub replica_addr: SocketAddr,
}

impl From<PrepareOk> for Message {
    fn from(value: PrepareOk) -> Self {
        Message::PrepareOk(value)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Commit {
    pub view: View,
    pub request_number: u64,
    pub client_id: ClientId,
}

impl From<Commit> for Message {
    fn from(value: Commit) -> Self {
        Message::Commit(value)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CatchupRequest {
    pub my_op_number: OpNumber,
    pub target_op_number: OpNumber,
}

impl From<CatchupRequest> for Message {
    fn from(value: CatchupRequest) -> Self {
        Message::CatchupRequest(value)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CatchupResponse {
    pub commit_number: OpNumber,
    pub entries: Vec<LogEntry>,
}

impl From<CatchupResponse> for Message {
    fn from(value: CatchupResponse) -> Self {
        Message::CatchupResponse(value)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StartViewChange {
    pub new_view_number: View,
}

impl From<StartViewChange> for Message {
    fn from(value: StartViewChange) -> Self {
        Message::StartViewChange(value)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DoViewChange {
    pub old_view: View,
    pub new_view: View,
    pub op_number: OpNumber,
    pub commit_number: OpNumber,
    pub log: Vec<LogEntry>,
}

impl From<DoViewChange> for Message {
    fn from(value: DoViewChange) -> Self {
        Message::DoViewChange(value)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StartView {
    pub op_number: OpNumber,
    pub new_view: View,
    pub commit_number: OpNumber,
    pub log: Vec<LogEntry>,
}

impl From<StartView> for Message {
    fn from(value: StartView) -> Self {
        Message::StartView(value)
    }
}
