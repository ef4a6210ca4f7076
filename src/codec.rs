//! Text wire codec: messages are plain text with `:` separating fields
//! and `-` as the log entry's secondary delimiter, with `,` joining
//! entries in a transferred log slice. Fields are positional; unknown
//! message types are ignored.
//!
//! Addressing is loopback-only, so `client_id` and `replica_addr` travel
//! on the wire as a bare port number and are reconstructed against
//! `127.0.0.1` on decode, rather than encoding full socket addresses.

use crate::identifiers::ClientId;
use crate::log::LogEntry;
use crate::message::{
    CatchupRequest, CatchupResponse, ClientRequest, Commit, DoViewChange, Message, Prepare,
    PrepareOk, ServerResponse, StartView, StartViewChange,
};
use crate::viewstamp::{OpNumber, View};
use std::net::{Ipv4Addr, SocketAddr};
use thiserror::Error;

const DELIMITER: char = ':';
const ENTRY_DELIMITER: char = '-';
const LOG_DELIMITER: char = ',';

const CLIENT_REQUEST: &str = "client_request";
const SERVER_RESPONSE: &str = "server_response";
const PREPARE_REQUEST: &str = "prepare_request";
const PREPARE_RESPONSE: &str = "prepare_response";
const COMMIT_MESSAGE: &str = "commit_message";
const CATCHUP_REQUEST: &str = "catchup_request";
const CATCHUP_RESPONSE: &str = "catchup_response";
const START_VIEW_CHANGE: &str = "start_view_change";
const DO_VIEW_CHANGE: &str = "do_view_change";
const START_VIEW: &str = "start_view";

#[derive(Debug, Error, Eq, PartialEq)]
pub enum CodecError {
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("wrong number of fields for {0}: expected {1}, got {2}")]
    FieldCount(&'static str, usize, usize),
    #[error("field {0} is not a valid integer")]
    InvalidInteger(&'static str),
    #[error("command contains a reserved delimiter character (':', '-', or ',')")]
    ReservedCharacterInCommand,
}

/// Reject commands that would corrupt the delimiter scheme.
pub fn validate_command(command: &str) -> Result<(), CodecError> {
    if command.contains([':', '-', ',']) {
        Err(CodecError::ReservedCharacterInCommand)
    } else {
        Ok(())
    }
}

fn port_of(address: SocketAddr) -> u16 {
    address.port()
}

fn client_id_from_port(port: u16) -> ClientId {
    ClientId::from(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
}

fn parse_u16(field: &str, name: &'static str) -> Result<u16, CodecError> {
    field.parse().map_err(|_| CodecError::InvalidInteger(name))
}

fn parse_u64(field: &str, name: &'static str) -> Result<u64, CodecError> {
    field.parse().map_err(|_| CodecError::InvalidInteger(name))
}

fn encode_entry(entry: &LogEntry) -> String {
    format!(
        "{}{ENTRY_DELIMITER}{}{ENTRY_DELIMITER}{}",
        entry.command,
        entry.request_number,
        port_of(entry.client_id.address())
    )
}

fn decode_entry(field: &str) -> Result<LogEntry, CodecError> {
    let parts: Vec<&str> = field.split(ENTRY_DELIMITER).collect();
    if parts.len() != 3 {
        return Err(CodecError::FieldCount("log entry", 3, parts.len()));
    }
    let request_number = parse_u64(parts[1], "log entry request_number")?;
    let port = parse_u16(parts[2], "log entry client_id")?;
    Ok(LogEntry::new(
        parts[0].to_string(),
        request_number,
        client_id_from_port(port),
    ))
}

pub fn encode_log(entries: &[LogEntry]) -> String {
    entries
        .iter()
        .map(encode_entry)
        .collect::<Vec<_>>()
        .join(&LOG_DELIMITER.to_string())
}

pub fn decode_log(field: &str) -> Result<Vec<LogEntry>, CodecError> {
    if field.is_empty() {
        return Ok(Vec::new());
    }
    field.split(LOG_DELIMITER).map(decode_entry).collect()
}

pub fn encode(message: &Message) -> String {
    match message {
        Message::ClientRequest(m) => {
            format!("{CLIENT_REQUEST}{DELIMITER}{}{DELIMITER}{}", m.command, m.request_number)
        }
        Message::ServerResponse(m) => {
            format!(
                "{SERVER_RESPONSE}{DELIMITER}{}{DELIMITER}{}",
                m.view.as_u64(),
                m.response
            )
        }
        Message::Prepare(m) => format!(
            "{PREPARE_REQUEST}{DELIMITER}{}{DELIMITER}{}{DELIMITER}{}{DELIMITER}{}{DELIMITER}{}{DELIMITER}{}",
            m.view.as_u64(),
            m.command,
            m.request_number,
            port_of(m.client_id.address()),
            m.op_number.as_u64(),
            m.commit_number.as_u64(),
        ),
        Message::PrepareOk(m) => format!(
            "{PREPARE_RESPONSE}{DELIMITER}{}{DELIMITER}{}{DELIMITER}{}{DELIMITER}{}",
            m.view.as_u64(),
            m.op_number.as_u64(),
            port_of(m.client_id.address()),
            port_of(m.replica_addr),
        ),
        Message::Commit(m) => format!(
            "{COMMIT_MESSAGE}{DELIMITER}{}{DELIMITER}{}{DELIMITER}{}",
            m.view.as_u64(),
            m.request_number,
            port_of(m.client_id.address()),
        ),
        Message::CatchupRequest(m) => format!(
            "{CATCHUP_REQUEST}{DELIMITER}{}{DELIMITER}{}",
            m.my_op_number.as_u64(),
            m.target_op_number.as_u64(),
        ),
        Message::CatchupResponse(m) => format!(
            "{CATCHUP_RESPONSE}{DELIMITER}{}{DELIMITER}{}",
            m.commit_number.as_u64(),
            encode_log(&m.entries),
        ),
        Message::StartViewChange(m) => {
            format!("{START_VIEW_CHANGE}{DELIMITER}{}", m.new_view_number.as_u64())
        }
        Message::DoViewChange(m) => format!(
            "{DO_VIEW_CHANGE}{DELIMITER}{}{DELIMITER}{}{DELIMITER}{}{DELIMITER}{}{DELIMITER}{}",
            m.old_view.as_u64(),
            m.new_view.as_u64(),
            m.op_number.as_u64(),
            m.commit_number.as_u64(),
            encode_log(&m.log),
        ),
        Message::StartView(m) => format!(
            "{START_VIEW}{DELIMITER}{}{DELIMITER}{}{DELIMITER}{}{DELIMITER}{}",
            m.op_number.as_u64(),
            m.new_view.as_u64(),
            m.commit_number.as_u64(),
            encode_log(&m.log),
        ),
    }
}

pub fn decode(input: &str) -> Result<Message, CodecError> {
    let parts: Vec<&str> = input.splitn(2, DELIMITER).collect();
    let msg_type = parts[0];
    let rest = parts.get(1).copied().unwrap_or("");
    let fields: Vec<&str> = if rest.is_empty() && parts.len() == 1 {
        Vec::new()
    } else {
        rest.split(DELIMITER).collect()
    };

    match msg_type {
        CLIENT_REQUEST => {
            expect(fields.len(), 2, "client_request")?;
            Ok(ClientRequest {
                command: fields[0].to_string(),
                request_number: fields[1].to_string(),
            }
            .into())
        }
        SERVER_RESPONSE => {
            expect(fields.len(), 2, "server_response")?;
            let view = View::from(parse_u64(fields[0], "view")?);
            Ok(ServerResponse {
                view,
                response: fields[1].to_string(),
            }
            .into())
        }
        PREPARE_REQUEST => {
            expect(fields.len(), 6, "prepare_request")?;
            let view = View::from(parse_u64(fields[0], "view")?);
            let request_number = parse_u64(fields[2], "request_number")?;
            let client_port = parse_u16(fields[3], "client_id")?;
            let op_number = OpNumber::from(parse_u64(fields[4], "op_number")?);
            let commit_number = OpNumber::from(parse_u64(fields[5], "commit_number")?);
            Ok(Prepare {
                view,
                command: fields[1].to_string(),
                request_number,
                client_id: client_id_from_port(client_port),
                op_number,
                commit_number,
            }
            .into())
        }
        PREPARE_RESPONSE => {
            expect(fields.len(), 4, "prepare_response")?;
            let view = View::from(parse_u64(fields[0], "view")?);
            let op_number = OpNumber::from(parse_u64(fields[1], "op_number")?);
            let client_port = parse_u16(fields[2], "client_id")?;
            let replica_port = parse_u16(fields[3], "replica_addr")?;
            Ok(PrepareOk {
                view,
                op_number,
                client_id: client_id_from_port(client_port),
                replica_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, replica_port)),
            }
            .into())
        }
        COMMIT_MESSAGE => {
            expect(fields.len(), 3, "commit_message")?;
            let view = View::from(parse_u64(fields[0], "view")?);
            let request_number = parse_u64(fields[1], "request_number")?;
            let client_port = parse_u16(fields[2], "client_id")?;
            Ok(Commit {
                view,
                request_number,
                client_id: client_id_from_port(client_port),
            }
            .into())
        }
        CATCHUP_REQUEST => {
            expect(fields.len(), 2, "catchup_request")?;
            let my_op_number = OpNumber::from(parse_u64(fields[0], "my_op_number")?);
            let target_op_number = OpNumber::from(parse_u64(fields[1], "target_op_number")?);
            Ok(CatchupRequest {
                my_op_number,
                target_op_number,
            }
            .into())
        }
        CATCHUP_RESPONSE => {
            expect(fields.len(), 2, "catchup_response")?;
            let commit_number = OpNumber::from(parse_u64(fields[0], "commit_number")?);
            let entries = decode_log(fields[1])?;
            Ok(CatchupResponse {
                commit_number,
                entries,
            }
            .into())
        }
        START_VIEW_CHANGE => {
            expect(fields.len(), 1, "start_view_change")?;
            let new_view_number = View::from(parse_u64(fields[0], "new_view_number")?);
            Ok(StartViewChange { new_view_number }.into())
        }
        DO_VIEW_CHANGE => {
            expect(fields.len(), 5, "do_view_change")?;
            let old_view = View::from(parse_u64(fields[0], "old_view")?);
            let new_view = View::from(parse_u64(fields[1], "new_view")?);
            let op_number = OpNumber::from(parse_u64(fields[2], "op_number")?);
            let commit_number = OpNumber::from(parse_u64(fields[3], "commit_number")?);
            let log = decode_log(fields[4])?;
            Ok(DoViewChange {
                old_view,
                new_view,
                op_number,
                commit_number,
                log,
            }
            .into())
        }
        START_VIEW => {
            expect(fields.len(), 4, "start_view")?;
            let op_number = OpNumber::from(parse_u64(fields[0], "op_number")?);
            let new_view = View::from(parse_u64(fields[1], "new_view")?);
            let commit_number = OpNumber::from(parse_u64(fields[2], "commit_number")?);
            let log = decode_log(fields[3])?;
            Ok(StartView {
                op_number,
                new_view,
                commit_number,
                log,
            }
            .into())
        }
        other => Err(CodecError::UnknownType(other.to_string())),
    }
}

fn expect(got: usize, want: usize, name: &'static str) -> Result<(), CodecError> {
    if got == want {
        Ok(())
    } else {
        Err(CodecError::FieldCount(name, want, got))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_client_request() {
        let message: Message = ClientRequest {
            command: "set k 1".to_string(),
            request_number: "0".to_string(),
        }
        .into();
        let encoded = encode(&message);
        assert_eq!(encoded, "client_request:set k 1:0");
        assert_eq!(decode(&encoded).unwrap(), message);
    }

    #[test]
    fn round_trips_prepare_request() {
        let message: Message = Prepare {
            view: View::from(0),
            command: "set k 1".to_string(),
            request_number: 0,
            client_id: client_id_from_port(9000),
            op_number: OpNumber::from(1),
            commit_number: OpNumber::from(0),
        }
        .into();
        let encoded = encode(&message);
        assert_eq!(decode(&encoded).unwrap(), message);
    }

    #[test]
    fn round_trips_catchup_response_with_log_entries() {
        let entries = vec![
            LogEntry::new("set k 1".into(), 0, client_id_from_port(9000)),
            LogEntry::new("set k 2".into(), 1, client_id_from_port(9000)),
        ];
        let message: Message = CatchupResponse {
            commit_number: OpNumber::from(2),
            entries: entries.clone(),
        }
        .into();
        let encoded = encode(&message);
        assert_eq!(decode(&encoded).unwrap(), message);
    }

    #[test]
    fn catchup_response_with_empty_log_round_trips() {
        let message: Message = CatchupResponse {
            commit_number: OpNumber::from(0),
            entries: Vec::new(),
        }
        .into();
        assert_eq!(decode(&encode(&message)).unwrap(), message);
    }

    #[test]
    fn unknown_message_type_is_an_error_callers_can_drop() {
        assert_eq!(
            decode("gossip:hello"),
            Err(CodecError::UnknownType("gossip".to_string()))
        );
    }

    #[test]
    fn non_numeric_request_number_decodes_as_raw_text() {
        // The codec never rejects this: answering the client with
        // `non_numeric_request_number` needs the client's address in
        // hand, which only the caller of `decode` has.
        let message = decode("client_request:set k 1:abc").unwrap();
        assert_eq!(
            message,
            ClientRequest {
                command: "set k 1".to_string(),
                request_number: "abc".to_string(),
            }
            .into()
        );
    }

    #[test]
    fn commands_with_reserved_characters_are_rejected() {
        assert!(validate_command("set k 1").is_ok());
        assert_eq!(
            validate_command("set k:1").unwrap_err(),
            CodecError::ReservedCharacterInCommand
        );
        assert_eq!(
            validate_command("set k-1").unwrap_err(),
            CodecError::ReservedCharacterInCommand
        );
        assert_eq!(
            validate_command("set k,1").unwrap_err(),
            CodecError::ReservedCharacterInCommand
        );
    }
}
