//! The client engine: builds monotonically-numbered requests, sends to
//! the suspected primary, broadcasts to every replica on timeout, and
//! records the view hint carried by every reply. Built over
//! [`crate::transport::Transport`] rather than a raw socket.

use crate::codec;
use crate::configuration::Configuration;
use crate::message::{ClientRequest, Message};
use crate::transport::Transport;
use crate::viewstamp::View;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

/// How long to wait for a reply before broadcasting the request to every
/// replica.
pub const REPLY_TIMEOUT: Duration = Duration::from_millis(1000);

pub struct Client {
    configuration: Configuration,
    transport: Transport,
    current_view_number: View,
    current_request_number: u64,
}

impl Client {
    pub fn new(configuration: Configuration, transport: Transport) -> Self {
        Self {
            configuration,
            transport,
            current_view_number: View::default(),
            current_request_number: 0,
        }
    }

    /// The next request number, incrementing the counter in place. Split
    /// out of `send` so the counter's monotonicity can be driven directly
    /// in a unit test without a full send/receive round trip.
    fn next_request_number(&mut self) -> u64 {
        let request_number = self.current_request_number;
        self.current_request_number += 1;
        request_number
    }

    /// Builds a request, sends it to the presumed primary, and waits for
    /// a response, broadcasting to every replica and waiting again on
    /// each timeout. Never gives up on its own; the caller decides
    /// whether/when to abort.
    pub async fn send(&mut self, command: &str) -> std::io::Result<String> {
        let request_number = self.next_request_number();

        let encoded = codec::encode(&Message::ClientRequest(ClientRequest {
            command: command.to_string(),
            request_number: request_number.to_string(),
        }));

        let primary = self
            .configuration
            .primary_address(self.current_view_number);
        self.transport.send(primary, &encoded).await?;

        loop {
            match self.transport.receive_within(REPLY_TIMEOUT).await? {
                Some((payload, _from)) => match codec::decode(&payload) {
                    Ok(Message::ServerResponse(response)) => {
                        self.current_view_number = self.current_view_number.max(response.view);
                        return Ok(response.response);
                    }
                    // Anything else arriving on this socket (a stray
                    // message from a prior request, a malformed datagram)
                    // is not the reply we're waiting for; keep waiting.
                    _ => continue,
                },
                None => {
                    log::debug!("client: timed out waiting for a reply, broadcasting to every replica");
                    for &peer in self.configuration.peers() {
                        self.transport.send(peer, &encoded).await?;
                    }
                }
            }
        }
    }

    /// Reads one newline-terminated command per iteration from standard
    /// input, sends it, and prints `response: <response>`.
    pub async fn run_repl<R>(&mut self, input: R) -> std::io::Result<()>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        let mut lines = BufReader::new(input).lines();
        while let Some(line) = lines.next_line().await? {
            if line.is_empty() {
                continue;
            }
            let response = self.send(&line).await?;
            println!("response: {response}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_numbers_are_monotonically_increasing() {
        let configuration = Configuration::new(vec![
            "127.0.0.1:8000".parse().unwrap(),
            "127.0.0.1:8001".parse().unwrap(),
            "127.0.0.1:8002".parse().unwrap(),
        ]);
        // Port 0: let the OS assign a free loopback port, since this test
        // never actually sends or receives anything over it.
        let transport = Transport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let mut client = Client::new(configuration, transport);

        assert_eq!(client.next_request_number(), 0);
        assert_eq!(client.next_request_number(), 1);
        assert_eq!(client.next_request_number(), 2);
        assert_eq!(client.current_request_number, 3);
    }

    #[test]
    fn primary_address_rotates_with_the_view_hint() {
        let configuration = Configuration::new(vec![
            "127.0.0.1:8000".parse().unwrap(),
            "127.0.0.1:8001".parse().unwrap(),
            "127.0.0.1:8002".parse().unwrap(),
        ]);
        assert_eq!(configuration.primary_address(View::from(0)).port(), 8000);
        assert_eq!(configuration.primary_address(View::from(1)).port(), 8001);
    }
}
