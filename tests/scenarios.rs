//! End-to-end cluster scenarios, driven against a synchronous in-process
//! harness rather than real UDP sockets so outcomes are deterministic.

use std::collections::VecDeque;
use std::net::SocketAddr;

use vr_kv::configuration::Configuration;
use vr_kv::message::{ClientRequest, Message};
use vr_kv::replica::{Outbound, ReplicaState, Status};
use vr_kv::service::Database;
use vr_kv::viewstamp::{OpNumber, View};

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn client(port: u16) -> SocketAddr {
    addr(port)
}

fn configuration() -> Configuration {
    Configuration::new(vec![addr(8000), addr(8001), addr(8002)])
}

/// Routes the `Outbound` effects of `ReplicaState::process` between three
/// in-memory replicas, delivering anything not addressed to a replica into
/// `client_inbox` instead. `paused` models a replica that is temporarily
/// unreachable (datagrams sent to or by it are simply lost, its state is
/// untouched) rather than a process restart, which this crate has no
/// recovery story for.
struct Cluster {
    configuration: Configuration,
    replicas: Vec<ReplicaState<Database>>,
    paused: Vec<bool>,
    queue: VecDeque<(SocketAddr, SocketAddr, Message)>,
    client_inbox: Vec<(SocketAddr, Message)>,
}

impl Cluster {
    fn new() -> Self {
        let configuration = configuration();
        let replicas = (0..configuration.replicas())
            .map(|index| ReplicaState::new(configuration.clone(), index, Database::new()))
            .collect();
        let paused = vec![false; configuration.replicas()];

        Self {
            configuration,
            replicas,
            paused,
            queue: VecDeque::new(),
            client_inbox: Vec::new(),
        }
    }

    fn replica(&self, index: usize) -> &ReplicaState<Database> {
        &self.replicas[index]
    }

    fn replica_mut(&mut self, index: usize) -> &mut ReplicaState<Database> {
        &mut self.replicas[index]
    }

    fn pause(&mut self, index: usize) {
        self.paused[index] = true;
    }

    fn resume(&mut self, index: usize) {
        self.paused[index] = false;
    }

    /// Submits a client request directly to replica `to`, as if it arrived
    /// from `client`, and queues whatever it produces.
    fn submit(&mut self, client: SocketAddr, to: usize, message: Message) {
        let address = self.configuration.address(to);
        let outbound = self.replica_mut(to).process(client, message);
        self.enqueue(address, outbound);
    }

    fn enqueue(&mut self, origin: SocketAddr, outbound: Vec<Outbound>) {
        for action in outbound {
            match action {
                Outbound::Send { to, message } => self.queue.push_back((origin, to, message)),
                Outbound::Broadcast { message } => {
                    for &peer in self.configuration.peers() {
                        if peer != origin {
                            self.queue.push_back((origin, peer, message.clone()));
                        }
                    }
                }
            }
        }
    }

    /// Delivers one hop: if `to` is a replica in this cluster (and not
    /// paused), feeds it through `process` and queues the result;
    /// otherwise it's a client-bound reply, recorded in `client_inbox`.
    fn deliver(&mut self, from: SocketAddr, to: SocketAddr, message: Message) {
        let Some(index) = self.configuration.index_of(to) else {
            self.client_inbox.push((to, message));
            return;
        };
        if self.paused[index] {
            return;
        }
        let outbound = self.replica_mut(index).process(from, message);
        self.enqueue(to, outbound);
    }

    /// Drains the queue to a fixed point.
    fn run_to_quiescence(&mut self) {
        while let Some((from, to, message)) = self.queue.pop_front() {
            self.deliver(from, to, message);
        }
    }

    /// Delivers the next queued message addressed to `to` for which
    /// `predicate` holds, skipping nothing else — used to pin delivery
    /// order precisely enough to reproduce a scenario literally. Returns
    /// whether a match was found.
    fn deliver_next_matching(
        &mut self,
        to: SocketAddr,
        predicate: impl Fn(&Message) -> bool,
    ) -> bool {
        let Some(position) = self
            .queue
            .iter()
            .position(|(_, dest, message)| *dest == to && predicate(message))
        else {
            return false;
        };
        let (from, to, message) = self.queue.remove(position).unwrap();
        self.deliver(from, to, message);
        true
    }

    /// Drops (rather than delivers) the next queued message addressed to
    /// `to` matching `predicate` — simulates datagram loss. Returns
    /// whether a match was found.
    fn drop_matching(&mut self, to: SocketAddr, predicate: impl Fn(&Message) -> bool) -> bool {
        let Some(position) = self
            .queue
            .iter()
            .position(|(_, dest, message)| *dest == to && predicate(message))
        else {
            return false;
        };
        self.queue.remove(position);
        true
    }

    fn responses_to(&self, client: SocketAddr) -> Vec<String> {
        self.client_inbox
            .iter()
            .filter(|(address, _)| *address == client)
            .filter_map(|(_, message)| match message {
                Message::ServerResponse(response) => Some(response.response.clone()),
                _ => None,
            })
            .collect()
    }
}

fn request(command: &str, request_number: &str) -> Message {
    ClientRequest {
        command: command.to_string(),
        request_number: request_number.to_string(),
    }
    .into()
}

/// Simple set/get.
#[test]
fn simple_set_then_get() {
    let mut cluster = Cluster::new();
    let client = client(9000);

    cluster.submit(client, 0, request("set k 1", "0"));
    cluster.run_to_quiescence();
    cluster.submit(client, 0, request("get k", "1"));
    cluster.run_to_quiescence();

    assert_eq!(
        cluster.responses_to(client),
        vec!["update_performed_successfully".to_string(), "1".to_string()]
    );
    assert_eq!(cluster.replica(0).op_number(), OpNumber::from(2));
    assert_eq!(cluster.replica(1).commit_number(), OpNumber::from(2));
    assert_eq!(cluster.replica(2).commit_number(), OpNumber::from(2));
}

/// Duplicate request suppression.
#[test]
fn duplicate_request_replays_the_cached_response() {
    let mut cluster = Cluster::new();
    let client = client(9001);
    let duplicate = request("set k 1", "0");

    cluster.submit(client, 0, duplicate.clone());
    cluster.run_to_quiescence();
    assert_eq!(cluster.responses_to(client), vec!["update_performed_successfully"]);

    cluster.submit(client, 0, duplicate);
    cluster.run_to_quiescence();

    assert_eq!(
        cluster.responses_to(client),
        vec![
            "update_performed_successfully".to_string(),
            "update_performed_successfully".to_string(),
        ]
    );
    assert_eq!(
        cluster.replica(0).op_number(),
        OpNumber::from(1),
        "the duplicate must not extend the log"
    );
}

/// Stale request rejection.
#[test]
fn stale_request_number_is_rejected() {
    let mut cluster = Cluster::new();
    let client = client(9002);

    cluster.submit(client, 0, request("set k 1", "0"));
    cluster.run_to_quiescence();
    cluster.submit(client, 0, request("get k", "1"));
    cluster.run_to_quiescence();

    cluster.submit(client, 0, request("set k 2", "0"));
    cluster.run_to_quiescence();

    assert_eq!(
        cluster.responses_to(client).last().map(String::as_str),
        Some("invalid_request_number")
    );
}

/// Backup catch-up. Replica 2 is paused for ten committed operations,
/// resumed, and the next Prepare triggers state transfer. The catchup
/// response is pinned to land before the 11th operation's own PrepareOk
/// quorum is reached at the primary, so `commit_number` on replica 2
/// settles at exactly 10 right after the transfer, rather than whatever it
/// happens to be once the whole queue drains.
#[test]
fn paused_backup_catches_up_via_state_transfer() {
    let mut cluster = Cluster::new();
    let client = client(9003);
    let primary_addr = cluster.configuration.address(0);
    let replica2_addr = cluster.configuration.address(2);

    cluster.pause(2);
    for i in 0..10u64 {
        cluster.submit(client, 0, request(&format!("set k {i}"), &i.to_string()));
        cluster.run_to_quiescence();
    }
    assert_eq!(cluster.replica(0).commit_number(), OpNumber::from(10));
    assert_eq!(cluster.replica(2).op_number(), OpNumber::from(0));

    cluster.resume(2);
    cluster.submit(client, 0, request("set k 10", "10"));

    assert!(cluster.deliver_next_matching(replica2_addr, |m| matches!(m, Message::Prepare(_))));
    assert_eq!(cluster.replica(2).status(), Status::Recovering);

    assert!(cluster.deliver_next_matching(primary_addr, |m| matches!(
        m,
        Message::CatchupRequest(_)
    )));
    assert!(cluster.deliver_next_matching(replica2_addr, |m| matches!(
        m,
        Message::CatchupResponse(_)
    )));

    assert_eq!(cluster.replica(2).status(), Status::Normal);
    assert_eq!(
        cluster.replica(2).commit_number(),
        OpNumber::from(10),
        "catchup must commit exactly the entries the primary had already committed"
    );
    assert_eq!(
        cluster.replica(2).op_number(),
        OpNumber::from(11),
        "the buffered Prepare that triggered catchup is replayed into the log"
    );

    // Draining the rest of the queue lets the 11th operation itself
    // commit everywhere, including on the now-caught-up replica 2.
    cluster.run_to_quiescence();
    assert_eq!(cluster.replica(2).commit_number(), OpNumber::from(11));
}

/// View change on primary failure.
#[test]
fn view_change_elects_a_new_primary_after_primary_failure() {
    let mut cluster = Cluster::new();
    let first_client = client(9004);

    for (i, command) in ["set a 1", "set b 2"].into_iter().enumerate() {
        cluster.submit(first_client, 0, request(command, &i.to_string()));
        cluster.run_to_quiescence();
    }
    assert_eq!(cluster.replica(0).commit_number(), OpNumber::from(2));
    assert_eq!(cluster.replica(1).commit_number(), OpNumber::from(2));
    assert_eq!(cluster.replica(2).commit_number(), OpNumber::from(2));

    cluster.pause(0); // primary 0 is killed

    let addr1 = cluster.configuration.address(1);
    let addr2 = cluster.configuration.address(2);
    let actions1 = cluster.replica_mut(1).on_election_timeout();
    cluster.enqueue(addr1, actions1);
    let actions2 = cluster.replica_mut(2).on_election_timeout();
    cluster.enqueue(addr2, actions2);
    cluster.run_to_quiescence();

    assert_eq!(cluster.replica(1).view(), View::from(1));
    assert_eq!(cluster.replica(1).status(), Status::Normal);
    assert_eq!(cluster.replica(2).view(), View::from(1));
    assert_eq!(cluster.replica(2).status(), Status::Normal);

    let second_client = client(9005);
    cluster.submit(second_client, 1, request("set x 5", "0"));
    cluster.run_to_quiescence();

    assert_eq!(
        cluster.responses_to(second_client),
        vec!["update_performed_successfully".to_string()]
    );
    let reply_view = cluster
        .client_inbox
        .iter()
        .rev()
        .find_map(|(address, message)| match message {
            Message::ServerResponse(response) if *address == second_client => {
                Some(response.view)
            }
            _ => None,
        })
        .expect("a server_response was sent to the new client");
    assert_eq!(reply_view, View::from(1));
}

/// Commit despite a dropped message. One Prepare to replica 2 is
/// dropped; the primary's implicit vote plus replica 1's PrepareOk still
/// reach the sub-majority quorum, and the subsequent Commit broadcast must
/// not make replica 2 misfire on an operation it never logged.
#[test]
fn commit_tolerates_a_single_dropped_prepare() {
    let mut cluster = Cluster::new();
    let client = client(9006);
    let replica2_addr = cluster.configuration.address(2);

    cluster.submit(client, 0, request("set k 1", "0"));
    assert!(cluster.drop_matching(replica2_addr, |m| matches!(m, Message::Prepare(_))));
    cluster.run_to_quiescence();

    assert_eq!(cluster.replica(0).commit_number(), OpNumber::from(1));
    assert_eq!(cluster.replica(1).commit_number(), OpNumber::from(1));
    assert_eq!(
        cluster.replica(2).op_number(),
        OpNumber::from(0),
        "replica 2 never received the Prepare"
    );
    assert_eq!(
        cluster.replica(2).commit_number(),
        OpNumber::from(0),
        "the Commit broadcast must be dropped, not misapplied, for an op replica 2 never logged"
    );
}
