//! The Viewstamped Replication state machine: request handling, the
//! normal-case Prepare/PrepareOk/Commit agreement protocol, state
//! transfer, and view-change. This is the hard part of the crate —
//! everything else exists to feed messages into, and carry outbound
//! messages out of, [`ReplicaState::process`].
//!
//! Every transition here shares the same coarse lock and the same handful
//! of fields, so it lives as one state owner rather than split across a
//! role-per-status object — splitting it up would just fragment that lock
//! across files for no benefit at this scale.

use crate::client_table::ClientTable;
use crate::codec;
use crate::configuration::Configuration;
use crate::error::Error;
use crate::election::ElectionTimer;
use crate::identifiers::ClientId;
use crate::log::{Log, LogEntry};
use crate::message::{
    CatchupRequest, CatchupResponse, ClientRequest, Commit, DoViewChange, Message, Prepare,
    PrepareOk, ServerResponse, StartView, StartViewChange,
};
use crate::service::Service;
use crate::transport::Transport;
use crate::viewstamp::{OpNumber, View};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A replica's coarse operating mode, driving what kinds of messages it
/// will act on.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Status {
    #[default]
    Normal,
    ViewChange,
    Recovering,
}

/// One outbound effect of processing a message or a timer firing. The
/// caller (the async driver in this module, or a test harness) is
/// responsible for actually delivering these — `ReplicaState::process` is
/// pure and synchronous so it can be exercised deterministically without
/// a runtime.
#[derive(Clone, Debug)]
pub enum Outbound {
    /// Send a message to a single address (a client, or a specific peer).
    Send { to: SocketAddr, message: Message },
    /// Send a message to every other replica in the configuration.
    Broadcast { message: Message },
}

/// Votes cast for the primary's in-flight Prepare on behalf of one
/// client's currently pending request. Keyed by client rather than
/// op-number: this replica never pipelines more than one outstanding
/// request per client, so the two are interchangeable here. A replica
/// that did pipeline multiple requests per client would need to key by
/// op-number instead.
#[derive(Clone, Debug, Default)]
struct PendingVote {
    op_number: OpNumber,
    voters: HashSet<usize>,
}

/// The per-replica in-memory state, plus the application state machine
/// it drives. All mutation goes through [`ReplicaState::process`] or
/// [`ReplicaState::on_election_timeout`].
pub struct ReplicaState<S> {
    configuration: Configuration,
    index: usize,
    view: View,
    status: Status,
    log: Log,
    commit_number: OpNumber,
    client_table: ClientTable,
    prepare_votes: HashMap<ClientId, PendingVote>,
    view_change_votes: HashMap<View, HashSet<usize>>,
    do_view_change_inbox: HashMap<usize, DoViewChange>,
    pending_buffer: Vec<Prepare>,
    service: S,
}

impl<S> ReplicaState<S>
where
    S: Service,
{
    pub fn new(configuration: Configuration, index: usize, service: S) -> Self {
        Self {
            configuration,
            index,
            view: View::default(),
            status: Status::default(),
            log: Log::default(),
            commit_number: OpNumber::default(),
            client_table: ClientTable::default(),
            prepare_votes: HashMap::new(),
            view_change_votes: HashMap::new(),
            do_view_change_inbox: HashMap::new(),
            pending_buffer: Vec::new(),
            service,
        }
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn op_number(&self) -> OpNumber {
        self.log.op_number()
    }

    pub fn commit_number(&self) -> OpNumber {
        self.commit_number
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    pub fn client_table(&self) -> &ClientTable {
        &self.client_table
    }

    fn is_primary(&self) -> bool {
        self.configuration.primary_index(self.view) == self.index
    }

    fn address(&self) -> SocketAddr {
        self.configuration.address(self.index)
    }

    /// Dispatches one decoded message, arriving from `from`, to the
    /// matching handler. The single entry point all message ordering and
    /// view-agreement rules are enforced against.
    pub fn process(&mut self, from: SocketAddr, message: Message) -> Vec<Outbound> {
        match message {
            Message::ClientRequest(request) => self.handle_client_request(from, request),
            Message::Prepare(prepare) => self.handle_prepare(from, prepare),
            Message::PrepareOk(prepare_ok) => self.handle_prepare_ok(prepare_ok),
            Message::Commit(commit) => self.handle_commit(commit),
            Message::CatchupRequest(request) => self.handle_catchup_request(from, request),
            Message::CatchupResponse(response) => self.handle_catchup_response(response),
            Message::StartViewChange(start) => self.handle_start_view_change(from, start),
            Message::DoViewChange(do_view_change) => {
                self.handle_do_view_change(from, do_view_change)
            }
            Message::StartView(start_view) => self.handle_start_view(start_view),
            // A replica never receives its own client-facing reply type.
            Message::ServerResponse(_) => Vec::new(),
        }
    }

    /// Whether receiving `message` should reset the election timer.
    /// §4.2.2 and §4.2.4 both order "reset the election timer" as a step
    /// that only runs once the view check passes: a Prepare carrying a
    /// view at least as new as ours resets it (view adoption happens
    /// first, then the reset); a Commit resets it only on an exact view
    /// match, since `view ≠ my_view` is dropped outright. Anything with a
    /// stale view never touches the timer, so a backup can still start a
    /// view-change against a primary the cluster has already moved past.
    pub fn resets_timer(&self, message: &Message) -> bool {
        match message {
            Message::Prepare(prepare) => prepare.view >= self.view,
            Message::Commit(commit) => commit.view == self.view,
            _ => false,
        }
    }

    /// Primary-only client request acceptance.
    fn handle_client_request(&mut self, from: SocketAddr, request: ClientRequest) -> Vec<Outbound> {
        let client = ClientId::from(from);

        let request_number: u64 = match request.request_number.parse() {
            Ok(rn) => rn,
            Err(_) => {
                return vec![self.reply(from, "non_numeric_request_number")];
            }
        };

        if !self.is_primary() {
            return Vec::new();
        }

        if let Some(entry) = self.client_table.get(client) {
            if entry.request_number > request_number {
                return vec![self.reply(from, "invalid_request_number")];
            }
            if entry.request_number == request_number {
                return match &entry.response {
                    Some(response) => vec![self.reply(from, response)],
                    None => Vec::new(),
                };
            }
        }

        if codec::validate_command(&request.command).is_err() {
            return vec![self.reply(from, "invalid_database_request")];
        }

        let op_number = self
            .log
            .push(LogEntry::new(request.command.clone(), request_number, client));
        self.client_table.start(client, request_number);
        self.prepare_votes.insert(
            client,
            PendingVote {
                op_number,
                voters: HashSet::new(),
            },
        );

        vec![Outbound::Broadcast {
            message: Prepare {
                view: self.view,
                command: request.command,
                request_number,
                client_id: client,
                op_number,
                commit_number: self.commit_number,
            }
            .into(),
        }]
    }

    /// Backup handling of a Prepare.
    fn handle_prepare(&mut self, from: SocketAddr, prepare: Prepare) -> Vec<Outbound> {
        if prepare.view < self.view {
            return Vec::new();
        }
        if prepare.view > self.view {
            // The backup has no prior evidence of the new view beyond this
            // Prepare; accepted anyway (see DESIGN.md for the open question
            // this resolves).
            self.view = prepare.view;
        }

        if self.status == Status::Recovering {
            self.pending_buffer.push(prepare);
            return Vec::new();
        }

        let next = self.log.op_number().next();
        if prepare.op_number == next {
            let entry = LogEntry::new(
                prepare.command,
                prepare.request_number,
                prepare.client_id,
            );
            self.log.push(entry);
            self.client_table
                .start(prepare.client_id, prepare.request_number);

            vec![Outbound::Send {
                to: from,
                message: PrepareOk {
                    view: self.view,
                    op_number: prepare.op_number,
                    client_id: prepare.client_id,
                    replica_addr: self.address(),
                }
                .into(),
            }]
        } else if prepare.op_number > next {
            let my_op_number = self.log.op_number();
            self.status = Status::Recovering;
            self.pending_buffer.push(prepare.clone());
            vec![Outbound::Send {
                to: from,
                message: CatchupRequest {
                    my_op_number,
                    target_op_number: prepare.op_number,
                }
                .into(),
            }]
        } else {
            // op_number <= my_op_number: stale, drop.
            Vec::new()
        }
    }

    /// Primary tallying of PrepareOk votes.
    fn handle_prepare_ok(&mut self, prepare_ok: PrepareOk) -> Vec<Outbound> {
        if prepare_ok.view != self.view {
            return Vec::new();
        }

        let Some(index) = self.configuration.index_of(prepare_ok.replica_addr) else {
            return Vec::new();
        };

        let client = prepare_ok.client_id;
        let reached_quorum = {
            let Some(pending) = self.prepare_votes.get_mut(&client) else {
                // No pending vote for this client: either a stale/late
                // vote after the operation already committed, or a vote
                // for a different in-flight op-number. Both are dropped.
                return Vec::new();
            };
            if pending.op_number != prepare_ok.op_number {
                return Vec::new();
            }
            pending.voters.insert(index);
            pending.voters.len() == self.configuration.sub_majority()
        };

        if !reached_quorum {
            return Vec::new();
        }

        // First crossing of quorum: retire the pending vote so any later,
        // lingering PrepareOk for this client is silently ignored.
        let pending = self.prepare_votes.remove(&client).expect("checked above");

        if self
            .client_table
            .get(client)
            .and_then(|entry| entry.response.as_ref())
            .is_some()
        {
            return Vec::new();
        }

        let Some(entry) = self.log.get(pending.op_number).cloned() else {
            return Vec::new();
        };

        let response = self.service.apply(&entry.command);
        self.commit_number.increment();
        self.client_table
            .complete(client, entry.request_number, response.clone());

        let client_addr: SocketAddr = client.into();
        vec![
            Outbound::Send {
                to: client_addr,
                message: ServerResponse {
                    view: self.view,
                    response,
                }
                .into(),
            },
            Outbound::Broadcast {
                message: Commit {
                    view: self.view,
                    request_number: entry.request_number,
                    client_id: client,
                }
                .into(),
            },
        ]
    }

    /// Backup handling of a Commit.
    fn handle_commit(&mut self, commit: Commit) -> Vec<Outbound> {
        if commit.view != self.view {
            return Vec::new();
        }
        if self.status != Status::Normal {
            return Vec::new();
        }

        let client = commit.client_id;
        match self.client_table.get(client) {
            Some(entry) if entry.request_number == commit.request_number => {}
            _ => return Vec::new(),
        }

        let next = self.commit_number.next();
        if let Some(entry) = self.log.get(next) {
            if entry.client_id == client && entry.request_number == commit.request_number {
                let response = self.service.apply(&entry.command);
                self.commit_number = next;
                self.client_table.complete(client, commit.request_number, response);
            }
        }

        Vec::new()
    }

    /// The primary's side of state transfer.
    fn handle_catchup_request(&self, from: SocketAddr, request: CatchupRequest) -> Vec<Outbound> {
        let entries = self
            .log
            .slice_exclusive(request.my_op_number, request.target_op_number);

        vec![Outbound::Send {
            to: from,
            message: CatchupResponse {
                commit_number: self.commit_number,
                entries,
            }
            .into(),
        }]
    }

    /// The lagging backup's side of state transfer.
    fn handle_catchup_response(&mut self, response: CatchupResponse) -> Vec<Outbound> {
        for entry in response.entries {
            self.client_table.start(entry.client_id, entry.request_number);
            self.log.push(entry);
        }

        let buffered = std::mem::take(&mut self.pending_buffer);
        for prepare in buffered {
            let entry = LogEntry::new(prepare.command, prepare.request_number, prepare.client_id);
            self.client_table.start(entry.client_id, entry.request_number);
            self.log.push(entry);
        }

        while self.commit_number < response.commit_number {
            let next = self.commit_number.next();
            match self.log.get(next).cloned() {
                Some(entry) => {
                    let applied = self.service.apply(&entry.command);
                    if let Some(existing) = self.client_table.get(entry.client_id) {
                        if existing.request_number == entry.request_number {
                            self.client_table
                                .complete(entry.client_id, entry.request_number, applied);
                        }
                    }
                    self.commit_number = next;
                }
                None => break,
            }
        }

        self.status = Status::Normal;
        Vec::new()
    }

    /// The election timer firing. A no-op for the primary: it never
    /// elects itself out.
    pub fn on_election_timeout(&mut self) -> Vec<Outbound> {
        if self.status != Status::Normal || self.is_primary() {
            return Vec::new();
        }

        self.view.increment();
        self.status = Status::ViewChange;

        vec![Outbound::Broadcast {
            message: StartViewChange {
                new_view_number: self.view,
            }
            .into(),
        }]
    }

    /// StartViewChange aggregation.
    fn handle_start_view_change(&mut self, from: SocketAddr, message: StartViewChange) -> Vec<Outbound> {
        let new_view = message.new_view_number;
        if new_view < self.view {
            return Vec::new();
        }

        let mut out = Vec::new();
        if new_view > self.view {
            self.view = new_view;
            self.status = Status::ViewChange;
            out.push(Outbound::Broadcast {
                message: StartViewChange {
                    new_view_number: new_view,
                }
                .into(),
            });
        }

        let Some(index) = self.configuration.index_of(from) else {
            return out;
        };

        let voters = self.view_change_votes.entry(new_view).or_default();
        voters.insert(index);

        if voters.len() == self.configuration.sub_majority() {
            let candidate = self.configuration.primary_address(new_view);
            out.push(Outbound::Send {
                to: candidate,
                message: DoViewChange {
                    old_view: new_view.previous(),
                    new_view,
                    op_number: self.log.op_number(),
                    commit_number: self.commit_number,
                    log: self.log.as_slice().to_vec(),
                }
                .into(),
            });
        }

        out
    }

    /// DoViewChange aggregation at the candidate primary.
    fn handle_do_view_change(&mut self, from: SocketAddr, message: DoViewChange) -> Vec<Outbound> {
        if self.status == Status::Normal {
            return Vec::new();
        }

        let Some(index) = self.configuration.index_of(from) else {
            return Vec::new();
        };

        self.do_view_change_inbox.insert(index, message);

        if self.do_view_change_inbox.len() != self.configuration.sub_majority() {
            return Vec::new();
        }

        let winner = self
            .do_view_change_inbox
            .values()
            .max_by_key(|payload| (payload.old_view, payload.op_number))
            .cloned()
            .expect("inbox just reached sub-majority, so it is non-empty");

        self.log.replace(winner.log);
        self.view = winner.new_view;

        let max_commit = self
            .do_view_change_inbox
            .values()
            .map(|payload| payload.commit_number)
            .max()
            .unwrap_or(self.commit_number)
            .max(self.commit_number);

        while self.commit_number < max_commit {
            let next = self.commit_number.next();
            match self.log.get(next).cloned() {
                Some(entry) => {
                    let response = self.service.apply(&entry.command);
                    if let Some(existing) = self.client_table.get(entry.client_id) {
                        if existing.request_number == entry.request_number {
                            self.client_table
                                .complete(entry.client_id, entry.request_number, response);
                        }
                    }
                    self.commit_number = next;
                }
                None => break,
            }
        }

        self.do_view_change_inbox.clear();
        self.status = Status::Normal;

        vec![Outbound::Broadcast {
            message: StartView {
                op_number: self.log.op_number(),
                new_view: self.view,
                commit_number: self.commit_number,
                log: self.log.as_slice().to_vec(),
            }
            .into(),
        }]
    }

    /// StartView on the other replicas.
    fn handle_start_view(&mut self, message: StartView) -> Vec<Outbound> {
        self.log.replace(message.log);
        self.view = message.new_view;
        self.commit_number = message.commit_number;
        self.status = Status::Normal;
        Vec::new()
    }

    fn reply(&self, to: SocketAddr, response: &str) -> Outbound {
        Outbound::Send {
            to,
            message: ServerResponse {
                view: self.view,
                response: response.to_string(),
            }
            .into(),
        }
    }
}

/// The async driver around [`ReplicaState`]: owns the UDP transport and
/// the election timer, and wires them to the state machine under a
/// single `tokio::sync::Mutex` acting as one coarse exclusive section —
/// one receive loop, one handler task per datagram, one timer task.
pub struct Replica<S> {
    configuration: Configuration,
    index: usize,
    transport: Transport,
    timer: ElectionTimer,
    state: Mutex<ReplicaState<S>>,
}

impl<S> Replica<S>
where
    S: Service + Send + 'static,
{
    pub async fn bind(
        configuration: Configuration,
        index: usize,
        service: S,
    ) -> Result<Arc<Self>, Error> {
        let address = configuration.address(index);
        let transport = Transport::bind(address).await.map_err(Error::Bind)?;
        let timer = ElectionTimer::new(crate::election::random_interval());
        let state = Mutex::new(ReplicaState::new(configuration.clone(), index, service));

        Ok(Arc::new(Self {
            configuration,
            index,
            transport,
            timer,
            state,
        }))
    }

    /// Drives the replica forever: receives datagrams, spawns a handler
    /// task per datagram, and reacts to the election timer firing.
    pub async fn run(self: Arc<Self>) {
        let receiver = {
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                loop {
                    match this.transport.receive().await {
                        Ok((payload, from)) => {
                            let this = Arc::clone(&this);
                            tokio::spawn(async move {
                                this.handle_datagram(from, payload).await;
                            });
                        }
                        Err(err) => {
                            log::warn!("replica {}: receive failed: {err}", this.index);
                        }
                    }
                }
            })
        };

        let timer = {
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                loop {
                    this.timer.wait().await;
                    let actions = {
                        let mut state = this.state.lock().await;
                        state.on_election_timeout()
                    };
                    if !actions.is_empty() {
                        log::info!("replica {}: election timeout, initiating view change", this.index);
                    }
                    this.dispatch(actions).await;
                }
            })
        };

        let _ = tokio::join!(receiver, timer);
    }

    async fn handle_datagram(&self, from: SocketAddr, payload: String) {
        let message = match codec::decode(&payload) {
            Ok(message) => message,
            Err(err) => {
                log::debug!("replica {}: dropping malformed message from {from}: {err}", self.index);
                return;
            }
        };

        log::trace!("replica {}: received {message:?} from {from}", self.index);

        let (should_reset, actions) = {
            let mut state = self.state.lock().await;
            let should_reset = state.resets_timer(&message);
            let actions = state.process(from, message);
            (should_reset, actions)
        };

        if should_reset {
            self.timer.reset();
        }

        self.dispatch(actions).await;
    }

    async fn dispatch(&self, actions: Vec<Outbound>) {
        for action in actions {
            match action {
                Outbound::Send { to, message } => {
                    let encoded = codec::encode(&message);
                    if let Err(err) = self.transport.send(to, &encoded).await {
                        log::warn!("replica {}: send to {to} failed: {err}", self.index);
                    }
                }
                Outbound::Broadcast { message } => {
                    let encoded = codec::encode(&message);
                    for (peer_index, &peer) in self.configuration.peers().iter().enumerate() {
                        if peer_index == self.index {
                            continue;
                        }
                        if let Err(err) = self.transport.send(peer, &encoded).await {
                            log::warn!("replica {}: broadcast to {peer} failed: {err}", self.index);
                        }
                    }
                }
            }
        }
    }
}
