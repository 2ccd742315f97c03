//! The connection manager.
//!
//! [`MessagingClient`] owns the full client lifecycle: authenticating against
//! the broker, encrypting and transmitting messages, decrypting and
//! dispatching inbound frames, tracking acknowledgements, and driving the
//! bounded reconnection policy. The transport itself lives on a spawned task;
//! the client talks to it over a command channel so that every public method
//! stays cancel-safe.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::identity::{AgentIdentity, KeyManager};
use crate::logging::sanitize_for_log;
use crate::protocol::{
    AckPayload, AuthPayload, AuthResult, DisconnectPayload, ErrorPayload, EventType, Frame,
    HeartbeatPayload, PresencePayload, PresenceStatus, SignedHello, TypingPayload,
};
use crate::storage::KeyValueStorage;
use crate::token::TokenProvider;
use crate::transport::{Connector, Transport};

use super::codec::{self, EncryptedEnvelope};
use super::conversation::ConversationRegistry;
use super::delivery::{DeliveryTracker, PendingDelivery};
use super::handlers::{Event, HandlerRegistry};
use super::message::{AgentMessage, MessageContent};
use super::peers::PeerDirectory;

/// Error string returned when a connect call carries unusable credentials.
const INVALID_AUTH_PAYLOAD: &str = "Invalid authentication payload";

/// How often the connection task emits a liveness frame.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How often the connection task expires overdue acknowledgements.
const ACK_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Command channel depth between the client and its connection task.
const COMMAND_BUFFER: usize = 64;

/// Lifecycle of the single broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// No connection and none in progress.
    Disconnected,
    /// Dialing and authenticating.
    Connecting,
    /// Authenticated and able to send.
    Connected,
    /// Connection lost; bounded recovery in progress.
    Reconnecting,
    /// Recovery gave up. No further automatic attempts happen; only an
    /// explicit connect call leaves this state.
    Error,
}

impl ConnectionState {
    /// Wire spelling of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Reconnecting => "RECONNECTING",
            ConnectionState::Error => "ERROR",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work items handed to the connection task.
enum ConnCommand {
    /// Transmit one frame and report the outcome.
    SendFrame {
        frame: Frame,
        done: oneshot::Sender<Result<()>>,
    },
    /// Send a disconnect notice, close the transport, and stop.
    Shutdown {
        reason: String,
        done: oneshot::Sender<()>,
    },
}

/// State shared between the client handle and the connection task.
struct ClientShared {
    config: ClientConfig,
    agent_id: String,
    connector: Arc<dyn Connector>,
    token_provider: Arc<dyn TokenProvider>,
    storage: Arc<dyn KeyValueStorage>,
    /// Loaded lazily on first connect so construction stays synchronous.
    keys: RwLock<Option<KeyManager>>,
    peers: PeerDirectory,
    handlers: HandlerRegistry,
    conversations: ConversationRegistry,
    tracker: DeliveryTracker,
    state_tx: watch::Sender<ConnectionState>,
    cmd_tx: RwLock<Option<mpsc::Sender<ConnCommand>>>,
    /// Cleared by disconnect so an in-flight recovery phase stands down; a
    /// watch channel so the recovery backoff sleep can observe the change
    /// mid-wait instead of finishing the delay first.
    running: watch::Sender<bool>,
    /// Serializes concurrent connect calls.
    connect_lock: tokio::sync::Mutex<()>,
}

impl ClientShared {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "connection state changed");
        }
    }

    /// Load (or create) the local key material if it is not resident yet.
    async fn ensure_keys(&self) -> Result<()> {
        if self.keys.read().await.is_some() {
            return Ok(());
        }
        let mut slot = self.keys.write().await;
        if slot.is_none() {
            let keys = KeyManager::load_or_create(&self.agent_id, &self.storage).await?;
            *slot = Some(keys);
        }
        Ok(())
    }

    async fn identity(&self) -> Result<AgentIdentity> {
        self.ensure_keys().await?;
        let keys = self.keys.read().await;
        keys.as_ref()
            .map(KeyManager::identity)
            .ok_or_else(|| Error::Encryption("key material unavailable".into()))
    }

    /// Build the handshake payload from a fresh token and our public key.
    async fn auth_payload(&self) -> Result<AuthPayload> {
        let identity = self.identity().await?;
        let token = self.token_provider.get_token().await?;
        Ok(AuthPayload {
            token: token.token,
            agent_id: self.agent_id.clone(),
            public_key: identity.public_key.to_hex(),
        })
    }

    /// Dial the broker and run the authentication exchange. Both steps are
    /// bounded by the configured request timeout.
    async fn establish(&self, auth: &AuthPayload) -> Result<(Box<dyn Transport>, AuthResult)> {
        let mut transport =
            tokio::time::timeout(self.config.timeout, self.connector.connect(&self.config))
                .await
                .map_err(|_| Error::Timeout)??;
        transport.send(Frame::new(EventType::Connect, auth)?).await?;
        let reply = tokio::time::timeout(self.config.timeout, transport.recv())
            .await
            .map_err(|_| Error::Timeout)??
            .ok_or_else(|| Error::Connection("channel closed during authentication".into()))?;
        if reply.event_type != EventType::Connect {
            return Err(Error::Protocol(format!(
                "expected CONNECT result, got {}",
                reply.event_type
            )));
        }
        let result: AuthResult = reply.decode_payload()?;
        Ok((transport, result))
    }

    /// Hand a frame to the connection task and wait for the transmit result.
    async fn send_frame(&self, frame: Frame) -> Result<()> {
        let cmd_tx = match self.cmd_tx.read().await.clone() {
            Some(cmd_tx) => cmd_tx,
            None => return Err(Error::Connection("not connected".into())),
        };
        let (done, outcome) = oneshot::channel();
        cmd_tx
            .send(ConnCommand::SendFrame { frame, done })
            .await
            .map_err(|_| Error::Connection("connection task stopped".into()))?;
        outcome
            .await
            .map_err(|_| Error::Connection("connection task stopped".into()))?
    }

    /// Dispatch an event and log when nobody is listening for it. An
    /// unhandled agent message is worth a warning; everything else only a
    /// debug line.
    async fn dispatch(&self, event: Event) {
        let event_type = event.event_type();
        let is_message = matches!(event, Event::Message(_));
        match self.handlers.dispatch(event).await {
            Ok(true) => {}
            Ok(false) if is_message => {
                warn!(%event_type, "no handler registered for inbound message")
            }
            Ok(false) => debug!(%event_type, "event had no handler"),
            Err(err) => warn!(%event_type, error = %err, "event handler failed"),
        }
    }

    /// Encrypt a key announcement to every pinned peer under the current
    /// keys, then atomically switch to `fresh`.
    async fn rotate_keys(&self) -> Result<()> {
        self.ensure_keys().await?;
        let fresh = KeyManager::rotate(&self.agent_id, &self.storage).await?;
        let announcement = MessageContent::Handshake {
            agent_id: self.agent_id.clone(),
            public_key: fresh.identity().public_key.clone(),
            signing_public_key: fresh.identity().signing_public_key,
        };
        let peer_ids = self.peers.pinned_ids().await;
        {
            let keys = self.keys.read().await;
            let current = keys
                .as_ref()
                .ok_or_else(|| Error::Encryption("key material unavailable".into()))?;
            for peer_id in &peer_ids {
                let peer = match self.peers.lookup(peer_id).await? {
                    Some(peer) => peer,
                    None => continue,
                };
                let message = AgentMessage::new(
                    self.agent_id.clone(),
                    peer_id.clone(),
                    announcement.clone(),
                );
                let secret = current.shared_secret_for(&peer)?;
                let envelope = codec::encrypt(&message, &secret, current.signing_keypair())?;
                let frame = Frame::new(EventType::Handshake, &envelope)?;
                if let Err(err) = self.send_frame(frame).await {
                    warn!(peer = %peer_id, error = %err, "key announcement not delivered");
                }
            }
        }
        *self.keys.write().await = Some(fresh);
        info!(peers = peer_ids.len(), "agent keys rotated");
        Ok(())
    }
}

/// Authenticated, encrypted messaging client for one agent.
///
/// Cheap to clone; clones share the connection, registries, and key
/// material. All collaborators are injected, so tests can swap the
/// transport, token source, and storage for in-memory stand-ins.
#[derive(Clone)]
pub struct MessagingClient {
    shared: Arc<ClientShared>,
}

impl MessagingClient {
    /// Build a client for `agent_id`. Fails when the configuration is
    /// invalid; no keys are loaded and no I/O happens until connect.
    pub fn new(
        agent_id: impl Into<String>,
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        token_provider: Arc<dyn TokenProvider>,
        storage: Arc<dyn KeyValueStorage>,
    ) -> Result<Self> {
        config.validate()?;
        let agent_id = agent_id.into();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (running, _) = watch::channel(false);
        let shared = ClientShared {
            agent_id: agent_id.clone(),
            connector,
            token_provider,
            keys: RwLock::new(None),
            peers: PeerDirectory::new(storage.clone()),
            handlers: HandlerRegistry::new(),
            conversations: ConversationRegistry::new(agent_id, storage.clone()),
            tracker: DeliveryTracker::new(config.timeout),
            state_tx,
            cmd_tx: RwLock::new(None),
            running,
            connect_lock: tokio::sync::Mutex::new(()),
            storage,
            config,
        };
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Connect when the configuration asks for it.
    ///
    /// Returns `Ok(None)` when `auto_connect` is off. With `auto_connect`
    /// on, a denied authentication becomes an error so startup failures are
    /// loud.
    pub async fn start(&self) -> Result<Option<AuthResult>> {
        if !self.shared.config.auto_connect {
            return Ok(None);
        }
        let result = self.connect().await?;
        if !result.authenticated {
            let reason = result
                .error
                .clone()
                .unwrap_or_else(|| "authentication rejected".into());
            return Err(Error::Authentication(reason));
        }
        Ok(Some(result))
    }

    /// Authenticate with a fresh token from the token provider and bring the
    /// connection up.
    pub async fn connect(&self) -> Result<AuthResult> {
        let auth = self.shared.auth_payload().await?;
        self.connect_with(auth).await
    }

    /// Authenticate with an explicit handshake payload.
    ///
    /// An incomplete payload (empty token or agent id) is rejected locally
    /// with no transport activity; the rejection is a result, not an error.
    /// A remote denial likewise comes back as an unauthenticated result.
    /// Reconnection always refreshes the token through the provider,
    /// regardless of what was passed here.
    pub async fn connect_with(&self, auth: AuthPayload) -> Result<AuthResult> {
        if !auth.is_complete() {
            info!("rejecting connect call with incomplete credentials");
            return Ok(AuthResult::rejected(INVALID_AUTH_PAYLOAD));
        }
        let _guard = self.shared.connect_lock.lock().await;
        match self.shared.state() {
            ConnectionState::Connecting
            | ConnectionState::Connected
            | ConnectionState::Reconnecting => {
                return Err(Error::Connection("connection already active".into()));
            }
            ConnectionState::Disconnected | ConnectionState::Error => {}
        }
        // Inbound decryption needs local keys even when the caller built the
        // payload by hand.
        self.shared.ensure_keys().await?;
        self.shared.set_state(ConnectionState::Connecting);
        let (mut transport, result) = match self.shared.establish(&auth).await {
            Ok(pair) => pair,
            Err(err) => {
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(err);
            }
        };
        if !result.authenticated {
            warn!(error = ?result.error, "authentication denied by remote");
            transport.close().await;
            self.shared.set_state(ConnectionState::Disconnected);
            return Ok(result);
        }
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        *self.shared.cmd_tx.write().await = Some(cmd_tx.clone());
        self.shared.running.send_replace(true);
        self.shared.set_state(ConnectionState::Connected);
        info!(agent_id = %self.shared.agent_id, user_id = %result.user_id, "connected");
        let shared = self.shared.clone();
        tokio::spawn(async move {
            connection_loop(shared, transport, cmd_tx, cmd_rx).await;
        });
        self.shared.dispatch(Event::Connected(result.clone())).await;
        Ok(result)
    }

    /// Send a disconnect notice and close the connection. Idempotent; safe
    /// to call in any state.
    pub async fn disconnect(&self) {
        self.shared.running.send_replace(false);
        let cmd_tx = self.shared.cmd_tx.write().await.take();
        if let Some(cmd_tx) = cmd_tx {
            let (done, finished) = oneshot::channel();
            let command = ConnCommand::Shutdown {
                reason: "client disconnect".into(),
                done,
            };
            if cmd_tx.send(command).await.is_ok() {
                let _ = finished.await;
            }
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Encrypt, sign, and transmit a message to its recipient.
    ///
    /// Requires the connection to be up: any other state fails immediately
    /// without touching the transport. The returned handle resolves when the
    /// recipient acknowledges the message or the acknowledgement window
    /// expires; an expiry means delivery is uncertain, not failed, and
    /// nothing is retransmitted automatically.
    pub async fn send_message(&self, message: AgentMessage) -> Result<PendingDelivery> {
        if self.shared.state() != ConnectionState::Connected {
            return Err(Error::Connection("not connected".into()));
        }
        message.validate()?;
        let peer = self
            .shared
            .peers
            .lookup(&message.recipient_id)
            .await?
            .ok_or_else(|| {
                Error::Encryption(format!("no pinned identity for {}", message.recipient_id))
            })?;
        let envelope = {
            let keys = self.shared.keys.read().await;
            let keys = keys
                .as_ref()
                .ok_or_else(|| Error::Encryption("key material unavailable".into()))?;
            let secret = keys.shared_secret_for(&peer)?;
            codec::encrypt(&message, &secret, keys.signing_keypair())?
        };
        let frame = Frame::new(message.event_type(), &envelope)?;
        // Track before transmitting so a fast acknowledgement cannot race
        // the bookkeeping.
        let delivery = self.shared.tracker.track(message.message_id).await;
        if let Err(err) = self.shared.send_frame(frame).await {
            self.shared.tracker.cancel(message.message_id).await;
            return Err(err);
        }
        if let Err(err) = self.shared.conversations.record(&message).await {
            warn!(error = %err, "outbound message not recorded");
        }
        debug!(
            message_id = %message.message_id,
            recipient = %message.recipient_id,
            "message transmitted"
        );
        Ok(delivery)
    }

    /// Announce our identity to a peer that has never seen us, so both sides
    /// can pin each other and start exchanging encrypted messages.
    pub async fn introduce(&self, peer_id: &str) -> Result<()> {
        if self.shared.state() != ConnectionState::Connected {
            return Err(Error::Connection("not connected".into()));
        }
        let hello = {
            let keys = self.shared.keys.read().await;
            let keys = keys
                .as_ref()
                .ok_or_else(|| Error::Encryption("key material unavailable".into()))?;
            SignedHello::new_signed(&keys.identity(), keys.signing_keypair(), peer_id)?
        };
        self.shared
            .send_frame(Frame::new(EventType::Handshake, &hello)?)
            .await
    }

    /// Generate a replacement key pair, announce it to every pinned peer
    /// under the old keys, and switch over.
    pub async fn rotate_keys(&self) -> Result<()> {
        if self.shared.state() != ConnectionState::Connected {
            return Err(Error::Connection("not connected".into()));
        }
        self.shared.rotate_keys().await
    }

    /// Broadcast a presence change. Best effort: silently skipped while not
    /// connected, and transmit failures are logged rather than returned.
    pub async fn update_presence(&self, status: PresenceStatus) -> Result<()> {
        if self.shared.state() != ConnectionState::Connected {
            debug!(?status, "presence update skipped while not connected");
            return Ok(());
        }
        let payload = PresencePayload {
            agent_id: self.shared.agent_id.clone(),
            status,
            timestamp: Utc::now().timestamp_millis(),
        };
        if let Err(err) = self
            .shared
            .send_frame(Frame::new(EventType::Presence, &payload)?)
            .await
        {
            debug!(error = %err, "presence update not sent");
        }
        Ok(())
    }

    /// Signal typing activity in a conversation. Best effort, like presence.
    pub async fn send_typing(&self, conversation_id: &str, is_typing: bool) -> Result<()> {
        if self.shared.state() != ConnectionState::Connected {
            debug!(%conversation_id, "typing signal skipped while not connected");
            return Ok(());
        }
        let payload = TypingPayload {
            conversation_id: conversation_id.to_owned(),
            agent_id: self.shared.agent_id.clone(),
            is_typing,
        };
        if let Err(err) = self
            .shared
            .send_frame(Frame::new(EventType::Typing, &payload)?)
            .await
        {
            debug!(error = %err, "typing signal not sent");
        }
        Ok(())
    }

    /// The agent this client speaks for.
    pub fn agent_id(&self) -> &str {
        &self.shared.agent_id
    }

    /// The active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Watch connection state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Event handler registry.
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.shared.handlers
    }

    /// Conversation registry and history.
    pub fn conversations(&self) -> &ConversationRegistry {
        &self.shared.conversations
    }

    /// Pending acknowledgement tracker.
    pub fn deliveries(&self) -> &DeliveryTracker {
        &self.shared.tracker
    }

    /// Pinned peer identities.
    pub fn peers(&self) -> &PeerDirectory {
        &self.shared.peers
    }

    /// Our public identity, loading key material on first use.
    pub async fn identity(&self) -> Result<AgentIdentity> {
        self.shared.identity().await
    }
}

/// What a handled frame means for the connection loop.
enum FrameOutcome {
    /// Keep reading.
    Continue,
    /// The remote ended the session cleanly.
    RemoteClosed,
}

/// Owns the transport. Multiplexes outbound commands, inbound frames, the
/// heartbeat, and the acknowledgement sweep; runs the reconnection policy
/// when the transport drops without a disconnect notice.
async fn connection_loop(
    shared: Arc<ClientShared>,
    mut transport: Box<dyn Transport>,
    own_tx: mpsc::Sender<ConnCommand>,
    mut cmd_rx: mpsc::Receiver<ConnCommand>,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
    heartbeat.tick().await;
    let mut sweeper = tokio::time::interval(ACK_SWEEP_INTERVAL);
    sweeper.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            command = cmd_rx.recv() => match command {
                Some(ConnCommand::SendFrame { frame, done }) => {
                    let outcome = transport.send(frame).await;
                    let _ = done.send(outcome);
                }
                Some(ConnCommand::Shutdown { reason, done }) => {
                    let notice = DisconnectPayload { reason };
                    match Frame::new(EventType::Disconnect, &notice) {
                        Ok(frame) => {
                            if let Err(err) = transport.send(frame).await {
                                debug!(error = %err, "disconnect notice not sent");
                            }
                        }
                        Err(err) => debug!(error = %err, "disconnect notice not built"),
                    }
                    transport.close().await;
                    shared.dispatch(Event::Disconnected { reason: None }).await;
                    let _ = done.send(());
                    break;
                }
                None => {
                    transport.close().await;
                    break;
                }
            },
            received = transport.recv() => match received {
                Ok(Some(frame)) => match handle_frame(&shared, &mut transport, frame).await {
                    Ok(FrameOutcome::Continue) => {}
                    Ok(FrameOutcome::RemoteClosed) => {
                        transport.close().await;
                        break;
                    }
                    Err(err) => warn!(error = %err, "inbound frame dropped"),
                },
                Ok(None) => {
                    warn!("transport closed unexpectedly");
                    match reconnect(&shared).await {
                        Some(replacement) => transport = replacement,
                        None => break,
                    }
                }
                Err(err) => {
                    warn!(error = %err, "transport failure");
                    match reconnect(&shared).await {
                        Some(replacement) => transport = replacement,
                        None => break,
                    }
                }
            },
            _ = heartbeat.tick() => {
                let payload = HeartbeatPayload {
                    agent_id: shared.agent_id.clone(),
                    timestamp: Utc::now().timestamp_millis(),
                };
                match Frame::new(EventType::Heartbeat, &payload) {
                    Ok(frame) => {
                        if let Err(err) = transport.send(frame).await {
                            debug!(error = %err, "heartbeat not sent");
                        }
                    }
                    Err(err) => debug!(error = %err, "heartbeat frame not built"),
                }
            }
            _ = sweeper.tick() => {
                let now = Utc::now().timestamp_millis();
                for message_id in shared.tracker.sweep(now).await {
                    warn!(%message_id, "no acknowledgement before timeout; delivery uncertain");
                }
            }
        }
    }

    // A handler may have called connect() during a Disconnected or
    // ConnectionError dispatch above, installing a successor connection.
    // Only tear down state this task still owns.
    {
        let mut guard = shared.cmd_tx.write().await;
        let still_ours = guard
            .as_ref()
            .is_some_and(|current| current.same_channel(&own_tx));
        if still_ours {
            guard.take();
            shared.running.send_replace(false);
        }
    }
    debug!("connection task finished");
}

/// Route one inbound frame. Returns an error only for malformed frames the
/// caller should log and drop; protocol-level rejections are handled (and
/// logged) here.
async fn handle_frame(
    shared: &Arc<ClientShared>,
    transport: &mut Box<dyn Transport>,
    frame: Frame,
) -> Result<FrameOutcome> {
    match frame.event_type {
        EventType::Connect => {
            debug!("unexpected CONNECT frame ignored");
            Ok(FrameOutcome::Continue)
        }
        EventType::Disconnect => {
            let reason = frame
                .decode_payload::<DisconnectPayload>()
                .ok()
                .map(|notice| notice.reason);
            info!(?reason, "remote closed the connection");
            shared.set_state(ConnectionState::Disconnected);
            shared.dispatch(Event::Disconnected { reason }).await;
            Ok(FrameOutcome::RemoteClosed)
        }
        EventType::Ack => {
            let ack: AckPayload = frame.decode_payload()?;
            if shared.tracker.acknowledge(ack.message_id).await {
                debug!(message_id = %ack.message_id, "delivery confirmed");
            }
            shared.dispatch(Event::Ack(ack)).await;
            Ok(FrameOutcome::Continue)
        }
        EventType::Presence => {
            let presence: PresencePayload = frame.decode_payload()?;
            shared.dispatch(Event::Presence(presence)).await;
            Ok(FrameOutcome::Continue)
        }
        EventType::Typing => {
            let typing: TypingPayload = frame.decode_payload()?;
            shared.dispatch(Event::Typing(typing)).await;
            Ok(FrameOutcome::Continue)
        }
        EventType::Heartbeat => {
            let beat: HeartbeatPayload = frame.decode_payload()?;
            shared.dispatch(Event::Heartbeat(beat)).await;
            Ok(FrameOutcome::Continue)
        }
        EventType::Error => {
            let report: ErrorPayload = frame.decode_payload()?;
            warn!(
                code = %report.code,
                detail = %sanitize_for_log(&report.message),
                "error reported by remote"
            );
            shared.dispatch(Event::RemoteError(report)).await;
            Ok(FrameOutcome::Continue)
        }
        // A HANDSHAKE frame is either a plaintext introduction or, inside an
        // established conversation, an encrypted key announcement. The
        // envelope form is the only one carrying ciphertext.
        EventType::Handshake => {
            if frame.payload.get("ciphertext").is_some() {
                handle_envelope(shared, transport, frame).await
            } else {
                handle_hello(shared, transport, frame).await
            }
        }
        EventType::Query
        | EventType::Response
        | EventType::Proposal
        | EventType::Confirmation
        | EventType::Rejection => handle_envelope(shared, transport, frame).await,
    }
}

/// First-contact introduction: verify the self-signature, pin the identity
/// if the peer is unknown, and answer with our own hello so the exchange
/// converges.
async fn handle_hello(
    shared: &Arc<ClientShared>,
    transport: &mut Box<dyn Transport>,
    frame: Frame,
) -> Result<FrameOutcome> {
    let hello: SignedHello = frame.decode_payload()?;
    if hello.recipient_id != shared.agent_id {
        debug!(
            agent_id = %hello.agent_id,
            recipient = %hello.recipient_id,
            "introduction for another agent dropped"
        );
        return Ok(FrameOutcome::Continue);
    }
    if let Err(err) = hello.verify() {
        error!(agent_id = %hello.agent_id, error = %err, "introduction rejected");
        return Ok(FrameOutcome::Continue);
    }
    let announced = hello.identity();
    match shared.peers.lookup(&hello.agent_id).await? {
        None => {
            shared.peers.pin(announced.clone()).await?;
            // Reply only on first contact, so a hello exchange terminates.
            let reply = {
                let keys = shared.keys.read().await;
                let keys = keys
                    .as_ref()
                    .ok_or_else(|| Error::Encryption("key material unavailable".into()))?;
                SignedHello::new_signed(&keys.identity(), keys.signing_keypair(), &hello.agent_id)?
            };
            transport
                .send(Frame::new(EventType::Handshake, &reply)?)
                .await?;
            shared.dispatch(Event::PeerIntroduced(announced)).await;
        }
        Some(pinned) if pinned == announced => {
            debug!(agent_id = %hello.agent_id, "known peer re-announced unchanged keys");
        }
        Some(_) => {
            // Key changes must arrive encrypted under the pinned keys; a
            // plaintext hello claiming new keys for a known agent is exactly
            // what an impersonator would send.
            error!(
                agent_id = %hello.agent_id,
                "introduction announces different keys for a pinned peer; ignored"
            );
        }
    }
    Ok(FrameOutcome::Continue)
}

/// Decrypt and dispatch an encrypted envelope: verify, decrypt, acknowledge,
/// record, dispatch. Integrity failures are logged as security events and
/// the frame is dropped without acknowledgement.
async fn handle_envelope(
    shared: &Arc<ClientShared>,
    transport: &mut Box<dyn Transport>,
    frame: Frame,
) -> Result<FrameOutcome> {
    let envelope: EncryptedEnvelope = frame.decode_payload()?;
    if envelope.recipient_id != shared.agent_id {
        debug!(
            message_id = %envelope.message_id,
            recipient = %envelope.recipient_id,
            "envelope for another agent dropped"
        );
        return Ok(FrameOutcome::Continue);
    }
    let peer = match shared.peers.lookup(&envelope.sender_id).await? {
        Some(peer) => peer,
        None => {
            warn!(
                sender = %envelope.sender_id,
                "envelope from unknown peer dropped; no pinned identity to verify against"
            );
            return Ok(FrameOutcome::Continue);
        }
    };
    let message = {
        let keys = shared.keys.read().await;
        let keys = keys
            .as_ref()
            .ok_or_else(|| Error::Encryption("key material unavailable".into()))?;
        let secret = keys.shared_secret_for(&peer)?;
        match codec::decrypt(&envelope, &secret, &peer.signing_public_key) {
            Ok(message) => message,
            Err(err) if err.is_security_event() => {
                error!(
                    message_id = %envelope.message_id,
                    sender = %envelope.sender_id,
                    error = %err,
                    "envelope failed verification"
                );
                return Ok(FrameOutcome::Continue);
            }
            Err(err) => return Err(err),
        }
    };
    if message.event_type() != frame.event_type {
        return Err(Error::Protocol(
            "frame event does not match message type".into(),
        ));
    }
    // Expired or inconsistent messages are dropped before the ack, so the
    // sender is never told a message was delivered that we then discarded.
    let now = Utc::now().timestamp_millis();
    if message.is_expired(now) {
        debug!(message_id = %message.message_id, "expired message dropped");
        return Ok(FrameOutcome::Continue);
    }
    if let MessageContent::Handshake {
        agent_id,
        public_key,
        signing_public_key,
    } = &message.content
    {
        if agent_id != &message.sender_id {
            return Err(Error::Protocol(
                "key announcement names a different agent".into(),
            ));
        }
        // Authenticated under the currently pinned keys, so the rotation is
        // trustworthy.
        let rotated = AgentIdentity::new(agent_id.clone(), public_key.clone(), *signing_public_key);
        shared.peers.pin(rotated).await?;
        info!(agent_id = %agent_id, "peer announced rotated keys");
    }
    // Acknowledge before dispatching so a slow handler cannot push the
    // sender's tracker past its timeout.
    let ack = AckPayload {
        message_id: message.message_id,
        conversation_id: message.conversation_id.clone(),
        agent_id: shared.agent_id.clone(),
        timestamp: now,
    };
    if let Err(err) = transport.send(Frame::new(EventType::Ack, &ack)?).await {
        debug!(error = %err, "acknowledgement not sent");
    }
    if let Err(err) = shared.conversations.record(&message).await {
        warn!(error = %err, "inbound message not recorded");
    }
    shared.dispatch(Event::Message(message)).await;
    Ok(FrameOutcome::Continue)
}

/// Bounded, strictly sequential recovery. Each attempt waits its backoff
/// delay, refreshes the token, and runs the full authentication exchange.
/// Exhaustion (or a credential denial) parks the connection in the error
/// state; nothing retries after that without an explicit connect call.
/// A disconnect issued mid-recovery stands the loop down quietly.
async fn reconnect(shared: &Arc<ClientShared>) -> Option<Box<dyn Transport>> {
    shared.set_state(ConnectionState::Reconnecting);
    let attempts = shared.config.reconnection_attempts;
    let mut running = shared.running.subscribe();
    let mut detail = "reconnection attempts exhausted";
    for attempt in 1..=attempts {
        let delay = shared.config.reconnect_delay_for(attempt);
        info!(attempt, attempts, delay_ms = delay.as_millis() as u64, "reconnecting");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = running.wait_for(|live| !*live) => {}
        }
        if !shared.is_running() {
            info!("recovery abandoned; client disconnected");
            return None;
        }
        let auth = match shared.auth_payload().await {
            Ok(auth) => auth,
            Err(err) => {
                warn!(attempt, error = %err, "token refresh failed");
                continue;
            }
        };
        match shared.establish(&auth).await {
            Ok((transport, result)) if result.authenticated => {
                shared.set_state(ConnectionState::Connected);
                info!(attempt, "reconnected");
                shared.dispatch(Event::Connected(result)).await;
                return Some(transport);
            }
            Ok((mut transport, result)) => {
                // Denied credentials will not improve by retrying.
                warn!(error = ?result.error, "re-authentication denied; giving up");
                transport.close().await;
                detail = "re-authentication denied";
                break;
            }
            Err(err) => warn!(attempt, error = %err, "reconnect attempt failed"),
        }
    }
    error!(attempts, detail, "connection recovery failed");
    shared.set_state(ConnectionState::Error);
    shared
        .dispatch(Event::ConnectionError {
            detail: detail.into(),
        })
        .await;
    None
}
