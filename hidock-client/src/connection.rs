//! Connection management.
//!
//! A [`Connection`] owns the transport session and keeps exactly one command
//! in flight. Replies are correlated with the in-flight command by the
//! `"{command}-{sequence}"` key. Frames are matched on the command prefix
//! only, because the device does not always echo the sequence; a late reply
//! to an abandoned command of the same id can therefore resolve a newer
//! request.

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::model::{DeviceIdentity, DeviceModel};
use crate::registry::{self, Reply};
use crate::streaming::{Step, StreamingOperation};
use crate::transport::Transport;
use bytes::Bytes;
use hidock_protocol::{CommandId, Decoder, Encoder, Frame};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::time::Instant;

/// Capacity of the connection event channel.
const EVENT_CAPACITY: usize = 16;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Opening,
    /// Open with nothing in flight.
    Ready,
    /// A command has been written and awaits its reply.
    Busy,
}

/// Published to subscribers on connect and disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected { model: DeviceModel },
    Disconnected,
}

/// A command waiting to be sent.
#[derive(Debug, Clone)]
pub struct Command {
    pub id: CommandId,
    pub body: Bytes,
    /// Commands still queued past this instant fail with
    /// [`ClientError::Expired`] instead of being written.
    pub expires_at: Option<Instant>,
    /// Overrides the configured reply timeout.
    pub timeout: Option<Duration>,
}

impl Command {
    pub fn new(id: CommandId) -> Self {
        Self {
            id,
            body: Bytes::new(),
            expires_at: None,
            timeout: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_expiry(mut self, at: Instant) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn expires_in(self, after: Duration) -> Self {
        self.with_expiry(Instant::now() + after)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

type ReplySender = oneshot::Sender<Result<Reply, ClientError>>;

struct Pending {
    command: Command,
    sequence: u32,
    reply: ReplySender,
    /// Fired when the command leaves the queue for the wire.
    sent: oneshot::Sender<()>,
}

struct InFlight {
    command: CommandId,
    key: String,
    sequence: u32,
    reply: ReplySender,
}

struct State {
    phase: ConnectionPhase,
    identity: DeviceIdentity,
    queue: VecDeque<Pending>,
    current: Option<InFlight>,
    streaming: Option<StreamingOperation>,
    /// Set while an operation is out of `streaming` running its callbacks.
    feeding: Option<CommandId>,
    decoder: Decoder,
    reader_running: bool,
}

impl State {
    fn current_is(&self, command: CommandId) -> bool {
        self.current
            .as_ref()
            .is_some_and(|c| c.key.starts_with(&command_prefix(command.code())))
    }

    fn streaming_command(&self) -> Option<CommandId> {
        self.streaming.as_ref().map(|op| op.command()).or(self.feeding)
    }

    fn is_idle(&self) -> bool {
        self.current.is_none()
            && self.queue.is_empty()
            && self.streaming.is_none()
            && self.feeding.is_none()
            && self.decoder.buffered() == 0
    }
}

fn correlation_key(command: u16, sequence: u32) -> String {
    format!("{}-{}", command, sequence)
}

fn command_prefix(command: u16) -> String {
    format!("{}-", command)
}

/// Abandons a command whose caller stopped waiting, so the queue behind it
/// keeps moving.
struct AbandonOnDrop<'a> {
    conn: &'a Arc<Connection>,
    id: CommandId,
    sequence: u32,
    session: u64,
    armed: bool,
}

impl Drop for AbandonOnDrop<'_> {
    fn drop(&mut self) {
        if !self.armed || self.conn.session_id() != self.session {
            return;
        }
        tracing::debug!("{} seq={} dropped by caller", self.id, self.sequence);
        self.conn.abandon(self.id, self.sequence);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let conn = self.conn.clone();
            handle.spawn(async move { conn.process_queue().await });
        }
    }
}

/// A session with one device.
pub struct Connection {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    state: Mutex<State>,
    events: broadcast::Sender<ConnectionEvent>,
    sequence: AtomicU32,
    /// Bumped on every teardown so background tasks of an old session exit.
    session: watch::Sender<u64>,
}

impl Connection {
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Arc<Self> {
        let model = DeviceModel::from_product_id(transport.product_id());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (session, _) = watch::channel(0);
        Arc::new(Self {
            config,
            transport,
            state: Mutex::new(State {
                phase: ConnectionPhase::Disconnected,
                identity: DeviceIdentity::new(model),
                queue: VecDeque::new(),
                current: None,
                streaming: None,
                feeding: None,
                decoder: Decoder::new(),
                reader_running: false,
            }),
            events,
            sequence: AtomicU32::new(0),
            session,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.state.lock().phase
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.phase(),
            ConnectionPhase::Ready | ConnectionPhase::Busy
        )
    }

    /// Returns a snapshot of the cached device identity.
    pub fn identity(&self) -> DeviceIdentity {
        self.state.lock().identity.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    fn session_id(&self) -> u64 {
        *self.session.borrow()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Opens the transport and claims the command interface.
    ///
    /// Fails with [`ClientError::Config`] before touching the transport when
    /// the configuration is out of range.
    pub async fn open(self: &Arc<Self>) -> Result<(), ClientError> {
        self.config.validate()?;
        {
            let mut state = self.state.lock();
            if state.phase != ConnectionPhase::Disconnected {
                return Ok(());
            }
            state.phase = ConnectionPhase::Opening;
        }

        tracing::debug!("Opening transport");
        let opened = async {
            self.transport.open().await?;
            self.transport.claim_interface().await
        }
        .await;

        if let Err(e) = opened {
            tracing::error!("Failed to open device: {}", e);
            self.state.lock().phase = ConnectionPhase::Disconnected;
            let _ = self.transport.close().await;
            return Err(e.into());
        }

        let model = {
            let mut state = self.state.lock();
            state.phase = ConnectionPhase::Ready;
            state.identity.model
        };
        self.spawn_liveness(self.session_id());

        tracing::info!("Connected to {}", model);
        let _ = self.events.send(ConnectionEvent::Connected { model });
        Ok(())
    }

    /// Closes the session. Pending commands fail with
    /// [`ClientError::ConnectionClosed`].
    pub async fn close(&self) {
        self.teardown("closed by host").await;
    }

    async fn teardown(&self, reason: &str) {
        let (queue, current) = {
            let mut state = self.state.lock();
            if state.phase == ConnectionPhase::Disconnected {
                return;
            }
            state.phase = ConnectionPhase::Disconnected;
            state.decoder.clear();
            state.streaming = None;
            state.feeding = None;
            state.reader_running = false;
            state.identity.clear();
            self.sequence.store(0, Ordering::SeqCst);
            self.session.send_modify(|id| *id += 1);
            (std::mem::take(&mut state.queue), state.current.take())
        };

        for pending in queue {
            let _ = pending.reply.send(Err(ClientError::ConnectionClosed));
        }
        if let Some(current) = current {
            let _ = current.reply.send(Err(ClientError::ConnectionClosed));
        }

        tracing::info!("Disconnected: {}", reason);
        let _ = self.events.send(ConnectionEvent::Disconnected);

        if let Err(e) = self.transport.close().await {
            tracing::warn!("Error closing transport: {}", e);
        }
    }

    fn spawn_liveness(self: &Arc<Self>, session: u64) {
        let conn: Weak<Self> = Arc::downgrade(self);
        let period = self.config.liveness_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(conn) = conn.upgrade() else { break };
                if conn.session_id() != session {
                    break;
                }
                if !conn.transport.is_open() {
                    tracing::warn!("Device is no longer reachable");
                    conn.teardown("device detached").await;
                    break;
                }
            }
        });
    }

    // =========================================================================
    // Command queue
    // =========================================================================

    /// Queues a command and waits for its reply.
    ///
    /// The reply timeout starts once the command is written; while queued it
    /// is bounded only by its expiry. Returns `Ok(None)` when no reply
    /// arrives in time; the command is abandoned and the queue moves on.
    pub async fn execute(self: &Arc<Self>, command: Command) -> Result<Option<Reply>, ClientError> {
        let id = command.id;
        let timeout = command.timeout.unwrap_or_else(|| {
            if id.is_streaming() || id == CommandId::FirmwareUpload {
                self.config.transfer_timeout()
            } else {
                self.config.command_timeout()
            }
        });

        let (tx, rx) = oneshot::channel();
        let (sent_tx, sent_rx) = oneshot::channel();
        let sequence = {
            let mut state = self.state.lock();
            if !matches!(
                state.phase,
                ConnectionPhase::Ready | ConnectionPhase::Busy
            ) {
                return Err(ClientError::NotConnected);
            }
            let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
            state.queue.push_back(Pending {
                command,
                sequence,
                reply: tx,
                sent: sent_tx,
            });
            sequence
        };
        tracing::debug!("Queued {} seq={}", id, sequence);
        let mut guard = AbandonOnDrop {
            conn: self,
            id,
            sequence,
            session: self.session_id(),
            armed: true,
        };

        self.process_queue().await;

        // dropped unsent when the command expires or the session closes; the
        // reply channel then carries the outcome
        let _ = sent_rx.await;

        let outcome = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result.map(Some),
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                tracing::warn!("{} seq={} timed out after {:?}", id, sequence, timeout);
                self.abandon(id, sequence);
                self.process_queue().await;
                Ok(None)
            }
        };
        guard.armed = false;
        outcome
    }

    /// Like [`execute`](Self::execute), with `operation` consuming the
    /// reply frames.
    pub async fn execute_streaming(
        self: &Arc<Self>,
        command: Command,
        operation: StreamingOperation,
    ) -> Result<Option<Reply>, ClientError> {
        let id = command.id;
        {
            let mut state = self.state.lock();
            if let Some(active) = state.streaming_command() {
                return Err(ClientError::StreamingBusy(active));
            }
            state.streaming = Some(operation);
        }

        let result = self.execute(command).await;
        if !matches!(result, Ok(Some(_))) {
            let mut state = self.state.lock();
            if state.streaming.as_ref().map(|op| op.command()) == Some(id) {
                state.streaming = None;
            }
        }
        result
    }

    fn abandon(&self, id: CommandId, sequence: u32) {
        let mut state = self.state.lock();
        state.queue.retain(|p| p.sequence != sequence);

        let key = correlation_key(id.code(), sequence);
        if state.current.as_ref().is_some_and(|c| c.key == key) {
            state.current = None;
            if state.phase == ConnectionPhase::Busy {
                state.phase = ConnectionPhase::Ready;
            }
        }
        if state.streaming.as_ref().map(|op| op.command()) == Some(id) {
            state.streaming = None;
        }
    }

    /// Sends the next queued command unless one is already in flight.
    async fn process_queue(self: &Arc<Self>) {
        loop {
            let (id, sequence, frame) = {
                let mut state = self.state.lock();
                if state.current.is_some() || state.phase != ConnectionPhase::Ready {
                    return;
                }
                let Some(Pending {
                    command,
                    sequence,
                    reply,
                    sent,
                }) = state.queue.pop_front()
                else {
                    return;
                };
                let id = command.id;
                if command.is_expired() {
                    tracing::warn!("{} seq={} expired in queue", id, sequence);
                    let _ = reply.send(Err(ClientError::Expired(id)));
                    continue;
                }

                let encoded = Encoder::encode(id.code(), sequence, &command.body);
                let frame = match encoded {
                    Ok(frame) => frame.freeze(),
                    Err(e) => {
                        let _ = reply.send(Err(e.into()));
                        continue;
                    }
                };

                state.current = Some(InFlight {
                    command: id,
                    key: correlation_key(id.code(), sequence),
                    sequence,
                    reply,
                });
                state.phase = ConnectionPhase::Busy;
                let _ = sent.send(());
                (id, sequence, frame)
            };

            tracing::debug!("Sending {} seq={} ({} bytes)", id, sequence, frame.len());
            match self.transport.write(self.config.endpoint_out, frame).await {
                Ok(()) => {
                    self.ensure_reader();
                    return;
                }
                Err(e) => {
                    tracing::error!("Write of {} seq={} failed: {}", id, sequence, e);
                    let current = {
                        let mut state = self.state.lock();
                        state.identity.clear();
                        let ours = state.current.as_ref().is_some_and(|c| c.sequence == sequence);
                        if !ours {
                            return;
                        }
                        if state.phase == ConnectionPhase::Busy {
                            state.phase = ConnectionPhase::Ready;
                        }
                        if state.streaming.as_ref().map(|op| op.command()) == Some(id) {
                            state.streaming = None;
                        }
                        state.current.take()
                    };
                    if let Some(current) = current {
                        let _ = current.reply.send(Err(ClientError::Transport(e)));
                    }
                }
            }
        }
    }

    // =========================================================================
    // Receive pipeline
    // =========================================================================

    fn ensure_reader(self: &Arc<Self>) {
        let session = {
            let mut state = self.state.lock();
            if state.reader_running || state.phase == ConnectionPhase::Disconnected {
                return;
            }
            state.reader_running = true;
            self.session_id()
        };
        tokio::spawn(self.clone().receive_loop(session));
    }

    /// Keeps one read armed and decodes once reads go quiet for the
    /// debounce period. Exits when the connection is idle.
    async fn receive_loop(self: Arc<Self>, session: u64) {
        tracing::debug!("receive_loop started");
        let mut session_changed = self.session.subscribe();
        if *session_changed.borrow_and_update() != session {
            return;
        }

        let transport = self.transport.clone();
        let endpoint = self.config.endpoint_in;
        let max_len = self.config.read_buffer_size;
        let mut read = transport.read(endpoint, max_len);
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                result = &mut read => {
                    match result {
                        Ok(data) => {
                            let wait = {
                                let mut state = self.state.lock();
                                if self.session_id() != session {
                                    return;
                                }
                                state.decoder.extend(&data);
                                tracing::debug!(
                                    "Read {} bytes, {} buffered",
                                    data.len(),
                                    state.decoder.buffered()
                                );
                                let transfer = match &state.streaming {
                                    Some(op) => {
                                        op.command().is_file_transfer()
                                            && state.current_is(op.command())
                                    }
                                    None => false,
                                };
                                if transfer {
                                    self.config.transfer_debounce()
                                } else {
                                    self.config.debounce()
                                }
                            };
                            deadline = Some(Instant::now() + wait);
                            read = transport.read(endpoint, max_len);
                        }
                        Err(e) => {
                            tracing::error!("Read failed: {}", e);
                            self.teardown("read failed").await;
                            return;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    if !self.decode_pass(session).await {
                        tracing::debug!("receive_loop idle, exiting");
                        return;
                    }
                }
                _ = session_changed.changed() => {
                    return;
                }
            }
        }
    }

    /// Decodes buffered frames and dispatches them. Returns `false` once the
    /// reader should stop.
    ///
    /// A framing error fails the command that was in flight when the corrupt
    /// bytes arrived, after any frames decoded ahead of them are dispatched.
    async fn decode_pass(self: &Arc<Self>, session: u64) -> bool {
        let (frames, corrupt) = {
            let mut state = self.state.lock();
            if self.session_id() != session {
                return false;
            }
            let in_flight = state.current.as_ref().map(|c| c.sequence);
            let mut frames = Vec::new();
            let mut corrupt = None;
            loop {
                match state.decoder.decode_frames() {
                    Ok(batch) if batch.is_empty() => break,
                    Ok(batch) => frames.extend(batch),
                    Err(e) => {
                        corrupt = Some((e, in_flight));
                        break;
                    }
                }
            }
            (frames, corrupt)
        };

        for frame in frames {
            self.dispatch(frame);
            self.process_queue().await;
        }

        if let Some((e, in_flight)) = corrupt {
            tracing::error!("Framing error, receive buffer dropped: {}", e);
            self.fail_in_flight(in_flight, e.into());
            self.process_queue().await;
        }

        let mut state = self.state.lock();
        if self.session_id() != session {
            return false;
        }
        if state.is_idle() {
            state.reader_running = false;
            return false;
        }
        true
    }

    /// Fails the command with `sequence` if it is still in flight.
    fn fail_in_flight(&self, sequence: Option<u32>, error: ClientError) {
        let current = {
            let mut state = self.state.lock();
            let ours = sequence.is_some()
                && state.current.as_ref().map(|c| c.sequence) == sequence;
            if !ours {
                return;
            }
            let current = state.current.take();
            let command = current.as_ref().map(|c| c.command);
            if state.streaming.as_ref().map(|op| op.command()) == command {
                state.streaming = None;
            }
            if state.phase == ConnectionPhase::Busy {
                state.phase = ConnectionPhase::Ready;
            }
            current
        };
        if let Some(current) = current {
            let _ = current.reply.send(Err(error));
        }
    }

    fn dispatch(&self, frame: Frame) {
        let command = match CommandId::try_from(frame.command) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!("Dropping frame seq={}: {}", frame.sequence, e);
                return;
            }
        };
        tracing::debug!(
            "Received {} seq={} ({} bytes)",
            command,
            frame.sequence,
            frame.body.len()
        );

        let operation = {
            let mut state = self.state.lock();
            let ours = state
                .streaming
                .as_ref()
                .is_some_and(|op| op.command() == command)
                && state.current_is(command);
            if ours {
                state.feeding = Some(command);
                state.streaming.take()
            } else {
                None
            }
        };

        let step = match operation {
            // Callbacks run without the state lock held; `feeding` keeps the
            // slot claimed meanwhile.
            Some(mut operation) => {
                let step = operation.feed(frame.body.clone());
                let mut state = self.state.lock();
                if state.feeding == Some(command) {
                    state.feeding = None;
                    if matches!(step, Step::Continue)
                        && state.streaming.is_none()
                        && state.current_is(command)
                    {
                        state.streaming = Some(operation);
                    }
                }
                Ok(step)
            }
            None => {
                let mut state = self.state.lock();
                registry::handle(command, &frame, &mut state.identity)
            }
        };

        match step {
            Ok(Step::Continue) => {}
            Ok(Step::Complete(reply)) => self.resolve(command, Ok(reply)),
            Err(e) => self.resolve(command, Err(e.into())),
        }
    }

    fn resolve(&self, command: CommandId, result: Result<Reply, ClientError>) {
        let current = {
            let mut state = self.state.lock();
            if !state.current_is(command) {
                tracing::warn!("Dropping unmatched reply for {}", command);
                return;
            }
            if state.phase == ConnectionPhase::Busy {
                state.phase = ConnectionPhase::Ready;
            }
            state.current.take()
        };

        if let Some(current) = current {
            tracing::debug!("Resolved {}", current.key);
            let _ = current.reply.send(result);
        }
    }
}
