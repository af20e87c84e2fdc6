use super::{
    fax::{FaxProgress, FaxStatus},
    state::{transition, ConnectionState, Trigger},
    Direction,
};
use crate::{
    device::{BackendStatus, BackendToken, DeviceBackend, DeviceKind, LineEventKind},
    error::ControlError,
    event::{CallEvent, CallEventSender},
    get_timestamp,
    media::{AudioDevice, AudioPath},
    ringtone::Ringer,
    utils::{format_duration, scramble_number},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    path::PathBuf,
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};
use tokio::{
    sync::{mpsc, oneshot},
    time::{interval, sleep_until, MissedTickBehavior},
};
use tracing::{debug, info, warn};

/// Read-only view of a connection handed to status queries.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub id: String,
    pub direction: Direction,
    pub kind: DeviceKind,
    pub state: ConnectionState,
    pub local_number: String,
    pub remote_number: String,
    pub channel: u32,
    pub backend: String,
    pub line_level_in: f64,
    pub line_level_out: f64,
    pub fax: Option<FaxStatus>,
    pub muted: bool,
    pub on_hold: bool,
    pub recording: bool,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub active_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration: String,
}

#[derive(Clone, Debug)]
struct ConnectionSnapshot {
    status: ConnectionStatus,
    active_since: Option<Instant>,
    active_for: Option<Duration>,
}

/// Snapshot cell shared between the connection task (sole writer) and any
/// number of readers.
#[derive(Clone)]
pub(crate) struct ConnectionShared {
    inner: Arc<RwLock<ConnectionSnapshot>>,
}

impl ConnectionShared {
    pub(crate) fn new(status: ConnectionStatus) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ConnectionSnapshot {
                status,
                active_since: None,
                active_for: None,
            })),
        }
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        let snapshot = match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let elapsed = snapshot
            .active_for
            .or_else(|| snapshot.active_since.map(|since| since.elapsed()));
        let mut status = snapshot.status;
        status.duration = format_duration(elapsed.unwrap_or_default());
        status
    }

    pub(crate) fn state(&self) -> ConnectionState {
        match self.inner.read() {
            Ok(guard) => guard.status.state,
            Err(poisoned) => poisoned.into_inner().status.state,
        }
    }

    fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut ConnectionSnapshot),
    {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        mutate(&mut guard);
    }
}

pub(crate) type Reply<T> = oneshot::Sender<T>;

pub(crate) enum ConnectionCommand {
    Pickup(Reply<Result<(), ControlError>>),
    Hangup(Reply<()>),
    Mute(bool, Reply<Result<(), ControlError>>),
    Hold(bool, Reply<Result<(), ControlError>>),
    Dtmf(char, Reply<Result<(), ControlError>>),
    Record(Option<PathBuf>, Reply<Result<(), ControlError>>),
    /// The backend broke the line protocol for this connection.
    Violation(String),
}

pub(crate) enum ConnectionInput {
    Line(LineEventKind),
    Command(ConnectionCommand),
}

pub(crate) type ConnectionInputSender = mpsc::UnboundedSender<ConnectionInput>;

/// Caller side reference to a connection.
///
/// Cloning is cheap. A handle keeps the status snapshot alive after the
/// connection finished, so late status queries still see the final state.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: String,
    token: BackendToken,
    backend: Arc<dyn DeviceBackend>,
    shared: ConnectionShared,
    input: ConnectionInputSender,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("backend", &self.backend.name())
            .field("token", &self.token)
            .finish()
    }
}

impl ConnectionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn token(&self) -> BackendToken {
        self.token
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub async fn backend_status(&self) -> Result<BackendStatus, ControlError> {
        Ok(self.backend.get_status(self.token).await?)
    }

    pub(crate) fn deliver(&self, event: LineEventKind) -> bool {
        self.input.send(ConnectionInput::Line(event)).is_ok()
    }

    pub(crate) fn violation(&self, reason: String) {
        self.input
            .send(ConnectionInput::Command(ConnectionCommand::Violation(reason)))
            .ok();
    }

    /// Sends a command and waits for the connection task to answer it.
    ///
    /// A finished task answers nothing, which is reported as the invalid
    /// state it ended in.
    pub(crate) async fn request<T, F>(&self, build: F) -> Result<T, ControlError>
    where
        F: FnOnce(Reply<Result<T, ControlError>>) -> ConnectionCommand,
    {
        let (tx, rx) = oneshot::channel();
        if self
            .input
            .send(ConnectionInput::Command(build(tx)))
            .is_err()
        {
            return Err(ControlError::InvalidState(self.state()));
        }
        rx.await
            .unwrap_or_else(|_| Err(ControlError::InvalidState(self.state())))
    }

    pub(crate) async fn hangup(&self) {
        if self.state().is_terminal() {
            return;
        }
        let (tx, rx) = oneshot::channel();
        if self
            .input
            .send(ConnectionInput::Command(ConnectionCommand::Hangup(tx)))
            .is_ok()
        {
            rx.await.ok();
        }
    }
}

pub(crate) struct ConnectionSetup {
    pub id: String,
    pub direction: Direction,
    pub kind: DeviceKind,
    pub local: String,
    pub remote: String,
    pub channel: u32,
    pub token: BackendToken,
    pub backend: Arc<dyn DeviceBackend>,
    pub fax_file: Option<PathBuf>,
}

#[derive(Clone)]
pub(crate) struct ConnectionOptions {
    pub hangup_timeout: Duration,
    pub frame_samples: usize,
    pub frame_interval: Duration,
}

pub(crate) struct ConnectionRuntime {
    pub audio: Arc<dyn AudioDevice>,
    pub ringer: Arc<dyn Ringer>,
    pub events: CallEventSender,
    pub finished: mpsc::UnboundedSender<String>,
    pub options: ConnectionOptions,
}

/// Creates the connection, starts its task and returns the handle.
pub(crate) fn spawn_connection(setup: ConnectionSetup, runtime: ConnectionRuntime) -> ConnectionHandle {
    let state = match setup.direction {
        Direction::Outgoing => ConnectionState::Dialing,
        Direction::Incoming => ConnectionState::Ringing,
    };
    let fax = match setup.kind {
        DeviceKind::Fax => Some(FaxStatus::new(
            setup.direction == Direction::Outgoing,
            setup.fax_file.clone(),
        )),
        DeviceKind::Phone => None,
    };
    let shared = ConnectionShared::new(ConnectionStatus {
        id: setup.id.clone(),
        direction: setup.direction,
        kind: setup.kind,
        state,
        local_number: setup.local.clone(),
        remote_number: setup.remote.clone(),
        channel: setup.channel,
        backend: setup.backend.name().to_string(),
        line_level_in: 0.0,
        line_level_out: 0.0,
        fax: fax.clone(),
        muted: false,
        on_hold: false,
        recording: false,
        last_error: None,
        created_at: Utc::now(),
        active_at: None,
        ended_at: None,
        duration: format_duration(Duration::ZERO),
    });
    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let handle = ConnectionHandle {
        id: setup.id.clone(),
        token: setup.token,
        backend: setup.backend.clone(),
        shared: shared.clone(),
        input: input_tx,
    };

    info!(
        "connection {}: {} {} call {} -> {} on {} channel {}",
        setup.id,
        setup.direction,
        setup.kind,
        scramble_number(&setup.local),
        scramble_number(&setup.remote),
        setup.backend.name(),
        setup.channel
    );

    let context = ConnectionContext {
        id: setup.id,
        direction: setup.direction,
        kind: setup.kind,
        token: setup.token,
        backend: setup.backend,
        shared,
        state,
        audio: None,
        fax,
        muted: false,
        held: false,
        teardown_deadline: None,
        runtime,
    };
    tokio::spawn(context.run(input_rx));
    handle
}

/// The connection's event-delivery context: the only place its state is
/// changed.
struct ConnectionContext {
    id: String,
    direction: Direction,
    kind: DeviceKind,
    token: BackendToken,
    backend: Arc<dyn DeviceBackend>,
    shared: ConnectionShared,
    state: ConnectionState,
    audio: Option<AudioPath>,
    fax: Option<FaxStatus>,
    muted: bool,
    held: bool,
    teardown_deadline: Option<tokio::time::Instant>,
    runtime: ConnectionRuntime,
}

impl ConnectionContext {
    async fn run(mut self, mut input_rx: mpsc::UnboundedReceiver<ConnectionInput>) {
        if self.state == ConnectionState::Ringing {
            self.runtime.ringer.play(self.kind);
        }
        self.publish_state();

        let mut ticker = interval(self.runtime.options.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while !self.state.is_terminal() {
            let deadline = self.teardown_deadline;
            let pumping = self.audio.is_some() && self.kind == DeviceKind::Phone && !self.held;
            tokio::select! {
                input = input_rx.recv() => match input {
                    Some(ConnectionInput::Line(event)) => self.on_line_event(event).await,
                    Some(ConnectionInput::Command(command)) => self.on_command(command).await,
                    None => {
                        debug!("connection {}: all handles dropped, hanging up", self.id);
                        self.local_hangup().await;
                        if !self.state.is_terminal() {
                            self.advance(Trigger::TeardownTimeout);
                        }
                    }
                },
                _ = ticker.tick(), if pumping => self.pump_out().await,
                _ = sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now)), if deadline.is_some() => {
                    warn!(
                        "connection {}: backend did not confirm teardown within {:?}",
                        self.id, self.runtime.options.hangup_timeout
                    );
                    self.advance(Trigger::TeardownTimeout);
                }
            }
        }

        debug!("connection {}: finished in state {}", self.id, self.state);
        self.runtime.finished.send(self.id.clone()).ok();
    }

    fn trigger_for(event: &LineEventKind) -> Option<Trigger> {
        match event {
            LineEventKind::RemoteAnswered => Some(Trigger::RemoteAnswered),
            LineEventKind::LineUp => Some(Trigger::LineUp),
            LineEventKind::RemoteHungUp => Some(Trigger::RemoteHungUp),
            LineEventKind::DisconnectConfirmed => Some(Trigger::DisconnectConfirmed),
            LineEventKind::Fault { .. } => Some(Trigger::Fault),
            _ => None,
        }
    }

    async fn on_line_event(&mut self, event: LineEventKind) {
        if let LineEventKind::Fault { code, reason } = &event {
            self.fail(format!("{} (cause 0x{:04x})", reason, code));
            return;
        }
        if let Some(trigger) = Self::trigger_for(&event) {
            if !self.advance(trigger) {
                debug!(
                    "connection {}: ignoring {} in state {}",
                    self.id,
                    event.name(),
                    self.state
                );
            }
            return;
        }
        match event {
            LineEventKind::Data(data) => self.pump_in(&data),
            LineEventKind::Dtmf(digit) => {
                debug!("connection {}: received dtmf {}", self.id, digit);
                self.runtime
                    .events
                    .send(CallEvent::Dtmf {
                        id: self.id.clone(),
                        digit,
                    })
                    .ok();
            }
            LineEventKind::FaxProgress(progress) => self.on_fax_progress(&progress),
            _ => {}
        }
    }

    async fn on_command(&mut self, command: ConnectionCommand) {
        match command {
            ConnectionCommand::Pickup(reply) => {
                reply.send(self.pickup().await).ok();
            }
            ConnectionCommand::Hangup(reply) => {
                self.local_hangup().await;
                reply.send(()).ok();
            }
            ConnectionCommand::Mute(mute, reply) => {
                let result = if self.state.is_terminal() {
                    Err(ControlError::InvalidState(self.state))
                } else {
                    self.muted = mute;
                    if let Some(audio) = self.audio.as_mut() {
                        audio.set_muted(mute);
                    }
                    self.shared.update(|s| s.status.muted = mute);
                    Ok(())
                };
                reply.send(result).ok();
            }
            ConnectionCommand::Hold(hold, reply) => {
                reply.send(self.hold(hold).await).ok();
            }
            ConnectionCommand::Dtmf(digit, reply) => {
                reply.send(self.send_dtmf(digit).await).ok();
            }
            ConnectionCommand::Record(path, reply) => {
                reply.send(self.record(path)).ok();
            }
            ConnectionCommand::Violation(reason) => {
                warn!("connection {}: protocol violation: {}", self.id, reason);
                if let Err(e) = self.backend.terminate(self.token).await {
                    debug!("connection {}: terminate after violation: {}", self.id, e);
                }
                self.fail(format!("protocol violation: {}", reason));
            }
        }
    }

    async fn pickup(&mut self) -> Result<(), ControlError> {
        if self.state != ConnectionState::Ringing {
            return Err(ControlError::InvalidState(self.state));
        }
        self.backend.answer(self.token).await?;
        self.advance(Trigger::LocalAnswer);
        Ok(())
    }

    async fn local_hangup(&mut self) {
        if !self.advance(Trigger::LocalHangup) {
            debug!("connection {}: hangup in state {} is a no-op", self.id, self.state);
            return;
        }
        match self.backend.terminate(self.token).await {
            Ok(()) => {
                self.teardown_deadline =
                    Some(tokio::time::Instant::now() + self.runtime.options.hangup_timeout);
            }
            Err(e) => {
                // nothing left to confirm the teardown
                warn!("connection {}: terminate failed: {}", self.id, e);
                self.advance(Trigger::TeardownTimeout);
            }
        }
    }

    async fn hold(&mut self, hold: bool) -> Result<(), ControlError> {
        if !matches!(self.state, ConnectionState::Connected | ConnectionState::Active) {
            return Err(ControlError::InvalidState(self.state));
        }
        self.backend.hold(self.token, hold).await?;
        self.held = hold;
        self.shared.update(|s| s.status.on_hold = hold);
        Ok(())
    }

    async fn send_dtmf(&mut self, digit: char) -> Result<(), ControlError> {
        if self.state != ConnectionState::Active || self.kind != DeviceKind::Phone {
            return Err(ControlError::InvalidState(self.state));
        }
        self.backend.send_dtmf(self.token, digit).await?;
        Ok(())
    }

    fn record(&mut self, path: Option<PathBuf>) -> Result<(), ControlError> {
        let audio = match self.audio.as_mut() {
            Some(audio) if self.kind == DeviceKind::Phone => audio,
            _ => return Err(ControlError::InvalidState(self.state)),
        };
        let result = match path {
            Some(path) => audio.start_recording(&path),
            None => audio.stop_recording(),
        };
        let recording = audio.is_recording();
        self.shared.update(|s| s.status.recording = recording);
        result.map_err(|e| ControlError::Recording(e.to_string()))
    }

    fn fail(&mut self, reason: String) {
        if self.state.is_terminal() {
            return;
        }
        warn!("connection {}: failed in state {}: {}", self.id, self.state, reason);
        self.shared
            .update(|s| s.status.last_error = Some(reason.clone()));
        self.runtime
            .events
            .send(CallEvent::Error {
                id: Some(self.id.clone()),
                message: reason,
            })
            .ok();
        self.advance(Trigger::Fault);
    }

    /// Applies `trigger`; returns false when it does not apply to the current
    /// state.
    fn advance(&mut self, trigger: Trigger) -> bool {
        let path = match transition(self.state, trigger) {
            Some(path) => path,
            None => return false,
        };
        for next in path {
            self.enter(*next);
        }
        true
    }

    fn enter(&mut self, next: ConnectionState) {
        let previous = self.state;
        self.state = next;
        info!("connection {}: {} -> {}", self.id, previous, next);

        if previous == ConnectionState::Ringing {
            self.runtime.ringer.stop();
        }

        match next {
            ConnectionState::Active => {
                let device = match self.kind {
                    DeviceKind::Phone => Some(self.runtime.audio.clone()),
                    DeviceKind::Fax => None,
                };
                let mut audio = AudioPath::new(device, self.runtime.options.frame_samples);
                audio.set_muted(self.muted);
                self.audio = Some(audio);
            }
            ConnectionState::Disconnecting
            | ConnectionState::Disconnected
            | ConnectionState::Failed => {
                if let Some(mut audio) = self.audio.take() {
                    if let Err(e) = audio.stop_recording() {
                        warn!("connection {}: closing recording failed: {}", self.id, e);
                    }
                }
            }
            _ => {}
        }
        if next.is_terminal() {
            self.teardown_deadline = None;
        }

        let now = Instant::now();
        self.shared.update(|s| {
            s.status.state = next;
            match next {
                ConnectionState::Active => {
                    s.active_since = Some(now);
                    s.status.active_at = Some(Utc::now());
                }
                ConnectionState::Disconnecting
                | ConnectionState::Disconnected
                | ConnectionState::Failed => {
                    if s.active_for.is_none() {
                        s.active_for = s.active_since.map(|since| now.duration_since(since));
                    }
                    s.status.recording = false;
                    s.status.line_level_in = 0.0;
                    s.status.line_level_out = 0.0;
                    if next.is_terminal() {
                        s.status.ended_at = Some(Utc::now());
                    }
                }
                _ => {}
            }
        });
        self.publish_state();
    }

    fn publish_state(&self) {
        self.runtime
            .events
            .send(CallEvent::StateChanged {
                id: self.id.clone(),
                direction: self.direction,
                state: self.state,
                timestamp: get_timestamp(),
            })
            .ok();
    }

    fn pump_in(&mut self, data: &[u8]) {
        let audio = match self.audio.as_mut() {
            Some(audio) => audio,
            None => {
                debug!(
                    "connection {}: dropping {} bytes in state {}",
                    self.id,
                    data.len(),
                    self.state
                );
                return;
            }
        };
        if let Err(e) = audio.receive(data) {
            warn!("connection {}: line decode failed: {}", self.id, e);
            return;
        }
        let level = audio.level_in();
        self.shared.update(|s| s.status.line_level_in = level);
    }

    async fn pump_out(&mut self) {
        let audio = match self.audio.as_mut() {
            Some(audio) => audio,
            None => return,
        };
        let frame = match audio.transmit() {
            Ok(Some(frame)) => frame.to_vec(),
            Ok(None) => return,
            Err(e) => {
                warn!("connection {}: line encode failed: {}", self.id, e);
                return;
            }
        };
        let level = audio.level_out();
        self.shared.update(|s| s.status.line_level_out = level);
        if let Err(e) = self.backend.transmit(self.token, &frame).await {
            debug!("connection {}: transmit failed: {}", self.id, e);
        }
    }

    fn on_fax_progress(&mut self, progress: &FaxProgress) {
        let fax = match self.fax.as_mut() {
            Some(fax) => fax,
            None => {
                warn!("connection {}: fax progress on a {} call", self.id, self.kind);
                return;
            }
        };
        fax.apply(progress);
        let status = fax.clone();
        debug!(
            "connection {}: fax {:?} page {}/{} {}%",
            self.id, status.phase, status.page_current, status.page_total, status.progress
        );
        self.shared.update(|s| s.status.fax = Some(status.clone()));
        self.runtime
            .events
            .send(CallEvent::FaxProgress {
                id: self.id.clone(),
                status,
            })
            .ok();
    }
}
