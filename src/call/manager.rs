use super::{
    connection::{
        spawn_connection, ConnectionCommand, ConnectionHandle, ConnectionOptions,
        ConnectionRuntime, ConnectionSetup,
    },
    Direction,
};
use crate::{
    device::{
        BackendStatus, BackendToken, DeviceBackend, DeviceKind, DeviceRegistry, LineEvent,
        LineEventKind, LineEventReceiver, LineEventSender, OriginateRequest,
    },
    error::{BackendError, ControlError, DialError, PickupError},
    event::{CallEvent, CallEventReceiver, CallEventSender},
    get_timestamp,
    media::{AudioDevice, NullAudio},
    netmonitor::Connectivity,
    ringtone::{LogRinger, Ringer},
    utils::{canonize_number, scramble_number},
};
use anyhow::{anyhow, Result};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_SIZE: usize = 128;
const REAPED_HISTORY: usize = 64;

#[derive(Debug, Clone)]
pub struct CallManagerOptions {
    pub international_prefix: String,
    /// Caller number used for phone calls when the caller passes none.
    pub phone_number: String,
    pub fax_number: String,
    pub recorder_path: PathBuf,
    pub hangup_timeout: Duration,
    pub frame_samples: usize,
    pub frame_interval: Duration,
}

impl Default for CallManagerOptions {
    fn default() -> Self {
        Self {
            international_prefix: "00".to_string(),
            phone_number: String::new(),
            fax_number: String::new(),
            recorder_path: PathBuf::from("./recordings"),
            hangup_timeout: Duration::from_millis(3000),
            frame_samples: crate::media::codecs::LINE_FRAME_SAMPLES,
            frame_interval: Duration::from_millis(20),
        }
    }
}

type LineKey = (String, BackendToken);

#[derive(Default)]
struct ConnectionTable {
    by_id: HashMap<String, ConnectionHandle>,
    by_key: HashMap<LineKey, String>,
    reaped: VecDeque<LineKey>,
    /// Originate calls in flight, per backend name.
    originating: HashMap<String, usize>,
    /// Events for tokens an in-flight originate has not returned yet.
    early: HashMap<LineKey, Vec<LineEventKind>>,
}

impl ConnectionTable {
    fn lookup(&self, key: &LineKey) -> Option<&ConnectionHandle> {
        self.by_key.get(key).and_then(|id| self.by_id.get(id))
    }

    fn insert(&mut self, handle: ConnectionHandle) {
        let key = (handle.backend_name().to_string(), handle.token());
        self.by_key.insert(key, handle.id().to_string());
        self.by_id.insert(handle.id().to_string(), handle);
    }

    fn remove(&mut self, id: &str) -> Option<ConnectionHandle> {
        let handle = self.by_id.remove(id)?;
        let key = (handle.backend_name().to_string(), handle.token());
        self.by_key.remove(&key);
        if self.reaped.len() >= REAPED_HISTORY {
            self.reaped.pop_front();
        }
        self.reaped.push_back(key);
        Some(handle)
    }

    fn is_originating(&self, backend: &str) -> bool {
        self.originating.get(backend).copied().unwrap_or(0) > 0
    }

    fn begin_originate(&mut self, backend: &str) {
        *self.originating.entry(backend.to_string()).or_insert(0) += 1;
    }

    /// Returns the early events nobody claimed once the backend has no
    /// originate left in flight.
    fn end_originate(&mut self, backend: &str) -> Vec<(LineKey, Vec<LineEventKind>)> {
        let remaining = match self.originating.get_mut(backend) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining > 0 {
            return Vec::new();
        }
        self.originating.remove(backend);
        let keys: Vec<LineKey> = self
            .early
            .keys()
            .filter(|(name, _)| name == backend)
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|key| self.early.remove(&key).map(|events| (key, events)))
            .collect()
    }
}

pub struct CallManagerBuilder {
    pub options: CallManagerOptions,
    pub registry: Option<Arc<DeviceRegistry>>,
    pub backends: Vec<Arc<dyn DeviceBackend>>,
    pub ringer: Option<Arc<dyn Ringer>>,
    pub audio: Option<Arc<dyn AudioDevice>>,
    pub cancel_token: Option<CancellationToken>,
    pub online: bool,
}

impl CallManagerBuilder {
    pub fn new() -> Self {
        Self {
            options: CallManagerOptions::default(),
            registry: None,
            backends: Vec::new(),
            ringer: None,
            audio: None,
            cancel_token: None,
            online: true,
        }
    }

    pub fn with_options(mut self, options: CallManagerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_registry(mut self, registry: Arc<DeviceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn DeviceBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn with_ringer(mut self, ringer: Arc<dyn Ringer>) -> Self {
        self.ringer = Some(ringer);
        self
    }

    pub fn with_audio_device(mut self, audio: Arc<dyn AudioDevice>) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    pub fn with_online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    pub fn build(self) -> Result<CallManager> {
        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let manager = CallManager {
            options: self.options,
            registry: self
                .registry
                .unwrap_or_else(|| Arc::new(DeviceRegistry::new())),
            table: Mutex::new(ConnectionTable::default()),
            line_tx,
            line_rx: Mutex::new(Some(line_rx)),
            finished_tx,
            finished_rx: Mutex::new(Some(finished_rx)),
            events,
            ringer: self.ringer.unwrap_or_else(|| Arc::new(LogRinger)),
            audio: self.audio.unwrap_or_else(|| Arc::new(NullAudio)),
            connectivity: Connectivity::new(self.online),
            token: self.cancel_token.unwrap_or_else(CancellationToken::new),
        };
        for backend in self.backends {
            manager.register_backend(backend)?;
        }
        Ok(manager)
    }
}

/// Owns every live connection and routes backend events to them.
pub struct CallManager {
    options: CallManagerOptions,
    registry: Arc<DeviceRegistry>,
    table: Mutex<ConnectionTable>,
    line_tx: LineEventSender,
    line_rx: Mutex<Option<LineEventReceiver>>,
    finished_tx: mpsc::UnboundedSender<String>,
    finished_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    events: CallEventSender,
    ringer: Arc<dyn Ringer>,
    audio: Arc<dyn AudioDevice>,
    connectivity: Connectivity,
    token: CancellationToken,
}

impl CallManager {
    pub fn options(&self) -> &CallManagerOptions {
        &self.options
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn subscribe(&self) -> CallEventReceiver {
        self.events.subscribe()
    }

    /// Makes the backend resolvable and hands it the event sender.
    pub fn register_backend(&self, backend: Arc<dyn DeviceBackend>) -> Result<()> {
        self.registry.register(backend.clone())?;
        backend.attach(self.line_tx.clone());
        Ok(())
    }

    pub async fn dial(
        &self,
        kind: DeviceKind,
        target: &str,
        source: &str,
        suppress_caller_id: bool,
    ) -> Result<ConnectionHandle, DialError> {
        self.originate(kind, target, source, suppress_caller_id, None)
            .await
    }

    /// Dials a fax connection that transmits `file`.
    pub async fn send_fax(
        &self,
        file: &Path,
        target: &str,
        source: &str,
        suppress_caller_id: bool,
    ) -> Result<ConnectionHandle, DialError> {
        self.originate(
            DeviceKind::Fax,
            target,
            source,
            suppress_caller_id,
            Some(file.to_path_buf()),
        )
        .await
    }

    async fn originate(
        &self,
        kind: DeviceKind,
        target: &str,
        source: &str,
        suppress_caller_id: bool,
        fax_file: Option<PathBuf>,
    ) -> Result<ConnectionHandle, DialError> {
        let dialed = canonize_number(target, &self.options.international_prefix);
        if dialed.is_empty() {
            return Err(DialError::InvalidNumber(target.to_string()));
        }
        let target = dialed;
        let source = match canonize_number(source, &self.options.international_prefix) {
            source if source.is_empty() => self.default_number(kind).to_string(),
            source => source,
        };

        let backend = self
            .registry
            .resolve(&target, kind)
            .ok_or(DialError::NoCapableDevice)?;
        if backend.requires_network() && !self.connectivity.is_online() {
            info!(
                "dial {} via {} refused: offline",
                scramble_number(&target),
                backend.name()
            );
            return Err(DialError::NoConnectivity);
        }

        let request = OriginateRequest {
            kind,
            target: target.clone(),
            source: source.clone(),
            suppress_caller_id,
            fax_file: fax_file.clone(),
        };
        // events for the new token arriving before originate returns are
        // parked in `early` and replayed once the connection exists
        self.table.lock().await.begin_originate(backend.name());
        let result = backend.originate(&request).await;
        let mut table = self.table.lock().await;
        let early = match &result {
            Ok(line) => table
                .early
                .remove(&(backend.name().to_string(), line.token))
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        let unclaimed = table.end_originate(backend.name());
        let line = match result {
            Ok(line) => line,
            Err(e) => {
                drop(table);
                warn!(
                    "dial {} via {} failed: {}",
                    scramble_number(&target),
                    backend.name(),
                    e
                );
                self.report_unclaimed(unclaimed);
                return Err(DialError::from(e));
            }
        };
        let handle = spawn_connection(
            ConnectionSetup {
                id: uuid::Uuid::new_v4().to_string(),
                direction: Direction::Outgoing,
                kind,
                local: source,
                remote: target,
                channel: line.channel,
                token: line.token,
                backend,
                fax_file,
            },
            self.runtime(),
        );
        for event in early {
            handle.deliver(event);
        }
        table.insert(handle.clone());
        drop(table);
        self.report_unclaimed(unclaimed);
        Ok(handle)
    }

    fn report_unclaimed(&self, unclaimed: Vec<(LineKey, Vec<LineEventKind>)>) {
        for ((backend, token), events) in unclaimed {
            for event in events {
                warn!("{}: {} for unknown line {}", backend, event.name(), token);
                self.events
                    .send(CallEvent::ProtocolViolation {
                        backend: backend.clone(),
                        token: token.0,
                        line_event: event.name().to_string(),
                    })
                    .ok();
            }
        }
    }

    pub async fn pickup(&self, handle: &ConnectionHandle) -> Result<(), PickupError> {
        handle.request(ConnectionCommand::Pickup).await
    }

    /// Ends the connection from the local side. Never fails, and does
    /// nothing on a connection that already ended.
    pub async fn hangup(&self, handle: &ConnectionHandle) {
        handle.hangup().await;
    }

    pub fn status(&self, handle: &ConnectionHandle) -> super::ConnectionStatus {
        handle.status()
    }

    pub async fn mute(&self, handle: &ConnectionHandle, mute: bool) -> Result<(), ControlError> {
        handle
            .request(|reply| ConnectionCommand::Mute(mute, reply))
            .await
    }

    pub async fn hold(&self, handle: &ConnectionHandle, hold: bool) -> Result<(), ControlError> {
        handle
            .request(|reply| ConnectionCommand::Hold(hold, reply))
            .await
    }

    pub async fn send_dtmf(
        &self,
        handle: &ConnectionHandle,
        digit: char,
    ) -> Result<(), ControlError> {
        if !matches!(digit, '0'..='9' | '*' | '#' | 'A'..='D') {
            return Err(ControlError::InvalidDigit(digit));
        }
        handle
            .request(|reply| ConnectionCommand::Dtmf(digit, reply))
            .await
    }

    /// Starts or stops the WAV recording of an active voice connection.
    /// Recordings land in `recorder_path/<id>.wav`.
    pub async fn record(&self, handle: &ConnectionHandle, enable: bool) -> Result<(), ControlError> {
        let path = if enable {
            tokio::fs::create_dir_all(&self.options.recorder_path)
                .await
                .map_err(|e| ControlError::Recording(e.to_string()))?;
            Some(
                self.options
                    .recorder_path
                    .join(format!("{}.wav", handle.id())),
            )
        } else {
            None
        };
        handle
            .request(|reply| ConnectionCommand::Record(path, reply))
            .await
    }

    pub async fn backend_status(
        &self,
        handle: &ConnectionHandle,
    ) -> Result<BackendStatus, ControlError> {
        handle.backend_status().await
    }

    pub async fn get(&self, id: &str) -> Result<ConnectionHandle, ControlError> {
        self.table
            .lock()
            .await
            .by_id
            .get(id)
            .cloned()
            .ok_or(ControlError::UnknownConnection)
    }

    /// Live connections, oldest first.
    pub async fn connections(&self) -> Vec<ConnectionHandle> {
        let mut handles: Vec<_> = self.table.lock().await.by_id.values().cloned().collect();
        handles.sort_by_key(|h| h.status().created_at);
        handles
    }

    pub async fn find_by_remote_number(&self, number: &str) -> Option<ConnectionHandle> {
        let number = canonize_number(number, &self.options.international_prefix);
        self.connections()
            .await
            .into_iter()
            .find(|h| h.status().remote_number == number)
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Feeds the network monitor's verdict. Going online asks every backend
    /// to re-establish its link.
    pub async fn set_online(&self, online: bool) {
        if !self.connectivity.set_online(online) {
            return;
        }
        info!("connectivity changed: online={}", online);
        self.events.send(CallEvent::Connectivity { online }).ok();
        if online {
            if let Err(e) = self.reconnect().await {
                warn!("reconnect after going online failed: {}", e);
            }
        }
    }

    /// Reconnects every backend; the last failure, if any, is returned.
    pub async fn reconnect(&self) -> Result<(), BackendError> {
        let mut result = Ok(());
        for backend in self.registry.snapshot() {
            if let Err(e) = backend.reconnect().await {
                warn!("backend {}: reconnect failed: {}", backend.name(), e);
                result = Err(e);
            }
        }
        result
    }

    /// Routes backend events until the cancel token fires, then hangs up
    /// whatever is still live.
    pub async fn serve(&self) -> Result<()> {
        let mut line_rx = self
            .line_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("call manager is already serving"))?;
        let mut finished_rx = self
            .finished_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("call manager is already serving"))?;

        info!("call manager serving {} backends", self.registry.len());
        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                event = line_rx.recv() => match event {
                    Some(event) => self.dispatch(event).await,
                    None => break,
                },
                id = finished_rx.recv() => match id {
                    Some(id) => self.reap(&id).await,
                    None => break,
                },
            }
        }

        let live = self.connections().await;
        info!("call manager stopping, hanging up {} connections", live.len());
        let mut pending: HashSet<String> = live.iter().map(|h| h.id().to_string()).collect();
        // keep routing line events so teardown confirmations still arrive
        let hangups = async {
            for handle in &live {
                self.hangup(handle).await;
            }
        };
        tokio::pin!(hangups);
        let mut hung_up = false;
        while !hung_up || !pending.is_empty() {
            tokio::select! {
                _ = &mut hangups, if !hung_up => hung_up = true,
                event = line_rx.recv() => match event {
                    Some(event) => self.dispatch_on_shutdown(event).await,
                    None => break,
                },
                id = finished_rx.recv() => match id {
                    Some(id) => {
                        pending.remove(&id);
                        self.reap(&id).await;
                    }
                    None => break,
                },
            }
        }
        info!("call manager stopped");
        Ok(())
    }

    async fn dispatch_on_shutdown(&self, event: LineEvent) {
        if !matches!(event.kind, LineEventKind::Incoming { .. }) {
            self.dispatch(event).await;
            return;
        }
        debug!("{}: rejecting incoming line {} on shutdown", event.backend, event.token);
        if let Some(backend) = self.registry.get(&event.backend) {
            if let Err(e) = backend.terminate(event.token).await {
                warn!("{}: reject failed: {}", event.backend, e);
            }
        }
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    async fn reap(&self, id: &str) {
        if let Some(handle) = self.table.lock().await.remove(id) {
            debug!(
                "connection {} removed in state {}",
                id,
                handle.state()
            );
        }
    }

    async fn dispatch(&self, event: LineEvent) {
        let LineEvent {
            backend,
            token,
            kind,
        } = event;
        let kind = match kind {
            LineEventKind::Incoming {
                remote,
                local,
                channel,
            } => {
                self.incoming(backend, token, remote, local, channel).await;
                return;
            }
            kind => kind,
        };

        let key = (backend, token);
        let mut table = self.table.lock().await;
        if let Some(handle) = table.lookup(&key) {
            if !handle.deliver(kind) {
                debug!("connection {} already finished", handle.id());
            }
            return;
        }
        if table.reaped.contains(&key) {
            debug!(
                "{}: late {} for finished line {}",
                key.0,
                kind.name(),
                key.1
            );
            return;
        }
        if table.is_originating(&key.0) {
            debug!("{}: parking {} for line {}", key.0, kind.name(), key.1);
            table.early.entry(key).or_default().push(kind);
            return;
        }

        let (backend, token) = key;
        warn!("{}: {} for unknown line {}", backend, kind.name(), token);
        let owner = table
            .by_id
            .values()
            .find(|h| h.token() == token && h.backend_name() != backend)
            .cloned();
        drop(table);
        if let Some(owner) = owner {
            owner.violation(format!(
                "{} sent {} for a line owned by {}",
                backend,
                kind.name(),
                owner.backend_name()
            ));
        }
        self.events
            .send(CallEvent::ProtocolViolation {
                backend,
                token: token.0,
                line_event: kind.name().to_string(),
            })
            .ok();
    }

    async fn incoming(
        &self,
        backend_name: String,
        token: BackendToken,
        remote: String,
        local: String,
        channel: u32,
    ) {
        let backend = match self.registry.get(&backend_name) {
            Some(backend) => backend,
            None => {
                warn!("incoming call from unregistered backend {}", backend_name);
                self.events
                    .send(CallEvent::ProtocolViolation {
                        backend: backend_name,
                        token: token.0,
                        line_event: "incoming".to_string(),
                    })
                    .ok();
                return;
            }
        };

        let mut table = self.table.lock().await;
        let key = (backend_name, token);
        if let Some(existing) = table.lookup(&key) {
            existing.violation(format!("second incoming call on line {}", token));
            return;
        }

        let kind = backend.kind();
        let remote = canonize_number(&remote, &self.options.international_prefix);
        let local = match canonize_number(&local, &self.options.international_prefix) {
            local if local.is_empty() => self.default_number(kind).to_string(),
            local => local,
        };
        let handle = spawn_connection(
            ConnectionSetup {
                id: uuid::Uuid::new_v4().to_string(),
                direction: Direction::Incoming,
                kind,
                local: local.clone(),
                remote: remote.clone(),
                channel,
                token,
                backend,
                fax_file: None,
            },
            self.runtime(),
        );
        table.insert(handle.clone());
        drop(table);

        self.events
            .send(CallEvent::Incoming {
                id: handle.id().to_string(),
                kind,
                remote,
                local,
                timestamp: get_timestamp(),
            })
            .ok();
    }

    fn default_number(&self, kind: DeviceKind) -> &str {
        match kind {
            DeviceKind::Phone => &self.options.phone_number,
            DeviceKind::Fax => &self.options.fax_number,
        }
    }

    fn runtime(&self) -> ConnectionRuntime {
        ConnectionRuntime {
            audio: self.audio.clone(),
            ringer: self.ringer.clone(),
            events: self.events.clone(),
            finished: self.finished_tx.clone(),
            options: ConnectionOptions {
                hangup_timeout: self.options.hangup_timeout,
                frame_samples: self.options.frame_samples,
                frame_interval: self.options.frame_interval,
            },
        }
    }
}
