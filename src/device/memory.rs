use super::{
    pattern::parse_patterns, BackendStatus, BackendToken, DeviceBackend, DeviceKind, LineChannel,
    LineEvent, LineEventKind, LineEventSender, NumberPattern, OriginateRequest,
};
use crate::{call::fax::FaxProgress, error::BackendError, utils::scramble_number};
use anyhow::Result;
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Mutex,
    },
};
use tracing::{debug, info, warn};

const DEFAULT_CHANNELS: usize = 2;

#[derive(Debug, Clone)]
struct MemoryLine {
    channel: u32,
    remote: String,
    local: String,
    answered: bool,
    held: bool,
    transmitted: usize,
    dtmf: String,
}

/// Line backend without hardware.
///
/// Keeps per-token line records and lets the caller play the remote side
/// (`ring`, `remote_answer`, `remote_hangup`, ...). Used by the binary's demo
/// mode and by the tests as the stand-in for a CAPI controller.
pub struct MemoryBackend {
    name: String,
    kind: DeviceKind,
    patterns: Vec<NumberPattern>,
    channels: usize,
    auto_answer: bool,
    requires_network: bool,
    confirm_teardown: AtomicBool,
    next_token: AtomicU64,
    lines: Mutex<HashMap<BackendToken, MemoryLine>>,
    events: Mutex<Option<LineEventSender>>,
}

impl MemoryBackend {
    pub fn new(name: &str, kind: DeviceKind, patterns: Vec<NumberPattern>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            patterns,
            channels: DEFAULT_CHANNELS,
            auto_answer: false,
            requires_network: false,
            confirm_teardown: AtomicBool::new(true),
            next_token: AtomicU64::new(1),
            lines: Mutex::new(HashMap::new()),
            events: Mutex::new(None),
        }
    }

    pub fn with_patterns<S: AsRef<str>>(name: &str, kind: DeviceKind, numbers: &[S]) -> Result<Self> {
        Ok(Self::new(name, kind, parse_patterns(numbers)?))
    }

    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels;
        self
    }

    /// Remote side answers and brings the B-channel up right after dialing.
    pub fn with_auto_answer(mut self, auto_answer: bool) -> Self {
        self.auto_answer = auto_answer;
        self
    }

    pub fn with_requires_network(mut self, requires_network: bool) -> Self {
        self.requires_network = requires_network;
        self
    }

    /// When disabled, `terminate` never confirms, as a stuck driver would.
    pub fn set_confirm_teardown(&self, confirm: bool) {
        self.confirm_teardown.store(confirm, Ordering::SeqCst);
    }

    fn lines(&self) -> std::sync::MutexGuard<'_, HashMap<BackendToken, MemoryLine>> {
        match self.lines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn emit(&self, token: BackendToken, kind: LineEventKind) -> bool {
        let sender = match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        match sender {
            Some(sender) => sender
                .send(LineEvent {
                    backend: self.name.clone(),
                    token,
                    kind,
                })
                .is_ok(),
            None => {
                warn!("{}: not attached, dropping {}", self.name, kind.name());
                false
            }
        }
    }

    fn allocate(&self, remote: &str, local: &str) -> Result<LineChannel, BackendError> {
        let mut lines = self.lines();
        if lines.len() >= self.channels {
            return Err(BackendError::ChannelsBusy);
        }
        let channel = (1..=self.channels as u32)
            .find(|c| !lines.values().any(|line| line.channel == *c))
            .ok_or(BackendError::ChannelsBusy)?;
        let token = BackendToken(self.next_token.fetch_add(1, Ordering::SeqCst));
        lines.insert(
            token,
            MemoryLine {
                channel,
                remote: remote.to_string(),
                local: local.to_string(),
                answered: false,
                held: false,
                transmitted: 0,
                dtmf: String::new(),
            },
        );
        Ok(LineChannel { token, channel })
    }

    /// Simulates an incoming call from `remote` to `local`.
    pub fn ring(&self, remote: &str, local: &str) -> Result<BackendToken, BackendError> {
        let line = self.allocate(remote, local)?;
        info!(
            "{}: incoming call {} -> {} on channel {}",
            self.name,
            scramble_number(remote),
            scramble_number(local),
            line.channel
        );
        self.emit(
            line.token,
            LineEventKind::Incoming {
                remote: remote.to_string(),
                local: local.to_string(),
                channel: line.channel,
            },
        );
        Ok(line.token)
    }

    pub fn remote_answer(&self, token: BackendToken) -> bool {
        if let Some(line) = self.lines().get_mut(&token) {
            line.answered = true;
        }
        self.emit(token, LineEventKind::RemoteAnswered)
    }

    pub fn line_up(&self, token: BackendToken) -> bool {
        self.emit(token, LineEventKind::LineUp)
    }

    pub fn remote_hangup(&self, token: BackendToken) -> bool {
        self.lines().remove(&token);
        self.emit(token, LineEventKind::RemoteHungUp)
    }

    pub fn fault(&self, token: BackendToken, code: u16, reason: &str) -> bool {
        self.lines().remove(&token);
        self.emit(
            token,
            LineEventKind::Fault {
                code,
                reason: reason.to_string(),
            },
        )
    }

    pub fn deliver(&self, token: BackendToken, data: &[u8]) -> bool {
        self.emit(token, LineEventKind::Data(data.to_vec()))
    }

    pub fn receive_dtmf(&self, token: BackendToken, digit: char) -> bool {
        self.emit(token, LineEventKind::Dtmf(digit))
    }

    pub fn fax_progress(&self, token: BackendToken, progress: FaxProgress) -> bool {
        self.emit(token, LineEventKind::FaxProgress(progress))
    }

    /// Sends an arbitrary event, including ones for tokens this backend never
    /// issued.
    pub fn inject(&self, token: BackendToken, kind: LineEventKind) -> bool {
        self.emit(token, kind)
    }

    pub fn active_lines(&self) -> usize {
        self.lines().len()
    }

    pub fn transmitted_bytes(&self, token: BackendToken) -> usize {
        self.lines().get(&token).map(|l| l.transmitted).unwrap_or(0)
    }

    pub fn sent_dtmf(&self, token: BackendToken) -> String {
        self.lines()
            .get(&token)
            .map(|l| l.dtmf.clone())
            .unwrap_or_default()
    }

    pub fn remote_of(&self, token: BackendToken) -> Option<String> {
        self.lines().get(&token).map(|l| l.remote.clone())
    }
}

#[async_trait]
impl DeviceBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn handles(&self, number: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(number))
    }

    fn attach(&self, events: LineEventSender) {
        match self.events.lock() {
            Ok(mut slot) => *slot = Some(events),
            Err(poisoned) => *poisoned.into_inner() = Some(events),
        }
    }

    fn requires_network(&self) -> bool {
        self.requires_network
    }

    async fn originate(&self, request: &OriginateRequest) -> Result<LineChannel, BackendError> {
        let line = self.allocate(&request.target, &request.source)?;
        debug!(
            "{}: originate {} -> {} channel {} token {} anonymous {}",
            self.name,
            scramble_number(&request.source),
            scramble_number(&request.target),
            line.channel,
            line.token,
            request.suppress_caller_id
        );
        if self.auto_answer {
            self.remote_answer(line.token);
            self.line_up(line.token);
        }
        Ok(line)
    }

    async fn answer(&self, token: BackendToken) -> Result<(), BackendError> {
        {
            let mut lines = self.lines();
            let line = lines
                .get_mut(&token)
                .ok_or(BackendError::UnknownToken(token.0))?;
            line.answered = true;
        }
        self.line_up(token);
        Ok(())
    }

    async fn terminate(&self, token: BackendToken) -> Result<(), BackendError> {
        let removed = self.lines().remove(&token);
        if removed.is_none() {
            return Err(BackendError::UnknownToken(token.0));
        }
        if self.confirm_teardown.load(Ordering::SeqCst) {
            self.emit(token, LineEventKind::DisconnectConfirmed);
        }
        Ok(())
    }

    async fn get_status(&self, token: BackendToken) -> Result<BackendStatus, BackendError> {
        let lines = self.lines();
        let line = lines
            .get(&token)
            .ok_or(BackendError::UnknownToken(token.0))?;
        Ok(BackendStatus {
            channel: Some(line.channel),
            connected: line.answered,
            held: line.held,
            detail: Some(format!("{} <-> {}", line.local, line.remote)),
        })
    }

    async fn transmit(&self, token: BackendToken, data: &[u8]) -> Result<(), BackendError> {
        let mut lines = self.lines();
        let line = lines
            .get_mut(&token)
            .ok_or(BackendError::UnknownToken(token.0))?;
        line.transmitted += data.len();
        Ok(())
    }

    async fn hold(&self, token: BackendToken, hold: bool) -> Result<(), BackendError> {
        let mut lines = self.lines();
        let line = lines
            .get_mut(&token)
            .ok_or(BackendError::UnknownToken(token.0))?;
        line.held = hold;
        Ok(())
    }

    async fn send_dtmf(&self, token: BackendToken, digit: char) -> Result<(), BackendError> {
        let mut lines = self.lines();
        let line = lines
            .get_mut(&token)
            .ok_or(BackendError::UnknownToken(token.0))?;
        line.dtmf.push(digit);
        Ok(())
    }
}
