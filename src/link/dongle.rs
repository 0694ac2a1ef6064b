//! Dongle link engine
//!
//! Drives one adapter through `initialise -> start -> close`. A single read
//! loop task pulls frames off the bulk IN endpoint and dispatches them in
//! order. Sends are serialized by an async lock. `start` and `close` are
//! coalesced: concurrent callers share one in-flight future.

use bytes::Bytes;
use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant, MissedTickBehavior};

use crate::config::{CaptureConfig, DongleConfig, MicSource, WifiBand};
use crate::error::{LinkError, ProtocolError, TransportError};
use crate::link::capture::{capture_sink, CaptureSink, Direction, NullCapture};
use crate::link::device::{EndpointDirection, TransferStatus, UsbDevice};
use crate::link::session::{DongleInfo, InfoCache, LinkSession, LinkState};
use crate::link::LinkHandler;
use crate::protocol::{
    decode_header, decode_message, encode_message, BoxSettings, Command, DecodedMessage, OpenSettings,
    OutboundMessage, HEADER_SIZE,
};

/// Consecutive read errors tolerated before the link closes itself
pub const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Upper bound on a single inbound payload
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

const READ_LOOP_STOP_TIMEOUT: Duration = Duration::from_millis(1500);
const READ_LOOP_POLL_INTERVAL: Duration = Duration::from_millis(10);
const RESET_SETTLE: Duration = Duration::from_millis(100);

/// How a `close()` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    /// Nothing was open
    AlreadyClosed,
    /// The device refused to close and its handle was kept alive
    Retained,
}

type PendingStart = Shared<BoxFuture<'static, ()>>;
type PendingClose = Shared<BoxFuture<'static, CloseOutcome>>;

#[derive(Default)]
struct Timers {
    heartbeat: Option<JoinHandle<()>>,
    wifi_pair: Option<JoinHandle<()>>,
}

impl Timers {
    fn cancel(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
        if let Some(handle) = self.wifi_pair.take() {
            handle.abort();
        }
    }
}

struct Inner {
    handler: Arc<dyn LinkHandler>,
    capture: Arc<dyn CaptureSink>,
    state: Mutex<LinkState>,
    session: Mutex<Option<LinkSession>>,
    closing: AtomicBool,
    /// Bumped on every close so stale read loops exit
    generation: AtomicU64,
    error_count: AtomicU32,
    info: Mutex<InfoCache>,
    timers: Mutex<Timers>,
    read_loop: Mutex<Option<JoinHandle<()>>>,
    send_lock: tokio::sync::Mutex<()>,
    pending_start: Mutex<Option<PendingStart>>,
    pending_close: Mutex<Option<PendingClose>>,
    /// Handles whose close failed twice; never dropped
    retained: Mutex<Vec<Arc<dyn UsbDevice>>>,
}

/// Connection to one USB adapter
#[derive(Clone)]
pub struct DongleLink {
    inner: Arc<Inner>,
}

impl DongleLink {
    pub fn new(handler: Arc<dyn LinkHandler>, capture: Arc<dyn CaptureSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                handler,
                capture,
                state: Mutex::new(LinkState::Uninitialised),
                session: Mutex::new(None),
                closing: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                error_count: AtomicU32::new(0),
                info: Mutex::new(InfoCache::default()),
                timers: Mutex::new(Timers::default()),
                read_loop: Mutex::new(None),
                send_lock: tokio::sync::Mutex::new(()),
                pending_start: Mutex::new(None),
                pending_close: Mutex::new(None),
                retained: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn with_handler(handler: Arc<dyn LinkHandler>) -> Self {
        Self::new(handler, Arc::new(NullCapture))
    }

    /// Link whose frames are captured as `config` describes
    pub fn with_capture_config(handler: Arc<dyn LinkHandler>, config: &CaptureConfig) -> crate::Result<Self> {
        Ok(Self::new(handler, capture_sink(config)?))
    }

    pub fn state(&self) -> LinkState {
        *self.inner.state.lock()
    }

    pub fn dongle_info(&self) -> DongleInfo {
        self.inner.info.lock().info.clone()
    }

    /// Number of device handles kept alive after a failed close
    pub fn retained_count(&self) -> usize {
        self.inner.retained.lock().len()
    }

    /// Claim the first interface of an already opened device
    ///
    /// A no-op when a session already exists. On failure the link is
    /// fully closed before the error is returned.
    pub async fn initialise(&self, device: Arc<dyn UsbDevice>) -> Result<(), LinkError> {
        let state = self.state();
        if state == LinkState::Closing {
            return Err(LinkError::InvalidState {
                operation: "initialise",
                state: state.name(),
            });
        }
        {
            let mut session = self.inner.session.lock();
            if session.is_some() {
                tracing::debug!("initialise: already {}", state);
                return Ok(());
            }
            *session = Some(LinkSession::new(device.clone()));
        }

        match self.inner.claim(&device).await {
            Ok(()) => {
                *self.inner.state.lock() = LinkState::Initialised;
                tracing::info!("Dongle link initialised: {:?}", self.inner.session.lock());
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Dongle initialise failed: {}", e);
                self.close().await;
                Err(e)
            }
        }
    }

    /// Start the read loop and send the configuration sequence
    ///
    /// Returns once the whole sequence was sent or the link began closing.
    pub async fn start(&self, config: &DongleConfig) {
        let pending = {
            let mut slot = self.inner.pending_start.lock();
            match slot.as_ref() {
                Some(pending) => pending.clone(),
                None => {
                    let inner = self.inner.clone();
                    let config = config.clone();
                    let fut = async move {
                        inner.run_start(config).await;
                        inner.pending_start.lock().take();
                    }
                    .boxed()
                    .shared();
                    *slot = Some(fut.clone());
                    fut
                }
            }
        };
        pending.await
    }

    /// Encode and write one message; `true` only on a completed transfer
    pub async fn send(&self, message: &OutboundMessage) -> bool {
        self.inner.send(message).await
    }

    /// Tear down the session. Never fails; concurrent calls share one teardown.
    pub async fn close(&self) -> CloseOutcome {
        self.inner.close().await
    }
}

impl Inner {
    fn endpoint(&self, direction: EndpointDirection) -> Option<(Arc<dyn UsbDevice>, u8)> {
        let session = self.session.lock();
        let session = session.as_ref()?;
        let endpoint = match direction {
            EndpointDirection::In => session.endpoint_in?,
            EndpointDirection::Out => session.endpoint_out?,
        };
        Some((session.device.clone(), endpoint))
    }

    fn update_session(&self, update: impl FnOnce(&mut LinkSession)) {
        if let Some(session) = self.session.lock().as_mut() {
            update(session);
        }
    }

    async fn claim(&self, device: &Arc<dyn UsbDevice>) -> Result<(), LinkError> {
        if !device.is_opened() {
            return Err(LinkError::DeviceNotReady);
        }

        let configuration = device
            .configurations()
            .into_iter()
            .next()
            .ok_or(LinkError::NoEndpoints)?;
        if device.active_configuration() != Some(configuration.value) {
            device.select_configuration(configuration.value).await?;
        }

        let interface = configuration.interfaces.first().ok_or(LinkError::NoEndpoints)?;
        device.claim_interface(interface.number).await?;
        self.update_session(|s| s.interface = Some(interface.number));

        let (Some(endpoint_in), Some(endpoint_out)) = (interface.bulk_in(), interface.bulk_out()) else {
            return Err(LinkError::NoEndpoints);
        };
        self.update_session(|s| {
            s.endpoint_in = Some(endpoint_in);
            s.endpoint_out = Some(endpoint_out);
        });
        Ok(())
    }

    fn is_current(&self, generation: u64) -> bool {
        !self.closing.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    async fn run_start(self: &Arc<Self>, config: DongleConfig) {
        {
            let mut state = self.state.lock();
            match *state {
                LinkState::Initialised => {}
                LinkState::Running => {
                    tracing::debug!("start: already running");
                    return;
                }
                other => {
                    tracing::warn!("start ignored in state {}", other);
                    return;
                }
            }
            let opened = self.session.lock().as_ref().map_or(false, |s| s.device.is_opened());
            if !opened {
                tracing::warn!("start ignored: device not opened");
                return;
            }
            *state = LinkState::Running;
        }
        let generation = self.generation.load(Ordering::SeqCst);
        self.spawn_read_loop(generation);

        let icon = match &config.icon_path {
            Some(path) => match tokio::fs::read(path).await {
                Ok(data) => Some(Bytes::from(data)),
                Err(e) => {
                    tracing::warn!("Icon {} not uploaded: {}", path.display(), e);
                    None
                }
            },
            None => None,
        };

        let sequence = start_sequence(&config, Utc::now().timestamp(), icon);
        for (index, message) in sequence.iter().enumerate() {
            if index > 0 {
                sleep(config.message_delay()).await;
            }
            if !self.is_current(generation) {
                tracing::debug!("Start sequence aborted at {}", message.name());
                return;
            }
            if !self.send(message).await {
                tracing::warn!("Start message {} was not sent", message.name());
            }
        }

        if self.is_current(generation) {
            self.schedule_timers(&config);
            tracing::info!("Dongle link running");
        }
    }

    fn schedule_timers(self: &Arc<Self>, config: &DongleConfig) {
        let period = config.heartbeat_interval().max(Duration::from_millis(1));
        let weak = Arc::downgrade(self);
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                if !inner.send(&OutboundMessage::HeartBeat).await {
                    tracing::trace!("Heartbeat not sent");
                }
            }
        });

        let delay = config.wifi_pair_delay();
        let weak = Arc::downgrade(self);
        let wifi_pair = tokio::spawn(async move {
            sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.send(&OutboundMessage::Command(Command::WifiPair)).await;
            }
        });

        let mut timers = self.timers.lock();
        timers.cancel();
        timers.heartbeat = Some(heartbeat);
        timers.wifi_pair = Some(wifi_pair);
    }

    async fn send(&self, message: &OutboundMessage) -> bool {
        if self.closing.load(Ordering::SeqCst) {
            tracing::debug!("{} dropped: link closing", message.name());
            return false;
        }
        let Some((device, endpoint)) = self.endpoint(EndpointDirection::Out) else {
            tracing::debug!("{} dropped: no OUT endpoint", message.name());
            return false;
        };
        if !device.is_opened() {
            return false;
        }

        let frame = encode_message(message);
        let _guard = self.send_lock.lock().await;
        if self.closing.load(Ordering::SeqCst) {
            return false;
        }
        self.capture
            .record(Direction::Outbound, &frame.header, &frame.payload, Utc::now());
        tracing::trace!("send {} ({} bytes)", message.name(), frame.bytes.len());

        match device.transfer_out(endpoint, frame.bytes).await {
            Ok(TransferStatus::Ok) => true,
            Ok(status) => {
                tracing::warn!("{} transfer completed with {:?}", message.name(), status);
                false
            }
            Err(e) if e.is_benign_disconnect() => {
                tracing::debug!("{} not sent: {}", message.name(), e);
                false
            }
            Err(e) => {
                tracing::warn!("{} not sent: {}", message.name(), e);
                false
            }
        }
    }

    fn spawn_read_loop(self: &Arc<Self>, generation: u64) {
        let mut slot = self.read_loop.lock();
        if slot.as_ref().map_or(false, |handle| !handle.is_finished()) {
            return;
        }
        *slot = Some(tokio::spawn(self.clone().read_loop(generation)));
    }

    async fn read_loop(self: Arc<Self>, generation: u64) {
        tracing::debug!("Read loop started (generation {})", generation);
        while self.is_current(generation) {
            let Some((device, endpoint)) = self.endpoint(EndpointDirection::In) else {
                break;
            };

            match self.read_frame(device.as_ref(), endpoint).await {
                Ok(message) => {
                    self.error_count.store(0, Ordering::SeqCst);
                    self.dispatch(message);
                }
                Err(crate::Error::Transport(e)) if e.is_benign_disconnect() => {
                    tracing::debug!("Read loop ended: {}", e);
                    break;
                }
                Err(e) => {
                    if !self.is_current(generation) {
                        break;
                    }
                    let count = self.error_count.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::warn!("Read error {}/{}: {}", count, MAX_CONSECUTIVE_ERRORS, e);
                    if count >= MAX_CONSECUTIVE_ERRORS {
                        tracing::error!("Too many consecutive read errors, closing dongle link");
                        // Detach so close() does not wait on this task
                        self.read_loop.lock().take();
                        self.close().await;
                        self.handler.on_failure();
                        return;
                    }
                }
            }
        }
        tracing::debug!("Read loop stopped (generation {})", generation);
    }

    async fn read_frame(&self, device: &dyn UsbDevice, endpoint: u8) -> crate::Result<DecodedMessage> {
        let header_bytes = device.transfer_in(endpoint, HEADER_SIZE).await?;
        let header = decode_header(&header_bytes)?;
        if header.payload_len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::Oversized(header.payload_len()).into());
        }

        let payload = if header.payload_len() > 0 {
            device.transfer_in(endpoint, header.payload_len()).await?
        } else {
            Bytes::new()
        };
        let header_bytes = header_bytes.slice(..HEADER_SIZE);
        self.capture
            .record(Direction::Inbound, &header_bytes, &payload, Utc::now());

        Ok(decode_message(&header, payload)?)
    }

    fn dispatch(&self, message: DecodedMessage) {
        if let DecodedMessage::VendorBlob { msg_type, data } = &message {
            tracing::trace!("Ignoring vendor frame 0x{:02X} ({} bytes)", msg_type, data.len());
            return;
        }

        let info_update = match &message {
            DecodedMessage::SoftwareVersion(version) => {
                let mut cache = self.info.lock();
                cache.info.fw_version = Some(version.clone());
                cache.changed()
            }
            DecodedMessage::BoxInfo(value) => {
                let mut cache = self.info.lock();
                cache.info.box_info = Some(value.clone());
                cache.changed()
            }
            _ => None,
        };

        self.handler.on_message(message);
        if let Some(info) = info_update {
            self.handler.on_dongle_info(&info);
        }
    }

    async fn close(self: &Arc<Self>) -> CloseOutcome {
        let pending = {
            let mut slot = self.pending_close.lock();
            match slot.as_ref() {
                Some(pending) => pending.clone(),
                None => {
                    let inner = self.clone();
                    let fut = async move {
                        let outcome = inner.run_close().await;
                        inner.pending_close.lock().take();
                        outcome
                    }
                    .boxed()
                    .shared();
                    *slot = Some(fut.clone());
                    fut
                }
            }
        };
        pending.await
    }

    async fn run_close(self: &Arc<Self>) -> CloseOutcome {
        {
            let mut state = self.state.lock();
            let has_session = self.session.lock().is_some();
            if state.is_idle() && !has_session {
                return CloseOutcome::AlreadyClosed;
            }
            *state = LinkState::Closing;
        }
        tracing::info!("Closing dongle link");
        self.closing.store(true, Ordering::SeqCst);
        self.timers.lock().cancel();

        let session = self.session.lock().clone();
        let outcome = match session {
            Some(session) => self.teardown(&session).await,
            None => CloseOutcome::Closed,
        };

        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.session.lock() = None;
        self.error_count.store(0, Ordering::SeqCst);
        self.info.lock().reset();
        let capture = Arc::clone(&self.capture);
        if let Err(e) = tokio::task::spawn_blocking(move || capture.flush()).await {
            tracing::warn!("Capture flush did not complete: {}", e);
        }
        self.closing.store(false, Ordering::SeqCst);
        *self.state.lock() = LinkState::Closed;
        tracing::info!("Dongle link closed ({:?})", outcome);
        outcome
    }

    async fn teardown(&self, session: &LinkSession) -> CloseOutcome {
        let device = &session.device;
        let loop_active = self
            .read_loop
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished());

        if loop_active && device.is_opened() {
            // Aborts the transfer the read loop is parked on
            log_absorbed("reset", device.reset().await);
        }
        if !self.wait_read_loop_stopped().await {
            tracing::warn!("Read loop did not stop within {:?}", READ_LOOP_STOP_TIMEOUT);
        }

        if !device.is_opened() {
            return CloseOutcome::Closed;
        }
        if let Some(interface) = session.interface {
            log_absorbed("release interface", device.release_interface(interface).await);
        }

        match device.close().await {
            Ok(()) => CloseOutcome::Closed,
            Err(e) if e.is_pending_request() => {
                tracing::warn!("Device close blocked by a pending transfer, resetting: {}", e);
                log_absorbed("reset", device.reset().await);
                sleep(RESET_SETTLE).await;
                match device.close().await {
                    Ok(()) => CloseOutcome::Closed,
                    Err(e) => {
                        tracing::warn!("Device close failed again, retaining handle: {}", e);
                        self.retained.lock().push(device.clone());
                        CloseOutcome::Retained
                    }
                }
            }
            Err(e) => {
                log_absorbed("close", Err(e));
                CloseOutcome::Closed
            }
        }
    }

    /// Poll until the read loop task has finished, detaching it on timeout
    async fn wait_read_loop_stopped(&self) -> bool {
        let deadline = Instant::now() + READ_LOOP_STOP_TIMEOUT;
        loop {
            {
                let mut slot = self.read_loop.lock();
                if slot.as_ref().map_or(true, |handle| handle.is_finished()) {
                    slot.take();
                    return true;
                }
                if Instant::now() >= deadline {
                    slot.take();
                    return false;
                }
            }
            sleep(READ_LOOP_POLL_INTERVAL).await;
        }
    }
}

fn log_absorbed(operation: &str, result: Result<(), TransportError>) {
    match result {
        Ok(()) => {}
        Err(e) if e.is_benign_disconnect() => tracing::debug!("{} during close: {}", operation, e),
        Err(e) => tracing::warn!("{} during close failed: {}", operation, e),
    }
}

/// Configuration messages sent by `start()`, in wire order
pub fn start_sequence(config: &DongleConfig, sync_time: i64, icon: Option<Bytes>) -> Vec<OutboundMessage> {
    let mut sequence = vec![
        OutboundMessage::send_number("/tmp/screen_dpi", config.dpi),
        OutboundMessage::Open(OpenSettings::from(config)),
        OutboundMessage::send_bool("/tmp/night_mode", config.night_mode),
        OutboundMessage::send_number("/tmp/hand_drive_mode", config.hand_drive.wire_value()),
        OutboundMessage::send_string("/etc/box_name", &config.box_name),
    ];
    if let Some(icon) = icon {
        sequence.push(OutboundMessage::SendFile {
            path: "/etc/icon_120x120.png".to_string(),
            content: icon,
        });
    }

    sequence.push(OutboundMessage::Command(match config.wifi_band {
        WifiBand::Band5 => Command::Wifi5g,
        WifiBand::Band24 => Command::Wifi24g,
    }));
    sequence.push(OutboundMessage::BoxSettings(BoxSettings::from_config(config, sync_time)));
    sequence.push(OutboundMessage::Command(Command::WifiEnable));
    sequence.push(OutboundMessage::Command(match config.mic_source {
        MicSource::Box => Command::BoxMic,
        MicSource::Os => Command::Mic,
    }));
    sequence.push(OutboundMessage::Command(if config.audio_transfer_mode {
        Command::AudioTransferOn
    } else {
        Command::AudioTransferOff
    }));
    if config.android_work_mode {
        sequence.push(OutboundMessage::send_bool("/etc/android_work_mode", true));
    }
    sequence
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::mock::MockDevice;
    use crate::link::LinkEvent;
    use crate::protocol::{encode_header, MessageType};
    use tokio::sync::mpsc;

    fn link() -> (DongleLink, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (DongleLink::with_handler(Arc::new(tx)), rx)
    }

    async fn running_link(device: &Arc<MockDevice>) -> (DongleLink, mpsc::UnboundedReceiver<LinkEvent>) {
        let (link, rx) = link();
        link.initialise(device.clone()).await.unwrap();
        link.start(&DongleConfig::default()).await;
        (link, rx)
    }

    async fn settle() {
        sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialise_requires_opened_device() {
        let (link, _rx) = link();
        let device = MockDevice::unopened();

        let err = link.initialise(device.clone()).await.unwrap_err();
        assert_eq!(err, LinkError::DeviceNotReady);
        assert_eq!(link.state(), LinkState::Closed);
        assert_eq!(device.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialise_without_endpoints_releases_interface() {
        let (link, _rx) = link();
        let device = MockDevice::without_endpoints();

        let err = link.initialise(device.clone()).await.unwrap_err();
        assert_eq!(err, LinkError::NoEndpoints);
        assert_eq!(device.releases.load(Ordering::SeqCst), 1);
        assert_eq!(device.closes.load(Ordering::SeqCst), 1);
        assert_eq!(link.state(), LinkState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialise_twice_claims_once() {
        let (link, _rx) = link();
        let device = MockDevice::new();

        link.initialise(device.clone()).await.unwrap();
        link.initialise(device.clone()).await.unwrap();
        assert_eq!(device.claims.load(Ordering::SeqCst), 1);
        assert_eq!(link.state(), LinkState::Initialised);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_without_initialise_is_noop() {
        let (link, _rx) = link();
        link.start(&DongleConfig::default()).await;
        assert_eq!(link.state(), LinkState::Uninitialised);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_sequence_then_timers() {
        let device = MockDevice::new();
        let (link, _rx) = running_link(&device).await;
        assert_eq!(link.state(), LinkState::Running);

        let send_file = MessageType::SendFile.code();
        let command = MessageType::Command.code();
        assert_eq!(
            device.sent_types(),
            vec![
                send_file,
                MessageType::Open.code(),
                send_file,
                send_file,
                send_file,
                command,
                MessageType::BoxSettings.code(),
                command,
                command,
                command,
            ]
        );
        assert_eq!(
            device.sent_commands(),
            vec![Command::Wifi5g, Command::WifiEnable, Command::Mic, Command::AudioTransferOff]
        );

        sleep(Duration::from_millis(15_100)).await;
        let heartbeats = device
            .sent_types()
            .iter()
            .filter(|&&t| t == MessageType::HeartBeat.code())
            .count();
        assert_eq!(heartbeats, 7);
        assert_eq!(device.sent_commands().last(), Some(&Command::WifiPair));

        link.close().await;
        let sent = device.sent_types().len();
        sleep(Duration::from_secs(10)).await;
        assert_eq!(device.sent_types().len(), sent);
    }

    #[test]
    fn test_start_sequence_options() {
        let config = DongleConfig {
            wifi_band: WifiBand::Band24,
            mic_source: MicSource::Box,
            audio_transfer_mode: true,
            android_work_mode: true,
            ..Default::default()
        };
        let sequence = start_sequence(&config, 0, Some(Bytes::from_static(b"png")));
        let names: Vec<_> = sequence.iter().map(|m| m.name()).collect();
        assert_eq!(names.len(), 12);
        assert!(matches!(&sequence[5], OutboundMessage::SendFile { path, .. } if path == "/etc/icon_120x120.png"));
        assert!(matches!(sequence[6], OutboundMessage::Command(Command::Wifi24g)));
        assert!(matches!(sequence[9], OutboundMessage::Command(Command::BoxMic)));
        assert!(matches!(sequence[10], OutboundMessage::Command(Command::AudioTransferOn)));
        assert!(matches!(&sequence[11], OutboundMessage::SendFile { path, .. } if path == "/etc/android_work_mode"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_order_and_info_dedup() {
        let device = MockDevice::new();
        let (link, mut rx) = running_link(&device).await;

        device.push_frame(MessageType::SoftwareVersion.code(), b"2025.02.01\0");
        device.push_frame(0x25, &[1, 2, 3]);
        device.push_frame(MessageType::SoftwareVersion.code(), b"2025.02.01\0");
        device.push_frame(MessageType::BoxSettings.code(), br#"{"uuid":"abc"}"#);
        device.push_frame(MessageType::Command.code(), &1012u32.to_le_bytes());
        settle().await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 6);
        assert_eq!(
            events[0],
            LinkEvent::Message(DecodedMessage::SoftwareVersion("2025.02.01".into()))
        );
        assert!(matches!(&events[1], LinkEvent::DongleInfoChanged(info) if info.fw_version.as_deref() == Some("2025.02.01")));
        assert!(matches!(events[2], LinkEvent::Message(DecodedMessage::SoftwareVersion(_))));
        assert!(matches!(events[3], LinkEvent::Message(DecodedMessage::BoxInfo(_))));
        assert!(matches!(&events[4], LinkEvent::DongleInfoChanged(info) if info.box_info.is_some()));
        assert_eq!(events[5], LinkEvent::Message(DecodedMessage::Command(Command::WifiPair)));
        assert_eq!(link.dongle_info().fw_version.as_deref(), Some("2025.02.01"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_threshold_closes_and_reports_failure() {
        let device = MockDevice::new();
        let (link, mut rx) = running_link(&device).await;

        for _ in 0..MAX_CONSECUTIVE_ERRORS {
            device.push_error(TransportError::Transfer("LIBUSB_ERROR_IO".into()));
        }
        settle().await;

        assert_eq!(rx.try_recv(), Ok(LinkEvent::Failure));
        assert_eq!(link.state(), LinkState::Closed);
        assert_eq!(device.closes.load(Ordering::SeqCst), 1);
        assert_eq!(device.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_error_count() {
        let device = MockDevice::new();
        let (link, mut rx) = running_link(&device).await;

        for _ in 0..4 {
            device.push_error(TransportError::Transfer("LIBUSB_ERROR_IO".into()));
        }
        device.push_frame(MessageType::HeartBeat.code(), &[]);
        for _ in 0..4 {
            device.push_error(TransportError::Transfer("LIBUSB_ERROR_IO".into()));
        }
        settle().await;

        assert_eq!(rx.try_recv(), Ok(LinkEvent::Message(DecodedMessage::HeartBeat)));
        assert!(rx.try_recv().is_err());
        assert_eq!(link.state(), LinkState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_magic_counts_as_error() {
        let device = MockDevice::new();
        let (_link, mut rx) = running_link(&device).await;

        let mut junk = encode_header(MessageType::HeartBeat.code(), 0).to_vec();
        junk[0] = 0;
        for _ in 0..MAX_CONSECUTIVE_ERRORS {
            device.push_raw(Bytes::from(junk.clone()));
        }
        settle().await;
        assert_eq!(rx.try_recv(), Ok(LinkEvent::Failure));
    }

    #[tokio::test(start_paused = true)]
    async fn test_benign_disconnect_ends_loop_silently() {
        let device = MockDevice::new();
        let (link, mut rx) = running_link(&device).await;

        device.push_error(TransportError::Transfer("LIBUSB_ERROR_NO_DEVICE".into()));
        settle().await;

        assert!(rx.try_recv().is_err());
        assert_eq!(link.state(), LinkState::Running);
        assert_eq!(link.close().await, CloseOutcome::Closed);
        assert_eq!(device.resets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_close_tears_down_once() {
        let device = MockDevice::new();
        let (link, _rx) = running_link(&device).await;

        let outcomes = futures_util::future::join_all((0..4).map(|_| link.close())).await;
        assert_eq!(outcomes[0], CloseOutcome::Closed);
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, CloseOutcome::Closed | CloseOutcome::AlreadyClosed)));
        assert_eq!(device.closes.load(Ordering::SeqCst), 1);
        assert_eq!(device.resets.load(Ordering::SeqCst), 1);
        assert_eq!(link.close().await, CloseOutcome::AlreadyClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_retains_stuck_handle() {
        let device = MockDevice::new();
        let (link, _rx) = link();
        link.initialise(device.clone()).await.unwrap();

        device.queue_close_result(Err(TransportError::Device("close: pending request".into())));
        device.queue_close_result(Err(TransportError::Device("LIBUSB_ERROR_BUSY".into())));
        assert_eq!(link.close().await, CloseOutcome::Retained);
        assert_eq!(link.retained_count(), 1);
        assert_eq!(device.closes.load(Ordering::SeqCst), 2);
        assert_eq!(link.state(), LinkState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_retry_after_reset() {
        let device = MockDevice::new();
        let (link, _rx) = link();
        link.initialise(device.clone()).await.unwrap();

        device.queue_close_result(Err(TransportError::Device("Device busy".into())));
        assert_eq!(link.close().await, CloseOutcome::Closed);
        assert_eq!(device.resets.load(Ordering::SeqCst), 1);
        assert_eq!(link.retained_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_results() {
        let device = MockDevice::new();
        let (link, _rx) = link();
        assert!(!link.send(&OutboundMessage::HeartBeat).await);

        link.initialise(device.clone()).await.unwrap();
        assert!(link.send(&OutboundMessage::HeartBeat).await);

        device.set_out_status(TransferStatus::Stall);
        assert!(!link.send(&OutboundMessage::HeartBeat).await);

        device.set_out_status(TransferStatus::Ok);
        link.close().await;
        assert!(!link.send(&OutboundMessage::HeartBeat).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reinitialise_after_close() {
        let (link, _rx) = link();
        let first = MockDevice::new();
        link.initialise(first.clone()).await.unwrap();
        link.close().await;

        let second = MockDevice::new();
        link.initialise(second.clone()).await.unwrap();
        assert_eq!(link.state(), LinkState::Initialised);
        assert_eq!(second.claims.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_waiting_for_stuck_read_loop() {
        let device = MockDevice::new();
        device.set_reset_aborts(false);
        let (link, _rx) = running_link(&device).await;

        let started = Instant::now();
        let outcome = link.close().await;
        let elapsed = started.elapsed();

        assert!(matches!(outcome, CloseOutcome::Closed | CloseOutcome::Retained));
        assert!(elapsed >= READ_LOOP_STOP_TIMEOUT, "returned after {:?}", elapsed);
        assert!(elapsed < READ_LOOP_STOP_TIMEOUT + Duration::from_millis(200), "returned after {:?}", elapsed);
        assert_eq!(device.resets.load(Ordering::SeqCst), 1);
        assert_eq!(device.releases.load(Ordering::SeqCst), 1);
        assert_eq!(link.state(), LinkState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_start_sends_sequence_once() {
        let device = MockDevice::new();
        let (link, _rx) = link();
        link.initialise(device.clone()).await.unwrap();

        let config = DongleConfig::default();
        tokio::join!(link.start(&config), link.start(&config), link.start(&config));

        let expected: Vec<u32> = start_sequence(&config, 0, None)
            .iter()
            .map(|m| m.msg_type().code())
            .collect();
        assert_eq!(device.sent_types(), expected);
        assert_eq!(link.state(), LinkState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_config_records_sent_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("frames.bin");
        let config = CaptureConfig {
            enabled: true,
            path: Some(path.clone()),
        };

        let device = MockDevice::new();
        let (tx, _rx) = mpsc::unbounded_channel::<LinkEvent>();
        let link = DongleLink::with_capture_config(Arc::new(tx), &config).unwrap();
        link.initialise(device.clone()).await.unwrap();
        assert!(link.send(&OutboundMessage::HeartBeat).await);
        link.close().await;

        let records: Vec<_> = crate::link::capture::CaptureReader::open(&path)
            .unwrap()
            .collect::<std::io::Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].direction, Direction::Outbound);
        let header = decode_header(&records[0].header).unwrap();
        assert_eq!(header.msg_type, MessageType::HeartBeat.code());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_capture_config_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.bin");
        let config = CaptureConfig {
            enabled: false,
            path: Some(path.clone()),
        };

        let device = MockDevice::new();
        let (tx, _rx) = mpsc::unbounded_channel::<LinkEvent>();
        let link = DongleLink::with_capture_config(Arc::new(tx), &config).unwrap();
        link.initialise(device.clone()).await.unwrap();
        assert!(link.send(&OutboundMessage::HeartBeat).await);
        link.close().await;

        assert!(!path.exists());
    }
}
