//! In-memory USB device for link tests

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

use crate::error::TransportError;
use crate::link::device::{
    ConfigurationDescriptor, EndpointDescriptor, InterfaceDescriptor, TransferStatus, UsbDevice,
};
use crate::protocol::{decode_header, encode_header, Command, HEADER_SIZE};

type Inbound = Result<Bytes, TransportError>;

pub(crate) struct MockDevice {
    opened: AtomicBool,
    configurations: Vec<ConfigurationDescriptor>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>,
    abort: Notify,
    /// When false, `reset` leaves a parked `transfer_in` hanging
    reset_aborts: AtomicBool,
    sent: Mutex<Vec<Bytes>>,
    out_status: Mutex<TransferStatus>,
    close_results: Mutex<VecDeque<Result<(), TransportError>>>,
    pub claims: AtomicUsize,
    pub releases: AtomicUsize,
    pub resets: AtomicUsize,
    pub closes: AtomicUsize,
}

impl MockDevice {
    fn build(opened: bool, endpoints: Vec<EndpointDescriptor>) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            opened: AtomicBool::new(opened),
            configurations: vec![ConfigurationDescriptor {
                value: 1,
                interfaces: vec![InterfaceDescriptor { number: 0, endpoints }],
            }],
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            abort: Notify::new(),
            reset_aborts: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
            out_status: Mutex::new(TransferStatus::Ok),
            close_results: Mutex::new(VecDeque::new()),
            claims: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        })
    }

    pub fn new() -> Arc<Self> {
        Self::build(
            true,
            vec![EndpointDescriptor::bulk_in(0x81), EndpointDescriptor::bulk_out(0x01)],
        )
    }

    pub fn unopened() -> Arc<Self> {
        Self::build(false, vec![EndpointDescriptor::bulk_in(0x81), EndpointDescriptor::bulk_out(0x01)])
    }

    pub fn without_endpoints() -> Arc<Self> {
        Self::build(true, vec![EndpointDescriptor::bulk_in(0x81)])
    }

    /// Queue a frame as a header transfer plus an optional payload transfer
    pub fn push_frame(&self, msg_type: u32, payload: &[u8]) {
        let _ = self.inbound_tx.send(Ok(encode_header(msg_type, payload.len())));
        if !payload.is_empty() {
            let _ = self.inbound_tx.send(Ok(Bytes::copy_from_slice(payload)));
        }
    }

    pub fn push_raw(&self, data: Bytes) {
        let _ = self.inbound_tx.send(Ok(data));
    }

    pub fn push_error(&self, error: TransportError) {
        let _ = self.inbound_tx.send(Err(error));
    }

    pub fn queue_close_result(&self, result: Result<(), TransportError>) {
        self.close_results.lock().push_back(result);
    }

    pub fn set_reset_aborts(&self, aborts: bool) {
        self.reset_aborts.store(aborts, Ordering::SeqCst);
    }

    pub fn sent_frames(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    pub fn set_out_status(&self, status: TransferStatus) {
        *self.out_status.lock() = status;
    }

    pub fn sent_types(&self) -> Vec<u32> {
        self.sent
            .lock()
            .iter()
            .map(|frame| decode_header(frame).map(|h| h.msg_type).unwrap_or_default())
            .collect()
    }

    pub fn sent_commands(&self) -> Vec<Command> {
        self.sent
            .lock()
            .iter()
            .filter(|frame| decode_header(frame).map(|h| h.msg_type) == Ok(0x08))
            .map(|frame| Command::from_u32(frame.slice(HEADER_SIZE..).get_u32_le()))
            .collect()
    }
}

#[async_trait]
impl UsbDevice for MockDevice {
    fn is_opened(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    fn configurations(&self) -> Vec<ConfigurationDescriptor> {
        self.configurations.clone()
    }

    fn active_configuration(&self) -> Option<u8> {
        Some(1)
    }

    async fn select_configuration(&self, _value: u8) -> Result<(), TransportError> {
        Ok(())
    }

    async fn claim_interface(&self, _number: u8) -> Result<(), TransportError> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn release_interface(&self, _number: u8) -> Result<(), TransportError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn transfer_in(&self, _endpoint: u8, _length: usize) -> Result<Bytes, TransportError> {
        let mut rx = self.inbound_rx.lock().await;
        tokio::select! {
            item = rx.recv() => item.unwrap_or_else(|| Err(TransportError::Disconnected("mock unplugged".into()))),
            _ = self.abort.notified() => Err(TransportError::Transfer("LIBUSB_TRANSFER_CANCELLED".into())),
        }
    }

    async fn transfer_out(&self, _endpoint: u8, data: Bytes) -> Result<TransferStatus, TransportError> {
        let status = *self.out_status.lock();
        if status == TransferStatus::Ok {
            self.sent.lock().push(data);
        }
        Ok(status)
    }

    async fn reset(&self) -> Result<(), TransportError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        if self.reset_aborts.load(Ordering::SeqCst) {
            self.abort.notify_waiters();
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        let result = self.close_results.lock().pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            self.opened.store(false, Ordering::SeqCst);
            self.abort.notify_waiters();
        }
        result
    }
}
