//! Dongle link: USB transport and protocol engine
//!
//! Owns one device handle, a read loop, a serialized send path and the
//! heartbeat timer. Decoded frames are handed to a [`LinkHandler`].

pub mod capture;
pub mod device;
pub mod dongle;
pub mod mic;
pub mod session;

#[cfg(test)]
pub(crate) mod mock;

pub use capture::{CaptureReader, CaptureRecord, CaptureSink, Direction, FileCapture, NullCapture};
pub use device::{
    ConfigurationDescriptor, EndpointDescriptor, EndpointDirection, InterfaceDescriptor, TransferStatus,
    TransferType, UsbDevice,
};
pub use dongle::{start_sequence, CloseOutcome, DongleLink, MAX_CONSECUTIVE_ERRORS};
pub use mic::{MicForwarder, MicSender};
pub use session::{DongleInfo, LinkSession, LinkState};

use tokio::sync::mpsc::UnboundedSender;

use crate::protocol::DecodedMessage;

/// Receives everything the link emits, in read order
///
/// Callbacks run on the read loop task and must not block.
pub trait LinkHandler: Send + Sync {
    fn on_message(&self, message: DecodedMessage);

    /// The link hit the consecutive error threshold and closed itself
    fn on_failure(&self);

    fn on_dongle_info(&self, info: &DongleInfo);
}

/// Link output as a single value, for channel based consumers
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Message(DecodedMessage),
    Failure,
    DongleInfoChanged(DongleInfo),
}

impl LinkHandler for UnboundedSender<LinkEvent> {
    fn on_message(&self, message: DecodedMessage) {
        let _ = self.send(LinkEvent::Message(message));
    }

    fn on_failure(&self) {
        let _ = self.send(LinkEvent::Failure);
    }

    fn on_dongle_info(&self, info: &DongleInfo) {
        let _ = self.send(LinkEvent::DongleInfoChanged(info.clone()));
    }
}
