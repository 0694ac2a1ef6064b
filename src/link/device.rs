//! USB device capability contract
//!
//! The link only needs descriptors, interface claim/release, bulk
//! transfers in and out, reset and close. Backends implement [`UsbDevice`].

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointDirection {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub address: u8,
    pub direction: EndpointDirection,
    pub transfer_type: TransferType,
}

impl EndpointDescriptor {
    pub fn bulk_in(address: u8) -> Self {
        Self {
            address,
            direction: EndpointDirection::In,
            transfer_type: TransferType::Bulk,
        }
    }

    pub fn bulk_out(address: u8) -> Self {
        Self {
            address,
            direction: EndpointDirection::Out,
            transfer_type: TransferType::Bulk,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub endpoints: Vec<EndpointDescriptor>,
}

impl InterfaceDescriptor {
    fn bulk(&self, direction: EndpointDirection) -> Option<u8> {
        self.endpoints
            .iter()
            .find(|ep| ep.direction == direction && ep.transfer_type == TransferType::Bulk)
            .map(|ep| ep.address)
    }

    pub fn bulk_in(&self) -> Option<u8> {
        self.bulk(EndpointDirection::In)
    }

    pub fn bulk_out(&self) -> Option<u8> {
        self.bulk(EndpointDirection::Out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationDescriptor {
    pub value: u8,
    pub interfaces: Vec<InterfaceDescriptor>,
}

/// Completion status of a transfer that did not error at the USB layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Ok,
    Stall,
    Babble,
}

/// An opened USB device the link may drive
///
/// All I/O may suspend. Implementations must make `reset` and `close`
/// abort in-flight transfers with an error rather than hang.
#[async_trait]
pub trait UsbDevice: Send + Sync {
    /// Whether the caller has already opened the device
    fn is_opened(&self) -> bool;

    fn configurations(&self) -> Vec<ConfigurationDescriptor>;

    /// Currently selected configuration value, if any
    fn active_configuration(&self) -> Option<u8>;

    async fn select_configuration(&self, value: u8) -> Result<(), TransportError>;

    async fn claim_interface(&self, number: u8) -> Result<(), TransportError>;

    async fn release_interface(&self, number: u8) -> Result<(), TransportError>;

    /// Read up to `length` bytes from a bulk IN endpoint
    async fn transfer_in(&self, endpoint: u8, length: usize) -> Result<Bytes, TransportError>;

    async fn transfer_out(&self, endpoint: u8, data: Bytes) -> Result<TransferStatus, TransportError>;

    async fn reset(&self) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_endpoint_lookup() {
        let iface = InterfaceDescriptor {
            number: 0,
            endpoints: vec![
                EndpointDescriptor {
                    address: 0x83,
                    direction: EndpointDirection::In,
                    transfer_type: TransferType::Interrupt,
                },
                EndpointDescriptor::bulk_in(0x81),
                EndpointDescriptor::bulk_out(0x01),
            ],
        };
        assert_eq!(iface.bulk_in(), Some(0x81));
        assert_eq!(iface.bulk_out(), Some(0x01));

        let empty = InterfaceDescriptor { number: 0, endpoints: vec![] };
        assert_eq!(empty.bulk_in(), None);
    }
}
