//! Per-connection state of the dongle link

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::link::device::UsbDevice;

/// Lifecycle of the link. `Closed` allows a fresh `initialise()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Uninitialised,
    Initialised,
    Running,
    Closing,
    Closed,
}

impl LinkState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Uninitialised => "uninitialised",
            Self::Initialised => "initialised",
            Self::Running => "running",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    /// States from which `initialise()` starts over
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Uninitialised | Self::Closed)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One physical connection to an adapter
#[derive(Clone)]
pub struct LinkSession {
    pub device: Arc<dyn UsbDevice>,
    pub interface: Option<u8>,
    pub endpoint_in: Option<u8>,
    pub endpoint_out: Option<u8>,
}

impl LinkSession {
    pub fn new(device: Arc<dyn UsbDevice>) -> Self {
        Self {
            device,
            interface: None,
            endpoint_in: None,
            endpoint_out: None,
        }
    }
}

impl fmt::Debug for LinkSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkSession")
            .field("interface", &self.interface)
            .field("endpoint_in", &self.endpoint_in)
            .field("endpoint_out", &self.endpoint_out)
            .finish()
    }
}

/// Adapter metadata reported during the session
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DongleInfo {
    #[serde(rename = "fwVersion")]
    pub fw_version: Option<String>,
    #[serde(rename = "boxInfo")]
    pub box_info: Option<serde_json::Value>,
}

/// Cached metadata plus the serialized form last emitted
#[derive(Debug, Default)]
pub(crate) struct InfoCache {
    pub info: DongleInfo,
    last_emitted: Option<String>,
}

impl InfoCache {
    /// Returns the info when it differs from the previous emission
    pub fn changed(&mut self) -> Option<DongleInfo> {
        let serialized = serde_json::to_string(&self.info).ok()?;
        if self.last_emitted.as_deref() == Some(serialized.as_str()) {
            return None;
        }
        self.last_emitted = Some(serialized);
        Some(self.info.clone())
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_cache_dedup() {
        let mut cache = InfoCache::default();
        cache.info.fw_version = Some("2025.01".into());
        assert!(cache.changed().is_some());
        assert!(cache.changed().is_none());

        cache.info.box_info = Some(serde_json::json!({"uuid": "x"}));
        let info = cache.changed().unwrap();
        assert_eq!(info.box_info.unwrap()["uuid"], "x");

        cache.reset();
        assert_eq!(cache.info, DongleInfo::default());
    }

    #[test]
    fn test_idle_states() {
        assert!(LinkState::Closed.is_idle());
        assert!(LinkState::Uninitialised.is_idle());
        assert!(!LinkState::Running.is_idle());
    }
}
