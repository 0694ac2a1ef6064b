//! Audio session mixer and host audio backends

pub mod backend;
pub mod buffer;
pub mod fade;
pub mod mixer;
pub mod nav_queue;
pub mod resample;
pub mod stream;

#[cfg(feature = "native-audio")]
pub mod capture;
#[cfg(feature = "native-audio")]
pub mod device;
#[cfg(feature = "native-audio")]
pub mod playback;

pub use backend::{AttentionKind, AudioBackend, MicCallback, MicCapture, MixerHost, NullBackend, PcmSink, SinkKey, UiEvent};
pub use buffer::{create_shared_ring, SampleRing, SharedSampleRing};
pub use mixer::{AudioMixer, MixerSnapshot, StreamVolumes, StreamVolumesUpdate};
pub use stream::LogicalStream;

#[cfg(feature = "native-audio")]
pub use device::{list_output_devices, AudioDevice};
#[cfg(feature = "native-audio")]
pub use playback::CpalBackend;
