//! Microphone uplink
//!
//! The mixer's mic callback runs on the capture thread and must not
//! block, while `DongleLink::send` is async. [`MicForwarder`] bridges the
//! two with an unbounded channel drained by one task, so chunks reach the
//! adapter in capture order.

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;

use crate::link::dongle::DongleLink;
use crate::protocol::OutboundMessage;

/// Cloneable handle the capture side pushes PCM into
#[derive(Debug, Clone)]
pub struct MicSender {
    tx: UnboundedSender<Vec<i16>>,
}

impl MicSender {
    /// Queue one chunk; never blocks. Dropped silently once the forwarder is gone.
    pub fn send(&self, samples: Vec<i16>) {
        if self.tx.send(samples).is_err() {
            tracing::trace!("Mic chunk dropped: forwarder stopped");
        }
    }
}

/// Task that sends queued mic PCM as `MicAudio` frames
pub struct MicForwarder {
    sender: MicSender,
    task: JoinHandle<()>,
}

impl MicForwarder {
    /// Must be called from within a tokio runtime
    pub fn spawn(link: DongleLink) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<i16>>();
        let task = tokio::spawn(async move {
            while let Some(samples) = rx.recv().await {
                let len = samples.len();
                if !link.send(&OutboundMessage::MicAudio(samples)).await {
                    tracing::trace!("Mic chunk of {} samples not sent", len);
                }
            }
            tracing::debug!("Mic forwarder stopped");
        });
        Self {
            sender: MicSender { tx },
            task,
        }
    }

    pub fn sender(&self) -> MicSender {
        self.sender.clone()
    }
}

impl Drop for MicForwarder {
    fn drop(&mut self) {
        self.task.abort();
    }
}
