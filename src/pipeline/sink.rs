//! Display sinks.
//!
//! The worker thread hands every rendered frame to a `DisplaySink`. The sink
//! is the only mutable resource shared with the UI side, so implementations
//! must marshal deliveries to whatever thread owns the display.

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::frame::Frame;

/// What the display should show next.
#[derive(Debug)]
pub enum FrameDelivery {
    /// Annotated frame plus the iteration's throughput, e.g. `"29.85"`.
    Frame { image: Frame, fps: String },
    /// The pipeline stopped; clear the display.
    Cleared,
}

impl FrameDelivery {
    pub fn is_cleared(&self) -> bool {
        matches!(self, FrameDelivery::Cleared)
    }
}

pub trait DisplaySink: Send + Sync {
    fn deliver(&self, delivery: FrameDelivery);
}

impl<F> DisplaySink for F
where
    F: Fn(FrameDelivery) + Send + Sync,
{
    fn deliver(&self, delivery: FrameDelivery) {
        self(delivery)
    }
}

/// Single-slot mailbox drained by the UI thread.
///
/// At most one undisplayed delivery is pending. A new frame replaces a stale
/// one, and `Cleared` replaces a pending frame. A pending `Cleared` is never
/// replaced by a frame; that frame is dropped instead. The worker never
/// blocks on a slow display.
#[derive(Clone)]
pub struct ChannelSink {
    tx: Sender<FrameDelivery>,
    // Held so the sink can evict stale deliveries from its own slot.
    rx: Receiver<FrameDelivery>,
}

impl ChannelSink {
    pub fn latest() -> (Self, Receiver<FrameDelivery>) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        (
            Self {
                tx,
                rx: rx.clone(),
            },
            rx,
        )
    }
}

impl DisplaySink for ChannelSink {
    fn deliver(&self, delivery: FrameDelivery) {
        let mut delivery = delivery;
        loop {
            match self.tx.try_send(delivery) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => delivery = rejected,
                Err(TrySendError::Disconnected(_)) => {
                    log::debug!("display channel closed; discarding delivery");
                    return;
                }
            }
            match self.rx.try_recv() {
                Ok(FrameDelivery::Cleared) if !delivery.is_cleared() => {
                    // Put the clear back; the display must see it first.
                    let _ = self.tx.try_send(FrameDelivery::Cleared);
                    log::debug!("display has not taken the clear yet; dropping frame");
                    return;
                }
                Ok(_stale) => log::trace!("replacing undisplayed delivery"),
                Err(_) => {}
            }
        }
    }
}
