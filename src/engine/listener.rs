use crate::core::ChannelKey;
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one subscriber of a gulper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Progress notifications delivered to gulper listeners
#[derive(Debug, Clone, PartialEq)]
pub enum GulperEvent {
    Started {
        key: ChannelKey,
    },
    /// One sub-fetch of `[start, end)` finished
    Gulped {
        key: ChannelKey,
        start: f64,
        end: f64,
        success: bool,
    },
    Stopped {
        key: ChannelKey,
        killed: bool,
    },
}

impl GulperEvent {
    pub fn key(&self) -> &ChannelKey {
        match self {
            Self::Started { key } | Self::Gulped { key, .. } | Self::Stopped { key, .. } => key,
        }
    }
}

/// Subscriber handle: events are pushed through a channel so the consumer
/// decides which thread drains them
#[derive(Debug, Clone)]
pub struct GulperListener {
    id: ListenerId,
    tx: Sender<GulperEvent>,
}

impl GulperListener {
    pub fn new(tx: Sender<GulperEvent>) -> Self {
        Self {
            id: ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed)),
            tx,
        }
    }

    /// Listener plus the receiving end of its unbounded event channel
    pub fn channel() -> (Self, Receiver<GulperEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Returns false once the receiving side is gone
    pub(crate) fn notify(&self, event: GulperEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}
