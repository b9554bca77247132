use super::types::DecodedFrame;
use std::sync::{Arc, RwLock};

/// Single-image, last-writer-wins buffer shared between an ingest task and snapshot readers.
///
/// Frames are published whole behind an `Arc`, so a reader holds the lock only long enough
/// to clone the pointer and can never observe a partially written image.
#[derive(Debug, Default)]
pub struct FrameSlot {
    frame: RwLock<Option<Arc<DecodedFrame>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the current frame.
    pub fn publish(&self, frame: DecodedFrame) {
        let frame = Arc::new(frame);
        let mut slot = self.frame.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(frame);
    }

    /// Most recent frame, or `None` if nothing has been decoded yet.
    pub fn latest(&self) -> Option<Arc<DecodedFrame>> {
        self.frame.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.read().unwrap_or_else(|e| e.into_inner()).is_none()
    }

    pub fn clear(&self) {
        let mut slot = self.frame.write().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }
}
