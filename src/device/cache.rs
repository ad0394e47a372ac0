use std::sync::{Arc, PoisonError, RwLock};

use crate::device::driver::CaptureResult;

/// Holds the latest capture of a session.
///
/// Image requests are served from here without touching the hardware. A new
/// capture replaces the previous one wholesale.
#[derive(Debug, Default)]
pub struct FrameCache {
    latest: RwLock<Option<Arc<CaptureResult>>>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, capture: CaptureResult) -> Arc<CaptureResult> {
        let capture = Arc::new(capture);
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&capture));
        capture
    }

    pub fn latest(&self) -> Option<Arc<CaptureResult>> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
