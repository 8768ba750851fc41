//! Cooperative cancellation
//!
//! A run checks its token between Monte Carlo batches and between pipeline
//! stages. Clones share the same flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// `Err(Cancelled)` once the token has been cancelled.
    pub fn check(&self, stage: &'static str) -> Result<()> {
        if self.is_cancelled() {
            tracing::info!(stage, "Run cancelled");
            Err(EngineError::Cancelled { stage })
        } else {
            Ok(())
        }
    }
}
