//! Cooperative cancellation of long-running operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::info;

use crate::error::{Result, SmgError};

/// A shared "shutdown requested" flag.
///
/// Clones observe the same flag, so the outer algorithm keeps one handle and
/// hands another to the analysis context.
#[derive(Debug, Clone, Default)]
pub struct ShutdownNotifier {
    requested: Arc<AtomicBool>,
}

impl ShutdownNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_shutdown(&self) {
        info!("shutdown requested");
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Fails with [`SmgError::Cancelled`] once a shutdown was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_shutdown_requested() {
            Err(SmgError::Cancelled)
        } else {
            Ok(())
        }
    }
}
