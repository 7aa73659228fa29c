use tokio::sync::watch;
use tracing::info;

use crate::error::{RenderError, Result};

/// Cooperative cancellation, checked once per segment before any external
/// tool is started for it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx: Some(rx) }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            info!("Cancellation requested, stopping");
            return Err(RenderError::Cancelled);
        }
        Ok(())
    }
}

impl From<watch::Receiver<bool>> for CancelToken {
    fn from(rx: watch::Receiver<bool>) -> Self {
        Self::new(rx)
    }
}
