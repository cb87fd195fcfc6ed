//! Broadcast configuration

use crate::error::BroadcastError;
use urb_link::LinkConfig;

/// Broadcast stack tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastConfig {
    /// Settings of the underlying perfect link
    pub link: LinkConfig,
    /// Own broadcasts allowed to await a majority at the same time
    pub own_batch_size: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        BroadcastConfig {
            link: LinkConfig::default(),
            own_batch_size: 100,
        }
    }
}

impl BroadcastConfig {
    /// Check that the configuration can run
    pub fn validate(&self) -> Result<(), BroadcastError> {
        self.link.validate()?;
        if self.own_batch_size == 0 {
            return Err(BroadcastError::InvalidConfig(
                "own_batch_size must be positive".into(),
            ));
        }
        Ok(())
    }
}
