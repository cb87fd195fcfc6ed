//! Broadcast errors

use thiserror::Error;
use urb_link::LinkError;

/// Broadcast layer errors
#[derive(Error, Debug)]
pub enum BroadcastError {
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Broadcast is closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
