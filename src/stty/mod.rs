pub mod exec;
pub mod params;

pub use exec::{apply_directives, is_platform_compatible, STTY_PATH};

use crate::config::StopBits;

#[derive(Debug, thiserror::Error)]
pub enum SttyError {
    #[error("data bits must be between 5 and 8, got {0}")]
    InvalidDataBits(u8),

    #[error("stop bits cannot be set to {0:?}")]
    InvalidStopBits(StopBits),

    #[error("stty reported an error: {0}")]
    CommandFailed(String),

    #[error("this serial implementation only works on platforms with stty")]
    NotAvailable,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SttyError>;
