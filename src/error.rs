use thiserror::Error;

/// Input-validation failures raised before any scan work starts.
///
/// Transport outcomes (refused, unreachable, timed out) are never errors; they
/// fold into a closed/offline probe result.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("invalid subnet '{0}': use a three-octet prefix such as 192.168.1 or 192.168.1.0")]
    InvalidSubnet(String),

    #[error("invalid port range {start}-{end}")]
    InvalidPortRange { start: u16, end: u16 },

    #[error("could not resolve target '{0}'")]
    UnresolvedTarget(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ScanResult<T> = std::result::Result<T, ScanError>;
