//! A dedicated error for everything that can go wrong in the CDN: I/O, DNS
//! wire-format violations, cache state, upstream HTTP failures.
use std::io;
use std::str;

/// Wire-format failures of the DNS codec. One variant per check in the parse
/// and emit paths, so callers (and tests) can match on the exact cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// Packet shorter than the 12-byte header.
    ShortPacket,
    /// The three reserved z bits were not zero.
    ReservedBits,
    /// A label length outside 1..63, or label bytes running past the packet.
    BadLabel,
    /// A fixed-width field was cut off by the end of the packet.
    Truncated,
    /// Serialized message would exceed the 512-byte UDP limit.
    Oversize,
    /// A label too long to length-prefix on the wire.
    LabelTooLong,
}

/// Cache lookup outcomes that are not plain I/O errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// Warm-up has not completed; the cache serves nothing yet.
    NotBuilt,
    /// The path is in neither tier.
    Miss,
}

#[derive(Debug)]
pub enum CdnError {
    Io(io::Error),
    Utf8(str::Utf8Error),
    Http(reqwest::Error),
    Wire(WireError),
    Cache(CacheError),
    Cdn(String),
}

impl CdnError {
    // Helper function to create a new CDN error from a string
    pub fn new(s: &str) -> Self {
        CdnError::Cdn(String::from(s))
    }
}

/// A specific custom `Result` for all functions
pub type CdnResult<T> = Result<T, CdnError>;

// All conversions from internal errors to CdnError
impl From<io::Error> for CdnError {
    fn from(err: io::Error) -> Self {
        CdnError::Io(err)
    }
}

impl From<str::Utf8Error> for CdnError {
    fn from(err: str::Utf8Error) -> Self {
        CdnError::Utf8(err)
    }
}

impl From<reqwest::Error> for CdnError {
    fn from(err: reqwest::Error) -> Self {
        CdnError::Http(err)
    }
}

impl From<WireError> for CdnError {
    fn from(err: WireError) -> Self {
        CdnError::Wire(err)
    }
}

impl From<CacheError> for CdnError {
    fn from(err: CacheError) -> Self {
        CdnError::Cache(err)
    }
}

impl From<String> for CdnError {
    fn from(err: String) -> Self {
        CdnError::Cdn(err)
    }
}
