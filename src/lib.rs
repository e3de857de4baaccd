pub mod config;
pub mod secrets;
pub mod sniff;
pub mod store;

#[cfg(any(test, feature = "test"))]
pub mod test;

/// Uploads larger than this many bytes are rejected before any classification
/// or filesystem interaction takes place.  Payloads of exactly this size are
/// still accepted.
pub const MAX_UPLOAD_SIZE: usize = 5_000_000;
