//! Error types for segment-based key generation.
//!
//! This module defines the central [`Error`] enum, which captures every
//! reportable failure in the key generation pipeline, from configuration
//! validation through registry coordination.
//!
//! ## Error Cases
//! - `InvalidConfiguration`: A property failed validation. Raised before any
//!   registry I/O and never retried.
//! - `RegistryUnavailable`: The coordination backend could not be reached or
//!   the session failed mid-operation.
//! - `AuthenticationConflict`: A pooled session for a server list was reused
//!   under a different credential.
//! - `NodeNotFound`: A versioned read targeted a node that does not exist.
//! - `ContentionExceeded`: The compare-and-swap retry bound was exhausted
//!   while refilling a segment.
//! - `RangeExhausted`: Advancing a leaf key's counter would overflow the
//!   representable range. Fatal for that leaf key.

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for segment key generation.
///
/// Every failure mode of [`LeafSegmentGenerator::generate_key`] maps to
/// exactly one variant; no error is silently downgraded to a default key.
///
/// [`LeafSegmentGenerator::generate_key`]: crate::LeafSegmentGenerator::generate_key
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// A configuration property is missing, malformed, or out of bounds.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// The coordination backend is unreachable or the session failed.
    #[error("registry center unavailable: {context}")]
    RegistryUnavailable { context: String },

    /// A session for this server list already exists under a different
    /// credential. Retrying with the same credential will not succeed.
    #[error("credential conflicts with the pooled session for '{server_list}'")]
    AuthenticationConflict { server_list: String },

    /// The registry node does not exist.
    #[error("registry node '{path}' not found")]
    NodeNotFound { path: String },

    /// Concurrent writers kept invalidating the compare-and-swap during a
    /// segment refill. Transient; the caller may retry.
    #[error("segment refill lost {retries} compare-and-swap races")]
    ContentionExceeded { retries: u32 },

    /// The leaf key's counter cannot advance without overflowing `i64`.
    #[error("key range exhausted for leaf key '{leaf_key}'")]
    RangeExhausted { leaf_key: String },
}

impl Error {
    /// Returns `true` if the failure is transient and the same call may
    /// succeed if repeated later.
    ///
    /// Registry outages and refill contention are retryable; configuration
    /// errors, credential conflicts, and an exhausted key range are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RegistryUnavailable { .. } | Self::ContentionExceeded { .. }
        )
    }
}
