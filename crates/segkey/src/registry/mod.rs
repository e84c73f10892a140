//! Coordination backend abstraction.
//!
//! The generator needs exactly three primitives from its backend: a versioned
//! read, an idempotent create, and a version-conditioned write (CAS). Any
//! strongly-consistent hierarchical key-value service providing these can
//! back a generator; the crate ships an embedded in-process implementation
//! and leaves real clients (ZooKeeper, etcd) to [`RegistryConnector`]
//! implementations supplied by the caller.

mod memory;
mod pool;

pub use memory::*;
pub use pool::*;

use crate::{RegistryCenterType, Result};
use core::fmt;
use std::sync::Arc;

/// Version token of a registry node, as reported by the backend.
///
/// Opaque to callers: its only use is to be handed back unchanged to
/// [`RegistryCenter::compare_and_swap`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version(pub i64);

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A node read from the registry: its stored value and the version it had at
/// read time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryNode {
    pub value: String,
    pub version: Version,
}

/// The coordination primitives required by the segment store.
///
/// Implementations must be linearizable: a successful
/// [`compare_and_swap`](Self::compare_and_swap) is the point at which a new
/// segment boundary becomes visible to every other session.
pub trait RegistryCenter: Send + Sync {
    /// Reads a node's value and current version.
    ///
    /// # Errors
    ///
    /// [`Error::NodeNotFound`] if the node does not exist;
    /// [`Error::RegistryUnavailable`] on session failure.
    ///
    /// [`Error::NodeNotFound`]: crate::Error::NodeNotFound
    /// [`Error::RegistryUnavailable`]: crate::Error::RegistryUnavailable
    fn get(&self, path: &str) -> Result<RegistryNode>;

    /// Creates a node with `value` if it does not exist. Idempotent: an
    /// existing node is left untouched and reported as success.
    fn create_if_absent(&self, path: &str, value: &str) -> Result<()>;

    /// Writes `value` only if the node's version still equals `expected`.
    ///
    /// Returns `Ok(true)` on success and `Ok(false)` when another writer has
    /// advanced the version since it was read. A conflict is a retry signal,
    /// not an error.
    fn compare_and_swap(&self, path: &str, expected: Version, value: &str) -> Result<bool>;
}

/// Everything needed to establish one backend session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectSpec {
    pub center_type: RegistryCenterType,
    pub server_list: String,
    /// `username:password` credential, or `None` for anonymous access.
    pub digest: Option<String>,
}

/// Factory for backend sessions; the seam where a concrete coordination
/// client plugs in.
///
/// The [`SessionPool`] calls this at most once per server list and caches the
/// result, so implementations need not do their own pooling.
pub trait RegistryConnector: Send + Sync {
    /// Establishes a session to the backend described by `spec`.
    ///
    /// # Errors
    ///
    /// [`Error::RegistryUnavailable`] if the backend cannot be reached.
    ///
    /// [`Error::RegistryUnavailable`]: crate::Error::RegistryUnavailable
    fn connect(&self, spec: &ConnectSpec) -> Result<Arc<dyn RegistryCenter>>;
}

/// Shared connectors connect through the inner value, so several pools can
/// hand sessions out of one backend (e.g. many "processes" against one
/// embedded namespace).
impl<C: RegistryConnector + ?Sized> RegistryConnector for Arc<C> {
    fn connect(&self, spec: &ConnectSpec) -> Result<Arc<dyn RegistryCenter>> {
        (**self).connect(spec)
    }
}
