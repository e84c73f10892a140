//! Session pooling keyed by server list.
//!
//! A coordination-service connection carries an identity: once a session to a
//! server list has been authenticated under one digest, it cannot be
//! transparently reused under another. The pool enforces this by recording
//! the digest a session was established with and rejecting any later request
//! for the same server list under a different one.
//!
//! Pools are explicit values rather than process globals, so tests (and
//! embedders) can construct isolated pools at will.

use crate::{
    ConnectSpec, Error, MemoryConnector, RegistryCenter, RegistryCenterType, RegistryConnector,
    Result,
};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

struct PooledSession {
    digest: Option<String>,
    session: Arc<dyn RegistryCenter>,
}

/// Cache of backend sessions, one per server list.
///
/// # Example
///
/// ```
/// use segkey::{MemoryConnector, RegistryCenterType, SessionPool};
///
/// let pool = SessionPool::new(MemoryConnector::new());
/// let session = pool
///     .session(RegistryCenterType::Memory, "127.0.0.1:2181", None)
///     .unwrap();
/// session.create_if_absent("/leaf_segment/orders", "0").unwrap();
/// ```
pub struct SessionPool {
    connector: Box<dyn RegistryConnector>,
    sessions: Mutex<HashMap<String, PooledSession>>,
    leaf_keys: Mutex<HashSet<(String, String)>>,
}

impl SessionPool {
    /// Creates a pool that establishes sessions through `connector`.
    pub fn new(connector: impl RegistryConnector + 'static) -> Self {
        Self {
            connector: Box::new(connector),
            sessions: Mutex::new(HashMap::new()),
            leaf_keys: Mutex::new(HashSet::new()),
        }
    }

    /// Creates a pool over the embedded in-process backend.
    pub fn in_memory() -> Self {
        Self::new(MemoryConnector::new())
    }

    /// Returns the session for `server_list`, connecting on first use.
    ///
    /// The session is shared at server-list granularity: every caller using
    /// the same server list and digest gets the same underlying session.
    ///
    /// # Errors
    ///
    /// - [`Error::AuthenticationConflict`] if a session for `server_list`
    ///   already exists under a different digest (anonymous counts as an
    ///   identity of its own).
    /// - [`Error::RegistryUnavailable`] if connecting fails.
    pub fn session(
        &self,
        center_type: RegistryCenterType,
        server_list: &str,
        digest: Option<&str>,
    ) -> Result<Arc<dyn RegistryCenter>> {
        if let Some(session) = self.lookup(server_list, digest)? {
            return Ok(session);
        }

        // Connect outside the lock: a slow first connection to one server
        // list must not stall lookups for unrelated ones.
        let spec = ConnectSpec {
            center_type,
            server_list: server_list.to_owned(),
            digest: digest.map(str::to_owned),
        };
        let session = self.connector.connect(&spec)?;
        debug!(server_list, authenticated = digest.is_some(), "session established");

        let mut sessions = self.sessions.lock();
        match sessions.entry(server_list.to_owned()) {
            Entry::Occupied(entry) => {
                // Lost the connect race; adopt the winner if identities match.
                let pooled = entry.get();
                if pooled.digest.as_deref() != digest {
                    warn!(server_list, "digest mismatch against pooled session");
                    return Err(Error::AuthenticationConflict {
                        server_list: server_list.to_owned(),
                    });
                }
                Ok(Arc::clone(&pooled.session))
            }
            Entry::Vacant(slot) => {
                slot.insert(PooledSession {
                    digest: spec.digest,
                    session: Arc::clone(&session),
                });
                Ok(session)
            }
        }
    }

    fn lookup(
        &self,
        server_list: &str,
        digest: Option<&str>,
    ) -> Result<Option<Arc<dyn RegistryCenter>>> {
        let sessions = self.sessions.lock();
        match sessions.get(server_list) {
            Some(pooled) if pooled.digest.as_deref() == digest => {
                Ok(Some(Arc::clone(&pooled.session)))
            }
            Some(_) => {
                warn!(server_list, "digest mismatch against pooled session");
                Err(Error::AuthenticationConflict {
                    server_list: server_list.to_owned(),
                })
            }
            None => Ok(None),
        }
    }

    /// Records that a generator dispensing `leaf_key` has been prepared
    /// against `server_list`.
    ///
    /// Two generator instances for the same leaf key within one process do
    /// not coordinate their local segments; that is still unique but wastes
    /// leases and weakens ordering, so preparing a leaf key a second time
    /// (including after reconfiguring the same generator) logs a warning.
    pub fn note_leaf_key(&self, server_list: &str, leaf_key: &str) {
        let mut keys = self.leaf_keys.lock();
        if !keys.insert((server_list.to_owned(), leaf_key.to_owned())) {
            warn!(
                server_list,
                leaf_key, "leaf key prepared more than once; local segments will not coordinate"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryConnector, RegistryCenterType};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn same_digest_reuses_the_session() {
        let pool = SessionPool::new(MemoryConnector::new());
        let a = pool
            .session(RegistryCenterType::Memory, "127.0.0.1:2181", Some("u:p"))
            .unwrap();
        let b = pool
            .session(RegistryCenterType::Memory, "127.0.0.1:2181", Some("u:p"))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn different_digest_conflicts() {
        let pool = SessionPool::new(MemoryConnector::new());
        pool.session(RegistryCenterType::Memory, "127.0.0.1:2181", Some("user1:1231"))
            .unwrap();
        let Err(err) =
            pool.session(RegistryCenterType::Memory, "127.0.0.1:2181", Some("user1:12"))
        else {
            panic!("expected a credential conflict");
        };
        assert_eq!(
            err,
            Error::AuthenticationConflict {
                server_list: "127.0.0.1:2181".to_owned()
            }
        );
    }

    #[test]
    fn anonymous_and_authenticated_conflict() {
        let pool = SessionPool::new(MemoryConnector::new());
        pool.session(RegistryCenterType::Memory, "127.0.0.1:2181", None)
            .unwrap();
        let Err(err) = pool.session(RegistryCenterType::Memory, "127.0.0.1:2181", Some("u:p"))
        else {
            panic!("expected a credential conflict");
        };
        assert!(matches!(err, Error::AuthenticationConflict { .. }));
    }

    /// Connector whose connect to the slow server list parks until released.
    struct GatedConnector {
        inner: MemoryConnector,
        started: Arc<AtomicBool>,
        release: Arc<AtomicBool>,
    }

    impl RegistryConnector for GatedConnector {
        fn connect(&self, spec: &ConnectSpec) -> Result<Arc<dyn RegistryCenter>> {
            if spec.server_list == "slow:2181" {
                self.started.store(true, Ordering::SeqCst);
                while !self.release.load(Ordering::SeqCst) {
                    thread::yield_now();
                }
            }
            self.inner.connect(spec)
        }
    }

    #[test]
    fn slow_connect_does_not_block_other_server_lists() {
        let started = Arc::new(AtomicBool::new(false));
        let release = Arc::new(AtomicBool::new(false));
        let pool = Arc::new(SessionPool::new(GatedConnector {
            inner: MemoryConnector::new(),
            started: Arc::clone(&started),
            release: Arc::clone(&release),
        }));

        let slow = thread::spawn({
            let pool = Arc::clone(&pool);
            move || {
                pool.session(RegistryCenterType::Memory, "slow:2181", None)
                    .map(|_| ())
            }
        });
        while !started.load(Ordering::SeqCst) {
            thread::yield_now();
        }

        // The slow connection is still in flight; an unrelated server list
        // must get its session without waiting for it.
        pool.session(RegistryCenterType::Memory, "fast:2181", None)
            .map(|_| ())
            .unwrap();

        release.store(true, Ordering::SeqCst);
        slow.join().unwrap().unwrap();
    }

    #[test]
    fn distinct_server_lists_get_distinct_sessions() {
        let pool = SessionPool::new(MemoryConnector::new());
        let a = pool
            .session(RegistryCenterType::Memory, "127.0.0.1:2181", None)
            .unwrap();
        let b = pool
            .session(RegistryCenterType::Memory, "127.0.0.1:2182", Some("u:p"))
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
