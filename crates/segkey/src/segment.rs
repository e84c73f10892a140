//! Segment leasing against the registry.
//!
//! A segment is a contiguous range of keys `[first, last]` leased from the
//! registry node that holds a leaf key's high-water mark. The node only ever
//! advances through compare-and-swap, so two stores racing to refill the same
//! leaf key can never both be granted overlapping ranges: at most one CAS per
//! observed version succeeds, and the loser re-reads and proposes again.

use crate::{Error, RegistryCenter, Result};
use std::sync::Arc;
use tracing::{debug, trace};

/// Registry directory under which one node per leaf key is kept.
const NODE_PREFIX: &str = "/leaf_segment";

/// A leased, inclusive range of keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    first: i64,
    last: i64,
}

impl Segment {
    /// First key of the lease.
    pub fn first(&self) -> i64 {
        self.first
    }

    /// Last key of the lease (inclusive).
    pub fn last(&self) -> i64 {
        self.last
    }

    /// Number of keys in the lease.
    pub fn len(&self) -> u64 {
        self.last.abs_diff(self.first) + 1
    }

    /// Always `false`: a lease contains at least one key.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Advances a leaf key's registry node and turns each advance into a
/// [`Segment`] lease.
///
/// One store exists per generator instance; the session behind it may be
/// shared with any number of other stores.
pub struct SegmentStore {
    session: Arc<dyn RegistryCenter>,
    path: String,
    leaf_key: String,
    seed: i64,
    step: i64,
    retry_bound: u32,
}

impl SegmentStore {
    /// CAS attempts per refill before giving up with
    /// [`Error::ContentionExceeded`].
    pub const DEFAULT_CAS_RETRIES: u32 = 64;

    /// Creates a store for `leaf_key`.
    ///
    /// The registry node is seeded at `initial_value - 1` on first creation,
    /// so the first leased segment begins exactly at `initial_value`.
    pub fn new(
        session: Arc<dyn RegistryCenter>,
        leaf_key: impl Into<String>,
        initial_value: i64,
        step: i64,
    ) -> Self {
        let leaf_key = leaf_key.into();
        Self {
            session,
            path: format!("{NODE_PREFIX}/{leaf_key}"),
            leaf_key,
            seed: initial_value - 1,
            step,
            retry_bound: Self::DEFAULT_CAS_RETRIES,
        }
    }

    /// Overrides the CAS retry bound.
    pub fn with_retry_bound(mut self, retry_bound: u32) -> Self {
        self.retry_bound = retry_bound;
        self
    }

    /// Registry path of this leaf key's node.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Leases the next segment for this leaf key.
    ///
    /// # Errors
    ///
    /// - [`Error::RangeExhausted`] if advancing the counter would overflow.
    /// - [`Error::ContentionExceeded`] if concurrent writers win every CAS
    ///   attempt within the retry bound.
    /// - [`Error::RegistryUnavailable`] on backend failure or a corrupt
    ///   counter node.
    pub fn lease_next_segment(&self) -> Result<Segment> {
        self.session
            .create_if_absent(&self.path, &self.seed.to_string())?;

        for attempt in 0..self.retry_bound {
            let node = self.session.get(&self.path)?;
            let current = parse_counter(&self.path, &node.value)?;
            let proposed = current
                .checked_add(self.step)
                .filter(|p| *p != i64::MAX)
                .ok_or_else(|| Error::RangeExhausted {
                    leaf_key: self.leaf_key.clone(),
                })?;

            if self
                .session
                .compare_and_swap(&self.path, node.version, &proposed.to_string())?
            {
                let segment = Segment {
                    first: current + 1,
                    last: proposed,
                };
                debug!(
                    leaf_key = %self.leaf_key,
                    first = segment.first,
                    last = segment.last,
                    "leased segment"
                );
                return Ok(segment);
            }
            trace!(leaf_key = %self.leaf_key, attempt, "refill lost CAS race");
        }

        Err(Error::ContentionExceeded {
            retries: self.retry_bound,
        })
    }
}

fn parse_counter(path: &str, raw: &str) -> Result<i64> {
    raw.parse().map_err(|_| Error::RegistryUnavailable {
        context: format!("node '{path}' holds a malformed counter: '{raw}'"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ConnectSpec, MemoryConnector, RegistryCenterType, RegistryConnector, RegistryNode, Version,
    };
    use std::sync::atomic::{AtomicBool, Ordering};

    fn memory_session() -> Arc<dyn RegistryCenter> {
        MemoryConnector::new()
            .connect(&ConnectSpec {
                center_type: RegistryCenterType::Memory,
                server_list: "127.0.0.1:2181".to_owned(),
                digest: None,
            })
            .unwrap()
    }

    #[test]
    fn first_lease_starts_at_initial_value() {
        let store = SegmentStore::new(memory_session(), "orders", 100001, 3);
        let segment = store.lease_next_segment().unwrap();
        assert_eq!(segment.first(), 100001);
        assert_eq!(segment.last(), 100003);
        assert_eq!(segment.len(), 3);
    }

    #[test]
    fn consecutive_leases_are_adjacent() {
        let store = SegmentStore::new(memory_session(), "orders", 0, 10);
        let a = store.lease_next_segment().unwrap();
        let b = store.lease_next_segment().unwrap();
        assert_eq!(a.first(), 0);
        assert_eq!(a.last(), 9);
        assert_eq!(b.first(), 10);
        assert_eq!(b.last(), 19);
    }

    #[test]
    fn competing_stores_never_overlap() {
        let session = memory_session();
        let a = SegmentStore::new(Arc::clone(&session), "orders", 0, 5);
        let b = SegmentStore::new(session, "orders", 0, 5);

        let sa = a.lease_next_segment().unwrap();
        let sb = b.lease_next_segment().unwrap();
        assert!(sa.last() < sb.first() || sb.last() < sa.first());
    }

    #[test]
    fn overflow_is_range_exhausted() {
        let session = memory_session();
        session
            .create_if_absent("/leaf_segment/orders", &(i64::MAX - 1).to_string())
            .unwrap();
        let store = SegmentStore::new(session, "orders", 0, 2);
        let err = store.lease_next_segment().unwrap_err();
        assert_eq!(
            err,
            Error::RangeExhausted {
                leaf_key: "orders".to_owned()
            }
        );
    }

    #[test]
    fn proposal_landing_exactly_on_max_is_rejected() {
        let session = memory_session();
        session
            .create_if_absent("/leaf_segment/orders", &(i64::MAX - 1).to_string())
            .unwrap();
        let store = SegmentStore::new(session, "orders", 0, 1);
        assert!(matches!(
            store.lease_next_segment().unwrap_err(),
            Error::RangeExhausted { .. }
        ));
    }

    /// Registry whose version moves under every reader, so CAS never wins.
    struct AlwaysConflicting;

    impl RegistryCenter for AlwaysConflicting {
        fn get(&self, _path: &str) -> Result<RegistryNode> {
            Ok(RegistryNode {
                value: "0".to_owned(),
                version: Version(0),
            })
        }

        fn create_if_absent(&self, _path: &str, _value: &str) -> Result<()> {
            Ok(())
        }

        fn compare_and_swap(&self, _path: &str, _expected: Version, _value: &str) -> Result<bool> {
            Ok(false)
        }
    }

    /// Registry that lets a "concurrent writer" advance the counter right
    /// before the store's first CAS, so the stale version loses exactly once.
    struct ContendedOnce {
        inner: Arc<dyn RegistryCenter>,
        contended: AtomicBool,
        writer_value: i64,
    }

    impl RegistryCenter for ContendedOnce {
        fn get(&self, path: &str) -> Result<RegistryNode> {
            self.inner.get(path)
        }

        fn create_if_absent(&self, path: &str, value: &str) -> Result<()> {
            self.inner.create_if_absent(path, value)
        }

        fn compare_and_swap(&self, path: &str, expected: Version, value: &str) -> Result<bool> {
            if !self.contended.swap(true, Ordering::SeqCst) {
                let node = self.inner.get(path)?;
                self.inner
                    .compare_and_swap(path, node.version, &self.writer_value.to_string())?;
            }
            self.inner.compare_and_swap(path, expected, value)
        }
    }

    #[test]
    fn lost_cas_is_retried_from_the_writers_value() {
        let store = SegmentStore::new(
            Arc::new(ContendedOnce {
                inner: memory_session(),
                contended: AtomicBool::new(false),
                writer_value: 50,
            }),
            "orders",
            0,
            5,
        );

        // First attempt reads the seed, loses the CAS to the writer, then
        // re-reads and leases the range just past the writer's value.
        let segment = store.lease_next_segment().unwrap();
        assert_eq!(segment.first(), 51);
        assert_eq!(segment.last(), 55);
    }

    #[test]
    fn retry_bound_surfaces_contention() {
        let store = SegmentStore::new(Arc::new(AlwaysConflicting), "orders", 0, 1)
            .with_retry_bound(4);
        let err = store.lease_next_segment().unwrap_err();
        assert_eq!(err, Error::ContentionExceeded { retries: 4 });
    }

    #[test]
    fn malformed_counter_is_a_registry_failure() {
        let session = memory_session();
        session
            .create_if_absent("/leaf_segment/orders", "not-a-number")
            .unwrap();
        let store = SegmentStore::new(session, "orders", 0, 1);
        assert!(matches!(
            store.lease_next_segment().unwrap_err(),
            Error::RegistryUnavailable { .. }
        ));
    }
}
