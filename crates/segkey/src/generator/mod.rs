//! The leaf-segment key generator.
//!
//! [`LeafSegmentGenerator`] dispenses unique, monotonically increasing 64-bit
//! keys for one leaf key. Keys are taken from a locally leased segment with a
//! lock-free compare-and-take, so the steady-state path never blocks; only
//! when the segment runs out does a single caller contact the registry for
//! the next lease while the rest wait on it.


use crate::{GeneratorConfig, GeneratorProperties, Result, SegmentStore, SessionPool};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

/// A generator of unique, per-leaf-key monotonic 64-bit keys.
///
/// Configuration is supplied as string properties and validated lazily on the
/// first [`generate_key`](Self::generate_key) call; until then the generator
/// performs no registry I/O. Reconfiguring via
/// [`set_properties`](Self::set_properties) discards the prepared state and
/// triggers re-validation on the next call.
///
/// The generator is safe to share across threads behind an `Arc`; concurrent
/// callers never receive duplicate keys.
///
/// Do not construct two generators for the same leaf key within one process:
/// both would refill from the same registry node without coordinating their
/// local segments. Uniqueness still holds, but segments are wasted and
/// per-instance monotonicity no longer implies process-wide monotonicity.
/// The session pool logs a warning when it detects this.
///
/// # Example
///
/// ```
/// use segkey::{
///     LeafSegmentGenerator, GeneratorProperties, SessionPool,
///     PROP_LEAF_KEY, PROP_REGISTRY_CENTER_TYPE, PROP_SERVER_LIST,
/// };
/// use std::sync::Arc;
///
/// let pool = Arc::new(SessionPool::in_memory());
/// let generator = LeafSegmentGenerator::new(pool);
///
/// let mut props = GeneratorProperties::new();
/// props.set(PROP_SERVER_LIST, "127.0.0.1:2181");
/// props.set(PROP_LEAF_KEY, "order_id");
/// props.set(PROP_REGISTRY_CENTER_TYPE, "memory");
/// generator.set_properties(props);
///
/// assert_eq!(generator.generate_key().unwrap(), 0);
/// assert_eq!(generator.generate_key().unwrap(), 1);
/// ```
pub struct LeafSegmentGenerator {
    pool: Arc<SessionPool>,
    props: Mutex<GeneratorProperties>,
    prepared: Mutex<Option<Arc<Dispenser>>>,
}

impl LeafSegmentGenerator {
    /// Creates a generator that establishes its backend session through
    /// `pool`.
    ///
    /// Generators sharing a pool share one session per server list, the way
    /// generator instances within one process share a backend connection.
    pub fn new(pool: Arc<SessionPool>) -> Self {
        Self {
            pool,
            props: Mutex::new(GeneratorProperties::new()),
            prepared: Mutex::new(None),
        }
    }

    /// Creates a generator over its own embedded in-process backend.
    ///
    /// Sessions (and therefore key sequences) are shared only with
    /// generators constructed from the same pool, so this is primarily
    /// useful for tests and single-process deployments.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(SessionPool::in_memory()))
    }

    /// Returns a copy of the currently configured properties.
    pub fn properties(&self) -> GeneratorProperties {
        self.props.lock().clone()
    }

    /// Replaces the configuration.
    ///
    /// Validation does not happen here: it is deferred to the next
    /// [`generate_key`](Self::generate_key) call. Any previously prepared
    /// segment state is discarded; keys already dispensed are never reissued
    /// because the registry node, not the local state, holds the high-water
    /// mark.
    pub fn set_properties(&self, props: GeneratorProperties) {
        let mut prepared = self.prepared.lock();
        *self.props.lock() = props;
        *prepared = None;
    }

    /// Dispenses the next key.
    ///
    /// Either a correctly allocated key is returned or the call fails; no
    /// error produces a stale or default value.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfiguration`] if any property fails validation
    ///   (checked before any registry I/O).
    /// - [`Error::AuthenticationConflict`] if the pooled session for the
    ///   configured server list was established under a different digest.
    /// - [`Error::RegistryUnavailable`] if the backend cannot be reached.
    /// - [`Error::ContentionExceeded`] if a refill loses every CAS attempt;
    ///   retryable.
    /// - [`Error::RangeExhausted`] if the leaf key's counter cannot advance;
    ///   fatal for this leaf key.
    ///
    /// [`Error::InvalidConfiguration`]: crate::Error::InvalidConfiguration
    /// [`Error::AuthenticationConflict`]: crate::Error::AuthenticationConflict
    /// [`Error::RegistryUnavailable`]: crate::Error::RegistryUnavailable
    /// [`Error::ContentionExceeded`]: crate::Error::ContentionExceeded
    /// [`Error::RangeExhausted`]: crate::Error::RangeExhausted
    pub fn generate_key(&self) -> Result<i64> {
        self.dispenser()?.next_key()
    }

    /// Returns the prepared dispenser, validating configuration and
    /// establishing the backend session on first use.
    fn dispenser(&self) -> Result<Arc<Dispenser>> {
        let mut prepared = self.prepared.lock();
        if let Some(dispenser) = prepared.as_ref() {
            return Ok(Arc::clone(dispenser));
        }

        let props = self.props.lock().clone();
        let config = GeneratorConfig::from_properties(&props)?;
        let session = self.pool.session(
            config.center_type(),
            config.server_list(),
            config.digest(),
        )?;
        self.pool
            .note_leaf_key(config.server_list(), config.leaf_key());
        debug!(leaf_key = config.leaf_key(), step = config.step(), "generator prepared");

        let store = SegmentStore::new(
            session,
            config.leaf_key(),
            config.initial_value(),
            config.step(),
        );
        let dispenser = Arc::new(Dispenser::new(store));
        *prepared = Some(Arc::clone(&dispenser));
        Ok(dispenser)
    }
}

/// Thread-safe dispensing state for one leaf key.
///
/// `cursor` is the next key to hand out and `ceiling` the inclusive end of
/// the current lease. The segment is exhausted when `cursor > ceiling`; a
/// fresh dispenser starts exhausted so the first key triggers a lease.
struct Dispenser {
    store: SegmentStore,
    cursor: AtomicI64,
    ceiling: AtomicI64,
    refill: Mutex<()>,
}

impl Dispenser {
    fn new(store: SegmentStore) -> Self {
        Self {
            store,
            cursor: AtomicI64::new(0),
            ceiling: AtomicI64::new(-1),
            refill: Mutex::new(()),
        }
    }

    fn next_key(&self) -> Result<i64> {
        loop {
            // The ceiling must be read before the cursor; see the publication
            // order in the refill below.
            let ceiling = self.ceiling.load(Ordering::Acquire);
            let cursor = self.cursor.load(Ordering::Acquire);

            if cursor <= ceiling {
                if self
                    .cursor
                    .compare_exchange(cursor, cursor + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return Ok(cursor);
                }
                // Lost the take to another thread.
                continue;
            }

            let _refill = self.refill.lock();
            if self.cursor.load(Ordering::Acquire) <= self.ceiling.load(Ordering::Acquire) {
                // Another caller refilled while we waited for the lock.
                continue;
            }

            let segment = self.store.lease_next_segment()?;
            // Publish the cursor before the ceiling: a reader that observes
            // the new ceiling must also observe a cursor inside the lease,
            // never a stale one below it.
            self.cursor.store(segment.first(), Ordering::Release);
            self.ceiling.store(segment.last(), Ordering::Release);
        }
    }
}
