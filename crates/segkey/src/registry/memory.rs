//! Embedded in-process coordination backend.
//!
//! [`MemoryConnector`] keeps one shared namespace per server list, so two
//! pools "connecting" to the same address observe the same nodes. This
//! mirrors how independent generator processes share one coordination
//! ensemble, which makes the connector usable both as a test double and as a
//! single-process deployment backend.

use crate::{ConnectSpec, Error, RegistryCenter, RegistryConnector, RegistryNode, Result, Version};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct Namespace {
    nodes: Mutex<HashMap<String, (String, i64)>>,
}

/// Connector for the embedded backend.
///
/// Cloning the connector (via `Arc`) or connecting twice to the same server
/// list yields sessions over the same node namespace.
#[derive(Default)]
pub struct MemoryConnector {
    namespaces: Mutex<HashMap<String, Arc<Namespace>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegistryConnector for MemoryConnector {
    fn connect(&self, spec: &ConnectSpec) -> Result<Arc<dyn RegistryCenter>> {
        let mut namespaces = self.namespaces.lock();
        let namespace = namespaces
            .entry(spec.server_list.clone())
            .or_default()
            .clone();
        Ok(Arc::new(MemoryRegistry { namespace }))
    }
}

/// One session against an embedded namespace.
///
/// Versioning follows the conventional coordination-service model: nodes are
/// created at version 0 and every successful write bumps the version by one.
pub struct MemoryRegistry {
    namespace: Arc<Namespace>,
}

impl RegistryCenter for MemoryRegistry {
    fn get(&self, path: &str) -> Result<RegistryNode> {
        let nodes = self.namespace.nodes.lock();
        let (value, version) = nodes.get(path).ok_or_else(|| Error::NodeNotFound {
            path: path.to_owned(),
        })?;
        Ok(RegistryNode {
            value: value.clone(),
            version: Version(*version),
        })
    }

    fn create_if_absent(&self, path: &str, value: &str) -> Result<()> {
        let mut nodes = self.namespace.nodes.lock();
        nodes
            .entry(path.to_owned())
            .or_insert_with(|| (value.to_owned(), 0));
        Ok(())
    }

    fn compare_and_swap(&self, path: &str, expected: Version, value: &str) -> Result<bool> {
        let mut nodes = self.namespace.nodes.lock();
        let (stored, version) = nodes.get_mut(path).ok_or_else(|| Error::NodeNotFound {
            path: path.to_owned(),
        })?;
        if *version != expected.0 {
            return Ok(false);
        }
        *stored = value.to_owned();
        *version += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RegistryCenterType;

    fn session(connector: &MemoryConnector, server_list: &str) -> Arc<dyn RegistryCenter> {
        connector
            .connect(&ConnectSpec {
                center_type: RegistryCenterType::Memory,
                server_list: server_list.to_owned(),
                digest: None,
            })
            .unwrap()
    }

    #[test]
    fn get_missing_node_is_not_found() {
        let connector = MemoryConnector::new();
        let session = session(&connector, "127.0.0.1:2181");
        let err = session.get("/leaf_segment/absent").unwrap_err();
        assert!(matches!(err, Error::NodeNotFound { .. }));
    }

    #[test]
    fn create_if_absent_is_idempotent() {
        let connector = MemoryConnector::new();
        let session = session(&connector, "127.0.0.1:2181");
        session.create_if_absent("/n", "5").unwrap();
        session.create_if_absent("/n", "9").unwrap();
        let node = session.get("/n").unwrap();
        assert_eq!(node.value, "5");
        assert_eq!(node.version, Version(0));
    }

    #[test]
    fn cas_succeeds_once_per_version() {
        let connector = MemoryConnector::new();
        let session = session(&connector, "127.0.0.1:2181");
        session.create_if_absent("/n", "0").unwrap();
        let node = session.get("/n").unwrap();

        assert!(session.compare_and_swap("/n", node.version, "10").unwrap());
        // Second writer still holding the stale version loses.
        assert!(!session.compare_and_swap("/n", node.version, "20").unwrap());

        let node = session.get("/n").unwrap();
        assert_eq!(node.value, "10");
        assert_eq!(node.version, Version(1));
    }

    #[test]
    fn same_server_list_shares_a_namespace() {
        let connector = MemoryConnector::new();
        let a = session(&connector, "127.0.0.1:2181");
        let b = session(&connector, "127.0.0.1:2181");
        let other = session(&connector, "127.0.0.1:9999");

        a.create_if_absent("/n", "1").unwrap();
        assert_eq!(b.get("/n").unwrap().value, "1");
        assert!(matches!(
            other.get("/n").unwrap_err(),
            Error::NodeNotFound { .. }
        ));
    }
}
