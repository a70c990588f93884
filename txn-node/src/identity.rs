//! Node identity assigned by the `init` handshake.

use std::collections::BTreeSet;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub node_id: String,
    pub node_ids: BTreeSet<String>,
}

impl NodeIdentity {
    pub fn new(node_id: impl Into<String>, node_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            node_id: node_id.into(),
            node_ids: node_ids.into_iter().collect(),
        }
    }

    /// Every other node in the cluster.
    pub fn peers(&self) -> impl Iterator<Item = &str> {
        self.node_ids
            .iter()
            .map(String::as_str)
            .filter(move |id| *id != self.node_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// First `init`; identity is now set.
    Initialized,
    /// Same identity as before; nothing changed.
    Repeated,
    /// A different identity than the stored one, which is kept.
    Conflicting,
}

/// Write-once holder for this node's identity.
#[derive(Debug, Default)]
pub struct Topology {
    identity: OnceLock<NodeIdentity>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(&self, identity: NodeIdentity) -> InitOutcome {
        match self.identity.set(identity) {
            Ok(()) => InitOutcome::Initialized,
            Err(rejected) if self.identity.get() == Some(&rejected) => InitOutcome::Repeated,
            Err(_) => InitOutcome::Conflicting,
        }
    }

    pub fn identity(&self) -> Option<&NodeIdentity> {
        self.identity.get()
    }

    pub fn node_id(&self) -> Option<&str> {
        self.identity().map(|identity| identity.node_id.as_str())
    }

    pub fn is_initialized(&self) -> bool {
        self.identity.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: &str) -> NodeIdentity {
        NodeIdentity::new(id, ["n1", "n2", "n3"].map(String::from))
    }

    #[test]
    fn starts_uninitialized() {
        let topology = Topology::new();
        assert!(!topology.is_initialized());
        assert_eq!(topology.node_id(), None);
    }

    #[test]
    fn repeated_init_is_idempotent() {
        let topology = Topology::new();
        assert_eq!(topology.init(identity("n1")), InitOutcome::Initialized);
        assert_eq!(topology.init(identity("n1")), InitOutcome::Repeated);
        assert_eq!(topology.identity(), Some(&identity("n1")));
    }

    #[test]
    fn conflicting_init_keeps_first_identity() {
        let topology = Topology::new();
        topology.init(identity("n1"));
        assert_eq!(topology.init(identity("n2")), InitOutcome::Conflicting);
        assert_eq!(topology.node_id(), Some("n1"));
    }

    #[test]
    fn peers_exclude_self() {
        let binding = identity("n2");
        let peers: Vec<&str> = binding.peers().collect();
        assert_eq!(peers, vec!["n1", "n3"]);
    }
}
