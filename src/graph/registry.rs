//! Arena mapping node identities to built artifacts.

use super::node::NodeId;
use super::GraphError;

/// Single-assignment storage for the artifact built for each node.
///
/// One slot per declared node. Created fresh for every build call.
#[derive(Clone, Debug)]
pub struct Registry<A> {
    slots: Vec<Option<A>>,
}

impl<A> Registry<A> {
    pub fn with_capacity(nodes: usize) -> Self {
        Self {
            slots: (0..nodes).map(|_| None).collect(),
        }
    }

    /// Store the artifact for `node`. Writing a slot twice is an error.
    pub fn insert(&mut self, node: NodeId, artifact: A) -> Result<(), GraphError> {
        let slot = self
            .slots
            .get_mut(node.index())
            .ok_or(GraphError::UnknownNode { node })?;
        if slot.is_some() {
            return Err(GraphError::AlreadyAssigned { node });
        }
        *slot = Some(artifact);
        Ok(())
    }

    pub fn get(&self, node: NodeId) -> Result<&A, GraphError> {
        match self.slots.get(node.index()) {
            Some(Some(artifact)) => Ok(artifact),
            Some(None) => Err(GraphError::Unresolved { node }),
            None => Err(GraphError::UnknownNode { node }),
        }
    }

    pub fn contains(&self, node: NodeId) -> bool {
        matches!(self.slots.get(node.index()), Some(Some(_)))
    }

    /// Number of nodes with an artifact.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every declared node has its artifact.
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(|s| s.is_some())
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &A)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|a| (NodeId(i as u32), a)))
    }
}
