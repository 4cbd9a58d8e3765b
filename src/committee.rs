//! Committee membership and the FastPay quorum rule.

use serde::{Deserialize, Serialize};

use crate::types::{Address, NodeId};

/// The fixed set of authorities for the current epoch.
///
/// Membership is read-shared across workers; changing it is an
/// administrative action outside the node's own protocol surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Committee {
    members: Vec<Address>,
}

impl Committee {
    pub fn new(members: Vec<Address>) -> Self {
        Committee { members }
    }

    pub fn members(&self) -> &[Address] {
        &self.members
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.members.iter().any(|member| member.node_id == node_id)
    }

    pub fn member(&self, node_id: &str) -> Option<&Address> {
        self.members.iter().find(|member| member.node_id == node_id)
    }

    pub fn member_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.members.iter().map(|member| &member.node_id)
    }

    /// Signatures needed for finality: `floor(n * 2/3) + 1`.
    pub fn quorum_threshold(&self) -> usize {
        quorum_threshold(self.size())
    }
}

/// `floor(n * 2/3) + 1`: more than two thirds of `n` authorities.
pub fn quorum_threshold(committee_size: usize) -> usize {
    committee_size * 2 / 3 + 1
}
