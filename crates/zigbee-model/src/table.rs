//! Arena of nodes keyed by IEEE address.

use std::collections::HashMap;

use crate::{IeeeAddress, InitState, Node, ShortAddress};

/// Outcome of recording a node's current network address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressChange {
    /// The node already had this address.
    Unchanged,
    /// The node moved from `old` to the new address.
    Reassigned { old: ShortAddress },
    /// No node with this IEEE address is stored.
    UnknownNode,
}

/// All nodes of a network.
///
/// Nodes are owned by value and looked up by IEEE address; a secondary index
/// maps network addresses to IEEE addresses.
#[derive(Debug, Default)]
pub struct NodeTable {
    nodes: HashMap<IeeeAddress, Node>,
    by_short: HashMap<ShortAddress, IeeeAddress>,
}

impl NodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node. Returns the previous node with the same IEEE address.
    pub fn insert(&mut self, node: Node) -> Option<Node> {
        let ieee = node.ieee();
        let previous = self.nodes.remove(&ieee);
        if let Some(prev) = &previous {
            if self.by_short.get(&prev.short()) == Some(&ieee) {
                self.by_short.remove(&prev.short());
            }
        }
        self.by_short.insert(node.short(), ieee);
        self.nodes.insert(ieee, node);
        previous
    }

    /// Remove a node.
    pub fn remove(&mut self, ieee: IeeeAddress) -> Option<Node> {
        let node = self.nodes.remove(&ieee)?;
        if self.by_short.get(&node.short()) == Some(&ieee) {
            self.by_short.remove(&node.short());
        }
        Some(node)
    }

    pub fn get(&self, ieee: IeeeAddress) -> Option<&Node> {
        self.nodes.get(&ieee)
    }

    pub fn get_mut(&mut self, ieee: IeeeAddress) -> Option<&mut Node> {
        self.nodes.get_mut(&ieee)
    }

    /// Look up a node by network address.
    pub fn by_short(&self, short: ShortAddress) -> Option<&Node> {
        self.by_short.get(&short).and_then(|ieee| self.nodes.get(ieee))
    }

    /// Look up a node by network address, mutably.
    pub fn by_short_mut(&mut self, short: ShortAddress) -> Option<&mut Node> {
        let ieee = *self.by_short.get(&short)?;
        self.nodes.get_mut(&ieee)
    }

    /// Resolve a network address to an IEEE address.
    pub fn ieee_of(&self, short: ShortAddress) -> Option<IeeeAddress> {
        self.by_short.get(&short).copied()
    }

    pub fn contains(&self, ieee: IeeeAddress) -> bool {
        self.nodes.contains_key(&ieee)
    }

    /// Record a node's new network address and move the secondary index.
    ///
    /// Any other node indexed at `short` loses that index entry; its stored
    /// address is left as is until it announces again.
    pub fn reassign_short(&mut self, ieee: IeeeAddress, short: ShortAddress) -> AddressChange {
        let Some(node) = self.nodes.get_mut(&ieee) else {
            return AddressChange::UnknownNode;
        };
        let old = node.short();
        if old == short {
            return AddressChange::Unchanged;
        }
        node.set_short(short);
        if self.by_short.get(&old) == Some(&ieee) {
            self.by_short.remove(&old);
        }
        self.by_short.insert(short, ieee);
        AddressChange::Reassigned { old }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Iterate over fully discovered nodes.
    pub fn initialized(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|n| n.state == InitState::Initialized)
    }
}
