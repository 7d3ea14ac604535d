//! Per-collection CRDT state.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::appstate::lthash::{self, HASH_LEN};
use crate::binary::Node;
use crate::proto::sync::SyncdOperation;

/// The five synchronized collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    CriticalBlock,
    CriticalUnblockLow,
    RegularHigh,
    RegularLow,
    Regular,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::CriticalBlock,
        Collection::CriticalUnblockLow,
        Collection::RegularHigh,
        Collection::RegularLow,
        Collection::Regular,
    ];

    pub fn wire_name(&self) -> &'static str {
        match self {
            Collection::CriticalBlock => "critical_block",
            Collection::CriticalUnblockLow => "critical_unblock_low",
            Collection::RegularHigh => "regular_high",
            Collection::RegularLow => "regular_low",
            Collection::Regular => "regular",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical_block" => Ok(Collection::CriticalBlock),
            "critical_unblock_low" => Ok(Collection::CriticalUnblockLow),
            "regular_high" => Ok(Collection::RegularHigh),
            "regular_low" => Ok(Collection::RegularLow),
            "regular" => Ok(Collection::Regular),
            other => Err(format!("unknown collection {other:?}")),
        }
    }
}

/// Snapshot of one collection: version, LTHash digest and the
/// authoritative `index_mac -> value_mac` mutation set.
#[derive(Debug, Clone, PartialEq)]
pub struct HashState {
    pub collection: Collection,
    pub version: u64,
    pub hash: [u8; HASH_LEN],
    pub index_value_map: HashMap<Vec<u8>, Vec<u8>>,
}

impl HashState {
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            version: 0,
            hash: [0u8; HASH_LEN],
            index_value_map: HashMap::new(),
        }
    }

    /// The `<collection>` node requesting this collection from `version`,
    /// asking for a snapshot only when nothing is held locally.
    pub fn to_collection_node(&self) -> Node {
        Node::new("collection")
            .attr("name", self.collection.wire_name())
            .attr("version", self.version)
            .attr("return_snapshot", self.version == 0)
    }

    /// Applies one mutation to the digest and the index map.
    ///
    /// SET overwrites the index entry, first subtracting the value it
    /// replaces; REMOVE subtracts the previous entry and deletes it.
    pub fn apply(&mut self, op: SyncdOperation, index_mac: &[u8], value_mac: &[u8]) {
        match op {
            SyncdOperation::Set => {
                if let Some(previous) = self.index_value_map.get(index_mac) {
                    let mut input = index_mac.to_vec();
                    input.extend_from_slice(previous);
                    lthash::sub(&mut self.hash, &input);
                }
                let mut input = index_mac.to_vec();
                input.extend_from_slice(value_mac);
                lthash::add(&mut self.hash, &input);
                self.index_value_map
                    .insert(index_mac.to_vec(), value_mac.to_vec());
            }
            SyncdOperation::Remove => {
                if let Some(previous) = self.index_value_map.remove(index_mac) {
                    let mut input = index_mac.to_vec();
                    input.extend_from_slice(&previous);
                    lthash::sub(&mut self.hash, &input);
                }
            }
        }
    }
}
