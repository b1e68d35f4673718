//! Staged set operations applied atomically on commit.
//!
//! A [`Transaction`] only records what should happen. Nothing reaches the
//! kernel until a [`Connection`](crate::core::backend::Connection) commits
//! it; dropping it discards every staged operation.

use crate::core::ruleset::{Set, key_to_ip};
use serde_json::{Value, json};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Create the set if it does not exist
    AddSet(Set),
    AddElement { set: Set, key: Vec<u8> },
    DeleteElement { set: Set, key: Vec<u8> },
    FlushSet(Set),
}

impl Op {
    pub fn set(&self) -> &Set {
        match self {
            Op::AddSet(set) | Op::FlushSet(set) => set,
            Op::AddElement { set, .. } | Op::DeleteElement { set, .. } => set,
        }
    }
}

/// Why an operation could not be staged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
    #[error("set {set} holds {key_type}, not {len}-byte addresses")]
    KeyWidthMismatch {
        set: String,
        key_type: String,
        len: usize,
    },

    #[error("set {set} has non-address element type {key_type}")]
    NotAnAddressSet { set: String, key_type: String },
}

#[derive(Debug, Default)]
pub struct Transaction {
    ops: Vec<Op>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn stage_add_set(&mut self, set: &Set) {
        self.ops.push(Op::AddSet(set.clone()));
    }

    pub fn stage_add_element(&mut self, set: &Set, key: &[u8]) -> Result<(), StageError> {
        check_key(set, key)?;
        self.ops.push(Op::AddElement {
            set: set.clone(),
            key: key.to_vec(),
        });
        Ok(())
    }

    pub fn stage_delete_element(&mut self, set: &Set, key: &[u8]) -> Result<(), StageError> {
        check_key(set, key)?;
        self.ops.push(Op::DeleteElement {
            set: set.clone(),
            key: key.to_vec(),
        });
        Ok(())
    }

    pub fn stage_flush_set(&mut self, set: &Set) {
        self.ops.push(Op::FlushSet(set.clone()));
    }

    /// Renders the batch in nftables JSON, in staging order.
    pub fn to_nftables_json(&self) -> Value {
        let mut nft_cmds = Vec::with_capacity(self.ops.len() + 1);
        nft_cmds.push(json!({ "metainfo": { "json_schema_version": 1 } }));

        for op in &self.ops {
            nft_cmds.push(match op {
                Op::AddSet(set) => json!({ "add": { "set": {
                    "family": set.table.family.as_ref(),
                    "table": set.table.name,
                    "name": set.name,
                    "type": set.key_type.as_str(),
                } } }),
                Op::AddElement { set, key } => {
                    json!({ "add": { "element": element_obj(set, key) } })
                }
                Op::DeleteElement { set, key } => {
                    json!({ "delete": { "element": element_obj(set, key) } })
                }
                Op::FlushSet(set) => json!({ "flush": { "set": {
                    "family": set.table.family.as_ref(),
                    "table": set.table.name,
                    "name": set.name,
                } } }),
            });
        }

        json!({ "nftables": nft_cmds })
    }
}

fn element_obj(set: &Set, key: &[u8]) -> Value {
    // Keys are width-checked at staging time, so they always render
    let elem = key_to_ip(key).map(|ip| ip.to_string()).unwrap_or_default();
    json!({
        "family": set.table.family.as_ref(),
        "table": set.table.name,
        "name": set.name,
        "elem": [elem],
    })
}

fn check_key(set: &Set, key: &[u8]) -> Result<(), StageError> {
    match set.key_type.key_len() {
        Some(len) if len == key.len() => Ok(()),
        Some(_) => Err(StageError::KeyWidthMismatch {
            set: set.name.clone(),
            key_type: set.key_type.to_string(),
            len: key.len(),
        }),
        None => Err(StageError::NotAnAddressSet {
            set: set.name.clone(),
            key_type: set.key_type.to_string(),
        }),
    }
}
