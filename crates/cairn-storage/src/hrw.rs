// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Highest-random-weight (rendezvous) object placement.
//!
//! Each object belongs to the target with the highest weight
//! `hash(target_id, bucket, object)`. The hash is seeded with a fixed key so every
//! node computes the same owner from the same cluster map, and adding or removing
//! a target only moves the objects that target wins or loses.

use std::hash::{Hash, Hasher};

use cairn_cluster::{ClusterMap, Node};
use cairn_core::Bck;
use siphasher::sip::SipHasher13;

/// Placement hash key, shared by all nodes.
const HRW_HASH_KEY: (u64, u64) = (0x6361_6972_6e2d_6872, 0x772d_706c_6163_6521);

/// Weight of `target_id` for an object.
#[inline]
#[must_use]
pub fn hrw_weight(target_id: &str, bck: &Bck, object: &str) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(HRW_HASH_KEY.0, HRW_HASH_KEY.1);
    target_id.hash(&mut hasher);
    bck.provider.as_str().hash(&mut hasher);
    bck.name.hash(&mut hasher);
    object.hash(&mut hasher);
    hasher.finish()
}

/// The target owning an object, over all targets of the map regardless of
/// liveness. `None` if the map has no targets.
#[must_use]
pub fn hrw_target<'a>(smap: &'a ClusterMap, bck: &Bck, object: &str) -> Option<&'a Node> {
    // Ties are broken by id so the owner never depends on map iteration order.
    smap.tmap()
        .values()
        .max_by_key(|t| (hrw_weight(&t.id, bck, object), std::cmp::Reverse(t.id.as_str())))
}

/// Returns true if `target_id` owns the object in `smap`.
#[must_use]
pub fn is_owner(smap: &ClusterMap, target_id: &str, bck: &Bck, object: &str) -> bool {
    hrw_target(smap, bck, object).is_some_and(|t| t.id == target_id)
}
