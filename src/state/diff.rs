use std::collections::{BTreeMap, BTreeSet};

use crate::state::types::{ChannelId, ChannelValidation, DesiredStateSnapshot, ValidationSnapshot};

/// Channel-level difference between two keyed snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelDelta {
    pub added: BTreeSet<ChannelId>,
    pub removed: BTreeSet<ChannelId>,
    /// Present on both sides with a different value.
    pub changed: BTreeSet<ChannelId>,
}

impl ChannelDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

pub fn diff<T: PartialEq>(
    old: &BTreeMap<ChannelId, T>,
    new: &BTreeMap<ChannelId, T>,
) -> ChannelDelta {
    let mut delta = ChannelDelta::default();
    for (id, value) in new {
        match old.get(id) {
            None => {
                delta.added.insert(*id);
            }
            Some(prev) if prev != value => {
                delta.changed.insert(*id);
            }
            Some(_) => {}
        }
    }
    for id in old.keys() {
        if !new.contains_key(id) {
            delta.removed.insert(*id);
        }
    }
    delta
}

/// Delta of a desired channel set against the currently tracked set.
pub fn diff_channels<'a, I>(tracked: I, desired: &DesiredStateSnapshot) -> ChannelDelta
where
    I: IntoIterator<Item = &'a ChannelId>,
{
    let old: BTreeMap<ChannelId, ()> = tracked.into_iter().map(|id| (*id, ())).collect();
    let new: BTreeMap<ChannelId, ()> = desired.channels.iter().map(|id| (*id, ())).collect();
    diff(&old, &new)
}

pub fn diff_validation(
    old: Option<&ValidationSnapshot>,
    new: &ValidationSnapshot,
) -> ChannelDelta {
    let empty = BTreeMap::<ChannelId, ChannelValidation>::new();
    diff(old.map(|s| &s.entries).unwrap_or(&empty), &new.entries)
}
