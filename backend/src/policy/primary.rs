//! Primary volume type tracking.
//!
//! The volume keys control one volume type at a time: the type of the stream
//! at the head of this list. Playing streams are added when they start and
//! removed when they cork or go away; capture streams are added with the
//! capture rank so that a lone recording reports "capture only".

use super::PolicyEngine;
use audio_policy_types::{PolicyEvent, PrimaryVolumeType, VolumeType};
use tracing::info;

/// Published when no stream is tracked.
pub const NO_INSTANCE: i32 = -1;
/// Published when the head of the list is a capture stream.
pub const CAPTURE_ONLY: i32 = -2;

/// Identity of a tracked stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimaryKey {
    SinkInput(u32),
    SourceOutput(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    key: PrimaryKey,
    /// Raw volume type, or the capture rank
    volume_type: u32,
    priority: u32,
}

/// Ordered list of streams that may own the volume keys.
#[derive(Debug, Default)]
pub struct PrimaryVolumeList {
    entries: Vec<Entry>,
}

fn priority_of(volume_type: u32) -> u32 {
    VolumeType::from_u32(volume_type)
        .map(VolumeType::primary_priority)
        .unwrap_or(PrimaryVolumeType::Max.as_u32())
}

impl PrimaryVolumeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `key`. Returns false when it is already tracked.
    ///
    /// Only the head is compared: a new entry of equal or lower rank goes
    /// right behind the head, a higher-ranked one becomes the new head.
    pub fn insert(&mut self, key: PrimaryKey, volume_type: u32) -> bool {
        if self.entries.iter().any(|e| e.key == key) {
            return false;
        }

        let entry = Entry {
            key,
            volume_type,
            priority: priority_of(volume_type),
        };
        match self.entries.first() {
            Some(head) if head.priority <= entry.priority => self.entries.insert(1, entry),
            _ => self.entries.insert(0, entry),
        }
        info!(
            "add volume data to primary volume list. volumetype({}), priority({})",
            entry.volume_type, entry.priority
        );
        true
    }

    pub fn remove(&mut self, key: PrimaryKey) -> bool {
        match self.entries.iter().position(|e| e.key == key) {
            Some(pos) => {
                let entry = self.entries.remove(pos);
                info!(
                    "remove volume data from primary volume list. volumetype({}), priority({})",
                    entry.volume_type, entry.priority
                );
                true
            }
            None => false,
        }
    }

    /// Value published for the current head.
    pub fn current(&self) -> i32 {
        match self.entries.first() {
            None => NO_INSTANCE,
            Some(head) if head.volume_type == PrimaryVolumeType::Max.as_u32() => CAPTURE_ONLY,
            Some(head) => head.volume_type as i32,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PolicyEngine {
    pub(crate) fn add_primary(&mut self, key: PrimaryKey, volume_type: u32) {
        if self.primary.insert(key, volume_type) {
            self.publish_primary_volume();
        }
    }

    pub(crate) fn remove_primary(&mut self, key: PrimaryKey) {
        self.primary.remove(key);
        self.publish_primary_volume();
    }

    pub(crate) fn publish_primary_volume(&self) {
        let volume_type = self.primary.current();
        info!("current primary volumetype({})", volume_type);
        self.publish(PolicyEvent::PrimaryVolumeChanged { volume_type });
    }

    /// Volume type the volume keys currently control.
    pub fn primary_volume_type(&self) -> i32 {
        self.primary.current()
    }
}
