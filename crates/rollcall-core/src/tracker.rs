//! Cross-frame face association by box overlap.
//!
//! Detectors return faces in no particular order, so a face's position in
//! the detection list says nothing about which face it was last frame. Each
//! frame's boxes are matched to the previous frame's slots by greatest IoU;
//! leftovers open new slots and slots unseen for too long expire.

use crate::geometry::iou;
use crate::types::BoundingBox;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_MIN_IOU: f32 = 0.3;
pub const DEFAULT_MAX_MISSED_FRAMES: u32 = 15;

/// Stable identifier for a tracked face within one session.
pub type SlotId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Minimum overlap for a box to continue an existing slot.
    pub min_iou: f32,
    /// Frames a slot may go undetected before it is dropped.
    pub max_missed_frames: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_iou: DEFAULT_MIN_IOU,
            max_missed_frames: DEFAULT_MAX_MISSED_FRAMES,
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    last_box: BoundingBox,
    missed: u32,
}

/// Outcome of associating one frame's detections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Association {
    /// `(slot, box)` for every detection, in detection order.
    pub assigned: Vec<(SlotId, BoundingBox)>,
    /// Slots created this frame.
    pub opened: Vec<SlotId>,
    /// Slots dropped this frame after going unseen too long.
    pub expired: Vec<SlotId>,
}

#[derive(Debug, Clone)]
pub struct SlotTracker {
    config: TrackerConfig,
    slots: BTreeMap<SlotId, Slot>,
    next_id: SlotId,
}

impl SlotTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self { config, slots: BTreeMap::new(), next_id: 0 }
    }

    pub fn live_slots(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.slots.keys().copied()
    }

    /// Associate this frame's detections with existing slots.
    pub fn associate(&mut self, detections: &[BoundingBox]) -> Association {
        // Candidate pairs above the overlap floor, best first. Ties fall back
        // to slot then detection order so assignment is deterministic.
        let mut candidates: Vec<(f32, SlotId, usize)> = Vec::new();
        for (&slot_id, slot) in &self.slots {
            for (det_idx, det) in detections.iter().enumerate() {
                let overlap = iou(&slot.last_box, det);
                if overlap >= self.config.min_iou && overlap > 0.0 {
                    candidates.push((overlap, slot_id, det_idx));
                }
            }
        }
        candidates.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        let mut det_slot: Vec<Option<SlotId>> = vec![None; detections.len()];
        let mut claimed: Vec<SlotId> = Vec::new();
        for (_, slot_id, det_idx) in candidates {
            if det_slot[det_idx].is_some() || claimed.contains(&slot_id) {
                continue;
            }
            det_slot[det_idx] = Some(slot_id);
            claimed.push(slot_id);
        }

        let mut association = Association::default();

        for (det_idx, det) in detections.iter().enumerate() {
            let slot_id = match det_slot[det_idx] {
                Some(id) => id,
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    association.opened.push(id);
                    id
                }
            };
            self.slots.insert(slot_id, Slot { last_box: det.clone(), missed: 0 });
            association.assigned.push((slot_id, det.clone()));
        }

        let max_missed = self.config.max_missed_frames;
        let seen: Vec<SlotId> = association.assigned.iter().map(|(id, _)| *id).collect();
        self.slots.retain(|id, slot| {
            if seen.contains(id) {
                return true;
            }
            slot.missed += 1;
            if slot.missed > max_missed {
                association.expired.push(*id);
                false
            } else {
                true
            }
        });

        association
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32) -> BoundingBox {
        BoundingBox { x, y, width: 100.0, height: 100.0, confidence: 0.9 }
    }

    fn slot_of(a: &Association, det_idx: usize) -> SlotId {
        a.assigned[det_idx].0
    }

    #[test]
    fn test_new_faces_open_slots() {
        let mut t = SlotTracker::new(TrackerConfig::default());
        let a = t.associate(&[make_bbox(0.0, 0.0), make_bbox(300.0, 0.0)]);
        assert_eq!(a.opened, vec![0, 1]);
        assert_eq!(slot_of(&a, 0), 0);
        assert_eq!(slot_of(&a, 1), 1);
    }

    #[test]
    fn test_reordered_detections_keep_slots() {
        let mut t = SlotTracker::new(TrackerConfig::default());
        t.associate(&[make_bbox(0.0, 0.0), make_bbox(300.0, 0.0)]);

        // Same faces, moved slightly and listed in reverse order
        let a = t.associate(&[make_bbox(305.0, 4.0), make_bbox(6.0, 2.0)]);
        assert!(a.opened.is_empty());
        assert_eq!(slot_of(&a, 0), 1);
        assert_eq!(slot_of(&a, 1), 0);
    }

    #[test]
    fn test_low_overlap_opens_new_slot() {
        let mut t = SlotTracker::new(TrackerConfig::default());
        t.associate(&[make_bbox(0.0, 0.0)]);
        // IoU of a 100x100 box shifted by 80px is 20/180 ≈ 0.11
        let a = t.associate(&[make_bbox(80.0, 0.0)]);
        assert_eq!(a.opened, vec![1]);
    }

    #[test]
    fn test_each_slot_claimed_once() {
        let mut t = SlotTracker::new(TrackerConfig::default());
        t.associate(&[make_bbox(0.0, 0.0)]);
        let a = t.associate(&[make_bbox(10.0, 0.0), make_bbox(0.0, 0.0)]);
        // Exact overlap wins the existing slot; the other box is new
        assert_eq!(slot_of(&a, 1), 0);
        assert_eq!(slot_of(&a, 0), 1);
        assert_eq!(a.opened, vec![1]);
    }

    #[test]
    fn test_slot_survives_short_gap() {
        let config = TrackerConfig { max_missed_frames: 2, ..TrackerConfig::default() };
        let mut t = SlotTracker::new(config);
        t.associate(&[make_bbox(0.0, 0.0)]);
        assert!(t.associate(&[]).expired.is_empty());
        assert!(t.associate(&[]).expired.is_empty());
        let a = t.associate(&[make_bbox(2.0, 2.0)]);
        assert_eq!(slot_of(&a, 0), 0);
        assert!(a.opened.is_empty());
    }

    #[test]
    fn test_slot_expires_after_long_gap() {
        let config = TrackerConfig { max_missed_frames: 2, ..TrackerConfig::default() };
        let mut t = SlotTracker::new(config);
        t.associate(&[make_bbox(0.0, 0.0)]);
        t.associate(&[]);
        t.associate(&[]);
        let a = t.associate(&[]);
        assert_eq!(a.expired, vec![0]);
        assert_eq!(t.live_slots().count(), 0);

        // Returning face gets a fresh slot
        let a = t.associate(&[make_bbox(0.0, 0.0)]);
        assert_eq!(a.opened, vec![1]);
    }
}
