use crate::tessellation::FaceId;
use bevy::utils::HashMap;
use std::{cmp::Ordering, collections::BinaryHeap};

#[derive(Clone, Copy, Debug)]
struct Entry {
    due: f64,
    stamp: u64,
    face: FaceId,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed, so that the heap pops the earliest due entry first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .total_cmp(&self.due)
            .then_with(|| other.stamp.cmp(&self.stamp))
    }
}

/// Schedules faces by the distance the viewer has to travel before they need another test.
///
/// Each face is scheduled at most once. Removal is lazy: stale heap entries are skipped
/// when popped and purged once they outnumber the live ones.
#[derive(Default)]
pub struct PriorityList {
    heap: BinaryHeap<Entry>,
    members: HashMap<FaceId, u64>,
    travelled: f64,
    next_stamp: u64,
}

impl PriorityList {
    /// Schedules `face` to be due after the viewer travelled another `delta`.
    /// A face already in the list is rescheduled.
    pub fn insert(&mut self, delta: f32, face: FaceId) {
        let stamp = self.next_stamp;
        self.next_stamp += 1;

        self.members.insert(face, stamp);
        self.heap.push(Entry {
            due: self.travelled + delta.max(0.0) as f64,
            stamp,
            face,
        });

        if self.heap.len() > 2 * self.members.len() + 64 {
            self.compact();
        }
    }

    /// Removes `face` from the list. Returns whether it was scheduled.
    pub fn unlink(&mut self, face: FaceId) -> bool {
        self.members.remove(&face).is_some()
    }

    pub fn contains(&self, face: FaceId) -> bool {
        self.members.contains_key(&face)
    }

    /// The distance left until `face` is due.
    pub fn remaining(&self, face: FaceId) -> Option<f32> {
        let stamp = *self.members.get(&face)?;

        self.heap
            .iter()
            .find(|entry| entry.stamp == stamp)
            .map(|entry| (entry.due - self.travelled).max(0.0) as f32)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Advances the list by the distance the viewer moved and removes all faces that
    /// became due, earliest first.
    pub fn shift(&mut self, moved: f32) -> Vec<FaceId> {
        self.travelled += moved.max(0.0) as f64;

        let mut due = Vec::new();

        while let Some(entry) = self.heap.peek() {
            if entry.due > self.travelled {
                break;
            }

            let entry = *entry;
            self.heap.pop();

            if self.members.get(&entry.face) == Some(&entry.stamp) {
                self.members.remove(&entry.face);
                due.push(entry.face);
            }
        }

        due
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.members.clear();
    }

    fn compact(&mut self) {
        let members = &self.members;
        self.heap
            .retain(|entry| members.get(&entry.face) == Some(&entry.stamp));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn faces_become_due_in_order() {
        let mut list = PriorityList::default();
        list.insert(5.0, FaceId(10));
        list.insert(1.0, FaceId(11));
        list.insert(3.0, FaceId(12));

        assert!(list.shift(0.5).is_empty());
        assert_eq!(list.shift(3.0), vec![FaceId(11), FaceId(12)]);
        assert_eq!(list.len(), 1);
        assert_eq!(list.remaining(FaceId(10)), Some(1.5));
        assert_eq!(list.shift(10.0), vec![FaceId(10)]);
        assert!(list.is_empty());
    }

    #[test]
    fn zero_delta_is_due_immediately() {
        let mut list = PriorityList::default();
        list.shift(42.0);
        list.insert(0.0, FaceId(3));

        assert_eq!(list.shift(0.0), vec![FaceId(3)]);
    }

    #[test]
    fn unlinked_and_rescheduled_faces() {
        let mut list = PriorityList::default();
        list.insert(1.0, FaceId(2));
        list.insert(1.0, FaceId(3));
        list.insert(4.0, FaceId(2));

        assert!(list.unlink(FaceId(3)));
        assert!(!list.unlink(FaceId(3)));
        assert!(list.shift(2.0).is_empty());
        assert_eq!(list.shift(2.0), vec![FaceId(2)]);
    }

    #[test]
    fn compaction_keeps_live_entries() {
        let mut list = PriorityList::default();

        for round in 0..100 {
            list.insert(round as f32, FaceId(7));
        }
        list.insert(0.5, FaceId(8));

        assert!(list.heap.len() <= 2 * list.members.len() + 64);
        assert_eq!(list.shift(1.0), vec![FaceId(8)]);
        assert_eq!(list.shift(98.0), vec![FaceId(7)]);
    }
}
