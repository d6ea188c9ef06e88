//! Fixed priority lanes of molecules.
//!
//! One FIFO per priority level. [`Lanes::next`] is the single selection
//! rule in the whole engine: highest non-empty lane wins, head of lane
//! within it.

use std::collections::VecDeque;

use vqueue_core::{MoleculeId, PRIORITY_LEVELS};

use crate::molecule::Molecule;

pub struct Lanes {
    lanes: [VecDeque<Molecule>; PRIORITY_LEVELS],
    next_id: MoleculeId,
}

impl Lanes {
    pub fn new() -> Self {
        Self {
            lanes: std::array::from_fn(|_| VecDeque::new()),
            next_id: 1,
        }
    }

    /// Append to the molecule's priority lane and hand out its id.
    pub fn enqueue(&mut self, mut molecule: Molecule) -> MoleculeId {
        debug_assert!((molecule.priority as usize) < PRIORITY_LEVELS);
        let id = self.next_id;
        self.next_id += 1;
        molecule.id = id;
        self.lanes[molecule.priority as usize].push_back(molecule);
        id
    }

    /// The molecule the scheduler should run next: head of the highest
    /// non-empty lane whose head still has atoms left.
    pub fn next(&mut self) -> Option<&mut Molecule> {
        let lane = (0..PRIORITY_LEVELS)
            .rev()
            .find(|&p| self.lanes[p].front().is_some_and(|m| !m.is_complete()))?;
        self.lanes[lane].front_mut()
    }

    pub fn find_mut(&mut self, id: MoleculeId) -> Option<&mut Molecule> {
        self.lanes
            .iter_mut()
            .flat_map(|lane| lane.iter_mut())
            .find(|m| m.id == id)
    }

    pub fn remove(&mut self, id: MoleculeId) -> Option<Molecule> {
        for lane in &mut self.lanes {
            if let Some(index) = lane.iter().position(|m| m.id == id) {
                return lane.remove(index);
            }
        }
        None
    }

    /// External cancel by id; true when a molecule was removed.
    pub fn cancel(&mut self, id: MoleculeId) -> bool {
        self.remove(id).is_some()
    }

    /// Drop every molecule in one lane; returns the removed ids.
    pub fn cancel_priority(&mut self, priority: u8) -> Vec<MoleculeId> {
        let Some(lane) = self.lanes.get_mut(priority as usize) else {
            return Vec::new();
        };
        lane.drain(..).map(|m| m.id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(VecDeque::is_empty)
    }

    pub fn depths(&self) -> [usize; PRIORITY_LEVELS] {
        std::array::from_fn(|p| self.lanes[p].len())
    }
}

impl Default for Lanes {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use vqueue_core::mode::ModeSet;

    use super::Lanes;
    use crate::atom::{Atom, PlayAtom};
    use crate::molecule::Molecule;

    fn molecule(priority: u8) -> Molecule {
        Molecule::new(
            priority,
            ModeSet::DISCARD,
            vec![Atom::Play(PlayAtom {
                filename: "a.wav".into(),
                offset_ms: 0,
                length_ms: 1000,
            })],
        )
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let mut lanes = Lanes::new();
        assert_eq!(lanes.enqueue(molecule(0)), 1);
        assert_eq!(lanes.enqueue(molecule(3)), 2);
        assert_eq!(lanes.enqueue(molecule(0)), 3);
    }

    #[test]
    fn next_prefers_the_highest_lane() {
        let mut lanes = Lanes::new();
        let low = lanes.enqueue(molecule(1));
        let high = lanes.enqueue(molecule(4));
        assert_eq!(lanes.next().map(|m| m.id), Some(high));
        lanes.remove(high);
        assert_eq!(lanes.next().map(|m| m.id), Some(low));
    }

    #[test]
    fn lanes_are_fifo() {
        let mut lanes = Lanes::new();
        let first = lanes.enqueue(molecule(2));
        let second = lanes.enqueue(molecule(2));
        assert_eq!(lanes.next().map(|m| m.id), Some(first));
        lanes.remove(first);
        assert_eq!(lanes.next().map(|m| m.id), Some(second));
    }

    #[test]
    fn completed_head_is_not_selected() {
        let mut lanes = Lanes::new();
        let id = lanes.enqueue(molecule(0));
        lanes.find_mut(id).expect("present").current = 1;
        assert!(lanes.next().is_none());
    }

    #[test]
    fn cancel_priority_empties_one_lane_only() {
        let mut lanes = Lanes::new();
        let a = lanes.enqueue(molecule(2));
        let b = lanes.enqueue(molecule(2));
        let other = lanes.enqueue(molecule(3));
        assert_eq!(lanes.cancel_priority(2), vec![a, b]);
        assert!(lanes.find_mut(other).is_some());
        assert_eq!(lanes.cancel_priority(7), Vec::new());
    }

    #[test]
    fn cancel_reports_whether_anything_was_removed() {
        let mut lanes = Lanes::new();
        let id = lanes.enqueue(molecule(1));
        assert!(lanes.cancel(id));
        assert!(!lanes.cancel(id));
        assert!(lanes.is_empty());
    }

    #[test]
    fn remove_unknown_id_is_a_no_op() {
        let mut lanes = Lanes::new();
        lanes.enqueue(molecule(0));
        assert!(lanes.remove(99).is_none());
        assert!(!lanes.is_empty());
    }
}
