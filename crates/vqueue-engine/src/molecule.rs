//! A molecule: one queued command, its atoms and its progress.

use std::fmt::Write as _;

use vqueue_core::mode::{InterruptPolicy, ModeSet};
use vqueue_core::MoleculeId;

use crate::atom::Atom;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Molecule {
    /// Assigned when the molecule enters its lane; 0 until then.
    pub id: MoleculeId,
    pub priority: u8,
    pub modes: ModeSet,
    pub atoms: Vec<Atom>,
    /// Index of the atom being (or about to be) executed. Equal to
    /// `atoms.len()` when the molecule is complete.
    pub current: usize,
    /// Cumulative played duration, in milliseconds.
    pub position_ms: u64,
    /// Monotonic stamp of the last dispatch.
    pub time_started_ms: u64,
    /// Monotonic stamp of the last preemption; present only while the
    /// molecule sits preempted in its lane.
    pub time_stopped_ms: Option<u64>,
}

impl Molecule {
    pub fn new(priority: u8, modes: ModeSet, atoms: Vec<Atom>) -> Self {
        Self {
            id: 0,
            priority,
            modes: modes.normalized(),
            atoms,
            current: 0,
            position_ms: 0,
            time_started_ms: 0,
            time_stopped_ms: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.current >= self.atoms.len()
    }

    /// Sum of atom durations over `[start, end)`.
    pub fn length_between(&self, start: usize, end: usize) -> u64 {
        self.atoms[start.min(self.atoms.len())..end.min(self.atoms.len())]
            .iter()
            .map(Atom::duration_ms)
            .sum()
    }

    pub fn total_length_ms(&self) -> u64 {
        self.length_between(0, self.atoms.len())
    }

    /// Duration of everything before the atom at `index`.
    pub fn length_before(&self, index: usize) -> u64 {
        self.length_between(0, index)
    }

    /// Locate the atom and intra-atom offset for `position_ms` and move
    /// the cursor there.
    ///
    /// With Loop set the position wraps modulo the total length. Under the
    /// Mute policy the chosen atom is adjusted so the next dispatch starts
    /// mid-atom (a Play gains offset, a DTMF cursor skips whole digits);
    /// under Pause only the position is latched and the current atom will
    /// replay from its own start.
    pub fn seek(&mut self, position_ms: u64) {
        let total = self.total_length_ms();
        let mut pos = position_ms;
        if self.modes.loops() && total > 0 {
            pos %= total;
        }
        self.position_ms = pos.min(total);
        if self.modes.policy() == InterruptPolicy::Pause {
            return;
        }

        let mute = self.modes.policy() == InterruptPolicy::Mute;
        let mut remaining = pos;
        for (index, atom) in self.atoms.iter_mut().enumerate() {
            let duration = atom.duration_ms();
            if remaining < duration {
                self.current = index;
                if mute {
                    match atom {
                        Atom::Play(play) => play.offset_ms += remaining,
                        Atom::Dtmf(dtmf) if dtmf.digit_ms > 0 => {
                            dtmf.cursor = (remaining / dtmf.digit_ms) as usize;
                        }
                        _ => {}
                    }
                }
                return;
            }
            remaining -= duration;
        }
        self.current = self.atoms.len();
    }

    /// Rewind after a Restart preemption or a Loop wrap.
    pub fn rewind(&mut self) {
        self.current = 0;
        self.position_ms = 0;
        for atom in &mut self.atoms {
            if let Atom::Dtmf(dtmf) = atom {
                dtmf.cursor = 0;
            }
        }
    }

    /// Textual form that parses back to an equal molecule.
    pub fn describe(&self) -> String {
        let mut out = format!("{} {}", self.priority, self.modes);
        for atom in &self.atoms {
            match atom {
                Atom::Play(play) => {
                    let _ = write!(out, " p {} {}", play.filename, play.offset_ms);
                }
                Atom::Record(record) => {
                    let _ = write!(out, " r {} {}", record.filename, record.max_silence_ms);
                }
                Atom::Dtmf(dtmf) => {
                    let _ = write!(out, " d {} {}", dtmf.digits, dtmf.inter_digit_delay_ms);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use vqueue_core::mode::ModeSet;

    use super::Molecule;
    use crate::atom::{Atom, DtmfAtom, PlayAtom};

    fn play(filename: &str, length_ms: u64) -> Atom {
        Atom::Play(PlayAtom {
            filename: filename.into(),
            offset_ms: 0,
            length_ms,
        })
    }

    fn dtmf(digits: &str) -> Atom {
        Atom::Dtmf(DtmfAtom {
            digits: digits.into(),
            inter_digit_delay_ms: 40,
            digit_ms: 140,
            cursor: 0,
        })
    }

    #[test]
    fn total_length_sums_atoms() {
        let m = Molecule::new(
            0,
            ModeSet::DISCARD,
            vec![play("a.wav", 2000), dtmf("12"), play("b.wav", 500)],
        );
        assert_eq!(m.total_length_ms(), 2000 + 280 + 500);
        assert_eq!(m.length_before(1), 2000);
        assert_eq!(m.length_between(1, 2), 280);
    }

    #[test]
    fn mute_seek_lands_mid_atom_with_offset() {
        let mut m = Molecule::new(
            0,
            ModeSet::MUTE,
            vec![play("a.wav", 2000), play("b.wav", 3000)],
        );
        m.seek(2500);
        assert_eq!(m.current, 1);
        match &m.atoms[1] {
            Atom::Play(p) => assert_eq!(p.offset_ms, 500),
            other => panic!("unexpected atom {other:?}"),
        }
        assert_eq!(m.position_ms, 2500);
    }

    #[test]
    fn mute_seek_positions_dtmf_cursor() {
        let mut m = Molecule::new(0, ModeSet::MUTE, vec![play("a.wav", 1000), dtmf("123")]);
        m.seek(1000 + 290);
        assert_eq!(m.current, 1);
        match &m.atoms[1] {
            Atom::Dtmf(d) => assert_eq!(d.cursor, 2),
            other => panic!("unexpected atom {other:?}"),
        }
    }

    #[test]
    fn loop_seek_wraps_modulo_total() {
        let mut m = Molecule::new(
            0,
            ModeSet::MUTE | ModeSet::LOOP,
            vec![play("a.wav", 2000), play("b.wav", 1000)],
        );
        m.seek(3400);
        assert_eq!(m.current, 0);
        match &m.atoms[0] {
            Atom::Play(p) => assert_eq!(p.offset_ms, 400),
            other => panic!("unexpected atom {other:?}"),
        }
        assert_eq!(m.position_ms, 400);
    }

    #[test]
    fn pause_seek_only_latches_position() {
        let mut m = Molecule::new(
            0,
            ModeSet::PAUSE,
            vec![play("a.wav", 2000), play("b.wav", 3000)],
        );
        m.current = 1;
        m.seek(2500);
        assert_eq!(m.current, 1);
        match &m.atoms[1] {
            Atom::Play(p) => assert_eq!(p.offset_ms, 0),
            other => panic!("unexpected atom {other:?}"),
        }
        assert_eq!(m.position_ms, 2500);
    }

    #[test]
    fn seek_past_end_completes_without_loop() {
        let mut m = Molecule::new(0, ModeSet::MUTE, vec![play("a.wav", 2000)]);
        m.seek(2000);
        assert!(m.is_complete());
    }

    #[test]
    fn rewind_resets_dtmf_cursors() {
        let mut m = Molecule::new(0, ModeSet::DISCARD | ModeSet::LOOP, vec![dtmf("12")]);
        if let Atom::Dtmf(d) = &mut m.atoms[0] {
            d.cursor = 2;
        }
        m.current = 1;
        m.position_ms = 280;
        m.rewind();
        assert_eq!(m.current, 0);
        assert_eq!(m.position_ms, 0);
        match &m.atoms[0] {
            Atom::Dtmf(d) => assert_eq!(d.cursor, 0),
            other => panic!("unexpected atom {other:?}"),
        }
    }

    #[test]
    fn describe_is_stable_text() {
        let m = Molecule::new(
            2,
            ModeSet::MUTE | ModeSet::LOOP,
            vec![play("greeting.wav", 2000), dtmf("12#")],
        );
        assert_eq!(m.describe(), "2 mute loop p greeting.wav 0 d 12# 40");
    }
}
