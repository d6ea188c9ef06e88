use std::fmt;

bitflags::bitflags! {
    /// Behaviour flags of a molecule.
    ///
    /// The first five are the *interrupt policy* and are mutually
    /// exclusive: they decide what happens to the molecule when a
    /// higher-priority one preempts it. `LOOP` and `DTMF_STOP` are
    /// independent of the policy and of each other.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ModeSet: u8 {
        /// Preemption removes the molecule from its lane.
        const DISCARD = 1 << 0;
        /// Preemption latches the position; the interrupted atom replays
        /// from its own start on resume.
        const PAUSE = 1 << 1;
        /// Time keeps running virtually while preempted; resume seeks to
        /// where playback would have been.
        const MUTE = 1 << 2;
        /// Preemption rewinds the molecule to its first atom.
        const RESTART = 1 << 3;
        /// The molecule cannot be preempted at all; newcomers wait.
        const DONT_INTERRUPT = 1 << 4;
        /// The molecule repeats from its first atom instead of completing.
        const LOOP = 1 << 5;
        /// A DTMF digit arriving on the live audio stream cancels the
        /// molecule while it is running.
        const DTMF_STOP = 1 << 6;
    }
}

/// What happens to a running molecule when a higher-priority one arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptPolicy {
    Discard,
    Pause,
    Mute,
    Restart,
    DontInterrupt,
}

impl ModeSet {
    const POLICY_MASK: ModeSet = ModeSet::DISCARD
        .union(ModeSet::PAUSE)
        .union(ModeSet::MUTE)
        .union(ModeSet::RESTART)
        .union(ModeSet::DONT_INTERRUPT);

    /// Parse a single mode keyword from the command grammar.
    pub fn from_keyword(token: &str) -> Option<ModeSet> {
        match token {
            "discard" => Some(ModeSet::DISCARD),
            "pause" => Some(ModeSet::PAUSE),
            "mute" => Some(ModeSet::MUTE),
            "restart" => Some(ModeSet::RESTART),
            "dont_interrupt" => Some(ModeSet::DONT_INTERRUPT),
            "loop" => Some(ModeSet::LOOP),
            "dtmf_stop" => Some(ModeSet::DTMF_STOP),
            _ => None,
        }
    }

    /// True when more than one interrupt-policy flag is set.
    pub fn has_conflicting_policy(self) -> bool {
        self.intersection(Self::POLICY_MASK).bits().count_ones() > 1
    }

    /// Normalise an unset policy to `DISCARD` so that a defaulted molecule
    /// and an explicit `discard` molecule compare equal.
    pub fn normalized(self) -> ModeSet {
        if self.intersection(Self::POLICY_MASK).is_empty() {
            self | ModeSet::DISCARD
        } else {
            self
        }
    }

    /// The effective interrupt policy.
    pub fn policy(self) -> InterruptPolicy {
        if self.contains(ModeSet::DONT_INTERRUPT) {
            InterruptPolicy::DontInterrupt
        } else if self.contains(ModeSet::RESTART) {
            InterruptPolicy::Restart
        } else if self.contains(ModeSet::MUTE) {
            InterruptPolicy::Mute
        } else if self.contains(ModeSet::PAUSE) {
            InterruptPolicy::Pause
        } else {
            InterruptPolicy::Discard
        }
    }

    pub fn loops(self) -> bool {
        self.contains(ModeSet::LOOP)
    }

    pub fn stops_on_dtmf(self) -> bool {
        self.contains(ModeSet::DTMF_STOP)
    }
}

impl fmt::Display for ModeSet {
    /// Canonical keyword form: policy first, independent flags after, so
    /// the output parses back to the same set.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let policy = match self.normalized().policy() {
            InterruptPolicy::Discard => "discard",
            InterruptPolicy::Pause => "pause",
            InterruptPolicy::Mute => "mute",
            InterruptPolicy::Restart => "restart",
            InterruptPolicy::DontInterrupt => "dont_interrupt",
        };
        f.write_str(policy)?;
        if self.loops() {
            f.write_str(" loop")?;
        }
        if self.stops_on_dtmf() {
            f.write_str(" dtmf_stop")?;
        }
        Ok(())
    }
}
