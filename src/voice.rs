//! Voice Slot
//!
//! One polyphonic instance of a module's DSP. A slot exclusively owns its
//! processing unit, built with the bank and kept for the slot's lifetime: a
//! respawn re-initializes it and a sample-rate change rebuilds it in place,
//! so voice lifecycle never allocates on the audio thread. The
//! lifecycle controller decides what happens to a slot at a boundary and
//! hands it a [`Transition`]; the slot applies it against the staged scene
//! right before running its quantum.

use crate::lifecycle::GateLatch;
use crate::unit::{spawn_unit, ProcessingUnit, Quantum, UnitKind};

/// Per-voice lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    /// Never attacked since the last respawn
    Uninitialized,
    /// Gate held open
    Gated,
    /// Gate dropped; the unit is in its release phase
    Released,
    /// No gate patched; running without gate semantics
    FreeRun,
}

/// Unit operations scheduled for the next quantum
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transition {
    /// Rebuild the unit for a new sample rate
    pub replace: bool,
    /// Reset the unit's internal state
    pub respawn: bool,
    pub attack: bool,
    pub release: bool,
    /// Spend one throw-away quantum after the attack if the unit asks for it
    pub prime: bool,
}

impl Transition {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// What the caller must do after [`VoiceSlot::prepare`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prepared {
    /// No unit to run this block
    Missing,
    Ready,
    /// Run one quantum, capture it as the previous generation, then run again
    NeedsPrime,
}

pub struct VoiceSlot {
    index: usize,
    unit: Box<dyn ProcessingUnit>,
    /// Whether the unit has been initialized since the bank was built
    spawned: bool,
    state: VoiceState,
    pub(crate) gate: GateLatch,
    last_unison: Option<i32>,
    pending: Transition,
}

impl VoiceSlot {
    pub fn new(index: usize, kind: UnitKind, sample_rate: f32) -> Self {
        Self {
            index,
            unit: spawn_unit(kind, sample_rate, Self::seed_for(index)),
            spawned: false,
            state: VoiceState::Uninitialized,
            gate: GateLatch::new(),
            last_unison: None,
            pending: Transition::default(),
        }
    }

    /// A full bank of slots for one module
    pub fn bank<const N: usize>(kind: UnitKind, sample_rate: f32) -> [VoiceSlot; N] {
        std::array::from_fn(|i| VoiceSlot::new(i, kind, sample_rate))
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> UnitKind {
        self.unit.kind()
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: VoiceState) {
        self.state = state;
    }

    pub fn gate(&self) -> &GateLatch {
        &self.gate
    }

    pub fn is_spawned(&self) -> bool {
        self.spawned
    }

    /// The slot's unit, once it has been spawned
    pub fn unit(&self) -> Option<&dyn ProcessingUnit> {
        self.spawned.then_some(self.unit.as_ref())
    }

    /// Put a specific unit in the slot; it is kept across respawns and
    /// rebuilt in place on a sample-rate change
    pub fn install_unit(&mut self, unit: Box<dyn ProcessingUnit>) {
        self.unit = unit;
    }

    /// Record the unison count seen by this voice; true if it changed
    pub(crate) fn note_unison(&mut self, unison: i32) -> bool {
        let changed = self.last_unison.is_some_and(|u| u != unison);
        self.last_unison = Some(unison);
        changed
    }

    pub(crate) fn schedule(&mut self, transition: Transition) {
        let p = &mut self.pending;
        p.replace |= transition.replace;
        p.respawn |= transition.respawn;
        p.attack |= transition.attack;
        p.release |= transition.release;
        p.prime |= transition.prime;
    }

    pub fn pending(&self) -> Transition {
        self.pending
    }

    fn seed_for(index: usize) -> u64 {
        0x5eed_0000_u64 + index as u64
    }

    /// Apply the scheduled transition using the staged quantum
    pub fn prepare(&mut self, sample_rate: f32, quantum: &Quantum<'_>) -> Prepared {
        let t = std::mem::take(&mut self.pending);
        if t.replace {
            self.unit.rebuild(sample_rate, Self::seed_for(self.index));
        }
        if t.replace || t.respawn {
            self.spawned = true;
        }
        if !self.spawned {
            return Prepared::Missing;
        }
        let unit = &mut *self.unit;
        if t.respawn {
            unit.init(quantum.pitch, quantum.scene);
        }
        if t.attack {
            unit.attack(quantum.scene);
        }
        if t.release {
            unit.release();
        }
        if t.prime && t.attack && unit.primes_on_attack() {
            Prepared::NeedsPrime
        } else {
            Prepared::Ready
        }
    }

    /// Run one quantum; false if the slot was never spawned
    pub fn process(&mut self, quantum: &Quantum<'_>) -> bool {
        if !self.spawned {
            tracing::warn!(voice = self.index, "voice was never spawned, skipping");
            return false;
        }
        self.unit.process_block(quantum);
        true
    }

    #[inline]
    pub fn output(&self, lane: usize) -> f32 {
        if self.spawned {
            self.unit.output(lane)
        } else {
            0.0
        }
    }

    #[inline]
    pub fn block(&self, lane: usize) -> &[f32] {
        if self.spawned {
            self.unit.block(lane)
        } else {
            &[]
        }
    }

    /// Switch the slot's unit to another wavetable
    pub fn load_wavetable(&mut self, index: usize) -> bool {
        self.spawned && self.unit.load_wavetable(index)
    }
}

impl std::fmt::Debug for VoiceSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceSlot")
            .field("index", &self.index)
            .field("kind", &self.unit.kind())
            .field("state", &self.state)
            .field("spawned", &self.spawned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::SceneData;
    use crate::unit::testing::CountingUnit;

    #[test]
    fn test_unit_runs_only_once_spawned() {
        let scene = SceneData::with_len(8);
        let q = Quantum::new(60.0, &scene);
        let mut slot = VoiceSlot::new(0, UnitKind::Envelope, 48000.0);
        assert_eq!(slot.kind(), UnitKind::Envelope);
        assert!(slot.unit().is_none());
        assert!(!slot.is_spawned());
        assert_eq!(slot.prepare(48000.0, &q), Prepared::Missing);
        assert!(!slot.process(&q));

        slot.schedule(Transition {
            respawn: true,
            ..Default::default()
        });
        assert_eq!(slot.prepare(48000.0, &q), Prepared::Ready);
        assert!(slot.is_spawned());
        assert!(slot.process(&q));
    }

    #[test]
    fn test_respawn_reuses_installed_unit() {
        let scene = SceneData::with_len(8);
        let q = Quantum::new(60.0, &scene);
        let mut slot = VoiceSlot::new(3, UnitKind::Envelope, 48000.0);
        let (unit, calls) = CountingUnit::new(false);
        slot.install_unit(unit);

        for _ in 0..2 {
            slot.schedule(Transition {
                respawn: true,
                attack: true,
                ..Default::default()
            });
            slot.prepare(48000.0, &q);
        }
        assert_eq!(calls.init(), 2);
        assert_eq!(calls.attack(), 2);

        slot.schedule(Transition {
            replace: true,
            respawn: true,
            ..Default::default()
        });
        slot.prepare(96000.0, &q);
        // Rebuilt in place, then initialized like any respawn
        assert_eq!(calls.rebuild(), 1);
        assert_eq!(calls.init(), 3);
        assert_eq!(slot.unit().map(|u| u.kind()), Some(UnitKind::Envelope));
    }

    #[test]
    fn test_schedule_merges_and_prepare_consumes() {
        let scene = SceneData::with_len(8);
        let q = Quantum::new(60.0, &scene);
        let mut slot = VoiceSlot::new(0, UnitKind::Lfo, 48000.0);
        let (unit, calls) = CountingUnit::new(true);
        slot.install_unit(unit);

        let attack = Transition {
            respawn: true,
            attack: true,
            prime: true,
            ..Default::default()
        };
        slot.schedule(attack);
        slot.schedule(attack);
        assert_eq!(slot.prepare(48000.0, &q), Prepared::NeedsPrime);
        assert_eq!(calls.attack(), 1);
        assert!(slot.pending().is_empty());
        assert_eq!(slot.prepare(48000.0, &q), Prepared::Ready);
    }

    #[test]
    fn test_unison_change_detection() {
        let mut slot = VoiceSlot::new(0, UnitKind::Envelope, 48000.0);
        assert!(!slot.note_unison(1));
        assert!(!slot.note_unison(1));
        assert!(slot.note_unison(4));
        assert!(!slot.note_unison(4));
    }

    #[test]
    fn test_bank_indices() {
        let bank: [VoiceSlot; 4] = VoiceSlot::bank(UnitKind::Filter, 48000.0);
        assert_eq!(bank[3].index(), 3);
        assert!(bank.iter().all(|v| v.state() == VoiceState::Uninitialized));
    }
}
