//! Processing Units
//!
//! A processing unit is one opaque DSP object owned by a voice slot: an
//! oscillator, an LFO, an envelope, a filter or an effect. The scheduling
//! engine only talks to units through [`ProcessingUnit`]:
//!
//! - `init` resets internal state (phase, filter memory) for a (re)spawn
//! - `attack` / `release` drive gated units
//! - `process_block` runs one quantum against a staged [`SceneData`]
//!   snapshot; a quantum is a whole block unless a gate edge split it
//! - `output` and `block` expose the results per lane
//!
//! Units are created through [`spawn_unit`] when a voice bank is built and
//! rebuilt in place when the sample rate changes, so the audio thread never
//! allocates a unit.

mod effect;
mod envelope;
mod filter;
mod lfo;
mod oscillator;

pub use effect::{
    ChorusParam, Effect, EffectKind, ReverbParam, SpringParam, CHORUS_LAYOUT, REVERB_LAYOUT,
    SPRING_LAYOUT,
};
pub use envelope::{Envelope, EnvelopeParam, ENVELOPE_LAYOUT};
pub use filter::{Filter, FilterMode, FilterParam, FILTER_LAYOUT};
pub use lfo::{Lfo, LfoParam, LfoShape, LFO_LAYOUT};
pub use oscillator::{
    HalfRateDecimator, Oscillator, OscillatorConfig, OscillatorKind, N_OSC_PARAMS,
};

use crate::scene::{ParamLayout, ParamStorage, SceneData};
use crate::BLOCK_SIZE;
use serde::{Deserialize, Serialize};

/// Range of envelope time parameters, in log2 seconds
pub(crate) const TIME_LOG2_MIN: f32 = -8.0;
pub(crate) const TIME_LOG2_MAX: f32 = 5.0;

/// Seconds for a log2-seconds time parameter; the bottom of the range is 0 s
pub(crate) fn log2_seconds(value: f32) -> f32 {
    if value <= TIME_LOG2_MIN + 1e-4 {
        0.0
    } else {
        libm::exp2f(value.min(TIME_LOG2_MAX))
    }
}

/// The family a processing unit belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitKind {
    Oscillator(OscillatorKind),
    Lfo,
    Envelope,
    Filter,
    Effect(EffectKind),
}

/// Everything a unit may read during one process quantum
#[derive(Debug, Clone, Copy)]
pub struct Quantum<'a> {
    /// Pitch in (fractional) MIDI notes; ignored by units without pitch
    pub pitch: f32,
    /// Staged parameter snapshot for this voice
    pub scene: &'a SceneData,
    /// One block of input audio, empty for generators
    pub input: &'a [f32],
    /// Right channel for stereo effects; empty means mono input
    pub input_right: &'a [f32],
    /// Samples of time this quantum covers
    pub samples: usize,
    /// Tempo measured from a clock input, in beats per minute
    pub tempo: Option<f32>,
}

impl<'a> Quantum<'a> {
    pub fn new(pitch: f32, scene: &'a SceneData) -> Self {
        Self {
            pitch,
            scene,
            input: &[],
            input_right: &[],
            samples: BLOCK_SIZE,
            tempo: None,
        }
    }

    pub fn with_input(mut self, input: &'a [f32]) -> Self {
        self.input = input;
        self
    }

    pub fn with_stereo_input(mut self, left: &'a [f32], right: &'a [f32]) -> Self {
        self.input = left;
        self.input_right = right;
        self
    }

    /// Cover only the rest of a block that a gate edge split
    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples.clamp(1, BLOCK_SIZE);
        self
    }

    pub fn with_tempo(mut self, tempo: Option<f32>) -> Self {
        self.tempo = tempo;
        self
    }
}

/// Capability shared by every DSP unit a voice slot can own
pub trait ProcessingUnit: Send {
    fn kind(&self) -> UnitKind;

    /// Engine parameters this unit reads from the scene, by index
    fn param_layout(&self) -> &'static [ParamLayout];

    /// Return to the freshly built state at a new sample rate
    ///
    /// Must not allocate; this runs on the audio thread.
    fn rebuild(&mut self, sample_rate: f32, seed: u64);

    /// Declare this unit's parameter types in storage
    fn init_ctrltypes(&self, storage: &mut ParamStorage) {
        for (i, layout) in self.param_layout().iter().enumerate() {
            storage.define(i, *layout);
        }
    }

    /// Load this unit's default values into storage
    fn init_default_values(&self, storage: &mut ParamStorage) {
        for i in 0..self.param_layout().len() {
            storage.reset_to_default(i);
        }
    }

    /// Reset internal state for a fresh voice
    fn init(&mut self, pitch: f32, scene: &SceneData);

    /// Start (or restart) the unit's gated phase
    fn attack(&mut self, _scene: &SceneData) {}

    /// Enter the release phase
    fn release(&mut self) {}

    /// Run one quantum
    fn process_block(&mut self, quantum: &Quantum<'_>);

    /// Latest scalar value of an output lane
    fn output(&self, lane: usize) -> f32;

    /// Latest block of an audio-rate output lane; empty for control-rate units
    fn block(&self, _lane: usize) -> &[f32] {
        &[]
    }

    /// Switch to a catalog wavetable; false if the unit has none
    fn load_wavetable(&mut self, _index: usize) -> bool {
        false
    }

    /// Whether an attack should consume one throw-away quantum to seed the
    /// previous output generation
    fn primes_on_attack(&self) -> bool {
        false
    }
}

/// Construct a unit of the given kind
pub fn spawn_unit(kind: UnitKind, sample_rate: f32, seed: u64) -> Box<dyn ProcessingUnit> {
    match kind {
        UnitKind::Oscillator(osc) => Box::new(Oscillator::new(osc, sample_rate, seed)),
        UnitKind::Lfo => Box::new(Lfo::new(sample_rate, seed)),
        UnitKind::Envelope => Box::new(Envelope::new(sample_rate)),
        UnitKind::Filter => Box::new(Filter::new(sample_rate)),
        UnitKind::Effect(fx) => Box::new(Effect::new(fx, sample_rate, seed)),
    }
}
