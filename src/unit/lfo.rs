//! Low-frequency oscillator unit
//!
//! Runs at control rate: each `process_block` advances the quantum's span of
//! time and produces a single value per lane.
//!
//! | Lane | Output |
//! |------|--------|
//! | 0 | mix (wave × envelope × amplitude) |
//! | 1 | raw wave |
//! | 2 | DAHDSR envelope |

use super::{log2_seconds, ProcessingUnit, Quantum, UnitKind, TIME_LOG2_MAX, TIME_LOG2_MIN};
use crate::scene::{ParamLayout, SceneData};
use crate::tables::shared_tables;
use libm::{exp2f, powf};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Storage slots read by the LFO
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LfoParam {
    Rate = 0,
    Shape,
    StartPhase,
    Magnitude,
    Deform,
    TrigMode,
    Unipolar,
    Delay,
    Hold,
    Attack,
    Decay,
    Sustain,
    Release,
}

impl LfoParam {
    pub const fn index(self) -> usize {
        self as usize
    }
}

pub static LFO_LAYOUT: [ParamLayout; 13] = [
    ParamLayout::float("Rate", -7.0, 9.0, 0.4375),
    ParamLayout::int("Shape", 0, 6, 0.0),
    ParamLayout::float("Phase", 0.0, 1.0, 0.0),
    ParamLayout::float("Amplitude", -1.0, 1.0, 1.0),
    ParamLayout::float("Deform", -1.0, 1.0, 0.5),
    ParamLayout::int("Trigger Mode", 0, 2, 0.5),
    ParamLayout::boolean("Unipolar", false),
    ParamLayout::float("Delay", TIME_LOG2_MIN, TIME_LOG2_MAX, 0.0),
    ParamLayout::float("Hold", TIME_LOG2_MIN, TIME_LOG2_MAX, 0.0),
    ParamLayout::float("Attack", TIME_LOG2_MIN, TIME_LOG2_MAX, 0.0),
    ParamLayout::float("Decay", TIME_LOG2_MIN, TIME_LOG2_MAX, 8.0 / 13.0),
    ParamLayout::float("Sustain", 0.0, 1.0, 1.0),
    ParamLayout::float("Release", TIME_LOG2_MIN, TIME_LOG2_MAX, 5.0 / 13.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LfoShape {
    Sine,
    Triangle,
    Square,
    Ramp,
    Noise,
    SampleHold,
    /// The wave is constant and the envelope is the output
    Envelope,
}

impl LfoShape {
    pub fn from_index(index: i32) -> Self {
        match index {
            1 => LfoShape::Triangle,
            2 => LfoShape::Square,
            3 => LfoShape::Ramp,
            4 => LfoShape::Noise,
            5 => LfoShape::SampleHold,
            6 => LfoShape::Envelope,
            _ => LfoShape::Sine,
        }
    }
}

/// How an attack treats the phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrigMode {
    FreeRun,
    KeyTrigger,
    Random,
}

impl TrigMode {
    fn from_index(index: i32) -> Self {
        match index {
            0 => TrigMode::FreeRun,
            2 => TrigMode::Random,
            _ => TrigMode::KeyTrigger,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvStage {
    Off,
    Delay,
    Attack,
    Hold,
    Decay,
    Sustain,
    Release,
}

/// LFO processing unit
pub struct Lfo {
    sample_rate: f32,
    rng: StdRng,
    phase: f32,
    stage: EnvStage,
    stage_time: f32,
    env: f32,
    release_from: f32,
    noise: [f32; 2],
    held: f32,
    outputs: [f32; 3],
}

impl Lfo {
    pub fn new(sample_rate: f32, seed: u64) -> Self {
        Self {
            sample_rate,
            rng: StdRng::seed_from_u64(seed),
            phase: 0.0,
            stage: EnvStage::Off,
            stage_time: 0.0,
            env: 0.0,
            release_from: 0.0,
            noise: [0.0; 2],
            held: 0.0,
            outputs: [0.0; 3],
        }
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }

    fn random_bipolar(&mut self) -> f32 {
        self.rng.gen_range(-1.0..=1.0)
    }

    fn new_cycle(&mut self) {
        self.noise[0] = self.noise[1];
        self.noise[1] = self.random_bipolar();
        self.held = self.random_bipolar();
    }

    fn wave(&self, shape: LfoShape, deform: f32) -> f32 {
        let p = self.phase;
        match shape {
            LfoShape::Sine => {
                let s = shared_tables().sine(p);
                // Positive deform squares off the peaks, negative sharpens them
                let k = exp2f(-deform * 2.0);
                s.signum() * powf(s.abs(), k)
            }
            LfoShape::Triangle => {
                let peak = 0.5 + 0.49 * deform;
                if p < peak {
                    2.0 * p / peak - 1.0
                } else {
                    1.0 - 2.0 * (p - peak) / (1.0 - peak)
                }
            }
            LfoShape::Square => {
                if p < 0.5 + 0.49 * deform {
                    1.0
                } else {
                    -1.0
                }
            }
            LfoShape::Ramp => {
                let curved = powf(p, exp2f(deform * 2.0));
                1.0 - 2.0 * curved
            }
            LfoShape::Noise => {
                let t = powf(p, exp2f(-deform));
                self.noise[0] + (self.noise[1] - self.noise[0]) * t
            }
            LfoShape::SampleHold => self.held,
            LfoShape::Envelope => 1.0,
        }
    }

    fn advance_envelope(&mut self, scene: &SceneData, dt: f32) {
        let time = |p: LfoParam| log2_seconds(scene.f(p.index()));
        let sustain = scene.f(LfoParam::Sustain.index()).clamp(0.0, 1.0);

        self.stage_time += dt;
        // Stages with zero length fall through within one block
        loop {
            match self.stage {
                EnvStage::Off => {
                    self.env = 0.0;
                    return;
                }
                EnvStage::Delay => {
                    let t = time(LfoParam::Delay);
                    if self.stage_time < t {
                        self.env = 0.0;
                        return;
                    }
                    self.stage_time -= t;
                    self.stage = EnvStage::Attack;
                }
                EnvStage::Attack => {
                    let t = time(LfoParam::Attack);
                    if self.stage_time < t {
                        self.env = self.stage_time / t;
                        return;
                    }
                    self.stage_time -= t;
                    self.stage = EnvStage::Hold;
                }
                EnvStage::Hold => {
                    let t = time(LfoParam::Hold);
                    if self.stage_time < t {
                        self.env = 1.0;
                        return;
                    }
                    self.stage_time -= t;
                    self.stage = EnvStage::Decay;
                }
                EnvStage::Decay => {
                    let t = time(LfoParam::Decay);
                    if self.stage_time < t {
                        self.env = 1.0 - (1.0 - sustain) * self.stage_time / t;
                        return;
                    }
                    self.stage = EnvStage::Sustain;
                }
                EnvStage::Sustain => {
                    self.env = sustain;
                    return;
                }
                EnvStage::Release => {
                    let t = time(LfoParam::Release);
                    if self.stage_time < t {
                        self.env = self.release_from * (1.0 - self.stage_time / t);
                        return;
                    }
                    self.stage = EnvStage::Off;
                }
            }
        }
    }
}

impl ProcessingUnit for Lfo {
    fn kind(&self) -> UnitKind {
        UnitKind::Lfo
    }

    fn param_layout(&self) -> &'static [ParamLayout] {
        &LFO_LAYOUT
    }

    fn rebuild(&mut self, sample_rate: f32, seed: u64) {
        *self = Self::new(sample_rate, seed);
    }

    fn init(&mut self, _pitch: f32, scene: &SceneData) {
        self.phase = scene.f(LfoParam::StartPhase.index()).rem_euclid(1.0);
        self.stage = EnvStage::Off;
        self.stage_time = 0.0;
        self.env = 0.0;
        self.noise = [self.random_bipolar(), self.random_bipolar()];
        self.held = self.random_bipolar();
        self.outputs = [0.0; 3];
    }

    fn attack(&mut self, scene: &SceneData) {
        match TrigMode::from_index(scene.i(LfoParam::TrigMode.index())) {
            TrigMode::FreeRun => {}
            TrigMode::KeyTrigger => {
                self.phase = scene.f(LfoParam::StartPhase.index()).rem_euclid(1.0);
            }
            TrigMode::Random => self.phase = self.rng.gen::<f32>(),
        }
        self.stage = EnvStage::Delay;
        self.stage_time = 0.0;
        self.env = 0.0;
    }

    fn release(&mut self) {
        if self.stage != EnvStage::Off && self.stage != EnvStage::Release {
            self.release_from = self.env;
            self.stage = EnvStage::Release;
            self.stage_time = 0.0;
        }
    }

    fn process_block(&mut self, quantum: &Quantum<'_>) {
        let scene = quantum.scene;
        let dt = quantum.samples as f32 / self.sample_rate;
        let rate_hz = exp2f(scene.f(LfoParam::Rate.index()));

        self.phase += rate_hz * dt;
        if self.phase >= 1.0 {
            self.phase = self.phase.fract();
            self.new_cycle();
        }

        self.advance_envelope(scene, dt);

        let shape = LfoShape::from_index(scene.i(LfoParam::Shape.index()));
        let mut wave = self.wave(shape, scene.f(LfoParam::Deform.index()));
        if scene.b(LfoParam::Unipolar.index()) && shape != LfoShape::Envelope {
            wave = 0.5 * (wave + 1.0);
        }
        let amplitude = scene.f(LfoParam::Magnitude.index());

        self.outputs = [wave * self.env * amplitude, wave, self.env];
    }

    fn output(&self, lane: usize) -> f32 {
        self.outputs.get(lane).copied().unwrap_or(0.0)
    }

    fn primes_on_attack(&self) -> bool {
        true
    }
}
