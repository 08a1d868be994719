//! State-variable filter unit
//!
//! A 12 dB/oct Chamberlin SVF that filters one block of input audio per
//! quantum. Cutoff and resonance are taken from the scene once per block.

use super::{ProcessingUnit, Quantum, UnitKind};
use crate::scene::{ParamLayout, SceneData};
use crate::BLOCK_SIZE;
use libm::{exp2f, sinf, tanhf};
use std::f32::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterParam {
    /// Semitones relative to 440 Hz
    Cutoff = 0,
    Resonance,
    Drive,
    Mode,
}

impl FilterParam {
    pub const fn index(self) -> usize {
        self as usize
    }
}

pub static FILTER_LAYOUT: [ParamLayout; 4] = [
    ParamLayout::float("Cutoff", -60.0, 70.0, 60.0 / 130.0),
    ParamLayout::float("Resonance", 0.0, 1.0, 0.0),
    ParamLayout::float("Drive", 0.0, 1.0, 0.0),
    ParamLayout::int("Mode", 0, 3, 0.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    LowPass,
    BandPass,
    HighPass,
    Notch,
}

impl FilterMode {
    pub fn from_index(index: i32) -> Self {
        match index {
            1 => FilterMode::BandPass,
            2 => FilterMode::HighPass,
            3 => FilterMode::Notch,
            _ => FilterMode::LowPass,
        }
    }
}

/// Filter processing unit
pub struct Filter {
    sample_rate: f32,
    low: f32,
    band: f32,
    out: [f32; BLOCK_SIZE],
}

impl Filter {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            low: 0.0,
            band: 0.0,
            out: [0.0; BLOCK_SIZE],
        }
    }

    fn coefficient(&self, cutoff_semitones: f32) -> f32 {
        let hz = 440.0 * exp2f(cutoff_semitones / 12.0);
        // The Chamberlin topology goes unstable as f approaches 1
        (2.0 * sinf(PI * (hz / self.sample_rate).min(0.25))).min(0.99)
    }
}

impl ProcessingUnit for Filter {
    fn kind(&self) -> UnitKind {
        UnitKind::Filter
    }

    fn param_layout(&self) -> &'static [ParamLayout] {
        &FILTER_LAYOUT
    }

    fn rebuild(&mut self, sample_rate: f32, _seed: u64) {
        *self = Self::new(sample_rate);
    }

    fn init(&mut self, _pitch: f32, _scene: &SceneData) {
        self.low = 0.0;
        self.band = 0.0;
        self.out = [0.0; BLOCK_SIZE];
    }

    fn process_block(&mut self, quantum: &Quantum<'_>) {
        let scene = quantum.scene;
        let f = self.coefficient(scene.f(FilterParam::Cutoff.index()));
        let q = 1.0 - scene.f(FilterParam::Resonance.index()).clamp(0.0, 1.0) * 0.9;
        let drive = 1.0 + 4.0 * scene.f(FilterParam::Drive.index()).clamp(0.0, 1.0);
        let mode = FilterMode::from_index(scene.i(FilterParam::Mode.index()));

        for (i, out) in self.out.iter_mut().enumerate() {
            let x = quantum.input.get(i).copied().unwrap_or(0.0);
            let x = if drive > 1.0 { tanhf(x * drive) } else { x };

            let high = x - self.low - q * self.band;
            self.band += f * high;
            self.low += f * self.band;

            *out = match mode {
                FilterMode::LowPass => self.low,
                FilterMode::BandPass => self.band,
                FilterMode::HighPass => high,
                FilterMode::Notch => high + self.low,
            };
        }
    }

    fn output(&self, lane: usize) -> f32 {
        self.block(lane).last().copied().unwrap_or(0.0)
    }

    fn block(&self, lane: usize) -> &[f32] {
        if lane == 0 {
            &self.out
        } else {
            &[]
        }
    }
}
