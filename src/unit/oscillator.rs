//! Oscillator units
//!
//! Oscillators render at twice the engine rate and decimate each block back
//! down through a half-band filter. Lanes 0 and 1 are the left and right
//! blocks.

use super::{ProcessingUnit, Quantum, UnitKind};
use crate::scene::{ParamLayout, SceneData};
use crate::tables::shared_tables;
use crate::{BLOCK_SIZE, BLOCK_SIZE_OS};
use libm::{sqrtf, tanhf};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Engine parameters per oscillator
pub const N_OSC_PARAMS: usize = 4;

/// Most stacked unison voices per oscillator
const MAX_UNISON: usize = 16;

/// Oscillator algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OscillatorKind {
    /// Saw/pulse morph with unison
    Classic,
    /// Feedback sine with wavefolding
    Sine,
    /// Frame-morphing wavetable with unison
    Wavetable,
}

/// Static per-kind behavior the modules consult
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OscillatorConfig {
    /// The last engine parameter is the unison voice count
    pub supports_unison: bool,
    pub requires_wavetables: bool,
}

impl OscillatorConfig {
    /// Capacity of the UI-to-audio wavetable queue
    pub fn wavetable_queue_size(&self) -> usize {
        if self.requires_wavetables {
            32
        } else {
            1
        }
    }
}

impl OscillatorKind {
    pub fn config(&self) -> OscillatorConfig {
        match self {
            OscillatorKind::Classic => OscillatorConfig {
                supports_unison: true,
                requires_wavetables: false,
            },
            OscillatorKind::Sine => OscillatorConfig {
                supports_unison: false,
                requires_wavetables: false,
            },
            OscillatorKind::Wavetable => OscillatorConfig {
                supports_unison: true,
                requires_wavetables: true,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OscillatorKind::Classic => "Classic",
            OscillatorKind::Sine => "Sine",
            OscillatorKind::Wavetable => "Wavetable",
        }
    }

    fn layout(&self) -> &'static [ParamLayout] {
        match self {
            OscillatorKind::Classic => &CLASSIC_LAYOUT,
            OscillatorKind::Sine => &SINE_LAYOUT,
            OscillatorKind::Wavetable => &WAVETABLE_LAYOUT,
        }
    }
}

static CLASSIC_LAYOUT: [ParamLayout; N_OSC_PARAMS] = [
    ParamLayout::float("Shape", 0.0, 1.0, 0.0),
    ParamLayout::float("Width", 0.01, 0.99, 0.5),
    ParamLayout::float("Unison Detune", 0.0, 1.0, 0.2),
    ParamLayout::int("Unison Voices", 1, 16, 0.0),
];

static SINE_LAYOUT: [ParamLayout; N_OSC_PARAMS] = [
    ParamLayout::float("Feedback", -1.0, 1.0, 0.5),
    ParamLayout::float("Fold", 0.0, 1.0, 0.0),
    ParamLayout::float("Stereo Width", 0.0, 1.0, 0.0),
    ParamLayout::float("Level", 0.0, 1.0, 1.0),
];

static WAVETABLE_LAYOUT: [ParamLayout; N_OSC_PARAMS] = [
    ParamLayout::float("Morph", 0.0, 1.0, 0.0),
    ParamLayout::float("Saturate", 0.0, 1.0, 0.0),
    ParamLayout::float("Unison Detune", 0.0, 1.0, 0.2),
    ParamLayout::int("Unison Voices", 1, 16, 0.0),
];

/// Seven-tap half-band FIR
const HALFBAND_TAPS: [f32; 7] = [
    -0.039_62, 0.0, 0.289_62, 0.5, 0.289_62, 0.0, -0.039_62,
];

/// 2:1 decimator for oversampled blocks
#[derive(Debug, Clone, Default)]
pub struct HalfRateDecimator {
    history: [f32; 7],
}

impl HalfRateDecimator {
    pub fn reset(&mut self) {
        self.history = [0.0; 7];
    }

    /// Decimate `input` into `output`, which must be half as long
    pub fn process_block(&mut self, input: &[f32], output: &mut [f32]) {
        for (out, pair) in output.iter_mut().zip(input.chunks_exact(2)) {
            for &x in pair {
                self.history.copy_within(0..6, 1);
                self.history[0] = x;
            }
            *out = self
                .history
                .iter()
                .zip(HALFBAND_TAPS.iter())
                .map(|(h, t)| h * t)
                .sum();
        }
    }
}

/// Oscillator processing unit
pub struct Oscillator {
    kind: OscillatorKind,
    sample_rate: f32,
    rng: StdRng,
    phases: [f32; MAX_UNISON],
    voices: usize,
    wavetable: usize,
    feedback_state: [f32; 2],
    os_left: [f32; BLOCK_SIZE_OS],
    os_right: [f32; BLOCK_SIZE_OS],
    left: [f32; BLOCK_SIZE],
    right: [f32; BLOCK_SIZE],
    decimators: [HalfRateDecimator; 2],
}

impl Oscillator {
    pub fn new(kind: OscillatorKind, sample_rate: f32, seed: u64) -> Self {
        Self {
            kind,
            sample_rate,
            rng: StdRng::seed_from_u64(seed),
            phases: [0.0; MAX_UNISON],
            voices: 1,
            wavetable: 0,
            feedback_state: [0.0; 2],
            os_left: [0.0; BLOCK_SIZE_OS],
            os_right: [0.0; BLOCK_SIZE_OS],
            left: [0.0; BLOCK_SIZE],
            right: [0.0; BLOCK_SIZE],
            decimators: Default::default(),
        }
    }

    /// Active unison voices
    pub fn unison_voices(&self) -> usize {
        self.voices
    }

    pub fn wavetable_index(&self) -> usize {
        self.wavetable
    }

    /// Position of unison voice `v` in -1..1
    fn spread(&self, v: usize) -> f32 {
        if self.voices > 1 {
            2.0 * v as f32 / (self.voices - 1) as f32 - 1.0
        } else {
            0.0
        }
    }

    fn render_classic(&mut self, pitch: f32, scene: &SceneData) {
        let tables = shared_tables();
        let shape = scene.f(0);
        let width = scene.f(1);
        let detune = scene.f(2);
        let norm = 1.0 / sqrtf(self.voices as f32);

        self.os_left.fill(0.0);
        self.os_right.fill(0.0);
        for v in 0..self.voices {
            let spread = self.spread(v);
            let dt = tables.note_to_frequency(pitch + detune * spread)
                / (2.0 * self.sample_rate);
            let gain_l = (1.0 - spread.max(0.0)) * norm;
            let gain_r = (1.0 + spread.min(0.0)) * norm;
            let mut phase = self.phases[v];
            for i in 0..BLOCK_SIZE_OS {
                let saw = 2.0 * phase - 1.0;
                let pulse = if phase < width { 1.0 } else { -1.0 };
                let s = saw + (pulse - saw) * shape;
                self.os_left[i] += s * gain_l;
                self.os_right[i] += s * gain_r;
                phase = (phase + dt).fract();
            }
            self.phases[v] = phase;
        }
    }

    fn render_sine(&mut self, pitch: f32, scene: &SceneData) {
        let tables = shared_tables();
        let feedback = scene.f(0);
        let fold = scene.f(1);
        let width = scene.f(2) * 0.5;
        let level = scene.f(3);
        let dt = tables.note_to_frequency(pitch) / (2.0 * self.sample_rate);
        let drive = 1.0 + 3.0 * fold;

        let mut phase = self.phases[0];
        for i in 0..BLOCK_SIZE_OS {
            let fb_l = self.feedback_state[0] * feedback * 0.25;
            let fb_r = self.feedback_state[1] * feedback * 0.25;
            let l = tables.sine(phase + fb_l);
            let r = tables.sine(phase + width + fb_r);
            self.feedback_state = [l, r];
            self.os_left[i] = fold_back(l * drive) * level;
            self.os_right[i] = fold_back(r * drive) * level;
            phase = (phase + dt).fract();
        }
        self.phases[0] = phase;
    }

    fn render_wavetable(&mut self, pitch: f32, scene: &SceneData) {
        let tables = shared_tables();
        let Some(table) = tables.wavetable(self.wavetable) else {
            self.os_left.fill(0.0);
            self.os_right.fill(0.0);
            return;
        };
        let morph = scene.f(0);
        let saturate = scene.f(1);
        let detune = scene.f(2);
        let norm = 1.0 / sqrtf(self.voices as f32);
        let drive = 1.0 + 4.0 * saturate;

        self.os_left.fill(0.0);
        self.os_right.fill(0.0);
        for v in 0..self.voices {
            let spread = self.spread(v);
            let dt = tables.note_to_frequency(pitch + detune * spread)
                / (2.0 * self.sample_rate);
            let gain_l = (1.0 - spread.max(0.0)) * norm;
            let gain_r = (1.0 + spread.min(0.0)) * norm;
            let mut phase = self.phases[v];
            for i in 0..BLOCK_SIZE_OS {
                let s = tanhf(table.read(phase, morph) * drive) / tanhf(drive);
                self.os_left[i] += s * gain_l;
                self.os_right[i] += s * gain_r;
                phase = (phase + dt).fract();
            }
            self.phases[v] = phase;
        }
    }
}

/// Reflect a signal back into -1..1
fn fold_back(x: f32) -> f32 {
    let mut y = x;
    while y.abs() > 1.0 {
        y = y.signum() * 2.0 - y;
    }
    y
}

impl ProcessingUnit for Oscillator {
    fn kind(&self) -> UnitKind {
        UnitKind::Oscillator(self.kind)
    }

    fn param_layout(&self) -> &'static [ParamLayout] {
        self.kind.layout()
    }

    fn rebuild(&mut self, sample_rate: f32, seed: u64) {
        *self = Self::new(self.kind, sample_rate, seed);
    }

    fn init(&mut self, _pitch: f32, scene: &SceneData) {
        self.voices = if self.kind.config().supports_unison {
            scene.i(N_OSC_PARAMS - 1).clamp(1, MAX_UNISON as i32) as usize
        } else {
            1
        };
        // The first voice always starts at zero phase so retriggers are repeatable
        self.phases[0] = 0.0;
        for v in 1..self.voices {
            self.phases[v] = self.rng.gen::<f32>();
        }
        self.feedback_state = [0.0; 2];
        for d in &mut self.decimators {
            d.reset();
        }
    }

    fn process_block(&mut self, quantum: &Quantum<'_>) {
        match self.kind {
            OscillatorKind::Classic => self.render_classic(quantum.pitch, quantum.scene),
            OscillatorKind::Sine => self.render_sine(quantum.pitch, quantum.scene),
            OscillatorKind::Wavetable => self.render_wavetable(quantum.pitch, quantum.scene),
        }
        let [dl, dr] = &mut self.decimators;
        dl.process_block(&self.os_left, &mut self.left);
        dr.process_block(&self.os_right, &mut self.right);
    }

    fn output(&self, lane: usize) -> f32 {
        self.block(lane).last().copied().unwrap_or(0.0)
    }

    fn block(&self, lane: usize) -> &[f32] {
        match lane {
            0 => &self.left,
            1 => &self.right,
            _ => &[],
        }
    }

    fn load_wavetable(&mut self, index: usize) -> bool {
        if !self.kind.config().requires_wavetables {
            return false;
        }
        if shared_tables().wavetable(index).is_none() {
            tracing::warn!(index, "wavetable index out of range");
            return false;
        }
        self.wavetable = index;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::ParamStorage;
    use approx::assert_abs_diff_eq;

    fn staged(kind: OscillatorKind, edit: impl Fn(&mut ParamStorage)) -> SceneData {
        let osc = Oscillator::new(kind, 48000.0, 0);
        let mut storage = ParamStorage::new();
        osc.init_ctrltypes(&mut storage);
        osc.init_default_values(&mut storage);
        edit(&mut storage);
        let mut scene = SceneData::with_len(storage.len());
        scene.copy_all(&storage);
        scene
    }

    fn rms(block: &[f32]) -> f32 {
        sqrtf(block.iter().map(|x| x * x).sum::<f32>() / block.len() as f32)
    }

    #[test]
    fn test_config_table() {
        assert!(OscillatorKind::Classic.config().supports_unison);
        assert!(!OscillatorKind::Sine.config().supports_unison);
        assert_eq!(OscillatorKind::Wavetable.config().wavetable_queue_size(), 32);
        assert_eq!(OscillatorKind::Classic.config().wavetable_queue_size(), 1);
    }

    #[test]
    fn test_decimator_passes_dc() {
        let mut d = HalfRateDecimator::default();
        let input = [1.0f32; 64];
        let mut output = [0.0f32; 32];
        d.process_block(&input, &mut output);
        assert_abs_diff_eq!(output[31], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_decimator_rejects_nyquist() {
        let mut d = HalfRateDecimator::default();
        let input: Vec<f32> = (0..64).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let mut output = [0.0f32; 32];
        d.process_block(&input, &mut output);
        assert!(output[31].abs() < 0.1);
    }

    #[test]
    fn test_classic_produces_audio() {
        let scene = staged(OscillatorKind::Classic, |_| {});
        let mut osc = Oscillator::new(OscillatorKind::Classic, 48000.0, 0);
        osc.init(60.0, &scene);
        for _ in 0..8 {
            osc.process_block(&Quantum::new(60.0, &scene));
        }
        assert_eq!(osc.block(0).len(), BLOCK_SIZE);
        assert!(rms(osc.block(0)) > 0.1);
        assert!(osc.block(0).iter().all(|x| x.abs() <= 1.5));
        assert!(osc.block(2).is_empty());
    }

    #[test]
    fn test_unison_count_read_at_init() {
        let scene = staged(OscillatorKind::Classic, |s| s.set_value_f01(3, 1.0));
        let mut osc = Oscillator::new(OscillatorKind::Classic, 48000.0, 0);
        osc.init(60.0, &scene);
        assert_eq!(osc.unison_voices(), 16);

        let scene = staged(OscillatorKind::Sine, |_| {});
        let mut sine = Oscillator::new(OscillatorKind::Sine, 48000.0, 0);
        sine.init(60.0, &scene);
        assert_eq!(sine.unison_voices(), 1);
    }

    #[test]
    fn test_init_restarts_phase() {
        let scene = staged(OscillatorKind::Classic, |_| {});
        let mut a = Oscillator::new(OscillatorKind::Classic, 48000.0, 0);
        a.init(60.0, &scene);
        a.process_block(&Quantum::new(60.0, &scene));
        let first: Vec<f32> = a.block(0).to_vec();

        a.process_block(&Quantum::new(60.0, &scene));
        a.init(60.0, &scene);
        a.process_block(&Quantum::new(60.0, &scene));
        assert_eq!(a.block(0), first.as_slice());
    }

    #[test]
    fn test_wavetable_loading() {
        let mut osc = Oscillator::new(OscillatorKind::Wavetable, 48000.0, 0);
        assert!(osc.load_wavetable(2));
        assert_eq!(osc.wavetable_index(), 2);
        assert!(!osc.load_wavetable(10_000));
        assert_eq!(osc.wavetable_index(), 2);

        let mut classic = Oscillator::new(OscillatorKind::Classic, 48000.0, 0);
        assert!(!classic.load_wavetable(2));
    }

    #[test]
    fn test_fold_back() {
        assert_abs_diff_eq!(fold_back(0.5), 0.5);
        assert_abs_diff_eq!(fold_back(1.5), 0.5);
        assert_abs_diff_eq!(fold_back(-1.25), -0.75);
    }
}
