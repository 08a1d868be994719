//! Stereo effect units
//!
//! Effects take one block of stereo audio per quantum and return one block
//! per side on lanes 0 (left) and 1 (right). Delay memory is sized for
//! [`MAX_SAMPLE_RATE`] when the unit is built, so `rebuild` at a new rate only
//! clears it.
//!
//! Low and high cut stages are skipped while their parameter is deactivated.

use super::{ProcessingUnit, Quantum, UnitKind};
use crate::scene::{ParamLayout, SceneData};
use crate::BLOCK_SIZE;
use core::f32::consts::{PI, TAU};
use libm::{cosf, exp2f, expf, powf, sinf};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Highest sample rate delay memory is sized for
pub const MAX_SAMPLE_RATE: f32 = 192000.0;

const CHORUS_VOICES: usize = 4;
const CHORUS_PANS: [f32; CHORUS_VOICES] = [0.0, 1.0, 0.33, 0.67];

/// Effect algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectKind {
    /// Four-voice modulated delay
    Chorus,
    /// Comb and allpass room with an EQ stage
    Reverb,
    /// Dispersive spring tank that can be knocked
    Spring,
}

/// Static per-kind behavior the effect module consults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectConfig {
    /// A clock input sets the modulation rate's tempo
    pub uses_clock: bool,
    /// Module parameters beyond the engine parameters
    pub specific_params: usize,
    /// Inputs beyond stereo audio, clock and modulation
    pub extra_inputs: usize,
}

impl EffectKind {
    pub fn config(&self) -> EffectConfig {
        match self {
            EffectKind::Chorus => EffectConfig {
                uses_clock: true,
                specific_params: 2,
                extra_inputs: 0,
            },
            EffectKind::Reverb => EffectConfig {
                uses_clock: false,
                specific_params: 2,
                extra_inputs: 0,
            },
            EffectKind::Spring => EffectConfig {
                uses_clock: false,
                specific_params: 1,
                extra_inputs: 1,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EffectKind::Chorus => "Chorus",
            EffectKind::Reverb => "Reverb",
            EffectKind::Spring => "Spring Reverb",
        }
    }

    pub fn layout(&self) -> &'static [ParamLayout] {
        match self {
            EffectKind::Chorus => &CHORUS_LAYOUT,
            EffectKind::Reverb => &REVERB_LAYOUT,
            EffectKind::Spring => &SPRING_LAYOUT,
        }
    }

    /// Engine slots of the (low cut, high cut) stages, if the kind has them
    pub fn cut_params(&self) -> Option<(usize, usize)> {
        match self {
            EffectKind::Chorus => Some((ChorusParam::LowCut.index(), ChorusParam::HighCut.index())),
            EffectKind::Reverb => Some((ReverbParam::LowCut.index(), ReverbParam::HighCut.index())),
            EffectKind::Spring => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChorusParam {
    Time = 0,
    Rate,
    Depth,
    Feedback,
    LowCut,
    HighCut,
    Mix,
    Width,
}

impl ChorusParam {
    pub const fn index(self) -> usize {
        self as usize
    }
}

pub static CHORUS_LAYOUT: [ParamLayout; 8] = [
    ParamLayout::float("Time", -11.0, -3.0, 0.625),
    ParamLayout::float("Rate", -7.0, 9.0, 0.4375),
    ParamLayout::float("Depth", 0.0, 1.0, 0.3),
    ParamLayout::float("Feedback", -1.0, 1.0, 0.5),
    ParamLayout::float("Low Cut", -72.0, 72.0, 0.25),
    ParamLayout::float("High Cut", -72.0, 72.0, 0.8125),
    ParamLayout::float("Mix", 0.0, 1.0, 1.0),
    ParamLayout::float("Width", 0.0, 1.0, 1.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverbParam {
    PreDelay = 0,
    Shape,
    RoomSize,
    DecayTime,
    Damping,
    LowCut,
    Freq1,
    Gain1,
    HighCut,
    Mix,
    Width,
}

impl ReverbParam {
    pub const fn index(self) -> usize {
        self as usize
    }
}

pub static REVERB_LAYOUT: [ParamLayout; 11] = [
    ParamLayout::float("Pre-Delay", -8.0, -1.0, 0.5),
    ParamLayout::int("Shape", 0, 3, 0.0),
    ParamLayout::float("Room Size", 0.0, 1.0, 0.5),
    ParamLayout::float("Decay Time", -4.0, 6.0, 0.5),
    ParamLayout::float("HF Damping", 0.0, 1.0, 0.2),
    ParamLayout::float("Low Cut", -72.0, 72.0, 0.25),
    ParamLayout::float("Peak Freq", -72.0, 72.0, 0.5),
    ParamLayout::float("Peak Gain", -24.0, 24.0, 0.5),
    ParamLayout::float("High Cut", -72.0, 72.0, 0.75),
    ParamLayout::float("Mix", 0.0, 1.0, 0.33),
    ParamLayout::float("Width", 0.0, 1.0, 1.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpringParam {
    Size = 0,
    Decay,
    Reflections,
    Damping,
    Spin,
    Chaos,
    Knock,
    Mix,
}

impl SpringParam {
    pub const fn index(self) -> usize {
        self as usize
    }
}

pub static SPRING_LAYOUT: [ParamLayout; 8] = [
    ParamLayout::float("Size", 0.0, 1.0, 0.5),
    ParamLayout::float("Decay", 0.0, 1.0, 0.5),
    ParamLayout::float("Reflections", 0.0, 1.0, 0.5),
    ParamLayout::float("Damping", 0.0, 1.0, 0.5),
    ParamLayout::float("Spin", 0.0, 1.0, 0.5),
    ParamLayout::float("Chaos", 0.0, 1.0, 0.0),
    ParamLayout::boolean("Knock", false),
    ParamLayout::float("Mix", 0.0, 1.0, 0.5),
];

/// Frequency in Hz of a pitch in semitones from A440
fn note_hz(semitones: f32) -> f32 {
    440.0 * exp2f(semitones / 12.0)
}

/// Circular delay buffer with fractional reads
#[derive(Debug, Clone)]
struct DelayLine {
    buffer: Vec<f32>,
    write: usize,
}

impl DelayLine {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity.max(4)],
            write: 0,
        }
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write = 0;
    }

    fn push(&mut self, x: f32) {
        self.buffer[self.write] = x;
        self.write = (self.write + 1) % self.buffer.len();
    }

    /// Sample written `delay` samples before the most recent one
    fn read(&self, delay: f32) -> f32 {
        let len = self.buffer.len();
        let delay = delay.clamp(0.0, (len - 2) as f32);
        let whole = delay as usize;
        let frac = delay - whole as f32;
        let newest = self.write + len - 1;
        let a = self.buffer[(newest - whole) % len];
        let b = self.buffer[(newest + len - whole - 1) % len];
        a + (b - a) * frac
    }
}

/// One-pole low-pass; the high-pass is the input minus it
#[derive(Debug, Clone, Copy, Default)]
struct OnePole {
    state: f32,
}

impl OnePole {
    fn coefficient(hz: f32, sample_rate: f32) -> f32 {
        1.0 - expf(-TAU * hz.min(0.45 * sample_rate) / sample_rate)
    }

    fn lowpass(&mut self, x: f32, a: f32) -> f32 {
        self.state += a * (x - self.state);
        self.state
    }

    fn highpass(&mut self, x: f32, a: f32) -> f32 {
        x - self.lowpass(x, a)
    }
}

/// Peaking equalizer biquad
#[derive(Debug, Clone, Copy, Default)]
struct Peak {
    b: [f32; 3],
    a: [f32; 2],
    x: [f32; 2],
    y: [f32; 2],
}

impl Peak {
    fn set(&mut self, hz: f32, gain_db: f32, sample_rate: f32) {
        let w = TAU * hz.min(0.45 * sample_rate) / sample_rate;
        let gain = powf(10.0, gain_db / 40.0);
        let alpha = sinf(w) / (2.0 * 0.707);
        let a0 = 1.0 + alpha / gain;
        self.b = [
            (1.0 + alpha * gain) / a0,
            -2.0 * cosf(w) / a0,
            (1.0 - alpha * gain) / a0,
        ];
        self.a = [-2.0 * cosf(w) / a0, (1.0 - alpha / gain) / a0];
    }

    fn process(&mut self, x: f32) -> f32 {
        let y = self.b[0] * x + self.b[1] * self.x[0] + self.b[2] * self.x[1]
            - self.a[0] * self.y[0]
            - self.a[1] * self.y[1];
        self.x = [x, self.x[0]];
        self.y = [y, self.y[0]];
        y
    }
}

/// Low and high cut on both sides
#[derive(Debug, Clone, Copy, Default)]
struct CutStage {
    low: [OnePole; 2],
    high: [OnePole; 2],
}

impl CutStage {
    fn process(
        &mut self,
        left: &mut [f32],
        right: &mut [f32],
        scene: &SceneData,
        params: (usize, usize),
        sample_rate: f32,
    ) {
        let (low_cut, high_cut) = params;
        if !scene.is_deactivated(low_cut) {
            let a = OnePole::coefficient(note_hz(scene.f(low_cut)), sample_rate);
            for (side, buf) in [&mut *left, &mut *right].into_iter().enumerate() {
                for x in buf.iter_mut() {
                    *x = self.low[side].highpass(*x, a);
                }
            }
        }
        if !scene.is_deactivated(high_cut) {
            let a = OnePole::coefficient(note_hz(scene.f(high_cut)), sample_rate);
            for (side, buf) in [left, right].into_iter().enumerate() {
                for x in buf.iter_mut() {
                    *x = self.high[side].lowpass(*x, a);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Chorus {
    line: DelayLine,
    phase: f32,
    feedback: f32,
}

impl Chorus {
    fn new() -> Self {
        // Longest time at full depth
        let capacity = (2.0 * exp2f(-3.0) * MAX_SAMPLE_RATE) as usize + 4;
        Self {
            line: DelayLine::new(capacity),
            phase: 0.0,
            feedback: 0.0,
        }
    }

    fn reset(&mut self) {
        self.line.clear();
        self.phase = 0.0;
        self.feedback = 0.0;
    }

    fn process(&mut self, q: &Quantum<'_>, sample_rate: f32, wet: &mut [[f32; BLOCK_SIZE]; 2]) {
        let scene = q.scene;
        let time = exp2f(scene.f(ChorusParam::Time.index())) * sample_rate;
        let mut rate = exp2f(scene.f(ChorusParam::Rate.index()));
        if let Some(bpm) = q.tempo {
            rate *= bpm / 120.0;
        }
        let depth = scene.f(ChorusParam::Depth.index()).clamp(0.0, 1.0);
        let feedback = scene.f(ChorusParam::Feedback.index()).clamp(-0.95, 0.95);
        let width = scene.f(ChorusParam::Width.index()).clamp(0.0, 1.0);

        for i in 0..BLOCK_SIZE {
            let x = 0.5 * (input_at(q.input, i) + input_at(right_input(q), i));
            self.line.push(x + feedback * self.feedback);

            let (mut l, mut r) = (0.0, 0.0);
            let mut sum = 0.0;
            for (v, pan) in CHORUS_PANS.iter().enumerate() {
                let lfo = sinf(TAU * (self.phase + v as f32 / CHORUS_VOICES as f32));
                let tap = self.line.read(time * (1.0 + depth * lfo).max(0.0) + 1.0);
                let pan = 0.5 + (pan - 0.5) * width;
                l += tap * (1.0 - pan);
                r += tap * pan;
                sum += tap;
            }
            self.feedback = sum / CHORUS_VOICES as f32;
            wet[0][i] = l * 2.0 / CHORUS_VOICES as f32;
            wet[1][i] = r * 2.0 / CHORUS_VOICES as f32;

            self.phase = (self.phase + rate / sample_rate).fract();
        }
    }
}

const COMB_TUNING: [usize; 4] = [1116, 1188, 1277, 1356];
const ALLPASS_TUNING: [usize; 2] = [556, 441];
const STEREO_SPREAD: usize = 23;
/// Longest comb scale: largest room at the highest rate
const MAX_ROOM_SCALE: f32 = 1.5 * MAX_SAMPLE_RATE / 44100.0;

#[derive(Debug, Clone)]
struct Comb {
    line: DelayLine,
    damp: f32,
}

#[derive(Debug, Clone)]
struct Reverb {
    predelay: DelayLine,
    combs: [[Comb; 4]; 2],
    allpasses: [[DelayLine; 2]; 2],
    peak: [Peak; 2],
}

impl Reverb {
    fn new() -> Self {
        let scaled = |base: usize| ((base + STEREO_SPREAD) as f32 * MAX_ROOM_SCALE) as usize + 4;
        let comb = |base: usize| Comb {
            line: DelayLine::new(scaled(base)),
            damp: 0.0,
        };
        Self {
            predelay: DelayLine::new((exp2f(-1.0) * MAX_SAMPLE_RATE) as usize + 4),
            combs: std::array::from_fn(|_| COMB_TUNING.map(&comb)),
            allpasses: std::array::from_fn(|_| ALLPASS_TUNING.map(|b| DelayLine::new(scaled(b)))),
            peak: [Peak::default(); 2],
        }
    }

    fn reset(&mut self) {
        self.predelay.clear();
        for comb in self.combs.iter_mut().flatten() {
            comb.line.clear();
            comb.damp = 0.0;
        }
        for ap in self.allpasses.iter_mut().flatten() {
            ap.clear();
        }
        self.peak = [Peak::default(); 2];
    }

    fn process(&mut self, q: &Quantum<'_>, sample_rate: f32, wet: &mut [[f32; BLOCK_SIZE]; 2]) {
        let scene = q.scene;
        let predelay = exp2f(scene.f(ReverbParam::PreDelay.index())) * sample_rate;
        let scale =
            sample_rate / 44100.0 * (0.5 + scene.f(ReverbParam::RoomSize.index()).clamp(0.0, 1.0));
        let decay = exp2f(scene.f(ReverbParam::DecayTime.index()));
        let damping = 0.4 * scene.f(ReverbParam::Damping.index()).clamp(0.0, 1.0);
        let diffusion = 0.5 + 0.1 * scene.i(ReverbParam::Shape.index()) as f32;
        let width = scene.f(ReverbParam::Width.index()).clamp(0.0, 1.0);
        for peak in &mut self.peak {
            peak.set(
                note_hz(scene.f(ReverbParam::Freq1.index())),
                scene.f(ReverbParam::Gain1.index()),
                sample_rate,
            );
        }

        for i in 0..BLOCK_SIZE {
            let x = 0.5 * (input_at(q.input, i) + input_at(right_input(q), i));
            self.predelay.push(x);
            let x = 0.1 * self.predelay.read(predelay);

            let mut out = [0.0f32; 2];
            for side in 0..2 {
                let spread = side * STEREO_SPREAD;
                for (comb, base) in self.combs[side].iter_mut().zip(COMB_TUNING) {
                    let len = ((base + spread) as f32 * scale).max(1.0);
                    // -60 dB after the decay time
                    let g = powf(10.0, -3.0 * len / (sample_rate * decay));
                    let y = comb.line.read(len - 1.0);
                    comb.damp = y * (1.0 - damping) + comb.damp * damping;
                    comb.line.push(x + comb.damp * g);
                    out[side] += y;
                }
                for (ap, base) in self.allpasses[side].iter_mut().zip(ALLPASS_TUNING) {
                    let len = ((base + spread) as f32 * scale).max(1.0);
                    let buffered = ap.read(len - 1.0);
                    ap.push(out[side] + buffered * diffusion);
                    out[side] = buffered - out[side];
                }
                out[side] = self.peak[side].process(out[side]);
            }

            let mid = 0.5 * (out[0] + out[1]);
            wet[0][i] = mid + (out[0] - mid) * width;
            wet[1][i] = mid + (out[1] - mid) * width;
        }
    }
}

const SPRING_STAGES: usize = 6;

#[derive(Debug, Clone)]
struct Spring {
    line: DelayLine,
    dispersion: [f32; SPRING_STAGES],
    damp: f32,
    phase: f32,
    wander: f32,
    knocked: bool,
    rng: StdRng,
}

impl Spring {
    /// Longest tank, plus modulation headroom
    const MAX_SECONDS: f32 = 0.08;

    fn new(seed: u64) -> Self {
        Self {
            line: DelayLine::new((Self::MAX_SECONDS * MAX_SAMPLE_RATE) as usize + 4),
            dispersion: [0.0; SPRING_STAGES],
            damp: 0.0,
            phase: 0.0,
            wander: 0.0,
            knocked: false,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn reset(&mut self, seed: u64) {
        self.line.clear();
        self.dispersion = [0.0; SPRING_STAGES];
        self.damp = 0.0;
        self.phase = 0.0;
        self.wander = 0.0;
        self.knocked = false;
        self.rng = StdRng::seed_from_u64(seed);
    }

    fn process(&mut self, q: &Quantum<'_>, sample_rate: f32, wet: &mut [[f32; BLOCK_SIZE]; 2]) {
        let scene = q.scene;
        let size = scene.f(SpringParam::Size.index()).clamp(0.0, 1.0);
        let len = (0.01 + 0.06 * size) * sample_rate;
        let g = 0.5 + 0.48 * scene.f(SpringParam::Decay.index()).clamp(0.0, 1.0);
        let allpass = -0.3 - 0.6 * scene.f(SpringParam::Reflections.index()).clamp(0.0, 1.0);
        let damping = 0.8 * scene.f(SpringParam::Damping.index()).clamp(0.0, 1.0);
        let spin_hz = 0.1 + 4.0 * scene.f(SpringParam::Spin.index()).clamp(0.0, 1.0);
        let chaos = scene.f(SpringParam::Chaos.index()).clamp(0.0, 1.0);

        // One impulse per press, however long the knock is held
        let knock = scene.b(SpringParam::Knock.index());
        let mut impulse = if knock && !self.knocked { 1.0 } else { 0.0 };
        self.knocked = knock;

        for i in 0..BLOCK_SIZE {
            let x = 0.5 * (input_at(q.input, i) + input_at(right_input(q), i)) + impulse;
            impulse = 0.0;

            self.wander += 0.001 * (self.rng.gen_range(-1.0f32..=1.0) - self.wander);
            let swing = 0.002 * sinf(TAU * self.phase) + 0.01 * chaos * self.wander;
            self.phase = (self.phase + spin_hz / sample_rate).fract();

            let y = self.line.read(len * (1.0 + swing));
            self.damp = y * (1.0 - damping) + self.damp * damping;

            let mut v = x + self.damp * g;
            for z in &mut self.dispersion {
                let out = allpass * v + *z;
                *z = v - allpass * out;
                v = out;
            }
            self.line.push(v);

            wet[0][i] = y;
            wet[1][i] = self.line.read(len * 0.93 * (1.0 - swing));
        }
    }
}

#[derive(Debug, Clone)]
enum Engine {
    Chorus(Chorus),
    Reverb(Box<Reverb>),
    Spring(Spring),
}

#[inline]
fn input_at(input: &[f32], i: usize) -> f32 {
    input.get(i).copied().unwrap_or(0.0)
}

/// Right input, falling back to the left for a mono source
#[inline]
fn right_input<'a>(q: &Quantum<'a>) -> &'a [f32] {
    if q.input_right.is_empty() {
        q.input
    } else {
        q.input_right
    }
}

/// Stereo effect processing unit
pub struct Effect {
    kind: EffectKind,
    sample_rate: f32,
    seed: u64,
    engine: Engine,
    cut: CutStage,
    wet: [[f32; BLOCK_SIZE]; 2],
    out: [[f32; BLOCK_SIZE]; 2],
}

impl Effect {
    pub fn new(kind: EffectKind, sample_rate: f32, seed: u64) -> Self {
        let engine = match kind {
            EffectKind::Chorus => Engine::Chorus(Chorus::new()),
            EffectKind::Reverb => Engine::Reverb(Box::new(Reverb::new())),
            EffectKind::Spring => Engine::Spring(Spring::new(seed)),
        };
        if sample_rate > MAX_SAMPLE_RATE {
            tracing::warn!(sample_rate, "effect delay memory caps at {MAX_SAMPLE_RATE} Hz");
        }
        Self {
            kind,
            sample_rate,
            seed,
            engine,
            cut: CutStage::default(),
            wet: [[0.0; BLOCK_SIZE]; 2],
            out: [[0.0; BLOCK_SIZE]; 2],
        }
    }

    pub fn effect_kind(&self) -> EffectKind {
        self.kind
    }

    fn clear(&mut self) {
        match &mut self.engine {
            Engine::Chorus(c) => c.reset(),
            Engine::Reverb(r) => r.reset(),
            Engine::Spring(s) => s.reset(self.seed),
        }
        self.cut = CutStage::default();
        self.wet = [[0.0; BLOCK_SIZE]; 2];
        self.out = [[0.0; BLOCK_SIZE]; 2];
    }

    fn mix_param(&self) -> usize {
        match self.kind {
            EffectKind::Chorus => ChorusParam::Mix.index(),
            EffectKind::Reverb => ReverbParam::Mix.index(),
            EffectKind::Spring => SpringParam::Mix.index(),
        }
    }
}

impl ProcessingUnit for Effect {
    fn kind(&self) -> UnitKind {
        UnitKind::Effect(self.kind)
    }

    fn param_layout(&self) -> &'static [ParamLayout] {
        self.kind.layout()
    }

    fn rebuild(&mut self, sample_rate: f32, seed: u64) {
        self.sample_rate = sample_rate;
        self.seed = seed;
        self.clear();
    }

    fn init(&mut self, _pitch: f32, _scene: &SceneData) {
        self.clear();
    }

    fn process_block(&mut self, quantum: &Quantum<'_>) {
        let sr = self.sample_rate;
        match &mut self.engine {
            Engine::Chorus(c) => c.process(quantum, sr, &mut self.wet),
            Engine::Reverb(r) => r.process(quantum, sr, &mut self.wet),
            Engine::Spring(s) => s.process(quantum, sr, &mut self.wet),
        }
        if let Some(params) = self.kind.cut_params() {
            let [left, right] = &mut self.wet;
            self.cut.process(left, right, quantum.scene, params, sr);
        }

        let mix = quantum.scene.f(self.mix_param()).clamp(0.0, 1.0);
        // Equal-power crossfade
        let (dry_gain, wet_gain) = (cosf(0.5 * PI * mix), sinf(0.5 * PI * mix));
        for i in 0..BLOCK_SIZE {
            let dry = [input_at(quantum.input, i), input_at(right_input(quantum), i)];
            for side in 0..2 {
                self.out[side][i] = dry[side] * dry_gain + self.wet[side][i] * wet_gain;
            }
        }
    }

    fn output(&self, lane: usize) -> f32 {
        self.block(lane).last().copied().unwrap_or(0.0)
    }

    fn block(&self, lane: usize) -> &[f32] {
        match self.out.get(lane) {
            Some(block) => block,
            None => &[],
        }
    }
}
