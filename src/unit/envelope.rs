//! Function generator envelope
//!
//! A rise/fall envelope with two modes. In trigger mode an attack rises to the
//! level and immediately falls over the decay time. In gate mode the envelope
//! holds at the level until `release`, then falls over the same time.
//!
//! Lanes: 0 envelope, 1 end-of-rise pulse, 2 end-of-cycle pulse. Pulses are
//! 1.0 for the block in which the event happened.

use super::{log2_seconds, ProcessingUnit, Quantum, UnitKind, TIME_LOG2_MAX, TIME_LOG2_MIN};
use crate::scene::{ParamLayout, SceneData};
use libm::{exp2f, powf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeParam {
    Attack = 0,
    Decay,
    Curve,
    Level,
    /// Off: trigger (attack/decay); on: gate (attack/release)
    GateMode,
    AttackFromZero,
}

impl EnvelopeParam {
    pub const fn index(self) -> usize {
        self as usize
    }
}

pub static ENVELOPE_LAYOUT: [ParamLayout; 6] = [
    ParamLayout::float("Attack", TIME_LOG2_MIN, TIME_LOG2_MAX, 4.0 / 13.0),
    ParamLayout::float("Decay", TIME_LOG2_MIN, TIME_LOG2_MAX, 7.0 / 13.0),
    ParamLayout::float("Curve", -1.0, 1.0, 0.5),
    ParamLayout::float("Level", 0.0, 1.0, 1.0),
    ParamLayout::boolean("Gate Mode", false),
    ParamLayout::boolean("Attack From Zero", true),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    Rise,
    Hold,
    Fall,
}

/// Envelope processing unit
pub struct Envelope {
    sample_rate: f32,
    stage: Stage,
    stage_time: f32,
    level: f32,
    from: f32,
    gated: bool,
    outputs: [f32; 3],
}

impl Envelope {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            stage: Stage::Idle,
            stage_time: 0.0,
            level: 0.0,
            from: 0.0,
            gated: false,
            outputs: [0.0; 3],
        }
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn is_idle(&self) -> bool {
        self.stage == Stage::Idle
    }
}

/// Bend a 0..1 ramp; positive curves are convex
fn shape(x: f32, curve: f32) -> f32 {
    powf(x.clamp(0.0, 1.0), exp2f(-2.0 * curve))
}

impl ProcessingUnit for Envelope {
    fn kind(&self) -> UnitKind {
        UnitKind::Envelope
    }

    fn param_layout(&self) -> &'static [ParamLayout] {
        &ENVELOPE_LAYOUT
    }

    fn rebuild(&mut self, sample_rate: f32, _seed: u64) {
        *self = Self::new(sample_rate);
    }

    fn init(&mut self, _pitch: f32, _scene: &SceneData) {
        self.stage = Stage::Idle;
        self.stage_time = 0.0;
        self.level = 0.0;
        self.from = 0.0;
        self.outputs = [0.0; 3];
    }

    fn attack(&mut self, scene: &SceneData) {
        self.from = if scene.b(EnvelopeParam::AttackFromZero.index()) {
            0.0
        } else {
            self.level
        };
        self.gated = scene.b(EnvelopeParam::GateMode.index());
        self.stage = Stage::Rise;
        self.stage_time = 0.0;
    }

    fn release(&mut self) {
        // Trigger mode ignores the gate once started
        if self.gated && matches!(self.stage, Stage::Rise | Stage::Hold) {
            self.from = self.level;
            self.stage = Stage::Fall;
            self.stage_time = 0.0;
        }
    }

    fn process_block(&mut self, quantum: &Quantum<'_>) {
        let scene = quantum.scene;
        let dt = quantum.samples as f32 / self.sample_rate;
        let attack = log2_seconds(scene.f(EnvelopeParam::Attack.index()));
        let decay = log2_seconds(scene.f(EnvelopeParam::Decay.index()));
        let curve = scene.f(EnvelopeParam::Curve.index());
        let peak = scene.f(EnvelopeParam::Level.index());
        let gated = scene.b(EnvelopeParam::GateMode.index());

        let mut end_of_rise = 0.0;
        let mut end_of_cycle = 0.0;
        self.stage_time += dt;

        match self.stage {
            Stage::Rise => {
                if self.stage_time < attack {
                    let x = shape(self.stage_time / attack, curve);
                    self.level = self.from + (peak - self.from) * x;
                } else {
                    // Peak is output for one block before the fall starts
                    end_of_rise = 1.0;
                    self.level = peak;
                    self.stage_time = 0.0;
                    self.from = peak;
                    self.stage = if gated { Stage::Hold } else { Stage::Fall };
                }
            }
            Stage::Hold => {
                self.level = peak;
                if !gated {
                    self.from = peak;
                    self.stage = Stage::Fall;
                    self.stage_time = 0.0;
                }
            }
            Stage::Fall => {
                if self.stage_time < decay {
                    self.level = self.from * (1.0 - shape(self.stage_time / decay, curve));
                } else {
                    end_of_cycle = 1.0;
                    self.level = 0.0;
                    self.stage = Stage::Idle;
                }
            }
            Stage::Idle => {}
        }

        self.outputs = [self.level, end_of_rise, end_of_cycle];
    }

    fn output(&self, lane: usize) -> f32 {
        self.outputs.get(lane).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::ParamStorage;
    use approx::assert_abs_diff_eq;

    fn staged(edit: impl Fn(&mut ParamStorage)) -> SceneData {
        let env = Envelope::new(48000.0);
        let mut storage = ParamStorage::new();
        env.init_ctrltypes(&mut storage);
        env.init_default_values(&mut storage);
        edit(&mut storage);
        let mut scene = SceneData::with_len(storage.len());
        scene.copy_all(&storage);
        scene
    }

    fn step(env: &mut Envelope, scene: &SceneData) -> [f32; 3] {
        env.process_block(&Quantum::new(0.0, scene));
        [env.output(0), env.output(1), env.output(2)]
    }

    #[test]
    fn test_trigger_mode_cycle() {
        let scene = staged(|_| {});
        let mut env = Envelope::new(48000.0);
        env.init(0.0, &scene);
        env.attack(&scene);

        let mut saw_eor = false;
        let mut saw_eoc = false;
        let mut peak: f32 = 0.0;
        // 2^-4 s attack, 2^-1 s decay
        for _ in 0..1000 {
            let [level, eor, eoc] = step(&mut env, &scene);
            peak = peak.max(level);
            saw_eor |= eor > 0.0;
            if eoc > 0.0 {
                assert!(saw_eor);
                saw_eoc = true;
                assert_eq!(level, 0.0);
            }
        }
        assert!(saw_eoc);
        assert_abs_diff_eq!(peak, 1.0);
        assert!(env.is_idle());
    }

    #[test]
    fn test_gate_mode_holds_until_release() {
        let scene = staged(|s| s.set_value_f01(EnvelopeParam::GateMode.index(), 1.0));
        let mut env = Envelope::new(48000.0);
        env.init(0.0, &scene);
        env.attack(&scene);
        for _ in 0..3000 {
            step(&mut env, &scene);
        }
        assert_abs_diff_eq!(env.level(), 1.0);

        env.release();
        let [level, _, _] = step(&mut env, &scene);
        assert!(level < 1.0 && level > 0.9);
    }

    #[test]
    fn test_release_ignored_when_idle() {
        let scene = staged(|_| {});
        let mut env = Envelope::new(48000.0);
        env.init(0.0, &scene);
        env.release();
        assert_eq!(step(&mut env, &scene), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_attack_from_held_level() {
        let scene = staged(|s| {
            s.set_value_f01(EnvelopeParam::GateMode.index(), 1.0);
            s.set_value_f01(EnvelopeParam::AttackFromZero.index(), 0.0);
        });
        let mut env = Envelope::new(48000.0);
        env.init(0.0, &scene);
        env.attack(&scene);
        for _ in 0..20 {
            step(&mut env, &scene);
        }
        let before = env.level();
        assert!(before > 0.0);
        env.attack(&scene);
        let [after, _, _] = step(&mut env, &scene);
        assert!(after >= before);

        let zero = staged(|s| s.set_value_f01(EnvelopeParam::GateMode.index(), 1.0));
        env.attack(&zero);
        let [restarted, _, _] = step(&mut env, &zero);
        assert!(restarted < before);
    }

    #[test]
    fn test_trigger_mode_ignores_release() {
        let scene = staged(|_| {});
        let mut env = Envelope::new(48000.0);
        env.init(0.0, &scene);
        env.attack(&scene);
        step(&mut env, &scene);
        let rising = env.level();
        env.release();
        let [level, _, _] = step(&mut env, &scene);
        assert!(level > rising);
    }

    #[test]
    fn test_curve_shape() {
        assert_abs_diff_eq!(shape(0.5, 0.0), 0.5);
        assert!(shape(0.5, 1.0) > 0.5);
        assert!(shape(0.5, -1.0) < 0.5);
        assert_eq!(shape(1.0, 0.7), 1.0);
    }
}
