//! Polyphonic LFO module
//!
//! One LFO unit per trigger channel. The ten continuous controls are
//! modulation targets; shape and unipolar are plain switches. Module knobs are
//! normalized and land in a storage layout ordered differently from the
//! module's parameter ids, see [`Lfo::storage_param_for`].

use super::{run_control_voice, N_MOD_INPUTS};
use crate::interp::{Generations, OutputScale};
use crate::lifecycle::{observe_gates, resolve_edge, resolve_plan, LifecycleController, Plan};
use crate::matrix::ModulationMatrix;
use crate::port::{
    ModuleIo, ParamDef, ParamId, PolyModule, PortDef, PortId, PortSpec, ProcessArgs, SignalKind,
};
use crate::scene::{ParamStorage, SceneData};
use crate::scheduler::BlockScheduler;
use crate::unit::{spawn_unit, LfoParam, Quantum, UnitKind, LFO_LAYOUT};
use crate::voice::VoiceSlot;
use crate::MAX_POLY;

const N_TARGETS: usize = 10;
const N_LANES: usize = 3;

/// Storage slot for each modulatable knob, in parameter-id order
const TARGET_STORAGE: [LfoParam; N_TARGETS] = [
    LfoParam::Rate,
    LfoParam::StartPhase,
    LfoParam::Deform,
    LfoParam::Magnitude,
    LfoParam::Delay,
    LfoParam::Attack,
    LfoParam::Hold,
    LfoParam::Decay,
    LfoParam::Sustain,
    LfoParam::Release,
];

pub struct Lfo {
    voices: [VoiceSlot; MAX_POLY],
    storage: ParamStorage,
    scene: SceneData,
    matrix: ModulationMatrix<N_TARGETS, N_MOD_INPUTS>,
    gens: Generations<N_LANES>,
    lifecycle: LifecycleController,
    scheduler: BlockScheduler,
    sample_rate: f32,
    spec: PortSpec,
    params: Vec<ParamDef>,
}

impl Lfo {
    pub const RATE: ParamId = 0;
    pub const PHASE: ParamId = 1;
    pub const DEFORM: ParamId = 2;
    pub const AMPLITUDE: ParamId = 3;
    pub const E_DELAY: ParamId = 4;
    pub const E_ATTACK: ParamId = 5;
    pub const E_HOLD: ParamId = 6;
    pub const E_DECAY: ParamId = 7;
    pub const E_SUSTAIN: ParamId = 8;
    pub const E_RELEASE: ParamId = 9;
    pub const SHAPE: ParamId = 10;
    pub const UNIPOLAR: ParamId = 11;
    pub const MOD_PARAM_0: ParamId = 12;
    pub const NUM_PARAMS: usize = Self::MOD_PARAM_0 + N_TARGETS * N_MOD_INPUTS;

    pub const INPUT_TRIGGER: PortId = 0;
    pub const MOD_INPUT_0: PortId = 1;

    pub const OUTPUT_MIX: PortId = 0;
    pub const OUTPUT_WAVE: PortId = 1;
    pub const OUTPUT_ENV: PortId = 2;

    pub fn new(sample_rate: f32) -> Self {
        let mut storage = ParamStorage::new();
        let proto = spawn_unit(UnitKind::Lfo, sample_rate, 0);
        proto.init_ctrltypes(&mut storage);
        proto.init_default_values(&mut storage);
        let scene = SceneData::with_len(storage.len());

        let mut inputs = vec![PortDef::new(Self::INPUT_TRIGGER, "trigger", SignalKind::Gate)];
        for m in 0..N_MOD_INPUTS {
            inputs.push(PortDef::new(
                Self::MOD_INPUT_0 + m,
                format!("mod{}", m + 1),
                SignalKind::CvBipolar,
            ));
        }

        Self {
            voices: VoiceSlot::bank(UnitKind::Lfo, sample_rate),
            storage,
            scene,
            matrix: ModulationMatrix::new(
                std::array::from_fn(|t| t),
                Self::MOD_PARAM_0,
                Self::MOD_INPUT_0,
            ),
            gens: Generations::new(),
            lifecycle: LifecycleController::new(),
            scheduler: BlockScheduler::new(),
            sample_rate,
            spec: PortSpec {
                inputs,
                outputs: vec![
                    PortDef::new(Self::OUTPUT_MIX, "mix", SignalKind::CvBipolar),
                    PortDef::new(Self::OUTPUT_WAVE, "wave", SignalKind::CvBipolar),
                    PortDef::new(Self::OUTPUT_ENV, "env", SignalKind::CvUnipolar),
                ],
            },
            params: Self::build_params(),
        }
    }

    fn build_params() -> Vec<ParamDef> {
        const NAMES: [&str; N_TARGETS] = [
            "Rate", "Phase", "Deform", "Amplitude", "Delay", "Attack", "Hold", "Decay",
            "Sustain", "Release",
        ];
        let mut params: Vec<ParamDef> = NAMES
            .iter()
            .zip(TARGET_STORAGE)
            .enumerate()
            .map(|(id, (name, slot))| {
                ParamDef::new(id, *name, 0.0, 1.0, LFO_LAYOUT[slot.index()].default_f01)
            })
            .collect();
        params.push(ParamDef::new(Self::SHAPE, "Shape", 0.0, 6.0, 0.0).snapped());
        params.push(ParamDef::new(Self::UNIPOLAR, "Unipolar", 0.0, 1.0, 0.0).snapped());
        for t in 0..N_TARGETS {
            for m in 0..N_MOD_INPUTS {
                params.push(ParamDef::new(
                    Self::mod_depth_param(t, m),
                    format!("{} mod {}", NAMES[t], m + 1),
                    -1.0,
                    1.0,
                    0.0,
                ));
            }
        }
        params
    }

    /// Depth knob for modulation input `input` on target parameter `param`
    pub const fn mod_depth_param(param: ParamId, input: usize) -> ParamId {
        Self::MOD_PARAM_0 + param * N_MOD_INPUTS + input
    }

    /// Storage slot behind a module parameter id
    pub fn storage_param_for(id: ParamId) -> Option<usize> {
        let slot = match id {
            Self::RATE..=Self::E_RELEASE => TARGET_STORAGE[id],
            Self::SHAPE => LfoParam::Shape,
            Self::UNIPOLAR => LfoParam::Unipolar,
            _ => {
                tracing::warn!(param = id, "no storage slot for LFO parameter");
                return None;
            }
        };
        Some(slot.index())
    }

    /// Write voice `c`'s modulated values into storage and take the snapshot
    fn stage_voice(&mut self, io: &ModuleIo, c: usize) {
        for (t, slot) in TARGET_STORAGE.iter().enumerate() {
            self.storage
                .set_value_f01(slot.index(), self.matrix.value(t, c));
        }
        self.storage
            .set_value_f01(LfoParam::Shape.index(), io.param(Self::SHAPE) / 6.0);
        self.storage
            .set_value_f01(LfoParam::Unipolar.index(), io.param(Self::UNIPOLAR));
        // Module triggers always restart the phase
        self.storage.set_value_f01(LfoParam::TrigMode.index(), 0.5);
        self.scene.copy_all(&self.storage);
    }

    fn run_voice(&mut self, io: &ModuleIo, c: usize, plan: &Plan) {
        self.stage_voice(io, c);
        let quantum = Quantum::new(0.0, &self.scene);
        run_control_voice(
            &mut self.voices[c],
            &mut self.gens,
            0,
            N_LANES,
            self.sample_rate,
            &quantum,
            plan,
        );
    }

    pub fn voice(&self, channel: usize) -> Option<&VoiceSlot> {
        self.voices.get(channel)
    }

    pub fn active_voices(&self) -> usize {
        self.lifecycle.active_channels()
    }
}

impl Default for Lfo {
    fn default() -> Self {
        Self::new(44100.0)
    }
}

impl PolyModule for Lfo {
    fn type_id(&self) -> &'static str {
        "lfo"
    }

    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn param_defs(&self) -> &[ParamDef] {
        &self.params
    }

    fn process(&mut self, io: &mut ModuleIo, _args: &ProcessArgs) {
        let trigger = *io.input(Self::INPUT_TRIGGER);
        let n = self.lifecycle.track_channels(trigger.channels());
        for out in &mut io.outputs {
            out.set_channels(n);
        }

        observe_gates(&mut self.voices, n, |c| {
            (trigger.is_connected(), trigger.voltage(c))
        });

        let boundary = self.scheduler.begin_sample();
        let position = self.scheduler.position();
        if let Some(plan) = self.lifecycle.plan(boundary, position) {
            resolve_plan(&mut self.voices, &plan);
            self.matrix.update_values(io, n);
            for c in plan.channels.clone() {
                self.run_voice(io, c, &plan);
            }
        }
        for c in 0..n {
            if let Some(plan) = resolve_edge(&mut self.voices[c], position) {
                self.run_voice(io, c, &plan);
            }
        }

        let frac = self.scheduler.fraction();
        for lane in 0..N_LANES {
            let out = io.output_mut(lane);
            for c in 0..n {
                let v = self.gens.interpolate(lane, c, frac);
                out.set_voltage(OutputScale::Audio.apply(v), c);
            }
        }
        self.scheduler.advance();
    }

    fn on_sample_rate_change(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.lifecycle.on_sample_rate_change(&mut self.scheduler);
    }

    fn reset(&mut self) {
        self.voices = VoiceSlot::bank(UnitKind::Lfo, self.sample_rate);
        self.gens = Generations::new();
        self.lifecycle.reset();
        self.scheduler.reset();
    }

    fn modulation_display_value(&self, param: ParamId) -> f32 {
        self.matrix
            .modulator_index_for(param)
            .map_or(0.0, |t| self.matrix.modulation(t, 0))
    }
}
