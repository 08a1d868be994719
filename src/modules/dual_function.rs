//! Dual function generator
//!
//! Two envelope functions per voice, each with its own trigger input and
//! mode. Both functions share one voice count, the larger of the two trigger
//! inputs' channel counts.

use super::{run_control_voice, N_MOD_INPUTS};
use crate::error::Result;
use crate::interp::{Generations, OutputScale};
use crate::lifecycle::{observe_gates, resolve_edge, resolve_plan, LifecycleController, Plan};
use crate::matrix::ModulationMatrix;
use crate::port::{
    ModuleIo, ParamDef, ParamId, PolyModule, PortDef, PortId, PortSpec, ProcessArgs, SignalKind,
};
use crate::scene::{ParamStorage, SceneData};
use crate::scheduler::BlockScheduler;
use crate::unit::{spawn_unit, EnvelopeParam, Quantum, UnitKind, ENVELOPE_LAYOUT};
use crate::voice::VoiceSlot;
use crate::MAX_POLY;
use serde::{Deserialize, Serialize};

const N_FUNCTIONS: usize = 2;
const N_FUNCTION_PARAMS: usize = 4;
const N_TARGETS: usize = N_FUNCTIONS * N_FUNCTION_PARAMS;
const LANES_PER_FUNCTION: usize = 3;
const N_LANES: usize = N_FUNCTIONS * LANES_PER_FUNCTION;

/// Flags saved with the patch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DualFunctionState {
    /// Restart each attack from zero instead of the current level
    pub attack_from_zero: bool,
}

impl Default for DualFunctionState {
    fn default() -> Self {
        Self {
            attack_from_zero: true,
        }
    }
}

pub struct DualFunction {
    voices: [[VoiceSlot; MAX_POLY]; N_FUNCTIONS],
    storage: ParamStorage,
    scene: SceneData,
    matrix: ModulationMatrix<N_TARGETS, N_MOD_INPUTS>,
    gens: Generations<N_LANES>,
    lifecycle: LifecycleController,
    scheduler: BlockScheduler,
    state: DualFunctionState,
    sample_rate: f32,
    spec: PortSpec,
    params: Vec<ParamDef>,
}

impl DualFunction {
    pub const FP_0_ATTACK: ParamId = 0;
    pub const FP_0_DECAY: ParamId = 1;
    pub const FP_0_CURVE: ParamId = 2;
    pub const FP_0_LEVEL: ParamId = 3;
    pub const FP_1_ATTACK: ParamId = 4;
    pub const FP_1_DECAY: ParamId = 5;
    pub const FP_1_CURVE: ParamId = 6;
    pub const FP_1_LEVEL: ParamId = 7;
    pub const MODE_0: ParamId = 8;
    pub const MODE_1: ParamId = 9;
    pub const MOD_PARAM_0: ParamId = 10;
    pub const NUM_PARAMS: usize = Self::MOD_PARAM_0 + N_TARGETS * N_MOD_INPUTS;

    pub const TRIGGER_0: PortId = 0;
    pub const TRIGGER_1: PortId = 1;
    pub const MOD_INPUT_0: PortId = 2;

    pub const OUTPUT_0: PortId = 0;
    pub const OUTPUT_1: PortId = 1;
    pub const EOR_0: PortId = 2;
    pub const EOR_1: PortId = 3;
    pub const EOC_0: PortId = 4;
    pub const EOC_1: PortId = 5;

    pub fn new(sample_rate: f32) -> Self {
        let mut storage = ParamStorage::new();
        let proto = spawn_unit(UnitKind::Envelope, sample_rate, 0);
        proto.init_ctrltypes(&mut storage);
        proto.init_default_values(&mut storage);
        let scene = SceneData::with_len(storage.len());

        let mut inputs = vec![
            PortDef::new(Self::TRIGGER_0, "trigger1", SignalKind::Gate),
            PortDef::new(Self::TRIGGER_1, "trigger2", SignalKind::Gate),
        ];
        for m in 0..N_MOD_INPUTS {
            inputs.push(PortDef::new(
                Self::MOD_INPUT_0 + m,
                format!("mod{}", m + 1),
                SignalKind::CvBipolar,
            ));
        }

        Self {
            voices: [
                VoiceSlot::bank(UnitKind::Envelope, sample_rate),
                VoiceSlot::bank(UnitKind::Envelope, sample_rate),
            ],
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
            state: DualFunctionState::default(),
            sample_rate,
            spec: PortSpec {
                inputs,
                outputs: vec![
                    PortDef::new(Self::OUTPUT_0, "out1", SignalKind::CvUnipolar),
                    PortDef::new(Self::OUTPUT_1, "out2", SignalKind::CvUnipolar),
                    PortDef::new(Self::EOR_0, "eor1", SignalKind::Trigger),
                    PortDef::new(Self::EOR_1, "eor2", SignalKind::Trigger),
                    PortDef::new(Self::EOC_0, "eoc1", SignalKind::Trigger),
                    PortDef::new(Self::EOC_1, "eoc2", SignalKind::Trigger),
                ],
            },
            params: Self::build_params(),
        }
    }

    fn build_params() -> Vec<ParamDef> {
        const NAMES: [&str; N_FUNCTION_PARAMS] = ["Attack", "Decay", "Curve", "Level"];
        let mut params = Vec::with_capacity(Self::NUM_PARAMS);
        for f in 0..N_FUNCTIONS {
            for (i, name) in NAMES.iter().enumerate() {
                params.push(ParamDef::new(
                    Self::function_param(f, i),
                    format!("F{} {}", f + 1, name),
                    0.0,
                    1.0,
                    ENVELOPE_LAYOUT[i].default_f01,
                ));
            }
        }
        params.push(ParamDef::new(Self::MODE_0, "F1 Mode", 0.0, 1.0, 0.0).snapped());
        params.push(ParamDef::new(Self::MODE_1, "F2 Mode", 0.0, 1.0, 0.0).snapped());
        for t in 0..N_TARGETS {
            for m in 0..N_MOD_INPUTS {
                params.push(ParamDef::new(
                    Self::mod_depth_param(t, m),
                    format!("F{} {} mod {}", t / N_FUNCTION_PARAMS + 1, NAMES[t % 4], m + 1),
                    -1.0,
                    1.0,
                    0.0,
                ));
            }
        }
        params
    }

    /// Parameter id of knob `index` (attack, decay, curve, level) of a function
    pub const fn function_param(function: usize, index: usize) -> ParamId {
        function * N_FUNCTION_PARAMS + index
    }

    pub const fn mod_depth_param(param: ParamId, input: usize) -> ParamId {
        Self::MOD_PARAM_0 + param * N_MOD_INPUTS + input
    }

    pub fn attack_from_zero(&self) -> bool {
        self.state.attack_from_zero
    }

    pub fn set_attack_from_zero(&mut self, value: bool) {
        self.state.attack_from_zero = value;
    }

    pub fn voice(&self, function: usize, channel: usize) -> Option<&VoiceSlot> {
        self.voices.get(function).and_then(|bank| bank.get(channel))
    }

    pub fn active_voices(&self) -> usize {
        self.lifecycle.active_channels()
    }

    fn stage_voice(&mut self, function: usize, c: usize, gate_mode: bool) {
        for i in 0..N_FUNCTION_PARAMS {
            let t = Self::function_param(function, i);
            self.storage.set_value_f01(i, self.matrix.value(t, c));
        }
        self.storage
            .set_value_f01(EnvelopeParam::GateMode.index(), f32::from(u8::from(gate_mode)));
        self.storage.set_value_f01(
            EnvelopeParam::AttackFromZero.index(),
            f32::from(u8::from(self.state.attack_from_zero)),
        );
        self.scene.copy_all(&self.storage);
    }

    fn run_voice(&mut self, io: &ModuleIo, function: usize, c: usize, plan: &Plan) {
        let gate_mode = io.param(Self::MODE_0 + function) > 0.5;
        self.stage_voice(function, c, gate_mode);
        let quantum = Quantum::new(0.0, &self.scene);
        run_control_voice(
            &mut self.voices[function][c],
            &mut self.gens,
            function * LANES_PER_FUNCTION,
            LANES_PER_FUNCTION,
            self.sample_rate,
            &quantum,
            plan,
        );
    }
}

impl Default for DualFunction {
    fn default() -> Self {
        Self::new(44100.0)
    }
}

impl PolyModule for DualFunction {
    fn type_id(&self) -> &'static str {
        "dual_function"
    }

    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn param_defs(&self) -> &[ParamDef] {
        &self.params
    }

    fn process(&mut self, io: &mut ModuleIo, _args: &ProcessArgs) {
        let triggers = [*io.input(Self::TRIGGER_0), *io.input(Self::TRIGGER_1)];
        let requested = triggers[0].channels().max(triggers[1].channels());
        let n = self.lifecycle.track_channels(requested);
        for out in &mut io.outputs {
            out.set_channels(n);
        }

        for (bank, gate) in self.voices.iter_mut().zip(triggers) {
            observe_gates(bank, n, |c| (gate.is_connected(), gate.poly_voltage(c)));
        }

        let boundary = self.scheduler.begin_sample();
        let position = self.scheduler.position();
        if let Some(plan) = self.lifecycle.plan(boundary, position) {
            for bank in &mut self.voices {
                resolve_plan(bank, &plan);
            }
            self.matrix.update_values(io, n);
            for f in 0..N_FUNCTIONS {
                for c in plan.channels.clone() {
                    self.run_voice(io, f, c, &plan);
                }
            }
        }
        // Each function's edges split only that function's segment
        for f in 0..N_FUNCTIONS {
            for c in 0..n {
                if let Some(plan) = resolve_edge(&mut self.voices[f][c], position) {
                    self.run_voice(io, f, c, &plan);
                }
            }
        }

        let frac = self.scheduler.fraction();
        for f in 0..N_FUNCTIONS {
            let lane = f * LANES_PER_FUNCTION;
            for c in 0..n {
                let env = self.gens.interpolate(lane, c, frac);
                let eor = self.gens.current(lane + 1, c);
                let eoc = self.gens.current(lane + 2, c);
                io.output_mut(Self::OUTPUT_0 + f)
                    .set_voltage(OutputScale::Control.apply(env), c);
                io.output_mut(Self::EOR_0 + f)
                    .set_voltage(OutputScale::Control.apply(eor), c);
                io.output_mut(Self::EOC_0 + f)
                    .set_voltage(OutputScale::Control.apply(eoc), c);
            }
        }
        self.scheduler.advance();
    }

    fn on_sample_rate_change(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.lifecycle.on_sample_rate_change(&mut self.scheduler);
    }

    fn reset(&mut self) {
        for bank in &mut self.voices {
            *bank = VoiceSlot::bank(UnitKind::Envelope, self.sample_rate);
        }
        self.gens = Generations::new();
        self.lifecycle.reset();
        self.scheduler.reset();
    }

    fn modulation_display_value(&self, param: ParamId) -> f32 {
        self.matrix
            .modulator_index_for(param)
            .map_or(0.0, |t| self.matrix.modulation(t, 0))
    }

    fn serialize_state(&self) -> Option<serde_json::Value> {
        serde_json::to_value(self.state).ok()
    }

    fn deserialize_state(&mut self, state: &serde_json::Value) -> Result<()> {
        self.state = serde_json::from_value(state.clone())?;
        Ok(())
    }
}
