//! Stereo effect module
//!
//! One effect voice fed by a stereo pair. Like [`super::Vcf`], audio is
//! gathered over a block, processed at the boundary and played back during
//! the following block.
//!
//! Parameter ids depend on the effect kind: engine parameters come first, then
//! the kind-specific switches, then the modulation depths. Use
//! [`Fx::specific_param`] and [`Fx::mod_depth_param`] rather than fixed ids.
//!
//! - Chorus and reverb carry two enable switches; a switch below 0.5
//!   deactivates the low or high cut stage.
//! - Chorus reads a clock input; the period between rising edges sets the
//!   tempo its modulation rate follows.
//! - Spring is knocked by a rising edge on its trigger input or on its
//!   momentary knock parameter.

use super::N_MOD_INPUTS;
use crate::interp::OutputScale;
use crate::lifecycle::{resolve_plan, LifecycleController};
use crate::matrix::ModulationMatrix;
use crate::port::{
    ModuleIo, ParamDef, ParamId, PolyModule, PolyPort, PortDef, PortId, PortSpec, ProcessArgs,
    SignalKind,
};
use crate::scene::{ParamStorage, SceneData};
use crate::scheduler::BlockScheduler;
use crate::trigger::SchmittTrigger;
use crate::unit::{EffectKind, Quantum, SpringParam, UnitKind};
use crate::voice::VoiceSlot;
use crate::{BLOCK_SIZE, RACK_TO_SURGE_OSC_MUL};

/// Most engine parameters any effect kind exposes
pub const MAX_FX_PARAMS: usize = 11;

const KNOCK_LOW_THRESHOLD: f32 = 0.25;
const KNOCK_HIGH_THRESHOLD: f32 = 0.5;

/// Tempo from the spacing of clock pulses
#[derive(Debug, Clone, Copy, Default)]
struct ClockTempo {
    trigger: SchmittTrigger,
    since_edge: Option<u64>,
    bpm: Option<f32>,
}

impl ClockTempo {
    fn process(&mut self, port: &PolyPort, sample_rate: f32) {
        if !port.is_connected() {
            *self = Self::default();
            return;
        }
        let rising = self.trigger.process(port.voltage(0));
        if let Some(n) = self.since_edge.as_mut() {
            *n += 1;
        }
        if rising {
            if let Some(period) = self.since_edge.filter(|n| *n > 0) {
                self.bpm = Some(60.0 * sample_rate / period as f32);
            }
            self.since_edge = Some(0);
        }
    }
}

pub struct Fx {
    kind: EffectKind,
    voices: [VoiceSlot; 1],
    storage: ParamStorage,
    scene: SceneData,
    matrix: ModulationMatrix<MAX_FX_PARAMS, N_MOD_INPUTS>,
    lifecycle: LifecycleController,
    scheduler: BlockScheduler,
    input: [[f32; BLOCK_SIZE]; 2],
    /// Whether the voice gathered input on the previous sample
    gathered: bool,
    clock: ClockTempo,
    knock_input: SchmittTrigger,
    knock_button: SchmittTrigger,
    knock_pending: bool,
    sample_rate: f32,
    spec: PortSpec,
    params: Vec<ParamDef>,
}

impl Fx {
    pub const INPUT_L: PortId = 0;
    pub const INPUT_R: PortId = 1;
    pub const INPUT_CLOCK: PortId = 2;
    /// Spring knock trigger
    pub const INPUT_SPECIFIC_0: PortId = 3;
    pub const MOD_INPUT_0: PortId = 4;

    pub const OUTPUT_L: PortId = 0;
    pub const OUTPUT_R: PortId = 1;

    pub fn new(kind: EffectKind, sample_rate: f32) -> Self {
        let layout = kind.layout();
        let config = kind.config();
        let mut storage = ParamStorage::new();
        for (i, l) in layout.iter().enumerate() {
            storage.define(i, *l);
            storage.reset_to_default(i);
        }
        let scene = SceneData::with_len(storage.len());

        let mut params: Vec<ParamDef> = layout
            .iter()
            .enumerate()
            .map(|(id, l)| ParamDef::new(id, l.name, 0.0, 1.0, l.default_f01))
            .collect();
        match kind {
            EffectKind::Chorus | EffectKind::Reverb => {
                params.push(ParamDef::new(layout.len(), "Enable LowCut", 0.0, 1.0, 1.0).snapped());
                params.push(ParamDef::new(layout.len() + 1, "Enable HiCut", 0.0, 1.0, 1.0).snapped());
            }
            EffectKind::Spring => {
                params.push(ParamDef::new(layout.len(), "Knock", 0.0, 1.0, 0.0).snapped());
            }
        }
        let first_depth = layout.len() + config.specific_params;
        for (t, l) in layout.iter().enumerate() {
            for m in 0..N_MOD_INPUTS {
                params.push(ParamDef::new(
                    first_depth + t * N_MOD_INPUTS + m,
                    format!("{} mod {}", l.name, m + 1),
                    -1.0,
                    1.0,
                    0.0,
                ));
            }
        }

        let mut inputs = vec![
            PortDef::new(Self::INPUT_L, "left", SignalKind::Audio),
            PortDef::new(Self::INPUT_R, "right", SignalKind::Audio),
            PortDef::new(Self::INPUT_CLOCK, "clock", SignalKind::Trigger),
            PortDef::new(Self::INPUT_SPECIFIC_0, "trigger", SignalKind::Trigger),
        ];
        for m in 0..N_MOD_INPUTS {
            inputs.push(PortDef::new(
                Self::MOD_INPUT_0 + m,
                format!("mod{}", m + 1),
                SignalKind::CvBipolar,
            ));
        }

        Self {
            kind,
            voices: VoiceSlot::bank(UnitKind::Effect(kind), sample_rate),
            storage,
            scene,
            matrix: ModulationMatrix::new(
                std::array::from_fn(|t| t),
                first_depth,
                Self::MOD_INPUT_0,
            ),
            lifecycle: LifecycleController::new(),
            scheduler: BlockScheduler::new(),
            input: [[0.0; BLOCK_SIZE]; 2],
            gathered: false,
            clock: ClockTempo::default(),
            knock_input: SchmittTrigger::default(),
            knock_button: SchmittTrigger::new(KNOCK_LOW_THRESHOLD, KNOCK_HIGH_THRESHOLD),
            knock_pending: false,
            sample_rate,
            spec: PortSpec {
                inputs,
                outputs: vec![
                    PortDef::new(Self::OUTPUT_L, "left", SignalKind::Audio),
                    PortDef::new(Self::OUTPUT_R, "right", SignalKind::Audio),
                ],
            },
            params,
        }
    }

    pub fn kind(&self) -> EffectKind {
        self.kind
    }

    fn engine_params(&self) -> usize {
        self.kind.layout().len()
    }

    /// Id of the `index`th kind-specific switch
    pub fn specific_param(&self, index: usize) -> ParamId {
        self.engine_params() + index
    }

    /// Depth knob of modulation input `input` on engine parameter `param`
    pub fn mod_depth_param(&self, param: usize, input: usize) -> ParamId {
        self.matrix.depth_param(param, input)
    }

    pub fn voice(&self) -> &VoiceSlot {
        &self.voices[0]
    }

    /// Tempo measured from the clock input, in beats per minute
    pub fn tempo(&self) -> Option<f32> {
        self.clock.bpm
    }

    fn stage_voice(&mut self, io: &ModuleIo) {
        for t in 0..self.engine_params() {
            self.storage.set_value_f01(t, self.matrix.value(t, 0));
        }
        if let Some((low_cut, high_cut)) = self.kind.cut_params() {
            let low_on = io.param(self.specific_param(0)) >= 0.5;
            let high_on = io.param(self.specific_param(1)) >= 0.5;
            self.storage.set_deactivated(low_cut, !low_on);
            self.storage.set_deactivated(high_cut, !high_on);
        }
        if self.kind == EffectKind::Spring {
            let knock = std::mem::take(&mut self.knock_pending);
            self.storage
                .set_value_f01(SpringParam::Knock.index(), if knock { 1.0 } else { 0.0 });
        }
        self.scene.copy_all(&self.storage);
    }

    fn observe_extra_inputs(&mut self, io: &ModuleIo, sample_rate: f32) {
        if self.kind.config().uses_clock {
            self.clock.process(io.input(Self::INPUT_CLOCK), sample_rate);
        }
        if self.kind == EffectKind::Spring {
            let t = self
                .knock_input
                .process(io.input(Self::INPUT_SPECIFIC_0).voltage(0));
            let d = self.knock_button.process(io.param(self.specific_param(0)));
            if t || d {
                tracing::trace!("spring knocked");
                self.knock_pending = true;
            }
        }
    }
}

impl Default for Fx {
    fn default() -> Self {
        Self::new(EffectKind::Reverb, 44100.0)
    }
}

/// Sum of every channel on a port
fn summed(port: &PolyPort) -> f32 {
    port.voltages().iter().sum()
}

impl PolyModule for Fx {
    fn type_id(&self) -> &'static str {
        match self.kind {
            EffectKind::Chorus => "fx_chorus",
            EffectKind::Reverb => "fx_reverb",
            EffectKind::Spring => "fx_spring",
        }
    }

    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn param_defs(&self) -> &[ParamDef] {
        &self.params
    }

    fn process(&mut self, io: &mut ModuleIo, _args: &ProcessArgs) {
        self.lifecycle.track_channels(1);
        self.observe_extra_inputs(io, self.sample_rate);

        let boundary = self.scheduler.begin_sample();
        if let Some(plan) = self.lifecycle.plan(boundary, self.scheduler.position()) {
            resolve_plan(&mut self.voices, &plan);
            self.matrix.update_values(io, 1);
            if plan.respawns(0) {
                let keep = match plan.interrupted_position() {
                    Some(p) if self.gathered => p,
                    _ => 0,
                };
                for side in &mut self.input {
                    side[keep..].fill(0.0);
                }
            }
            self.stage_voice(io);
            let quantum = Quantum::new(0.0, &self.scene)
                .with_stereo_input(&self.input[0], &self.input[1])
                .with_tempo(self.clock.bpm);
            let voice = &mut self.voices[0];
            voice.prepare(self.sample_rate, &quantum);
            voice.process(&quantum);
        }

        let position = self.scheduler.position();
        let left = summed(io.input(Self::INPUT_L));
        // Right is normalled to left
        let right = if io.input(Self::INPUT_R).is_connected() {
            summed(io.input(Self::INPUT_R))
        } else {
            left
        };
        for (side, v) in [left, right].into_iter().enumerate() {
            if let Some(x) = self.input[side].get_mut(position) {
                *x = v * RACK_TO_SURGE_OSC_MUL;
            }
        }

        for (lane, port) in [Self::OUTPUT_L, Self::OUTPUT_R].into_iter().enumerate() {
            let y = self.voices[0]
                .block(lane)
                .get(position)
                .copied()
                .unwrap_or(0.0);
            let out = io.output_mut(port);
            out.set_channels(1);
            out.set_voltage(OutputScale::Audio.apply(y), 0);
        }
        self.gathered = true;
        self.scheduler.advance();
    }

    fn on_sample_rate_change(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.clock = ClockTempo::default();
        self.lifecycle.on_sample_rate_change(&mut self.scheduler);
    }

    fn reset(&mut self) {
        self.voices = VoiceSlot::bank(UnitKind::Effect(self.kind), self.sample_rate);
        self.input = [[0.0; BLOCK_SIZE]; 2];
        self.gathered = false;
        self.clock = ClockTempo::default();
        self.knock_input.reset();
        self.knock_button.reset();
        self.knock_pending = false;
        self.lifecycle.reset();
        self.scheduler.reset();
    }

    fn modulation_display_value(&self, param: ParamId) -> f32 {
        self.matrix
            .modulator_index_for(param)
            .filter(|t| *t < self.engine_params())
            .map_or(0.0, |t| self.matrix.modulation(t, 0))
    }
}
