//! Polyphonic oscillator module
//!
//! One oscillator unit per pitch CV channel. Units render a whole block of
//! audio at each boundary, which is then played back one sample per call.
//!
//! Four general-purpose switches and an audio input are part of the module's
//! interface for oscillator kinds that take them. None of the built-in kinds
//! reads them, so they are carried but inert.
//!
//! Wavetable kinds receive table changes through a [`WavetableSender`] taken
//! from the module with [`Vco::take_wavetable_sender`]; the audio path drains
//! the queue once per block and loads the newest request into every voice.

use super::N_MOD_INPUTS;
use crate::error::{EngineError, Result};
use crate::interp::{mono_combine, OutputScale};
use crate::lifecycle::{check_unison, resolve_plan, resolve_voice, LifecycleController};
use crate::matrix::ModulationMatrix;
use crate::port::{
    ModuleIo, ParamDef, ParamId, PolyModule, PortDef, PortId, PortSpec, ProcessArgs, SignalKind,
};
use crate::queue::{wavetable_queue, WavetableReceiver, WavetableSender};
use crate::scene::{ParamLayout, ParamStorage, SceneData};
use crate::scheduler::BlockScheduler;
use crate::tables::shared_tables;
use crate::trigger::SchmittTrigger;
use crate::unit::{spawn_unit, OscillatorKind, Quantum, UnitKind, N_OSC_PARAMS};
use crate::voice::VoiceSlot;
use crate::MAX_POLY;
use serde::{Deserialize, Serialize};

/// Pitch plus the engine parameters
const N_TARGETS: usize = 1 + N_OSC_PARAMS;
const N_ARBITRARY_SWITCHES: usize = 4;

/// Flags saved with the patch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VcoState {
    /// Catalog wavetable loaded into every voice
    pub wavetable_index: Option<usize>,
}

pub struct Vco {
    kind: OscillatorKind,
    voices: [VoiceSlot; MAX_POLY],
    storage: ParamStorage,
    scene: SceneData,
    matrix: ModulationMatrix<N_TARGETS, N_MOD_INPUTS>,
    lifecycle: LifecycleController,
    scheduler: BlockScheduler,
    retrigger: [SchmittTrigger; MAX_POLY],
    retrigger_pending: [bool; MAX_POLY],
    wavetable_rx: WavetableReceiver,
    wavetable_tx: Option<WavetableSender>,
    state: VcoState,
    loaded: [Option<usize>; MAX_POLY],
    sample_rate: f32,
    spec: PortSpec,
    params: Vec<ParamDef>,
}

impl Vco {
    pub const PITCH: ParamId = 0;
    pub const OSC_CTRL_0: ParamId = 1;
    pub const MOD_PARAM_0: ParamId = Self::OSC_CTRL_0 + N_OSC_PARAMS;
    pub const OCTAVE_SHIFT: ParamId = Self::MOD_PARAM_0 + N_TARGETS * N_MOD_INPUTS;
    pub const ARBITRARY_SWITCH_0: ParamId = Self::OCTAVE_SHIFT + 1;
    pub const NUM_PARAMS: usize = Self::ARBITRARY_SWITCH_0 + N_ARBITRARY_SWITCHES;

    pub const PITCH_CV: PortId = 0;
    pub const RETRIGGER: PortId = 1;
    pub const MOD_INPUT_0: PortId = 2;
    pub const AUDIO_INPUT: PortId = Self::MOD_INPUT_0 + N_MOD_INPUTS;

    pub const OUTPUT_L: PortId = 0;
    pub const OUTPUT_R: PortId = 1;

    pub fn new(kind: OscillatorKind, sample_rate: f32) -> Self {
        let unit_kind = UnitKind::Oscillator(kind);
        let proto = spawn_unit(unit_kind, sample_rate, 0);
        let mut storage = ParamStorage::new();
        proto.init_ctrltypes(&mut storage);
        proto.init_default_values(&mut storage);
        let scene = SceneData::with_len(storage.len());
        let params = Self::build_params(proto.param_layout());

        let (tx, rx) = wavetable_queue(kind.config().wavetable_queue_size());

        let mut inputs = vec![
            PortDef::new(Self::PITCH_CV, "voct", SignalKind::VoltPerOctave),
            PortDef::new(Self::RETRIGGER, "retrigger", SignalKind::Trigger),
        ];
        for m in 0..N_MOD_INPUTS {
            inputs.push(PortDef::new(
                Self::MOD_INPUT_0 + m,
                format!("mod{}", m + 1),
                SignalKind::CvBipolar,
            ));
        }
        inputs.push(PortDef::new(Self::AUDIO_INPUT, "audio", SignalKind::Audio));

        Self {
            kind,
            voices: VoiceSlot::bank(unit_kind, sample_rate),
            storage,
            scene,
            matrix: ModulationMatrix::new(
                std::array::from_fn(|t| t),
                Self::MOD_PARAM_0,
                Self::MOD_INPUT_0,
            )
            .with_depth_scale(0, 12.0),
            lifecycle: LifecycleController::new(),
            scheduler: BlockScheduler::new(),
            retrigger: Default::default(),
            retrigger_pending: [false; MAX_POLY],
            wavetable_rx: rx,
            wavetable_tx: Some(tx),
            state: VcoState::default(),
            loaded: [None; MAX_POLY],
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

    fn build_params(layout: &[ParamLayout]) -> Vec<ParamDef> {
        let mut params = vec![ParamDef::new(Self::PITCH, "Pitch", 1.0, 127.0, 60.0)];
        for (i, l) in layout.iter().enumerate() {
            params.push(ParamDef::new(
                Self::OSC_CTRL_0 + i,
                l.name,
                0.0,
                1.0,
                l.default_f01,
            ));
        }
        for t in 0..N_TARGETS {
            let target = if t == 0 { "Pitch" } else { layout[t - 1].name };
            for m in 0..N_MOD_INPUTS {
                params.push(ParamDef::new(
                    Self::mod_depth_param(t, m),
                    format!("{} mod {}", target, m + 1),
                    -1.0,
                    1.0,
                    0.0,
                ));
            }
        }
        params.push(ParamDef::new(Self::OCTAVE_SHIFT, "Octave", -3.0, 3.0, 0.0).snapped());
        for i in 0..N_ARBITRARY_SWITCHES {
            params.push(ParamDef::new(
                Self::ARBITRARY_SWITCH_0 + i,
                format!("Switch {}", i + 1),
                0.0,
                1.0,
                0.0,
            ));
        }
        params
    }

    pub const fn mod_depth_param(param: ParamId, input: usize) -> ParamId {
        Self::MOD_PARAM_0 + param * N_MOD_INPUTS + input
    }

    pub fn kind(&self) -> OscillatorKind {
        self.kind
    }

    /// Producer half of the wavetable queue; only the first call gets it
    pub fn take_wavetable_sender(&mut self) -> Option<WavetableSender> {
        self.wavetable_tx.take()
    }

    /// Catalog wavetable the voices play, if one was chosen
    pub fn wavetable_index(&self) -> Option<usize> {
        self.state.wavetable_index
    }

    pub fn voice(&self, channel: usize) -> Option<&VoiceSlot> {
        self.voices.get(channel)
    }

    pub fn active_voices(&self) -> usize {
        self.lifecycle.active_channels()
    }

    fn drain_wavetable_requests(&mut self) {
        let Some(message) = self.wavetable_rx.drain_latest() else {
            return;
        };
        match message.resolve(shared_tables()) {
            Some(index) => {
                tracing::debug!(index, "wavetable load requested");
                self.state.wavetable_index = Some(index);
            }
            None => tracing::warn!(request = ?message, "unknown wavetable requested"),
        }
    }

    fn stage_voice(&mut self, c: usize) {
        for i in 0..N_OSC_PARAMS {
            self.storage.set_value_f01(i, self.matrix.value(1 + i, c));
        }
        self.scene.copy_all(&self.storage);
    }

    fn run_voice(&mut self, c: usize, pitch: f32) {
        let quantum = Quantum::new(pitch, &self.scene);
        let voice = &mut self.voices[c];
        if voice.pending().replace {
            self.loaded[c] = None;
        }
        voice.prepare(self.sample_rate, &quantum);

        if let Some(index) = self.state.wavetable_index {
            if self.loaded[c] != Some(index) && voice.load_wavetable(index) {
                self.loaded[c] = Some(index);
            }
        }
        voice.process(&quantum);
    }
}

impl PolyModule for Vco {
    fn type_id(&self) -> &'static str {
        match self.kind {
            OscillatorKind::Classic => "vco_classic",
            OscillatorKind::Sine => "vco_sine",
            OscillatorKind::Wavetable => "vco_wavetable",
        }
    }

    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn param_defs(&self) -> &[ParamDef] {
        &self.params
    }

    fn process(&mut self, io: &mut ModuleIo, _args: &ProcessArgs) {
        let pitch_cv = *io.input(Self::PITCH_CV);
        let n = self.lifecycle.track_channels(pitch_cv.channels());
        for out in &mut io.outputs {
            out.set_channels(n);
        }

        // Retrigger edges are latched and applied at the next boundary
        let retrigger = *io.input(Self::RETRIGGER);
        if retrigger.is_connected() {
            for c in 0..n {
                if self.retrigger[c].process(retrigger.poly_voltage(c)) {
                    self.retrigger_pending[c] = true;
                }
            }
        }

        let left = io.output(Self::OUTPUT_L).is_connected();
        let right = io.output(Self::OUTPUT_R).is_connected();
        let running = left || right;

        let boundary = self.scheduler.begin_sample();
        if let Some(plan) = self.lifecycle.plan(boundary, self.scheduler.position()) {
            resolve_plan(&mut self.voices, &plan);
            if running {
                self.drain_wavetable_requests();
                self.matrix.update_values(io, n);
                let octave = io.param(Self::OCTAVE_SHIFT).round();
                let unison = self.kind.config().supports_unison;

                for c in plan.channels.clone() {
                    if plan.full_boundary && std::mem::take(&mut self.retrigger_pending[c]) {
                        resolve_voice(&mut self.voices[c], true, false);
                    }
                    self.stage_voice(c);
                    if unison {
                        check_unison(&mut self.voices[c], self.scene.i(N_OSC_PARAMS - 1));
                    }
                    let pitch =
                        self.matrix.value(0, c) + (octave + pitch_cv.voltage(c)) * 12.0;
                    self.run_voice(c, pitch);
                }
            }
        }

        let position = self.scheduler.position();
        for c in 0..n {
            let (l, r) = if running {
                let voice = &self.voices[c];
                (
                    voice.block(0).get(position).copied().unwrap_or(0.0),
                    voice.block(1).get(position).copied().unwrap_or(0.0),
                )
            } else {
                (0.0, 0.0)
            };
            let l = if left && !right { mono_combine(l, r) } else { l };
            io.output_mut(Self::OUTPUT_L)
                .set_voltage(OutputScale::Audio.apply(l), c);
            io.output_mut(Self::OUTPUT_R)
                .set_voltage(OutputScale::Audio.apply(r), c);
        }
        self.scheduler.advance();
    }

    fn on_sample_rate_change(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.lifecycle.on_sample_rate_change(&mut self.scheduler);
    }

    fn reset(&mut self) {
        self.voices = VoiceSlot::bank(UnitKind::Oscillator(self.kind), self.sample_rate);
        self.loaded = [None; MAX_POLY];
        self.retrigger = Default::default();
        self.retrigger_pending = [false; MAX_POLY];
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
        let restored: VcoState = serde_json::from_value(state.clone())?;
        if let Some(index) = restored.wavetable_index {
            if shared_tables().wavetable(index).is_none() {
                return Err(EngineError::UnknownWavetable(index.to_string()));
            }
        }
        self.state = restored;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::VoiceState;
    use crate::BLOCK_SIZE;
    use approx::assert_abs_diff_eq;
    use serde_json::json;

    fn setup(kind: OscillatorKind) -> (Vco, ModuleIo) {
        let vco = Vco::new(kind, 48000.0);
        let mut io = ModuleIo::for_module(&vco);
        io.output_mut(Vco::OUTPUT_L).set_connected(true);
        io.output_mut(Vco::OUTPUT_R).set_connected(true);
        (vco, io)
    }

    fn run(vco: &mut Vco, io: &mut ModuleIo, samples: usize) -> Vec<f32> {
        (0..samples)
            .map(|i| {
                vco.process(io, &ProcessArgs::new(48000.0, i as u64));
                io.output(Vco::OUTPUT_L).voltage(0)
            })
            .collect()
    }

    #[test]
    fn test_param_layout() {
        let (vco, io) = setup(OscillatorKind::Classic);
        assert_eq!(io.param_count(), Vco::NUM_PARAMS);
        assert_eq!(vco.param_defs().len(), Vco::NUM_PARAMS);
        assert_eq!(Vco::MOD_PARAM_0, 5);
        assert_eq!(Vco::OCTAVE_SHIFT, 25);
        assert_eq!(Vco::ARBITRARY_SWITCH_0, 26);
        assert_eq!(Vco::NUM_PARAMS, 30);
        assert_eq!(Vco::AUDIO_INPUT, 6);
        assert_eq!(vco.port_spec().inputs.len(), 7);
        assert_eq!(io.param(Vco::PITCH), 60.0);
        assert_eq!(io.param(Vco::ARBITRARY_SWITCH_0 + 3), 0.0);
        assert_eq!(vco.param_defs()[Vco::OSC_CTRL_0 + 3].name, "Unison Voices");
    }

    #[test]
    fn test_produces_audio_in_range() {
        let (mut vco, mut io) = setup(OscillatorKind::Classic);
        let out = run(&mut vco, &mut io, 4800);
        let peak = out.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!(peak > 1.0);
        assert!(peak <= 5.5);
        assert_eq!(vco.voice(0).unwrap().state(), VoiceState::FreeRun);
    }

    #[test]
    fn test_silent_without_connected_outputs() {
        let (mut vco, mut io) = setup(OscillatorKind::Sine);
        io.output_mut(Vco::OUTPUT_L).set_connected(false);
        io.output_mut(Vco::OUTPUT_R).set_connected(false);
        let out = run(&mut vco, &mut io, 100);
        assert!(out.iter().all(|v| *v == 0.0));
        assert!(!vco.voice(0).unwrap().is_spawned());

        // Connecting later still spawns the voice
        io.output_mut(Vco::OUTPUT_L).set_connected(true);
        run(&mut vco, &mut io, BLOCK_SIZE);
        assert!(vco.voice(0).unwrap().is_spawned());
    }

    #[test]
    fn test_mono_left_carries_both_lanes() {
        let (mut vco, mut io) = setup(OscillatorKind::Sine);
        // Full stereo width puts the right lane half a cycle away
        io.set_param(Vco::OSC_CTRL_0 + 2, 1.0).unwrap();
        run(&mut vco, &mut io, 40);
        let voice = vco.voice(0).unwrap();
        let p = vco.scheduler.position() - 1;
        let expected_stereo = voice.block(0)[p] * 5.0;
        assert_abs_diff_eq!(io.output(Vco::OUTPUT_L).voltage(0), expected_stereo);

        io.output_mut(Vco::OUTPUT_R).set_connected(false);
        run(&mut vco, &mut io, 1);
        let voice = vco.voice(0).unwrap();
        let p = vco.scheduler.position() - 1;
        let expected = mono_combine(voice.block(0)[p], voice.block(1)[p]) * 5.0;
        assert_abs_diff_eq!(io.output(Vco::OUTPUT_L).voltage(0), expected);
    }

    #[test]
    fn test_voices_follow_pitch_cv() {
        let (mut vco, mut io) = setup(OscillatorKind::Classic);
        io.input_mut(Vco::PITCH_CV).drive(&[0.0, 1.0, -1.0]);
        run(&mut vco, &mut io, BLOCK_SIZE);
        assert_eq!(vco.active_voices(), 3);
        assert_eq!(io.output(Vco::OUTPUT_R).channels(), 3);
        assert!((0..3).all(|c| vco.voice(c).unwrap().is_spawned()));
        assert!(!vco.voice(3).unwrap().is_spawned());
    }

    #[test]
    fn test_pitch_modulation_is_in_semitones() {
        let (mut vco, mut io) = setup(OscillatorKind::Classic);
        io.set_param(Vco::mod_depth_param(0, 1), 0.5).unwrap();
        io.input_mut(Vco::MOD_INPUT_0 + 1).drive(&[10.0]);
        run(&mut vco, &mut io, 1);
        assert_abs_diff_eq!(vco.modulation_display_value(Vco::PITCH), 6.0, epsilon = 1e-5);
        assert_eq!(vco.modulation_display_value(Vco::OCTAVE_SHIFT), 0.0);
    }

    #[test]
    fn test_retrigger_resets_phase_at_next_boundary() {
        let (mut vco, mut io) = setup(OscillatorKind::Sine);
        io.input_mut(Vco::RETRIGGER).drive(&[0.0]);
        let first = run(&mut vco, &mut io, BLOCK_SIZE);
        run(&mut vco, &mut io, 3 * BLOCK_SIZE + 7);

        io.input_mut(Vco::RETRIGGER).drive(&[10.0]);
        // No cut until the block in progress finishes
        run(&mut vco, &mut io, BLOCK_SIZE - 7);
        assert_ne!(vco.scheduler.position(), 0);
        let again = run(&mut vco, &mut io, BLOCK_SIZE);
        for (a, b) in first.iter().zip(&again) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_unison_change_respawns_voice() {
        let (mut vco, mut io) = setup(OscillatorKind::Classic);
        run(&mut vco, &mut io, BLOCK_SIZE);
        io.set_param(Vco::OSC_CTRL_0 + 3, 1.0).unwrap();
        run(&mut vco, &mut io, BLOCK_SIZE);
        assert!(!vco.voice(0).unwrap().pending().respawn);
        let out = run(&mut vco, &mut io, 480);
        assert!(out.iter().all(|v| v.is_finite()));
        assert!(out.iter().any(|v| *v != 0.0));
        assert_eq!(vco.voice(0).unwrap().state(), VoiceState::FreeRun);
    }

    #[test]
    fn test_wavetable_queue_loads_every_voice() {
        let (mut vco, mut io) = setup(OscillatorKind::Wavetable);
        let mut tx = vco.take_wavetable_sender().unwrap();
        assert!(vco.take_wavetable_sender().is_none());

        io.input_mut(Vco::PITCH_CV).drive(&[0.0, 0.5]);
        run(&mut vco, &mut io, BLOCK_SIZE);
        tx.request_index(2).unwrap();
        run(&mut vco, &mut io, BLOCK_SIZE);
        assert_eq!(vco.wavetable_index(), Some(2));
        assert_eq!(vco.loaded[..2], [Some(2), Some(2)]);

        tx.request_name("no such table").unwrap();
        run(&mut vco, &mut io, BLOCK_SIZE);
        assert_eq!(vco.wavetable_index(), Some(2));
    }

    #[test]
    fn test_sample_rate_change_reloads_wavetable() {
        let (mut vco, mut io) = setup(OscillatorKind::Wavetable);
        vco.deserialize_state(&json!({ "wavetable_index": 1 })).unwrap();
        run(&mut vco, &mut io, BLOCK_SIZE);
        assert_eq!(vco.loaded[0], Some(1));

        vco.on_sample_rate_change(96000.0);
        run(&mut vco, &mut io, 1);
        assert_eq!(vco.loaded[0], Some(1));
    }

    #[test]
    fn test_sample_rate_change_mid_block_restarts_cleanly() {
        let (mut vco, mut io) = setup(OscillatorKind::Sine);
        run(&mut vco, &mut io, BLOCK_SIZE + 8);

        vco.on_sample_rate_change(96000.0);
        let out = run(&mut vco, &mut io, 1);
        assert_eq!(vco.scheduler.position(), 1);
        let voice = vco.voice(0).unwrap();
        assert_abs_diff_eq!(out[0], voice.block(0)[0] * 5.0);

        // The restarted voice plays exactly what a fresh module would
        let (mut fresh, mut fresh_io) = setup(OscillatorKind::Sine);
        fresh.on_sample_rate_change(96000.0);
        let expected = run(&mut fresh, &mut fresh_io, BLOCK_SIZE);
        let mut got = out;
        got.extend(run(&mut vco, &mut io, BLOCK_SIZE - 1));
        for (a, b) in got.iter().zip(&expected) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_switches_and_audio_input_are_inert() {
        let (mut vco, mut io) = setup(OscillatorKind::Classic);
        let (mut other, mut other_io) = setup(OscillatorKind::Classic);
        for i in 0..4 {
            other_io.set_param(Vco::ARBITRARY_SWITCH_0 + i, 1.0).unwrap();
        }
        other_io.input_mut(Vco::AUDIO_INPUT).drive(&[3.0]);
        assert_eq!(
            run(&mut vco, &mut io, 2 * BLOCK_SIZE),
            run(&mut other, &mut other_io, 2 * BLOCK_SIZE)
        );
        // The audio input does not add voices
        assert_eq!(other.active_voices(), 1);
    }

    #[test]
    fn test_state_round_trip() {
        let (mut vco, _) = setup(OscillatorKind::Wavetable);
        assert_eq!(vco.serialize_state(), Some(json!({ "wavetable_index": null })));
        vco.deserialize_state(&json!({ "wavetable_index": 3 })).unwrap();
        assert_eq!(vco.wavetable_index(), Some(3));

        let err = vco.deserialize_state(&json!({ "wavetable_index": 999 }));
        assert!(matches!(err, Err(EngineError::UnknownWavetable(_))));
        assert_eq!(vco.wavetable_index(), Some(3));
    }

    #[test]
    fn test_type_ids() {
        assert_eq!(Vco::new(OscillatorKind::Sine, 48000.0).type_id(), "vco_sine");
        assert_eq!(
            Vco::new(OscillatorKind::Wavetable, 48000.0).type_id(),
            "vco_wavetable"
        );
    }
}
