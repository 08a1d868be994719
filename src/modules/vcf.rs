//! Polyphonic filter module
//!
//! Audio arrives one sample per call and is gathered into a per-voice block.
//! At each boundary the gathered block is filtered and the result is played
//! back during the following block, so the module adds one block of latency.

use super::N_MOD_INPUTS;
use crate::interp::OutputScale;
use crate::lifecycle::{resolve_plan, LifecycleController};
use crate::matrix::ModulationMatrix;
use crate::port::{
    ModuleIo, ParamDef, ParamId, PolyModule, PortDef, PortId, PortSpec, ProcessArgs, SignalKind,
};
use crate::scene::{ParamStorage, SceneData};
use crate::scheduler::BlockScheduler;
use crate::unit::{spawn_unit, FilterParam, Quantum, UnitKind, FILTER_LAYOUT};
use crate::voice::VoiceSlot;
use crate::{BLOCK_SIZE, MAX_POLY, RACK_TO_SURGE_OSC_MUL};

const N_TARGETS: usize = 3;

pub struct Vcf {
    voices: [VoiceSlot; MAX_POLY],
    storage: ParamStorage,
    scene: SceneData,
    matrix: ModulationMatrix<N_TARGETS, N_MOD_INPUTS>,
    lifecycle: LifecycleController,
    scheduler: BlockScheduler,
    input: [[f32; BLOCK_SIZE]; MAX_POLY],
    /// Channels that gathered input on the previous sample
    gathered: usize,
    sample_rate: f32,
    spec: PortSpec,
    params: Vec<ParamDef>,
}

impl Vcf {
    pub const CUTOFF: ParamId = 0;
    pub const RESONANCE: ParamId = 1;
    pub const DRIVE: ParamId = 2;
    pub const MODE: ParamId = 3;
    pub const MOD_PARAM_0: ParamId = 4;
    pub const NUM_PARAMS: usize = Self::MOD_PARAM_0 + N_TARGETS * N_MOD_INPUTS;

    pub const INPUT_AUDIO: PortId = 0;
    pub const MOD_INPUT_0: PortId = 1;

    pub const OUTPUT: PortId = 0;

    pub fn new(sample_rate: f32) -> Self {
        let mut storage = ParamStorage::new();
        let proto = spawn_unit(UnitKind::Filter, sample_rate, 0);
        proto.init_ctrltypes(&mut storage);
        proto.init_default_values(&mut storage);
        let scene = SceneData::with_len(storage.len());

        let mut inputs = vec![PortDef::new(Self::INPUT_AUDIO, "in", SignalKind::Audio)];
        for m in 0..N_MOD_INPUTS {
            inputs.push(PortDef::new(
                Self::MOD_INPUT_0 + m,
                format!("mod{}", m + 1),
                SignalKind::CvBipolar,
            ));
        }

        let mut params: Vec<ParamDef> = FILTER_LAYOUT[..N_TARGETS]
            .iter()
            .enumerate()
            .map(|(id, l)| ParamDef::new(id, l.name, 0.0, 1.0, l.default_f01))
            .collect();
        params.push(ParamDef::new(Self::MODE, "Mode", 0.0, 3.0, 0.0).snapped());
        for t in 0..N_TARGETS {
            for m in 0..N_MOD_INPUTS {
                params.push(ParamDef::new(
                    Self::mod_depth_param(t, m),
                    format!("{} mod {}", FILTER_LAYOUT[t].name, m + 1),
                    -1.0,
                    1.0,
                    0.0,
                ));
            }
        }

        Self {
            voices: VoiceSlot::bank(UnitKind::Filter, sample_rate),
            storage,
            scene,
            matrix: ModulationMatrix::new([0, 1, 2], Self::MOD_PARAM_0, Self::MOD_INPUT_0),
            lifecycle: LifecycleController::new(),
            scheduler: BlockScheduler::new(),
            input: [[0.0; BLOCK_SIZE]; MAX_POLY],
            gathered: 0,
            sample_rate,
            spec: PortSpec {
                inputs,
                outputs: vec![PortDef::new(Self::OUTPUT, "out", SignalKind::Audio)],
            },
            params,
        }
    }

    pub const fn mod_depth_param(param: ParamId, input: usize) -> ParamId {
        Self::MOD_PARAM_0 + param * N_MOD_INPUTS + input
    }

    pub fn voice(&self, channel: usize) -> Option<&VoiceSlot> {
        self.voices.get(channel)
    }

    fn stage_voice(&mut self, io: &ModuleIo, c: usize) {
        for t in 0..N_TARGETS {
            self.storage.set_value_f01(t, self.matrix.value(t, c));
        }
        self.storage
            .set_value_f01(FilterParam::Mode.index(), io.param(Self::MODE) / 3.0);
        self.scene.copy_all(&self.storage);
    }
}

impl Default for Vcf {
    fn default() -> Self {
        Self::new(44100.0)
    }
}

impl PolyModule for Vcf {
    fn type_id(&self) -> &'static str {
        "vcf"
    }

    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn param_defs(&self) -> &[ParamDef] {
        &self.params
    }

    fn process(&mut self, io: &mut ModuleIo, _args: &ProcessArgs) {
        let audio = *io.input(Self::INPUT_AUDIO);
        let n = self.lifecycle.track_channels(audio.channels());
        io.output_mut(Self::OUTPUT).set_channels(n);

        let boundary = self.scheduler.begin_sample();
        if let Some(plan) = self.lifecycle.plan(boundary, self.scheduler.position()) {
            resolve_plan(&mut self.voices, &plan);
            self.matrix.update_values(io, n);
            for c in plan.channels.clone() {
                if plan.respawns(c) {
                    // A forced boundary keeps what this voice gathered of the
                    // cut-short block; the rest is from the block before
                    let keep = match plan.interrupted_position() {
                        Some(p) if c < self.gathered => p,
                        _ => 0,
                    };
                    self.input[c][keep..].fill(0.0);
                }
                self.stage_voice(io, c);
                let quantum = Quantum::new(0.0, &self.scene).with_input(&self.input[c]);
                let voice = &mut self.voices[c];
                voice.prepare(self.sample_rate, &quantum);
                voice.process(&quantum);
            }
        }

        let position = self.scheduler.position();
        let out = io.output_mut(Self::OUTPUT);
        for c in 0..n {
            if let Some(x) = self.input[c].get_mut(position) {
                *x = audio.voltage(c) * RACK_TO_SURGE_OSC_MUL;
            }
            let y = self.voices[c].block(0).get(position).copied().unwrap_or(0.0);
            out.set_voltage(OutputScale::Audio.apply(y), c);
        }
        self.gathered = n;
        self.scheduler.advance();
    }

    fn on_sample_rate_change(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.lifecycle.on_sample_rate_change(&mut self.scheduler);
    }

    fn reset(&mut self) {
        self.voices = VoiceSlot::bank(UnitKind::Filter, self.sample_rate);
        self.input = [[0.0; BLOCK_SIZE]; MAX_POLY];
        self.gathered = 0;
        self.lifecycle.reset();
        self.scheduler.reset();
    }

    fn modulation_display_value(&self, param: ParamId) -> f32 {
        self.matrix
            .modulator_index_for(param)
            .map_or(0.0, |t| self.matrix.modulation(t, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn setup() -> (Vcf, ModuleIo) {
        let vcf = Vcf::new(48000.0);
        let io = ModuleIo::for_module(&vcf);
        (vcf, io)
    }

    fn step(vcf: &mut Vcf, io: &mut ModuleIo, input: &[f32]) -> f32 {
        io.input_mut(Vcf::INPUT_AUDIO).drive(input);
        vcf.process(io, &ProcessArgs::new(48000.0, 0));
        io.output(Vcf::OUTPUT).voltage(0)
    }

    #[test]
    fn test_one_block_latency() {
        let (mut vcf, mut io) = setup();
        io.set_param(Vcf::CUTOFF, 1.0).unwrap();
        let mut out = Vec::new();
        for _ in 0..3 * BLOCK_SIZE {
            out.push(step(&mut vcf, &mut io, &[5.0]));
        }
        assert!(out[..BLOCK_SIZE].iter().all(|v| *v == 0.0));
        assert!(out[BLOCK_SIZE + 4] > 0.0);
        assert_abs_diff_eq!(out[3 * BLOCK_SIZE - 1], 5.0, epsilon = 0.05);
    }

    #[test]
    fn test_lowpass_rejects_nyquist() {
        let (mut vcf, mut io) = setup();
        io.set_param(Vcf::CUTOFF, 0.0).unwrap();
        let mut peak: f32 = 0.0;
        for i in 0..20 * BLOCK_SIZE {
            let x = if i % 2 == 0 { 5.0 } else { -5.0 };
            let y = step(&mut vcf, &mut io, &[x]);
            if i > 2 * BLOCK_SIZE {
                peak = peak.max(y.abs());
            }
        }
        assert!(peak < 0.05);
    }

    #[test]
    fn test_highpass_blocks_dc() {
        let (mut vcf, mut io) = setup();
        io.set_param(Vcf::MODE, 2.0).unwrap();
        let mut last = 0.0;
        for _ in 0..4800 {
            last = step(&mut vcf, &mut io, &[5.0]);
        }
        assert!(last.abs() < 0.01);
    }

    #[test]
    fn test_voices_follow_input_channels() {
        let (mut vcf, mut io) = setup();
        io.set_param(Vcf::CUTOFF, 1.0).unwrap();
        for _ in 0..3 * BLOCK_SIZE {
            step(&mut vcf, &mut io, &[5.0, -5.0, 0.0]);
        }
        let out = io.output(Vcf::OUTPUT);
        assert_eq!(out.channels(), 3);
        assert!(out.voltage(0) > 4.0);
        assert!(out.voltage(1) < -4.0);
        assert_abs_diff_eq!(out.voltage(2), 0.0);
        assert!(!vcf.voice(3).unwrap().is_spawned());
    }

    #[test]
    fn test_sample_rate_change_mid_block_keeps_gathered_input() {
        let (mut vcf, mut io) = setup();
        io.set_param(Vcf::CUTOFF, 1.0).unwrap();
        for _ in 0..BLOCK_SIZE + 8 {
            step(&mut vcf, &mut io, &[5.0]);
        }

        vcf.on_sample_rate_change(96000.0);
        let out = step(&mut vcf, &mut io, &[5.0]);
        assert_eq!(vcf.scheduler.position(), 1);
        assert!(vcf.input[0][..8].iter().all(|x| *x == 1.0));
        assert!(vcf.input[0][8..].iter().all(|x| *x == 0.0));

        // The restarted filter sees the eight fresh samples from its first
        // output sample on, then silence where the old block would have been
        let block = vcf.voice(0).unwrap().block(0);
        assert_abs_diff_eq!(out, block[0] * 5.0);
        assert_abs_diff_eq!(block[0], 0.99 * 0.99, epsilon = 1e-4);
        assert!(block[7] > 0.9);
        assert!(block[BLOCK_SIZE - 1].abs() < block[7]);
    }

    #[test]
    fn test_new_voice_at_forced_boundary_starts_silent() {
        let (mut vcf, mut io) = setup();
        io.set_param(Vcf::CUTOFF, 1.0).unwrap();
        for _ in 0..BLOCK_SIZE + 8 {
            step(&mut vcf, &mut io, &[5.0]);
        }
        vcf.on_sample_rate_change(96000.0);
        step(&mut vcf, &mut io, &[5.0, 5.0]);
        assert!(vcf.input[1][1..].iter().all(|x| *x == 0.0));
        assert_eq!(vcf.voice(1).unwrap().block(0)[0], 0.0);
    }

    #[test]
    fn test_cutoff_modulation_display() {
        let (mut vcf, mut io) = setup();
        io.set_param(Vcf::mod_depth_param(Vcf::CUTOFF, 2), 1.0).unwrap();
        io.input_mut(Vcf::MOD_INPUT_0 + 2).drive(&[-3.0]);
        step(&mut vcf, &mut io, &[0.0]);
        assert_abs_diff_eq!(vcf.modulation_display_value(Vcf::CUTOFF), -0.3, epsilon = 1e-6);
        assert_eq!(vcf.modulation_display_value(Vcf::MODE), 0.0);
    }
}
