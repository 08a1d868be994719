//! Modulation Matrix
//!
//! Maps `M` modulation inputs onto `N` target parameters. Once per control
//! block every active voice gets
//!
//! ```text
//! value[t][c] = base[t] + Σm depth[t][m] * scale[t] * v[m][min(c, chans(m) - 1)] * 0.1
//! ```
//!
//! where `depth` comes straight from the per-(target, input) depth knobs in
//! `[-1, 1]`. A modulation input with fewer channels than the voice count
//! repeats its last channel for the remaining voices. Unpatched inputs
//! contribute nothing. The computation is a pure function of the current
//! parameter values and input voltages.

use crate::port::{ModuleIo, ParamId, PortId};
use crate::{MAX_POLY, RACK_TO_SURGE_CV_MUL};

#[derive(Debug, Clone)]
pub struct ModulationMatrix<const N: usize, const M: usize> {
    targets: [ParamId; N],
    first_depth: ParamId,
    first_input: PortId,
    depth_scale: [f32; N],
    depth: [[f32; M]; N],
    values: [[f32; MAX_POLY]; N],
    mod_values: [[f32; MAX_POLY]; N],
}

impl<const N: usize, const M: usize> ModulationMatrix<N, M> {
    /// `targets` are the base parameter ids. Depth knob for (t, m) is
    /// parameter `first_depth + t * M + m`; input `m` is port `first_input + m`.
    pub fn new(targets: [ParamId; N], first_depth: ParamId, first_input: PortId) -> Self {
        Self {
            targets,
            first_depth,
            first_input,
            depth_scale: [1.0; N],
            depth: [[0.0; M]; N],
            values: [[0.0; MAX_POLY]; N],
            mod_values: [[0.0; MAX_POLY]; N],
        }
    }

    /// Scale every depth of one target (e.g. semitones for pitch)
    pub fn with_depth_scale(mut self, target: usize, scale: f32) -> Self {
        if let Some(s) = self.depth_scale.get_mut(target) {
            *s = scale;
        }
        self
    }

    #[inline]
    pub fn depth_param(&self, target: usize, input: usize) -> ParamId {
        self.first_depth + target * M + input
    }

    #[inline]
    pub fn input_port(&self, input: usize) -> PortId {
        self.first_input + input
    }

    /// Read the depth knobs
    pub fn setup_matrix(&mut self, io: &ModuleIo) {
        for t in 0..N {
            for m in 0..M {
                self.depth[t][m] = io.param(self.depth_param(t, m)).clamp(-1.0, 1.0);
            }
        }
    }

    /// Recompute values for voices `0..channels`
    pub fn update_values(&mut self, io: &ModuleIo, channels: usize) {
        self.setup_matrix(io);
        let channels = channels.min(MAX_POLY);

        for t in 0..N {
            let base = io.param(self.targets[t]);
            for c in 0..channels {
                let mut modulation = 0.0;
                for m in 0..M {
                    let Some(port) = io.inputs.get(self.input_port(m)) else {
                        continue;
                    };
                    if !port.is_connected() || self.depth[t][m] == 0.0 {
                        continue;
                    }
                    let chans = port.channels().max(1);
                    let v = port.voltage(c.min(chans - 1));
                    modulation += self.depth[t][m] * v * RACK_TO_SURGE_CV_MUL;
                }
                modulation *= self.depth_scale[t];
                self.mod_values[t][c] = modulation;
                self.values[t][c] = base + modulation;
            }
        }
    }

    /// Effective value of a target for a voice
    #[inline]
    pub fn value(&self, target: usize, channel: usize) -> f32 {
        self.values
            .get(target)
            .and_then(|v| v.get(channel))
            .copied()
            .unwrap_or(0.0)
    }

    /// Modulation part only, without the base value
    #[inline]
    pub fn modulation(&self, target: usize, channel: usize) -> f32 {
        self.mod_values
            .get(target)
            .and_then(|v| v.get(channel))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn depth(&self, target: usize, input: usize) -> f32 {
        self.depth
            .get(target)
            .and_then(|d| d.get(input))
            .copied()
            .unwrap_or(0.0)
    }

    /// Target index of a base parameter id
    pub fn modulator_index_for(&self, param: ParamId) -> Option<usize> {
        self.targets.iter().position(|&t| t == param)
    }

    /// (target, input) controlled by a depth knob
    pub fn param_modulated_by(&self, depth_param: ParamId) -> Option<(usize, usize)> {
        let offset = depth_param.checked_sub(self.first_depth)?;
        (offset < N * M).then(|| (offset / M, offset % M))
    }

    pub fn targets(&self) -> &[ParamId; N] {
        &self.targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{ParamDef, PortDef, PortSpec, SignalKind};
    use approx::assert_abs_diff_eq;

    // Targets 0, 1; depth knobs 2..10; mod inputs 0..4
    fn io() -> ModuleIo {
        let mut params = vec![
            ParamDef::new(0, "a", 0.0, 1.0, 0.0),
            ParamDef::new(1, "b", 0.0, 1.0, 0.0),
        ];
        for i in 0..8 {
            params.push(ParamDef::new(2 + i, "depth", -1.0, 1.0, 0.0));
        }
        let spec = PortSpec {
            inputs: (0..4)
                .map(|i| PortDef::new(i, "mod", SignalKind::CvBipolar))
                .collect(),
            outputs: vec![],
        };
        ModuleIo::new(&spec, &params)
    }

    fn matrix() -> ModulationMatrix<2, 4> {
        ModulationMatrix::new([0, 1], 2, 0)
    }

    #[test]
    fn test_unpatched_inputs_contribute_nothing() {
        let mut io = io();
        io.set_param(0, 0.3).unwrap();
        io.set_param(2, 1.0).unwrap();
        io.input_mut(0).set_voltage(5.0, 0);
        let mut m = matrix();
        m.update_values(&io, 1);
        assert_abs_diff_eq!(m.value(0, 0), 0.3);
        assert_eq!(m.modulation(0, 0), 0.0);
    }

    #[test]
    fn test_linearity() {
        let mut io = io();
        for p in 2..10 {
            io.set_param(p, -0.7).unwrap();
        }
        let mut m = matrix();
        io.input_mut(1).drive(&[2.0]);
        m.update_values(&io, 1);
        let single = [m.value(0, 0), m.value(1, 0)];
        io.input_mut(1).drive(&[4.0]);
        m.update_values(&io, 1);
        for t in 0..2 {
            assert_abs_diff_eq!(m.value(t, 0), 2.0 * single[t], epsilon = 1e-6);
            assert_abs_diff_eq!(single[t], -0.7 * 2.0 * 0.1, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_broadcast_last_channel() {
        let mut io = io();
        io.set_param(m_depth(0, 2), 0.5).unwrap();
        io.input_mut(2).drive(&[3.0]);
        let mut m = matrix();
        m.update_values(&io, 4);
        for c in 1..4 {
            assert_eq!(m.value(0, c), m.value(0, 0));
        }
        assert_abs_diff_eq!(m.value(0, 3), 0.15, epsilon = 1e-6);

        // Two channels: voice 1 and beyond reuse channel 1, never channel 0
        io.input_mut(2).drive(&[3.0, -1.0]);
        m.update_values(&io, 4);
        assert_abs_diff_eq!(m.value(0, 0), 0.15, epsilon = 1e-6);
        for c in 1..4 {
            assert_abs_diff_eq!(m.value(0, c), -0.05, epsilon = 1e-6);
        }
    }

    fn m_depth(t: usize, input: usize) -> ParamId {
        matrix().depth_param(t, input)
    }

    #[test]
    fn test_idempotent_recompute() {
        let mut io = io();
        io.set_param(0, 0.25).unwrap();
        io.set_param(m_depth(1, 3), 0.9).unwrap();
        io.input_mut(3).drive(&[1.0, 2.0, 3.0]);
        let mut m = matrix();
        m.update_values(&io, 3);
        let first: Vec<f32> = (0..3).map(|c| m.value(1, c)).collect();
        m.update_values(&io, 3);
        let second: Vec<f32> = (0..3).map(|c| m.value(1, c)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_depth_scale_and_lookup() {
        let mut io = io();
        io.set_param(m_depth(0, 0), 1.0).unwrap();
        io.input_mut(0).drive(&[1.0]);
        let mut m = matrix().with_depth_scale(0, 12.0);
        m.update_values(&io, 1);
        assert_abs_diff_eq!(m.modulation(0, 0), 1.2, epsilon = 1e-6);

        assert_eq!(m.modulator_index_for(1), Some(1));
        assert_eq!(m.modulator_index_for(7), None);
        assert_eq!(m.param_modulated_by(2 + 4 + 3), Some((1, 3)));
        assert_eq!(m.param_modulated_by(1), None);
        assert_eq!(m.param_modulated_by(10), None);
    }
}
