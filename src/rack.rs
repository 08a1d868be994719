//! Minimal Host Emulation
//!
//! A [`Rack`] holds modules together with the port and parameter storage the
//! host keeps for each of them, and polyphonic cables between an output and
//! an input. Each [`Rack::step`] first moves every cable's voltages to its
//! destination (so cables delay by one sample), then processes every module
//! once.

use crate::error::{EngineError, Result};
use crate::port::{ModuleIo, ParamId, PolyModule, PolyPort, PortId, ProcessArgs};
use slotmap::SlotMap;

slotmap::new_key_type! {
    /// Handle to a module in a rack
    pub struct ModuleId;

    /// Handle to a cable in a rack
    pub struct CableId;
}

/// A polyphonic cable from one module's output to another module's input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cable {
    pub from: ModuleId,
    pub output: PortId,
    pub to: ModuleId,
    pub input: PortId,
}

struct Slot {
    module: Box<dyn PolyModule>,
    io: ModuleIo,
}

pub struct Rack {
    modules: SlotMap<ModuleId, Slot>,
    cables: SlotMap<CableId, Cable>,
    sample_rate: f32,
    frame: u64,
}

impl Rack {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            modules: SlotMap::with_key(),
            cables: SlotMap::with_key(),
            sample_rate,
            frame: 0,
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Frames processed so far
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Add a module to the rack
    pub fn add<M: PolyModule + 'static>(&mut self, module: M) -> ModuleId {
        self.add_boxed(Box::new(module))
    }

    /// Add a boxed module to the rack
    pub fn add_boxed(&mut self, mut module: Box<dyn PolyModule>) -> ModuleId {
        module.on_sample_rate_change(self.sample_rate);
        let io = ModuleIo::for_module(module.as_ref());
        let id = self.modules.insert(Slot { module, io });
        tracing::debug!(?id, "module added");
        id
    }

    /// Remove a module and every cable attached to it
    pub fn remove(&mut self, id: ModuleId) -> Result<()> {
        if !self.modules.contains_key(id) {
            return Err(EngineError::UnknownModule);
        }
        let attached: Vec<CableId> = self
            .cables
            .iter()
            .filter(|(_, c)| c.from == id || c.to == id)
            .map(|(cable_id, _)| cable_id)
            .collect();
        for cable_id in attached {
            self.disconnect(cable_id)?;
        }
        self.modules.remove(id);
        Ok(())
    }

    /// Connect an output to an input; an input takes at most one cable
    pub fn connect(
        &mut self,
        from: ModuleId,
        output: PortId,
        to: ModuleId,
        input: PortId,
    ) -> Result<CableId> {
        let source = self.modules.get(from).ok_or(EngineError::UnknownModule)?;
        if output >= source.io.outputs.len() {
            return Err(EngineError::UnknownPort {
                direction: "output",
                port: output,
            });
        }
        let dest = self.modules.get(to).ok_or(EngineError::UnknownModule)?;
        if input >= dest.io.inputs.len() {
            return Err(EngineError::UnknownPort {
                direction: "input",
                port: input,
            });
        }
        if self.cables.values().any(|c| c.to == to && c.input == input) {
            return Err(EngineError::PortAlreadyConnected(input));
        }

        let cable = Cable {
            from,
            output,
            to,
            input,
        };
        let id = self.cables.insert(cable);
        tracing::debug!(?from, output, ?to, input, "cable connected");
        Ok(id)
    }

    /// Remove a cable; its input reads as unpatched from the next step
    pub fn disconnect(&mut self, cable_id: CableId) -> Result<()> {
        let cable = self
            .cables
            .remove(cable_id)
            .ok_or(EngineError::InvalidCable)?;
        if let Some(dest) = self.modules.get_mut(cable.to) {
            dest.io.input_mut(cable.input).unpatch();
        }
        tracing::debug!(from = ?cable.from, to = ?cable.to, input = cable.input, "cable disconnected");
        Ok(())
    }

    pub fn cable(&self, id: CableId) -> Option<&Cable> {
        self.cables.get(id)
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    pub fn cable_count(&self) -> usize {
        self.cables.len()
    }

    pub fn module(&self, id: ModuleId) -> Option<&dyn PolyModule> {
        self.modules.get(id).map(|s| s.module.as_ref())
    }

    pub fn module_mut(&mut self, id: ModuleId) -> Option<&mut (dyn PolyModule + 'static)> {
        self.modules.get_mut(id).map(|s| s.module.as_mut())
    }

    pub fn set_param(&mut self, id: ModuleId, param: ParamId, value: f32) -> Result<()> {
        let slot = self.modules.get_mut(id).ok_or(EngineError::UnknownModule)?;
        slot.io.set_param(param, value)
    }

    pub fn param(&self, id: ModuleId, param: ParamId) -> Option<f32> {
        let slot = self.modules.get(id)?;
        (param < slot.io.param_count()).then(|| slot.io.param(param))
    }

    pub fn input(&self, id: ModuleId, port: PortId) -> Result<&PolyPort> {
        let slot = self.modules.get(id).ok_or(EngineError::UnknownModule)?;
        slot.io.inputs.get(port).ok_or(EngineError::UnknownPort {
            direction: "input",
            port,
        })
    }

    /// Input storage, for driving unpatched inputs with external voltages
    pub fn input_mut(&mut self, id: ModuleId, port: PortId) -> Result<&mut PolyPort> {
        let slot = self.modules.get_mut(id).ok_or(EngineError::UnknownModule)?;
        slot.io.inputs.get_mut(port).ok_or(EngineError::UnknownPort {
            direction: "input",
            port,
        })
    }

    pub fn output(&self, id: ModuleId, port: PortId) -> Result<&PolyPort> {
        let slot = self.modules.get(id).ok_or(EngineError::UnknownModule)?;
        slot.io.outputs.get(port).ok_or(EngineError::UnknownPort {
            direction: "output",
            port,
        })
    }

    /// Change the engine sample rate and notify every module
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        for slot in self.modules.values_mut() {
            slot.module.on_sample_rate_change(sample_rate);
        }
    }

    /// Return every module to its freshly constructed state
    pub fn reset(&mut self) {
        for slot in self.modules.values_mut() {
            slot.module.reset();
        }
        self.frame = 0;
    }

    /// Advance the whole rack by one sample
    pub fn step(&mut self) {
        for slot in self.modules.values_mut() {
            for out in &mut slot.io.outputs {
                out.set_connected(false);
            }
        }

        for cable in self.cables.values() {
            let Some(source) = self.modules.get_mut(cable.from) else {
                continue;
            };
            let Some(out) = source.io.outputs.get_mut(cable.output) else {
                continue;
            };
            out.set_connected(true);
            let signal = *out;

            if let Some(dest) = self.modules.get_mut(cable.to) {
                if let Some(port) = dest.io.inputs.get_mut(cable.input) {
                    port.patch(signal.channels());
                    for c in 0..port.channels() {
                        port.set_voltage(signal.voltage(c), c);
                    }
                }
            }
        }

        let args = ProcessArgs::new(self.sample_rate, self.frame);
        for slot in self.modules.values_mut() {
            let Slot { module, io } = slot;
            module.process(io, &args);
        }
        self.frame += 1;
    }
}

impl std::fmt::Debug for Rack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rack")
            .field("modules", &self.modules.len())
            .field("cables", &self.cables.len())
            .field("sample_rate", &self.sample_rate)
            .field("frame", &self.frame)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{DualFunction, Lfo, Vcf, Vco};
    use crate::unit::OscillatorKind;

    fn patch() -> (Rack, ModuleId, ModuleId) {
        let mut rack = Rack::new(48000.0);
        let vco = rack.add(Vco::new(OscillatorKind::Classic, 48000.0));
        let vcf = rack.add(Vcf::new(48000.0));
        (rack, vco, vcf)
    }

    #[test]
    fn test_connect_validation() {
        let (mut rack, vco, vcf) = patch();
        assert!(matches!(
            rack.connect(vco, 9, vcf, Vcf::INPUT_AUDIO),
            Err(EngineError::UnknownPort {
                direction: "output",
                port: 9
            })
        ));
        assert!(matches!(
            rack.connect(vco, Vco::OUTPUT_L, vcf, 42),
            Err(EngineError::UnknownPort {
                direction: "input",
                ..
            })
        ));

        rack.connect(vco, Vco::OUTPUT_L, vcf, Vcf::INPUT_AUDIO).unwrap();
        assert!(matches!(
            rack.connect(vco, Vco::OUTPUT_R, vcf, Vcf::INPUT_AUDIO),
            Err(EngineError::PortAlreadyConnected(0))
        ));
        assert_eq!(rack.cable_count(), 1);

        rack.remove(vco).unwrap();
        assert_eq!(rack.cable_count(), 0);
        assert!(matches!(rack.remove(vco), Err(EngineError::UnknownModule)));
        assert!(matches!(
            rack.connect(vco, Vco::OUTPUT_L, vcf, Vcf::INPUT_AUDIO),
            Err(EngineError::UnknownModule)
        ));
    }

    #[test]
    fn test_cable_delays_one_sample() {
        let (mut rack, vco, vcf) = patch();
        rack.connect(vco, Vco::OUTPUT_L, vcf, Vcf::INPUT_AUDIO).unwrap();
        for _ in 0..100 {
            rack.step();
            let sent = rack.output(vco, Vco::OUTPUT_L).unwrap().voltage(0);
            rack.step();
            let received = rack.input(vcf, Vcf::INPUT_AUDIO).unwrap().voltage(0);
            assert_eq!(received, sent);
        }
    }

    #[test]
    fn test_polyphony_travels_through_cables() {
        let (mut rack, vco, vcf) = patch();
        rack.connect(vco, Vco::OUTPUT_L, vcf, Vcf::INPUT_AUDIO).unwrap();
        rack.input_mut(vco, Vco::PITCH_CV)
            .unwrap()
            .drive(&[0.0, 0.25, 0.5]);
        for _ in 0..200 {
            rack.step();
        }
        assert_eq!(rack.input(vcf, Vcf::INPUT_AUDIO).unwrap().channels(), 3);
        assert_eq!(rack.output(vcf, Vcf::OUTPUT).unwrap().channels(), 3);
        assert!(rack.output(vco, Vco::OUTPUT_L).unwrap().is_connected());
        assert!(!rack.output(vco, Vco::OUTPUT_R).unwrap().is_connected());
    }

    #[test]
    fn test_disconnect_unpatches_input() {
        let (mut rack, vco, vcf) = patch();
        let cable = rack.connect(vco, Vco::OUTPUT_L, vcf, Vcf::INPUT_AUDIO).unwrap();
        rack.step();
        assert!(rack.input(vcf, Vcf::INPUT_AUDIO).unwrap().is_connected());

        rack.disconnect(cable).unwrap();
        rack.step();
        let input = rack.input(vcf, Vcf::INPUT_AUDIO).unwrap();
        assert!(!input.is_connected());
        assert_eq!(input.channels(), 0);
        assert!(matches!(rack.disconnect(cable), Err(EngineError::InvalidCable)));
    }

    #[test]
    fn test_lfo_modulates_filter() {
        let mut rack = Rack::new(48000.0);
        let lfo = rack.add(Lfo::new(48000.0));
        let vcf = rack.add(Vcf::new(48000.0));
        rack.connect(lfo, Lfo::OUTPUT_MIX, vcf, Vcf::MOD_INPUT_0).unwrap();
        rack.set_param(lfo, Lfo::RATE, 0.6).unwrap();
        rack.set_param(vcf, Vcf::mod_depth_param(Vcf::CUTOFF, 0), 1.0)
            .unwrap();

        let mut seen = Vec::new();
        for _ in 0..48000 {
            rack.step();
            let m = rack.module(vcf).unwrap().modulation_display_value(Vcf::CUTOFF);
            seen.push(m);
        }
        let max = seen.iter().cloned().fold(f32::MIN, f32::max);
        let min = seen.iter().cloned().fold(f32::MAX, f32::min);
        // ±5 V from the LFO at full depth
        assert!(max > 0.4 && min < -0.4);
    }

    #[test]
    fn test_gate_through_cable_drives_envelope() {
        let mut rack = Rack::new(48000.0);
        let lfo = rack.add(Lfo::new(48000.0));
        let env = rack.add(DualFunction::new(48000.0));
        rack.set_param(lfo, Lfo::SHAPE, 2.0).unwrap();
        rack.set_param(lfo, Lfo::RATE, 0.6).unwrap();
        rack.connect(lfo, Lfo::OUTPUT_MIX, env, DualFunction::TRIGGER_0)
            .unwrap();

        let mut peak: f32 = 0.0;
        for _ in 0..48000 {
            rack.step();
            peak = peak.max(rack.output(env, DualFunction::OUTPUT_0).unwrap().voltage(0));
        }
        assert!(peak > 5.0);
        assert_eq!(rack.frame(), 48000);
    }

    #[test]
    fn test_param_access() {
        let (mut rack, vco, _) = patch();
        rack.set_param(vco, Vco::PITCH, 72.0).unwrap();
        assert_eq!(rack.param(vco, Vco::PITCH), Some(72.0));
        assert_eq!(rack.param(vco, 999), None);
        assert!(matches!(
            rack.set_param(vco, 999, 1.0),
            Err(EngineError::UnknownParam(999))
        ));
        assert_eq!(rack.module(vco).map(|m| m.type_id()), Some("vco_classic"));
    }
}
