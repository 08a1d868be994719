//! Signal Conventions and the Host Port Abstraction
//!
//! This module defines the signal kinds, port and parameter definitions, and
//! the small slice of the host contract the engine relies on: polyphonic
//! ports with a channel count, per-channel voltage access, and parameter
//! values. Modules implement [`PolyModule`] and are driven once per sample.

use crate::error::{EngineError, Result};
use crate::trigger::GATE_HIGH_THRESHOLD;
use crate::PORT_MAX_CHANNELS;
use serde::{Deserialize, Serialize};

/// Index of a port within a module's input or output list
pub type PortId = usize;

/// Index of a parameter within a module
pub type ParamId = usize;

/// Semantic signal classification following hardware modular conventions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    /// Audio signal, ±5V peak
    Audio,

    /// Bipolar control voltage, ±10V at full modulation depth
    CvBipolar,

    /// Unipolar control voltage, 0–10V (envelopes)
    CvUnipolar,

    /// Pitch CV following 1V/octave
    VoltPerOctave,

    /// Gate signal, high while a note is held
    Gate,

    /// Trigger signal, short pulse
    Trigger,
}

impl SignalKind {
    /// Returns the typical voltage range (min, max) for this signal type
    pub fn voltage_range(&self) -> (f32, f32) {
        match self {
            SignalKind::Audio => (-5.0, 5.0),
            SignalKind::CvBipolar => (-10.0, 10.0),
            SignalKind::CvUnipolar => (0.0, 10.0),
            SignalKind::VoltPerOctave => (-5.0, 5.0),
            SignalKind::Gate => (0.0, 10.0),
            SignalKind::Trigger => (0.0, 10.0),
        }
    }

    /// Threshold voltage for high/low detection
    pub fn gate_threshold(&self) -> Option<f32> {
        match self {
            SignalKind::Gate | SignalKind::Trigger => Some(GATE_HIGH_THRESHOLD),
            _ => None,
        }
    }
}

/// Definition of a single port (input or output)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortDef {
    /// Position within the module's input or output list
    pub id: PortId,

    /// Human-readable name (e.g., "trigger", "mix")
    pub name: String,

    /// Signal type for validation and UI hints
    pub kind: SignalKind,
}

impl PortDef {
    pub fn new(id: PortId, name: impl Into<String>, kind: SignalKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
        }
    }
}

/// Specification of all ports for a module
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortSpec {
    pub inputs: Vec<PortDef>,
    pub outputs: Vec<PortDef>,
}

impl PortSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input_by_name(&self, name: &str) -> Option<&PortDef> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output_by_name(&self, name: &str) -> Option<&PortDef> {
        self.outputs.iter().find(|p| p.name == name)
    }
}

/// Parameter definition for host binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDef {
    pub id: ParamId,
    pub name: String,
    pub min: f32,
    pub max: f32,
    pub default: f32,
    /// Whether the host should snap the knob to integers
    pub snap: bool,
}

impl ParamDef {
    pub fn new(id: ParamId, name: impl Into<String>, min: f32, max: f32, default: f32) -> Self {
        Self {
            id,
            name: name.into(),
            min,
            max,
            default,
            snap: false,
        }
    }

    pub fn snapped(mut self) -> Self {
        self.snap = true;
        self
    }

    /// Clamp a value into this parameter's range
    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }
}

/// A polyphonic port: up to [`PORT_MAX_CHANNELS`] voltages plus a channel count
#[derive(Debug, Clone, Copy)]
pub struct PolyPort {
    voltages: [f32; PORT_MAX_CHANNELS],
    channels: usize,
    connected: bool,
}

impl Default for PolyPort {
    fn default() -> Self {
        Self {
            voltages: [0.0; PORT_MAX_CHANNELS],
            channels: 0,
            connected: false,
        }
    }
}

impl PolyPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of channels; 0 for an unpatched input
    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Voltage on one channel; channels outside the stored range read 0V
    #[inline]
    pub fn voltage(&self, channel: usize) -> f32 {
        self.voltages.get(channel).copied().unwrap_or(0.0)
    }

    /// Voltage for a voice; a mono cable feeds every voice
    #[inline]
    pub fn poly_voltage(&self, channel: usize) -> f32 {
        if self.channels == 1 {
            self.voltages[0]
        } else {
            self.voltage(channel)
        }
    }

    #[inline]
    pub fn set_voltage(&mut self, voltage: f32, channel: usize) {
        if let Some(v) = self.voltages.get_mut(channel) {
            *v = voltage;
        }
    }

    pub fn voltages(&self) -> &[f32] {
        &self.voltages[..self.channels]
    }

    /// Set the channel count (outputs do this every sample)
    pub fn set_channels(&mut self, channels: usize) {
        let channels = channels.min(PORT_MAX_CHANNELS);
        // Channels that drop out read as silence when they come back
        for v in &mut self.voltages[channels..] {
            *v = 0.0;
        }
        self.channels = channels;
    }

    /// Mark an output as carrying a cable
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Patch an input with `channels` channels (at least one)
    pub fn patch(&mut self, channels: usize) {
        self.connected = true;
        self.set_channels(channels.max(1));
    }

    /// Remove the cable from an input
    pub fn unpatch(&mut self) {
        self.connected = false;
        self.set_channels(0);
    }

    /// Patch and set every channel at once
    pub fn drive(&mut self, voltages: &[f32]) {
        self.patch(voltages.len());
        for (c, &v) in voltages.iter().take(PORT_MAX_CHANNELS).enumerate() {
            self.voltages[c] = v;
        }
    }
}

/// Parameter and port storage the host keeps for each module instance
#[derive(Debug, Clone)]
pub struct ModuleIo {
    params: Vec<f32>,
    pub inputs: Vec<PolyPort>,
    pub outputs: Vec<PolyPort>,
}

impl ModuleIo {
    /// Size storage for a module and load parameter defaults
    pub fn new(spec: &PortSpec, params: &[ParamDef]) -> Self {
        let mut values = vec![0.0; params.len()];
        for def in params {
            if let Some(v) = values.get_mut(def.id) {
                *v = def.default;
            }
        }
        Self {
            params: values,
            inputs: vec![PolyPort::new(); spec.inputs.len()],
            outputs: vec![PolyPort::new(); spec.outputs.len()],
        }
    }

    /// Build storage for a module using its own definitions
    pub fn for_module(module: &dyn PolyModule) -> Self {
        Self::new(module.port_spec(), module.param_defs())
    }

    /// Current value of a parameter; unknown ids read 0
    #[inline]
    pub fn param(&self, id: ParamId) -> f32 {
        self.params.get(id).copied().unwrap_or(0.0)
    }

    pub fn set_param(&mut self, id: ParamId, value: f32) -> Result<()> {
        let slot = self
            .params
            .get_mut(id)
            .ok_or(EngineError::UnknownParam(id))?;
        *slot = value;
        Ok(())
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    #[inline]
    pub fn input(&self, id: PortId) -> &PolyPort {
        &self.inputs[id]
    }

    #[inline]
    pub fn input_mut(&mut self, id: PortId) -> &mut PolyPort {
        &mut self.inputs[id]
    }

    #[inline]
    pub fn output(&self, id: PortId) -> &PolyPort {
        &self.outputs[id]
    }

    #[inline]
    pub fn output_mut(&mut self, id: PortId) -> &mut PolyPort {
        &mut self.outputs[id]
    }
}

/// Per-call timing information from the host
#[derive(Debug, Clone, Copy)]
pub struct ProcessArgs {
    pub sample_rate: f32,
    pub sample_time: f32,
    /// Absolute frame counter
    pub frame: u64,
}

impl ProcessArgs {
    pub fn new(sample_rate: f32, frame: u64) -> Self {
        Self {
            sample_rate,
            sample_time: 1.0 / sample_rate,
            frame,
        }
    }
}

/// Type-erased module interface the host drives once per sample
pub trait PolyModule: Send {
    /// Module type identifier
    fn type_id(&self) -> &'static str;

    /// Returns the module's port specification
    fn port_spec(&self) -> &PortSpec;

    /// Parameter definitions, indexed by [`ParamId`]
    fn param_defs(&self) -> &[ParamDef];

    /// Process one sample
    fn process(&mut self, io: &mut ModuleIo, args: &ProcessArgs);

    /// Called by the host when the engine sample rate changes
    fn on_sample_rate_change(&mut self, sample_rate: f32);

    /// Return every voice to its freshly constructed state
    fn reset(&mut self) {}

    /// Modulation-only part of a target's value on the first voice, for display
    fn modulation_display_value(&self, _param: ParamId) -> f32 {
        0.0
    }

    /// Serialize persisted flags
    fn serialize_state(&self) -> Option<serde_json::Value> {
        None
    }

    /// Restore persisted flags
    fn deserialize_state(&mut self, _state: &serde_json::Value) -> Result<()> {
        Ok(())
    }
}
