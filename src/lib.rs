//! # rackpoly: Polyphonic Modulation and Voice Engine for Rack Modules
//!
//! `rackpoly` drives synthesizer DSP units (oscillators, LFOs, envelopes,
//! filters, stereo effects) as polyphonic modules inside a modular host that
//! calls them once per audio sample.
//!
//! ## Architecture
//!
//! The per-sample work is split into a control-rate and an audio-rate part:
//!
//! - **Block Scheduler** - decides when a control block boundary happens
//! - **Lifecycle Controller** - channel-count changes, sample-rate changes,
//!   gate edges and unison changes become attack/release/respawn transitions
//! - **Modulation Matrix** - per-voice parameter values from depth knobs and
//!   modulation inputs, recomputed every block
//! - **Voice Slots** - one exclusively owned processing unit per voice, fed a
//!   staged parameter snapshot for every quantum
//! - **Interpolation Stage** - two generations of control values, blended
//!   across the block and scaled to host voltages
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rackpoly::prelude::*;
//!
//! let mut rack = Rack::new(48000.0);
//! let lfo = rack.add(Lfo::new(48000.0));
//! let vcf = rack.add(Vcf::new(48000.0));
//! let vco = rack.add(Vco::new(OscillatorKind::Classic, 48000.0));
//!
//! rack.connect(vco, Vco::OUTPUT_L, vcf, Vcf::INPUT_AUDIO).unwrap();
//! rack.connect(lfo, Lfo::OUTPUT_MIX, vcf, Vcf::MOD_INPUT_0).unwrap();
//! rack.set_param(vcf, Vcf::mod_depth_param(Vcf::CUTOFF, 0), 0.5).unwrap();
//!
//! for _ in 0..48000 {
//!     rack.step();
//! }
//! let out = rack.output(vcf, Vcf::OUTPUT).unwrap().voltage(0);
//! # let _ = out;
//! ```

pub mod error;
pub mod interp;
pub mod lifecycle;
pub mod matrix;
pub mod modules;
pub mod port;
pub mod queue;
pub mod rack;
pub mod scene;
pub mod scheduler;
pub mod tables;
pub mod trigger;
pub mod unit;
pub mod voice;

/// Most polyphonic voices a module runs
pub const MAX_POLY: usize = 16;

/// Most channels a host port carries
pub const PORT_MAX_CHANNELS: usize = 16;

/// Samples per control block
pub const BLOCK_SIZE: usize = 32;

/// Samples per oversampled oscillator block
pub const BLOCK_SIZE_OS: usize = 2 * BLOCK_SIZE;

/// Host volts to engine control units
pub const RACK_TO_SURGE_CV_MUL: f32 = 0.1;

/// Host audio volts to engine audio units
pub const RACK_TO_SURGE_OSC_MUL: f32 = 0.2;

/// Engine audio to host volts
pub const SURGE_TO_RACK_OSC_MUL: f32 = 5.0;

/// Engine control to host volts
pub const SURGE_TO_RACK_CV_MUL: f32 = 10.0;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{EngineError, Result};

    // Host abstraction
    pub use crate::port::{
        ModuleIo, ParamDef, ParamId, PolyModule, PolyPort, PortDef, PortId, PortSpec,
        ProcessArgs, SignalKind,
    };
    pub use crate::rack::{Cable, CableId, ModuleId, Rack};

    // Engine
    pub use crate::interp::{mono_combine, Generations, OutputScale};
    pub use crate::lifecycle::{ChannelTracker, GateLatch, LifecycleController};
    pub use crate::matrix::ModulationMatrix;
    pub use crate::scene::{ParamStorage, Parameter, SceneData};
    pub use crate::scheduler::{BlockScheduler, Boundary};
    pub use crate::trigger::SchmittTrigger;
    pub use crate::voice::{VoiceSlot, VoiceState};

    // Processing units
    pub use crate::unit::{spawn_unit, EffectKind, OscillatorKind, ProcessingUnit, UnitKind};

    // Modules
    pub use crate::modules::{DualFunction, Fx, Lfo, Vcf, Vco};

    pub use crate::queue::{wavetable_queue, WavetableReceiver, WavetableSender};
    pub use crate::tables::shared_tables;

    pub use crate::{BLOCK_SIZE, MAX_POLY};
}
