//! Host-Facing Modules
//!
//! Each module wires the engine pieces together for one kind of unit:
//!
//! | Module | Unit | Voices follow | Output stage |
//! |--------|------|---------------|--------------|
//! | [`Vco`] | oscillator | pitch CV channels | audio blocks, ×5 V |
//! | [`Lfo`] | LFO | trigger channels | interpolated, ×5 V |
//! | [`DualFunction`] | two envelopes | both trigger inputs | interpolated, ×10 V |
//! | [`Vcf`] | filter | audio input channels | audio blocks, ×5 V |
//! | [`Fx`] | stereo effect | one voice | audio blocks, ×5 V |
//!
//! Per sample every module runs the same pipeline: track channels, observe
//! gates, ask the scheduler for a boundary, and on a boundary resolve
//! lifecycles, recompute the modulation matrix, stage each voice's scene and
//! run its quantum. Between boundaries, a voice whose gate latched an edge
//! runs a partial quantum of its own.

mod dual_function;
mod fx;
mod lfo;
mod vcf;
mod vco;

pub use dual_function::{DualFunction, DualFunctionState};
pub use fx::{Fx, MAX_FX_PARAMS};
pub use lfo::Lfo;
pub use vcf::Vcf;
pub use vco::{Vco, VcoState};

use crate::interp::Generations;
use crate::lifecycle::Plan;
use crate::unit::Quantum;
use crate::voice::{Prepared, VoiceSlot};

/// Modulation inputs on every module
pub const N_MOD_INPUTS: usize = 4;

/// Run one control-rate voice and record its lanes as the current generation
///
/// Unit lane `i` lands in generation lane `first_lane + i`. The quantum is cut
/// to the samples left in the block, so a voice that starts mid-block lands
/// back on the grid at the next boundary.
pub(crate) fn run_control_voice<const L: usize>(
    voice: &mut VoiceSlot,
    gens: &mut Generations<L>,
    first_lane: usize,
    unit_lanes: usize,
    sample_rate: f32,
    quantum: &Quantum<'_>,
    plan: &Plan,
) {
    let c = voice.index();
    let lanes = first_lane..first_lane + unit_lanes;
    let quantum = quantum.with_samples(plan.samples());
    let at = plan.segment_start();

    if !plan.full_boundary && plan.respawns(c) {
        // Joining mid-block: nothing of this voice has played yet
        for lane in lanes.clone() {
            gens.clear_lane(lane, c);
        }
    }

    if voice.prepare(sample_rate, &quantum) == Prepared::NeedsPrime {
        voice.process(&quantum);
        for (i, lane) in lanes.clone().enumerate() {
            let primed = voice.output(i);
            gens.set_current(lane, c, primed);
            gens.begin_segment(lane, c, primed, at);
        }
    } else if plan.full_boundary {
        for lane in lanes.clone() {
            gens.advance_lane(lane, c, plan.interrupted_at);
        }
    } else {
        for lane in lanes.clone() {
            gens.split_lane(lane, c, at);
        }
    }

    if voice.process(&quantum) {
        for (i, lane) in lanes.enumerate() {
            gens.set_current(lane, c, voice.output(i));
        }
    }
}
