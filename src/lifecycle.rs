//! Lifecycle Controller
//!
//! Detects the events that change a voice's lifecycle and turns them into
//! [`Transition`]s for the voice slots:
//!
//! - polyphony channel-count growth respawns exactly the newly active voices
//! - a sample-rate change replaces every active voice's unit
//! - gate edges and gate connect/disconnect drive attack and release
//! - unison-count changes respawn a voice (oscillators)
//!
//! Gates are observed every sample and edges are latched. A boundary consumes
//! every latch it covers. An edge between boundaries is resolved on the
//! sample where the threshold was crossed by [`resolve_edge`], which gives
//! only that voice a partial quantum reaching to the next boundary; the block
//! grid and the other voices are untouched.

use crate::scheduler::{BlockScheduler, Boundary};
use crate::trigger::{Edge, SchmittTrigger};
use crate::voice::{Transition, VoiceSlot, VoiceState};
use crate::{BLOCK_SIZE, MAX_POLY};
use core::ops::Range;

/// Number of active polyphony channels
#[derive(Debug, Clone, Default)]
pub struct ChannelTracker {
    active: usize,
}

impl ChannelTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> usize {
        self.active
    }

    /// Update from the requested channel count
    ///
    /// Zero is treated as one channel. Returns the range of newly activated
    /// channels when the count grows.
    pub fn update(&mut self, requested: usize) -> Option<Range<usize>> {
        let n = requested.clamp(1, MAX_POLY);
        let old = self.active;
        self.active = n;
        (n > old).then_some(old..n)
    }

    /// Forget all channels so the next update activates every voice again
    pub fn reset(&mut self) {
        self.active = 0;
    }
}

/// Gate events latched since the last boundary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateEvents {
    pub rising: bool,
    pub falling: bool,
    /// The gate cable was connected or disconnected
    pub topology_changed: bool,
}

/// Per-voice gate observer with latched edges
#[derive(Debug, Clone)]
pub struct GateLatch {
    trigger: SchmittTrigger,
    connected: bool,
    events: GateEvents,
}

impl GateLatch {
    pub fn new() -> Self {
        Self {
            trigger: SchmittTrigger::default(),
            connected: false,
            events: GateEvents::default(),
        }
    }

    /// Observe one sample of the gate; true if it latched an event
    pub fn observe(&mut self, connected: bool, voltage: f32) -> bool {
        let mut latched = false;
        if connected != self.connected {
            self.connected = connected;
            self.events.topology_changed = true;
            self.trigger.reset();
            latched = true;
        }
        if connected {
            match self.trigger.process_edges(voltage) {
                Edge::Rising => {
                    self.events.rising = true;
                    latched = true;
                }
                Edge::Falling => {
                    self.events.falling = true;
                    latched = true;
                }
                Edge::None => {}
            }
        }
        latched
    }

    /// Whether any event is waiting to be resolved
    pub fn has_events(&self) -> bool {
        self.events != GateEvents::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_high(&self) -> bool {
        self.connected && self.trigger.is_high()
    }

    /// Consume the latched events
    pub fn take(&mut self) -> GateEvents {
        std::mem::take(&mut self.events)
    }
}

impl Default for GateLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Which voices a sample's pipeline run covers
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    /// Channels that run a quantum
    pub channels: Range<usize>,
    /// Channels to respawn
    pub respawn: Range<usize>,
    /// Replace units wholesale (sample-rate change)
    pub replace: bool,
    /// Fraction at which a forced boundary cut the block short
    pub interrupted_at: Option<f32>,
    /// False when only some voices run, mid-block
    pub full_boundary: bool,
    /// Block position the run starts at; zero on a boundary
    pub start: usize,
}

impl Plan {
    /// A single voice resolving a gate edge at `start`
    pub fn edge(channel: usize, start: usize) -> Self {
        Self {
            channels: channel..channel + 1,
            respawn: 0..0,
            replace: false,
            interrupted_at: None,
            full_boundary: false,
            start,
        }
    }

    #[inline]
    pub fn respawns(&self, channel: usize) -> bool {
        self.respawn.contains(&channel)
    }

    /// Samples left until the next boundary
    #[inline]
    pub fn samples(&self) -> usize {
        BLOCK_SIZE - self.start.min(BLOCK_SIZE - 1)
    }

    /// Samples of the cut-short block that had played at a forced boundary
    pub fn interrupted_position(&self) -> Option<usize> {
        self.interrupted_at
            .map(|f| ((f * BLOCK_SIZE as f32).round() as usize).min(BLOCK_SIZE))
    }

    /// Block fraction at which the run's segments start
    #[inline]
    pub fn segment_start(&self) -> f32 {
        self.start as f32 / BLOCK_SIZE as f32
    }
}

/// Channel tracking and respawn bookkeeping for one module
#[derive(Debug, Clone, Default)]
pub struct LifecycleController {
    channels: ChannelTracker,
    grown: Option<Range<usize>>,
    respawn_all: bool,
}

impl LifecycleController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_channels(&self) -> usize {
        self.channels.active()
    }

    /// Track the module's requested voice count for this sample
    ///
    /// Returns the active channel count.
    pub fn track_channels(&mut self, requested: usize) -> usize {
        if let Some(range) = self.channels.update(requested) {
            tracing::debug!(from = range.start, to = range.end, "activating voices");
            self.grown = Some(match self.grown.take() {
                Some(prev) => prev.start.min(range.start)..range.end,
                None => range,
            });
        }
        self.channels.active()
    }

    /// Replace every active voice at the next boundary
    pub fn on_sample_rate_change(&mut self, scheduler: &mut BlockScheduler) {
        tracing::debug!(voices = self.channels.active(), "sample rate changed, respawning");
        self.respawn_all = true;
        scheduler.force_boundary();
    }

    /// Decide what runs this sample, given the scheduler's answer and its
    /// position after it
    pub fn plan(&mut self, boundary: Option<Boundary>, position: usize) -> Option<Plan> {
        let active = self.channels.active();
        let grown = self.grown.take().map(|r| r.start.min(active)..r.end.min(active));
        match boundary {
            Some(b) => {
                let replace = std::mem::take(&mut self.respawn_all);
                let respawn = if replace {
                    0..active
                } else {
                    grown.unwrap_or(0..0)
                };
                Some(Plan {
                    channels: 0..active,
                    respawn,
                    replace,
                    interrupted_at: b.interrupted_at,
                    full_boundary: true,
                    start: 0,
                })
            }
            None => grown.filter(|r| !r.is_empty()).map(|r| Plan {
                channels: r.clone(),
                respawn: r,
                replace: false,
                interrupted_at: None,
                full_boundary: false,
                start: position,
            }),
        }
    }

    /// Forget channel state; every voice respawns on the next sample
    pub fn reset(&mut self) {
        self.channels.reset();
        self.grown = None;
        self.respawn_all = false;
    }
}

/// Resolve a voice's lifecycle at a boundary and schedule the transition
///
/// Consumes the voice's latched gate events. A voice receives at most one
/// attack per boundary.
pub fn resolve_voice(slot: &mut VoiceSlot, respawn: bool, replace: bool) -> Transition {
    let events = slot.gate.take();
    let connected = slot.gate.is_connected();
    let high = slot.gate.is_high();
    let mut t = Transition {
        replace,
        respawn,
        ..Default::default()
    };

    if respawn {
        if !connected {
            t.attack = true;
            slot.set_state(VoiceState::FreeRun);
        } else if high {
            t.attack = true;
            slot.set_state(VoiceState::Gated);
        } else {
            slot.set_state(VoiceState::Uninitialized);
        }
        t.prime = t.attack;
    } else if events.topology_changed {
        // A new cable must not inherit free-run state, and an unplugged one
        // attacks once into free running
        t.attack = true;
        if !connected {
            slot.set_state(VoiceState::FreeRun);
        } else if high {
            slot.set_state(VoiceState::Gated);
        } else {
            t.release = true;
            slot.set_state(VoiceState::Released);
        }
    } else if connected {
        if events.rising {
            t.attack = true;
            t.prime = slot.state() == VoiceState::Uninitialized;
            slot.set_state(VoiceState::Gated);
        }
        if events.falling && !high && slot.state() == VoiceState::Gated {
            t.release = true;
            slot.set_state(VoiceState::Released);
        }
    }

    if !t.is_empty() {
        tracing::trace!(voice = slot.index(), ?t, state = ?slot.state(), "voice transition");
        slot.schedule(t);
    }
    t
}

/// Resolve a gate edge latched between boundaries
///
/// Returns the single-voice plan to run now at `position`, or `None` when the
/// voice has no events or they change nothing.
pub fn resolve_edge(slot: &mut VoiceSlot, position: usize) -> Option<Plan> {
    if !slot.gate.has_events() {
        return None;
    }
    let t = resolve_voice(slot, false, false);
    (!t.is_empty()).then(|| Plan::edge(slot.index(), position))
}

/// Resolve every voice a plan covers
pub fn resolve_plan(slots: &mut [VoiceSlot], plan: &Plan) {
    for c in plan.channels.clone() {
        if let Some(slot) = slots.get_mut(c) {
            resolve_voice(slot, plan.respawns(c), plan.replace);
        }
    }
}

/// Respawn a voice whose unison count changed since its last boundary
pub fn check_unison(slot: &mut VoiceSlot, unison: i32) -> bool {
    if slot.note_unison(unison) {
        tracing::debug!(voice = slot.index(), unison, "unison changed, respawning voice");
        resolve_voice(slot, true, false);
        true
    } else {
        false
    }
}

/// Observe the gate of the first `active` voices for this sample
///
/// `gate` returns the connection flag and voltage for a channel. Events are
/// only latched here; a boundary or [`resolve_edge`] consumes them.
pub fn observe_gates(slots: &mut [VoiceSlot], active: usize, gate: impl Fn(usize) -> (bool, f32)) {
    for (c, slot) in slots.iter_mut().enumerate().take(active) {
        let (connected, voltage) = gate(c);
        slot.gate.observe(connected, voltage);
    }
}
