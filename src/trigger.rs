//! Gate comparator with hysteresis

/// Voltage a gate must rise above to read high
pub const GATE_HIGH_THRESHOLD: f32 = 1.0;

/// Voltage a gate must fall below to read low
pub const GATE_LOW_THRESHOLD: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchmittState {
    Low,
    High,
    Uninitialized,
}

/// Transition reported by [`SchmittTrigger::process_edges`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    None,
    Rising,
    Falling,
}

/// Schmitt trigger with hysteresis
///
/// The first sample only establishes the state; it never reports an edge.
#[derive(Debug, Clone, Copy)]
pub struct SchmittTrigger {
    state: SchmittState,
    low_threshold: f32,
    high_threshold: f32,
}

impl SchmittTrigger {
    pub fn new(low_threshold: f32, high_threshold: f32) -> Self {
        Self {
            state: SchmittState::Uninitialized,
            low_threshold,
            high_threshold,
        }
    }

    /// Process a sample, returning the edge it caused
    pub fn process_edges(&mut self, input: f32) -> Edge {
        match self.state {
            SchmittState::Uninitialized => {
                self.state = if input >= self.high_threshold {
                    SchmittState::High
                } else {
                    SchmittState::Low
                };
                Edge::None
            }
            SchmittState::High => {
                if input < self.low_threshold {
                    self.state = SchmittState::Low;
                    Edge::Falling
                } else {
                    Edge::None
                }
            }
            SchmittState::Low => {
                if input >= self.high_threshold {
                    self.state = SchmittState::High;
                    Edge::Rising
                } else {
                    Edge::None
                }
            }
        }
    }

    /// Process a sample; true on a low-to-high transition
    pub fn process(&mut self, input: f32) -> bool {
        self.process_edges(input) == Edge::Rising
    }

    pub fn state(&self) -> SchmittState {
        self.state
    }

    pub fn is_high(&self) -> bool {
        self.state == SchmittState::High
    }

    /// Force a known state without reporting an edge
    pub fn set_state(&mut self, state: SchmittState) {
        self.state = state;
    }

    pub fn reset(&mut self) {
        self.state = SchmittState::Uninitialized;
    }
}

impl Default for SchmittTrigger {
    fn default() -> Self {
        Self::new(GATE_LOW_THRESHOLD, GATE_HIGH_THRESHOLD)
    }
}
