//! Interpolation / Output Stage
//!
//! Control-rate units produce one value per lane per block. Output is draped
//! between two generations of those values:
//!
//! ```text
//! out(p) = previous * (1 - p) + current * p        p = position / BLOCK_SIZE
//! ```
//!
//! At a natural boundary `previous` becomes the old `current`. At a forced
//! boundary `previous` becomes the value that was playing when the block was
//! cut short, so output never jumps at a boundary.
//!
//! A voice whose gate edge splits a block starts a new segment at the edge:
//! `previous` takes the value playing there and the blend runs from the edge
//! to the end of the block, while every other voice stays on its segment.
//!
//! ```text
//! out(p) = previous * (1 - t) + current * t     t = (p - start) / (1 - start)
//! ```

use crate::{MAX_POLY, SURGE_TO_RACK_CV_MUL, SURGE_TO_RACK_OSC_MUL};

/// Two generations of per-channel values for `LANES` output lanes
#[derive(Debug, Clone)]
pub struct Generations<const LANES: usize> {
    previous: [[f32; MAX_POLY]; LANES],
    current: [[f32; MAX_POLY]; LANES],
    /// Block fraction at which each segment started
    start: [[f32; MAX_POLY]; LANES],
}

impl<const LANES: usize> Generations<LANES> {
    pub fn new() -> Self {
        Self {
            previous: [[0.0; MAX_POLY]; LANES],
            current: [[0.0; MAX_POLY]; LANES],
            start: [[0.0; MAX_POLY]; LANES],
        }
    }

    /// Swap generations of one lane and channel at a boundary
    ///
    /// `interrupted_at` is the fraction reached by the block being replaced,
    /// or `None` when it ran to completion.
    pub fn advance_lane(&mut self, lane: usize, channel: usize, interrupted_at: Option<f32>) {
        if lane >= LANES || channel >= MAX_POLY {
            return;
        }
        self.previous[lane][channel] = match interrupted_at {
            Some(frac) => self.interpolate(lane, channel, frac),
            None => self.current[lane][channel],
        };
        self.start[lane][channel] = 0.0;
    }

    /// Start a new segment at fraction `at` of the running block
    ///
    /// The segment begins from the value playing at `at` and reaches the next
    /// `current` at the end of the block.
    pub fn split_lane(&mut self, lane: usize, channel: usize, at: f32) {
        if lane >= LANES || channel >= MAX_POLY {
            return;
        }
        let playing = self.interpolate(lane, channel, at);
        self.begin_segment(lane, channel, playing, at);
    }

    /// Start a segment at fraction `at` from an explicit value
    pub fn begin_segment(&mut self, lane: usize, channel: usize, from: f32, at: f32) {
        if lane < LANES && channel < MAX_POLY {
            self.previous[lane][channel] = from;
            self.start[lane][channel] = at.clamp(0.0, 1.0);
        }
    }

    /// Swap generations of every lane of one channel
    pub fn advance_channel(&mut self, channel: usize, interrupted_at: Option<f32>) {
        for lane in 0..LANES {
            self.advance_lane(lane, channel, interrupted_at);
        }
    }

    /// Swap generations for channels `0..channels`
    pub fn advance(&mut self, channels: usize, interrupted_at: Option<f32>) {
        for c in 0..channels.min(MAX_POLY) {
            self.advance_channel(c, interrupted_at);
        }
    }

    /// Forget both generations of one lane and channel
    pub fn clear_lane(&mut self, lane: usize, channel: usize) {
        if lane < LANES && channel < MAX_POLY {
            self.previous[lane][channel] = 0.0;
            self.current[lane][channel] = 0.0;
            self.start[lane][channel] = 0.0;
        }
    }

    /// Forget both generations of a channel
    pub fn clear_channel(&mut self, channel: usize) {
        for lane in 0..LANES {
            self.clear_lane(lane, channel);
        }
    }

    #[inline]
    pub fn set_current(&mut self, lane: usize, channel: usize, value: f32) {
        if lane < LANES && channel < MAX_POLY {
            self.current[lane][channel] = value;
        }
    }

    #[inline]
    pub fn current(&self, lane: usize, channel: usize) -> f32 {
        self.current
            .get(lane)
            .and_then(|l| l.get(channel))
            .copied()
            .unwrap_or(0.0)
    }

    #[inline]
    pub fn previous(&self, lane: usize, channel: usize) -> f32 {
        self.previous
            .get(lane)
            .and_then(|l| l.get(channel))
            .copied()
            .unwrap_or(0.0)
    }

    /// Linear blend at fraction `frac` of the block
    #[inline]
    pub fn interpolate(&self, lane: usize, channel: usize, frac: f32) -> f32 {
        let prev = self.previous(lane, channel);
        let cur = self.current(lane, channel);
        let start = self
            .start
            .get(lane)
            .and_then(|l| l.get(channel))
            .copied()
            .unwrap_or(0.0);
        let t = if start >= 1.0 {
            1.0
        } else {
            ((frac - start) / (1.0 - start)).clamp(0.0, 1.0)
        };
        prev * (1.0 - t) + cur * t
    }
}

impl<const LANES: usize> Default for Generations<LANES> {
    fn default() -> Self {
        Self::new()
    }
}

/// Voltage scaling from engine units to host volts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputScale {
    /// ±1 engine audio to ±5 V
    Audio,
    /// ±1 engine control to ±10 V
    Control,
}

impl OutputScale {
    #[inline]
    pub fn factor(self) -> f32 {
        match self {
            OutputScale::Audio => SURGE_TO_RACK_OSC_MUL,
            OutputScale::Control => SURGE_TO_RACK_CV_MUL,
        }
    }

    #[inline]
    pub fn apply(self, value: f32) -> f32 {
        value * self.factor()
    }
}

/// Average of a stereo pair, for a mono output carrying both lanes
#[inline]
pub fn mono_combine(left: f32, right: f32) -> f32 {
    0.5 * (left + right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BLOCK_SIZE;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_position_zero_is_previous() {
        let mut g = Generations::<1>::new();
        g.set_current(0, 0, 2.0);
        g.advance(1, None);
        g.set_current(0, 0, 6.0);
        assert_eq!(g.interpolate(0, 0, 0.0), 2.0);
    }

    #[test]
    fn test_continuity_across_blocks() {
        let mut g = Generations::<3>::new();
        let mut outputs = Vec::new();
        for block in 0..5 {
            g.advance(4, None);
            for lane in 0..3 {
                for c in 0..4 {
                    assert_eq!(g.previous(lane, c), g.current(lane, c));
                    g.set_current(lane, c, (block * 10 + lane + c) as f32);
                }
            }
            outputs.push(g.previous(1, 2));
        }
        assert_eq!(outputs, vec![0.0, 3.0, 13.0, 23.0, 33.0]);
    }

    #[test]
    fn test_monotonic_toward_current() {
        let mut g = Generations::<1>::new();
        g.set_current(0, 0, 1.0);
        let mut last = g.interpolate(0, 0, 0.0);
        for p in 1..BLOCK_SIZE {
            let v = g.interpolate(0, 0, p as f32 / BLOCK_SIZE as f32);
            assert!(v > last);
            last = v;
        }
        assert_abs_diff_eq!(last, 1.0, epsilon = 1.0 / BLOCK_SIZE as f32 + 1e-6);
    }

    #[test]
    fn test_forced_advance_keeps_output_continuous() {
        let mut g = Generations::<1>::new();
        g.set_current(0, 0, 4.0);
        let playing = g.interpolate(0, 0, 0.25);
        g.advance_channel(0, Some(0.25));
        g.set_current(0, 0, -3.0);
        assert_eq!(g.interpolate(0, 0, 0.0), playing);
    }

    #[test]
    fn test_channels_advance_independently() {
        let mut g = Generations::<1>::new();
        g.set_current(0, 0, 1.0);
        g.set_current(0, 1, 2.0);
        g.advance_channel(1, None);
        assert_eq!(g.previous(0, 0), 0.0);
        assert_eq!(g.previous(0, 1), 2.0);
        g.clear_channel(1);
        assert_eq!(g.current(0, 1), 0.0);

        let mut g = Generations::<2>::new();
        g.set_current(0, 0, 1.0);
        g.set_current(1, 0, 2.0);
        g.advance_lane(1, 0, None);
        assert_eq!(g.previous(0, 0), 0.0);
        assert_eq!(g.previous(1, 0), 2.0);
    }

    #[test]
    fn test_split_segment_starts_at_edge() {
        let mut g = Generations::<1>::new();
        g.set_current(0, 0, 4.0);
        g.set_current(0, 1, 4.0);
        let playing = g.interpolate(0, 0, 0.5);
        g.split_lane(0, 0, 0.5);
        g.set_current(0, 0, 8.0);

        assert_eq!(g.interpolate(0, 0, 0.5), playing);
        assert_abs_diff_eq!(g.interpolate(0, 0, 0.75), 5.0, epsilon = 1e-6);
        assert_eq!(g.interpolate(0, 0, 1.0), 8.0);
        // The neighbour keeps its own segment
        assert_eq!(g.interpolate(0, 1, 0.5), 2.0);

        // The next natural boundary starts a full-block segment again
        g.advance_lane(0, 0, None);
        g.set_current(0, 0, 0.0);
        assert_abs_diff_eq!(g.interpolate(0, 0, 0.5), 4.0, epsilon = 1e-6);
    }

    #[test]
    fn test_output_scaling() {
        assert_eq!(OutputScale::Audio.apply(1.0), 5.0);
        assert_eq!(OutputScale::Control.apply(-0.5), -5.0);
        assert_eq!(mono_combine(1.0, 0.0), 0.5);
    }
}
