//! Block Scheduler
//!
//! Decides, per audio sample, whether a control-block boundary has been
//! reached. Boundaries happen every [`BLOCK_SIZE`] samples, or immediately when
//! forced by a sample-rate change. The position is preset to `BLOCK_SIZE` so
//! the very first sample is always a boundary.
//!
//! Gate edges never move the grid. A voice whose gate crosses the threshold
//! mid-block runs a partial quantum up to the next boundary on its own, see
//! [`crate::lifecycle::resolve_edge`].

use crate::BLOCK_SIZE;

/// A control-block boundary reported by [`BlockScheduler::begin_sample`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Boundary {
    /// Fraction of the previous block that had played when a forced boundary
    /// cut it short; `None` for a natural boundary
    pub interrupted_at: Option<f32>,
}

impl Boundary {
    pub fn is_forced(&self) -> bool {
        self.interrupted_at.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct BlockScheduler {
    position: usize,
    forced: bool,
}

impl BlockScheduler {
    pub fn new() -> Self {
        Self {
            position: BLOCK_SIZE,
            forced: false,
        }
    }

    /// Make the next `begin_sample` a boundary
    pub fn force_boundary(&mut self) {
        self.forced = true;
    }

    /// Start a sample; returns the boundary if one happens here
    pub fn begin_sample(&mut self) -> Option<Boundary> {
        if self.position >= BLOCK_SIZE {
            self.position = 0;
            self.forced = false;
            return Some(Boundary {
                interrupted_at: None,
            });
        }
        if self.forced {
            let interrupted_at = Some(self.fraction());
            self.position = 0;
            self.forced = false;
            return Some(Boundary { interrupted_at });
        }
        None
    }

    /// Samples since the last boundary
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Interpolation fraction of the current sample, in `0..1`
    #[inline]
    pub fn fraction(&self) -> f32 {
        self.position as f32 / BLOCK_SIZE as f32
    }

    /// Finish the current sample
    #[inline]
    pub fn advance(&mut self) {
        self.position += 1;
    }

    /// Return to the power-on state
    pub fn reset(&mut self) {
        self.position = BLOCK_SIZE;
        self.forced = false;
    }
}

impl Default for BlockScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boundaries(s: &mut BlockScheduler, samples: usize) -> Vec<usize> {
        let mut hits = Vec::new();
        for i in 0..samples {
            if s.begin_sample().is_some() {
                hits.push(i);
            }
            s.advance();
        }
        hits
    }

    #[test]
    fn test_first_sample_is_boundary() {
        let mut s = BlockScheduler::new();
        let b = s.begin_sample().unwrap();
        assert!(!b.is_forced());
        assert_eq!(s.position(), 0);
    }

    #[test]
    fn test_boundary_every_block() {
        let mut s = BlockScheduler::new();
        assert_eq!(
            boundaries(&mut s, BLOCK_SIZE * 3),
            vec![0, BLOCK_SIZE, 2 * BLOCK_SIZE]
        );
    }

    #[test]
    fn test_forced_boundary_reports_fraction() {
        let mut s = BlockScheduler::new();
        boundaries(&mut s, 8);
        s.force_boundary();
        let b = s.begin_sample().unwrap();
        assert_eq!(b.interrupted_at, Some(8.0 / BLOCK_SIZE as f32));
        assert_eq!(s.fraction(), 0.0);
        s.advance();
        // The next natural boundary is a full block after the forced one
        assert_eq!(boundaries(&mut s, BLOCK_SIZE)[0], BLOCK_SIZE - 1);
    }

    #[test]
    fn test_force_at_natural_boundary_is_natural() {
        let mut s = BlockScheduler::new();
        boundaries(&mut s, BLOCK_SIZE);
        s.force_boundary();
        assert_eq!(s.begin_sample().unwrap().interrupted_at, None);
    }

    #[test]
    fn test_fraction_is_monotonic_within_block() {
        let mut s = BlockScheduler::new();
        s.begin_sample();
        let mut last = -1.0;
        for _ in 0..BLOCK_SIZE {
            assert!(s.fraction() > last);
            last = s.fraction();
            s.advance();
            s.begin_sample();
        }
    }
}
