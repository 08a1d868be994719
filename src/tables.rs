//! Process-wide Shared Tables
//!
//! Sine and pitch lookup tables plus the wavetable catalog are built once per
//! process, the first time any module is constructed. Construction is
//! serialized behind [`shared_tables`]; after that the tables are immutable
//! and read freely from the audio path. They are never torn down.

use libm::{exp2f, sinf};
use once_cell::sync::Lazy;
use std::f32::consts::TAU;

/// Entries in the sine table (one guard point is appended)
pub const SINE_TABLE_SIZE: usize = 4096;

/// Samples per wavetable frame
pub const WAVETABLE_FRAME_SIZE: usize = 256;

/// Frames per built-in wavetable
pub const WAVETABLE_FRAMES: usize = 16;

/// Pitch table covers MIDI notes -256..256
const PITCH_TABLE_OFFSET: usize = 256;
const PITCH_TABLE_SIZE: usize = 512;

/// Frequency of MIDI note 0
const NOTE_ZERO_HZ: f32 = 8.175_799;

/// A named wavetable made of equally sized single-cycle frames
#[derive(Debug, Clone)]
pub struct Wavetable {
    pub name: String,
    frames: Vec<Vec<f32>>,
}

impl Wavetable {
    fn from_fn(name: &str, f: impl Fn(usize, f32) -> f32) -> Self {
        let frames = (0..WAVETABLE_FRAMES)
            .map(|frame| {
                (0..WAVETABLE_FRAME_SIZE)
                    .map(|i| f(frame, i as f32 / WAVETABLE_FRAME_SIZE as f32))
                    .collect()
            })
            .collect();
        Self {
            name: name.to_string(),
            frames,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Read at `phase` (0..1) and fractional frame position `morph` (0..1)
    pub fn read(&self, phase: f32, morph: f32) -> f32 {
        let last = self.frames.len() - 1;
        let pos = morph.clamp(0.0, 1.0) * last as f32;
        let f0 = (pos as usize).min(last);
        let f1 = (f0 + 1).min(last);
        let ff = pos - f0 as f32;

        let x = phase.rem_euclid(1.0) * WAVETABLE_FRAME_SIZE as f32;
        let i0 = (x as usize) % WAVETABLE_FRAME_SIZE;
        let i1 = (i0 + 1) % WAVETABLE_FRAME_SIZE;
        let xf = x - x.floor();

        let a = self.frames[f0][i0] + (self.frames[f0][i1] - self.frames[f0][i0]) * xf;
        let b = self.frames[f1][i0] + (self.frames[f1][i1] - self.frames[f1][i0]) * xf;
        a + (b - a) * ff
    }
}

/// Lookup tables shared by every module in the process
pub struct SharedTables {
    sine: Vec<f32>,
    note_to_pitch: Vec<f32>,
    wavetables: Vec<Wavetable>,
}

impl SharedTables {
    fn build() -> Self {
        let sine = (0..=SINE_TABLE_SIZE)
            .map(|i| sinf(TAU * i as f32 / SINE_TABLE_SIZE as f32))
            .collect();

        let note_to_pitch = (0..PITCH_TABLE_SIZE)
            .map(|i| exp2f((i as f32 - PITCH_TABLE_OFFSET as f32) / 12.0))
            .collect();

        let wavetables = builtin_wavetables();

        tracing::debug!(
            wavetables = wavetables.len(),
            "initialized shared engine tables"
        );

        Self {
            sine,
            note_to_pitch,
            wavetables,
        }
    }

    /// Table sine of a phase in cycles
    #[inline]
    pub fn sine(&self, phase: f32) -> f32 {
        let x = phase.rem_euclid(1.0) * SINE_TABLE_SIZE as f32;
        let i = (x as usize).min(SINE_TABLE_SIZE - 1);
        let f = x - i as f32;
        self.sine[i] + (self.sine[i + 1] - self.sine[i]) * f
    }

    /// Pitch ratio 2^(note/12), interpolated between table entries
    #[inline]
    pub fn note_to_pitch(&self, note: f32) -> f32 {
        let x = (note + PITCH_TABLE_OFFSET as f32).clamp(0.0, (PITCH_TABLE_SIZE - 2) as f32);
        let i = x as usize;
        let f = x - i as f32;
        self.note_to_pitch[i] + (self.note_to_pitch[i + 1] - self.note_to_pitch[i]) * f
    }

    /// Frequency in Hz of a (fractional) MIDI note
    #[inline]
    pub fn note_to_frequency(&self, note: f32) -> f32 {
        NOTE_ZERO_HZ * self.note_to_pitch(note)
    }

    pub fn wavetable_count(&self) -> usize {
        self.wavetables.len()
    }

    pub fn wavetable(&self, index: usize) -> Option<&Wavetable> {
        self.wavetables.get(index)
    }

    pub fn wavetable_index(&self, name: &str) -> Option<usize> {
        self.wavetables
            .iter()
            .position(|wt| wt.name.eq_ignore_ascii_case(name))
    }
}

fn builtin_wavetables() -> Vec<Wavetable> {
    vec![
        Wavetable::from_fn("Sine", |_, p| sinf(TAU * p)),
        Wavetable::from_fn("Triangle", |_, p| 1.0 - 4.0 * (p - 0.5).abs()),
        Wavetable::from_fn("Sawtooth", |_, p| 2.0 * p - 1.0),
        Wavetable::from_fn("Square", |_, p| if p < 0.5 { 1.0 } else { -1.0 }),
        Wavetable::from_fn("Harmonic Sweep", |frame, p| {
            let harmonics = frame + 1;
            let norm: f32 = (1..=harmonics).map(|h| 1.0 / h as f32).sum();
            (1..=harmonics)
                .map(|h| sinf(TAU * p * h as f32) / h as f32)
                .sum::<f32>()
                / norm
        }),
        Wavetable::from_fn("PWM Sweep", |frame, p| {
            let width = 0.5 - 0.45 * frame as f32 / (WAVETABLE_FRAMES - 1) as f32;
            if p < width {
                1.0
            } else {
                -1.0
            }
        }),
    ]
}

static SHARED: Lazy<SharedTables> = Lazy::new(SharedTables::build);

/// Get the process-wide tables, building them on first use
///
/// Concurrent first calls block until the single build completes.
pub fn shared_tables() -> &'static SharedTables {
    &SHARED
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_shared_tables_are_shared() {
        let a = shared_tables() as *const SharedTables;
        let b = shared_tables() as *const SharedTables;
        assert_eq!(a, b);
    }

    #[test]
    fn test_concurrent_first_use() {
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| shared_tables() as *const SharedTables as usize))
            .collect();
        let ptrs: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ptrs.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_sine_lookup() {
        let t = shared_tables();
        assert_abs_diff_eq!(t.sine(0.0), 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(t.sine(0.25), 1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(t.sine(0.75), -1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(t.sine(1.25), 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_note_to_frequency() {
        let t = shared_tables();
        assert_abs_diff_eq!(t.note_to_frequency(69.0), 440.0, epsilon = 0.05);
        assert_abs_diff_eq!(t.note_to_frequency(81.0), 880.0, epsilon = 0.1);
        assert_abs_diff_eq!(t.note_to_pitch(12.0), 2.0, epsilon = 1e-4);
    }

    #[test]
    fn test_wavetable_catalog() {
        let t = shared_tables();
        assert!(t.wavetable_count() >= 4);
        assert_eq!(t.wavetable_index("sawtooth"), Some(2));
        assert!(t.wavetable_index("Nope").is_none());

        let saw = t.wavetable(2).unwrap();
        assert_eq!(saw.frame_count(), WAVETABLE_FRAMES);
        assert_abs_diff_eq!(saw.read(0.5, 0.0), 0.0, epsilon = 1e-3);
    }

    #[test]
    fn test_wavetable_morph_blends_frames() {
        let t = shared_tables();
        let sweep = t.wavetable(t.wavetable_index("PWM Sweep").unwrap()).unwrap();
        // At 40% phase the first frame is high and the last frame is low
        assert!(sweep.read(0.4, 0.0) > 0.9);
        assert!(sweep.read(0.4, 1.0) < -0.9);
    }
}
