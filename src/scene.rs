//! Engine Parameter Storage and Scene Staging
//!
//! Processing units never read live parameter objects. Before every process
//! quantum the module writes the voice's modulated values into
//! [`ParamStorage`] and copies them into a [`SceneData`] snapshot, which is
//! the only view a unit sees for that quantum.
//!
//! A parameter can be deactivated, which switches off the stage it controls
//! (an effect's low cut, say) without losing its value.

use core::ops::Range;

/// How a normalized value maps to the value a unit reads
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueKind {
    Float { min: f32, max: f32 },
    Int { min: i32, max: i32 },
    Bool,
}

/// Static description of one engine parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamLayout {
    pub name: &'static str,
    pub kind: ValueKind,
    /// Default in normalized (0..1) units
    pub default_f01: f32,
}

impl ParamLayout {
    pub const fn float(name: &'static str, min: f32, max: f32, default_f01: f32) -> Self {
        Self {
            name,
            kind: ValueKind::Float { min, max },
            default_f01,
        }
    }

    pub const fn int(name: &'static str, min: i32, max: i32, default_f01: f32) -> Self {
        Self {
            name,
            kind: ValueKind::Int { min, max },
            default_f01,
        }
    }

    pub const fn boolean(name: &'static str, default: bool) -> Self {
        Self {
            name,
            kind: ValueKind::Bool,
            default_f01: if default { 1.0 } else { 0.0 },
        }
    }
}

/// A live engine parameter holding a normalized value
#[derive(Debug, Clone)]
pub struct Parameter {
    layout: ParamLayout,
    value_f01: f32,
    deactivated: bool,
}

impl Parameter {
    pub fn new(layout: ParamLayout) -> Self {
        Self {
            layout,
            value_f01: layout.default_f01,
            deactivated: false,
        }
    }

    pub fn is_deactivated(&self) -> bool {
        self.deactivated
    }

    pub fn set_deactivated(&mut self, deactivated: bool) {
        self.deactivated = deactivated;
    }

    pub fn name(&self) -> &'static str {
        self.layout.name
    }

    pub fn kind(&self) -> ValueKind {
        self.layout.kind
    }

    pub fn value_f01(&self) -> f32 {
        self.value_f01
    }

    pub fn default_value_f01(&self) -> f32 {
        self.layout.default_f01
    }

    pub fn set_value_f01(&mut self, value: f32) {
        self.value_f01 = value.clamp(0.0, 1.0);
    }

    /// Value mapped into the parameter's range
    pub fn value_f(&self) -> f32 {
        match self.layout.kind {
            ValueKind::Float { min, max } => min + self.value_f01 * (max - min),
            ValueKind::Int { .. } | ValueKind::Bool => self.value_i() as f32,
        }
    }

    /// Integer value; float parameters truncate toward zero
    pub fn value_i(&self) -> i32 {
        match self.layout.kind {
            ValueKind::Int { min, max } => {
                let span = (max - min) as f32;
                min + (self.value_f01 * span).round() as i32
            }
            ValueKind::Bool => i32::from(self.value_f01 > 0.5),
            ValueKind::Float { .. } => self.value_f() as i32,
        }
    }
}

/// The live parameter objects of one module
#[derive(Debug, Clone, Default)]
pub struct ParamStorage {
    params: Vec<Parameter>,
}

impl ParamStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define (or redefine) the parameter at `index`
    ///
    /// Redefining keeps the current normalized value.
    pub fn define(&mut self, index: usize, layout: ParamLayout) {
        match self.params.get_mut(index) {
            Some(p) => p.layout = layout,
            None => {
                while self.params.len() < index {
                    self.params
                        .push(Parameter::new(ParamLayout::float("unused", 0.0, 1.0, 0.0)));
                }
                self.params.push(Parameter::new(layout));
            }
        }
    }

    pub fn reset_to_default(&mut self, index: usize) {
        if let Some(p) = self.params.get_mut(index) {
            p.value_f01 = p.layout.default_f01;
        }
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Parameter> {
        self.params.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Parameter> {
        self.params.get_mut(index)
    }

    /// Set a normalized value; out-of-range indices are ignored
    #[inline]
    pub fn set_value_f01(&mut self, index: usize, value: f32) {
        if let Some(p) = self.params.get_mut(index) {
            p.set_value_f01(value);
        }
    }

    pub fn set_deactivated(&mut self, index: usize, deactivated: bool) {
        if let Some(p) = self.params.get_mut(index) {
            p.set_deactivated(deactivated);
        }
    }
}

/// Snapshot of mapped parameter values read by processing units
#[derive(Debug, Clone, Default)]
pub struct SceneData {
    f: Vec<f32>,
    i: Vec<i32>,
    deactivated: Vec<bool>,
}

impl SceneData {
    /// Preallocate a snapshot for `len` parameters
    pub fn with_len(len: usize) -> Self {
        Self {
            f: vec![0.0; len],
            i: vec![0; len],
            deactivated: vec![false; len],
        }
    }

    /// Copy the mapped values of `range` from storage into the snapshot
    pub fn copy_subset(&mut self, storage: &ParamStorage, range: Range<usize>) {
        let end = range.end.min(storage.len()).min(self.f.len());
        for idx in range.start..end {
            if let Some(p) = storage.get(idx) {
                self.f[idx] = p.value_f();
                self.i[idx] = p.value_i();
                self.deactivated[idx] = p.is_deactivated();
            }
        }
    }

    /// Copy every parameter
    pub fn copy_all(&mut self, storage: &ParamStorage) {
        self.copy_subset(storage, 0..storage.len());
    }

    #[inline]
    pub fn f(&self, index: usize) -> f32 {
        self.f.get(index).copied().unwrap_or(0.0)
    }

    #[inline]
    pub fn i(&self, index: usize) -> i32 {
        self.i.get(index).copied().unwrap_or(0)
    }

    #[inline]
    pub fn b(&self, index: usize) -> bool {
        self.i(index) != 0
    }

    #[inline]
    pub fn is_deactivated(&self, index: usize) -> bool {
        self.deactivated.get(index).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.f.len()
    }

    pub fn is_empty(&self) -> bool {
        self.f.is_empty()
    }
}
