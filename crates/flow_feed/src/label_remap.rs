use crate::error::FeedError;
use crate::feed::LabelRemapConfig;
use crate::tensor::Dtype;
use anyhow::{bail, Result};
use ndarray::{Array, ArrayBase, Data, DataMut, Dimension};

/// Constant-time integer label remapping.
///
/// Every element `x` of the input is truncated toward zero and replaced by
/// `mapping[x]`. The table is immutable after construction and can be shared
/// between threads behind an `Arc`.
///
/// ```ignore
/// let remap = LabelRemap::new(vec![2, 0, 1])?;
/// let out = remap.apply(&array![0.0f32, 1.0, 2.0])?;   // [2, 0, 1]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRemap {
    mapping: Vec<i32>,
}

impl LabelRemap {
    pub fn new(mapping: Vec<i32>) -> Result<Self> {
        if mapping.is_empty() {
            bail!(FeedError::Config("label remap table is empty".into()));
        }
        Ok(Self { mapping })
    }

    pub fn from_config(config: &LabelRemapConfig) -> Result<Self> {
        Self::new(config.new_label.clone())
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    pub fn mapping(&self) -> &[i32] {
        &self.mapping
    }

    /// Looks up a single raw label.
    pub fn get(&self, raw: i64) -> Option<i32> {
        usize::try_from(raw)
            .ok()
            .and_then(|i| self.mapping.get(i).copied())
    }

    /// Returns a remapped copy of `input` with the same shape.
    pub fn apply<T, S, D>(&self, input: &ArrayBase<S, D>) -> Result<Array<T, D>>
    where
        T: Dtype,
        S: Data<Elem = T>,
        D: Dimension,
    {
        let mut output = input.to_owned();
        self.apply_in_place(&mut output)?;
        Ok(output)
    }

    /// Remaps `data` in place. Nothing is written unless every element is valid.
    pub fn apply_in_place<T, S, D>(&self, data: &mut ArrayBase<S, D>) -> Result<()>
    where
        T: Dtype,
        S: DataMut<Elem = T>,
        D: Dimension,
    {
        let mut indices = Vec::with_capacity(data.len());
        for (position, &value) in data.iter().enumerate() {
            indices.push(self.index_of(position, value)?);
        }
        for (slot, index) in data.iter_mut().zip(indices) {
            *slot = T::from_f64_lossy(self.mapping[index] as f64);
        }
        Ok(())
    }

    fn index_of<T: Dtype>(&self, position: usize, value: T) -> Result<usize> {
        let raw = value.as_f64().trunc();
        if raw.is_finite() && raw >= 0.0 && raw < self.mapping.len() as f64 {
            return Ok(raw as usize);
        }
        bail!(FeedError::IndexOutOfRange {
            position,
            value: value.to_string(),
            len: self.mapping.len(),
        })
    }
}
