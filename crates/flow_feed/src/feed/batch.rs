use crate::tensor::Dtype;
use ndarray::{Array1, Array4, ArrayView4, ArrayViewMut3, Axis};

/// One batch buffer: a (batch, channels, height, width) data tensor and one label
/// per item.
///
/// The prefetch worker allocates two of these once and refills them in place.
/// `cycle` counts the fills of the pipeline, starting at 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<T: Dtype> {
    pub(crate) data: Array4<T>,
    pub(crate) labels: Array1<T>,
    pub(crate) cycle: u64,
}

impl<T: Dtype> Batch<T> {
    pub fn zeros(dims: (usize, usize, usize, usize)) -> Self {
        Self {
            data: Array4::zeros(dims),
            labels: Array1::zeros(dims.0),
            cycle: 0,
        }
    }

    pub fn data(&self) -> ArrayView4<'_, T> {
        self.data.view()
    }

    pub fn labels(&self) -> &Array1<T> {
        &self.labels
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn batch_size(&self) -> usize {
        self.labels.len()
    }

    pub fn dims(&self) -> (usize, usize, usize, usize) {
        self.data.dim()
    }

    /// The slice of item `index`, shape (channels, height, width).
    pub fn item_mut(&mut self, index: usize) -> ArrayViewMut3<'_, T> {
        self.data.index_axis_mut(Axis(0), index)
    }

    pub fn set_label(&mut self, index: usize, label: i32) {
        self.labels[index] = T::from_f64_lossy(label as f64);
    }

    /// Copies the batch out of the pipeline-owned buffer.
    pub fn to_owned_parts(&self) -> (Array4<T>, Array1<T>) {
        (self.data.clone(), self.labels.clone())
    }
}
