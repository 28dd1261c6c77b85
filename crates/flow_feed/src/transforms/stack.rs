use crate::error::FeedError;
use crate::feed::{worker_gen_bool, worker_gen_range};
use crate::tensor::Dtype;
use anyhow::{bail, ensure, Result};
use ndarray::{ArrayView3, ArrayViewMut3, Axis};
use serde::{Deserialize, Serialize};

/// Augmentation step applied to every assembled stack before it lands in the batch.
///
/// Implementations must preserve the channel count. The output view is the item's
/// slice of the batch being filled, so a transform writes directly into the batch.
pub trait StackTransform<T: Dtype>: Send + Sync {
    /// Output (channels, height, width) for an input stack of the given size.
    fn output_dims(&self, channels: usize, height: usize, width: usize)
        -> Result<(usize, usize, usize)>;

    fn transform(&self, input: ArrayView3<'_, T>, output: ArrayViewMut3<'_, T>) -> Result<()>;
}

/// Training or evaluation behaviour of random augmentations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Train,
    Test,
}

// ============================================================================
// CropMirrorScale
// ============================================================================

/// Square crop, random horizontal mirror and a constant scale factor.
///
/// - `crop_size = 0` keeps the full frame. Otherwise the crop offset is random in
///   the training phase and centred in the test phase.
/// - `mirror` flips the whole stack horizontally with probability 0.5.
/// - every output element is multiplied by `scale`.
///
/// Random draws come from the prefetch worker's seeded RNG.
#[derive(Debug, Clone, PartialEq)]
pub struct CropMirrorScale {
    crop_size: usize,
    mirror: bool,
    scale: f64,
    phase: Phase,
}

impl Default for CropMirrorScale {
    fn default() -> Self {
        Self {
            crop_size: 0,
            mirror: false,
            scale: 1.0,
            phase: Phase::Train,
        }
    }
}

impl CropMirrorScale {
    pub fn new(crop_size: usize, mirror: bool, scale: f64, phase: Phase) -> Result<Self> {
        ensure!(
            scale.is_finite(),
            FeedError::Config(format!("transform scale must be finite (got {})", scale))
        );
        Ok(Self {
            crop_size,
            mirror,
            scale,
            phase,
        })
    }

    /// Leaves stacks untouched.
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn crop_size(&self) -> usize {
        self.crop_size
    }
}

impl<T: Dtype> StackTransform<T> for CropMirrorScale {
    fn output_dims(
        &self,
        channels: usize,
        height: usize,
        width: usize,
    ) -> Result<(usize, usize, usize)> {
        if self.crop_size == 0 {
            return Ok((channels, height, width));
        }
        if self.crop_size > height || self.crop_size > width {
            bail!(FeedError::shape(
                "crop",
                format!("crop_size {} within the input", self.crop_size),
                format!("{}x{} input", height, width)
            ));
        }
        Ok((channels, self.crop_size, self.crop_size))
    }

    fn transform(&self, input: ArrayView3<'_, T>, mut output: ArrayViewMut3<'_, T>) -> Result<()> {
        let (channels, height, width) = input.dim();
        let expected = StackTransform::<T>::output_dims(self, channels, height, width)?;
        if output.dim() != expected {
            bail!(FeedError::shape(
                "transform output",
                format!("{:?}", expected),
                format!("{:?}", output.dim())
            ));
        }
        let (_, out_h, out_w) = expected;

        let (h_off, w_off) = match (self.crop_size, self.phase) {
            (0, _) => (0, 0),
            (_, Phase::Train) => (
                worker_gen_range(0, height - out_h + 1),
                worker_gen_range(0, width - out_w + 1),
            ),
            (_, Phase::Test) => ((height - out_h) / 2, (width - out_w) / 2),
        };
        let do_mirror = self.mirror && worker_gen_bool(0.5);
        let scale = T::from_f64_lossy(self.scale);

        for (src_plane, mut dst_plane) in input
            .axis_iter(Axis(0))
            .zip(output.axis_iter_mut(Axis(0)))
        {
            for h in 0..out_h {
                for w in 0..out_w {
                    let src_w = if do_mirror {
                        w_off + out_w - 1 - w
                    } else {
                        w_off + w
                    };
                    dst_plane[[h, w]] = src_plane[[h + h_off, src_w]] * scale;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::init_worker_rng;
    use ndarray::{Array3, s};

    fn ramp(c: usize, h: usize, w: usize) -> Array3<f32> {
        Array3::from_shape_fn((c, h, w), |(c, h, w)| (c * 100 + h * 10 + w) as f32)
    }

    #[test]
    fn test_identity_copies() -> Result<()> {
        let input = ramp(2, 3, 4);
        let mut output = Array3::<f32>::zeros((2, 3, 4));
        CropMirrorScale::identity().transform(input.view(), output.view_mut())?;
        assert_eq!(output, input);
        Ok(())
    }

    #[test]
    fn test_center_crop_and_scale() -> Result<()> {
        let input = ramp(1, 4, 4);
        let t = CropMirrorScale::new(2, false, 0.5, Phase::Test)?;
        assert_eq!(StackTransform::<f32>::output_dims(&t, 1, 4, 4)?, (1, 2, 2));

        let mut output = Array3::<f32>::zeros((1, 2, 2));
        t.transform(input.view(), output.view_mut())?;
        let expected = input.slice(s![.., 1..3, 1..3]).mapv(|x| x * 0.5);
        assert_eq!(output, expected);
        Ok(())
    }

    #[test]
    fn test_random_crop_stays_inside() -> Result<()> {
        init_worker_rng(7);
        let input = ramp(1, 5, 5);
        let t = CropMirrorScale::new(3, false, 1.0, Phase::Train)?;
        for _ in 0..20 {
            let mut output = Array3::<f32>::zeros((1, 3, 3));
            t.transform(input.view(), output.view_mut())?;
            let h_off = (output[[0, 0, 0]] as usize / 10) % 10;
            let w_off = output[[0, 0, 0]] as usize % 10;
            assert!(h_off <= 2 && w_off <= 2);
            assert_eq!(output, input.slice(s![.., h_off..h_off + 3, w_off..w_off + 3]));
        }
        Ok(())
    }

    #[test]
    fn test_mirror_flips_rows() -> Result<()> {
        init_worker_rng(3);
        let input = ramp(1, 1, 3);
        let t = CropMirrorScale::new(0, true, 1.0, Phase::Train)?;
        let mut seen_flip = false;
        for _ in 0..32 {
            let mut output = Array3::<f32>::zeros((1, 1, 3));
            t.transform(input.view(), output.view_mut())?;
            let row: Vec<f32> = output.iter().copied().collect();
            assert!(row == vec![0.0, 1.0, 2.0] || row == vec![2.0, 1.0, 0.0]);
            seen_flip |= row[0] == 2.0;
        }
        assert!(seen_flip);
        Ok(())
    }

    #[test]
    fn test_crop_larger_than_input() {
        let t = CropMirrorScale::new(8, false, 1.0, Phase::Test).unwrap();
        let err = StackTransform::<f32>::output_dims(&t, 2, 4, 4).unwrap_err();
        assert!(matches!(
            FeedError::kind_of(&err),
            Some(FeedError::ShapeMismatch { .. })
        ));
    }
}
