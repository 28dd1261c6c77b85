use crate::error::FeedError;
use crate::flow::decode_flow;
use crate::raster::Raster;
use crate::tensor::Dtype;
use anyhow::{bail, ensure, Context, Result};
use ndarray::{s, Array3, ArrayViewMut3};

/// Assembles `stack_size` temporal frames into one (stack_size * channels, H, W) tensor.
///
/// Frame `i` owns the channel range `[channels_per_frame * i, channels_per_frame * (i + 1))`.
/// Flow frames are decoded into 2 channels each; image frames are copied with their
/// own channel count, de-interleaved from HWC into planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStacker {
    stack_size: usize,
    channels_per_frame: usize,
    height: usize,
    width: usize,
}

impl FrameStacker {
    pub fn new(
        stack_size: usize,
        channels_per_frame: usize,
        height: usize,
        width: usize,
    ) -> Result<Self> {
        ensure!(
            stack_size > 0,
            FeedError::Config("stack_size must be greater than 0".into())
        );
        ensure!(
            channels_per_frame > 0,
            FeedError::Config("frames must have at least one channel".into())
        );
        Ok(Self {
            stack_size,
            channels_per_frame,
            height,
            width,
        })
    }

    /// Stacker for flow frames: two output channels (u, v) per frame.
    pub fn for_flow(stack_size: usize, height: usize, width: usize) -> Result<Self> {
        Self::new(stack_size, 2, height, width)
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    pub fn channels_per_frame(&self) -> usize {
        self.channels_per_frame
    }

    /// (channels, height, width) of a full stack.
    pub fn stack_dims(&self) -> (usize, usize, usize) {
        (
            self.stack_size * self.channels_per_frame,
            self.height,
            self.width,
        )
    }

    pub fn allocate<T: Dtype>(&self) -> Array3<T> {
        Array3::zeros(self.stack_dims())
    }

    /// Decodes one flow frame into its two channels of `stack`.
    pub fn place_flow<T: Dtype>(
        &self,
        index: usize,
        frame: &Raster,
        subtract_mean: bool,
        mut stack: ArrayViewMut3<'_, T>,
    ) -> Result<()> {
        self.check_slot(index, frame, &stack)?;
        decode_flow(
            frame,
            stack.slice_mut(s![2 * index..2 * index + 2, .., ..]),
            subtract_mean,
        )
        .with_context(|| format!("Failed to decode flow frame {}", index))
    }

    /// Copies one image frame into its channel range of `stack`.
    pub fn place_image<T: Dtype>(
        &self,
        index: usize,
        frame: &Raster,
        mut stack: ArrayViewMut3<'_, T>,
    ) -> Result<()> {
        self.check_slot(index, frame, &stack)?;
        let channels = self.channels_per_frame;
        if frame.channels() != channels {
            bail!(FeedError::shape(
                format!("frame {}", index),
                format!("{} channels", channels),
                format!("{} channels", frame.channels())
            ));
        }

        let mut planes = stack.slice_mut(s![channels * index..channels * (index + 1), .., ..]);
        for h in 0..self.height {
            for (w, pixel) in frame.row(h).chunks_exact(channels).enumerate() {
                for (c, &byte) in pixel.iter().enumerate() {
                    planes[[c, h, w]] = T::from_byte(byte);
                }
            }
        }
        Ok(())
    }

    /// Decodes `frames` in order; `subtract_mean[i]` applies to frame `i`.
    pub fn stack_flow<T: Dtype>(
        &self,
        frames: &[Raster],
        subtract_mean: &[bool],
        mut stack: ArrayViewMut3<'_, T>,
    ) -> Result<()> {
        self.check_count(frames.len())?;
        self.check_count(subtract_mean.len())?;
        for (i, (frame, &flag)) in frames.iter().zip(subtract_mean).enumerate() {
            self.place_flow(i, frame, flag, stack.view_mut())?;
        }
        Ok(())
    }

    pub fn stack_images<T: Dtype>(
        &self,
        frames: &[Raster],
        mut stack: ArrayViewMut3<'_, T>,
    ) -> Result<()> {
        self.check_count(frames.len())?;
        for (i, frame) in frames.iter().enumerate() {
            self.place_image(i, frame, stack.view_mut())?;
        }
        Ok(())
    }

    fn check_count(&self, actual: usize) -> Result<()> {
        if actual != self.stack_size {
            bail!(FeedError::StackSizeMismatch {
                expected: self.stack_size,
                actual,
            });
        }
        Ok(())
    }

    fn check_slot<T>(&self, index: usize, frame: &Raster, stack: &ArrayViewMut3<'_, T>) -> Result<()> {
        if index >= self.stack_size {
            bail!(FeedError::StackSizeMismatch {
                expected: self.stack_size,
                actual: index + 1,
            });
        }
        if stack.dim() != self.stack_dims() {
            bail!(FeedError::shape(
                "stack buffer",
                format!("{:?}", self.stack_dims()),
                format!("{:?}", stack.dim())
            ));
        }
        if !frame.is_u8() {
            bail!(FeedError::DepthMismatch {
                index,
                depth: frame.depth().to_string(),
            });
        }
        if frame.height() != self.height || frame.width() != self.width {
            bail!(FeedError::shape(
                format!("frame {}", index),
                format!("{}x{}", self.height, self.width),
                format!("{}x{}", frame.height(), frame.width())
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::encode_flow;
    use crate::raster::SampleDepth;

    fn constant_flow(u: f32, v: f32, h: usize, w: usize) -> Raster {
        let field = Array3::from_shape_fn((2, h, w), |(c, _, _)| if c == 0 { u } else { v });
        encode_flow(field.view()).unwrap()
    }

    #[test]
    fn test_flow_frames_land_in_order() -> Result<()> {
        let stacker = FrameStacker::for_flow(5, 3, 4)?;
        let frames: Vec<Raster> = (0..5)
            .map(|i| constant_flow(i as f32, -(i as f32) - 0.5, 3, 4))
            .collect();
        let mut stack = stacker.allocate::<f32>();
        stacker.stack_flow(&frames, &[false; 5], stack.view_mut())?;

        assert_eq!(stack.dim(), (10, 3, 4));
        for i in 0..5 {
            assert!(stack.slice(s![2 * i, .., ..]).iter().all(|&x| x == i as f32));
            assert!(stack
                .slice(s![2 * i + 1, .., ..])
                .iter()
                .all(|&x| x == -(i as f32) - 0.5));
        }
        Ok(())
    }

    #[test]
    fn test_per_frame_mean_flags() -> Result<()> {
        let stacker = FrameStacker::for_flow(2, 2, 2)?;
        let frames = vec![constant_flow(3.0, 4.0, 2, 2), constant_flow(3.0, 4.0, 2, 2)];
        let mut stack = stacker.allocate::<f64>();
        stacker.stack_flow(&frames, &[true, false], stack.view_mut())?;

        assert!(stack.slice(s![0..2, .., ..]).iter().all(|&x| x.abs() < 1e-9));
        assert!(stack.slice(s![2, .., ..]).iter().all(|&x| x == 3.0));
        assert!(stack.slice(s![3, .., ..]).iter().all(|&x| x == 4.0));
        Ok(())
    }

    #[test]
    fn test_images_are_deinterleaved() -> Result<()> {
        let stacker = FrameStacker::new(2, 3, 1, 2)?;
        let frames = vec![
            Raster::new(1, 2, 3, vec![1, 2, 3, 4, 5, 6])?,
            Raster::new(1, 2, 3, vec![7, 8, 9, 10, 11, 12])?,
        ];
        let mut stack = stacker.allocate::<f32>();
        stacker.stack_images(&frames, stack.view_mut())?;

        let flat: Vec<f32> = stack.iter().copied().collect();
        assert_eq!(
            flat,
            vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0, 7.0, 10.0, 8.0, 11.0, 9.0, 12.0]
        );
        Ok(())
    }

    #[test]
    fn test_stacking_errors() -> Result<()> {
        let stacker = FrameStacker::for_flow(2, 2, 2)?;
        let frame = constant_flow(0.0, 0.0, 2, 2);
        let mut stack = stacker.allocate::<f32>();

        let err = stacker
            .stack_flow(&[frame.clone()], &[true], stack.view_mut())
            .unwrap_err();
        assert!(matches!(
            FeedError::kind_of(&err),
            Some(FeedError::StackSizeMismatch { expected: 2, actual: 1 })
        ));

        let err = stacker
            .stack_flow(&[frame.clone(), frame.clone()], &[true], stack.view_mut())
            .unwrap_err();
        assert!(matches!(
            FeedError::kind_of(&err),
            Some(FeedError::StackSizeMismatch { .. })
        ));

        let wide = Raster::with_depth(2, 2, 3, SampleDepth::U16, vec![0; 24])?;
        let err = stacker
            .stack_flow(&[frame.clone(), wide], &[true, true], stack.view_mut())
            .unwrap_err();
        assert!(matches!(
            FeedError::kind_of(&err),
            Some(FeedError::DepthMismatch { index: 1, .. })
        ));

        let small = constant_flow(0.0, 0.0, 1, 2);
        let err = stacker
            .stack_flow(&[frame.clone(), small], &[true, true], stack.view_mut())
            .unwrap_err();
        assert!(matches!(
            FeedError::kind_of(&err),
            Some(FeedError::ShapeMismatch { .. })
        ));

        let mut wrong = Array3::<f32>::zeros((3, 2, 2));
        let err = stacker.place_flow(0, &frame, true, wrong.view_mut()).unwrap_err();
        assert!(matches!(
            FeedError::kind_of(&err),
            Some(FeedError::ShapeMismatch { .. })
        ));
        Ok(())
    }
}
