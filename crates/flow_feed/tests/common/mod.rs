#![allow(dead_code)]

use anyhow::Result;
use flow_feed::transforms::write_image;
use flow_feed::{encode_flow, Datum, DatumGroup, KeyValueStore, Raster};
use ndarray::{s, Array3};
use std::fs;
use std::path::{Path, PathBuf};

pub const HEIGHT: usize = 4;
pub const WIDTH: usize = 6;

/// Flow field of frame `frame` in group `group`. Every value is a whole number of
/// tenths, so the 8-bit encoding stores it exactly.
pub fn flow_field(group: usize, frame: usize) -> Array3<f32> {
    Array3::from_shape_fn((2, HEIGHT, WIDTH), |(c, h, w)| {
        let tenths = (group * 17 + frame * 5 + h * 3 + w) as i32 - 20;
        let sign = if c == 0 { 1 } else { -1 };
        (sign * tenths) as f32 / 10.0
    })
}

/// The decoded stack `group` should produce: frames in order, u then v.
pub fn expected_stack(group: usize, stack_size: usize, subtract_mean: bool) -> Array3<f32> {
    let mut stack = Array3::<f32>::zeros((2 * stack_size, HEIGHT, WIDTH));
    for frame in 0..stack_size {
        let mut field = flow_field(group, frame);
        if subtract_mean {
            for c in 0..2 {
                let mean = field.slice(s![c, .., ..]).mean().unwrap_or(0.0);
                field.slice_mut(s![c, .., ..]).mapv_inplace(|x| x - mean);
            }
        }
        stack
            .slice_mut(s![2 * frame..2 * frame + 2, .., ..])
            .assign(&field);
    }
    stack
}

pub fn assert_close<'a>(
    actual: impl IntoIterator<Item = &'a f32>,
    expected: impl IntoIterator<Item = &'a f32>,
) {
    let actual: Vec<f32> = actual.into_iter().copied().collect();
    let expected: Vec<f32> = expected.into_iter().copied().collect();
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(&expected).enumerate() {
        assert!((a - e).abs() < 1e-4, "element {}: {} vs {}", i, a, e);
    }
}

/// Writes `groups * stack_size` flow PNGs and an index listing them group by
/// group, each labeled with its group number. Returns the index path.
pub fn write_flow_dataset(dir: &Path, groups: usize, stack_size: usize) -> Result<PathBuf> {
    let mut index = String::new();
    for group in 0..groups {
        for frame in 0..stack_size {
            let path = dir.join(format!("g{:02}_f{:02}.png", group, frame));
            write_image(&path, &encode_flow(flow_field(group, frame).view())?)?;
            index.push_str(&format!("{} {}\n", path.display(), group));
        }
    }
    let index_path = dir.join("index.txt");
    fs::write(&index_path, index)?;
    Ok(index_path)
}

/// A raw planar flow frame whose every byte is `byte`.
pub fn uniform_flow_datum(label: i32, byte: u8) -> Datum {
    Datum::raw(label, 3, HEIGHT, WIDTH, vec![byte; 3 * HEIGHT * WIDTH])
}

/// u and v decoded from a pixel whose three bytes all equal `byte`.
pub fn uniform_flow_value(byte: u8) -> (f32, f32) {
    let b = byte as f32;
    let u = b - 127.0 + (byte / 10) as f32 / 10.0;
    let v = b - 127.0 + (byte % 10) as f32 / 10.0;
    (u, v)
}

/// Stores one group per key `00000000`, `00000001`, ...
pub fn fill_store(store: &mut dyn KeyValueStore, groups: &[DatumGroup]) -> Result<()> {
    for (i, group) in groups.iter().enumerate() {
        store.put(&format!("{:08}", i), &group.to_bytes()?)?;
    }
    Ok(())
}

/// One encoded (PNG) flow group per label, frames from [`flow_field`].
pub fn encoded_flow_group(group: usize, stack_size: usize) -> Result<DatumGroup> {
    let data = (0..stack_size)
        .map(|frame| {
            let raster: Raster = encode_flow(flow_field(group, frame).view())?;
            Datum::from_raster_png(group as i32, &raster)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(DatumGroup::new(data))
}
