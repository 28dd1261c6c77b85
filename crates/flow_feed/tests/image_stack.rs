//! End-to-end tests for the ImageStack layer.
//!
//! Tests cover:
//! - Raw and PNG-encoded flow groups from MemoryStore and SqliteStore
//! - Per-frame mean subtraction flags
//! - Plain image stacking (no flow decoding)
//! - Record order, restart at the end of the store, random initial skip and step
//! - Setup failures: wrong group size, non-flow frames, empty store, non-database source

mod common;
use common::{
    assert_close, encoded_flow_group, expected_stack, fill_store, uniform_flow_datum,
    uniform_flow_value, HEIGHT, WIDTH,
};

use anyhow::Result;
use flow_feed::feed::{Backend, ImageStackFeeder, PrefetchOptions};
use flow_feed::source::{MemoryStore, SqliteStore};
use flow_feed::{Datum, DatumGroup, FeedConfig, FeedError, FeedRegistry, Prefetcher};
use ndarray::s;
use tempfile::TempDir;

fn flow_config(batch_size: usize, stack_size: usize) -> flow_feed::feed::FeedConfigBuilder {
    FeedConfig::builder()
        .kind("ImageStack")
        .backend(Backend::Sqlite)
        .source("in-memory")
        .batch_size(batch_size)
        .stack_size(stack_size)
        .is_flow(true)
        .subtract_mean(false)
}

fn spawn_from_memory(config: &FeedConfig, groups: &[DatumGroup]) -> Result<Prefetcher<f32>> {
    let mut store = MemoryStore::new();
    fill_store(&mut store, groups)?;
    let feeder = ImageStackFeeder::<f32>::with_store(config, Box::new(store))?;
    Prefetcher::spawn(Box::new(feeder), PrefetchOptions::from(config))
}

#[test_log::test]
fn test_raw_flow_groups() -> Result<()> {
    // group i holds 3 frames whose bytes are all 100 + 10 * i + frame
    let groups: Vec<DatumGroup> = (0..4)
        .map(|i| {
            DatumGroup::new(
                (0..3)
                    .map(|f| uniform_flow_datum(i as i32, (100 + 10 * i + f) as u8))
                    .collect(),
            )
        })
        .collect();
    let config = flow_config(4, 3).build();
    let mut feed = spawn_from_memory(&config, &groups)?;

    let batch = feed.next_batch()?;
    assert_eq!(batch.dims(), (4, 6, HEIGHT, WIDTH));
    for item in 0..4 {
        assert_eq!(batch.labels()[item], item as f32);
        for frame in 0..3 {
            let (u, v) = uniform_flow_value((100 + 10 * item + frame) as u8);
            let data = batch.data();
            assert!(data
                .slice(s![item, 2 * frame, .., ..])
                .iter()
                .all(|x| (x - u).abs() < 1e-4));
            assert!(data
                .slice(s![item, 2 * frame + 1, .., ..])
                .iter()
                .all(|x| (x - v).abs() < 1e-4));
        }
    }
    Ok(())
}

#[test]
fn test_per_frame_mean_flags() -> Result<()> {
    let groups = vec![DatumGroup::new(vec![
        uniform_flow_datum(0, 150),
        uniform_flow_datum(0, 150),
    ])];
    let config = flow_config(1, 2)
        .subtract_mean_per_frame(vec![true, false])
        .build();
    let mut feed = spawn_from_memory(&config, &groups)?;

    let batch = feed.next_batch()?;
    let data = batch.data();
    let (u, v) = uniform_flow_value(150);
    assert!(data.slice(s![0, 0..2, .., ..]).iter().all(|x| x.abs() < 1e-4));
    assert!(data.slice(s![0, 2, .., ..]).iter().all(|x| (x - u).abs() < 1e-4));
    assert!(data.slice(s![0, 3, .., ..]).iter().all(|x| (x - v).abs() < 1e-4));
    Ok(())
}

#[test]
fn test_encoded_groups_from_sqlite() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("flow.db");
    {
        let mut store = SqliteStore::create(&path)?;
        let groups = (0..3)
            .map(|g| encoded_flow_group(g, 2))
            .collect::<Result<Vec<_>>>()?;
        fill_store(&mut store, &groups)?;
    }

    let config = flow_config(3, 2).source(&path).build();
    let mut feed = FeedRegistry::<f32>::with_defaults().spawn(&config)?;
    let batch = feed.next_batch()?;
    assert_eq!(batch.dims(), (3, 4, HEIGHT, WIDTH));
    for item in 0..3 {
        assert_eq!(batch.labels()[item], item as f32);
        let expected = expected_stack(item, 2, false);
        assert_close(batch.data().slice(s![item, .., .., ..]), expected.iter());
    }
    Ok(())
}

#[test]
fn test_plain_image_stacking() -> Result<()> {
    // 2 frames of 2-channel 1x2 images, planar bytes
    let groups = vec![DatumGroup::new(vec![
        Datum::raw(7, 2, 1, 2, vec![1, 2, 3, 4]),
        Datum::raw(8, 2, 1, 2, vec![5, 6, 7, 8]),
    ])];
    let config = FeedConfig::builder()
        .kind("ImageStack")
        .batch_size(2)
        .stack_size(2)
        .build();
    let mut feed = spawn_from_memory(&config, &groups)?;

    let batch = feed.next_batch()?;
    assert_eq!(batch.dims(), (2, 4, 1, 2));
    let expected = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
    for item in 0..2 {
        assert_eq!(batch.labels()[item], 7.0);
        assert_close(batch.data().slice(s![item, .., .., ..]), expected.iter());
    }
    Ok(())
}

#[test]
fn test_records_wrap_in_key_order() -> Result<()> {
    let groups: Vec<DatumGroup> = (0..3)
        .map(|i| DatumGroup::new(vec![uniform_flow_datum(i, 127)]))
        .collect();
    let config = flow_config(5, 1).build();
    let mut feed = spawn_from_memory(&config, &groups)?;

    let labels: Vec<f32> = feed.next_batch()?.labels().to_vec();
    assert_eq!(labels, vec![0.0, 1.0, 2.0, 0.0, 1.0]);
    let labels: Vec<f32> = feed.next_batch()?.labels().to_vec();
    assert_eq!(labels, vec![2.0, 0.0, 1.0, 2.0, 0.0]);
    Ok(())
}

#[test]
fn test_rand_skip_changes_start() -> Result<()> {
    let groups: Vec<DatumGroup> = (0..10)
        .map(|i| DatumGroup::new(vec![uniform_flow_datum(i, 127)]))
        .collect();
    let mut starts = Vec::new();
    for seed in 0..10 {
        let config = flow_config(1, 1).rand_skip(10).seed(seed).build();
        let mut feed = spawn_from_memory(&config, &groups)?;
        starts.push(feed.next_batch()?.labels()[0]);
    }
    assert!(starts.iter().all(|&l| (0.0..10.0).contains(&l)));
    assert!(starts.iter().any(|&l| l != 0.0));
    Ok(())
}

#[test]
fn test_rand_step_advances_within_range() -> Result<()> {
    const RECORDS: i32 = 10;
    const MAX_STEP: usize = 3;
    let groups: Vec<DatumGroup> = (0..RECORDS)
        .map(|i| DatumGroup::new(vec![uniform_flow_datum(i, 127)]))
        .collect();
    let config = flow_config(8, 1).rand_step(MAX_STEP).seed(11).build();
    let mut feed = spawn_from_memory(&config, &groups)?;

    let mut labels: Vec<i32> = Vec::new();
    for _ in 0..3 {
        labels.extend(feed.next_batch()?.labels().iter().map(|&l| l as i32));
    }
    assert_eq!(labels[0], 0);

    // Restarting at record 0 after the last one keeps the step in range modulo the store.
    let steps: Vec<i32> = labels
        .windows(2)
        .map(|w| (w[1] - w[0]).rem_euclid(RECORDS))
        .collect();
    assert!(steps.iter().all(|&s| (1..=MAX_STEP as i32).contains(&s)), "{:?}", labels);
    assert!(steps.iter().any(|&s| s > 1), "{:?}", labels);
    assert!(labels.windows(2).any(|w| w[1] < w[0]), "never wrapped: {:?}", labels);
    Ok(())
}

#[test]
fn test_non_database_source_is_config_error() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("train.txt");
    std::fs::write(&path, "flow/a.png 0\nflow/b.png 0\n")?;

    let config = flow_config(1, 1).source(path.clone()).build();
    let err = FeedRegistry::<f32>::with_defaults()
        .spawn(&config)
        .err()
        .expect("a text file is not a store");
    assert!(matches!(FeedError::kind_of(&err), Some(FeedError::Config(_))));
    assert!(format!("{:#}", err).contains("train.txt"));
    Ok(())
}

#[test]
fn test_group_size_must_match_stack() {
    let groups = vec![DatumGroup::new(vec![uniform_flow_datum(0, 127)])];
    let config = flow_config(1, 2).build();
    let err = spawn_from_memory(&config, &groups).err().expect("setup must fail");
    assert!(matches!(FeedError::kind_of(&err), Some(FeedError::Config(_))));
}

#[test]
fn test_flow_needs_three_channels() {
    let groups = vec![DatumGroup::new(vec![Datum::raw(0, 1, 2, 2, vec![0; 4])])];
    let config = flow_config(1, 1).build();
    let err = spawn_from_memory(&config, &groups).err().expect("setup must fail");
    assert!(matches!(FeedError::kind_of(&err), Some(FeedError::Config(_))));
}

#[test]
fn test_empty_store() {
    let config = flow_config(1, 1).build();
    let err = spawn_from_memory(&config, &[]).err().expect("setup must fail");
    assert!(matches!(
        FeedError::kind_of(&err),
        Some(FeedError::ExhaustedSource(_))
    ));
}
