use crate::error::FeedError;
use crate::feed::layers::{BatchFiller, FlowDataFeeder, ImageStackFeeder};
use crate::feed::worker::{PrefetchOptions, Prefetcher};
use crate::feed::FeedConfig;
use crate::tensor::Dtype;
use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;

/// Builds a layer from its configuration.
pub type FeederFactory<T> = fn(&FeedConfig) -> Result<Box<dyn BatchFiller<T>>>;

/// Layer name -> factory.
///
/// ```ignore
/// let registry = FeedRegistry::<f32>::with_defaults();
/// let mut feed = registry.spawn(&FeedConfig::from_json_file("flow_train.json")?)?;
/// let batch = feed.next_batch()?;
/// ```
pub struct FeedRegistry<T: Dtype> {
    factories: BTreeMap<String, FeederFactory<T>>,
}

impl<T: Dtype> Default for FeedRegistry<T> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl<T: Dtype> FeedRegistry<T> {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// A registry holding the `FlowData` and `ImageStack` layers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .factories
            .insert("FlowData".to_string(), flow_data_factory::<T>);
        registry
            .factories
            .insert("ImageStack".to_string(), image_stack_factory::<T>);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, factory: FeederFactory<T>) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            bail!(FeedError::Config(format!("layer '{}' is already registered", name)));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Validates `config` and sets up the layer it names.
    pub fn create_filler(&self, config: &FeedConfig) -> Result<Box<dyn BatchFiller<T>>> {
        let Some(factory) = self.factories.get(&config.kind) else {
            bail!(FeedError::Config(format!(
                "unknown layer '{}' (registered: {})",
                config.kind,
                self.names().join(", ")
            )));
        };
        config.validate()?;
        factory(config).with_context(|| format!("Failed to set up {} layer", config.kind))
    }

    /// Sets up the layer and starts its prefetch worker.
    pub fn spawn(&self, config: &FeedConfig) -> Result<Prefetcher<T>> {
        let filler = self.create_filler(config)?;
        Prefetcher::spawn(filler, PrefetchOptions::from(config))
    }
}

fn flow_data_factory<T: Dtype>(config: &FeedConfig) -> Result<Box<dyn BatchFiller<T>>> {
    Ok(Box::new(FlowDataFeeder::<T>::new(config)?))
}

fn image_stack_factory<T: Dtype>(config: &FeedConfig) -> Result<Box<dyn BatchFiller<T>>> {
    Ok(Box::new(ImageStackFeeder::<T>::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing_factory(_: &FeedConfig) -> Result<Box<dyn BatchFiller<f32>>> {
        bail!(FeedError::Config("not available".into()))
    }

    #[test]
    fn test_default_layers() {
        let registry = FeedRegistry::<f32>::with_defaults();
        assert_eq!(registry.names(), vec!["FlowData", "ImageStack"]);
        assert!(registry.contains("FlowData"));
    }

    #[test]
    fn test_register_rejects_duplicates() -> Result<()> {
        let mut registry = FeedRegistry::<f32>::with_defaults();
        registry.register("Custom", failing_factory)?;
        assert!(registry.contains("Custom"));

        let err = registry.register("FlowData", failing_factory).unwrap_err();
        assert!(matches!(FeedError::kind_of(&err), Some(FeedError::Config(_))));
        Ok(())
    }

    #[test]
    fn test_unknown_kind() {
        let registry = FeedRegistry::<f32>::with_defaults();
        let config = FeedConfig::builder().kind("Mystery").source("x").build();
        let err = registry.create_filler(&config).err().expect("unknown kind");
        assert!(format!("{}", err).contains("Mystery"));
        assert!(matches!(FeedError::kind_of(&err), Some(FeedError::Config(_))));
    }

    #[test]
    fn test_missing_source_fails_setup() {
        let registry = FeedRegistry::<f32>::with_defaults();
        let config = FeedConfig::builder().source("does/not/exist.txt").build();
        let err = registry.create_filler(&config).err().expect("missing index");
        assert!(matches!(FeedError::kind_of(&err), Some(FeedError::Config(_))));
    }
}
