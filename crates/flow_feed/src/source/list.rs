use crate::error::FeedError;
use crate::source::{Sample, SourceCursor};
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

/// Cursor over the samples of an index file.
///
/// The index is a flat sequence of `<path> <label>` token pairs separated by any
/// whitespace, usually one pair per line:
///
/// ```text
/// clips/v_000/flow_x_0001.jpg 0
/// clips/v_000/flow_x_0002.jpg 0
/// ```
#[derive(Debug, Clone)]
pub struct ListCursor {
    samples: Vec<Sample>,
    position: usize,
}

impl ListCursor {
    pub fn new(samples: Vec<Sample>) -> Result<Self> {
        if samples.is_empty() {
            bail!(FeedError::Config("sample list is empty".into()));
        }
        Ok(Self {
            samples,
            position: 0,
        })
    }

    /// Reads an index file. Relative sample paths are joined onto `root_folder`
    /// when one is given.
    pub fn from_index_file(path: impl AsRef<Path>, root_folder: Option<&Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            FeedError::Config(format!("cannot read index file {}: {}", path.display(), e))
        })?;
        let samples = parse_index(&text, &path.display().to_string(), root_folder)?;
        Self::new(samples).with_context(|| format!("Index file {} has no samples", path.display()))
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Number of samples from the cursor to the end of the list.
    pub fn remaining(&self) -> usize {
        self.samples.len() - self.position
    }
}

impl SourceCursor for ListCursor {
    type Item = Sample;

    fn current(&self) -> Result<&Sample> {
        self.samples.get(self.position).ok_or_else(|| {
            FeedError::ExhaustedSource(format!(
                "list cursor at the end of {} samples",
                self.samples.len()
            ))
            .into()
        })
    }

    fn advance(&mut self, step: usize) -> Result<()> {
        if self.at_end() {
            bail!(FeedError::ExhaustedSource(format!(
                "cannot advance past the end of {} samples",
                self.samples.len()
            )));
        }
        self.position = (self.position + step).min(self.samples.len());
        Ok(())
    }

    fn at_end(&self) -> bool {
        self.position >= self.samples.len()
    }

    fn reset(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }
}

/// Parses `<path> <label>` pairs. `origin` names the index in error messages.
pub fn parse_index(text: &str, origin: &str, root_folder: Option<&Path>) -> Result<Vec<Sample>> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() {
        bail!(FeedError::Config(format!("index {} is empty", origin)));
    }
    if tokens.len() % 2 != 0 {
        bail!(FeedError::Config(format!(
            "index {} has an odd number of tokens ({}); trailing token '{}' has no label",
            origin,
            tokens.len(),
            tokens[tokens.len() - 1]
        )));
    }

    tokens
        .chunks_exact(2)
        .map(|pair| {
            let label: i32 = pair[1].parse().map_err(|_| {
                FeedError::Config(format!(
                    "index {}: label '{}' for '{}' is not an integer",
                    origin, pair[1], pair[0]
                ))
            })?;
            let locator = match root_folder {
                Some(root) if Path::new(pair[0]).is_relative() => {
                    root.join(pair[0]).display().to_string()
                }
                _ => pair[0].to_string(),
            };
            Ok(Sample { locator, label })
        })
        .collect()
}
