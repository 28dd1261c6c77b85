use crate::error::FeedError;
use crate::raster::Raster;
use crate::transforms::{decode_image, encode_png, ColorMode};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One labeled frame as stored in a key-value record.
///
/// `encoded` payloads hold compressed image bytes (PNG, JPEG) and leave the
/// dimensions at zero until decoded. Raw payloads hold `channels * height * width`
/// bytes in planar (C, H, W) order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datum {
    pub label: i32,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub encoded: bool,
    pub data: Vec<u8>,
}

impl Datum {
    pub fn encoded(label: i32, bytes: Vec<u8>) -> Self {
        Self {
            label,
            channels: 0,
            height: 0,
            width: 0,
            encoded: true,
            data: bytes,
        }
    }

    pub fn raw(label: i32, channels: usize, height: usize, width: usize, planar: Vec<u8>) -> Self {
        Self {
            label,
            channels,
            height,
            width,
            encoded: false,
            data: planar,
        }
    }

    /// Stores an 8-bit raster as a raw planar payload.
    pub fn from_raster(label: i32, raster: &Raster) -> Result<Self> {
        Ok(Self::raw(
            label,
            raster.channels(),
            raster.height(),
            raster.width(),
            raster.to_planar()?,
        ))
    }

    /// Stores an 8-bit raster as an encoded PNG payload.
    pub fn from_raster_png(label: i32, raster: &Raster) -> Result<Self> {
        Ok(Self::encoded(label, encode_png(raster)?))
    }

    /// Decodes the payload into an interleaved raster.
    ///
    /// Encoded payloads are decoded as 3-channel colour when `force_color` is set
    /// and with their native channels and depth otherwise.
    pub fn to_raster(&self, force_color: bool, locator: &str) -> Result<Raster> {
        if self.encoded {
            let mode = if force_color {
                ColorMode::Color
            } else {
                ColorMode::Unchanged
            };
            decode_image(&self.data, mode, locator)
        } else {
            Raster::from_planar(self.channels, self.height, self.width, &self.data)
                .with_context(|| format!("Raw datum in {} is malformed", locator))
        }
    }
}

/// The `stack_size` frames of one training item, stored under a single key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatumGroup {
    pub data: Vec<Datum>,
}

impl DatumGroup {
    pub fn new(data: Vec<Datum>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Label of the first frame, which labels the whole group.
    pub fn label(&self) -> Option<i32> {
        self.data.first().map(|d| d.label)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).context("Failed to serialize datum group")
    }

    /// Deserializes a record value; `key` names the record in errors.
    pub fn from_bytes(bytes: &[u8], key: &str) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| {
            FeedError::Decode {
                locator: key.to_string(),
                reason: format!("not a datum group record: {}", e),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_record_round_trip() -> Result<()> {
        let raster = Raster::new(2, 3, 3, (0..18).collect())?;
        let group = DatumGroup::new(vec![
            Datum::from_raster(4, &raster)?,
            Datum::from_raster_png(5, &raster)?,
        ]);
        let restored = DatumGroup::from_bytes(&group.to_bytes()?, "k0")?;
        assert_eq!(restored, group);
        assert_eq!(restored.label(), Some(4));

        assert_eq!(restored.data[0].to_raster(false, "k0")?, raster);
        assert_eq!(restored.data[1].to_raster(true, "k0")?, raster);
        Ok(())
    }

    #[test]
    fn test_corrupt_record() {
        let err = DatumGroup::from_bytes(&[0xff, 0x01], "key-9").unwrap_err();
        assert!(matches!(
            FeedError::kind_of(&err),
            Some(FeedError::Decode { locator, .. }) if locator == "key-9"
        ));
    }

    #[test]
    fn test_raw_payload_size_checked() {
        let datum = Datum::raw(0, 3, 2, 2, vec![0; 5]);
        let err = datum.to_raster(false, "k").unwrap_err();
        assert!(matches!(
            FeedError::kind_of(&err),
            Some(FeedError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_corrupt_raw_dims() {
        let datum = Datum::raw(0, 3, usize::MAX / 2, 4, vec![0; 12]);
        let err = datum.to_raster(false, "key-x").unwrap_err();
        assert!(format!("{:#}", err).contains("key-x"));
        assert!(matches!(
            FeedError::kind_of(&err),
            Some(FeedError::ShapeMismatch { .. })
        ));
    }
}
