//! Change detection against the single on-disk cached frame. The gate is
//! advisory: any trouble reading the cache reports "changed" so the
//! pipeline keeps moving.

use std::path::{Path, PathBuf};

use anyhow::Context;
use image::RgbImage;

/// Captures differing by fewer pixels than this are treated as unchanged.
pub const DEFAULT_PIXEL_THRESHOLD: u32 = 500;

#[derive(Debug, Clone)]
pub struct ChangeGate {
    cache_path: PathBuf,
    pixel_threshold: u32,
}

impl ChangeGate {
    pub fn new(cache_path: impl Into<PathBuf>, pixel_threshold: u32) -> Self {
        Self {
            cache_path: cache_path.into(),
            pixel_threshold,
        }
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// True when the region should go through the pipeline: no cached frame
    /// yet, cache unreadable, dimensions differ, or enough pixels moved.
    pub fn should_process(&self, region: &RgbImage) -> bool {
        let cached = match image::open(&self.cache_path) {
            Ok(cached) => cached.to_rgb8(),
            Err(_) => return true,
        };
        !is_similar(region, &cached, self.pixel_threshold)
    }

    /// Overwrites the cache slot. Called only after a full round-trip
    /// succeeds; the check never writes.
    pub fn commit(&self, region: &RgbImage) -> anyhow::Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        region.save(&self.cache_path).with_context(|| {
            format!(
                "failed to write cached frame to {}",
                self.cache_path.display()
            )
        })
    }
}

/// Pixel-wise absolute difference reduced to a luma magnitude; two
/// equal-sized images are similar when fewer than `pixel_threshold` pixels
/// have a nonzero magnitude. Differently sized images are never similar.
pub fn is_similar(a: &RgbImage, b: &RgbImage, pixel_threshold: u32) -> bool {
    if a.dimensions() != b.dimensions() {
        return false;
    }
    let mut differing: u32 = 0;
    for (pixel_a, pixel_b) in a.pixels().zip(b.pixels()) {
        let dr = i16::from(pixel_a.0[0]).abs_diff(i16::from(pixel_b.0[0]));
        let dg = i16::from(pixel_a.0[1]).abs_diff(i16::from(pixel_b.0[1]));
        let db = i16::from(pixel_a.0[2]).abs_diff(i16::from(pixel_b.0[2]));
        let magnitude =
            (0.299 * f64::from(dr) + 0.587 * f64::from(dg) + 0.114 * f64::from(db)).round() as u32;
        if magnitude > 0 {
            differing += 1;
            if differing >= pixel_threshold {
                return false;
            }
        }
    }
    differing < pixel_threshold
}
