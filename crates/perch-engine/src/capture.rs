//! The anchored capture pipeline: grab the screen, locate the two markers,
//! crop the region between them, and run the change gate.

use std::io::Cursor;
use std::path::PathBuf;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, RgbImage};

use crate::gate::ChangeGate;
use crate::locate::{locate_region, CaptureRegion, Marker, MarkerRole};
use crate::screen;

/// A freshly captured region, held in memory until the driver decides to
/// commit it to the cache slot.
#[derive(Debug, Clone)]
pub struct RegionCapture {
    pub region: CaptureRegion,
    pub image: RgbImage,
    pub png_base64: String,
}

/// Outcome of one capture attempt. "Unchanged" is an expected skip
/// condition, not an error.
#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    Unchanged,
    Changed(RegionCapture),
}

#[derive(Debug, Clone)]
pub struct CapturePipeline {
    left_marker_path: PathBuf,
    right_marker_path: PathBuf,
    match_threshold: f64,
    gate: ChangeGate,
}

impl CapturePipeline {
    pub fn new(
        left_marker_path: impl Into<PathBuf>,
        right_marker_path: impl Into<PathBuf>,
        match_threshold: f64,
        gate: ChangeGate,
    ) -> Self {
        Self {
            left_marker_path: left_marker_path.into(),
            right_marker_path: right_marker_path.into(),
            match_threshold,
            gate,
        }
    }

    pub fn gate(&self) -> &ChangeGate {
        &self.gate
    }

    /// Grabs the primary monitor and runs [`Self::capture_from`] on it.
    pub fn capture(&self) -> Result<CaptureOutcome> {
        let frame = screen::capture_screen()?;
        self.capture_from(&frame)
    }

    /// Locates the anchors on the given frame, crops the region between
    /// them, and checks it against the cached frame. Markers are reloaded
    /// from disk on every attempt so they can be swapped while running.
    pub fn capture_from(&self, frame: &RgbImage) -> Result<CaptureOutcome> {
        let left = Marker::load(MarkerRole::LeftAnchor, &self.left_marker_path)?;
        let right = Marker::load(MarkerRole::RightAnchor, &self.right_marker_path)?;
        let region = locate_region(frame, &left, &right, self.match_threshold)?;
        log::debug!(
            "located capture region ({}, {})-({}, {})",
            region.left,
            region.top,
            region.right,
            region.bottom
        );

        let image = DynamicImage::ImageRgb8(frame.clone())
            .crop_imm(region.left, region.top, region.width(), region.height())
            .to_rgb8();

        if !self.gate.should_process(&image) {
            return Ok(CaptureOutcome::Unchanged);
        }

        let png_base64 = encode_png_base64(&image)?;
        Ok(CaptureOutcome::Changed(RegionCapture {
            region,
            image,
            png_base64,
        }))
    }

    /// Commits a capture to the cache slot, making it the baseline for the
    /// next gate check.
    pub fn commit(&self, capture: &RegionCapture) -> Result<()> {
        self.gate.commit(&capture.image)
    }
}

/// PNG-encodes an image and wraps it in base64 for the `images` field of an
/// inference request.
pub fn encode_png_base64(image: &RgbImage) -> Result<String> {
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Png)
        .context("failed to encode region as PNG")?;
    Ok(BASE64.encode(bytes.into_inner()))
}

/// Base64-encodes an already-encoded image file, for attaching a stored
/// image (a saved region, a reference screenshot) to a request.
pub fn encode_file_base64(path: impl AsRef<std::path::Path>) -> Result<String> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read image file {}", path.display()))?;
    Ok(BASE64.encode(bytes))
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use image::{Rgb, RgbImage};

    use crate::gate::ChangeGate;
    use crate::locate::CaptureError;

    use super::{encode_png_base64, CaptureOutcome, CapturePipeline};

    fn noise_template(width: u32, height: u32, seed: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let mut mixed = x
                .wrapping_add(y.wrapping_mul(0x0100_0193))
                .wrapping_add(seed.wrapping_mul(0x27d4_eb2f));
            mixed = mixed.wrapping_mul(0x9e37_79b9);
            mixed ^= mixed >> 16;
            mixed = mixed.wrapping_mul(0x85eb_ca6b);
            mixed ^= mixed >> 13;
            Rgb([
                (mixed & 0xff) as u8,
                ((mixed >> 8) & 0xff) as u8,
                ((mixed >> 16) & 0xff) as u8,
            ])
        })
    }

    fn paste(frame: &mut RgbImage, template: &RgbImage, at_x: u32, at_y: u32) {
        for (x, y, pixel) in template.enumerate_pixels() {
            frame.put_pixel(at_x + x, at_y + y, *pixel);
        }
    }

    struct Fixture {
        _temp: tempfile::TempDir,
        pipeline: CapturePipeline,
        frame: RgbImage,
    }

    fn fixture() -> Fixture {
        let temp = tempfile::tempdir().expect("tempdir");
        let left = noise_template(8, 8, 1);
        let right = noise_template(6, 6, 2);
        let left_path = temp.path().join("left.png");
        let right_path = temp.path().join("right.png");
        left.save(&left_path).expect("save left marker");
        right.save(&right_path).expect("save right marker");

        let mut frame = RgbImage::from_pixel(200, 120, Rgb([128, 128, 128]));
        paste(&mut frame, &left, 10, 20);
        paste(&mut frame, &right, 150, 60);

        let gate = ChangeGate::new(temp.path().join("cache.png"), 500);
        let pipeline = CapturePipeline::new(left_path, right_path, 0.8, gate);
        Fixture {
            _temp: temp,
            pipeline,
            frame,
        }
    }

    #[test]
    fn first_capture_is_changed_with_the_cropped_region() {
        let fixture = fixture();
        let outcome = fixture
            .pipeline
            .capture_from(&fixture.frame)
            .expect("markers present");
        let capture = match outcome {
            CaptureOutcome::Changed(capture) => capture,
            CaptureOutcome::Unchanged => panic!("no cache yet, must be changed"),
        };
        assert_eq!(capture.image.dimensions(), (156 - 18, 60 - 28));
        assert!(!capture.png_base64.is_empty());
    }

    #[test]
    fn committed_capture_gates_the_next_identical_frame() {
        let fixture = fixture();
        let outcome = fixture
            .pipeline
            .capture_from(&fixture.frame)
            .expect("markers present");
        let CaptureOutcome::Changed(capture) = outcome else {
            panic!("no cache yet, must be changed");
        };
        fixture.pipeline.commit(&capture).expect("commit cache");

        let second = fixture
            .pipeline
            .capture_from(&fixture.frame)
            .expect("markers present");
        assert!(matches!(second, CaptureOutcome::Unchanged));
    }

    #[test]
    fn capture_check_alone_does_not_write_the_cache() {
        let fixture = fixture();
        fixture
            .pipeline
            .capture_from(&fixture.frame)
            .expect("markers present");
        assert!(!fixture.pipeline.gate().cache_path().exists());
    }

    #[test]
    fn marker_absence_surfaces_as_capture_error() {
        let fixture = fixture();
        let blank = RgbImage::from_pixel(200, 120, Rgb([128, 128, 128]));
        let err = fixture
            .pipeline
            .capture_from(&blank)
            .expect_err("no markers on a blank frame");
        assert!(err.downcast_ref::<CaptureError>().is_some());
    }

    #[test]
    fn png_base64_round_trips_to_png_bytes() {
        let image = noise_template(5, 4, 7);
        let encoded = encode_png_base64(&image).expect("encode");
        let bytes = BASE64.decode(encoded).expect("valid base64");
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn file_encoding_base64s_the_raw_bytes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("region.png");
        std::fs::write(&path, b"raw image bytes").expect("write file");
        assert_eq!(
            super::encode_file_base64(&path).expect("encode file"),
            BASE64.encode(b"raw image bytes")
        );
    }
}
