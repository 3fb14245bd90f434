//! Full-screen capture of the primary monitor.
//!
//! On macOS the process needs Screen Recording permission
//! (System Settings > Privacy & Security).

use anyhow::{bail, Context, Result};
use image::{DynamicImage, RgbImage};
use xcap::Monitor;

pub fn capture_screen() -> Result<RgbImage> {
    let monitors = Monitor::all().context("failed to enumerate monitors")?;
    let primary = monitors
        .first()
        .cloned()
        .context("no monitors available")?;
    let frame = primary
        .capture_image()
        .context("failed to capture the screen")?;
    let image = DynamicImage::ImageRgba8(frame).to_rgb8();
    if image.width() == 0 || image.height() == 0 {
        bail!("captured an empty frame; check screen recording permissions");
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::capture_screen;

    #[test]
    #[ignore = "requires a graphical display and screen recording permission"]
    fn captures_a_nonempty_frame() {
        let frame = capture_screen().expect("capture failed");
        assert!(frame.width() > 0 && frame.height() > 0);
    }
}
