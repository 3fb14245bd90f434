//! Anchor location: normalized-correlation template matching of the two
//! marker images over a full-screen frame, and derivation of the capture
//! rectangle from the winning matches.

use std::fmt;
use std::path::Path;

use anyhow::Context;
use image::RgbImage;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("no match for the {0} marker on screen")]
    MarkerNotFound(MarkerRole),
    #[error("markers produce a degenerate region (left={left}, top={top}, right={right}, bottom={bottom})")]
    InvalidRegion {
        left: u32,
        top: u32,
        right: u32,
        bottom: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerRole {
    LeftAnchor,
    RightAnchor,
}

impl fmt::Display for MarkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerRole::LeftAnchor => write!(f, "left-anchor"),
            MarkerRole::RightAnchor => write!(f, "right-anchor"),
        }
    }
}

/// A template image anchoring one corner of the capture region.
#[derive(Debug, Clone)]
pub struct Marker {
    pub role: MarkerRole,
    pub image: RgbImage,
}

impl Marker {
    pub fn load(role: MarkerRole, path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("failed to load {role} marker from {}", path.display()))?
            .to_rgb8();
        Ok(Self { role, image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// All template top-left coordinates whose correlation score cleared the
/// threshold, in row-major scan order (ascending y, then ascending x).
#[derive(Debug, Clone, Default)]
pub struct MatchSet {
    points: Vec<(u32, u32)>,
}

impl MatchSet {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn points(&self) -> &[(u32, u32)] {
        &self.points
    }

    /// The match with the smallest y, smallest x among ties. Scan order
    /// makes this the first recorded point.
    pub fn topmost_leftmost(&self) -> Option<(u32, u32)> {
        self.points.first().copied()
    }

    /// Among matches sharing the globally smallest y, the one with the
    /// largest x. The tie-break is literal: disjoint clusters sharing the
    /// top row still resolve to the global maximum x.
    pub fn top_row_rightmost(&self) -> Option<(u32, u32)> {
        let top_y = self.points.first()?.1;
        self.points
            .iter()
            .copied()
            .take_while(|&(_, y)| y == top_y)
            .max_by_key(|&(x, _)| x)
    }
}

/// The rectangle between the two anchors, in screen pixel coordinates.
/// Invariant: `left < right && top < bottom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRegion {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl CaptureRegion {
    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }
}

/// Scores `template` against every valid position in `screen` with zero-mean
/// normalized cross-correlation over luma, keeping positions scoring at or
/// above `threshold`. Flat templates and flat windows cannot correlate and
/// never match.
pub fn match_template(screen: &RgbImage, template: &RgbImage, threshold: f64) -> MatchSet {
    let (screen_w, screen_h) = screen.dimensions();
    let (tmpl_w, tmpl_h) = template.dimensions();
    if tmpl_w == 0 || tmpl_h == 0 || tmpl_w > screen_w || tmpl_h > screen_h {
        return MatchSet::default();
    }

    let screen_px = to_luma(screen);
    let tmpl_px = to_luma(template);
    let n = f64::from(tmpl_w * tmpl_h);

    let tmpl_mean = tmpl_px.iter().sum::<f64>() / n;
    let tmpl_centered: Vec<f64> = tmpl_px.iter().map(|value| value - tmpl_mean).collect();
    let tmpl_norm = tmpl_centered
        .iter()
        .map(|value| value * value)
        .sum::<f64>()
        .sqrt();
    if tmpl_norm <= 1e-6 {
        return MatchSet::default();
    }

    // Integral images give each window's sum and sum of squares in O(1).
    let (integral, integral_sq) = integrals(&screen_px, screen_w as usize, screen_h as usize);

    let mut points = Vec::new();
    for y in 0..=(screen_h - tmpl_h) {
        for x in 0..=(screen_w - tmpl_w) {
            let (w_sum, w_sum_sq) = window_sums(
                &integral,
                &integral_sq,
                screen_w as usize,
                x as usize,
                y as usize,
                tmpl_w as usize,
                tmpl_h as usize,
            );
            // Cancellation in the summed-area lookups leaves flat windows
            // with a tiny residue, sometimes negative; treat anything that
            // small as flat.
            let w_var = w_sum_sq - w_sum * w_sum / n;
            if w_var <= 1e-6 {
                continue;
            }

            // The template is zero-mean, so correlating it against raw
            // window pixels already subtracts the window mean.
            let mut cross = 0.0;
            for ty in 0..tmpl_h {
                let screen_row = ((y + ty) * screen_w + x) as usize;
                let tmpl_row = (ty * tmpl_w) as usize;
                for tx in 0..tmpl_w as usize {
                    cross += tmpl_centered[tmpl_row + tx] * screen_px[screen_row + tx];
                }
            }

            let score = cross / (tmpl_norm * w_var.sqrt());
            if score >= threshold {
                points.push((x, y));
            }
        }
    }

    MatchSet { points }
}

/// Derives the capture rectangle from the two markers' match sets: the
/// region starts after the left marker (its bottom-right corner) and runs to
/// the right marker's top-row rightmost match (its top-right corner).
pub fn locate_region(
    screen: &RgbImage,
    left_marker: &Marker,
    right_marker: &Marker,
    threshold: f64,
) -> Result<CaptureRegion, CaptureError> {
    let left_matches = match_template(screen, &left_marker.image, threshold);
    let (left_x, left_y) = left_matches
        .topmost_leftmost()
        .ok_or(CaptureError::MarkerNotFound(left_marker.role))?;

    let right_matches = match_template(screen, &right_marker.image, threshold);
    let (right_x, right_y) = right_matches
        .top_row_rightmost()
        .ok_or(CaptureError::MarkerNotFound(right_marker.role))?;

    let left = left_x + left_marker.width();
    let top = left_y + left_marker.height();
    let right = right_x + right_marker.width();
    let bottom = right_y;

    if right <= left || bottom <= top {
        return Err(CaptureError::InvalidRegion {
            left,
            top,
            right,
            bottom,
        });
    }

    Ok(CaptureRegion {
        left,
        top,
        right,
        bottom,
    })
}

fn to_luma(image: &RgbImage) -> Vec<f64> {
    image
        .pixels()
        .map(|pixel| {
            0.299 * f64::from(pixel.0[0])
                + 0.587 * f64::from(pixel.0[1])
                + 0.114 * f64::from(pixel.0[2])
        })
        .collect()
}

/// Summed-area tables over luma and squared luma, one row/column of padding
/// on the top and left.
fn integrals(pixels: &[f64], width: usize, height: usize) -> (Vec<f64>, Vec<f64>) {
    let stride = width + 1;
    let mut integral = vec![0.0; stride * (height + 1)];
    let mut integral_sq = vec![0.0; stride * (height + 1)];
    for y in 0..height {
        let mut row_sum = 0.0;
        let mut row_sum_sq = 0.0;
        for x in 0..width {
            let value = pixels[y * width + x];
            row_sum += value;
            row_sum_sq += value * value;
            integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row_sum;
            integral_sq[(y + 1) * stride + x + 1] = integral_sq[y * stride + x + 1] + row_sum_sq;
        }
    }
    (integral, integral_sq)
}

#[allow(clippy::too_many_arguments)]
fn window_sums(
    integral: &[f64],
    integral_sq: &[f64],
    width: usize,
    x: usize,
    y: usize,
    window_w: usize,
    window_h: usize,
) -> (f64, f64) {
    let stride = width + 1;
    let corner = |table: &[f64]| {
        table[(y + window_h) * stride + x + window_w] + table[y * stride + x]
            - table[y * stride + x + window_w]
            - table[(y + window_h) * stride + x]
    };
    (corner(integral), corner(integral_sq))
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::{locate_region, match_template, CaptureError, Marker, MarkerRole};

    /// Deterministic noise so correlation peaks only where a template is
    /// actually pasted; the hash avalanches, so shifted copies decorrelate.
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

    fn flat_screen(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([128, 128, 128]))
    }

    fn paste(screen: &mut RgbImage, template: &RgbImage, at_x: u32, at_y: u32) {
        for (x, y, pixel) in template.enumerate_pixels() {
            screen.put_pixel(at_x + x, at_y + y, *pixel);
        }
    }

    fn marker(role: MarkerRole, image: RgbImage) -> Marker {
        Marker { role, image }
    }

    #[test]
    fn exact_template_position_scores_a_match() {
        let template = noise_template(8, 8, 1);
        let mut screen = flat_screen(64, 48);
        paste(&mut screen, &template, 20, 10);

        let matches = match_template(&screen, &template, 0.8);
        assert_eq!(matches.topmost_leftmost(), Some((20, 10)));
    }

    #[test]
    fn flat_screen_never_matches() {
        let template = noise_template(8, 8, 1);
        let screen = flat_screen(64, 48);
        assert!(match_template(&screen, &template, 0.8).is_empty());
    }

    #[test]
    fn oversized_template_yields_no_matches() {
        let template = noise_template(100, 100, 1);
        let screen = flat_screen(64, 48);
        assert!(match_template(&screen, &template, 0.8).is_empty());
    }

    #[test]
    fn topmost_leftmost_prefers_smallest_y_then_x() {
        let template = noise_template(8, 8, 1);
        let mut screen = flat_screen(96, 96);
        paste(&mut screen, &template, 40, 16);
        paste(&mut screen, &template, 10, 16);
        paste(&mut screen, &template, 2, 60);

        let matches = match_template(&screen, &template, 0.8);
        assert_eq!(matches.len(), 3);
        assert_eq!(matches.topmost_leftmost(), Some((10, 16)));
    }

    #[test]
    fn top_row_rightmost_ignores_lower_rows() {
        let template = noise_template(8, 8, 2);
        let mut screen = flat_screen(128, 96);
        paste(&mut screen, &template, 30, 20);
        paste(&mut screen, &template, 90, 20);
        paste(&mut screen, &template, 110, 50);

        let matches = match_template(&screen, &template, 0.8);
        assert_eq!(matches.top_row_rightmost(), Some((90, 20)));
    }

    #[test]
    fn locate_derives_the_between_anchor_rectangle() {
        let left_template = noise_template(8, 8, 1);
        let right_template = noise_template(6, 6, 2);
        let mut screen = flat_screen(200, 120);
        paste(&mut screen, &left_template, 10, 20);
        paste(&mut screen, &right_template, 150, 60);

        let region = locate_region(
            &screen,
            &marker(MarkerRole::LeftAnchor, left_template),
            &marker(MarkerRole::RightAnchor, right_template),
            0.8,
        )
        .expect("both anchors present");

        assert_eq!(region.left, 18);
        assert_eq!(region.top, 28);
        assert_eq!(region.right, 156);
        assert_eq!(region.bottom, 60);
        assert!(region.left < region.right && region.top < region.bottom);
    }

    #[test]
    fn locate_is_deterministic() {
        let left_template = noise_template(8, 8, 1);
        let right_template = noise_template(6, 6, 2);
        let mut screen = flat_screen(200, 120);
        paste(&mut screen, &left_template, 10, 20);
        paste(&mut screen, &right_template, 150, 60);

        let left = marker(MarkerRole::LeftAnchor, left_template);
        let right = marker(MarkerRole::RightAnchor, right_template);
        let first = locate_region(&screen, &left, &right, 0.8).expect("anchors present");
        let second = locate_region(&screen, &left, &right, 0.8).expect("anchors present");
        assert_eq!(first, second);
    }

    #[test]
    fn missing_marker_is_marker_not_found() {
        let left_template = noise_template(8, 8, 1);
        let right_template = noise_template(6, 6, 2);
        let mut screen = flat_screen(200, 120);
        paste(&mut screen, &left_template, 10, 20);

        let err = locate_region(
            &screen,
            &marker(MarkerRole::LeftAnchor, left_template),
            &marker(MarkerRole::RightAnchor, right_template),
            0.8,
        )
        .expect_err("right anchor absent");
        assert!(matches!(
            err,
            CaptureError::MarkerNotFound(MarkerRole::RightAnchor)
        ));
    }

    #[test]
    fn inverted_anchor_layout_is_invalid_region() {
        let left_template = noise_template(8, 8, 1);
        let right_template = noise_template(6, 6, 2);
        let mut screen = flat_screen(200, 120);
        // Right anchor above the left anchor's bottom edge: negative span.
        paste(&mut screen, &left_template, 10, 60);
        paste(&mut screen, &right_template, 150, 10);

        let err = locate_region(
            &screen,
            &marker(MarkerRole::LeftAnchor, left_template),
            &marker(MarkerRole::RightAnchor, right_template),
            0.8,
        )
        .expect_err("bottom edge above top edge");
        assert!(matches!(err, CaptureError::InvalidRegion { .. }));
    }
}
