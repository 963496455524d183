use image::imageops::{self, FilterType};
use image::GrayImage;
use imageproc::template_matching::{find_extremes, match_template, MatchTemplateMethod};

use crate::geometry::{MatchedRegion, Region};

/// Tuning for one localization pass.
#[derive(Debug, Clone)]
pub struct LocateParams {
    /// Minimum normalized cross-correlation score for a scale to count.
    pub threshold: f32,
    pub scale_min: f64,
    pub scale_max: f64,
    pub scale_steps: u32,
}

impl Default for LocateParams {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            scale_min: 0.5,
            scale_max: 1.5,
            scale_steps: 20,
        }
    }
}

impl LocateParams {
    pub fn with_threshold(threshold: f32) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }
}

/// Evenly spaced scale factors, largest first.
fn scale_sweep(params: &LocateParams) -> Vec<f64> {
    let steps = params.scale_steps.max(1);
    if steps == 1 {
        return vec![params.scale_max];
    }
    let span = params.scale_max - params.scale_min;
    (0..steps)
        .map(|i| params.scale_min + span * i as f64 / (steps - 1) as f64)
        .rev()
        .collect()
}

/// Find the best-matching rectangle for `template` inside `frame`, optionally
/// restricted to `search`, across a range of template scales.
///
/// At most one match is recorded per sampled scale: the single best-scoring
/// location at that scale, and only if its score clears the threshold. The
/// sweep runs from the largest scale down and stops as soon as the resized
/// template no longer fits the search area. Coordinates of matches are in
/// full-frame space. An empty result is not an error; the caller decides
/// whether that is fatal.
pub fn locate(
    frame: &GrayImage,
    template: &GrayImage,
    search: Option<Region>,
    params: &LocateParams,
) -> Vec<MatchedRegion> {
    let bounds = search.map(|r| r.clamped_to(frame.width(), frame.height()));
    if bounds.map(|b| b.is_empty()).unwrap_or(false) {
        return Vec::new();
    }

    let haystack = match bounds {
        Some(b) => imageops::crop_imm(frame, b.x, b.y, b.w, b.h).to_image(),
        None => frame.clone(),
    };
    let (off_x, off_y) = bounds.map(|b| (b.x, b.y)).unwrap_or((0, 0));

    let mut matches = Vec::new();
    for scale in scale_sweep(params) {
        let w = ((template.width() as f64 * scale).round() as u32).max(1);
        let h = ((template.height() as f64 * scale).round() as u32).max(1);
        if w > haystack.width() || h > haystack.height() {
            break;
        }

        let resized = imageops::resize(template, w, h, FilterType::Triangle);
        let scores = match_template(
            &haystack,
            &resized,
            MatchTemplateMethod::CrossCorrelationNormalized,
        );
        let extremes = find_extremes(&scores);
        if extremes.max_value >= params.threshold {
            let (mx, my) = extremes.max_value_location;
            matches.push(MatchedRegion {
                region: Region::new(mx + off_x, my + off_y, w, h),
                scale,
            });
        }
    }
    matches
}

/// Tie-break when several instances of a landmark are plausible: the
/// canonical one is nearest the top of the window chrome.
pub fn topmost(matches: Vec<MatchedRegion>) -> Option<MatchedRegion> {
    matches.into_iter().min_by_key(|m| m.region.y)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Horizontal stripes everywhere, with one patch of vertical stripes.
    /// The two patterns correlate weakly, so only the patch clears 0.8.
    fn striped_frame(w: u32, h: u32, patch: Option<Region>) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let inside = patch
                .map(|p| x >= p.x && x < p.x + p.w && y >= p.y && y < p.y + p.h)
                .unwrap_or(false);
            let on = if inside {
                (x / 4) % 2 == 0
            } else {
                (y / 4) % 2 == 0
            };
            image::Luma([if on { 255u8 } else { 0 }])
        })
    }

    fn vertical_stripe_template(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, _| {
            image::Luma([if (x / 4) % 2 == 0 { 255u8 } else { 0 }])
        })
    }

    fn test_params() -> LocateParams {
        // Sweep [1.5, 1.0, 0.5] so the native scale is on the grid.
        LocateParams {
            threshold: 0.8,
            scale_min: 0.5,
            scale_max: 1.5,
            scale_steps: 3,
        }
    }

    #[test]
    fn finds_embedded_template_at_native_scale() {
        let target = Region::new(24, 16, 16, 16);
        let frame = striped_frame(80, 64, Some(target));
        let template = vertical_stripe_template(16, 16);

        let matches = locate(&frame, &template, None, &test_params());
        let native: Vec<_> = matches.iter().filter(|m| m.scale == 1.0).collect();
        assert_eq!(native.len(), 1, "one match per sampled scale");
        assert_eq!(native[0].region, target);
    }

    #[test]
    fn at_most_one_match_per_scale() {
        let target = Region::new(24, 16, 16, 16);
        let frame = striped_frame(80, 64, Some(target));
        let template = vertical_stripe_template(16, 16);

        let matches = locate(&frame, &template, None, &test_params());
        let mut scales: Vec<f64> = matches.iter().map(|m| m.scale).collect();
        let before = scales.len();
        scales.dedup();
        assert_eq!(before, scales.len());
        assert!(before <= 3);
    }

    #[test]
    fn empty_when_no_scale_clears_threshold() {
        let frame = striped_frame(80, 64, None);
        let template = vertical_stripe_template(16, 16);
        let matches = locate(&frame, &template, None, &test_params());
        assert!(matches.is_empty());
    }

    #[test]
    fn subregion_matches_come_back_in_frame_coordinates() {
        let target = Region::new(40, 24, 16, 16);
        let frame = striped_frame(96, 64, Some(target));
        let template = vertical_stripe_template(16, 16);

        let search = Region::new(32, 16, 48, 40);
        let matches = locate(&frame, &template, Some(search), &test_params());
        let best = matches.iter().find(|m| m.scale == 1.0).expect("native match");
        assert_eq!(best.region, target);
    }

    #[test]
    fn sweep_stops_once_the_template_outgrows_the_search_area() {
        // Origin on the 8px stripe period, so the patch is in phase with
        // the template.
        let target = Region::new(8, 8, 16, 16);
        let frame = striped_frame(80, 64, Some(target));
        let template = vertical_stripe_template(16, 16);

        // 18x18 search area: the 24x24 resize at 1.5x does not fit, so the
        // sweep never starts.
        let search = Region::new(3, 3, 18, 18);
        let matches = locate(&frame, &template, Some(search), &test_params());
        assert!(matches.is_empty());

        // A search area that admits the largest scale still finds the patch.
        let search = Region::new(0, 0, 40, 40);
        let matches = locate(&frame, &template, Some(search), &test_params());
        assert!(matches.iter().any(|m| m.region == target));
    }

    #[test]
    fn topmost_prefers_the_smallest_y() {
        let a = MatchedRegion {
            region: Region::new(10, 50, 5, 5),
            scale: 1.0,
        };
        let b = MatchedRegion {
            region: Region::new(80, 8, 5, 5),
            scale: 0.9,
        };
        assert_eq!(topmost(vec![a, b.clone()]), Some(b));
        assert_eq!(topmost(Vec::new()), None);
    }
}
