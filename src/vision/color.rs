use image::RgbaImage;

use crate::geometry::Region;

// Hue bands (degrees) that read as the raised-hand overlay red, with floors
// on saturation and value so dark or washed-out pixels don't count.
const LOW_HUE_MAX: f32 = 20.0;
const HIGH_HUE_MIN: f32 = 320.0;
const MIN_SATURATION: f32 = 0.39;
const MIN_VALUE: f32 = 0.39;

/// True if any pixel of `region` falls inside the reddish hue cluster.
pub fn contains_reddish(frame: &RgbaImage, region: Region) -> bool {
    let r = region.clamped_to(frame.width(), frame.height());
    for y in r.y..r.y + r.h {
        for x in r.x..r.x + r.w {
            let p = frame.get_pixel(x, y);
            let (hue, sat, val) = rgb_to_hsv(p[0], p[1], p[2]);
            if sat >= MIN_SATURATION
                && val >= MIN_VALUE
                && (hue <= LOW_HUE_MAX || hue >= HIGH_HUE_MIN)
            {
                return true;
            }
        }
    }
    false
}

fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let r = r as f32 / 255.0;
    let g = g as f32 / 255.0;
    let b = b as f32 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let sat = if max == 0.0 { 0.0 } else { delta / max };
    (hue, sat, max)
}
