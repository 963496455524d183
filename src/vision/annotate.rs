//! Annotated frame snapshots. A diagnostic side channel, not a contract:
//! matched landmarks in green, cached search offsets in cyan.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::geometry::Region;

pub const MATCH_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);
pub const OFFSET_COLOR: Rgba<u8> = Rgba([0, 255, 255, 255]);

pub fn draw_region(img: &mut RgbaImage, region: Region, color: Rgba<u8>) {
    if region.is_empty() {
        return;
    }
    draw_hollow_rect_mut(
        img,
        Rect::at(region.x as i32, region.y as i32).of_size(region.w, region.h),
        color,
    );
}

/// Write a timestamped snapshot of `frame` with the given rectangles drawn on
/// top. Returns the path it was written to.
pub fn save_snapshot(
    dir: &Path,
    frame: &RgbaImage,
    matches: &[Region],
    offsets: &[Region],
) -> Result<PathBuf> {
    let mut img = frame.clone();
    for r in matches {
        draw_region(&mut img, *r, MATCH_COLOR);
    }
    for r in offsets {
        draw_region(&mut img, *r, OFFSET_COLOR);
    }

    fs::create_dir_all(dir)
        .with_context(|| format!("create debug image dir {}", dir.display()))?;
    let path = dir.join(format!("{}.png", Local::now().format("%Y%m%d%H%M%S%3f")));
    img.save(&path)
        .with_context(|| format!("write debug image {}", path.display()))?;
    Ok(path)
}

/// Remove all previously written snapshots. Best effort.
pub fn clear_snapshots(dir: &Path) {
    let _ = fs::remove_dir_all(dir);
}
