//! Rectangle value type shared by the vision pipeline.

/// Rounds a fractional coordinate to an integer. The default truncates
/// toward zero, which is how crop coordinates are expected to behave.
pub type RoundFn = fn(f64) -> i64;

fn trunc(v: f64) -> i64 {
    v as i64
}

/// An axis-aligned rectangle with a non-negative origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// Where a scaled rectangle is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Center,
    Origin,
}

impl Region {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Build a region from possibly-fractional inputs. A negative origin is
    /// clipped: the dimension shrinks by exactly the overflow and the origin
    /// clamps to zero.
    pub fn from_f64(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self::from_f64_with(trunc, x, y, w, h)
    }

    pub fn from_f64_with(round: RoundFn, x: f64, y: f64, w: f64, h: f64) -> Self {
        let mut xi = round(x);
        let mut yi = round(y);
        let mut wi = round(w);
        let mut hi = round(h);
        if xi < 0 {
            wi += xi;
            xi = 0;
        }
        if yi < 0 {
            hi += yi;
            yi = 0;
        }
        Self {
            x: xi as u32,
            y: yi as u32,
            w: wi.max(0) as u32,
            h: hi.max(0) as u32,
        }
    }

    /// Scale width and height by independent factors. `Anchor::Center` shifts
    /// the origin so the rectangle stays centered on the same point;
    /// `Anchor::Origin` keeps the top-left corner fixed. The result is
    /// clipped like any other constructed region.
    pub fn scaled_by(&self, fx: f64, fy: f64, anchor: Anchor) -> Self {
        let w = self.w as f64 * fx;
        let h = self.h as f64 * fy;
        let (x, y) = match anchor {
            Anchor::Center => (
                self.x as f64 + (self.w as f64 - w) / 2.0,
                self.y as f64 + (self.h as f64 - h) / 2.0,
            ),
            Anchor::Origin => (self.x as f64, self.y as f64),
        };
        Self::from_f64(x, y, w, h)
    }

    /// Intersection with a `frame_w` x `frame_h` frame anchored at (0, 0).
    pub fn clamped_to(&self, frame_w: u32, frame_h: u32) -> Self {
        let x = self.x.min(frame_w);
        let y = self.y.min(frame_h);
        Self {
            x,
            y,
            w: self.w.min(frame_w - x),
            h: self.h.min(frame_h - y),
        }
    }

    pub fn center(&self) -> (u32, u32) {
        (self.x + self.w / 2, self.y + self.h / 2)
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }
}

/// A localized landmark: where it was found and the template-to-frame scale
/// factor that produced the best match.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedRegion {
    pub region: Region,
    pub scale: f64,
}

/// One recognized text token with its bounding box in full-frame coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedText {
    pub region: Region,
    pub text: String,
}
