//! Placement geometry for crops and composites.
//!
//! All functions here are pure and clamp instead of failing: whatever the
//! inputs, the returned `(left, top)` keeps the inner rectangle inside the
//! outer one, or pins it to 0 when the inner rectangle is larger.
//!
//! ## Resize coupling
//!
//! [`resolve_focal`] maps a focal point through the same scale factor the
//! resize step used. Both sides call [`shrink_factor`], so changing the
//! resize policy means changing that one function.

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// One of nine fixed anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Position {
    TopLeft,
    Top,
    TopRight,
    Left,
    #[default]
    Centre,
    Right,
    BottomLeft,
    Bottom,
    BottomRight,
}

impl Position {
    pub const ALL: [Position; 9] = [
        Position::TopLeft,
        Position::Top,
        Position::TopRight,
        Position::Left,
        Position::Centre,
        Position::Right,
        Position::BottomLeft,
        Position::Bottom,
        Position::BottomRight,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Position::TopLeft => "top-left",
            Position::Top => "top",
            Position::TopRight => "top-right",
            Position::Left => "left",
            Position::Centre => "centre",
            Position::Right => "right",
            Position::BottomLeft => "bottom-left",
            Position::Bottom => "bottom",
            Position::BottomRight => "bottom-right",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Position {
    type Err = Infallible;

    /// Accepts the kebab-case names plus `center` and the compass
    /// shorthands (`n`, `ne`, `e`, ...). Anything else is `Centre`.
    fn from_str(s: &str) -> Result<Self, Infallible> {
        let pos = match s.to_ascii_lowercase().as_str() {
            "top-left" | "nw" => Position::TopLeft,
            "top" | "n" => Position::Top,
            "top-right" | "ne" => Position::TopRight,
            "left" | "w" => Position::Left,
            "centre" | "center" => Position::Centre,
            "right" | "e" => Position::Right,
            "bottom-left" | "sw" => Position::BottomLeft,
            "bottom" | "s" => Position::Bottom,
            "bottom-right" | "se" => Position::BottomRight,
            other => {
                log::debug!("unknown position '{other}', using centre");
                Position::Centre
            }
        };
        Ok(pos)
    }
}

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn bottom(&self) -> u32 {
        self.top + self.height
    }

    /// Non-empty and entirely inside a `width`x`height` image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.left.checked_add(self.width).is_some_and(|r| r <= width)
            && self.top.checked_add(self.height).is_some_and(|b| b <= height)
    }
}

/// Clamp a raw offset into `[0, space]`, or to 0 when there is no space.
fn clamp_offset(offset: i64, space: i64) -> u32 {
    offset.clamp(0, space.max(0)) as u32
}

/// Calculate where an `in_w`x`in_h` rectangle sits inside an `out_w`x`out_h`
/// one for the given anchor.
///
/// Centred axes use truncating integer division, so odd leftovers go to the
/// right/bottom side.
///
/// ```
/// # use imgserve::geometry::{Position, resolve_anchor};
/// assert_eq!(resolve_anchor(100, 50, 200, 100, Position::Centre), (50, 25));
/// assert_eq!(resolve_anchor(100, 50, 200, 100, Position::BottomRight), (100, 50));
/// ```
pub fn resolve_anchor(in_w: u32, in_h: u32, out_w: u32, out_h: u32, pos: Position) -> (u32, u32) {
    let dx = i64::from(out_w) - i64::from(in_w);
    let dy = i64::from(out_h) - i64::from(in_h);

    let (left, top) = match pos {
        Position::TopLeft => (0, 0),
        Position::Top => (dx / 2, 0),
        Position::TopRight => (dx, 0),
        Position::Left => (0, dy / 2),
        Position::Centre => (dx / 2, dy / 2),
        Position::Right => (dx, dy / 2),
        Position::BottomLeft => (0, dy),
        Position::Bottom => (dx / 2, dy),
        Position::BottomRight => (dx, dy),
    };

    (clamp_offset(left, dx), clamp_offset(top, dy))
}

/// Scale-down ratio of a cover resize from `in` to `target`.
///
/// The smaller of the two axis ratios, so the resized image covers the
/// target on both axes. Degenerate sizes yield `1.0`.
pub fn shrink_factor(in_w: u32, in_h: u32, target_w: u32, target_h: u32) -> f64 {
    let ratio_x = f64::from(in_w) / f64::from(target_w);
    let ratio_y = f64::from(in_h) / f64::from(target_h);
    let factor = ratio_x.min(ratio_y);
    if factor.is_finite() && factor > 0.0 {
        factor
    } else {
        1.0
    }
}

/// Size of `in_w`x`in_h` after shrinking by `factor`, at least 1x1.
pub fn cover_dimensions(in_w: u32, in_h: u32, factor: f64) -> (u32, u32) {
    let scale = |v: u32| ((f64::from(v) / factor).round() as u32).max(1);
    (scale(in_w), scale(in_h))
}

/// Fill in a missing target side from the source aspect ratio.
///
/// Returns `None` when neither side is requested.
pub fn fit_target(
    in_w: u32,
    in_h: u32,
    width: Option<u32>,
    height: Option<u32>,
) -> Option<(u32, u32)> {
    let scaled = |num: u32, of: u32, by: u32| {
        ((f64::from(num) * f64::from(of) / f64::from(by.max(1))).round() as u32).max(1)
    };
    match (width, height) {
        (Some(w), Some(h)) => Some((w.max(1), h.max(1))),
        (Some(w), None) => Some((w.max(1), scaled(w, in_h, in_w))),
        (None, Some(h)) => Some((scaled(h, in_w, in_h), h.max(1))),
        (None, None) => None,
    }
}

/// Calculate the top-left of a `target` window that keeps a focal point
/// centred, inside an `image_w`x`image_h` image that was cover-resized from
/// `in_w`x`in_h`.
///
/// `fpx`/`fpy` are normalised (0–1) coordinates on the original image and
/// are clamped to that range.
#[allow(clippy::too_many_arguments)]
pub fn resolve_focal(
    fpx: f32,
    fpy: f32,
    in_w: u32,
    in_h: u32,
    target_w: u32,
    target_h: u32,
    image_w: u32,
    image_h: u32,
) -> (u32, u32) {
    let factor = shrink_factor(in_w, in_h, target_w, target_h);

    let center_x = f64::from(fpx.clamp(0.0, 1.0) * in_w as f32) / factor;
    let center_y = f64::from(fpy.clamp(0.0, 1.0) * in_h as f32) / factor;

    let left = (center_x - f64::from(target_w) / 2.0).round() as i64;
    let top = (center_y - f64::from(target_h) / 2.0).round() as i64;

    (
        clamp_offset(left, i64::from(image_w) - i64::from(target_w)),
        clamp_offset(top, i64::from(image_h) - i64::from(target_h)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // resolve_anchor
    // =========================================================================

    #[test]
    fn anchor_table() {
        let r = |pos| resolve_anchor(100, 50, 200, 100, pos);
        assert_eq!(r(Position::TopLeft), (0, 0));
        assert_eq!(r(Position::Top), (50, 0));
        assert_eq!(r(Position::TopRight), (100, 0));
        assert_eq!(r(Position::Left), (0, 25));
        assert_eq!(r(Position::Centre), (50, 25));
        assert_eq!(r(Position::Right), (100, 25));
        assert_eq!(r(Position::BottomLeft), (0, 50));
        assert_eq!(r(Position::Bottom), (50, 50));
        assert_eq!(r(Position::BottomRight), (100, 50));
    }

    #[test]
    fn anchor_odd_space_truncates() {
        // 101 spare columns, 7 spare rows
        assert_eq!(resolve_anchor(100, 50, 201, 57, Position::Centre), (50, 3));
    }

    #[test]
    fn anchor_always_in_bounds() {
        let sizes = [(1, 1), (10, 3), (99, 100), (640, 480)];
        for &(in_w, in_h) in &sizes {
            for &(extra_w, extra_h) in &[(0, 0), (1, 1), (7, 2), (500, 333)] {
                let (out_w, out_h) = (in_w + extra_w, in_h + extra_h);
                for pos in Position::ALL {
                    let (left, top) = resolve_anchor(in_w, in_h, out_w, out_h, pos);
                    assert!(left <= out_w - in_w, "{pos} left {left}");
                    assert!(top <= out_h - in_h, "{pos} top {top}");
                }
            }
        }
    }

    #[test]
    fn anchor_inner_larger_than_outer_pins_to_zero() {
        for pos in Position::ALL {
            assert_eq!(resolve_anchor(300, 200, 100, 100, pos), (0, 0));
        }
    }

    #[test]
    fn position_parsing() {
        assert_eq!("center".parse::<Position>().unwrap(), Position::Centre);
        assert_eq!("Bottom-Right".parse::<Position>().unwrap(), Position::BottomRight);
        assert_eq!("ne".parse::<Position>().unwrap(), Position::TopRight);
        assert_eq!("middle".parse::<Position>(), Ok(Position::Centre));
        assert_eq!("".parse::<Position>(), Ok(Position::Centre));
        assert_eq!(Position::default(), Position::Centre);
    }

    // =========================================================================
    // resolve_focal
    // =========================================================================

    #[test]
    fn focal_centre_of_landscape() {
        // 1000x500 → cover 200x200: factor 2.5, resized 400x200
        let (left, top) = resolve_focal(0.5, 0.5, 1000, 500, 200, 200, 400, 200);
        assert_eq!((left, top), (100, 0));
    }

    #[test]
    fn focal_point_near_edge_is_clamped() {
        assert_eq!(resolve_focal(0.0, 0.0, 1000, 500, 200, 200, 400, 200), (0, 0));
        assert_eq!(resolve_focal(1.0, 1.0, 1000, 500, 200, 200, 400, 200), (200, 0));
    }

    #[test]
    fn focal_off_centre() {
        // 800x800 → 100x100: factor 8; 0.25 * 800 / 8 = 25 → 25 - 50 → clamped 0
        assert_eq!(resolve_focal(0.25, 0.75, 800, 800, 100, 100, 100, 100), (0, 0));
        // 800x400 → 100x100: factor 4, resized 200x100; 0.75*800/4 = 150 → 100
        assert_eq!(resolve_focal(0.75, 0.5, 800, 400, 100, 100, 200, 100), (100, 0));
    }

    #[test]
    fn focal_always_in_bounds() {
        let steps = [0.0f32, 0.1, 0.33, 0.5, 0.66, 0.9, 1.0];
        let cases = [(1000, 500, 200, 200), (300, 900, 120, 80), (640, 480, 640, 480)];
        for &(in_w, in_h, tw, th) in &cases {
            let (iw, ih) = cover_dimensions(in_w, in_h, shrink_factor(in_w, in_h, tw, th));
            for &fx in &steps {
                for &fy in &steps {
                    let (left, top) = resolve_focal(fx, fy, in_w, in_h, tw, th, iw, ih);
                    assert!(left <= iw.saturating_sub(tw), "left {left} for {fx},{fy}");
                    assert!(top <= ih.saturating_sub(th), "top {top} for {fx},{fy}");
                }
            }
        }
    }

    #[test]
    fn focal_out_of_range_inputs_are_clamped() {
        assert_eq!(
            resolve_focal(-3.0, 7.5, 1000, 500, 200, 200, 400, 200),
            resolve_focal(0.0, 1.0, 1000, 500, 200, 200, 400, 200)
        );
    }

    // =========================================================================
    // Resize helpers
    // =========================================================================

    #[test]
    fn shrink_factor_picks_smaller_ratio() {
        assert_eq!(shrink_factor(1000, 500, 200, 200), 2.5);
        assert_eq!(shrink_factor(500, 1000, 200, 200), 2.5);
        assert_eq!(shrink_factor(100, 100, 0, 0), 1.0);
    }

    #[test]
    fn cover_dimensions_cover_target() {
        let factor = shrink_factor(1000, 500, 200, 200);
        assert_eq!(cover_dimensions(1000, 500, factor), (400, 200));
    }

    #[test]
    fn rect_fits_within() {
        assert!(Rect::new(0, 0, 10, 10).fits_within(10, 10));
        assert!(Rect::new(5, 2, 5, 8).fits_within(10, 10));
        assert!(!Rect::new(6, 0, 5, 10).fits_within(10, 10));
        assert!(!Rect::new(0, 0, 0, 10).fits_within(10, 10));
        assert!(!Rect::new(0, u32::MAX, 1, 1).fits_within(10, 10));
    }

    #[test]
    fn fit_target_derives_missing_side() {
        assert_eq!(fit_target(800, 600, Some(400), None), Some((400, 300)));
        assert_eq!(fit_target(800, 600, None, Some(150)), Some((200, 150)));
        assert_eq!(fit_target(800, 600, Some(10), Some(20)), Some((10, 20)));
        assert_eq!(fit_target(800, 600, None, None), None);
    }
}
