//! Overlay geometry.
//!
//! Coordinates follow the desktop visible frame: the origin of a rectangle is
//! its bottom-left corner and `y` grows upward, so stacking an overlay
//! "below" another one lowers its `y`.

use serde::{Deserialize, Serialize};

use crate::registry::OverlayId;

pub const OVERLAY_WIDTH: i32 = 400;
pub const OVERLAY_HEIGHT: i32 = 60;
/// Gap between the bottom edge of one overlay and the top edge of the next.
pub const OVERLAY_SPACING: i32 = 10;
pub const SCREEN_MARGIN: i32 = 20;

pub const OVERLAY_SIZE: Size = Size {
    width: OVERLAY_WIDTH,
    height: OVERLAY_HEIGHT,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

/// Visible area of the target screen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScreenRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl ScreenRect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn top(&self) -> i32 {
        self.y + self.height
    }

    pub fn mid_x(&self) -> i32 {
        self.x + self.width / 2
    }
}

impl Default for ScreenRect {
    fn default() -> Self {
        Self::new(0, 0, 1440, 900)
    }
}

/// What placement needs to know about the windows the presentation layer
/// actually shows.
pub trait OverlaySurface {
    fn visible_frame(&self) -> ScreenRect;

    /// Live origin of an overlay window, which may differ from where it was
    /// placed if the user dragged it. `None` means the registry's recorded
    /// origin is current.
    fn current_origin(&self, _id: OverlayId) -> Option<Point> {
        None
    }
}

impl OverlaySurface for ScreenRect {
    fn visible_frame(&self) -> ScreenRect {
        *self
    }
}

fn centered_x(size: Size, screen: ScreenRect) -> i32 {
    screen.mid_x() - size.width / 2
}

/// Origin for the first overlay on an empty screen.
pub fn first_origin(size: Size, screen: ScreenRect) -> Point {
    Point {
        x: centered_x(size, screen),
        y: screen.top() - SCREEN_MARGIN - size.height,
    }
}

/// Origin directly below an overlay whose bottom edge sits at `lowest_y`.
pub fn stack_below(lowest_y: i32, size: Size, screen: ScreenRect) -> Point {
    Point {
        x: centered_x(size, screen),
        y: lowest_y - OVERLAY_SPACING - size.height,
    }
}

/// Clamp an overlay origin into the visible frame.
///
/// `y` stays between the bottom margin and the top margin; on a screen too
/// short for both margins the top bound wins. `x` keeps the whole overlay
/// visible when the screen is wide enough, and sticks to the left edge
/// otherwise.
pub fn clamp_origin(origin: Point, size: Size, margin: i32, screen: ScreenRect) -> Point {
    let min_y = screen.y + margin;
    let max_y = screen.top() - margin - size.height;
    let min_x = screen.x;
    let max_x = (screen.right() - size.width).max(min_x);

    Point {
        x: origin.x.clamp(min_x, max_x),
        y: origin.y.max(min_y).min(max_y),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_overlay_is_centered_below_top_margin() {
        let screen = ScreenRect::new(0, 0, 1000, 800);
        let origin = first_origin(OVERLAY_SIZE, screen);
        assert_eq!(origin.x, 300);
        assert_eq!(origin.y, 800 - SCREEN_MARGIN - OVERLAY_HEIGHT);
    }

    #[test]
    fn stacking_leaves_exact_spacing() {
        let screen = ScreenRect::new(0, 0, 1000, 800);
        let below = stack_below(500, OVERLAY_SIZE, screen);
        assert_eq!(below.y + OVERLAY_HEIGHT + OVERLAY_SPACING, 500);
    }

    #[test]
    fn clamp_handles_negative_coords() {
        // Simulate a left-side monitor in a dual-monitor setup.
        let screen = ScreenRect::new(-1920, 0, 1920, 1080);
        let clamped = clamp_origin(
            Point { x: -5000, y: -200 },
            OVERLAY_SIZE,
            SCREEN_MARGIN,
            screen,
        );
        assert_eq!(clamped.x, -1920);
        assert_eq!(clamped.y, SCREEN_MARGIN);

        let clamped = clamp_origin(
            Point { x: 10, y: 5000 },
            OVERLAY_SIZE,
            SCREEN_MARGIN,
            screen,
        );
        assert_eq!(clamped.x, -OVERLAY_WIDTH);
        assert_eq!(clamped.y, 1080 - SCREEN_MARGIN - OVERLAY_HEIGHT);
    }

    #[test]
    fn narrow_screen_pins_overlay_to_left_edge() {
        let screen = ScreenRect::new(100, 0, 300, 400);
        let origin = first_origin(OVERLAY_SIZE, screen);
        let clamped = clamp_origin(origin, OVERLAY_SIZE, SCREEN_MARGIN, screen);
        assert_eq!(clamped.x, 100);
    }

    #[test]
    fn short_screen_prefers_top_margin() {
        let screen = ScreenRect::new(0, 0, 1000, 80);
        let clamped = clamp_origin(Point { x: 300, y: 0 }, OVERLAY_SIZE, SCREEN_MARGIN, screen);
        assert_eq!(clamped.y, 80 - SCREEN_MARGIN - OVERLAY_HEIGHT);
    }
}
