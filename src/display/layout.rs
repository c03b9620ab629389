/*
 *  display/layout.rs
 *
 *  MPDisplay - now playing, on the Pi
 *  (c) 2020-26 Stuart Hunter
 *
 *  Physical screen geometry and the fixed millimetre layout
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use crate::display::error::DisplayError;

/// Visible area of the official Pi 7" touch screen (mm)
pub const PI_TOUCH_WIDTH_MM: f32 = 154.08;
pub const PI_TOUCH_HEIGHT_MM: f32 = 85.92;

/// Physical size of the screen together with its pixel resolution
///
/// Widget placement is in millimetres with the origin at the bottom left,
/// the same orientation as GL clip space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenGeometry {
    pub width_mm: f32,
    pub height_mm: f32,
    pub width_px: u32,
    pub height_px: u32,
}

impl ScreenGeometry {
    pub fn new(width_mm: f32, height_mm: f32, width_px: u32, height_px: u32) -> Result<Self, DisplayError> {
        if !(width_mm > 0.0 && height_mm > 0.0) {
            return Err(DisplayError::InvalidConfiguration(format!(
                "screen size must be positive, got {}x{} mm",
                width_mm, height_mm
            )));
        }
        if width_px == 0 || height_px == 0 {
            return Err(DisplayError::InvalidConfiguration(format!(
                "screen resolution must be positive, got {}x{}",
                width_px, height_px
            )));
        }
        Ok(Self { width_mm, height_mm, width_px, height_px })
    }

    /// Pixels per millimetre as (x, y)
    pub fn dpmm(&self) -> (f32, f32) {
        (self.width_px as f32 / self.width_mm, self.height_px as f32 / self.height_mm)
    }

    /// Pixel size of a box given in millimetres, at least 1x1
    pub fn box_px(&self, width_mm: f32, height_mm: f32) -> (u32, u32) {
        let (dx, dy) = self.dpmm();
        let w = (width_mm * dx).round().max(1.0) as u32;
        let h = (height_mm * dy).round().max(1.0) as u32;
        (w, h)
    }
}

/// Axis aligned box in millimetres, origin at the bottom left
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MmRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl MmRect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }
}

/// Spacing parameters of the layout (all mm)
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutConfig {
    /// Border decoration around every widget
    pub border: f32,

    /// Basic font height
    pub font_size: f32,

    /// Space between the thermometer and its cell
    pub thermometer_gap: f32,

    /// Edge of the square play status emblem
    pub emblem_size: f32,

    /// Corner radius of the thermometer
    pub round_radius: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            border: 1.0,
            font_size: 3.0,
            thermometer_gap: 0.5,
            emblem_size: 10.0,
            round_radius: 2.0,
        }
    }
}

/// Placement of every widget on the screen
///
/// The left half holds the metadata text with the emblem in its lower right
/// corner. The right half holds the cover at the top and the time text over
/// the thermometer at the bottom.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenLayout {
    pub metadata: MmRect,
    pub emblem: MmRect,
    pub time: MmRect,
    pub cover: MmRect,
    pub thermometer: MmRect,
    pub round_radius: f32,
}

impl ScreenLayout {
    pub fn compute(screen: &ScreenGeometry, config: &LayoutConfig) -> Self {
        let (w, h) = (screen.width_mm, screen.height_mm);
        let b = config.border;
        let gap = config.thermometer_gap;
        let half = w / 2.0;
        let image_edge = half - 1.5 * b;

        let metadata = MmRect::new(b, b, image_edge, h - 2.0 * b);
        let emblem = MmRect::new(half - config.emblem_size - b, b, config.emblem_size, config.emblem_size);
        let time = MmRect::new(half + b / 2.0, b, image_edge, 2.0 * config.font_size - b);
        let cover = MmRect::new(half + b / 2.0, h - b - image_edge, image_edge, image_edge);

        // whatever height is left under the cover, less the borders and gap
        let thermometer = MmRect::new(
            half + b / 2.0 + gap,
            b + gap,
            image_edge - 2.0 * gap,
            h - b - image_edge - 2.0 * b - 2.0 * gap,
        );

        Self { metadata, emblem, time, cover, thermometer, round_radius: config.round_radius }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pi_screen() -> ScreenGeometry {
        ScreenGeometry::new(PI_TOUCH_WIDTH_MM, PI_TOUCH_HEIGHT_MM, 800, 480).unwrap()
    }

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn test_geometry_rejects_empty() {
        assert!(ScreenGeometry::new(0.0, 85.92, 800, 480).is_err());
        assert!(ScreenGeometry::new(154.08, 85.92, 800, 0).is_err());
        assert!(ScreenGeometry::new(f32::NAN, 85.92, 800, 480).is_err());
    }

    #[test]
    fn test_box_px() {
        let screen = pi_screen();
        assert_eq!(screen.box_px(PI_TOUCH_WIDTH_MM, PI_TOUCH_HEIGHT_MM), (800, 480));
        assert_eq!(screen.box_px(0.0, 0.0), (1, 1));
    }

    #[test]
    fn test_pi_layout() {
        let layout = ScreenLayout::compute(&pi_screen(), &LayoutConfig::default());

        assert!(close(layout.metadata.x, 1.0));
        assert!(close(layout.metadata.width, 75.54));
        assert!(close(layout.metadata.height, 83.92));
        assert!(close(layout.emblem.x, 66.04));
        assert!(close(layout.time.x, 77.54));
        assert!(close(layout.time.height, 5.0));
        assert!(close(layout.cover.y, 9.38));
        assert!(close(layout.cover.width, layout.cover.height));
        assert!(close(layout.thermometer.x, 78.04));
        assert!(close(layout.thermometer.width, 74.54));
        assert!(close(layout.thermometer.height, 6.38));
    }

    #[test]
    fn test_cover_fits_on_screen() {
        let screen = pi_screen();
        let layout = ScreenLayout::compute(&screen, &LayoutConfig::default());
        assert!(close(layout.cover.y + layout.cover.height, screen.height_mm - 1.0));
        assert!(layout.cover.x + layout.cover.width <= screen.width_mm);
        assert!(layout.thermometer.y + layout.thermometer.height < layout.cover.y);
    }
}
