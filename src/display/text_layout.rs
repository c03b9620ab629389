/*
 *  display/text_layout.rs
 *
 *  MPDisplay - now playing, on the Pi
 *  (c) 2020-26 Stuart Hunter
 *
 *  Pango markup laid out into a fixed box and rasterized to 8-bit coverage
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

use log::warn;
use pango::{EllipsizeMode, FontDescription, WrapMode};

use crate::display::error::DisplayError;

/// Escape user strings before splicing them into markup
pub use pango::glib::markup_escape_text as escape;

/// Family asked of fontconfig for every widget
pub const FONT_FAMILY: &str = "Sans";

/// Horizontal placement of each line in the box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
}

impl From<Alignment> for pango::Alignment {
    fn from(value: Alignment) -> Self {
        match value {
            Alignment::Left => pango::Alignment::Left,
            Alignment::Center => pango::Alignment::Center,
            Alignment::Right => pango::Alignment::Right,
        }
    }
}

/// Layout context of a text box
///
/// Every `render` starts from a fresh transparent surface, so one call
/// never leaves ink from the previous text behind.
#[derive(Debug, Clone)]
pub struct TextLayout {
    width_px: u32,
    height_px: u32,
    font: FontDescription,
    alignment: Alignment,
}

impl TextLayout {
    /// `font_px` is the pixel height of normal text
    pub fn new(width_px: u32, height_px: u32, font_px: f32) -> Self {
        let mut font = FontDescription::from_string(FONT_FAMILY);
        font.set_absolute_size(f64::from(font_px.max(1.0)) * f64::from(pango::SCALE));
        Self { width_px, height_px, font, alignment: Alignment::Left }
    }

    pub fn set_alignment(&mut self, alignment: Alignment) {
        self.alignment = alignment;
    }

    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width_px, self.height_px)
    }

    /// Lay `markup` out and return one coverage byte per pixel, row 0 at the top
    ///
    /// Markup pango refuses is shown literally rather than dropped.
    pub fn render(&self, markup: &str) -> Result<Vec<u8>, DisplayError> {
        let (width, height) = (self.width_px as usize, self.height_px as usize);
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let mut surface = cairo::ImageSurface::create(cairo::Format::A8, width as i32, height as i32)
            .map_err(|e| DisplayError::Text(format!("coverage surface: {}", e)))?;
        {
            let cr = cairo::Context::new(&surface).map_err(|e| DisplayError::Text(format!("cairo context: {}", e)))?;

            let layout = pangocairo::functions::create_layout(&cr);
            layout.set_font_description(Some(&self.font));
            layout.set_width(width as i32 * pango::SCALE);
            layout.set_height(height as i32 * pango::SCALE);
            layout.set_wrap(WrapMode::WordChar);
            layout.set_ellipsize(EllipsizeMode::End);
            layout.set_alignment(self.alignment.into());

            match pango::parse_markup(markup, '\0') {
                Ok((attrs, text, _)) => {
                    layout.set_text(&text);
                    layout.set_attributes(Some(&attrs));
                }
                Err(e) => {
                    warn!("Bad markup, showing it as text: {}", e);
                    layout.set_text(markup);
                    layout.set_attributes(None);
                }
            }

            cr.set_source_rgba(1.0, 1.0, 1.0, 1.0);
            cr.move_to(0.0, 0.0);
            pangocairo::functions::show_layout(&cr, &layout);
        }

        surface.flush();
        let stride = surface.stride() as usize;
        let data = surface
            .data()
            .map_err(|e| DisplayError::Text(format!("coverage readback: {}", e)))?;

        // cairo pads each A8 row out to its stride
        let mut coverage = Vec::with_capacity(width * height);
        for row in data.chunks(stride).take(height) {
            coverage.extend_from_slice(&row[..width]);
        }
        Ok(coverage)
    }
}
