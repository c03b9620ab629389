/*
 *  display/components/text.rs
 *
 *  MPDisplay - now playing, on the Pi
 *  (c) 2020-26 Stuart Hunter
 *
 *  Text widget: markup laid out into a box, drawn as a tinted coverage texture
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
use crate::display::layout::{MmRect, ScreenGeometry};
use crate::display::program::{mm_to_clip, quad_vertices, QuadBuilder, QuadResources, TEXTURE_UVS};
use crate::display::text_layout::{Alignment, TextLayout};
use crate::display::traits::{GpuBackend, TextureFormat, TextureId};
use crate::func_timer::FunctionTimer;

const VERTEX_SHADER: &str = "#version 300 es
precision mediump float;
uniform mat4 mv_matrix;
in vec2 vertex;
in vec2 texuv;
out vec2 uv;
void main(void) {
  gl_Position = mv_matrix * vec4( vertex, 0., 1. );
  uv = texuv;
}
";

const FRAGMENT_SHADER: &str = "#version 300 es
precision mediump float;
uniform sampler2D coverage;
uniform vec4 foreground;
in vec2 uv;
out vec4 fragColor;
void main(void) {
  fragColor = vec4( foreground.rgb, foreground.a * texture( coverage, uv ).r );
}
";

/// Default text colour
pub const FOREGROUND: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

/// A box of word wrapped markup
pub struct TextWidget {
    quad: QuadResources,
    texture: TextureId,
    layout: TextLayout,
}

impl TextWidget {
    /// `font_px` is the pixel height of normal text
    pub fn new<G: GpuBackend + ?Sized>(
        gpu: &mut G,
        rect: MmRect,
        screen: &ScreenGeometry,
        font_px: f32,
    ) -> Result<Self, DisplayError> {
        let (width_px, height_px) = screen.box_px(rect.width, rect.height);

        let mut builder = QuadBuilder::new(gpu, "text widget", VERTEX_SHADER, FRAGMENT_SHADER)?;
        let mv_matrix = builder.uniform("mv_matrix")?;
        let foreground = builder.uniform("foreground")?;
        let coverage = builder.uniform("coverage")?;
        builder.gpu().uniform_mat4(mv_matrix, &mm_to_clip(rect.x, rect.y, screen));
        builder.gpu().uniform_i32(coverage, 0);
        builder.gpu().uniform_vec4(foreground, FOREGROUND);

        let mut quad = builder
            .attribute("vertex", 2, &quad_vertices(rect.width, rect.height))?
            .attribute("texuv", 2, &TEXTURE_UVS)?
            .texture()?
            .finish()?;

        let Some(texture) = quad.texture() else {
            quad.release(gpu);
            return Err(DisplayError::ResourceCreation("text texture"));
        };

        let blank = vec![0u8; (width_px * height_px) as usize];
        if let Err(e) = gpu.upload_texture(texture, TextureFormat::Coverage8, width_px, height_px, &blank) {
            quad.release(gpu);
            return Err(e);
        }

        Ok(Self {
            quad,
            texture,
            layout: TextLayout::new(width_px, height_px, font_px),
        })
    }

    /// Takes effect at the next `set_text`
    pub fn set_alignment(&mut self, alignment: Alignment) {
        self.layout.set_alignment(alignment);
    }

    pub fn alignment(&self) -> Alignment {
        self.layout.alignment()
    }

    /// Lay out, rasterize and upload. The whole bitmap is rewritten.
    pub fn set_text<G: GpuBackend + ?Sized>(&mut self, gpu: &mut G, text: &str) -> Result<(), DisplayError> {
        let _timer = FunctionTimer::new("text layout");
        let coverage = self.layout.render(text)?;
        let (width, height) = self.layout.dimensions();
        gpu.upload_texture(self.texture, TextureFormat::Coverage8, width, height, &coverage)
    }

    pub fn draw<G: GpuBackend + ?Sized>(&self, gpu: &mut G) {
        self.quad.draw_blended(gpu);
    }

    pub fn free<G: GpuBackend + ?Sized>(mut self, gpu: &mut G) {
        self.quad.release(gpu);
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::drivers::mock::MockDriver;
    use crate::display::layout::{PI_TOUCH_HEIGHT_MM, PI_TOUCH_WIDTH_MM};
    use crate::display::text_layout::escape;

    fn setup() -> (MockDriver, ScreenGeometry, MmRect) {
        let screen = ScreenGeometry::new(PI_TOUCH_WIDTH_MM, PI_TOUCH_HEIGHT_MM, 800, 480).unwrap();
        (MockDriver::new(800, 480), screen, MmRect::new(1.0, 1.0, 40.0, 10.0))
    }

    fn pixels(driver: &MockDriver, texture: TextureId) -> Vec<u8> {
        driver.state().lock().unwrap().textures[&texture].pixels.clone()
    }

    #[test]
    fn test_new_and_free_balance() {
        let (mut driver, screen, rect) = setup();
        let widget = TextWidget::new(&mut driver, rect, &screen, 24.0).unwrap();
        assert_eq!(driver.state().lock().unwrap().live_resources(), 5);

        widget.free(&mut driver);
        let state = driver.state();
        let state = state.lock().unwrap();
        assert_eq!(state.live_resources(), 0);
        assert_eq!(state.double_deletes, 0);
    }

    #[test]
    fn test_empty_text_is_transparent() {
        let (mut driver, screen, rect) = setup();
        let mut widget = TextWidget::new(&mut driver, rect, &screen, 24.0).unwrap();

        widget.set_text(&mut driver, "Hello").unwrap();
        assert!(pixels(&driver, widget.texture()).iter().any(|&p| p > 0));

        widget.set_text(&mut driver, "").unwrap();
        assert!(pixels(&driver, widget.texture()).iter().all(|&p| p == 0));
        widget.free(&mut driver);
    }

    #[test]
    fn test_second_text_fully_overwrites() {
        let (mut driver, screen, rect) = setup();
        let mut widget = TextWidget::new(&mut driver, rect, &screen, 24.0).unwrap();

        widget.set_text(&mut driver, "x").unwrap();
        let only_x = pixels(&driver, widget.texture());

        widget.set_text(&mut driver, "<b>Something much longer</b>").unwrap();
        widget.set_text(&mut driver, "x").unwrap();
        assert_eq!(pixels(&driver, widget.texture()), only_x);
        widget.free(&mut driver);
    }

    #[test]
    fn test_malformed_markup_shows_literal_text() {
        let (mut driver, screen, rect) = setup();
        let mut widget = TextWidget::new(&mut driver, rect, &screen, 24.0).unwrap();

        widget.set_text(&mut driver, "<b>AC/DC").unwrap();
        let malformed = pixels(&driver, widget.texture());
        widget.set_text(&mut driver, &escape("<b>AC/DC")).unwrap();
        assert_eq!(pixels(&driver, widget.texture()), malformed);
        widget.free(&mut driver);
    }

    #[test]
    fn test_non_latin_title_keeps_its_glyphs() {
        let (mut driver, screen, rect) = setup();
        let mut widget = TextWidget::new(&mut driver, rect, &screen, 24.0).unwrap();

        widget.set_text(&mut driver, "東京事変").unwrap();
        let kanji = pixels(&driver, widget.texture());
        widget.set_text(&mut driver, "????").unwrap();
        assert_ne!(pixels(&driver, widget.texture()), kanji);
        widget.free(&mut driver);
    }

    #[test]
    fn test_upload_is_coverage_sized_to_box() {
        let (mut driver, screen, rect) = setup();
        let mut widget = TextWidget::new(&mut driver, rect, &screen, 24.0).unwrap();
        widget.set_text(&mut driver, "Hi").unwrap();

        let (w, h) = screen.box_px(rect.width, rect.height);
        let state = driver.state();
        let last = state.lock().unwrap().uploads.last().cloned().unwrap();
        assert_eq!(last.format, TextureFormat::Coverage8);
        assert_eq!((last.width, last.height), (w, h));
        widget.free(&mut driver);
    }

    #[test]
    fn test_draw_blends_then_disables() {
        let (mut driver, screen, rect) = setup();
        let widget = TextWidget::new(&mut driver, rect, &screen, 24.0).unwrap();

        widget.draw(&mut driver);
        widget.draw(&mut driver);

        {
            let state = driver.state();
            let state = state.lock().unwrap();
            assert_eq!(state.draws.len(), 2);
            assert_eq!(state.draws[0], state.draws[1]);
            assert!(state.draws[0].blend);
            assert_eq!(state.draws[0].texture, Some(widget.texture()));
            assert!(!state.blend_enabled);
        }
        widget.free(&mut driver);
    }

    #[test]
    fn test_alignment_is_idempotent() {
        let (mut driver, screen, rect) = setup();
        let mut widget = TextWidget::new(&mut driver, rect, &screen, 24.0).unwrap();
        widget.set_alignment(Alignment::Center);
        widget.set_alignment(Alignment::Center);
        assert_eq!(widget.alignment(), Alignment::Center);
        widget.free(&mut driver);
    }
}
