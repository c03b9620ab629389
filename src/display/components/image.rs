/*
 *  display/components/image.rs
 *
 *  MPDisplay - now playing, on the Pi
 *  (c) 2020-26 Stuart Hunter
 *
 *  Image widget: an RGBA texture stretched over a quad
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

use crate::artwork::RgbaBitmap;
use crate::display::error::DisplayError;
use crate::display::layout::{MmRect, ScreenGeometry};
use crate::display::program::{mm_to_clip, quad_vertices, QuadBuilder, QuadResources, TEXTURE_UVS};
use crate::display::traits::{GpuBackend, TextureFormat, TextureId};

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
uniform sampler2D image_tex;
in vec2 uv;
out vec4 fragColor;
void main(void) {
  fragColor = texture( image_tex, uv );
}
";

pub struct ImageWidget {
    quad: QuadResources,
    texture: TextureId,
}

impl ImageWidget {
    pub fn new<G: GpuBackend + ?Sized>(
        gpu: &mut G,
        rect: MmRect,
        screen: &ScreenGeometry,
    ) -> Result<Self, DisplayError> {
        let mut builder = QuadBuilder::new(gpu, "image widget", VERTEX_SHADER, FRAGMENT_SHADER)?;
        let mv_matrix = builder.uniform("mv_matrix")?;
        let sampler = builder.uniform("image_tex")?;
        builder.gpu().uniform_mat4(mv_matrix, &mm_to_clip(rect.x, rect.y, screen));
        builder.gpu().uniform_i32(sampler, 0);

        let quad = builder
            .attribute("vertex", 2, &quad_vertices(rect.width, rect.height))?
            .attribute("texuv", 2, &TEXTURE_UVS)?
            .texture()?
            .finish()?;

        match quad.texture() {
            Some(texture) => Ok(Self { quad, texture }),
            None => {
                let mut quad = quad;
                quad.release(gpu);
                Err(DisplayError::ResourceCreation("image texture"))
            }
        }
    }

    /// Replace the texture with `image`
    ///
    /// An empty or short image is skipped and the previous picture stays.
    pub fn set_image<G: GpuBackend + ?Sized>(&mut self, gpu: &mut G, image: &RgbaBitmap) -> Result<(), DisplayError> {
        let expected = TextureFormat::Rgba8.expected_len(image.width, image.height);
        if image.width == 0 || image.height == 0 {
            warn!("Ignoring empty {}x{} image", image.width, image.height);
            return Ok(());
        }
        if image.pixels.len() < expected {
            warn!(
                "Ignoring {}x{} image with {} bytes, expected {}",
                image.width,
                image.height,
                image.pixels.len(),
                expected
            );
            return Ok(());
        }
        gpu.upload_texture(self.texture, TextureFormat::Rgba8, image.width, image.height, &image.pixels[..expected])
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

    fn setup() -> (MockDriver, ImageWidget) {
        let screen = ScreenGeometry::new(PI_TOUCH_WIDTH_MM, PI_TOUCH_HEIGHT_MM, 800, 480).unwrap();
        let mut driver = MockDriver::new(800, 480);
        let widget = ImageWidget::new(&mut driver, MmRect::new(77.54, 9.38, 75.54, 75.54), &screen).unwrap();
        (driver, widget)
    }

    fn solid(width: u32, height: u32, rgba: [u8; 4]) -> RgbaBitmap {
        RgbaBitmap {
            width,
            height,
            pixels: rgba.iter().copied().cycle().take((width * height * 4) as usize).collect(),
        }
    }

    #[test]
    fn test_set_image_replaces_texture() {
        let (mut driver, mut widget) = setup();
        widget.set_image(&mut driver, &solid(2, 2, [255, 0, 0, 255])).unwrap();
        widget.set_image(&mut driver, &solid(3, 1, [0, 255, 0, 255])).unwrap();

        {
            let state = driver.state();
            let state = state.lock().unwrap();
            let texture = &state.textures[&widget.texture()];
            assert_eq!((texture.width, texture.height), (3, 1));
            assert_eq!(&texture.pixels[..4], &[0, 255, 0, 255]);
        }
        widget.free(&mut driver);
    }

    #[test]
    fn test_empty_image_leaves_texture() {
        let (mut driver, mut widget) = setup();
        widget.set_image(&mut driver, &solid(2, 2, [1, 2, 3, 4])).unwrap();
        let state = driver.state();
        let before = state.lock().unwrap().texture_checksum(widget.texture());

        widget.set_image(&mut driver, &RgbaBitmap { width: 0, height: 0, pixels: Vec::new() }).unwrap();
        widget.set_image(&mut driver, &RgbaBitmap { width: 4, height: 0, pixels: Vec::new() }).unwrap();
        widget.set_image(&mut driver, &RgbaBitmap { width: 2, height: 2, pixels: vec![0; 7] }).unwrap();

        assert_eq!(state.lock().unwrap().texture_checksum(widget.texture()), before);
        assert_eq!(state.lock().unwrap().uploads.len(), 1);
        widget.free(&mut driver);
    }

    #[test]
    fn test_free_releases_everything() {
        let (mut driver, widget) = setup();
        widget.draw(&mut driver);
        widget.free(&mut driver);
        assert_eq!(driver.state().lock().unwrap().live_resources(), 0);
    }
}
