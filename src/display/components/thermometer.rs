/*
 *  display/components/thermometer.rs
 *
 *  MPDisplay - now playing, on the Pi
 *  (c) 2020-26 Stuart Hunter
 *
 *  Thermometer widget: a rounded bar whose length follows the track position
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
use crate::display::program::{mm_to_clip, quad_vertices, QuadBuilder, QuadResources, CORNER_UVS};
use crate::display::traits::{GpuBackend, UniformLocation};

const VERTEX_SHADER: &str = "#version 300 es
precision mediump float;
uniform float scale;
uniform mat4 mv_matrix;
in vec2 vertex;
in vec2 corneruv;
in vec3 coloruv;
out vec2 corner;
out vec3 color;
void main(void) {
  gl_Position = mv_matrix * vec4( scale * vertex.x, vertex.y, 0., 1. );
  corner = corneruv;
  color = coloruv;
}
";

// Rounded box distance in mm. The corners stay round however short the
// bar gets because the half width is taken after scaling.
const FRAGMENT_SHADER: &str = "#version 300 es
precision mediump float;
uniform float scale;
uniform float width;
uniform float height;
uniform float radius;
in vec2 corner;
in vec3 color;
out vec4 fragColor;
void main(void) {
  vec2 half_size = 0.5 * vec2( abs( width * scale ), height );
  vec2 p = corner * half_size;
  float r = min( radius, min( half_size.x, half_size.y ) );
  vec2 q = abs( p ) - half_size + r;
  float d = length( max( q, 0. ) ) + min( max( q.x, q.y ), 0. ) - r;
  float alpha = 1. - smoothstep( -fwidth( d ), 0., d );
  fragColor = vec4( color, alpha );
}
";

/// Dark at the bottom edge, light at the top
const SHADING: [f32; 12] = [0.25, 0.25, 0.25, 0.25, 0.25, 0.25, 0.75, 0.75, 0.75, 0.75, 0.75, 0.75];

pub struct ThermometerWidget {
    quad: QuadResources,
    scale: UniformLocation,
    value: f32,
}

impl ThermometerWidget {
    /// The bar starts empty
    pub fn new<G: GpuBackend + ?Sized>(
        gpu: &mut G,
        rect: MmRect,
        screen: &ScreenGeometry,
        radius_mm: f32,
    ) -> Result<Self, DisplayError> {
        let mut builder = QuadBuilder::new(gpu, "thermometer widget", VERTEX_SHADER, FRAGMENT_SHADER)?;
        let mv_matrix = builder.uniform("mv_matrix")?;
        let scale = builder.uniform("scale")?;
        let width = builder.uniform("width")?;
        let height = builder.uniform("height")?;
        let radius = builder.uniform("radius")?;

        let gpu = builder.gpu();
        gpu.uniform_mat4(mv_matrix, &mm_to_clip(rect.x, rect.y, screen));
        gpu.uniform_f32(scale, 0.0);
        gpu.uniform_f32(width, rect.width);
        gpu.uniform_f32(height, rect.height);
        gpu.uniform_f32(radius, radius_mm);

        let quad = builder
            .attribute("vertex", 2, &quad_vertices(rect.width, rect.height))?
            .attribute("corneruv", 2, &CORNER_UVS)?
            .attribute("coloruv", 3, &SHADING)?
            .finish()?;

        Ok(Self { quad, scale, value: 0.0 })
    }

    /// Fraction of the full width to fill
    ///
    /// Not clamped. Values outside [0, 1] draw a short, long or mirrored
    /// bar; callers keep the fraction in range.
    pub fn set_value<G: GpuBackend + ?Sized>(&mut self, gpu: &mut G, fraction: f32) {
        self.value = fraction;
        gpu.use_program(self.quad.program());
        gpu.uniform_f32(self.scale, fraction);
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn draw<G: GpuBackend + ?Sized>(&self, gpu: &mut G) {
        self.quad.draw_blended(gpu);
    }

    pub fn free<G: GpuBackend + ?Sized>(mut self, gpu: &mut G) {
        self.quad.release(gpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::drivers::mock::{MockDriver, UniformValue};
    use crate::display::layout::{PI_TOUCH_HEIGHT_MM, PI_TOUCH_WIDTH_MM};

    fn setup() -> (MockDriver, ThermometerWidget) {
        let screen = ScreenGeometry::new(PI_TOUCH_WIDTH_MM, PI_TOUCH_HEIGHT_MM, 800, 480).unwrap();
        let mut driver = MockDriver::new(800, 480);
        let rect = MmRect::new(78.04, 1.5, 74.54, 6.38);
        let widget = ThermometerWidget::new(&mut driver, rect, &screen, 2.0).unwrap();
        (driver, widget)
    }

    fn drawn_scale(driver: &MockDriver) -> Option<UniformValue> {
        let state = driver.state();
        let state = state.lock().unwrap();
        state.draws.last().and_then(|d| d.uniforms.get("scale").cloned())
    }

    #[test]
    fn test_starts_empty() {
        let (mut driver, widget) = setup();
        widget.draw(&mut driver);
        assert_eq!(drawn_scale(&driver), Some(UniformValue::F32(0.0)));
        widget.free(&mut driver);
    }

    #[test]
    fn test_value_reaches_the_draw() {
        let (mut driver, mut widget) = setup();
        for v in [0.0, 1.0, 0.37] {
            widget.set_value(&mut driver, v);
            widget.draw(&mut driver);
            assert_eq!(drawn_scale(&driver), Some(UniformValue::F32(v)));
        }
        widget.free(&mut driver);
    }

    #[test]
    fn test_out_of_range_does_not_panic() {
        let (mut driver, mut widget) = setup();
        for v in [-0.5, 1.5, f32::INFINITY] {
            widget.set_value(&mut driver, v);
            widget.draw(&mut driver);
        }
        assert_eq!(widget.value(), f32::INFINITY);
        assert_eq!(driver.state().lock().unwrap().draws.len(), 3);
        widget.free(&mut driver);
    }

    #[test]
    fn test_shape_uniforms_set_once() {
        let (mut driver, widget) = setup();
        {
            let state = driver.state();
            let state = state.lock().unwrap();
            assert_eq!(state.uniform_writes("width"), vec![UniformValue::F32(74.54)]);
            assert_eq!(state.uniform_writes("radius"), vec![UniformValue::F32(2.0)]);
            assert_eq!(state.buffers.len(), 3);
        }
        widget.free(&mut driver);
        assert_eq!(driver.state().lock().unwrap().live_resources(), 0);
    }
}
