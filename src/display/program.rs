/*
 *  display/program.rs
 *
 *  MPDisplay - now playing, on the Pi
 *  (c) 2020-26 Stuart Hunter
 *
 *  Shader program and quad resource ownership shared by the widgets
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

use log::{debug, warn};

use crate::display::error::DisplayError;
use crate::display::layout::ScreenGeometry;
use crate::display::traits::{
    BufferId, GpuBackend, ProgramId, TextureId, UniformLocation, VertexArrayId, VertexAttribute,
};

/// Corner coordinates in [-1, 1], anticlockwise from the bottom left
pub const CORNER_UVS: [f32; 8] = [-1.0, -1.0, 1.0, -1.0, 1.0, 1.0, -1.0, 1.0];

/// Texture coordinates for bitmaps stored top row first
pub const TEXTURE_UVS: [f32; 8] = [0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0];

/// Model-view matrix from widget millimetres to clip space
///
/// Column-major. Carries the widget's translation so the quad itself can
/// be described from (0, 0).
pub fn mm_to_clip(x_mm: f32, y_mm: f32, screen: &ScreenGeometry) -> [f32; 16] {
    let sx = 2.0 / screen.width_mm;
    let sy = 2.0 / screen.height_mm;
    [
        sx, 0.0, 0.0, 0.0,
        0.0, sy, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
        x_mm * sx - 1.0, y_mm * sy - 1.0, 0.0, 1.0,
    ]
}

/// Quad corners in millimetres, anticlockwise from the origin
pub fn quad_vertices(width_mm: f32, height_mm: f32) -> [f32; 8] {
    [0.0, 0.0, width_mm, 0.0, width_mm, height_mm, 0.0, height_mm]
}

/// The GPU objects behind one widget
///
/// Owned by exactly one widget. `release` deletes everything once; later
/// calls do nothing. Dropping a set that was never released leaks the GPU
/// objects and says so in the log.
#[derive(Debug)]
pub struct QuadResources {
    label: &'static str,
    program: ProgramId,
    vertex_array: VertexArrayId,
    buffers: Vec<BufferId>,
    texture: Option<TextureId>,
    released: bool,
}

impl QuadResources {
    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn texture(&self) -> Option<TextureId> {
        self.texture
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Draw the quad with source-alpha blending, leaving blending off
    pub fn draw_blended<G: GpuBackend + ?Sized>(&self, gpu: &mut G) {
        gpu.use_program(self.program);
        gpu.bind_vertex_array(Some(self.vertex_array));
        if let Some(texture) = self.texture {
            gpu.bind_texture(texture);
        }
        gpu.set_blend(true);
        gpu.draw_triangle_fan(4);
        gpu.set_blend(false);
        gpu.bind_vertex_array(None);
    }

    pub fn release<G: GpuBackend + ?Sized>(&mut self, gpu: &mut G) {
        if self.released {
            return;
        }
        if let Some(texture) = self.texture.take() {
            gpu.delete_texture(texture);
        }
        for buffer in self.buffers.drain(..) {
            gpu.delete_buffer(buffer);
        }
        gpu.delete_vertex_array(self.vertex_array);
        gpu.delete_program(self.program);
        self.released = true;
        debug!("{} resources released", self.label);
    }
}

impl Drop for QuadResources {
    fn drop(&mut self) {
        if !self.released {
            warn!("{} dropped without being freed, GPU resources leaked", self.label);
        }
    }
}

/// Step by step construction of a `QuadResources`
///
/// Every object created so far is deleted again if the builder is dropped
/// before `finish`, so a failing `?` part way through leaks nothing.
pub struct QuadBuilder<'g, G: GpuBackend + ?Sized> {
    gpu: &'g mut G,
    label: &'static str,
    program: ProgramId,
    vertex_array: Option<VertexArrayId>,
    buffers: Vec<BufferId>,
    texture: Option<TextureId>,
    finished: bool,
}

impl<'g, G: GpuBackend + ?Sized> QuadBuilder<'g, G> {
    /// Link the program, make it current and bind a fresh vertex array
    pub fn new(
        gpu: &'g mut G,
        label: &'static str,
        vertex_src: &str,
        fragment_src: &str,
    ) -> Result<Self, DisplayError> {
        let program = gpu.create_program(vertex_src, fragment_src)?;
        gpu.use_program(program);
        let mut builder = Self {
            gpu,
            label,
            program,
            vertex_array: None,
            buffers: Vec::new(),
            texture: None,
            finished: false,
        };
        let vertex_array = builder.gpu.create_vertex_array()?;
        builder.vertex_array = Some(vertex_array);
        builder.gpu.bind_vertex_array(Some(vertex_array));
        Ok(builder)
    }

    /// Feed a per-vertex float attribute
    pub fn attribute(mut self, name: &str, components: i32, data: &[f32]) -> Result<Self, DisplayError> {
        let location = self
            .gpu
            .attrib_location(self.program, name)
            .ok_or_else(|| DisplayError::MissingBinding(name.to_string()))?;
        let buffer = self.gpu.create_buffer(&VertexAttribute { location, components, data })?;
        self.buffers.push(buffer);
        Ok(self)
    }

    /// Attach one empty texture
    pub fn texture(mut self) -> Result<Self, DisplayError> {
        let texture = self.gpu.create_texture()?;
        self.texture = Some(texture);
        Ok(self)
    }

    pub fn uniform(&mut self, name: &str) -> Result<UniformLocation, DisplayError> {
        self.gpu
            .uniform_location(self.program, name)
            .ok_or_else(|| DisplayError::MissingBinding(name.to_string()))
    }

    /// The backend, with this builder's program in use
    pub fn gpu(&mut self) -> &mut G {
        &mut *self.gpu
    }

    pub fn finish(mut self) -> Result<QuadResources, DisplayError> {
        let vertex_array = self.vertex_array.ok_or(DisplayError::ResourceCreation("vertex array"))?;
        self.gpu.bind_vertex_array(None);
        self.finished = true;
        Ok(QuadResources {
            label: self.label,
            program: self.program,
            vertex_array,
            buffers: std::mem::take(&mut self.buffers),
            texture: self.texture.take(),
            released: false,
        })
    }
}

impl<G: GpuBackend + ?Sized> Drop for QuadBuilder<'_, G> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!("{} construction abandoned, releasing partial resources", self.label);
        if let Some(texture) = self.texture.take() {
            self.gpu.delete_texture(texture);
        }
        for buffer in self.buffers.drain(..) {
            self.gpu.delete_buffer(buffer);
        }
        if let Some(vertex_array) = self.vertex_array.take() {
            self.gpu.bind_vertex_array(None);
            self.gpu.delete_vertex_array(vertex_array);
        }
        self.gpu.delete_program(self.program);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::drivers::mock::MockDriver;
    use crate::display::layout::{PI_TOUCH_HEIGHT_MM, PI_TOUCH_WIDTH_MM};

    const VS: &str = "#version 300 es\nuniform mat4 mv_matrix;\nin vec2 vertex;\nin vec2 corneruv;\nvoid main() {}\n";
    const FS: &str = "#version 300 es\nprecision mediump float;\nout vec4 fragColor;\nvoid main() {}\n";

    fn screen() -> ScreenGeometry {
        ScreenGeometry::new(PI_TOUCH_WIDTH_MM, PI_TOUCH_HEIGHT_MM, 800, 480).unwrap()
    }

    fn apply(m: &[f32; 16], x: f32, y: f32) -> (f32, f32) {
        (m[0] * x + m[4] * y + m[12], m[1] * x + m[5] * y + m[13])
    }

    #[test]
    fn test_mm_to_clip_corners() {
        let m = mm_to_clip(0.0, 0.0, &screen());
        let (x, y) = apply(&m, 0.0, 0.0);
        assert!((x + 1.0).abs() < 1e-6 && (y + 1.0).abs() < 1e-6);
        let (x, y) = apply(&m, PI_TOUCH_WIDTH_MM, PI_TOUCH_HEIGHT_MM);
        assert!((x - 1.0).abs() < 1e-5 && (y - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_mm_to_clip_uses_height_for_y() {
        // a widget at the vertical centre lands on clip y = 0
        let m = mm_to_clip(10.0, PI_TOUCH_HEIGHT_MM / 2.0, &screen());
        let (_, y) = apply(&m, 0.0, 0.0);
        assert!(y.abs() < 1e-5);
    }

    #[test]
    fn test_builder_finish_and_release() {
        let mut driver = MockDriver::new(800, 480);
        let state = driver.state();

        let mut builder = QuadBuilder::new(&mut driver, "test", VS, FS).unwrap();
        let mv = builder.uniform("mv_matrix").unwrap();
        builder.gpu().uniform_mat4(mv, &mm_to_clip(1.0, 1.0, &screen()));
        let mut quad = builder
            .attribute("vertex", 2, &quad_vertices(10.0, 5.0))
            .and_then(|b| b.attribute("corneruv", 2, &CORNER_UVS))
            .and_then(|b| b.texture())
            .and_then(|b| b.finish())
            .unwrap();

        assert_eq!(state.lock().unwrap().live_resources(), 5);

        quad.release(&mut driver);
        quad.release(&mut driver);
        let state = state.lock().unwrap();
        assert_eq!(state.live_resources(), 0);
        assert_eq!(state.double_deletes, 0);
    }

    #[test]
    fn test_builder_cleans_up_on_missing_attribute() {
        let mut driver = MockDriver::new(800, 480);
        let state = driver.state();

        let result = QuadBuilder::new(&mut driver, "test", VS, FS)
            .and_then(|b| b.attribute("vertex", 2, &quad_vertices(10.0, 5.0)))
            .and_then(|b| b.attribute("texuv", 2, &TEXTURE_UVS));

        assert!(matches!(result, Err(DisplayError::MissingBinding(ref n)) if n == "texuv"));
        assert_eq!(state.lock().unwrap().live_resources(), 0);
    }

    #[test]
    fn test_builder_cleans_up_on_texture_failure() {
        let mut driver = MockDriver::new(800, 480);
        let state = driver.state();
        state.lock().unwrap().simulate_texture_failure = true;

        let result = QuadBuilder::new(&mut driver, "test", VS, FS)
            .and_then(|b| b.attribute("vertex", 2, &quad_vertices(10.0, 5.0)))
            .and_then(|b| b.texture());

        assert!(result.is_err());
        assert_eq!(state.lock().unwrap().live_resources(), 0);
    }
}
