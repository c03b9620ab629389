/*
 *  display/traits.rs
 *
 *  MPDisplay - now playing, on the Pi
 *  (c) 2020-26 Stuart Hunter
 *
 *  Core trait definitions for GPU and display driver abstraction
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

/// Linked shader program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

/// Vertex array object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexArrayId(pub u32);

/// Vertex buffer object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// 2D texture object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// Uniform location within a linked program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

/// Pixel layout of a texture upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    /// 8 bits each of R, G, B, A; row 0 is the top of the image
    Rgba8,

    /// One 8-bit coverage (alpha) channel per pixel
    Coverage8,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            TextureFormat::Rgba8 => 4,
            TextureFormat::Coverage8 => 1,
        }
    }

    /// Number of bytes a `width` x `height` upload must carry
    pub fn expected_len(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel()
    }
}

/// Float data for one vertex attribute of a quad
#[derive(Debug, Clone, Copy)]
pub struct VertexAttribute<'a> {
    /// Attribute location in the program
    pub location: u32,

    /// Components per vertex (2 for positions, 3 for colours...)
    pub components: i32,

    /// Tightly packed vertex data
    pub data: &'a [f32],
}

/// The slice of OpenGL ES the widgets need
///
/// Every call must happen on the thread the GPU context is current on.
/// Widgets only ever talk to the GPU through this trait, which lets the
/// tests run the whole widget protocol against a recording mock.
pub trait GpuBackend {
    /// Compile both stages and link them. The shader objects are deleted
    /// before returning whether or not linking succeeded.
    fn create_program(&mut self, vertex_src: &str, fragment_src: &str) -> Result<ProgramId, DisplayError>;

    fn delete_program(&mut self, program: ProgramId);

    fn use_program(&mut self, program: ProgramId);

    fn attrib_location(&mut self, program: ProgramId, name: &str) -> Option<u32>;

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation>;

    /// Uniform setters apply to the program in use
    fn uniform_f32(&mut self, location: UniformLocation, value: f32);

    fn uniform_i32(&mut self, location: UniformLocation, value: i32);

    fn uniform_vec4(&mut self, location: UniformLocation, value: [f32; 4]);

    /// Column-major 4x4 matrix
    fn uniform_mat4(&mut self, location: UniformLocation, value: &[f32; 16]);

    fn create_vertex_array(&mut self) -> Result<VertexArrayId, DisplayError>;

    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayId>);

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId);

    /// Create a static buffer holding `attribute.data` and hook it to
    /// `attribute.location` of the currently bound vertex array.
    fn create_buffer(&mut self, attribute: &VertexAttribute<'_>) -> Result<BufferId, DisplayError>;

    fn delete_buffer(&mut self, buffer: BufferId);

    /// Create an empty, linearly filtered, edge clamped texture
    fn create_texture(&mut self) -> Result<TextureId, DisplayError>;

    fn bind_texture(&mut self, texture: TextureId);

    /// Full replace of the texture contents; dimensions may change.
    fn upload_texture(
        &mut self,
        texture: TextureId,
        format: TextureFormat,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<(), DisplayError>;

    fn delete_texture(&mut self, texture: TextureId);

    /// Source-alpha blending on or off
    fn set_blend(&mut self, enabled: bool);

    fn draw_triangle_fan(&mut self, vertex_count: i32);

    fn clear(&mut self, rgba: [f32; 4]);
}

/// Display capabilities and metadata
#[derive(Debug, Clone)]
pub struct DisplayCapabilities {
    /// Display width in pixels
    pub width: u32,

    /// Display height in pixels
    pub height: u32,
}

/// A GPU context bound to something that can be scanned out
pub trait DisplayDriver: GpuBackend {
    /// Returns the capabilities of this display
    fn capabilities(&self) -> &DisplayCapabilities;

    /// Returns the display dimensions as (width, height)
    fn dimensions(&self) -> (u32, u32) {
        let caps = self.capabilities();
        (caps.width, caps.height)
    }

    /// Swap buffers and show the frame that was just drawn
    fn present(&mut self) -> Result<(), DisplayError>;

    /// Tear down the GPU context. Every widget must be freed first.
    fn shutdown(self)
    where
        Self: Sized;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_len() {
        assert_eq!(TextureFormat::Rgba8.expected_len(3, 2), 24);
        assert_eq!(TextureFormat::Coverage8.expected_len(3, 2), 6);
        assert_eq!(TextureFormat::Rgba8.expected_len(0, 100), 0);
    }
}
