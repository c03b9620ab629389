/*
 *  display/drivers/mock.rs
 *
 *  MPDisplay - now playing, on the Pi
 *  (c) 2020-26 Stuart Hunter
 *
 *  Mock GPU display driver for testing without hardware
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

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};

use log::warn;

use crate::display::error::{DisplayError, ShaderStage};
use crate::display::traits::{
    BufferId, DisplayCapabilities, DisplayDriver, GpuBackend, ProgramId, TextureFormat, TextureId,
    UniformLocation, VertexArrayId, VertexAttribute,
};

/// Value last written to a uniform
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    F32(f32),
    I32(i32),
    Vec4([f32; 4]),
    Mat4([f32; 16]),
}

/// One recorded texture upload
#[derive(Debug, Clone, PartialEq)]
pub struct TextureUpload {
    pub texture: TextureId,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
}

/// One recorded uniform write
#[derive(Debug, Clone, PartialEq)]
pub struct UniformSet {
    pub program: ProgramId,
    pub name: String,
    pub value: UniformValue,
}

/// Everything the GPU would have needed to render one quad
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub program: Option<ProgramId>,
    pub vertex_array: Option<VertexArrayId>,
    pub texture: Option<TextureId>,
    pub blend: bool,
    pub vertex_count: i32,
    pub uniforms: BTreeMap<String, UniformValue>,
}

/// Contents of a live texture
#[derive(Debug, Clone)]
pub struct MockTexture {
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Default)]
struct MockProgram {
    vertex_src: String,
    fragment_src: String,
    uniforms: BTreeMap<String, UniformValue>,
}

/// Internal state for the mock driver (shared for inspection in tests)
#[derive(Debug, Default)]
pub struct MockDriverState {
    next_name: u32,
    programs: HashMap<ProgramId, MockProgram>,
    locations: HashMap<UniformLocation, (ProgramId, String)>,

    /// Live vertex arrays
    pub vertex_arrays: HashSet<VertexArrayId>,

    /// Live buffers with the attribute location they feed
    pub buffers: HashMap<BufferId, u32>,

    /// Live textures
    pub textures: HashMap<TextureId, MockTexture>,

    /// Every texture upload, in order
    pub uploads: Vec<TextureUpload>,

    /// Every uniform write, in order
    pub uniform_sets: Vec<UniformSet>,

    /// Every draw call, in order
    pub draws: Vec<DrawCall>,

    pub current_program: Option<ProgramId>,
    pub bound_vertex_array: Option<VertexArrayId>,
    pub bound_texture: Option<TextureId>,
    pub blend_enabled: bool,

    /// Total GPU calls of any kind
    pub gl_calls: usize,

    /// Deletes of handles that were not live
    pub double_deletes: usize,

    pub clear_count: usize,
    pub last_clear_color: Option<[f32; 4]>,

    /// Number of times present() succeeded
    pub present_count: usize,

    /// Whether shutdown() ran
    pub is_shut_down: bool,

    /// Live handles left over when shutdown() ran
    pub leaked_at_shutdown: usize,

    /// Simulate failures (for error testing)
    pub simulate_present_failure: bool,
    pub simulate_shader_failure: bool,
    pub simulate_texture_failure: bool,
}

impl MockDriverState {
    fn next_name(&mut self) -> u32 {
        self.next_name += 1;
        self.next_name
    }

    /// Number of live programs
    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    /// Sum of every live handle
    pub fn live_resources(&self) -> usize {
        self.programs.len() + self.vertex_arrays.len() + self.buffers.len() + self.textures.len()
    }

    /// Stable checksum of a texture's contents and dimensions
    pub fn texture_checksum(&self, texture: TextureId) -> Option<u64> {
        self.textures.get(&texture).map(|t| {
            let mut hasher = DefaultHasher::new();
            t.width.hash(&mut hasher);
            t.height.hash(&mut hasher);
            t.pixels.hash(&mut hasher);
            hasher.finish()
        })
    }

    /// Uniform writes by name, in order
    pub fn uniform_writes(&self, name: &str) -> Vec<UniformValue> {
        self.uniform_sets.iter().filter(|u| u.name == name).map(|u| u.value.clone()).collect()
    }

    /// Forget recorded calls but keep the live handles
    pub fn clear_log(&mut self) {
        self.uploads.clear();
        self.uniform_sets.clear();
        self.draws.clear();
        self.gl_calls = 0;
    }
}

/// Mock display driver for testing
///
/// Implements the GPU calls the widgets make and records them, along with
/// every live handle, in a shared `MockDriverState` that tests inspect.
#[derive(Debug, Clone)]
pub struct MockDriver {
    capabilities: DisplayCapabilities,
    state: Arc<Mutex<MockDriverState>>,
}

impl MockDriver {
    /// Create a mock driver with specific dimensions
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            capabilities: DisplayCapabilities { width, height },
            state: Arc::new(Mutex::new(MockDriverState::default())),
        }
    }

    /// Get reference to state for inspection in tests
    pub fn state(&self) -> Arc<Mutex<MockDriverState>> {
        Arc::clone(&self.state)
    }

    fn lock(&self) -> MutexGuard<'_, MockDriverState> {
        // a panicking test must not poison every later inspection
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn call(&self) -> MutexGuard<'_, MockDriverState> {
        let mut state = self.lock();
        state.gl_calls += 1;
        state
    }
}

impl GpuBackend for MockDriver {
    fn create_program(&mut self, vertex_src: &str, fragment_src: &str) -> Result<ProgramId, DisplayError> {
        let mut state = self.call();
        if state.simulate_shader_failure {
            return Err(DisplayError::Shader {
                stage: ShaderStage::Link,
                log: "simulated link failure".into(),
            });
        }
        for (stage, src) in [(ShaderStage::Vertex, vertex_src), (ShaderStage::Fragment, fragment_src)] {
            if !src.trim_start().starts_with("#version 300 es") {
                return Err(DisplayError::Shader { stage, log: "missing #version 300 es".into() });
            }
        }
        let id = ProgramId(state.next_name());
        state.programs.insert(
            id,
            MockProgram {
                vertex_src: vertex_src.to_string(),
                fragment_src: fragment_src.to_string(),
                ..Default::default()
            },
        );
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        let mut state = self.call();
        if state.programs.remove(&program).is_none() {
            warn!("mock: delete of unknown program {}", program.0);
            state.double_deletes += 1;
        }
        state.locations.retain(|_, (owner, _)| *owner != program);
        if state.current_program == Some(program) {
            state.current_program = None;
        }
    }

    fn use_program(&mut self, program: ProgramId) {
        self.call().current_program = Some(program);
    }

    fn attrib_location(&mut self, program: ProgramId, name: &str) -> Option<u32> {
        let state = self.call();
        let src = &state.programs.get(&program)?.vertex_src;
        // location is the order of declaration among the `in` variables
        src.lines()
            .filter(|l| l.trim_start().starts_with("in "))
            .position(|l| l.trim_end_matches(';').split_whitespace().last() == Some(name))
            .map(|p| p as u32)
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let mut state = self.call();
        let declared = {
            let p = state.programs.get(&program)?;
            let decl = |src: &str| {
                src.lines().any(|l| {
                    l.trim_start().starts_with("uniform ")
                        && l.trim_end_matches(';').split_whitespace().last() == Some(name)
                })
            };
            decl(&p.vertex_src) || decl(&p.fragment_src)
        };
        if !declared {
            return None;
        }
        let existing = state
            .locations
            .iter()
            .find(|(_, (owner, n))| *owner == program && n == name)
            .map(|(loc, _)| *loc);
        if existing.is_some() {
            return existing;
        }
        let loc = UniformLocation(state.next_name());
        state.locations.insert(loc, (program, name.to_string()));
        Some(loc)
    }

    fn uniform_f32(&mut self, location: UniformLocation, value: f32) {
        record_uniform(&mut self.call(), location, UniformValue::F32(value));
    }

    fn uniform_i32(&mut self, location: UniformLocation, value: i32) {
        record_uniform(&mut self.call(), location, UniformValue::I32(value));
    }

    fn uniform_vec4(&mut self, location: UniformLocation, value: [f32; 4]) {
        record_uniform(&mut self.call(), location, UniformValue::Vec4(value));
    }

    fn uniform_mat4(&mut self, location: UniformLocation, value: &[f32; 16]) {
        record_uniform(&mut self.call(), location, UniformValue::Mat4(*value));
    }

    fn create_vertex_array(&mut self) -> Result<VertexArrayId, DisplayError> {
        let mut state = self.call();
        let id = VertexArrayId(state.next_name());
        state.vertex_arrays.insert(id);
        Ok(id)
    }

    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayId>) {
        self.call().bound_vertex_array = vertex_array;
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId) {
        let mut state = self.call();
        if !state.vertex_arrays.remove(&vertex_array) {
            warn!("mock: delete of unknown vertex array {}", vertex_array.0);
            state.double_deletes += 1;
        }
    }

    fn create_buffer(&mut self, attribute: &VertexAttribute<'_>) -> Result<BufferId, DisplayError> {
        let mut state = self.call();
        if state.bound_vertex_array.is_none() {
            return Err(DisplayError::Other("buffer created with no vertex array bound".into()));
        }
        if attribute.components <= 0 || attribute.data.len() % attribute.components as usize != 0 {
            return Err(DisplayError::BufferSizeMismatch {
                expected: attribute.components.max(1) as usize,
                actual: attribute.data.len(),
            });
        }
        let id = BufferId(state.next_name());
        state.buffers.insert(id, attribute.location);
        Ok(id)
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        let mut state = self.call();
        if state.buffers.remove(&buffer).is_none() {
            warn!("mock: delete of unknown buffer {}", buffer.0);
            state.double_deletes += 1;
        }
    }

    fn create_texture(&mut self) -> Result<TextureId, DisplayError> {
        let mut state = self.call();
        if state.simulate_texture_failure {
            return Err(DisplayError::ResourceCreation("texture"));
        }
        let id = TextureId(state.next_name());
        state.textures.insert(
            id,
            MockTexture { format: TextureFormat::Rgba8, width: 0, height: 0, pixels: Vec::new() },
        );
        Ok(id)
    }

    fn bind_texture(&mut self, texture: TextureId) {
        self.call().bound_texture = Some(texture);
    }

    fn upload_texture(
        &mut self,
        texture: TextureId,
        format: TextureFormat,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<(), DisplayError> {
        let mut state = self.call();
        let expected = format.expected_len(width, height);
        if pixels.len() != expected {
            return Err(DisplayError::BufferSizeMismatch { expected, actual: pixels.len() });
        }
        let Some(t) = state.textures.get_mut(&texture) else {
            return Err(DisplayError::Other(format!("upload to unknown texture {}", texture.0)));
        };
        *t = MockTexture { format, width, height, pixels: pixels.to_vec() };
        state.bound_texture = Some(texture);
        state.uploads.push(TextureUpload { texture, format, width, height });
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureId) {
        let mut state = self.call();
        if state.textures.remove(&texture).is_none() {
            warn!("mock: delete of unknown texture {}", texture.0);
            state.double_deletes += 1;
        }
        if state.bound_texture == Some(texture) {
            state.bound_texture = None;
        }
    }

    fn set_blend(&mut self, enabled: bool) {
        self.call().blend_enabled = enabled;
    }

    fn draw_triangle_fan(&mut self, vertex_count: i32) {
        let mut state = self.call();
        let uniforms = state
            .current_program
            .and_then(|p| state.programs.get(&p))
            .map(|p| p.uniforms.clone())
            .unwrap_or_default();
        let call = DrawCall {
            program: state.current_program,
            vertex_array: state.bound_vertex_array,
            texture: state.bound_texture,
            blend: state.blend_enabled,
            vertex_count,
            uniforms,
        };
        state.draws.push(call);
    }

    fn clear(&mut self, rgba: [f32; 4]) {
        let mut state = self.call();
        state.clear_count += 1;
        state.last_clear_color = Some(rgba);
    }
}

fn record_uniform(state: &mut MockDriverState, location: UniformLocation, value: UniformValue) {
    let Some((owner, name)) = state.locations.get(&location).cloned() else {
        warn!("mock: write to unknown uniform location {}", location.0);
        return;
    };
    if state.current_program != Some(owner) {
        warn!("mock: uniform '{}' written while program {} is not in use", name, owner.0);
        return;
    }
    if let Some(p) = state.programs.get_mut(&owner) {
        p.uniforms.insert(name.clone(), value.clone());
    }
    state.uniform_sets.push(UniformSet { program: owner, name, value });
}

impl DisplayDriver for MockDriver {
    fn capabilities(&self) -> &DisplayCapabilities {
        &self.capabilities
    }

    fn present(&mut self) -> Result<(), DisplayError> {
        let mut state = self.lock();

        if state.simulate_present_failure {
            return Err(DisplayError::PresentFailed("Simulated present failure".to_string()));
        }

        state.present_count += 1;
        Ok(())
    }

    fn shutdown(self) {
        let mut state = self.lock();
        state.leaked_at_shutdown = state.live_resources();
        state.is_shut_down = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VS: &str = "#version 300 es\nin vec2 vertex;\nin vec2 uv;\nuniform mat4 mv_matrix;\nvoid main() {}\n";
    const FS: &str = "#version 300 es\nprecision mediump float;\nuniform float scale;\nout vec4 color;\nvoid main() {}\n";

    #[test]
    fn test_mock_driver_creation() {
        let driver = MockDriver::new(800, 480);
        assert_eq!(driver.dimensions(), (800, 480));
        assert_eq!(driver.state().lock().unwrap().live_resources(), 0);
    }

    #[test]
    fn test_program_bindings_follow_source() {
        let mut driver = MockDriver::new(800, 480);
        let program = driver.create_program(VS, FS).unwrap();

        assert_eq!(driver.attrib_location(program, "vertex"), Some(0));
        assert_eq!(driver.attrib_location(program, "uv"), Some(1));
        assert_eq!(driver.attrib_location(program, "colour"), None);
        assert!(driver.uniform_location(program, "scale").is_some());
        assert!(driver.uniform_location(program, "shape").is_none());
    }

    #[test]
    fn test_bad_shader_names_stage() {
        let mut driver = MockDriver::new(800, 480);
        let err = driver.create_program(VS, "void main() {}").unwrap_err();
        assert!(matches!(err, DisplayError::Shader { stage: ShaderStage::Fragment, .. }));
        assert_eq!(driver.state().lock().unwrap().program_count(), 0);
    }

    #[test]
    fn test_uniform_snapshot_in_draw() {
        let mut driver = MockDriver::new(800, 480);
        let program = driver.create_program(VS, FS).unwrap();
        let scale = driver.uniform_location(program, "scale").unwrap();

        driver.use_program(program);
        driver.uniform_f32(scale, 0.5);
        driver.draw_triangle_fan(4);

        let state = driver.state();
        let state = state.lock().unwrap();
        assert_eq!(state.draws.len(), 1);
        assert_eq!(state.draws[0].uniforms.get("scale"), Some(&UniformValue::F32(0.5)));
        assert_eq!(state.uniform_writes("scale"), vec![UniformValue::F32(0.5)]);
    }

    #[test]
    fn test_double_delete_is_counted() {
        let mut driver = MockDriver::new(800, 480);
        let texture = driver.create_texture().unwrap();
        driver.delete_texture(texture);
        driver.delete_texture(texture);
        assert_eq!(driver.state().lock().unwrap().double_deletes, 1);
    }

    #[test]
    fn test_upload_size_mismatch() {
        let mut driver = MockDriver::new(800, 480);
        let texture = driver.create_texture().unwrap();
        let result = driver.upload_texture(texture, TextureFormat::Rgba8, 2, 2, &[0u8; 4]);
        assert!(matches!(result, Err(DisplayError::BufferSizeMismatch { expected: 16, actual: 4 })));
    }

    #[test]
    fn test_mock_driver_simulated_failure() {
        let mut driver = MockDriver::new(800, 480);

        driver.state().lock().unwrap().simulate_present_failure = true;
        assert!(driver.present().is_err());

        driver.state().lock().unwrap().simulate_present_failure = false;
        assert!(driver.present().is_ok());
        assert_eq!(driver.state().lock().unwrap().present_count, 1);
    }
}
