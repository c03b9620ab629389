/*
 *  display/drivers/kms.rs
 *
 *  MPDisplay - now playing, on the Pi
 *  (c) 2020-26 Stuart Hunter
 *
 *  DRM/KMS scan-out through GBM and EGL, GL ES 3 through glow
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

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::num::NonZeroU32;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};

use drm::control::{connector, crtc, framebuffer, Device as ControlDevice, Mode, ModeTypeFlags};
use gbm::{AsRaw, BufferObject, BufferObjectFlags};
use glow::HasContext;
use khronos_egl as egl;
use log::{debug, info, warn};

use crate::display::error::{DisplayError, ShaderStage};
use crate::display::traits::{
    BufferId, DisplayCapabilities, DisplayDriver, GpuBackend, ProgramId, TextureFormat, TextureId,
    UniformLocation, VertexArrayId, VertexAttribute,
};

const DRI_DIR: &str = "/dev/dri";

/// DRM node wrapper so the drm traits can be implemented on it
struct Card(File);

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl drm::Device for Card {}
impl ControlDevice for Card {}

type Egl = egl::DynamicInstance<egl::EGL1_4>;

fn init_err(what: &str, e: impl std::fmt::Display) -> DisplayError {
    DisplayError::InitializationFailed(format!("{what}: {e}"))
}

fn egl_err(what: &str, e: egl::Error) -> DisplayError {
    DisplayError::Egl(format!("{what}: {e}"))
}

fn present_err(what: &str, e: impl std::fmt::Display) -> DisplayError {
    DisplayError::PresentFailed(format!("{what}: {e}"))
}

/// The output a device can drive
struct Output {
    connector: connector::Handle,
    crtc: crtc::Handle,
    mode: Mode,
    saved_crtc: Option<crtc::Info>,
}

fn find_output(card: &Card) -> Result<Output, DisplayError> {
    let resources = card.resource_handles().map_err(|e| init_err("resource handles", e))?;

    let info = resources
        .connectors()
        .iter()
        .filter_map(|&handle| card.get_connector(handle, false).ok())
        .find(|c| c.state() == connector::State::Connected && !c.modes().is_empty())
        .ok_or_else(|| DisplayError::InitializationFailed("no connected connector".into()))?;

    let mode = info
        .modes()
        .iter()
        .find(|m| m.mode_type().contains(ModeTypeFlags::PREFERRED))
        .or_else(|| info.modes().first())
        .copied()
        .ok_or_else(|| DisplayError::InitializationFailed("connector has no modes".into()))?;

    let encoder = info
        .current_encoder()
        .or_else(|| info.encoders().first().copied())
        .ok_or_else(|| DisplayError::InitializationFailed("connector has no encoder".into()))?;
    let encoder = card.get_encoder(encoder).map_err(|e| init_err("encoder", e))?;

    let crtc = encoder
        .crtc()
        .or_else(|| resources.filter_crtcs(encoder.possible_crtcs()).first().copied())
        .ok_or_else(|| DisplayError::InitializationFailed("no CRTC for encoder".into()))?;

    let (w, h) = mode.size();
    info!("Connector {:?} mode {}x{}@{}", info.interface(), w, h, mode.vrefresh());

    Ok(Output { connector: info.handle(), crtc, mode, saved_crtc: card.get_crtc(crtc).ok() })
}

/// EGL objects bound to the GBM surface
struct EglParts {
    display: egl::Display,
    context: egl::Context,
    surface: egl::Surface,
}

fn init_egl(egl: &Egl, gbm: &gbm::Device<Card>, gbm_surface: &gbm::Surface<()>) -> Result<EglParts, DisplayError> {
    // SAFETY: the GBM device outlives the EGL display, torn down in shutdown
    let display = unsafe { egl.get_display(gbm.as_raw() as egl::NativeDisplayType) }
        .ok_or_else(|| DisplayError::Egl("no display for the GBM device".into()))?;
    let (major, minor) = egl.initialize(display).map_err(|e| egl_err("initialize", e))?;
    debug!("EGL {}.{}", major, minor);

    let parts = (|| {
        egl.bind_api(egl::OPENGL_ES_API).map_err(|e| egl_err("bind api", e))?;

        let attributes = [
            egl::RED_SIZE, 8,
            egl::GREEN_SIZE, 8,
            egl::BLUE_SIZE, 8,
            egl::SURFACE_TYPE, egl::WINDOW_BIT,
            egl::RENDERABLE_TYPE, egl::OPENGL_ES2_BIT,
            egl::NONE,
        ];
        let mut configs = Vec::with_capacity(64);
        egl.choose_config(display, &attributes, &mut configs).map_err(|e| egl_err("choose config", e))?;

        // the visual has to match the GBM surface format exactly
        let argb = gbm::Format::Argb8888 as egl::Int;
        let config = configs
            .into_iter()
            .find(|&c| egl.get_config_attrib(display, c, egl::NATIVE_VISUAL_ID).ok() == Some(argb))
            .ok_or_else(|| DisplayError::Egl("no ARGB8888 config".into()))?;

        let context = egl
            .create_context(display, config, None, &[egl::CONTEXT_CLIENT_VERSION, 3, egl::NONE])
            .map_err(|e| egl_err("create context", e))?;

        // SAFETY: the GBM surface outlives the EGL surface
        let surface = match unsafe {
            egl.create_window_surface(display, config, gbm_surface.as_raw() as egl::NativeWindowType, None)
        } {
            Ok(surface) => surface,
            Err(e) => {
                let _ = egl.destroy_context(display, context);
                return Err(egl_err("create window surface", e));
            }
        };

        if let Err(e) = egl.make_current(display, Some(surface), Some(surface), Some(context)) {
            let _ = egl.destroy_surface(display, surface);
            let _ = egl.destroy_context(display, context);
            return Err(egl_err("make current", e));
        }
        Ok(EglParts { display, context, surface })
    })();

    if parts.is_err() {
        let _ = egl.terminate(display);
    }
    parts
}

/// A connected DRM output with a current GL ES 3 context
pub struct KmsDriver {
    // scanned out buffer, released when the next one is shown
    front: Option<BufferObject<()>>,
    framebuffers: HashMap<usize, framebuffer::Handle>,
    gl: glow::Context,
    egl_parts: EglParts,
    egl: Egl,
    gbm_surface: gbm::Surface<()>,
    gbm: gbm::Device<Card>,
    output: Output,
    caps: DisplayCapabilities,
    path: PathBuf,
}

impl KmsDriver {
    /// First device under /dev/dri that yields a working output
    pub fn open_first() -> Result<Self, DisplayError> {
        let mut cards: Vec<PathBuf> = fs::read_dir(DRI_DIR)
            .map_err(|e| init_err(DRI_DIR, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with("card")))
            .collect();
        cards.sort();

        for path in cards {
            match Self::open(&path) {
                Ok(driver) => return Ok(driver),
                Err(e) => warn!("{} unusable: {}", path.display(), e),
            }
        }
        Err(DisplayError::NoUsableDevice)
    }

    pub fn open(path: &Path) -> Result<Self, DisplayError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| init_err(&path.display().to_string(), e))?;
        let card = Card(file);
        let output = find_output(&card)?;
        let (width, height) = output.mode.size();
        let (width, height) = (u32::from(width), u32::from(height));

        let gbm = gbm::Device::new(card).map_err(|e| init_err("GBM device", e))?;
        let gbm_surface = gbm
            .create_surface::<()>(
                width,
                height,
                gbm::Format::Argb8888,
                BufferObjectFlags::SCANOUT | BufferObjectFlags::RENDERING,
            )
            .map_err(|e| init_err("GBM surface", e))?;

        // SAFETY: libEGL is loaded once and kept for the life of the driver
        let egl = unsafe { Egl::load_required() }.map_err(|e| init_err("loading libEGL", e))?;
        let egl_parts = init_egl(&egl, &gbm, &gbm_surface)?;

        // SAFETY: the context made current above stays current on this thread
        let gl = unsafe {
            glow::Context::from_loader_function(|name| {
                egl.get_proc_address(name).map_or(std::ptr::null(), |f| f as *const _)
            })
        };
        unsafe {
            gl.viewport(0, 0, width as i32, height as i32);
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            gl.blend_func(glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA);
        }

        info!("GL ES ready on {} at {}x{}", path.display(), width, height);
        Ok(Self {
            front: None,
            framebuffers: HashMap::new(),
            gl,
            egl_parts,
            egl,
            gbm_surface,
            gbm,
            output,
            caps: DisplayCapabilities { width, height },
            path: path.to_path_buf(),
        })
    }

    fn compile(&self, stage: ShaderStage, kind: u32, source: &str) -> Result<glow::NativeShader, DisplayError> {
        unsafe {
            let shader = self
                .gl
                .create_shader(kind)
                .map_err(|log| DisplayError::Shader { stage, log })?;
            self.gl.shader_source(shader, source);
            self.gl.compile_shader(shader);
            if !self.gl.get_shader_compile_status(shader) {
                let log = self.gl.get_shader_info_log(shader);
                self.gl.delete_shader(shader);
                return Err(DisplayError::Shader { stage, log });
            }
            Ok(shader)
        }
    }
}

fn native_program(id: ProgramId) -> Option<glow::NativeProgram> {
    NonZeroU32::new(id.0).map(glow::NativeProgram)
}

fn native_vertex_array(id: VertexArrayId) -> Option<glow::NativeVertexArray> {
    NonZeroU32::new(id.0).map(glow::NativeVertexArray)
}

fn native_buffer(id: BufferId) -> Option<glow::NativeBuffer> {
    NonZeroU32::new(id.0).map(glow::NativeBuffer)
}

fn native_texture(id: TextureId) -> Option<glow::NativeTexture> {
    NonZeroU32::new(id.0).map(glow::NativeTexture)
}

fn native_uniform(location: UniformLocation) -> glow::NativeUniformLocation {
    glow::NativeUniformLocation(location.0)
}

// All GL calls below are unsafe only because glow cannot check the context
// is current; KmsDriver keeps it current on the thread that owns it.
impl GpuBackend for KmsDriver {
    fn create_program(&mut self, vertex_src: &str, fragment_src: &str) -> Result<ProgramId, DisplayError> {
        let vertex = self.compile(ShaderStage::Vertex, glow::VERTEX_SHADER, vertex_src)?;
        let fragment = match self.compile(ShaderStage::Fragment, glow::FRAGMENT_SHADER, fragment_src) {
            Ok(fragment) => fragment,
            Err(e) => {
                unsafe { self.gl.delete_shader(vertex) };
                return Err(e);
            }
        };

        unsafe {
            let program = match self.gl.create_program() {
                Ok(program) => program,
                Err(log) => {
                    self.gl.delete_shader(vertex);
                    self.gl.delete_shader(fragment);
                    return Err(DisplayError::Shader { stage: ShaderStage::Link, log });
                }
            };
            self.gl.attach_shader(program, vertex);
            self.gl.attach_shader(program, fragment);
            self.gl.link_program(program);
            let linked = self.gl.get_program_link_status(program);

            self.gl.detach_shader(program, vertex);
            self.gl.detach_shader(program, fragment);
            self.gl.delete_shader(vertex);
            self.gl.delete_shader(fragment);

            if !linked {
                let log = self.gl.get_program_info_log(program);
                self.gl.delete_program(program);
                return Err(DisplayError::Shader { stage: ShaderStage::Link, log });
            }
            Ok(ProgramId(program.0.get()))
        }
    }

    fn delete_program(&mut self, program: ProgramId) {
        if let Some(p) = native_program(program) {
            unsafe { self.gl.delete_program(p) };
        }
    }

    fn use_program(&mut self, program: ProgramId) {
        unsafe { self.gl.use_program(native_program(program)) };
    }

    fn attrib_location(&mut self, program: ProgramId, name: &str) -> Option<u32> {
        let p = native_program(program)?;
        unsafe { self.gl.get_attrib_location(p, name) }
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let p = native_program(program)?;
        unsafe { self.gl.get_uniform_location(p, name) }.map(|l| UniformLocation(l.0))
    }

    fn uniform_f32(&mut self, location: UniformLocation, value: f32) {
        unsafe { self.gl.uniform_1_f32(Some(&native_uniform(location)), value) };
    }

    fn uniform_i32(&mut self, location: UniformLocation, value: i32) {
        unsafe { self.gl.uniform_1_i32(Some(&native_uniform(location)), value) };
    }

    fn uniform_vec4(&mut self, location: UniformLocation, value: [f32; 4]) {
        let [r, g, b, a] = value;
        unsafe { self.gl.uniform_4_f32(Some(&native_uniform(location)), r, g, b, a) };
    }

    fn uniform_mat4(&mut self, location: UniformLocation, value: &[f32; 16]) {
        unsafe { self.gl.uniform_matrix_4_f32_slice(Some(&native_uniform(location)), false, value) };
    }

    fn create_vertex_array(&mut self) -> Result<VertexArrayId, DisplayError> {
        unsafe { self.gl.create_vertex_array() }
            .map(|v| VertexArrayId(v.0.get()))
            .map_err(|_| DisplayError::ResourceCreation("vertex array"))
    }

    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayId>) {
        unsafe { self.gl.bind_vertex_array(vertex_array.and_then(native_vertex_array)) };
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayId) {
        if let Some(v) = native_vertex_array(vertex_array) {
            unsafe { self.gl.delete_vertex_array(v) };
        }
    }

    fn create_buffer(&mut self, attribute: &VertexAttribute<'_>) -> Result<BufferId, DisplayError> {
        let bytes: Vec<u8> = attribute.data.iter().flat_map(|f| f.to_ne_bytes()).collect();
        unsafe {
            let buffer = self
                .gl
                .create_buffer()
                .map_err(|_| DisplayError::ResourceCreation("vertex buffer"))?;
            self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
            self.gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, &bytes, glow::STATIC_DRAW);
            self.gl
                .vertex_attrib_pointer_f32(attribute.location, attribute.components, glow::FLOAT, false, 0, 0);
            self.gl.enable_vertex_attrib_array(attribute.location);
            self.gl.bind_buffer(glow::ARRAY_BUFFER, None);
            Ok(BufferId(buffer.0.get()))
        }
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        if let Some(b) = native_buffer(buffer) {
            unsafe { self.gl.delete_buffer(b) };
        }
    }

    fn create_texture(&mut self) -> Result<TextureId, DisplayError> {
        unsafe {
            let texture = self
                .gl
                .create_texture()
                .map_err(|_| DisplayError::ResourceCreation("texture"))?;
            self.gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            self.gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
            self.gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
            self.gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
            self.gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
            Ok(TextureId(texture.0.get()))
        }
    }

    fn bind_texture(&mut self, texture: TextureId) {
        unsafe {
            self.gl.active_texture(glow::TEXTURE0);
            self.gl.bind_texture(glow::TEXTURE_2D, native_texture(texture));
        }
    }

    fn upload_texture(
        &mut self,
        texture: TextureId,
        format: TextureFormat,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<(), DisplayError> {
        let expected = format.expected_len(width, height);
        if pixels.len() != expected {
            return Err(DisplayError::BufferSizeMismatch { expected, actual: pixels.len() });
        }
        let (internal, layout) = match format {
            TextureFormat::Rgba8 => (glow::RGBA8, glow::RGBA),
            TextureFormat::Coverage8 => (glow::R8, glow::RED),
        };
        self.bind_texture(texture);
        unsafe {
            self.gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                internal as i32,
                width as i32,
                height as i32,
                0,
                layout,
                glow::UNSIGNED_BYTE,
                Some(pixels),
            );
        }
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if let Some(t) = native_texture(texture) {
            unsafe { self.gl.delete_texture(t) };
        }
    }

    fn set_blend(&mut self, enabled: bool) {
        unsafe {
            if enabled {
                self.gl.enable(glow::BLEND);
            } else {
                self.gl.disable(glow::BLEND);
            }
        }
    }

    fn draw_triangle_fan(&mut self, vertex_count: i32) {
        unsafe { self.gl.draw_arrays(glow::TRIANGLE_FAN, 0, vertex_count) };
    }

    fn clear(&mut self, rgba: [f32; 4]) {
        let [r, g, b, a] = rgba;
        unsafe {
            self.gl.clear_color(r, g, b, a);
            self.gl.clear(glow::COLOR_BUFFER_BIT);
        }
    }
}

impl DisplayDriver for KmsDriver {
    fn capabilities(&self) -> &DisplayCapabilities {
        &self.caps
    }

    /// Swap, then scan out the new front buffer. A framebuffer is made for
    /// each GBM buffer the first time it is seen and reused after that.
    fn present(&mut self) -> Result<(), DisplayError> {
        self.egl
            .swap_buffers(self.egl_parts.display, self.egl_parts.surface)
            .map_err(|e| present_err("swap buffers", e))?;

        // SAFETY: called once per swap, the buffer is released by drop
        let bo = unsafe { self.gbm_surface.lock_front_buffer() }.map_err(|e| present_err("lock front buffer", e))?;

        let key = bo.as_raw() as usize;
        let fb = match self.framebuffers.get(&key) {
            Some(&fb) => fb,
            None => {
                let fb = self.gbm.add_framebuffer(&bo, 24, 32).map_err(|e| present_err("add framebuffer", e))?;
                debug!("New framebuffer {:?} for buffer {:#x}", fb, key);
                self.framebuffers.insert(key, fb);
                fb
            }
        };

        self.gbm
            .set_crtc(self.output.crtc, Some(fb), (0, 0), &[self.output.connector], Some(self.output.mode))
            .map_err(|e| present_err("set CRTC", e))?;

        // dropping the previous front hands it back to the surface
        self.front = Some(bo);
        Ok(())
    }

    fn shutdown(self) {
        let KmsDriver {
            front,
            framebuffers,
            gl,
            egl_parts,
            egl,
            gbm_surface,
            gbm,
            output,
            path,
            ..
        } = self;

        if let Some(saved) = &output.saved_crtc {
            if let Err(e) = gbm.set_crtc(output.crtc, saved.framebuffer(), saved.position(), &[output.connector], saved.mode()) {
                warn!("Could not restore the previous mode: {}", e);
            }
        }
        for fb in framebuffers.into_values() {
            let _ = gbm.destroy_framebuffer(fb);
        }
        drop(front);
        drop(gl);

        let _ = egl.make_current(egl_parts.display, None, None, None);
        let _ = egl.destroy_surface(egl_parts.display, egl_parts.surface);
        let _ = egl.destroy_context(egl_parts.display, egl_parts.context);
        let _ = egl.terminate(egl_parts.display);

        drop(gbm_surface);
        drop(gbm);
        info!("Released {}", path.display());
    }
}
