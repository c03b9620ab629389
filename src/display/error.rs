/*
 *  display/error.rs
 *
 *  MPDisplay - now playing, on the Pi
 *  (c) 2020-26 Stuart Hunter
 *
 *  Unified error types for display subsystem
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

use thiserror::Error;

/// Which shader stage failed to build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Link,
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShaderStage::Vertex => write!(f, "vertex"),
            ShaderStage::Fragment => write!(f, "fragment"),
            ShaderStage::Link => write!(f, "link"),
        }
    }
}

/// Unified error type for all display operations
#[derive(Debug, Error)]
pub enum DisplayError {
    /// GPU context / native window acquisition failed
    #[error("Display initialization failed: {0}")]
    InitializationFailed(String),

    /// No DRM device produced a usable connector/mode/CRTC/config
    #[error("Could not find any useful DRM devices")]
    NoUsableDevice,

    /// EGL call failed
    #[error("EGL error: {0}")]
    Egl(String),

    /// Shader compile or program link failed, with the info log
    #[error("{stage} shader error: {log}")]
    Shader { stage: ShaderStage, log: String },

    /// A GPU object could not be created
    #[error("Failed to create {0}")]
    ResourceCreation(&'static str),

    /// Vertex attribute or uniform missing from a linked program
    #[error("Program has no attribute or uniform named '{0}'")]
    MissingBinding(String),

    /// Pixel data does not match the advertised texture size
    #[error("Buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// Text layout or rasterization failed
    #[error("Text rendering failed: {0}")]
    Text(String),

    /// Buffer swap or mode set failed
    #[error("Present failed: {0}")]
    PresentFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Backlight write failed
    #[error("Backlight error: {0}")]
    Backlight(#[from] std::io::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
