/*
 *  display/mod.rs
 *
 *  MPDisplay - now playing, on the Pi
 *  (c) 2020-26 Stuart Hunter
 *
 *  Display subsystem - GPU abstraction, millimetre layout, widgets and surface
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

// Core trait definitions
pub mod traits;
pub mod error;

// Display drivers
pub mod drivers;

// Millimetre layout and shader-program plumbing
pub mod layout;
pub mod program;

// Text: pango layout into a coverage bitmap
pub mod text_layout;

// UI components
pub mod components;

// Display surface
pub mod manager;

// Re-exports for convenience
pub use traits::{DisplayCapabilities, DisplayDriver, GpuBackend, TextureFormat};
pub use error::{DisplayError, ShaderStage};
pub use layout::{LayoutConfig, MmRect, ScreenGeometry, ScreenLayout};
pub use components::{Emblem, EmblemWidget, ImageWidget, TextWidget, ThermometerWidget};
pub use text_layout::Alignment;
pub use manager::{DisplaySurface, SurfaceConfig, SurfaceStatus, TouchEvent};
