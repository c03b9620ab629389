/*
 *  display/components/mod.rs
 *
 *  MPDisplay - now playing, on the Pi
 *  (c) 2020-26 Stuart Hunter
 *
 *  GPU widgets: text, image, thermometer and emblem
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

pub mod text;
pub mod image;
pub mod thermometer;
pub mod emblem;

// Re-exports
pub use text::TextWidget;
pub use image::ImageWidget;
pub use thermometer::ThermometerWidget;
pub use emblem::{Emblem, EmblemWidget};
