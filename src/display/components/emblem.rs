/*
 *  display/components/emblem.rs
 *
 *  MPDisplay - now playing, on the Pi
 *  (c) 2020-26 Stuart Hunter
 *
 *  Emblem widget: stop / play / pause symbol drawn from distance fields
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
uniform mat4 mv_matrix;
in vec2 vertex;
in vec2 corneruv;
out vec2 corner;
void main(void) {
  gl_Position = mv_matrix * vec4( vertex, 0., 1. );
  corner = corneruv;
}
";

// shape 1: octagon, 2: triangle pointing right, 3: two bars
const FRAGMENT_SHADER: &str = "#version 300 es
precision mediump float;
uniform int shape;
in vec2 corner;
out vec4 fragColor;

float sd_box( vec2 p, vec2 b ) {
  vec2 d = abs( p ) - b;
  return length( max( d, 0. ) ) + min( max( d.x, d.y ), 0. );
}

float sd_octagon( vec2 p, float r ) {
  const vec3 k = vec3( -0.9238795325, 0.3826834323, 0.4142135623 );
  p = abs( p );
  p -= 2. * min( dot( k.xy, p ), 0. ) * k.xy;
  p -= 2. * min( dot( vec2( -k.x, k.y ), p ), 0. ) * vec2( -k.x, k.y );
  p -= vec2( clamp( p.x, -k.z * r, k.z * r ), r );
  return length( p ) * sign( p.y );
}

float sd_triangle( vec2 p, vec2 p0, vec2 p1, vec2 p2 ) {
  vec2 e0 = p1 - p0, e1 = p2 - p1, e2 = p0 - p2;
  vec2 v0 = p - p0, v1 = p - p1, v2 = p - p2;
  vec2 pq0 = v0 - e0 * clamp( dot( v0, e0 ) / dot( e0, e0 ), 0., 1. );
  vec2 pq1 = v1 - e1 * clamp( dot( v1, e1 ) / dot( e1, e1 ), 0., 1. );
  vec2 pq2 = v2 - e2 * clamp( dot( v2, e2 ) / dot( e2, e2 ), 0., 1. );
  float s = sign( e0.x * e2.y - e0.y * e2.x );
  vec2 d = min( min( vec2( dot( pq0, pq0 ), s * ( v0.x * e0.y - v0.y * e0.x ) ),
                     vec2( dot( pq1, pq1 ), s * ( v1.x * e1.y - v1.y * e1.x ) ) ),
                     vec2( dot( pq2, pq2 ), s * ( v2.x * e2.y - v2.y * e2.x ) ) );
  return -sqrt( d.x ) * sign( d.y );
}

void main(void) {
  float d;
  if ( shape == 1 ) {
    d = sd_octagon( corner, 0.8 );
  } else if ( shape == 2 ) {
    d = sd_triangle( corner, vec2( -0.6, -0.75 ), vec2( 0.8, 0. ), vec2( -0.6, 0.75 ) );
  } else {
    d = min( sd_box( corner - vec2( 0.35, 0. ), vec2( 0.2, 0.75 ) ),
             sd_box( corner + vec2( 0.35, 0. ), vec2( 0.2, 0.75 ) ) );
  }
  float w = fwidth( d );
  float alpha = 1. - smoothstep( -w, w, d );
  fragColor = vec4( vec3( 0.85 ), alpha );
}
";

/// Player state symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Emblem {
    Stopped,
    Playing,
    Paused,
    #[default]
    NoEmblem,
}

impl Emblem {
    /// Value of the `shape` uniform, None when nothing is drawn
    pub fn shape(self) -> Option<i32> {
        match self {
            Emblem::Stopped => Some(1),
            Emblem::Playing => Some(2),
            Emblem::Paused => Some(3),
            Emblem::NoEmblem => None,
        }
    }
}

pub struct EmblemWidget {
    quad: QuadResources,
    shape: UniformLocation,
    emblem: Emblem,
}

impl EmblemWidget {
    pub fn new<G: GpuBackend + ?Sized>(
        gpu: &mut G,
        rect: MmRect,
        screen: &ScreenGeometry,
    ) -> Result<Self, DisplayError> {
        let mut builder = QuadBuilder::new(gpu, "emblem widget", VERTEX_SHADER, FRAGMENT_SHADER)?;
        let mv_matrix = builder.uniform("mv_matrix")?;
        let shape = builder.uniform("shape")?;
        builder.gpu().uniform_mat4(mv_matrix, &mm_to_clip(rect.x, rect.y, screen));

        let quad = builder
            .attribute("vertex", 2, &quad_vertices(rect.width, rect.height))?
            .attribute("corneruv", 2, &CORNER_UVS)?
            .finish()?;

        Ok(Self { quad, shape, emblem: Emblem::NoEmblem })
    }

    pub fn set_emblem<G: GpuBackend + ?Sized>(&mut self, gpu: &mut G, emblem: Emblem) {
        self.emblem = emblem;
        if let Some(shape) = emblem.shape() {
            gpu.use_program(self.quad.program());
            gpu.uniform_i32(self.shape, shape);
        }
    }

    pub fn emblem(&self) -> Emblem {
        self.emblem
    }

    /// Nothing at all reaches the GPU for `NoEmblem`
    pub fn draw<G: GpuBackend + ?Sized>(&self, gpu: &mut G) {
        if self.emblem == Emblem::NoEmblem {
            return;
        }
        self.quad.draw_blended(gpu);
    }

    pub fn free<G: GpuBackend + ?Sized>(mut self, gpu: &mut G) {
        self.quad.release(gpu);
    }
}
