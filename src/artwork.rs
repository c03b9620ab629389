/*
 *  artwork.rs
 *
 *  MPDisplay - now playing, on the Pi
 *  (c) 2020-26 Stuart Hunter
 *
 *  Album cover lookup in the local SQLite art database and image decoding
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

use std::io::Cursor;
use std::path::Path;

use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{Circle, PrimitiveStyle};
use image::{ImageFormat, ImageReader};
use log::{debug, info, warn};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use thiserror::Error;

use crate::vframebuf::VarFrameBuf;

const COVER_QUERY: &str = "SELECT albums.cover_format, albums.cover_image \
     FROM albums, artists, contributions \
     WHERE artists.name = ?1 AND albums.title = ?2 \
     AND contributions.artist = artists.ROWID \
     AND contributions.album = albums.ROWID";

/// Edge of the built in placeholder cover
pub const PLACEHOLDER_EDGE: u32 = 128;

#[derive(Debug, Error)]
pub enum ArtworkError {
    #[error("Art database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Image decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Image I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Decoded image: 8-bit RGBA, row 0 at the top
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaBitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RgbaBitmap {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Decode a stored cover
///
/// `format_hint` is the database's `cover_format` ("PNG", "jpeg"...). When it
/// is missing, unknown or wrong the format is sniffed from the bytes.
pub fn decode(format_hint: Option<&str>, bytes: &[u8]) -> Result<RgbaBitmap, ArtworkError> {
    let hinted = format_hint
        .and_then(|h| ImageFormat::from_extension(h.trim().to_ascii_lowercase()))
        .map(|format| image::load_from_memory_with_format(bytes, format));

    let decoded = match hinted {
        Some(Ok(img)) => img,
        other => {
            if let Some(Err(e)) = other {
                debug!("Cover is not the {:?} it claims to be ({}), sniffing", format_hint, e);
            }
            ImageReader::new(Cursor::new(bytes)).with_guessed_format()?.decode()?
        }
    };

    let rgba = decoded.to_rgba8();
    Ok(RgbaBitmap { width: rgba.width(), height: rgba.height(), pixels: rgba.into_raw() })
}

/// Decode, or hand back the placeholder on any failure
pub fn decode_or_placeholder(format_hint: Option<&str>, bytes: &[u8]) -> RgbaBitmap {
    match decode(format_hint, bytes) {
        Ok(bitmap) if !bitmap.is_empty() => bitmap,
        Ok(_) => {
            warn!("Cover decoded to an empty image, using placeholder");
            placeholder()
        }
        Err(e) => {
            warn!("{}, using placeholder", e);
            placeholder()
        }
    }
}

/// The "no cover" picture: a record on a dark sleeve
pub fn placeholder() -> RgbaBitmap {
    let edge = PLACEHOLDER_EDGE;
    let centre = Point::new(edge as i32 / 2, edge as i32 / 2);
    let mut fb = VarFrameBuf::new(edge, edge, Rgb888::new(48, 48, 56));

    let discs = [
        (edge - 8, Rgb888::new(16, 16, 16)),
        (edge / 3, Rgb888::new(150, 60, 50)),
        (6, Rgb888::new(48, 48, 56)),
    ];
    for (diameter, colour) in discs {
        // drawing into memory cannot fail
        let _ = Circle::with_center(centre, diameter)
            .into_styled(PrimitiveStyle::with_fill(colour))
            .draw(&mut fb);
    }

    let pixels = fb.as_slice().iter().flat_map(|c| [c.r(), c.g(), c.b(), 255]).collect();
    RgbaBitmap { width: edge, height: edge, pixels }
}

/// Where the surface gets covers from
pub trait CoverArt {
    /// Always yields a picture, the placeholder when there is no cover
    fn cover_for(&mut self, artist: &str, album: &str) -> RgbaBitmap;
}

/// Read-only view of the album art database
///
/// The connection stays open for the life of the process. Every lookup
/// that cannot produce a picture yields the placeholder instead.
pub struct CoverArtStore {
    conn: Option<Connection>,
}

impl CoverArtStore {
    pub fn open(path: &Path) -> Result<Self, ArtworkError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        info!("Opened album art database {}", path.display());
        Ok(Self { conn: Some(conn) })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn: Some(conn) }
    }

    /// A store with no database, every lookup is the placeholder
    pub fn without_database() -> Self {
        Self { conn: None }
    }

    pub fn has_database(&self) -> bool {
        self.conn.is_some()
    }

    /// Cover for (artist, album); never fails
    pub fn lookup(&self, artist: &str, album: &str) -> RgbaBitmap {
        match self.fetch(artist, album) {
            Ok(Some((format, blob))) => decode_or_placeholder(format.as_deref(), &blob),
            Ok(None) => {
                debug!("No cover for '{}' / '{}'", artist, album);
                placeholder()
            }
            Err(e) => {
                warn!("Cover lookup for '{}' / '{}' failed: {}", artist, album, e);
                placeholder()
            }
        }
    }

    fn fetch(&self, artist: &str, album: &str) -> Result<Option<(Option<String>, Vec<u8>)>, ArtworkError> {
        let Some(conn) = &self.conn else {
            return Ok(None);
        };
        let mut stmt = conn.prepare_cached(COVER_QUERY)?;
        let row = stmt
            .query_row(params![artist, album], |row| {
                Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<Vec<u8>>>(1)?))
            })
            .optional()?;

        // a NULL blob is the same as no row
        Ok(row.and_then(|(format, blob)| blob.map(|b| (format, b))))
    }
}

impl CoverArt for CoverArtStore {
    fn cover_for(&mut self, artist: &str, album: &str) -> RgbaBitmap {
        self.lookup(artist, album)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png_bytes(width: u32, height: u32, pixel: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba(pixel));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn store_with(rows: &[(&str, &str, Option<&str>, Option<Vec<u8>>)]) -> CoverArtStore {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE artists ( name text );
             CREATE TABLE albums ( title text, cover_format text, cover_image blob );
             CREATE TABLE contributions ( artist integer, album integer );",
        )
        .unwrap();
        for (artist, album, format, blob) in rows {
            conn.execute("INSERT INTO artists VALUES (?1)", params![artist]).unwrap();
            conn.execute("INSERT INTO albums VALUES (?1, ?2, ?3)", params![album, format, blob]).unwrap();
            conn.execute(
                "INSERT INTO contributions SELECT artists.ROWID, albums.ROWID FROM artists, albums \
                 WHERE artists.name = ?1 AND albums.title = ?2",
                params![artist, album],
            )
            .unwrap();
        }
        CoverArtStore::from_connection(conn)
    }

    #[test]
    fn test_decode_png() {
        let bitmap = decode(Some("PNG"), &png_bytes(3, 2, [10, 20, 30, 255])).unwrap();
        assert_eq!((bitmap.width, bitmap.height), (3, 2));
        assert_eq!(bitmap.pixels.len(), 3 * 2 * 4);
        assert_eq!(&bitmap.pixels[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_decode_sniffs_wrong_or_missing_hint() {
        let bytes = png_bytes(2, 2, [1, 2, 3, 255]);
        assert!(decode(Some("JPEG"), &bytes).is_ok());
        assert!(decode(Some("tiff?"), &bytes).is_ok());
        assert!(decode(None, &bytes).is_ok());
    }

    #[test]
    fn test_garbage_falls_back_to_placeholder() {
        assert!(decode(Some("PNG"), b"not an image").is_err());
        assert_eq!(decode_or_placeholder(Some("PNG"), b"not an image"), placeholder());
        assert_eq!(decode_or_placeholder(None, &[]), placeholder());
    }

    #[test]
    fn test_placeholder_is_opaque_square() {
        let p = placeholder();
        assert_eq!((p.width, p.height), (PLACEHOLDER_EDGE, PLACEHOLDER_EDGE));
        assert_eq!(p.pixels.len(), (PLACEHOLDER_EDGE * PLACEHOLDER_EDGE * 4) as usize);
        assert!(p.pixels.chunks(4).all(|px| px[3] == 255));
    }

    #[test]
    fn test_lookup_hit() {
        let store = store_with(&[("Nick Drake", "Pink Moon", Some("PNG"), Some(png_bytes(4, 4, [9, 9, 9, 255])))]);
        let cover = store.lookup("Nick Drake", "Pink Moon");
        assert_eq!((cover.width, cover.height), (4, 4));
    }

    #[test]
    fn test_lookup_misses_give_placeholder() {
        let store = store_with(&[
            ("Nick Drake", "Bryter Layter", None, None),
            ("Nick Drake", "Five Leaves Left", Some("PNG"), Some(b"corrupt".to_vec())),
        ]);
        assert_eq!(store.lookup("Nick Drake", "Pink Moon"), placeholder());
        assert_eq!(store.lookup("Nick Drake", "Bryter Layter"), placeholder());
        assert_eq!(store.lookup("Nick Drake", "Five Leaves Left"), placeholder());
        assert_eq!(store.lookup("", ""), placeholder());
    }

    #[test]
    fn test_database_error_gives_placeholder() {
        // no tables at all
        let store = CoverArtStore::from_connection(Connection::open_in_memory().unwrap());
        assert_eq!(store.lookup("a", "b"), placeholder());
        assert_eq!(CoverArtStore::without_database().lookup("a", "b"), placeholder());
    }

    #[test]
    fn test_open_missing_file_fails() {
        let path = std::env::temp_dir().join("mpdisplay-no-such-dir/album_art.sqlite3");
        assert!(CoverArtStore::open(&path).is_err());
    }
}
