/*
 *  display/manager.rs
 *
 *  MPDisplay - now playing, on the Pi
 *  (c) 2020-26 Stuart Hunter
 *
 *  Display surface - owns the driver and widgets, runs update, draw, present
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

use std::fmt::Write;
use std::fs;
use std::path::PathBuf;

use arrayvec::ArrayString;
use log::{debug, error, info, warn};

use crate::artwork::{CoverArt, RgbaBitmap};
use crate::display::components::{Emblem, EmblemWidget, ImageWidget, TextWidget, ThermometerWidget};
use crate::display::error::DisplayError;
use crate::display::layout::{LayoutConfig, ScreenGeometry, ScreenLayout, PI_TOUCH_HEIGHT_MM, PI_TOUCH_WIDTH_MM};
use crate::display::text_layout::{escape, Alignment};
use crate::display::traits::{DisplayDriver, GpuBackend};
use crate::player::{Changed, PlayStatus, PlayerSnapshot};

/// Clear colour behind the widgets
pub const BACKGROUND: [f32; 4] = [0.0, 0.25, 0.25, 1.0];

/// Official Pi touch screen backlight control
pub const DEFAULT_BACKLIGHT: &str = "/sys/class/backlight/rpi_backlight/brightness";

/// Normal text is this many font units tall
const FONT_UNITS_PER_LINE: f32 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceStatus {
    Ready,
    /// The last present failed
    Failed,
}

/// A touch in screen pixels, origin top left
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchEvent {
    pub x: u32,
    pub y: u32,
}

/// Physical screen plus layout knobs
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceConfig {
    pub width_mm: f32,
    pub height_mm: f32,
    pub layout: LayoutConfig,
    /// Pixel height of normal text, derived from the layout when unset
    pub font_px: Option<f32>,
    /// Brightness file written on touch; None disables it
    pub backlight: Option<PathBuf>,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            width_mm: PI_TOUCH_WIDTH_MM,
            height_mm: PI_TOUCH_HEIGHT_MM,
            layout: LayoutConfig::default(),
            font_px: None,
            backlight: Some(PathBuf::from(DEFAULT_BACKLIGHT)),
        }
    }
}

fn default_font_px(screen: &ScreenGeometry, layout: &LayoutConfig) -> f32 {
    let (_, dpmm_y) = screen.dpmm();
    layout.font_size * FONT_UNITS_PER_LINE * dpmm_y
}

/// `artist`, italic album, bold title; each escaped
pub fn metadata_markup(artist: &str, album: &str, title: &str) -> String {
    format!("{}\n<i>{}</i>\n<b>{}</b>", escape(artist), escape(album), escape(title))
}

/// "MM:SS / MM:SS"
pub fn format_time<const N: usize>(buf: &mut ArrayString<N>, elapsed: u32, total: u32) {
    buf.clear();
    if write!(buf, "{:02}:{:02} / {:02}:{:02}", elapsed / 60, elapsed % 60, total / 60, total % 60).is_err() {
        warn!("Time text truncated at {} bytes", N);
    }
}

/// Stopped only shows when there is something to have stopped
pub fn emblem_for(snapshot: &PlayerSnapshot) -> Emblem {
    match snapshot.play_status() {
        PlayStatus::Playing => Emblem::Playing,
        PlayStatus::Paused => Emblem::Paused,
        PlayStatus::Stopped if snapshot.artist().is_empty() || snapshot.album().is_empty() => Emblem::NoEmblem,
        PlayStatus::Stopped => Emblem::Stopped,
        PlayStatus::NoSong => Emblem::NoEmblem,
    }
}

/// Top of the screen is full brightness
pub fn brightness_for(y: u32, height_px: u32) -> u8 {
    let fraction = (y as f32 / height_px.max(1) as f32).clamp(0.0, 1.0);
    (255.0 * (1.0 - fraction)) as u8
}

struct Widgets {
    metadata: TextWidget,
    time: TextWidget,
    cover: ImageWidget,
    thermometer: ThermometerWidget,
    emblem: EmblemWidget,
}

impl Widgets {
    fn build<G: GpuBackend + ?Sized>(
        gpu: &mut G,
        layout: &ScreenLayout,
        screen: &ScreenGeometry,
        font_px: f32,
        cover: &RgbaBitmap,
    ) -> Result<Self, DisplayError> {
        let mut partial = PartialWidgets::default();
        if let Err(e) = partial.fill(gpu, layout, screen, font_px, cover) {
            partial.free(gpu);
            return Err(e);
        }
        partial.complete().map_err(|partial| {
            partial.free(gpu);
            DisplayError::InitializationFailed("widget set incomplete".into())
        })
    }

    /// Back to front; the emblem sits over the metadata
    fn draw<G: GpuBackend + ?Sized>(&self, gpu: &mut G) {
        self.metadata.draw(gpu);
        self.cover.draw(gpu);
        self.thermometer.draw(gpu);
        self.time.draw(gpu);
        self.emblem.draw(gpu);
    }

    fn free<G: GpuBackend + ?Sized>(self, gpu: &mut G) {
        self.metadata.free(gpu);
        self.time.free(gpu);
        self.cover.free(gpu);
        self.thermometer.free(gpu);
        self.emblem.free(gpu);
    }
}

/// Widgets built so far, so a failure half way can release them
#[derive(Default)]
struct PartialWidgets {
    metadata: Option<TextWidget>,
    time: Option<TextWidget>,
    cover: Option<ImageWidget>,
    thermometer: Option<ThermometerWidget>,
    emblem: Option<EmblemWidget>,
}

impl PartialWidgets {
    fn fill<G: GpuBackend + ?Sized>(
        &mut self,
        gpu: &mut G,
        layout: &ScreenLayout,
        screen: &ScreenGeometry,
        font_px: f32,
        cover: &RgbaBitmap,
    ) -> Result<(), DisplayError> {
        self.metadata = Some(TextWidget::new(gpu, layout.metadata, screen, font_px)?);
        self.time
            .insert(TextWidget::new(gpu, layout.time, screen, font_px)?)
            .set_alignment(Alignment::Center);
        self.cover
            .insert(ImageWidget::new(gpu, layout.cover, screen)?)
            .set_image(gpu, cover)?;
        self.thermometer = Some(ThermometerWidget::new(gpu, layout.thermometer, screen, layout.round_radius)?);
        self.emblem = Some(EmblemWidget::new(gpu, layout.emblem, screen)?);
        Ok(())
    }

    fn complete(self) -> Result<Widgets, Self> {
        match self {
            PartialWidgets {
                metadata: Some(metadata),
                time: Some(time),
                cover: Some(cover),
                thermometer: Some(thermometer),
                emblem: Some(emblem),
            } => Ok(Widgets { metadata, time, cover, thermometer, emblem }),
            partial => Err(partial),
        }
    }

    fn free<G: GpuBackend + ?Sized>(self, gpu: &mut G) {
        if let Some(w) = self.metadata {
            w.free(gpu);
        }
        if let Some(w) = self.time {
            w.free(gpu);
        }
        if let Some(w) = self.cover {
            w.free(gpu);
        }
        if let Some(w) = self.thermometer {
            w.free(gpu);
        }
        if let Some(w) = self.emblem {
            w.free(gpu);
        }
    }
}

/// The one screen: driver, layout and widgets
///
/// Each tick the widgets whose data changed are refreshed, then every
/// widget is drawn and the frame presented.
pub struct DisplaySurface<D: DisplayDriver> {
    driver: D,
    screen: ScreenGeometry,
    widgets: Widgets,
    status: SurfaceStatus,
    backlight: Option<PathBuf>,
    time_text: ArrayString<32>,
}

impl<D: DisplayDriver> DisplaySurface<D> {
    /// Builds every widget; the cover starts as `initial_cover`
    ///
    /// On failure the driver is shut down and no surface exists.
    pub fn new(mut driver: D, config: &SurfaceConfig, initial_cover: &RgbaBitmap) -> Result<Self, DisplayError> {
        let (width_px, height_px) = driver.dimensions();
        let screen = match ScreenGeometry::new(config.width_mm, config.height_mm, width_px, height_px) {
            Ok(screen) => screen,
            Err(e) => {
                driver.shutdown();
                return Err(e);
            }
        };
        let layout = ScreenLayout::compute(&screen, &config.layout);
        let font_px = config.font_px.unwrap_or_else(|| default_font_px(&screen, &config.layout));

        let widgets = match Widgets::build(&mut driver, &layout, &screen, font_px, initial_cover) {
            Ok(widgets) => widgets,
            Err(e) => {
                error!("Widget setup failed: {}", e);
                driver.shutdown();
                return Err(e);
            }
        };

        info!(
            "Display surface {}x{} px on {:.2}x{:.2} mm, text {:.1} px",
            width_px, height_px, screen.width_mm, screen.height_mm, font_px
        );

        Ok(Self {
            driver,
            screen,
            widgets,
            status: SurfaceStatus::Ready,
            backlight: config.backlight.clone(),
            time_text: ArrayString::new(),
        })
    }

    pub fn status(&self) -> SurfaceStatus {
        self.status
    }

    pub fn screen(&self) -> &ScreenGeometry {
        &self.screen
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Refresh what changed, then draw and present
    ///
    /// Content problems leave the affected widget as it was. A present
    /// failure marks the surface Failed and is returned; the next
    /// successful present makes it Ready again.
    pub fn update<A: CoverArt + ?Sized>(&mut self, snapshot: &PlayerSnapshot, art: &mut A) -> Result<(), DisplayError> {
        let gpu = &mut self.driver;

        if snapshot.changed(Changed::ARTIST | Changed::ALBUM | Changed::TITLE) {
            let markup = metadata_markup(snapshot.artist(), snapshot.album(), snapshot.title());
            if let Err(e) = self.widgets.metadata.set_text(gpu, &markup) {
                warn!("Metadata not updated: {}", e);
            }
        }

        if snapshot.changed(Changed::ELAPSED | Changed::TOTAL) {
            format_time(&mut self.time_text, snapshot.elapsed(), snapshot.total());
            if let Err(e) = self.widgets.time.set_text(gpu, &self.time_text) {
                warn!("Time not updated: {}", e);
            }
            if snapshot.total() > 0 {
                self.widgets
                    .thermometer
                    .set_value(gpu, snapshot.elapsed() as f32 / snapshot.total() as f32);
            }
        }

        if snapshot.changed(Changed::ALBUM) {
            let cover = art.cover_for(snapshot.artist(), snapshot.album());
            if let Err(e) = self.widgets.cover.set_image(gpu, &cover) {
                warn!("Cover not updated: {}", e);
            }
        }

        if snapshot.changed(Changed::STATUS) {
            let emblem = emblem_for(snapshot);
            debug!("Emblem {:?}", emblem);
            self.widgets.emblem.set_emblem(gpu, emblem);
        }

        self.render()
    }

    /// Clear, draw every widget, present
    pub fn render(&mut self) -> Result<(), DisplayError> {
        self.driver.clear(BACKGROUND);
        self.widgets.draw(&mut self.driver);

        match self.driver.present() {
            Ok(()) => {
                self.status = SurfaceStatus::Ready;
                Ok(())
            }
            Err(e) => {
                error!("Present failed: {}", e);
                self.status = SurfaceStatus::Failed;
                Err(e)
            }
        }
    }

    /// Touch height sets the backlight; there is no widget hit testing
    pub fn dispatch_touch(&self, touch: &TouchEvent) -> Result<(), DisplayError> {
        let Some(path) = &self.backlight else {
            debug!("Touch at {},{} ignored, no backlight configured", touch.x, touch.y);
            return Ok(());
        };
        let level = brightness_for(touch.y, self.screen.height_px);
        fs::write(path, level.to_string())?;
        debug!("Backlight {} from touch at y={}", level, touch.y);
        Ok(())
    }

    /// Free every widget, then the GPU context
    pub fn close(mut self) {
        info!("Closing display surface");
        self.widgets.free(&mut self.driver);
        self.driver.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::TrackState;

    fn snapshot(artist: &str, album: &str, status: PlayStatus) -> PlayerSnapshot {
        let track = TrackState { artist: artist.into(), album: album.into(), status, ..TrackState::default() };
        PlayerSnapshot::new(track, Changed::STATUS)
    }

    #[test]
    fn test_emblem_mapping() {
        assert_eq!(emblem_for(&snapshot("Low", "Curtain Hits the Cast", PlayStatus::Playing)), Emblem::Playing);
        assert_eq!(emblem_for(&snapshot("Low", "Curtain Hits the Cast", PlayStatus::Paused)), Emblem::Paused);
        assert_eq!(emblem_for(&snapshot("Low", "Curtain Hits the Cast", PlayStatus::Stopped)), Emblem::Stopped);
        assert_eq!(emblem_for(&snapshot("", "Curtain Hits the Cast", PlayStatus::Stopped)), Emblem::NoEmblem);
        assert_eq!(emblem_for(&snapshot("Low", "", PlayStatus::Stopped)), Emblem::NoEmblem);
        assert_eq!(emblem_for(&snapshot("Low", "Curtain Hits the Cast", PlayStatus::NoSong)), Emblem::NoEmblem);
    }

    #[test]
    fn test_format_time() {
        let mut buf = ArrayString::<32>::new();
        format_time(&mut buf, 75, 3600);
        assert_eq!(buf.as_str(), "01:15 / 60:00");
        format_time(&mut buf, 0, 0);
        assert_eq!(buf.as_str(), "00:00 / 00:00");
        format_time(&mut buf, u32::MAX, u32::MAX);
        assert!(buf.ends_with(":15"));
    }

    #[test]
    fn test_metadata_markup_escapes_tags() {
        assert_eq!(
            metadata_markup("Simon & Garfunkel", "<Bookends>", "America"),
            "Simon &amp; Garfunkel\n<i>&lt;Bookends&gt;</i>\n<b>America</b>"
        );
    }

    #[test]
    fn test_brightness_for() {
        assert_eq!(brightness_for(0, 480), 255);
        assert_eq!(brightness_for(240, 480), 127);
        assert_eq!(brightness_for(480, 480), 0);
        assert_eq!(brightness_for(900, 480), 0);
        assert_eq!(brightness_for(10, 0), 0);
    }
}
