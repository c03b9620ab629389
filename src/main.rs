/*
 *  main.rs
 *
 *  MPDisplay - now playing, on the Pi
 *  (c) 2020-26 Stuart Hunter
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

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{debug, error, info, warn};
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::{interval, MissedTickBehavior};

use mpdisplay::artwork::{self, CoverArtStore};
use mpdisplay::config::{self, Cli, Config};
use mpdisplay::display::drivers::kms::KmsDriver;
use mpdisplay::display::{DisplaySurface, SurfaceStatus};
use mpdisplay::player::{MpdSource, PlayerPoller};
use mpdisplay::BUILD_DATE;

#[cfg(feature = "gpio")]
use mpdisplay::button::PlayPauseButton;

/// Asynchronously waits for a SIGINT, SIGTERM, or SIGHUP signal.
async fn signal_handler() -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT received. Initiating graceful shutdown.");
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received. Initiating graceful shutdown.");
        }
        _ = sighup.recv() => {
            info!("SIGHUP received. Initiating graceful shutdown.");
        }
    }
    Ok(())
}

#[cfg(feature = "gpio")]
fn open_button(cfg: &Config) -> Option<PlayPauseButton> {
    let pin = cfg.button_pin()?;
    match PlayPauseButton::open(pin, cfg.debounce()) {
        Ok(button) => Some(button),
        Err(e) => {
            warn!("Play/pause button on BCM {} unavailable: {}", pin, e);
            None
        }
    }
}

/// Resolves on each press; never when there is no button
#[cfg(feature = "gpio")]
async fn next_press(button: &mut Option<PlayPauseButton>) {
    match button {
        Some(b) => {
            if b.pressed().await.is_none() {
                warn!("Play/pause button went away");
                *button = None;
            }
        }
        None => std::future::pending().await,
    }
}

#[cfg(not(feature = "gpio"))]
struct NoButton;

#[cfg(not(feature = "gpio"))]
fn open_button(cfg: &Config) -> Option<NoButton> {
    if cfg.button_pin().is_some() {
        warn!("Built without the gpio feature, button pin ignored");
    }
    None
}

#[cfg(not(feature = "gpio"))]
async fn next_press(_button: &mut Option<NoButton>) {
    std::future::pending().await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // bad arguments stop us before anything is opened
    let cli = Cli::parse();
    let cfg = config::load_from(&cli).context("configuration")?;
    if cli.dump_config {
        print!("{}", cfg.dump()?);
        return Ok(());
    }

    env_logger::Builder::from_env(Env::default().default_filter_or(cfg.log_level()))
        .format_timestamp_secs()
        .init();

    info!("This is {}, now playing on the Pi", env!("CARGO_PKG_NAME"));
    info!("v.{} built {}", env!("CARGO_PKG_VERSION"), BUILD_DATE);
    info!("MPD host '{}' port {}", cfg.host(), cfg.port());

    let mut art = match CoverArtStore::open(&cfg.database()) {
        Ok(store) => store,
        Err(e) => {
            warn!("Album art database {}: {}, showing placeholders", cfg.database().display(), e);
            CoverArtStore::without_database()
        }
    };

    let driver = KmsDriver::open_first().context("opening the display")?;
    let mut surface = DisplaySurface::new(driver, &cfg.surface_config(), &artwork::placeholder())
        .context("building the display surface")?;

    let mut player = PlayerPoller::new(MpdSource::new(cfg.host(), cfg.port()), cfg.reconnect_delay());
    let mut button = open_button(&cfg);

    let mut ticker = interval(cfg.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = signal_handler();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            res = &mut shutdown => {
                if let Err(e) = res {
                    error!("Signal handling failed: {}", e);
                }
                break;
            }
            _ = ticker.tick() => {
                let snapshot = player.poll();
                // a failed present is logged by the surface and retried next tick
                if surface.update(snapshot, &mut art).is_err() && surface.status() == SurfaceStatus::Failed {
                    debug!("Frame dropped");
                }
            }
            _ = next_press(&mut button) => {
                if let Err(e) = player.toggle_pause() {
                    warn!("Play/pause failed: {}", e);
                }
            }
        }
    }

    surface.close();
    info!("Bye");
    Ok(())
}
