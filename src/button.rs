/*
 *  button.rs
 *
 *  MPDisplay - now playing, on the Pi
 *  (c) 2020-26 Stuart Hunter
 *
 *  Play/pause push button on a GPIO line, debounced
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

use std::time::{Duration, Instant};

use log::{debug, info};
use rppal::gpio::{Gpio, InputPin, Level, Trigger};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum ButtonError {
    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),
}

/// Drops edges that follow an accepted one too closely
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    pub fn accept(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.window => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Button wired from a BCM pin to ground, using the internal pull-up
///
/// rppal watches the line on its own interrupt thread; presses are handed
/// to the event loop over a channel.
pub struct PlayPauseButton {
    // held so the interrupt stays registered
    _pin: InputPin,
    presses: mpsc::UnboundedReceiver<()>,
}

impl PlayPauseButton {
    pub fn open(bcm_pin: u8, debounce: Duration) -> Result<Self, ButtonError> {
        let mut pin = Gpio::new()?.get(bcm_pin)?.into_input_pullup();
        let (tx, presses) = mpsc::unbounded_channel();
        let mut debouncer = Debouncer::new(debounce);

        pin.set_async_interrupt(Trigger::FallingEdge, move |level: Level| {
            if level == Level::Low && debouncer.accept(Instant::now()) {
                // receiver gone means we are shutting down
                let _ = tx.send(());
            }
        })?;

        info!("Play/pause button on BCM {} ({:?} debounce)", bcm_pin, debounce);
        Ok(Self { _pin: pin, presses })
    }

    /// Next debounced press; None once the interrupt thread has gone
    pub async fn pressed(&mut self) -> Option<()> {
        let press = self.presses.recv().await;
        debug!("Play/pause pressed");
        press
    }
}
