/*
 *  config.rs
 *
 *  MPDisplay - now playing, on the Pi
 *  (c) 2020-26 Stuart Hunter
 *
 *  Configuration: defaults, then YAML, then command line
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

use clap::{ArgAction, Parser, ValueHint};
use dirs_next::home_dir;
use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}, time::Duration};
use thiserror::Error;

use crate::display::layout::{LayoutConfig, PI_TOUCH_HEIGHT_MM, PI_TOUCH_WIDTH_MM};
use crate::display::manager::{SurfaceConfig, DEFAULT_BACKLIGHT};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 6600;
pub const DEFAULT_DATABASE: &str = "album_art.sqlite3";
pub const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_POLL_MS: u64 = 1000;
const DEFAULT_RECONNECT_SECS: u64 = 5;
const DEFAULT_DEBOUNCE_MS: u64 = 250;

/// Error type for config loading/validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Top-level app configuration. Every field is optional so layers can stack.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    pub log_level: Option<String>, // "error" .. "trace"
    pub player: Option<PlayerConfig>,
    pub artwork: Option<ArtworkConfig>,
    pub display: Option<DisplayConfig>,
    pub button: Option<ButtonConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PlayerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub poll_interval_ms: Option<u64>,
    pub reconnect_delay_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ArtworkConfig {
    pub database: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DisplayConfig {
    pub width_mm: Option<f32>,
    pub height_mm: Option<f32>,
    pub font_px: Option<f32>,
    pub backlight: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ButtonConfig {
    pub pin: Option<u8>, // BCM numbering
    pub debounce_ms: Option<u64>,
}

/// CLI overrides. All fields are Options so we can layer them over YAML.
#[derive(Debug, Parser, Clone, Default)]
#[command(name = "mpdisplay", version, about = "MPD now playing on the Pi touch screen")]
pub struct Cli {
    /// Path to a YAML config file (overrides search)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    /// MPD host [default: localhost]
    #[arg(long)]
    pub host: Option<String>,
    /// MPD port [default: 6600]
    #[arg(long)]
    pub port: Option<u16>,
    /// Album art database [default: album_art.sqlite3]
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub database: Option<PathBuf>,
    #[arg(long)]
    pub log_level: Option<String>,
    /// BCM pin of the play/pause button
    #[arg(long)]
    pub button_pin: Option<u8>,
    /// Backlight brightness file written on touch
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub backlight: Option<PathBuf>,
    /// dump fully merged config (after overrides) and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub dump_config: bool,
}

/// Public entry point: read YAML, merge CLI over it, validate.
pub fn load_from(cli: &Cli) -> Result<Config, ConfigError> {
    // 1) defaults
    let mut cfg = Config::default();

    // 2) YAML file (explicit path or search)
    if let Some(p) = cli.config.as_ref() {
        if !p.exists() {
            return Err(ConfigError::Validation(format!("Config file not found: {}", p.display())));
        }
        merge(&mut cfg, read_yaml(p)?);
    } else if let Some(p) = find_config_file() {
        merge(&mut cfg, read_yaml(&p)?);
    }

    // 3) CLI overrides (highest precedence)
    apply_cli_overrides(&mut cfg, cli);

    // 4) Validate
    validate(&cfg)?;
    Ok(cfg)
}

/// Try common locations in order (first hit wins).
fn find_config_file() -> Option<PathBuf> {
    if let Some(home) = home_dir() {
        let p = home.join(".config/mpdisplay/config.yaml");
        if p.exists() { return Some(p) }
        let p = home.join(".config/mpdisplay.yaml");
        if p.exists() { return Some(p) }
    }
    for candidate in &["mpdisplay.yaml", "config/mpdisplay.yaml"] {
        let p = PathBuf::from(candidate);
        if p.exists() { return Some(p) }
    }
    None
}

fn read_yaml(path: &Path) -> Result<Config, ConfigError> {
    let s = fs::read_to_string(path)?;
    parse_yaml(&s)
}

pub fn parse_yaml(s: &str) -> Result<Config, ConfigError> {
    Ok(serde_yaml::from_str(s)?)
}

/// Shallow merge `src` into `dst`, Option-by-Option.
fn merge(dst: &mut Config, src: Config) {
    if src.log_level.is_some() { dst.log_level = src.log_level; }
    if let Some(s) = src.player {
        let d = dst.player.get_or_insert_with(Default::default);
        if s.host.is_some()                 { d.host = s.host; }
        if s.port.is_some()                 { d.port = s.port; }
        if s.poll_interval_ms.is_some()     { d.poll_interval_ms = s.poll_interval_ms; }
        if s.reconnect_delay_secs.is_some() { d.reconnect_delay_secs = s.reconnect_delay_secs; }
    }
    if let Some(s) = src.artwork {
        let d = dst.artwork.get_or_insert_with(Default::default);
        if s.database.is_some() { d.database = s.database; }
    }
    if let Some(s) = src.display {
        let d = dst.display.get_or_insert_with(Default::default);
        if s.width_mm.is_some()  { d.width_mm = s.width_mm; }
        if s.height_mm.is_some() { d.height_mm = s.height_mm; }
        if s.font_px.is_some()   { d.font_px = s.font_px; }
        if s.backlight.is_some() { d.backlight = s.backlight; }
    }
    if let Some(s) = src.button {
        let d = dst.button.get_or_insert_with(Default::default);
        if s.pin.is_some()         { d.pin = s.pin; }
        if s.debounce_ms.is_some() { d.debounce_ms = s.debounce_ms; }
    }
}

fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) {
    if cli.log_level.is_some() { cfg.log_level = cli.log_level.clone(); }
    if cli.host.is_some() || cli.port.is_some() {
        let player = cfg.player.get_or_insert_with(Default::default);
        if cli.host.is_some() { player.host = cli.host.clone(); }
        if cli.port.is_some() { player.port = cli.port; }
    }
    if cli.database.is_some() {
        cfg.artwork.get_or_insert_with(Default::default).database = cli.database.clone();
    }
    if cli.backlight.is_some() {
        cfg.display.get_or_insert_with(Default::default).backlight = cli.backlight.clone();
    }
    if cli.button_pin.is_some() {
        cfg.button.get_or_insert_with(Default::default).pin = cli.button_pin;
    }
}

/// Put any invariants here (required fields, ranges, etc.)
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.host().trim().is_empty() {
        return Err(ConfigError::Validation("MPD host must be non-empty".into()));
    }
    if cfg.port() == 0 {
        return Err(ConfigError::Validation("MPD port must be positive".into()));
    }
    if cfg.poll_interval().is_zero() {
        return Err(ConfigError::Validation("player poll_interval_ms must be > 0".into()));
    }
    if cfg.database().as_os_str().is_empty() {
        return Err(ConfigError::Validation("artwork database path must be non-empty".into()));
    }
    match cfg.log_level() {
        "error" | "warn" | "info" | "debug" | "trace" | "off" => {}
        other => return Err(ConfigError::Validation(format!("unknown log level '{other}'"))),
    }
    if let Some(display) = cfg.display.as_ref() {
        let positive = |v: Option<f32>| v.is_none_or(|v| v.is_finite() && v > 0.0);
        if !positive(display.width_mm) || !positive(display.height_mm) {
            return Err(ConfigError::Validation("display width_mm/height_mm must be > 0".into()));
        }
        if !positive(display.font_px) {
            return Err(ConfigError::Validation("display font_px must be > 0".into()));
        }
    }
    if let Some(pin) = cfg.button.as_ref().and_then(|b| b.pin) {
        if pin > 27 {
            return Err(ConfigError::Validation(format!("button pin {pin} is not a BCM GPIO (0..=27)")));
        }
    }
    Ok(())
}

/// Effective values, defaults filled in
impl Config {
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }

    pub fn host(&self) -> &str {
        self.player.as_ref().and_then(|p| p.host.as_deref()).unwrap_or(DEFAULT_HOST)
    }

    pub fn port(&self) -> u16 {
        self.player.as_ref().and_then(|p| p.port).unwrap_or(DEFAULT_PORT)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.player.as_ref().and_then(|p| p.poll_interval_ms).unwrap_or(DEFAULT_POLL_MS))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(
            self.player.as_ref().and_then(|p| p.reconnect_delay_secs).unwrap_or(DEFAULT_RECONNECT_SECS),
        )
    }

    pub fn database(&self) -> PathBuf {
        self.artwork
            .as_ref()
            .and_then(|a| a.database.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE))
    }

    pub fn button_pin(&self) -> Option<u8> {
        self.button.as_ref().and_then(|b| b.pin)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.button.as_ref().and_then(|b| b.debounce_ms).unwrap_or(DEFAULT_DEBOUNCE_MS))
    }

    pub fn surface_config(&self) -> SurfaceConfig {
        let display = self.display.clone().unwrap_or_default();
        SurfaceConfig {
            width_mm: display.width_mm.unwrap_or(PI_TOUCH_WIDTH_MM),
            height_mm: display.height_mm.unwrap_or(PI_TOUCH_HEIGHT_MM),
            layout: LayoutConfig::default(),
            font_px: display.font_px,
            backlight: Some(display.backlight.unwrap_or_else(|| PathBuf::from(DEFAULT_BACKLIGHT))),
        }
    }

    /// Pretty YAML of the effective config
    pub fn dump(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_with_missing_config() -> Cli {
        Cli { config: Some(PathBuf::from("/nonexistent/mpdisplay.yaml")), ..Cli::default() }
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.host(), "localhost");
        assert_eq!(cfg.port(), 6600);
        assert_eq!(cfg.database(), PathBuf::from("album_art.sqlite3"));
        assert_eq!(cfg.poll_interval(), Duration::from_secs(1));
        assert_eq!(cfg.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(cfg.debounce(), Duration::from_millis(250));
        assert_eq!(cfg.button_pin(), None);
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn test_yaml_then_cli() {
        let mut cfg = Config::default();
        merge(
            &mut cfg,
            parse_yaml("player:\n  host: jukebox\n  port: 6601\nbutton:\n  pin: 17\n").unwrap(),
        );
        assert_eq!(cfg.host(), "jukebox");
        assert_eq!(cfg.button_pin(), Some(17));

        let cli = Cli { port: Some(6700), database: Some("/var/lib/art.db".into()), ..Cli::default() };
        apply_cli_overrides(&mut cfg, &cli);
        assert_eq!(cfg.host(), "jukebox");
        assert_eq!(cfg.port(), 6700);
        assert_eq!(cfg.database(), PathBuf::from("/var/lib/art.db"));
    }

    #[test]
    fn test_rejects_bad_player_settings() {
        let mut cfg = Config::default();
        apply_cli_overrides(&mut cfg, &Cli { port: Some(0), ..Cli::default() });
        assert!(matches!(validate(&cfg), Err(ConfigError::Validation(_))));

        let mut cfg = Config::default();
        apply_cli_overrides(&mut cfg, &Cli { host: Some(String::new()), ..Cli::default() });
        assert!(validate(&cfg).is_err());

        let mut cfg = Config::default();
        apply_cli_overrides(&mut cfg, &Cli { database: Some(PathBuf::new()), ..Cli::default() });
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_rejects_bad_display_and_level() {
        let cfg = parse_yaml("display:\n  width_mm: 0\n").unwrap();
        assert!(validate(&cfg).is_err());

        let cfg = parse_yaml("log_level: loud\n").unwrap();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_missing_explicit_config_file() {
        assert!(matches!(load_from(&cli_with_missing_config()), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_surface_config_defaults_to_pi_screen() {
        let surface = Config::default().surface_config();
        assert_eq!(surface.width_mm, PI_TOUCH_WIDTH_MM);
        assert_eq!(surface.backlight, Some(PathBuf::from(DEFAULT_BACKLIGHT)));
        assert_eq!(surface.font_px, None);
        assert_eq!(surface, SurfaceConfig::default());

        let cfg = parse_yaml("display:\n  font_px: 30.5\n").unwrap();
        assert_ne!(cfg.surface_config(), SurfaceConfig::default());
    }

    #[test]
    fn test_dump_round_trips() {
        let cfg = parse_yaml("player:\n  host: jukebox\n").unwrap();
        assert_eq!(parse_yaml(&cfg.dump().unwrap()).unwrap(), cfg);
    }
}
