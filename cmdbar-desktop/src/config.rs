use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use cmdbar_core::{DEFAULT_PORT, MAX_PORT_ATTEMPTS, ScreenRect};
use cmdbar_listener::ListenerConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// `config.json` is expected to be tiny.
///
/// This prevents pathological reads if the file is corrupted or replaced.
pub const MAX_CONFIG_BYTES: u64 = 64 * 1024;
pub const DEFAULT_TICK_MS: u64 = 250;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "cmdbar")]
pub struct DesktopArgs {
    /// Preferred listener port; the listener may shift up to 9 ports past it.
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long)]
    pub max_port_attempts: Option<u16>,
    /// Screen size as WIDTHxHEIGHT, e.g. 1440x900.
    #[arg(long)]
    pub screen: Option<String>,
    /// Countdown tick interval in milliseconds.
    #[arg(long)]
    pub tick_ms: Option<u64>,
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub log_file: Option<PathBuf>,
    /// Persist the resolved settings back to the config file.
    #[arg(long, default_value_t = false)]
    pub save_config: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SavedConfig {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub max_port_attempts: Option<u16>,
    #[serde(default)]
    pub screen: Option<ScreenRect>,
    #[serde(default)]
    pub tick_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesktopConfig {
    pub listener: ListenerConfig,
    pub screen: ScreenRect,
    pub tick: Duration,
}

impl DesktopConfig {
    pub fn to_saved(&self) -> SavedConfig {
        SavedConfig {
            port: Some(self.listener.port),
            max_port_attempts: Some(self.listener.max_port_attempts),
            screen: Some(self.screen),
            tick_ms: u64::try_from(self.tick.as_millis()).ok(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("metadata read failed: {0}")]
    Metadata(#[source] io::Error),
    #[error("file too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
    #[error("parse failed: {0}")]
    Parse(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigSaveError {
    #[error("serialize failed: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("tmp write failed: {0}")]
    WriteTmp(#[source] io::Error),
    #[error("rename failed: {0}")]
    Rename(#[source] io::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid screen size `{0}`, expected WIDTHxHEIGHT")]
    InvalidScreen(String),
    #[error("tick interval must be at least 1 ms")]
    ZeroTick,
}

/// `CMDBAR_DATA_DIR`, else `~/.cmdbar`.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("CMDBAR_DATA_DIR") {
        return PathBuf::from(dir);
    }
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cmdbar")
}

pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}

pub fn parse_config_json(data: &str) -> Result<SavedConfig, serde_json::Error> {
    serde_json::from_str::<SavedConfig>(data)
}

pub fn load_config_from_path(path: &Path) -> Result<SavedConfig, ConfigLoadError> {
    let meta = fs::metadata(path).map_err(ConfigLoadError::Metadata)?;
    if meta.len() > MAX_CONFIG_BYTES {
        return Err(ConfigLoadError::TooLarge {
            size: meta.len(),
            max: MAX_CONFIG_BYTES,
        });
    }

    let data = fs::read_to_string(path).map_err(ConfigLoadError::Read)?;
    parse_config_json(&data).map_err(ConfigLoadError::Parse)
}

/// A missing file means defaults; an unreadable one is logged and ignored.
pub fn load_config(path: &Path) -> SavedConfig {
    match load_config_from_path(path) {
        Ok(saved) => saved,
        Err(ConfigLoadError::Metadata(err)) if err.kind() == io::ErrorKind::NotFound => {
            SavedConfig::default()
        }
        Err(err) => {
            warn!(path = %path.display(), "ignoring config file: {err}");
            SavedConfig::default()
        }
    }
}

pub fn save_config_to_path(path: &Path, config: &SavedConfig) -> Result<(), ConfigSaveError> {
    if let Some(dir) = path.parent() {
        let _ = fs::create_dir_all(dir);
    }
    let tmp = path.with_extension("json.tmp");
    let payload = serde_json::to_string_pretty(config).map_err(ConfigSaveError::Serialize)?;
    fs::write(&tmp, payload.as_bytes()).map_err(ConfigSaveError::WriteTmp)?;

    if path.exists() {
        let _ = fs::remove_file(path);
    }

    fs::rename(&tmp, path).map_err(ConfigSaveError::Rename)?;
    Ok(())
}

pub fn save_config_with_retry(path: &Path, config: &SavedConfig) -> Result<(), ConfigSaveError> {
    const MAX_ATTEMPTS: u32 = 3;
    const BACKOFF_BASE_MS: u64 = 50;

    let mut attempt = 1;
    loop {
        match save_config_to_path(path, config) {
            Ok(()) => return Ok(()),
            Err(err) if attempt >= MAX_ATTEMPTS => return Err(err),
            Err(err) => {
                warn!(attempt, "saving config failed, retrying: {err}");
                let backoff_ms = BACKOFF_BASE_MS.saturating_mul(1_u64 << (attempt - 1));
                std::thread::sleep(Duration::from_millis(backoff_ms));
                attempt += 1;
            }
        }
    }
}

/// Parses `WIDTHxHEIGHT` into a screen anchored at the origin.
pub fn parse_screen_size(value: &str) -> Result<ScreenRect, ConfigError> {
    let invalid = || ConfigError::InvalidScreen(value.to_owned());
    let (width, height) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(invalid)?;
    let width: i32 = width.trim().parse().map_err(|_| invalid())?;
    let height: i32 = height.trim().parse().map_err(|_| invalid())?;
    if width <= 0 || height <= 0 {
        return Err(invalid());
    }
    Ok(ScreenRect::new(0, 0, width, height))
}

/// Command-line flags win over the saved file, which wins over defaults.
pub fn resolve(args: &DesktopArgs, saved: &SavedConfig) -> Result<DesktopConfig, ConfigError> {
    let screen = match args.screen.as_deref() {
        Some(value) => parse_screen_size(value)?,
        None => match saved.screen {
            Some(screen) if screen.width > 0 && screen.height > 0 => screen,
            Some(screen) => {
                warn!(
                    width = screen.width,
                    height = screen.height,
                    "ignoring saved screen without a positive size"
                );
                ScreenRect::default()
            }
            None => ScreenRect::default(),
        },
    };
    let tick_ms = args.tick_ms.or(saved.tick_ms).unwrap_or(DEFAULT_TICK_MS);
    if tick_ms == 0 {
        return Err(ConfigError::ZeroTick);
    }

    Ok(DesktopConfig {
        listener: ListenerConfig {
            port: args.port.or(saved.port).unwrap_or(DEFAULT_PORT),
            max_port_attempts: args
                .max_port_attempts
                .or(saved.max_port_attempts)
                .unwrap_or(MAX_PORT_ATTEMPTS),
        },
        screen,
        tick: Duration::from_millis(tick_ms),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = resolve(&DesktopArgs::default(), &SavedConfig::default()).unwrap();
        assert_eq!(config.listener.port, 4756);
        assert_eq!(config.listener.max_port_attempts, 10);
        assert_eq!(config.screen, ScreenRect::default());
        assert_eq!(config.tick, Duration::from_millis(DEFAULT_TICK_MS));
    }

    #[test]
    fn flags_override_saved_values() {
        let saved = SavedConfig {
            port: Some(5000),
            max_port_attempts: Some(3),
            screen: Some(ScreenRect::new(0, 0, 800, 600)),
            tick_ms: Some(100),
        };
        let args = DesktopArgs {
            port: Some(6000),
            screen: Some("1920x1080".to_owned()),
            ..DesktopArgs::default()
        };

        let config = resolve(&args, &saved).unwrap();
        assert_eq!(config.listener.port, 6000);
        assert_eq!(config.listener.max_port_attempts, 3);
        assert_eq!(config.screen, ScreenRect::new(0, 0, 1920, 1080));
        assert_eq!(config.tick, Duration::from_millis(100));
    }

    #[test]
    fn saved_screen_without_area_falls_back_to_default() {
        for (width, height) in [(0, 0), (1440, 0), (-800, 600)] {
            let saved: SavedConfig = parse_config_json(&format!(
                r#"{{"screen":{{"x":0,"y":0,"width":{width},"height":{height}}}}}"#
            ))
            .unwrap();
            let config = resolve(&DesktopArgs::default(), &saved).unwrap();
            assert_eq!(config.screen, ScreenRect::default());
        }

        let saved = SavedConfig {
            screen: Some(ScreenRect::new(-1920, 0, 1920, 1080)),
            ..SavedConfig::default()
        };
        let config = resolve(&DesktopArgs::default(), &saved).unwrap();
        assert_eq!(config.screen, ScreenRect::new(-1920, 0, 1920, 1080));
    }

    #[test]
    fn screen_size_must_be_positive_width_by_height() {
        assert_eq!(
            parse_screen_size(" 1440X900 ").unwrap(),
            ScreenRect::new(0, 0, 1440, 900)
        );
        for bad in ["", "1440", "x900", "0x900", "-5x10", "axb"] {
            assert!(parse_screen_size(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn zero_tick_is_rejected() {
        let args = DesktopArgs {
            tick_ms: Some(0),
            ..DesktopArgs::default()
        };
        assert_eq!(
            resolve(&args, &SavedConfig::default()),
            Err(ConfigError::ZeroTick)
        );
    }

    #[test]
    fn partial_config_json_leaves_other_fields_unset() {
        let saved = parse_config_json(r#"{"port": 4800}"#).unwrap();
        assert_eq!(saved.port, Some(4800));
        assert_eq!(saved.screen, None);
    }
}
