use anyhow::{Context, Result};
use config::{Config, File};
use humantime_serde::re::humantime::format_duration;
use serde::{Deserialize, Serialize};
use std::{env, fmt::Display, fs, path::PathBuf, str::FromStr, time::Duration};
use url::Url;

use crate::controller::BACKLIGHT_STEPS;

pub const DEFAULT_STATE_FILE: &str = "BatterySaverInfo.json";

/// `preferences.json` as written on disk.
///
/// Setting values are kept as strings here and only turned into
/// [`SaverSettings`] by [`SaverConfig::from_preferences`].
#[derive(Debug, Serialize, Deserialize)]
pub struct Preferences {
    /// Settings applied when battery saving mode is turned on
    #[serde(default)]
    pub activation: Vec<PreferenceEntry>,
    /// Settings applied when battery saving mode is turned off
    #[serde(default)]
    pub deactivation: Vec<PreferenceEntry>,
    /// Restore Wi-Fi and Bluetooth from the snapshot when turning off
    #[serde(default = "default_remember_settings")]
    pub remember_settings: bool,
    #[serde(default)]
    pub tools: ToolPaths,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceEntry {
    pub option: String,
    pub enable: String,
}

impl PreferenceEntry {
    fn new(option: &str, enable: &str) -> Self {
        Self {
            option: option.to_string(),
            enable: enable.to_string(),
        }
    }
}

/// Where the external tools live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub brightness: PathBuf,
    pub blueutil: PathBuf,
    pub cliclick: PathBuf,
    pub networksetup: PathBuf,
    /// Interface name handed to `networksetup -setairportpower`
    pub wifi_interface: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            brightness: PathBuf::from("binaries/brightness/brightness"),
            blueutil: PathBuf::from("binaries/blueutil/blueutil"),
            cliclick: PathBuf::from("binaries/cliclick/cliclick"),
            networksetup: PathBuf::from("networksetup"),
            wifi_interface: "airport".to_string(),
        }
    }
}

/// The HTTP request used to guess whether Wi-Fi is on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_url")]
    pub url: Url,
    #[serde(default = "default_probe_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            url: default_probe_url(),
            timeout: default_probe_timeout(),
        }
    }
}

fn default_remember_settings() -> bool {
    true
}

fn default_probe_url() -> Url {
    Url::parse("http://google.com").expect("static probe URL is valid")
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(1)
}

/// Keyboard backlight target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backlight {
    Off,
    On,
    /// A step count between 0 (off) and 16 (fully on)
    Level(u8),
}

impl Backlight {
    pub fn enabled(self) -> bool {
        !matches!(self, Self::Off)
    }

    pub fn level(self) -> Option<u8> {
        match self {
            Self::Level(level) => Some(level),
            _ => None,
        }
    }
}

impl FromStr for Backlight {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            level => match level.parse::<u8>() {
                Ok(level) if level <= BACKLIGHT_STEPS => Ok(Self::Level(level)),
                _ => Err(InvalidValue(format!(
                    "expected `on`, `off` or a level between 0 and {}, found `{}`",
                    BACKLIGHT_STEPS, s
                ))),
            },
        }
    }
}

impl Display for Backlight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::On => write!(f, "on"),
            Self::Level(level) => write!(f, "{}", level),
        }
    }
}

/// A malformed setting value.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct InvalidValue(String);

/// Parses `on`/`off`.
pub fn parse_switch(s: &str) -> Result<bool, InvalidValue> {
    match s.trim() {
        "on" => Ok(true),
        "off" => Ok(false),
        _ => Err(InvalidValue(format!("expected `on` or `off`, found `{}`", s))),
    }
}

/// Parses a brightness fraction in `0.0..=1.0`.
pub fn parse_brightness(s: &str) -> Result<f64, InvalidValue> {
    match s.trim().parse::<f64>() {
        Ok(level) if (0.0..=1.0).contains(&level) => Ok(level),
        _ => Err(InvalidValue(format!(
            "expected a number between 0 and 1, found `{}`",
            s
        ))),
    }
}

/// Target values for every setting, for one direction of the toggle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SaverSettings {
    pub brightness: f64,
    pub wifi: bool,
    pub bluetooth: bool,
    pub backlight: Backlight,
}

impl SaverSettings {
    pub fn activation_defaults() -> Self {
        Self {
            brightness: 0.3,
            wifi: false,
            bluetooth: false,
            backlight: Backlight::Off,
        }
    }

    pub fn deactivation_defaults() -> Self {
        Self {
            brightness: 1.0,
            wifi: false,
            bluetooth: true,
            backlight: Backlight::On,
        }
    }

    /// Overlays `entries` onto `defaults`, rejecting unknown, repeated or malformed options.
    pub fn from_entries(entries: &[PreferenceEntry], defaults: Self) -> Result<Self> {
        let mut settings = defaults;
        let mut seen = Vec::with_capacity(entries.len());

        for entry in entries {
            if seen.contains(&entry.option.as_str()) {
                anyhow::bail!("Option `{}` is set more than once", entry.option);
            }
            seen.push(entry.option.as_str());

            let invalid = || format!("Invalid value for option `{}`", entry.option);
            match entry.option.as_str() {
                "Brightness" => {
                    settings.brightness = parse_brightness(&entry.enable).with_context(invalid)?
                }
                "Wifi" => settings.wifi = parse_switch(&entry.enable).with_context(invalid)?,
                "Bluetooth" => {
                    settings.bluetooth = parse_switch(&entry.enable).with_context(invalid)?
                }
                "Backlight" => {
                    settings.backlight = entry.enable.parse::<Backlight>().with_context(invalid)?
                }
                other => anyhow::bail!(
                    "Unknown option `{}`, expected one of Brightness, Wifi, Bluetooth, Backlight",
                    other
                ),
            }
        }

        Ok(settings)
    }
}

/// Validated preferences.
#[derive(Debug, Clone)]
pub struct SaverConfig {
    pub activation: SaverSettings,
    pub deactivation: SaverSettings,
    pub remember_settings: bool,
    pub tools: ToolPaths,
    pub probe: ProbeConfig,
    pub state_file: PathBuf,
}

impl Default for SaverConfig {
    fn default() -> Self {
        Self {
            activation: SaverSettings::activation_defaults(),
            deactivation: SaverSettings::deactivation_defaults(),
            remember_settings: default_remember_settings(),
            tools: ToolPaths::default(),
            probe: ProbeConfig::default(),
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
        }
    }
}

impl SaverConfig {
    /// Loads and validates the preferences file.
    ///
    /// Without an explicit path the usual locations are searched, falling back
    /// to the built-in defaults when none exists.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => match Self::find_config_file() {
                Some(p) => p,
                None => {
                    log::info!("no preferences file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        if !config_path.exists() {
            anyhow::bail!(
                "Preferences file `{}` does not exist",
                config_path.to_string_lossy()
            );
        }

        log::debug!("loading preferences from `{}`", config_path.display());
        let preferences = Config::builder()
            .add_source(File::from(config_path.clone()))
            .build()?
            .try_deserialize::<Preferences>()
            .with_context(|| format!("Failed to read `{}`", config_path.display()))?;

        Self::from_preferences(preferences)
            .with_context(|| format!("Invalid preferences in `{}`", config_path.display()))
    }

    pub fn from_preferences(preferences: Preferences) -> Result<Self> {
        let activation =
            SaverSettings::from_entries(&preferences.activation, SaverSettings::activation_defaults())
                .context("In `activation`")?;
        let deactivation = SaverSettings::from_entries(
            &preferences.deactivation,
            SaverSettings::deactivation_defaults(),
        )
        .context("In `deactivation`")?;

        if !matches!(preferences.probe.url.scheme(), "http" | "https") {
            anyhow::bail!(
                "Probe URL scheme must be http or https, found `{}`",
                preferences.probe.url.scheme()
            );
        }

        Ok(Self {
            activation,
            deactivation,
            remember_settings: preferences.remember_settings,
            tools: preferences.tools,
            probe: preferences.probe,
            state_file: preferences
                .state_file
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE)),
        })
    }

    fn find_config_file() -> Option<PathBuf> {
        let local = PathBuf::from("preferences.json");
        if local.exists() {
            return Some(local);
        }

        let home = env::var("HOME").ok()?;
        let possible_paths = [
            PathBuf::from(&home).join(".config/battery-saver/preferences.json"),
            PathBuf::from(&home).join(".config/battery-saver.json"),
        ];

        possible_paths.into_iter().find(|path| path.exists())
    }

    fn default_config_path() -> Result<PathBuf> {
        let home = env::var("HOME").with_context(|| "$HOME environment variable not set")?;

        Ok(PathBuf::from(home).join(".config/battery-saver/preferences.json"))
    }

    /// Writes a sample preferences file, as YAML when the path ends in `.yaml`/`.yml`.
    pub fn generate_sample(output_path: Option<PathBuf>) -> Result<String> {
        let config_path = match output_path {
            Some(path) => path,
            None => Self::default_config_path()?,
        };

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let sample = Preferences {
            activation: vec![
                PreferenceEntry::new("Brightness", "0.3"),
                PreferenceEntry::new("Wifi", "off"),
                PreferenceEntry::new("Bluetooth", "off"),
                PreferenceEntry::new("Backlight", "off"),
            ],
            deactivation: vec![
                PreferenceEntry::new("Brightness", "1.0"),
                PreferenceEntry::new("Wifi", "on"),
                PreferenceEntry::new("Bluetooth", "on"),
                PreferenceEntry::new("Backlight", "on"),
            ],
            remember_settings: true,
            tools: ToolPaths::default(),
            probe: ProbeConfig::default(),
            state_file: None,
        };

        let is_yaml = config_path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        let content = if is_yaml {
            serde_yml::to_string(&sample)?
        } else {
            serde_json::to_string_pretty(&sample)?
        };
        fs::write(&config_path, &content)?;

        eprintln!(
            "Sample preferences file created at `{}`",
            config_path.to_string_lossy()
        );

        Ok(content)
    }
}

impl Display for SaverConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let w_name = 12;
        let w_val = 12;
        let switch = |on: bool| if on { "on" } else { "off" };

        writeln!(
            f,
            "  {:<w_name$} {:<w_val$} {}",
            "Setting", "Turn on", "Turn off",
        )?;
        writeln!(f, "  {:-<w_name$} {:-<w_val$} {:-<w_val$}", "", "", "")?;

        let rows = [
            (
                "Brightness",
                self.activation.brightness.to_string(),
                self.deactivation.brightness.to_string(),
            ),
            (
                "Wifi",
                switch(self.activation.wifi).to_string(),
                switch(self.deactivation.wifi).to_string(),
            ),
            (
                "Bluetooth",
                switch(self.activation.bluetooth).to_string(),
                switch(self.deactivation.bluetooth).to_string(),
            ),
            (
                "Backlight",
                self.activation.backlight.to_string(),
                self.deactivation.backlight.to_string(),
            ),
        ];
        for (name, on, off) in rows {
            writeln!(f, "• {:<w_name$} {:<w_val$} {}", name, on, off)?;
        }

        writeln!(
            f,
            "\nRestore Wi-Fi and Bluetooth on exit: {}",
            if self.remember_settings { "yes" } else { "no" }
        )?;
        writeln!(f, "Snapshot file: {}", self.state_file.display())?;
        write!(
            f,
            "Wi-Fi probe: {} (timeout {})",
            self.probe.url,
            format_duration(self.probe.timeout)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(&str, &str)]) -> Vec<PreferenceEntry> {
        pairs
            .iter()
            .map(|(option, enable)| PreferenceEntry::new(option, enable))
            .collect()
    }

    #[test]
    fn entries_override_defaults() -> Result<()> {
        let settings = SaverSettings::from_entries(
            &entries(&[("Brightness", "0.5"), ("Backlight", "4"), ("Wifi", "on")]),
            SaverSettings::activation_defaults(),
        )?;

        assert_eq!(
            settings,
            SaverSettings {
                brightness: 0.5,
                wifi: true,
                bluetooth: false,
                backlight: Backlight::Level(4),
            }
        );
        Ok(())
    }

    #[test]
    fn malformed_values_fail_the_load() {
        for (option, value) in [
            ("Brightness", "bright"),
            ("Brightness", "1.5"),
            ("Wifi", "1"),
            ("Bluetooth", "yes"),
            ("Backlight", "17"),
            ("Backlight", "-1"),
        ] {
            let result = SaverSettings::from_entries(
                &entries(&[(option, value)]),
                SaverSettings::activation_defaults(),
            );
            assert!(result.is_err(), "{} = {} should be rejected", option, value);
        }
    }

    #[test]
    fn unknown_and_repeated_options_fail_the_load() {
        let unknown = SaverSettings::from_entries(
            &entries(&[("Volume", "off")]),
            SaverSettings::activation_defaults(),
        );
        assert!(unknown.is_err());

        let repeated = SaverSettings::from_entries(
            &entries(&[("Wifi", "off"), ("Wifi", "on")]),
            SaverSettings::activation_defaults(),
        );
        assert!(repeated.is_err());
    }

    #[test]
    fn backlight_values() {
        assert_eq!("on".parse::<Backlight>().unwrap(), Backlight::On);
        assert_eq!("off".parse::<Backlight>().unwrap(), Backlight::Off);
        assert_eq!("16".parse::<Backlight>().unwrap(), Backlight::Level(16));
        assert!(Backlight::Level(0).enabled());
        assert!(!Backlight::Off.enabled());
        assert_eq!(Backlight::On.level(), None);
    }

    #[test]
    fn loads_plugin_preferences_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("preferences.json");
        fs::write(
            &path,
            r#"{
                "activation": [
                    {"option": "Brightness", "enable": "0.2"},
                    {"option": "Wifi", "enable": "off"},
                    {"option": "Bluetooth", "enable": "off"},
                    {"option": "Backlight", "enable": "off"}
                ],
                "deactivation": [
                    {"option": "Brightness", "enable": "0.9"},
                    {"option": "Backlight", "enable": "8"}
                ],
                "remember_settings": false,
                "probe": {"timeout": "500ms"}
            }"#,
        )?;

        let config = SaverConfig::load(Some(path))?;
        assert_eq!(config.activation.brightness, 0.2);
        assert_eq!(config.deactivation.brightness, 0.9);
        assert_eq!(config.deactivation.backlight, Backlight::Level(8));
        assert!(config.deactivation.bluetooth);
        assert!(!config.remember_settings);
        assert_eq!(config.probe.timeout, Duration::from_millis(500));
        assert_eq!(config.state_file, PathBuf::from(DEFAULT_STATE_FILE));
        assert_eq!(config.tools.wifi_interface, "airport");
        Ok(())
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(SaverConfig::load(Some(PathBuf::from("/nonexistent/preferences.json"))).is_err());
    }

    #[test]
    fn sample_round_trips_through_load() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("preferences.json");
        SaverConfig::generate_sample(Some(path.clone()))?;

        let config = SaverConfig::load(Some(path))?;
        assert_eq!(config.activation, SaverSettings::activation_defaults());
        assert!(config.deactivation.wifi);
        assert!(config.remember_settings);
        Ok(())
    }

    #[test]
    fn sample_is_written_as_yaml_for_yaml_paths() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested/preferences.yaml");
        let content = SaverConfig::generate_sample(Some(path.clone()))?;

        assert!(path.exists());
        assert!(content.contains("remember_settings: true"));
        assert!(serde_json::from_str::<serde_json::Value>(&content).is_err());
        Ok(())
    }
}
