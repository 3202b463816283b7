//! Persistent settings.
//!
//! The config file is TOML with a `[settings]` section plus up to three
//! `[controller_custom_map_N]` sections for user-edited mapping tables.
//! Early releases stored keys flat at the root or under `[general]`; a
//! one-off migration promotes recognized keys into `[settings]` on load,
//! so one save canonicalizes a legacy file. Unknown keys under
//! `[settings]` ride along in [`Settings::extra`] and survive the
//! round-trip.
//!
//! Validation is lenient where the UI can't prevent bad values: an
//! unsupported `fps` falls back to 30 at parse time and re-serializes as
//! 30. The 1080p→720p downgrade is *not* part of parsing — it is a
//! target-platform policy applied through [`TargetCaps`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, info};

use crate::error::{Result, StreamError};

/// Stream resolution presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum Resolution {
    #[serde(rename = "360p")]
    R360p,
    #[default]
    #[serde(rename = "540p")]
    R540p,
    #[serde(rename = "720p")]
    R720p,
    #[serde(rename = "1080p")]
    R1080p,
}

impl Resolution {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Resolution::R360p => (640, 360),
            Resolution::R540p => (960, 544),
            Resolution::R720p => (1280, 720),
            Resolution::R1080p => (1920, 1080),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Resolution::R360p => "360p",
            Resolution::R540p => "540p",
            Resolution::R720p => "720p",
            Resolution::R1080p => "1080p",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Latency/bitrate operating points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LatencyMode {
    UltraLow,
    Low,
    #[default]
    Balanced,
    High,
    Max,
}

impl LatencyMode {
    /// Target stream bitrate for this mode.
    pub fn target_bitrate_kbps(self) -> u32 {
        match self {
            LatencyMode::UltraLow => 1200,
            LatencyMode::Low => 1800,
            LatencyMode::Balanced => 2600,
            LatencyMode::High => 3200,
            LatencyMode::Max => 3800,
        }
    }
}

/// Log verbosity profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogProfile {
    Off,
    Errors,
    #[default]
    Standard,
    Verbose,
}

/// Display frame-rate target. Only 30 and 60 are valid; anything else
/// falls back to 30 at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fps(pub u32);

impl Default for Fps {
    fn default() -> Self {
        Fps(30)
    }
}

impl Serialize for Fps {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.0)
    }
}

impl<'de> Deserialize<'de> for Fps {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        Ok(match raw {
            30 | 60 => Fps(raw as u32),
            other => {
                debug!(fps = other, "unsupported fps, falling back to 30");
                Fps(30)
            }
        })
    }
}

/// Logging subsection (`[settings.logging]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub profile: LogProfile,
    /// Bounded log ring depth (lines).
    pub queue_depth: usize,
    /// Destination path template; `{session}` expands to the session
    /// generation.
    pub path: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            profile: LogProfile::default(),
            queue_depth: 256,
            path: "farplay-{session}.log".to_string(),
        }
    }
}

/// The `[settings]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub resolution: Resolution,
    pub fps: Fps,
    pub latency_mode: LatencyMode,
    pub force_30fps: bool,
    pub stretch_video: bool,
    pub show_latency: bool,
    pub show_network_indicator: bool,
    pub show_stream_exit_hint: bool,
    pub clamp_soft_restart_bitrate: bool,
    pub auto_discovery: bool,
    pub ps_button_dual_mode: bool,
    pub circle_btn_confirm: bool,
    pub controller_map_id: u32,
    pub logging: LogSettings,
    /// Unrecognized `[settings]` keys, preserved on round-trip.
    #[serde(flatten)]
    pub extra: toml::Table,
}

/// Keys eligible for promotion out of legacy flat-root / `[general]`
/// layouts.
const RECOGNIZED_KEYS: [&str; 14] = [
    "resolution",
    "fps",
    "latency_mode",
    "force_30fps",
    "stretch_video",
    "show_latency",
    "show_network_indicator",
    "show_stream_exit_hint",
    "clamp_soft_restart_bitrate",
    "auto_discovery",
    "ps_button_dual_mode",
    "circle_btn_confirm",
    "controller_map_id",
    "logging",
];

/// Caps imposed by the target platform, outside the policy core.
#[derive(Debug, Clone, Copy)]
pub struct TargetCaps {
    pub max_resolution: Resolution,
}

impl TargetCaps {
    /// The handheld target decodes at most 720p.
    pub fn vita() -> Self {
        Self {
            max_resolution: Resolution::R720p,
        }
    }

    pub fn unrestricted() -> Self {
        Self {
            max_resolution: Resolution::R1080p,
        }
    }
}

impl Settings {
    /// Clamp settings to what the target platform supports.
    pub fn apply_target_caps(&mut self, caps: &TargetCaps) {
        if self.resolution > caps.max_resolution {
            info!(
                requested = %self.resolution,
                capped = %caps.max_resolution,
                "resolution capped for this target"
            );
            self.resolution = caps.max_resolution;
        }
    }
}

/// A user-editable mapping table section: `input name → target name`.
pub type CustomMap = BTreeMap<String, String>;

/// The whole config file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigFile {
    pub settings: Settings,
    pub custom_maps: [CustomMap; 3],
}

impl ConfigFile {
    /// Parse a config file, applying the legacy-layout migration.
    pub fn parse(text: &str) -> Result<ConfigFile> {
        let mut root: toml::Table = text
            .parse()
            .map_err(|e: toml::de::Error| StreamError::ConfigParse(e.to_string()))?;

        migrate_legacy(&mut root);

        let settings_value = root
            .remove("settings")
            .unwrap_or_else(|| toml::Value::Table(toml::Table::new()));
        let settings: Settings = settings_value
            .try_into()
            .map_err(|e: toml::de::Error| StreamError::ConfigParse(e.to_string()))?;

        let mut custom_maps: [CustomMap; 3] = Default::default();
        for (i, map) in custom_maps.iter_mut().enumerate() {
            let key = format!("controller_custom_map_{}", i + 1);
            if let Some(toml::Value::Table(table)) = root.remove(&key) {
                *map = table
                    .into_iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
                    .collect();
            }
        }

        Ok(ConfigFile {
            settings,
            custom_maps,
        })
    }

    /// Serialize to canonical TOML (a `[settings]` section plus non-empty
    /// custom map sections).
    pub fn to_toml_string(&self) -> Result<String> {
        let mut root = toml::Table::new();
        let settings = toml::Value::try_from(&self.settings)
            .map_err(|e| StreamError::ConfigParse(e.to_string()))?;
        root.insert("settings".to_string(), settings);
        for (i, map) in self.custom_maps.iter().enumerate() {
            if map.is_empty() {
                continue;
            }
            let table: toml::Table = map
                .iter()
                .map(|(k, v)| (k.clone(), toml::Value::String(v.clone())))
                .collect();
            root.insert(
                format!("controller_custom_map_{}", i + 1),
                toml::Value::Table(table),
            );
        }
        toml::to_string(&root).map_err(|e| StreamError::ConfigParse(e.to_string()))
    }

    /// Load from disk; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<ConfigFile> {
        if !path.exists() {
            return Ok(ConfigFile::default());
        }
        Self::parse(&std::fs::read_to_string(path)?)
    }

    /// Write the canonical form to disk.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }
}

/// Promote legacy layouts into `[settings]`.
///
/// Recognized keys found flat at the root or under `[general]` move into
/// `[settings]` unless already present there; the rest of `[general]`
/// (format-version bookkeeping) is dropped.
fn migrate_legacy(root: &mut toml::Table) {
    let mut settings = match root.remove("settings") {
        Some(toml::Value::Table(table)) => table,
        _ => toml::Table::new(),
    };

    if let Some(toml::Value::Table(general)) = root.remove("general") {
        for (key, value) in general {
            if RECOGNIZED_KEYS.contains(&key.as_str()) && !settings.contains_key(&key) {
                debug!(key, "migrated legacy [general] key into [settings]");
                settings.insert(key, value);
            }
        }
    }

    let flat: Vec<String> = root
        .keys()
        .filter(|k| RECOGNIZED_KEYS.contains(&k.as_str()))
        .cloned()
        .collect();
    for key in flat {
        let value = root.remove(&key).expect("key listed above");
        if !settings.contains_key(&key) {
            debug!(key, "migrated legacy flat key into [settings]");
            settings.insert(key, value);
        }
    }

    root.insert("settings".to_string(), toml::Value::Table(settings));
}
