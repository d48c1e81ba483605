use crate::error::SettingsError;
use crate::matching::profile::{
    FixedPlatform, PlatformClass, PlatformClassifier, ThresholdProfile, UserAgentClassifier,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const SETTINGS_FILE_NAME: &str = "recite_settings.json";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReaderSettings {
    /// Forces the platform class instead of classifying the user agent.
    #[serde(default)]
    pub platform: Option<PlatformClass>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default = "default_passkey")]
    pub passkey: String,
    #[serde(default)]
    pub extra_difficult_words: Vec<String>,
    #[serde(default)]
    pub similarity_threshold: Option<f64>,
    #[serde(default)]
    pub min_length_ratio: Option<f64>,
    #[serde(default)]
    pub absolute_length_slack: Option<usize>,
    #[serde(default = "default_mic_watchdog_ms")]
    pub mic_watchdog_ms: u64,
    #[serde(default = "default_saving_display_ms")]
    pub saving_display_ms: u64,
    #[serde(default = "default_verse_timeout_ms_per_char")]
    pub verse_timeout_ms_per_char: u64,
    #[serde(default = "default_verse_timeout_min_ms")]
    pub verse_timeout_min_ms: u64,
    #[serde(default = "default_verse_timeout_max_ms")]
    pub verse_timeout_max_ms: u64,
    /// Platform default when unset.
    #[serde(default)]
    pub restart_debounce_ms: Option<u64>,
    /// Platform default when unset.
    #[serde(default)]
    pub ignore_window_ms: Option<u64>,
}

impl ReaderSettings {
    /// The explicit platform if set, else the user agent, else standard.
    pub fn platform_classifier(&self) -> Box<dyn PlatformClassifier> {
        match (self.platform, &self.user_agent) {
            (Some(platform), _) => Box::new(FixedPlatform(platform)),
            (None, Some(user_agent)) => Box::new(UserAgentClassifier::new(user_agent.clone())),
            (None, None) => Box::new(FixedPlatform(PlatformClass::Standard)),
        }
    }

    /// The fixed profile for `platform` with any configured overrides applied.
    pub fn threshold_profile(&self, platform: PlatformClass) -> ThresholdProfile {
        let mut profile = ThresholdProfile::for_platform(platform);
        if let Some(threshold) = self.similarity_threshold {
            profile.similarity_threshold = threshold.clamp(0.0, 100.0);
        }
        if let Some(ratio) = self.min_length_ratio {
            profile.min_length_ratio = ratio.clamp(0.0, 1.0);
        }
        if let Some(slack) = self.absolute_length_slack {
            profile.absolute_length_slack = slack;
        }
        profile
    }
}

impl Default for ReaderSettings {
    fn default() -> Self {
        get_default_settings()
    }
}

fn default_passkey() -> String {
    "아멘".to_string()
}

fn default_mic_watchdog_ms() -> u64 {
    3000
}

fn default_saving_display_ms() -> u64 {
    1500
}

fn default_verse_timeout_ms_per_char() -> u64 {
    300
}

fn default_verse_timeout_min_ms() -> u64 {
    5000
}

fn default_verse_timeout_max_ms() -> u64 {
    45000
}

pub fn get_default_settings() -> ReaderSettings {
    ReaderSettings {
        platform: None,
        user_agent: None,
        passkey: default_passkey(),
        extra_difficult_words: Vec::new(),
        similarity_threshold: None,
        min_length_ratio: None,
        absolute_length_slack: None,
        mic_watchdog_ms: default_mic_watchdog_ms(),
        saving_display_ms: default_saving_display_ms(),
        verse_timeout_ms_per_char: default_verse_timeout_ms_per_char(),
        verse_timeout_min_ms: default_verse_timeout_min_ms(),
        verse_timeout_max_ms: default_verse_timeout_max_ms(),
        restart_debounce_ms: None,
        ignore_window_ms: None,
    }
}

/// Load settings from `path`, writing the defaults there when no file exists.
///
/// A file that fails to parse is left untouched and the defaults are used.
pub fn load_or_create_settings(path: &Path) -> Result<ReaderSettings, SettingsError> {
    if !path.exists() {
        let settings = get_default_settings();
        write_settings(path, &settings)?;
        info!("Created default settings at {}", path.display());
        return Ok(settings);
    }

    let raw = fs::read_to_string(path).map_err(|source| SettingsError::Io {
        context: "reading settings",
        source,
    })?;

    match serde_json::from_str::<ReaderSettings>(&raw) {
        Ok(settings) => {
            debug!("Found existing settings: {:?}", settings);
            Ok(settings)
        }
        Err(e) => {
            warn!(
                "Failed to parse settings at {}: {}. Using defaults",
                path.display(),
                e
            );
            Ok(get_default_settings())
        }
    }
}

pub fn write_settings(path: &Path, settings: &ReaderSettings) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| SettingsError::Io {
            context: "creating settings directory",
            source,
        })?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json).map_err(|source| SettingsError::Io {
        context: "writing settings",
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let settings: ReaderSettings = serde_json::from_str(r#"{"passkey": "amen"}"#).unwrap();
        assert_eq!(settings.passkey, "amen");
        assert_eq!(settings.mic_watchdog_ms, 3000);
        assert_eq!(settings.verse_timeout_max_ms, 45000);
        assert!(settings.platform.is_none());
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE_NAME);

        let settings = load_or_create_settings(&path).unwrap();
        assert_eq!(settings, get_default_settings());
        assert!(path.exists());

        let mut changed = settings.clone();
        changed.passkey = "amen".to_string();
        write_settings(&path, &changed).unwrap();
        assert_eq!(load_or_create_settings(&path).unwrap().passkey, "amen");
    }

    #[test]
    fn test_unparseable_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        fs::write(&path, "{ not json").unwrap();

        let settings = load_or_create_settings(&path).unwrap();
        assert_eq!(settings, get_default_settings());
        // left for the user to fix
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn test_platform_resolution() {
        let mut settings = get_default_settings();
        assert_eq!(
            settings.platform_classifier().classify(),
            PlatformClass::Standard
        );

        settings.user_agent = Some("Mozilla/5.0 (iPad; CPU OS 17_0 like Mac OS X)".to_string());
        assert_eq!(
            settings.platform_classifier().classify(),
            PlatformClass::Constrained
        );

        settings.platform = Some(PlatformClass::Standard);
        assert_eq!(
            settings.platform_classifier().classify(),
            PlatformClass::Standard
        );
    }

    #[test]
    fn test_profile_overrides() {
        let mut settings = get_default_settings();
        settings.similarity_threshold = Some(70.0);
        settings.min_length_ratio = Some(1.5);
        let profile = settings.threshold_profile(PlatformClass::Constrained);
        assert_eq!(profile.similarity_threshold, 70.0);
        assert_eq!(profile.min_length_ratio, 1.0);
        assert_eq!(profile.absolute_length_slack, 1);
    }
}
