//! Platform classes and the threshold profiles tuned for them.

use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which family of recognition engine the session is running against.
///
/// Constrained engines (the mobile Safari family) deliver incremental results,
/// stop on their own frequently and tend to report a plausible prefix before the
/// speaker has finished, so they get stricter thresholds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlatformClass {
    Constrained,
    #[default]
    Standard,
}

impl PlatformClass {
    pub fn is_constrained(self) -> bool {
        matches!(self, PlatformClass::Constrained)
    }

    /// Window after a transcript reset during which late results are dropped.
    pub fn ignore_window(self) -> Duration {
        match self {
            PlatformClass::Constrained => Duration::from_millis(800),
            PlatformClass::Standard => Duration::from_millis(400),
        }
    }

    /// Delay before restarting an engine that stopped (or was stopped) on its own.
    pub fn restart_debounce(self) -> Duration {
        match self {
            PlatformClass::Constrained => Duration::from_millis(800),
            PlatformClass::Standard => Duration::from_millis(100),
        }
    }

    /// Automatic restarts attempted after an unintended stop before giving up.
    pub fn max_auto_restarts(self) -> Option<u32> {
        match self {
            PlatformClass::Constrained => Some(1),
            PlatformClass::Standard => None,
        }
    }

    /// Whether the engine is bounced at every passage boundary.
    pub fn restarts_between_passages(self) -> bool {
        self.is_constrained()
    }
}

/// Acceptance thresholds for the match decision.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ThresholdProfile {
    /// Minimum similarity (0-100) between passage and lookback window.
    pub similarity_threshold: f64,
    /// Minimum ratio of window length to passage length.
    pub min_length_ratio: f64,
    /// Maximum number of characters the window may fall short of the passage.
    pub absolute_length_slack: usize,
}

impl ThresholdProfile {
    pub const STANDARD: ThresholdProfile = ThresholdProfile {
        similarity_threshold: 55.0,
        min_length_ratio: 0.9,
        absolute_length_slack: 5,
    };

    pub const CONSTRAINED: ThresholdProfile = ThresholdProfile {
        similarity_threshold: 60.0,
        min_length_ratio: 0.98,
        absolute_length_slack: 1,
    };

    pub fn for_platform(platform: PlatformClass) -> Self {
        match platform {
            PlatformClass::Constrained => Self::CONSTRAINED,
            PlatformClass::Standard => Self::STANDARD,
        }
    }
}

impl Default for ThresholdProfile {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// Decides which platform class the running process belongs to.
pub trait PlatformClassifier {
    fn classify(&self) -> PlatformClass;
}

/// Classifies from a browser-style user agent string.
#[derive(Debug, Clone)]
pub struct UserAgentClassifier {
    user_agent: String,
}

impl UserAgentClassifier {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }
}

impl PlatformClassifier for UserAgentClassifier {
    fn classify(&self) -> PlatformClass {
        let constrained = ["iPad", "iPhone", "iPod"]
            .iter()
            .any(|device| self.user_agent.contains(device));
        let class = if constrained {
            PlatformClass::Constrained
        } else {
            PlatformClass::Standard
        };
        debug!(
            "Platform classified as {:?} from '{}'",
            class, self.user_agent
        );
        class
    }
}

/// A classifier that always answers the same class.
#[derive(Debug, Clone, Copy)]
pub struct FixedPlatform(pub PlatformClass);

impl PlatformClassifier for FixedPlatform {
    fn classify(&self) -> PlatformClass {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_classification() {
        let iphone = UserAgentClassifier::new(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15",
        );
        assert_eq!(iphone.classify(), PlatformClass::Constrained);

        let android = UserAgentClassifier::new("Mozilla/5.0 (Linux; Android 14; Pixel 8)");
        assert_eq!(android.classify(), PlatformClass::Standard);
    }

    #[test]
    fn test_profiles_differ_by_platform() {
        let standard = ThresholdProfile::for_platform(PlatformClass::Standard);
        let constrained = ThresholdProfile::for_platform(PlatformClass::Constrained);
        assert_eq!(standard.similarity_threshold, 55.0);
        assert!(constrained.min_length_ratio > standard.min_length_ratio);
        assert!(
            constrained.absolute_length_slack < standard.absolute_length_slack
        );
    }

    #[test]
    fn test_platform_serde_names() {
        let json = serde_json::to_string(&PlatformClass::Constrained).unwrap();
        assert_eq!(json, "\"constrained\"");
    }
}
