//! Valence–arousal space primitives.
//!
//! The emotional state of a conversation is tracked on a two-dimensional
//! plane: valence (pleasantness, `-1..=1`) and arousal (activation,
//! `-1..=1`). Mood labels map onto this plane through a fixed centroid
//! table shared by the trajectory tracker and the cold-start handler.
//!
//! The centroid coordinates are part of the external contract: they govern
//! comfort-boost triggering and nearest-mood mapping, so they must not
//! drift.

use serde::{Deserialize, Serialize};

/// Canonical mood centroids in VA-space: `(mood, valence, arousal)`.
pub const MOOD_CENTROIDS: &[(&str, f64, f64)] = &[
    ("happy", 0.8, 0.6),
    ("sad", -0.7, -0.3),
    ("angry", -0.6, 0.8),
    ("calm", 0.5, -0.5),
    ("excited", 0.7, 0.9),
    ("romantic", 0.6, 0.2),
    ("nostalgic", 0.1, -0.2),
    ("energetic", 0.5, 0.9),
    ("anxious", -0.4, 0.7),
    ("peaceful", 0.6, -0.6),
    ("melancholic", -0.5, -0.4),
    ("neutral", 0.0, 0.0),
];

/// Classification of recent motion in VA-space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmotionalTrend {
    /// Fewer than three data points.
    #[default]
    Unknown,
    /// No significant valence change.
    Stable,
    /// Valence rising.
    Improving,
    /// Valence falling.
    Declining,
    /// High valence variance, unpredictable.
    Volatile,
}

impl EmotionalTrend {
    /// Stable snake_case label, matching the serialized form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Stable => "stable",
            Self::Improving => "improving",
            Self::Declining => "declining",
            Self::Volatile => "volatile",
        }
    }
}

impl std::fmt::Display for EmotionalTrend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clamp a value onto the VA axis range `[-1, 1]`.
#[must_use]
pub fn clamp_va(value: f64) -> f64 {
    value.clamp(-1.0, 1.0)
}

/// Clamp a value onto the unit range `[0, 1]`.
#[must_use]
pub fn clamp_unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// Euclidean distance between two VA coordinates.
#[must_use]
pub fn va_distance(v1: f64, a1: f64, v2: f64, a2: f64) -> f64 {
    ((v1 - v2).powi(2) + (a1 - a2).powi(2)).sqrt()
}

/// Resolve a mood label to its centroid coordinates.
///
/// Lookup is case-insensitive; unknown labels resolve to neutral `(0, 0)`.
#[must_use]
pub fn mood_to_va(mood: &str) -> (f64, f64) {
    let needle = mood.to_lowercase();
    MOOD_CENTROIDS
        .iter()
        .find(|(name, _, _)| *name == needle)
        .map(|&(_, v, a)| (v, a))
        .unwrap_or((0.0, 0.0))
}

/// Map VA coordinates to the nearest mood centroid.
#[must_use]
pub fn va_to_mood(valence: f64, arousal: f64) -> &'static str {
    let mut nearest = "neutral";
    let mut min_distance = f64::INFINITY;
    for &(mood, v, a) in MOOD_CENTROIDS {
        let distance = va_distance(valence, arousal, v, a);
        if distance < min_distance {
            min_distance = distance;
            nearest = mood;
        }
    }
    nearest
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn centroid_table_is_exact() {
        assert_eq!(mood_to_va("happy"), (0.8, 0.6));
        assert_eq!(mood_to_va("sad"), (-0.7, -0.3));
        assert_eq!(mood_to_va("calm"), (0.5, -0.5));
        assert_eq!(mood_to_va("peaceful"), (0.6, -0.6));
        assert_eq!(mood_to_va("melancholic"), (-0.5, -0.4));
        assert_eq!(mood_to_va("neutral"), (0.0, 0.0));
        assert_eq!(MOOD_CENTROIDS.len(), 12);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(mood_to_va("HAPPY"), (0.8, 0.6));
        assert_eq!(mood_to_va("Calm"), (0.5, -0.5));
    }

    #[test]
    fn unknown_mood_is_neutral() {
        assert_eq!(mood_to_va("rhapsodic"), (0.0, 0.0));
    }

    #[test]
    fn nearest_mood_at_centroid() {
        for &(mood, v, a) in MOOD_CENTROIDS {
            assert_eq!(va_to_mood(v, a), mood, "centroid for {mood}");
        }
    }

    #[test]
    fn nearest_mood_off_centroid() {
        // Close to happy but not exactly on it.
        assert_eq!(va_to_mood(0.75, 0.55), "happy");
        // Origin maps to neutral.
        assert_eq!(va_to_mood(0.0, 0.0), "neutral");
    }

    #[test]
    fn clamping() {
        assert_eq!(clamp_va(1.5), 1.0);
        assert_eq!(clamp_va(-2.0), -1.0);
        assert_eq!(clamp_va(0.25), 0.25);
        assert_eq!(clamp_unit(-0.1), 0.0);
        assert_eq!(clamp_unit(1.2), 1.0);
    }

    #[test]
    fn trend_labels_roundtrip() {
        assert_eq!(EmotionalTrend::Declining.as_str(), "declining");
        let json = serde_json::to_string(&EmotionalTrend::Volatile).unwrap();
        assert_eq!(json, "\"volatile\"");
        let back: EmotionalTrend = serde_json::from_str("\"improving\"").unwrap();
        assert_eq!(back, EmotionalTrend::Improving);
    }
}
