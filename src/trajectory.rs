//! Per-user emotional trajectory tracking.
//!
//! Maintains an append-only series of [`VaPoint`]s and classifies the
//! motion of the valence axis with a least-squares linear regression:
//!
//! - variance above 0.3 ⇒ `volatile`
//! - slope above 0.05 ⇒ `improving`
//! - slope below −0.05 ⇒ `declining`
//! - otherwise `stable`
//!
//! Under three points the trend is `unknown`. A declining trajectory
//! triggers the comfort-music boost consumed by the scoring engine.

use crate::emotion::{EmotionalTrend, MOOD_CENTROIDS, clamp_va, va_distance};
use serde::{Deserialize, Serialize};

/// Slope above which the trajectory counts as improving.
pub const SLOPE_THRESHOLD_POSITIVE: f64 = 0.05;
/// Slope below which the trajectory counts as declining.
pub const SLOPE_THRESHOLD_NEGATIVE: f64 = -0.05;
/// Valence variance above which the trajectory counts as volatile.
pub const VARIANCE_THRESHOLD: f64 = 0.3;
/// Minimum number of points before a trend is computed.
pub const MIN_POINTS_FOR_TREND: usize = 3;

/// A single point in valence–arousal space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaPoint {
    /// Valence, `-1..=1`.
    pub valence: f64,
    /// Arousal, `-1..=1`.
    pub arousal: f64,
    /// Conversation turn number this point was observed at.
    pub turn: u64,
    /// Detected mood label, if any.
    #[serde(default)]
    pub mood: Option<String>,
}

impl VaPoint {
    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance_to(&self, other: &VaPoint) -> f64 {
        va_distance(self.valence, self.arousal, other.valence, other.arousal)
    }
}

/// Full metrics snapshot of a trajectory, suitable for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryAnalysis {
    pub point_count: usize,
    pub current_trend: EmotionalTrend,
    pub valence_slope: f64,
    pub arousal_slope: f64,
    pub valence_variance: f64,
    pub arousal_variance: f64,
    pub comfort_music_boost: f64,
    pub energy_adjustment: f64,
    pub current_position: Option<VaPoint>,
    pub average_position: Option<(f64, f64)>,
    pub predicted_next: Option<(f64, f64)>,
    pub nearest_mood: Option<String>,
}

/// Tracks one user's emotional trajectory across conversation turns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrajectoryTracker {
    points: Vec<VaPoint>,
    valence_slope: f64,
    arousal_slope: f64,
    valence_variance: f64,
    arousal_variance: f64,
    trend: EmotionalTrend,
}

impl TrajectoryTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All tracked points, in arrival order.
    #[must_use]
    pub fn points(&self) -> &[VaPoint] {
        &self.points
    }

    /// Current trend classification.
    #[must_use]
    pub fn current_trend(&self) -> EmotionalTrend {
        self.trend
    }

    /// Valence slope from the last regression (positive = improving).
    #[must_use]
    pub fn valence_slope(&self) -> f64 {
        self.valence_slope
    }

    /// Arousal slope from the last regression.
    #[must_use]
    pub fn arousal_slope(&self) -> f64 {
        self.arousal_slope
    }

    /// Valence variance over all stored points.
    #[must_use]
    pub fn valence_variance(&self) -> f64 {
        self.valence_variance
    }

    /// Append a point. Inputs are clamped onto the VA range; the trend is
    /// recomputed once enough points exist.
    pub fn add_point(
        &mut self,
        valence: f64,
        arousal: f64,
        turn: u64,
        mood: Option<String>,
    ) -> VaPoint {
        let point = VaPoint {
            valence: clamp_va(valence),
            arousal: clamp_va(arousal),
            turn,
            mood,
        };
        self.points.push(point.clone());
        if self.points.len() >= MIN_POINTS_FOR_TREND {
            self.recompute_trend();
        }
        point
    }

    fn recompute_trend(&mut self) {
        let n = self.points.len();
        if n < MIN_POINTS_FOR_TREND {
            self.trend = EmotionalTrend::Unknown;
            return;
        }

        let nf = n as f64;
        let mean_turn = self.points.iter().map(|p| p.turn as f64).sum::<f64>() / nf;
        let mean_valence = self.points.iter().map(|p| p.valence).sum::<f64>() / nf;
        let mean_arousal = self.points.iter().map(|p| p.arousal).sum::<f64>() / nf;

        let mut numerator_v = 0.0;
        let mut numerator_a = 0.0;
        let mut denominator = 0.0;
        for p in &self.points {
            let dt = p.turn as f64 - mean_turn;
            numerator_v += dt * (p.valence - mean_valence);
            numerator_a += dt * (p.arousal - mean_arousal);
            denominator += dt * dt;
        }

        if denominator > 0.0 {
            self.valence_slope = numerator_v / denominator;
            self.arousal_slope = numerator_a / denominator;
        } else {
            self.valence_slope = 0.0;
            self.arousal_slope = 0.0;
        }

        self.valence_variance = self
            .points
            .iter()
            .map(|p| (p.valence - mean_valence).powi(2))
            .sum::<f64>()
            / nf;
        self.arousal_variance = self
            .points
            .iter()
            .map(|p| (p.arousal - mean_arousal).powi(2))
            .sum::<f64>()
            / nf;

        // Valence is the primary indicator.
        self.trend = if self.valence_variance > VARIANCE_THRESHOLD {
            EmotionalTrend::Volatile
        } else if self.valence_slope > SLOPE_THRESHOLD_POSITIVE {
            EmotionalTrend::Improving
        } else if self.valence_slope < SLOPE_THRESHOLD_NEGATIVE {
            EmotionalTrend::Declining
        } else {
            EmotionalTrend::Stable
        };
    }

    /// Additive bonus for calming songs while the trajectory declines.
    ///
    /// Scales with the steepness of the decline, capped at 0.3.
    #[must_use]
    pub fn comfort_music_boost(&self) -> f64 {
        if self.trend == EmotionalTrend::Declining {
            (self.valence_slope.abs() * 2.0).min(0.3)
        } else {
            0.0
        }
    }

    /// Energy-level adjustment suggested by the trajectory.
    #[must_use]
    pub fn energy_adjustment(&self) -> f64 {
        match self.trend {
            EmotionalTrend::Declining => -0.2,
            EmotionalTrend::Improving => 0.1,
            _ => 0.0,
        }
    }

    /// Most recent position, if any.
    #[must_use]
    pub fn current_position(&self) -> Option<&VaPoint> {
        self.points.last()
    }

    /// Average `(valence, arousal)` over the last `last_n` points.
    #[must_use]
    pub fn average_position(&self, last_n: usize) -> Option<(f64, f64)> {
        if self.points.is_empty() || last_n == 0 {
            return None;
        }
        let start = self.points.len().saturating_sub(last_n);
        let recent = &self.points[start..];
        let nf = recent.len() as f64;
        let v = recent.iter().map(|p| p.valence).sum::<f64>() / nf;
        let a = recent.iter().map(|p| p.arousal).sum::<f64>() / nf;
        Some((v, a))
    }

    /// Mood centroid nearest to the current position.
    #[must_use]
    pub fn nearest_mood_to_current(&self) -> Option<&'static str> {
        let current = self.current_position()?;
        let mut nearest = None;
        let mut min_distance = f64::INFINITY;
        for &(mood, v, a) in MOOD_CENTROIDS {
            let distance = va_distance(current.valence, current.arousal, v, a);
            if distance < min_distance {
                min_distance = distance;
                nearest = Some(mood);
            }
        }
        nearest
    }

    /// Linear extrapolation one turn ahead, clamped onto the VA range.
    ///
    /// Only defined once a trend exists (three or more points).
    #[must_use]
    pub fn predict_next_position(&self) -> Option<(f64, f64)> {
        if self.points.len() < MIN_POINTS_FOR_TREND {
            return None;
        }
        let current = self.points.last()?;
        let next_turn = current.turn as f64 + 1.0;

        let nf = self.points.len() as f64;
        let mean_turn = self.points.iter().map(|p| p.turn as f64).sum::<f64>() / nf;
        let mean_valence = self.points.iter().map(|p| p.valence).sum::<f64>() / nf;
        let mean_arousal = self.points.iter().map(|p| p.arousal).sum::<f64>() / nf;

        let valence = clamp_va(mean_valence + self.valence_slope * (next_turn - mean_turn));
        let arousal = clamp_va(mean_arousal + self.arousal_slope * (next_turn - mean_turn));
        Some((valence, arousal))
    }

    /// Complete trajectory metrics snapshot.
    #[must_use]
    pub fn analysis(&self) -> TrajectoryAnalysis {
        TrajectoryAnalysis {
            point_count: self.points.len(),
            current_trend: self.trend,
            valence_slope: self.valence_slope,
            arousal_slope: self.arousal_slope,
            valence_variance: self.valence_variance,
            arousal_variance: self.arousal_variance,
            comfort_music_boost: self.comfort_music_boost(),
            energy_adjustment: self.energy_adjustment(),
            current_position: self.current_position().cloned(),
            average_position: self.average_position(3),
            predicted_next: self.predict_next_position(),
            nearest_mood: self.nearest_mood_to_current().map(str::to_owned),
        }
    }

    /// Clear all tracked points and derived state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn declining_tracker() -> TrajectoryTracker {
        let mut t = TrajectoryTracker::new();
        for (turn, v) in [(1, 0.6), (2, 0.5), (3, 0.4), (4, 0.3), (5, 0.2)] {
            t.add_point(v, 0.0, turn, None);
        }
        t
    }

    #[test]
    fn trend_unknown_under_three_points() {
        let mut t = TrajectoryTracker::new();
        t.add_point(0.5, 0.0, 1, None);
        t.add_point(0.3, 0.0, 2, None);
        assert_eq!(t.current_trend(), EmotionalTrend::Unknown);
        assert!(t.predict_next_position().is_none());
    }

    #[test]
    fn declining_trend_detection() {
        let t = declining_tracker();
        assert_eq!(t.current_trend(), EmotionalTrend::Declining);
        assert!((t.valence_slope() - (-0.1)).abs() < 1e-9);
        assert!((t.valence_variance() - 0.02).abs() < 1e-9);
        assert!((t.comfort_music_boost() - 0.2).abs() < 1e-9);
        assert!((t.energy_adjustment() - (-0.2)).abs() < 1e-9);
    }

    #[test]
    fn improving_trend_detection() {
        let mut t = TrajectoryTracker::new();
        for (turn, v) in [(1, -0.2), (2, 0.0), (3, 0.2), (4, 0.4)] {
            t.add_point(v, 0.0, turn, None);
        }
        assert_eq!(t.current_trend(), EmotionalTrend::Improving);
        assert!((t.energy_adjustment() - 0.1).abs() < 1e-9);
        assert_eq!(t.comfort_music_boost(), 0.0);
    }

    #[test]
    fn stable_trend_for_flat_series() {
        let mut t = TrajectoryTracker::new();
        for turn in 1..=4 {
            t.add_point(0.3, 0.1, turn, None);
        }
        assert_eq!(t.current_trend(), EmotionalTrend::Stable);
    }

    #[test]
    fn volatile_trend_for_high_variance() {
        let mut t = TrajectoryTracker::new();
        for (turn, v) in [(1, 0.9), (2, -0.9), (3, 0.9), (4, -0.9)] {
            t.add_point(v, 0.0, turn, None);
        }
        assert_eq!(t.current_trend(), EmotionalTrend::Volatile);
    }

    #[test]
    fn inputs_are_clamped() {
        let mut t = TrajectoryTracker::new();
        let p = t.add_point(2.5, -3.0, 1, None);
        assert_eq!(p.valence, 1.0);
        assert_eq!(p.arousal, -1.0);
    }

    #[test]
    fn prediction_extrapolates_and_clamps() {
        let t = declining_tracker();
        let (v, a) = t.predict_next_position().unwrap();
        // Mean valence 0.4 at mean turn 3, slope -0.1, next turn 6.
        assert!((v - 0.1).abs() < 1e-9);
        assert!(a.abs() < 1e-9);

        let mut steep = TrajectoryTracker::new();
        for (turn, v) in [(1, -0.2), (2, -0.5), (3, -0.9)] {
            steep.add_point(v, 0.0, turn, None);
        }
        let (v, _) = steep.predict_next_position().unwrap();
        assert!(v >= -1.0);
    }

    #[test]
    fn average_position_over_recent_points() {
        let t = declining_tracker();
        let (v, a) = t.average_position(3).unwrap();
        assert!((v - 0.3).abs() < 1e-9);
        assert!(a.abs() < 1e-9);
    }

    #[test]
    fn nearest_mood_tracks_current_point() {
        let mut t = TrajectoryTracker::new();
        assert!(t.nearest_mood_to_current().is_none());
        t.add_point(0.8, 0.6, 1, None);
        assert_eq!(t.nearest_mood_to_current(), Some("happy"));
    }

    #[test]
    fn serde_roundtrip_preserves_state() {
        let t = declining_tracker();
        let json = serde_json::to_string(&t).unwrap();
        let back: TrajectoryTracker = serde_json::from_str(&json).unwrap();
        assert_eq!(back.points(), t.points());
        assert_eq!(back.current_trend(), t.current_trend());
        assert!((back.valence_slope() - t.valence_slope()).abs() < 1e-12);
    }

    #[test]
    fn reset_clears_everything() {
        let mut t = declining_tracker();
        t.reset();
        assert!(t.points().is_empty());
        assert_eq!(t.current_trend(), EmotionalTrend::Unknown);
    }

    #[test]
    fn analysis_snapshot_is_consistent() {
        let t = declining_tracker();
        let a = t.analysis();
        assert_eq!(a.point_count, 5);
        assert_eq!(a.current_trend, EmotionalTrend::Declining);
        assert!((a.comfort_music_boost - 0.2).abs() < 1e-9);
        assert!(a.predicted_next.is_some());
    }
}
