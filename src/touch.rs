//! Touch Sequence (C1): resampling, per-point geometric features, and the
//! dense align/transit score tables used by the Beam Expander.

use crate::error::DecoderError;
use crate::keyboard::{KeyId, Keyboard};
use crate::params::DecoderParams;

/// A single resampled touch sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchPoint {
    pub x: f32,
    pub y: f32,
    pub time_ms: i32,
    pub cumulative_length: f32,
}

/// Number of trailing points whose geometric features and score rows are
/// recomputed when the sequence grows, since direction/curvature/duration
/// depend on up to one neighbour on each side.
const POINTS_TO_RECOMPUTE: usize = 3;

/// Raw input event kind, mirroring a touch controller's action stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchAction {
    Down,
    Move,
    Up,
}

/// Holds a resampled stroke plus precomputed per-point features and spatial
/// score tables (C1). `update_properties` must be called after each batch of
/// `add_point` calls before any feature/score accessor is used.
pub struct TouchSequence {
    points: Vec<TouchPoint>,
    directions: Vec<f32>,
    curvatures: Vec<f32>,
    durations: Vec<f32>,
    is_corner: Vec<bool>,
    is_pause: Vec<bool>,
    nearest_key: Vec<char>,
    /// `align_scores[i][k]`.
    align_scores: Vec<Vec<f32>>,
    /// `transit_scores[i][k1 * num_keys + k2]`, flattened per point.
    transit_scores: Vec<Vec<f32>>,
    properties_valid: bool,
    num_keys: usize,
    last_action: Option<TouchAction>,
    /// Whether this stroke should be treated as a gesture (vs. a sequence of
    /// taps); gates the `min_align_key_score` expansion guard (§4.6).
    is_gesture: bool,
}

impl TouchSequence {
    pub fn new() -> Self {
        TouchSequence {
            points: Vec::new(),
            directions: Vec::new(),
            curvatures: Vec::new(),
            durations: Vec::new(),
            is_corner: Vec::new(),
            is_pause: Vec::new(),
            nearest_key: Vec::new(),
            align_scores: Vec::new(),
            transit_scores: Vec::new(),
            properties_valid: false,
            num_keys: 0,
            last_action: None,
            is_gesture: true,
        }
    }

    pub fn is_gesture(&self) -> bool {
        self.is_gesture
    }

    pub fn set_is_gesture(&mut self, is_gesture: bool) {
        self.is_gesture = is_gesture;
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, i: usize) -> TouchPoint {
        self.points[i]
    }

    /// Appends a raw sample, applying the resampling contract: unconditional
    /// if empty; otherwise only retained if its distance from the last point
    /// is `>= sample_dist`, UNLESS this is the terminal up-event, in which
    /// case the last point is replaced.
    pub fn add_point(
        &mut self,
        action: TouchAction,
        x: f32,
        y: f32,
        time_ms: i32,
        sample_dist: f32,
    ) -> Result<(), DecoderError> {
        if !x.is_finite() || !y.is_finite() {
            return Err(DecoderError::InvalidInput(format!(
                "non-finite touch coordinate ({x}, {y})"
            )));
        }
        self.properties_valid = false;
        self.last_action = Some(action);

        if self.points.is_empty() {
            self.points.push(TouchPoint {
                x,
                y,
                time_ms,
                cumulative_length: 0.0,
            });
            return Ok(());
        }

        let last = *self.points.last().unwrap();
        let dist = distance(x, y, last.x, last.y);
        if dist < sample_dist {
            if action == TouchAction::Up {
                *self.points.last_mut().unwrap() = TouchPoint {
                    x,
                    y,
                    time_ms,
                    cumulative_length: last.cumulative_length,
                };
            }
            return Ok(());
        }

        self.points.push(TouchPoint {
            x,
            y,
            time_ms,
            cumulative_length: last.cumulative_length + dist,
        });
        Ok(())
    }

    pub fn is_mid_gesture(&self) -> bool {
        self.last_action != Some(TouchAction::Up)
    }

    pub fn total_length(&self) -> f32 {
        self.points.last().map(|p| p.cumulative_length).unwrap_or(0.0)
    }

    /// Recomputes geometric features and score tables for the last
    /// [`POINTS_TO_RECOMPUTE`] (+ any newly appended) points.
    pub fn update_properties(&mut self, keyboard: &dyn Keyboard, params: &DecoderParams) {
        let n = self.points.len();
        self.num_keys = keyboard.num_keys();

        self.directions.resize(n, 0.0);
        self.curvatures.resize(n, 0.0);
        self.durations.resize(n, 0.0);
        self.is_corner.resize(n, false);
        self.is_pause.resize(n, false);
        self.nearest_key.resize(n, '\0');
        while self.align_scores.len() < n {
            self.align_scores.push(vec![0.0; self.num_keys]);
        }
        while self.transit_scores.len() < n {
            self.transit_scores.push(vec![0.0; self.num_keys * self.num_keys]);
        }

        let start = n.saturating_sub(POINTS_TO_RECOMPUTE + 1);
        for i in start..n {
            self.nearest_key[i] = keyboard.nearest_key_code(self.points[i].x, self.points[i].y);
        }
        self.update_gesture_geometry(start, keyboard, params);
        self.update_align_scores(start, keyboard, params);
        self.update_transit_scores(start, keyboard, params);

        self.properties_valid = true;
    }

    fn update_gesture_geometry(&mut self, start: usize, _keyboard: &dyn Keyboard, params: &DecoderParams) {
        let n = self.points.len();
        if n == 0 {
            return;
        }
        for i in start..n {
            let prev = i.saturating_sub(1);
            let next = (i + 1).min(n - 1);
            self.directions[i] = angle(self.points[prev], self.points[next]);
            self.durations[i] = (self.points[next].time_ms - self.points[prev].time_ms) as f32;
        }
        for i in start..n {
            let prev = i.saturating_sub(1);
            let next = (i + 1).min(n - 1);
            self.curvatures[i] = angle_diff(self.directions[prev], self.directions[next]);
        }
        for i in start..n {
            let prev = i.saturating_sub(1);
            let next = (i + 1).min(n - 1);
            let is_max_over_prev = self.curvatures[i] >= self.curvatures[prev];
            let is_max_over_next = self.curvatures[i] >= self.curvatures[next];
            self.is_corner[i] =
                self.curvatures[i] >= params.min_curvature_for_corner() && is_max_over_prev && is_max_over_next;

            let dur_max_over_prev = self.durations[i] >= self.durations[prev];
            let dur_max_over_next = self.durations[i] >= self.durations[next];
            self.is_pause[i] = self.durations[i] >= params.pause_duration_in_ms() as f32
                && dur_max_over_prev
                && dur_max_over_next;
        }
    }

    fn update_align_scores(&mut self, start: usize, keyboard: &dyn Keyboard, params: &DecoderParams) {
        let n = self.points.len();
        for i in start..n {
            let p = self.points[i];
            for k in 0..self.num_keys {
                let key = k as KeyId;
                let dist = keyboard.point_to_key_distance(p.x, p.y, key);
                let width = keyboard.key_width(key).max(f32::MIN_POSITIVE);
                let normalized = dist * (1.0 / (width * params.key_error_sigma())) * params.spatial_weight();
                self.align_scores[i][k] = -(normalized * normalized);
            }
        }
    }

    fn update_transit_scores(&mut self, start: usize, keyboard: &dyn Keyboard, params: &DecoderParams) {
        let n = self.points.len();
        let inv_sigma_sq = 1.0 / (params.direction_error_sigma() * params.direction_error_sigma());
        let common_width = keyboard.most_common_key_width().max(f32::MIN_POSITIVE);
        for i in start..n {
            let direction_weight = if i == 0 {
                inv_sigma_sq
            } else {
                (self.points[i].cumulative_length - self.points[i - 1].cumulative_length) * inv_sigma_sq
                    / common_width
            };
            for k1 in 0..self.num_keys {
                for k2 in 0..self.num_keys {
                    if k1 == k2 {
                        continue;
                    }
                    let key_dir = keyboard.key_to_key_direction(k1 as KeyId, k2 as KeyId);
                    let diff = angle_diff(self.directions[i], key_dir).min(std::f32::consts::FRAC_PI_4);
                    let mut score = -(diff * diff) * direction_weight;
                    if self.is_pause[i] {
                        score += params.skip_pause_score();
                    }
                    if self.is_corner[i] {
                        score += self.curvatures[i] * params.skip_corner_score();
                    }
                    self.transit_scores[i][k1 * self.num_keys + k2] = score;
                }
            }
        }
    }

    pub fn direction(&self, i: usize) -> f32 {
        self.directions[i]
    }

    pub fn curvature(&self, i: usize) -> f32 {
        self.curvatures[i]
    }

    pub fn duration(&self, i: usize) -> f32 {
        self.durations[i]
    }

    pub fn is_corner(&self, i: usize) -> bool {
        self.is_corner[i]
    }

    pub fn is_pause(&self, i: usize) -> bool {
        self.is_pause[i]
    }

    pub fn nearest_key_code(&self, i: usize) -> char {
        self.nearest_key[i]
    }

    /// `align_score(i, k)`. Panics (programming error, §7 `InvariantViolation`
    /// in debug) if called before `update_properties`.
    pub fn align_score(&self, i: usize, key: KeyId) -> Result<f32, DecoderError> {
        if !self.properties_valid {
            return Err(DecoderError::InvariantViolation(
                "align_score read before update_properties".into(),
            ));
        }
        if key < 0 {
            return Ok(f32::NEG_INFINITY);
        }
        Ok(self.align_scores[i][key as usize])
    }

    /// `transit_score(i, k1, k2)`; unused (returns `-inf`) when `k1 == k2`.
    pub fn transit_score(&self, i: usize, k1: KeyId, k2: KeyId) -> Result<f32, DecoderError> {
        if !self.properties_valid {
            return Err(DecoderError::InvariantViolation(
                "transit_score read before update_properties".into(),
            ));
        }
        if k1 < 0 || k2 < 0 || k1 == k2 {
            return Ok(f32::NEG_INFINITY);
        }
        Ok(self.transit_scores[i][k1 as usize * self.num_keys + k2 as usize])
    }

    /// The "literal" nearest-key codes the sequence passes through.
    pub fn literal_codes(&self) -> Vec<char> {
        self.nearest_key.clone()
    }
}

impl Default for TouchSequence {
    fn default() -> Self {
        Self::new()
    }
}

fn distance(ax: f32, ay: f32, bx: f32, by: f32) -> f32 {
    ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
}

fn angle(a: TouchPoint, b: TouchPoint) -> f32 {
    (b.y - a.y).atan2(b.x - a.x)
}

/// Smallest absolute angular difference between two directions, in `[0, pi]`.
fn angle_diff(a: f32, b: f32) -> f32 {
    let two_pi = std::f32::consts::TAU;
    let mut d = (a - b) % two_pi;
    if d > std::f32::consts::PI {
        d -= two_pi;
    } else if d < -std::f32::consts::PI {
        d += two_pi;
    }
    d.abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sequence_accepts_first_point_unconditionally() {
        let mut seq = TouchSequence::new();
        seq.add_point(TouchAction::Down, 0.0, 0.0, 0, 25.0).unwrap();
        assert_eq!(seq.len(), 1);
    }

    #[test]
    fn close_points_are_dropped_except_on_up() {
        let mut seq = TouchSequence::new();
        seq.add_point(TouchAction::Down, 0.0, 0.0, 0, 25.0).unwrap();
        seq.add_point(TouchAction::Move, 1.0, 0.0, 10, 25.0).unwrap();
        assert_eq!(seq.len(), 1, "sub-threshold move should not append");
        seq.add_point(TouchAction::Up, 2.0, 0.0, 20, 25.0).unwrap();
        assert_eq!(seq.len(), 1, "up event replaces rather than appends");
        assert_eq!(seq.point(0).x, 2.0);
    }

    #[test]
    fn nan_coordinate_is_invalid_input() {
        let mut seq = TouchSequence::new();
        let err = seq.add_point(TouchAction::Down, f32::NAN, 0.0, 0, 25.0).unwrap_err();
        assert!(matches!(err, DecoderError::InvalidInput(_)));
    }

    #[test]
    fn resampling_is_idempotent_given_already_spaced_points() {
        let mut seq = TouchSequence::new();
        seq.add_point(TouchAction::Down, 0.0, 0.0, 0, 25.0).unwrap();
        seq.add_point(TouchAction::Move, 25.0, 0.0, 10, 25.0).unwrap();
        seq.add_point(TouchAction::Move, 50.0, 0.0, 20, 25.0).unwrap();
        assert_eq!(seq.len(), 3);
    }

    #[test]
    fn reading_scores_before_update_properties_is_invariant_violation() {
        let mut seq = TouchSequence::new();
        seq.add_point(TouchAction::Down, 0.0, 0.0, 0, 25.0).unwrap();
        let err = seq.align_score(0, 0).unwrap_err();
        assert!(matches!(err, DecoderError::InvariantViolation(_)));
    }
}
