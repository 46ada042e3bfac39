//! Tunable decode parameters (spec §6.5), loadable/saveable as TOML.
//!
//! Mirrors the teacher's `Config`: private fields, `pub fn` getters, a
//! `Default` impl holding the documented defaults, and TOML round-trip
//! helpers for hosts that want to override individual tunables.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::DecoderError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderParams {
    token_pool_capacity: i32,
    active_beam_width: i32,
    prefix_beam_width: i32,
    num_suggestions_to_return: i32,
    score_to_beat_offset: f32,
    score_to_beat_absolute: f32,
    min_align_key_score: f32,
    first_point_weight: f32,
    omission_score: f32,
    completion_score: f32,
    lexicon_unigram_backoff: f32,
    prefix_lm_weight: f32,
    key_error_sigma: f32,
    direction_error_sigma: f32,
    skip_pause_score: f32,
    skip_corner_score: f32,
    min_curvature_for_corner: f32,
    pause_duration_in_ms: i32,
    max_imprecise_match_penalty: f32,
    precise_match_threshold: f32,
    uppercase_suppression_score_threshold: f32,
    min_completions: i32,
    completion_beam_size: i32,
    max_next_word_predictions: i32,
    prune_when_free_ratio_below: f32,
    prune_ratio: f32,
    /// Minimum distance (in px) between retained touch samples; not itself a
    /// search parameter, but shipped alongside the rest since hosts tune it
    /// together with `key_error_sigma` for a given screen density.
    gesture_sample_distance: f32,
    /// Spatial weight applied inside `align_score`'s squared-error term.
    spatial_weight: f32,
}

impl Default for DecoderParams {
    fn default() -> Self {
        DecoderParams {
            token_pool_capacity: 1000,
            active_beam_width: 100,
            prefix_beam_width: 3,
            num_suggestions_to_return: 20,
            score_to_beat_offset: -12.0,
            score_to_beat_absolute: f32::NEG_INFINITY,
            min_align_key_score: -8.0,
            first_point_weight: 2.0,
            omission_score: -5.0,
            completion_score: -4.0,
            lexicon_unigram_backoff: -5.0,
            prefix_lm_weight: 0.5,
            key_error_sigma: 0.9,
            direction_error_sigma: 0.7,
            skip_pause_score: -2.0,
            skip_corner_score: -4.0,
            min_curvature_for_corner: std::f32::consts::FRAC_PI_4,
            pause_duration_in_ms: 200,
            max_imprecise_match_penalty: -4.0,
            precise_match_threshold: -2.0,
            uppercase_suppression_score_threshold: -100.0,
            min_completions: 3,
            completion_beam_size: 20,
            max_next_word_predictions: 100,
            prune_when_free_ratio_below: 0.10,
            prune_ratio: 0.50,
            gesture_sample_distance: 25.0,
            spatial_weight: 0.7,
        }
    }
}

macro_rules! getter_setter {
    ($field:ident, $setter:ident, $with:ident, $ty:ty) => {
        pub fn $field(&self) -> $ty {
            self.$field
        }

        pub fn $setter(&mut self, value: $ty) {
            self.$field = value;
        }

        pub fn $with(mut self, value: $ty) -> Self {
            self.$field = value;
            self
        }
    };
}

impl DecoderParams {
    getter_setter!(token_pool_capacity, set_token_pool_capacity, with_token_pool_capacity, i32);
    getter_setter!(active_beam_width, set_active_beam_width, with_active_beam_width, i32);
    getter_setter!(prefix_beam_width, set_prefix_beam_width, with_prefix_beam_width, i32);
    getter_setter!(
        num_suggestions_to_return,
        set_num_suggestions_to_return,
        with_num_suggestions_to_return,
        i32
    );
    getter_setter!(score_to_beat_offset, set_score_to_beat_offset, with_score_to_beat_offset, f32);
    getter_setter!(
        score_to_beat_absolute,
        set_score_to_beat_absolute,
        with_score_to_beat_absolute,
        f32
    );
    getter_setter!(min_align_key_score, set_min_align_key_score, with_min_align_key_score, f32);
    getter_setter!(first_point_weight, set_first_point_weight, with_first_point_weight, f32);
    getter_setter!(omission_score, set_omission_score, with_omission_score, f32);
    getter_setter!(completion_score, set_completion_score, with_completion_score, f32);
    getter_setter!(
        lexicon_unigram_backoff,
        set_lexicon_unigram_backoff,
        with_lexicon_unigram_backoff,
        f32
    );
    getter_setter!(prefix_lm_weight, set_prefix_lm_weight, with_prefix_lm_weight, f32);
    getter_setter!(key_error_sigma, set_key_error_sigma, with_key_error_sigma, f32);
    getter_setter!(
        direction_error_sigma,
        set_direction_error_sigma,
        with_direction_error_sigma,
        f32
    );
    getter_setter!(skip_pause_score, set_skip_pause_score, with_skip_pause_score, f32);
    getter_setter!(skip_corner_score, set_skip_corner_score, with_skip_corner_score, f32);
    getter_setter!(
        min_curvature_for_corner,
        set_min_curvature_for_corner,
        with_min_curvature_for_corner,
        f32
    );
    getter_setter!(
        pause_duration_in_ms,
        set_pause_duration_in_ms,
        with_pause_duration_in_ms,
        i32
    );
    getter_setter!(
        max_imprecise_match_penalty,
        set_max_imprecise_match_penalty,
        with_max_imprecise_match_penalty,
        f32
    );
    getter_setter!(
        precise_match_threshold,
        set_precise_match_threshold,
        with_precise_match_threshold,
        f32
    );
    getter_setter!(
        uppercase_suppression_score_threshold,
        set_uppercase_suppression_score_threshold,
        with_uppercase_suppression_score_threshold,
        f32
    );
    getter_setter!(min_completions, set_min_completions, with_min_completions, i32);
    getter_setter!(completion_beam_size, set_completion_beam_size, with_completion_beam_size, i32);
    getter_setter!(
        max_next_word_predictions,
        set_max_next_word_predictions,
        with_max_next_word_predictions,
        i32
    );
    getter_setter!(
        prune_when_free_ratio_below,
        set_prune_when_free_ratio_below,
        with_prune_when_free_ratio_below,
        f32
    );
    getter_setter!(prune_ratio, set_prune_ratio, with_prune_ratio, f32);
    getter_setter!(
        gesture_sample_distance,
        set_gesture_sample_distance,
        with_gesture_sample_distance,
        f32
    );
    getter_setter!(spatial_weight, set_spatial_weight, with_spatial_weight, f32);

    pub fn from_toml_str(s: &str) -> Result<Self, DecoderError> {
        toml::from_str(s).map_err(|e| DecoderError::InvalidInput(format!("bad params toml: {e}")))
    }

    pub fn to_toml_string(&self) -> Result<String, DecoderError> {
        toml::to_string_pretty(self)
            .map_err(|e| DecoderError::InvalidInput(format!("cannot serialize params: {e}")))
    }

    pub fn load_toml<P: AsRef<Path>>(path: P) -> Result<Self, DecoderError> {
        let text = fs::read_to_string(path)
            .map_err(|e| DecoderError::InvalidInput(format!("cannot read params file: {e}")))?;
        Self::from_toml_str(&text)
    }

    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> Result<(), DecoderError> {
        let text = self.to_toml_string()?;
        fs::write(path, text)
            .map_err(|e| DecoderError::InvalidInput(format!("cannot write params file: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let p = DecoderParams::default();
        assert_eq!(p.token_pool_capacity(), 1000);
        assert_eq!(p.active_beam_width(), 100);
        assert_eq!(p.score_to_beat_absolute(), f32::NEG_INFINITY);
        assert!((p.prefix_lm_weight() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn toml_round_trip() {
        let p = DecoderParams::default().with_active_beam_width(42);
        let s = p.to_toml_string().unwrap();
        let back = DecoderParams::from_toml_str(&s).unwrap();
        assert_eq!(back.active_beam_width(), 42);
    }
}
