//! `DecoderSession` and the public `decode()` entry point (§6.4): owns
//! static collaborators (lexicons, LMs, params, char ops) and per-session
//! scratch state across successive `decode()` calls, resetting per-call
//! state at the start of each one.

use tracing::{debug, debug_span, warn};

use crate::aggregator::{self, DecoderResult};
use crate::beam::{self, Env};
use crate::codepoint::root_nodes;
use crate::error::DecoderError;
use crate::keyboard::{CharOps, Keyboard};
use crate::lexicon::{Lexicon, NodeRef, Scorer, Unsupported};
use crate::params::DecoderParams;
use crate::scorer::InterpolatedScorer;
use crate::search_space::{DecoderState, SearchSpace};
use crate::token::TokenPool;
use crate::touch::{TouchAction, TouchSequence};

/// A weighted language model contributing to the interpolated scorer.
pub struct WeightedLanguageModel {
    pub model: Box<dyn crate::lexicon::LanguageModel>,
    pub weight: f32,
}

/// Owns the collaborators and arena state that persist across `decode()`
/// calls: lexicons/LMs/params/char-ops are static; the token pool, search
/// space, and scratch buffer are reused (and reset) per call.
pub struct DecoderSession {
    lexicons: Vec<Box<dyn Lexicon>>,
    language_models: Vec<WeightedLanguageModel>,
    char_ops: Box<dyn CharOps>,
    params: DecoderParams,
    pool: TokenPool,
    space: SearchSpace,
    scratch: Vec<(u32, NodeRef)>,
    last_error: Option<DecoderError>,
}

impl DecoderSession {
    pub fn new(
        lexicons: Vec<Box<dyn Lexicon>>,
        language_models: Vec<WeightedLanguageModel>,
        char_ops: Box<dyn CharOps>,
        params: DecoderParams,
    ) -> Self {
        let pool = TokenPool::new(params.token_pool_capacity().max(0) as usize);
        DecoderSession {
            lexicons,
            language_models,
            char_ops,
            params,
            pool,
            space: SearchSpace::new(),
            scratch: Vec::new(),
            last_error: None,
        }
    }

    pub fn params(&self) -> &DecoderParams {
        &self.params
    }

    pub fn set_params(&mut self, params: DecoderParams) {
        self.params = params;
    }

    /// The `DecoderError` Kind from the most recent `decode()` call, if any
    /// — the diagnostic channel §7 requires for distinguishing "stroke too
    /// short" from "internal error" without exceptions.
    pub fn last_error(&self) -> Option<&DecoderError> {
        self.last_error.as_ref()
    }

    fn reset_per_call_state(&mut self) {
        self.pool.reset();
        self.space.clear();
        self.last_error = None;
    }
}

/// A single raw touch sample: screen coordinates and a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawTouchPoint {
    pub x: i32,
    pub y: i32,
    pub time_ms: i32,
}

/// Decodes a gesture stroke into ranked word candidates (§6.4). Never
/// returns an error: on any failure condition the result is an empty
/// `Vec`, with the reason recorded on `session` via [`DecoderSession::last_error`].
pub fn decode(stroke: &[RawTouchPoint], keyboard: &dyn Keyboard, session: &mut DecoderSession) -> Vec<DecoderResult> {
    let span = debug_span!("decode", touch_len = stroke.len());
    let _enter = span.enter();

    session.reset_per_call_state();

    if session.lexicons.is_empty() {
        warn!("decode called with zero lexicons");
        session.last_error = Some(DecoderError::NoLexicon);
        return Vec::new();
    }

    let mut touch = TouchSequence::new();
    touch.set_is_gesture(stroke.len() > 1);
    for (idx, point) in stroke.iter().enumerate() {
        let action = if idx == 0 {
            TouchAction::Down
        } else if idx == stroke.len() - 1 {
            TouchAction::Up
        } else {
            TouchAction::Move
        };
        if let Err(err) = touch.add_point(
            action,
            point.x as f32,
            point.y as f32,
            point.time_ms,
            session.params.gesture_sample_distance(),
        ) {
            warn!(error = %err, "invalid touch input");
            session.last_error = Some(err);
            return Vec::new();
        }
    }

    // An empty stroke is not an error (§8 boundary behaviour): it falls
    // through to the root token's prefix-completion path below, which
    // resolves to `predict_next_term({})` alone.
    touch.update_properties(keyboard, &session.params);

    let lexicon_refs: Vec<&dyn Lexicon> = session.lexicons.iter().map(|b| b.as_ref()).collect();

    let Some(root_handle) = session.pool.acquire() else {
        warn!("token pool exhausted before root token could be allocated");
        session.last_error = Some(DecoderError::PoolExhausted("no free slots for root token".into()));
        return Vec::new();
    };
    let roots = root_nodes(&lexicon_refs);
    session.pool.get_mut(root_handle).init_as_root(roots.clone(), &session.params);
    let root_state = DecoderState {
        lexicon_id: roots[0].lexicon_id(),
        node_id: roots[0].node_id(),
        word_history_id: -1,
        aligned_key: -1,
    };
    session.space.upsert(root_state, root_handle, &mut session.pool);

    let scorers: Vec<(Box<dyn Scorer>, f32)> = session
        .language_models
        .iter()
        .filter_map(|wlm| match wlm.model.new_scorer(&[], &[]) {
            Ok(scorer) => Some((scorer, wlm.weight)),
            Err(Unsupported(reason)) => {
                debug!(reason, "language model could not produce a scorer for this context");
                None
            }
        })
        .collect();
    let scorer = InterpolatedScorer::new(scorers);

    let env = Env {
        params: &session.params,
        keyboard,
        char_ops: session.char_ops.as_ref(),
        lexicons: &lexicon_refs,
    };

    beam::run(&env, &touch, &mut session.pool, &mut session.space, &mut session.scratch);

    aggregator::aggregate(&env, &touch, &mut session.pool, &session.space, &scorer, &mut session.scratch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyboard::{AsciiCharOps, KeyId};

    struct EmptyLexicon;
    impl Lexicon for EmptyLexicon {
        fn root(&self) -> NodeRef {
            0
        }
        fn children(&self, _node: NodeRef, _out: &mut Vec<(u32, NodeRef)>) {}
        fn key(&self, _node: NodeRef) -> String {
            String::new()
        }
        fn term_logp(&self, _node: NodeRef) -> Option<f32> {
            None
        }
        fn prefix_logp(&self, _node: NodeRef) -> Option<f32> {
            None
        }
        fn has_prefix_probabilities(&self) -> bool {
            false
        }
        fn encodes_codepoints(&self) -> bool {
            true
        }
    }

    struct NullKeyboard;
    impl Keyboard for NullKeyboard {
        fn num_keys(&self) -> usize {
            1
        }
        fn most_common_key_width(&self) -> f32 {
            40.0
        }
        fn most_common_key_height(&self) -> f32 {
            40.0
        }
        fn key_code(&self, _key: KeyId) -> Option<char> {
            Some('a')
        }
        fn key_index(&self, _code: char) -> KeyId {
            0
        }
        fn nearest_key_code(&self, _x: f32, _y: f32) -> char {
            'a'
        }
        fn key_to_key_distance(&self, _a: KeyId, _b: KeyId) -> f32 {
            0.0
        }
        fn key_to_key_direction(&self, _a: KeyId, _b: KeyId) -> f32 {
            0.0
        }
        fn point_to_key_distance(&self, _x: f32, _y: f32, _key: KeyId) -> f32 {
            0.0
        }
        fn key_center(&self, _key: KeyId) -> (f32, f32) {
            (0.0, 0.0)
        }
        fn key_width(&self, _key: KeyId) -> f32 {
            40.0
        }
        fn keys_for_code(&self, _code: char) -> Vec<KeyId> {
            vec![0]
        }
        fn second_digraph_key(&self, _code: char, _aligned_key: KeyId) -> Option<KeyId> {
            None
        }
        fn is_space_key(&self, _key: KeyId) -> bool {
            false
        }
    }

    #[test]
    fn zero_lexicons_returns_empty_and_records_no_lexicon() {
        let mut session = DecoderSession::new(vec![], vec![], Box::new(AsciiCharOps), DecoderParams::default());
        let keyboard = NullKeyboard;
        let results = decode(&[RawTouchPoint { x: 0, y: 0, time_ms: 0 }], &keyboard, &mut session);
        assert!(results.is_empty());
        assert!(matches!(session.last_error(), Some(DecoderError::NoLexicon)));
    }

    #[test]
    fn empty_stroke_returns_empty_without_panicking() {
        let mut session = DecoderSession::new(
            vec![Box::new(EmptyLexicon)],
            vec![],
            Box::new(AsciiCharOps),
            DecoderParams::default(),
        );
        let keyboard = NullKeyboard;
        let results = decode(&[], &keyboard, &mut session);
        assert!(results.is_empty());
    }

    #[test]
    fn pool_is_fully_released_between_decode_calls() {
        let mut session = DecoderSession::new(
            vec![Box::new(EmptyLexicon)],
            vec![],
            Box::new(AsciiCharOps),
            DecoderParams::default(),
        );
        let keyboard = NullKeyboard;
        let capacity = session.params().token_pool_capacity() as usize;

        decode(
            &[RawTouchPoint { x: 0, y: 0, time_ms: 0 }, RawTouchPoint { x: 40, y: 0, time_ms: 10 }],
            &keyboard,
            &mut session,
        );
        decode(
            &[RawTouchPoint { x: 0, y: 0, time_ms: 0 }, RawTouchPoint { x: 40, y: 0, time_ms: 10 }],
            &keyboard,
            &mut session,
        );

        assert_eq!(session.pool.free_count() + session.space.len(), capacity);
    }
}
