//! Beam Expander (C6): the per-touch-index sweep/rank/pass/prune/expand loop
//! that drives the search forward one touch sample at a time.

use crate::codepoint::CodepointNode;
use crate::keyboard::{CharOps, KeyId, Keyboard};
use crate::lexicon::{Lexicon, NodeRef};
use crate::params::DecoderParams;
use crate::search_space::{DecoderState, SearchSpace};
use crate::token::{Handle, TokenPool};
use crate::touch::TouchSequence;

use tracing::{debug, trace};

/// Immutable context shared by every call in one `Decode`'s beam loop.
pub struct Env<'a> {
    pub params: &'a DecoderParams,
    pub keyboard: &'a dyn Keyboard,
    pub char_ops: &'a dyn CharOps,
    pub lexicons: &'a [&'a dyn Lexicon],
}

/// Runs the Beam Expander over touch indices `0..touch.len()`, mutating
/// `pool`/`space` in place. `scratch` is the reusable child-enumeration
/// buffer threaded down to [`crate::codepoint::CodepointNode::children`].
pub fn run(
    env: &Env,
    touch: &TouchSequence,
    pool: &mut TokenPool,
    space: &mut SearchSpace,
    scratch: &mut Vec<(u32, NodeRef)>,
) {
    for i in 0..touch.len() as i16 {
        space.sweep_to_index(i, pool);

        let top = space.select_top_by_score(
            env.params.active_beam_width() as usize,
            env.params.score_to_beat_absolute(),
            pool,
        );
        if top.is_empty() {
            continue;
        }

        let best = top
            .iter()
            .map(|&h| pool.get(h).total_score())
            .fold(f32::NEG_INFINITY, f32::max);
        trace!(index = i, beam_size = top.len(), best, "beam step");

        for &h in &top {
            let token = pool.get(h);
            if token.aligned_key() >= 0 && token.transit_score() > f32::NEG_INFINITY {
                pass_token_gesture(env, touch, pool, h, h, i);
            }
        }

        let active_beam_min_score = if top.len() < env.params.active_beam_width() as usize {
            f32::NEG_INFINITY
        } else {
            top.iter()
                .map(|&h| pool.get(h).next_total_score())
                .fold(f32::INFINITY, f32::min)
        };

        for &h in &top {
            if capacity_under_pressure(pool, env.params) {
                debug!(free_count = pool.free_count(), capacity = pool.capacity(), "pruning search space");
                space.prune_outside(&top, env.params.prune_ratio(), pool);
            }
            expand_token(env, touch, pool, space, scratch, h, i, best, active_beam_min_score);
        }
    }

    // One more sweep to promote the final index's `next_alignment` into
    // `cur_alignment` — §4.6's loop only sweeps at the *start* of each index
    // (finalizing the previous one), so the last index's own tokens are
    // otherwise left stranded one step behind when the Result Aggregator
    // looks for `cur_alignment.index == N-1`.
    space.sweep_to_index(touch.len() as i16, pool);
}

fn capacity_under_pressure(pool: &TokenPool, params: &DecoderParams) -> bool {
    (pool.free_count() as f32) < (pool.capacity() as f32 * params.prune_when_free_ratio_below())
}

/// Computes the passing formula from `original`'s current alignment to touch
/// index `i` and commits it into `next`'s `next_alignment` if it strictly
/// improves. `original` and `next` are the same handle when advancing an
/// existing token in place; they differ when `next` is a freshly created
/// child, whose own `cur_alignment` was invalidated by `init_as_child` and so
/// cannot serve as the score basis — the parent's (still-valid) alignment
/// must be used instead, per the source's `original_token`/`next_token`
/// split. `next`'s own `prev_aligned_key`/`aligned_key` are used for `p`/`k`,
/// since those are already populated correctly on the child. Returns whether
/// it committed.
fn pass_token_gesture(env: &Env, touch: &TouchSequence, pool: &mut TokenPool, original: Handle, next: Handle, i: i16) -> bool {
    let (p, k) = {
        let t = pool.get(next);
        (t.prev_aligned_key(), t.aligned_key())
    };
    let (cur_align, cur_transit) = {
        let t = pool.get(original);
        (t.cur_alignment().align_score(), t.cur_alignment().transit_score())
    };
    let next_best_before = pool.get(next).next_alignment().best_score();

    let point_align = if k < 0 {
        f32::NEG_INFINITY
    } else {
        touch.align_score(i as usize, k).unwrap_or(f32::NEG_INFINITY)
    };
    let point_transit = touch.transit_score(i as usize, p, k).unwrap_or(f32::NEG_INFINITY);

    let (next_align, next_transit);
    if p == -1 {
        next_align = if i == 0 {
            point_align * env.params.first_point_weight()
        } else {
            f32::NEG_INFINITY
        };
        next_transit = f32::NEG_INFINITY;
    } else if p == k || env.keyboard.key_to_key_distance(p, k) == 0.0 {
        next_align = cur_transit + point_align;
        next_transit = cur_transit + point_transit;
    } else {
        next_align = cur_align + point_align;
        next_transit = cur_align + point_transit;
    }

    if next_align.max(next_transit) > next_best_before {
        let t = pool.get_mut(next);
        t.next_alignment_mut().set_index(i);
        t.next_alignment_mut().set_scores(next_align, next_transit);
        true
    } else {
        false
    }
}

/// Finds the existing child token for `(lexicon_id, node_id, word_history_id,
/// next_key)` or creates one from the pool. `None` if the pool is exhausted
/// or `child_nodes` is empty (benign skips, not errors).
fn find_or_create_child(
    env: &Env,
    pool: &mut TokenPool,
    space: &mut SearchSpace,
    parent: Handle,
    child_nodes: &[CodepointNode],
    next_key: KeyId,
) -> Option<Handle> {
    let first = child_nodes.first()?;
    let lexicon_id = first.lexicon_id();
    let node_id = first.node_id();
    let parent_snapshot = pool.get(parent).clone();

    let state = DecoderState {
        lexicon_id,
        node_id,
        word_history_id: parent_snapshot.word_history_id(),
        aligned_key: next_key,
    };

    if let Some(existing) = space.find(&state) {
        return Some(existing);
    }

    let handle = match pool.acquire() {
        Some(h) => h,
        None => {
            debug!("token pool exhausted; skipping expansion");
            return None;
        }
    };
    pool.get_mut(handle)
        .init_as_child(child_nodes.to_vec(), &parent_snapshot, next_key, env.params);
    Some(space.upsert(state, handle, pool))
}

/// Recursively expands `handle`'s children at touch index `i`, per §4.6
/// step 5: the two expansion guards, then one branch per child codepoint
/// (repeated/overlapping key, ordinary key, skippable omission, empty-key
/// omission, digraph second key).
fn expand_token(
    env: &Env,
    touch: &TouchSequence,
    pool: &mut TokenPool,
    space: &mut SearchSpace,
    scratch: &mut Vec<(u32, NodeRef)>,
    handle: Handle,
    i: i16,
    best: f32,
    active_beam_min_score: f32,
) {
    let token_total = pool.get(handle).total_score();
    if token_total < best + env.params.score_to_beat_offset() {
        return;
    }

    let (aligned_key, cur_index, cur_align_score, lm_score) = {
        let t = pool.get(handle);
        (t.aligned_key(), t.index(), t.align_score(), t.lm_score())
    };

    let is_space = aligned_key >= 0 && env.keyboard.is_space_key(aligned_key);
    let fails_align_floor = aligned_key >= 0
        && touch.is_gesture()
        && !is_space
        && touch
            .align_score(cur_index.max(0) as usize, aligned_key)
            .unwrap_or(f32::NEG_INFINITY)
            < env.params.min_align_key_score();
    let fails_beam_floor = (cur_align_score + lm_score) < active_beam_min_score;
    if fails_align_floor || fails_beam_floor {
        return;
    }

    let children: Vec<(char, Vec<CodepointNode>)> = pool
        .get_mut(handle)
        .children(env.lexicons, scratch)
        .iter()
        .map(|(&c, nodes)| (c, nodes.clone()))
        .collect();

    for (c, nodes) in &children {
        let possible_keys = env.keyboard.keys_for_code(*c);

        for &next_key in &possible_keys {
            try_key_transition(env, touch, pool, space, scratch, handle, nodes, aligned_key, next_key, i, best, active_beam_min_score);
        }

        if env.char_ops.is_skippable(*c) {
            if let Some(child) = find_or_create_child(env, pool, space, handle, nodes, aligned_key) {
                pass_token_gesture(env, touch, pool, handle, child, i);
                expand_token(env, touch, pool, space, scratch, child, i, best, active_beam_min_score);
            }
        }

        if possible_keys.is_empty() {
            if let Some(child) = find_or_create_child(env, pool, space, handle, nodes, aligned_key) {
                pool.get_mut(child).add_score(env.params.omission_score());
                pass_token_gesture(env, touch, pool, handle, child, i);
                expand_token(env, touch, pool, space, scratch, child, i, best, active_beam_min_score);
            }
        }

        if let Some(second_key) = env.keyboard.second_digraph_key(*c, aligned_key) {
            if !possible_keys.contains(&second_key) {
                try_key_transition(env, touch, pool, space, scratch, handle, nodes, aligned_key, second_key, i, best, active_beam_min_score);
            }
        }
    }
}

/// The repeated/overlapping-key branch vs. the ordinary find-or-create +
/// pass branch for a single `(child_nodes, next_key)` candidate.
#[allow(clippy::too_many_arguments)]
fn try_key_transition(
    env: &Env,
    touch: &TouchSequence,
    pool: &mut TokenPool,
    space: &mut SearchSpace,
    scratch: &mut Vec<(u32, NodeRef)>,
    parent: Handle,
    child_nodes: &[CodepointNode],
    parent_aligned_key: KeyId,
    next_key: KeyId,
    i: i16,
    best: f32,
    active_beam_min_score: f32,
) {
    let Some(child) = find_or_create_child(env, pool, space, parent, child_nodes, next_key) else {
        return;
    };

    let is_repeated = next_key == parent_aligned_key || env.keyboard.key_to_key_distance(next_key, parent_aligned_key) == 0.0;
    if is_repeated {
        let parent_snapshot = pool.get(parent).clone();
        let improved = pool.get_mut(child).init_as_repeated_letter(&parent_snapshot);
        if improved {
            expand_token(env, touch, pool, space, scratch, child, i, best, active_beam_min_score);
        }
    } else {
        pass_token_gesture(env, touch, pool, parent, child, i);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codepoint::root_nodes;
    use crate::keyboard::AsciiCharOps;
    use crate::lexicon::Lexicon;
    use std::collections::HashMap;

    /// A tiny 4-key straight-line keyboard ("c", "a", "t", space) and a
    /// lexicon containing only "cat", used to exercise one full beam pass.
    struct FourKeyKeyboard;

    impl Keyboard for FourKeyKeyboard {
        fn num_keys(&self) -> usize {
            4
        }
        fn most_common_key_width(&self) -> f32 {
            40.0
        }
        fn most_common_key_height(&self) -> f32 {
            40.0
        }
        fn key_code(&self, key: KeyId) -> Option<char> {
            ["c", "a", "t", " "].get(key as usize).and_then(|s| s.chars().next())
        }
        fn key_index(&self, code: char) -> KeyId {
            match code {
                'c' => 0,
                'a' => 1,
                't' => 2,
                ' ' => 3,
                _ => -1,
            }
        }
        fn nearest_key_code(&self, x: f32, _y: f32) -> char {
            let idx = (x / 40.0).round().clamp(0.0, 3.0) as usize;
            ["c", "a", "t", " "][idx].chars().next().unwrap()
        }
        fn key_to_key_distance(&self, a: KeyId, b: KeyId) -> f32 {
            if a == b {
                0.0
            } else {
                ((a - b).abs() as f32) * 40.0
            }
        }
        fn key_to_key_direction(&self, a: KeyId, b: KeyId) -> f32 {
            if b > a {
                0.0
            } else {
                std::f32::consts::PI
            }
        }
        fn point_to_key_distance(&self, x: f32, _y: f32, key: KeyId) -> f32 {
            (x - (key as f32) * 40.0).abs()
        }
        fn key_center(&self, key: KeyId) -> (f32, f32) {
            ((key as f32) * 40.0, 0.0)
        }
        fn key_width(&self, _key: KeyId) -> f32 {
            40.0
        }
        fn keys_for_code(&self, code: char) -> Vec<KeyId> {
            let k = self.key_index(code);
            if k < 0 {
                vec![]
            } else {
                vec![k]
            }
        }
        fn second_digraph_key(&self, _code: char, _aligned_key: KeyId) -> Option<KeyId> {
            None
        }
        fn is_space_key(&self, key: KeyId) -> bool {
            key == 3
        }
    }

    struct WordLexicon {
        children: HashMap<NodeRef, Vec<(u32, NodeRef)>>,
        terms: HashMap<NodeRef, f32>,
    }

    impl Lexicon for WordLexicon {
        fn root(&self) -> NodeRef {
            0
        }
        fn children(&self, node: NodeRef, out: &mut Vec<(u32, NodeRef)>) {
            if let Some(c) = self.children.get(&node) {
                out.extend_from_slice(c);
            }
        }
        fn key(&self, _node: NodeRef) -> String {
            String::new()
        }
        fn term_logp(&self, node: NodeRef) -> Option<f32> {
            self.terms.get(&node).copied()
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

    fn cat_lexicon() -> WordLexicon {
        let mut children = HashMap::new();
        children.insert(0u64, vec![('c' as u32, 1u64)]);
        children.insert(1u64, vec![('a' as u32, 2u64)]);
        children.insert(2u64, vec![('t' as u32, 3u64)]);
        let mut terms = HashMap::new();
        terms.insert(3u64, -1.0);
        WordLexicon { children, terms }
    }

    #[test]
    fn straight_line_swipe_reaches_a_terminal_token() {
        let keyboard = FourKeyKeyboard;
        let char_ops = AsciiCharOps;
        let lexicon = cat_lexicon();
        let lexicons: Vec<&dyn Lexicon> = vec![&lexicon];
        let params = DecoderParams::default();

        let mut touch = TouchSequence::new();
        for (idx, x) in [0.0f32, 0.0, 40.0, 40.0, 80.0, 80.0].iter().enumerate() {
            let action = if idx == 5 { crate::touch::TouchAction::Up } else { crate::touch::TouchAction::Move };
            touch.add_point(action, *x, 0.0, idx as i32 * 10, 1.0).unwrap();
        }
        touch.update_properties(&keyboard, &params);

        let mut pool = TokenPool::new(64);
        let mut space = SearchSpace::new();
        let root_handle = pool.acquire().unwrap();
        pool.get_mut(root_handle).init_as_root(root_nodes(&lexicons), &params);
        space.upsert(
            DecoderState {
                lexicon_id: 0,
                node_id: 0,
                word_history_id: -1,
                aligned_key: -1,
            },
            root_handle,
            &mut pool,
        );

        let env = Env {
            params: &params,
            keyboard: &keyboard,
            char_ops: &char_ops,
            lexicons: &lexicons,
        };
        let mut scratch = Vec::new();
        run(&env, &touch, &mut pool, &mut space, &mut scratch);

        let reached_terminal = space
            .handles()
            .any(|h| pool.get(h).is_terminal(&lexicons) && pool.get(h).index() == touch.len() as i16 - 1);
        assert!(reached_terminal, "a straight c-a-t swipe should reach the terminal token for \"cat\"");
    }
}
