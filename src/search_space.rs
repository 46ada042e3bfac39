//! Search Space (C5): a map from `DecoderState` to the unique best Token for
//! that state, plus the pruning policy that bounds memory independent of
//! stroke length.

use ahash::AHashMap;

use crate::keyboard::KeyId;
use crate::lexicon::{LexiconId, NodeRef};
use crate::token::{Handle, TokenPool};

/// The 4-tuple identifying a unique search position. Hash and equality both
/// cover all four fields — the original's hasher combined only three, which
/// looks like a latent bug; this crate follows the spec's stated invariant
/// instead (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DecoderState {
    pub lexicon_id: LexiconId,
    pub node_id: NodeRef,
    pub word_history_id: i32,
    pub aligned_key: KeyId,
}

/// Map from [`DecoderState`] to the single best [`Handle`] for that state.
pub struct SearchSpace {
    states: AHashMap<DecoderState, Handle>,
}

impl SearchSpace {
    pub fn new() -> Self {
        SearchSpace {
            states: AHashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn find(&self, state: &DecoderState) -> Option<Handle> {
        self.states.get(state).copied()
    }

    /// Inserts if absent. On collision, keeps whichever token has the higher
    /// `next_alignment.best` (or `cur_alignment.best` if `next` has not been
    /// touched yet), releasing the loser back to the pool. Returns the
    /// handle that ended up retained for `state`.
    pub fn upsert(&mut self, state: DecoderState, candidate: Handle, pool: &mut TokenPool) -> Handle {
        match self.states.get(&state).copied() {
            None => {
                self.states.insert(state, candidate);
                candidate
            }
            Some(existing) => {
                if existing == candidate {
                    return existing;
                }
                let candidate_score = collision_score(pool, candidate);
                let existing_score = collision_score(pool, existing);
                if candidate_score > existing_score {
                    pool.release(existing);
                    self.states.insert(state, candidate);
                    candidate
                } else {
                    pool.release(candidate);
                    existing
                }
            }
        }
    }

    /// Advances tokens whose `next_alignment` already reached `index - 1`,
    /// then drops (and releases to the pool) every token not aligned to
    /// `index - 1`.
    pub fn sweep_to_index(&mut self, index: i16, pool: &mut TokenPool) {
        let target = index - 1;
        let mut to_drop = Vec::new();
        for (&state, &handle) in self.states.iter() {
            let token = pool.get_mut(handle);
            if token.cur_alignment().index() < target && token.next_alignment().index() == target {
                token.advance_to_next_alignment();
            }
            if pool.get(handle).cur_alignment().index() != target {
                to_drop.push(state);
            }
        }
        for state in to_drop {
            if let Some(handle) = self.states.remove(&state) {
                pool.release(handle);
            }
        }
    }

    /// All handles currently tracked whose `total_score` meets the dynamic
    /// floor: the greater of `score_floor` and, if more than `k` tokens
    /// exist, the k-th largest total score.
    pub fn select_top_by_score(&self, k: usize, score_floor: f32, pool: &TokenPool) -> Vec<Handle> {
        let mut scored: Vec<(Handle, f32)> = self
            .states
            .values()
            .map(|&h| (h, pool.get(h).total_score()))
            .collect();

        let floor = if scored.len() > k && k > 0 {
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            score_floor.max(scored[k - 1].1)
        } else {
            score_floor
        };

        scored.into_iter().filter(|&(_, s)| s >= floor).map(|(h, _)| h).collect()
    }

    /// Drops the bottom `prune_ratio` (by order statistic) of tokens not in
    /// `top_set`, scoring each by `next_alignment.best` if touched else
    /// `cur_alignment.best`.
    pub fn prune_outside(&mut self, top_set: &[Handle], prune_ratio: f32, pool: &mut TokenPool) {
        let top: ahash::AHashSet<Handle> = top_set.iter().copied().collect();
        let mut candidates: Vec<(DecoderState, Handle, f32)> = self
            .states
            .iter()
            .filter(|(_, h)| !top.contains(h))
            .map(|(&s, &h)| (s, h, collision_score(pool, h)))
            .collect();

        if candidates.is_empty() {
            return;
        }

        candidates.sort_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal));
        let drop_count = ((candidates.len() as f32) * prune_ratio).floor() as usize;

        for (state, handle, _) in candidates.into_iter().take(drop_count) {
            self.states.remove(&state);
            pool.release(handle);
        }
    }

    /// All currently tracked handles, for diagnostics and end-of-input
    /// aggregation.
    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.states.values().copied()
    }

    /// Drops every tracked state without releasing to the pool — callers
    /// reset the pool itself first.
    pub fn clear(&mut self) {
        self.states.clear();
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

fn collision_score(pool: &TokenPool, handle: Handle) -> f32 {
    let token = pool.get(handle);
    if token.next_alignment().index() >= 0 {
        token.next_alignment().best_score()
    } else {
        token.cur_alignment().best_score()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(aligned_key: KeyId) -> DecoderState {
        DecoderState {
            lexicon_id: 0,
            node_id: 1,
            word_history_id: -1,
            aligned_key,
        }
    }

    #[test]
    fn at_most_one_token_per_state() {
        let mut pool = TokenPool::new(8);
        let mut space = SearchSpace::new();
        let h1 = pool.acquire().unwrap();
        pool.get_mut(h1).cur_alignment_mut().set_scores(-1.0, f32::NEG_INFINITY);
        let h2 = pool.acquire().unwrap();
        pool.get_mut(h2).cur_alignment_mut().set_scores(-5.0, f32::NEG_INFINITY);

        let s = state(3);
        let kept1 = space.upsert(s, h1, &mut pool);
        let kept2 = space.upsert(s, h2, &mut pool);
        assert_eq!(kept1, h1);
        assert_eq!(kept2, h1, "higher-scoring token already present should win");
        assert_eq!(space.len(), 1);
        assert_eq!(pool.free_count(), 7, "loser was released back to the pool");
    }

    #[test]
    fn sweep_drops_tokens_not_at_target_index() {
        let mut pool = TokenPool::new(4);
        let mut space = SearchSpace::new();
        let h = pool.acquire().unwrap();
        pool.get_mut(h).cur_alignment_mut().set_index(0);
        space.upsert(state(1), h, &mut pool);

        space.sweep_to_index(5, &mut pool);
        assert!(space.is_empty());
        assert_eq!(pool.free_count(), 4);
    }
}
