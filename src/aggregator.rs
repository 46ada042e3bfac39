//! Result Aggregator (C7): turns the final touch index's surviving tokens
//! into ranked, scored, deduplicated `DecoderResult`s.

use std::collections::{BinaryHeap, HashMap};

use crate::beam::Env;
use crate::codepoint::CodepointNode;
use crate::lexicon::NodeRef;
use crate::scorer::InterpolatedScorer;
use crate::search_space::SearchSpace;
use crate::token::TokenPool;
use crate::touch::TouchSequence;

/// A single ranked suggestion: `score = spatial_score + lm_score`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderResult {
    pub word: String,
    pub spatial_score: f32,
    pub lm_score: f32,
}

impl DecoderResult {
    pub fn score(&self) -> f32 {
        self.spatial_score + self.lm_score
    }
}

/// Extracts terminal tokens and prefix completions from the final touch
/// index, applies score adjustments, and returns a ranked, truncated,
/// uppercase-deduplicated result list (§4.7).
pub fn aggregate(
    env: &Env,
    touch: &TouchSequence,
    pool: &mut TokenPool,
    space: &SearchSpace,
    scorer: &InterpolatedScorer,
    scratch: &mut Vec<(u32, NodeRef)>,
) -> Vec<DecoderResult> {
    let last_index = touch.len() as i16 - 1;
    let handles: Vec<_> = space.handles().collect();

    let mut results: HashMap<String, DecoderResult> = HashMap::new();
    let mut prefix_beam: Vec<_> = Vec::new();

    for handle in handles {
        if pool.get(handle).cur_alignment().index() != last_index {
            continue;
        }

        let (is_terminal, has_prev_terms, align_score, prev_lm_score) = {
            let t = pool.get(handle);
            (
                t.is_terminal(env.lexicons),
                t.has_prev_terms(),
                t.align_score(),
                t.prev_lm_score(),
            )
        };

        if is_terminal && !has_prev_terms {
            let word = pool
                .get(handle)
                .nodes()
                .iter()
                .find(|n| n.term_logp(env.lexicons).is_some())
                .map(|n| n.key_string(env.lexicons));
            if let Some(word) = word {
                let lm = scorer.conditional_logp(&[word.clone()]) + prev_lm_score;
                if align_score.is_finite() && lm.is_finite() {
                    merge_result(&mut results, word, align_score, lm);
                }
            }
        }

        let has_children = !pool.get_mut(handle).children(env.lexicons, scratch).is_empty();
        if has_children && !has_prev_terms {
            prefix_beam.push(handle);
        }
    }

    prefix_beam.sort_by(|&a, &b| {
        pool.get(b)
            .total_score()
            .partial_cmp(&pool.get(a).total_score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    prefix_beam.truncate(env.params.prefix_beam_width().max(0) as usize);

    if !prefix_beam.is_empty() {
        let next_word_predictions = scorer.predict_next(&[], env.params.max_next_word_predictions().max(0) as usize);

        for &handle in &prefix_beam {
            let t = pool.get(handle);
            let prefix = match t.nodes().first() {
                Some(n) => n.key_string(env.lexicons),
                None => continue,
            };
            let align = t.align_score() + env.params.completion_score();

            let mut matched = 0usize;
            for (term, logp) in &next_word_predictions {
                if term.starts_with(&prefix) {
                    merge_result(&mut results, term.clone(), align, *logp);
                    matched += 1;
                }
            }

            if matched < env.params.min_completions().max(0) as usize {
                let completions = best_first_completions(
                    env,
                    t.nodes(),
                    env.params.completion_beam_size().max(0) as usize,
                    scratch,
                );
                for (term, term_logp) in completions {
                    let scored = scorer
                        .conditional_logp(&[term.clone()])
                        .max(term_logp)
                        + env.params.lexicon_unigram_backoff();
                    merge_result(&mut results, term, align, scored);
                }
            }
        }
    }

    for result in results.values_mut() {
        result.spatial_score += spatial_adjustment(
            result.spatial_score,
            env.params.precise_match_threshold(),
            env.params.max_imprecise_match_penalty(),
        );
    }

    suppress_uppercase_twins(&mut results, env.params.uppercase_suppression_score_threshold());

    let mut ranked: Vec<DecoderResult> = results.into_values().collect();
    ranked.sort_by(|a, b| b.score().partial_cmp(&a.score()).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(env.params.num_suggestions_to_return().max(0) as usize);
    ranked
}

fn merge_result(results: &mut HashMap<String, DecoderResult>, word: String, spatial_score: f32, lm_score: f32) {
    let candidate_score = spatial_score + lm_score;
    let should_replace = match results.get(&word) {
        Some(existing) => candidate_score > existing.score(),
        None => true,
    };
    if should_replace {
        results.insert(
            word.clone(),
            DecoderResult {
                word,
                spatial_score,
                lm_score,
            },
        );
    }
}

/// Linear penalty from `0` (at `spatial_score == 0`, a perfect alignment) to
/// `max_imprecise_match_penalty` (at or below `precise_match_threshold`).
fn spatial_adjustment(spatial_score: f32, precise_match_threshold: f32, max_imprecise_match_penalty: f32) -> f32 {
    if precise_match_threshold >= 0.0 {
        return 0.0;
    }
    let t = (spatial_score / precise_match_threshold).clamp(0.0, 1.0);
    t * max_imprecise_match_penalty
}

/// Removes uppercase variants whose score falls more than
/// `uppercase_suppression_score_threshold` below their lowercase twin's.
fn suppress_uppercase_twins(results: &mut HashMap<String, DecoderResult>, threshold: f32) {
    let to_remove: Vec<String> = results
        .iter()
        .filter_map(|(word, result)| {
            let lower = word.to_lowercase();
            if &lower == word {
                return None;
            }
            let twin = results.get(&lower)?;
            if (result.score() - twin.score()) < threshold {
                Some(word.clone())
            } else {
                None
            }
        })
        .collect();
    for word in to_remove {
        results.remove(&word);
    }
}

struct HeapItem {
    priority: f32,
    node: CodepointNode,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority.partial_cmp(&other.priority).unwrap_or(std::cmp::Ordering::Equal)
    }
}

/// Best-first expansion over `start_nodes`' descendants, ranked by
/// `prefix_logp`, visiting at most `beam_size` nodes and collecting every
/// complete term reached along the way.
fn best_first_completions(
    env: &Env,
    start_nodes: &[CodepointNode],
    beam_size: usize,
    scratch: &mut Vec<(u32, NodeRef)>,
) -> Vec<(String, f32)> {
    let mut heap: BinaryHeap<HeapItem> = start_nodes
        .iter()
        .map(|&node| HeapItem {
            priority: node.prefix_logp(),
            node,
        })
        .collect();

    let mut visited = 0usize;
    let mut out = Vec::new();
    while let Some(HeapItem { node, .. }) = heap.pop() {
        if visited >= beam_size {
            break;
        }
        visited += 1;

        if let Some(logp) = node.term_logp(env.lexicons) {
            out.push((node.key_string(env.lexicons), logp));
        }
        for child in node.children(env.lexicons, scratch) {
            heap.push(HeapItem {
                priority: child.prefix_logp(),
                node: child,
            });
        }
    }
    out
}
