//! Interpolated Scorer (C3): linear interpolation of per-LM conditional
//! probabilities over a term sequence, and next-term prediction.

use std::collections::HashMap;

use crate::lexicon::Scorer;

struct WeightedScorer {
    scorer: Box<dyn Scorer>,
    weight: f32,
}

/// Combines an ordered list of `(scorer, weight)` pairs — weights are
/// normalized to sum to 1 at construction — into a single interpolated
/// scorer (§4.3).
pub struct InterpolatedScorer {
    scorers: Vec<WeightedScorer>,
}

impl InterpolatedScorer {
    pub fn new(scorers: Vec<(Box<dyn Scorer>, f32)>) -> Self {
        let total: f32 = scorers.iter().map(|(_, w)| *w).sum();
        let norm = if total > 0.0 { 1.0 / total } else { 0.0 };
        let scorers = scorers
            .into_iter()
            .map(|(scorer, weight)| WeightedScorer {
                scorer,
                weight: weight * norm,
            })
            .collect();
        InterpolatedScorer { scorers }
    }

    pub fn is_empty(&self) -> bool {
        self.scorers.is_empty()
    }

    /// `log(Σ w_i · exp(scorer_i.conditional_logp(terms)))`; `-inf` if every
    /// scorer returns `-inf`.
    pub fn conditional_logp(&self, terms: &[String]) -> f32 {
        weighted_log_sum_exp(self.scorers.iter().map(|ws| (ws.weight, ws.scorer.terms_conditional_logp(terms))))
    }

    /// Union of per-scorer predictions for the term following `terms`, each
    /// mixed into a true interpolated probability: predictions missing from
    /// some scorers are rescored on those scorers via `terms_conditional_logp`
    /// rather than left out of the weighted sum.
    pub fn predict_next(&self, terms: &[String], max: usize) -> Vec<(String, f32)> {
        let mut per_term: HashMap<String, Vec<Option<f32>>> = HashMap::new();
        for (idx, ws) in self.scorers.iter().enumerate() {
            for (term, logp) in ws.scorer.predict_next(terms, max) {
                per_term
                    .entry(term)
                    .or_insert_with(|| vec![None; self.scorers.len()])[idx] = Some(logp);
            }
        }

        let mut results: Vec<(String, f32)> = per_term
            .into_iter()
            .map(|(term, mut per_scorer)| {
                for (idx, ws) in self.scorers.iter().enumerate() {
                    if per_scorer[idx].is_none() {
                        let mut extended = terms.to_vec();
                        extended.push(term.clone());
                        per_scorer[idx] = Some(ws.scorer.terms_conditional_logp(&extended));
                    }
                }
                let interp = weighted_log_sum_exp(
                    self.scorers
                        .iter()
                        .zip(per_scorer.into_iter())
                        .map(|(ws, lp)| (ws.weight, lp.unwrap())),
                );
                (term, interp)
            })
            .collect();

        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(max);
        results
    }
}

fn weighted_log_sum_exp(terms: impl Iterator<Item = (f32, f32)>) -> f32 {
    let mut sum = 0.0f64;
    let mut any_finite = false;
    for (weight, logp) in terms {
        if logp.is_finite() {
            any_finite = true;
            sum += (weight as f64) * (logp as f64).exp();
        }
    }
    if !any_finite || sum <= 0.0 {
        f32::NEG_INFINITY
    } else {
        sum.ln() as f32
    }
}
