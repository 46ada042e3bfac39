//! Lexicon + Language Model external interfaces (§6.2).
//!
//! Storage format (LOUDS, quantized logprobs, memory-mapped files, ...) is
//! entirely out of scope (§1); these traits are the only contract the core
//! relies on.

/// Opaque 64-bit node identifier within a single lexicon's trie.
pub type NodeRef = u64;

/// Small integer identifying a lexicon within a session.
pub type LexiconId = i8;

/// A single prefix-trie-backed vocabulary.
///
/// `children` follows the original's append-to-output-vector convention so
/// callers can reuse a scratch buffer across calls instead of allocating per
/// node (see [`crate::codepoint`]).
pub trait Lexicon {
    fn root(&self) -> NodeRef;

    /// Appends this node's children (raw label byte-or-codepoint, NodeRef)
    /// pairs to `out`. If [`Lexicon::encodes_codepoints`] is false, labels
    /// are individual UTF-8 bytes that the caller must collapse into
    /// codepoints (§4.2).
    fn children(&self, node: NodeRef, out: &mut Vec<(u32, NodeRef)>);

    /// UTF-8 concatenation of labels from root to `node`.
    fn key(&self, node: NodeRef) -> String;

    /// `Some(logp)` iff `node` is a complete term.
    fn term_logp(&self, node: NodeRef) -> Option<f32>;

    /// `Some(logp)` if this node carries an explicit prefix logprob;
    /// `None` means the caller should inherit the nearest ancestor's value
    /// (a space-saving omission, not "no probability exists").
    fn prefix_logp(&self, node: NodeRef) -> Option<f32>;

    fn has_prefix_probabilities(&self) -> bool;

    /// If false, `children` emits raw UTF-8 bytes rather than codepoints.
    fn encodes_codepoints(&self) -> bool;

    fn is_end_of_term(&self, node: NodeRef) -> bool {
        self.term_logp(node).is_some()
    }
}

/// Reason a [`LanguageModel`] could not produce a [`Scorer`] for a given
/// context.
#[derive(Debug, Clone, PartialEq)]
pub struct Unsupported(pub String);

/// A language model capable of constructing context-bound scorers.
///
/// Per §4.3, a new `Scorer` is constructed once per `Decode` call from the
/// preceding/following text context and must not be reused across calls.
pub trait LanguageModel {
    fn new_scorer(
        &self,
        preceding: &[String],
        following: &[String],
    ) -> Result<Box<dyn Scorer>, Unsupported>;

    fn is_in_vocabulary(&self, term: &str) -> bool;
}

/// A context-bound scorer produced by a [`LanguageModel`]. Not thread-safe;
/// callers must not retain one across `Decode` invocations (§5).
pub trait Scorer {
    /// `log P(terms)`.
    fn terms_logp(&self, terms: &[String]) -> f32;
    /// `log P(last term | preceding terms)`.
    fn terms_conditional_logp(&self, terms: &[String]) -> f32;
    /// Up to `max` `(term, logp)` predictions for the term following `terms`.
    fn predict_next(&self, terms: &[String], max: usize) -> Vec<(String, f32)>;
}
