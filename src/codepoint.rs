//! Codepoint Trie View (C2): presents one or more lexicons as a single
//! codepoint-labeled trie, collapsing UTF-8 byte children into whole
//! codepoints and inheriting `prefix_logp` from ancestors where absent.

use unicode_normalization::UnicodeNormalization;

use crate::lexicon::{Lexicon, LexiconId, NodeRef};

fn normalize_nfc(s: &str) -> String {
    s.nfc().collect()
}

/// A position in the logical trie, labelled by a Unicode scalar rather than
/// a lexicon-specific byte or node id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CodepointNode {
    lexicon_id: LexiconId,
    node: NodeRef,
    codepoint: char,
    prefix_logp: f32,
}

impl CodepointNode {
    pub fn lexicon_id(&self) -> LexiconId {
        self.lexicon_id
    }

    pub fn node_id(&self) -> NodeRef {
        self.node
    }

    pub fn codepoint(&self) -> char {
        self.codepoint
    }

    pub fn prefix_logp(&self) -> f32 {
        self.prefix_logp
    }

    pub fn term_logp(&self, lexicons: &[&dyn Lexicon]) -> Option<f32> {
        lexicons[self.lexicon_id as usize].term_logp(self.node)
    }

    pub fn is_end_of_term(&self, lexicons: &[&dyn Lexicon]) -> bool {
        lexicons[self.lexicon_id as usize].is_end_of_term(self.node)
    }

    /// The UTF-8 key from root to this node, normalized to NFC — a
    /// byte-oriented lexicon's codepoints (§4.2) can compose into a
    /// denormalized sequence that the caller should never observe.
    pub fn key_string(&self, lexicons: &[&dyn Lexicon]) -> String {
        normalize_nfc(&lexicons[self.lexicon_id as usize].key(self.node))
    }

    /// Enumerates this node's codepoint-labelled children, expanding UTF-8
    /// byte children internally if the backing lexicon requires it. `scratch`
    /// is a session-owned reusable buffer (replaces the source's thread-local
    /// cache — see design notes).
    pub fn children(
        &self,
        lexicons: &[&dyn Lexicon],
        scratch: &mut Vec<(u32, NodeRef)>,
    ) -> Vec<CodepointNode> {
        let lexicon = lexicons[self.lexicon_id as usize];
        let raw = collect_codepoint_children(lexicon, self.node, scratch);
        raw.into_iter()
            .filter_map(|(cp_value, child_node)| {
                let codepoint = char::from_u32(cp_value)?;
                let prefix_logp = if lexicon.has_prefix_probabilities() {
                    lexicon.prefix_logp(child_node).unwrap_or(self.prefix_logp)
                } else {
                    self.prefix_logp
                };
                Some(CodepointNode {
                    lexicon_id: self.lexicon_id,
                    node: child_node,
                    codepoint,
                    prefix_logp,
                })
            })
            .collect()
    }
}

/// One codepoint-less root `CodepointNode` per lexicon.
pub fn root_nodes(lexicons: &[&dyn Lexicon]) -> Vec<CodepointNode> {
    lexicons
        .iter()
        .enumerate()
        .map(|(i, lex)| CodepointNode {
            lexicon_id: i as LexiconId,
            node: lex.root(),
            codepoint: '\u{0}',
            prefix_logp: 0.0,
        })
        .collect()
}

/// Returns this node's children as `(codepoint value, NodeRef)` pairs,
/// expanding UTF-8 byte children byte-by-byte when the lexicon does not
/// natively encode codepoints.
fn collect_codepoint_children(
    lexicon: &dyn Lexicon,
    node: NodeRef,
    scratch: &mut Vec<(u32, NodeRef)>,
) -> Vec<(u32, NodeRef)> {
    scratch.clear();
    lexicon.children(node, scratch);

    if lexicon.encodes_codepoints() {
        return scratch.clone();
    }

    let mut out = Vec::new();
    for &(byte, child_node) in scratch.iter() {
        if let Some((value, remaining)) = utf8_lead(byte as u8) {
            if remaining == 0 {
                out.push((value, child_node));
            } else {
                expand_utf8_continuations(lexicon, child_node, value, remaining, &mut out);
            }
        }
        // A byte in 0x80..=0xbf as a *leading* byte is invalid and never
        // surfaces as an independent child.
    }
    out
}

fn expand_utf8_continuations(
    lexicon: &dyn Lexicon,
    node: NodeRef,
    value: u32,
    remaining: u8,
    out: &mut Vec<(u32, NodeRef)>,
) {
    let mut buf = Vec::new();
    lexicon.children(node, &mut buf);
    for &(byte, child_node) in buf.iter() {
        let new_value = (value << 6) | (byte as u8 & 0x3f) as u32;
        if remaining == 1 {
            out.push((new_value, child_node));
        } else {
            expand_utf8_continuations(lexicon, child_node, new_value, remaining - 1, out);
        }
    }
}

/// Leading-byte classification: `(initial codepoint bits, continuation bytes
/// remaining)`, or `None` for an invalid leading byte.
fn utf8_lead(b: u8) -> Option<(u32, u8)> {
    match b {
        0x00..=0x7f => Some((b as u32, 0)),
        0xc0..=0xdf => Some(((b & 0x1f) as u32, 1)),
        0xe0..=0xef => Some(((b & 0x0f) as u32, 2)),
        0xf0..=0xf7 => Some(((b & 0x07) as u32, 3)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Minimal in-memory lexicon over raw UTF-8 bytes, used only to exercise
    /// the byte-collapsing state machine.
    struct ByteLexicon {
        children: HashMap<NodeRef, Vec<(u32, NodeRef)>>,
        terms: HashMap<NodeRef, f32>,
    }

    impl Lexicon for ByteLexicon {
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
            false
        }
    }

    #[test]
    fn collapses_two_byte_utf8_sequence() {
        // 'é' = U+00E9 = 0xC3 0xA9
        let mut children = HashMap::new();
        children.insert(0u64, vec![(0xC3, 1u64)]);
        children.insert(1u64, vec![(0xA9, 2u64)]);
        let lex = ByteLexicon {
            children,
            terms: HashMap::new(),
        };
        let lexicons: Vec<&dyn Lexicon> = vec![&lex];
        let roots = root_nodes(&lexicons);
        let mut scratch = Vec::new();
        let kids = roots[0].children(&lexicons, &mut scratch);
        assert_eq!(kids.len(), 1);
        assert_eq!(kids[0].codepoint(), 'é');
        assert_eq!(kids[0].node_id(), 2);
    }

    #[test]
    fn invalid_leading_byte_yields_no_child() {
        let mut children = HashMap::new();
        children.insert(0u64, vec![(0x80, 1u64)]);
        let lex = ByteLexicon {
            children,
            terms: HashMap::new(),
        };
        let lexicons: Vec<&dyn Lexicon> = vec![&lex];
        let roots = root_nodes(&lexicons);
        let mut scratch = Vec::new();
        let kids = roots[0].children(&lexicons, &mut scratch);
        assert!(kids.is_empty());
    }
}
