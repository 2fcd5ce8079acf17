//! Provides the compacted literal-alternation trie attached to compiled
//! patterns.
//!
//! The compiler builds a trie whenever a run of two or more literal
//! alternation branches can be merged, then flattens it into the sparse
//! base-plus-offset form held here: every state owns a `base`, and the slot
//! for a transition is `base + char id`, with a parallel `check` vector
//! recording which state a slot belongs to. States with few transitions can
//! therefore overlap in storage. An optional failure-link table turns the
//! trie into a scanner that never re-reads input, in the manner of the
//! Aho-Corasick automaton.

use std::fmt;

/// Slot-owner sentinel for unused transition slots.
pub const NO_STATE: u32 = u32::MAX;

/// Represents a compacted trie over a dense local alphabet.
///
/// Word ids are 1-based and assigned in branch order, so a smaller id is an
/// earlier, higher-priority alternative. Duplicate words share a terminal
/// state and chain through [`Trie::word_prev`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trie {
    /// The distinct characters used by any word, sorted for lookup.
    pub alphabet: Vec<char>,
    /// Dense local id of each `alphabet` entry (ids were assigned in
    /// first-seen order during construction, so they are not sorted).
    pub ids: Vec<u16>,
    /// Per-state slot base into `targets`/`check`.
    pub base: Vec<u32>,
    /// Slot -> destination state.
    pub targets: Vec<u32>,
    /// Slot -> owning state, or [`NO_STATE`] for a free slot.
    pub check: Vec<u32>,
    /// Per-state terminal word id, 0 when the state ends no word. When
    /// duplicates exist this holds the most recently added word.
    pub word_at_state: Vec<u32>,
    /// Per-word link to the previously added identical word (0 = none).
    /// Index 0 is unused.
    pub word_prev: Vec<u32>,
    /// Per-word minimum length in input characters. For folded tries this
    /// can run below the stored character count, since a fold expansion
    /// may be produced by a single source character. Index 0 is unused.
    pub word_len: Vec<u32>,
    /// Per-state failure links; empty unless the trie was promoted to a
    /// start-class scanner.
    pub fail: Vec<u32>,
    /// Whether the words were stored case-folded. A consumer must fold
    /// input the same way before lookup.
    pub fold: bool,
}

impl Trie {
    /// The number of states, including the root (state 0).
    pub fn state_count(&self) -> usize {
        self.base.len()
    }

    /// The number of words the trie accepts.
    pub fn word_count(&self) -> usize {
        self.word_len.len().saturating_sub(1)
    }

    /// The dense id for `ch`, when `ch` occurs in any word.
    pub fn char_id(&self, ch: char) -> Option<u16> {
        self.alphabet
            .binary_search(&ch)
            .ok()
            .map(|pos| self.ids[pos])
    }

    /// Follows the transition out of `state` on the given id.
    pub fn transition(&self, state: u32, id: u16) -> Option<u32> {
        let slot = self.base[state as usize] as usize + id as usize;
        if slot < self.check.len() && self.check[slot] == state {
            Some(self.targets[slot])
        } else {
            None
        }
    }

    /// The highest-priority (earliest-added) word ending at `state`.
    pub fn word_at(&self, state: u32) -> Option<u32> {
        let mut word = self.word_at_state[state as usize];
        if word == 0 {
            return None;
        }
        while self.word_prev[word as usize] != 0 {
            word = self.word_prev[word as usize];
        }
        Some(word)
    }

    /// Whether failure links have been built.
    pub fn has_fail_table(&self) -> bool {
        !self.fail.is_empty()
    }

    /// Exact-word membership: the word id when `word` is one of the
    /// accepted literals, in the folded form the trie was built with.
    pub fn matches(&self, word: &str) -> Option<u32> {
        let mut state = 0u32;
        for ch in word.chars() {
            let id = self.char_id(ch)?;
            state = self.transition(state, id)?;
        }
        self.word_at(state)
    }

    /// Scans `haystack` for the earliest-ending occurrence of any word,
    /// returning the exclusive end byte offset and the word id. Requires
    /// failure links.
    ///
    /// When [`Trie::fold`] is set the haystack must already be folded the
    /// same way the words were.
    pub fn scan(&self, haystack: &str) -> Option<(usize, u32)> {
        assert!(
            self.has_fail_table(),
            "trie scan requires a failure-link table"
        );

        let mut state = 0u32;
        for (pos, ch) in haystack.char_indices() {
            let id = self.char_id(ch);
            loop {
                match id.and_then(|id| self.transition(state, id)) {
                    Some(next) => {
                        state = next;
                        break;
                    }
                    None if state == 0 => break,
                    None => state = self.fail[state as usize],
                }
            }
            // Words may end on a proper suffix of the current path, so the
            // failure chain has to be consulted for outputs as well.
            let mut probe = state;
            loop {
                if let Some(word) = self.word_at(probe) {
                    return Some((pos + ch.len_utf8(), word));
                }
                if probe == 0 {
                    break;
                }
                probe = self.fail[probe as usize];
            }
        }
        None
    }
}

impl fmt::Display for Trie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "trie: {} states, {} words, alphabet {}{}",
            self.state_count(),
            self.word_count(),
            self.alphabet.len(),
            if self.has_fail_table() {
                ", scanner"
            } else {
                ""
            }
        )
    }
}
