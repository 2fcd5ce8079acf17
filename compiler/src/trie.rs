//! Provides the literal-alternation trie rewrite.
//!
//! After emission, every branch chain whose adjacent arms are single literal
//! instructions with a common continuation is collapsed into one [Trie]
//! instruction backed by a side table. A common prefix shared by every word
//! is factored out into a plain literal ahead of the trie. Construction uses
//! a dense state-by-alphabet table while the alphabet stays small and an
//! index-linked adjacency list otherwise; both forms are then compacted into
//! the base-plus-offset arrays the instruction consumes at match time.

use std::collections::VecDeque;

use pattern_program::trie::{Trie, NO_STATE};
use pattern_program::{Config, Inst, Op, Program};

use crate::unicode::fold_delta;

/// Sentinel for the end of an edge list in the adjacency-list form.
const NO_EDGE: u32 = u32::MAX;

/// Rewrites every mergeable literal alternation in place, returning the trie
/// side table the rewritten instructions refer into.
pub(crate) fn optimize(program: &mut Program, config: &Config) -> Vec<Trie> {
    let mut tries = Vec::new();
    for head in chain_heads(program) {
        merge_chain(program, config, head, &mut tries);
    }
    tries
}

/// Heads of the branch chains eligible for merging: every `Branch` that is
/// neither chained from an earlier branch nor selecting a conditional's arm.
fn chain_heads(program: &Program) -> Vec<u32> {
    let mut excluded = vec![false; program.len() as usize];
    for idx in 0..program.len() {
        match program[idx].op {
            Op::Branch => {
                if let Some(target) = program.next_of(idx) {
                    excluded[target as usize] = true;
                }
            }
            // The adjacent instruction is the conditional's then-arm branch;
            // its chain answers to the group test, not to alternation.
            Op::GroupCond { .. } => {
                if let Some(slot) = excluded.get_mut(idx as usize + 1) {
                    *slot = true;
                }
            }
            _ => {}
        }
    }
    (0..program.len())
        .filter(|&idx| matches!(program[idx].op, Op::Branch) && !excluded[idx as usize])
        .collect()
}

/// One alternation arm: its branch instruction and the body start adjacent
/// to it.
#[derive(Debug, Clone, Copy)]
struct Arm {
    branch: u32,
    body: u32,
}

fn chain_arms(program: &Program, head: u32) -> Vec<Arm> {
    let mut arms = Vec::new();
    let mut branch = Some(head);
    while let Some(b) = branch {
        arms.push(Arm {
            branch: b,
            body: b + 1,
        });
        branch = program.next_of(b);
    }
    arms
}

/// The literal payload and fold mode of an arm whose body is exactly one
/// literal instruction, or `None` when the arm cannot join a run.
fn arm_literal(program: &Program, arms: &[Arm], index: usize) -> Option<(Box<str>, bool)> {
    let arm = arms[index];
    // An inner arm must occupy exactly the two slots up to the next branch.
    // The closing arm is bounded by its continuation link instead.
    if let Some(next) = arms.get(index + 1) {
        if next.branch != arm.branch + 2 {
            return None;
        }
    }
    match &program[arm.body].op {
        Op::Exact(text) => Some((text.clone(), false)),
        Op::ExactFold { text, .. } => Some((text.clone(), true)),
        _ => None,
    }
}

fn merge_chain(program: &mut Program, config: &Config, head: u32, tries: &mut Vec<Trie>) {
    let arms = chain_arms(program, head);

    // Maximal stretches of two or more adjacent literal arms agreeing on
    // fold mode and continuation.
    let mut runs = Vec::new();
    let mut start = 0;
    while start < arms.len() {
        let Some((_, fold)) = arm_literal(program, &arms, start) else {
            start += 1;
            continue;
        };
        let continuation = program.next_of(arms[start].body);
        let mut end = start;
        while end + 1 < arms.len() {
            match arm_literal(program, &arms, end + 1) {
                Some((_, f))
                    if f == fold && program.next_of(arms[end + 1].body) == continuation =>
                {
                    end += 1;
                }
                _ => break,
            }
        }
        if end > start {
            runs.push((start, end));
        }
        start = end + 1;
    }

    for &(lo, hi) in &runs {
        let mut words = Vec::with_capacity(hi - lo + 1);
        let mut fold = false;
        for index in lo..=hi {
            let (text, f) = arm_literal(program, &arms, index).expect("run arms stay literal");
            words.push(text);
            fold = f;
        }
        let prefix = common_prefix(&words);
        let id = tries.len() as u32;
        tries.push(build_trie(&words, prefix.chars().count(), fold, config));
        rewrite_run(program, &arms, lo, hi, prefix, id, fold);
    }
}

/// The longest common prefix of the words, held back so every word keeps at
/// least one character inside the trie.
fn common_prefix(words: &[Box<str>]) -> String {
    let mut prefix: Vec<char> = words[0].chars().collect();
    for word in &words[1..] {
        let shared = word
            .chars()
            .zip(prefix.iter())
            .take_while(|&(c, &p)| c == p)
            .count();
        prefix.truncate(shared);
    }
    let shortest = words
        .iter()
        .map(|word| word.chars().count())
        .min()
        .unwrap_or(0);
    prefix.truncate(shortest.saturating_sub(1));
    prefix.into_iter().collect()
}

/// Mutable transition storage used while the trie is under construction.
enum Transitions {
    /// A `states x alphabet` table; zero marks a missing transition, which
    /// is unambiguous because the root is never a target.
    Dense { table: Vec<u32>, width: usize },
    /// Per-state edge lists linked by index into one shared pool.
    Sparse {
        first: Vec<u32>,
        edges: Vec<SparseEdge>,
    },
}

struct SparseEdge {
    id: u16,
    to: u32,
    next: u32,
}

impl Transitions {
    fn new(width: usize, dense: bool) -> Self {
        if dense {
            Transitions::Dense {
                table: vec![0; width],
                width,
            }
        } else {
            Transitions::Sparse {
                first: vec![NO_EDGE],
                edges: Vec::new(),
            }
        }
    }

    fn add_state(&mut self) -> u32 {
        match self {
            Transitions::Dense { table, width } => {
                let state = (table.len() / *width) as u32;
                table.resize(table.len() + *width, 0);
                state
            }
            Transitions::Sparse { first, .. } => {
                let state = first.len() as u32;
                first.push(NO_EDGE);
                state
            }
        }
    }

    fn get(&self, state: u32, id: u16) -> Option<u32> {
        match self {
            Transitions::Dense { table, width } => {
                let to = table[state as usize * *width + id as usize];
                (to != 0).then_some(to)
            }
            Transitions::Sparse { first, edges } => {
                let mut edge = first[state as usize];
                while edge != NO_EDGE {
                    let e = &edges[edge as usize];
                    if e.id == id {
                        return Some(e.to);
                    }
                    edge = e.next;
                }
                None
            }
        }
    }

    fn set(&mut self, state: u32, id: u16, to: u32) {
        match self {
            Transitions::Dense { table, width } => {
                table[state as usize * *width + id as usize] = to;
            }
            Transitions::Sparse { first, edges } => {
                let head = first[state as usize];
                edges.push(SparseEdge { id, to, next: head });
                first[state as usize] = (edges.len() - 1) as u32;
            }
        }
    }

    /// The outgoing transitions of `state`, sorted by character id.
    fn outgoing(&self, state: u32) -> Vec<(u16, u32)> {
        let mut out = match self {
            Transitions::Dense { table, width } => (0..*width)
                .filter_map(|id| {
                    let to = table[state as usize * *width + id];
                    (to != 0).then_some((id as u16, to))
                })
                .collect::<Vec<_>>(),
            Transitions::Sparse { first, edges } => {
                let mut out = Vec::new();
                let mut edge = first[state as usize];
                while edge != NO_EDGE {
                    let e = &edges[edge as usize];
                    out.push((e.id, e.to));
                    edge = e.next;
                }
                out
            }
        };
        out.sort_by_key(|&(id, _)| id);
        out
    }
}

/// Builds the side table for one run. `skip` counts the prefix characters
/// already factored out of every word.
fn build_trie(words: &[Box<str>], skip: usize, fold: bool, config: &Config) -> Trie {
    // Catalogue the alphabet first so the construction strategy can be
    // picked up front. Ids are dense, in first-seen order.
    let mut chars: Vec<char> = Vec::new();
    for word in words {
        for c in word.chars().skip(skip) {
            if !chars.contains(&c) {
                chars.push(c);
            }
        }
    }

    let width = chars.len();
    let mut transitions = Transitions::new(width, width <= config.trie_dense_alphabet_max);

    let mut word_at_state = vec![0u32];
    let mut word_prev = vec![0u32];
    let mut word_len = vec![0u32];

    for (offset, word) in words.iter().enumerate() {
        let id = offset as u32 + 1;
        let mut state = 0u32;
        let mut len = 0u32;
        for c in word.chars().skip(skip) {
            let char_id = chars
                .iter()
                .position(|&known| known == c)
                .expect("characters were catalogued up front") as u16;
            state = match transitions.get(state, char_id) {
                Some(next) => next,
                None => {
                    let next = transitions.add_state();
                    word_at_state.push(0);
                    transitions.set(state, char_id, next);
                    next
                }
            };
            len += 1;
        }
        if fold {
            let tail_at = word
                .char_indices()
                .nth(skip)
                .map(|(at, _)| at)
                .unwrap_or(word.len());
            len -= fold_delta(&word[tail_at..]);
        }
        word_prev.push(word_at_state[state as usize]);
        word_len.push(len);
        word_at_state[state as usize] = id;
    }

    compact(chars, &transitions, word_at_state, word_prev, word_len, fold)
}

/// Flattens the construction form into the base-plus-offset arrays via
/// first-fit slot probing, reusing holes left by earlier states.
fn compact(
    chars: Vec<char>,
    transitions: &Transitions,
    word_at_state: Vec<u32>,
    word_prev: Vec<u32>,
    word_len: Vec<u32>,
    fold: bool,
) -> Trie {
    let states = word_at_state.len();
    let mut base = vec![0u32; states];
    let mut targets: Vec<u32> = Vec::new();
    let mut check: Vec<u32> = Vec::new();

    for state in 0..states as u32 {
        let out = transitions.outgoing(state);
        let Some(&(top_id, _)) = out.last() else {
            // Leaves keep base zero; no slot carries their check mark, so
            // every lookup through them misses.
            continue;
        };
        let mut b = 0u32;
        loop {
            let fits = out.iter().all(|&(id, _)| {
                let slot = b as usize + id as usize;
                slot >= check.len() || check[slot] == NO_STATE
            });
            if fits {
                break;
            }
            b += 1;
        }
        let top = b as usize + top_id as usize;
        if top >= check.len() {
            targets.resize(top + 1, 0);
            check.resize(top + 1, NO_STATE);
        }
        for &(id, to) in &out {
            let slot = b as usize + id as usize;
            targets[slot] = to;
            check[slot] = state;
        }
        base[state as usize] = b;
    }

    // Sort the alphabet for binary search, carrying the construction ids.
    let mut pairs: Vec<(char, u16)> = chars
        .into_iter()
        .enumerate()
        .map(|(id, c)| (c, id as u16))
        .collect();
    pairs.sort_by_key(|&(c, _)| c);
    let (alphabet, ids) = pairs.into_iter().unzip();

    Trie {
        alphabet,
        ids,
        base,
        targets,
        check,
        word_at_state,
        word_prev,
        word_len,
        fail: Vec::new(),
        fold,
    }
}

/// Replaces the covered arms with the factored prefix (when present) and the
/// trie instruction, padding the rest of the region with `Nothing`. When the
/// run does not cover the whole chain its branch survives, re-spliced past
/// the merged arms.
fn rewrite_run(
    program: &mut Program,
    arms: &[Arm],
    lo: usize,
    hi: usize,
    prefix: String,
    id: u32,
    fold: bool,
) {
    let start = arms[lo].branch;
    let end = match arms.get(hi + 1) {
        Some(arm) => arm.branch,
        None => arms[hi].body + 1,
    };
    let continuation = program.next_of(arms[lo].body);
    let whole = lo == 0 && hi + 1 == arms.len();

    for idx in start..end {
        program[idx] = Inst::new(Op::Nothing);
    }

    let mut slot = start;
    if !whole {
        program[slot] = Inst::new(Op::Branch);
        if let Some(next_arm) = arms.get(hi + 1) {
            program.set_next(slot, next_arm.branch);
        }
        slot += 1;
    }
    if !prefix.is_empty() {
        let text = prefix.into_boxed_str();
        let op = if fold {
            Op::ExactFold {
                text,
                fold_delta: 0,
            }
        } else {
            Op::Exact(text)
        };
        program[slot] = Inst::new(op);
        program.set_next(slot, slot + 1);
        slot += 1;
    }
    program[slot] = Inst::new(Op::Trie(id));
    if let Some(target) = continuation {
        program.set_next(slot, target);
    }
}

/// Builds the per-state failure links that let the trie run as a scanner.
/// Breadth-first order guarantees every shorter suffix is resolved before
/// the states that fall back to it.
pub(crate) fn build_fail_table(trie: &mut Trie) {
    let states = trie.state_count();
    let mut fail = vec![0u32; states];
    let mut queue = VecDeque::new();

    // Depth-one states fail to the root.
    for slot in 0..trie.check.len() {
        if trie.check[slot] == 0 {
            queue.push_back(trie.targets[slot]);
        }
    }

    while let Some(state) = queue.pop_front() {
        for id in 0..trie.alphabet.len() as u16 {
            let Some(to) = trie.transition(state, id) else {
                continue;
            };
            let mut probe = fail[state as usize];
            let link = loop {
                match trie.transition(probe, id) {
                    Some(next) => break next,
                    None if probe == 0 => break 0,
                    None => probe = fail[probe as usize],
                }
            };
            fail[to as usize] = link;
            queue.push_back(to);
        }
    }

    trie.fail = fail;
}
