//! Provides the literal joiner that runs after the trie rewrite.
//!
//! Escapes, comment groups and non-capturing groups leave behind chains of
//! small adjacent literals; so does trie prefix factoring. This pass merges
//! each chain into one payload, bounded by the configured byte ceiling, then
//! records the fold delta of every folded literal and downgrades folded
//! payloads with nothing left to fold.

use pattern_program::{Config, Inst, Op, Program};

use crate::unicode::{fold_delta, registry};

/// Merges adjacent same-mode literals and finalizes fold metadata.
pub(crate) fn join_literals(program: &mut Program, config: &Config, wide: bool) {
    let incoming = in_degrees(program);
    let adjacent = adjacency_entries(program);

    for idx in 0..program.len() {
        merge_chain(program, config, &incoming, &adjacent, idx);
    }

    for idx in 0..program.len() {
        if let Op::ExactFold {
            text,
            fold_delta: delta,
        } = &mut program[idx].op
        {
            *delta = fold_delta(text);
            if !text.chars().any(|c| registry().is_foldable_char(c, wide)) {
                let text = std::mem::take(text);
                program[idx].op = Op::Exact(text);
            }
        }
    }
}

/// Links into each instruction through `next` fields.
fn in_degrees(program: &Program) -> Vec<u32> {
    let mut incoming = vec![0u32; program.len() as usize];
    for idx in 0..program.len() {
        if let Some(target) = program.next_of(idx) {
            incoming[target as usize] += 1;
        }
    }
    incoming
}

/// Slots entered implicitly as the adjacent body of the preceding
/// instruction. Text there cannot move into a predecessor.
fn adjacency_entries(program: &Program) -> Vec<bool> {
    let mut adjacent = vec![false; program.len() as usize];
    for idx in 0..program.len() {
        let enters_body = matches!(
            program[idx].op,
            Op::Branch
                | Op::Star { .. }
                | Op::Plus { .. }
                | Op::Curly { .. }
                | Op::Atomic { .. }
                | Op::Look { .. }
                | Op::GroupCond { .. }
        );
        if enters_body {
            if let Some(slot) = adjacent.get_mut(idx as usize + 1) {
                *slot = true;
            }
        }
    }
    adjacent
}

/// Absorbs successors into the literal at `idx` until the chain breaks or
/// the ceiling is hit. On overflow the largest safe prefix of the successor
/// still moves over, and the chain stops there.
fn merge_chain(program: &mut Program, config: &Config, incoming: &[u32], adjacent: &[bool], idx: u32) {
    loop {
        let (head_len, fold) = match &program[idx].op {
            Op::Exact(text) => (text.len(), false),
            Op::ExactFold { text, .. } => (text.len(), true),
            _ => return,
        };
        let Some(next) = program.next_of(idx) else {
            return;
        };
        if incoming[next as usize] != 1 || adjacent[next as usize] {
            return;
        }
        let tail = match &program[next].op {
            Op::Exact(text) if !fold => text.clone(),
            Op::ExactFold { text, .. } if fold => text.clone(),
            _ => return,
        };

        if head_len + tail.len() <= config.exact_max_bytes {
            append_text(program, idx, &tail);
            match program.next_of(next) {
                Some(target) => program.set_next(idx, target),
                None => program.clear_next(idx),
            }
            program[next] = Inst::new(Op::Nothing);
        } else {
            let budget = config.exact_max_bytes.saturating_sub(head_len);
            let cut = safe_prefix(&tail, budget, fold);
            if cut > 0 {
                append_text(program, idx, &tail[..cut]);
                trim_front(program, next, cut);
            }
            return;
        }
    }
}

/// The largest byte length of a prefix of `text` within `budget` that does
/// not split a character or, under folding, a fold-expansion sequence.
fn safe_prefix(text: &str, budget: usize, fold: bool) -> usize {
    let sequences = if fold {
        registry().fold_sequences()
    } else {
        &[][..]
    };
    let mut at = 0;
    let mut rest = text;
    'scan: while !rest.is_empty() {
        for seq in sequences {
            if rest.starts_with(seq) {
                if at + seq.len() > budget {
                    return at;
                }
                at += seq.len();
                rest = &rest[seq.len()..];
                continue 'scan;
            }
        }
        let ch = rest.chars().next().expect("remainder is nonempty");
        if at + ch.len_utf8() > budget {
            return at;
        }
        at += ch.len_utf8();
        rest = &rest[ch.len_utf8()..];
    }
    at
}

fn append_text(program: &mut Program, idx: u32, tail: &str) {
    match &mut program[idx].op {
        Op::Exact(text) | Op::ExactFold { text, .. } => {
            let mut owned = std::mem::take(text).into_string();
            owned.push_str(tail);
            *text = owned.into_boxed_str();
        }
        _ => panic!("literal append on a non-literal instruction"),
    }
}

fn trim_front(program: &mut Program, idx: u32, cut: usize) {
    match &mut program[idx].op {
        Op::Exact(text) | Op::ExactFold { text, .. } => {
            *text = text[cut..].into();
        }
        _ => panic!("literal trim on a non-literal instruction"),
    }
}
