//! Provides the study pass that derives match-time hints.
//!
//! One recursive walk over the finished program computes the minimum match
//! length, the longest required substrings at fixed and floating offsets,
//! and the synthetic start class a matcher can use to reject positions in
//! constant time. Two opportunistic rewrites ride along: a leading
//! any-character star raises the implicit anchor, and an alternation whose
//! arms are all empty collapses to a no-op.

use std::sync::Arc;

use pattern_program::interval::InversionList;
use pattern_program::trie::Trie;
use pattern_program::{
    ClassSet, Inst, LookKind, Op, Program, StartClass, Substring, UNBOUNDED,
};

use crate::unicode::registry;

/// Everything the walk derives for the compiled pattern.
#[derive(Debug)]
pub(crate) struct Study {
    pub(crate) min_len: u32,
    pub(crate) anchored_substring: Option<Substring>,
    pub(crate) floating_substring: Option<Substring>,
    pub(crate) start_class: StartClass,
    pub(crate) implicit_anchor: bool,
    /// A trie that would serve as the start-class scanner once its failure
    /// links exist. The driver may grant this and study again.
    pub(crate) wants_scanner: Option<u32>,
}

pub(crate) fn study(program: &mut Program, sets: &[ClassSet], tries: &[Trie]) -> Study {
    let mut walker = Walker {
        program,
        sets,
        tries,
        anchored: None,
        floating: None,
        constraints: Vec::new(),
        anchored_start: false,
        implicit_anchor: false,
        scanner: None,
        wants: None,
    };
    let facts = walker.walk(0, Limit::Top, true);
    walker.finish(facts)
}

/// Where a region walk stops.
enum Limit {
    /// The outermost chain; ends when the links run out.
    Top,
    /// A bounded arm; ends when a link leaves the index range.
    Index(u32),
    /// The closing arm of an alternation; ends on a link to the join
    /// point, or on a dangling tail when the join is a region end.
    Join(Option<u32>),
    /// A lookaround or atomic body; ends on its closing marker.
    Marker,
}

/// What a region walk learned: consumed-length bounds, the possible first
/// characters, and whether anything later can still come first.
struct Facts {
    min: u32,
    max: u32,
    first: InversionList,
    open: bool,
    usable: bool,
    /// The out-of-region link that ended an `Index`-bounded walk.
    exit: Option<u32>,
}

/// A literal run still growing toward a substring candidate.
struct Accum {
    text: String,
    min_offset: u32,
    max_offset: u32,
}

struct Walker<'a> {
    program: &'a mut Program,
    sets: &'a [ClassSet],
    tries: &'a [Trie],
    anchored: Option<Substring>,
    floating: Option<Substring>,
    /// First-character sets required by leading positive lookaheads,
    /// intersected into the start class at the end.
    constraints: Vec<InversionList>,
    anchored_start: bool,
    implicit_anchor: bool,
    scanner: Option<u32>,
    wants: Option<u32>,
}

impl Walker<'_> {
    fn walk(&mut self, start: u32, limit: Limit, top: bool) -> Facts {
        let mut facts = Facts {
            min: 0,
            max: 0,
            first: InversionList::new(),
            open: true,
            usable: true,
            exit: None,
        };
        let mut accum: Option<Accum> = None;
        let mut at_start = top;
        let mut idx = start;

        loop {
            if matches!(limit, Limit::Marker)
                && matches!(self.program[idx].op, Op::LookEnd | Op::AtomicEnd)
            {
                break;
            }

            let next = match self.program[idx].op.clone() {
                Op::End | Op::LookEnd | Op::AtomicEnd => None,
                Op::Nothing | Op::Open(_) | Op::Close(_) => self.program.next_of(idx),
                Op::BeginText | Op::BeginLine => {
                    if top && at_start {
                        self.anchored_start = true;
                    }
                    self.program.next_of(idx)
                }
                Op::EndText | Op::EndTextNewline | Op::EndLine => {
                    self.commit(&mut accum, true);
                    self.program.next_of(idx)
                }
                Op::WordBoundary | Op::NotWordBoundary | Op::RestartPos => {
                    self.commit(&mut accum, false);
                    self.program.next_of(idx)
                }
                Op::Any => {
                    self.commit(&mut accum, false);
                    absorb(&mut facts, Some(any_but_newline()), false);
                    advance(&mut facts, 1, 1);
                    at_start = false;
                    self.program.next_of(idx)
                }
                Op::AnyNewline => {
                    self.commit(&mut accum, false);
                    absorb(&mut facts, Some(InversionList::full()), false);
                    advance(&mut facts, 1, 1);
                    at_start = false;
                    self.program.next_of(idx)
                }
                Op::Exact(text) => {
                    let chars = text.chars().count() as u32;
                    if top {
                        let run = accum.get_or_insert_with(|| Accum {
                            text: String::new(),
                            min_offset: facts.min,
                            max_offset: facts.max,
                        });
                        run.text.push_str(&text);
                    }
                    let head = text.chars().next().expect("literal payloads are nonempty");
                    absorb(&mut facts, Some(single(head)), false);
                    advance(&mut facts, chars, chars);
                    at_start = false;
                    self.program.next_of(idx)
                }
                Op::ExactFold { text, fold_delta } => {
                    // Folded payloads are not literal-search material; they
                    // only contribute length and first characters.
                    self.commit(&mut accum, false);
                    let chars = text.chars().count() as u32;
                    let head = text.chars().next().expect("literal payloads are nonempty");
                    absorb(&mut facts, Some(orbit_of(head)), false);
                    advance(&mut facts, chars - fold_delta, chars);
                    at_start = false;
                    self.program.next_of(idx)
                }
                Op::Class(id) => {
                    self.commit(&mut accum, false);
                    let set = &self.sets[id as usize];
                    let contribution = if !set.deferred.is_empty() {
                        None
                    } else if set.negated {
                        let mut list = (*set.list).clone();
                        list.invert();
                        Some(list)
                    } else {
                        Some((*set.list).clone())
                    };
                    absorb(&mut facts, contribution, false);
                    advance(&mut facts, 1, 1);
                    at_start = false;
                    self.program.next_of(idx)
                }
                Op::Backref { .. } | Op::Gosub(_) => {
                    // Length and content are unknowable here; an unset group
                    // can also make either match empty.
                    self.commit(&mut accum, false);
                    absorb(&mut facts, None, true);
                    advance(&mut facts, 0, UNBOUNDED);
                    at_start = false;
                    self.program.next_of(idx)
                }
                Op::Trie(id) => {
                    self.commit(&mut accum, false);
                    let trie = &self.tries[id as usize];
                    if top && at_start && facts.open && facts.usable && facts.first.is_empty() {
                        if trie.has_fail_table() {
                            self.scanner = Some(id);
                        } else {
                            self.wants = Some(id);
                        }
                    }
                    let (min, max) = trie_lengths(trie);
                    absorb(&mut facts, Some(trie_first_set(trie)), false);
                    advance(&mut facts, min, max);
                    at_start = false;
                    self.program.next_of(idx)
                }
                Op::Branch => {
                    let mut branches = vec![idx];
                    while let Some(b) = self.program.next_of(branches[branches.len() - 1]) {
                        branches.push(b);
                    }
                    if self.collapse_if_empty(&branches) {
                        self.program.next_of(idx)
                    } else {
                        self.commit(&mut accum, false);
                        let mut join = None;
                        let mut arms = Vec::with_capacity(branches.len());
                        for (i, &b) in branches.iter().enumerate() {
                            let arm = match branches.get(i + 1) {
                                Some(&bound) => self.walk(b + 1, Limit::Index(bound), false),
                                None => self.walk(b + 1, Limit::Join(join), false),
                            };
                            if join.is_none() {
                                join = arm.exit;
                            }
                            arms.push(arm);
                        }
                        let min = arms.iter().map(|a| a.min).min().unwrap_or(0);
                        let max = arms.iter().map(|a| a.max).max().unwrap_or(0);
                        let can_empty = arms.iter().any(|a| a.min == 0);
                        let set = if arms.iter().all(|a| a.usable) {
                            let mut union = InversionList::new();
                            for arm in &arms {
                                union = union.union(&arm.first);
                            }
                            Some(union)
                        } else {
                            None
                        };
                        absorb(&mut facts, set, can_empty);
                        advance(&mut facts, min, max);
                        at_start = false;
                        join
                    }
                }
                Op::Star { span, .. } => {
                    self.commit(&mut accum, false);
                    let body = self.walk(idx + 1, Limit::Join(None), false);
                    let leading_dot = top
                        && at_start
                        && span == 1
                        && matches!(self.program[idx + 1].op, Op::Any | Op::AnyNewline);
                    if leading_dot {
                        // The matcher only needs line starts; a first-set
                        // would have to admit everything anyway.
                        self.implicit_anchor = true;
                        facts.usable = false;
                    } else {
                        let set = body.usable.then_some(body.first);
                        absorb(&mut facts, set, true);
                    }
                    let max = if body.max == 0 { 0 } else { UNBOUNDED };
                    advance(&mut facts, 0, max);
                    at_start = false;
                    self.program.next_of(idx)
                }
                Op::Plus { .. } => {
                    self.commit(&mut accum, false);
                    let body = self.walk(idx + 1, Limit::Join(None), false);
                    let set = body.usable.then_some(body.first);
                    absorb(&mut facts, set, body.min == 0);
                    let max = if body.max == 0 { 0 } else { UNBOUNDED };
                    advance(&mut facts, body.min, max);
                    at_start = false;
                    self.program.next_of(idx)
                }
                Op::Curly { min, max, .. } => {
                    self.commit(&mut accum, false);
                    let body = self.walk(idx + 1, Limit::Join(None), false);
                    let set = body.usable.then_some(body.first);
                    absorb(&mut facts, set, min == 0 || body.min == 0);
                    let hi = if max == UNBOUNDED {
                        if body.max == 0 {
                            0
                        } else {
                            UNBOUNDED
                        }
                    } else {
                        max.saturating_mul(body.max)
                    };
                    advance(&mut facts, min.saturating_mul(body.min), hi);
                    at_start = false;
                    self.program.next_of(idx)
                }
                Op::Atomic { .. } => {
                    self.commit(&mut accum, false);
                    let body = self.walk(idx + 1, Limit::Marker, false);
                    let set = body.usable.then_some(body.first);
                    absorb(&mut facts, set, body.min == 0);
                    advance(&mut facts, body.min, body.max);
                    at_start = false;
                    self.program.next_of(idx)
                }
                Op::Look { kind, .. } => {
                    self.commit(&mut accum, false);
                    let body = self.walk(idx + 1, Limit::Marker, false);
                    if top && at_start && kind == LookKind::Ahead && body.usable && body.min > 0
                    {
                        self.constraints.push(body.first);
                    }
                    // Zero-width: position and openness carry through.
                    self.program.next_of(idx)
                }
                Op::GroupCond { span, .. } => {
                    self.commit(&mut accum, false);
                    let then_branch = idx + 1;
                    let else_branch = self
                        .program
                        .next_of(then_branch)
                        .expect("conditional arms come in pairs");
                    let a = self.walk(then_branch + 1, Limit::Index(else_branch), false);
                    let b = self.walk(else_branch + 1, Limit::Index(idx + 1 + span), false);
                    let set = (a.usable && b.usable).then(|| a.first.union(&b.first));
                    absorb(&mut facts, set, a.min == 0 || b.min == 0);
                    advance(&mut facts, a.min.min(b.min), a.max.max(b.max));
                    at_start = false;
                    self.program.next_of(idx)
                }
            };

            let Some(next) = next else { break };
            match limit {
                Limit::Index(bound) if next >= bound => {
                    facts.exit = Some(next);
                    break;
                }
                Limit::Join(join) if Some(next) == join => break,
                _ => {}
            }
            idx = next;
        }

        self.commit(&mut accum, false);
        facts
    }

    /// Freezes the accumulating literal as a substring candidate. Fixed
    /// offsets go to the anchored slot; longer text displaces shorter.
    fn commit(&mut self, accum: &mut Option<Accum>, at_end_line: bool) {
        let Some(run) = accum.take() else { return };
        let candidate = Substring {
            text: run.text.into_boxed_str(),
            min_offset: run.min_offset,
            max_offset: run.max_offset,
            at_end_line,
        };
        let slot = if candidate.min_offset == candidate.max_offset {
            &mut self.anchored
        } else {
            &mut self.floating
        };
        let longer = slot.as_ref().map_or(true, |held| {
            candidate.text.chars().count() > held.text.chars().count()
        });
        if longer {
            *slot = Some(candidate);
        }
    }

    /// Rewrites an alternation whose arms are all empty into a no-op,
    /// returning whether it fired.
    fn collapse_if_empty(&mut self, branches: &[u32]) -> bool {
        for (i, &b) in branches.iter().enumerate() {
            if !matches!(self.program[b + 1].op, Op::Nothing) {
                return false;
            }
            if let Some(&bound) = branches.get(i + 1) {
                if bound != b + 2 {
                    return false;
                }
            }
        }
        let head = branches[0];
        let target = self.program.next_of(head + 1);
        let last_body = branches[branches.len() - 1] + 1;
        for idx in head..=last_body {
            self.program[idx] = Inst::new(Op::Nothing);
        }
        if let Some(target) = target {
            self.program.set_next(head, target);
        }
        true
    }

    fn finish(self, facts: Facts) -> Study {
        let moot = self.anchored_start || self.implicit_anchor;
        let start_class = if moot {
            StartClass::None
        } else if let Some(id) = self.scanner {
            StartClass::TrieScanner(id)
        } else if !facts.usable {
            StartClass::None
        } else {
            let mut list = facts.first;
            for constraint in &self.constraints {
                list = list.intersect(constraint);
            }
            if list.is_full() {
                StartClass::None
            } else {
                StartClass::Set(Arc::new(list))
            }
        };

        Study {
            min_len: facts.min,
            anchored_substring: self.anchored,
            floating_substring: self.floating,
            start_class,
            implicit_anchor: self.implicit_anchor,
            wants_scanner: if moot { None } else { self.wants },
        }
    }
}

/// Folds one sequence element into the running first-set: while the set is
/// open, either the element's own first characters join it (`None` gives
/// the set up entirely), and a mandatory consumer closes it.
fn absorb(facts: &mut Facts, set: Option<InversionList>, can_be_empty: bool) {
    if !facts.open {
        return;
    }
    match set {
        Some(s) if facts.usable => facts.first = facts.first.union(&s),
        Some(_) => {}
        None => facts.usable = false,
    }
    facts.open &= can_be_empty;
}

fn advance(facts: &mut Facts, lo: u32, hi: u32) {
    facts.min = facts.min.saturating_add(lo);
    facts.max = facts.max.saturating_add(hi);
}

fn single(c: char) -> InversionList {
    InversionList::from_ranges([(c as u32, c as u32)])
}

/// The simple-fold orbit of `c` as a set, or just `c` when it folds alone.
fn orbit_of(c: char) -> InversionList {
    match registry().fold_orbit(c) {
        Some(orbit) => InversionList::from_ranges(orbit.iter().map(|&cp| (cp, cp))),
        None => single(c),
    }
}

fn any_but_newline() -> InversionList {
    let mut list = InversionList::from_ranges([('\n' as u32, '\n' as u32)]);
    list.invert();
    list
}

/// The characters any of the trie's words can start with, widened by fold
/// orbits for folded tries.
fn trie_first_set(trie: &Trie) -> InversionList {
    let mut points = Vec::new();
    for (&c, &id) in trie.alphabet.iter().zip(trie.ids.iter()) {
        if trie.transition(0, id).is_some() {
            points.push((c as u32, c as u32));
            if trie.fold {
                if let Some(orbit) = registry().fold_orbit(c) {
                    points.extend(orbit.iter().map(|&cp| (cp, cp)));
                }
            }
        }
    }
    InversionList::from_ranges(points)
}

/// Minimum and maximum input characters a trie instruction can consume.
/// `word_len` already discounts fold expansions, so the maximum comes from
/// the deepest terminal state instead.
fn trie_lengths(trie: &Trie) -> (u32, u32) {
    let min = (1..trie.word_len.len())
        .map(|w| trie.word_len[w])
        .min()
        .unwrap_or(0);

    let states = trie.state_count();
    let mut depth = vec![0u32; states];
    let mut max = 0;
    for state in 0..states as u32 {
        for id in 0..trie.alphabet.len() as u16 {
            if let Some(to) = trie.transition(state, id) {
                // States are created parent-first, so the parent's depth is
                // final by the time its children are seen.
                depth[to as usize] = depth[state as usize] + 1;
            }
        }
        if trie.word_at_state[state as usize] != 0 {
            max = max.max(depth[state as usize]);
        }
    }
    (min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pattern_program::{Config, DeferredProperty};

    fn exact(text: &str) -> Inst {
        Inst::new(Op::Exact(text.into()))
    }

    fn set_of(class: &StartClass) -> &InversionList {
        match class {
            StartClass::Set(list) => list,
            other => panic!("expected a set start class, got {:?}", other),
        }
    }

    #[test]
    fn should_measure_plain_literals() {
        let mut program = Program::new();
        let lit = program.push(exact("abc"));
        let end = program.push(Inst::new(Op::End));
        program.set_next(lit, end);

        let study = study(&mut program, &[], &[]);

        assert_eq!(3, study.min_len);
        let sub = study.anchored_substring.expect("fixed substring");
        assert_eq!("abc", &*sub.text);
        assert_eq!((0, 0, false), (sub.min_offset, sub.max_offset, sub.at_end_line));
        assert!(study.floating_substring.is_none());
        let first = set_of(&study.start_class);
        assert!(first.contains('a' as u32));
        assert!(!first.contains('b' as u32));
    }

    #[test]
    fn should_flag_substrings_before_line_ends() {
        let mut program = Program::new();
        let lit = program.push(exact("abc"));
        let eol = program.push(Inst::new(Op::EndLine));
        let end = program.push(Inst::new(Op::End));
        program.set_next(lit, eol);
        program.set_next(eol, end);

        let study = study(&mut program, &[], &[]);

        let sub = study.anchored_substring.expect("fixed substring");
        assert!(sub.at_end_line);
    }

    #[test]
    fn should_track_a_floating_substring_past_a_star() {
        // foo.*bar
        let mut program = Program::new();
        let head = program.push(exact("foo"));
        let star = program.push(Inst::new(Op::Star {
            greedy: true,
            span: 1,
        }));
        program.push(Inst::new(Op::Any));
        let tail = program.push(exact("bar"));
        let end = program.push(Inst::new(Op::End));
        program.set_next(head, star);
        program.set_next(star, tail);
        program.set_next(tail, end);

        let study = study(&mut program, &[], &[]);

        assert_eq!(6, study.min_len);
        let fixed = study.anchored_substring.expect("fixed substring");
        assert_eq!(("foo", 0, 0), (&*fixed.text, fixed.min_offset, fixed.max_offset));
        let float = study.floating_substring.expect("floating substring");
        assert_eq!(
            ("bar", 3, UNBOUNDED),
            (&*float.text, float.min_offset, float.max_offset)
        );
        assert!(set_of(&study.start_class).contains('f' as u32));
        assert!(!study.implicit_anchor);
    }

    #[test]
    fn should_or_first_sets_across_branches() {
        let mut program = Program::new();
        let b0 = program.push(Inst::new(Op::Branch));
        let first = program.push(exact("a"));
        let b1 = program.push(Inst::new(Op::Branch));
        let second = program.push(exact("b"));
        let end = program.push(Inst::new(Op::End));
        program.set_next(b0, b1);
        program.set_next(first, end);
        program.set_next(second, end);

        let study = study(&mut program, &[], &[]);

        assert_eq!(1, study.min_len);
        let first_set = set_of(&study.start_class);
        assert!(first_set.contains('a' as u32));
        assert!(first_set.contains('b' as u32));
        assert!(!first_set.contains('c' as u32));
    }

    #[test]
    fn should_leave_the_start_class_off_anchored_patterns() {
        let mut program = Program::new();
        let anchor = program.push(Inst::new(Op::BeginText));
        let lit = program.push(exact("a"));
        let end = program.push(Inst::new(Op::End));
        program.set_next(anchor, lit);
        program.set_next(lit, end);

        let study = study(&mut program, &[], &[]);

        assert_eq!(1, study.min_len);
        assert_eq!(StartClass::None, study.start_class);
    }

    #[test]
    fn should_raise_the_implicit_anchor_for_a_leading_dot_star() {
        let mut program = Program::new();
        let star = program.push(Inst::new(Op::Star {
            greedy: true,
            span: 1,
        }));
        program.push(Inst::new(Op::Any));
        let lit = program.push(exact("a"));
        let end = program.push(Inst::new(Op::End));
        program.set_next(star, lit);
        program.set_next(lit, end);

        let study = study(&mut program, &[], &[]);

        assert!(study.implicit_anchor);
        assert_eq!(StartClass::None, study.start_class);
        assert_eq!(1, study.min_len);
        let float = study.floating_substring.expect("floating substring");
        assert_eq!(("a", 0, UNBOUNDED), (&*float.text, float.min_offset, float.max_offset));
    }

    #[test]
    fn should_collapse_an_all_empty_alternation() {
        // (?:|)x
        let mut program = Program::new();
        let b0 = program.push(Inst::new(Op::Branch));
        let n0 = program.push(Inst::new(Op::Nothing));
        let b1 = program.push(Inst::new(Op::Branch));
        let n1 = program.push(Inst::new(Op::Nothing));
        let lit = program.push(exact("x"));
        let end = program.push(Inst::new(Op::End));
        program.set_next(b0, b1);
        program.set_next(n0, lit);
        program.set_next(n1, lit);
        program.set_next(lit, end);

        let study = study(&mut program, &[], &[]);

        assert!(matches!(program[0].op, Op::Nothing));
        assert_eq!(Some(lit), program.next_of(0));
        assert!(matches!(program[2].op, Op::Nothing));
        assert_eq!(None, program.next_of(2));
        assert_eq!(1, study.min_len);
        let sub = study.anchored_substring.expect("fixed substring");
        assert_eq!(("x", 0), (&*sub.text, sub.min_offset));
        assert!(set_of(&study.start_class).contains('x' as u32));
    }

    #[test]
    fn should_request_a_scanner_for_a_leading_trie() {
        let mut program = Program::new();
        let join = 4;
        for (index, word) in ["ab", "cd"].iter().enumerate() {
            let branch = program.push(Inst::new(Op::Branch));
            let body = program.push(exact(word));
            program.set_next(body, join);
            if index == 0 {
                program.set_next(branch, branch + 2);
            }
        }
        program.push(Inst::new(Op::End));
        let mut tries = crate::trie::optimize(&mut program, &Config::default());

        let first = study(&mut program, &[], &tries);
        assert_eq!(Some(0), first.wants_scanner);
        let fallback = set_of(&first.start_class);
        assert!(fallback.contains('a' as u32));
        assert!(fallback.contains('c' as u32));
        assert!(!fallback.contains('b' as u32));
        assert_eq!(2, first.min_len);

        crate::trie::build_fail_table(&mut tries[0]);
        let second = study(&mut program, &[], &tries);
        assert_eq!(StartClass::TrieScanner(0), second.start_class);
        assert_eq!(None, second.wants_scanner);
    }

    #[test]
    fn should_discount_fold_deltas_from_the_minimum_length() {
        let mut program = Program::new();
        let lit = program.push(Inst::new(Op::ExactFold {
            text: "strasse".into(),
            fold_delta: 2,
        }));
        let end = program.push(Inst::new(Op::End));
        program.set_next(lit, end);

        let study = study(&mut program, &[], &[]);

        assert_eq!(5, study.min_len);
        assert!(study.anchored_substring.is_none());
        let first = set_of(&study.start_class);
        assert!(first.contains('s' as u32));
        assert!(first.contains('S' as u32));
        assert!(first.contains(0x17F), "long s belongs to the s orbit");
    }

    #[test]
    fn should_multiply_bounded_repeat_lengths() {
        let mut program = Program::new();
        let curly = program.push(Inst::new(Op::Curly {
            min: 2,
            max: 4,
            greedy: true,
            span: 1,
        }));
        program.push(exact("a"));
        let end = program.push(Inst::new(Op::End));
        program.set_next(curly, end);

        let study = study(&mut program, &[], &[]);

        assert_eq!(2, study.min_len);
        assert!(study.anchored_substring.is_none());
        assert!(set_of(&study.start_class).contains('a' as u32));
    }

    #[test]
    fn should_intersect_leading_lookahead_constraints() {
        // (?=ab)(?:a|x)
        let mut program = Program::new();
        let look = program.push(Inst::new(Op::Look {
            kind: LookKind::Ahead,
            span: 2,
        }));
        let body = program.push(exact("ab"));
        let marker = program.push(Inst::new(Op::LookEnd));
        let b0 = program.push(Inst::new(Op::Branch));
        let first = program.push(exact("a"));
        let b1 = program.push(Inst::new(Op::Branch));
        let second = program.push(exact("x"));
        let end = program.push(Inst::new(Op::End));
        program.set_next(look, b0);
        program.set_next(body, marker);
        program.set_next(b0, b1);
        program.set_next(first, end);
        program.set_next(second, end);

        let study = study(&mut program, &[], &[]);

        assert_eq!(1, study.min_len);
        let first_set = set_of(&study.start_class);
        assert!(first_set.contains('a' as u32));
        assert!(!first_set.contains('x' as u32));
    }

    #[test]
    fn should_give_up_on_unknowable_first_characters() {
        let mut program = Program::new();
        let backref = program.push(Inst::new(Op::Backref {
            group: 1,
            fold: false,
        }));
        let lit = program.push(exact("a"));
        let end = program.push(Inst::new(Op::End));
        program.set_next(backref, lit);
        program.set_next(lit, end);

        let study = study(&mut program, &[], &[]);

        assert_eq!(StartClass::None, study.start_class);
        assert_eq!(1, study.min_len);
    }

    #[test]
    fn should_complement_negated_classes_in_the_first_set() {
        let list = Arc::new(InversionList::from_ranges([('a' as u32, 'c' as u32)]));
        let sets = vec![ClassSet {
            list,
            deferred: Vec::new(),
            negated: true,
        }];
        let mut program = Program::new();
        let class = program.push(Inst::new(Op::Class(0)));
        let end = program.push(Inst::new(Op::End));
        program.set_next(class, end);

        let study = study(&mut program, &sets, &[]);

        let first = set_of(&study.start_class);
        assert!(first.contains('z' as u32));
        assert!(!first.contains('b' as u32));
    }

    #[test]
    fn should_give_up_on_deferred_properties() {
        let sets = vec![ClassSet {
            list: Arc::new(InversionList::new()),
            deferred: vec![DeferredProperty {
                name: "Foo".into(),
                negated: false,
            }],
            negated: false,
        }];
        let mut program = Program::new();
        let class = program.push(Inst::new(Op::Class(0)));
        let end = program.push(Inst::new(Op::End));
        program.set_next(class, end);

        let study = study(&mut program, &sets, &[]);

        assert_eq!(StartClass::None, study.start_class);
    }

    #[test]
    fn should_walk_atomic_bodies() {
        let mut program = Program::new();
        let atomic = program.push(Inst::new(Op::Atomic { span: 2 }));
        let body = program.push(exact("ab"));
        let marker = program.push(Inst::new(Op::AtomicEnd));
        let end = program.push(Inst::new(Op::End));
        program.set_next(atomic, end);
        program.set_next(body, marker);

        let study = study(&mut program, &[], &[]);

        assert_eq!(2, study.min_len);
        assert!(set_of(&study.start_class).contains('a' as u32));
    }

    #[test]
    fn should_combine_conditional_arms() {
        // (?(1)b|c) with the condition instruction standing alone.
        let mut program = Program::new();
        let cond = program.push(Inst::new(Op::GroupCond { group: 1, span: 4 }));
        let then_branch = program.push(Inst::new(Op::Branch));
        program.push(exact("b"));
        let else_branch = program.push(Inst::new(Op::Branch));
        program.push(exact("c"));
        let end = program.push(Inst::new(Op::End));
        program.set_next(cond, end);
        program.set_next(then_branch, else_branch);

        let study = study(&mut program, &[], &[]);

        assert_eq!(1, study.min_len);
        let first = set_of(&study.start_class);
        assert!(first.contains('b' as u32));
        assert!(first.contains('c' as u32));
    }
}
