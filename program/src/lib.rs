//! Provides the compiled representation of a pattern: a flat instruction
//! program plus the side tables and search anchors a matcher consumes
//! read-only.
//!
//! Instructions live in one growable vector and refer to each other
//! exclusively through relative forward offsets, so whole regions can be
//! rewritten in place (by the trie and literal-joining passes) without
//! invalidating anything outside the region.
//!
//! # Example
//!
//! ```
//! use pattern_program::{Inst, Op, Program};
//!
//! let mut program = Program::new();
//! let head = program.push(Inst::new(Op::Exact("ab".into())));
//! let end = program.push(Inst::new(Op::End));
//! program.set_next(head, end);
//!
//! assert_eq!(program.next_of(head), Some(end));
//! assert_eq!(program.len(), 2);
//! ```

pub mod interval;
pub mod trie;

use std::fmt;
use std::sync::Arc;

use crate::interval::InversionList;
use crate::trie::Trie;

/// Sentinel for an unbounded repeat count or offset.
pub const UNBOUNDED: u32 = u32::MAX;

bitflags::bitflags! {
    /// Pattern-wide matching behavior flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Flags: u8 {
        /// Case-insensitive matching.
        const CASELESS = 0b0001;
        /// `^`/`$` match at line boundaries.
        const MULTILINE = 0b0010;
        /// `.` also matches a newline.
        const DOTALL = 0b0100;
        /// Free-spacing mode: unescaped whitespace and `#` comments are
        /// ignored outside classes.
        const EXTENDED = 0b1000;
    }
}

/// Represents the character-set semantics a pattern was compiled under.
///
/// The mode decides what the built-in classes (`\w`, `\d`, `\s`, POSIX
/// names) mean and which case-fold pairs apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    /// Built-in classes restricted to ASCII.
    Ascii,
    /// ASCII semantics at compile time; built-in classes additionally
    /// defer to the runtime locale.
    Locale,
    /// Full Unicode semantics.
    #[default]
    Unicode,
}

/// Tunable compilation thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Byte ceiling for a single literal instruction's payload.
    pub exact_max_bytes: usize,
    /// Largest distinct-character count for which trie construction uses
    /// the dense table strategy rather than adjacency lists.
    pub trie_dense_alphabet_max: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exact_max_bytes: 255,
            trie_dense_alphabet_max: 32,
        }
    }
}

/// Everything a caller chooses about one compilation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Options {
    pub flags: Flags,
    pub charset: Charset,
    pub config: Config,
}

/// The four lookaround varieties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookKind {
    Ahead,
    AheadNeg,
    Behind,
    BehindNeg,
}

/// Represents one instruction's operation and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Accept.
    End,
    /// Zero-width no-op.
    Nothing,
    /// `\A`, or `^` without MULTILINE.
    BeginText,
    /// `^` with MULTILINE.
    BeginLine,
    /// `\z`.
    EndText,
    /// `\Z`, or `$` without MULTILINE.
    EndTextNewline,
    /// `$` with MULTILINE.
    EndLine,
    /// `\b`.
    WordBoundary,
    /// `\B`.
    NotWordBoundary,
    /// `\G`.
    RestartPos,
    /// `.` — anything but a newline.
    Any,
    /// `.` under DOTALL — anything at all.
    AnyNewline,
    /// Literal text.
    Exact(Box<str>),
    /// Case-fold-sensitive literal text, stored folded. `fold_delta` is
    /// how many fewer input characters the payload can consume than its
    /// own character count, contributed by multi-character folds.
    ExactFold { text: Box<str>, fold_delta: u32 },
    /// Character class; the payload indexes the pattern's set side table.
    Class(u32),
    /// One alternation arm. `next` chains to the following arm; the arm's
    /// body starts at the adjacent instruction.
    Branch,
    /// Zero-or-more over the operand in the following `span` instructions.
    Star { greedy: bool, span: u32 },
    /// One-or-more over the operand in the following `span` instructions.
    Plus { greedy: bool, span: u32 },
    /// Bounded repeat; `max` may be [`UNBOUNDED`].
    Curly {
        min: u32,
        max: u32,
        greedy: bool,
        span: u32,
    },
    /// Capture-group open (1-based index).
    Open(u32),
    /// Capture-group close.
    Close(u32),
    /// Atomic (independent) group over the following `span` instructions.
    Atomic { span: u32 },
    /// Closes an atomic group's body.
    AtomicEnd,
    /// Lookaround over the following `span` instructions.
    Look { kind: LookKind, span: u32 },
    /// Closes a lookaround body.
    LookEnd,
    /// Backreference to a capture group.
    Backref { group: u32, fold: bool },
    /// Conditional on whether a group has matched; two `Branch` arms
    /// follow in the next `span` instructions.
    GroupCond { group: u32, span: u32 },
    /// Subroutine call to a group (0 = the whole pattern).
    Gosub(u32),
    /// Literal-alternation trie; the payload indexes the trie side table.
    Trie(u32),
}

impl Op {
    /// Whether this is a literal-text instruction.
    pub fn is_literal(&self) -> bool {
        matches!(self, Op::Exact(_) | Op::ExactFold { .. })
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn greediness(greedy: bool) -> &'static str {
            if greedy {
                "greedy"
            } else {
                "lazy"
            }
        }

        match self {
            Op::End => write!(f, "End"),
            Op::Nothing => write!(f, "Nothing"),
            Op::BeginText => write!(f, "BeginText"),
            Op::BeginLine => write!(f, "BeginLine"),
            Op::EndText => write!(f, "EndText"),
            Op::EndTextNewline => write!(f, "EndTextNewline"),
            Op::EndLine => write!(f, "EndLine"),
            Op::WordBoundary => write!(f, "WordBoundary"),
            Op::NotWordBoundary => write!(f, "NotWordBoundary"),
            Op::RestartPos => write!(f, "RestartPos"),
            Op::Any => write!(f, "Any"),
            Op::AnyNewline => write!(f, "AnyNewline"),
            Op::Exact(text) => write!(f, "Exact: {:?}", text),
            Op::ExactFold { text, fold_delta } => {
                write!(f, "ExactFold: {:?} (delta {})", text, fold_delta)
            }
            Op::Class(id) => write!(f, "Class: {}", id),
            Op::Branch => write!(f, "Branch"),
            Op::Star { greedy, span } => {
                write!(f, "Star ({}, span {})", greediness(*greedy), span)
            }
            Op::Plus { greedy, span } => {
                write!(f, "Plus ({}, span {})", greediness(*greedy), span)
            }
            Op::Curly {
                min,
                max,
                greedy,
                span,
            } => {
                if *max == UNBOUNDED {
                    write!(f, "Curly {{{},}} ({}, span {})", min, greediness(*greedy), span)
                } else {
                    write!(
                        f,
                        "Curly {{{},{}}} ({}, span {})",
                        min,
                        max,
                        greediness(*greedy),
                        span
                    )
                }
            }
            Op::Open(group) => write!(f, "Open: {}", group),
            Op::Close(group) => write!(f, "Close: {}", group),
            Op::Atomic { span } => write!(f, "Atomic (span {})", span),
            Op::AtomicEnd => write!(f, "AtomicEnd"),
            Op::Look { kind, span } => {
                let name = match kind {
                    LookKind::Ahead => "Ahead",
                    LookKind::AheadNeg => "AheadNeg",
                    LookKind::Behind => "Behind",
                    LookKind::BehindNeg => "BehindNeg",
                };
                write!(f, "Look{} (span {})", name, span)
            }
            Op::LookEnd => write!(f, "LookEnd"),
            Op::Backref { group, fold } => {
                if *fold {
                    write!(f, "BackrefFold: {}", group)
                } else {
                    write!(f, "Backref: {}", group)
                }
            }
            Op::GroupCond { group, span } => {
                write!(f, "GroupCond: {} (span {})", group, span)
            }
            Op::Gosub(group) => write!(f, "Gosub: {}", group),
            Op::Trie(id) => write!(f, "Trie: {}", id),
        }
    }
}

/// Represents one instruction: an operation plus the relative forward
/// offset of its successor (0 = end of chain).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inst {
    pub op: Op,
    pub next: u32,
}

impl Inst {
    /// An instruction with no successor yet.
    pub fn new(op: Op) -> Self {
        Self { op, next: 0 }
    }
}

/// Represents the flat instruction array of a compiled pattern.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Program {
    insts: Vec<Inst>,
}

impl Program {
    pub fn new() -> Self {
        Self { insts: Vec::new() }
    }

    /// A program that will hold exactly `cap` instructions.
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            insts: Vec::with_capacity(cap),
        }
    }

    /// Appends an instruction, returning its index.
    pub fn push(&mut self, inst: Inst) -> u32 {
        let idx = self.insts.len() as u32;
        self.insts.push(inst);
        idx
    }

    /// Inserts an instruction at `idx`, shifting the rest forward.
    /// Relative links inside the shifted block keep their meaning; links
    /// into the block from before it now reach the inserted instruction.
    pub fn insert(&mut self, idx: u32, inst: Inst) {
        self.insts.insert(idx as usize, inst);
    }

    pub fn len(&self) -> u32 {
        self.insts.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    /// The successor index of `idx`, if its chain continues.
    pub fn next_of(&self, idx: u32) -> Option<u32> {
        let delta = self.insts[idx as usize].next;
        (delta != 0).then(|| idx + delta)
    }

    /// Points `idx` at `target`. Successor links only run forward.
    pub fn set_next(&mut self, idx: u32, target: u32) {
        assert!(target > idx, "successor links must run forward");
        self.insts[idx as usize].next = target - idx;
    }

    /// Clears the successor of `idx`, ending its chain.
    pub fn clear_next(&mut self, idx: u32) {
        self.insts[idx as usize].next = 0;
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Inst> {
        self.insts.iter()
    }
}

impl std::ops::Index<u32> for Program {
    type Output = Inst;

    fn index(&self, idx: u32) -> &Self::Output {
        &self.insts[idx as usize]
    }
}

impl std::ops::IndexMut<u32> for Program {
    fn index_mut(&mut self, idx: u32) -> &mut Self::Output {
        &mut self.insts[idx as usize]
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, inst) in self.insts.iter().enumerate() {
            if inst.next == 0 {
                writeln!(f, "{:04}: {}", idx, inst.op)?;
            } else {
                writeln!(
                    f,
                    "{:04}: {:<32} -> {:04}",
                    idx,
                    inst.op.to_string(),
                    idx as u32 + inst.next
                )?;
            }
        }
        Ok(())
    }
}

/// A property whose membership could not be resolved at compile time and
/// is left to the runtime lookup service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredProperty {
    pub name: Box<str>,
    pub negated: bool,
}

/// Represents one entry of the class side table.
///
/// A code point is a member when the inversion list contains it or any
/// deferred property (resolved at run time, with its own polarity) claims
/// it; `negated` then flips the overall answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSet {
    pub list: Arc<InversionList>,
    pub deferred: Vec<DeferredProperty>,
    pub negated: bool,
}

impl ClassSet {
    /// The compile-time answer, when one exists: `None` means a deferred
    /// property must be consulted.
    pub fn contains(&self, cp: u32) -> Option<bool> {
        if self.list.contains(cp) {
            Some(!self.negated)
        } else if self.deferred.is_empty() {
            Some(self.negated)
        } else {
            None
        }
    }
}

/// A required substring discovered by the study pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substring {
    pub text: Box<str>,
    /// Smallest offset (in characters from the match start) at which the
    /// substring can begin.
    pub min_offset: u32,
    /// Largest such offset; [`UNBOUNDED`] when a variable-length region
    /// precedes it.
    pub max_offset: u32,
    /// Whether the substring must be followed by an end-of-line boundary.
    pub at_end_line: bool,
}

/// How a matcher may reject non-matching start positions cheaply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StartClass {
    /// No useful start filter exists.
    #[default]
    None,
    /// The first character of any match lies in this set.
    Set(Arc<InversionList>),
    /// The pattern begins with this trie, whose failure links make it a
    /// scanner.
    TrieScanner(u32),
}

/// Kinds of soft advisories raised during compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// A class range with its endpoints reversed, kept as literals.
    ReversedRange,
    /// A quantifier applied to a construct that can only match empty.
    UselessQuantifier,
    /// An unrecognized escape, kept as the literal character.
    UnrecognizedEscape(char),
}

/// A legal-but-suspect construct the compiler tolerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Warning {
    pub kind: WarningKind,
    /// Byte offset into the original pattern.
    pub offset: usize,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            WarningKind::ReversedRange => {
                write!(f, "character range out of order at offset {}", self.offset)
            }
            WarningKind::UselessQuantifier => write!(
                f,
                "quantifier on a zero-width construct at offset {}",
                self.offset
            ),
            WarningKind::UnrecognizedEscape(ch) => write!(
                f,
                "unrecognized escape \\{} treated literally at offset {}",
                ch, self.offset
            ),
        }
    }
}

/// Represents a fully compiled pattern: the instruction program, its side
/// tables, and the anchors the study pass derived. Logically immutable
/// once assembled; safe to share across threads.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub program: Program,
    pub sets: Vec<ClassSet>,
    pub tries: Vec<Trie>,
    /// Number of capturing groups.
    pub group_count: u32,
    /// Name -> 1-based group index, in declaration order.
    pub group_names: Vec<(Box<str>, u32)>,
    /// A lower bound on the length, in characters, of any match.
    pub min_len: u32,
    /// Longest required substring at a known exact offset.
    pub anchored_substring: Option<Substring>,
    /// Longest required substring at a bounded-or-unbounded offset range.
    pub floating_substring: Option<Substring>,
    pub start_class: StartClass,
    /// The pattern begins with an unbounded any-character repeat, so a
    /// matcher only needs to try line starts.
    pub implicit_anchor: bool,
    /// Whether compilation was promoted to the wide encoding.
    pub wide: bool,
    pub options: Options,
    pub warnings: Vec<Warning>,
}

impl CompiledPattern {
    /// The 1-based index of a named group, if declared. The first
    /// declaration wins for duplicate names.
    pub fn group_index(&self, name: &str) -> Option<u32> {
        self.group_names
            .iter()
            .find(|(n, _)| n.as_ref() == name)
            .map(|&(_, idx)| idx)
    }
}

impl fmt::Display for CompiledPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for (id, set) in self.sets.iter().enumerate() {
            writeln!(
                f,
                "set {}: {} ranges{}{}",
                id,
                set.list.range_count(),
                if set.negated { ", negated" } else { "" },
                if set.deferred.is_empty() {
                    String::new()
                } else {
                    format!(", {} deferred", set.deferred.len())
                }
            )?;
        }
        for (id, trie) in self.tries.iter().enumerate() {
            writeln!(f, "trie {}: {}", id, trie)?;
        }
        writeln!(f, "min length: {}", self.min_len)?;
        if let Some(sub) = &self.anchored_substring {
            writeln!(
                f,
                "anchored substring: {:?} at {}",
                sub.text, sub.min_offset
            )?;
        }
        if let Some(sub) = &self.floating_substring {
            if sub.max_offset == UNBOUNDED {
                writeln!(
                    f,
                    "floating substring: {:?} at {}..",
                    sub.text, sub.min_offset
                )?;
            } else {
                writeln!(
                    f,
                    "floating substring: {:?} at {}..{}",
                    sub.text, sub.min_offset, sub.max_offset
                )?;
            }
        }
        match &self.start_class {
            StartClass::None => {}
            StartClass::Set(list) => {
                writeln!(f, "start class: {} ranges", list.range_count())?
            }
            StartClass::TrieScanner(id) => writeln!(f, "start class: trie {}", id)?,
        }
        Ok(())
    }
}
