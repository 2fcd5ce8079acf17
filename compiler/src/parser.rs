//! Provides the recursive-descent pattern parser and instruction emitter.
//!
//! Parsing runs twice over the same grammar: a sizing pass that only counts
//! the instructions the pattern needs, then an emission pass that writes
//! them into a program allocated to exactly that count. Forward links and
//! construct spans can therefore be filled in as instructions are written,
//! without a relocation step afterwards. Both passes must follow
//! byte-identical control flow, so nothing in the grammar may branch on
//! which pass is running.
//!
//! A literal scalar above U+00FF cannot be represented while the narrow
//! encoding is active; the sizing pass aborts with a restart signal and the
//! driver retries with the wide encoding.

use pattern_program::{
    Charset, ClassSet, Flags, Inst, LookKind, Op, Options, Program, Warning, WarningKind,
    UNBOUNDED,
};

use crate::classes::{self, ClassResult};
use crate::error::{Error, ErrorKind, Fault, ParseResult, Restart};
use crate::unicode::{fold_key, registry};

/// Nesting ceiling for groups and set-expression parentheses.
pub(crate) const MAX_DEPTH: usize = 64;

/// What one escape sequence stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Escape {
    /// A single literal character.
    Literal(char),
    /// A class shorthand such as `\d` or `\W`.
    Class(ClassEscape),
    /// A `\p{...}` / `\P{...}` property query.
    Property { name: Box<str>, negated: bool },
    /// A zero-width assertion such as `\b` or `\A`.
    Assert(Op),
    /// Bare `\N`: any character but newline, whatever the dot mode.
    NotNewline,
    /// A backreference; `at` is the byte offset of the reference text.
    Backref { target: RefTarget, at: usize },
}

/// The shorthand character classes reachable by escape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClassEscape {
    Digit,
    NotDigit,
    Word,
    NotWord,
    Space,
    NotSpace,
    Horizontal,
    NotHorizontal,
    Vertical,
    NotVertical,
}

/// A group reference, by number or by declared name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RefTarget {
    Group(u32),
    Name(Box<str>),
}

/// A reference awaiting validation against the finished group table.
#[derive(Debug)]
struct PendingRef {
    at: usize,
    target: RefTarget,
}

/// A declared capture-group name. `reset` records the branch-reset arm the
/// declaration sits in, the only context where duplicates are legal.
#[derive(Debug)]
struct NameEntry {
    name: Box<str>,
    group: u32,
    reset: Option<(u32, u32)>,
}

/// Which of the two passes this parser performs.
#[derive(Debug)]
enum Pass {
    /// Count instructions without materializing them.
    Count(u32),
    /// Write instructions into a pre-sized program.
    Emit(Program),
}

/// A parsed region of the program: its first instruction and the dangling
/// chain ends the enclosing construct still has to point somewhere.
#[derive(Debug)]
struct Chunk {
    head: u32,
    tails: Vec<u32>,
}

impl Chunk {
    fn solo(idx: u32) -> Self {
        Self {
            head: idx,
            tails: vec![idx],
        }
    }
}

/// One quantifier as written, before it is applied to its operand.
#[derive(Debug, Clone, Copy)]
struct Quant {
    kind: QuantKind,
    greedy: bool,
    possessive: bool,
    at: usize,
}

#[derive(Debug, Clone, Copy)]
enum QuantKind {
    Star,
    Plus,
    Question,
    Range { min: u32, max: u32 },
}

/// Holds the whole mutable state of one parsing pass, threaded by
/// reference through the grammar functions.
#[derive(Debug)]
pub(crate) struct Parser {
    input: Box<str>,
    pos: usize,
    options: Options,
    /// Currently scoped flags; inline groups push and pop these.
    flags: Flags,
    wide: bool,
    pass: Pass,
    /// Capture groups opened so far.
    groups: u32,
    names: Vec<NameEntry>,
    /// The finished name table from the sizing pass, used by the emission
    /// pass to resolve forward references by name.
    resolved: Vec<(Box<str>, u32)>,
    pending: Vec<PendingRef>,
    warnings: Vec<Warning>,
    sets: Vec<ClassSet>,
    depth: usize,
    reset_ctx: Option<(u32, u32)>,
    reset_serial: u32,
}

impl Parser {
    /// A sizing-pass parser over `pattern`.
    pub(crate) fn new(pattern: &str, options: Options, wide: bool) -> Self {
        let flags = options.flags;
        Self {
            input: pattern.into(),
            pos: 0,
            options,
            flags,
            wide,
            pass: Pass::Count(0),
            groups: 0,
            names: Vec::new(),
            resolved: Vec::new(),
            pending: Vec::new(),
            warnings: Vec::new(),
            sets: Vec::new(),
            depth: 0,
            reset_ctx: None,
            reset_serial: 0,
        }
    }

    /// An emission-pass parser. `capacity` is the instruction count the
    /// sizing pass arrived at and `resolved` its finished name table.
    pub(crate) fn emitting(
        pattern: &str,
        options: Options,
        wide: bool,
        capacity: u32,
        resolved: Vec<(Box<str>, u32)>,
    ) -> Self {
        let mut parser = Self::new(pattern, options, wide);
        parser.pass = Pass::Emit(Program::with_capacity(capacity as usize));
        parser.resolved = resolved;
        parser
    }

    /// The instruction count the pass has arrived at so far.
    pub(crate) fn count(&self) -> u32 {
        self.len()
    }

    pub(crate) fn take_program(&mut self) -> Program {
        match std::mem::replace(&mut self.pass, Pass::Count(0)) {
            Pass::Emit(program) => program,
            Pass::Count(_) => panic!("sizing pass has no program to take"),
        }
    }

    pub(crate) fn group_count(&self) -> u32 {
        self.groups
    }

    /// Declared names with their group indices, in declaration order.
    pub(crate) fn name_table(&self) -> Vec<(Box<str>, u32)> {
        self.names
            .iter()
            .map(|entry| (entry.name.clone(), entry.group))
            .collect()
    }

    pub(crate) fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub(crate) fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    pub(crate) fn take_sets(&mut self) -> Vec<ClassSet> {
        std::mem::take(&mut self.sets)
    }

    // Cursor primitives. `pos` is a byte offset into the pattern and always
    // sits on a character boundary.

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    /// The character `n` characters past the cursor; `peek_at(0)` is
    /// [`Parser::peek`].
    pub(crate) fn peek_at(&self, n: usize) -> Option<char> {
        self.input[self.pos..].chars().nth(n)
    }

    pub(crate) fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    pub(crate) fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    pub(crate) fn slice(&self, start: usize, end: usize) -> &str {
        &self.input[start..end]
    }

    // Mode accessors, also consulted by the class compiler.

    pub(crate) fn fold(&self) -> bool {
        self.flags.contains(Flags::CASELESS)
    }

    pub(crate) fn wide(&self) -> bool {
        self.wide
    }

    pub(crate) fn charset(&self) -> Charset {
        self.options.charset
    }

    /// Whether fold closure is capped to ASCII partners.
    pub(crate) fn ascii_fold(&self) -> bool {
        !matches!(self.options.charset, Charset::Unicode)
    }

    fn extended(&self) -> bool {
        self.flags.contains(Flags::EXTENDED)
    }

    pub(crate) fn error_at(&self, kind: ErrorKind, offset: usize) -> Fault {
        Fault::User(Error::new(kind, offset))
    }

    pub(crate) fn warn_at(&mut self, kind: WarningKind, offset: usize) {
        self.warnings.push(Warning { kind, offset });
    }

    /// Records that `cp` must be representable. While the narrow encoding
    /// is active a scalar above U+00FF raises the width-upgrade restart.
    pub(crate) fn note_scalar(&self, cp: u32) -> ParseResult<()> {
        if !self.wide && cp > 0xFF {
            Err(Fault::Restart(Restart::WidenUtf8))
        } else {
            Ok(())
        }
    }

    // Emission. In the sizing pass these only advance the counter; the
    // indices handed back are identical across passes by construction.

    fn len(&self) -> u32 {
        match &self.pass {
            Pass::Count(n) => *n,
            Pass::Emit(program) => program.len(),
        }
    }

    fn emit(&mut self, op: Op) -> u32 {
        match &mut self.pass {
            Pass::Count(n) => {
                let idx = *n;
                *n += 1;
                idx
            }
            Pass::Emit(program) => program.push(Inst::new(op)),
        }
    }

    fn insert_at(&mut self, idx: u32, op: Op) {
        match &mut self.pass {
            Pass::Count(n) => *n += 1,
            Pass::Emit(program) => program.insert(idx, Inst::new(op)),
        }
    }

    /// Points `idx` at `target`; `0` ends the chain. Write-only, so the
    /// sizing pass skips it without diverging.
    fn set_next(&mut self, idx: u32, target: u32) {
        if let Pass::Emit(program) = &mut self.pass {
            if target == 0 {
                program.clear_next(idx);
            } else {
                program.set_next(idx, target);
            }
        }
    }

    /// Fills in the body span of a construct header after its body has
    /// been emitted.
    fn set_span(&mut self, idx: u32, value: u32) {
        if let Pass::Emit(program) = &mut self.pass {
            match &mut program[idx].op {
                Op::Star { span, .. }
                | Op::Plus { span, .. }
                | Op::Curly { span, .. }
                | Op::Atomic { span }
                | Op::Look { span, .. }
                | Op::GroupCond { span, .. } => *span = value,
                other => panic!("span patch on a spanless instruction {:?}", other),
            }
        }
    }

    fn intern_set(&mut self, set: ClassSet) -> u32 {
        match self.sets.iter().position(|existing| *existing == set) {
            Some(idx) => idx as u32,
            None => {
                self.sets.push(set);
                (self.sets.len() - 1) as u32
            }
        }
    }

    /// Runs the whole grammar over the pattern, leaving the finished
    /// program (or instruction count) and side tables in the parser.
    pub(crate) fn parse(&mut self) -> ParseResult<()> {
        let chunk = self.parse_alternation(false)?;
        if self.peek() == Some(')') {
            return Err(self.error_at(ErrorKind::UnmatchedParen, self.pos));
        }
        let end = self.emit(Op::End);
        for tail in chunk.tails {
            self.set_next(tail, end);
        }
        self.validate_refs()
    }

    // The grammar: alternation -> concatenation -> quantified atom -> atom.

    /// Parses `concat ('|' concat)*`. With `reset` set, every arm numbers
    /// its capture groups from the same base and the final group count is
    /// the maximum across arms.
    fn parse_alternation(&mut self, reset: bool) -> ParseResult<Chunk> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error_at(ErrorKind::TooDeep, self.pos));
        }

        let saved_ctx = self.reset_ctx;
        let (base_groups, serial) = if reset {
            self.reset_serial += 1;
            self.reset_ctx = Some((self.reset_serial, 0));
            (self.groups, self.reset_serial)
        } else {
            (0, 0)
        };

        let first = self.parse_concat()?;
        let mut max_groups = self.groups;

        if self.peek() != Some('|') {
            self.reset_ctx = saved_ctx;
            self.depth -= 1;
            return Ok(first);
        }

        // The first arm is already emitted; its leading branch instruction
        // is spliced in front of it, shifting the arm body by one.
        let head = first.head;
        self.insert_at(head, Op::Branch);
        let mut tails: Vec<u32> = first.tails.into_iter().map(|tail| tail + 1).collect();

        let mut arm = 0u32;
        let mut prev_branch = head;
        while self.eat('|') {
            if reset {
                arm += 1;
                self.reset_ctx = Some((serial, arm));
                self.groups = base_groups;
            }
            let branch = self.emit(Op::Branch);
            self.set_next(prev_branch, branch);
            prev_branch = branch;

            let body = self.parse_concat()?;
            if reset {
                max_groups = max_groups.max(self.groups);
            }
            tails.extend(body.tails);
        }

        if reset {
            self.groups = max_groups;
        }
        self.reset_ctx = saved_ctx;
        self.depth -= 1;
        Ok(Chunk { head, tails })
    }

    /// Parses a run of quantified atoms, chaining each onto the previous.
    /// An empty concatenation becomes a single `Nothing`.
    fn parse_concat(&mut self) -> ParseResult<Chunk> {
        let mut acc: Option<Chunk> = None;
        loop {
            self.skip_trivia()?;
            match self.peek() {
                None | Some('|') | Some(')') => break,
                Some(_) => {}
            }
            let Some(item) = self.parse_quantified()? else {
                continue;
            };
            acc = Some(match acc {
                None => item,
                Some(prev) => {
                    for tail in prev.tails {
                        self.set_next(tail, item.head);
                    }
                    Chunk {
                        head: prev.head,
                        tails: item.tails,
                    }
                }
            });
        }
        Ok(match acc {
            Some(chunk) => chunk,
            None => Chunk::solo(self.emit(Op::Nothing)),
        })
    }

    /// Parses an atom and any quantifier attached to it. Returns `None`
    /// for constructs that leave no instructions behind, such as inline
    /// flag settings.
    fn parse_quantified(&mut self) -> ParseResult<Option<Chunk>> {
        let atom = self.parse_atom()?;

        self.skip_trivia()?;
        let quant_at = self.pos;
        let Some(quant) = self.scan_quantifier()? else {
            return Ok(atom.map(|(chunk, _)| chunk));
        };
        let Some((chunk, zero_width)) = atom else {
            return Err(self.error_at(ErrorKind::QuantifierWithoutTarget, quant_at));
        };
        if zero_width {
            self.warn_at(WarningKind::UselessQuantifier, quant_at);
        }

        let span = self.len() - chunk.head;
        let op = match quant.kind {
            QuantKind::Star => Op::Star {
                greedy: quant.greedy,
                span,
            },
            QuantKind::Plus => Op::Plus {
                greedy: quant.greedy,
                span,
            },
            QuantKind::Question => Op::Curly {
                min: 0,
                max: 1,
                greedy: quant.greedy,
                span,
            },
            QuantKind::Range { min, max } => {
                if max != UNBOUNDED && min > max {
                    return Err(
                        self.error_at(ErrorKind::BadQuantifierBounds { min, max }, quant.at)
                    );
                }
                Op::Curly {
                    min,
                    max,
                    greedy: quant.greedy,
                    span,
                }
            }
        };

        // The operand is already in place; the quantifier is spliced in
        // front of it and owns the following `span` instructions.
        let quant_idx = chunk.head;
        self.insert_at(quant_idx, op);
        let mut chunk = Chunk::solo(quant_idx);

        if quant.possessive {
            let end = self.emit(Op::AtomicEnd);
            self.set_next(quant_idx, end);
            self.insert_at(
                quant_idx,
                Op::Atomic {
                    span: end - quant_idx + 1,
                },
            );
            chunk = Chunk::solo(quant_idx);
        }

        self.skip_trivia()?;
        if self.quantifier_ahead() {
            return Err(self.error_at(ErrorKind::NestedQuantifier, self.pos));
        }
        Ok(Some(chunk))
    }

    /// Parses one atom. The boolean is true for zero-width constructs,
    /// which draw a warning when quantified.
    fn parse_atom(&mut self) -> ParseResult<Option<(Chunk, bool)>> {
        let at = self.pos;
        let c = match self.peek() {
            Some(c) => c,
            None => panic!("atom requested at end of input"),
        };
        match c {
            '(' => self.parse_group(at),
            '[' => {
                self.bump();
                let result = classes::parse_bracketed(self, at)?;
                let chunk = self.emit_class_result(result)?;
                Ok(Some((chunk, false)))
            }
            '.' => {
                self.bump();
                let op = if self.flags.contains(Flags::DOTALL) {
                    Op::AnyNewline
                } else {
                    Op::Any
                };
                Ok(Some((Chunk::solo(self.emit(op)), false)))
            }
            '^' => {
                self.bump();
                let op = if self.flags.contains(Flags::MULTILINE) {
                    Op::BeginLine
                } else {
                    Op::BeginText
                };
                Ok(Some((Chunk::solo(self.emit(op)), true)))
            }
            '$' => {
                self.bump();
                let op = if self.flags.contains(Flags::MULTILINE) {
                    Op::EndLine
                } else {
                    Op::EndTextNewline
                };
                Ok(Some((Chunk::solo(self.emit(op)), true)))
            }
            '*' | '+' | '?' => Err(self.error_at(ErrorKind::QuantifierWithoutTarget, at)),
            '{' if self.brace_quantifier_ahead() => {
                Err(self.error_at(ErrorKind::QuantifierWithoutTarget, at))
            }
            '\\' => {
                self.bump();
                self.parse_escape_atom()
            }
            _ => {
                let chunk = self.parse_literal_run()?;
                Ok(Some((chunk, false)))
            }
        }
    }

    fn parse_escape_atom(&mut self) -> ParseResult<Option<(Chunk, bool)>> {
        match self.scan_escape(false)? {
            Escape::Literal(c) => {
                self.note_scalar(c as u32)?;
                let mut text = String::new();
                self.push_folded(&mut text, c);
                let chunk = Chunk::solo(self.emit_literal_text(text));
                Ok(Some((chunk, false)))
            }
            Escape::Class(kind) => {
                let set = classes::shorthand_class(kind, self.charset());
                let id = self.intern_set(set);
                Ok(Some((Chunk::solo(self.emit(Op::Class(id))), false)))
            }
            Escape::Property { name, negated } => {
                let set = classes::property_class(name, negated);
                let id = self.intern_set(set);
                Ok(Some((Chunk::solo(self.emit(Op::Class(id))), false)))
            }
            Escape::Assert(op) => Ok(Some((Chunk::solo(self.emit(op)), true))),
            Escape::NotNewline => Ok(Some((Chunk::solo(self.emit(Op::Any)), false))),
            Escape::Backref { target, at } => {
                let group = match &target {
                    RefTarget::Group(n) => *n,
                    RefTarget::Name(name) => self.lookup_name(name),
                };
                self.pending.push(PendingRef { at, target });
                let fold = self.fold();
                let chunk = Chunk::solo(self.emit(Op::Backref { group, fold }));
                Ok(Some((chunk, false)))
            }
        }
    }

    /// Turns a finished class into instructions, re-parsing the
    /// replacement pattern when the class was rewritten away.
    fn emit_class_result(&mut self, result: ClassResult) -> ParseResult<Chunk> {
        match result {
            ClassResult::One(c) => {
                let mut text = String::new();
                self.push_folded(&mut text, c);
                Ok(Chunk::solo(self.emit_literal_text(text)))
            }
            ClassResult::All => Ok(Chunk::solo(self.emit(Op::AnyNewline))),
            ClassResult::NotNewline => Ok(Chunk::solo(self.emit(Op::Any))),
            ClassResult::Set(set) => {
                let id = self.intern_set(set);
                Ok(Chunk::solo(self.emit(Op::Class(id))))
            }
            ClassResult::Rewrite(text) => self.reparse(text),
        }
    }

    /// Parses compiler-generated replacement text in place of the
    /// construct that produced it. The generated text is always valid, so
    /// any error out of here indicates a rewriting bug.
    fn reparse(&mut self, text: String) -> ParseResult<Chunk> {
        let saved_input = std::mem::replace(&mut self.input, text.into_boxed_str());
        let saved_pos = std::mem::replace(&mut self.pos, 0);
        let result = self.parse_alternation(false);
        if result.is_ok() {
            assert!(self.peek().is_none(), "class rewrite not fully consumed");
        }
        self.input = saved_input;
        self.pos = saved_pos;
        result
    }

    // Groups.

    fn parse_group(&mut self, at: usize) -> ParseResult<Option<(Chunk, bool)>> {
        self.bump();
        if !self.eat('?') {
            self.groups += 1;
            let group = self.groups;
            let chunk = self.parse_capture_body(at, group)?;
            return Ok(Some((chunk, false)));
        }

        let Some(c) = self.peek() else {
            return Err(self.error_at(ErrorKind::UnterminatedGroup, at));
        };
        match c {
            ':' => {
                self.bump();
                let saved = self.flags;
                let body = self.parse_group_body(at);
                self.flags = saved;
                Ok(Some((body?, false)))
            }
            '[' => {
                self.bump();
                let result = classes::parse_set_expression(self, at)?;
                let chunk = self.emit_class_result(result)?;
                Ok(Some((chunk, false)))
            }
            '>' => {
                self.bump();
                let head = self.emit(Op::Atomic { span: 0 });
                let saved = self.flags;
                let body = self.parse_group_body(at);
                self.flags = saved;
                let body = body?;
                let end = self.emit(Op::AtomicEnd);
                for tail in body.tails {
                    self.set_next(tail, end);
                }
                self.set_span(head, self.len() - head - 1);
                Ok(Some((Chunk::solo(head), false)))
            }
            '=' => {
                self.bump();
                self.parse_look(at, LookKind::Ahead)
            }
            '!' => {
                self.bump();
                self.parse_look(at, LookKind::AheadNeg)
            }
            '<' => match self.peek_at(1) {
                Some('=') => {
                    self.bump();
                    self.bump();
                    self.parse_look(at, LookKind::Behind)
                }
                Some('!') => {
                    self.bump();
                    self.bump();
                    self.parse_look(at, LookKind::BehindNeg)
                }
                _ => {
                    self.bump();
                    self.parse_named_group(at, '>')
                }
            },
            '\'' => {
                self.bump();
                self.parse_named_group(at, '\'')
            }
            'P' => {
                if self.peek_at(1) == Some('<') {
                    self.bump();
                    self.bump();
                    self.parse_named_group(at, '>')
                } else {
                    Err(self.error_at(ErrorKind::BadGroupSyntax, at))
                }
            }
            '(' => {
                self.bump();
                self.parse_conditional(at)
            }
            'R' => {
                self.bump();
                self.expect(')', ErrorKind::BadGroupSyntax, at)?;
                Ok(Some((Chunk::solo(self.emit(Op::Gosub(0))), false)))
            }
            '0' => {
                self.bump();
                self.expect(')', ErrorKind::BadGroupSyntax, at)?;
                Ok(Some((Chunk::solo(self.emit(Op::Gosub(0))), false)))
            }
            '1'..='9' => {
                let ref_at = self.pos;
                let group = self.scan_number();
                self.expect(')', ErrorKind::BadGroupSyntax, at)?;
                self.pending.push(PendingRef {
                    at: ref_at,
                    target: RefTarget::Group(group),
                });
                Ok(Some((Chunk::solo(self.emit(Op::Gosub(group))), false)))
            }
            '+' | '-' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => {
                let ref_at = self.pos;
                let back = c == '-';
                self.bump();
                let n = self.scan_number();
                self.expect(')', ErrorKind::BadGroupSyntax, at)?;
                let group = if back {
                    if n == 0 || n > self.groups {
                        return Err(
                            self.error_at(ErrorKind::NonexistentGroup { reference: n }, ref_at)
                        );
                    }
                    self.groups - n + 1
                } else {
                    self.groups + n
                };
                self.pending.push(PendingRef {
                    at: ref_at,
                    target: RefTarget::Group(group),
                });
                Ok(Some((Chunk::solo(self.emit(Op::Gosub(group))), false)))
            }
            '&' => {
                self.bump();
                let name_at = self.pos;
                let name = self.scan_name_bare(name_at)?;
                self.expect(')', ErrorKind::UnterminatedName, at)?;
                let group = self.lookup_name(&name);
                self.pending.push(PendingRef {
                    at: name_at,
                    target: RefTarget::Name(name),
                });
                Ok(Some((Chunk::solo(self.emit(Op::Gosub(group))), false)))
            }
            '|' => {
                self.bump();
                let saved = self.flags;
                let body = self.parse_reset_body(at);
                self.flags = saved;
                Ok(Some((body?, false)))
            }
            '^' => {
                self.bump();
                let cleared = self.options.flags
                    & !(Flags::CASELESS | Flags::MULTILINE | Flags::DOTALL | Flags::EXTENDED);
                let flags = cleared | self.scan_flag_letters();
                self.finish_flag_group(at, flags)
            }
            'i' | 'm' | 's' | 'x' | '-' => {
                let mut flags = self.flags | self.scan_flag_letters();
                if self.eat('-') {
                    flags &= !self.scan_flag_letters();
                }
                self.finish_flag_group(at, flags)
            }
            _ => Err(self.error_at(ErrorKind::BadGroupSyntax, at)),
        }
    }

    /// Parses `...)` as a group body; the caller restores any scoped state.
    fn parse_group_body(&mut self, at: usize) -> ParseResult<Chunk> {
        let body = self.parse_alternation(false)?;
        if !self.eat(')') {
            return Err(self.error_at(ErrorKind::UnterminatedGroup, at));
        }
        Ok(body)
    }

    fn parse_reset_body(&mut self, at: usize) -> ParseResult<Chunk> {
        let body = self.parse_alternation(true)?;
        if !self.eat(')') {
            return Err(self.error_at(ErrorKind::UnterminatedGroup, at));
        }
        Ok(body)
    }

    fn parse_capture_body(&mut self, at: usize, group: u32) -> ParseResult<Chunk> {
        let open = self.emit(Op::Open(group));
        let saved = self.flags;
        let body = self.parse_group_body(at);
        self.flags = saved;
        let body = body?;
        let close = self.emit(Op::Close(group));
        self.set_next(open, body.head);
        for tail in body.tails {
            self.set_next(tail, close);
        }
        Ok(Chunk {
            head: open,
            tails: vec![close],
        })
    }

    fn parse_named_group(&mut self, at: usize, term: char) -> ParseResult<Option<(Chunk, bool)>> {
        let name_at = self.pos;
        let name = self.scan_name_bare(name_at)?;
        if !self.eat(term) {
            return Err(self.error_at(ErrorKind::UnterminatedName, self.pos));
        }
        self.groups += 1;
        let group = self.groups;
        self.declare_name(name, group, name_at)?;
        let chunk = self.parse_capture_body(at, group)?;
        Ok(Some((chunk, false)))
    }

    fn parse_look(
        &mut self,
        at: usize,
        kind: LookKind,
    ) -> ParseResult<Option<(Chunk, bool)>> {
        let head = self.emit(Op::Look { kind, span: 0 });
        let saved = self.flags;
        let body = self.parse_group_body(at);
        self.flags = saved;
        let body = body?;
        let end = self.emit(Op::LookEnd);
        for tail in body.tails {
            self.set_next(tail, end);
        }
        self.set_span(head, self.len() - head - 1);
        Ok(Some((Chunk::solo(head), true)))
    }

    /// Parses `(?(cond) then | else )`; the cursor sits just past the
    /// condition's opening parenthesis.
    fn parse_conditional(&mut self, at: usize) -> ParseResult<Option<(Chunk, bool)>> {
        let cond_at = self.pos;
        let group = match self.peek() {
            Some('0'..='9') => {
                let n = self.scan_number();
                self.pending.push(PendingRef {
                    at: cond_at,
                    target: RefTarget::Group(n),
                });
                n
            }
            Some('<') => {
                self.bump();
                let name = self.scan_name_bare(cond_at)?;
                if !self.eat('>') {
                    return Err(self.error_at(ErrorKind::UnterminatedName, self.pos));
                }
                let group = self.lookup_name(&name);
                self.pending.push(PendingRef {
                    at: cond_at,
                    target: RefTarget::Name(name),
                });
                group
            }
            Some('\'') => {
                self.bump();
                let name = self.scan_name_bare(cond_at)?;
                if !self.eat('\'') {
                    return Err(self.error_at(ErrorKind::UnterminatedName, self.pos));
                }
                let group = self.lookup_name(&name);
                self.pending.push(PendingRef {
                    at: cond_at,
                    target: RefTarget::Name(name),
                });
                group
            }
            _ => return Err(self.error_at(ErrorKind::BadConditional, cond_at)),
        };
        if !self.eat(')') {
            return Err(self.error_at(ErrorKind::BadConditional, cond_at));
        }

        let head = self.emit(Op::GroupCond { group, span: 0 });
        let then_branch = self.emit(Op::Branch);
        let saved = self.flags;
        let arms = self.parse_conditional_arms(at, then_branch);
        self.flags = saved;
        arms?;
        self.set_span(head, self.len() - head - 1);
        Ok(Some((Chunk::solo(head), false)))
    }

    fn parse_conditional_arms(&mut self, at: usize, then_branch: u32) -> ParseResult<()> {
        self.parse_concat()?;
        let else_branch = self.emit(Op::Branch);
        self.set_next(then_branch, else_branch);
        if self.eat('|') {
            self.parse_concat()?;
            if self.peek() == Some('|') {
                return Err(self.error_at(ErrorKind::BadConditional, self.pos));
            }
        } else {
            self.emit(Op::Nothing);
        }
        if !self.eat(')') {
            return Err(self.error_at(ErrorKind::UnterminatedGroup, at));
        }
        Ok(())
    }

    fn finish_flag_group(
        &mut self,
        at: usize,
        flags: Flags,
    ) -> ParseResult<Option<(Chunk, bool)>> {
        match self.peek() {
            Some(')') => {
                self.bump();
                // The bare form applies to the rest of the enclosing group.
                self.flags = flags;
                Ok(None)
            }
            Some(':') => {
                self.bump();
                let saved = self.flags;
                self.flags = flags;
                let body = self.parse_group_body(at);
                self.flags = saved;
                Ok(Some((body?, false)))
            }
            _ => Err(self.error_at(ErrorKind::BadGroupSyntax, at)),
        }
    }

    fn scan_flag_letters(&mut self) -> Flags {
        let mut flags = Flags::empty();
        while let Some(c) = self.peek() {
            flags |= match c {
                'i' => Flags::CASELESS,
                'm' => Flags::MULTILINE,
                's' => Flags::DOTALL,
                'x' => Flags::EXTENDED,
                _ => break,
            };
            self.bump();
        }
        flags
    }

    fn declare_name(&mut self, name: Box<str>, group: u32, at: usize) -> ParseResult<()> {
        if let Some(existing) = self.names.iter().find(|entry| entry.name == name) {
            let same_reset_other_arm = matches!(
                (existing.reset, self.reset_ctx),
                (Some((s1, a1)), Some((s2, a2))) if s1 == s2 && a1 != a2
            );
            if !same_reset_other_arm {
                return Err(self.error_at(ErrorKind::DuplicateGroupName, at));
            }
        }
        self.names.push(NameEntry {
            name,
            group,
            reset: self.reset_ctx,
        });
        Ok(())
    }

    /// The group index a name resolves to. The sizing pass sees only
    /// declarations so far, so a forward reference gets a placeholder that
    /// never lands anywhere; the emission pass has the finished table.
    fn lookup_name(&self, name: &str) -> u32 {
        self.resolved
            .iter()
            .find(|(n, _)| n.as_ref() == name)
            .map(|&(_, group)| group)
            .or_else(|| {
                self.names
                    .iter()
                    .find(|entry| entry.name.as_ref() == name)
                    .map(|entry| entry.group)
            })
            .unwrap_or(0)
    }

    fn validate_refs(&self) -> ParseResult<()> {
        for pending in &self.pending {
            match &pending.target {
                RefTarget::Group(n) => {
                    if *n == 0 || *n > self.groups {
                        return Err(self.error_at(
                            ErrorKind::NonexistentGroup { reference: *n },
                            pending.at,
                        ));
                    }
                }
                RefTarget::Name(name) => {
                    if !self.names.iter().any(|entry| entry.name == *name) {
                        return Err(self.error_at(ErrorKind::NonexistentGroupName, pending.at));
                    }
                }
            }
        }
        Ok(())
    }

    // Literal runs.

    /// Packs a maximal run of ordinary characters into one literal
    /// instruction. When a quantifier follows a run of two or more, the
    /// last character is given back so the quantifier binds to it alone.
    fn parse_literal_run(&mut self) -> ParseResult<Chunk> {
        let ceiling = self.options.config.exact_max_bytes;
        let mut text = String::new();
        let mut marks: Vec<(usize, usize)> = Vec::new();

        loop {
            self.skip_trivia()?;
            let at = self.pos;
            let Some(c) = self.peek() else { break };
            if self.at_run_boundary(c) {
                break;
            }
            if !text.is_empty() && text.len() + self.folded_len(c) > ceiling {
                break;
            }
            self.bump();
            self.note_scalar(c as u32)?;
            marks.push((at, text.len()));
            self.push_folded(&mut text, c);
        }

        if marks.len() >= 2 {
            self.skip_trivia()?;
            if self.quantifier_ahead() {
                let (at, text_len) = marks.pop().expect("run has at least two characters");
                self.pos = at;
                text.truncate(text_len);
            }
        }
        Ok(Chunk::solo(self.emit_literal_text(text)))
    }

    fn at_run_boundary(&self, c: char) -> bool {
        match c {
            '\\' | '[' | '(' | ')' | '|' | '.' | '^' | '$' | '*' | '+' | '?' => true,
            '{' => self.brace_quantifier_ahead(),
            _ => false,
        }
    }

    fn emit_literal_text(&mut self, text: String) -> u32 {
        let op = if self.fold() {
            Op::ExactFold {
                text: text.into_boxed_str(),
                fold_delta: 0,
            }
        } else {
            Op::Exact(text.into_boxed_str())
        };
        self.emit(op)
    }

    /// Appends the stored form of `c`: folded under caseless matching,
    /// expanded when it folds to a character sequence.
    fn push_folded(&self, text: &mut String, c: char) {
        if self.fold() {
            if self.wide {
                if let Some(seq) = registry().multi_char_fold(c) {
                    text.push_str(seq);
                    return;
                }
            }
            text.push(fold_key(c));
        } else {
            text.push(c);
        }
    }

    fn folded_len(&self, c: char) -> usize {
        if self.fold() {
            if self.wide {
                if let Some(seq) = registry().multi_char_fold(c) {
                    return seq.len();
                }
            }
            fold_key(c).len_utf8()
        } else {
            c.len_utf8()
        }
    }

    // Quantifier scanning.

    fn scan_quantifier(&mut self) -> ParseResult<Option<Quant>> {
        let at = self.pos;
        let kind = match self.peek() {
            Some('*') => {
                self.bump();
                QuantKind::Star
            }
            Some('+') => {
                self.bump();
                QuantKind::Plus
            }
            Some('?') => {
                self.bump();
                QuantKind::Question
            }
            Some('{') if self.brace_quantifier_ahead() => {
                self.bump();
                let min = self.scan_number();
                let max = if self.eat(',') {
                    if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                        self.scan_number()
                    } else {
                        UNBOUNDED
                    }
                } else {
                    min
                };
                self.bump();
                QuantKind::Range { min, max }
            }
            _ => return Ok(None),
        };
        let (greedy, possessive) = match self.peek() {
            Some('?') => {
                self.bump();
                (false, false)
            }
            Some('+') => {
                self.bump();
                (true, true)
            }
            _ => (true, false),
        };
        Ok(Some(Quant {
            kind,
            greedy,
            possessive,
            at,
        }))
    }

    fn quantifier_ahead(&self) -> bool {
        match self.peek() {
            Some('*') | Some('+') | Some('?') => true,
            Some('{') => self.brace_quantifier_ahead(),
            _ => false,
        }
    }

    /// Whether the cursor sits on a `{m}`, `{m,}` or `{m,n}` quantifier. A
    /// brace that does not fit that shape is an ordinary character.
    fn brace_quantifier_ahead(&self) -> bool {
        let mut chars = self.input[self.pos..].chars();
        if chars.next() != Some('{') {
            return false;
        }
        let mut c = chars.next();
        let mut digits = 0;
        while c.is_some_and(|c| c.is_ascii_digit()) {
            digits += 1;
            c = chars.next();
        }
        if digits == 0 {
            return false;
        }
        if c == Some(',') {
            c = chars.next();
            while c.is_some_and(|c| c.is_ascii_digit()) {
                c = chars.next();
            }
        }
        c == Some('}')
    }

    fn scan_number(&mut self) -> u32 {
        let mut n = 0u32;
        while let Some(c) = self.peek() {
            let Some(d) = c.to_digit(10) else { break };
            self.bump();
            n = n.saturating_mul(10).saturating_add(d);
        }
        n
    }

    /// Skips free-spacing whitespace and `#` comments when extended mode
    /// is active, and `(?#...)` comment groups always.
    fn skip_trivia(&mut self) -> ParseResult<()> {
        loop {
            if self.extended() {
                match self.peek() {
                    Some(c) if c.is_whitespace() => {
                        self.bump();
                        continue;
                    }
                    Some('#') => {
                        while !matches!(self.peek(), Some('\n') | None) {
                            self.bump();
                        }
                        continue;
                    }
                    _ => {}
                }
            }
            if self.input[self.pos..].starts_with("(?#") {
                let at = self.pos;
                self.pos += 3;
                loop {
                    match self.bump() {
                        Some(')') => break,
                        Some(_) => {}
                        None => return Err(self.error_at(ErrorKind::UnterminatedGroup, at)),
                    }
                }
                continue;
            }
            return Ok(());
        }
    }

    fn expect(&mut self, c: char, kind: ErrorKind, at: usize) -> ParseResult<()> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error_at(kind, at))
        }
    }

    // Escapes. The cursor sits just past the backslash on entry.

    pub(crate) fn scan_escape(&mut self, in_class: bool) -> ParseResult<Escape> {
        let at = self.pos;
        let Some(c) = self.bump() else {
            return Err(self.error_at(ErrorKind::UnterminatedEscape, at.saturating_sub(1)));
        };
        match c {
            'd' => Ok(Escape::Class(ClassEscape::Digit)),
            'D' => Ok(Escape::Class(ClassEscape::NotDigit)),
            'w' => Ok(Escape::Class(ClassEscape::Word)),
            'W' => Ok(Escape::Class(ClassEscape::NotWord)),
            's' => Ok(Escape::Class(ClassEscape::Space)),
            'S' => Ok(Escape::Class(ClassEscape::NotSpace)),
            'h' => Ok(Escape::Class(ClassEscape::Horizontal)),
            'H' => Ok(Escape::Class(ClassEscape::NotHorizontal)),
            'v' => Ok(Escape::Class(ClassEscape::Vertical)),
            'V' => Ok(Escape::Class(ClassEscape::NotVertical)),
            'p' | 'P' => self.scan_property(c == 'P', at),
            'n' => Ok(Escape::Literal('\n')),
            'r' => Ok(Escape::Literal('\r')),
            't' => Ok(Escape::Literal('\t')),
            'f' => Ok(Escape::Literal('\x0C')),
            'a' => Ok(Escape::Literal('\x07')),
            'e' => Ok(Escape::Literal('\x1B')),
            'x' => self.scan_hex(at),
            'o' => self.scan_braced_octal(at),
            'c' => self.scan_control(at),
            '0' => Ok(self.scan_octal_digits(0, 2)),
            'N' => self.scan_named_scalar(at, in_class),
            'b' if in_class => Ok(Escape::Literal('\x08')),
            'b' => Ok(Escape::Assert(Op::WordBoundary)),
            'B' if !in_class => Ok(Escape::Assert(Op::NotWordBoundary)),
            'A' if !in_class => Ok(Escape::Assert(Op::BeginText)),
            'z' if !in_class => Ok(Escape::Assert(Op::EndText)),
            'Z' if !in_class => Ok(Escape::Assert(Op::EndTextNewline)),
            'G' if !in_class => Ok(Escape::Assert(Op::RestartPos)),
            '1'..='7' if in_class => {
                let first = c.to_digit(8).expect("octal digit");
                Ok(self.scan_octal_digits(first, 2))
            }
            '8' | '9' if in_class => {
                self.warn_at(WarningKind::UnrecognizedEscape(c), at);
                Ok(Escape::Literal(c))
            }
            '1'..='9' => self.scan_backref_or_octal(c, at),
            'g' if !in_class => self.scan_g_reference(at),
            'k' if !in_class => self.scan_k_reference(at),
            _ if c.is_ascii_alphanumeric() => {
                self.warn_at(WarningKind::UnrecognizedEscape(c), at);
                Ok(Escape::Literal(c))
            }
            _ => Ok(Escape::Literal(c)),
        }
    }

    fn scan_property(&mut self, negated: bool, at: usize) -> ParseResult<Escape> {
        if self.eat('{') {
            let start = self.pos;
            while !matches!(self.peek(), Some('}') | None) {
                self.bump();
            }
            let name = self.slice(start, self.pos).to_owned();
            if !self.eat('}') {
                return Err(self.error_at(ErrorKind::UnterminatedEscape, at));
            }
            if name.is_empty() {
                return Err(self.error_at(ErrorKind::BadPropertyName, at));
            }
            Ok(Escape::Property {
                name: name.into_boxed_str(),
                negated,
            })
        } else {
            match self.bump() {
                Some(c) if c.is_ascii_alphabetic() => Ok(Escape::Property {
                    name: c.to_string().into_boxed_str(),
                    negated,
                }),
                Some(_) => Err(self.error_at(ErrorKind::BadPropertyName, at)),
                None => Err(self.error_at(ErrorKind::UnterminatedEscape, at)),
            }
        }
    }

    fn scan_hex(&mut self, at: usize) -> ParseResult<Escape> {
        if self.eat('{') {
            let mut cp = 0u32;
            let mut digits = 0;
            while let Some(d) = self.peek().and_then(|c| c.to_digit(16)) {
                self.bump();
                cp = cp.saturating_mul(16).saturating_add(d);
                digits += 1;
            }
            if !self.eat('}') {
                return Err(self.error_at(ErrorKind::UnterminatedEscape, at));
            }
            if digits == 0 {
                return Err(self.error_at(ErrorKind::BadEscape, at));
            }
            match char::from_u32(cp) {
                Some(c) => Ok(Escape::Literal(c)),
                None => Err(self.error_at(ErrorKind::BadEscape, at)),
            }
        } else {
            let mut cp = 0u32;
            for _ in 0..2 {
                let Some(d) = self.peek().and_then(|c| c.to_digit(16)) else {
                    break;
                };
                self.bump();
                cp = cp * 16 + d;
            }
            match char::from_u32(cp) {
                Some(c) => Ok(Escape::Literal(c)),
                None => Err(self.error_at(ErrorKind::BadEscape, at)),
            }
        }
    }

    fn scan_braced_octal(&mut self, at: usize) -> ParseResult<Escape> {
        if !self.eat('{') {
            return Err(self.error_at(ErrorKind::BadEscape, at));
        }
        let mut cp = 0u32;
        let mut digits = 0;
        while let Some(d) = self.peek().and_then(|c| c.to_digit(8)) {
            self.bump();
            cp = cp.saturating_mul(8).saturating_add(d);
            digits += 1;
        }
        if !self.eat('}') {
            return Err(self.error_at(ErrorKind::UnterminatedEscape, at));
        }
        if digits == 0 {
            return Err(self.error_at(ErrorKind::BadEscape, at));
        }
        match char::from_u32(cp) {
            Some(c) => Ok(Escape::Literal(c)),
            None => Err(self.error_at(ErrorKind::BadEscape, at)),
        }
    }

    fn scan_control(&mut self, at: usize) -> ParseResult<Escape> {
        match self.bump() {
            Some(c) if c.is_ascii() => {
                let cp = (c.to_ascii_uppercase() as u32) ^ 0x40;
                match char::from_u32(cp) {
                    Some(c) => Ok(Escape::Literal(c)),
                    None => Err(self.error_at(ErrorKind::BadEscape, at)),
                }
            }
            Some(_) => Err(self.error_at(ErrorKind::BadEscape, at)),
            None => Err(self.error_at(ErrorKind::UnterminatedEscape, at)),
        }
    }

    /// Consumes up to `more` further octal digits after `first`.
    fn scan_octal_digits(&mut self, first: u32, more: usize) -> Escape {
        let mut cp = first;
        for _ in 0..more {
            let Some(d) = self.peek().and_then(|c| c.to_digit(8)) else {
                break;
            };
            self.bump();
            cp = cp * 8 + d;
        }
        Escape::Literal(char::from_u32(cp).expect("three octal digits stay below U+0200"))
    }

    /// Disambiguates a digit escape outside classes: a backreference when
    /// single-digit or when the value does not exceed the groups opened so
    /// far, otherwise a legacy octal escape, otherwise an error.
    fn scan_backref_or_octal(&mut self, first: char, at: usize) -> ParseResult<Escape> {
        let mut digits = String::new();
        digits.push(first);
        while let Some(c) = self.peek().filter(|c| c.is_ascii_digit()) {
            self.bump();
            digits.push(c);
        }
        let value = digits
            .bytes()
            .fold(0u32, |n, b| n.saturating_mul(10).saturating_add((b - b'0') as u32));

        if digits.len() == 1 || value <= self.groups {
            Ok(Escape::Backref {
                target: RefTarget::Group(value),
                at,
            })
        } else if digits.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
            let take = digits.len().min(3);
            let cp = digits[..take]
                .bytes()
                .fold(0u32, |n, b| n * 8 + (b - b'0') as u32);
            // Surplus digits read back as ordinary literal text.
            self.pos = at + take;
            Ok(Escape::Literal(
                char::from_u32(cp).expect("three octal digits stay below U+0200"),
            ))
        } else {
            Err(self.error_at(ErrorKind::NonexistentGroup { reference: value }, at))
        }
    }

    fn scan_g_reference(&mut self, at: usize) -> ParseResult<Escape> {
        let braced = self.eat('{');
        let ref_at = self.pos;
        let target = match self.peek() {
            Some('-') => {
                self.bump();
                if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    return Err(self.error_at(ErrorKind::BadEscape, at));
                }
                let n = self.scan_number();
                if n == 0 || n > self.groups {
                    return Err(
                        self.error_at(ErrorKind::NonexistentGroup { reference: n }, ref_at)
                    );
                }
                RefTarget::Group(self.groups - n + 1)
            }
            Some(c) if c.is_ascii_digit() => RefTarget::Group(self.scan_number()),
            Some(c) if braced && (c == '_' || c.is_ascii_alphabetic()) => {
                RefTarget::Name(self.scan_name_bare(ref_at)?)
            }
            _ => return Err(self.error_at(ErrorKind::BadEscape, at)),
        };
        if braced && !self.eat('}') {
            return Err(self.error_at(ErrorKind::UnterminatedEscape, at));
        }
        Ok(Escape::Backref { target, at: ref_at })
    }

    fn scan_k_reference(&mut self, at: usize) -> ParseResult<Escape> {
        let term = match self.bump() {
            Some('<') => '>',
            Some('\'') => '\'',
            Some('{') => '}',
            Some(_) => return Err(self.error_at(ErrorKind::BadEscape, at)),
            None => return Err(self.error_at(ErrorKind::UnterminatedEscape, at)),
        };
        let ref_at = self.pos;
        let name = self.scan_name_bare(ref_at)?;
        if !self.eat(term) {
            return Err(self.error_at(ErrorKind::UnterminatedName, self.pos));
        }
        Ok(Escape::Backref {
            target: RefTarget::Name(name),
            at: ref_at,
        })
    }

    fn scan_named_scalar(&mut self, at: usize, in_class: bool) -> ParseResult<Escape> {
        if !self.eat('{') {
            return if in_class {
                Err(self.error_at(ErrorKind::BadEscape, at))
            } else {
                Ok(Escape::NotNewline)
            };
        }
        if !self.eat('U') || !self.eat('+') {
            return Err(self.error_at(ErrorKind::BadEscape, at));
        }
        let mut cp = 0u32;
        let mut digits = 0;
        while let Some(d) = self.peek().and_then(|c| c.to_digit(16)) {
            self.bump();
            cp = cp.saturating_mul(16).saturating_add(d);
            digits += 1;
        }
        if !self.eat('}') {
            return Err(self.error_at(ErrorKind::UnterminatedEscape, at));
        }
        if digits == 0 {
            return Err(self.error_at(ErrorKind::BadEscape, at));
        }
        match char::from_u32(cp) {
            Some(c) => Ok(Escape::Literal(c)),
            None => Err(self.error_at(ErrorKind::BadEscape, at)),
        }
    }

    /// Scans `[A-Za-z_][A-Za-z0-9_]*` without consuming any terminator.
    fn scan_name_bare(&mut self, at: usize) -> ParseResult<Box<str>> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c == '_' || c.is_ascii_alphabetic() => {
                self.bump();
            }
            _ => return Err(self.error_at(ErrorKind::BadGroupSyntax, at)),
        }
        while self
            .peek()
            .is_some_and(|c| c == '_' || c.is_ascii_alphanumeric())
        {
            self.bump();
        }
        Ok(self.slice(start, self.pos).to_owned().into_boxed_str())
    }
}
