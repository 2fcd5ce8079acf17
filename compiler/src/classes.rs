//! Provides compilation of character classes: bracketed `[...]` classes,
//! POSIX `[:name:]` atoms, `\p{...}` properties, the class shorthand
//! escapes, and the extended `(?[...])` set-expression grammar.
//!
//! Every path funnels into one representation, an inversion list plus any
//! properties whose membership is only known at run time. Case-fold
//! closure happens here, at compile time, so matchers never consult fold
//! tables; classes that touch a multi-character fold cannot be closed that
//! way and are instead rewritten into an alternation the caller re-parses.

use std::fmt::Write as _;
use std::sync::Arc;

use pattern_program::interval::InversionList;
use pattern_program::{Charset, ClassSet, DeferredProperty, WarningKind};

use crate::error::{ErrorKind, ParseResult};
use crate::parser::{ClassEscape, Escape, Parser, MAX_DEPTH};
use crate::unicode::registry;

/// What a class compiles down to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ClassResult {
    /// Exactly one code point; the caller emits it as a literal.
    One(char),
    /// Every code point; the caller emits the match-anything instruction.
    All,
    /// Every code point except newline; the caller emits the default
    /// dot instruction.
    NotNewline,
    /// The general case.
    Set(ClassSet),
    /// The class contains multi-character-fold participants under
    /// case-insensitive matching, and cannot be expressed as a set of
    /// single code points. The caller parses this replacement text in its
    /// place.
    Rewrite(String),
}

/// Accumulates one class while its items are scanned. Ranges are collected
/// unordered and only canonicalized at the end.
#[derive(Debug, Default)]
struct ClassParts {
    ranges: Vec<(u32, u32)>,
    deferred: Vec<DeferredProperty>,
    negated: bool,
}

impl ClassParts {
    fn add_cp(&mut self, cp: u32) {
        self.ranges.push((cp, cp));
    }

    fn add_range(&mut self, lo: u32, hi: u32) {
        self.ranges.push((lo, hi));
    }

    fn add_list(&mut self, list: &InversionList) {
        self.ranges.extend(list.ranges());
    }

    fn add_deferred(&mut self, prop: DeferredProperty) {
        self.deferred.push(prop);
    }

    /// Canonicalizes the collected ranges and closes them under simple
    /// case folding. Returns the positive list; negation is still the
    /// caller's to apply.
    fn into_list_folded(
        self,
        fold: bool,
        wide: bool,
        ascii_fold: bool,
    ) -> (InversionList, Vec<DeferredProperty>, bool) {
        let mut list = InversionList::from_ranges(self.ranges);
        if fold {
            list = close_under_fold(list, wide, ascii_fold);
        }
        (list, self.deferred, self.negated)
    }
}

/// Expands a list with every simple-fold partner of its members. Partners
/// outside the active width or charset do not apply.
fn close_under_fold(list: InversionList, wide: bool, ascii_fold: bool) -> InversionList {
    let ceiling = if ascii_fold {
        0x7F
    } else if wide {
        pattern_program::interval::MAX_CODE_POINT
    } else {
        0xFF
    };

    let mut extra: Vec<(u32, u32)> = Vec::new();
    for cp in list.intersect(registry().foldable()).code_points() {
        let Some(c) = char::from_u32(cp) else { continue };
        if let Some(orbit) = registry().fold_orbit(c) {
            for &member in orbit {
                if member != cp && member <= ceiling {
                    extra.push((member, member));
                }
            }
        }
    }
    if extra.is_empty() {
        list
    } else {
        extra.extend(list.ranges());
        InversionList::from_ranges(extra)
    }
}

/// Compiles a bracketed class. Entered just past the `[`; `start` is the
/// byte offset of the `[` itself.
pub(crate) fn parse_bracketed(p: &mut Parser, start: usize) -> ParseResult<ClassResult> {
    let parts = parse_class_body(p, start)?;
    let fold = p.fold();
    let (mut list, deferred, negated) =
        parts.into_list_folded(fold, p.wide(), p.ascii_fold());

    if fold && p.wide() && !negated && !list.intersect(registry().mcf_members()).is_empty() {
        return Ok(ClassResult::Rewrite(render_rewrite(&list, &deferred)));
    }

    let negated = if negated && deferred.is_empty() {
        list.invert();
        false
    } else {
        negated
    };

    Ok(classify(list, deferred, negated))
}

/// Picks the most specific representation for a finished class.
fn classify(list: InversionList, deferred: Vec<DeferredProperty>, negated: bool) -> ClassResult {
    if deferred.is_empty() && !negated {
        if let Some(cp) = list.single_code_point() {
            if let Some(c) = char::from_u32(cp) {
                return ClassResult::One(c);
            }
        }
        if list.is_full() {
            return ClassResult::All;
        }
        if is_all_but_newline(&list) {
            return ClassResult::NotNewline;
        }
    }
    ClassResult::Set(ClassSet {
        list: Arc::new(list),
        deferred,
        negated,
    })
}

/// True when the complement of `list` is exactly the newline character.
fn is_all_but_newline(list: &InversionList) -> bool {
    list.range_count() == 2
        && list.contains(0)
        && list.contains(0x09)
        && !list.contains(0x0A)
        && list.contains(0x0B)
        && list.contains(pattern_program::interval::MAX_CODE_POINT)
}

/// One scanned class item: either a single code point (eligible as a range
/// endpoint) or a multi-member contribution already folded into `parts`.
enum ClassAtom {
    Char(u32),
    Multi,
}

fn parse_class_body(p: &mut Parser, start: usize) -> ParseResult<ClassParts> {
    let mut parts = ClassParts::default();
    if p.eat('^') {
        parts.negated = true;
    }

    let mut first = true;
    let mut pending: Option<u32> = None;
    loop {
        let at = p.pos();
        let Some(c) = p.peek() else {
            return Err(p.error_at(ErrorKind::UnterminatedClass, start));
        };

        if c == ']' && !first {
            p.bump();
            if let Some(cp) = pending.take() {
                parts.add_cp(cp);
            }
            return Ok(parts);
        }
        first = false;

        // A `-` between two single endpoints forms a range; elsewhere it
        // is an ordinary member.
        if c == '-' && pending.is_some() && !matches!(p.peek_at(1), Some(']') | None) {
            p.bump();
            let hi_at = p.pos();
            match parse_class_atom(p, &mut parts, hi_at)? {
                ClassAtom::Char(hi) => {
                    if let Some(lo) = pending.take() {
                        if hi < lo {
                            p.warn_at(WarningKind::ReversedRange, at);
                            parts.add_cp(lo);
                            parts.add_cp('-' as u32);
                            parts.add_cp(hi);
                        } else {
                            parts.add_range(lo, hi);
                        }
                    }
                }
                ClassAtom::Multi => {
                    // A range whose upper end is itself a class: both the
                    // pending endpoint and the dash are literal members.
                    if let Some(lo) = pending.take() {
                        parts.add_cp(lo);
                    }
                    parts.add_cp('-' as u32);
                }
            }
            continue;
        }

        match parse_class_atom(p, &mut parts, at)? {
            ClassAtom::Char(cp) => {
                if let Some(prev) = pending.replace(cp) {
                    parts.add_cp(prev);
                }
            }
            ClassAtom::Multi => {
                if let Some(prev) = pending.take() {
                    parts.add_cp(prev);
                }
            }
        }
    }
}

fn parse_class_atom(
    p: &mut Parser,
    parts: &mut ClassParts,
    at: usize,
) -> ParseResult<ClassAtom> {
    match p.bump() {
        Some('[') => match p.peek() {
            Some(':') => {
                parse_posix(p, parts, at)?;
                Ok(ClassAtom::Multi)
            }
            // Collating and equivalence classes are recognized but not
            // supported.
            Some('=') | Some('.') => Err(p.error_at(ErrorKind::BadPosixClass, at)),
            _ => {
                p.note_scalar('[' as u32)?;
                Ok(ClassAtom::Char('[' as u32))
            }
        },
        Some('\\') => match p.scan_escape(true)? {
            Escape::Literal(c) => {
                p.note_scalar(c as u32)?;
                Ok(ClassAtom::Char(c as u32))
            }
            Escape::Class(kind) => {
                let (list, deferred) = shorthand_parts(kind, p.charset());
                if let Some(list) = list {
                    parts.add_list(&list);
                }
                if let Some(prop) = deferred {
                    parts.add_deferred(prop);
                }
                Ok(ClassAtom::Multi)
            }
            Escape::Property { name, negated } => {
                match registry().property(&name) {
                    Some(list) if negated => {
                        let mut complement = (*list).clone();
                        complement.invert();
                        parts.add_list(&complement);
                    }
                    Some(list) => parts.add_list(&list),
                    None => parts.add_deferred(DeferredProperty { name, negated }),
                }
                Ok(ClassAtom::Multi)
            }
            _ => panic!("escape form not reachable inside a class"),
        },
        Some(c) => {
            p.note_scalar(c as u32)?;
            Ok(ClassAtom::Char(c as u32))
        }
        None => Err(p.error_at(ErrorKind::UnterminatedClass, at)),
    }
}

/// Parses `[:name:]` or `[:^name:]`; entered just past the inner `[` with
/// the cursor on `:`. `at` is the offset of that `[`.
fn parse_posix(p: &mut Parser, parts: &mut ClassParts, at: usize) -> ParseResult<()> {
    p.bump();
    let negated = p.eat('^');
    let name_start = p.pos();
    while p.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
        p.bump();
    }
    let name = p.slice(name_start, p.pos()).to_owned();
    if !p.eat(':') || !p.eat(']') {
        return Err(p.error_at(ErrorKind::BadPosixClass, at));
    }

    match posix_parts(&name, negated, p.charset()) {
        Some((list, deferred)) => {
            if let Some(list) = list {
                parts.add_list(&list);
            }
            if let Some(prop) = deferred {
                parts.add_deferred(prop);
            }
            Ok(())
        }
        None => Err(p.error_at(ErrorKind::BadPosixClass, at)),
    }
}

/// Resolves a POSIX class name for the active charset. Under `Locale` the
/// whole class is deferred to run time; the name set is still validated
/// here.
fn posix_parts(
    name: &str,
    negated: bool,
    charset: Charset,
) -> Option<(Option<InversionList>, Option<DeferredProperty>)> {
    let base = registry().posix(name)?;
    match charset {
        Charset::Locale => Some((
            None,
            Some(DeferredProperty {
                name: name.to_ascii_lowercase().into_boxed_str(),
                negated,
            }),
        )),
        Charset::Ascii => {
            let mut list = base.intersect(&registry().ascii());
            if negated {
                list.invert();
            }
            Some((Some(list), None))
        }
        Charset::Unicode => {
            let list = if negated {
                let mut complement = (*base).clone();
                complement.invert();
                complement
            } else {
                (*base).clone()
            };
            Some((Some(list), None))
        }
    }
}

/// Resolves a shorthand escape (`\d`, `\W`, `\h`, ...) for the active
/// charset. The horizontal and vertical space classes are fixed lists and
/// never vary by charset.
fn shorthand_parts(
    kind: ClassEscape,
    charset: Charset,
) -> (Option<InversionList>, Option<DeferredProperty>) {
    use ClassEscape::*;

    let (base, name, negated) = match kind {
        Digit => (registry().digit(), "digit", false),
        NotDigit => (registry().digit(), "digit", true),
        Word => (registry().word(), "word", false),
        NotWord => (registry().word(), "word", true),
        Space => (registry().space(), "space", false),
        NotSpace => (registry().space(), "space", true),
        Horizontal => (registry().horizontal_space(), "horizspace", false),
        NotHorizontal => (registry().horizontal_space(), "horizspace", true),
        Vertical => (registry().vertical_space(), "vertspace", false),
        NotVertical => (registry().vertical_space(), "vertspace", true),
    };
    let charset_sensitive = !matches!(kind, Horizontal | NotHorizontal | Vertical | NotVertical);

    match charset {
        Charset::Locale if charset_sensitive => (
            None,
            Some(DeferredProperty {
                name: name.into(),
                negated,
            }),
        ),
        Charset::Ascii if charset_sensitive => {
            let mut list = base.intersect(&registry().ascii());
            if negated {
                list.invert();
            }
            (Some(list), None)
        }
        _ => {
            let mut list = (*base).clone();
            if negated {
                list.invert();
            }
            (Some(list), None)
        }
    }
}

/// The class a shorthand escape stands for at atom level, outside any
/// bracketed class.
pub(crate) fn shorthand_class(kind: ClassEscape, charset: Charset) -> ClassSet {
    let (list, deferred) = shorthand_parts(kind, charset);
    ClassSet {
        list: Arc::new(list.unwrap_or_default()),
        deferred: deferred.into_iter().collect(),
        negated: false,
    }
}

/// The class a `\p{...}` / `\P{...}` escape stands for at atom level.
/// Unknown names are not errors; they defer to the runtime lookup service.
pub(crate) fn property_class(name: Box<str>, negated: bool) -> ClassSet {
    match registry().property(&name) {
        Some(list) if negated => {
            let mut complement = (*list).clone();
            complement.invert();
            ClassSet {
                list: Arc::new(complement),
                deferred: Vec::new(),
                negated: false,
            }
        }
        Some(list) => ClassSet {
            list,
            deferred: Vec::new(),
            negated: false,
        },
        None => ClassSet {
            list: Arc::new(InversionList::new()),
            deferred: vec![DeferredProperty { name, negated }],
            negated: false,
        },
    }
}

/// Renders the replacement pattern for a class that touches
/// multi-character folds: each distinct expansion sequence as an
/// alternation arm, then the closed single-character residue with folding
/// turned off so the re-parse terminates.
fn render_rewrite(list: &InversionList, deferred: &[DeferredProperty]) -> String {
    let mut out = String::from("(?:");

    let mut seen: Vec<&str> = Vec::new();
    for cp in list.intersect(registry().mcf_members()).code_points() {
        if let Some(seq) = char::from_u32(cp).and_then(|c| registry().multi_char_fold(c)) {
            if !seen.contains(&seq) {
                seen.push(seq);
                out.push_str(seq);
                out.push('|');
            }
        }
    }

    out.push_str("(?-i:[");
    for (lo, hi) in list.ranges() {
        if lo == hi {
            let _ = write!(out, "\\x{{{:X}}}", lo);
        } else {
            let _ = write!(out, "\\x{{{:X}}}-\\x{{{:X}}}", lo, hi);
        }
    }
    for prop in deferred {
        let _ = write!(
            out,
            "\\{}{{{}}}",
            if prop.negated { 'P' } else { 'p' },
            prop.name
        );
    }
    out.push_str("]))");
    out
}

const SET_OPEN: u8 = b'(';
const SET_NOT: u8 = b'!';

/// Compiles an extended `(?[...])` set expression. Entered just past the
/// opening `(?[`; `start` is the byte offset of the `(`.
///
/// Operands and operators are kept on explicit stacks; every binary
/// operator has the same precedence and associates left, so each new
/// operand immediately reduces against whatever operator is pending.
/// Whitespace and `#` comments are always skipped here, whatever the
/// surrounding mode.
pub(crate) fn parse_set_expression(p: &mut Parser, start: usize) -> ParseResult<ClassResult> {
    let mut values: Vec<InversionList> = Vec::new();
    let mut ops: Vec<u8> = Vec::new();
    let mut expect_operand = true;

    loop {
        skip_set_whitespace(p);
        let at = p.pos();
        let Some(c) = p.peek() else {
            return Err(p.error_at(ErrorKind::UnterminatedClass, start));
        };
        match c {
            ']' => {
                p.bump();
                break;
            }
            '!' if expect_operand => {
                p.bump();
                ops.push(SET_NOT);
            }
            '(' if expect_operand => {
                p.bump();
                if ops.iter().filter(|&&op| op == SET_OPEN).count() >= MAX_DEPTH {
                    return Err(p.error_at(ErrorKind::TooDeep, at));
                }
                ops.push(SET_OPEN);
            }
            ')' if !expect_operand => {
                p.bump();
                if ops.pop() != Some(SET_OPEN) {
                    return Err(p.error_at(ErrorKind::BadSetExpression, at));
                }
                let value = match values.pop() {
                    Some(value) => value,
                    None => panic!("set expression group closed without a value"),
                };
                reduce(&mut values, &mut ops, value);
            }
            '&' | '|' | '+' | '-' | '^' if !expect_operand => {
                p.bump();
                ops.push(c as u8);
                expect_operand = true;
            }
            '[' if expect_operand => {
                p.bump();
                let value = set_operand_bracketed(p, at)?;
                reduce(&mut values, &mut ops, value);
                expect_operand = false;
            }
            '\\' if expect_operand => {
                p.bump();
                let value = set_operand_escape(p, at)?;
                reduce(&mut values, &mut ops, value);
                expect_operand = false;
            }
            _ => return Err(p.error_at(ErrorKind::BadSetExpression, at)),
        }
    }

    let end = p.pos();
    if !p.eat(')') {
        return Err(p.error_at(ErrorKind::UnterminatedGroup, start));
    }
    if expect_operand || !ops.is_empty() || values.len() != 1 {
        return Err(p.error_at(ErrorKind::BadSetExpression, end));
    }
    let list = match values.pop() {
        Some(list) => list,
        None => panic!("set expression finished without a value"),
    };

    if p.fold()
        && p.wide()
        && !list.intersect(registry().mcf_members()).is_empty()
    {
        return Ok(ClassResult::Rewrite(render_rewrite(&list, &[])));
    }
    Ok(classify(list, Vec::new(), false))
}

/// Folds a freshly scanned operand into the stacks: complements bind
/// tightest, then the pending binary operator reduces immediately.
fn reduce(values: &mut Vec<InversionList>, ops: &mut Vec<u8>, mut value: InversionList) {
    while ops.last() == Some(&SET_NOT) {
        ops.pop();
        value.invert();
    }
    if let Some(&op) = ops.last() {
        if op != SET_OPEN {
            ops.pop();
            let lhs = match values.pop() {
                Some(lhs) => lhs,
                None => panic!("set expression operator without a left operand"),
            };
            value = apply_set_op(&lhs, op, &value);
        }
    }
    values.push(value);
}

fn apply_set_op(lhs: &InversionList, op: u8, rhs: &InversionList) -> InversionList {
    match op {
        b'&' => lhs.intersect(rhs),
        b'|' | b'+' => lhs.union(rhs),
        b'-' => lhs.subtract(rhs),
        b'^' => lhs.symmetric_difference(rhs),
        _ => panic!("unknown set operator {:?}", op as char),
    }
}

/// A bracketed class used as a set-expression operand. Deferred
/// properties have no value to combine, so they are rejected here.
fn set_operand_bracketed(p: &mut Parser, at: usize) -> ParseResult<InversionList> {
    let parts = parse_class_body(p, at)?;
    let (mut list, deferred, negated) =
        parts.into_list_folded(p.fold(), p.wide(), p.ascii_fold());
    if !deferred.is_empty() {
        return Err(p.error_at(ErrorKind::BadPropertyName, at));
    }
    if negated {
        list.invert();
    }
    Ok(list)
}

/// An escape used directly as a set-expression operand: a property, a
/// shorthand class, or a single escaped character.
fn set_operand_escape(p: &mut Parser, at: usize) -> ParseResult<InversionList> {
    match p.scan_escape(true)? {
        Escape::Literal(c) => {
            p.note_scalar(c as u32)?;
            let list = InversionList::from_ranges([(c as u32, c as u32)]);
            Ok(close_under_fold_if(p, list))
        }
        Escape::Class(kind) => match shorthand_parts(kind, p.charset()) {
            (Some(list), None) => Ok(close_under_fold_if(p, list)),
            _ => Err(p.error_at(ErrorKind::BadSetExpression, at)),
        },
        Escape::Property { name, negated } => match registry().property(&name) {
            Some(base) => {
                let mut list = (*base).clone();
                if negated {
                    list.invert();
                }
                Ok(close_under_fold_if(p, list))
            }
            None => Err(p.error_at(ErrorKind::BadPropertyName, at)),
        },
        _ => panic!("escape form not reachable inside a set expression"),
    }
}

fn close_under_fold_if(p: &Parser, list: InversionList) -> InversionList {
    if p.fold() {
        close_under_fold(list, p.wide(), p.ascii_fold())
    } else {
        list
    }
}

fn skip_set_whitespace(p: &mut Parser) {
    while let Some(c) = p.peek() {
        if c.is_whitespace() {
            p.bump();
        } else if c == '#' {
            while !matches!(p.peek(), Some('\n') | None) {
                p.bump();
            }
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pattern_program::{Flags, Options};

    fn parser(rest: &str) -> Parser {
        Parser::new(rest, Options::default(), true)
    }

    fn caseless_parser(rest: &str) -> Parser {
        let options = Options {
            flags: Flags::CASELESS,
            ..Options::default()
        };
        Parser::new(rest, options, true)
    }

    fn expect_set(result: ClassResult) -> ClassSet {
        match result {
            ClassResult::Set(set) => set,
            other => panic!("expected a set, got {:?}", other),
        }
    }

    fn expect_user_error(result: ParseResult<ClassResult>) -> ErrorKind {
        match result {
            Err(crate::error::Fault::User(e)) => e.kind(),
            other => panic!("expected an error, got {:?}", other),
        }
    }

    #[test]
    fn should_collect_ranges_and_singletons() {
        let mut p = parser("a-cx-z]");
        let set = expect_set(parse_bracketed(&mut p, 0).unwrap());

        assert_eq!(set.list.range_count(), 2);
        assert_eq!(set.contains('b' as u32), Some(true));
        assert_eq!(set.contains('w' as u32), Some(false));
        assert_eq!(set.contains('z' as u32), Some(true));
    }

    #[test]
    fn should_treat_a_leading_bracket_close_as_literal() {
        let mut p = parser("]a]");
        let set = expect_set(parse_bracketed(&mut p, 0).unwrap());

        assert_eq!(set.contains(']' as u32), Some(true));
        assert_eq!(set.contains('a' as u32), Some(true));
        assert_eq!(set.contains('b' as u32), Some(false));
    }

    #[test]
    fn should_keep_edge_dashes_literal() {
        let mut p = parser("-a-]");
        let set = expect_set(parse_bracketed(&mut p, 0).unwrap());

        assert_eq!(set.contains('-' as u32), Some(true));
        assert_eq!(set.contains('a' as u32), Some(true));
        assert_eq!(set.list.range_count(), 2);
    }

    #[test]
    fn should_warn_and_keep_literals_for_a_reversed_range() {
        let mut p = parser("z-a]");
        let set = expect_set(parse_bracketed(&mut p, 0).unwrap());

        assert_eq!(set.contains('z' as u32), Some(true));
        assert_eq!(set.contains('a' as u32), Some(true));
        assert_eq!(set.contains('-' as u32), Some(true));
        assert_eq!(set.contains('m' as u32), Some(false));
        assert_eq!(p.warnings().len(), 1);
        assert!(matches!(
            p.warnings()[0].kind,
            WarningKind::ReversedRange
        ));
    }

    #[test]
    fn should_resolve_posix_classes() {
        let mut p = parser("[:digit:]x]");
        let set = expect_set(parse_bracketed(&mut p, 0).unwrap());

        assert_eq!(set.contains('5' as u32), Some(true));
        assert_eq!(set.contains('x' as u32), Some(true));
        assert_eq!(set.contains('y' as u32), Some(false));
    }

    #[test]
    fn should_invert_a_negated_class_directly() {
        let mut p = parser("^[:digit:]]");
        let set = expect_set(parse_bracketed(&mut p, 0).unwrap());

        assert!(!set.negated);
        assert_eq!(set.contains('a' as u32), Some(true));
        assert_eq!(set.contains('5' as u32), Some(false));
    }

    #[test]
    fn should_reject_unknown_posix_names() {
        let input_output = vec![
            ("[:frob:]]", ErrorKind::BadPosixClass),
            ("[:digit]", ErrorKind::BadPosixClass),
            ("[=a=]]", ErrorKind::BadPosixClass),
        ];
        for (test_id, (rest, expected)) in input_output.into_iter().enumerate() {
            let mut p = parser(rest);
            let got = expect_user_error(parse_bracketed(&mut p, 0));
            assert_eq!((test_id, expected), (test_id, got));
        }
    }

    #[test]
    fn should_error_on_an_unterminated_class() {
        let mut p = parser("abc");
        assert_eq!(
            expect_user_error(parse_bracketed(&mut p, 0)),
            ErrorKind::UnterminatedClass
        );
    }

    #[test]
    fn should_special_case_single_and_universal_classes() {
        let mut p = parser("x]");
        assert_eq!(parse_bracketed(&mut p, 0).unwrap(), ClassResult::One('x'));

        let mut p = parser("\\x{0}-\\x{10FFFF}]");
        assert_eq!(parse_bracketed(&mut p, 0).unwrap(), ClassResult::All);

        let mut p = parser("^\\n]");
        assert_eq!(
            parse_bracketed(&mut p, 0).unwrap(),
            ClassResult::NotNewline
        );
    }

    #[test]
    fn should_close_classes_under_case_folding() {
        let mut p = caseless_parser("k]");
        let set = expect_set(parse_bracketed(&mut p, 0).unwrap());

        assert_eq!(set.contains('K' as u32), Some(true));
        assert_eq!(set.contains(0x212A), Some(true));

        // The narrow encoding cannot reach the Kelvin sign.
        let options = Options {
            flags: Flags::CASELESS,
            ..Options::default()
        };
        let mut p = Parser::new("k]", options, false);
        let set = expect_set(parse_bracketed(&mut p, 0).unwrap());
        assert_eq!(set.contains('K' as u32), Some(true));
        assert_eq!(set.contains(0x212A), Some(false));
    }

    #[test]
    fn should_rewrite_classes_touching_multi_character_folds() {
        let mut p = caseless_parser("\u{DF}]");
        match parse_bracketed(&mut p, 0).unwrap() {
            ClassResult::Rewrite(text) => {
                assert!(text.starts_with("(?:ss|"), "got {:?}", text);
                assert!(text.contains("(?-i:["), "got {:?}", text);
            }
            other => panic!("expected a rewrite, got {:?}", other),
        }
    }

    #[test]
    fn should_not_rewrite_negated_classes() {
        let mut p = caseless_parser("^\u{DF}]");
        let set = expect_set(parse_bracketed(&mut p, 0).unwrap());
        assert_eq!(set.contains('\u{DF}' as u32), Some(false));
        assert_eq!(set.contains('\u{1E9E}' as u32), Some(false));
        assert_eq!(set.contains('a' as u32), Some(true));
    }

    #[test]
    fn should_defer_unknown_properties() {
        let mut p = parser("\\p{Frobnitz}]");
        let set = expect_set(parse_bracketed(&mut p, 0).unwrap());
        assert_eq!(set.deferred.len(), 1);
        assert!(!set.negated);
        assert_eq!(set.contains('a' as u32), None);

        let mut p = parser("^\\p{Frobnitz}]");
        let set = expect_set(parse_bracketed(&mut p, 0).unwrap());
        assert!(set.negated);
    }

    #[test]
    fn should_combine_set_expression_operands() {
        let mut p = parser(" [a-z] & [x-z] ])");
        let set = expect_set(parse_set_expression(&mut p, 0).unwrap());
        assert_eq!(set.contains('y' as u32), Some(true));
        assert_eq!(set.contains('a' as u32), Some(false));

        let mut p = parser(" [a-d] - [b] ])");
        let set = expect_set(parse_set_expression(&mut p, 0).unwrap());
        assert_eq!(set.contains('a' as u32), Some(true));
        assert_eq!(set.contains('b' as u32), Some(false));

        let mut p = parser(" [a] + [b] ^ [b-c] ])");
        let set = expect_set(parse_set_expression(&mut p, 0).unwrap());
        assert_eq!(set.contains('a' as u32), Some(true));
        assert_eq!(set.contains('b' as u32), Some(false));
        assert_eq!(set.contains('c' as u32), Some(true));
    }

    #[test]
    fn should_complement_and_group_set_operands() {
        let mut p = parser(" ![a] ])");
        let set = expect_set(parse_set_expression(&mut p, 0).unwrap());
        assert_eq!(set.contains('a' as u32), Some(false));
        assert_eq!(set.contains('b' as u32), Some(true));

        let mut p = parser(" [a-z] - ( [a-c] | [x-z] ) ])");
        let set = expect_set(parse_set_expression(&mut p, 0).unwrap());
        assert_eq!(set.contains('m' as u32), Some(true));
        assert_eq!(set.contains('b' as u32), Some(false));
        assert_eq!(set.contains('y' as u32), Some(false));
    }

    #[test]
    fn should_skip_whitespace_and_comments_in_set_expressions() {
        let mut p = parser(" [a] # just the letter\n | [b] ])");
        let set = expect_set(parse_set_expression(&mut p, 0).unwrap());
        assert_eq!(set.contains('a' as u32), Some(true));
        assert_eq!(set.contains('b' as u32), Some(true));
    }

    #[test]
    fn should_reject_malformed_set_expressions() {
        let input_output = vec![
            (" [a] [b] ])", ErrorKind::BadSetExpression),
            (" & [a] ])", ErrorKind::BadSetExpression),
            (" [a] & ])", ErrorKind::BadSetExpression),
            (" ( [a] ])", ErrorKind::BadSetExpression),
            (" \\p{Frobnitz} ])", ErrorKind::BadPropertyName),
            (" \\w ])", ErrorKind::BadSetExpression),
        ];
        for (test_id, (rest, expected)) in input_output.into_iter().enumerate() {
            let options = Options {
                charset: Charset::Locale,
                ..Options::default()
            };
            let mut p = Parser::new(rest, options, true);
            let got = expect_user_error(parse_set_expression(&mut p, 0));
            assert_eq!((test_id, expected), (test_id, got));
        }
    }
}
