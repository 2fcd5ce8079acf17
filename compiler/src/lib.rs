//! Provides for the compilation of a textual pattern into its corresponding
//! matchable program and search anchors.
//!
//! # Example
//!
//! ```rust
//! // Compilation is accomplished by a single function taking the pattern
//! // text and the options it should be compiled under.
//! use pattern_compiler::{compile, Options};
//!
//! // A standard pattern: three literal alternatives sharing a prefix.
//! let pattern = compile("abc|abd|abe", Options::default())
//!     .expect("failed to compile");
//!
//! // The alternation collapses into a trie behind the factored `ab`
//! // prefix, and the study pass derives the anchors a matcher uses to
//! // reject non-matching start positions cheaply.
//! assert_eq!(3, pattern.min_len);
//!
//! let required = pattern
//!     .anchored_substring
//!     .as_ref()
//!     .expect("a required substring at a fixed offset");
//! assert_eq!(("ab", 0), (&*required.text, required.min_offset));
//! ```

mod classes;
pub mod error;
mod join;
mod parser;
mod study;
mod trie;
mod unicode;

pub use error::{Error, ErrorKind};
pub use pattern_program::{
    Charset, CompiledPattern, Config, Flags, Options, StartClass, Substring, Warning,
    WarningKind,
};

use crate::error::{Fault, Restart};
use crate::parser::Parser;

/// Compiles `pattern` under `options` into a [`CompiledPattern`].
///
/// The sizing pass runs first, restarting once with the wide encoding if
/// the pattern turns out to need it; the emission pass then writes the
/// program into an array sized to exactly the sizing pass's count, after
/// which the trie optimizer, the literal joiner, and the study pass rewrite
/// and annotate it in place.
pub fn compile(pattern: &str, options: Options) -> Result<CompiledPattern, Error> {
    let mut wide = false;
    let sizing = loop {
        let mut sizing = Parser::new(pattern, options.clone(), wide);
        match sizing.parse() {
            Ok(()) => break sizing,
            Err(Fault::Restart(Restart::WidenUtf8)) => {
                assert!(!wide, "width upgrade requested from a wide sizing pass");
                wide = true;
            }
            Err(Fault::User(e)) => return Err(e.with_excerpt_from(pattern)),
        }
    };

    let capacity = sizing.count();
    let mut emitter =
        Parser::emitting(pattern, options.clone(), wide, capacity, sizing.name_table());
    match emitter.parse() {
        Ok(()) => {}
        Err(Fault::Restart(_)) => panic!("width upgrade requested from the emission pass"),
        Err(Fault::User(e)) => return Err(e.with_excerpt_from(pattern)),
    }

    let mut program = emitter.take_program();
    assert_eq!(
        capacity,
        program.len(),
        "sizing and emission passes disagree on instruction count"
    );

    let sets = emitter.take_sets();
    let group_count = emitter.group_count();
    let group_names = emitter.name_table();
    let warnings = emitter.take_warnings();

    let mut tries = trie::optimize(&mut program, &options.config);
    join::join_literals(&mut program, &options.config, wide);

    let mut facts = study::study(&mut program, &sets, &tries);
    if let Some(id) = facts.wants_scanner {
        // The trie at the head of the program doubles as the start-class
        // scanner once its failure links exist. One restudy, never more.
        trie::build_fail_table(&mut tries[id as usize]);
        facts = study::study(&mut program, &sets, &tries);
    }

    Ok(CompiledPattern {
        program,
        sets,
        tries,
        group_count,
        group_names,
        min_len: facts.min_len,
        anchored_substring: facts.anchored_substring,
        floating_substring: facts.floating_substring,
        start_class: facts.start_class,
        implicit_anchor: facts.implicit_anchor,
        wide,
        options,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pattern_program::Op;

    fn caseless() -> Options {
        Options {
            flags: Flags::CASELESS,
            ..Options::default()
        }
    }

    #[test]
    fn should_compile_a_literal_into_a_single_exact_chain() {
        let pattern = compile("hello", Options::default()).unwrap();

        assert_eq!(Op::Exact("hello".into()), pattern.program[0].op);
        assert_eq!(5, pattern.min_len);
        assert!(!pattern.wide);
        let sub = pattern.anchored_substring.expect("fixed substring");
        assert_eq!(
            ("hello", 0, 0),
            (&*sub.text, sub.min_offset, sub.max_offset)
        );
    }

    #[test]
    fn should_widen_and_restart_for_a_high_scalar_escape() {
        let pattern = compile(r"a\x{1FF}b", Options::default()).unwrap();

        assert!(pattern.wide);
        assert_eq!(3, pattern.min_len);
    }

    #[test]
    fn should_surface_syntax_errors_with_the_pattern_excerpt() {
        let err = compile("a(bc", Options::default()).unwrap_err();

        assert_eq!(ErrorKind::UnterminatedGroup, err.kind());
        assert_eq!(1, err.offset());
        assert!(err.to_string().contains("<-- HERE"));
    }

    #[test]
    fn should_reject_reversed_quantifier_bounds_at_their_offset() {
        let err = compile("a{2,1}", Options::default()).unwrap_err();

        assert_eq!(
            ErrorKind::BadQuantifierBounds { min: 2, max: 1 },
            err.kind()
        );
        assert_eq!(1, err.offset());
    }

    #[test]
    fn should_count_groups_and_expose_names() {
        let pattern =
            compile("(?<year>[0-9]{4})-(?<month>[0-9]{2})", Options::default()).unwrap();

        assert_eq!(2, pattern.group_count);
        assert_eq!(Some(1), pattern.group_index("year"));
        assert_eq!(Some(2), pattern.group_index("month"));
        assert_eq!(None, pattern.group_index("day"));
    }

    #[test]
    fn should_build_a_trie_over_a_literal_alternation() {
        let pattern = compile("foo|bar|baz", Options::default()).unwrap();

        assert_eq!(1, pattern.tries.len());
        assert_eq!(Some(1), pattern.tries[0].matches("foo"));
        assert_eq!(Some(2), pattern.tries[0].matches("bar"));
        assert_eq!(Some(3), pattern.tries[0].matches("baz"));
        assert_eq!(None, pattern.tries[0].matches("qux"));
        assert_eq!(3, pattern.min_len);
    }

    #[test]
    fn should_promote_a_leading_trie_to_the_start_class_scanner() {
        let pattern = compile("foo|bar|baz", Options::default()).unwrap();

        assert_eq!(StartClass::TrieScanner(0), pattern.start_class);
        assert!(pattern.tries[0].has_fail_table());
        assert_eq!(Some((5, 2)), pattern.tries[0].scan("xxbarxx"));
    }

    #[test]
    fn should_not_build_fail_links_for_a_prefixed_trie() {
        let pattern = compile("abc|abd|abe", Options::default()).unwrap();

        // The factored `ab` prefix precedes the trie, so its first
        // character already yields the cheaper set start class.
        assert_eq!(1, pattern.tries.len());
        assert!(!pattern.tries[0].has_fail_table());
        match &pattern.start_class {
            StartClass::Set(list) => {
                assert!(list.contains('a' as u32));
                assert!(!list.contains('b' as u32));
            }
            other => panic!("expected a set start class, got {:?}", other),
        }
    }

    #[test]
    fn should_carry_warnings_on_the_compiled_pattern() {
        let pattern = compile(r"a\q", Options::default()).unwrap();

        assert_eq!(1, pattern.warnings.len());
        assert_eq!(
            WarningKind::UnrecognizedEscape('q'),
            pattern.warnings[0].kind
        );
    }

    #[test]
    fn should_fold_a_caseless_literal() {
        let pattern = compile("Hello", caseless()).unwrap();

        match &pattern.program[0].op {
            Op::ExactFold { text, .. } => assert_eq!("hello", &**text),
            other => panic!("expected a folded literal, got {}", other),
        }
    }

    #[test]
    fn should_derive_floating_substrings_past_a_variable_region() {
        let pattern = compile("foo.*bar", Options::default()).unwrap();

        assert_eq!(6, pattern.min_len);
        let fixed = pattern.anchored_substring.expect("fixed substring");
        assert_eq!(("foo", 0), (&*fixed.text, fixed.min_offset));
        let floating = pattern.floating_substring.expect("floating substring");
        assert_eq!("bar", &*floating.text);
        assert_eq!(3, floating.min_offset);
        assert_eq!(pattern_program::UNBOUNDED, floating.max_offset);
    }
}
