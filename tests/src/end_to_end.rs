use pattern_compiler::{compile, ErrorKind, Flags, Options, StartClass};
use pattern_program::interval::InversionList;
use pattern_program::{Op, UNBOUNDED};

fn caseless() -> Options {
    Options {
        flags: Flags::CASELESS,
        ..Options::default()
    }
}

fn complement(list: &InversionList) -> InversionList {
    let mut inverted = list.clone();
    inverted.invert();
    inverted
}

#[test]
fn should_satisfy_de_morgan_over_inversion_lists() {
    let input_output = vec![
        (
            InversionList::from_ranges(vec![(10, 20), (40, 60)]),
            InversionList::from_ranges(vec![(15, 45)]),
        ),
        (
            InversionList::new(),
            InversionList::from_ranges(vec![(0, 0x10FFFF)]),
        ),
        (
            InversionList::from_ranges(vec![(97, 122)]),
            InversionList::from_ranges(vec![(97, 122)]),
        ),
    ];

    for (test_id, (a, b)) in input_output.into_iter().enumerate() {
        // not (A or not B) == (not A) and B
        let lhs = complement(&a.union_complement(&b));
        let rhs = complement(&a).intersect(&b);
        assert_eq!((test_id, &lhs), (test_id, &rhs));
    }
}

#[test]
fn should_restore_a_list_by_double_inversion() {
    let lists = vec![
        InversionList::new(),
        InversionList::full(),
        InversionList::from_ranges(vec![(0, 5), (100, 200)]),
        InversionList::from_ranges(vec![(7, 7)]),
    ];

    for (test_id, list) in lists.into_iter().enumerate() {
        assert_eq!((test_id, &list), (test_id, &complement(&complement(&list))));
    }
}

#[test]
fn should_match_a_trie_exactly_against_its_input_words() {
    let words = ["ab", "ba", "aa", "bbb"];
    let pattern = compile(&words.join("|"), Options::default()).unwrap();
    assert_eq!(1, pattern.tries.len());
    let trie = &pattern.tries[0];

    // Every string over {a, b} up to the longest word: accepted exactly
    // when it is one of the inputs.
    let mut candidates = vec![String::new()];
    for _ in 0..3 {
        candidates = candidates
            .iter()
            .flat_map(|prefix| {
                ["a", "b"]
                    .iter()
                    .map(move |suffix| format!("{}{}", prefix, suffix))
            })
            .collect();
        for candidate in &candidates {
            let expected = words.contains(&candidate.as_str());
            assert_eq!(
                (candidate.as_str(), expected),
                (candidate.as_str(), trie.matches(candidate).is_some())
            );
        }
    }
}

#[test]
fn should_close_folded_classes_over_the_whole_orbit() {
    // The Kelvin sign folds to 'k'; naming it in a caseless class must pull
    // in both ASCII kays, and naming the long s must pull in both esses.
    let input_output = vec![
        (r"(?i)[\x{212A}]", vec!['k' as u32, 'K' as u32, 0x212A]),
        (r"(?i)[\x{17F}]", vec!['s' as u32, 'S' as u32, 0x17F]),
    ];

    for (test_id, (source, members)) in input_output.into_iter().enumerate() {
        let pattern = compile(source, Options::default()).unwrap();
        assert!(pattern.wide, "case {}", test_id);
        assert_eq!((test_id, 1), (test_id, pattern.sets.len()));
        for member in members {
            assert_eq!(
                (test_id, member, Some(true)),
                (test_id, member, pattern.sets[0].contains(member))
            );
        }
    }
}

#[test]
fn should_compile_a_varied_pattern_table_without_pass_divergence() {
    // Pass agreement is asserted inside `compile`; every successful return
    // here has already proven the sizing and emission passes agreed.
    let patterns = vec![
        "a",
        "abc|abd|abe",
        "(?i)Hello, World!",
        r"[a-cx-z]+\d*",
        r"^(?<key>\w+)=(?<value>[^#\n]*)(?:#.*)?$",
        r"(?:ab){2,5}?c",
        r"foo(?=bar)|qu+x",
        r"(a)(b)\2\1",
        r"(?[ [a-z] - [aeiou] ])",
        r"x(?>a|ab)y",
        r"(?(1)yes|no)|(maybe)",
        r"\x{1F0}[\x{100}-\x{1FF}]",
    ];

    for (test_id, source) in patterns.into_iter().enumerate() {
        let result = compile(source, Options::default());
        assert!(result.is_ok(), "case {}: {:?}", test_id, result.err());
    }
}

/// One atom of the generation sub-grammar: something whose full expansion
/// set is known, so every generated string is a real match.
enum Atom {
    Lit(&'static str),
    Alt(&'static [&'static str]),
    Opt(&'static str),
    Rep(&'static str, u32, u32),
}

impl Atom {
    fn source(&self) -> String {
        match self {
            Atom::Lit(text) => (*text).to_string(),
            Atom::Alt(arms) => format!("(?:{})", arms.join("|")),
            Atom::Opt(body) => format!("(?:{})?", body),
            Atom::Rep(body, min, max) => format!("(?:{}){{{},{}}}", body, min, max),
        }
    }

    fn expansions(&self) -> Vec<String> {
        match self {
            Atom::Lit(text) => vec![(*text).to_string()],
            Atom::Alt(arms) => arms.iter().map(|arm| (*arm).to_string()).collect(),
            Atom::Opt(body) => vec![String::new(), (*body).to_string()],
            Atom::Rep(body, min, max) => {
                (*min..=*max).map(|n| body.repeat(n as usize)).collect()
            }
        }
    }
}

#[test]
fn should_never_overstate_the_minimum_match_length() {
    let grammars: Vec<Vec<Atom>> = vec![
        vec![Atom::Lit("ab"), Atom::Opt("cd"), Atom::Lit("e")],
        vec![Atom::Alt(&["foo", "ba"]), Atom::Rep("x", 0, 3)],
        vec![Atom::Rep("ab", 2, 4), Atom::Alt(&["", "tail"])],
        vec![Atom::Opt("x"), Atom::Opt("y"), Atom::Opt("z")],
        vec![Atom::Alt(&["one", "two", "three"]), Atom::Lit("!")],
    ];

    for (test_id, atoms) in grammars.into_iter().enumerate() {
        let source: String = atoms.iter().map(Atom::source).collect();
        let pattern = compile(&source, Options::default()).unwrap();

        // Cartesian product of per-atom expansions = every derivable match.
        let mut matches = vec![String::new()];
        for atom in &atoms {
            matches = matches
                .iter()
                .flat_map(|prefix| {
                    atom.expansions()
                        .into_iter()
                        .map(move |expansion| format!("{}{}", prefix, expansion))
                })
                .collect();
        }

        for matched in matches {
            assert!(
                pattern.min_len as usize <= matched.chars().count(),
                "case {}: min_len {} exceeds match {:?} of /{}/",
                test_id,
                pattern.min_len,
                matched,
                source
            );
        }
    }
}

#[test]
fn should_factor_a_shared_prefix_out_of_a_literal_alternation() {
    let pattern = compile("abc|abd|abe", Options::default()).unwrap();

    assert_eq!(Op::Exact("ab".into()), pattern.program[0].op);
    assert!(matches!(pattern.program[1].op, Op::Trie(0)));
    assert_eq!(3, pattern.tries[0].word_count());
    assert_eq!(Some(1), pattern.tries[0].matches("c"));
    assert_eq!(Some(2), pattern.tries[0].matches("d"));
    assert_eq!(Some(3), pattern.tries[0].matches("e"));

    assert_eq!(3, pattern.min_len);
    let sub = pattern.anchored_substring.expect("fixed substring");
    assert_eq!(("ab", 0), (&*sub.text, sub.min_offset));
}

#[test]
fn should_build_a_two_range_inversion_list_for_a_split_class() {
    let pattern = compile("[a-cx-z]", Options::default()).unwrap();

    assert!(matches!(pattern.program[0].op, Op::Class(0)));
    let set = &pattern.sets[0];
    assert_eq!(2, set.list.range_count());
    assert_eq!(Some(true), set.contains('b' as u32));
    assert_eq!(Some(false), set.contains('w' as u32));
}

#[test]
fn should_anchor_foo_and_float_bar_across_a_gap() {
    let pattern = compile("foo.*bar", Options::default()).unwrap();

    assert_eq!(6, pattern.min_len);
    let fixed = pattern.anchored_substring.expect("fixed substring");
    assert_eq!(("foo", 0, 0), (&*fixed.text, fixed.min_offset, fixed.max_offset));
    let floating = pattern.floating_substring.expect("floating substring");
    assert_eq!(
        ("bar", 3, UNBOUNDED),
        (&*floating.text, floating.min_offset, floating.max_offset)
    );
    match &pattern.start_class {
        StartClass::Set(list) => assert!(list.contains('f' as u32)),
        other => panic!("expected a set start class, got {:?}", other),
    }
}

#[test]
fn should_rewrite_sharp_s_classes_into_a_sequence_alternation() {
    // The capital sharp s can only fold against "ss" through the rewrite
    // into an alternation of literal sequences; a plain folded literal of
    // the same letters takes the joined form directly.
    let rewritten = compile("(?i)x[\u{1E9E}]y", caseless()).unwrap();
    assert!(rewritten.wide);
    assert!(rewritten
        .program
        .iter()
        .any(|inst| matches!(&inst.op, Op::ExactFold { text, .. } if text.as_ref() == "ss")));

    let literal = compile("STRA\u{1E9E}E", caseless()).unwrap();
    assert!(matches!(
        &literal.program[0].op,
        Op::ExactFold { text, .. } if text.as_ref() == "strasse"
    ));
}

#[test]
fn should_reject_reversed_quantifier_bounds_at_the_quantifier() {
    let err = compile("a{2,1}", Options::default()).unwrap_err();

    assert_eq!(ErrorKind::BadQuantifierBounds { min: 2, max: 1 }, err.kind());
    assert_eq!(1, err.offset());
    assert!(err.to_string().contains("<-- HERE"));
}

#[test]
fn should_resolve_backreferences_in_written_order() {
    let pattern = compile(r"(a)(b)\2\1", Options::default()).unwrap();

    assert_eq!(2, pattern.group_count);
    let refs: Vec<u32> = pattern
        .program
        .iter()
        .filter_map(|inst| match inst.op {
            Op::Backref { group, .. } => Some(group),
            _ => None,
        })
        .collect();
    assert_eq!(vec![2, 1], refs);
}
