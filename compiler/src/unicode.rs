//! Provides the process-wide Unicode property and case-fold lookup
//! service.
//!
//! The registry is built once, on first use, by a single scan over every
//! Unicode scalar value, and is immutable afterwards; lookups never take a
//! lock. Property names resolve loosely (case, whitespace, `-` and `_` are
//! ignored, and an `Is` prefix is tolerated). A name the registry does not
//! know is not an error at this layer; the class compiler records it for
//! deferred resolution at run time.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use unicode_categories::UnicodeCategories;

use pattern_program::interval::InversionList;

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::build);

/// The shared registry instance.
pub(crate) fn registry() -> &'static Registry {
    &REGISTRY
}

/// Iterates every Unicode scalar value in ascending order, skipping the
/// surrogate gap.
#[derive(Debug, Clone)]
struct ScalarValues {
    lower: std::ops::Range<u32>,
    upper: std::ops::Range<u32>,
}

impl ScalarValues {
    fn new() -> Self {
        Self {
            lower: 0..0xD800,
            upper: 0xE000..(char::MAX as u32 + 1),
        }
    }
}

impl Iterator for ScalarValues {
    type Item = char;

    #[inline]
    fn next(&mut self) -> Option<char> {
        self.lower
            .next()
            .or_else(|| self.upper.next())
            .and_then(char::from_u32)
    }
}

/// Overrides for scalars whose simple case fold is not recoverable from
/// `char::to_lowercase`.
const FOLD_KEY_OVERRIDES: &[(char, char)] = &[
    ('\u{00B5}', '\u{03BC}'), // micro sign -> greek mu
    ('\u{017F}', 's'),        // long s
    ('\u{03C2}', '\u{03C3}'), // final sigma
    ('\u{03D0}', '\u{03B2}'), // beta symbol
    ('\u{03D1}', '\u{03B8}'), // theta symbol
    ('\u{03D5}', '\u{03C6}'), // phi symbol
    ('\u{03D6}', '\u{03C0}'), // pi symbol
    ('\u{03F0}', '\u{03BA}'), // kappa symbol
    ('\u{03F1}', '\u{03C1}'), // rho symbol
    ('\u{03F5}', '\u{03B5}'), // lunate epsilon
    ('\u{1E9B}', '\u{1E61}'), // long s with dot above
];

/// Scalars that case-fold to a sequence of two or three characters.
/// Sorted by scalar for binary search.
const MULTI_CHAR_FOLDS: &[(char, &str)] = &[
    ('\u{00DF}', "ss"),
    ('\u{0130}', "i\u{0307}"),
    ('\u{0149}', "\u{02BC}n"),
    ('\u{01F0}', "j\u{030C}"),
    ('\u{0390}', "\u{03B9}\u{0308}\u{0301}"),
    ('\u{03B0}', "\u{03C5}\u{0308}\u{0301}"),
    ('\u{0587}', "\u{0565}\u{0582}"),
    ('\u{1E96}', "h\u{0331}"),
    ('\u{1E97}', "t\u{0308}"),
    ('\u{1E98}', "w\u{030A}"),
    ('\u{1E99}', "y\u{030A}"),
    ('\u{1E9A}', "a\u{02BE}"),
    ('\u{1E9E}', "ss"),
    ('\u{1F50}', "\u{03C5}\u{0313}"),
    ('\u{FB00}', "ff"),
    ('\u{FB01}', "fi"),
    ('\u{FB02}', "fl"),
    ('\u{FB03}', "ffi"),
    ('\u{FB04}', "ffl"),
    ('\u{FB05}', "st"),
    ('\u{FB06}', "st"),
];

/// Long and binary aliases mapped onto the category keys built during the
/// scalar scan. Keys are in normalized form.
const CATEGORY_ALIASES: &[(&str, &str)] = &[
    ("letter", "l"),
    ("lowercaseletter", "ll"),
    ("uppercaseletter", "lu"),
    ("titlecaseletter", "lt"),
    ("modifierletter", "lm"),
    ("otherletter", "lo"),
    ("casedletter", "lc"),
    ("mark", "m"),
    ("nonspacingmark", "mn"),
    ("spacingmark", "mc"),
    ("spacingcombiningmark", "mc"),
    ("enclosingmark", "me"),
    ("number", "n"),
    ("decimalnumber", "nd"),
    ("decimaldigitnumber", "nd"),
    ("letternumber", "nl"),
    ("othernumber", "no"),
    ("punctuation", "p"),
    ("connectorpunctuation", "pc"),
    ("dashpunctuation", "pd"),
    ("openpunctuation", "ps"),
    ("closepunctuation", "pe"),
    ("initialpunctuation", "pi"),
    ("finalpunctuation", "pf"),
    ("otherpunctuation", "po"),
    ("symbol", "s"),
    ("mathsymbol", "sm"),
    ("currencysymbol", "sc"),
    ("modifiersymbol", "sk"),
    ("othersymbol", "so"),
    ("separator", "z"),
    ("spaceseparator", "zs"),
    ("lineseparator", "zl"),
    ("paragraphseparator", "zp"),
    ("other", "c"),
    ("control", "cc"),
    ("format", "cf"),
    ("privateuse", "co"),
    ("surrogate", "cs"),
    ("unassigned", "cn"),
];

/// The closed set of POSIX class names accepted inside `[:...:]`.
const POSIX_NAMES: &[&str] = &[
    "alnum", "alpha", "ascii", "blank", "cntrl", "digit", "graph", "lower",
    "print", "punct", "space", "upper", "word", "xdigit",
];

/// ASCII characters POSIX `punct` covers beyond the Unicode `P` category.
const ASCII_SYMBOL_PUNCT: &[char] = &['$', '+', '<', '=', '>', '^', '`', '|', '~'];

/// Represents the immutable property and fold tables.
pub(crate) struct Registry {
    props: HashMap<Box<str>, Arc<InversionList>>,
    /// Simple-fold orbits: canonical fold key -> every scalar sharing it.
    /// Only keys with at least two members are kept.
    orbits: HashMap<u32, Box<[u32]>>,
    /// Every scalar that belongs to some orbit.
    foldable: InversionList,
    /// Every scalar with a multi-character fold.
    mcf_set: InversionList,
    /// The distinct fold expansion sequences, longest (in characters)
    /// first.
    fold_seqs: Vec<&'static str>,
}

impl Registry {
    fn build() -> Self {
        let mut fine: HashMap<&'static str, Vec<(u32, u32)>> = HashMap::new();
        let mut space_ranges: Vec<(u32, u32)> = Vec::new();
        let mut orbit_accum: HashMap<u32, Vec<u32>> = HashMap::new();

        for c in ScalarValues::new() {
            let cp = c as u32;
            let (fine_key, major_key) = classify(c);
            add_cp(fine.entry(fine_key).or_default(), cp);
            add_cp(fine.entry(major_key).or_default(), cp);
            if c.is_whitespace() {
                add_cp(&mut space_ranges, cp);
            }

            let key = fold_key(c);
            orbit_accum.entry(key as u32).or_default().push(cp);
        }

        let mut props: HashMap<Box<str>, Arc<InversionList>> = HashMap::new();
        for (key, ranges) in fine {
            props.insert(key.into(), Arc::new(InversionList::from_ranges(ranges)));
        }
        // Categories with no member still resolve (to the empty set).
        for key in ["lt", "me", "zl", "zp", "cs", "co"] {
            props
                .entry(key.into())
                .or_insert_with(|| Arc::new(InversionList::new()));
        }

        let lc = union_of(&props, &["lu", "ll", "lt"]);
        props.insert("lc".into(), Arc::new(lc));

        for (alias, key) in CATEGORY_ALIASES {
            let list = Arc::clone(&props[*key]);
            props.insert((*alias).into(), list);
        }

        let space = Arc::new(InversionList::from_ranges(space_ranges));
        props.insert("space".into(), Arc::clone(&space));
        props.insert("whitespace".into(), space);

        let alpha = Arc::new(union_of(&props, &["l", "nl"]));
        props.insert("alpha".into(), Arc::clone(&alpha));
        props.insert("alphabetic".into(), alpha);

        let alnum = Arc::new(union_of(&props, &["alpha", "nd"]));
        props.insert("alnum".into(), alnum);

        let word = Arc::new(union_of(&props, &["l", "m", "n", "pc"]));
        props.insert("word".into(), word);

        let graph = Arc::new(union_of(&props, &["l", "m", "n", "p", "s"]));
        props.insert("graph".into(), Arc::clone(&graph));
        let print = Arc::new(graph.union(&props["zs"]));
        props.insert("print".into(), print);

        let mut punct = (*props["p"]).clone();
        for &c in ASCII_SYMBOL_PUNCT {
            punct = punct.union(&InversionList::from_ranges([(c as u32, c as u32)]));
        }
        props.insert("punct".into(), Arc::new(punct));

        let blank = props["zs"].union(&InversionList::from_ranges([(0x09, 0x09)]));
        props.insert("blank".into(), Arc::new(blank));

        props.insert(
            "ascii".into(),
            Arc::new(InversionList::from_ranges([(0, 0x7F)])),
        );
        props.insert(
            "xdigit".into(),
            Arc::new(InversionList::from_ranges([
                ('0' as u32, '9' as u32),
                ('A' as u32, 'F' as u32),
                ('a' as u32, 'f' as u32),
            ])),
        );
        props.insert("upper".into(), Arc::clone(&props["lu"]));
        props.insert("uppercase".into(), Arc::clone(&props["lu"]));
        props.insert("lower".into(), Arc::clone(&props["ll"]));
        props.insert("lowercase".into(), Arc::clone(&props["ll"]));
        props.insert("digit".into(), Arc::clone(&props["nd"]));
        props.insert("cntrl".into(), Arc::clone(&props["cc"]));

        let horiz = InversionList::from_ranges([(0x09, 0x09)]).union(&props["zs"]);
        props.insert("horizspace".into(), Arc::new(horiz));
        let vert = InversionList::from_ranges([
            (0x0A, 0x0D),
            (0x85, 0x85),
            (0x2028, 0x2029),
        ]);
        props.insert("vertspace".into(), Arc::new(vert));

        let mut orbits: HashMap<u32, Box<[u32]>> = HashMap::new();
        let mut member_ranges: Vec<(u32, u32)> = Vec::new();
        for (key, members) in orbit_accum {
            if members.len() > 1 {
                for &m in &members {
                    member_ranges.push((m, m));
                }
                orbits.insert(key, members.into_boxed_slice());
            }
        }
        let foldable = InversionList::from_ranges(member_ranges);

        let mcf_set = InversionList::from_ranges(
            MULTI_CHAR_FOLDS
                .iter()
                .map(|&(c, _)| (c as u32, c as u32)),
        );

        let mut fold_seqs: Vec<&'static str> = MULTI_CHAR_FOLDS
            .iter()
            .map(|&(_, seq)| seq)
            .collect();
        fold_seqs.sort_by(|a, b| {
            b.chars()
                .count()
                .cmp(&a.chars().count())
                .then_with(|| a.cmp(b))
        });
        fold_seqs.dedup();

        Self {
            props,
            orbits,
            foldable,
            mcf_set,
            fold_seqs,
        }
    }

    /// Resolves a `\p{...}` property name, or `None` when it must be
    /// deferred to run time.
    pub(crate) fn property(&self, name: &str) -> Option<Arc<InversionList>> {
        let norm = normalize(name);
        if let Some(list) = self.props.get(norm.as_str()) {
            return Some(Arc::clone(list));
        }
        if let Some(stripped) = norm.strip_prefix("is") {
            if !stripped.is_empty() {
                return self.props.get(stripped).map(Arc::clone);
            }
        }
        None
    }

    /// Resolves a POSIX `[:name:]` class. Unlike properties, the name set
    /// is closed.
    pub(crate) fn posix(&self, name: &str) -> Option<Arc<InversionList>> {
        let norm = normalize(name);
        if POSIX_NAMES.contains(&norm.as_str()) {
            self.props.get(norm.as_str()).map(Arc::clone)
        } else {
            None
        }
    }

    pub(crate) fn ascii(&self) -> Arc<InversionList> {
        Arc::clone(&self.props["ascii"])
    }

    pub(crate) fn word(&self) -> Arc<InversionList> {
        Arc::clone(&self.props["word"])
    }

    pub(crate) fn digit(&self) -> Arc<InversionList> {
        Arc::clone(&self.props["nd"])
    }

    pub(crate) fn space(&self) -> Arc<InversionList> {
        Arc::clone(&self.props["space"])
    }

    pub(crate) fn horizontal_space(&self) -> Arc<InversionList> {
        Arc::clone(&self.props["horizspace"])
    }

    pub(crate) fn vertical_space(&self) -> Arc<InversionList> {
        Arc::clone(&self.props["vertspace"])
    }

    /// Every scalar sharing a simple fold with `c`, including `c` itself,
    /// or `None` when `c` folds only to itself.
    pub(crate) fn fold_orbit(&self, c: char) -> Option<&[u32]> {
        self.orbits.get(&(fold_key(c) as u32)).map(|b| &**b)
    }

    /// The scalars participating in any simple-fold orbit.
    pub(crate) fn foldable(&self) -> &InversionList {
        &self.foldable
    }

    /// Whether `c` participates in folding under the given width. In the
    /// narrow encoding, fold pairs reaching above U+00FF do not apply.
    pub(crate) fn is_foldable_char(&self, c: char, wide: bool) -> bool {
        if self.multi_char_fold(c).is_some() {
            return wide;
        }
        match self.fold_orbit(c) {
            None => false,
            Some(members) if wide => members.len() > 1,
            Some(members) => members.iter().filter(|&&m| m <= 0xFF).count() > 1,
        }
    }

    /// The fold expansion sequence of `c`, when it has one.
    pub(crate) fn multi_char_fold(&self, c: char) -> Option<&'static str> {
        MULTI_CHAR_FOLDS
            .binary_search_by_key(&c, |&(mc, _)| mc)
            .ok()
            .map(|idx| MULTI_CHAR_FOLDS[idx].1)
    }

    /// The scalars with multi-character folds, as a set.
    pub(crate) fn mcf_members(&self) -> &InversionList {
        &self.mcf_set
    }

    /// The distinct fold expansion sequences, longest first.
    pub(crate) fn fold_sequences(&self) -> &[&'static str] {
        &self.fold_seqs
    }
}

/// The canonical simple-fold key of a scalar: an override when one exists,
/// else its single-character lowercase, else itself.
pub(crate) fn fold_key(c: char) -> char {
    if let Ok(idx) = FOLD_KEY_OVERRIDES.binary_search_by_key(&c, |&(from, _)| from) {
        return FOLD_KEY_OVERRIDES[idx].1;
    }
    let mut lower = c.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(l), None) => l,
        _ => c,
    }
}

/// Characters a folded literal may shed against the input: the sum of
/// `length - 1` over non-overlapping fold-expansion occurrences in `text`,
/// taken leftmost-longest. Each such sequence can be produced by a single
/// source character.
pub(crate) fn fold_delta(text: &str) -> u32 {
    let sequences = registry().fold_sequences();
    let mut delta = 0u32;
    let mut rest = text;
    'scan: while !rest.is_empty() {
        for seq in sequences {
            if rest.starts_with(seq) {
                delta += seq.chars().count() as u32 - 1;
                rest = &rest[seq.len()..];
                continue 'scan;
            }
        }
        let ch = rest.chars().next().expect("remainder is nonempty");
        rest = &rest[ch.len_utf8()..];
    }
    delta
}

fn classify(c: char) -> (&'static str, &'static str) {
    if c.is_letter() {
        if c.is_letter_lowercase() {
            ("ll", "l")
        } else if c.is_letter_uppercase() {
            ("lu", "l")
        } else if c.is_letter_titlecase() {
            ("lt", "l")
        } else if c.is_letter_modifier() {
            ("lm", "l")
        } else {
            ("lo", "l")
        }
    } else if c.is_mark() {
        if c.is_mark_nonspacing() {
            ("mn", "m")
        } else if c.is_mark_spacing_combining() {
            ("mc", "m")
        } else {
            ("me", "m")
        }
    } else if c.is_number() {
        if c.is_number_decimal_digit() {
            ("nd", "n")
        } else if c.is_number_letter() {
            ("nl", "n")
        } else {
            ("no", "n")
        }
    } else if c.is_punctuation() {
        if c.is_punctuation_connector() {
            ("pc", "p")
        } else if c.is_punctuation_dash() {
            ("pd", "p")
        } else if c.is_punctuation_open() {
            ("ps", "p")
        } else if c.is_punctuation_close() {
            ("pe", "p")
        } else if c.is_punctuation_initial_quote() {
            ("pi", "p")
        } else if c.is_punctuation_final_quote() {
            ("pf", "p")
        } else {
            ("po", "p")
        }
    } else if c.is_symbol() {
        if c.is_symbol_math() {
            ("sm", "s")
        } else if c.is_symbol_currency() {
            ("sc", "s")
        } else if c.is_symbol_modifier() {
            ("sk", "s")
        } else {
            ("so", "s")
        }
    } else if c.is_separator() {
        if c.is_separator_space() {
            ("zs", "z")
        } else if c.is_separator_line() {
            ("zl", "z")
        } else {
            ("zp", "z")
        }
    } else if c.is_other_control() {
        ("cc", "c")
    } else if c.is_other_format() {
        ("cf", "c")
    } else if c.is_other_private_use() {
        ("co", "c")
    } else {
        ("cn", "c")
    }
}

fn add_cp(ranges: &mut Vec<(u32, u32)>, cp: u32) {
    match ranges.last_mut() {
        Some((_, hi)) if *hi + 1 == cp => *hi = cp,
        Some((_, hi)) if *hi >= cp => {}
        _ => ranges.push((cp, cp)),
    }
}

fn union_of(
    props: &HashMap<Box<str>, Arc<InversionList>>,
    keys: &[&str],
) -> InversionList {
    let mut out = InversionList::new();
    for key in keys {
        out = out.union(&props[*key]);
    }
    out
}

/// Loose name normalization: lowercase with spaces, dashes and
/// underscores removed.
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, ' ' | '\t' | '-' | '_'))
        .flat_map(char::to_lowercase)
        .collect()
}
