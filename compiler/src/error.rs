//! Provides the error surface of pattern compilation.
//!
//! Compilation either fully succeeds or fails with a single [`Error`]
//! pinpointing the offending construct by byte offset, with a rendered
//! excerpt of the surrounding pattern text. Soft advisories do not pass
//! through here; they are collected as warnings on the compiled pattern.

use std::fmt;

/// Kinds of compilation failures.
///
/// Syntax kinds describe malformed pattern text; the semantic kinds
/// (`BadQuantifierBounds`, `NonexistentGroup`, `NonexistentGroupName`,
/// `DuplicateGroupName`) describe well-formed text with an impossible
/// meaning. Both abort the compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnterminatedGroup,
    UnmatchedParen,
    UnterminatedClass,
    UnterminatedEscape,
    UnterminatedName,
    QuantifierWithoutTarget,
    NestedQuantifier,
    BadQuantifierBounds { min: u32, max: u32 },
    BadEscape,
    BadPosixClass,
    BadPropertyName,
    BadGroupSyntax,
    BadSetExpression,
    BadConditional,
    NonexistentGroup { reference: u32 },
    NonexistentGroupName,
    DuplicateGroupName,
    TooDeep,
}

/// Represents a fatal compilation error at a known position in the
/// original pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    offset: usize,
    excerpt: String,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, offset: usize) -> Self {
        Self {
            kind,
            offset,
            excerpt: String::new(),
        }
    }

    /// Attaches a `<-- HERE` excerpt rendered from the pattern text.
    pub(crate) fn with_excerpt_from(mut self, pattern: &str) -> Self {
        self.excerpt = render_excerpt(pattern, self.offset);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Byte offset into the original pattern where the problem was
    /// detected.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::UnterminatedGroup => write!(f, "unterminated group")?,
            ErrorKind::UnmatchedParen => write!(f, "unmatched closing parenthesis")?,
            ErrorKind::UnterminatedClass => write!(f, "unterminated character class")?,
            ErrorKind::UnterminatedEscape => write!(f, "unterminated escape sequence")?,
            ErrorKind::UnterminatedName => write!(f, "unterminated group name")?,
            ErrorKind::QuantifierWithoutTarget => write!(f, "quantifier follows nothing")?,
            ErrorKind::NestedQuantifier => write!(f, "nested quantifiers")?,
            ErrorKind::BadQuantifierBounds { min, max } => {
                write!(f, "quantifier bounds out of order ({{{},{}}})", min, max)?
            }
            ErrorKind::BadEscape => write!(f, "malformed escape sequence")?,
            ErrorKind::BadPosixClass => write!(f, "unknown POSIX class name")?,
            ErrorKind::BadPropertyName => write!(f, "malformed property name")?,
            ErrorKind::BadGroupSyntax => write!(f, "unrecognized group syntax")?,
            ErrorKind::BadSetExpression => write!(f, "malformed set expression")?,
            ErrorKind::BadConditional => write!(f, "malformed conditional group")?,
            ErrorKind::NonexistentGroup { reference } => {
                write!(f, "reference to nonexistent group {}", reference)?
            }
            ErrorKind::NonexistentGroupName => {
                write!(f, "reference to nonexistent named group")?
            }
            ErrorKind::DuplicateGroupName => write!(f, "duplicate capture group name")?,
            ErrorKind::TooDeep => write!(f, "pattern nests too deeply")?,
        }
        write!(f, " at offset {}", self.offset)?;
        if !self.excerpt.is_empty() {
            write!(f, "; marked by <-- HERE in /{}/", self.excerpt)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// Renders a window of the pattern around `offset` with a position marker.
fn render_excerpt(pattern: &str, offset: usize) -> String {
    const WINDOW: usize = 40;

    let mut at = offset.min(pattern.len());
    while at > 0 && !pattern.is_char_boundary(at) {
        at -= 1;
    }

    let mut start = at.saturating_sub(WINDOW);
    while start > 0 && !pattern.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (at + WINDOW).min(pattern.len());
    while end < pattern.len() && !pattern.is_char_boundary(end) {
        end += 1;
    }

    format!("{}<-- HERE {}", &pattern[start..at], &pattern[at..end])
}

/// The width-upgrade restart raised out of pass 1 and consumed by the
/// driver; re-encoding is idempotent, so at most one restart can occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Restart {
    WidenUtf8,
}

/// Internal result channel of the parsing passes: either a user-facing
/// error or the restart signal. The driver unwraps this; `Restart` never
/// escapes the crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Fault {
    User(Error),
    Restart(Restart),
}

impl From<Error> for Fault {
    fn from(e: Error) -> Self {
        Fault::User(e)
    }
}

pub(crate) type ParseResult<T> = Result<T, Fault>;
