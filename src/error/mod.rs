//! Error types for every component of the crate.
//!
//! Each component reports its own error type so that callers can tell a
//! malformed source document from a bad path expression or a failed
//! include. The umbrella [`Error`] implements `From` for all of them, which
//! lets `?` compose across components.
//!
//! Nothing in this crate retries internally: an error surfaces to the caller
//! of the operation that triggered it. Output already written to a sink
//! before an error (for example a prefix of canonical text) is not rolled
//! back.

use std::fmt;

/// Source location within an XML document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number (in characters, not bytes).
    pub column: u32,
    /// 0-based byte offset into the decoded (UTF-8) input.
    pub byte_offset: usize,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// The error type returned when the source document is malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Human-readable error message.
    pub message: String,
    /// Where in the source the error occurred.
    pub location: SourceLocation,
}

impl ParseError {
    pub(crate) fn new(message: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            message: message.into(),
            location,
        }
    }

    /// Returns `(line, column)` of the error, both 1-based.
    #[must_use]
    pub fn position(&self) -> (u32, u32) {
        (self.location.line, self.location.column)
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: line {}, column {}", self.message, self.location.line, self.location.column)
    }
}

impl std::error::Error for ParseError {}

/// A malformed or unsupported path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSyntaxError {
    /// Human-readable error message.
    pub message: String,
}

impl PathSyntaxError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for PathSyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "path syntax error: {}", self.message)
    }
}

impl std::error::Error for PathSyntaxError {}

/// A namespace that cannot be resolved during canonicalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceError {
    /// Human-readable error message.
    pub message: String,
}

impl NamespaceError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for NamespaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "namespace error: {}", self.message)
    }
}

impl std::error::Error for NamespaceError {}

/// A tree or option combination that cannot be serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializationError {
    /// Human-readable error message.
    pub message: String,
}

impl SerializationError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot serialize: {}", self.message)
    }
}

impl std::error::Error for SerializationError {}

/// An error raised while processing `XInclude` directives.
///
/// `RecursionLimit` is the "depth exceeded" refinement of a fatal include
/// error: [`IncludeError::is_fatal`] is true for both, so callers that only
/// care about failure can ignore the distinction, while callers that need to
/// tell a definite cycle (`Fatal`) from an exhausted budget can match on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncludeError {
    /// A bad directive, a failed load, a misplaced fallback, a recursive
    /// include, or an unsupported `parse` value.
    Fatal {
        /// Human-readable error message.
        message: String,
        /// The `href` being processed, if known.
        href: Option<String>,
    },
    /// The configured include depth budget was exhausted.
    RecursionLimit {
        /// The `href` that would have exceeded the budget.
        href: String,
    },
    /// A negative depth budget was configured.
    InvalidDepth(i32),
}

impl IncludeError {
    pub(crate) fn fatal(message: impl Into<String>, href: Option<&str>) -> Self {
        Self::Fatal {
            message: message.into(),
            href: href.map(str::to_owned),
        }
    }

    /// Returns `true` for every include failure raised during processing.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. } | Self::RecursionLimit { .. })
    }

    /// Returns `true` if the depth budget was exhausted.
    #[must_use]
    pub fn is_recursion_limit(&self) -> bool {
        matches!(self, Self::RecursionLimit { .. })
    }
}

impl fmt::Display for IncludeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fatal {
                message,
                href: Some(href),
            } => write!(f, "XInclude error for '{href}': {message}"),
            Self::Fatal {
                message,
                href: None,
            } => write!(f, "XInclude error: {message}"),
            Self::RecursionLimit { href } => write!(
                f,
                "maximum xinclude depth reached when including file {href}"
            ),
            Self::InvalidDepth(depth) => write!(
                f,
                "expected non-negative depth or None for max_depth, got {depth}"
            ),
        }
    }
}

impl std::error::Error for IncludeError {}

/// An API used out of order or against its contract, e.g. feeding a closed
/// parser or removing a child that is not attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageError {
    /// Human-readable error message.
    pub message: String,
}

impl UsageError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for UsageError {}

/// Umbrella error for operations that cross component boundaries.
#[derive(Debug)]
pub enum Error {
    /// Malformed source document.
    Parse(ParseError),
    /// Bad path expression.
    Path(PathSyntaxError),
    /// Unresolvable namespace during canonicalization.
    Namespace(NamespaceError),
    /// Tree or options that cannot be serialized.
    Serialization(SerializationError),
    /// `XInclude` failure.
    Include(IncludeError),
    /// API misuse.
    Usage(UsageError),
    /// Invalid configuration value (unknown method, event name, level, ...).
    Config(String),
    /// Failure of the underlying reader or writer.
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => e.fmt(f),
            Self::Path(e) => e.fmt(f),
            Self::Namespace(e) => e.fmt(f),
            Self::Serialization(e) => e.fmt(f),
            Self::Include(e) => e.fmt(f),
            Self::Usage(e) => e.fmt(f),
            Self::Config(message) => write!(f, "invalid configuration: {message}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parse(e) => Some(e),
            Self::Path(e) => Some(e),
            Self::Namespace(e) => Some(e),
            Self::Serialization(e) => Some(e),
            Self::Include(e) => Some(e),
            Self::Usage(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Config(_) => None,
        }
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Self::Parse(e)
    }
}

impl From<PathSyntaxError> for Error {
    fn from(e: PathSyntaxError) -> Self {
        Self::Path(e)
    }
}

impl From<NamespaceError> for Error {
    fn from(e: NamespaceError) -> Self {
        Self::Namespace(e)
    }
}

impl From<SerializationError> for Error {
    fn from(e: SerializationError) -> Self {
        Self::Serialization(e)
    }
}

impl From<IncludeError> for Error {
    fn from(e: IncludeError) -> Self {
        Self::Include(e)
    }
}

impl From<UsageError> for Error {
    fn from(e: UsageError) -> Self {
        Self::Usage(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_location_display() {
        let loc = SourceLocation {
            line: 10,
            column: 5,
            byte_offset: 42,
        };
        assert_eq!(loc.to_string(), "10:5");
    }

    #[test]
    fn test_parse_error_display_and_position() {
        let err = ParseError::new(
            "mismatched tag",
            SourceLocation {
                line: 1,
                column: 15,
                byte_offset: 14,
            },
        );
        assert_eq!(err.to_string(), "mismatched tag: line 1, column 15");
        assert_eq!(err.position(), (1, 15));
    }

    #[test]
    fn test_include_error_kinds() {
        let cycle = IncludeError::fatal("recursive include of a.xml", Some("a.xml"));
        let limit = IncludeError::RecursionLimit {
            href: "b.xml".to_string(),
        };
        assert!(cycle.is_fatal());
        assert!(!cycle.is_recursion_limit());
        assert!(limit.is_fatal());
        assert!(limit.is_recursion_limit());
        assert!(!IncludeError::InvalidDepth(-1).is_fatal());
        assert_eq!(
            limit.to_string(),
            "maximum xinclude depth reached when including file b.xml"
        );
    }

    #[test]
    fn test_umbrella_conversion_keeps_source() {
        let err: Error = PathSyntaxError::new("invalid predicate").into();
        assert!(matches!(err, Error::Path(_)));
        assert_eq!(err.to_string(), "path syntax error: invalid predicate");
        assert!(std::error::Error::source(&err).is_some());
    }
}
