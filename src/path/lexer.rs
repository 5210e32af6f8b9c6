//! Path expression tokenizer.
//!
//! Splits a path into quoted literals, operators (`::`, `//`, `/`, `..`,
//! `()` and the single characters `/.*:[]()@=`) and barewords. A bareword is
//! an optional Clark-notation `{uri}` prefix followed by a run of characters
//! other than `/[]()@=` and whitespace. Whitespace between tokens is dropped.
//!
//! Barewords are namespace-resolved while tokenizing: `prefix:local` becomes
//! `{uri}local` through the caller's prefix map, and an unprefixed name gets
//! the default namespace (the map entry for `""`) unless it directly follows
//! `@`.

use crate::error::PathSyntaxError;

use super::Namespaces;

/// Operators, longest first so that `//` wins over `/`.
const OPERATORS: &[&str] = &[
    "::", "//", "..", "()", "/", ".", "*", ":", "[", "]", "(", ")", "@", "=",
];

/// A token of a path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    /// A quoted literal, quotes removed.
    Literal(String),
    /// One of [`OPERATORS`].
    Op(&'static str),
    /// A bareword (tag, attribute name, number or function name).
    Name(String),
}

/// A byte-level scanner over a path expression.
struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    /// Whitespace preceded the last token returned.
    spaced: bool,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            spaced: false,
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn next_raw_token(&mut self) -> Option<Token> {
        self.spaced = self.skip_whitespace();
        let rest = self.rest();
        let first = *rest.as_bytes().first()?;

        if first == b'\'' || first == b'"' {
            // An unterminated quote falls through to the bareword rule.
            if let Some(end) = rest[1..].find(char::from(first)) {
                self.pos += end + 2;
                return Some(Token::Literal(rest[1..=end].to_string()));
            }
        }

        if let Some(&op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            self.pos += op.len();
            return Some(Token::Op(op));
        }

        Some(Token::Name(self.read_name()))
    }

    fn read_name(&mut self) -> String {
        let start = self.pos;
        let rest = self.rest();
        if rest.starts_with('{') {
            if let Some(close) = rest.find('}').filter(|&close| close > 1) {
                let run = name_run(&rest[close + 1..]);
                if run > 0 {
                    self.pos += close + 1 + run;
                    return self.input[start..self.pos].to_string();
                }
            }
        }
        self.pos += name_run(rest);
        self.input[start..self.pos].to_string()
    }

    fn skip_whitespace(&mut self) -> bool {
        let skipped = self
            .rest()
            .bytes()
            .take_while(u8::is_ascii_whitespace)
            .count();
        self.pos += skipped;
        skipped > 0
    }
}

/// Length in bytes of the bareword run at the start of `text`.
fn name_run(text: &str) -> usize {
    text.bytes()
        .take_while(|b| !b.is_ascii_whitespace() && !b"/[]()@=".contains(b))
        .count()
}

/// Tokenizes `path`, resolving namespace prefixes through `namespaces`.
///
/// # Errors
///
/// Returns `PathSyntaxError` for a prefix missing from the map.
pub(crate) fn tokenize(
    path: &str,
    namespaces: Option<&Namespaces>,
) -> Result<Vec<Token>, PathSyntaxError> {
    let default_namespace = namespaces
        .and_then(|ns| ns.get(""))
        .filter(|uri| !uri.is_empty());
    let mut lexer = Lexer::new(path);
    let mut tokens = Vec::new();
    let mut parsing_attribute = false;

    while let Some(token) = lexer.next_raw_token() {
        // whitespace ends the attribute-name position
        if lexer.spaced {
            parsing_attribute = false;
        }
        let token = match token {
            Token::Name(name) if !name.starts_with('{') => {
                let resolved = if let Some((prefix, local)) = name.split_once(':') {
                    let uri = namespaces.and_then(|ns| ns.get(prefix)).ok_or_else(|| {
                        PathSyntaxError::new(format!("prefix '{prefix}' not found in prefix map"))
                    })?;
                    format!("{{{uri}}}{local}")
                } else {
                    match default_namespace {
                        Some(uri) if !parsing_attribute => format!("{{{uri}}}{name}"),
                        _ => name,
                    }
                };
                parsing_attribute = false;
                Token::Name(resolved)
            }
            other => {
                parsing_attribute = other == Token::Op("@");
                other
            }
        };
        tokens.push(token);
    }
    Ok(tokens)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lex(path: &str) -> Vec<Token> {
        tokenize(path, None).unwrap()
    }

    fn name(text: &str) -> Token {
        Token::Name(text.to_string())
    }

    #[test]
    fn test_tokenize_steps() {
        assert_eq!(
            lex("./a//b/.."),
            vec![
                Token::Op("."),
                Token::Op("/"),
                name("a"),
                Token::Op("//"),
                name("b"),
                Token::Op("/"),
                Token::Op(".."),
            ]
        );
    }

    #[test]
    fn test_tokenize_predicate_with_literal() {
        assert_eq!(
            lex("b[ @x = \"1 2\" ]"),
            vec![
                name("b"),
                Token::Op("["),
                Token::Op("@"),
                name("x"),
                Token::Op("="),
                Token::Literal("1 2".to_string()),
                Token::Op("]"),
            ]
        );
    }

    #[test]
    fn test_tokenize_last_function() {
        assert_eq!(
            lex("b[last()-1]"),
            vec![
                name("b"),
                Token::Op("["),
                name("last"),
                Token::Op("()"),
                name("-1"),
                Token::Op("]"),
            ]
        );
    }

    #[test]
    fn test_tokenize_clark_names_keep_slashes() {
        assert_eq!(
            lex("{http://x/y}a/{*}*/{}*"),
            vec![
                name("{http://x/y}a"),
                Token::Op("/"),
                name("{*}*"),
                Token::Op("/"),
                name("{}*"),
            ]
        );
    }

    #[test]
    fn test_tokenize_star_is_operator() {
        assert_eq!(lex("*"), vec![Token::Op("*")]);
        assert_eq!(lex("a*"), vec![name("a*")]);
    }

    #[test]
    fn test_prefix_resolution() {
        let ns: Namespaces = [("p".to_string(), "urn:p".to_string())].into_iter().collect();
        assert_eq!(tokenize("p:a", Some(&ns)).unwrap(), vec![name("{urn:p}a")]);
        let err = tokenize("q:a", Some(&ns)).unwrap_err();
        assert_eq!(err.message, "prefix 'q' not found in prefix map");
        assert!(tokenize("q:a", None).is_err());
    }

    #[test]
    fn test_default_namespace_skips_attributes() {
        let ns: Namespaces = [(String::new(), "urn:d".to_string())].into_iter().collect();
        assert_eq!(
            tokenize("a[@b]", Some(&ns)).unwrap(),
            vec![
                name("{urn:d}a"),
                Token::Op("["),
                Token::Op("@"),
                name("b"),
                Token::Op("]"),
            ]
        );
    }

    #[test]
    fn test_whitespace_after_at_applies_default_namespace() {
        let ns: Namespaces = [(String::new(), "urn:d".to_string())].into_iter().collect();
        assert_eq!(
            tokenize("a[@ b]", Some(&ns)).unwrap(),
            vec![
                name("{urn:d}a"),
                Token::Op("["),
                Token::Op("@"),
                name("{urn:d}b"),
                Token::Op("]"),
            ]
        );
    }

    #[test]
    fn test_unterminated_quote_is_bareword() {
        assert_eq!(lex("'abc"), vec![name("'abc")]);
    }
}
