//! Tokeniser for SIEVE scripts (RFC 5228 lexical structure).

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{is_not, tag, take_until, take_while, take_while1},
    character::complete::{anychar, char, digit1, not_line_ending, one_of},
    combinator::{opt, recognize, value},
    multi::many0_count,
    sequence::{delimited, pair, preceded},
};
use thiserror::Error;

/// The token classes recognised by the SIEVE grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    LeftBracket,
    RightBracket,
    LeftParenthesis,
    RightParenthesis,
    LeftCBracket,
    RightCBracket,
    Semicolon,
    Comma,
    HashComment,
    BracketComment,
    Multiline,
    String,
    Identifier,
    Tag,
    Number,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TokenKind::LeftBracket => "left_bracket",
            TokenKind::RightBracket => "right_bracket",
            TokenKind::LeftParenthesis => "left_parenthesis",
            TokenKind::RightParenthesis => "right_parenthesis",
            TokenKind::LeftCBracket => "left_cbracket",
            TokenKind::RightCBracket => "right_cbracket",
            TokenKind::Semicolon => "semicolon",
            TokenKind::Comma => "comma",
            TokenKind::HashComment => "hash_comment",
            TokenKind::BracketComment => "bracket_comment",
            TokenKind::Multiline => "multiline",
            TokenKind::String => "string",
            TokenKind::Identifier => "identifier",
            TokenKind::Tag => "tag",
            TokenKind::Number => "number",
        };
        f.write_str(name)
    }
}

/// A recognised token: kind, raw lexeme and byte offset into the source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub offset: usize,
}

/// Raised when no token rule matches the upcoming input.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("unknown token near '{snippet}'")]
pub struct ScanError {
    pub offset: usize,
    pub snippet: String,
}

fn identifier_token(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))
    .parse(input)
}

fn tag_token(input: &str) -> IResult<&str, &str> {
    recognize(preceded(char(':'), identifier_token)).parse(input)
}

fn number_token(input: &str) -> IResult<&str, &str> {
    recognize(pair(digit1, opt(one_of("KMGkmg")))).parse(input)
}

fn string_token(input: &str) -> IResult<&str, &str> {
    recognize(delimited(
        char('"'),
        many0_count(alt((
            value((), is_not("\\\"")),
            value((), pair(char('\\'), anychar)),
        ))),
        char('"'),
    ))
    .parse(input)
}

fn hash_comment_token(input: &str) -> IResult<&str, &str> {
    recognize(pair(char('#'), not_line_ending)).parse(input)
}

fn bracket_comment_token(input: &str) -> IResult<&str, &str> {
    recognize(delimited(tag("/*"), take_until("*/"), tag("*/"))).parse(input)
}

/// Length of a `text:` multiline literal, which runs until the first line
/// consisting solely of `.`. Returns `None` when unterminated.
fn multiline_len(input: &str) -> Option<usize> {
    input.strip_prefix("text:")?;
    let mut search = "text:".len();
    loop {
        let nl = search + input[search..].find('\n')?;
        let line_start = nl + 1;
        let line_end = input[line_start..]
            .find('\n')
            .map(|i| i + line_start)
            .unwrap_or(input.len());
        let line = input[line_start..line_end].trim_end_matches('\r');
        if line == "." {
            return Some(line_start + 1);
        }
        search = line_end;
    }
}

/// Lazy token stream over a SIEVE source string.
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    /// Current byte offset into the source.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// 1-based line and column for a byte offset.
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.input.len());
        let before = &self.input[..offset];
        let line = before.matches('\n').count() + 1;
        let col = offset - before.rfind('\n').map(|i| i + 1).unwrap_or(0) + 1;
        (line, col)
    }

    fn skip_whitespace(&mut self) {
        let rest = &self.input[self.pos..];
        let trimmed = rest.trim_start_matches([' ', '\t', '\r', '\n']);
        self.pos += rest.len() - trimmed.len();
    }

    /// Next token, or `None` at end of input.
    pub fn next_token(&mut self) -> Result<Option<Token<'a>>, ScanError> {
        self.skip_whitespace();
        let rest = &self.input[self.pos..];
        let Some(first) = rest.chars().next() else {
            return Ok(None);
        };

        let punct = |kind: TokenKind| Some((kind, first.len_utf8()));
        let scanned = match first {
            '[' => punct(TokenKind::LeftBracket),
            ']' => punct(TokenKind::RightBracket),
            '(' => punct(TokenKind::LeftParenthesis),
            ')' => punct(TokenKind::RightParenthesis),
            '{' => punct(TokenKind::LeftCBracket),
            '}' => punct(TokenKind::RightCBracket),
            ';' => punct(TokenKind::Semicolon),
            ',' => punct(TokenKind::Comma),
            '#' => Self::run(hash_comment_token, rest).map(|n| (TokenKind::HashComment, n)),
            '/' => Self::run(bracket_comment_token, rest).map(|n| (TokenKind::BracketComment, n)),
            '"' => Self::run(string_token, rest).map(|n| (TokenKind::String, n)),
            ':' => Self::run(tag_token, rest).map(|n| (TokenKind::Tag, n)),
            c if c.is_ascii_digit() => {
                Self::run(number_token, rest).map(|n| (TokenKind::Number, n))
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                if rest.starts_with("text:") {
                    multiline_len(rest).map(|n| (TokenKind::Multiline, n))
                } else {
                    Self::run(identifier_token, rest).map(|n| (TokenKind::Identifier, n))
                }
            }
            _ => None,
        };

        match scanned {
            Some((kind, len)) => {
                let token = Token {
                    kind,
                    lexeme: &rest[..len],
                    offset: self.pos,
                };
                self.pos += len;
                Ok(Some(token))
            }
            None => Err(ScanError {
                offset: self.pos,
                snippet: rest.chars().take(20).collect(),
            }),
        }
    }

    fn run(parser: fn(&str) -> IResult<&str, &str>, input: &str) -> Option<usize> {
        parser(input).ok().map(|(_, lexeme)| lexeme.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<(TokenKind, String)> {
        let mut lexer = Lexer::new(src);
        let mut out = Vec::new();
        while let Some(token) = lexer.next_token().expect("scan failed") {
            out.push((token.kind, token.lexeme.to_string()));
        }
        out
    }

    #[test]
    fn scans_simple_command() {
        assert_eq!(
            kinds("if size :over 100k { discard; }"),
            vec![
                (TokenKind::Identifier, "if".into()),
                (TokenKind::Identifier, "size".into()),
                (TokenKind::Tag, ":over".into()),
                (TokenKind::Number, "100k".into()),
                (TokenKind::LeftCBracket, "{".into()),
                (TokenKind::Identifier, "discard".into()),
                (TokenKind::Semicolon, ";".into()),
                (TokenKind::RightCBracket, "}".into()),
            ]
        );
    }

    #[test]
    fn scans_strings_with_escapes() {
        assert_eq!(
            kinds(r#""plain" "with \"quotes\"" "back\\slash""#),
            vec![
                (TokenKind::String, r#""plain""#.into()),
                (TokenKind::String, r#""with \"quotes\"""#.into()),
                (TokenKind::String, r#""back\\slash""#.into()),
            ]
        );
    }

    #[test]
    fn scans_comments() {
        let tokens = kinds("# a comment\nkeep; /* block\ncomment */ stop;");
        assert_eq!(tokens[0], (TokenKind::HashComment, "# a comment".into()));
        assert_eq!(tokens[3], (TokenKind::BracketComment, "/* block\ncomment */".into()));
        assert_eq!(tokens[4], (TokenKind::Identifier, "stop".into()));
    }

    #[test]
    fn scans_multiline_literal() {
        let src = "reject text:\nline one\n\nline two\n.\n;";
        let tokens = kinds(src);
        assert_eq!(tokens[0], (TokenKind::Identifier, "reject".into()));
        assert_eq!(
            tokens[1],
            (TokenKind::Multiline, "text:\nline one\n\nline two\n.".into())
        );
        assert_eq!(tokens[2], (TokenKind::Semicolon, ";".into()));
    }

    #[test]
    fn multiline_allows_leading_dots_in_body() {
        let src = "text:\n.. not the end\n.\n";
        assert_eq!(
            kinds(src),
            vec![(TokenKind::Multiline, "text:\n.. not the end\n.".into())]
        );
    }

    #[test]
    fn rejects_unknown_tokens() {
        let mut lexer = Lexer::new("keep & stop");
        lexer.next_token().unwrap();
        let err = lexer.next_token().unwrap_err();
        assert_eq!(err.offset, 5);
        assert_eq!(lexer.line_col(err.offset), (1, 6));
    }

    #[test]
    fn tracks_line_and_column() {
        let src = "keep;\n  discard;";
        let mut lexer = Lexer::new(src);
        lexer.next_token().unwrap();
        lexer.next_token().unwrap();
        let token = lexer.next_token().unwrap().unwrap();
        assert_eq!(token.lexeme, "discard");
        assert_eq!(lexer.line_col(token.offset), (2, 3));
    }

    #[test]
    fn number_suffixes_are_case_insensitive() {
        assert_eq!(
            kinds("100k 2M 3g 42"),
            vec![
                (TokenKind::Number, "100k".into()),
                (TokenKind::Number, "2M".into()),
                (TokenKind::Number, "3g".into()),
                (TokenKind::Number, "42".into()),
            ]
        );
    }
}
