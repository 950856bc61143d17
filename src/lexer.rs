pub mod error;
pub mod token;

use compact_str::CompactString;
use error::LexerError;
use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, tag},
    character::complete::{alpha1, alphanumeric1, char, digit1, none_of},
    combinator::{map, opt, recognize, value},
    multi::many0,
    sequence::{delimited, pair, preceded},
    IResult, InputTake,
};
use token::{Token, TokenKind};

use crate::range::{Position, Range, Span};

/// The template tokenizer.
///
/// Operates in two modes: text mode copies raw template content until the
/// next `{{` or `{%`, code mode tokenizes expressions until the matching
/// close marker. Registered multi-character operator symbols are matched
/// longest-first, so `<=` never lexes as `<` followed by `=`.
pub struct Lexer {
    symbols: Vec<CompactString>,
}

impl Lexer {
    /// Creates a lexer that recognizes the given symbolic operator symbols.
    /// Word-like operators (`and`, `contains`, …) lex as identifiers and
    /// are resolved by the parser.
    pub fn new(mut symbols: Vec<CompactString>) -> Self {
        symbols.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        Self { symbols }
    }

    pub fn tokenize(&self, input: &str) -> Result<Vec<Token>, LexerError> {
        let mut span = Span::new(input);
        let mut tokens = Vec::new();

        loop {
            match find_open(span.fragment()) {
                None => {
                    let len = span.fragment().len();
                    let (rest, raw) = span.take_split(len);
                    if !raw.fragment().is_empty() {
                        tokens.push(token_between(
                            &raw,
                            &rest,
                            TokenKind::Raw(raw.fragment().to_string()),
                        ));
                    }
                    span = rest;
                    break;
                }
                Some((idx, output)) => {
                    if idx > 0 {
                        let (rest, raw) = span.take_split(idx);
                        tokens.push(token_between(
                            &raw,
                            &rest,
                            TokenKind::Raw(raw.fragment().to_string()),
                        ));
                        span = rest;
                    }
                    let (marker_len, kind) = open_marker(span.fragment(), output);
                    let (rest, marker) = span.take_split(marker_len);
                    tokens.push(token_between(&marker, &rest, kind));
                    span = self.lex_code(rest, &mut tokens)?;
                }
            }
        }

        apply_whitespace_control(&mut tokens);

        let eof: Position = (&span).into();
        tokens.push(Token {
            range: Range::new(eof, eof),
            kind: TokenKind::Eof,
        });
        Ok(tokens)
    }

    /// Tokenizes code mode until a close marker, returning the remaining
    /// text-mode span.
    fn lex_code<'a>(
        &self,
        mut span: Span<'a>,
        tokens: &mut Vec<Token>,
    ) -> Result<Span<'a>, LexerError> {
        loop {
            let ws = span.fragment().len() - span.fragment().trim_start().len();
            if ws > 0 {
                let (rest, _) = span.take_split(ws);
                span = rest;
            }
            let frag = *span.fragment();
            if frag.is_empty() {
                return Err(LexerError::UnexpectedEof((&span).into()));
            }

            // Both close kinds are recognized here; a mismatched close is
            // the parser's error to report.
            let mut closed = None;
            for (marker, kind) in [
                ("-}}", TokenKind::OutputClose { trim: true }),
                ("}}", TokenKind::OutputClose { trim: false }),
                ("-%}", TokenKind::TagClose { trim: true }),
                ("%}", TokenKind::TagClose { trim: false }),
            ] {
                if frag.starts_with(marker) {
                    let (rest, m) = span.take_split(marker.len());
                    tokens.push(token_between(&m, &rest, kind));
                    closed = Some(rest);
                    break;
                }
            }
            if let Some(rest) = closed {
                return Ok(rest);
            }

            let c = frag.chars().next().unwrap_or_default();

            if let Some(kind) = punctuation(c) {
                let (rest, p) = span.take_split(c.len_utf8());
                tokens.push(token_between(&p, &rest, kind));
                span = rest;
                continue;
            }

            if c == '"' || c == '\'' {
                let start: Position = (&span).into();
                match string_literal(span) {
                    Ok((rest, s)) => {
                        tokens.push(Token {
                            range: Range::new(start, (&rest).into()),
                            kind: TokenKind::String(s),
                        });
                        span = rest;
                        continue;
                    }
                    Err(_) => {
                        let (rest, _) = span.take_split(frag.len());
                        return Err(LexerError::UnexpectedEof((&rest).into()));
                    }
                }
            }

            if c.is_ascii_digit() {
                if let Ok((rest, kind)) = number(span) {
                    let start: Position = (&span).into();
                    tokens.push(Token {
                        range: Range::new(start, (&rest).into()),
                        kind,
                    });
                    span = rest;
                    continue;
                }
            }

            if c.is_alphabetic() || c == '_' {
                if let Ok((rest, name)) = ident(span) {
                    tokens.push(token_between(
                        &name,
                        &rest,
                        TokenKind::Ident(CompactString::new(name.fragment())),
                    ));
                    span = rest;
                    continue;
                }
            }

            // Registered operator symbols, longest first.
            if let Some(symbol) = self
                .symbols
                .iter()
                .find(|symbol| frag.starts_with(symbol.as_str()))
            {
                let (rest, s) = span.take_split(symbol.len());
                tokens.push(token_between(&s, &rest, TokenKind::Operator(symbol.clone())));
                span = rest;
                continue;
            }

            // Anything else lexes as an unknown operator symbol so the
            // parser can report it with its position.
            let run = frag
                .chars()
                .take_while(|ch| is_operator_char(*ch))
                .collect::<String>();
            let len = if run.is_empty() { c.len_utf8() } else { run.len() };
            let (rest, s) = span.take_split(len);
            tokens.push(token_between(
                &s,
                &rest,
                TokenKind::Operator(CompactString::new(s.fragment())),
            ));
            span = rest;
        }
    }
}

fn token_between(start: &Span, end: &Span, kind: TokenKind) -> Token {
    Token {
        range: Range::new(start.into(), end.into()),
        kind,
    }
}

/// Byte offset and kind (`true` = output block) of the next open marker.
fn find_open(fragment: &str) -> Option<(usize, bool)> {
    let bytes = fragment.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'{' {
            match bytes[i + 1] {
                b'{' => return Some((i, true)),
                b'%' => return Some((i, false)),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

fn open_marker(fragment: &str, output: bool) -> (usize, TokenKind) {
    if output {
        if fragment.starts_with("{{-") {
            (3, TokenKind::OutputOpen { trim: true })
        } else {
            (2, TokenKind::OutputOpen { trim: false })
        }
    } else if fragment.starts_with("{%-") {
        (3, TokenKind::TagOpen { trim: true })
    } else {
        (2, TokenKind::TagOpen { trim: false })
    }
}

fn punctuation(c: char) -> Option<TokenKind> {
    match c {
        '.' => Some(TokenKind::Dot),
        ',' => Some(TokenKind::Comma),
        ':' => Some(TokenKind::Colon),
        '|' => Some(TokenKind::Pipe),
        '(' => Some(TokenKind::LParen),
        ')' => Some(TokenKind::RParen),
        '[' => Some(TokenKind::LBracket),
        ']' => Some(TokenKind::RBracket),
        _ => None,
    }
}

fn is_operator_char(c: char) -> bool {
    matches!(c, '!' | '=' | '<' | '>' | '+' | '-' | '*' | '/' | '%' | '^' | '~' | '?' | '&')
}

fn escape_char(input: Span) -> IResult<Span, char> {
    alt((
        value('\\', char('\\')),
        value('"', char('"')),
        value('\'', char('\'')),
        value('\n', char('n')),
        value('\t', char('t')),
        value('\r', char('r')),
    ))(input)
}

fn string_literal(input: Span) -> IResult<Span, String> {
    alt((
        map(tag("\"\""), |_: Span| String::new()),
        map(tag("''"), |_: Span| String::new()),
        delimited(
            char('"'),
            escaped_transform(none_of("\"\\"), '\\', escape_char),
            char('"'),
        ),
        delimited(
            char('\''),
            escaped_transform(none_of("'\\"), '\\', escape_char),
            char('\''),
        ),
    ))(input)
}

fn number(input: Span) -> IResult<Span, TokenKind> {
    map(
        recognize(pair(digit1, opt(preceded(char('.'), digit1)))),
        |span: Span| {
            let text = *span.fragment();
            if text.contains('.') {
                TokenKind::Float(text.parse().unwrap_or(0.0))
            } else {
                text.parse()
                    .map(TokenKind::Int)
                    .unwrap_or_else(|_| TokenKind::Float(text.parse().unwrap_or(0.0)))
            }
        },
    )(input)
}

fn ident(input: Span) -> IResult<Span, Span> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)
}

/// Applies `{{-`/`-}}` whitespace control to the adjacent raw tokens and
/// drops raw tokens that end up empty.
fn apply_whitespace_control(tokens: &mut Vec<Token>) {
    for i in 0..tokens.len() {
        let trim_prev = matches!(
            tokens[i].kind,
            TokenKind::OutputOpen { trim: true } | TokenKind::TagOpen { trim: true }
        );
        if trim_prev && i > 0 {
            if let TokenKind::Raw(s) = &mut tokens[i - 1].kind {
                s.truncate(s.trim_end().len());
            }
        }
        let trim_next = matches!(
            tokens[i].kind,
            TokenKind::OutputClose { trim: true } | TokenKind::TagClose { trim: true }
        );
        if trim_next && i + 1 < tokens.len() {
            if let TokenKind::Raw(s) = &mut tokens[i + 1].kind {
                *s = s.trim_start().to_string();
            }
        }
    }
    tokens.retain(|t| !matches!(&t.kind, TokenKind::Raw(s) if s.is_empty()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn lexer() -> Lexer {
        Lexer::new(
            ["==", "!=", "<=", ">=", "<", ">", "=", "+", "-", "*", "/", "%"]
                .into_iter()
                .map(CompactString::new)
                .collect(),
        )
    }

    fn range(
        start_line: u32,
        start_column: usize,
        end_line: u32,
        end_column: usize,
    ) -> Range {
        Range::new(
            Position::new(start_line, start_column),
            Position::new(end_line, end_column),
        )
    }

    #[rstest]
    #[case::output("Hello, {{ name }}!",
        Ok(vec![
            Token { range: range(1, 1, 1, 8), kind: TokenKind::Raw("Hello, ".to_string()) },
            Token { range: range(1, 8, 1, 10), kind: TokenKind::OutputOpen { trim: false } },
            Token { range: range(1, 11, 1, 15), kind: TokenKind::Ident(CompactString::new("name")) },
            Token { range: range(1, 16, 1, 18), kind: TokenKind::OutputClose { trim: false } },
            Token { range: range(1, 18, 1, 19), kind: TokenKind::Raw("!".to_string()) },
            Token { range: range(1, 19, 1, 19), kind: TokenKind::Eof },
        ]))]
    #[case::operator_longest_match("{{ a <= b }}",
        Ok(vec![
            Token { range: range(1, 1, 1, 3), kind: TokenKind::OutputOpen { trim: false } },
            Token { range: range(1, 4, 1, 5), kind: TokenKind::Ident(CompactString::new("a")) },
            Token { range: range(1, 6, 1, 8), kind: TokenKind::Operator(CompactString::new("<=")) },
            Token { range: range(1, 9, 1, 10), kind: TokenKind::Ident(CompactString::new("b")) },
            Token { range: range(1, 11, 1, 13), kind: TokenKind::OutputClose { trim: false } },
            Token { range: range(1, 13, 1, 13), kind: TokenKind::Eof },
        ]))]
    #[case::chain_and_filter("{{ a.b[1] | size }}",
        Ok(vec![
            Token { range: range(1, 1, 1, 3), kind: TokenKind::OutputOpen { trim: false } },
            Token { range: range(1, 4, 1, 5), kind: TokenKind::Ident(CompactString::new("a")) },
            Token { range: range(1, 5, 1, 6), kind: TokenKind::Dot },
            Token { range: range(1, 6, 1, 7), kind: TokenKind::Ident(CompactString::new("b")) },
            Token { range: range(1, 7, 1, 8), kind: TokenKind::LBracket },
            Token { range: range(1, 8, 1, 9), kind: TokenKind::Int(1) },
            Token { range: range(1, 9, 1, 10), kind: TokenKind::RBracket },
            Token { range: range(1, 11, 1, 12), kind: TokenKind::Pipe },
            Token { range: range(1, 13, 1, 17), kind: TokenKind::Ident(CompactString::new("size")) },
            Token { range: range(1, 18, 1, 20), kind: TokenKind::OutputClose { trim: false } },
            Token { range: range(1, 20, 1, 20), kind: TokenKind::Eof },
        ]))]
    #[case::string_escapes("{{ \"a\\nb\" }}",
        Ok(vec![
            Token { range: range(1, 1, 1, 3), kind: TokenKind::OutputOpen { trim: false } },
            Token { range: range(1, 4, 1, 10), kind: TokenKind::String("a\nb".to_string()) },
            Token { range: range(1, 11, 1, 13), kind: TokenKind::OutputClose { trim: false } },
            Token { range: range(1, 13, 1, 13), kind: TokenKind::Eof },
        ]))]
    #[case::tag_block("{% if x %}",
        Ok(vec![
            Token { range: range(1, 1, 1, 3), kind: TokenKind::TagOpen { trim: false } },
            Token { range: range(1, 4, 1, 6), kind: TokenKind::Ident(CompactString::new("if")) },
            Token { range: range(1, 7, 1, 8), kind: TokenKind::Ident(CompactString::new("x")) },
            Token { range: range(1, 9, 1, 11), kind: TokenKind::TagClose { trim: false } },
            Token { range: range(1, 11, 1, 11), kind: TokenKind::Eof },
        ]))]
    #[case::float_literal("{{ 3.25 }}",
        Ok(vec![
            Token { range: range(1, 1, 1, 3), kind: TokenKind::OutputOpen { trim: false } },
            Token { range: range(1, 4, 1, 8), kind: TokenKind::Float(3.25) },
            Token { range: range(1, 9, 1, 11), kind: TokenKind::OutputClose { trim: false } },
            Token { range: range(1, 11, 1, 11), kind: TokenKind::Eof },
        ]))]
    #[case::eof_in_output("{{ name", Err(LexerError::UnexpectedEof(Position::new(1, 8))))]
    #[case::eof_in_tag("{% if", Err(LexerError::UnexpectedEof(Position::new(1, 6))))]
    #[case::eof_in_string("{{ \"abc }}", Err(LexerError::UnexpectedEof(Position::new(1, 11))))]
    fn test_tokenize(#[case] input: &str, #[case] expected: Result<Vec<Token>, LexerError>) {
        assert_eq!(lexer().tokenize(input), expected);
    }

    #[test]
    fn test_whitespace_control() {
        let tokens = lexer().tokenize("a \n{{- 1 -}} \nb").unwrap();
        let kinds = tokens.into_iter().map(|t| t.kind).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Raw("a".to_string()),
                TokenKind::OutputOpen { trim: true },
                TokenKind::Int(1),
                TokenKind::OutputClose { trim: true },
                TokenKind::Raw("b".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unknown_symbol_lexes_as_operator() {
        let tokens = lexer().tokenize("{{ a @ b }}").unwrap();
        assert!(tokens
            .iter()
            .any(|t| t.kind == TokenKind::Operator(CompactString::new("@"))));
    }

    #[test]
    fn test_lone_braces_stay_raw() {
        let tokens = lexer().tokenize("a { b } c").unwrap();
        assert_eq!(
            tokens.first().map(|t| t.kind.clone()),
            Some(TokenKind::Raw("a { b } c".to_string()))
        );
    }
}
