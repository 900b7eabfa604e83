// Lexer for MRO source files.
//
// Uses the `logos` crate for DFA-based lexing. Whitespace (including
// newlines) and `#` comments are insignificant; line numbers are recovered
// from byte spans by the parser.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// MRO token types.
///
/// Identifiers carry no value; use the span to retrieve the text.
/// Modifier and resource names (`local`, `threads`, ...) are identifiers.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"#[^\n]*")]
pub enum Token {
    // ── Keywords ──
    #[token("@include")]
    Include,
    #[token("filetype")]
    Filetype,
    #[token("struct")]
    Struct,
    #[token("stage")]
    Stage,
    #[token("pipeline")]
    Pipeline,
    #[token("call")]
    Call,
    #[token("map")]
    Map,
    #[token("as")]
    As,
    #[token("using")]
    Using,
    #[token("split")]
    Split,
    #[token("return")]
    Return,
    #[token("retain")]
    Retain,
    #[token("in")]
    In,
    #[token("out")]
    Out,
    #[token("src")]
    Src,
    #[token("self")]
    SelfKw,
    #[token("null")]
    Null,
    #[token("true")]
    True,
    #[token("false")]
    False,

    // ── Symbols ──
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token(",")]
    Comma,
    #[token("=")]
    Equals,
    #[token(".")]
    Dot,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,
    #[token("*")]
    Star,

    // ── Literals ──
    /// Float literal: a fraction or an exponent is required.
    #[regex(r"-?[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", parse_float)]
    #[regex(r"-?[0-9]+[eE][+-]?[0-9]+", parse_float)]
    Float(f64),

    #[regex(r"-?[0-9]+", parse_int)]
    Int(i64),

    /// String literal with JSON-style escapes.
    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    Str(String),

    // ── Identifier ──
    //
    // logos prioritises fixed `#[token]` matches over regex for the same
    // length, so `call` matches Call, not Ident.
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Include => write!(f, "@include"),
            Token::Filetype => write!(f, "filetype"),
            Token::Struct => write!(f, "struct"),
            Token::Stage => write!(f, "stage"),
            Token::Pipeline => write!(f, "pipeline"),
            Token::Call => write!(f, "call"),
            Token::Map => write!(f, "map"),
            Token::As => write!(f, "as"),
            Token::Using => write!(f, "using"),
            Token::Split => write!(f, "split"),
            Token::Return => write!(f, "return"),
            Token::Retain => write!(f, "retain"),
            Token::In => write!(f, "in"),
            Token::Out => write!(f, "out"),
            Token::Src => write!(f, "src"),
            Token::SelfKw => write!(f, "self"),
            Token::Null => write!(f, "null"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Lt => write!(f, "<"),
            Token::Gt => write!(f, ">"),
            Token::Comma => write!(f, ","),
            Token::Equals => write!(f, "="),
            Token::Dot => write!(f, "."),
            Token::Colon => write!(f, ":"),
            Token::Semicolon => write!(f, ";"),
            Token::Star => write!(f, "*"),
            Token::Float(v) => write!(f, "{v}"),
            Token::Int(v) => write!(f, "{v}"),
            Token::Str(s) => write!(f, "{s:?}"),
            Token::Ident => write!(f, "<ident>"),
        }
    }
}

// ── Callbacks ──

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<i64> {
    lex.slice().parse().ok()
}

fn parse_float(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

fn parse_string(lex: &mut logos::Lexer<'_, Token>) -> Option<String> {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1]; // strip quotes
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next()? {
            '"' => result.push('"'),
            '\\' => result.push('\\'),
            '/' => result.push('/'),
            'n' => result.push('\n'),
            't' => result.push('\t'),
            'r' => result.push('\r'),
            'b' => result.push('\u{8}'),
            'f' => result.push('\u{c}'),
            'u' => {
                let hex: String = chars.by_ref().take(4).collect();
                let code = u32::from_str_radix(&hex, 16).ok()?;
                result.push(char::from_u32(code)?);
            }
            _ => return None,
        }
    }
    Some(result)
}

// ── Public API ──

/// Lex an MRO source string into tokens.
///
/// Lexing is non-fatal: errors are collected and the lexer continues past
/// bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

/// The `@include` targets of a source, in order, with the byte offset of
/// each directive. Used to discover the include graph before parsing.
pub fn include_directives(source: &str) -> Vec<(String, usize)> {
    let tokens = lex(source).tokens;
    tokens
        .windows(2)
        .filter_map(|w| match (&w[0], &w[1]) {
            ((Token::Include, span), (Token::Str(path), _)) => Some((path.clone(), span.start)),
            _ => None,
        })
        .collect()
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: lex and assert no errors, return token list.
    fn lex_ok(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(
            result.errors.is_empty(),
            "unexpected lex errors: {:?}",
            result.errors
        );
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn keywords() {
        let tokens = lex_ok("filetype struct stage pipeline call map as using split return retain in out src self null true false");
        assert_eq!(
            tokens,
            vec![
                Token::Filetype,
                Token::Struct,
                Token::Stage,
                Token::Pipeline,
                Token::Call,
                Token::Map,
                Token::As,
                Token::Using,
                Token::Split,
                Token::Return,
                Token::Retain,
                Token::In,
                Token::Out,
                Token::Src,
                Token::SelfKw,
                Token::Null,
                Token::True,
                Token::False,
            ]
        );
    }

    #[test]
    fn keyword_prefix_is_ident() {
        assert_eq!(lex_ok("calls"), vec![Token::Ident]);
        assert_eq!(lex_ok("mapping"), vec![Token::Ident]);
        assert_eq!(lex_ok("local"), vec![Token::Ident]);
    }

    #[test]
    fn numbers() {
        assert_eq!(lex_ok("42"), vec![Token::Int(42)]);
        assert_eq!(lex_ok("-3"), vec![Token::Int(-3)]);
        assert_eq!(lex_ok("2.5"), vec![Token::Float(2.5)]);
        assert_eq!(lex_ok("1e3"), vec![Token::Float(1000.0)]);
        assert_eq!(lex_ok("-1.5e-1"), vec![Token::Float(-0.15)]);
    }

    #[test]
    fn strings_with_escapes() {
        assert_eq!(lex_ok(r#""a\"b""#), vec![Token::Str("a\"b".into())]);
        assert_eq!(lex_ok(r#""x\ny""#), vec![Token::Str("x\ny".into())]);
        assert_eq!(lex_ok(r#""A""#), vec![Token::Str("A".into())]);
        assert!(!lex(r#""\q""#).errors.is_empty());
    }

    #[test]
    fn comments_and_newlines_skipped() {
        let tokens = lex_ok("# header\nstage # trailing\n\nFOO");
        assert_eq!(tokens, vec![Token::Stage, Token::Ident]);
    }

    #[test]
    fn references_tokenize_with_dots() {
        let tokens = lex_ok("self.x CALL.out.f");
        assert_eq!(
            tokens,
            vec![
                Token::SelfKw,
                Token::Dot,
                Token::Ident,
                Token::Ident,
                Token::Dot,
                Token::Ident,
                Token::Dot,
                Token::Ident,
            ]
        );
    }

    #[test]
    fn spans_correct() {
        let result = lex("in int x");
        let spans: Vec<_> = result.tokens.iter().map(|(_, s)| (s.start, s.end)).collect();
        assert_eq!(spans, vec![(0, 2), (3, 6), (7, 8)]);
    }

    #[test]
    fn error_recovery() {
        let result = lex("stage ^ FOO");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].message, "unexpected character: \"^\"");
        assert_eq!(result.tokens.len(), 2);
    }

    #[test]
    fn finds_include_directives() {
        let src = "@include \"a.mro\"\n# @include \"skip.mro\"\n@include \"b/c.mro\"\nstage X()";
        let found = include_directives(src);
        let paths: Vec<_> = found.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["a.mro", "b/c.mro"]);
        assert_eq!(found[1].1, src.find("@include \"b").unwrap());
    }
}
