// Lexer for the textual loop-nest IR (`.ir` files).
//
// Uses the `logos` crate for DFA-based lexing. Whitespace (including
// newlines) and `#` comments are insignificant.
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

/// IR token types.
///
/// Identifiers carry no value; use the span to retrieve the text from the
/// source. Identifiers may contain dots (`f.buffer`, `f.folding_semaphore.0`).
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+|#[^\n]*")]
pub enum Token {
    // ── Keywords ──
    #[token("let")]
    Let,
    #[token("in")]
    In,
    #[token("for")]
    For,
    #[token("unrolled")]
    Unrolled,
    #[token("parallel")]
    Parallel,
    #[token("vectorized")]
    Vectorized,
    #[token("produce")]
    Produce,
    #[token("consume")]
    Consume,
    #[token("realize")]
    Realize,
    #[token("assert")]
    Assert,
    #[token("eval")]
    Eval,
    #[token("acquire")]
    Acquire,
    #[token("extern")]
    Extern,
    #[token("min")]
    Min,
    #[token("max")]
    Max,
    #[token("select")]
    Select,
    #[token("likely")]
    Likely,
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
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token("=")]
    Assign,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("==")]
    EqEq,
    #[token("!=")]
    Ne,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,
    #[token("&")]
    Amp,

    // ── Literals ──
    /// Non-negative integer literal; negation is a unary operator.
    #[regex(r"[0-9]+", parse_int)]
    Int(i64),

    /// String literal with `\"`, `\\`, `\n`, `\t`, `\r`, `\0` escapes.
    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    Str(String),

    // ── Identifier ──
    /// Identifier: `[a-zA-Z_][a-zA-Z0-9_]*` segments joined by dots.
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*(\.[a-zA-Z0-9_]+)*")]
    Ident,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Token::Let => "let",
            Token::In => "in",
            Token::For => "for",
            Token::Unrolled => "unrolled",
            Token::Parallel => "parallel",
            Token::Vectorized => "vectorized",
            Token::Produce => "produce",
            Token::Consume => "consume",
            Token::Realize => "realize",
            Token::Assert => "assert",
            Token::Eval => "eval",
            Token::Acquire => "acquire",
            Token::Extern => "extern",
            Token::Min => "min",
            Token::Max => "max",
            Token::Select => "select",
            Token::Likely => "likely",
            Token::True => "true",
            Token::False => "false",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Comma => ",",
            Token::Semi => ";",
            Token::Assign => "=",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Lt => "<",
            Token::Le => "<=",
            Token::Gt => ">",
            Token::Ge => ">=",
            Token::EqEq => "==",
            Token::Ne => "!=",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::Bang => "!",
            Token::Amp => "&",
            Token::Int(v) => return write!(f, "{v}"),
            Token::Str(s) => return write!(f, "{s:?}"),
            Token::Ident => "<ident>",
        };
        write!(f, "{s}")
    }
}

// ── Callbacks ──

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<i64> {
    lex.slice().parse().ok()
}

fn parse_string(lex: &mut logos::Lexer<'_, Token>) -> Option<String> {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1]; // strip quotes
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                '"' => result.push('"'),
                '\\' => result.push('\\'),
                'n' => result.push('\n'),
                't' => result.push('\t'),
                'r' => result.push('\r'),
                '0' => result.push('\0'),
                _ => return None,
            }
        } else {
            result.push(c);
        }
    }
    Some(result)
}

// ── Public API ──

/// Lex an IR source string into tokens.
///
/// Returns all successfully parsed tokens together with any errors for
/// unrecognised characters. Lexing is non-fatal: errors are collected and
/// the lexer continues past bad characters.
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

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_ok(src: &str) -> Vec<Token> {
        let result = lex(src);
        assert!(result.errors.is_empty(), "lex errors: {:?}", result.errors);
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn keywords() {
        let tokens = lex_ok("let in for unrolled parallel vectorized produce consume realize");
        assert_eq!(
            tokens,
            vec![
                Token::Let,
                Token::In,
                Token::For,
                Token::Unrolled,
                Token::Parallel,
                Token::Vectorized,
                Token::Produce,
                Token::Consume,
                Token::Realize,
            ]
        );
    }

    #[test]
    fn keyword_vs_ident() {
        // `format` is an identifier, not keyword `for` + `mat`
        assert_eq!(lex_ok("for format"), vec![Token::For, Token::Ident]);
    }

    #[test]
    fn dotted_identifiers() {
        let src = "f.folding_semaphore.0";
        let result = lex(src);
        assert_eq!(result.tokens.len(), 1);
        assert_eq!(result.tokens[0].0, Token::Ident);
        assert_eq!(result.tokens[0].1, Span { start: 0, end: src.len() });
    }

    #[test]
    fn operators_prefer_longest_match() {
        assert_eq!(
            lex_ok("<= < == = && & != !"),
            vec![
                Token::Le,
                Token::Lt,
                Token::EqEq,
                Token::Assign,
                Token::AndAnd,
                Token::Amp,
                Token::Ne,
                Token::Bang,
            ]
        );
    }

    #[test]
    fn literals_and_comments() {
        assert_eq!(
            lex_ok("42 # trailing comment\n\"a\\\"b\""),
            vec![Token::Int(42), Token::Str("a\"b".to_string())]
        );
    }

    #[test]
    fn bad_character_is_reported() {
        let result = lex("x $ y");
        assert_eq!(result.tokens.len(), 2);
        assert_eq!(result.errors.len(), 1);
    }
}
