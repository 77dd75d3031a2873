// Parser for the textual loop-nest IR.
//
// Parses a token stream (from the lexer) into `ir::Stmt` / `ir::Expr`.
// Uses chumsky combinators. The grammar is the one `ir::Stmt`'s `Display`
// prints, so printed IR always re-parses.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns a statement plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::diag::{codes, Diagnostic};
use crate::ir::*;
use crate::lexer::Token;

type ParseErrors = Vec<Rich<'static, Token, SimpleSpan>>;

/// Result of parsing: IR plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub stmt: Option<Stmt>,
    pub errors: ParseErrors,
}

impl ParseResult {
    /// Errors as `E0001` diagnostics, in source order.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        let mut diags: Vec<Diagnostic> = self.errors.iter().map(to_diagnostic).collect();
        diags.sort_by_key(|d| d.span.map(|s| s.start));
        diags
    }
}

fn to_diagnostic(e: &Rich<'static, Token, SimpleSpan>) -> Diagnostic {
    let span: SimpleSpan = *e.span();
    Diagnostic::error(codes::E0001, e.to_string()).with_span(crate::lexer::Span {
        start: span.start(),
        end: span.end(),
    })
}

/// Parse an IR source string. Lexes then parses.
///
/// A file holding several top-level statements yields a `Stmt::Block`.
pub fn parse(source: &str) -> ParseResult {
    let (stream_tokens, lex_errors) = tokens_of(source);
    let len = source.len();
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(stream_tokens).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = stmt_parser(source)
        .repeated()
        .collect::<Vec<_>>()
        .map(make_block)
        .then_ignore(end());
    let (stmt, parse_errors) = parser.parse(stream).into_output_errors();

    ParseResult {
        stmt,
        errors: merge_errors(lex_errors, parse_errors),
    }
}

/// Parse a single expression (used for schedule fold factors).
pub fn parse_expr(source: &str) -> Result<Expr, ParseErrors> {
    let (stream_tokens, lex_errors) = tokens_of(source);
    let len = source.len();
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(stream_tokens).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = expr_parser(source).then_ignore(end());
    let (expr, parse_errors) = parser.parse(stream).into_output_errors();
    let errors = merge_errors(lex_errors, parse_errors);
    match expr {
        Some(e) if errors.is_empty() => Ok(e),
        _ => Err(errors),
    }
}

fn tokens_of(source: &str) -> (Vec<(Token, SimpleSpan)>, Vec<crate::lexer::LexError>) {
    let lex_result = crate::lexer::lex(source);
    let tokens = lex_result
        .tokens
        .into_iter()
        .map(|(tok, span)| {
            let cspan: SimpleSpan = (span.start..span.end).into();
            (tok, cspan)
        })
        .collect();
    (tokens, lex_result.errors)
}

fn merge_errors(
    lex_errors: Vec<crate::lexer::LexError>,
    parse_errors: Vec<Rich<'_, Token, SimpleSpan>>,
) -> ParseErrors {
    let mut all_errors: ParseErrors = lex_errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));
    all_errors
}

fn make_block(mut stmts: Vec<Stmt>) -> Stmt {
    if stmts.len() == 1 {
        stmts.pop().unwrap_or(Stmt::Block(Vec::new()))
    } else {
        Stmt::Block(stmts)
    }
}

fn negate(e: Expr) -> Expr {
    match e {
        Expr::Int(v) => Expr::Int(-v),
        other => Expr::int(0) - other,
    }
}

// ── Expressions ──

fn name_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, String, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + Clone + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        source[span.start()..span.end()].to_string()
    })
}

fn expr_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Expr, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + Clone + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let name = name_parser(source);

    recursive(move |expr| {
        let args = expr
            .clone()
            .separated_by(just(Token::Comma))
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let pair = expr
            .clone()
            .then_ignore(just(Token::Comma))
            .then(expr.clone())
            .delimited_by(just(Token::LParen), just(Token::RParen));

        // ── Atoms ──

        let literal = select! {
            Token::Int(v) => Expr::Int(v),
            Token::Str(s) => Expr::Str(s),
            Token::True => Expr::Bool(true),
            Token::False => Expr::Bool(false),
        };

        let min = just(Token::Min)
            .ignore_then(pair.clone())
            .map(|(a, b)| Expr::min(a, b));
        let max = just(Token::Max)
            .ignore_then(pair.clone())
            .map(|(a, b)| Expr::max(a, b));

        let select = just(Token::Select)
            .ignore_then(
                expr.clone()
                    .then_ignore(just(Token::Comma))
                    .then(expr.clone())
                    .then_ignore(just(Token::Comma))
                    .then(expr.clone())
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .map(|((c, t), f)| Expr::select(c, t, f));

        let likely = just(Token::Likely)
            .ignore_then(
                expr.clone()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .map(Expr::likely);

        let extern_call = just(Token::Extern)
            .ignore_then(name.clone())
            .then(args.clone())
            .map(|(n, a)| Expr::call_extern(n, a));

        let handle = just(Token::Amp).ignore_then(name.clone()).map(Expr::handle);

        // `f(...)` reads buffer f; a bare name is a variable.
        let read_or_var = name
            .clone()
            .then(args.or_not())
            .map(|(n, a)| match a {
                Some(a) => Expr::read(n, a),
                None => Expr::var(n),
            });

        let parens = expr
            .clone()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let atom = choice((
            literal,
            min,
            max,
            select,
            likely,
            extern_call,
            handle,
            read_or_var,
            parens,
        ))
        .boxed();

        // ── Operators, tightest first ──

        let unary = choice((just(Token::Minus), just(Token::Bang)))
            .repeated()
            .foldr(atom, |op, e| match op {
                Token::Minus => negate(e),
                _ => Expr::not(e),
            })
            .boxed();

        let product = unary.clone().foldl(
            choice((
                just(Token::Star).to(BinOp::Mul),
                just(Token::Slash).to(BinOp::Div),
                just(Token::Percent).to(BinOp::Mod),
            ))
            .then(unary)
            .repeated(),
            |a, (op, b)| Expr::bin(op, a, b),
        );

        let sum = product
            .clone()
            .foldl(
                choice((
                    just(Token::Plus).to(BinOp::Add),
                    just(Token::Minus).to(BinOp::Sub),
                ))
                .then(product)
                .repeated(),
                |a, (op, b)| Expr::bin(op, a, b),
            )
            .boxed();

        let comparison = sum.clone().foldl(
            choice((
                just(Token::Le).to(CmpOp::Le),
                just(Token::Lt).to(CmpOp::Lt),
                just(Token::Ge).to(CmpOp::Ge),
                just(Token::Gt).to(CmpOp::Gt),
                just(Token::EqEq).to(CmpOp::Eq),
                just(Token::Ne).to(CmpOp::Ne),
            ))
            .then(sum)
            .repeated(),
            |a, (op, b)| Expr::cmp(op, a, b),
        );

        let conjunction = comparison
            .clone()
            .foldl(
                just(Token::AndAnd).ignore_then(comparison).repeated(),
                Expr::and,
            )
            .boxed();

        conjunction
            .clone()
            .foldl(just(Token::OrOr).ignore_then(conjunction).repeated(), Expr::or)
    })
}

// ── Statements ──

fn stmt_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Stmt, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + Clone + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let name = name_parser(source);
    let expr = expr_parser(source).boxed();

    recursive(move |stmt| {
        let block = stmt
            .repeated()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBrace), just(Token::RBrace))
            .map(make_block)
            .boxed();

        let comma = just(Token::Comma);

        // let NAME = expr in { ... }
        let let_stmt = just(Token::Let)
            .ignore_then(name.clone())
            .then_ignore(just(Token::Assign))
            .then(expr.clone())
            .then_ignore(just(Token::In))
            .then(block.clone())
            .map(|((n, value), body)| Stmt::let_in(n, value, body));

        // for|unrolled|parallel|vectorized (NAME, min, extent) { ... }
        let for_kind = select! {
            Token::For => ForKind::Serial,
            Token::Unrolled => ForKind::Unrolled,
            Token::Parallel => ForKind::Parallel,
            Token::Vectorized => ForKind::Vectorized,
        };
        let for_stmt = for_kind
            .then(
                name.clone()
                    .then_ignore(comma.clone())
                    .then(expr.clone())
                    .then_ignore(comma.clone())
                    .then(expr.clone())
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .then(block.clone())
            .map(|((kind, ((n, min), extent)), body)| {
                Stmt::for_loop(n, min, extent, kind, body)
            });

        // produce NAME { ... } | consume NAME { ... }
        let producer_consumer = choice((
            just(Token::Produce).to(true),
            just(Token::Consume).to(false),
        ))
        .then(name.clone())
        .then(block.clone())
        .map(|((is_producer, n), body)| {
            if is_producer {
                Stmt::produce(n, body)
            } else {
                Stmt::consume(n, body)
            }
        });

        // realize NAME([min, extent], ...) { ... }
        let range = expr
            .clone()
            .then_ignore(comma.clone())
            .then(expr.clone())
            .delimited_by(just(Token::LBracket), just(Token::RBracket))
            .map(|(min, extent)| Range::new(min, extent));
        let realize = just(Token::Realize)
            .ignore_then(name.clone())
            .then(
                range
                    .separated_by(comma.clone())
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .then(block.clone())
            .map(|((n, bounds), body)| Stmt::realize(n, bounds, body));

        // assert(cond, message);
        let assert = just(Token::Assert)
            .ignore_then(
                expr.clone()
                    .then_ignore(comma.clone())
                    .then(expr.clone())
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .then_ignore(just(Token::Semi))
            .map(|(condition, message)| Stmt::assert(condition, message));

        // eval expr;
        let eval = just(Token::Eval)
            .ignore_then(expr.clone())
            .then_ignore(just(Token::Semi))
            .map(Stmt::Evaluate);

        // acquire (sema, count) { ... }
        let acquire = just(Token::Acquire)
            .ignore_then(
                expr.clone()
                    .then_ignore(comma.clone())
                    .then(expr.clone())
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .then(block.clone())
            .map(|((sema, count), body)| Stmt::acquire(sema, count, body));

        // NAME(args) = expr;
        let provide = name
            .clone()
            .then(
                expr.clone()
                    .separated_by(comma.clone())
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .then_ignore(just(Token::Assign))
            .then(expr.clone())
            .then_ignore(just(Token::Semi))
            .map(|((n, args), value)| Stmt::provide(n, args, value));

        choice((
            let_stmt,
            for_stmt,
            producer_consumer,
            realize,
            assert,
            eval,
            acquire,
            provide,
        ))
    })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Stmt {
        let result = parse(src);
        assert!(result.errors.is_empty(), "parse errors: {:?}", result.errors);
        result.stmt.expect("no statement")
    }

    #[test]
    fn expression_precedence() {
        let e = parse_expr("a + b * 2 < c && !d || e").unwrap();
        let expected = Expr::or(
            Expr::and(
                Expr::lt(
                    Expr::var("a") + Expr::var("b") * Expr::int(2),
                    Expr::var("c"),
                ),
                Expr::not(Expr::var("d")),
            ),
            Expr::var("e"),
        );
        assert_eq!(e, expected);
    }

    #[test]
    fn negative_literals_and_left_associativity() {
        assert_eq!(
            parse_expr("x - 1 - 2").unwrap(),
            (Expr::var("x") - Expr::int(1)) - Expr::int(2)
        );
        assert_eq!(
            parse_expr("x * -3").unwrap(),
            Expr::var("x") * Expr::int(-3)
        );
        assert_eq!(parse_expr("-y").unwrap(), Expr::int(0) - Expr::var("y"));
    }

    #[test]
    fn calls_handles_and_intrinsics() {
        let e = parse_expr("extern sink(&f.buffer, f(x, 0), \"f\")").unwrap();
        let expected = Expr::call_extern(
            "sink",
            vec![
                Expr::handle("f.buffer"),
                Expr::read("f", vec![Expr::var("x"), Expr::int(0)]),
                Expr::string("f"),
            ],
        );
        assert_eq!(e, expected);

        let e = parse_expr("select(i > 0, likely(min(a, b)), max(a, 1))").unwrap();
        assert!(matches!(e, Expr::Select(..)));
    }

    #[test]
    fn statements() {
        let s = parse_ok(
            "realize f([0, 10]) {
               let w = 3 in {
                 for (i, 0, 8) {
                   produce f { f(i) = i; }
                   consume f { out(i) = f(i) + w; }
                 }
               }
             }",
        );
        let Stmt::Realize(r) = &s else {
            panic!("expected realize, got {s:?}");
        };
        assert_eq!(r.name, "f");
        assert_eq!(r.bounds, vec![Range::new(Expr::int(0), Expr::int(10))]);
        let Stmt::Let(l) = r.body.as_ref() else {
            panic!("expected let");
        };
        let Stmt::For(op) = l.body.as_ref() else {
            panic!("expected for");
        };
        assert_eq!(op.kind, ForKind::Serial);
        assert!(matches!(op.body.as_ref(), Stmt::Block(b) if b.len() == 2));
    }

    #[test]
    fn loop_kinds() {
        for (kw, kind) in [
            ("for", ForKind::Serial),
            ("unrolled", ForKind::Unrolled),
            ("parallel", ForKind::Parallel),
            ("vectorized", ForKind::Vectorized),
        ] {
            let s = parse_ok(&format!("{kw} (x, 0, 4) {{ f(x) = 0; }}"));
            let Stmt::For(op) = s else {
                panic!("expected loop");
            };
            assert_eq!(op.kind, kind);
        }
    }

    #[test]
    fn display_roundtrip() {
        let src = "realize f([0, 16], [0, 4]) {
            acquire (&f.folding_semaphore.0, 1) {
              assert(f(i - 1, 0) >= 0, extern pipeline_error_bad_fold(\"f\", \"x\", \"i\", i));
              f(i % 4, 0) = select(i > 0, likely(i * -2), 7);
              eval extern pipeline_semaphore_release(&f.folding_semaphore.0, 1);
            }
        }";
        let first = parse_ok(src);
        let printed = first.to_string();
        let second = parse_ok(&printed);
        assert_eq!(first, second);
    }

    #[test]
    fn extern_statement_takes_buffer_handle() {
        let s = parse_ok(
            "realize f([0, 4]) {
               produce f { f(0) = 1; }
               eval extern debug_dump(&f.buffer);
             }",
        );
        let Stmt::Realize(r) = &s else {
            panic!("expected realize, got {s:?}");
        };
        let Stmt::Block(stmts) = r.body.as_ref() else {
            panic!("expected block");
        };
        assert_eq!(
            stmts[1],
            Stmt::Evaluate(Expr::call_extern(
                "debug_dump",
                vec![Expr::handle("f.buffer")]
            ))
        );
    }

    #[test]
    fn keyword_is_not_an_extern_name() {
        let result = parse("eval extern consume(&f.buffer);");
        assert!(!result.errors.is_empty());
        assert_eq!(result.diagnostics()[0].code, Some(codes::E0001));
    }

    #[test]
    fn syntax_error_is_reported() {
        let result = parse("for (i, 0) { }");
        assert!(!result.errors.is_empty());
        let diags = result.diagnostics();
        assert_eq!(diags[0].code, Some(codes::E0001));
        assert!(diags[0].span.is_some());
    }
}
