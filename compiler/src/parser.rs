// Parser for MRO source files.
//
// Parses a token stream (from the lexer) into the declarations of one file.
// Uses chumsky combinators; every node is annotated with the line it starts
// on and the shared `SourceFile` it came from.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns the file's declarations, or every lex and parse
//   error as `ParseError` diagnostics.
// Failure modes: syntax errors; more than one top-level call.
// Side effects: none.

use std::collections::BTreeMap;
use std::sync::Arc;

use chumsky::error::RichReason;
use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::diag::{kinds, Diagnostic, Diagnostics};
use crate::lexer::Token;
use crate::map_call::CallMode;
use crate::types::TypeId;

/// Maps byte offsets to 1-based line numbers of one file.
#[derive(Debug, Clone)]
pub struct Locator {
    file: Arc<SourceFile>,
    line_starts: Vec<usize>,
}

impl Locator {
    pub fn new(source: &str, file: Arc<SourceFile>) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { file, line_starts }
    }

    pub fn line_of(&self, offset: usize) -> usize {
        self.line_starts.partition_point(|&s| s <= offset)
    }

    fn loc(&self, span: SimpleSpan) -> SourceLoc {
        SourceLoc {
            line: self.line_of(span.start()),
            file: Some(self.file.clone()),
        }
    }
}

/// A file with no name; locations render as `line N`.
pub fn anonymous_file() -> Arc<SourceFile> {
    Arc::new(SourceFile {
        file_name: String::new(),
        full_path: String::new(),
        included_from: Vec::new(),
    })
}

/// Parse a source string that is not associated with a file.
pub fn parse_str(source: &str) -> Result<Ast, Diagnostics> {
    parse(source, anonymous_file())
}

/// Parse the source text of `file`. Lexes then parses.
pub fn parse(source: &str, file: Arc<SourceFile>) -> Result<Ast, Diagnostics> {
    let at = Locator::new(source, file.clone());
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    let mut errs = Diagnostics::new();
    for e in &lex_result.errors {
        let span: SimpleSpan = (e.span.start..e.span.end).into();
        errs.push(Diagnostic::error(kinds::PARSE_ERROR, &at.loc(span), e.message.clone()));
    }

    // Convert lexer output to chumsky stream.
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = program_parser(source, &at);
    let (items, parse_errors) = parser.parse(stream).into_output_errors();
    for e in parse_errors {
        let message = match e.reason() {
            RichReason::Custom(msg) => msg.clone(),
            _ => match e.found() {
                Some(tok) => format!("unexpected token '{tok}'"),
                None => "unexpected end of input".to_string(),
            },
        };
        errs.push(Diagnostic::error(kinds::PARSE_ERROR, &at.loc(*e.span()), message));
    }

    let Some(items) = items else {
        return Err(errs);
    };
    let ast = assemble(items, file, &mut errs);
    errs.into_result(ast)
}

/// One top-level declaration.
#[derive(Debug)]
enum Item {
    Include(Include),
    UserType(UserType),
    Struct(StructDecl),
    Stage(Stage),
    Pipeline(Pipeline),
    Call(CallStm),
}

fn assemble(items: Vec<Item>, file: Arc<SourceFile>, errs: &mut Diagnostics) -> Ast {
    let mut ast = Ast::for_file(file);
    for item in items {
        match item {
            Item::Include(i) => ast.includes.push(i),
            Item::UserType(t) => ast.user_types.push(t),
            Item::Struct(s) => ast.structs.push(s),
            Item::Stage(s) => ast.stages.push(s),
            Item::Pipeline(p) => ast.pipelines.push(p),
            Item::Call(c) if ast.call.is_some() => errs.push(Diagnostic::error(
                kinds::DUPLICATE_CALL,
                &c.loc,
                "cannot have more than one top-level call",
            )),
            Item::Call(c) => ast.call = Some(c),
        }
    }
    ast
}

/// One entry of a parenthesized stage or pipeline signature.
#[derive(Debug, Clone)]
enum Member {
    In(Param),
    Out(Param),
    Src(Src),
}

/// Modifier names accepted in `call local preflight volatile X(...)`.
const LEGACY_MODIFIERS: [&str; 3] = ["local", "preflight", "volatile"];

// ── Main parser builder ──
//
// All grammar rules are built inside `program_parser` so that the `source`
// and locator references are captured once and shared by all combinators.

fn program_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
    at: &'src Locator,
) -> impl Parser<'tokens, I, Vec<Item>, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Identifiers and strings ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        source[span.start()..span.end()].to_string()
    });

    let ident_loc = ident.clone().map_with(move |name, e| (name, at.loc(e.span())));

    let string = select! { Token::Str(s) => s };

    let dotted = ident
        .clone()
        .separated_by(just(Token::Dot))
        .at_least(1)
        .collect::<Vec<_>>()
        .map(|parts| parts.join("."));

    // ── Types: NAME[]..., map, map<NAME[]...>[]... ──

    let array_suffix = just(Token::LBracket)
        .then(just(Token::RBracket))
        .repeated()
        .collect::<Vec<_>>()
        .map(|v| v.len() as u16);

    let base_name = just(Token::Map).to("map".to_string()).or(dotted.clone());

    let type_id = just(Token::Map)
        .ignore_then(
            base_name
                .clone()
                .then(array_suffix.clone())
                .delimited_by(just(Token::Lt), just(Token::Gt)),
        )
        .map(|(name, inner)| (name, Some(inner)))
        .or(base_name.map(|name| (name, None)))
        .then(array_suffix.clone())
        .map(|((name, inner), dims)| match inner {
            Some(inner) => TypeId::new(name, dims, inner + 1),
            None => TypeId::new(name, dims, 0),
        });

    // ── Parameters ──

    let in_param = just(Token::In)
        .ignore_then(type_id.clone())
        .then(ident.clone())
        .then(string.clone().or_not())
        .map_with(move |((tname, id), help), e| Param {
            help,
            ..Param::new(id, tname, at.loc(e.span()))
        });

    let out_param = just(Token::Out)
        .ignore_then(type_id.clone())
        .then(ident.clone().or_not())
        .then(string.clone().or_not())
        .then(string.clone().or_not())
        .map_with(move |(((tname, id), help), out_name), e| Param {
            help,
            out_name,
            ..Param::new(id.unwrap_or_else(|| "default".to_string()), tname, at.loc(e.span()))
        });

    let src = just(Token::Src)
        .ignore_then(ident.clone())
        .then(string.clone())
        .map_with(move |(lang, path), e| Src {
            lang,
            path,
            loc: at.loc(e.span()),
        });

    let members = choice((
        in_param.map(Member::In),
        out_param.map(Member::Out),
        src.map(Member::Src),
    ))
    .separated_by(just(Token::Comma))
    .allow_trailing()
    .collect::<Vec<_>>()
    .delimited_by(just(Token::LParen), just(Token::RParen));

    // ── Expressions ──

    let exp = recursive(|exp| {
        let literal = select! {
            Token::Null => ExpKind::Null,
            Token::True => ExpKind::Bool(true),
            Token::False => ExpKind::Bool(false),
            Token::Int(i) => ExpKind::Int(i),
            Token::Float(f) => ExpKind::Float(f),
            Token::Str(s) => ExpKind::Str(s),
        };

        let array = exp
            .clone()
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBracket), just(Token::RBracket))
            .map(ExpKind::Array);

        let map_key = string
            .clone()
            .map(|k| (k, MapKind::Map))
            .or(ident.clone().map(|k| (k, MapKind::Struct)));

        let map = map_key
            .then_ignore(just(Token::Colon))
            .then(exp.clone())
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBrace), just(Token::RBrace))
            .try_map(|entries: Vec<((String, MapKind), Exp)>, span| {
                let kind = entries.first().map(|((_, k), _)| *k).unwrap_or(MapKind::Map);
                let mut out = BTreeMap::new();
                for ((key, k), value) in entries {
                    if k != kind {
                        return Err(Rich::custom(
                            span,
                            "map literal mixes quoted keys and field names",
                        ));
                    }
                    if out.insert(key.clone(), value).is_some() {
                        return Err(Rich::custom(span, format!("duplicate key '{key}'")));
                    }
                }
                Ok(ExpKind::Map(kind, out))
            });

        let path = just(Token::Dot)
            .ignore_then(ident.clone())
            .repeated()
            .collect::<Vec<_>>();

        let self_ref = just(Token::SelfKw).ignore_then(path.clone()).map(|parts| {
            match parts.split_first() {
                Some((id, rest)) => ExpKind::Ref(RefExp::self_ref(id.clone(), rest.join("."))),
                None => ExpKind::Ref(RefExp::self_ref("", "")),
            }
        });

        let call_ref = ident
            .clone()
            .then(path)
            .map(|(id, rest)| ExpKind::Ref(RefExp::call(id, rest.join("."))));

        let split = just(Token::Split).ignore_then(exp.clone()).map(|value| {
            ExpKind::Split(Box::new(SplitExp {
                value,
                source: None,
            }))
        });

        choice((split, array, map, literal, self_ref, call_ref))
            .map_with(move |kind, e| Exp::new(kind, at.loc(e.span())))
    })
    .boxed();

    // ── Bindings ──

    let binding = ident
        .clone()
        .or(just(Token::Star).to("*".to_string()))
        .then_ignore(just(Token::Equals))
        .then(exp.clone())
        .map_with(move |(id, exp), e| BindStm {
            id,
            exp,
            loc: at.loc(e.span()),
        });

    let bindings = binding
        .separated_by(just(Token::Comma))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LParen), just(Token::RParen))
        .map(BindStms::new);

    // ── Calls ──

    let call = just(Token::Map)
        .or_not()
        .then_ignore(just(Token::Call))
        .then(ident.clone().repeated().at_least(1).collect::<Vec<_>>())
        .then(just(Token::As).ignore_then(ident.clone()).or_not())
        .then(bindings.clone())
        .then(just(Token::Using).ignore_then(bindings.clone()).or_not())
        .try_map(move |((((map_kw, mut names), alias), binds), mods), span| {
            let decl_id = names.pop().unwrap_or_default();
            let mut modifiers = Modifiers {
                bindings: mods.unwrap_or_default(),
                ..Modifiers::default()
            };
            for name in names {
                match name.as_str() {
                    "local" => modifiers.local = true,
                    "preflight" => modifiers.preflight = true,
                    "volatile" => modifiers.volatile = true,
                    _ => {
                        return Err(Rich::custom(
                            span,
                            format!(
                                "unknown call modifier '{name}', expected one of {}",
                                LEGACY_MODIFIERS.join(", ")
                            ),
                        ))
                    }
                }
            }
            Ok(CallStm {
                id: alias.unwrap_or_else(|| decl_id.clone()),
                decl_id,
                bindings: binds,
                modifiers,
                is_map: map_kw.is_some(),
                mode: CallMode::Single,
                source: None,
                disabled: None,
                loc: at.loc(span),
            })
        })
        .boxed();

    // ── Declarations ──

    let include = just(Token::Include)
        .ignore_then(string.clone())
        .map_with(move |value, e| {
            Item::Include(Include {
                value,
                loc: at.loc(e.span()),
            })
        });

    let filetype = just(Token::Filetype)
        .ignore_then(dotted.clone())
        .then_ignore(just(Token::Semicolon).or_not())
        .map_with(move |id, e| {
            Item::UserType(UserType {
                id,
                loc: at.loc(e.span()),
            })
        });

    let struct_member = type_id
        .clone()
        .then(ident.clone())
        .then(string.clone().or_not())
        .then(string.clone().or_not())
        .map_with(move |(((tname, id), help), out_name), e| Param {
            help,
            out_name,
            ..Param::new(id, tname, at.loc(e.span()))
        });

    let struct_decl = just(Token::Struct)
        .ignore_then(ident.clone())
        .then(
            struct_member
                .separated_by(just(Token::Comma))
                .allow_trailing()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .map_with(move |(id, members), e| {
            Item::Struct(StructDecl {
                id,
                members: Params::new(members),
                loc: at.loc(e.span()),
            })
        });

    let split_params = just(Token::Split)
        .ignore_then(just(Token::Using).or_not())
        .ignore_then(members.clone())
        .try_map(move |members, span| {
            let (ins, outs) = split_members(members, span, "split")?;
            Ok(SplitParams {
                in_params: Params::new(ins),
                out_params: Params::new(outs),
                loc: at.loc(span),
            })
        });

    let resource_value = select! {
        Token::Int(i) => ResourceValue::Int(i),
        Token::Float(f) => ResourceValue::Float(f),
        Token::True => ResourceValue::Bool(true),
        Token::False => ResourceValue::Bool(false),
        Token::Str(s) => ResourceValue::Str(s),
    }
    .or(ident.clone().map(ResourceValue::Word));

    let resources = just(Token::Using).ignore_then(
        ident_loc
            .clone()
            .then_ignore(just(Token::Equals))
            .then(resource_value)
            .map(|((key, loc), value)| Resource { key, value, loc })
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen)),
    );

    let stage_retain = just(Token::Retain).ignore_then(
        ident_loc
            .clone()
            .map(|(id, loc)| RetainId { id, loc })
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen)),
    );

    let stage = just(Token::Stage)
        .ignore_then(ident.clone())
        .then(members.clone())
        .then(split_params.or_not())
        .then(resources.or_not())
        .then(stage_retain.or_not())
        .try_map(move |((((id, members), split), resources), retain), span| {
            let loc = at.loc(span);
            let mut srcs = members.iter().filter_map(|m| match m {
                Member::Src(s) => Some(s.clone()),
                _ => None,
            });
            let src = srcs
                .next()
                .ok_or_else(|| Rich::custom(span, format!("stage {id} has no src")))?;
            if srcs.next().is_some() {
                return Err(Rich::custom(span, format!("stage {id} has more than one src")));
            }
            let members = members
                .into_iter()
                .filter(|m| !matches!(m, Member::Src(_)))
                .collect();
            let (ins, outs) = split_members(members, span, "stage")?;
            Ok(Item::Stage(Stage {
                id,
                in_params: Params::new(ins),
                out_params: Params::new(outs),
                src,
                split,
                resources: resources.unwrap_or_default(),
                retain: retain.unwrap_or_default(),
                loc,
            }))
        })
        .boxed();

    let ret = just(Token::Return)
        .ignore_then(bindings.clone())
        .map_with(move |bindings, e| ReturnStm {
            bindings,
            loc: at.loc(e.span()),
        });

    let pipeline_retain = just(Token::Retain).ignore_then(
        exp.clone()
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen)),
    );

    let pipeline = just(Token::Pipeline)
        .ignore_then(ident.clone())
        .then(members)
        .then(
            call.clone()
                .repeated()
                .collect::<Vec<_>>()
                .then(ret)
                .then(pipeline_retain.or_not())
                .delimited_by(just(Token::LBrace), just(Token::RBrace)),
        )
        .try_map(move |((id, members), ((calls, ret), retain)), span| {
            let (ins, outs) = split_members(members, span, "pipeline")?;
            Ok(Item::Pipeline(Pipeline {
                id,
                in_params: Params::new(ins),
                out_params: Params::new(outs),
                calls,
                ret,
                retain: retain.unwrap_or_default(),
                loc: at.loc(span),
            }))
        })
        .boxed();

    // ── Program ──

    choice((
        include,
        filetype,
        struct_decl,
        stage,
        pipeline,
        call.map(Item::Call),
    ))
    .repeated()
    .collect::<Vec<_>>()
    .then_ignore(end())
}

/// Separate `in` and `out` entries; `src` is only legal in a stage body
/// and is filtered out by the caller.
fn split_members<'tokens>(
    members: Vec<Member>,
    span: SimpleSpan,
    what: &str,
) -> Result<(Vec<Param>, Vec<Param>), Rich<'tokens, Token, SimpleSpan>> {
    let mut ins = Vec::new();
    let mut outs = Vec::new();
    for m in members {
        match m {
            Member::In(p) => ins.push(p),
            Member::Out(p) => outs.push(p),
            Member::Src(_) => {
                return Err(Rich::custom(span, format!("{what} cannot declare a src")));
            }
        }
    }
    Ok((ins, outs))
}

// ── Tests ──
