//! nom-based parser.
//!
//! Newlines separate declarations, as do commas. Binary operators may be
//! followed by a line break but not preceded by one, so a newline always
//! ends the expression on the current line.

use std::sync::Arc;

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, multispace1, one_of, satisfy},
    combinator::{map, map_opt, not, opt, recognize, value},
    error::{Error, ErrorKind},
    multi::{many0, many0_count},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::ast::{BinOp, Clause, Decl, Expr, File, Import, Label, StrPart, UnOp};
use crate::error::{ValueError, ValueResult};
use crate::value::BasicType;

type PResult<'a, T> = IResult<&'a str, T>;

const KEYWORDS: &[&str] = &["for", "if", "in", "let", "package", "import"];

/// Parse a whole source file.
pub fn parse_file(src: &str) -> ValueResult<File> {
    match file(src) {
        Ok((_, f)) => Ok(f),
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => Err(position_error(src, e.input, e.code)),
        Err(nom::Err::Incomplete(_)) => Err(ValueError::Parse {
            line: 0,
            column: 0,
            message: "incomplete input".to_string(),
        }),
    }
}

/// Parse a standalone expression.
pub fn parse_expr(src: &str) -> ValueResult<Expr> {
    let parsed = delimited(ws, expr, ws)(src);
    match parsed {
        Ok(("", e)) => Ok(e),
        Ok((rest, _)) => Err(position_error(src, rest, ErrorKind::Eof)),
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => Err(position_error(src, e.input, e.code)),
        Err(nom::Err::Incomplete(_)) => Err(position_error(src, "", ErrorKind::Eof)),
    }
}

fn position_error(src: &str, rest: &str, code: ErrorKind) -> ValueError {
    let offset = src.len().saturating_sub(rest.len());
    let consumed = &src[..offset];
    let line = consumed.matches('\n').count() + 1;
    let column = consumed.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
    let message = match code {
        ErrorKind::Verify => "expected a newline or comma between declarations".to_string(),
        _ if rest.is_empty() => "unexpected end of input".to_string(),
        _ => {
            let snippet: String = rest.chars().take(16).collect();
            format!("unexpected {snippet:?}")
        }
    };
    ValueError::Parse {
        line,
        column,
        message,
    }
}

fn fail<T>(i: &str, kind: ErrorKind) -> PResult<'_, T> {
    Err(nom::Err::Error(Error::new(i, kind)))
}

// ── Lexical ────────────────────────────────────────────────────

fn comment(i: &str) -> PResult<()> {
    value((), pair(tag("//"), take_while(|c| c != '\n')))(i)
}

/// Spaces, tabs and comments on the current line.
fn sp(i: &str) -> PResult<()> {
    value(
        (),
        many0_count(alt((
            value((), take_while1(|c| c == ' ' || c == '\t' || c == '\r')),
            comment,
        ))),
    )(i)
}

/// Any whitespace, including newlines, and comments.
fn ws(i: &str) -> PResult<()> {
    value((), many0_count(alt((value((), multispace1), comment))))(i)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

fn ident(i: &str) -> PResult<&str> {
    recognize(pair(satisfy(is_ident_start), take_while(is_ident_char)))(i)
}

fn def_ident(i: &str) -> PResult<&str> {
    recognize(pair(char('#'), ident))(i)
}

fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    terminated(tag(kw), not(satisfy(is_ident_char)))
}

/// A numeric literal. A leading `-` belongs to the literal so the full
/// `i64` range reads back.
fn number(i: &str) -> PResult<Expr> {
    let (rest, text) = recognize(tuple((
        opt(char('-')),
        digit1,
        opt(pair(char('.'), digit1)),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(i)?;
    if text.contains(['.', 'e', 'E']) {
        match text.parse::<f64>() {
            Ok(f) => Ok((rest, Expr::Float(f))),
            Err(_) => fail(i, ErrorKind::Float),
        }
    } else {
        match text.parse::<i64>() {
            Ok(n) => Ok((rest, Expr::Int(n))),
            Err(_) => fail(i, ErrorKind::Digit),
        }
    }
}

fn string_lit(i: &str) -> PResult<Vec<StrPart>> {
    let (mut i, _) = char('"')(i)?;
    let mut parts = Vec::new();
    let mut buf = String::new();
    loop {
        let Some(c) = i.chars().next() else {
            return fail(i, ErrorKind::Char);
        };
        match c {
            '\n' => return fail(i, ErrorKind::Char),
            '"' => {
                i = &i[1..];
                break;
            }
            '\\' => {
                let rest = &i[1..];
                let Some(esc) = rest.chars().next() else {
                    return fail(rest, ErrorKind::Escaped);
                };
                let after = &rest[esc.len_utf8()..];
                match esc {
                    '(' => {
                        if !buf.is_empty() {
                            parts.push(StrPart::Lit(std::mem::take(&mut buf)));
                        }
                        let (r, e) = delimited(ws, expr, ws)(after)?;
                        let (r, _) = char(')')(r)?;
                        parts.push(StrPart::Interp(e));
                        i = r;
                        continue;
                    }
                    'n' => buf.push('\n'),
                    't' => buf.push('\t'),
                    'r' => buf.push('\r'),
                    'b' => buf.push('\u{8}'),
                    'f' => buf.push('\u{c}'),
                    '"' | '\\' | '/' => buf.push(esc),
                    'u' => {
                        let hex = after.get(..4).unwrap_or("");
                        match u32::from_str_radix(hex, 16).ok().and_then(char::from_u32) {
                            Some(ch) if hex.len() == 4 => buf.push(ch),
                            _ => return fail(rest, ErrorKind::Escaped),
                        }
                        i = &after[4..];
                        continue;
                    }
                    _ => return fail(rest, ErrorKind::Escaped),
                }
                i = after;
            }
            c => {
                buf.push(c);
                i = &i[c.len_utf8()..];
            }
        }
    }
    if !buf.is_empty() || parts.is_empty() {
        parts.push(StrPart::Lit(buf));
    }
    Ok((i, parts))
}

fn static_string(parts: &[StrPart]) -> Option<String> {
    match parts {
        [StrPart::Lit(s)] => Some(s.clone()),
        _ => None,
    }
}

// ── File and declarations ──────────────────────────────────────

fn file(i: &str) -> PResult<File> {
    let (i, _) = ws(i)?;
    let (i, package) = opt(terminated(
        preceded(pair(keyword("package"), sp), ident),
        ws,
    ))(i)?;
    let (i, imports) = many0(terminated(import_decl, ws))(i)?;
    let (i, decls) = decl_list(i, None)?;
    Ok((
        i,
        File {
            package: package.map(str::to_string),
            imports: imports.into_iter().flatten().collect(),
            decls: Arc::new(decls),
        },
    ))
}

fn import_decl(i: &str) -> PResult<Vec<Import>> {
    preceded(
        pair(keyword("import"), sp),
        alt((
            map(import_spec, |spec| vec![spec]),
            delimited(
                pair(char('('), ws),
                many0(terminated(import_spec, ws)),
                char(')'),
            ),
        )),
    )(i)
}

fn import_spec(i: &str) -> PResult<Import> {
    map(
        pair(
            opt(terminated(ident, sp)),
            map_opt(string_lit, |parts| static_string(&parts)),
        ),
        |(alias, path)| {
            let alias = alias.map(str::to_string).unwrap_or_else(|| {
                let last = path.rsplit('/').next().unwrap_or(&path);
                last.split(':').next().unwrap_or(last).to_string()
            });
            Import { alias, path }
        },
    )(i)
}

fn at_end(i: &str, closing: Option<char>) -> bool {
    match closing {
        Some(c) => i.starts_with(c),
        None => i.is_empty(),
    }
}

fn decl_list(mut i: &str, closing: Option<char>) -> PResult<Vec<Decl>> {
    let mut decls = Vec::new();
    loop {
        let (r, _) = ws(i)?;
        i = r;
        if at_end(i, closing) {
            return Ok((i, decls));
        }
        let (r, d) = decl(i)?;
        decls.push(d);
        let (r, _) = sp(r)?;
        i = r;
        if let Some(r) = i.strip_prefix(',') {
            i = r;
        } else if !(i.starts_with('\n') || at_end(i, closing)) {
            return Err(nom::Err::Failure(Error::new(i, ErrorKind::Verify)));
        }
    }
}

fn decl(i: &str) -> PResult<Decl> {
    alt((comprehension, field, map(expr, Decl::Embed)))(i)
}

fn label(i: &str) -> PResult<Label> {
    alt((
        map(def_ident, |s| Label::Static(s.to_string())),
        map(ident, |s| Label::Static(s.to_string())),
        map(string_lit, |parts| match static_string(&parts) {
            Some(s) => Label::Static(s),
            None => Label::Dynamic(Expr::Str(parts)),
        }),
        map(
            delimited(pair(char('('), ws), expr, pair(ws, char(')'))),
            Label::Dynamic,
        ),
    ))(i)
}

fn field(i: &str) -> PResult<Decl> {
    let (i, label) = label(i)?;
    let (i, optional) = map(opt(char('?')), |o| o.is_some())(i)?;
    let (i, _) = preceded(sp, char(':'))(i)?;
    let (i, _) = ws(i)?;
    let (i, value) = alt((
        map(field, |nested| Expr::Struct(Arc::new(vec![nested]))),
        expr,
    ))(i)?;
    Ok((
        i,
        Decl::Field {
            label,
            optional,
            value,
        },
    ))
}

fn comprehension(i: &str) -> PResult<Decl> {
    let (i, first) = clause(i)?;
    let (i, mut more) = many0(preceded(ws, clause))(i)?;
    let (i, _) = ws(i)?;
    let (i, body) = struct_body(i)?;
    let mut clauses = vec![first];
    clauses.append(&mut more);
    Ok((
        i,
        Decl::Comprehension {
            clauses,
            body: Arc::new(body),
        },
    ))
}

fn clause(i: &str) -> PResult<Clause> {
    alt((for_clause, map(preceded(pair(keyword("if"), sp), expr), Clause::If)))(i)
}

fn for_clause(i: &str) -> PResult<Clause> {
    let (i, _) = pair(keyword("for"), sp)(i)?;
    let (i, first) = ident(i)?;
    let (i, second) = opt(preceded(tuple((sp, char(','), sp)), ident))(i)?;
    let (i, _) = tuple((sp, keyword("in"), ws))(i)?;
    let (i, source) = expr(i)?;
    let (key, value) = match second {
        Some(v) => (Some(first.to_string()), v.to_string()),
        None => (None, first.to_string()),
    };
    Ok((i, Clause::For { key, value, source }))
}

fn struct_body(i: &str) -> PResult<Vec<Decl>> {
    let (i, _) = char('{')(i)?;
    let (i, decls) = decl_list(i, Some('}'))?;
    let (i, _) = char('}')(i)?;
    Ok((i, decls))
}

// ── Expressions ────────────────────────────────────────────────

pub(crate) fn expr(i: &str) -> PResult<Expr> {
    disjunction(i)
}

fn disjunction(i: &str) -> PResult<Expr> {
    let (i, first) = disjunction_arm(i)?;
    let (i, rest) = many0(preceded(tuple((sp, char('|'), ws)), disjunction_arm))(i)?;
    if rest.is_empty() && !first.1 {
        return Ok((i, first.0));
    }
    let mut arms = vec![first];
    arms.extend(rest);
    Ok((i, Expr::Disjunction(arms)))
}

fn disjunction_arm(i: &str) -> PResult<(Expr, bool)> {
    let (i, star) = opt(terminated(char('*'), sp))(i)?;
    let (i, e) = unification(i)?;
    Ok((i, (e, star.is_some())))
}

fn unification(i: &str) -> PResult<Expr> {
    let (i, first) = comparison(i)?;
    let (i, rest) = many0(preceded(
        tuple((sp, char('&'), not(char('&')), ws)),
        comparison,
    ))(i)?;
    let e = rest
        .into_iter()
        .fold(first, |acc, e| Expr::Unify(Box::new(acc), Box::new(e)));
    Ok((i, e))
}

fn comparison(i: &str) -> PResult<Expr> {
    let (i, lhs) = additive(i)?;
    let cmp_op = alt((
        value(BinOp::Eq, tag("==")),
        value(BinOp::Ne, tag("!=")),
        value(BinOp::Le, tag("<=")),
        value(BinOp::Ge, tag(">=")),
        value(BinOp::Lt, char('<')),
        value(BinOp::Gt, char('>')),
    ));
    let (i, rhs) = opt(pair(preceded(sp, cmp_op), preceded(ws, additive)))(i)?;
    Ok(match rhs {
        Some((op, rhs)) => (i, Expr::Binary(op, Box::new(lhs), Box::new(rhs))),
        None => (i, lhs),
    })
}

fn additive(i: &str) -> PResult<Expr> {
    let op = alt((value(BinOp::Add, char('+')), value(BinOp::Sub, char('-'))));
    binary_chain(i, multiplicative, op)
}

fn multiplicative(i: &str) -> PResult<Expr> {
    let op = alt((value(BinOp::Mul, char('*')), value(BinOp::Div, char('/'))));
    binary_chain(i, unary, op)
}

fn binary_chain<'a>(
    i: &'a str,
    operand: fn(&'a str) -> PResult<'a, Expr>,
    op: impl FnMut(&'a str) -> PResult<'a, BinOp>,
) -> PResult<'a, Expr> {
    let (i, first) = operand(i)?;
    let (i, rest) = many0(pair(preceded(sp, op), preceded(ws, operand)))(i)?;
    let e = rest.into_iter().fold(first, |acc, (op, rhs)| {
        Expr::Binary(op, Box::new(acc), Box::new(rhs))
    });
    Ok((i, e))
}

fn unary(i: &str) -> PResult<Expr> {
    alt((
        number,
        map(preceded(pair(char('-'), sp), unary), |e| match e {
            Expr::Int(n) if n != i64::MIN => Expr::Int(-n),
            Expr::Float(f) => Expr::Float(-f),
            e => Expr::Unary(UnOp::Neg, Box::new(e)),
        }),
        map(preceded(pair(char('!'), sp), unary), |e| {
            Expr::Unary(UnOp::Not, Box::new(e))
        }),
        postfix,
    ))(i)
}

fn postfix(i: &str) -> PResult<Expr> {
    let (mut i, mut e) = primary(i)?;
    loop {
        if let Ok((r, sel)) = preceded(char('.'), alt((def_ident, ident)))(i) {
            e = Expr::Select(Box::new(e), sel.to_string());
            i = r;
            continue;
        }
        if let Ok((r, idx)) =
            delimited(pair(char('['), ws), expr, pair(ws, char(']')))(i)
        {
            e = Expr::Index(Box::new(e), Box::new(idx));
            i = r;
            continue;
        }
        return Ok((i, e));
    }
}

fn primary(i: &str) -> PResult<Expr> {
    alt((
        number,
        map(string_lit, Expr::Str),
        map(struct_body, |decls| Expr::Struct(Arc::new(decls))),
        list_lit,
        delimited(pair(char('('), ws), expr, pair(ws, char(')'))),
        map(def_ident, |s| Expr::Ref(s.to_string())),
        ident_expr,
    ))(i)
}

fn ident_expr(i: &str) -> PResult<Expr> {
    let (rest, name) = ident(i)?;
    let e = match name {
        "true" => Expr::Bool(true),
        "false" => Expr::Bool(false),
        "null" => Expr::Null,
        "_" => Expr::Top,
        kw if KEYWORDS.contains(&kw) => return fail(i, ErrorKind::Tag),
        other => match BasicType::from_name(other) {
            Some(t) => Expr::Type(t),
            None => Expr::Ref(other.to_string()),
        },
    };
    Ok((rest, e))
}

fn list_lit(i: &str) -> PResult<Expr> {
    let (mut i, _) = pair(char('['), ws)(i)?;
    let mut elems = Vec::new();
    loop {
        if let Some(r) = i.strip_prefix(']') {
            return Ok((r, Expr::List { elems, rest: None }));
        }
        if let Some(r) = i.strip_prefix("...") {
            let (r, _) = sp(r)?;
            let (r, elem) = opt(expr)(r)?;
            let (r, _) = tuple((ws, opt(char(',')), ws, char(']')))(r)?;
            return Ok((
                r,
                Expr::List {
                    elems,
                    rest: Some(Box::new(elem.unwrap_or(Expr::Top))),
                },
            ));
        }
        let (r, e) = expr(i)?;
        elems.push(e);
        let (r, _) = ws(r)?;
        match r.strip_prefix(',') {
            Some(r) => {
                let (r, _) = ws(r)?;
                i = r;
            }
            None => {
                let (r, _) = char(']')(r)?;
                return Ok((r, Expr::List { elems, rest: None }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decls(src: &str) -> Vec<Decl> {
        parse_file(src).unwrap().decls.as_ref().clone()
    }

    #[test]
    fn parse_fields_and_separators() {
        let d = decls("a: 1, b: \"x\"\nc: 2.5 // trailing\n");
        assert_eq!(d.len(), 3);
        assert_eq!(
            d[2],
            Decl::Field {
                label: Label::Static("c".into()),
                optional: false,
                value: Expr::Float(2.5),
            }
        );
    }

    #[test]
    fn parse_integer_bounds() {
        let d = decls("lo: -9223372036854775808\nhi: 9223372036854775807\nsub: 3-1\n");
        let values: Vec<&Expr> = d
            .iter()
            .map(|decl| match decl {
                Decl::Field { value, .. } => value,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(values[0], &Expr::Int(i64::MIN));
        assert_eq!(values[1], &Expr::Int(i64::MAX));
        assert!(matches!(values[2], Expr::Binary(BinOp::Sub, _, _)));
        assert!(parse_file("big: 9223372036854775808\n").is_err());
    }

    #[test]
    fn parse_package_and_imports() {
        let f = parse_file("package foo\n\nimport \"common\"\nimport (\n\tx \"lib/other\"\n)\n\na: common.b\n")
            .unwrap();
        assert_eq!(f.package.as_deref(), Some("foo"));
        assert_eq!(f.imports.len(), 2);
        assert_eq!(f.imports[0].alias, "common");
        assert_eq!(f.imports[1].alias, "x");
        assert_eq!(f.imports[1].path, "lib/other");
    }

    #[test]
    fn parse_shorthand_nesting() {
        let d = decls("a: b: c: 1");
        let Decl::Field { value: Expr::Struct(inner), .. } = &d[0] else {
            panic!("expected struct");
        };
        assert!(matches!(&inner[0], Decl::Field { label: Label::Static(l), .. } if l == "b"));
    }

    #[test]
    fn parse_disjunction_with_default() {
        let e = parse_expr("*1 | int").unwrap();
        assert_eq!(
            e,
            Expr::Disjunction(vec![(Expr::Int(1), true), (Expr::Type(BasicType::Int), false)])
        );
    }

    #[test]
    fn parse_interpolation_and_dynamic_label() {
        let d = decls("\"eth\\(n)\": 1\n(x): 2\n");
        assert!(matches!(&d[0], Decl::Field { label: Label::Dynamic(Expr::Str(parts)), .. } if parts.len() == 2));
        assert!(matches!(&d[1], Decl::Field { label: Label::Dynamic(Expr::Ref(_)), .. }));
    }

    #[test]
    fn parse_comprehension() {
        let d = decls("for k, v in src if v > 1 {\n\t(k): v\n}\n");
        let Decl::Comprehension { clauses, body } = &d[0] else {
            panic!("expected comprehension");
        };
        assert_eq!(clauses.len(), 2);
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn parse_open_list_and_operators() {
        assert_eq!(
            parse_expr("[...string]").unwrap(),
            Expr::List {
                elems: vec![],
                rest: Some(Box::new(Expr::Type(BasicType::String))),
            }
        );
        assert!(matches!(
            parse_expr("a.b + 2 * 3").unwrap(),
            Expr::Binary(BinOp::Add, _, _)
        ));
        assert_eq!(parse_expr("-3").unwrap(), Expr::Int(-3));
    }

    #[test]
    fn parse_error_reports_position() {
        match parse_file("a: 1\nb: }") {
            Err(ValueError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            parse_file("a: 1 b: 2"),
            Err(ValueError::Parse { .. })
        ));
    }
}
