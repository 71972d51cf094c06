use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0, one_of, satisfy},
    combinator::{all_consuming, map, not, opt, peek, recognize},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }

    fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq | BinaryOp::Ne => 3,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlaceholderOption {
    Sep(String),
    Default(String),
    True(String),
    False(String),
}

/// An interpolation such as `~{sep=" " files}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placeholder {
    pub options: Vec<PlaceholderOption>,
    pub expr: Expr,
}

impl Placeholder {
    pub fn sep(&self) -> Option<&str> {
        self.options.iter().find_map(|option| match option {
            PlaceholderOption::Sep(sep) => Some(sep.as_str()),
            _ => None,
        })
    }

    pub fn default_value(&self) -> Option<&str> {
        self.options.iter().find_map(|option| match option {
            PlaceholderOption::Default(value) => Some(value.as_str()),
            _ => None,
        })
    }

    pub fn true_false(&self) -> Option<(&str, &str)> {
        let on = self.options.iter().find_map(|option| match option {
            PlaceholderOption::True(value) => Some(value.as_str()),
            _ => None,
        })?;
        let off = self.options.iter().find_map(|option| match option {
            PlaceholderOption::False(value) => Some(value.as_str()),
            _ => None,
        })?;
        Some((on, off))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StringPart {
    Text(String),
    Placeholder(Box<Placeholder>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    None,
    Boolean(bool),
    Int(i64),
    Float(f64),
    String(Vec<StringPart>),
    Ident(String),
    Member {
        target: Box<Expr>,
        field: String,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Array(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Apply {
        function: String,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    IfThenElse {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

/// A name an expression depends on: `x` or `call.output`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    pub root: String,
    pub field: Option<String>,
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{}.{}", self.root, field),
            None => f.write_str(&self.root),
        }
    }
}

impl Expr {
    pub fn ident(name: impl Into<String>) -> Self {
        Expr::Ident(name.into())
    }

    pub fn member(target: impl Into<String>, field: impl Into<String>) -> Self {
        Expr::Member {
            target: Box::new(Expr::Ident(target.into())),
            field: field.into(),
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Expr::String(vec![StringPart::Text(value.into())])
    }

    /// Every name the expression reads, in first-occurrence order.
    pub fn references(&self) -> Vec<Reference> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        let mut seen = std::collections::HashSet::new();
        refs.retain(|r| seen.insert(r.clone()));
        refs
    }

    fn collect_references(&self, refs: &mut Vec<Reference>) {
        match self {
            Expr::None | Expr::Boolean(_) | Expr::Int(_) | Expr::Float(_) => {}
            Expr::String(parts) => {
                for part in parts {
                    if let StringPart::Placeholder(placeholder) = part {
                        placeholder.expr.collect_references(refs);
                    }
                }
            }
            Expr::Ident(name) => refs.push(Reference {
                root: name.clone(),
                field: None,
            }),
            Expr::Member { target, field } => match target.as_ref() {
                Expr::Ident(root) => refs.push(Reference {
                    root: root.clone(),
                    field: Some(field.clone()),
                }),
                other => other.collect_references(refs),
            },
            Expr::Index { target, index } => {
                target.collect_references(refs);
                index.collect_references(refs);
            }
            Expr::Array(items) => items.iter().for_each(|item| item.collect_references(refs)),
            Expr::Map(entries) => {
                for (key, value) in entries {
                    key.collect_references(refs);
                    value.collect_references(refs);
                }
            }
            Expr::Apply { args, .. } => args.iter().for_each(|arg| arg.collect_references(refs)),
            Expr::Unary { operand, .. } => operand.collect_references(refs),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_references(refs);
                rhs.collect_references(refs);
            }
            Expr::IfThenElse {
                condition,
                then,
                otherwise,
            } => {
                condition.collect_references(refs);
                then.collect_references(refs);
                otherwise.collect_references(refs);
            }
        }
    }

    /// Rebuild the expression with bare identifiers replaced. `lookup`
    /// returns the replacement, or `None` to keep the name. Roots of member
    /// access (`call.output`) are never offered.
    pub fn replace_idents<E, F>(&self, lookup: &mut F) -> std::result::Result<Expr, E>
    where
        F: FnMut(&str) -> std::result::Result<Option<Expr>, E>,
    {
        let expr = match self {
            Expr::None | Expr::Boolean(_) | Expr::Int(_) | Expr::Float(_) => self.clone(),
            Expr::Ident(name) => lookup(name)?.unwrap_or_else(|| self.clone()),
            Expr::String(parts) => {
                let mut replaced = Vec::with_capacity(parts.len());
                for part in parts {
                    replaced.push(match part {
                        StringPart::Text(_) => part.clone(),
                        StringPart::Placeholder(placeholder) => {
                            StringPart::Placeholder(Box::new(Placeholder {
                                options: placeholder.options.clone(),
                                expr: placeholder.expr.replace_idents(lookup)?,
                            }))
                        }
                    });
                }
                Expr::String(replaced)
            }
            Expr::Member { target, field } => match target.as_ref() {
                Expr::Ident(_) => self.clone(),
                other => Expr::Member {
                    target: Box::new(other.replace_idents(lookup)?),
                    field: field.clone(),
                },
            },
            Expr::Index { target, index } => Expr::Index {
                target: Box::new(target.replace_idents(lookup)?),
                index: Box::new(index.replace_idents(lookup)?),
            },
            Expr::Array(items) => {
                let mut replaced = Vec::with_capacity(items.len());
                for item in items {
                    replaced.push(item.replace_idents(lookup)?);
                }
                Expr::Array(replaced)
            }
            Expr::Map(entries) => {
                let mut replaced = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    replaced.push((key.replace_idents(lookup)?, value.replace_idents(lookup)?));
                }
                Expr::Map(replaced)
            }
            Expr::Apply { function, args } => {
                let mut replaced = Vec::with_capacity(args.len());
                for arg in args {
                    replaced.push(arg.replace_idents(lookup)?);
                }
                Expr::Apply {
                    function: function.clone(),
                    args: replaced,
                }
            }
            Expr::Unary { op, operand } => Expr::Unary {
                op: *op,
                operand: Box::new(operand.replace_idents(lookup)?),
            },
            Expr::Binary { op, lhs, rhs } => Expr::Binary {
                op: *op,
                lhs: Box::new(lhs.replace_idents(lookup)?),
                rhs: Box::new(rhs.replace_idents(lookup)?),
            },
            Expr::IfThenElse {
                condition,
                then,
                otherwise,
            } => Expr::IfThenElse {
                condition: Box::new(condition.replace_idents(lookup)?),
                then: Box::new(then.replace_idents(lookup)?),
                otherwise: Box::new(otherwise.replace_idents(lookup)?),
            },
        };
        Ok(expr)
    }

    /// Plain text of a string literal without interpolation.
    pub fn as_plain_string(&self) -> Option<String> {
        match self {
            Expr::String(parts) => parts
                .iter()
                .map(|part| match part {
                    StringPart::Text(text) => Some(text.as_str()),
                    StringPart::Placeholder(_) => None,
                })
                .collect::<Option<Vec<_>>>()
                .map(|texts| texts.concat()),
            _ => None,
        }
    }

    /// The JSON value of a literal expression, `None` when evaluation would
    /// need runtime state.
    pub fn literal_value(&self) -> Option<serde_json::Value> {
        use serde_json::Value;
        match self {
            Expr::None => Some(Value::Null),
            Expr::Boolean(b) => Some(Value::Bool(*b)),
            Expr::Int(i) => Some(Value::from(*i)),
            Expr::Float(x) => serde_json::Number::from_f64(*x).map(Value::Number),
            Expr::String(_) => self.as_plain_string().map(Value::String),
            Expr::Array(items) => items
                .iter()
                .map(Expr::literal_value)
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            Expr::Map(entries) => {
                let mut object = serde_json::Map::new();
                for (key, value) in entries {
                    object.insert(key.as_plain_string()?, value.literal_value()?);
                }
                Some(Value::Object(object))
            }
            Expr::Unary {
                op: UnaryOp::Negate,
                operand,
            } => match operand.as_ref() {
                Expr::Int(i) => Some(Value::from(-*i)),
                Expr::Float(x) => serde_json::Number::from_f64(-*x).map(Value::Number),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        self.literal_value().is_some()
    }
}

fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\t' => escaped.push_str("\\t"),
            '\r' => escaped.push_str("\\r"),
            other => escaped.push(other),
        }
    }
    escaped
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for option in &self.options {
            match option {
                PlaceholderOption::Sep(v) => write!(f, "sep=\"{}\" ", escape_text(v))?,
                PlaceholderOption::Default(v) => write!(f, "default=\"{}\" ", escape_text(v))?,
                PlaceholderOption::True(v) => write!(f, "true=\"{}\" ", escape_text(v))?,
                PlaceholderOption::False(v) => write!(f, "false=\"{}\" ", escape_text(v))?,
            }
        }
        write!(f, "{}", self.expr)
    }
}

impl Expr {
    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, parent: u8, right: bool) -> fmt::Result {
        let needs_parens = match self {
            Expr::Binary { op, .. } => {
                op.precedence() < parent || (right && op.precedence() == parent)
            }
            Expr::IfThenElse { .. } => true,
            _ => false,
        };
        if needs_parens {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::None => f.write_str("None"),
            Expr::Boolean(b) => write!(f, "{}", b),
            Expr::Int(i) => write!(f, "{}", i),
            Expr::Float(x) => write!(f, "{:?}", x),
            Expr::String(parts) => {
                f.write_str("\"")?;
                for part in parts {
                    match part {
                        StringPart::Text(text) => f.write_str(&escape_text(text))?,
                        StringPart::Placeholder(p) => write!(f, "~{{{}}}", p)?,
                    }
                }
                f.write_str("\"")
            }
            Expr::Ident(name) => f.write_str(name),
            Expr::Member { target, field } => {
                target.fmt_operand(f, u8::MAX, false)?;
                write!(f, ".{}", field)
            }
            Expr::Index { target, index } => {
                target.fmt_operand(f, u8::MAX, false)?;
                write!(f, "[{}]", index)
            }
            Expr::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Expr::Map(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                f.write_str("}")
            }
            Expr::Apply { function, args } => {
                write!(f, "{}(", function)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
            Expr::Unary { op, operand } => {
                f.write_str(match op {
                    UnaryOp::Not => "!",
                    UnaryOp::Negate => "-",
                })?;
                operand.fmt_operand(f, u8::MAX, false)
            }
            Expr::Binary { op, lhs, rhs } => {
                lhs.fmt_operand(f, op.precedence(), false)?;
                write!(f, " {} ", op.symbol())?;
                rhs.fmt_operand(f, op.precedence(), true)
            }
            Expr::IfThenElse {
                condition,
                then,
                otherwise,
            } => write!(f, "if {} then {} else {}", condition, then, otherwise),
        }
    }
}

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

pub(crate) fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)
}

pub(crate) fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(
        tag(word),
        not(peek(satisfy(|c: char| c.is_alphanumeric() || c == '_'))),
    )
}

fn nom_error(input: &str, kind: nom::error::ErrorKind) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Error(nom::error::Error::new(input, kind))
}

/// Offset of the `}` closing a placeholder whose body starts at `body`,
/// skipping nested braces and quoted strings.
pub(crate) fn find_placeholder_end(body: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (idx, c) in body.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '{' => depth += 1,
            '}' if depth == 0 => return Some(idx),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

fn decode_escape(c: char) -> Option<char> {
    match c {
        'n' => Some('\n'),
        't' => Some('\t'),
        'r' => Some('\r'),
        '\\' => Some('\\'),
        '"' => Some('"'),
        '\'' => Some('\''),
        '~' => Some('~'),
        '$' => Some('$'),
        _ => None,
    }
}

pub(crate) fn parse_string_literal(input: &str) -> IResult<&str, Vec<StringPart>> {
    let quote = match input.chars().next() {
        Some(q @ ('"' | '\'')) => q,
        _ => return Err(nom_error(input, nom::error::ErrorKind::Char)),
    };
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut idx = quote.len_utf8();

    while let Some(c) = input[idx..].chars().next() {
        if c == '\\' {
            let next = input[idx + 1..].chars().next();
            match next {
                Some(n) => {
                    match decode_escape(n) {
                        Some(decoded) => text.push(decoded),
                        None => {
                            text.push('\\');
                            text.push(n);
                        }
                    }
                    idx += 1 + n.len_utf8();
                }
                None => break,
            }
        } else if c == quote {
            if !text.is_empty() {
                parts.push(StringPart::Text(text));
            }
            return Ok((&input[idx + 1..], parts));
        } else if (c == '~' || c == '$') && input[idx + 1..].starts_with('{') {
            let body_start = idx + 2;
            let end = find_placeholder_end(&input[body_start..])
                .ok_or_else(|| nom_error(&input[idx..], nom::error::ErrorKind::TakeUntil))?;
            let body = &input[body_start..body_start + end];
            let placeholder = parse_placeholder(body)
                .map_err(|_| nom_error(&input[idx..], nom::error::ErrorKind::Verify))?;
            if !text.is_empty() {
                parts.push(StringPart::Text(std::mem::take(&mut text)));
            }
            parts.push(StringPart::Placeholder(Box::new(placeholder)));
            idx = body_start + end + 1;
        } else {
            text.push(c);
            idx += c.len_utf8();
        }
    }
    Err(nom_error(input, nom::error::ErrorKind::Char))
}

fn parse_number(input: &str) -> IResult<&str, Expr> {
    let (rest, text) = recognize(tuple((
        digit1,
        opt(pair(char('.'), digit1)),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(input)?;
    if text.contains(['.', 'e', 'E']) {
        text.parse::<f64>()
            .map(|x| (rest, Expr::Float(x)))
            .map_err(|_| nom_error(input, nom::error::ErrorKind::Float))
    } else {
        text.parse::<i64>()
            .map(|i| (rest, Expr::Int(i)))
            .map_err(|_| nom_error(input, nom::error::ErrorKind::Digit))
    }
}

fn parse_array_literal(input: &str) -> IResult<&str, Expr> {
    map(
        delimited(
            char('['),
            terminated(
                separated_list0(char(','), ws(parse_expr)),
                opt(ws(char(','))),
            ),
            ws(char(']')),
        ),
        Expr::Array,
    )(input)
}

fn parse_map_literal(input: &str) -> IResult<&str, Expr> {
    map(
        delimited(
            char('{'),
            terminated(
                separated_list0(
                    char(','),
                    separated_pair(ws(parse_expr), char(':'), ws(parse_expr)),
                ),
                opt(ws(char(','))),
            ),
            ws(char('}')),
        ),
        Expr::Map,
    )(input)
}

fn parse_apply(input: &str) -> IResult<&str, Expr> {
    map(
        pair(
            identifier,
            delimited(
                ws(char('(')),
                separated_list0(char(','), ws(parse_expr)),
                char(')'),
            ),
        ),
        |(function, args)| Expr::Apply {
            function: function.to_string(),
            args,
        },
    )(input)
}

fn parse_primary(input: &str) -> IResult<&str, Expr> {
    let (input, _) = multispace0(input)?;
    alt((
        parse_number,
        map(parse_string_literal, Expr::String),
        map(keyword("true"), |_| Expr::Boolean(true)),
        map(keyword("false"), |_| Expr::Boolean(false)),
        map(keyword("None"), |_| Expr::None),
        parse_array_literal,
        parse_map_literal,
        delimited(char('('), ws(parse_expr), char(')')),
        parse_apply,
        map(identifier, |name| Expr::Ident(name.to_string())),
    ))(input)
}

fn member_suffix(input: &str) -> IResult<&str, &str> {
    preceded(pair(multispace0, char('.')), preceded(multispace0, identifier))(input)
}

fn index_suffix(input: &str) -> IResult<&str, Expr> {
    delimited(pair(multispace0, char('[')), ws(parse_expr), char(']'))(input)
}

fn parse_postfix(input: &str) -> IResult<&str, Expr> {
    let (mut rest, mut expr) = parse_primary(input)?;
    loop {
        if let Ok((next, field)) = member_suffix(rest) {
            expr = Expr::Member {
                target: Box::new(expr),
                field: field.to_string(),
            };
            rest = next;
        } else if let Ok((next, index)) = index_suffix(rest) {
            expr = Expr::Index {
                target: Box::new(expr),
                index: Box::new(index),
            };
            rest = next;
        } else {
            return Ok((rest, expr));
        }
    }
}

fn parse_unary(input: &str) -> IResult<&str, Expr> {
    let (input, _) = multispace0(input)?;
    alt((
        map(preceded(char('!'), parse_unary), |operand| Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(operand),
        }),
        map(preceded(char('-'), parse_unary), |operand| Expr::Unary {
            op: UnaryOp::Negate,
            operand: Box::new(operand),
        }),
        parse_postfix,
    ))(input)
}

fn fold_binary<'a>(
    input: &'a str,
    operators: &[(&str, BinaryOp)],
    operand: fn(&'a str) -> IResult<&'a str, Expr>,
) -> IResult<&'a str, Expr> {
    let (mut rest, mut lhs) = operand(input)?;
    'outer: loop {
        let (after_ws, _) = multispace0(rest)?;
        for (token, op) in operators {
            if let Some(after_op) = after_ws.strip_prefix(token) {
                let Ok((next, rhs)) = operand(after_op) else {
                    break;
                };
                lhs = Expr::Binary {
                    op: *op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                };
                rest = next;
                continue 'outer;
            }
        }
        return Ok((rest, lhs));
    }
}

fn parse_mul(input: &str) -> IResult<&str, Expr> {
    fold_binary(
        input,
        &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)],
        parse_unary,
    )
}

fn parse_add(input: &str) -> IResult<&str, Expr> {
    fold_binary(input, &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)], parse_mul)
}

fn parse_cmp(input: &str) -> IResult<&str, Expr> {
    fold_binary(
        input,
        &[
            ("<=", BinaryOp::Le),
            (">=", BinaryOp::Ge),
            ("<", BinaryOp::Lt),
            (">", BinaryOp::Gt),
        ],
        parse_add,
    )
}

fn parse_eq(input: &str) -> IResult<&str, Expr> {
    fold_binary(input, &[("==", BinaryOp::Eq), ("!=", BinaryOp::Ne)], parse_cmp)
}

fn parse_and(input: &str) -> IResult<&str, Expr> {
    fold_binary(input, &[("&&", BinaryOp::And)], parse_eq)
}

fn parse_or(input: &str) -> IResult<&str, Expr> {
    fold_binary(input, &[("||", BinaryOp::Or)], parse_and)
}

fn parse_if(input: &str) -> IResult<&str, Expr> {
    map(
        tuple((
            preceded(ws(keyword("if")), parse_expr),
            preceded(ws(keyword("then")), parse_expr),
            preceded(ws(keyword("else")), parse_expr),
        )),
        |(condition, then, otherwise)| Expr::IfThenElse {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        },
    )(input)
}

pub(crate) fn parse_expr(input: &str) -> IResult<&str, Expr> {
    alt((parse_if, parse_or))(input)
}

fn option_text(input: &str) -> IResult<&str, String> {
    let (rest, parts) = parse_string_literal(input)?;
    match Expr::String(parts).as_plain_string() {
        Some(text) => Ok((rest, text)),
        None => Err(nom_error(input, nom::error::ErrorKind::Verify)),
    }
}

fn option_value(input: &str) -> IResult<&str, String> {
    alt((
        option_text,
        map(
            recognize(alt((parse_number, map(keyword("true"), |_| Expr::None), map(keyword("false"), |_| Expr::None)))),
            str::to_string,
        ),
    ))(input)
}

fn placeholder_option(input: &str) -> IResult<&str, PlaceholderOption> {
    let (input, name) = ws(alt((tag("sep"), tag("default"), tag("true"), tag("false"))))(input)?;
    let (input, _) = terminated(char('='), not(char('=')))(input)?;
    let (input, value) = ws(option_value)(input)?;
    let option = match name {
        "sep" => PlaceholderOption::Sep(value),
        "default" => PlaceholderOption::Default(value),
        "true" => PlaceholderOption::True(value),
        _ => PlaceholderOption::False(value),
    };
    Ok((input, option))
}

fn placeholder_body(input: &str) -> IResult<&str, Placeholder> {
    let (input, options) = many0(placeholder_option)(input)?;
    let (input, expr) = ws(parse_expr)(input)?;
    Ok((input, Placeholder { options, expr }))
}

/// Parse the inside of `~{...}`.
pub fn parse_placeholder(body: &str) -> std::result::Result<Placeholder, String> {
    all_consuming(placeholder_body)(body)
        .map(|(_, placeholder)| placeholder)
        .map_err(|_| format!("invalid placeholder '{}'", body.trim()))
}

/// Parse a complete WDL expression.
pub fn parse_expression(text: &str) -> std::result::Result<Expr, String> {
    all_consuming(ws(parse_expr))(text)
        .map(|(_, expr)| expr)
        .map_err(|_| format!("invalid expression '{}'", text.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_member_reference() {
        let expr = parse_expression("align.bam").unwrap();
        assert_eq!(expr, Expr::member("align", "bam"));
        assert_eq!(
            expr.references(),
            vec![Reference {
                root: "align".to_string(),
                field: Some("bam".to_string())
            }]
        );
    }

    #[test]
    fn test_parse_literals() {
        assert_eq!(parse_expression("42").unwrap(), Expr::Int(42));
        assert_eq!(parse_expression("2.5").unwrap(), Expr::Float(2.5));
        assert_eq!(parse_expression("true").unwrap(), Expr::Boolean(true));
        assert_eq!(parse_expression("None").unwrap(), Expr::None);
        assert_eq!(parse_expression("'a b'").unwrap(), Expr::text("a b"));
    }

    #[test]
    fn test_keyword_prefix_is_identifier() {
        assert_eq!(parse_expression("trueish").unwrap(), Expr::ident("trueish"));
    }

    #[test]
    fn test_operator_precedence() {
        let expr = parse_expression("a + b * 2 == c || !d").unwrap();
        assert_eq!(expr.to_string(), "a + b * 2 == c || !d");
        match expr {
            Expr::Binary { op, .. } => assert_eq!(op, BinaryOp::Or),
            other => panic!("expected binary, got {:?}", other),
        }
    }

    #[test]
    fn test_parenthesized_rendering_is_kept() {
        let expr = parse_expression("(a + b) * c").unwrap();
        assert_eq!(expr.to_string(), "(a + b) * c");
    }

    #[test]
    fn test_function_application_and_collections() {
        let expr = parse_expression(r#"select_first([x, "default.txt"])"#).unwrap();
        assert_eq!(expr.to_string(), r#"select_first([x, "default.txt"])"#);
        assert_eq!(expr.references().len(), 1);

        let map = parse_expression(r#"{"a": 1, "b": 2}"#).unwrap();
        assert_eq!(map.literal_value(), Some(serde_json::json!({"a": 1, "b": 2})));
    }

    #[test]
    fn test_if_then_else() {
        let expr = parse_expression("if flag then 1 else 2").unwrap();
        assert!(matches!(expr, Expr::IfThenElse { .. }));
        assert_eq!(expr.to_string(), "if flag then 1 else 2");
    }

    #[test]
    fn test_string_interpolation() {
        let expr = parse_expression(r#""~{prefix}.sorted.bam""#).unwrap();
        match &expr {
            Expr::String(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(&parts[1], StringPart::Text(t) if t == ".sorted.bam"));
            }
            other => panic!("expected string, got {:?}", other),
        }
        assert_eq!(expr.as_plain_string(), None);
        assert_eq!(expr.references()[0].root, "prefix");
    }

    #[test]
    fn test_string_escapes_round_trip() {
        let expr = parse_expression(r#""He said \"hi\"\t""#).unwrap();
        assert_eq!(expr.as_plain_string().as_deref(), Some("He said \"hi\"\t"));
        assert_eq!(expr.to_string(), r#""He said \"hi\"\t""#);
    }

    #[test]
    fn test_placeholder_options() {
        let placeholder = parse_placeholder(r#"sep=" " files"#).unwrap();
        assert_eq!(placeholder.sep(), Some(" "));
        assert_eq!(placeholder.expr, Expr::ident("files"));

        let flag = parse_placeholder(r#"true="--fast" false="" fast"#).unwrap();
        assert_eq!(flag.true_false(), Some(("--fast", "")));

        let plain = parse_placeholder("threads").unwrap();
        assert!(plain.options.is_empty());
    }

    #[test]
    fn test_negative_literal_value() {
        let expr = parse_expression("-3").unwrap();
        assert_eq!(expr.literal_value(), Some(serde_json::json!(-3)));
    }

    #[test]
    fn test_invalid_expression() {
        assert!(parse_expression("a +").is_err());
        assert!(parse_expression("(a, b)").is_err());
    }

    #[test]
    fn test_replace_idents_skips_member_roots() {
        let expr = parse_expression(r#"m * 2 + align.count + length("~{m}")"#).unwrap();
        let replaced: std::result::Result<Expr, ()> = expr.replace_idents(&mut |name: &str| {
            Ok((name == "m" || name == "align").then(|| parse_expression("n + 1").unwrap()))
        });
        let replaced = replaced.unwrap();
        let roots: Vec<String> = replaced.references().into_iter().map(|r| r.to_string()).collect();
        assert_eq!(roots, vec!["n", "align.count"]);
    }

    #[test]
    fn test_find_placeholder_end_skips_strings() {
        assert_eq!(find_placeholder_end(r#"sep="}" xs} tail"#), Some(10));
    }
}
