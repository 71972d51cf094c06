use super::ast::*;
use crate::ir::expr::{identifier, keyword, parse_expr, parse_string_literal};
use crate::ir::Expr;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_until, take_while1},
    character::complete::{char, multispace1},
    combinator::{map, opt, recognize, value},
    error::{Error, ErrorKind},
    multi::{many0, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

fn comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(char('#'), take_till(|c| c == '\n')))(input)
}

/// Whitespace and comments.
fn sp(input: &str) -> IResult<&str, ()> {
    value((), many0(alt((multispace1, comment))))(input)
}

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(sp, inner, sp)
}

fn fail<T>(input: &str, kind: ErrorKind) -> IResult<&str, T> {
    Err(nom::Err::Error(Error::new(input, kind)))
}

fn close_brace(input: &str) -> IResult<&str, char> {
    ws(char('}'))(input)
}

/// Everything up to the closer matching an already consumed opener.
fn balanced(input: &str, open: char, close: char) -> IResult<&str, &str> {
    let mut depth = 0usize;
    for (idx, c) in input.char_indices() {
        if c == open {
            depth += 1;
        } else if c == close {
            if depth == 0 {
                return Ok((&input[idx..], &input[..idx]));
            }
            depth -= 1;
        }
    }
    fail(input, ErrorKind::TakeUntil)
}

fn brace_body(input: &str) -> IResult<&str, &str> {
    balanced(input, '{', '}')
}

fn bracket_body(input: &str) -> IResult<&str, &str> {
    balanced(input, '[', ']')
}

/// A type as written. Interpretation is left to lowering so that unknown
/// type names surface as type errors rather than syntax errors.
fn type_token(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        identifier,
        opt(tuple((sp, char('['), bracket_body, char(']')))),
        opt(preceded(sp, char('+'))),
        opt(preceded(sp, char('?'))),
    )))(input)
}

fn declaration(input: &str) -> IResult<&str, Declaration> {
    let (input, _) = sp(input)?;
    let at = input.len();
    let (input, type_token) = type_token(input)?;
    let (input, name) = preceded(sp, identifier)(input)?;
    let (input, expr) = opt(preceded(tuple((sp, char('='), sp)), parse_expr))(input)?;
    Ok((
        input,
        Declaration {
            type_token: type_token.to_string(),
            name: name.to_string(),
            expr,
            at,
        },
    ))
}

fn bound_declaration(input: &str) -> IResult<&str, Declaration> {
    let (rest, decl) = declaration(input)?;
    if decl.expr.is_none() {
        return fail(input, ErrorKind::Verify);
    }
    Ok((rest, decl))
}

fn key_value(input: &str) -> IResult<&str, KeyValue> {
    let (input, _) = sp(input)?;
    let at = input.len();
    let (input, key) = identifier(input)?;
    let (input, _) = ws(char(':'))(input)?;
    let (input, value) = parse_expr(input)?;
    Ok((
        input,
        KeyValue {
            key: key.to_string(),
            value,
            at,
        },
    ))
}

/// `name { item* }`
fn section<'a, O, F>(name: &'static str, item: F) -> impl FnMut(&'a str) -> IResult<&'a str, Vec<O>>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(pair(ws(keyword(name)), char('{')), many0(item), close_brace)
}

fn command(input: &str) -> IResult<&str, CommandNode> {
    let (input, _) = sp(input)?;
    let at = input.len();
    let (input, _) = terminated(keyword("command"), sp)(input)?;
    let (input, (raw, heredoc)) = alt((
        map(
            delimited(tag("<<<"), take_until(">>>"), tag(">>>")),
            |raw: &str| (raw, true),
        ),
        map(delimited(char('{'), brace_body, char('}')), |raw: &str| {
            (raw, false)
        }),
    ))(input)?;
    Ok((
        input,
        CommandNode {
            raw: raw.to_string(),
            heredoc,
            at,
        },
    ))
}

enum TaskSection {
    Inputs(Vec<Declaration>),
    Outputs(Vec<Declaration>),
    Command(CommandNode),
    Runtime(Vec<KeyValue>),
    Meta(Vec<KeyValue>),
    Private(Declaration),
    Ignored,
}

fn task_section(input: &str) -> IResult<&str, TaskSection> {
    alt((
        map(section("input", declaration), TaskSection::Inputs),
        map(section("output", bound_declaration), TaskSection::Outputs),
        map(command, TaskSection::Command),
        map(section("runtime", key_value), TaskSection::Runtime),
        map(section("meta", key_value), TaskSection::Meta),
        map(section("parameter_meta", key_value), |_| TaskSection::Ignored),
        map(bound_declaration, TaskSection::Private),
    ))(input)
}

pub(crate) fn task(input: &str) -> IResult<&str, TaskNode> {
    let (input, _) = sp(input)?;
    let at = input.len();
    let (input, name) = preceded(keyword("task"), ws(identifier))(input)?;
    let (mut input, _) = char('{')(input)?;
    let mut node = TaskNode {
        name: name.to_string(),
        at,
        ..TaskNode::default()
    };
    loop {
        if let Ok((rest, _)) = close_brace(input) {
            return Ok((rest, node));
        }
        let (rest, section) = task_section(input)?;
        match section {
            TaskSection::Inputs(decls) => node.inputs.extend(decls),
            TaskSection::Outputs(decls) => node.outputs.extend(decls),
            TaskSection::Command(cmd) => {
                if node.command.is_some() {
                    return Err(nom::Err::Failure(Error::new(input, ErrorKind::Verify)));
                }
                node.command = Some(cmd);
            }
            TaskSection::Runtime(entries) => node.runtime.extend(entries),
            TaskSection::Meta(entries) => node.meta.extend(entries),
            TaskSection::Private(decl) => node.privates.push(decl),
            TaskSection::Ignored => {}
        }
        input = rest;
    }
}

fn call_input(input: &str) -> IResult<&str, (String, Option<Expr>)> {
    let (input, name) = preceded(sp, identifier)(input)?;
    let (input, expr) = opt(preceded(ws(char('=')), parse_expr))(input)?;
    Ok((input, (name.to_string(), expr)))
}

fn call_body(input: &str) -> IResult<&str, Vec<(String, Option<Expr>)>> {
    delimited(
        ws(char('{')),
        terminated(
            preceded(
                opt(pair(ws(keyword("input")), char(':'))),
                separated_list0(ws(char(',')), call_input),
            ),
            opt(ws(char(','))),
        ),
        close_brace,
    )(input)
}

fn call(input: &str) -> IResult<&str, CallNode> {
    let (input, _) = sp(input)?;
    let at = input.len();
    let (input, _) = keyword("call")(input)?;
    let (input, callee) = preceded(sp, recognize(separated_list1(char('.'), identifier)))(input)?;
    let (input, alias) = opt(preceded(ws(keyword("as")), identifier))(input)?;
    let (input, inputs) = opt(call_body)(input)?;
    Ok((
        input,
        CallNode {
            callee: callee.to_string(),
            alias: alias.map(str::to_string),
            inputs: inputs.unwrap_or_default(),
            at,
        },
    ))
}

fn scatter(input: &str) -> IResult<&str, ScatterNode> {
    let (input, _) = sp(input)?;
    let at = input.len();
    let (input, _) = pair(keyword("scatter"), ws(char('(')))(input)?;
    let (input, variable) = identifier(input)?;
    let (input, _) = ws(keyword("in"))(input)?;
    let (input, collection) = parse_expr(input)?;
    let (input, _) = pair(ws(char(')')), char('{'))(input)?;
    let (input, body) = many0(workflow_element)(input)?;
    let (input, _) = close_brace(input)?;
    Ok((
        input,
        ScatterNode {
            variable: variable.to_string(),
            collection,
            body,
            at,
        },
    ))
}

fn conditional(input: &str) -> IResult<&str, ConditionalNode> {
    let (input, _) = sp(input)?;
    let at = input.len();
    let (input, _) = pair(keyword("if"), ws(char('(')))(input)?;
    let (input, condition) = parse_expr(input)?;
    let (input, _) = pair(ws(char(')')), char('{'))(input)?;
    let (input, body) = many0(workflow_element)(input)?;
    let (input, _) = close_brace(input)?;
    Ok((input, ConditionalNode { condition, body, at }))
}

fn workflow_element(input: &str) -> IResult<&str, WorkflowElement> {
    alt((
        map(call, WorkflowElement::Call),
        map(scatter, WorkflowElement::Scatter),
        map(conditional, WorkflowElement::Conditional),
        map(bound_declaration, WorkflowElement::Declaration),
    ))(input)
}

enum WorkflowSection {
    Inputs(Vec<Declaration>),
    Outputs(Vec<Declaration>),
    Meta(Vec<KeyValue>),
    Element(WorkflowElement),
    Ignored,
}

fn workflow_section(input: &str) -> IResult<&str, WorkflowSection> {
    alt((
        map(section("input", declaration), WorkflowSection::Inputs),
        map(section("output", bound_declaration), WorkflowSection::Outputs),
        map(section("meta", key_value), WorkflowSection::Meta),
        map(section("parameter_meta", key_value), |_| WorkflowSection::Ignored),
        map(workflow_element, WorkflowSection::Element),
    ))(input)
}

pub(crate) fn workflow(input: &str) -> IResult<&str, WorkflowNode> {
    let (input, _) = sp(input)?;
    let at = input.len();
    let (input, name) = preceded(keyword("workflow"), ws(identifier))(input)?;
    let (mut input, _) = char('{')(input)?;
    let mut node = WorkflowNode {
        name: name.to_string(),
        at,
        ..WorkflowNode::default()
    };
    loop {
        if let Ok((rest, _)) = close_brace(input) {
            return Ok((rest, node));
        }
        let (rest, section) = workflow_section(input)?;
        match section {
            WorkflowSection::Inputs(decls) => node.inputs.extend(decls),
            WorkflowSection::Outputs(decls) => node.outputs.extend(decls),
            WorkflowSection::Meta(entries) => node.meta.extend(entries),
            WorkflowSection::Element(element) => node.body.push(element),
            WorkflowSection::Ignored => {}
        }
        input = rest;
    }
}

fn import(input: &str) -> IResult<&str, ImportNode> {
    let (input, _) = sp(input)?;
    let at = input.len();
    let (input, _) = terminated(keyword("import"), sp)(input)?;
    let (rest, parts) = parse_string_literal(input)?;
    let Some(path) = Expr::String(parts).as_plain_string() else {
        return fail(input, ErrorKind::Verify);
    };
    let (rest, alias) = opt(preceded(ws(keyword("as")), identifier))(rest)?;
    // Struct aliases are accepted and ignored.
    let (rest, _) = many0(tuple((
        ws(keyword("alias")),
        identifier,
        ws(keyword("as")),
        identifier,
    )))(rest)?;
    Ok((
        rest,
        ImportNode {
            path,
            alias: alias.map(str::to_string),
            at,
        },
    ))
}

fn struct_def(input: &str) -> IResult<&str, StructNode> {
    let (input, _) = sp(input)?;
    let at = input.len();
    let (input, name) = preceded(keyword("struct"), ws(identifier))(input)?;
    let (input, _) = char('{')(input)?;
    let (input, _) = many0(declaration)(input)?;
    let (input, _) = close_brace(input)?;
    Ok((
        input,
        StructNode {
            name: name.to_string(),
            at,
        },
    ))
}

fn version(input: &str) -> IResult<&str, String> {
    preceded(
        pair(sp, terminated(keyword("version"), sp)),
        map(take_while1(|c: char| !c.is_whitespace()), str::to_string),
    )(input)
}

enum TopLevel {
    Import(ImportNode),
    Struct(StructNode),
    Task(TaskNode),
    Workflow(WorkflowNode),
}

fn top_level(input: &str) -> IResult<&str, TopLevel> {
    alt((
        map(import, TopLevel::Import),
        map(struct_def, TopLevel::Struct),
        map(task, TopLevel::Task),
        map(workflow, TopLevel::Workflow),
    ))(input)
}

fn skip_trivia(input: &str) -> &str {
    sp(input).map_or(input, |(rest, _)| rest)
}

fn leading_word(input: &str) -> &str {
    input
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .next()
        .unwrap_or("")
}

fn describe_failure(input: &str) -> String {
    let word = leading_word(input);
    match word {
        "task" | "workflow" | "struct" => {
            let name = leading_word(input[word.len()..].trim_start());
            format!("invalid {} definition '{}'", word, name)
        }
        "import" => "invalid import statement".to_string(),
        "version" => "version must be the first statement".to_string(),
        _ => {
            let line = input.lines().next().unwrap_or(input);
            format!(
                "invalid WDL syntax near '{}'",
                line.chars().take(50).collect::<String>()
            )
        }
    }
}

/// Skip a `{ ... }` block, treating heredoc commands as opaque.
fn skip_block(input: &str) -> Option<&str> {
    let mut idx = input.find('{')?;
    let mut depth = 0usize;
    while let Some(c) = input[idx..].chars().next() {
        if input[idx..].starts_with("<<<") {
            idx += input[idx..].find(">>>")? + 3;
            continue;
        }
        match c {
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&input[idx + 1..]);
                }
            }
            _ => {}
        }
        idx += c.len_utf8();
    }
    None
}

/// Next line that starts a top-level statement.
fn next_statement(input: &str) -> &str {
    let mut offset = input.find('\n').map_or(input.len(), |i| i + 1);
    while offset < input.len() {
        let line = &input[offset..];
        if matches!(
            leading_word(line.trim_start()),
            "import" | "struct" | "task" | "workflow"
        ) {
            return line;
        }
        offset += line.find('\n').map_or(line.len(), |i| i + 1);
    }
    ""
}

fn recover(input: &str) -> &str {
    if matches!(leading_word(input), "task" | "workflow" | "struct") {
        if let Some(rest) = skip_block(input) {
            return rest;
        }
    }
    next_statement(input)
}

/// Build the syntax tree. A definition that fails to parse is reported and
/// skipped; parsing resumes at the next top-level statement.
pub fn parse_document(source: &str) -> (Document, Vec<SyntaxError>) {
    let mut document = Document::default();
    let mut errors = Vec::new();
    let mut rest = source;

    if let Ok((after, version)) = version(rest) {
        document.version = Some(version);
        rest = after;
    }

    loop {
        rest = skip_trivia(rest);
        if rest.is_empty() {
            break;
        }
        match top_level(rest) {
            Ok((after, item)) => {
                match item {
                    TopLevel::Import(node) => document.imports.push(node),
                    TopLevel::Struct(node) => document.structs.push(node),
                    TopLevel::Task(node) => document.tasks.push(node),
                    TopLevel::Workflow(node) => document.workflows.push(node),
                }
                rest = after;
            }
            Err(_) => {
                errors.push(SyntaxError {
                    at: rest.len(),
                    message: describe_failure(rest),
                });
                rest = recover(rest);
            }
        }
    }

    (document, errors)
}
