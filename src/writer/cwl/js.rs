//! WDL expressions as CWL JavaScript expressions.

use crate::ir::expr::{BinaryOp, UnaryOp};
use crate::ir::{Expr, Placeholder, StringPart};

/// Resolves the names an expression reads to JavaScript.
pub(crate) trait JsScope {
    fn reference(&self, root: &str, field: Option<&str>) -> Result<String, String>;
}

fn quote(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

fn call(function: &str, args: &[Expr], scope: &dyn JsScope) -> Result<String, String> {
    let js: Vec<String> = args
        .iter()
        .map(|arg| to_js(arg, scope))
        .collect::<Result<_, _>>()?;
    let arity = |n: usize| {
        if js.len() == n {
            Ok(())
        } else {
            Err(format!("function '{}' with {} arguments", function, js.len()))
        }
    };
    match function {
        "basename" => match js.as_slice() {
            [path] => Ok(format!("{}.split(\"/\").pop()", path)),
            [path, suffix] => Ok(format!(
                "(function(b, s) {{ return b.endsWith(s) ? b.slice(0, b.length - s.length) : b; }})({}.split(\"/\").pop(), {})",
                path, suffix
            )),
            _ => Err(format!("function 'basename' with {} arguments", js.len())),
        },
        "sub" => {
            arity(3)?;
            Ok(format!("{}.replace(new RegExp({}, \"g\"), {})", js[0], js[1], js[2]))
        }
        "length" => {
            arity(1)?;
            Ok(format!("{}.length", js[0]))
        }
        "defined" => {
            arity(1)?;
            Ok(format!("({} !== null)", js[0]))
        }
        "select_first" => {
            arity(1)?;
            Ok(format!(
                "{}.filter(function(v) {{ return v !== null; }})[0]",
                js[0]
            ))
        }
        "select_all" => {
            arity(1)?;
            Ok(format!("{}.filter(function(v) {{ return v !== null; }})", js[0]))
        }
        "floor" | "ceil" | "round" => {
            arity(1)?;
            Ok(format!("Math.{}({})", function, js[0]))
        }
        _ => Err(format!("function '{}'", function)),
    }
}

/// JavaScript for one expression.
pub(crate) fn to_js(expr: &Expr, scope: &dyn JsScope) -> Result<String, String> {
    Ok(match expr {
        Expr::None => "null".to_string(),
        Expr::Boolean(b) => b.to_string(),
        Expr::Int(i) => i.to_string(),
        Expr::Float(x) => format!("{:?}", x),
        Expr::String(parts) => {
            let mut pieces = Vec::new();
            for part in parts {
                pieces.push(match part {
                    StringPart::Text(text) => quote(text),
                    StringPart::Placeholder(placeholder) => placeholder_js(placeholder, scope)?,
                });
            }
            match pieces.len() {
                0 => quote(""),
                1 => pieces.remove(0),
                _ => format!("({})", pieces.join(" + ")),
            }
        }
        Expr::Ident(name) => scope.reference(name, None)?,
        Expr::Member { target, field } => match target.as_ref() {
            Expr::Ident(root) => scope.reference(root, Some(field))?,
            other => format!("{}.{}", to_js(other, scope)?, field),
        },
        Expr::Index { target, index } => {
            format!("{}[{}]", to_js(target, scope)?, to_js(index, scope)?)
        }
        Expr::Array(items) => {
            let items: Vec<String> = items
                .iter()
                .map(|item| to_js(item, scope))
                .collect::<Result<_, _>>()?;
            format!("[{}]", items.join(", "))
        }
        Expr::Map(entries) => {
            let mut fields = Vec::new();
            for (key, value) in entries {
                let key = key
                    .as_plain_string()
                    .ok_or_else(|| format!("map key '{}'", key))?;
                fields.push(format!("{}: {}", quote(&key), to_js(value, scope)?));
            }
            format!("{{{}}}", fields.join(", "))
        }
        Expr::Apply { function, args } => call(function, args, scope)?,
        Expr::Unary { op, operand } => match op {
            UnaryOp::Not => format!("!({})", to_js(operand, scope)?),
            UnaryOp::Negate => format!("-({})", to_js(operand, scope)?),
        },
        Expr::Binary { op, lhs, rhs } => {
            let symbol = match op {
                BinaryOp::Or => "||",
                BinaryOp::And => "&&",
                BinaryOp::Eq => "===",
                BinaryOp::Ne => "!==",
                BinaryOp::Lt => "<",
                BinaryOp::Le => "<=",
                BinaryOp::Gt => ">",
                BinaryOp::Ge => ">=",
                BinaryOp::Add => "+",
                BinaryOp::Sub => "-",
                BinaryOp::Mul => "*",
                BinaryOp::Div => "/",
                BinaryOp::Rem => "%",
            };
            format!("({} {} {})", to_js(lhs, scope)?, symbol, to_js(rhs, scope)?)
        }
        Expr::IfThenElse {
            condition,
            then,
            otherwise,
        } => format!(
            "({} ? {} : {})",
            to_js(condition, scope)?,
            to_js(then, scope)?,
            to_js(otherwise, scope)?
        ),
    })
}

/// JavaScript rendering of a placeholder, options applied.
pub(crate) fn placeholder_js(placeholder: &Placeholder, scope: &dyn JsScope) -> Result<String, String> {
    let value = to_js(&placeholder.expr, scope)?;
    if let Some((on, off)) = placeholder.true_false() {
        return Ok(format!("({} ? {} : {})", value, quote(on), quote(off)));
    }
    if let Some(sep) = placeholder.sep() {
        return Ok(format!("{}.join({})", value, quote(sep)));
    }
    let fallback = placeholder.default_value().unwrap_or("");
    Ok(format!("({0} === null ? {1} : {0})", value, quote(fallback)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::{parse_expression, parse_placeholder};

    struct Inputs;

    impl JsScope for Inputs {
        fn reference(&self, root: &str, field: Option<&str>) -> Result<String, String> {
            match (root, field) {
                ("bam", None) => Ok("inputs.bam.path".to_string()),
                (name, None) => Ok(format!("inputs.{}", name)),
                (name, Some(field)) => Err(format!("{}.{}", name, field)),
            }
        }
    }

    fn js(text: &str) -> Result<String, String> {
        to_js(&parse_expression(text).unwrap(), &Inputs)
    }

    #[test]
    fn test_interpolated_string() {
        assert_eq!(js("\"~{prefix}.bam\"").unwrap(), "((inputs.prefix === null ? \"\" : inputs.prefix) + \".bam\")");
    }

    #[test]
    fn test_operators_and_conditionals() {
        assert_eq!(js("threads * 2").unwrap(), "(inputs.threads * 2)");
        assert_eq!(
            js("if paired then 2 else 1").unwrap(),
            "(inputs.paired ? 2 : 1)"
        );
        assert_eq!(js("!flag").unwrap(), "!(inputs.flag)");
    }

    #[test]
    fn test_known_functions() {
        assert_eq!(js("basename(bam)").unwrap(), "inputs.bam.path.split(\"/\").pop()");
        assert_eq!(js("length(xs)").unwrap(), "inputs.xs.length");
        assert!(js("basename(bam, \".bam\")").unwrap().ends_with("(inputs.bam.path.split(\"/\").pop(), \".bam\")"));
    }

    #[test]
    fn test_unknown_function_and_member_fail() {
        assert_eq!(js("read_json(x)").unwrap_err(), "function 'read_json'");
        assert_eq!(js("step.out").unwrap_err(), "step.out");
    }

    #[test]
    fn test_placeholder_options() {
        let sep = parse_placeholder("sep=\",\" xs").unwrap();
        assert_eq!(placeholder_js(&sep, &Inputs).unwrap(), "inputs.xs.join(\",\")");
        let flag = parse_placeholder("true=\"-v\" false=\"\" verbose").unwrap();
        assert_eq!(
            placeholder_js(&flag, &Inputs).unwrap(),
            "(inputs.verbose ? \"-v\" : \"\")"
        );
    }
}
