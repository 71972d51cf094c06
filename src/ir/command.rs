use super::expr::{find_placeholder_end, parse_placeholder, Placeholder, Reference};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandPart {
    Text(String),
    Placeholder(Placeholder),
}

/// A task's command: shell text with embedded placeholders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub parts: Vec<CommandPart>,
}

impl CommandTemplate {
    /// Split a raw command body into text and placeholders.
    ///
    /// `~{...}` is always interpolated. `${...}` is interpolated in brace
    /// commands, and in heredoc commands only when `is_declared` accepts the
    /// root name; otherwise it stays shell text.
    pub fn parse(
        raw: &str,
        heredoc: bool,
        is_declared: impl Fn(&str) -> bool,
    ) -> std::result::Result<Self, String> {
        let body = dedent(raw);
        let mut parts = Vec::new();
        let mut text = String::new();
        let mut rest = body.as_str();

        while let Some(pos) = rest.find(['~', '$']) {
            let sigil = &rest[pos..];
            if !sigil[1..].starts_with('{') {
                text.push_str(&rest[..pos + 1]);
                rest = &rest[pos + 1..];
                continue;
            }
            let inner = &sigil[2..];
            let end = find_placeholder_end(inner)
                .ok_or_else(|| format!("unterminated placeholder near '{}'", preview(sigil)))?;
            let source = &inner[..end];

            let interpolate = sigil.starts_with('~') || !heredoc || {
                parse_placeholder(source)
                    .ok()
                    .and_then(|p| p.expr.references().first().map(|r| is_declared(&r.root)))
                    .unwrap_or(false)
            };

            if interpolate {
                let placeholder = parse_placeholder(source)?;
                text.push_str(&rest[..pos]);
                if !text.is_empty() {
                    parts.push(CommandPart::Text(std::mem::take(&mut text)));
                }
                parts.push(CommandPart::Placeholder(placeholder));
            } else {
                text.push_str(&rest[..pos + 2 + end + 1]);
            }
            rest = &inner[end + 1..];
        }
        text.push_str(rest);
        if !text.is_empty() {
            parts.push(CommandPart::Text(text));
        }
        Ok(Self { parts })
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &Placeholder> {
        self.parts.iter().filter_map(|part| match part {
            CommandPart::Placeholder(p) => Some(p),
            CommandPart::Text(_) => None,
        })
    }

    pub fn references(&self) -> Vec<Reference> {
        let mut refs: Vec<Reference> = Vec::new();
        for placeholder in self.placeholders() {
            for reference in placeholder.expr.references() {
                if !refs.contains(&reference) {
                    refs.push(reference);
                }
            }
        }
        refs
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in &self.parts {
            match part {
                CommandPart::Text(text) => f.write_str(text)?,
                CommandPart::Placeholder(p) => write!(f, "~{{{}}}", p)?,
            }
        }
        Ok(())
    }
}

fn preview(text: &str) -> String {
    text.chars().take(30).collect()
}

/// Strip the common leading indentation and surrounding blank lines.
pub fn dedent(raw: &str) -> String {
    let lines: Vec<&str> = raw.lines().collect();
    let indent = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);

    let body: Vec<&str> = lines
        .iter()
        .map(|line| line.get(indent..).unwrap_or_else(|| line.trim_start()))
        .collect();

    let start = body.iter().position(|l| !l.trim().is_empty()).unwrap_or(body.len());
    let end = body.iter().rposition(|l| !l.trim().is_empty()).map_or(start, |i| i + 1);
    body[start..end]
        .iter()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::Expr;

    fn declared(name: &str) -> bool {
        matches!(name, "input_file" | "threshold")
    }

    #[test]
    fn test_tilde_placeholders_are_interpolated() {
        let template = CommandTemplate::parse(
            "\n    wc -l ~{input_file} > counts.txt\n",
            true,
            declared,
        )
        .unwrap();
        assert_eq!(template.parts.len(), 3);
        assert!(matches!(&template.parts[0], CommandPart::Text(t) if t == "wc -l "));
        assert!(matches!(
            &template.parts[1],
            CommandPart::Placeholder(p) if p.expr == Expr::ident("input_file")
        ));
    }

    #[test]
    fn test_shell_variables_survive_heredoc() {
        let template =
            CommandTemplate::parse("for f in *; do echo ${f}; done", true, declared).unwrap();
        assert_eq!(template.placeholders().count(), 0);
        assert_eq!(template.to_string(), "for f in *; do echo ${f}; done");
    }

    #[test]
    fn test_dollar_placeholder_for_declared_input() {
        let template =
            CommandTemplate::parse("awk '$3 > ${threshold}' ${input_file}", true, declared)
                .unwrap();
        let names: Vec<String> = template.references().iter().map(|r| r.root.clone()).collect();
        assert_eq!(names, vec!["threshold", "input_file"]);
        assert_eq!(template.to_string(), "awk '$3 > ~{threshold}' ~{input_file}");
    }

    #[test]
    fn test_brace_command_interpolates_dollar_placeholders() {
        let template = CommandTemplate::parse("echo ${undeclared}", false, declared).unwrap();
        assert_eq!(template.references()[0].root, "undeclared");
    }

    #[test]
    fn test_unterminated_placeholder_is_an_error() {
        assert!(CommandTemplate::parse("echo ~{oops", true, declared).is_err());
    }

    #[test]
    fn test_dedent() {
        assert_eq!(dedent("\n    a\n      b\n    c\n  "), "a\n  b\nc");
    }
}
