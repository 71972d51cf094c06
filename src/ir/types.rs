use crate::error::{ConvertError, Result};
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, multispace0},
    combinator::{all_consuming, map, opt, value},
    sequence::{delimited, pair, preceded, separated_pair, terminated},
    IResult,
};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::fmt;

/// Languages a type can be rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dialect {
    Wdl,
    Cwl,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Wdl => f.write_str("WDL"),
            Dialect::Cwl => f.write_str("CWL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    String,
    Int,
    Float,
    Boolean,
    File,
    Array(Box<TypeSpec>),
    Map(Box<TypeSpec>, Box<TypeSpec>),
}

/// A value type. Container kinds always own their nested types, so the
/// "ARRAY/MAP carry nested types, scalars do not" rule holds by construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeSpec {
    kind: TypeKind,
    optional: bool,
}

impl TypeSpec {
    pub fn new(kind: TypeKind) -> Self {
        Self {
            kind,
            optional: false,
        }
    }

    pub fn string() -> Self {
        Self::new(TypeKind::String)
    }

    pub fn int() -> Self {
        Self::new(TypeKind::Int)
    }

    pub fn float() -> Self {
        Self::new(TypeKind::Float)
    }

    pub fn boolean() -> Self {
        Self::new(TypeKind::Boolean)
    }

    pub fn file() -> Self {
        Self::new(TypeKind::File)
    }

    pub fn array(item: TypeSpec) -> Self {
        Self::new(TypeKind::Array(Box::new(item)))
    }

    pub fn map(key: TypeSpec, value: TypeSpec) -> Self {
        Self::new(TypeKind::Map(Box::new(key), Box::new(value)))
    }

    /// Same type with the optional flag set.
    pub fn into_optional(self) -> Self {
        self.with_optional(true)
    }

    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, TypeKind::Array(_))
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, TypeKind::File)
    }

    pub fn item_type(&self) -> Option<&TypeSpec> {
        match &self.kind {
            TypeKind::Array(item) => Some(item),
            _ => None,
        }
    }

    /// Does this type mention a file anywhere (including nested items)?
    pub fn contains_file(&self) -> bool {
        match &self.kind {
            TypeKind::File => true,
            TypeKind::Array(item) => item.contains_file(),
            TypeKind::Map(key, value) => key.contains_file() || value.contains_file(),
            _ => false,
        }
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeKind::String => f.write_str("String")?,
            TypeKind::Int => f.write_str("Int")?,
            TypeKind::Float => f.write_str("Float")?,
            TypeKind::Boolean => f.write_str("Boolean")?,
            TypeKind::File => f.write_str("File")?,
            TypeKind::Array(item) => write!(f, "Array[{}]", item)?,
            TypeKind::Map(key, value) => write!(f, "Map[{}, {}]", key, value)?,
        }
        if self.optional {
            f.write_str("?")?;
        }
        Ok(())
    }
}

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn parse_base_type(input: &str) -> IResult<&str, TypeKind> {
    alt((
        value(TypeKind::String, tag("String")),
        value(TypeKind::Int, tag("Int")),
        value(TypeKind::Float, tag("Float")),
        value(TypeKind::File, tag("File")),
        value(TypeKind::Boolean, tag("Boolean")),
        map(
            delimited(
                pair(tag("Array"), ws(char('['))),
                parse_type_spec,
                ws(char(']')),
            ),
            |item| TypeKind::Array(Box::new(item)),
        ),
        map(
            delimited(
                pair(tag("Map"), ws(char('['))),
                separated_pair(parse_type_spec, ws(char(',')), parse_type_spec),
                ws(char(']')),
            ),
            |(key, value)| TypeKind::Map(Box::new(key), Box::new(value)),
        ),
    ))(input)
}

pub(crate) fn parse_type_spec(input: &str) -> IResult<&str, TypeSpec> {
    map(
        pair(
            terminated(parse_base_type, opt(preceded(multispace0, char('+')))),
            opt(preceded(multispace0, char('?'))),
        ),
        |(kind, optional)| TypeSpec {
            kind,
            optional: optional.is_some(),
        },
    )(input)
}

/// Map a WDL type token (`Array[File]?`, `Map[String, Int]`) to a TypeSpec.
///
/// The non-empty array qualifier `+` is accepted and not retained; callers
/// that care look for it in the token.
pub fn parse_type(token: &str) -> Result<TypeSpec> {
    all_consuming(ws(parse_type_spec))(token)
        .map(|(_, spec)| spec)
        .map_err(|_| ConvertError::Type(token.trim().to_string()))
}

/// Render a TypeSpec as a type token in the given dialect. CWL tokens that
/// need the expanded form are returned as compact JSON.
pub fn render_type(spec: &TypeSpec, dialect: Dialect) -> Result<String> {
    match dialect {
        Dialect::Wdl => Ok(spec.to_string()),
        Dialect::Cwl => match cwl_type_value(spec)? {
            Value::String(token) => Ok(token),
            other => Ok(serde_json::to_string(&other)?),
        },
    }
}

/// CWL type for a TypeSpec. Optionals use the `T?` shorthand where the inner
/// type is a name and the `["null", T]` union otherwise.
pub fn cwl_type_value(spec: &TypeSpec) -> Result<Value> {
    let base = match &spec.kind {
        TypeKind::String => Value::from("string"),
        TypeKind::Int => Value::from("int"),
        TypeKind::Float => Value::from("float"),
        TypeKind::Boolean => Value::from("boolean"),
        TypeKind::File => Value::from("File"),
        TypeKind::Array(item) => match cwl_type_value(item)? {
            Value::String(name) if !name.ends_with('?') && !name.ends_with("[]") => {
                Value::from(format!("{}[]", name))
            }
            items => {
                let mut array = Mapping::new();
                array.insert("type".into(), "array".into());
                array.insert("items".into(), items);
                Value::Mapping(array)
            }
        },
        TypeKind::Map(key, _) => {
            let reason = if matches!(key.kind, TypeKind::String) {
                spec.to_string()
            } else {
                format!("{} (non-string key)", spec)
            };
            return Err(ConvertError::UnsupportedType {
                ty: reason,
                dialect: Dialect::Cwl.to_string(),
            });
        }
    };

    if !spec.optional {
        return Ok(base);
    }
    Ok(match base {
        Value::String(name) => Value::from(format!("{}?", name)),
        other => Value::Sequence(vec![Value::from("null"), other]),
    })
}

/// Inverse of [`cwl_type_value`].
pub fn parse_cwl_type(value: &Value) -> Result<TypeSpec> {
    let unrecognized = || ConvertError::Type(format!("{:?}", value));
    match value {
        Value::String(token) => {
            if let Some(inner) = token.strip_suffix('?') {
                return Ok(parse_cwl_type(&Value::from(inner))?.into_optional());
            }
            if let Some(inner) = token.strip_suffix("[]") {
                return Ok(TypeSpec::array(parse_cwl_type(&Value::from(inner))?));
            }
            match token.as_str() {
                "string" => Ok(TypeSpec::string()),
                "int" | "long" => Ok(TypeSpec::int()),
                "float" | "double" => Ok(TypeSpec::float()),
                "boolean" => Ok(TypeSpec::boolean()),
                "File" => Ok(TypeSpec::file()),
                _ => Err(unrecognized()),
            }
        }
        Value::Sequence(members) => match members.as_slice() {
            [Value::String(null), other] | [other, Value::String(null)] if null == "null" => {
                Ok(parse_cwl_type(other)?.into_optional())
            }
            _ => Err(unrecognized()),
        },
        Value::Mapping(mapping) => {
            let is_array = mapping.get("type").and_then(Value::as_str) == Some("array");
            match (is_array, mapping.get("items")) {
                (true, Some(items)) => Ok(TypeSpec::array(parse_cwl_type(items)?)),
                _ => Err(unrecognized()),
            }
        }
        _ => Err(unrecognized()),
    }
}

/// Whether a value of `source` may be supplied where `target` is expected.
pub fn is_assignable(source: &TypeSpec, target: &TypeSpec) -> bool {
    if source.optional && !target.optional {
        return false;
    }
    match (&source.kind, &target.kind) {
        (TypeKind::Array(a), TypeKind::Array(b)) => is_assignable(a, b),
        (TypeKind::Map(ka, va), TypeKind::Map(kb, vb)) => {
            is_assignable(ka, kb) && is_assignable(va, vb)
        }
        (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b)
            && !matches!(a, TypeKind::Array(_) | TypeKind::Map(_, _)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_type_scalars() {
        assert_eq!(parse_type("String").unwrap(), TypeSpec::string());
        assert_eq!(parse_type("Int?").unwrap(), TypeSpec::int().into_optional());
        assert_eq!(parse_type(" File ").unwrap(), TypeSpec::file());
    }

    #[test]
    fn test_parse_type_nested_containers() {
        let parsed = parse_type("Array[Map[String, Array[File?]]]?").unwrap();
        let expected = TypeSpec::array(TypeSpec::map(
            TypeSpec::string(),
            TypeSpec::array(TypeSpec::file().into_optional()),
        ))
        .into_optional();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn test_parse_type_accepts_non_empty_qualifier() {
        assert_eq!(
            parse_type("Array[File]+").unwrap(),
            TypeSpec::array(TypeSpec::file())
        );
    }

    #[test]
    fn test_parse_type_rejects_unknown_token() {
        match parse_type("Pair[Int, Int]") {
            Err(ConvertError::Type(token)) => assert_eq!(token, "Pair[Int, Int]"),
            other => panic!("expected type error, got {:?}", other),
        }
        assert!(parse_type("Strin").is_err());
        assert!(parse_type("Array[]").is_err());
    }

    #[test]
    fn test_render_wdl_matches_source_token() {
        let spec = parse_type("Map[String, Array[Int]]?").unwrap();
        assert_eq!(render_type(&spec, Dialect::Wdl).unwrap(), "Map[String, Array[Int]]?");
    }

    #[test]
    fn test_render_cwl_shorthand_and_expanded() {
        assert_eq!(render_type(&TypeSpec::file(), Dialect::Cwl).unwrap(), "File");
        assert_eq!(
            render_type(&TypeSpec::array(TypeSpec::file()).into_optional(), Dialect::Cwl).unwrap(),
            "File[]?"
        );
        let nested = TypeSpec::array(TypeSpec::array(TypeSpec::int()));
        assert_eq!(
            render_type(&nested, Dialect::Cwl).unwrap(),
            r#"{"type":"array","items":"int[]"}"#
        );
    }

    #[test]
    fn test_render_cwl_rejects_maps() {
        let string_keyed = TypeSpec::map(TypeSpec::string(), TypeSpec::int());
        assert!(matches!(
            render_type(&string_keyed, Dialect::Cwl),
            Err(ConvertError::UnsupportedType { .. })
        ));
        let int_keyed = TypeSpec::map(TypeSpec::int(), TypeSpec::int());
        match render_type(&int_keyed, Dialect::Cwl) {
            Err(ConvertError::UnsupportedType { ty, .. }) => assert!(ty.contains("non-string key")),
            other => panic!("expected unsupported type, got {:?}", other),
        }
    }

    #[test]
    fn test_cwl_round_trip_for_representable_types() {
        let samples = vec![
            TypeSpec::string(),
            TypeSpec::int().into_optional(),
            TypeSpec::float(),
            TypeSpec::boolean().into_optional(),
            TypeSpec::array(TypeSpec::file()),
            TypeSpec::array(TypeSpec::file().into_optional()),
            TypeSpec::array(TypeSpec::array(TypeSpec::string())).into_optional(),
            TypeSpec::array(TypeSpec::array(TypeSpec::int().into_optional())),
        ];
        for spec in samples {
            let rendered = cwl_type_value(&spec).unwrap();
            assert_eq!(parse_cwl_type(&rendered).unwrap(), spec, "round trip of {}", spec);
        }
    }

    #[test]
    fn test_wdl_round_trip() {
        let spec = TypeSpec::map(TypeSpec::string(), TypeSpec::array(TypeSpec::float())).into_optional();
        let token = render_type(&spec, Dialect::Wdl).unwrap();
        assert_eq!(parse_type(&token).unwrap(), spec);
    }

    #[test]
    fn test_assignability_rules() {
        let file = TypeSpec::file();
        let opt_file = TypeSpec::file().into_optional();
        assert!(is_assignable(&file, &file));
        assert!(is_assignable(&file, &opt_file));
        assert!(!is_assignable(&opt_file, &file));
        assert!(!is_assignable(&TypeSpec::int(), &TypeSpec::float()));
        assert!(!is_assignable(&TypeSpec::string(), &file));
        assert!(is_assignable(
            &TypeSpec::array(file.clone()),
            &TypeSpec::array(opt_file.clone())
        ));
        assert!(!is_assignable(&TypeSpec::array(file.clone()), &file));
        assert!(is_assignable(
            &TypeSpec::map(TypeSpec::string(), TypeSpec::int()),
            &TypeSpec::map(TypeSpec::string(), TypeSpec::int().into_optional())
        ));
    }
}
