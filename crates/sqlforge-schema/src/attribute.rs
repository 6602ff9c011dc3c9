//! Attribute descriptors and column-type inference.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use sqlforge_core::{ColumnType, Value};

/// A single validation rule token attached to an attribute. Mirrors the
/// pipe-delimited validation DSL model definitions are expected to carry
/// (`"required|string|max:255"`, `"in:pending,completed"`); each token is
/// parsed into a variant that either carries a type signal or doesn't.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationRule {
    Required,
    Nullable,
    StringType { max: Option<u32> },
    Text,
    Integer,
    BigInteger,
    Float,
    Boolean,
    Date,
    DateTime,
    Json,
    /// An enumerated value list, detected from a validation rule that
    /// carries one, preserved verbatim.
    Enum(Vec<String>),
    /// A rule token with no type signal (`"email"`, `"unique:users"`, ...).
    Opaque(String),
}

impl ValidationRule {
    /// Parses one pipe-delimited rule string into its component tokens.
    pub fn parse_rules(spec: &str) -> Vec<ValidationRule> {
        spec.split('|')
            .filter(|s| !s.is_empty())
            .map(ValidationRule::parse_token)
            .collect()
    }

    fn parse_token(token: &str) -> ValidationRule {
        let (head, rest) = match token.split_once(':') {
            Some((h, r)) => (h, Some(r)),
            None => (token, None),
        };
        match head {
            "required" => ValidationRule::Required,
            "nullable" => ValidationRule::Nullable,
            "string" => ValidationRule::StringType {
                max: rest.and_then(|r| r.parse().ok()),
            },
            "max" if rest.is_some() => ValidationRule::StringType {
                max: rest.and_then(|r| r.parse().ok()),
            },
            "text" => ValidationRule::Text,
            "integer" | "int" => ValidationRule::Integer,
            "bigint" | "biginteger" => ValidationRule::BigInteger,
            "float" | "numeric" | "decimal" => ValidationRule::Float,
            "boolean" | "bool" => ValidationRule::Boolean,
            "date" => ValidationRule::Date,
            "datetime" | "timestamp" => ValidationRule::DateTime,
            "json" => ValidationRule::Json,
            "in" | "enum" => {
                let values = rest
                    .map(|r| r.split(',').map(|v| v.trim().to_string()).collect())
                    .unwrap_or_default();
                ValidationRule::Enum(values)
            }
            _ => ValidationRule::Opaque(token.to_string()),
        }
    }

    /// The canonical column type this rule signals, if any.
    fn type_tag(&self) -> Option<ColumnType> {
        match self {
            ValidationRule::StringType { .. } => Some(ColumnType::String),
            ValidationRule::Text => Some(ColumnType::Text),
            ValidationRule::Integer => Some(ColumnType::Integer),
            ValidationRule::BigInteger => Some(ColumnType::BigInt),
            ValidationRule::Float => Some(ColumnType::Float),
            ValidationRule::Boolean => Some(ColumnType::Boolean),
            ValidationRule::Date => Some(ColumnType::Date),
            ValidationRule::DateTime => Some(ColumnType::DateTime),
            ValidationRule::Json => Some(ColumnType::Json),
            ValidationRule::Enum(values) => Some(ColumnType::Enum(values.clone())),
            ValidationRule::Required | ValidationRule::Nullable | ValidationRule::Opaque(_) => {
                None
            }
        }
    }
}

/// Descriptor for a single model attribute.
#[derive(Clone)]
pub struct AttributeDescriptor {
    pub validation: Vec<ValidationRule>,
    pub default: Option<Value>,
    pub unique: bool,
    pub hidden: bool,
    pub guarded: bool,
    pub fillable: bool,
    pub factory: Option<Arc<dyn Fn() -> Value + Send + Sync>>,
}

impl std::fmt::Debug for AttributeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeDescriptor")
            .field("validation", &self.validation)
            .field("default", &self.default)
            .field("unique", &self.unique)
            .field("hidden", &self.hidden)
            .field("guarded", &self.guarded)
            .field("fillable", &self.fillable)
            .field("factory", &self.factory.is_some())
            .finish()
    }
}

impl Default for AttributeDescriptor {
    fn default() -> Self {
        Self {
            validation: Vec::new(),
            default: None,
            unique: false,
            hidden: false,
            guarded: false,
            fillable: true,
            factory: None,
        }
    }
}

impl AttributeDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: &str) -> Self {
        Self {
            validation: ValidationRule::parse_rules(rules),
            ..Self::default()
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

static ID_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)_id$").expect("valid regex"));
static AT_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)_at$").expect("valid regex"));
static BOOL_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(is_|has_)").expect("valid regex"));

/// Infers the canonical column type for `name`/`descriptor` following this
/// priority order:
///
/// 1. validation-rule type tag
/// 2. default-value runtime type
/// 3. column-name heuristic (`*_id`, `*_at`, `is_*`/`has_*`)
/// 4. fallback `string`
pub fn infer_column_type(name: &str, descriptor: &AttributeDescriptor) -> ColumnType {
    if let Some(ty) = descriptor
        .validation
        .iter()
        .find_map(ValidationRule::type_tag)
    {
        return ty;
    }

    if let Some(default) = &descriptor.default {
        if let Some(ty) = infer_from_default(default) {
            return ty;
        }
    }

    if ID_SUFFIX_RE.is_match(name) {
        return ColumnType::BigInt;
    }
    if AT_SUFFIX_RE.is_match(name) {
        return ColumnType::DateTime;
    }
    if BOOL_PREFIX_RE.is_match(name) {
        return ColumnType::Boolean;
    }

    ColumnType::String
}

fn infer_from_default(value: &Value) -> Option<ColumnType> {
    match value {
        Value::String(s) if s.len() <= 255 => Some(ColumnType::String),
        Value::String(_) => Some(ColumnType::Text),
        Value::Int32(_) => Some(ColumnType::Integer),
        Value::Int64(v) if *v > i32::MAX as i64 || *v < i32::MIN as i64 => {
            Some(ColumnType::BigInt)
        }
        Value::Int64(_) => Some(ColumnType::Integer),
        Value::Float64(_) | Value::Decimal(_) => Some(ColumnType::Float),
        Value::Bool(_) => Some(ColumnType::Boolean),
        Value::Date(_) => Some(ColumnType::Date),
        Value::DateTime(_) | Value::DateTimeUtc(_) => Some(ColumnType::DateTime),
        Value::Json(_) => Some(ColumnType::Json),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rule_type_tag_wins_first() {
        let descriptor = AttributeDescriptor::with_rules("string|max:255").with_default(0i64);
        assert_eq!(
            infer_column_type("name", &descriptor),
            ColumnType::String
        );
    }

    #[test]
    fn long_default_string_infers_text() {
        let descriptor = AttributeDescriptor::new().with_default("x".repeat(300));
        assert_eq!(infer_column_type("bio", &descriptor), ColumnType::Text);
    }

    #[test]
    fn integer_default_infers_integer() {
        let descriptor = AttributeDescriptor::new().with_default(0i64);
        assert_eq!(infer_column_type("count", &descriptor), ColumnType::Integer);
    }

    #[test]
    fn name_heuristic_is_admin_infers_boolean() {
        let descriptor = AttributeDescriptor::new();
        assert_eq!(
            infer_column_type("is_admin", &descriptor),
            ColumnType::Boolean
        );
    }

    #[test]
    fn name_heuristic_user_id_infers_bigint() {
        let descriptor = AttributeDescriptor::new();
        assert_eq!(
            infer_column_type("user_id", &descriptor),
            ColumnType::BigInt
        );
    }

    #[test]
    fn fallback_is_string() {
        let descriptor = AttributeDescriptor::new();
        assert_eq!(infer_column_type("nickname", &descriptor), ColumnType::String);
    }

    #[test]
    fn enum_rule_preserves_value_list_verbatim() {
        let descriptor = AttributeDescriptor::with_rules("in:pending,completed,cancelled");
        match infer_column_type("status", &descriptor) {
            ColumnType::Enum(values) => {
                assert_eq!(values, vec!["pending", "completed", "cancelled"]);
            }
            other => panic!("expected enum, got {other:?}"),
        }
    }
}
