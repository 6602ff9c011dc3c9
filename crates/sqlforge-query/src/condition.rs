//! WHERE/HAVING predicate composition and dynamic column predicates.
//!
//! Three input shapes are uniformly normalised into a [`Condition`] tree:
//! an object literal (conjunction of equality/`IN`), a `(column, op,
//! value)` triple, or a raw fragment inserted verbatim. Conditions carry no
//! SQL text themselves until [`Condition::render`] is called against a
//! driver and [`ParamBinder`], so the same tree can be reused by the
//! select/update/delete compilers.

use indexmap::IndexMap;
use sqlforge_core::{validate_identifier, DatabaseDriver, JsonContainsMode, Value};

use crate::error::{QueryError, Result};
use crate::param::ParamBinder;

/// Supported comparison operators: `=, !=, <, >, <=, >=, like, in, not in,
/// is, is not`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Like,
    In,
    NotIn,
    Is,
    IsNot,
}

impl Op {
    pub fn parse(token: &str) -> Result<Self> {
        Ok(match token {
            "=" | "eq" => Op::Eq,
            "!=" | "<>" | "ne" => Op::Ne,
            "<" | "lt" => Op::Lt,
            ">" | "gt" => Op::Gt,
            "<=" | "lte" => Op::Le,
            ">=" | "gte" => Op::Ge,
            "like" => Op::Like,
            "in" => Op::In,
            "not in" | "notin" => Op::NotIn,
            "is" => Op::Is,
            "is not" | "isnot" => Op::IsNot,
            other => return Err(QueryError::InvalidOperator(other.to_string())),
        })
    }

    fn sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Gt => ">",
            Op::Le => "<=",
            Op::Ge => ">=",
            Op::Like => "LIKE",
            Op::In => "IN",
            Op::NotIn => "NOT IN",
            Op::Is => "IS",
            Op::IsNot => "IS NOT",
        }
    }
}

/// The right-hand side of a [`Condition::Compare`].
#[derive(Debug, Clone)]
pub enum RValue {
    Scalar(Value),
    List(Vec<Value>),
    /// Pre-rendered, already-parenthesised-or-not SQL, e.g. a correlated
    /// subquery token passed to `whereIn`/`whereNotIn`.
    Raw(String),
    Null,
}

impl From<Value> for RValue {
    fn from(value: Value) -> Self {
        if matches!(value, Value::Null) {
            RValue::Null
        } else {
            RValue::Scalar(value)
        }
    }
}

impl From<Vec<Value>> for RValue {
    fn from(values: Vec<Value>) -> Self {
        RValue::List(values)
    }
}

/// How successive predicates are joined at a given nesting level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conjunction {
    And,
    Or,
}

impl Conjunction {
    fn keyword(self) -> &'static str {
        match self {
            Conjunction::And => " AND ",
            Conjunction::Or => " OR ",
        }
    }
}

/// A normalised predicate node.
#[derive(Debug, Clone)]
pub enum Condition {
    Compare {
        column: String,
        op: Op,
        value: RValue,
    },
    /// A raw fragment token, inserted verbatim.
    Raw(String),
    /// A parenthesised group, e.g. produced by `whereAny`/`whereAll`/
    /// `whereNone` or a `with(relation, |q| ...)` callback.
    Group {
        conjunction: Conjunction,
        negate: bool,
        children: Vec<Condition>,
    },
    /// Case-insensitive `LIKE`: native `ILIKE` on PostgreSQL, `LOWER(col)
    /// LIKE LOWER(?)` elsewhere.
    ILike { column: String, pattern: Value },
    /// A JSON path/containment predicate, dispatched through the driver's
    /// `json_contains_operator` (native `@>`, `JSON_CONTAINS`, or
    /// `json_extract`).
    JsonContains {
        column: String,
        path: Option<String>,
        value: Value,
    },
}

impl Condition {
    /// Builds the conjunction-of-equality/IN shape from an object literal:
    /// array-valued entries become `IN`, scalars become `=`.
    pub fn from_object(entries: IndexMap<String, Value>) -> Vec<Condition> {
        entries
            .into_iter()
            .map(|(column, value)| match value {
                Value::Array(items) => Condition::Compare {
                    column,
                    op: Op::In,
                    value: RValue::List(items),
                },
                other => Condition::Compare {
                    column,
                    op: Op::Eq,
                    value: other.into(),
                },
            })
            .collect()
    }

    pub fn triple(column: impl Into<String>, op: Op, value: impl Into<RValue>) -> Condition {
        Condition::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// Case-insensitive `LIKE` against `column`.
    pub fn ilike(column: impl Into<String>, pattern: impl Into<Value>) -> Condition {
        Condition::ILike {
            column: column.into(),
            pattern: pattern.into(),
        }
    }

    /// JSON path/containment predicate against `column`; `path` is required
    /// for dialects that dispatch through `json_extract` and optional for
    /// `@>`/`JSON_CONTAINS`.
    pub fn json_contains(
        column: impl Into<String>,
        path: Option<String>,
        value: impl Into<Value>,
    ) -> Condition {
        Condition::JsonContains {
            column: column.into(),
            path,
            value: value.into(),
        }
    }

    /// Renders this condition to SQL text, binding any scalar values
    /// through `binder` and validating any dynamically-sourced identifier
    ///.
    pub fn render(&self, driver: &dyn DatabaseDriver, binder: &mut ParamBinder) -> Result<String> {
        match self {
            Condition::Raw(sql) => Ok(sql.clone()),
            Condition::Compare { column, op, value } => {
                render_compare(driver, binder, column, *op, value)
            }
            Condition::Group {
                conjunction,
                negate,
                children,
            } => {
                let rendered = children
                    .iter()
                    .map(|c| c.render(driver, binder))
                    .collect::<Result<Vec<_>>>()?;
                let joined = rendered.join(conjunction.keyword());
                Ok(if *negate {
                    format!("NOT ({joined})")
                } else {
                    format!("({joined})")
                })
            }
            Condition::ILike { column, pattern } => render_ilike(driver, binder, column, pattern),
            Condition::JsonContains { column, path, value } => {
                render_json_contains(driver, binder, column, path.as_deref(), value)
            }
        }
    }
}

fn render_ilike(
    driver: &dyn DatabaseDriver,
    binder: &mut ParamBinder,
    column: &str,
    pattern: &Value,
) -> Result<String> {
    validate_identifier(column, "where clause column")?;
    let quoted = driver.quote_identifier(column);
    if driver.ilike_supported() {
        let placeholder = binder.push(pattern.clone());
        Ok(format!("{quoted} ILIKE {placeholder}"))
    } else {
        let placeholder = binder.push(pattern.clone());
        Ok(format!("LOWER({quoted}) LIKE LOWER({placeholder})"))
    }
}

fn render_json_contains(
    driver: &dyn DatabaseDriver,
    binder: &mut ParamBinder,
    column: &str,
    path: Option<&str>,
    value: &Value,
) -> Result<String> {
    validate_identifier(column, "where clause column")?;
    let quoted = driver.quote_identifier(column);
    match driver.json_contains_operator() {
        JsonContainsMode::NativeOperator => {
            let placeholder = binder.push(value.clone());
            Ok(format!("{quoted} @> {placeholder}"))
        }
        JsonContainsMode::JsonContains => {
            let value_placeholder = binder.push(value.clone());
            match path {
                Some(p) => {
                    let path_placeholder = binder.push(Value::String(p.to_string()));
                    Ok(format!("JSON_CONTAINS({quoted}, {value_placeholder}, {path_placeholder})"))
                }
                None => Ok(format!("JSON_CONTAINS({quoted}, {value_placeholder})")),
            }
        }
        JsonContainsMode::JsonExtract => {
            let path = path.unwrap_or("$");
            let path_placeholder = binder.push(Value::String(path.to_string()));
            let value_placeholder = binder.push(value.clone());
            Ok(format!("json_extract({quoted}, {path_placeholder}) = {value_placeholder}"))
        }
    }
}

fn render_compare(
    driver: &dyn DatabaseDriver,
    binder: &mut ParamBinder,
    column: &str,
    op: Op,
    value: &RValue,
) -> Result<String> {
    validate_identifier(column, "where clause column")?;
    let quoted = driver.quote_identifier(column);

    match (op, value) {
        (Op::In, RValue::List(values)) => {
            if values.is_empty() {
                return Ok("1 = 0".to_string());
            }
            let list = binder.push_list(values.clone());
            Ok(format!("{quoted} IN ({list})"))
        }
        (Op::NotIn, RValue::List(values)) => {
            if values.is_empty() {
                return Ok("1 = 1".to_string());
            }
            let list = binder.push_list(values.clone());
            Ok(format!("{quoted} NOT IN ({list})"))
        }
        (Op::In, RValue::Raw(subquery)) => Ok(format!("{quoted} IN ({subquery})")),
        (Op::NotIn, RValue::Raw(subquery)) => Ok(format!("{quoted} NOT IN ({subquery})")),
        (Op::Is, RValue::Null) => Ok(format!("{quoted} IS NULL")),
        (Op::IsNot, RValue::Null) => Ok(format!("{quoted} IS NOT NULL")),
        (Op::Eq, RValue::Null) => Ok(format!("{quoted} IS NULL")),
        (Op::Ne, RValue::Null) => Ok(format!("{quoted} IS NOT NULL")),
        (_, RValue::Scalar(v)) => {
            let placeholder = binder.push(v.clone());
            Ok(format!("{quoted} {} {placeholder}", op.sql()))
        }
        (_, RValue::Raw(fragment)) => Ok(format!("{quoted} {} {fragment}", op.sql())),
        (op, value) => Err(QueryError::InvalidOperator(format!("{op:?} with {value:?}"))),
    }
}

/// How a `where{Column}`/`orWhere{Column}`/`andWhere{Column}` dynamic call
/// combines with the builder's existing predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicJoin {
    Where,
    OrWhere,
    AndWhere,
}

impl DynamicJoin {
    pub fn conjunction(self) -> Conjunction {
        match self {
            DynamicJoin::Where | DynamicJoin::AndWhere => Conjunction::And,
            DynamicJoin::OrWhere => Conjunction::Or,
        }
    }
}

/// Parses a dynamic method name such as `whereEmail`, `orWhereIsActive`, or
/// `andWhereUserId` into the join kind and a snake_cased column name
///: "A method-call whose name matches `where{Column}` /
/// `orWhere{Column}` / `andWhere{Column}` is accepted and resolved by
/// mapping the suffix (snake-or-pascal) to a column of the primary table".
///
/// Rust has no true `method_missing` trap, so the select/update/delete
/// compilers expose this as an explicit `dynamic_where(name, value)` call
/// taking the method-shaped string directly; identifier safety is still
/// enforced by validating the resolved column before it is ever quoted
///.
pub fn parse_dynamic_predicate(method_name: &str) -> Option<(DynamicJoin, String)> {
    let (join, rest) = if let Some(rest) = method_name.strip_prefix("orWhere") {
        (DynamicJoin::OrWhere, rest)
    } else if let Some(rest) = method_name.strip_prefix("andWhere") {
        (DynamicJoin::AndWhere, rest)
    } else if let Some(rest) = method_name.strip_prefix("where") {
        (DynamicJoin::Where, rest)
    } else {
        return None;
    };
    if rest.is_empty() {
        return None;
    }
    Some((join, pascal_or_snake_to_snake(rest)))
}

/// Converts `Email` / `IsActive` / `user_id` into `email` / `is_active` /
/// `user_id` — the dynamic predicate suffix may already arrive snake_cased.
fn pascal_or_snake_to_snake(input: &str) -> String {
    if input.contains('_') {
        return input.to_lowercase();
    }
    let mut out = String::with_capacity(input.len() + 4);
    for (i, ch) in input.chars().enumerate() {
        if ch.is_uppercase() {
            if i != 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
