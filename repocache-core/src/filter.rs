//! Filter expressions and projections with canonical fingerprints
//!
//! Read operations are cached by the semantic content of their predicate
//! and projection. Closures carry no inspectable content, so every
//! [`Filter`] and [`Projection`] holds an explicit fingerprint next to the
//! function that evaluates it. [`FilterExpr`] derives its fingerprint from
//! its own serialized form.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Filter operator for field comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    /// Equal to
    Eq,
    /// Not equal to
    Ne,
    /// Greater than
    Gt,
    /// Less than
    Lt,
    /// Greater than or equal
    Gte,
    /// Less than or equal
    Lte,
    /// Contains substring (strings) or element (arrays)
    Contains,
    /// Field value is one of the listed values
    In,
    /// Field is present and non-null (value `true`) or absent/null (value `false`)
    Exists,
}

/// Structured filter expression evaluated against the JSON form of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterExpr {
    /// Matches every entity.
    All,
    /// Compare a (dotted) field path against a value.
    Compare {
        field: String,
        operator: FilterOperator,
        value: Value,
    },
    /// Every clause must match. An empty list matches everything.
    And { clauses: Vec<FilterExpr> },
    /// At least one clause must match. An empty list matches nothing.
    Or { clauses: Vec<FilterExpr> },
    /// Negation.
    Not { clause: Box<FilterExpr> },
}

impl FilterExpr {
    /// Create a new comparison.
    pub fn new(
        field: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<Value>,
    ) -> Self {
        Self::Compare {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::Ne, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::Gt, value)
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::Gte, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::Lt, value)
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::Lte, value)
    }

    /// Create a contains filter.
    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::Contains, value)
    }

    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(field, FilterOperator::In, Value::Array(values))
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::Exists, true)
    }

    pub fn and(self, other: FilterExpr) -> Self {
        match self {
            Self::And { mut clauses } => {
                clauses.push(other);
                Self::And { clauses }
            }
            first => Self::And {
                clauses: vec![first, other],
            },
        }
    }

    pub fn or(self, other: FilterExpr) -> Self {
        match self {
            Self::Or { mut clauses } => {
                clauses.push(other);
                Self::Or { clauses }
            }
            first => Self::Or {
                clauses: vec![first, other],
            },
        }
    }

    pub fn negate(self) -> Self {
        Self::Not {
            clause: Box::new(self),
        }
    }

    /// Canonical textual form of this expression.
    ///
    /// Compact JSON of [`FilterExpr::canonical`]. Object values inside
    /// comparisons are key-ordered, so equivalent expressions always render
    /// the same string.
    pub fn fingerprint(&self) -> String {
        self.canonical().serialized()
    }

    /// Normalized copy that matches exactly the same documents.
    ///
    /// Integral floats in comparisons become integers (`2.0` and `2` compare
    /// equal), nested `And`/`Or` of the same kind are flattened, and their
    /// clauses are sorted by fingerprint.
    pub fn canonical(&self) -> FilterExpr {
        match self {
            Self::All => Self::All,
            Self::Compare {
                field,
                operator,
                value,
            } => Self::Compare {
                field: field.clone(),
                operator: *operator,
                value: canonical_operand(*operator, value),
            },
            Self::And { clauses } => Self::And {
                clauses: canonical_clauses(clauses, true),
            },
            Self::Or { clauses } => Self::Or {
                clauses: canonical_clauses(clauses, false),
            },
            Self::Not { clause } => Self::Not {
                clause: Box::new(clause.canonical()),
            },
        }
    }

    fn serialized(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }

    /// Evaluate against the JSON form of an entity.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Self::All => true,
            Self::Compare {
                field,
                operator,
                value,
            } => compare_field(lookup_field(doc, field), *operator, value),
            Self::And { clauses } => clauses.iter().all(|c| c.matches(doc)),
            Self::Or { clauses } => clauses.iter().any(|c| c.matches(doc)),
            Self::Not { clause } => !clause.matches(doc),
        }
    }
}

fn canonical_clauses(clauses: &[FilterExpr], conjunction: bool) -> Vec<FilterExpr> {
    let mut flat = Vec::with_capacity(clauses.len());
    for clause in clauses {
        match (clause.canonical(), conjunction) {
            (FilterExpr::And { clauses }, true) | (FilterExpr::Or { clauses }, false) => {
                flat.extend(clauses)
            }
            (other, _) => flat.push(other),
        }
    }
    let mut keyed: Vec<(String, FilterExpr)> =
        flat.into_iter().map(|c| (c.serialized(), c)).collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.into_iter().map(|(_, c)| c).collect()
}

// Elements of an `In` list are compared with `values_equal`, like the
// operand itself. Values nested deeper compare structurally and stay as-is.
fn canonical_operand(operator: FilterOperator, value: &Value) -> Value {
    match (operator, value) {
        (FilterOperator::In, Value::Array(items)) => {
            Value::Array(items.iter().map(canonical_number).collect())
        }
        _ => canonical_number(value),
    }
}

/// Largest magnitude below which every integer is exactly representable as f64.
const EXACT_F64_INT: f64 = 9_007_199_254_740_992.0;

fn canonical_number(value: &Value) -> Value {
    match value {
        Value::Number(n) if n.is_f64() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < EXACT_F64_INT => Value::from(f as i64),
            _ => value.clone(),
        },
        _ => value.clone(),
    }
}

/// Resolve a dotted field path (`address.city`, `tags.0`) inside a JSON document.
pub fn lookup_field<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn compare_field(found: Option<&Value>, operator: FilterOperator, expected: &Value) -> bool {
    let actual = found.unwrap_or(&Value::Null);
    match operator {
        FilterOperator::Eq => values_equal(actual, expected),
        FilterOperator::Ne => !values_equal(actual, expected),
        FilterOperator::Gt => partial_compare(actual, expected) == Some(Ordering::Greater),
        FilterOperator::Lt => partial_compare(actual, expected) == Some(Ordering::Less),
        FilterOperator::Gte => matches!(
            partial_compare(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FilterOperator::Lte => matches!(
            partial_compare(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FilterOperator::Contains => match (actual, expected) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), needle) => items.iter().any(|item| values_equal(item, needle)),
            _ => false,
        },
        FilterOperator::In => match expected {
            Value::Array(candidates) => candidates.iter().any(|c| values_equal(actual, c)),
            _ => false,
        },
        FilterOperator::Exists => !actual.is_null() == expected.as_bool().unwrap_or(true),
    }
}

/// Equality that treats `1` and `1.0` as the same number.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Ordering between two scalars of the same kind; `None` across kinds.
pub(crate) fn partial_compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Total order used for sorting: null < bool < number < string < array < object.
pub(crate) fn sort_compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(Value::Array(_)) => 4,
            Some(Value::Object(_)) => 5,
        }
    }

    rank(a).cmp(&rank(b)).then_with(|| match (a, b) {
        (Some(x), Some(y)) => {
            partial_compare(x, y).unwrap_or_else(|| x.to_string().cmp(&y.to_string()))
        }
        _ => Ordering::Equal,
    })
}

type PredicateFn<T> = dyn Fn(&T) -> bool + Send + Sync;
type SelectorFn<T, P> = dyn Fn(&T) -> P + Send + Sync;

/// A predicate over entities paired with its canonical fingerprint.
pub struct Filter<T> {
    fingerprint: String,
    predicate: Arc<PredicateFn<T>>,
}

impl<T: Serialize + 'static> Filter<T> {
    /// Filter evaluated from a structured expression.
    pub fn expr(expr: FilterExpr) -> Self {
        let fingerprint = expr.fingerprint();
        Self {
            fingerprint,
            predicate: Arc::new(move |entity: &T| match serde_json::to_value(entity) {
                Ok(doc) => expr.matches(&doc),
                Err(_) => false,
            }),
        }
    }
}

impl<T> Filter<T> {
    /// Filter backed by an arbitrary closure.
    ///
    /// The caller vouches that `fingerprint` describes the closure: equal
    /// fingerprints must mean equal predicates, or cached results alias.
    pub fn custom<F>(fingerprint: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self {
            fingerprint: format!("custom:{}", fingerprint.into()),
            predicate: Arc::new(predicate),
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn matches(&self, entity: &T) -> bool {
        (self.predicate)(entity)
    }
}

impl<T> Clone for Filter<T> {
    fn clone(&self) -> Self {
        Self {
            fingerprint: self.fingerprint.clone(),
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<T> fmt::Debug for Filter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

impl<T: Serialize + 'static> From<FilterExpr> for Filter<T> {
    fn from(expr: FilterExpr) -> Self {
        Self::expr(expr)
    }
}

/// A selector mapping an entity to a result shape, paired with its fingerprint.
pub struct Projection<T, P> {
    fingerprint: String,
    selector: Arc<SelectorFn<T, P>>,
}

impl<T, P> Projection<T, P> {
    /// Projection backed by an arbitrary closure.
    ///
    /// Same contract as [`Filter::custom`]: the fingerprint must identify
    /// the selector.
    pub fn new<F>(fingerprint: impl Into<String>, selector: F) -> Self
    where
        F: Fn(&T) -> P + Send + Sync + 'static,
    {
        Self {
            fingerprint: format!("custom:{}", fingerprint.into()),
            selector: Arc::new(selector),
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn apply(&self, entity: &T) -> P {
        (self.selector)(entity)
    }
}

impl<T: Serialize + 'static> Projection<T, Value> {
    /// Select a subset of fields as a JSON object.
    ///
    /// Field order is part of the fingerprint because it changes the shape
    /// the caller asked for. Missing fields project to `null`.
    pub fn fields(fields: &[&str]) -> Self {
        let names: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        let fingerprint = format!(
            "fields:{}",
            serde_json::to_string(&names).unwrap_or_else(|_| names.join(","))
        );
        Self {
            fingerprint,
            selector: Arc::new(move |entity: &T| {
                let doc = serde_json::to_value(entity).unwrap_or(Value::Null);
                let mut out = serde_json::Map::new();
                for name in &names {
                    let value = lookup_field(&doc, name).cloned().unwrap_or(Value::Null);
                    out.insert(name.clone(), value);
                }
                Value::Object(out)
            }),
        }
    }
}

impl<T, P> Clone for Projection<T, P> {
    fn clone(&self) -> Self {
        Self {
            fingerprint: self.fingerprint.clone(),
            selector: Arc::clone(&self.selector),
        }
    }
}

impl<T, P> fmt::Debug for Projection<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Projection")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}
