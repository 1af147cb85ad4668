//! Selector, sort and projection for document queries
//!
//! Selectors follow the document-store JSON dialect the settings backend uses
//! for `enableQuery`: `{field: literal}`, operator objects such as
//! `{value: {$exists: true}}`, and top-level `$and` / `$or`.

use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::constants::fields;
use crate::error::QueryError;
use crate::types::Setting;

/// Condition applied to a single field
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
}

impl Condition {
    fn matches(&self, field: Option<&Value>) -> bool {
        match self {
            Condition::Eq(expected) => equals(field, expected),
            Condition::Ne(expected) => !equals(field, expected),
            Condition::In(options) => options.iter().any(|o| equals(field, o)),
            Condition::Nin(options) => !options.iter().any(|o| equals(field, o)),
            Condition::Exists(expected) => field.is_some() == *expected,
            Condition::Gt(bound) => ordered(field, bound).is_some_and(Ordering::is_gt),
            Condition::Gte(bound) => ordered(field, bound).is_some_and(Ordering::is_ge),
            Condition::Lt(bound) => ordered(field, bound).is_some_and(Ordering::is_lt),
            Condition::Lte(bound) => ordered(field, bound).is_some_and(Ordering::is_le),
        }
    }
}

/// `null` also matches a missing field
fn equals(field: Option<&Value>, expected: &Value) -> bool {
    match field {
        Some(actual) => values_equal(actual, expected),
        None => expected.is_null(),
    }
}

/// Numbers compare by value so `1` equals `1.0`
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Range comparison, only between values of the same type class
fn ordered(field: Option<&Value>, bound: &Value) -> Option<Ordering> {
    let field = field?;
    if type_rank(Some(field)) != type_rank(Some(bound)) {
        return None;
    }
    Some(compare_values(Some(field), Some(bound)))
}

/// A query predicate over documents
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// Matches every document
    All,
    Field { name: String, condition: Condition },
    And(Vec<Selector>),
    Or(Vec<Selector>),
}

impl Selector {
    pub fn field(name: impl Into<String>, condition: Condition) -> Self {
        Selector::Field {
            name: name.into(),
            condition,
        }
    }

    pub fn eq(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(name, Condition::Eq(value.into()))
    }

    pub fn exists(name: impl Into<String>, exists: bool) -> Self {
        Self::field(name, Condition::Exists(exists))
    }

    /// Match a single document by `_id`
    pub fn id(id: impl AsRef<str>) -> Self {
        Self::eq(fields::ID, id.as_ref())
    }

    pub fn any(selectors: Vec<Selector>) -> Self {
        Selector::Or(selectors)
    }

    /// Conjunction, flattening nested `And`s and dropping `All`
    pub fn and(self, other: Selector) -> Self {
        let mut parts = Vec::new();
        for selector in [self, other] {
            match selector {
                Selector::All => {}
                Selector::And(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => Selector::All,
            1 => parts.remove(0),
            _ => Selector::And(parts),
        }
    }

    pub fn matches(&self, document: &Setting) -> bool {
        match self {
            Selector::All => true,
            Selector::Field { name, condition } => condition.matches(document.field(name).as_ref()),
            Selector::And(parts) => parts.iter().all(|s| s.matches(document)),
            Selector::Or(parts) => parts.iter().any(|s| s.matches(document)),
        }
    }

    /// Parse a JSON selector object
    pub fn from_json(value: &Value) -> Result<Self, QueryError> {
        let Value::Object(object) = value else {
            return Err(QueryError::NotAnObject(value.to_string()));
        };

        let mut parts = Vec::with_capacity(object.len());
        for (key, operand) in object {
            match key.as_str() {
                "$and" => parts.push(Selector::And(parse_list(key, operand)?)),
                "$or" => parts.push(Selector::Or(parse_list(key, operand)?)),
                op if op.starts_with('$') => {
                    return Err(QueryError::UnknownOperator(op.to_string()))
                }
                name => parts.extend(parse_field(name, operand)?),
            }
        }

        Ok(parts.into_iter().fold(Selector::All, Selector::and))
    }
}

fn parse_list(operator: &str, operand: &Value) -> Result<Vec<Selector>, QueryError> {
    let Value::Array(items) = operand else {
        return Err(QueryError::invalid_operand(operator, "expected an array of selectors"));
    };
    if items.is_empty() {
        return Err(QueryError::invalid_operand(operator, "array must not be empty"));
    }
    items.iter().map(Selector::from_json).collect()
}

fn is_operator_object(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

fn parse_field(name: &str, operand: &Value) -> Result<Vec<Selector>, QueryError> {
    let operators = match operand {
        Value::Object(map) if is_operator_object(map) => map,
        literal => return Ok(vec![Selector::eq(name, literal.clone())]),
    };

    operators
        .iter()
        .map(|(op, arg)| {
            let condition = match op.as_str() {
                "$eq" => Condition::Eq(arg.clone()),
                "$ne" => Condition::Ne(arg.clone()),
                "$in" => Condition::In(array_operand(op, arg)?),
                "$nin" => Condition::Nin(array_operand(op, arg)?),
                "$exists" => Condition::Exists(truthy(op, arg)?),
                "$gt" => Condition::Gt(arg.clone()),
                "$gte" => Condition::Gte(arg.clone()),
                "$lt" => Condition::Lt(arg.clone()),
                "$lte" => Condition::Lte(arg.clone()),
                other => return Err(QueryError::UnknownOperator(other.to_string())),
            };
            Ok(Selector::field(name, condition))
        })
        .collect()
}

fn array_operand(operator: &str, operand: &Value) -> Result<Vec<Value>, QueryError> {
    match operand {
        Value::Array(items) => Ok(items.clone()),
        _ => Err(QueryError::invalid_operand(operator, "expected an array")),
    }
}

fn truthy(operator: &str, operand: &Value) -> Result<bool, QueryError> {
    match operand {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|n| n != 0.0)),
        _ => Err(QueryError::invalid_operand(operator, "expected a boolean or number")),
    }
}

/// Document-store type ordering: missing/null < numbers < strings < objects < arrays < booleans
fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

/// Total order over optional JSON values used for sorting
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or_default(), y.as_f64().unwrap_or_default());
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Array(x)), Some(Value::Array(y))) => {
            for (left, right) in x.iter().zip(y) {
                let ord = compare_values(Some(left), Some(right));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        // Objects compare by their serialized form; good enough for a stable order
        (Some(x @ Value::Object(_)), Some(y @ Value::Object(_))) => {
            x.to_string().cmp(&y.to_string())
        }
        _ => Ordering::Equal,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Ordered list of sort keys
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortSpec(Vec<(String, SortOrder)>);

impl SortSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn asc(mut self, field: impl Into<String>) -> Self {
        self.0.push((field.into(), SortOrder::Ascending));
        self
    }

    pub fn desc(mut self, field: impl Into<String>) -> Self {
        self.0.push((field.into(), SortOrder::Descending));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn compare(&self, a: &Setting, b: &Setting) -> Ordering {
        for (field, order) in &self.0 {
            let ord = compare_values(a.field(field).as_ref(), b.field(field).as_ref());
            let ord = match order {
                SortOrder::Ascending => ord,
                SortOrder::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// Options for `Collection::find`
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub sort: SortSpec,
    /// Fields kept by `Cursor::project`; `_id` is always included
    pub fields: Option<Vec<String>>,
}

impl FindOptions {
    pub fn sorted(sort: SortSpec) -> Self {
        Self { sort, fields: None }
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }
}

/// Keep only the listed fields of a document
pub fn project(document: &Setting, keep: &[String]) -> Map<String, Value> {
    let mut projected = Map::new();
    projected.insert(fields::ID.to_string(), Value::String(document.id.to_string()));
    for name in keep {
        if let Some(value) = document.field(name) {
            projected.insert(name.clone(), value);
        }
    }
    projected
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, value: Value) -> Setting {
        Setting::new(id, "G", value)
    }

    #[test]
    fn test_literal_equality() {
        let selector = Selector::from_json(&json!({"_id": "A", "value": true})).unwrap();
        assert!(selector.matches(&doc("A", json!(true))));
        assert!(!selector.matches(&doc("A", json!(false))));
        assert!(!selector.matches(&doc("B", json!(true))));
    }

    #[test]
    fn test_null_matches_missing_field() {
        let selector = Selector::eq("section", Value::Null);
        assert!(selector.matches(&doc("A", json!(1))));
        assert!(!selector.matches(&doc("A", json!(1)).with_section("S")));
    }

    #[test]
    fn test_exists_operator() {
        let selector = Selector::from_json(&json!({"section": {"$exists": false}})).unwrap();
        assert!(selector.matches(&doc("A", json!(1))));
        assert!(!selector.matches(&doc("A", json!(1)).with_section("")));

        let numeric = Selector::from_json(&json!({"section": {"$exists": 1}})).unwrap();
        assert!(numeric.matches(&doc("A", json!(1)).with_section("")));
    }

    #[test]
    fn test_or_and_combination() {
        let selector = Selector::from_json(&json!({
            "group": "G",
            "$or": [{"section": ""}, {"section": {"$exists": false}}]
        }))
        .unwrap();
        assert!(selector.matches(&doc("A", json!(1))));
        assert!(selector.matches(&doc("A", json!(1)).with_section("")));
        assert!(!selector.matches(&doc("A", json!(1)).with_section("Advanced")));
    }

    #[test]
    fn test_in_ne_and_ranges() {
        let selector = Selector::from_json(&json!({"value": {"$in": [1, 2, 3]}})).unwrap();
        assert!(selector.matches(&doc("A", json!(2))));
        assert!(!selector.matches(&doc("A", json!(4))));

        let ne = Selector::from_json(&json!({"value": {"$ne": "x"}})).unwrap();
        assert!(ne.matches(&doc("A", json!("y"))));

        let range = Selector::from_json(&json!({"value": {"$gte": 2, "$lt": 5}})).unwrap();
        assert!(range.matches(&doc("A", json!(2))));
        assert!(!range.matches(&doc("A", json!(5))));
        assert!(!range.matches(&doc("A", json!("3"))));
    }

    #[test]
    fn test_numbers_compare_by_value() {
        assert!(Selector::eq("value", json!(1)).matches(&doc("A", json!(1.0))));
    }

    #[test]
    fn test_empty_object_matches_all() {
        assert_eq!(Selector::from_json(&json!({})).unwrap(), Selector::All);
    }

    #[test]
    fn test_malformed_selectors() {
        assert!(matches!(
            Selector::from_json(&json!([1, 2])),
            Err(QueryError::NotAnObject(_))
        ));
        assert!(matches!(
            Selector::from_json(&json!({"$where": "1"})),
            Err(QueryError::UnknownOperator(op)) if op == "$where"
        ));
        assert!(matches!(
            Selector::from_json(&json!({"value": {"$in": 3}})),
            Err(QueryError::InvalidOperand { .. })
        ));
        assert!(matches!(
            Selector::from_json(&json!({"$or": []})),
            Err(QueryError::InvalidOperand { .. })
        ));
    }

    #[test]
    fn test_and_flattens() {
        let combined = Selector::eq("a", 1).and(Selector::All).and(Selector::eq("b", 2));
        assert_eq!(combined, Selector::And(vec![Selector::eq("a", 1), Selector::eq("b", 2)]));
    }

    #[test]
    fn test_type_ordering() {
        let missing = compare_values(None, Some(&json!(1)));
        assert_eq!(missing, Ordering::Less);
        assert_eq!(compare_values(Some(&json!(10)), Some(&json!("a"))), Ordering::Less);
        assert_eq!(compare_values(Some(&json!("b")), Some(&json!("a"))), Ordering::Greater);
        assert_eq!(compare_values(Some(&json!(2)), Some(&json!(10))), Ordering::Less);
    }

    #[test]
    fn test_sort_spec_multiple_keys() {
        let sort = SortSpec::new().asc("section").asc("sorter");
        let a = doc("A", json!(1)).with_section("X").with_sorter(2);
        let b = doc("B", json!(1)).with_section("X").with_sorter(1);
        let c = doc("C", json!(1));
        assert_eq!(sort.compare(&a, &b), Ordering::Greater);
        assert_eq!(sort.compare(&c, &a), Ordering::Less);
        assert_eq!(SortSpec::new().desc("sorter").compare(&a, &b), Ordering::Less);
    }

    #[test]
    fn test_projection_always_keeps_id() {
        let setting = doc("A", json!(7)).with_editor(json!("color"));
        let projected = project(&setting, &["value".to_string()]);
        assert_eq!(Value::Object(projected), json!({"_id": "A", "value": 7}));
    }
}
