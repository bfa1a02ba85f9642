//! Wire-facing value and row types
//!
//! The bridge passes SQL text and parameter dictionaries through unchanged,
//! so the value model here is deliberately small: what JSON can carry, plus
//! bytes. Backend results with no natural JSON mapping (numerics, dates,
//! UUIDs) come back as `Text` so every result serializes cleanly.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

use crate::error::{Error, Result};

/// SQL value as carried over the RPC session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// SQL NULL
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// Text value
    Text(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// Structured JSON value (arrays, objects)
    Json(serde_json::Value),
}

impl SqlValue {
    /// Check if value is NULL
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Try to read as i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Try to read as str
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Try to read as bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(n) => Some(*n != 0),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Self::Float(f)
                } else {
                    Self::Text(n.to_string())
                }
            }
            serde_json::Value::String(s) => Self::Text(s),
            other => Self::Json(other),
        }
    }
}

impl<'de> Deserialize<'de> for SqlValue {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(Self::from(value))
    }
}

impl From<i64> for SqlValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<bool> for SqlValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for SqlValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

/// Parameter dictionary for one statement
pub type Params = HashMap<String, SqlValue>;

/// One result row: column names in select order, one value per column.
///
/// Serializes as a JSON object (`column -> value`) preserving column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl Row {
    /// Create a row from parallel column/value vectors
    pub fn new(columns: Vec<String>, values: Vec<SqlValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Look up a value by column name
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the row has no columns
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Iterate (column, value) pairs in select order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

impl Serialize for Row {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, value) in self.columns.iter().zip(self.values.iter()) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Statement argument shape: one statement or a list of statements
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StatementInput {
    /// A single statement
    One(String),
    /// An ordered list of statements
    Many(Vec<String>),
}

/// Parameter argument shape: one dictionary or a list of dictionaries
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ParamInput {
    /// A single parameter dictionary
    One(Params),
    /// One dictionary per statement
    Many(Vec<Params>),
}

/// A normalized, ordered list of (statement, params) pairs.
///
/// The single/batch distinction survives normalization because the result
/// shape depends on it: a single-statement call returns its row sequence
/// directly, a batch call returns one sequence per statement.
#[derive(Debug, Clone)]
pub struct StatementSet {
    pairs: Vec<(String, Params)>,
    single: bool,
}

impl StatementSet {
    /// Pair statements with parameters.
    ///
    /// A single parameter dictionary supplied with a statement list is
    /// broadcast to every statement; a parameter list must match the
    /// statement list in length exactly.
    pub fn normalize(statements: StatementInput, params: Option<ParamInput>) -> Result<Self> {
        let (stmts, single) = match statements {
            StatementInput::One(s) => (vec![s], true),
            StatementInput::Many(list) => (list, false),
        };
        if stmts.is_empty() {
            return Err(Error::query("at least one statement is required"));
        }

        let param_list: Vec<Params> = match params {
            None => vec![Params::new(); stmts.len()],
            Some(ParamInput::One(p)) => vec![p; stmts.len()],
            Some(ParamInput::Many(list)) => {
                if list.len() != stmts.len() {
                    return Err(Error::query(format!(
                        "parameter list length {} does not match statement list length {}",
                        list.len(),
                        stmts.len()
                    )));
                }
                list
            }
        };

        Ok(Self {
            pairs: stmts.into_iter().zip(param_list).collect(),
            single,
        })
    }

    /// Build a single-statement set directly
    pub fn single(statement: impl Into<String>, params: Params) -> Self {
        Self {
            pairs: vec![(statement.into(), params)],
            single: true,
        }
    }

    /// The (statement, params) pairs in execution order
    pub fn pairs(&self) -> &[(String, Params)] {
        &self.pairs
    }

    /// Whether the caller supplied a single statement (unwrapped result)
    pub fn is_single(&self) -> bool {
        self.single
    }

    /// Number of statements
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether the set is empty (never true after `normalize`)
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Shape the per-statement row batches into the caller-visible result
    pub fn shape(&self, batches: Vec<Vec<Row>>) -> QueryOutcome {
        if self.single {
            QueryOutcome::Rows(batches.into_iter().next().unwrap_or_default())
        } else {
            QueryOutcome::Batches(batches)
        }
    }
}

/// Result of a `query` call.
///
/// A single-statement call yields `Rows` (a flat row sequence, never wrapped
/// in an extra layer); a multi-statement call yields `Batches` with the same
/// length and order as the input statements.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryOutcome {
    /// Rows of a single-statement call
    Rows(Vec<Row>),
    /// Per-statement row sequences of a multi-statement call
    Batches(Vec<Vec<Row>>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(entries: &[(&str, SqlValue)]) -> Params {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_value_from_json() {
        assert_eq!(SqlValue::from(serde_json::json!(null)), SqlValue::Null);
        assert_eq!(SqlValue::from(serde_json::json!(true)), SqlValue::Bool(true));
        assert_eq!(SqlValue::from(serde_json::json!(7)), SqlValue::Int(7));
        assert_eq!(SqlValue::from(serde_json::json!(1.5)), SqlValue::Float(1.5));
        assert_eq!(
            SqlValue::from(serde_json::json!("x")),
            SqlValue::Text("x".into())
        );
        assert!(matches!(
            SqlValue::from(serde_json::json!([1, 2])),
            SqlValue::Json(_)
        ));
    }

    #[test]
    fn test_value_serializes_untagged() {
        assert_eq!(
            serde_json::to_string(&SqlValue::Int(3)).unwrap(),
            "3".to_string()
        );
        assert_eq!(serde_json::to_string(&SqlValue::Null).unwrap(), "null");
        assert_eq!(
            serde_json::to_string(&SqlValue::Text("a".into())).unwrap(),
            "\"a\""
        );
    }

    #[test]
    fn test_row_serializes_as_object_in_column_order() {
        let row = Row::new(
            vec!["b".into(), "a".into()],
            vec![SqlValue::Int(1), SqlValue::Int(2)],
        );
        assert_eq!(serde_json::to_string(&row).unwrap(), r#"{"b":1,"a":2}"#);
        assert_eq!(row.get("a"), Some(&SqlValue::Int(2)));
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn test_normalize_single() {
        let set = StatementSet::normalize(
            StatementInput::One("select 1".into()),
            Some(ParamInput::One(params(&[("id", SqlValue::Int(1))]))),
        )
        .unwrap();
        assert!(set.is_single());
        assert_eq!(set.len(), 1);
        assert_eq!(set.pairs()[0].0, "select 1");
    }

    #[test]
    fn test_normalize_broadcasts_single_params() {
        let set = StatementSet::normalize(
            StatementInput::Many(vec!["a".into(), "b".into(), "c".into()]),
            Some(ParamInput::One(params(&[("v", SqlValue::Int(9))]))),
        )
        .unwrap();
        assert!(!set.is_single());
        assert_eq!(set.len(), 3);
        for (_, p) in set.pairs() {
            assert_eq!(p.get("v"), Some(&SqlValue::Int(9)));
        }
    }

    #[test]
    fn test_normalize_rejects_length_mismatch() {
        let err = StatementSet::normalize(
            StatementInput::Many(vec!["a".into(), "b".into()]),
            Some(ParamInput::Many(vec![Params::new()])),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Query);
    }

    #[test]
    fn test_normalize_rejects_empty_statement_list() {
        let err = StatementSet::normalize(StatementInput::Many(vec![]), None).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Query);
    }

    #[test]
    fn test_shape_preserves_single_statement_unwrap() {
        let single = StatementSet::normalize(StatementInput::One("select 1".into()), None).unwrap();
        let row = Row::new(vec!["v".into()], vec![SqlValue::Int(1)]);
        let out = single.shape(vec![vec![row.clone()]]);
        // Flat sequence, not a sequence of sequences.
        assert_eq!(serde_json::to_string(&out).unwrap(), r#"[{"v":1}]"#);

        let batch =
            StatementSet::normalize(StatementInput::Many(vec!["select 1".into()]), None).unwrap();
        let out = batch.shape(vec![vec![row]]);
        assert_eq!(serde_json::to_string(&out).unwrap(), r#"[[{"v":1}]]"#);
    }

    #[test]
    fn test_statement_input_deserializes_both_shapes() {
        let one: StatementInput = serde_json::from_value(serde_json::json!("select 1")).unwrap();
        assert!(matches!(one, StatementInput::One(_)));
        let many: StatementInput =
            serde_json::from_value(serde_json::json!(["select 1", "select 2"])).unwrap();
        assert!(matches!(many, StatementInput::Many(ref v) if v.len() == 2));
    }

    #[test]
    fn test_param_input_deserializes_both_shapes() {
        let one: ParamInput = serde_json::from_value(serde_json::json!({"v": 1})).unwrap();
        match one {
            ParamInput::One(p) => assert_eq!(p.get("v"), Some(&SqlValue::Int(1))),
            ParamInput::Many(_) => panic!("expected single dictionary"),
        }
        let many: ParamInput =
            serde_json::from_value(serde_json::json!([{"v": 1}, {"v": 2}])).unwrap();
        assert!(matches!(many, ParamInput::Many(ref v) if v.len() == 2));
    }
}
