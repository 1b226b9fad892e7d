//! Flat boolean queries over plaintext attribute records.
//!
//! A query is an ordered list of `attribute <op> value` comparisons joined by a
//! single combinator. There is no nesting and no precedence: `AND` and `OR`
//! cannot be mixed in one query.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::model::AttributeRecord;
use crate::util::{attribute_number, attribute_text};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=", alias = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "=" | "==" => Some(Operator::Eq),
            "!=" => Some(Operator::Ne),
            ">" => Some(Operator::Gt),
            ">=" => Some(Operator::Ge),
            "<" => Some(Operator::Lt),
            "<=" => Some(Operator::Le),
            _ => None,
        }
    }

    fn is_ordering(&self) -> bool {
        matches!(
            self,
            Operator::Gt | Operator::Ge | Operator::Lt | Operator::Le
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Combinator {
    #[default]
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or,
}

impl Combinator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Combinator::And => "AND",
            Combinator::Or => "OR",
        }
    }

    fn from_keyword(word: &str) -> Option<Self> {
        if word.eq_ignore_ascii_case("and") {
            Some(Combinator::And)
        } else if word.eq_ignore_ascii_case("or") {
            Some(Combinator::Or)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub attribute: String,
    pub operator: Operator,
    pub value: Value,
}

impl Condition {
    pub fn new(attribute: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            attribute: attribute.into(),
            operator,
            value: value.into(),
        }
    }

    /// Compare the record's value for this attribute against the expected one.
    /// Absent or null attributes never match; ordering operators only match
    /// when both sides are numeric.
    pub fn matches(&self, record: &AttributeRecord) -> bool {
        let actual = match record.get(&self.attribute) {
            Some(Value::Null) | None => return false,
            Some(value) => value,
        };
        let numeric = attribute_number(actual).zip(attribute_number(&self.value));
        if self.operator.is_ordering() {
            return match numeric {
                Some((a, b)) => compare_numbers(self.operator, a, b),
                None => false,
            };
        }
        let equal = match numeric {
            Some((a, b)) => a == b,
            None => attribute_text(actual) == attribute_text(&self.value),
        };
        match self.operator {
            Operator::Ne => !equal,
            _ => equal,
        }
    }
}

fn compare_numbers(op: Operator, a: f64, b: f64) -> bool {
    match op {
        Operator::Eq => a == b,
        Operator::Ne => a != b,
        Operator::Gt => a > b,
        Operator::Ge => a >= b,
        Operator::Lt => a < b,
        Operator::Le => a <= b,
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QuerySpec {
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub combinator: Combinator,
}

impl QuerySpec {
    pub fn new(combinator: Combinator, conditions: Vec<Condition>) -> Self {
        Self {
            conditions,
            combinator,
        }
    }

    /// Attribute names referenced by the query, in condition order, without repeats.
    pub fn attributes(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for cond in &self.conditions {
            if !out.contains(&cond.attribute.as_str()) {
                out.push(cond.attribute.as_str());
            }
        }
        out
    }
}

/// Evaluate `spec` against `record`.
///
/// A query that references an attribute the record does not carry cannot be
/// satisfied and yields `false` under either combinator. An empty query is
/// `false` as well.
pub fn evaluate(record: &AttributeRecord, spec: &QuerySpec) -> bool {
    if spec.conditions.is_empty() {
        return false;
    }
    let all_present = spec
        .conditions
        .iter()
        .all(|cond| matches!(record.get(&cond.attribute), Some(v) if !v.is_null()));
    if !all_present {
        return false;
    }
    let mut outcomes = spec.conditions.iter().map(|cond| cond.matches(record));
    match spec.combinator {
        Combinator::And => outcomes.all(|ok| ok),
        Combinator::Or => outcomes.any(|ok| ok),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("query is empty")]
    Empty,
    #[error("unterminated quote in query")]
    UnterminatedQuote,
    #[error("combinator must have a condition on both sides")]
    DanglingCombinator,
    #[error("AND and OR cannot be mixed in one query")]
    MixedCombinators,
    #[error("no comparison operator in `{0}`")]
    MissingOperator(String),
    #[error("unknown operator `{0}`")]
    UnknownOperator(String),
    #[error("missing attribute name in `{0}`")]
    MissingAttribute(String),
    #[error("missing value in `{0}`")]
    MissingValue(String),
}

/// Parse the text form, e.g. `age > 25 AND occupation = 'Doctor'`.
pub fn parse(input: &str) -> Result<QuerySpec, QueryError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(QueryError::Empty);
    }

    let mut combinator: Option<Combinator> = None;
    let mut clauses: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for word in split_words(trimmed)? {
        match Combinator::from_keyword(&word) {
            Some(found) => {
                if current.is_empty() {
                    return Err(QueryError::DanglingCombinator);
                }
                match combinator {
                    Some(existing) if existing != found => {
                        return Err(QueryError::MixedCombinators)
                    }
                    _ => combinator = Some(found),
                }
                clauses.push(current.join(" "));
                current.clear();
            }
            None => current.push(word),
        }
    }
    if current.is_empty() {
        return Err(QueryError::DanglingCombinator);
    }
    clauses.push(current.join(" "));

    let conditions = clauses
        .iter()
        .map(|clause| parse_condition(clause))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(QuerySpec {
        conditions,
        combinator: combinator.unwrap_or_default(),
    })
}

// Whitespace-separated words; a quoted span stays inside a single word with its quotes.
fn split_words(input: &str) -> Result<Vec<String>, QueryError> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut quote: Option<char> = None;
    for ch in input.chars() {
        match quote {
            Some(q) => {
                word.push(ch);
                if ch == q {
                    quote = None;
                }
            }
            None if ch == '\'' || ch == '"' => {
                quote = Some(ch);
                word.push(ch);
            }
            None if ch.is_whitespace() => {
                if !word.is_empty() {
                    words.push(std::mem::take(&mut word));
                }
            }
            None => word.push(ch),
        }
    }
    if quote.is_some() {
        return Err(QueryError::UnterminatedQuote);
    }
    if !word.is_empty() {
        words.push(word);
    }
    Ok(words)
}

fn parse_condition(clause: &str) -> Result<Condition, QueryError> {
    let mut quote: Option<char> = None;
    let mut op_start: Option<usize> = None;
    for (idx, ch) in clause.char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None if ch == '\'' || ch == '"' => quote = Some(ch),
            None if matches!(ch, '=' | '!' | '<' | '>') => {
                op_start = Some(idx);
                break;
            }
            None => {}
        }
    }
    let start = op_start.ok_or_else(|| QueryError::MissingOperator(clause.to_string()))?;
    let rest = &clause[start..];
    let symbol_len = if rest.starts_with(">=")
        || rest.starts_with("<=")
        || rest.starts_with("!=")
        || rest.starts_with("==")
    {
        2
    } else {
        1
    };
    let symbol = &rest[..symbol_len];
    let operator =
        Operator::from_symbol(symbol).ok_or_else(|| QueryError::UnknownOperator(symbol.into()))?;

    let attribute = unquote(clause[..start].trim());
    if attribute.is_empty() {
        return Err(QueryError::MissingAttribute(clause.to_string()));
    }
    let raw_value = rest[symbol_len..].trim();
    if raw_value.is_empty() {
        return Err(QueryError::MissingValue(clause.to_string()));
    }
    Ok(Condition {
        attribute: attribute.to_string(),
        operator,
        value: parse_value(raw_value),
    })
}

fn unquote(raw: &str) -> &str {
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'\'' || first == b'"') && first == last {
            return &raw[1..raw.len() - 1];
        }
    }
    raw
}

fn parse_value(raw: &str) -> Value {
    let unquoted = unquote(raw);
    if unquoted.len() != raw.len() {
        return Value::String(unquoted.to_string());
    }
    if raw.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(int) = raw.parse::<i64>() {
        return Value::from(int);
    }
    if let Some(num) = raw
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
    {
        return Value::Number(num);
    }
    Value::String(raw.to_string())
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ", self.attribute, self.operator)?;
        match &self.value {
            Value::String(s) if s.contains('\'') => write!(f, "\"{s}\""),
            Value::String(s) => write!(f, "'{s}'"),
            other => f.write_str(&attribute_text(other)),
        }
    }
}

impl fmt::Display for QuerySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, cond) in self.conditions.iter().enumerate() {
            if idx > 0 {
                write!(f, " {} ", self.combinator.as_str())?;
            }
            write!(f, "{cond}")?;
        }
        Ok(())
    }
}

impl FromStr for QuerySpec {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}
