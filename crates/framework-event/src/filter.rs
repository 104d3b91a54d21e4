//! Subscription expressions.
//!
//! ```text
//! topic=ftrack.pipeline.host.run and data.pipeline.host_id=1234
//! ftrack.pipeline.*
//! ```
//!
//! Clauses are joined with `and`. Keys are `topic`, `id`, `source.<field>`
//! or `data.<path>`. Values may be quoted and may use `*` as a wildcard. A
//! bare string without `=` is a topic pattern.
use regex::Regex;
use serde_json::Value;
use std::fmt;

use crate::error::{EventError, Result};
use crate::event::Event;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Field {
    Topic,
    Id,
    Source(String),
    Data(String),
}

#[derive(Debug, Clone)]
struct Clause {
    field: Field,
    pattern: Regex,
}

#[derive(Debug, Clone)]
pub struct Filter {
    expression: String,
    clauses: Vec<Clause>,
}

impl Filter {
    pub fn parse(expression: &str) -> Result<Self> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(EventError::filter("empty subscription expression"));
        }

        let clauses = if trimmed.contains('=') {
            let splitter =
                Regex::new(r"(?i)\s+and\s+").map_err(|e| EventError::filter(e.to_string()))?;
            splitter
                .split(trimmed)
                .map(parse_clause)
                .collect::<Result<Vec<_>>>()?
        } else {
            vec![Clause {
                field: Field::Topic,
                pattern: glob(trimmed)?,
            }]
        };

        Ok(Self {
            expression: trimmed.to_string(),
            clauses,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.clauses.iter().all(|clause| {
            let candidate = match &clause.field {
                Field::Topic => Some(event.topic.clone()),
                Field::Id => Some(event.id.clone()),
                Field::Source(field) => match field.as_str() {
                    "id" => Some(event.source.id.clone()),
                    _ => None,
                },
                Field::Data(path) => event.data_at(path).map(scalar_text),
            };
            candidate.is_some_and(|text| clause.pattern.is_match(&text))
        })
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

fn parse_clause(text: &str) -> Result<Clause> {
    let (key, value) = text
        .split_once('=')
        .ok_or_else(|| EventError::filter(format!("expected key=value, got '{}'", text)))?;
    let key = key.trim();
    let value = unquote(value.trim());

    let field = match key {
        "topic" => Field::Topic,
        "id" => Field::Id,
        _ => {
            if let Some(rest) = key.strip_prefix("source.") {
                Field::Source(rest.to_string())
            } else if let Some(rest) = key.strip_prefix("data.") {
                Field::Data(rest.to_string())
            } else {
                return Err(EventError::filter(format!("unknown key '{}'", key)));
            }
        }
    };
    Ok(Clause {
        field,
        pattern: glob(value)?,
    })
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value.strip_prefix(quote).and_then(|v| v.strip_suffix(quote)) {
            return inner;
        }
    }
    value
}

fn glob(pattern: &str) -> Result<Regex> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}$", body)).map_err(|e| EventError::filter(e.to_string()))
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
