use std::fmt::Display;

use anyhow::{bail, Result};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{json, Value};

// Wire format is fixed by Snowflake, see
// https://docs.snowflake.com/en/sql-reference/external-functions-data-format.html
pub(crate) const MISSING_DATA_PROMPT: &str =
    "Please pass data in the request body for a personalized response.";

const CONTENT_TYPE_JSON_UTF8: &str = "application/json; charset=utf-8";

/// Query parameters recognized by the external function endpoints. Snowflake
/// itself always POSTs a JSON body, the query channel exists for ad-hoc calls.
#[derive(Deserialize, Debug)]
pub(crate) struct EnvelopeParams {
    pub(crate) data: Option<String>,
}

#[derive(Debug)]
pub enum DecodeError {
    /// Neither the query nor the body carried a usable `data` payload.
    Missing,
    /// A `data` payload was present but does not follow the batch format.
    Malformed(String),
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Missing => write!(f, "no data found in the request query or body"),
            DecodeError::Malformed(reason) => {
                write!(f, "data payload could not be decoded: {reason}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// A single batched call, `[row_index, arg, ...]` on the wire. The index is
/// assigned by the caller and echoed back unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub index: i64,
    args: Vec<Value>,
}

impl Row {
    pub fn arg(&self, position: usize) -> Option<&Value> {
        self.args.get(position)
    }

    pub fn f64_arg(&self, position: usize) -> Result<f64> {
        match self.arg(position) {
            None => bail!("argument {position} is missing"),
            Some(value) => match value.as_f64() {
                Some(number) => Ok(number),
                None => bail!("argument {position} is not a number"),
            },
        }
    }

    pub fn str_arg(&self, position: usize) -> Result<&str> {
        match self.arg(position) {
            None => bail!("argument {position} is missing"),
            Some(value) => match value.as_str() {
                Some(text) => Ok(text),
                None => bail!("argument {position} is not a string"),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    rows: Vec<Row>,
}

impl Batch {
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Pulls the batched rows out of a request, preferring the `data` query
/// parameter over the body.
///
/// An unreadable body is reported as `Missing` rather than an error of its
/// own: callers answer both cases with the same prompt, but get to make that
/// decision against an explicit `DecodeError` instead of a swallowed parse
/// failure.
pub(crate) fn decode(query_data: Option<&str>, body: &str) -> Result<Batch, DecodeError> {
    if let Some(raw) = query_data {
        let value =
            serde_json::from_str(raw).map_err(|err| DecodeError::Malformed(err.to_string()))?;
        return rows_from_value(&value);
    }

    let Ok(parsed) = serde_json::from_str::<Value>(body) else {
        return Err(DecodeError::Missing);
    };
    match parsed.get("data") {
        Some(value) => rows_from_value(value),
        None => Err(DecodeError::Missing),
    }
}

fn rows_from_value(value: &Value) -> Result<Batch, DecodeError> {
    // Snowflake never sends null or empty batches; both count as absent
    // data, not as an empty batch.
    if value.is_null() {
        return Err(DecodeError::Missing);
    }
    let Value::Array(raw_rows) = value else {
        return Err(DecodeError::Malformed("data is not an array".to_string()));
    };
    if raw_rows.is_empty() {
        return Err(DecodeError::Missing);
    }

    let mut rows = Vec::with_capacity(raw_rows.len());
    for (position, raw_row) in raw_rows.iter().enumerate() {
        let Value::Array(elements) = raw_row else {
            return Err(DecodeError::Malformed(format!(
                "row {position} is not an array"
            )));
        };
        let Some(index) = elements.first().and_then(Value::as_i64) else {
            return Err(DecodeError::Malformed(format!(
                "row {position} is missing an integer row number"
            )));
        };
        rows.push(Row {
            index,
            args: elements[1..].to_vec(),
        });
    }
    Ok(Batch { rows })
}

pub(crate) fn encode(rows: &[(i64, Value)]) -> Value {
    let data: Vec<Value> = rows
        .iter()
        .map(|(index, value)| json!([index, value]))
        .collect();
    json!({ "data": data })
}

pub(crate) fn json_response(rows: &[(i64, Value)]) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, CONTENT_TYPE_JSON_UTF8)],
        encode(rows).to_string(),
    )
        .into_response()
}

pub(crate) fn missing_data_response() -> Response {
    (StatusCode::BAD_REQUEST, MISSING_DATA_PROMPT).into_response()
}
