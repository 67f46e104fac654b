use axum::http::HeaderMap;

pub(crate) mod greeting;
pub(crate) mod inference;

/// Metadata header Snowflake attaches to every external function call.
const EXTERNAL_FUNCTION_NAME_HEADER: &str = "sf-external-function-name";

pub(crate) fn external_function_name(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(EXTERNAL_FUNCTION_NAME_HEADER)
        .and_then(|value| value.to_str().ok())
}
