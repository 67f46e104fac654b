use axum::extract::Query;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use serde_json::json;
use tracing::debug;

use crate::bail_handler;
use crate::envelope::{self, EnvelopeParams};
use crate::error::FunctionResult;
use crate::functions::external_function_name;

/// Backend for `sf_ext_fct_greeting(name varchar)`. Only the first row is
/// consulted, the reply is always a single row numbered 0.
#[axum_macros::debug_handler]
pub(crate) async fn handle_greeting_request(
    Query(params): Query<EnvelopeParams>,
    headers: HeaderMap,
    body: String,
) -> FunctionResult<Response> {
    if let Some(function) = external_function_name(&headers) {
        debug!("serving external function {function}");
    }

    let batch = match envelope::decode(params.data.as_deref(), &body) {
        Ok(batch) => batch,
        Err(err) => {
            debug!("rejecting greeting request: {err}");
            return Ok(envelope::missing_data_response());
        }
    };

    // decode never yields an empty batch, but the contract of this handler
    // should not depend on that.
    let Some(first) = batch.rows().first() else {
        bail_handler!(StatusCode::BAD_REQUEST, "batch contains no rows")
    };
    let name = match first.str_arg(0) {
        Ok(name) => name,
        Err(err) => bail_handler!(StatusCode::BAD_REQUEST, "row {}: {}", first.index, err),
    };

    let greeting = json!({ "result": format!("Hello {name}, good to see you here!") });
    Ok(envelope::json_response(&[(0, greeting)]))
}
