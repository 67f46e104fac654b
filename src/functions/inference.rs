use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use serde_json::Value;
use tracing::debug;

use crate::envelope::{self, EnvelopeParams};
use crate::error::FunctionResult;
use crate::functions::external_function_name;
use crate::{bail_handler, AppState};

/// Backend for `sf_ext_fct_model_inference(position int, bp_before int)`.
/// Every row carries two numeric arguments which are fed to the regression
/// model; predictions come back under the callers' row numbers, in order.
#[axum_macros::debug_handler]
pub(crate) async fn handle_inference_request(
    State(state): State<AppState>,
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
            debug!("rejecting inference request: {err}");
            return Ok(envelope::missing_data_response());
        }
    };

    let mut predictions = Vec::with_capacity(batch.len());
    for row in batch.rows() {
        let (position, bp_before) = match (row.f64_arg(0), row.f64_arg(1)) {
            (Ok(position), Ok(bp_before)) => (position, bp_before),
            (Err(err), _) | (_, Err(err)) => {
                bail_handler!(StatusCode::BAD_REQUEST, "row {}: {}", row.index, err)
            }
        };
        let predicted = state.predictor.predict(&[position, bp_before])?;
        predictions.push((row.index, Value::from(predicted)));
    }

    Ok(envelope::json_response(&predictions))
}
