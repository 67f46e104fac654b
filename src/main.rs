use std::sync::Arc;

use anyhow::Result;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use clap_serde_derive::ClapSerde;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::functions::greeting::handle_greeting_request;
use crate::functions::inference::handle_inference_request;
use crate::model::forest::ForestRegressor;
use crate::model::Predict;

mod config;
mod envelope;
mod error;
mod functions;
mod model;
mod telemetry;

#[cfg(unix)]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env, default_value = "FunctionRunner.toml")]
    config_file: String,

    /// Configuration options
    #[command(flatten)]
    pub opt_config: <Config as ClapSerde>::Opt,
}

/// Everything the handlers share: the regression model, loaded once before
/// the listener binds and immutable from then on.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) predictor: Arc<dyn Predict>,
}

#[macro_export]
macro_rules! exit_err {
    ($code:expr, $fmt:expr $(, $arg:expr)*) => {{
        tracing::error!($fmt $(, $arg)*);
        std::process::exit($code);
    }};
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    telemetry::init_telemetry();

    let mut args = Args::parse();
    let config = match Config::from_toml(&args.config_file) {
        Ok(file_opts) => Config::from(file_opts).merge(&mut args.opt_config),
        Err(err) => {
            if args.config_file == "FunctionRunner.toml" {
                Config::from(&mut args.opt_config)
            } else {
                exit_err!(
                    1,
                    "Failed to read configuration file {} with error: {}",
                    args.config_file,
                    err
                );
            }
        }
    };

    let model = match ForestRegressor::from_file(&config.model_file) {
        Ok(model) => model,
        Err(err) => {
            exit_err!(
                1,
                "Failed to load model artifact {} with error: {}",
                config.model_file,
                err
            );
        }
    };
    info!(
        "Loaded model {} ({} trees over {} features)",
        model.name(),
        model.tree_count(),
        model.feature_count()
    );

    let state = AppState {
        predictor: Arc::new(model),
    };
    let listener = TcpListener::bind(format!("{}:{}", config.address, config.port)).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/inference",
            post(handle_inference_request).get(handle_inference_request),
        )
        .route(
            "/greeting",
            post(handle_greeting_request).get(handle_greeting_request),
        )
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

// TODO set timeout for shutdown signal
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down..."),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::envelope::MISSING_DATA_PROMPT;

    const ARTIFACT: &str = "models/bp_forest.json";

    async fn spawn_app() -> String {
        let model = ForestRegressor::from_file(ARTIFACT).unwrap();
        let state = AppState {
            predictor: Arc::new(model),
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn health_endpoint_answers_ok() {
        let base = spawn_app().await;
        let response = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn inference_returns_the_artifact_prediction() {
        let base = spawn_app().await;
        let expected = ForestRegressor::from_file(ARTIFACT)
            .unwrap()
            .predict(&[5.0, 155.0])
            .unwrap();

        let client = reqwest::Client::new();
        let response = client
            .post(format!("{base}/inference"))
            .body(r#"{"data": [[0, 5, 155]]}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("content-type")
                .unwrap()
                .to_str()
                .unwrap(),
            "application/json; charset=utf-8"
        );
        let reply: Value = serde_json::from_str(&response.text().await.unwrap()).unwrap();
        assert_eq!(reply, json!({"data": [[0, expected]]}));
    }

    #[tokio::test]
    async fn query_and_body_channels_answer_identically() {
        let base = spawn_app().await;
        let client = reqwest::Client::new();

        let via_query = client
            .get(format!("{base}/inference"))
            .query(&[("data", "[[0, 5, 155], [1, 2, 140]]")])
            .send()
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        let via_body = client
            .post(format!("{base}/inference"))
            .body(r#"{"data": [[0, 5, 155], [1, 2, 140]]}"#)
            .send()
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(via_query, via_body);
    }

    #[tokio::test]
    async fn repeated_requests_are_byte_identical() {
        let base = spawn_app().await;
        let client = reqwest::Client::new();

        let mut replies = Vec::new();
        for _ in 0..2 {
            let bytes = client
                .post(format!("{base}/inference"))
                .body(r#"{"data": [[0, 5, 155], [1, 8, 170]]}"#)
                .send()
                .await
                .unwrap()
                .bytes()
                .await
                .unwrap();
            replies.push(bytes);
        }
        assert_eq!(replies[0], replies[1]);
    }

    #[tokio::test]
    async fn greeting_wraps_the_name_in_the_fixed_message() {
        let base = spawn_app().await;
        let client = reqwest::Client::new();
        let raw = client
            .post(format!("{base}/greeting"))
            .body(r#"{"data": [[0, "Elon Musk"]]}"#)
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        let reply: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            reply,
            json!({"data": [[0, {"result": "Hello Elon Musk, good to see you here!"}]]})
        );
    }

    #[tokio::test]
    async fn both_endpoints_prompt_when_no_data_is_given() {
        let base = spawn_app().await;
        let client = reqwest::Client::new();
        for path in ["/inference", "/greeting"] {
            let response = client.post(format!("{base}{path}")).send().await.unwrap();
            assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
            assert_eq!(response.text().await.unwrap(), MISSING_DATA_PROMPT);
        }
    }

    #[tokio::test]
    async fn malformed_rows_answer_bad_request_not_server_error() {
        let base = spawn_app().await;
        let client = reqwest::Client::new();
        let response = client
            .post(format!("{base}/inference"))
            .body(r#"{"data": [[0, "five", 155]]}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let reply: Value = serde_json::from_str(&response.text().await.unwrap()).unwrap();
        assert!(reply["error"].as_str().unwrap().contains("row 0"));
    }
}
