//! HTTP surface of the prediction service.
//!
//! A single endpoint, `POST /genetic_prediction`, accepting a JSON object or an array
//! of objects. Errors are returned as `{"error": "<message>"}`.

use crate::pipeline::{PredictionError, PredictionService};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::{Filter, Rejection, Reply};

pub const PREDICTION_PATH: &str = "genetic_prediction";

/// Largest accepted request body.
pub const MAX_BODY_BYTES: u64 = 1024 * 1024;

// =============================================================================
// Request/Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
}

// =============================================================================
// Routes
// =============================================================================

/// Build the complete route tree
pub fn routes(
    service: Arc<PredictionService>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let predict = warp::path(PREDICTION_PATH)
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::bytes())
        .and(with_service(service))
        .and_then(handle_predict)
        .recover(handle_rejection);

    // Browser clients call the endpoint cross-origin.
    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["POST", "OPTIONS"])
        .allow_headers(vec!["content-type"]);

    predict.with(cors)
}

/// Binds `addr` and serves until the process exits. Fails if the address cannot be bound.
pub async fn serve(service: Arc<PredictionService>, addr: SocketAddr) -> Result<(), warp::Error> {
    let (bound, server) = warp::serve(routes(service)).try_bind_ephemeral(addr)?;
    info!("Listening on http://{bound}/{PREDICTION_PATH}");
    server.await;
    Ok(())
}

fn with_service(
    service: Arc<PredictionService>,
) -> impl Filter<Extract = (Arc<PredictionService>,), Error = Infallible> + Clone {
    warp::any().map(move || service.clone())
}

// =============================================================================
// Handlers
// =============================================================================

async fn handle_predict(
    body: Bytes,
    service: Arc<PredictionService>,
) -> Result<warp::reply::Response, Infallible> {
    let started = Instant::now();
    // Downloads, parsing and inference all block.
    let outcome = tokio::task::spawn_blocking(move || service.predict_body(&body)).await;

    let response = match outcome {
        Ok(Ok(prediction)) => {
            debug!("Prediction served in {:.2?}", started.elapsed());
            warp::reply::with_status(warp::reply::json(&prediction), StatusCode::OK).into_response()
        }
        Ok(Err(e)) => prediction_error_response(&e),
        Err(join_error) => {
            error!("Prediction task failed: {join_error}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Prediction task failed: {join_error}"),
            )
        }
    };
    Ok(response)
}

/// Turns filter rejections into the same `{"error": ...}` shape as handler errors.
async fn handle_rejection(err: Rejection) -> Result<warp::reply::Response, Infallible> {
    let (status, message) = if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("Request body exceeds {MAX_BODY_BYTES} bytes"),
        )
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (
            StatusCode::LENGTH_REQUIRED,
            "A Content-Length header is required".to_string(),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else {
        error!("Unhandled rejection: {err:?}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    };
    Ok(error_response(status, message))
}

fn prediction_error_response(err: &PredictionError) -> warp::reply::Response {
    if err.is_client_error() {
        warn!("Rejected prediction request: {err}");
        error_response(StatusCode::BAD_REQUEST, err.to_string())
    } else {
        error!("Prediction failed: {err}");
        error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

fn error_response(status: StatusCode, message: String) -> warp::reply::Response {
    let body = ApiError { error: message };
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}
