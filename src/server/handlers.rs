use super::error::ApiError;
use super::state::ServiceContext;
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::header,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;

#[derive(Debug, Deserialize)]
pub struct SentenceQuery {
    pub sentence: Option<String>,
}

impl SentenceQuery {
    fn require(self) -> Result<String, ApiError> {
        match self.sentence {
            Some(sentence) if !sentence.is_empty() => Ok(sentence),
            Some(_) => Err(ApiError::ClientInput(
                "Query parameter 'sentence' must not be empty".into(),
            )),
            None => Err(ApiError::ClientInput(
                "Missing required query parameter 'sentence'".into(),
            )),
        }
    }
}

fn json_body(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}

pub async fn embeddings(
    State(ctx): State<ServiceContext>,
    query: Result<Query<SentenceQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let sentence = query.require()?;
    let start_time = Instant::now();

    // Inference is CPU/GPU bound, keep it off the async workers.
    let body = tokio::task::spawn_blocking(move || ctx.get_embeddings(&sentence)).await??;

    tracing::debug!(
        elapsed_ms = start_time.elapsed().as_secs_f64() * 1000.0,
        bytes = body.len(),
        "embeddings computed"
    );
    Ok(json_body(body))
}

pub async fn mask(
    State(ctx): State<ServiceContext>,
    query: Result<Query<SentenceQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let sentence = query.require()?;
    let start_time = Instant::now();

    let body = tokio::task::spawn_blocking(move || ctx.get_mask(&sentence)).await??;

    tracing::debug!(
        elapsed_ms = start_time.elapsed().as_secs_f64() * 1000.0,
        "mask predictions computed"
    );
    Ok(json_body(body))
}

pub async fn health(State(ctx): State<ServiceContext>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "fill_mask": ctx.fill_mask_enabled(),
    }))
}
