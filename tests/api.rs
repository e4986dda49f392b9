//! HTTP behaviour of the inference service against in-memory pipelines.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::util::ServiceExt;
use transformers_serve::core::{CacheSizes, PipelineError};
use transformers_serve::pipelines::{
    EncoderOutput, FillMaskPrediction, MaskFiller, SentenceEncoder,
};
use transformers_serve::server::{router, ServiceContext};

#[derive(Default)]
struct CountingEncoder {
    calls: AtomicUsize,
}

impl CountingEncoder {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SentenceEncoder for CountingEncoder {
    fn encode(&self, sentence: &str) -> Result<EncoderOutput, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if sentence == "explode" {
            return Err(PipelineError::Other(anyhow::anyhow!("shape mismatch in layer 3")));
        }

        let hidden = sentence
            .split_whitespace()
            .enumerate()
            .map(|(i, word)| vec![i as f32, word.len() as f32 / 10.0])
            .collect();
        Ok(EncoderOutput {
            last_hidden_state: vec![hidden],
            pooler_output: Some(vec![vec![0.5, -0.25]]),
        })
    }
}

#[derive(Default)]
struct FakeMaskFiller {
    calls: AtomicUsize,
}

impl MaskFiller for FakeMaskFiller {
    fn fill_mask(&self, sentence: &str) -> Result<Vec<FillMaskPrediction>, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if sentence.matches("[MASK]").count() != 1 {
            return Err(PipelineError::InvalidInput(
                "No mask_token ([MASK]) found on the input".into(),
            ));
        }

        Ok(["paris", "lyon", "nice", "rome", "berlin"]
            .iter()
            .enumerate()
            .map(|(i, word)| FillMaskPrediction {
                score: 0.5 / (i as f32 + 1.0),
                token: 100 + i as u32,
                token_str: word.to_string(),
                sequence: sentence.replace("[MASK]", word),
            })
            .collect())
    }
}

struct Harness {
    app: Router,
    ctx: ServiceContext,
    encoder: Arc<CountingEncoder>,
    mask_filler: Arc<FakeMaskFiller>,
}

fn harness_with(cache_sizes: CacheSizes, with_mask: bool) -> Harness {
    let encoder = Arc::new(CountingEncoder::default());
    let mask_filler = Arc::new(FakeMaskFiller::default());
    let mask: Option<Arc<dyn MaskFiller>> = if with_mask {
        Some(mask_filler.clone())
    } else {
        None
    };

    let ctx = ServiceContext::new(encoder.clone(), mask, cache_sizes);
    Harness {
        app: router(ctx.clone()),
        ctx,
        encoder,
        mask_filler,
    }
}

fn harness() -> Harness {
    harness_with(CacheSizes::default(), true)
}

async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, Option<String>, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string());
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    (status, content_type, body)
}

async fn post(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let (status, _, body) = send(app, "POST", uri).await;
    (status, body)
}

#[tokio::test]
async fn embeddings_return_nested_tensors() {
    let h = harness();
    let (status, content_type, body) = send(&h.app, "POST", "/api/embeddings?sentence=hello").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/json"));

    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let hidden = json["last_hidden_state"].as_array().unwrap();
    assert!(hidden[0].as_array().unwrap()[0].as_array().unwrap()[0].is_number());
    assert!(json["pooler_output"].is_array());
}

#[tokio::test]
async fn repeated_sentence_is_served_from_cache() {
    let h = harness();
    let (first_status, first) = post(&h.app, "/api/embeddings?sentence=hello%20world").await;
    let (second_status, second) = post(&h.app, "/api/embeddings?sentence=hello%20world").await;

    assert_eq!(first_status, StatusCode::OK);
    assert_eq!(second_status, StatusCode::OK);
    assert_eq!(first, second);
    assert_eq!(h.encoder.calls(), 1);
}

#[tokio::test]
async fn whitespace_variants_are_distinct_entries() {
    let h = harness();
    post(&h.app, "/api/embeddings?sentence=hello").await;
    post(&h.app, "/api/embeddings?sentence=hello%20").await;

    assert_eq!(h.encoder.calls(), 2);
    assert_eq!(h.ctx.embeddings_cache().len(), 2);
}

#[tokio::test]
async fn missing_sentence_is_a_client_error() {
    let h = harness();
    let (status, body) = post(&h.app, "/api/embeddings").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["error"].as_str().unwrap().contains("sentence"));

    let (status, _) = post(&h.app, "/api/embeddings?text=hello").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(&h.app, "/api/mask").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(h.encoder.calls(), 0);
    assert_eq!(h.mask_filler.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_query_gets_json_error() {
    let h = harness();
    for uri in [
        "/api/embeddings?sentence=a&sentence=b",
        "/api/mask?sentence=a&sentence=b",
    ] {
        let (status, content_type, body) = send(&h.app, "POST", uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(content_type.as_deref(), Some("application/json"));

        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"].as_str().unwrap().contains("sentence"));
    }

    assert_eq!(h.encoder.calls(), 0);
    assert_eq!(h.mask_filler.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_sentence_is_a_client_error() {
    let h = harness();
    let (status, _) = post(&h.app, "/api/embeddings?sentence=").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.encoder.calls(), 0);
}

#[tokio::test]
async fn mask_returns_ranked_candidates() {
    let h = harness();
    let (status, body) = post(
        &h.app,
        "/api/mask?sentence=The%20capital%20of%20France%20is%20%5BMASK%5D.",
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let candidates: Vec<FillMaskPrediction> = serde_json::from_slice(&body).unwrap();
    assert_eq!(candidates.len(), 5);
    for pair in candidates.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    for candidate in &candidates {
        assert!((0.0..=1.0).contains(&candidate.score));
        assert!(!candidate.token_str.is_empty());
    }
    assert_eq!(candidates[0].sequence, "The capital of France is paris.");
}

#[tokio::test]
async fn mask_without_placeholder_is_unprocessable() {
    let h = harness();
    let (status, body) = post(&h.app, "/api/mask?sentence=no%20placeholder%20here").await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "No mask_token ([MASK]) found on the input");
    assert!(h.ctx.mask_cache().is_empty());

    // Failures are not cached, so the pipeline runs again.
    post(&h.app, "/api/mask?sentence=no%20placeholder%20here").await;
    assert_eq!(h.mask_filler.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn mask_is_cached_independently_of_embeddings() {
    let h = harness();
    post(&h.app, "/api/mask?sentence=%5BMASK%5D").await;
    post(&h.app, "/api/mask?sentence=%5BMASK%5D").await;
    post(&h.app, "/api/embeddings?sentence=%5BMASK%5D").await;

    assert_eq!(h.mask_filler.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.encoder.calls(), 1);
    assert_eq!(h.ctx.mask_cache().len(), 1);
    assert_eq!(h.ctx.embeddings_cache().len(), 1);
}

#[tokio::test]
async fn internal_error_fails_only_that_request() {
    let h = harness();
    let (status, body) = post(&h.app, "/api/embeddings?sentence=explode").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["error"].as_str().unwrap().contains("shape mismatch"));
    assert!(h.ctx.embeddings_cache().is_empty());

    let (status, _) = post(&h.app, "/api/embeddings?sentence=hello").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn mask_without_head_is_unavailable() {
    let h = harness_with(CacheSizes::default(), false);
    let (status, _) = post(&h.app, "/api/mask?sentence=%5BMASK%5D").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (_, _, body) = send(&h.app, "GET", "/health").await;
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["fill_mask"], false);
}

#[tokio::test]
async fn get_is_accepted_like_post() {
    let h = harness();
    let (status, _, get_body) = send(&h.app, "GET", "/api/embeddings?sentence=hello").await;
    let (_, post_body) = post(&h.app, "/api/embeddings?sentence=hello").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(get_body, post_body);
    assert_eq!(h.encoder.calls(), 1);
}

#[tokio::test]
async fn cache_stays_within_capacity() {
    let h = harness_with(
        CacheSizes {
            embeddings: 2,
            mask: 2,
        },
        true,
    );
    for word in ["a", "b", "c", "d", "e"] {
        let (status, _) = post(&h.app, &format!("/api/embeddings?sentence={word}")).await;
        assert_eq!(status, StatusCode::OK);
    }

    assert_eq!(h.encoder.calls(), 5);
    assert!(h.ctx.embeddings_cache().len() <= 2);
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let h = harness();
    let (status, _) = post(&h.app, "/api/other?sentence=hello").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
