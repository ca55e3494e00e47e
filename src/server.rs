//! HTTP boundary: `POST /api/verify` and `GET /health`

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, warn};
use warp::http::{HeaderValue, StatusCode};
use warp::hyper::body::Bytes;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::orchestrator::VerificationEngine;
use crate::rate_limit::{client_identity, Admission, RateLimitStore};
use crate::types::{
    ErrorResponseBody, VerificationRequest, VerifyRequestBody, VerifyResponseBody,
};

/// Largest accepted verification body
pub const MAX_BODY_BYTES: u64 = 64 * 1024;

/// Shared handles every request needs
#[derive(Clone)]
pub struct AppState {
    pub engine: VerificationEngine,
    pub limiter: Arc<dyn RateLimitStore>,
}

/// All routes served by the verifier
pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::with_status("OK", StatusCode::OK));

    let verify = warp::path!("api" / "verify")
        .and(warp::post())
        .and(client_id())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::bytes())
        .and(warp::any().map(move || state.clone()))
        .and_then(handle_verify);

    health.or(verify).recover(handle_rejection)
}

fn client_id() -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    warp::header::optional::<String>("x-forwarded-for")
        .and(warp::addr::remote())
        .map(|forwarded: Option<String>, remote: Option<SocketAddr>| {
            client_identity(forwarded.as_deref(), remote)
        })
}

async fn handle_verify(
    client_id: String,
    body: Bytes,
    state: AppState,
) -> Result<Response, Infallible> {
    let now_ms = chrono::Utc::now().timestamp_millis();

    let admission = match state.limiter.admit(&client_id, now_ms).await {
        Ok(admission) => admission,
        Err(e) => {
            error!("Admission store failed: {}", e);
            return Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"));
        }
    };

    if !admission.allowed {
        debug!("Rate limited client {}", client_id);
        let reply = error_reply(StatusCode::TOO_MANY_REQUESTS, "Too many requests");
        return Ok(with_rate_limit_headers(reply, &admission));
    }

    let reply = match decode_request(&body) {
        Err(message) => error_reply(StatusCode::BAD_REQUEST, &message),
        Ok(request) => match state.engine.verify(&request).await {
            Ok(result) => {
                let body = VerifyResponseBody {
                    success: true,
                    result,
                    timestamp: chrono::Utc::now().to_rfc3339(),
                };
                warp::reply::with_status(warp::reply::json(&body), StatusCode::OK).into_response()
            }
            Err(e) => {
                error!("Verification aborted: {}", e);
                error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Verification unavailable")
            }
        },
    };

    Ok(with_rate_limit_headers(reply, &admission))
}

/// Structural validation and base64 decoding of the wire body
fn decode_request(body: &[u8]) -> Result<VerificationRequest, String> {
    let body: VerifyRequestBody =
        serde_json::from_slice(body).map_err(|e| format!("Invalid JSON body: {}", e))?;

    let proof = required(body.proof, "proof")?;
    let tag_signature = required(body.tag_signature, "tagSignature")?;
    let challenge = required(body.challenge, "challenge")?;
    let tag_uid = required(body.tag_uid, "tagUid")?;
    let public_inputs = body
        .public_inputs
        .filter(|inputs| !inputs.is_empty())
        .ok_or_else(|| "Missing required field: publicInputs".to_string())?;

    Ok(VerificationRequest {
        proof: decode_base64(&proof, "proof")?,
        public_inputs,
        tag_signature: decode_base64(&tag_signature, "tagSignature")?,
        challenge: decode_base64(&challenge, "challenge")?,
        tag_uid,
    })
}

fn required(value: Option<String>, field: &str) -> Result<String, String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("Missing required field: {}", field))
}

fn decode_base64(value: &str, field: &str) -> Result<Vec<u8>, String> {
    STANDARD
        .decode(value)
        .map_err(|_| format!("Field {} is not valid base64", field))
}

fn error_reply(status: StatusCode, message: &str) -> Response {
    let body = ErrorResponseBody {
        success: false,
        error: message.to_string(),
    };
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

fn with_rate_limit_headers(mut reply: Response, admission: &Admission) -> Response {
    let headers = reply.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(admission.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(admission.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(admission.reset_at));
    reply
}

async fn handle_rejection(rejection: Rejection) -> Result<Response, Infallible> {
    let (status, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found")
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large")
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else {
        warn!("Unhandled rejection: {:?}", rejection);
        (StatusCode::BAD_REQUEST, "Malformed request")
    };
    Ok(error_reply(status, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::tests::{fixture, test_verifier};
    use crate::rate_limit::{RateLimitConfig, RateLimiter};
    use crate::root_registry::RootRegistry;
    use crate::tag_auth::tests::{tag_response, test_authenticator, TEST_UID};
    use serde_json::{json, Value};

    const CHALLENGE: &[u8] = b"server-nonce-7";

    fn state(max_requests: u32) -> (AppState, Arc<RootRegistry>) {
        let registry = Arc::new(RootRegistry::new());
        let engine = VerificationEngine::new(
            registry.clone(),
            Arc::new(test_authenticator()),
            Arc::new(test_verifier()),
        );
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            max_requests,
            window_ms: 60_000,
        }));
        (AppState { engine, limiter }, registry)
    }

    fn genuine_body() -> Value {
        let fx = fixture();
        json!({
            "proof": STANDARD.encode(&fx.proof_bytes),
            "publicInputs": fx.public_inputs,
            "tagSignature": STANDARD.encode(
                tag_response(&test_authenticator(), TEST_UID, CHALLENGE)
            ),
            "challenge": STANDARD.encode(CHALLENGE),
            "tagUid": TEST_UID,
        })
    }

    fn post(body: &Value) -> warp::test::RequestBuilder {
        warp::test::request()
            .method("POST")
            .path("/api/verify")
            .header("x-forwarded-for", "203.0.113.9")
            .json(body)
    }

    fn parse(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _) = state(10);
        let response = warp::test::request().path("/health").reply(&routes(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"OK");
    }

    #[tokio::test]
    async fn test_authentic_product() {
        let (state, registry) = state(10);
        registry.add_root(&fixture().public_inputs[0], 1).unwrap();

        let response = post(&genuine_body()).reply(&routes(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "10");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "9");
        assert!(response.headers().contains_key("x-ratelimit-reset"));

        let body = parse(response.body());
        assert_eq!(body["success"], true);
        assert_eq!(body["authentic"], true);
        assert_eq!(body["proofValid"], true);
        assert_eq!(body["tagAuthValid"], true);
        assert_eq!(body["rootValid"], true);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_negative_verdict_is_ok_status() {
        let (state, _) = state(10);
        let response = post(&genuine_body()).reply(&routes(state)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = parse(response.body());
        assert_eq!(body["success"], true);
        assert_eq!(body["authentic"], false);
        assert_eq!(body["rootValid"], false);
        assert_eq!(body["proofValid"], true);
    }

    #[tokio::test]
    async fn test_missing_field_is_bad_request() {
        let (state, _) = state(10);
        let mut body = genuine_body();
        body.as_object_mut().unwrap().remove("tagUid");

        let response = post(&body).reply(&routes(state)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = parse(response.body());
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("tagUid"));
    }

    #[tokio::test]
    async fn test_empty_public_inputs_is_bad_request() {
        let (state, _) = state(10);
        let mut body = genuine_body();
        body["publicInputs"] = json!([]);

        let response = post(&body).reply(&routes(state)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_invalid_base64_is_bad_request() {
        let (state, _) = state(10);
        let mut body = genuine_body();
        body["challenge"] = json!("not base64!");

        let response = post(&body).reply(&routes(state)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_invalid_json_is_bad_request() {
        let (state, _) = state(10);
        let response = warp::test::request()
            .method("POST")
            .path("/api/verify")
            .body("{\"proof\":")
            .reply(&routes(state))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rate_limited_before_parsing() {
        let (state, _) = state(2);
        let routes = routes(state);

        for _ in 0..2 {
            let response = post(&json!({})).reply(&routes).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }

        let response = post(&genuine_body()).reply(&routes).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
        assert_eq!(parse(response.body())["success"], false);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let (state, _) = state(10);
        let mut body = genuine_body();
        body["proof"] = json!("A".repeat(MAX_BODY_BYTES as usize));

        let response = post(&body).reply(&routes(state)).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
