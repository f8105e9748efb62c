//! Stand-in for the remote validation service, for local testing of the
//! round-trip backend.

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
pub struct MockState {
    /// Base of the signed URL handed to publishers, `None` to omit it.
    pub signed_url_base: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthRequest {
    #[serde(rename = "type")]
    kind: Option<String>,
    username: Option<String>,
    #[serde(rename = "streamID")]
    stream_id: Option<String>,
    scope: Option<String>,
}

pub fn router(state: MockState) -> Router {
    Router::new()
        .route("/validateCredentials", post(validate_credentials))
        .route("/invalidateCredentials", post(invalidate_credentials))
        .with_state(state)
}

pub async fn serve(
    listener: TcpListener,
    state: MockState,
    shutdown_token: CancellationToken,
) -> anyhow::Result<()> {
    tracing::info!("Mock validation service listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown_token.cancelled().await })
        .await?;

    tracing::info!("Mock validation service shut down gracefully");
    Ok(())
}

async fn validate_credentials(
    State(state): State<MockState>,
    Json(request): Json<AuthRequest>,
) -> Json<Value> {
    tracing::info!(
        kind = ?request.kind,
        username = ?request.username,
        stream = ?request.stream_id,
        scope = ?request.scope,
        "validateCredentials"
    );

    let response = match request.kind.as_deref() {
        Some("publisher") => match &state.signed_url_base {
            Some(base) => json!({
                "result": true,
                "url": format!("{base}/{}", request.stream_id.as_deref().unwrap_or_default()),
            }),
            None => json!({ "result": true }),
        },
        Some("subscriber") => json!({ "result": true }),
        _ => json!({ "result": false }),
    };
    Json(response)
}

async fn invalidate_credentials(Json(request): Json<AuthRequest>) -> Json<Value> {
    tracing::info!(
        username = ?request.username,
        stream = ?request.stream_id,
        scope = ?request.scope,
        "invalidateCredentials"
    );
    Json(json!({ "result": true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn spawn(state: MockState) -> (String, CancellationToken) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let token = CancellationToken::new();
        tokio::spawn(serve(listener, state, token.clone()));
        (base, token)
    }

    async fn post_json(url: &str, body: Value) -> Value {
        reqwest::Client::new()
            .post(url)
            .json(&body)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_validate_by_type() {
        let (base, token) = spawn(MockState {
            signed_url_base: Some("https://cdn.example.com".to_string()),
        })
        .await;
        let url = format!("{base}/validateCredentials");

        let publisher = post_json(&url, json!({"type": "publisher", "streamID": "s1"})).await;
        assert_eq!(publisher, json!({"result": true, "url": "https://cdn.example.com/s1"}));

        let subscriber = post_json(&url, json!({"type": "subscriber"})).await;
        assert_eq!(subscriber, json!({"result": true}));

        let other = post_json(&url, json!({"type": "admin"})).await;
        assert_eq!(other, json!({"result": false}));

        let invalidate = post_json(&format!("{base}/invalidateCredentials"), json!({})).await;
        assert_eq!(invalidate, json!({"result": true}));

        token.cancel();
    }
}
