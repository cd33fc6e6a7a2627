use std::time::Duration;

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use fobsync_core::{Fingerprint, TriggerSource};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse<'a> {
    status: &'a str,
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    fingerprint: Option<Fingerprint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entries: Option<usize>,
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// Ready once the cache holds a snapshot.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.load() {
        Some(snapshot) => (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready",
                fingerprint: Some(snapshot.fingerprint().clone()),
                entries: Some(snapshot.len()),
            }),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "warming",
                fingerprint: None,
                entries: None,
            }),
        ),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct FobsQuery {
    /// Long-poll duration such as `30s` or `1m30s`.
    pub wait: Option<String>,
}

/// Serve the current authorization list, optionally long-polling for a change.
pub async fn list_fobs(
    State(state): State<AppState>,
    Query(query): Query<FobsQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let wait = query
        .wait
        .as_deref()
        .map(parse_wait)
        .transpose()?
        .map(|wait| wait.min(state.max_wait));
    let if_none_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok());

    if let Some(wait) = wait {
        // Subscribe before looking at the fingerprint so a change in between still wakes us.
        let waiter = state.store.subscribe();
        let should_wait = match (state.store.fingerprint(), if_none_match) {
            (Some(current), Some(tag)) => etag_matches(tag, &current),
            _ => true,
        };
        if should_wait {
            let mut shutdown = state.shutdown.clone();
            tokio::select! {
                _ = waiter.wait(wait) => {}
                _ = shutdown.wait_for(|stop| *stop) => {}
            }
        }
    }

    let snapshot = state.store.load().ok_or(ApiError::NotWarmed)?;
    let etag = format!("\"{}\"", snapshot.fingerprint());

    if if_none_match.is_some_and(|tag| etag_matches(tag, snapshot.fingerprint())) {
        return Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, etag)]).into_response());
    }

    Ok((
        StatusCode::OK,
        [(header::ETAG, etag)],
        Json(snapshot.entries()),
    )
        .into_response())
}

/// Keycloak calls this on admin events; the body is not inspected.
pub async fn webhook(State(state): State<AppState>) -> StatusCode {
    tracing::info!("received webhook");
    state.trigger.fire(TriggerSource::Webhook);
    StatusCode::ACCEPTED
}

/// An access attempt reported by a door controller.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccessEvent {
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, rename = "personID")]
    pub person_id: String,
    #[serde(default, rename = "fobID")]
    pub fob_id: i64,
    #[serde(default)]
    pub authorized: bool,
}

/// Decoded by hand so a missing content type or a mistyped field is a plain 400.
pub async fn record_event(body: Bytes) -> Result<StatusCode, ApiError> {
    let event: AccessEvent = serde_json::from_slice(&body).map_err(ApiError::InvalidEvent)?;
    tracing::info!(
        timestamp = event.timestamp,
        person_id = %event.person_id,
        fob_id = event.fob_id,
        authorized = event.authorized,
        "received event"
    );
    Ok(StatusCode::NO_CONTENT)
}

fn parse_wait(raw: &str) -> Result<Duration, ApiError> {
    humantime::parse_duration(raw.trim()).map_err(|source| ApiError::InvalidWait {
        value: raw.to_string(),
        source,
    })
}

/// `If-None-Match` comparison: quoted, weak or bare tags and `*` all count.
fn etag_matches(header_value: &str, fingerprint: &Fingerprint) -> bool {
    header_value.split(',').map(str::trim).any(|tag| {
        tag == "*" || tag.trim_start_matches("W/").trim_matches('"') == fingerprint.as_str()
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        Router,
        body::{Body, to_bytes},
        http::Request,
        routing::{get, post},
    };
    use fobsync_core::{AuthorizationEntry, Snapshot, SnapshotStore, refresh_channel};
    use tokio::sync::watch;
    use tower::ServiceExt;

    use super::*;

    fn entry(id: &str, fob: u64) -> AuthorizationEntry {
        AuthorizationEntry::new(id, fob, 0, Duration::from_secs(60)).unwrap()
    }

    fn router(store: Arc<SnapshotStore>) -> (Router, fobsync_core::TriggerReceiver, watch::Sender<bool>) {
        let (trigger, rx) = refresh_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = AppState::new(store, trigger, Duration::from_secs(2), shutdown_rx);
        let app = Router::new()
            .route("/v1/fobs", get(list_fobs))
            .route("/readyz", get(readyz))
            .route("/webhook", post(webhook))
            .route("/v1/events", post(record_event))
            .with_state(state);
        (app, rx, shutdown_tx)
    }

    async fn get_status(app: &Router, uri: &str, etag: Option<&str>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let mut req = Request::get(uri);
        if let Some(tag) = etag {
            req = req.header(header::IF_NONE_MATCH, tag);
        }
        let res = app
            .clone()
            .oneshot(req.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap().to_vec();
        (status, headers, body)
    }

    #[test]
    fn etag_matching_variants() {
        let fp = Snapshot::new(vec![]).fingerprint().clone();
        let quoted = format!("\"{fp}\"");
        assert!(etag_matches(&quoted, &fp));
        assert!(etag_matches(fp.as_str(), &fp));
        assert!(etag_matches(&format!("W/{quoted}"), &fp));
        assert!(etag_matches(&format!("\"other\", {quoted}"), &fp));
        assert!(etag_matches("*", &fp));
        assert!(!etag_matches("\"other\"", &fp));
    }

    #[test]
    fn wait_accepts_human_durations() {
        assert_eq!(parse_wait("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_wait("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_wait("500ms").unwrap(), Duration::from_millis(500));
        assert!(matches!(parse_wait("later"), Err(ApiError::InvalidWait { .. })));
    }

    #[tokio::test]
    async fn cold_cache_is_unavailable_not_empty() {
        let (app, _rx, _shutdown) = router(SnapshotStore::new_shared());

        let (status, headers, body) = get_status(&app, "/v1/fobs", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(headers.contains_key(header::RETRY_AFTER));
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "cache not yet warmed");

        let (status, _, body) = get_status(&app, "/readyz", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "warming");
    }

    #[tokio::test]
    async fn empty_snapshot_is_served_as_empty_list() {
        let store = SnapshotStore::new_shared();
        store.replace_if_changed(Snapshot::new(vec![]));
        let (app, _rx, _shutdown) = router(store);

        let (status, _, body) = get_status(&app, "/v1/fobs", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"[]");
    }

    #[tokio::test]
    async fn serves_entries_with_etag_and_honours_if_none_match() {
        let store = SnapshotStore::new_shared();
        store.replace_if_changed(Snapshot::new(vec![entry("b", 5)]));
        let fp = store.fingerprint().unwrap();
        let (app, _rx, _shutdown) = router(store);

        let (status, headers, body) = get_status(&app, "/v1/fobs", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::ETAG], format!("\"{fp}\"").as_str());
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!([{"userID": "b", "fobID": 5, "ttl": 60_000}]));

        let (status, _, body) = get_status(&app, "/v1/fobs", Some(fp.as_str())).await;
        assert_eq!(status, StatusCode::NOT_MODIFIED);
        assert!(body.is_empty());

        let (status, _, _) = get_status(&app, "/v1/fobs", Some("\"stale\"")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn bad_wait_is_rejected() {
        let (app, _rx, _shutdown) = router(SnapshotStore::new_shared());
        let (status, _, body) = get_status(&app, "/v1/fobs?wait=forever", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"].as_str().unwrap().contains("forever"));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_client_is_answered_without_waiting() {
        let store = SnapshotStore::new_shared();
        store.replace_if_changed(Snapshot::new(vec![entry("b", 5)]));
        let (app, _rx, _shutdown) = router(store);

        let started = tokio::time::Instant::now();
        let (status, _, _) = get_status(&app, "/v1/fobs?wait=1m", Some("\"stale\"")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn long_poll_is_clamped_to_max_wait() {
        let store = SnapshotStore::new_shared();
        store.replace_if_changed(Snapshot::new(vec![entry("b", 5)]));
        let fp = store.fingerprint().unwrap();
        let (app, _rx, _shutdown) = router(store.clone());

        let started = tokio::time::Instant::now();
        let (status, _, _) = get_status(&app, "/v1/fobs?wait=1h", Some(fp.as_str())).await;
        assert_eq!(status, StatusCode::NOT_MODIFIED);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(store.waiter_count(), 0);
    }

    #[tokio::test]
    async fn long_poll_wakes_on_change() {
        let store = SnapshotStore::new_shared();
        store.replace_if_changed(Snapshot::new(vec![entry("b", 5)]));
        let fp = store.fingerprint().unwrap();
        let (app, _rx, _shutdown) = router(store.clone());

        let request = tokio::spawn({
            let app = app.clone();
            let tag = fp.to_string();
            async move { get_status(&app, "/v1/fobs?wait=10s", Some(tag.as_str())).await }
        });
        while store.waiter_count() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(store.replace_if_changed(Snapshot::new(vec![entry("b", 5), entry("c", 6)])));

        let (status, headers, _) = request.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_ne!(headers[header::ETAG], format!("\"{fp}\"").as_str());
    }

    #[tokio::test]
    async fn shutdown_releases_long_polls() {
        let (app, _rx, shutdown) = router(SnapshotStore::new_shared());
        let request = tokio::spawn({
            let app = app.clone();
            async move { get_status(&app, "/v1/fobs?wait=10s", None).await }
        });
        tokio::task::yield_now().await;
        shutdown.send(true).unwrap();

        let (status, _, _) = request.await.unwrap();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn webhook_requests_a_refresh() {
        let (app, mut rx, _shutdown) = router(SnapshotStore::new_shared());
        let res = app
            .oneshot(Request::post("/webhook").body(Body::from("{}")).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::ACCEPTED);
        assert_eq!(rx.try_recv(), Some(TriggerSource::Webhook));
    }

    async fn post_event(app: &Router, content_type: Option<&str>, body: &'static str) -> StatusCode {
        let mut req = Request::post("/v1/events");
        if let Some(ct) = content_type {
            req = req.header(header::CONTENT_TYPE, ct);
        }
        app.clone()
            .oneshot(req.body(Body::from(body)).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn events_are_accepted_without_a_content_type() {
        let (app, _rx, _shutdown) = router(SnapshotStore::new_shared());
        let event = r#"{"timestamp":1700000000,"personID":"b","fobID":5,"authorized":true}"#;
        assert_eq!(post_event(&app, None, event).await, StatusCode::NO_CONTENT);
        assert_eq!(post_event(&app, Some("text/plain"), event).await, StatusCode::NO_CONTENT);
        assert_eq!(post_event(&app, Some("application/json"), "{}").await, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn malformed_events_are_bad_requests() {
        let (app, _rx, _shutdown) = router(SnapshotStore::new_shared());
        let json = Some("application/json");
        assert_eq!(post_event(&app, json, r#"{"fobID":"five"}"#).await, StatusCode::BAD_REQUEST);
        assert_eq!(post_event(&app, json, "{not json").await, StatusCode::BAD_REQUEST);
        assert_eq!(post_event(&app, None, "").await, StatusCode::BAD_REQUEST);
    }
}
