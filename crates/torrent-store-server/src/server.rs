//! HTTP server for torrent store endpoints
//!
//! Provides /health, POST /torrents, GET /torrents/{info_hash} and
//! POST /torrents/{info_hash}/touch.

use crate::abuse::AbuseChecker;
use crate::error::ApiError;
use crate::metainfo::Metainfo;
use crate::stoplist::Stoplist;
use crate::types::{HealthResponse, PushResponse, TouchResponse};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::header,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use torrent_store::TieredStore;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

const MAX_TORRENT_SIZE: usize = 10 * 1024 * 1024;

/// Shared state for the HTTP server
pub struct ServerState {
    pub store: TieredStore,
    pub abuse: Option<Arc<dyn AbuseChecker>>,
    pub stoplist: Option<Stoplist>,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(
        store: TieredStore,
        abuse: Option<Arc<dyn AbuseChecker>>,
        stoplist: Option<Stoplist>,
    ) -> Self {
        Self {
            store,
            abuse,
            stoplist,
            started_at: Utc::now(),
        }
    }

    async fn check_abuse(&self, info_hash: &str) -> Result<(), ApiError> {
        let Some(abuse) = &self.abuse else {
            return Ok(());
        };
        if abuse.is_abused(info_hash).await? {
            info!(infohash = info_hash, "Rejected reported torrent");
            return Err(ApiError::Forbidden("torrent has been reported".into()));
        }
        Ok(())
    }

    fn check_stoplist(&self, meta: &Metainfo) -> Result<(), ApiError> {
        let Some(stoplist) = &self.stoplist else {
            return Ok(());
        };
        let result = stoplist.check(meta);
        if result.found {
            info!(infohash = %meta.info_hash, rule = ?result.rule, "Rejected stoplisted torrent");
            return Err(ApiError::Forbidden("torrent is blocked".into()));
        }
        Ok(())
    }
}

pub type SharedState = Arc<ServerState>;

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/torrents", post(push_torrent))
        .route("/torrents/{info_hash}", get(pull_torrent))
        .route("/torrents/{info_hash}/touch", post(touch_torrent))
        .layer(DefaultBodyLimit::max(MAX_TORRENT_SIZE))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, addr: SocketAddr) -> std::io::Result<()> {
    let router = create_router(state);
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds() as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        providers: state.store.providers(),
        cache: state.store.stats().await,
    })
}

/// Store a torrent, keyed by its info hash
async fn push_torrent(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<PushResponse>, ApiError> {
    let meta = Metainfo::parse(&body)?;
    state.check_stoplist(&meta)?;
    state.check_abuse(&meta.info_hash).await?;

    state.store.push(&meta.info_hash, &body).await.map_err(|e| {
        warn!(infohash = %meta.info_hash, error = %e, "Failed to store torrent");
        ApiError::from(e)
    })?;

    debug!(infohash = %meta.info_hash, size = body.len(), "Stored torrent");
    Ok(Json(PushResponse {
        info_hash: meta.info_hash,
    }))
}

/// Fetch a torrent by info hash
async fn pull_torrent(
    State(state): State<SharedState>,
    Path(info_hash): Path<String>,
) -> Result<Response, ApiError> {
    state.check_abuse(&info_hash).await?;

    let torrent = state.store.pull(&info_hash).await?;

    if state.stoplist.is_some() {
        let meta = Metainfo::parse(&torrent)
            .map_err(|e| ApiError::Internal(format!("stored torrent {} is invalid: {}", info_hash, e)))?;
        state.check_stoplist(&meta)?;
    }

    Ok(([(header::CONTENT_TYPE, "application/x-bittorrent")], torrent).into_response())
}

/// Confirm a torrent is stored, extending its lifetime
async fn touch_torrent(
    State(state): State<SharedState>,
    Path(info_hash): Path<String>,
) -> Result<Json<TouchResponse>, ApiError> {
    state.check_abuse(&info_hash).await?;
    state.store.touch(&info_hash).await?;
    Ok(Json(TouchResponse { ok: true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abuse::AbuseError;
    use crate::metainfo::fixtures;
    use crate::stoplist::StoplistRules;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use torrent_store::providers::MemoryProvider;
    use torrent_store::{StoreConfig, StoreProvider};
    use tower::ServiceExt;

    struct FixedAbuse(String);

    #[async_trait]
    impl AbuseChecker for FixedAbuse {
        async fn is_abused(&self, info_hash: &str) -> Result<bool, AbuseError> {
            Ok(info_hash == self.0)
        }
    }

    fn memory_store() -> (TieredStore, Arc<MemoryProvider>) {
        let memory = Arc::new(MemoryProvider::new(std::time::Duration::from_secs(60), 100));
        let providers = vec![Arc::clone(&memory) as Arc<dyn StoreProvider>];
        (TieredStore::new(providers, StoreConfig::default()), memory)
    }

    fn create_test_state() -> SharedState {
        let (store, _) = memory_store();
        Arc::new(ServerState::new(store, None, None))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn push_request(torrent: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/torrents")
            .body(Body::from(torrent))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = create_router(create_test_state());

        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert!(json["uptime_secs"].as_u64().is_some());
        assert_eq!(json["providers"][0], "memory");
        assert!(json["cache"]["pull"]["entries"].as_u64().is_some());
    }

    #[tokio::test]
    async fn test_push_then_pull() {
        let router = create_router(create_test_state());
        let torrent = fixtures::torrent("Some Movie", &[]);
        let info_hash = Metainfo::parse(&torrent).unwrap().info_hash;

        let response = router
            .clone()
            .oneshot(push_request(torrent.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["info_hash"], info_hash);

        let response = router
            .oneshot(
                Request::builder()
                    .uri(format!("/torrents/{}", info_hash))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/x-bittorrent"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body.as_ref(), torrent.as_slice());
    }

    #[tokio::test]
    async fn test_pull_missing_is_404() {
        let router = create_router(create_test_state());

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/torrents/0000000000000000000000000000000000000000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "torrent not found");
    }

    #[tokio::test]
    async fn test_push_garbage_is_400() {
        let router = create_router(create_test_state());

        let response = router
            .oneshot(push_request(b"definitely not bencode".to_vec()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_touch() {
        let (store, memory) = memory_store();
        let torrent = fixtures::torrent("Touched", &[]);
        let info_hash = Metainfo::parse(&torrent).unwrap().info_hash;
        memory.push(&info_hash, &torrent).await.unwrap();
        let router = create_router(Arc::new(ServerState::new(store, None, None)));

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/torrents/{}/touch", info_hash))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["ok"], true);

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/torrents/missing/touch")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reported_torrent_is_403() {
        let (store, memory) = memory_store();
        let torrent = fixtures::torrent("Reported", &[]);
        let info_hash = Metainfo::parse(&torrent).unwrap().info_hash;
        memory.push(&info_hash, &torrent).await.unwrap();

        let abuse: Arc<dyn AbuseChecker> = Arc::new(FixedAbuse(info_hash.clone()));
        let router = create_router(Arc::new(ServerState::new(store, Some(abuse), None)));

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/torrents/{}", info_hash))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = router.oneshot(push_request(torrent)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_stoplisted_torrent_is_403() {
        let (store, memory) = memory_store();
        let stoplist = Stoplist::new(StoplistRules {
            words: vec!["blocked".into()],
            patterns: vec![],
        })
        .unwrap();
        let blocked = fixtures::torrent("Archive", &[&["some_BLOCKED_file.bin"]]);
        let info_hash = Metainfo::parse(&blocked).unwrap().info_hash;

        // Stored before the rule existed, still refused on the way out
        memory.push(&info_hash, &blocked).await.unwrap();

        let router = create_router(Arc::new(ServerState::new(store, None, Some(stoplist))));

        let response = router
            .clone()
            .oneshot(push_request(blocked))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/torrents/{}", info_hash))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let clean = fixtures::torrent("Archive", &[&["fine.bin"]]);
        let response = router.oneshot(push_request(clean)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_server_state_new() {
        let (store, _) = memory_store();
        let state = ServerState::new(store, None, None);

        let diff = (Utc::now() - state.started_at).num_seconds();
        assert!((0..5).contains(&diff));
    }
}
