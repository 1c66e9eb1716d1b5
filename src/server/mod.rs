//! HTTP side of the gallery: the model index and the model files themselves.
//!
//! - `GET /api/models` and `GET /?handler=ModelsData` return the index as JSON
//! - `GET /models/<format>/<model>/<file>` serves the asset root

use crate::assets::scan_directory;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("asset root {0} is not a directory")]
    NotADirectory(PathBuf),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("server stopped: {0}")]
    Serve(#[from] std::io::Error),
}

struct ServerState {
    root: PathBuf,
}

pub fn create_router(root: PathBuf) -> Router {
    let state = Arc::new(ServerState { root: root.clone() });
    Router::new()
        .route("/api/models", get(models_index))
        .route("/", get(legacy_handler))
        .nest_service("/models", ServeDir::new(root))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serves until Ctrl+C.
pub async fn serve(root: PathBuf, addr: SocketAddr) -> Result<(), ServerError> {
    if !root.is_dir() {
        return Err(ServerError::NotADirectory(root));
    }
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    log::info!("Serving {} on http://{}", root.display(), addr);
    axum::serve(listener, create_router(root))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    log::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl+C: {}", err);
        std::future::pending::<()>().await;
    }
}

#[derive(Deserialize)]
struct LegacyQuery {
    handler: Option<String>,
}

async fn legacy_handler(
    state: State<Arc<ServerState>>,
    Query(query): Query<LegacyQuery>,
    headers: HeaderMap,
) -> Response {
    match query.handler.as_deref() {
        Some("ModelsData") => models_index(state, headers).await,
        _ => (StatusCode::NOT_FOUND, "unknown handler").into_response(),
    }
}

async fn models_index(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    let root = state.root.clone();
    let index = match tokio::task::spawn_blocking(move || scan_directory(&root)).await {
        Ok(Ok(index)) => index,
        Ok(Err(err)) => {
            log::error!("Index scan failed: {}", err);
            return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
        }
        Err(err) => {
            log::error!("Index scan task failed: {}", err);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let body = match index.to_json() {
        Ok(body) => body,
        Err(err) => {
            log::error!("Index serialization failed: {}", err);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let etag = entity_tag(body.as_bytes());
    let Ok(etag_value) = HeaderValue::from_str(&etag) else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let not_modified = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| etag_matches(value, &etag));
    if not_modified {
        return (StatusCode::NOT_MODIFIED, [(header::ETAG, etag_value)]).into_response();
    }

    log::debug!(
        "Index: {} formats, {} models",
        index.formats().count(),
        index.model_count()
    );
    (
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            ),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (header::ETAG, etag_value),
        ],
        body,
    )
        .into_response()
}

/// Strong entity tag: quoted hex SHA-256 of the body.
fn entity_tag(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    let hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    format!("\"{hex}\"")
}

fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    if_none_match.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.strip_prefix("W/").unwrap_or(candidate) == etag
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn asset_root() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        for dir in ["GLTF/lamp", "GLTF/chair", "OBJ/table"] {
            std::fs::create_dir_all(root.path().join(dir)).unwrap();
        }
        std::fs::write(root.path().join("GLTF/chair/chair.glb"), b"glTF-bytes").unwrap();
        root
    }

    async fn get(router: Router, uri: &str, if_none_match: Option<&str>) -> Response {
        let mut request = Request::builder().uri(uri);
        if let Some(tag) = if_none_match {
            request = request.header(header::IF_NONE_MATCH, tag);
        }
        router
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn index_lists_formats_and_models() {
        let root = asset_root();
        let response = get(create_router(root.path().to_path_buf()), "/api/models", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(header::ETAG));
        assert_eq!(
            body_text(response).await,
            r#"{"GLTF":["chair","lamp"],"OBJ":["table"]}"#
        );
    }

    #[tokio::test]
    async fn legacy_handler_serves_the_same_index() {
        let root = asset_root();
        let router = create_router(root.path().to_path_buf());
        let response = get(router.clone(), "/?handler=ModelsData", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_text(response).await,
            r#"{"GLTF":["chair","lamp"],"OBJ":["table"]}"#
        );

        let response = get(router, "/?handler=Other", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn matching_etag_returns_not_modified() {
        let root = asset_root();
        let router = create_router(root.path().to_path_buf());
        let first = get(router.clone(), "/api/models", None).await;
        let etag = first.headers()[header::ETAG].to_str().unwrap().to_string();

        let second = get(router.clone(), "/api/models", Some(&etag)).await;
        assert_eq!(second.status(), StatusCode::NOT_MODIFIED);

        std::fs::create_dir_all(root.path().join("OBJ/stool")).unwrap();
        let third = get(router, "/api/models", Some(&etag)).await;
        assert_eq!(third.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn model_files_are_served() {
        let root = asset_root();
        let response = get(
            create_router(root.path().to_path_buf()),
            "/models/GLTF/chair/chair.glb",
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "glTF-bytes");
    }

    #[tokio::test]
    async fn missing_root_is_a_server_error() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("gone");
        let response = get(create_router(missing), "/api/models", None).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn etag_comparison_accepts_lists_and_weak_tags() {
        let tag = entity_tag(b"{}");
        assert!(etag_matches(&tag, &tag));
        assert!(etag_matches(&format!("\"other\", W/{tag}"), &tag));
        assert!(etag_matches("*", &tag));
        assert!(!etag_matches("\"other\"", &tag));
    }
}
