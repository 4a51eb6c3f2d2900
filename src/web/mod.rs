//! Web server module

mod error;
mod routes;

use anyhow::Result;
use axum::{
    http::{header, HeaderValue},
    routing::get,
    Router,
};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir, set_header::SetResponseHeaderLayer};
use tracing::info;

use crate::config::Config;
use crate::db::Database;

pub struct AppState {
    /// Property feeds; `None` when no database is configured
    pub db: Option<Database>,
    pub snapshot_path: PathBuf,
    pub buyers_path: Option<PathBuf>,
}

pub fn router(state: Arc<AppState>, static_dir: &str) -> Router {
    let api = Router::new()
        .route("/api/inquiries", get(routes::api_inquiries))
        .route("/api/properties", get(routes::api_properties))
        // the snapshot is regenerated in place
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        ));

    api.fallback_service(ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(config: &Config, db: Option<Database>) -> Result<()> {
    let state = Arc::new(AppState {
        db,
        snapshot_path: PathBuf::from(&config.stats.output),
        buyers_path: config.server.buyers_export.as_ref().map(PathBuf::from),
    });

    let app = router(state, &config.server.static_dir);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Web server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn write(&self, name: &str, contents: &str) {
            std::fs::write(self.dir.path().join(name), contents).unwrap();
        }

        fn app(&self, buyers: Option<&str>) -> Router {
            let state = Arc::new(AppState {
                db: None,
                snapshot_path: self.dir.path().join("inquiry_stats.json"),
                buyers_path: buyers.map(|name| self.dir.path().join(name)),
            });
            router(state, self.dir.path().to_str().unwrap())
        }
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    fn json_body(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn inquiries_serve_the_snapshot() {
        let fixture = Fixture::new();
        fixture.write("inquiry_stats.json", r#"{"2025-01":{"autoimport_total":3}}"#);

        let (status, body) = get(fixture.app(None), "/api/inquiries").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body), json!({ "2025-01": { "autoimport_total": 3 } }));
    }

    #[tokio::test]
    async fn missing_snapshot_is_not_found() {
        let fixture = Fixture::new();
        let (status, body) = get(fixture.app(None), "/api/inquiries").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json_body(&body)["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn buyers_export_is_merged() {
        let fixture = Fixture::new();
        fixture.write("inquiry_stats.json", r#"{"2025-01":{}}"#);
        fixture.write("buyers.json", r#"[{"name":"Ana","email":"ana@example.com"}]"#);

        let (status, body) = get(fixture.app(Some("buyers.json")), "/api/inquiries").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json_body(&body),
            json!({ "2025-01": {}, "buyers": [{ "name": "Ana", "email": "ana@example.com" }] })
        );
    }

    #[tokio::test]
    async fn missing_buyers_export_is_not_found() {
        let fixture = Fixture::new();
        fixture.write("inquiry_stats.json", "{}");

        let (status, _) = get(fixture.app(Some("buyers.json")), "/api/inquiries").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_a_server_error() {
        let fixture = Fixture::new();
        fixture.write("inquiry_stats.json", "{\"2025-01\":");

        let (status, _) = get(fixture.app(None), "/api/inquiries").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn properties_need_a_database() {
        let fixture = Fixture::new();
        let (status, _) = get(fixture.app(None), "/api/properties?feed=kyero&page=2").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn other_paths_serve_static_files() {
        let fixture = Fixture::new();
        fixture.write("dashboard.html", "<h1>Inquiries</h1>");

        let (status, body) = get(fixture.app(None), "/dashboard.html").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"<h1>Inquiries</h1>");

        let (status, _) = get(fixture.app(None), "/missing.js").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
