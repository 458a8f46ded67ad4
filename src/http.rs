use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Redirect, Response},
    routing::{get, put},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::catalog::{CatalogApi, Session};
use crate::error::{ErrorInfo, SyncError};
use crate::scheduler::LoopController;

#[derive(Clone)]
struct HttpState {
    controller: LoopController,
    catalog: Arc<dyn CatalogApi>,
    session: Arc<dyn Session>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiStatus {
    authenticated: bool,
    last_update: Option<chrono::DateTime<chrono::Utc>>,
    last_error: Option<ErrorInfo>,
    playlist_id: Option<String>,
}

#[derive(Deserialize)]
struct SelectPlaylist {
    id: String,
}

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    error: Option<String>,
}

pub fn router(controller: LoopController, catalog: Arc<dyn CatalogApi>, session: Arc<dyn Session>) -> Router {
    Router::new()
        .route("/", get(get_status))
        .route("/api/status", get(get_status))
        .route("/api/me", get(get_me))
        .route("/api/playlists", get(get_playlists))
        .route("/pl-id", put(select_playlist))
        .route("/login", get(login))
        .route("/callback", get(callback))
        .route("/logout", get(logout))
        .route("/health", get(health))
        .with_state(HttpState {
            controller,
            catalog,
            session,
        })
}

pub fn start_server(
    bind_address: String,
    port: u16,
    controller: LoopController,
    catalog: Arc<dyn CatalogApi>,
    session: Arc<dyn Session>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(controller, catalog, session);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("Server running on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn failure(status: StatusCode, err: SyncError) -> Response {
    (status, Json(json!({ "code": "error", "kind": err.kind(), "message": err.to_string() }))).into_response()
}

async fn get_status(State(state): State<HttpState>) -> Json<ApiStatus> {
    Json(ApiStatus {
        authenticated: state.session.is_authenticated().await,
        last_update: state.controller.last_update(),
        last_error: state.controller.last_error(),
        playlist_id: state.controller.playlist_id(),
    })
}

async fn get_me(State(state): State<HttpState>) -> Response {
    if !state.session.is_authenticated().await {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state.catalog.current_user().await {
        Ok(user) => Json(user).into_response(),
        Err(e) => failure(StatusCode::BAD_GATEWAY, e),
    }
}

async fn get_playlists(State(state): State<HttpState>) -> Response {
    if !state.session.is_authenticated().await {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state.catalog.user_playlists().await {
        Ok(playlists) => Json(playlists).into_response(),
        Err(e) => failure(StatusCode::BAD_GATEWAY, e),
    }
}

async fn select_playlist(State(state): State<HttpState>, Json(body): Json<SelectPlaylist>) -> Response {
    match state.controller.select_playlist(&body.id) {
        Ok(playlist_id) => Json(json!({ "code": "success", "playlistId": playlist_id })).into_response(),
        Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn login(State(state): State<HttpState>) -> Response {
    match state.session.authorize_url() {
        Ok(url) => Redirect::to(&url).into_response(),
        Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn callback(State(state): State<HttpState>, Query(params): Query<CallbackParams>) -> Response {
    if let Some(err) = params.error {
        warn!("Callback error: {}", err);
        return (StatusCode::BAD_REQUEST, format!("Callback Error: {}", err)).into_response();
    }

    let Some(code) = params.code else {
        warn!("No code in callback");
        return (StatusCode::BAD_REQUEST, "No code in callback").into_response();
    };

    match state.session.login(&code).await {
        Ok(()) => {
            state.controller.trigger_now();
            Redirect::to("/").into_response()
        }
        Err(e) => {
            error!("Error getting tokens: {}", e);
            failure(StatusCode::BAD_GATEWAY, e)
        }
    }
}

async fn logout(State(state): State<HttpState>) -> Response {
    match state.session.logout().await {
        Ok(()) => Redirect::to("/").into_response(),
        Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn health() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::Value;

    use super::*;
    use crate::catalog::testing::{FakeCatalog, FakeChart};
    use crate::config::DescriptionTemplate;
    use crate::store::JsonStore;
    use crate::sync::PlaylistSynchronizer;

    struct TestServer {
        _dir: tempfile::TempDir,
        base: String,
        catalog: Arc<FakeCatalog>,
        client: reqwest::Client,
    }

    async fn serve(catalog: FakeCatalog) -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonStore::open(dir.path().join("data.json")).unwrap());
        let catalog = Arc::new(catalog);
        let synchronizer = PlaylistSynchronizer::new(
            Arc::new(FakeChart::default()),
            catalog.clone(),
            DescriptionTemplate::default(),
            10,
        );
        let controller = LoopController::new(synchronizer, catalog.clone(), store, Duration::from_secs(3600), 1);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let app = router(controller, catalog.clone(), catalog.clone());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();

        TestServer {
            _dir: dir,
            base,
            catalog,
            client,
        }
    }

    impl TestServer {
        async fn get(&self, path: &str) -> reqwest::Response {
            self.client.get(format!("{}{}", self.base, path)).send().await.unwrap()
        }

        async fn select(&self, id: &str) -> Value {
            self.client
                .put(format!("{}/pl-id", self.base))
                .json(&json!({ "id": id }))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn health_is_ok() {
        let server = serve(FakeCatalog::default()).await;
        assert_eq!(server.get("/health").await.status(), reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn status_reports_camel_case_fields() {
        let server = serve(FakeCatalog::signed_in()).await;

        let body: Value = server.get("/api/status").await.json().await.unwrap();

        assert_eq!(body["authenticated"], Value::Bool(true));
        for key in ["lastUpdate", "lastError", "playlistId"] {
            assert!(body.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(body["playlistId"], Value::Null);
    }

    #[tokio::test]
    async fn selecting_the_same_playlist_twice_turns_sync_off() {
        let server = serve(FakeCatalog::default()).await;

        let first = server.select("pl").await;
        assert_eq!(first, json!({ "code": "success", "playlistId": "pl" }));

        let second = server.select("pl").await;
        assert_eq!(second, json!({ "code": "success", "playlistId": null }));
    }

    #[tokio::test]
    async fn callback_without_code_is_rejected() {
        let server = serve(FakeCatalog::default()).await;

        let denied = server.get("/callback?error=access_denied").await;
        assert_eq!(denied.status(), reqwest::StatusCode::BAD_REQUEST);
        assert!(denied.text().await.unwrap().contains("access_denied"));

        assert_eq!(server.get("/callback").await.status(), reqwest::StatusCode::BAD_REQUEST);
        assert!(!server.catalog.is_authenticated().await);
    }

    #[tokio::test]
    async fn callback_with_code_signs_in_and_redirects_home() {
        let server = serve(FakeCatalog::default()).await;

        let response = server.get("/callback?code=abc").await;

        assert!(response.status().is_redirection());
        assert_eq!(response.headers()["location"], "/");
        assert!(server.catalog.is_authenticated().await);

        let logout = server.get("/logout").await;
        assert!(logout.status().is_redirection());
        assert!(!server.catalog.is_authenticated().await);
    }

    #[tokio::test]
    async fn account_routes_need_a_session() {
        let server = serve(FakeCatalog::default()).await;

        assert_eq!(server.get("/api/me").await.status(), reqwest::StatusCode::UNAUTHORIZED);
        assert_eq!(
            server.get("/api/playlists").await.status(),
            reqwest::StatusCode::UNAUTHORIZED
        );

        *server.catalog.authenticated.lock().unwrap() = true;
        let me: Value = server.get("/api/me").await.json().await.unwrap();
        assert_eq!(me["id"], "eska");
        assert_eq!(me["displayName"], "Radio ESKA");
    }

    #[tokio::test]
    async fn login_redirects_to_the_authorize_url() {
        let server = serve(FakeCatalog::default()).await;

        let response = server.get("/login").await;

        assert!(response.status().is_redirection());
        assert!(response.headers()["location"]
            .to_str()
            .unwrap()
            .starts_with("https://accounts.example/authorize"));
    }
}
