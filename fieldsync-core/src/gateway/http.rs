use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL, PRAGMA};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use super::{GatewayError, RemoteGateway};
use crate::entity::{Entity, EntityType, Record};

/// REST gateway: `/{collection}` and `/{collection}/{id}`, JSON bodies,
/// bearer authentication.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    server_url: String,
    api_key: Option<String>,
}

impl HttpGateway {
    pub fn new(
        server_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        // Responses must never be served from an intermediary cache.
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            server_url: server_url.into(),
            api_key,
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Builds an absolute URL for a path, defaulting to http.
    fn build_url(&self, path: &str) -> String {
        let base_url = if !self.server_url.starts_with("http://")
            && !self.server_url.starts_with("https://")
        {
            format!("http://{}", self.server_url)
        } else {
            self.server_url.clone()
        };

        format!("{}{}", base_url.trim_end_matches('/'), path)
    }

    fn collection_path(entity_type: EntityType) -> String {
        format!("/{}", entity_type.collection())
    }

    fn record_path(entity_type: EntityType, id: &str) -> String {
        format!("/{}/{}", entity_type.collection(), urlencoding::encode(id))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.build_url(path));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        entity_type: EntityType,
        id: Option<&str>,
    ) -> Result<Response, GatewayError> {
        let response = builder
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::NOT_FOUND {
            if let Some(id) = id {
                return Err(GatewayError::NotFound {
                    entity_type,
                    id: id.to_string(),
                });
            }
        }

        let message = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            })
        } else {
            Err(GatewayError::Unavailable(format!(
                "Server returned status {}",
                status
            )))
        }
    }

    async fn decode<R: DeserializeOwned>(response: Response) -> Result<R, GatewayError> {
        response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("Invalid response body: {}", e)))
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn get_all<T: Entity>(&self) -> Result<Vec<Record<T>>, GatewayError> {
        let entity_type = T::ENTITY_TYPE;
        let builder = self.request(reqwest::Method::GET, &Self::collection_path(entity_type));
        let response = self.send(builder, entity_type, None).await?;
        Self::decode(response).await
    }

    async fn get_by_id<T: Entity>(&self, id: &str) -> Result<Record<T>, GatewayError> {
        let entity_type = T::ENTITY_TYPE;
        let builder = self.request(reqwest::Method::GET, &Self::record_path(entity_type, id));
        let response = self.send(builder, entity_type, Some(id)).await?;
        Self::decode(response).await
    }

    async fn create<T: Entity>(&self, payload: &T) -> Result<Record<T>, GatewayError> {
        let entity_type = T::ENTITY_TYPE;
        let builder = self
            .request(reqwest::Method::POST, &Self::collection_path(entity_type))
            .json(payload);
        let response = self.send(builder, entity_type, None).await?;
        Self::decode(response).await
    }

    async fn update<T: Entity>(
        &self,
        id: &str,
        patch: &T::Patch,
    ) -> Result<Record<T>, GatewayError> {
        let entity_type = T::ENTITY_TYPE;
        let builder = self
            .request(reqwest::Method::PATCH, &Self::record_path(entity_type, id))
            .json(patch);
        let response = self.send(builder, entity_type, Some(id)).await?;
        Self::decode(response).await
    }

    async fn delete<T: Entity>(&self, id: &str) -> Result<(), GatewayError> {
        let entity_type = T::ENTITY_TYPE;
        let builder = self.request(reqwest::Method::DELETE, &Self::record_path(entity_type, id));
        self.send(builder, entity_type, Some(id)).await?;
        Ok(())
    }

    async fn ping(&self) -> bool {
        match self.request(reqwest::Method::GET, "/health").send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Health check failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Account, AccountPatch, Contact};
    use axum::extract::{Path, State};
    use axum::http::HeaderMap as AxumHeaders;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct ServerState {
        accounts: Arc<Mutex<HashMap<String, Value>>>,
        next_id: Arc<Mutex<u32>>,
    }

    async fn health(headers: AxumHeaders) -> axum::http::StatusCode {
        let authorized = headers
            .get("authorization")
            .map(|v| v == "Bearer test-key")
            .unwrap_or(false);
        let uncached = headers
            .get("cache-control")
            .map(|v| v == "no-cache")
            .unwrap_or(false);
        if authorized && uncached {
            axum::http::StatusCode::OK
        } else {
            axum::http::StatusCode::UNAUTHORIZED
        }
    }

    async fn list_accounts(State(state): State<ServerState>) -> Json<Vec<Value>> {
        let accounts = state.accounts.lock().unwrap();
        let mut all: Vec<Value> = accounts.values().cloned().collect();
        all.sort_by_key(|v| v["id"].as_str().unwrap_or_default().to_string());
        Json(all)
    }

    async fn create_account(
        State(state): State<ServerState>,
        Json(mut body): Json<Value>,
    ) -> (axum::http::StatusCode, Json<Value>) {
        let mut next_id = state.next_id.lock().unwrap();
        *next_id += 1;
        let id = format!("acc_{}", *next_id);
        body["id"] = json!(id);
        state.accounts.lock().unwrap().insert(id, body.clone());
        (axum::http::StatusCode::CREATED, Json(body))
    }

    async fn get_account(
        State(state): State<ServerState>,
        Path(id): Path<String>,
    ) -> Result<Json<Value>, axum::http::StatusCode> {
        state
            .accounts
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .map(Json)
            .ok_or(axum::http::StatusCode::NOT_FOUND)
    }

    async fn patch_account(
        State(state): State<ServerState>,
        Path(id): Path<String>,
        Json(patch): Json<Value>,
    ) -> Result<Json<Value>, axum::http::StatusCode> {
        let mut accounts = state.accounts.lock().unwrap();
        let existing = accounts
            .get_mut(&id)
            .ok_or(axum::http::StatusCode::NOT_FOUND)?;
        crate::entity::merge_json(existing, patch);
        Ok(Json(existing.clone()))
    }

    async fn delete_account(
        State(state): State<ServerState>,
        Path(id): Path<String>,
    ) -> axum::http::StatusCode {
        match state.accounts.lock().unwrap().remove(&id) {
            Some(_) => axum::http::StatusCode::NO_CONTENT,
            None => axum::http::StatusCode::NOT_FOUND,
        }
    }

    async fn reject_contact() -> (axum::http::StatusCode, &'static str) {
        (
            axum::http::StatusCode::UNPROCESSABLE_ENTITY,
            "last_name is required",
        )
    }

    async fn broken() -> axum::http::StatusCode {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    }

    async fn spawn_server() -> String {
        let app = Router::new()
            .route("/health", get(health))
            .route("/accounts", get(list_accounts).post(create_account))
            .route(
                "/accounts/{id}",
                get(get_account).patch(patch_account).delete(delete_account),
            )
            .route("/contacts", get(broken).post(reject_contact))
            .with_state(ServerState::default());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn gateway(url: &str) -> HttpGateway {
        HttpGateway::new(url, Some("test-key".into()), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_build_url() {
        let bare = gateway("localhost:8080/");
        assert_eq!(bare.build_url("/accounts"), "http://localhost:8080/accounts");

        let tls = gateway("https://crm.example.com");
        assert_eq!(
            tls.build_url("/contacts/c1"),
            "https://crm.example.com/contacts/c1"
        );
    }

    #[test]
    fn test_record_path_escapes_ids() {
        assert_eq!(
            HttpGateway::record_path(EntityType::Account, "acc_1"),
            "/accounts/acc_1"
        );
        assert_eq!(
            HttpGateway::record_path(EntityType::Contact, "a b/c?d"),
            "/contacts/a%20b%2Fc%3Fd"
        );
    }

    #[tokio::test]
    async fn test_crud_round_trip() {
        let url = spawn_server().await;
        let gateway = gateway(&url);

        let created = gateway
            .create(&Account::new("Acme").with_industry("Rockets"))
            .await
            .unwrap();
        assert_eq!(created.id, "acc_1");
        assert_eq!(created.payload.industry.as_deref(), Some("Rockets"));

        let patch = AccountPatch {
            name: Some("Acme Corp".into()),
            ..Default::default()
        };
        let updated = gateway.update::<Account>("acc_1", &patch).await.unwrap();
        assert_eq!(updated.payload.name, "Acme Corp");
        assert_eq!(updated.payload.industry.as_deref(), Some("Rockets"));

        let fetched = gateway.get_by_id::<Account>("acc_1").await.unwrap();
        assert_eq!(fetched, updated);
        assert_eq!(gateway.get_all::<Account>().await.unwrap().len(), 1);

        gateway.delete::<Account>("acc_1").await.unwrap();
        assert_eq!(
            gateway.delete::<Account>("acc_1").await,
            Err(GatewayError::NotFound {
                entity_type: EntityType::Account,
                id: "acc_1".into()
            })
        );
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let url = spawn_server().await;
        let gateway = gateway(&url);

        match gateway.create(&Contact::new("Ada", "")).await {
            Err(GatewayError::Rejected { status, message }) => {
                assert_eq!(status, 422);
                assert_eq!(message, "last_name is required");
            }
            other => panic!("expected rejection, got {:?}", other),
        }

        assert!(matches!(
            gateway.get_all::<Contact>().await,
            Err(GatewayError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_ping_sends_credentials_and_no_cache_headers() {
        let url = spawn_server().await;

        assert!(gateway(&url).ping().await);

        let anonymous = HttpGateway::new(&url, None, Duration::from_secs(5)).unwrap();
        assert!(!anonymous.ping().await);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let gateway = gateway(&format!("http://{}", addr));
        assert!(!gateway.ping().await);
        assert!(matches!(
            gateway.get_by_id::<Account>("acc_1").await,
            Err(GatewayError::Unavailable(_))
        ));
    }
}
