#![allow(dead_code)]

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::StatusCode;
use serde_json::{json, Value};

use docbase_api::auth::{encode_token, ActionClaims, Claims, AUTH_TOKEN_HEADER};
use docbase_api::config::{AppConfig, StoreBackend};
use docbase_api::{app, AppState};

pub const SECRET: &str = "integration-secret";
pub const WEBSITE_ORIGIN: &str = "https://app.example.com";

/// An in-process server on its own port with a fresh memory backend
pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    pub client: reqwest::Client,
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::development();
    config.database.backend = StoreBackend::Memory;
    config.security.jwt_secret = SECRET.to_string();
    config.security.website_origins = vec![WEBSITE_ORIGIN.to_string()];
    config.api.enable_request_logging = false;
    config
}

impl TestServer {
    pub async fn start() -> Result<Self> {
        Self::start_with(test_config()).await
    }

    pub async fn start_with(config: AppConfig) -> Result<Self> {
        // Pick an unused port for isolation
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);

        let state = AppState::from_config(&config).await?;
        let router = app(state, &config);
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .context("failed to bind test port")?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        let server = Self {
            port,
            base_url,
            client: reqwest::Client::new(),
        };
        server.wait_ready(Duration::from_secs(5)).await?;
        Ok(server)
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Ok(resp) = self.client.get(self.url("/health")).send().await {
                if resp.status() == StatusCode::OK {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Request against /api/app/:collection carrying an API-key credential
    pub fn app(&self, method: reqwest::Method, collection: &str, query: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(&format!("/api/app/{}?{}", collection, query)))
            .header(AUTH_TOKEN_HEADER, api_key())
    }

    /// Create a collection, failing the test on anything but 201
    pub async fn create_collection(&self, db: &str, collection: &str, schema: Value) -> Result<()> {
        let res = self
            .app(reqwest::Method::POST, collection, &format!("db={}", db))
            .json(&json!({ "collectionSchema": schema }))
            .send()
            .await?;
        anyhow::ensure!(res.status() == StatusCode::CREATED, "create failed: {}", res.text().await?);
        Ok(())
    }

    pub async fn insert(&self, db: &str, collection: &str, data: Value) -> Result<reqwest::Response> {
        Ok(self
            .app(reqwest::Method::POST, collection, &format!("db={}", db))
            .json(&json!({ "data": data }))
            .send()
            .await?)
    }
}

pub fn api_key() -> String {
    let claims = Claims::new("svc-1", Some("service".to_string()), false, chrono::Duration::hours(1));
    encode_token(&claims, SECRET).expect("sign api key")
}

pub fn website_key() -> String {
    let claims = Claims::new("user-1", Some("ada".to_string()), true, chrono::Duration::hours(1));
    encode_token(&claims, SECRET).expect("sign website key")
}

pub fn action_token_aged(seconds: i64) -> String {
    let mut claims = ActionClaims::issued_at(Utc::now() - chrono::Duration::seconds(seconds));
    // Distinct tokens even when minted within the same second
    claims
        .payload
        .insert("nonce".to_string(), json!(uuid::Uuid::new_v4().to_string()));
    encode_token(&claims, SECRET).expect("sign action token")
}
