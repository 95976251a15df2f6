use crate::session::{AuthContext, UserInfo};
use crate::snapshot::{MetricSnapshot, Statistics, StatisticsPayload};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {path} failed: {source}")]
    Transport {
        path: String,
        source: reqwest::Error,
    },
    #[error("{path} responded with HTTP {status}")]
    Status {
        path: String,
        status: u16,
        data: Value,
    },
    #[error("unexpected payload from {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

impl ApiError {
    /// Text for the dashboard: the backend's `error` field when it sent one,
    /// otherwise `fallback` followed by the error itself.
    pub fn display_message(&self, fallback: &str) -> String {
        if let ApiError::Status { data, .. } = self {
            if let Some(msg) = data.get("error").and_then(Value::as_str) {
                if !msg.trim().is_empty() {
                    return msg.to_string();
                }
            }
        }
        format!("{fallback}: {self}")
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub user: UserInfo,
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    user: UserInfo,
}

/// Authenticated JSON client for the management backend.
pub struct ApiClient {
    http: Client,
    base: String,
    auth: RwLock<AuthContext>,
}

impl ApiClient {
    pub fn new(base: &str, timeout: Duration, auth: AuthContext) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .user_agent(concat!("adminmon/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            auth: RwLock::new(auth),
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn auth(&self) -> AuthContext {
        let guard = self
            .auth
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.clone()
    }

    pub fn set_auth(&self, auth: AuthContext) {
        let mut guard = self
            .auth
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = auth;
    }

    /// Sends one request and returns the decoded JSON body. An empty body
    /// decodes as `{}`; any non-2xx status becomes `ApiError::Status`.
    pub async fn request_json(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let url = format!("{}{}", self.base, path);
        debug!(method = %method, url = %url, "api request");

        let mut req = self
            .http
            .request(method, &url)
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = self.auth().token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await.map_err(|source| ApiError::Transport {
            path: path.to_string(),
            source,
        })?;
        let status = resp.status();
        let text = resp.text().await.map_err(|source| ApiError::Transport {
            path: path.to_string(),
            source,
        })?;

        let parsed = if text.trim().is_empty() {
            Ok(json!({}))
        } else {
            serde_json::from_str::<Value>(&text)
        };

        if !status.is_success() {
            return Err(ApiError::Status {
                path: path.to_string(),
                status: status.as_u16(),
                data: parsed.unwrap_or(Value::String(text)),
            });
        }

        parsed.map_err(|source| ApiError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let value = self.request_json(Method::GET, path, None).await?;
        decode(path, value)
    }

    pub async fn fetch_runtime_metrics(&self) -> Result<MetricSnapshot, ApiError> {
        self.get("/admin/metrics").await
    }

    pub async fn fetch_statistics(&self) -> Result<Statistics, ApiError> {
        let payload: StatisticsPayload = self.get("/admin/statistics").await?;
        Ok(Statistics::from(payload))
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let path = "/auth/login";
        let body = json!({ "username": username, "password": password });
        let value = self.request_json(Method::POST, path, Some(&body)).await?;
        decode(path, value)
    }

    pub async fn profile(&self) -> Result<UserInfo, ApiError> {
        let resp: ProfileResponse = self.get("/auth/profile").await?;
        Ok(resp.user)
    }

    pub async fn heartbeat(&self, client_id: &str) -> Result<(), ApiError> {
        let body = json!({ "client_id": client_id });
        self.request_json(Method::POST, "/heartbeat", Some(&body))
            .await
            .map(|_| ())
    }
}

fn decode<T: DeserializeOwned>(path: &str, value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|source| ApiError::Parse {
        path: path.to_string(),
        source,
    })
}
