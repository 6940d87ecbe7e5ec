//! Authoritative-store client
//!
//! Abstract contract for the server of record plus the HTTP implementation.
//! The sync engine and facade only see [`AuthoritativeStore`]; tests swap in
//! scripted implementations.

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::models::{CurrentUser, PassengerSnapshot};
use crate::session::Sessions;

/// Errors from the authoritative store
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The target passenger no longer exists server-side
    #[error("Passenger not found on server")]
    NotFound,
    /// Credential missing or rejected
    #[error("Request was not authorized")]
    Unauthorized,
    /// Any other non-success result; retried on the next sync pass
    #[error("Server rejected request: {message} ({status})")]
    Rejected {
        /// Compacted server message
        message: String,
        /// HTTP status code
        status: u16,
    },
    /// Transport failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Response body did not match the expected envelope
    #[error("Invalid response payload: {0}")]
    InvalidPayload(String),
    /// Client misconfiguration (bad endpoint)
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
}

impl RemoteError {
    /// Whether this failure means the target account is permanently gone
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Visibility scope for a snapshot pull
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassengerScope {
    /// Every passenger (administrator)
    All,
    /// Only passengers assigned to this route (field agent)
    Route(String),
}

/// Fields for creating or updating a passenger through the online path
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PassengerUpsert {
    pub full_name: String,
    pub route_id: String,
    pub ministry: String,
    pub boarding_area: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_passenger_id: Option<String>,
    pub is_active: bool,
}

/// Abstract contract of the server of record
///
/// All mutations are re-executions of the original command, not diffs; the
/// server's business logic owns idempotency (known at-least-once gap).
#[async_trait]
pub trait AuthoritativeStore: Send + Sync {
    /// Deduct a fare; returns the server's resulting balance
    async fn board_passenger(
        &self,
        passenger_id: &str,
        conductor_id: &str,
        route_id: &str,
        fare: Decimal,
    ) -> RemoteResult<Decimal>;

    /// Credit a top-up; returns the server's resulting balance
    async fn topup_passenger(
        &self,
        passenger_id: &str,
        amount: Decimal,
        notes: Option<&str>,
    ) -> RemoteResult<Decimal>;

    /// Fetch the snapshot set visible in the given scope
    async fn list_passengers(&self, scope: &PassengerScope) -> RemoteResult<Vec<PassengerSnapshot>>;

    /// Resolve the signed-in user, or None when the server has no session
    async fn get_current_user(&self) -> RemoteResult<Option<CurrentUser>>;

    /// Cheap reachability probe used by the connectivity poller
    async fn ping(&self) -> bool;

    /// Create a passenger (online-only facade path)
    async fn create_passenger(&self, fields: &PassengerUpsert) -> RemoteResult<PassengerSnapshot>;

    /// Update a passenger (online-only facade path)
    async fn update_passenger(
        &self,
        passenger_id: &str,
        fields: &PassengerUpsert,
    ) -> RemoteResult<PassengerSnapshot>;

    /// Delete a passenger (online-only facade path)
    async fn delete_passenger(&self, passenger_id: &str) -> RemoteResult<()>;
}

/// HTTP client for the authoritative store
///
/// Speaks a JSON `{success, data, error}` envelope with bearer auth taken
/// from the shared session handle.
#[derive(Clone)]
pub struct HttpAuthoritativeStore {
    base_url: String,
    client: reqwest::Client,
    sessions: Sessions,
}

impl HttpAuthoritativeStore {
    pub fn new(base_url: impl Into<String>, sessions: Sessions) -> RemoteResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        Ok(Self {
            base_url,
            client: reqwest::Client::builder().build()?,
            sessions,
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.sessions.current() {
            Some(session) => request.bearer_auth(session.access_token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> RemoteResult<T> {
        let response = self
            .authorized(request)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound);
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RemoteError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Rejected {
                message: parse_api_error(&body),
                status: status.as_u16(),
            });
        }

        let envelope = response.json::<Envelope<T>>().await?;
        envelope.into_data()
    }
}

#[async_trait]
impl AuthoritativeStore for HttpAuthoritativeStore {
    async fn board_passenger(
        &self,
        passenger_id: &str,
        conductor_id: &str,
        route_id: &str,
        fare: Decimal,
    ) -> RemoteResult<Decimal> {
        let payload = serde_json::json!({
            "conductor_id": conductor_id,
            "route_id": route_id,
            "fare_amount": fare,
        });
        let url = format!("{}/v1/passengers/{passenger_id}/board", self.base_url);
        let data: BalancePayload = self.send(self.client.post(url).json(&payload)).await?;
        data.balance()
    }

    async fn topup_passenger(
        &self,
        passenger_id: &str,
        amount: Decimal,
        notes: Option<&str>,
    ) -> RemoteResult<Decimal> {
        let payload = serde_json::json!({
            "amount": amount,
            "notes": notes,
        });
        let url = format!("{}/v1/passengers/{passenger_id}/topup", self.base_url);
        let data: BalancePayload = self.send(self.client.post(url).json(&payload)).await?;
        data.balance()
    }

    async fn list_passengers(&self, scope: &PassengerScope) -> RemoteResult<Vec<PassengerSnapshot>> {
        let url = format!("{}/v1/passengers", self.base_url);
        let request = match scope {
            PassengerScope::All => self.client.get(url).query(&[("scope", "all")]),
            PassengerScope::Route(route_id) => {
                self.client.get(url).query(&[("route_id", route_id.as_str())])
            }
        };
        self.send(request).await
    }

    async fn get_current_user(&self) -> RemoteResult<Option<CurrentUser>> {
        let url = format!("{}/v1/me", self.base_url);
        match self.send::<CurrentUser>(self.client.get(url)).await {
            Ok(user) => Ok(Some(user)),
            Err(RemoteError::Unauthorized | RemoteError::NotFound) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn ping(&self) -> bool {
        let url = format!("{}/v1/health", self.base_url);
        match self.client.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn create_passenger(&self, fields: &PassengerUpsert) -> RemoteResult<PassengerSnapshot> {
        let url = format!("{}/v1/passengers", self.base_url);
        self.send(self.client.post(url).json(fields)).await
    }

    async fn update_passenger(
        &self,
        passenger_id: &str,
        fields: &PassengerUpsert,
    ) -> RemoteResult<PassengerSnapshot> {
        let url = format!("{}/v1/passengers/{passenger_id}", self.base_url);
        self.send(self.client.put(url).json(fields)).await
    }

    async fn delete_passenger(&self, passenger_id: &str) -> RemoteResult<()> {
        let url = format!("{}/v1/passengers/{passenger_id}", self.base_url);
        self.send::<IgnoredPayload>(self.client.delete(url)).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> RemoteResult<T> {
        if !self.success {
            let message = self.error.unwrap_or_else(|| "unspecified error".to_string());
            if message.to_ascii_lowercase().contains("not found") {
                return Err(RemoteError::NotFound);
            }
            return Err(RemoteError::Rejected {
                message,
                status: 200,
            });
        }
        self.data
            .ok_or_else(|| RemoteError::InvalidPayload("successful envelope without data".to_string()))
    }
}

/// Balance field under either name the server has used
#[derive(Debug, Deserialize)]
struct BalancePayload {
    #[serde(default)]
    current_balance: Option<Decimal>,
    #[serde(default)]
    balance_after: Option<Decimal>,
}

impl BalancePayload {
    fn balance(self) -> RemoteResult<Decimal> {
        self.current_balance.or(self.balance_after).ok_or_else(|| {
            RemoteError::InvalidPayload(
                "response did not include current_balance/balance_after".to_string(),
            )
        })
    }
}

#[derive(Debug, Deserialize)]
struct IgnoredPayload {}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return message.trim().to_string();
        }
    }
    let trimmed: String = body.trim().chars().take(180).collect();
    if trimmed.is_empty() {
        "no response body".to_string()
    } else {
        trimmed
    }
}

fn normalize_base_url(raw: String) -> RemoteResult<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(RemoteError::InvalidConfiguration(
            "base URL must not be empty".to_string(),
        ));
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        Ok(raw.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::InvalidConfiguration(
            "base URL must include http:// or https://".to_string(),
        ))
    }
}
