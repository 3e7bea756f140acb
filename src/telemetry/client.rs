// ThingsBoard REST calls: login and latest-value lookup

use super::TelemetryError;
use super::protocol::{EntityRef, LatestTimeseries};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TelemetryClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl TelemetryClient {
    pub fn new(
        base_url: &str,
        username: &str,
        password: &str,
        request_timeout: Duration,
    ) -> Result<Self, TelemetryError> {
        let http = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(map_reqwest_error)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// `POST /api/auth/login`; returns the bearer token pair.
    pub async fn login(&self) -> Result<LoginResponse, TelemetryError> {
        if self.username.is_empty() || self.password.is_empty() {
            return Err(TelemetryError::Auth(
                "telemetry username and password are not configured".into(),
            ));
        }
        let body = serde_json::json!({
            "username": self.username,
            "password": self.password,
        });
        let response = self
            .http
            .post(format!("{}/api/auth/login", self.base_url))
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TelemetryError::Auth(format!("login rejected: {status}")));
        }
        let text = response.text().await.map_err(map_reqwest_error)?;
        serde_json::from_str(&text)
            .map_err(|e| TelemetryError::Auth(format!("unexpected login response: {e}")))
    }

    /// Latest `weight` value of `entity`, `None` when the series is empty.
    /// Also the cheapest way to check that configured entity identifiers exist.
    pub async fn latest_weight(
        &self,
        token: &str,
        entity: &EntityRef,
    ) -> Result<Option<f64>, TelemetryError> {
        let url = format!(
            "{}/api/plugins/telemetry/{}/{}/values/timeseries?keys=weight",
            self.base_url, entity.entity_type, entity.entity_id
        );
        let response = self
            .http
            .get(url)
            .header("X-Authorization", format!("Bearer {token}"))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(TelemetryError::Auth(format!("token rejected: {status}")));
        }
        if !status.is_success() {
            return Err(TelemetryError::Http(format!(
                "latest telemetry for {}/{} failed: {status}",
                entity.entity_type, entity.entity_id
            )));
        }
        let text = response.text().await.map_err(map_reqwest_error)?;
        let latest: LatestTimeseries = serde_json::from_str(&text)
            .map_err(|e| TelemetryError::MalformedPayload(e.to_string()))?;
        match latest.weight.first() {
            None => Ok(None),
            Some(point) => point.value.to_f64().map(Some).ok_or_else(|| {
                TelemetryError::MalformedPayload("weight value is not a finite number".into())
            }),
        }
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TelemetryError {
    if err.is_timeout() {
        return TelemetryError::Http(format!("request timed out: {err}"));
    }
    TelemetryError::Http(err.to_string())
}
