//! HTTP adapter for the mini app backend.
//!
//! Endpoints are credential-less; identity travels as an explicit
//! `tg_user_id` query/body field, plus the host's signed init-data blob in
//! the `X-Telegram-Init-Data` header when available. The status fetch tries
//! the payments endpoint first and falls back to the older access endpoint,
//! normalizing either response shape into one snapshot.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use pomni_core::{
    access::snapshot_from_value,
    config::Config,
    domain::{EntitlementSnapshot, PlanCode, UserId},
    errors::Error,
    gate::StatusPort,
    Result,
};

const INIT_DATA_HEADER: &str = "X-Telegram-Init-Data";

/// Response of `POST /api/access/check`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AccessCheck {
    pub ok: bool,
    pub until: Option<DateTime<Utc>>,
    pub has_auto_renew: Option<bool>,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    init_data: Option<String>,
}

impl ApiClient {
    pub fn new(cfg: &Config) -> Self {
        Self::from_base(cfg.api_base.clone(), cfg.http_timeout, cfg.init_data.clone())
    }

    pub fn from_base(
        base: impl Into<String>,
        timeout: Duration,
        init_data: Option<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("pomni-miniapp/0.1")
            .build()
            .expect("reqwest client build");

        Self {
            http,
            base: base.into(),
            init_data,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.signed(self.http.get(self.url(path)))
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.signed(self.http.post(self.url(path)))
    }

    fn signed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.init_data {
            Some(blob) => req.header(INIT_DATA_HEADER, blob),
            None => req,
        }
    }

    /// `GET /api/payments/status` — the canonical status endpoint.
    pub async fn payments_status(&self, user: UserId, start_trial: bool) -> Result<Value> {
        let mut req = self
            .get("/api/payments/status")
            .query(&[("tg_user_id", user.0.to_string())]);
        if start_trial {
            req = req.query(&[("start_trial", "1")]);
        }

        let resp = req.send().await.map_err(transport)?;
        if !resp.status().is_success() {
            return Err(Error::Api(format!(
                "payments/status returned {}",
                resp.status()
            )));
        }
        resp.json().await.map_err(transport)
    }

    /// `GET /api/access/status` — legacy-compatible status endpoint.
    pub async fn access_status(&self, user: UserId) -> Result<Value> {
        let resp = self
            .get("/api/access/status")
            .query(&[("tg_user_id", user.0.to_string())])
            .send()
            .await
            .map_err(transport)?;
        if !resp.status().is_success() {
            return Err(Error::Api(format!(
                "access/status returned {}",
                resp.status()
            )));
        }
        resp.json().await.map_err(transport)
    }

    /// `POST /api/access/check` — the boolean access probe.
    pub async fn check_access(&self, user: UserId) -> Result<AccessCheck> {
        let resp = self
            .post("/api/access/check")
            .json(&json!({ "tg_user_id": user.0 }))
            .send()
            .await
            .map_err(transport)?;
        if !resp.status().is_success() {
            return Err(Error::Api(format!(
                "access/check returned {}",
                resp.status()
            )));
        }
        resp.json().await.map_err(transport)
    }

    /// `POST /api/access/accept` — record policy acceptance.
    ///
    /// A 404 means the backend predates this endpoint; that is surfaced as
    /// [`Error::AcceptUnavailable`] so the caller can branch to the fallback
    /// acceptance flow instead of treating it as a generic failure.
    pub async fn accept_policy(&self, user: UserId) -> Result<()> {
        let resp = self
            .post("/api/access/accept")
            .json(&json!({ "tg_user_id": user.0 }))
            .send()
            .await
            .map_err(transport)?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(Error::AcceptUnavailable);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Api(format!("access/accept returned {status}: {text}")));
        }
        Ok(())
    }

    /// `POST /api/payments/yookassa/create` — returns the provider URL the
    /// user is redirected to for checkout.
    pub async fn create_payment_link(
        &self,
        user: UserId,
        plan: PlanCode,
        return_url: &str,
    ) -> Result<String> {
        let body = json!({
            "user_id": user.0,
            "plan": plan.as_str(),
            "return_url": return_url,
            "description": format!("Помни — {}", plan.as_str()),
        });

        let resp = self
            .post("/api/payments/yookassa/create")
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Api(format!(
                "payments/create returned {status}: {text}"
            )));
        }

        let data: Value = resp.json().await.map_err(transport)?;
        data.get("confirmation_url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Api("payment response has no confirmation_url".to_string()))
    }

    /// `POST /api/events/track` — fire-and-forget analytics. Failures are
    /// logged and swallowed; analytics must never break a user flow.
    pub async fn track_event(
        &self,
        user: UserId,
        event: &str,
        action: Option<&str>,
        meta: Option<Value>,
    ) {
        let body = json!({
            "tg_user_id": user.0,
            "event": event,
            "action": action,
            "meta": meta,
        });

        match self.post("/api/events/track").json(&body).send().await {
            Ok(resp) if !resp.status().is_success() => {
                debug!(event, status = %resp.status(), "event track rejected");
            }
            Ok(_) => {}
            Err(e) => debug!(event, error = %e, "event track failed"),
        }
    }
}

#[async_trait]
impl StatusPort for ApiClient {
    async fn fetch_status(&self, user: UserId, start_trial: bool) -> Result<EntitlementSnapshot> {
        match self.payments_status(user, start_trial).await {
            Ok(raw) => return Ok(snapshot_from_value(&raw, Utc::now())),
            Err(e) => warn!(user = user.0, error = %e, "payments/status failed; trying access/status"),
        }

        let raw = self.access_status(user).await?;
        Ok(snapshot_from_value(&raw, Utc::now()))
    }
}

fn transport(e: reqwest::Error) -> Error {
    Error::Api(format!("request error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use pomni_core::domain::AccessReason;

    const USER: UserId = UserId(777);

    fn client(server: &MockServer) -> ApiClient {
        ApiClient::from_base(server.base_url(), Duration::from_secs(2), None)
    }

    fn future_iso(days: i64) -> String {
        (Utc::now() + chrono::Duration::days(days)).to_rfc3339()
    }

    fn past_iso(days: i64) -> String {
        (Utc::now() - chrono::Duration::days(days)).to_rfc3339()
    }

    #[tokio::test]
    async fn fetch_status_prefers_payments_endpoint() {
        let server = MockServer::start_async().await;
        let payments = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/payments/status")
                    .query_param("tg_user_id", "777");
                then.status(200).json_body(serde_json::json!({
                    "has_access": true,
                    "status": "active",
                    "until": future_iso(30),
                    "plan": "month",
                }));
            })
            .await;

        let snap = client(&server).fetch_status(USER, false).await.unwrap();
        payments.assert_async().await;
        assert!(snap.has_access);
        assert_eq!(snap.reason, AccessReason::Subscription);
        assert_eq!(snap.plan, Some(PlanCode::Month));
    }

    #[tokio::test]
    async fn fetch_status_falls_back_to_legacy_endpoint() {
        let server = MockServer::start_async().await;
        let payments = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/payments/status");
                then.status(500);
            })
            .await;
        let access = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/access/status")
                    .query_param("tg_user_id", "777");
                then.status(200).json_body(serde_json::json!({
                    "trial_started_at": past_iso(1),
                    "subscription_until": null,
                }));
            })
            .await;

        let snap = client(&server).fetch_status(USER, false).await.unwrap();
        assert_eq!(payments.hits_async().await, 1);
        assert_eq!(access.hits_async().await, 1);
        assert!(snap.has_access);
        assert_eq!(snap.reason, AccessReason::Trial);
    }

    #[tokio::test]
    async fn fetch_status_errors_when_both_endpoints_fail() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/payments/status");
                then.status(502);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/access/status");
                then.status(502);
            })
            .await;

        let err = client(&server).fetch_status(USER, false).await.unwrap_err();
        assert!(matches!(err, Error::Api(_)));
    }

    #[tokio::test]
    async fn start_trial_hint_is_passed_through() {
        let server = MockServer::start_async().await;
        let payments = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/payments/status")
                    .query_param("tg_user_id", "777")
                    .query_param("start_trial", "1");
                then.status(200).json_body(serde_json::json!({
                    "status": "trial",
                    "until": future_iso(5),
                }));
            })
            .await;

        let snap = client(&server).fetch_status(USER, true).await.unwrap();
        payments.assert_async().await;
        assert_eq!(snap.reason, AccessReason::Trial);
    }

    #[tokio::test]
    async fn accept_policy_maps_404_to_distinct_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/access/accept");
                then.status(404);
            })
            .await;

        let err = client(&server).accept_policy(USER).await.unwrap_err();
        assert!(matches!(err, Error::AcceptUnavailable));
    }

    #[tokio::test]
    async fn accept_policy_succeeds_on_204() {
        let server = MockServer::start_async().await;
        let accept = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/access/accept")
                    .json_body(serde_json::json!({ "tg_user_id": 777 }));
                then.status(204);
            })
            .await;

        client(&server).accept_policy(USER).await.unwrap();
        accept.assert_async().await;
    }

    #[tokio::test]
    async fn create_payment_link_returns_confirmation_url() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/payments/yookassa/create")
                    .json_body_partial(
                        serde_json::json!({ "user_id": 777, "plan": "quarter" }).to_string(),
                    );
                then.status(200).json_body(serde_json::json!({
                    "payment_id": "p-1",
                    "confirmation_url": "https://yookassa.example/confirm/p-1",
                }));
            })
            .await;

        let url = client(&server)
            .create_payment_link(USER, PlanCode::Quarter, "https://app.example/paywall?status=ok")
            .await
            .unwrap();
        assert_eq!(url, "https://yookassa.example/confirm/p-1");
    }

    #[tokio::test]
    async fn create_payment_link_rejects_body_without_url() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/payments/yookassa/create");
                then.status(200).json_body(serde_json::json!({ "payment_id": "p-2" }));
            })
            .await;

        let err = client(&server)
            .create_payment_link(USER, PlanCode::Week, "https://app.example/paywall")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Api(_)));
    }

    #[tokio::test]
    async fn check_access_parses_the_probe_response() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/access/check");
                then.status(200).json_body(serde_json::json!({
                    "ok": true,
                    "until": "2026-03-01T00:00:00Z",
                    "has_auto_renew": false,
                }));
            })
            .await;

        let check = client(&server).check_access(USER).await.unwrap();
        assert!(check.ok);
        assert!(check.until.is_some());
        assert_eq!(check.has_auto_renew, Some(false));
    }

    #[tokio::test]
    async fn track_event_swallows_failures() {
        let server = MockServer::start_async().await;
        let track = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/events/track");
                then.status(500);
            })
            .await;

        client(&server)
            .track_event(USER, "paywall_open", Some("view"), None)
            .await;
        track.assert_async().await;
    }

    #[tokio::test]
    async fn init_data_blob_is_sent_as_header() {
        let server = MockServer::start_async().await;
        let payments = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/payments/status")
                    .header(INIT_DATA_HEADER, "signed-blob");
                then.status(200).json_body(serde_json::json!({ "status": "none" }));
            })
            .await;

        let api = ApiClient::from_base(
            server.base_url(),
            Duration::from_secs(2),
            Some("signed-blob".to_string()),
        );
        let snap = api.fetch_status(USER, false).await.unwrap();
        payments.assert_async().await;
        assert!(!snap.has_access);
    }
}
