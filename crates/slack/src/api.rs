//! Slack Web API access used for replies and connectivity checks.

use std::time::Duration;

use async_trait::async_trait;
use parley_core::config::SlackConfig;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, RETRY_AFTER, USER_AGENT};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

const CLIENT_USER_AGENT: &str = concat!("parley/", env!("CARGO_PKG_VERSION"));
const ERROR_BODY_LIMIT: usize = 400;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Zero-based attempt counter sent with every Web API call.
pub const RETRY_ATTEMPT_HEADER: &str = "x-parley-retry-attempt";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SlackApiError {
    #[error("could not build slack http client: {0}")]
    Client(String),
    #[error("slack api `{method}` transport failure: {message}")]
    Transport { method: &'static str, message: String },
    #[error("slack api `{method}` answered http {status}: {body}")]
    Status { method: &'static str, status: u16, body: String },
    #[error("slack api `{method}` returned an unreadable body: {message}")]
    Decode { method: &'static str, message: String },
    #[error("slack api error `{0}`")]
    Api(String),
}

/// Fields of a `chat.postMessage` call.
///
/// Kept as a JSON object so custom bot payloads can carry any field Slack accepts.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PostMessageRequest {
    fields: Map<String, Value>,
}

impl PostMessageRequest {
    pub fn new(channel: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("channel".to_owned(), Value::String(channel.into()));
        fields.insert("as_user".to_owned(), Value::Bool(true));
        Self { fields }
    }

    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_owned(), value.into());
        self
    }

    pub fn fields_from(mut self, fields: Map<String, Value>) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn thread_ts(self, thread_ts: Option<&str>) -> Self {
        match thread_ts {
            Some(thread_ts) => self.field("thread_ts", thread_ts),
            None => self,
        }
    }

    pub fn channel(&self) -> Option<&str> {
        self.fields.get("channel").and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostedMessage {
    pub channel: String,
    pub ts: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthIdentity {
    pub user_id: String,
    pub team: Option<String>,
    pub bot_id: Option<String>,
    pub url: Option<String>,
}

#[async_trait]
pub trait SlackApi: Send + Sync {
    async fn post_message(&self, request: PostMessageRequest) -> Result<PostedMessage, SlackApiError>;
    async fn auth_test(&self) -> Result<AuthIdentity, SlackApiError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiRetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ApiRetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ApiRetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    ///
    /// Slack's `Retry-After` replaces the backoff when present; both are capped at `max_delay_ms`.
    pub fn delay(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        let cap = Duration::from_millis(self.max_delay_ms);
        if let Some(retry_after_secs) = retry_after_secs {
            return Duration::from_secs(retry_after_secs).min(cap);
        }
        let exponent = attempt.saturating_sub(1).min(16);
        let delay_ms = self.base_delay_ms.max(1).saturating_mul(1_u64 << exponent);
        Duration::from_millis(delay_ms).min(cap)
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    team: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl ApiResponse {
    fn into_result(self) -> Result<Self, SlackApiError> {
        if self.ok {
            Ok(self)
        } else {
            Err(SlackApiError::Api(self.error.unwrap_or_else(|| "unknown_error".to_owned())))
        }
    }
}

pub struct HttpSlackApi {
    http: reqwest::Client,
    base_url: String,
    token: SecretString,
    retry: ApiRetryPolicy,
}

impl HttpSlackApi {
    pub fn new(
        token: SecretString,
        base_url: &str,
        proxy: Option<&str>,
        timeout: Duration,
        retry: ApiRetryPolicy,
    ) -> Result<Self, SlackApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let mut builder = reqwest::Client::builder().default_headers(headers).timeout(timeout);
        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|error| SlackApiError::Client(format!("invalid proxy `{proxy}`: {error}")))?;
            builder = builder.proxy(proxy);
        }
        let http = builder.build().map_err(|error| SlackApiError::Client(error.to_string()))?;

        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_owned(), token, retry })
    }

    pub fn from_config(config: &SlackConfig) -> Result<Self, SlackApiError> {
        Self::new(
            config.slack_token.clone(),
            &config.api_base_url,
            config.proxy.as_deref(),
            DEFAULT_TIMEOUT,
            ApiRetryPolicy::default(),
        )
    }

    async fn call<T, B>(&self, method: &'static str, body: Option<&B>) -> Result<T, SlackApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = format!("{}/{method}", self.base_url);
        let mut attempt = 0_u32;
        loop {
            attempt = attempt.saturating_add(1);
            let mut request = self
                .http
                .post(&url)
                .bearer_auth(self.token.expose_secret())
                .header(RETRY_ATTEMPT_HEADER, (attempt - 1).to_string());
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<T>().await.map_err(|error| SlackApiError::Decode {
                            method,
                            message: error.to_string(),
                        });
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt < self.retry.max_attempts && is_retryable_status(status.as_u16()) {
                        let delay = self.retry.delay(attempt, retry_after);
                        warn!(
                            event_name = "slack.api.retry",
                            method,
                            attempt,
                            status = status.as_u16(),
                            delay_ms = delay.as_millis() as u64,
                            "slack api call failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    return Err(SlackApiError::Status {
                        method,
                        status: status.as_u16(),
                        body: truncate(&body, ERROR_BODY_LIMIT),
                    });
                }
                Err(error) => {
                    let retryable = error.is_timeout() || error.is_connect();
                    if attempt < self.retry.max_attempts && retryable {
                        let delay = self.retry.delay(attempt, None);
                        warn!(
                            event_name = "slack.api.retry",
                            method,
                            attempt,
                            error = %error,
                            delay_ms = delay.as_millis() as u64,
                            "slack api transport failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(SlackApiError::Transport { method, message: error.to_string() });
                }
            }
        }
    }
}

#[async_trait]
impl SlackApi for HttpSlackApi {
    async fn post_message(&self, request: PostMessageRequest) -> Result<PostedMessage, SlackApiError> {
        let response: ApiResponse = self.call("chat.postMessage", Some(&request)).await?;
        let response = response.into_result()?;
        debug!(
            event_name = "slack.api.message_posted",
            channel = response.channel.as_deref().unwrap_or_default(),
            ts = response.ts.as_deref().unwrap_or_default(),
            "posted slack message"
        );

        Ok(PostedMessage {
            channel: response
                .channel
                .or_else(|| request.channel().map(str::to_owned))
                .unwrap_or_default(),
            ts: response.ts,
        })
    }

    async fn auth_test(&self) -> Result<AuthIdentity, SlackApiError> {
        let response: ApiResponse = self.call::<_, Value>("auth.test", None).await?;
        let response = response.into_result()?;
        let user_id = response
            .user_id
            .filter(|user_id| !user_id.trim().is_empty())
            .ok_or_else(|| SlackApiError::Decode {
                method: "auth.test",
                message: "response is missing `user_id`".to_owned(),
            })?;

        Ok(AuthIdentity { user_id, team: response.team, bot_id: response.bot_id, url: response.url })
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_owned();
    }
    let mut truncated: String = value.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use httpmock::prelude::*;
    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
    use serde_json::json;

    use super::{
        is_retryable_status, parse_retry_after, truncate, ApiResponse, ApiRetryPolicy, HttpSlackApi,
        PostMessageRequest, SlackApi, SlackApiError, RETRY_ATTEMPT_HEADER,
    };

    fn mock_client(server: &MockServer) -> HttpSlackApi {
        HttpSlackApi::new(
            "xoxb-test".to_owned().into(),
            &server.base_url(),
            None,
            Duration::from_secs(2),
            ApiRetryPolicy { max_attempts: 3, base_delay_ms: 1, max_delay_ms: 10 },
        )
        .expect("client")
    }

    #[test]
    fn post_message_request_defaults_and_threading() {
        let request = PostMessageRequest::new("C1").field("text", "hi").thread_ts(Some("1.0"));

        assert_eq!(
            serde_json::to_value(&request).expect("serialize"),
            json!({"channel": "C1", "as_user": true, "text": "hi", "thread_ts": "1.0"})
        );
        assert_eq!(request.channel(), Some("C1"));

        let unthreaded = PostMessageRequest::new("C1").thread_ts(None);
        assert!(unthreaded.get("thread_ts").is_none());
    }

    #[test]
    fn retry_policy_backs_off_exponentially_and_honors_retry_after() {
        let policy = ApiRetryPolicy::default();
        assert_eq!(policy.delay(1, None), Duration::from_millis(250));
        assert_eq!(policy.delay(2, None), Duration::from_millis(500));
        assert_eq!(policy.delay(3, None), Duration::from_millis(1_000));
        assert_eq!(policy.delay(30, None), Duration::from_millis(5_000));
        assert_eq!(policy.delay(1, Some(2)), Duration::from_secs(2));
    }

    #[test]
    fn retry_after_is_capped_by_max_delay() {
        let policy = ApiRetryPolicy::default();
        assert_eq!(policy.delay(1, Some(86_400)), Duration::from_millis(5_000));
        assert_eq!(policy.delay(1, Some(0)), Duration::ZERO);
    }

    #[test]
    fn only_rate_limits_and_server_errors_are_retried() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(404));
    }

    #[test]
    fn retry_after_header_is_parsed_as_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static(" 12 "));
        assert_eq!(parse_retry_after(&headers), Some(12));
    }

    #[test]
    fn api_errors_surface_slack_error_code() {
        let response: ApiResponse =
            serde_json::from_value(json!({"ok": false, "error": "channel_not_found"})).expect("decode");
        assert_eq!(response.into_result().err(), Some(SlackApiError::Api("channel_not_found".to_owned())));

        let response: ApiResponse = serde_json::from_value(json!({"ok": false})).expect("decode");
        assert_eq!(response.into_result().err(), Some(SlackApiError::Api("unknown_error".to_owned())));
    }

    #[test]
    fn client_accepts_http_proxy_and_rejects_garbage() {
        let ok = HttpSlackApi::new(
            "xoxb-test".to_owned().into(),
            "https://slack.com/api/",
            Some("http://proxy.internal:3128"),
            Duration::from_secs(5),
            ApiRetryPolicy::default(),
        );
        assert!(ok.is_ok());
        assert_eq!(ok.map(|api| api.base_url).ok().as_deref(), Some("https://slack.com/api"));

        let bad = HttpSlackApi::new(
            "xoxb-test".to_owned().into(),
            "https://slack.com/api",
            Some("http://[::1"),
            Duration::from_secs(5),
            ApiRetryPolicy::default(),
        );
        assert!(matches!(bad, Err(SlackApiError::Client(_))));
    }

    #[tokio::test]
    async fn post_message_retries_rate_limit_then_succeeds() {
        let server = MockServer::start_async().await;
        let limited = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat.postMessage")
                    .header("authorization", "Bearer xoxb-test")
                    .header(RETRY_ATTEMPT_HEADER, "0");
                then.status(429).header("retry-after", "0").body("rate limited");
            })
            .await;
        let accepted = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat.postMessage").header(RETRY_ATTEMPT_HEADER, "1");
                then.status(200).json_body(json!({"ok": true, "channel": "C1", "ts": "1.2"}));
            })
            .await;

        let posted = mock_client(&server)
            .post_message(PostMessageRequest::new("C1").field("text", "hello"))
            .await
            .expect("post eventually succeeds");

        assert_eq!(posted.channel, "C1");
        assert_eq!(posted.ts.as_deref(), Some("1.2"));
        assert_eq!(limited.calls_async().await, 1);
        assert_eq!(accepted.calls_async().await, 1);
    }

    #[tokio::test]
    async fn post_message_gives_up_after_max_attempts() {
        let server = MockServer::start_async().await;
        let unavailable = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat.postMessage");
                then.status(503).body("upstream down");
            })
            .await;

        let result = mock_client(&server).post_message(PostMessageRequest::new("C1")).await;

        assert_eq!(
            result,
            Err(SlackApiError::Status {
                method: "chat.postMessage",
                status: 503,
                body: "upstream down".to_owned()
            })
        );
        assert_eq!(unavailable.calls_async().await, 3);
    }

    #[tokio::test]
    async fn slack_error_payload_is_not_retried() {
        let server = MockServer::start_async().await;
        let rejected = server
            .mock_async(|when, then| {
                when.method(POST).path("/chat.postMessage");
                then.status(200).json_body(json!({"ok": false, "error": "channel_not_found"}));
            })
            .await;

        let result = mock_client(&server).post_message(PostMessageRequest::new("CMISSING")).await;

        assert_eq!(result, Err(SlackApiError::Api("channel_not_found".to_owned())));
        assert_eq!(rejected.calls_async().await, 1);
    }

    #[tokio::test]
    async fn auth_test_reads_bot_identity() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/auth.test");
                then.status(200).json_body(json!({
                    "ok": true, "user_id": "UBOT", "team": "Acme", "bot_id": "B1",
                    "url": "https://acme.slack.com/"
                }));
            })
            .await;

        let identity = mock_client(&server).auth_test().await.expect("auth");

        assert_eq!(identity.user_id, "UBOT");
        assert_eq!(identity.team.as_deref(), Some("Acme"));
        assert_eq!(identity.bot_id.as_deref(), Some("B1"));
    }

    #[test]
    fn truncate_limits_error_bodies() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
