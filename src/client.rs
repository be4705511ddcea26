//! Minimal client for the appliance cloud API.
//!
//! - Only the three endpoints needed to provision LAN credentials:
//!   login id lookup, login and token/key lookup by udpid.
//! - Every request is signed with a fresh nonce; requests are serialized by a
//!   single lock held from signing until the response has been parsed.
//! - Timeouts are retried, every other failure is returned immediately.

use crate::security::{CryptoError, Security, SecurityConfig};
use crate::utils::{stamp, token_hex, token_urlsafe};
use async_trait::async_trait;
use http::StatusCode;
use log::{debug, info, warn};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

pub const BASE_URL: &str = "https://mp-prod.appsmb.com";
pub const BASE_URL_CHINA: &str = "https://mp-prod.smartmidea.net";

/// Shared account usable when the caller has none of their own.
pub const DEFAULT_ACCOUNT: &str = "midea_is_best@outlook.com";
pub const DEFAULT_PASSWORD: &str = "lo8hd3ak";

pub const RETRIES: u32 = 3;
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

const CLIENT_TYPE: u8 = 1;
const FORMAT: u8 = 2;
const LANGUAGE: &str = "en_US";
const APP_ID: &str = "1010";
const SRC: &str = "1010";
const DEVICE_ID: &str = "c1acad8939ac0d7d";

// =====================
// HTTP seam
// =====================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request timed out")]
    Timeout,
    #[error("{0}")]
    Transport(String),
}

/// POST-only HTTP client. Non-2xx statuses are returned as responses, not errors.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn post(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// Blocking `ureq` agent driven from the blocking thread pool.
#[derive(Debug, Clone)]
pub struct UreqHttpClient {
    agent: ureq::Agent,
}

impl UreqHttpClient {
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        UreqHttpClient {
            agent: ureq::Agent::new_with_config(config),
        }
    }
}

impl Default for UreqHttpClient {
    fn default() -> Self {
        Self::new(DEFAULT_HTTP_TIMEOUT)
    }
}

fn map_ureq_error(e: ureq::Error) -> HttpError {
    match e {
        ureq::Error::Timeout(_) => HttpError::Timeout,
        ureq::Error::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => HttpError::Timeout,
        other => HttpError::Transport(other.to_string()),
    }
}

#[async_trait]
impl HttpClient for UreqHttpClient {
    async fn post(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || {
            let mut req = agent.post(&request.url);
            for (key, value) in &request.headers {
                req = req.header(key, value);
            }
            let mut response = req.send(&request.body[..]).map_err(map_ureq_error)?;
            let status = response.status();
            let body = response.body_mut().read_to_vec().map_err(map_ureq_error)?;
            Ok(HttpResponse { status, body })
        })
        .await
        .map_err(|e| HttpError::Transport(e.to_string()))?
    }
}

// =====================
// Cloud API
// =====================

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("api error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("request timed out after {0} attempts")]
    Timeout(u32),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },
    #[error("json error: {0}")]
    Json(#[from] serde_path_to_error::Error<serde_json::Error>),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CloudServer {
    /// Global, unless `USE_CHINA_SERVER=1` is set in the environment.
    #[default]
    Auto,
    Global,
    China,
    Custom(String),
}

impl CloudServer {
    pub fn base_url(&self) -> String {
        match self {
            CloudServer::Auto => {
                if std::env::var("USE_CHINA_SERVER").is_ok_and(|v| v.trim() == "1") {
                    BASE_URL_CHINA.to_string()
                } else {
                    BASE_URL.to_string()
                }
            }
            CloudServer::Global => BASE_URL.to_string(),
            CloudServer::China => BASE_URL_CHINA.to_string(),
            CloudServer::Custom(url) => url.trim_end_matches('/').to_string(),
        }
    }
}

/// Token/key pair as issued by the cloud, both hex encoded.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct TokenKey {
    pub token: String,
    pub key: String,
}

impl core::fmt::Debug for TokenKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenKey").finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ApiCode {
    Number(i64),
    Text(String),
}

#[derive(Deserialize)]
struct ApiEnvelope {
    code: ApiCode,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct LoginIdData {
    #[serde(rename = "loginId")]
    login_id: String,
}

#[derive(Deserialize)]
struct LoginData {
    mdata: LoginMdata,
}

#[derive(Deserialize)]
struct LoginMdata {
    #[serde(rename = "accessToken")]
    access_token: String,
}

#[derive(Deserialize)]
struct TokenEntry {
    #[serde(rename = "udpId")]
    udp_id: String,
    #[serde(flatten)]
    token_key: TokenKey,
}

#[derive(Deserialize)]
struct TokenListData {
    tokenlist: Vec<TokenEntry>,
}

#[derive(Debug, Default)]
struct CloudSession {
    login_id: Option<String>,
    session: Option<Value>,
    access_token: String,
}

pub struct Cloud {
    http: Arc<dyn HttpClient>,
    security: Security,
    base_url: String,
    account: String,
    password: String,
    retries: u32,
    /// Held for the whole of every API call.
    session: Mutex<CloudSession>,
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, CloudError> {
    Ok(serde_path_to_error::deserialize(value)?)
}

impl Cloud {
    pub fn new(
        account: impl Into<String>,
        password: impl Into<String>,
        server: CloudServer,
        http: Arc<dyn HttpClient>,
    ) -> Self {
        let base_url = server.base_url();
        info!("Using cloud server {} ({:?})", base_url, server);
        Cloud {
            http,
            security: Security::default(),
            base_url,
            account: account.into(),
            password: password.into(),
            retries: RETRIES,
            session: Mutex::new(CloudSession::default()),
        }
    }

    pub fn with_security(mut self, config: SecurityConfig) -> Self {
        self.security = Security::new(config);
        self
    }

    /// Attempts per request when the server times out. Zero is treated as one.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn logged_in(&self) -> bool {
        self.session.lock().await.session.is_some()
    }

    /// Raw login response of the current session.
    pub async fn session(&self) -> Option<Value> {
        self.session.lock().await.session.clone()
    }

    /// Common request fields merged with `data`; `data` wins on conflicts.
    fn build_request_body(data: Value) -> Value {
        let mut body = Map::new();
        body.insert("appId".into(), json!(APP_ID));
        body.insert("format".into(), json!(FORMAT));
        body.insert("clientType".into(), json!(CLIENT_TYPE));
        body.insert("language".into(), json!(LANGUAGE));
        body.insert("src".into(), json!(SRC));
        body.insert("stamp".into(), json!(stamp()));
        body.insert("deviceId".into(), json!(DEVICE_ID));
        body.insert("reqId".into(), json!(token_hex(16)));
        if let Value::Object(extra) = data {
            body.extend(extra);
        }
        Value::Object(body)
    }

    fn parse_response(body: &[u8]) -> Result<Value, CloudError> {
        debug!("API response: {}", String::from_utf8_lossy(body));
        let envelope: ApiEnvelope = serde_path_to_error::deserialize(&mut serde_json::Deserializer::from_slice(body))?;
        let code = match envelope.code {
            ApiCode::Number(n) => n,
            ApiCode::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| CloudError::Malformed(format!("non-numeric code {:?}", s)))?,
        };
        if code == 0 {
            Ok(envelope.data)
        } else {
            Err(CloudError::Api {
                code,
                message: envelope.msg,
            })
        }
    }

    async fn post_request(&self, request: HttpRequest) -> Result<Value, CloudError> {
        for attempt in 1..=self.retries {
            match self.http.post(request.clone()).await {
                Ok(response) if response.status.is_success() => return Self::parse_response(&response.body),
                Ok(response) => {
                    return Err(CloudError::Http {
                        status: response.status.as_u16(),
                        message: String::from_utf8_lossy(&response.body).into_owned(),
                    });
                }
                Err(HttpError::Timeout) => {
                    warn!("Request to {} timed out (attempt {}/{})", request.url, attempt, self.retries);
                }
                Err(HttpError::Transport(e)) => return Err(CloudError::Transport(e)),
            }
        }
        Err(CloudError::Timeout(self.retries))
    }

    /// Sign and send one request. The caller holds the session lock.
    async fn api_request(&self, session: &CloudSession, endpoint: &str, body: &Value) -> Result<Value, CloudError> {
        let contents = serde_json::to_string(body).map_err(|e| CloudError::Malformed(e.to_string()))?;
        let random = token_hex(16);
        let sign = self.security.sign(&contents, &random)?;

        let request = HttpRequest {
            url: format!("{}/mas/v5/app/proxy?alias={}", self.base_url, endpoint),
            headers: vec![
                ("Content-Type".into(), "application/json".into()),
                ("secretVersion".into(), "1".into()),
                ("sign".into(), sign),
                ("random".into(), random),
                ("accessToken".into(), session.access_token.clone()),
            ],
            body: contents.into_bytes(),
        };
        self.post_request(request).await
    }

    /// Log in unless a session exists already, or always when `force` is set.
    pub async fn login(&self, force: bool) -> Result<(), CloudError> {
        let mut session = self.session.lock().await;
        if session.session.is_some() && !force {
            return Ok(());
        }

        let login_id = match session.login_id.clone() {
            Some(id) => id,
            None => {
                let body = Self::build_request_body(json!({ "loginAccount": self.account }));
                let data: LoginIdData = decode(self.api_request(&session, "/v1/user/login/id/get", &body).await?)?;
                debug!("Received login id {}", data.login_id);
                session.login_id = Some(data.login_id.clone());
                data.login_id
            }
        };

        let body = json!({
            "data": {
                "platform": FORMAT,
                "deviceId": DEVICE_ID,
            },
            "iotData": {
                "appId": APP_ID,
                "clientType": CLIENT_TYPE,
                "iampwd": self.security.encrypt_iam_password(&self.password),
                "loginAccount": self.account,
                "password": self.security.encrypt_password(&login_id, &self.password),
                "pushToken": token_urlsafe(120),
                "reqId": token_hex(16),
                "src": SRC,
                "stamp": stamp(),
            },
        });
        let response = self.api_request(&session, "/mj/user/login", &body).await?;
        let login: LoginData = decode(response.clone())?;

        session.access_token = login.mdata.access_token;
        session.session = Some(response);
        info!("Logged in to cloud as {}", self.account);
        Ok(())
    }

    /// Look up the LAN token/key pair for a device by its udpid.
    /// Returns `Ok(None)` when the account has no entry for it.
    pub async fn get_token(&self, udpid: &str) -> Result<Option<TokenKey>, CloudError> {
        let session = self.session.lock().await;
        let body = Self::build_request_body(json!({ "udpid": udpid }));
        let data: TokenListData = decode(self.api_request(&session, "/v1/iot/secure/getToken", &body).await?)?;

        Ok(data
            .tokenlist
            .into_iter()
            .find(|entry| entry.udp_id == udpid)
            .map(|entry| entry.token_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashSet, VecDeque};
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Reply = Result<(u16, Value), HttpError>;

    #[derive(Default)]
    struct MockHttp {
        replies: StdMutex<VecDeque<Reply>>,
        requests: StdMutex<Vec<HttpRequest>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delay: Duration,
    }

    impl MockHttp {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(MockHttp {
                replies: StdMutex::new(replies.into()),
                ..MockHttp::default()
            })
        }

        fn slow(replies: Vec<Reply>, delay: Duration) -> Arc<Self> {
            Arc::new(MockHttp {
                replies: StdMutex::new(replies.into()),
                delay,
                ..MockHttp::default()
            })
        }

        fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }

        fn bodies(&self) -> Vec<Value> {
            self.requests()
                .iter()
                .map(|r| serde_json::from_slice(&r.body).unwrap())
                .collect()
        }
    }

    #[async_trait]
    impl HttpClient for MockHttp {
        async fn post(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(HttpError::Transport("no scripted reply".into())));
            reply.map(|(status, body)| HttpResponse {
                status: StatusCode::from_u16(status).unwrap(),
                body: serde_json::to_vec(&body).unwrap(),
            })
        }
    }

    fn ok(data: Value) -> Reply {
        Ok((200, json!({ "code": 0, "msg": "ok", "data": data })))
    }

    fn login_replies() -> Vec<Reply> {
        vec![
            ok(json!({ "loginId": "abc-login" })),
            ok(json!({ "mdata": { "accessToken": "T0KEN" }, "userId": 7 })),
        ]
    }

    fn token_reply() -> Reply {
        ok(json!({
            "tokenlist": [
                { "udpId": "ffff", "token": "00", "key": "11" },
                { "udpId": "8d212e5cb95e26c7434bcd873ee730ab", "token": "aa", "key": "bb" },
            ]
        }))
    }

    fn cloud(http: Arc<MockHttp>) -> Cloud {
        Cloud::new("user@example.com", "hunter2", CloudServer::Global, http)
    }

    #[tokio::test]
    async fn requests_are_signed_with_fresh_nonces() {
        const N: usize = 16;
        let http = MockHttp::new((0..N).map(|_| token_reply()).collect());
        let cloud = cloud(http.clone());
        for _ in 0..N {
            cloud.get_token("x").await.unwrap();
        }

        let requests = http.requests();
        assert_eq!(requests.len(), N);
        let security = Security::default();
        for r in &requests {
            assert_eq!(r.url, format!("{}/mas/v5/app/proxy?alias=/v1/iot/secure/getToken", BASE_URL));
            assert_eq!(r.header("Content-Type"), Some("application/json"));
            assert_eq!(r.header("secretVersion"), Some("1"));
            assert_eq!(r.header("accessToken"), Some(""));
            let random = r.header("random").unwrap();
            assert_eq!(random.len(), 32);
            let body = std::str::from_utf8(&r.body).unwrap();
            assert_eq!(r.header("sign").unwrap(), security.sign(body, random).unwrap());
        }
        let nonces: HashSet<&str> = requests.iter().filter_map(|r| r.header("random")).collect();
        assert_eq!(nonces.len(), N);

        let bodies = http.bodies();
        let req_ids: HashSet<String> = bodies.iter().map(|b| b["reqId"].to_string()).collect();
        assert_eq!(req_ids.len(), N);
        for body in &bodies {
            assert_eq!(body["appId"], "1010");
            assert_eq!(body["format"], 2);
            assert_eq!(body["clientType"], 1);
            assert_eq!(body["language"], "en_US");
            assert_eq!(body["src"], "1010");
            assert_eq!(body["deviceId"], DEVICE_ID);
            assert_eq!(body["stamp"].as_str().unwrap().len(), 14);
            assert_eq!(body["udpid"], "x");
        }
    }

    #[tokio::test]
    async fn timeouts_are_retried_up_to_the_limit() {
        let http = MockHttp::new(vec![Err(HttpError::Timeout), Err(HttpError::Timeout), token_reply()]);
        let token = cloud(http.clone())
            .get_token("8d212e5cb95e26c7434bcd873ee730ab")
            .await
            .unwrap();
        assert_eq!(
            token,
            Some(TokenKey {
                token: "aa".into(),
                key: "bb".into()
            })
        );
        assert_eq!(http.requests().len(), 3);

        let http = MockHttp::new((0..5).map(|_| Err(HttpError::Timeout)).collect());
        let err = cloud(http.clone()).get_token("x").await.unwrap_err();
        assert!(matches!(err, CloudError::Timeout(3)));
        assert_eq!(http.requests().len(), 3);

        let http = MockHttp::new((0..5).map(|_| Err(HttpError::Timeout)).collect());
        let err = cloud(http.clone()).with_retries(0).get_token("x").await.unwrap_err();
        assert!(matches!(err, CloudError::Timeout(1)));
        assert_eq!(http.requests().len(), 1);
    }

    #[tokio::test]
    async fn other_failures_are_not_retried() {
        let http = MockHttp::new(vec![
            Ok((200, json!({ "code": "3102", "msg": "bad account" }))),
            Ok((500, json!({ "error": "boom" }))),
            Err(HttpError::Transport("refused".into())),
            Ok((200, json!({ "unexpected": true }))),
        ]);
        let cloud = cloud(http.clone());

        match cloud.get_token("x").await.unwrap_err() {
            CloudError::Api { code, message } => {
                assert_eq!(code, 3102);
                assert_eq!(message, "bad account");
            }
            e => panic!("unexpected {e}"),
        }
        assert!(matches!(cloud.get_token("x").await.unwrap_err(), CloudError::Http { status: 500, .. }));
        assert!(matches!(cloud.get_token("x").await.unwrap_err(), CloudError::Transport(_)));
        assert!(matches!(cloud.get_token("x").await.unwrap_err(), CloudError::Json(_)));
        assert_eq!(http.requests().len(), 4);
    }

    #[tokio::test]
    async fn string_code_zero_is_success() {
        let http = MockHttp::new(vec![Ok((200, json!({ "code": "0", "msg": "", "data": { "tokenlist": [] } })))]);
        assert_eq!(cloud(http).get_token("x").await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_requests_are_serialized() {
        let http = MockHttp::slow(vec![token_reply(), token_reply(), token_reply()], Duration::from_millis(20));
        let cloud = cloud(http.clone());

        let (a, b, c) = tokio::join!(cloud.get_token("x"), cloud.get_token("y"), cloud.get_token("z"));
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(http.requests().len(), 3);
        assert_eq!(http.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn requests_wait_for_a_login_in_progress() {
        // First login from scratch, then a forced re-login, each racing a token lookup.
        let mut replies = login_replies();
        replies.push(token_reply());
        replies.push(ok(json!({ "mdata": { "accessToken": "FRESH" } })));
        replies.push(token_reply());
        let http = MockHttp::slow(replies, Duration::from_millis(20));
        let cloud = cloud(http.clone());

        let (login, token) = tokio::join!(cloud.login(false), cloud.get_token("x"));
        assert!(login.is_ok() && token.is_ok());
        let requests = http.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[1].url.ends_with("alias=/mj/user/login"));
        assert_eq!(requests[2].header("accessToken"), Some("T0KEN"));

        let (login, token) = tokio::join!(cloud.login(true), cloud.get_token("x"));
        assert!(login.is_ok() && token.is_ok());
        let requests = http.requests();
        assert_eq!(requests.len(), 5);
        assert!(requests[3].url.ends_with("alias=/mj/user/login"));
        assert_eq!(requests[3].header("accessToken"), Some("T0KEN"));
        assert!(requests[4].url.ends_with("alias=/v1/iot/secure/getToken"));
        assert_eq!(requests[4].header("accessToken"), Some("FRESH"));

        assert_eq!(http.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn login_flow_and_idempotence() {
        let mut replies = login_replies();
        replies.push(ok(json!({ "mdata": { "accessToken": "SECOND" } })));
        replies.push(ok(json!({ "mdata": { "accessToken": "THIRD" } })));
        replies.push(token_reply());
        let http = MockHttp::new(replies);
        let cloud = cloud(http.clone());

        assert!(!cloud.logged_in().await);
        cloud.login(false).await.unwrap();
        cloud.login(false).await.unwrap();
        assert!(cloud.logged_in().await);
        assert_eq!(http.requests().len(), 2);
        assert_eq!(cloud.session().await.unwrap()["userId"], 7);

        let bodies = http.bodies();
        assert_eq!(bodies[0]["loginAccount"], "user@example.com");
        let iot = &bodies[1]["iotData"];
        let security = Security::default();
        assert_eq!(bodies[1]["data"]["platform"], 2);
        assert_eq!(iot["loginAccount"], "user@example.com");
        assert_eq!(iot["password"], security.encrypt_password("abc-login", "hunter2"));
        assert_eq!(iot["iampwd"], security.encrypt_iam_password("hunter2"));
        assert_eq!(iot["pushToken"].as_str().unwrap().len(), 160);
        assert!(http.requests()[1].url.ends_with("alias=/mj/user/login"));

        // Forced login reuses the cached login id.
        cloud.login(true).await.unwrap();
        assert_eq!(http.requests().len(), 3);
        assert_eq!(http.requests()[2].header("accessToken"), Some("T0KEN"));
        cloud.login(true).await.unwrap();
        assert_eq!(http.requests().len(), 4);

        cloud.get_token("x").await.unwrap();
        assert_eq!(http.requests()[4].header("accessToken"), Some("THIRD"));
    }

    #[tokio::test]
    async fn failed_login_leaves_no_session() {
        let http = MockHttp::new(vec![
            ok(json!({ "loginId": "abc-login" })),
            Ok((200, json!({ "code": 1, "msg": "wrong password" }))),
        ]);
        let cloud = cloud(http);
        assert!(matches!(cloud.login(false).await, Err(CloudError::Api { code: 1, .. })));
        assert!(!cloud.logged_in().await);
    }

    #[tokio::test]
    async fn unknown_udpid_is_none() {
        let http = MockHttp::new(vec![token_reply()]);
        assert_eq!(cloud(http).get_token("0000").await.unwrap(), None);
    }

    #[test]
    fn server_selection() {
        assert_eq!(CloudServer::Global.base_url(), BASE_URL);
        assert_eq!(CloudServer::China.base_url(), BASE_URL_CHINA);
        assert_eq!(
            CloudServer::Custom("http://localhost:8080/".into()).base_url(),
            "http://localhost:8080"
        );
    }

    #[test]
    fn request_body_fields_can_be_overridden() {
        let body = Cloud::build_request_body(json!({ "loginAccount": "a", "src": "99" }));
        assert_eq!(body["loginAccount"], "a");
        assert_eq!(body["src"], "99");
        assert_eq!(body["appId"], APP_ID);
    }
}
