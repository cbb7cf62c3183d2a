use std::env;
use std::sync::Mutex;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;

use crate::error::PlanetError;
use crate::markup::redirect_target;

pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Remote article store. Methods take `&self` so one logged-in client can be
/// shared by every worker.
pub trait DocumentStore: Sync {
    /// Article body, or `None` when the article does not exist.
    fn fetch(&self, id: &str) -> Result<Option<String>>;
    fn save(&self, id: &str, body: &str, comment: &str) -> Result<()>;
    fn upload_asset(&self, name: &str, bytes: &[u8], comment: &str) -> Result<()>;
    /// Embedded metadata of an uploaded file, or `None` when it does not exist.
    fn asset_metadata(&self, name: &str) -> Result<Option<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDocument {
    pub id: String,
    pub body: String,
    pub hops: usize,
}

/// Fetch `id`, following `#REDIRECT` chains for at most `max_hops` hops.
/// `Ok(None)` means some article along the chain does not exist.
pub fn resolve_document<S: DocumentStore + ?Sized>(
    store: &S,
    id: &str,
    max_hops: usize,
) -> std::result::Result<Option<ResolvedDocument>, PlanetError> {
    let mut current = id.to_string();
    let mut hops = 0usize;
    loop {
        let body = store
            .fetch(&current)
            .map_err(|error| PlanetError::remote(format!("failed to fetch {current}"), error))?;
        let Some(body) = body else {
            return Ok(None);
        };
        let Some(target) = redirect_target(&body) else {
            return Ok(Some(ResolvedDocument {
                id: current,
                body,
                hops,
            }));
        };
        if hops >= max_hops {
            return Err(PlanetError::RedirectLoop {
                start: id.to_string(),
                limit: max_hops,
            });
        }
        log::info!("  Redirect from {current} to {target}");
        current = target;
        hops += 1;
    }
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &crate::config::ToolConfig) -> Self {
        Self {
            api_url: config.api_url(),
            user_agent: config.user_agent(),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("WIKI_RATE_LIMIT_READ", 300),
            rate_limit_write_ms: env_value_u64("WIKI_RATE_LIMIT_WRITE", 1_000),
            max_retries: env_value_usize("WIKI_HTTP_RETRIES", 2),
            max_write_retries: env_value_usize("WIKI_HTTP_WRITE_RETRIES", 1),
            retry_delay_ms: env_value_u64("WIKI_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

#[derive(Debug, Default)]
struct ClientState {
    last_request_at: Option<Instant>,
    request_count: usize,
    csrf_token: Option<String>,
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    state: Mutex<ClientState>,
}

enum RequestBody<'a> {
    Query,
    Form,
    Upload { file_name: &'a str, bytes: &'a [u8] },
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        if config.api_url.trim().is_empty() {
            bail!("wiki api_url is not configured (set [wiki].api_url or WIKI_API_URL)");
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            state: Mutex::new(ClientState::default()),
        })
    }

    pub fn request_count(&self) -> usize {
        self.lock_state().request_count
    }

    pub fn login(&self, username: &str, password: &str) -> Result<()> {
        let token_response = self.request_json(
            &[
                ("action", "query".to_string()),
                ("meta", "tokens".to_string()),
                ("type", "login".to_string()),
            ],
            RequestBody::Query,
            false,
        )?;
        let token_payload: TokenQueryResponse = serde_json::from_value(token_response)
            .context("failed to decode login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki login token"))?;

        let login_response = self.request_json(
            &[
                ("action", "login".to_string()),
                ("lgname", username.to_string()),
                ("lgpassword", password.to_string()),
                ("lgtoken", login_token),
            ],
            RequestBody::Form,
            true,
        )?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => {
                self.lock_state().csrf_token = None;
                Ok(())
            }
            other => bail!(
                "MediaWiki login failed: {}",
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string())
            ),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ClientState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn request_json(
        &self,
        params: &[(&str, String)],
        body: RequestBody<'_>,
        is_write: bool,
    ) -> Result<Value> {
        let base_url = Url::parse(&self.config.api_url)
            .with_context(|| format!("invalid WIKI_API_URL: {}", self.config.api_url))?;
        let max_retries = if is_write {
            self.config.max_write_retries
        } else {
            self.config.max_retries
        };

        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        for (key, value) in params {
            if !value.is_empty() {
                pairs.push(((*key).to_string(), value.clone()));
            }
        }

        for attempt in 0..=max_retries {
            self.apply_rate_limit(is_write);
            let request = match &body {
                RequestBody::Query => self.client.get(base_url.clone()).query(&pairs),
                RequestBody::Form => self.client.post(base_url.clone()).form(&pairs),
                RequestBody::Upload { file_name, bytes } => {
                    let mut form = Form::new();
                    for (key, value) in &pairs {
                        form = form.text(key.clone(), value.clone());
                    }
                    let part = Part::bytes(bytes.to_vec())
                        .file_name(file_name.to_string())
                        .mime_str("image/svg+xml")
                        .context("invalid upload mime type")?;
                    self.client
                        .post(base_url.clone())
                        .multipart(form.part("file", part))
                }
            };
            let response = request
                .header("User-Agent", self.config.user_agent.clone())
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt, is_write);
                            continue;
                        }
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }

                    let payload: Value = response
                        .json()
                        .context("failed to decode MediaWiki API JSON response")?;
                    if let Some(error) = payload.get("error") {
                        let code = error
                            .get("code")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown_error");
                        let info = error
                            .get("info")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown info");
                        bail!("MediaWiki API error [{code}]: {info}");
                    }
                    return Ok(payload);
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, is_write);
                        continue;
                    }
                    return Err(error).context("failed to call MediaWiki API");
                }
            }
        }

        bail!("MediaWiki API request exhausted retry budget")
    }

    fn apply_rate_limit(&self, is_write: bool) {
        let delay = if is_write {
            Duration::from_millis(self.config.rate_limit_write_ms)
        } else {
            Duration::from_millis(self.config.rate_limit_read_ms)
        };
        // Holding the lock while sleeping spaces requests across workers too.
        let mut state = self.lock_state();
        if let Some(last) = state.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        state.last_request_at = Some(Instant::now());
        state.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize, is_write: bool) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        let multiplier = if is_write { 2u64 } else { 1u64 };
        sleep(Duration::from_millis(
            base.saturating_mul(multiplier).saturating_add(jitter),
        ));
    }

    fn ensure_csrf_token(&self) -> Result<String> {
        if let Some(token) = &self.lock_state().csrf_token {
            return Ok(token.clone());
        }
        let response = self.request_json(
            &[
                ("action", "query".to_string()),
                ("meta", "tokens".to_string()),
            ],
            RequestBody::Query,
            false,
        )?;
        let parsed: TokenQueryResponse =
            serde_json::from_value(response).context("failed to decode csrf token response")?;
        let token = parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki csrf token"))?;
        self.lock_state().csrf_token = Some(token.clone());
        Ok(token)
    }
}

impl DocumentStore for MediaWikiClient {
    fn fetch(&self, id: &str) -> Result<Option<String>> {
        let response = self.request_json(
            &[
                ("action", "query".to_string()),
                ("titles", id.to_string()),
                ("prop", "revisions".to_string()),
                ("rvprop", "content".to_string()),
                ("rvslots", "main".to_string()),
            ],
            RequestBody::Query,
            false,
        )?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .with_context(|| format!("failed to decode page content response for {id}"))?;

        let Some(page) = parsed.query.pages.into_iter().next() else {
            return Ok(None);
        };
        if page.missing.unwrap_or(false) || page.invalid.unwrap_or(false) {
            return Ok(None);
        }
        Ok(page
            .revisions
            .into_iter()
            .next()
            .and_then(|revision| revision.slots)
            .and_then(|slots| slots.main)
            .map(|slot| slot.content))
    }

    fn save(&self, id: &str, body: &str, comment: &str) -> Result<()> {
        let token = self.ensure_csrf_token()?;
        let response = self.request_json(
            &[
                ("action", "edit".to_string()),
                ("title", id.to_string()),
                ("text", body.to_string()),
                ("summary", comment.to_string()),
                ("bot", "1".to_string()),
                ("token", token),
            ],
            RequestBody::Form,
            true,
        )?;
        let payload: EditResponse =
            serde_json::from_value(response).context("failed to decode edit response")?;
        let edit = payload
            .edit
            .ok_or_else(|| anyhow::anyhow!("missing edit payload in API response"))?;
        if edit.result.as_deref() != Some("Success") {
            bail!(
                "MediaWiki edit failed for {}: {}",
                id,
                edit.result.unwrap_or_else(|| "unknown".to_string())
            );
        }
        Ok(())
    }

    fn upload_asset(&self, name: &str, bytes: &[u8], comment: &str) -> Result<()> {
        let token = self.ensure_csrf_token()?;
        let response = self.request_json(
            &[
                ("action", "upload".to_string()),
                ("filename", name.to_string()),
                ("comment", comment.to_string()),
                ("ignorewarnings", "1".to_string()),
                ("token", token),
            ],
            RequestBody::Upload {
                file_name: name,
                bytes,
            },
            true,
        )?;
        let payload: UploadResponse =
            serde_json::from_value(response).context("failed to decode upload response")?;
        let result = payload.upload.and_then(|upload| upload.result);
        if result.as_deref() != Some("Success") {
            bail!(
                "MediaWiki upload failed for {}: {}",
                name,
                result.unwrap_or_else(|| "unknown".to_string())
            );
        }
        Ok(())
    }

    fn asset_metadata(&self, name: &str) -> Result<Option<String>> {
        let title = if name.starts_with("File:") {
            name.to_string()
        } else {
            format!("File:{name}")
        };
        let response = self.request_json(
            &[
                ("action", "query".to_string()),
                ("titles", title),
                ("prop", "imageinfo".to_string()),
                ("iiprop", "metadata".to_string()),
            ],
            RequestBody::Query,
            false,
        )?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .with_context(|| format!("failed to decode imageinfo response for {name}"))?;
        let Some(page) = parsed.query.pages.into_iter().next() else {
            return Ok(None);
        };
        let Some(info) = page.imageinfo.into_iter().next() else {
            return Ok(None);
        };
        Ok(Some(info.metadata.map(|meta| meta.to_string()).unwrap_or_default()))
    }
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    pages: Vec<PageQueryItem>,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    missing: Option<bool>,
    invalid: Option<bool>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
    #[serde(default)]
    imageinfo: Vec<ImageInfoItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ImageInfoItem {
    metadata: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadResponse {
    upload: Option<UploadPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadPayload {
    result: Option<String>,
}
