#![allow(dead_code)]

use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const SESSION_COOKIE_NAME: &str = "JSESSIONID";

/// Connection details and credentials for the dispatcher HTTP/JSON API.
#[derive(Debug, Clone)]
pub struct RdsConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub language: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum RdsError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("login response did not carry a {SESSION_COOKIE_NAME} cookie")]
    LoginMissingToken,
    #[error("request failed with status {status}: {body}")]
    RequestFailed { status: u16, body: String },
}

/// Authenticated HTTP session against RDS. Transparently re-logs in when
/// the session token is absent or the server reports it expired, and
/// retries the triggering request exactly once.
pub struct RdsSession {
    client: reqwest::Client,
    config: RdsConfig,
    token: Mutex<Option<String>>,
}

impl RdsSession {
    pub fn new(config: RdsConfig) -> Result<Self, RdsError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            config,
            token: Mutex::new(None),
        })
    }

    /// POST username + MD5(password) to the login endpoint and store the
    /// session token extracted from the response cookies. The response
    /// body is ignored; absence of the token on a 2xx response is fatal.
    pub async fn login(&self) -> Result<(), RdsError> {
        let digest = format!("{:x}", md5::compute(self.config.password.as_bytes()));
        let body = serde_json::json!({
            "username": self.config.username,
            "password": digest,
        });

        let response = self
            .client
            .post(self.url("/admin/login"))
            .header("Language", &self.config.language)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let token = extract_cookie(&response, SESSION_COOKIE_NAME).ok_or(RdsError::LoginMissingToken)?;
        debug!("rds login succeeded");
        *self.token.lock().await = Some(token);
        Ok(())
    }

    /// Whether a session token is currently held.
    pub async fn has_session(&self) -> bool {
        self.token.lock().await.is_some()
    }

    /// Clear the locally held session token. RDS exposes no documented
    /// logout endpoint for this client's surface, so this is local-only;
    /// the next call simply logs in again.
    pub async fn logout(&self) {
        *self.token.lock().await = None;
    }

    /// Send one authenticated request, logging in first if there is no
    /// session yet, and retrying exactly once on a 401/403.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Option<Value>, RdsError> {
        if self.token.lock().await.is_none() {
            self.login().await?;
        }

        let response = self.send(method.clone(), path, body.as_ref()).await?;
        if response.status() == StatusCode::UNAUTHORIZED || response.status() == StatusCode::FORBIDDEN {
            warn!(path, status = %response.status(), "rds session expired, re-authenticating");
            *self.token.lock().await = None;
            self.login().await?;
            let retried = self.send(method, path, body.as_ref()).await?;
            return Self::decode(retried).await;
        }

        Self::decode(response).await
    }

    pub async fn set_work_site_filled(&self, site_id: &str) -> Result<Option<Value>, RdsError> {
        let body = serde_json::json!({ "workSiteIds": [site_id] });
        self.call(Method::POST, "/api/work-sites/worksiteFiled", Some(body))
            .await
    }

    pub async fn set_work_site_empty(&self, site_id: &str) -> Result<Option<Value>, RdsError> {
        let body = serde_json::json!({ "workSiteIds": [site_id] });
        self.call(Method::POST, "/api/work-sites/worksiteUnFiled", Some(body))
            .await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response, RdsError> {
        let token = self.token.lock().await.clone();
        let mut request = self
            .client
            .request(method, self.url(path))
            .header("Language", &self.config.language);

        if let Some(token) = token {
            request = request.header("Cookie", format!("{SESSION_COOKIE_NAME}={token}"));
        }

        if let Some(body) = body {
            request = request.header("Content-Type", "application/json").json(body);
        }

        Ok(request.send().await?)
    }

    async fn decode(response: reqwest::Response) -> Result<Option<Value>, RdsError> {
        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }

        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Ok(Some(value)),
            Err(_) => Ok(Some(Value::String(text))),
        }
    }

    async fn status_error(response: reqwest::Response) -> RdsError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        RdsError::RequestFailed { status, body }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

/// Extract the value of cookie `name` from every `Set-Cookie` header on
/// `response`, matching the name case-insensitively. Tolerates both
/// multiple distinct header instances and a single header value where
/// several cookies have been comma-joined (some proxies fold them).
fn extract_cookie(response: &reqwest::Response, name: &str) -> Option<String> {
    let mut found = None;
    for header_value in response.headers().get_all(reqwest::header::SET_COOKIE) {
        let Ok(raw) = header_value.to_str() else {
            continue;
        };
        for part in split_cookie_header(raw) {
            if let Some((cookie_name, cookie_value)) = parse_cookie_pair(part) {
                if cookie_name.eq_ignore_ascii_case(name) {
                    found = Some(cookie_value.to_string());
                }
            }
        }
    }
    found
}

fn split_cookie_header(raw: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0usize;
    let bytes = raw.as_bytes();

    for i in 0..bytes.len() {
        if bytes[i] == b',' {
            let rest = raw[i + 1..].trim_start();
            if looks_like_cookie_start(rest) {
                parts.push(raw[start..i].trim());
                start = i + 1;
            }
        }
    }
    parts.push(raw[start..].trim());
    parts
}

fn looks_like_cookie_start(candidate: &str) -> bool {
    let token_end = match candidate.find('=') {
        Some(idx) if idx > 0 => idx,
        _ => return false,
    };
    candidate[..token_end]
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn parse_cookie_pair(part: &str) -> Option<(&str, &str)> {
    let first_attr = part.split(';').next().unwrap_or(part).trim();
    first_attr.split_once('=').map(|(n, v)| (n.trim(), v.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_comma_folded_cookie_header() {
        let raw = "JSESSIONID=abc123; Path=/, OTHER=xyz; Path=/";
        let parts = split_cookie_header(raw);
        assert_eq!(parts.len(), 2);
        assert_eq!(parse_cookie_pair(parts[0]), Some(("JSESSIONID", "abc123")));
        assert_eq!(parse_cookie_pair(parts[1]), Some(("OTHER", "xyz")));
    }

    #[test]
    fn does_not_split_inside_expires_date() {
        let raw = "JSESSIONID=abc123; Expires=Wed, 09 Jun 2027 10:18:14 GMT; Path=/";
        let parts = split_cookie_header(raw);
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn cookie_name_match_is_case_insensitive() {
        let raw = "jsessionid=abc123; Path=/";
        let parts = split_cookie_header(raw);
        let (name, value) = parse_cookie_pair(parts[0]).unwrap();
        assert!(name.eq_ignore_ascii_case(SESSION_COOKIE_NAME));
        assert_eq!(value, "abc123");
    }
}
