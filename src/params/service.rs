// src/params/service.rs

//! HTTP parameter service client.
//!
//! `GET|PUT|DELETE {base}/v1/params/{namespace}/{key}` with an optional
//! bearer token. Values travel as `{"value": "..."}`.

use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use crate::BoxFuture;
use crate::errors::ParameterError;
use crate::params::backend::{ParameterBackend, unavailable};
use crate::params::secret::SecretValue;

const BACKEND: &str = "external-service";

#[derive(Serialize)]
struct PutBody<'a> {
    value: &'a str,
}

#[derive(Deserialize)]
struct GetBody {
    value: String,
}

pub struct ServiceBackend {
    http: reqwest::Client,
    base_url: Url,
    token: Option<Zeroizing<String>>,
}

impl std::fmt::Debug for ServiceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceBackend")
            .field("base_url", &self.base_url.as_str())
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl ServiceBackend {
    pub fn new(
        base_url: &str,
        token: Option<Zeroizing<String>>,
        timeout: Duration,
    ) -> Result<Self, ParameterError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| unavailable(BACKEND, format!("cannot build HTTP client: {e}")))?;
        let base_url = Url::parse(base_url)
            .map_err(|e| unavailable(BACKEND, format!("invalid service URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(unavailable(BACKEND, "service URL cannot carry a path"));
        }
        Ok(Self {
            http,
            base_url,
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    /// `{base}/v1/params/{namespace}/{key}`, each segment percent-encoded so
    /// a `/`, `?` or `#` inside a key stays part of that key.
    fn url(&self, namespace: &str, key: &str) -> Result<Url, ParameterError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| unavailable(BACKEND, "service URL cannot carry a path"))?
            .pop_if_empty()
            .extend(["v1", "params", namespace, key]);
        Ok(url)
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token.as_str()),
            None => req,
        }
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
        key: &str,
    ) -> Result<reqwest::Response, ParameterError> {
        let resp = self.auth(req).send().await.map_err(|e| {
            let kind = if e.is_timeout() {
                "timeout"
            } else if e.is_connect() {
                "connect"
            } else {
                "request"
            };
            // reqwest errors carry the URL but never the request body.
            unavailable(BACKEND, format!("{kind} error: {e}"))
        })?;

        let status = resp.status();
        debug!(key, status = %status, "parameter service response");
        match status {
            s if s.is_success() => Ok(resp),
            StatusCode::NOT_FOUND => Err(ParameterError::NotFound {
                name: key.to_string(),
            }),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ParameterError::AccessDenied {
                name: key.to_string(),
                reason: format!("service answered {status}"),
            }),
            s => Err(unavailable(BACKEND, format!("service answered {s}"))),
        }
    }
}

impl ParameterBackend for ServiceBackend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn get<'a>(
        &'a self,
        namespace: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<SecretValue, ParameterError>> {
        Box::pin(async move {
            let resp = self.send(self.http.get(self.url(namespace, key)?), key).await?;
            let body = Zeroizing::new(
                resp.bytes()
                    .await
                    .map_err(|e| unavailable(BACKEND, format!("body error: {e}")))?
                    .to_vec(),
            );
            let parsed: GetBody = serde_json::from_slice(&body)
                .map_err(|_| unavailable(BACKEND, "response is not a {\"value\": ...} object"))?;
            Ok(SecretValue::from(parsed.value))
        })
    }

    fn put<'a>(
        &'a self,
        namespace: &'a str,
        key: &'a str,
        value: &'a SecretValue,
    ) -> BoxFuture<'a, Result<(), ParameterError>> {
        Box::pin(async move {
            let text = value
                .expose_str()
                .ok_or_else(|| unavailable(BACKEND, "value is not valid UTF-8"))?;
            let req = self
                .http
                .put(self.url(namespace, key)?)
                .json(&PutBody { value: text });
            self.send(req, key).await?;
            Ok(())
        })
    }

    fn delete<'a>(
        &'a self,
        namespace: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<(), ParameterError>> {
        Box::pin(async move {
            self.send(self.http.delete(self.url(namespace, key)?), key)
                .await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(base: &str) -> ServiceBackend {
        ServiceBackend::new(base, None, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn keys_are_escaped_as_single_path_segments() {
        let b = backend("http://params.local/api/");
        assert_eq!(
            b.url("ci", "a/b?c#d").unwrap().as_str(),
            "http://params.local/api/v1/params/ci/a%2Fb%3Fc%23d"
        );
        assert_eq!(
            backend("http://params.local").url("default", "token").unwrap().as_str(),
            "http://params.local/v1/params/default/token"
        );
    }

    #[test]
    fn rejects_urls_without_a_path() {
        assert!(matches!(
            ServiceBackend::new("mailto:ops@example.com", None, Duration::from_secs(1)),
            Err(ParameterError::BackendUnavailable { .. })
        ));
    }
}
