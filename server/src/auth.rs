use anyhow::Context;
use moonrace_types::GameError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

#[derive(Deserialize)]
struct IdentityResponse {
    id: String,
}

/// Maps bearer tokens to user ids.
///
/// `Static` serves a fixed table loaded at startup; `Http` defers to an
/// external identity service and forwards the token as-is. Identity outages
/// surface as [`GameError::TemporarilyUnavailable`] so callers can retry,
/// while a token the service rejects is [`GameError::Unauthorized`].
#[derive(Debug)]
pub enum AuthResolver {
    Static(HashMap<String, String>),
    Http { client: reqwest::Client, url: String },
}

impl AuthResolver {
    /// Builds a static resolver from `token user-id` pairs.
    pub fn static_tokens(pairs: &[(&str, &str)]) -> Self {
        Self::Static(
            pairs
                .iter()
                .map(|(token, user)| (token.to_string(), user.to_string()))
                .collect(),
        )
    }

    /// Loads a static token table from a file with one `token user-id` pair
    /// per line. Blank lines and lines starting with `#` are ignored.
    pub fn from_static_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("read auth token file {}", path.display()))?;
        let mut tokens = HashMap::new();
        for (number, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next(), fields.next()) {
                (Some(token), Some(user), None) => {
                    tokens.insert(token.to_string(), user.to_string());
                }
                _ => anyhow::bail!(
                    "{}:{}: expected `token user-id`",
                    path.display(),
                    number + 1
                ),
            }
        }
        Ok(Self::Static(tokens))
    }

    /// Builds a resolver that calls `GET url` with the bearer token and
    /// expects a JSON body with an `id` field.
    pub fn http(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("build identity client")?;
        Ok(Self::Http {
            client,
            url: url.into(),
        })
    }

    pub async fn resolve(&self, token: &str) -> Result<String, GameError> {
        match self {
            Self::Static(tokens) => tokens.get(token).cloned().ok_or(GameError::Unauthorized),
            Self::Http { client, url } => {
                let response = client
                    .get(url)
                    .bearer_auth(token)
                    .send()
                    .await
                    .map_err(|err| {
                        if err.is_timeout() || err.is_connect() {
                            GameError::TemporarilyUnavailable
                        } else {
                            GameError::Internal(format!("identity request: {err}"))
                        }
                    })?;

                let status = response.status();
                if status == reqwest::StatusCode::UNAUTHORIZED
                    || status == reqwest::StatusCode::FORBIDDEN
                {
                    return Err(GameError::Unauthorized);
                }
                if status.is_server_error() {
                    return Err(GameError::TemporarilyUnavailable);
                }
                if !status.is_success() {
                    return Err(GameError::Internal(format!(
                        "identity service returned {status}"
                    )));
                }

                let identity: IdentityResponse = response
                    .json()
                    .await
                    .map_err(|err| GameError::Internal(format!("identity response: {err}")))?;
                Ok(identity.id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::AUTHORIZATION;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use std::io::Write;

    #[tokio::test]
    async fn test_static_file_parsing() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# dev tokens").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "token-a user-a").unwrap();
        writeln!(file, "  token-b   user-b  ").unwrap();
        file.flush().unwrap();

        let resolver = AuthResolver::from_static_file(file.path()).unwrap();
        assert_eq!(resolver.resolve("token-a").await.unwrap(), "user-a");
        assert_eq!(resolver.resolve("token-b").await.unwrap(), "user-b");
        assert_eq!(
            resolver.resolve("token-c").await.unwrap_err(),
            GameError::Unauthorized
        );
    }

    #[tokio::test]
    async fn test_static_file_rejects_malformed_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "token-a user-a extra").unwrap();
        file.flush().unwrap();

        let err = AuthResolver::from_static_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("expected `token user-id`"));
    }

    async fn whoami(headers: HeaderMap) -> Result<Json<serde_json::Value>, StatusCode> {
        match headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
            Some("Bearer token-9") => Ok(Json(serde_json::json!({ "id": "user-9" }))),
            _ => Err(StatusCode::UNAUTHORIZED),
        }
    }

    #[tokio::test]
    async fn test_http_resolver() {
        let app = Router::new().route("/whoami", get(whoami));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let resolver = AuthResolver::http(format!("http://{addr}/whoami")).unwrap();
        assert_eq!(resolver.resolve("token-9").await.unwrap(), "user-9");
        assert_eq!(
            resolver.resolve("wrong").await.unwrap_err(),
            GameError::Unauthorized
        );
    }

    #[tokio::test]
    async fn test_http_resolver_unreachable_is_retryable() {
        // Bind and immediately drop a listener to learn a closed port.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let resolver = AuthResolver::http(format!("http://{addr}/whoami")).unwrap();
        assert_eq!(
            resolver.resolve("token").await.unwrap_err(),
            GameError::TemporarilyUnavailable
        );
    }
}
