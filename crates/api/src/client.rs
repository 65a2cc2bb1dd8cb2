//! Authenticated HTTP client for the repository API.
//!
//! Automatic redirects are disabled: the resolver and the transfer tasks
//! need to see 3xx responses to track URL changes themselves.

use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::{RequestBuilder, Url};
use tracing::debug;

use crate::endpoints::{self, TransferRequest};
use crate::error::ApiError;
use crate::types::Dirent;

/// Settings for [`ApiClient::new`].
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Base URL of the server, e.g. `https://cloud.example.com`.
    pub server_url: String,
    /// Opaque account token.
    pub token: String,
    /// Connect timeout and idle read timeout; `None` disables both. A
    /// transfer that keeps receiving bytes never hits it.
    pub timeout: Option<Duration>,
}

/// Repository API client.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
}

impl ApiClient {
    /// Creates a client for the given server.
    pub fn new(options: &ClientOptions) -> Result<Self, ApiError> {
        let base_url = endpoints::api_base(&options.server_url)?;

        let mut builder =
            reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
        if let Some(timeout) = options.timeout {
            builder = builder.connect_timeout(timeout).read_timeout(timeout);
        }
        let http = builder.build()?;

        Ok(Self {
            http,
            base_url,
            token: options.token.clone(),
        })
    }

    /// Base URL all endpoints are joined onto.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Account token this client was built with.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Builds a [`TransferRequest`] carrying this client's token.
    pub fn transfer_request(
        &self,
        repo_id: &str,
        path: &str,
        file_name: &str,
    ) -> TransferRequest {
        TransferRequest::new(repo_id, path, file_name, &self.token)
    }

    /// Authenticated GET.
    pub fn get(&self, url: Url, token: &str) -> RequestBuilder {
        authorize(self.http.get(url), token)
    }

    /// Authenticated POST.
    pub fn post(&self, url: Url, token: &str) -> RequestBuilder {
        authorize(self.http.post(url), token)
    }

    /// Lists the entries of `path` in a repository.
    pub async fn list_dir(&self, repo_id: &str, path: &str) -> Result<Vec<Dirent>, ApiError> {
        let url = endpoints::dir_url(&self.base_url, repo_id, path)?;
        debug!(%url, "listing directory");

        let resp = self.get(url, &self.token).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

fn authorize(builder: RequestBuilder, token: &str) -> RequestBuilder {
    if token.is_empty() {
        builder
    } else {
        builder.header(AUTHORIZATION, format!("Token {token}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seaclient_test_support::{MockResponse, MockServer};

    fn client_for(server: &MockServer) -> ApiClient {
        ApiClient::new(&ClientOptions {
            server_url: server.url().to_string(),
            token: "secret".into(),
            timeout: Some(Duration::from_secs(10)),
        })
        .unwrap()
    }

    #[test]
    fn new_rejects_invalid_server_url() {
        let err = ApiClient::new(&ClientOptions {
            server_url: "::nope".into(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ApiError::InvalidUrl(_)));
    }

    #[test]
    fn transfer_request_carries_token() {
        let client = ApiClient::new(&ClientOptions {
            server_url: "https://h".into(),
            token: "tok".into(),
            timeout: None,
        })
        .unwrap();
        let req = client.transfer_request("r", "d", "f");
        assert_eq!(req.auth_token, "tok");
        assert_eq!(req.path, "/d/");
    }

    #[tokio::test]
    async fn list_dir_returns_entries() {
        let server = MockServer::start().await;
        server.route(
            "/api2/repos/r1/dir/",
            MockResponse::ok(
                r#"[{"id":"x","type":"dir","name":"sub"},{"id":"y","type":"file","name":"a.txt","size":3}]"#,
            ),
        );

        let entries = client_for(&server).list_dir("r1", "/docs").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].name, "a.txt");

        let reqs = server.requests();
        assert_eq!(reqs[0].query(), Some("p=/docs/"));
        assert_eq!(reqs[0].header("authorization"), Some("Token secret"));
    }

    #[tokio::test]
    async fn list_dir_maps_error_status() {
        let server = MockServer::start().await;
        server.route(
            "/api2/repos/r1/dir/",
            MockResponse::with_status(403, "forbidden"),
        );

        let err = client_for(&server).list_dir("r1", "/").await.unwrap_err();
        match err {
            ApiError::Status { status, body } => {
                assert_eq!(status, 403);
                assert_eq!(body, "forbidden");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn list_dir_rejects_malformed_json() {
        let server = MockServer::start().await;
        server.route("/api2/repos/r1/dir/", MockResponse::ok("{not json"));

        let err = client_for(&server).list_dir("r1", "/").await.unwrap_err();
        assert!(matches!(err, ApiError::Json(_)));
    }
}
