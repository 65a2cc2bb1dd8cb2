//! Transfer URL resolution.
//!
//! Two redirect conventions are handled by the same loop: real HTTP 3xx
//! responses with a `Location` header, and "embedded" redirects where a
//! `200` body is a quoted URL naming the actual transfer endpoint. A 3xx
//! status is always checked before the body is looked at.

use std::collections::HashSet;

use reqwest::header::LOCATION;
use reqwest::{Response, StatusCode, Url};
use tracing::debug;

use crate::client::ApiClient;
use crate::error::ApiError;

/// Outcome of one prefetch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prefetch {
    /// HTTP redirect; the same request should be repeated against the URL.
    Redirect(Url),
    /// The body named the real transfer URL.
    Resolved(Url),
}

/// Bounds a redirect chain and detects cycles.
#[derive(Debug, Clone)]
pub struct RedirectTracker {
    visited: HashSet<String>,
    max_redirects: usize,
    followed: usize,
}

impl RedirectTracker {
    /// Starts a chain at `start`.
    pub fn new(max_redirects: usize, start: &Url) -> Self {
        let mut visited = HashSet::new();
        visited.insert(start.as_str().to_string());
        Self {
            visited,
            max_redirects,
            followed: 0,
        }
    }

    /// Records a hop to `next`. Fails when the bound is exceeded or the URL
    /// was already visited in this chain.
    pub fn follow(&mut self, next: &Url) -> Result<(), ApiError> {
        if self.followed >= self.max_redirects {
            return Err(ApiError::TooManyRedirects(self.max_redirects));
        }
        if !self.visited.insert(next.as_str().to_string()) {
            return Err(ApiError::RedirectLoop(next.to_string()));
        }
        self.followed += 1;
        Ok(())
    }

    /// Records a URL reached without an HTTP redirect, such as the target
    /// named by a prefetch body. Only revisits fail; the hop bound is not
    /// charged.
    pub fn visit(&mut self, next: &Url) -> Result<(), ApiError> {
        if !self.visited.insert(next.as_str().to_string()) {
            return Err(ApiError::RedirectLoop(next.to_string()));
        }
        Ok(())
    }

    /// HTTP redirects followed so far.
    pub fn followed(&self) -> usize {
        self.followed
    }
}

/// Redirect target of `resp`, resolved against `current`.
///
/// `None` when the response is not a redirect. A redirect status without a
/// usable `Location` is an error.
pub fn redirect_target(resp: &Response, current: &Url) -> Option<Result<Url, ApiError>> {
    if !is_redirect(resp.status()) {
        return None;
    }
    let location = match resp.headers().get(LOCATION).map(|v| v.to_str()) {
        Some(Ok(location)) if !location.trim().is_empty() => location.trim(),
        _ => {
            return Some(Err(ApiError::InvalidRedirect(format!(
                "{} without Location from {current}",
                resp.status()
            ))));
        }
    };
    Some(
        current
            .join(location)
            .map_err(|e| ApiError::InvalidRedirect(format!("{location}: {e}"))),
    )
}

/// Extracts the URL carried by a prefetch response body.
///
/// The body is a (usually JSON-quoted) URL string. Anything of two
/// characters or fewer after trimming, such as `""`, is a failed prefetch.
/// Relative URLs are resolved against `base`.
pub fn parse_embedded_url(body: &str, base: &Url) -> Result<Url, ApiError> {
    let trimmed = body.trim();
    if trimmed.chars().count() <= 2 {
        return Err(ApiError::EmptyPrefetch(trimmed.to_string()));
    }

    let unquoted = if trimmed.starts_with('"') {
        serde_json::from_str::<String>(trimmed)
            .unwrap_or_else(|_| trimmed.trim_matches('"').to_string())
    } else {
        trimmed.to_string()
    };
    let unquoted = unquoted.trim();
    if unquoted.is_empty() {
        return Err(ApiError::EmptyPrefetch(trimmed.to_string()));
    }

    base.join(unquoted)
        .map_err(|e| ApiError::InvalidRedirect(format!("{unquoted}: {e}")))
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// Runs prefetch requests against the API.
///
/// Each call is a single request; callers drive the hop loop with a
/// [`RedirectTracker`] so they can act on every redirect.
#[derive(Debug, Clone, Copy)]
pub struct RedirectResolver<'a> {
    client: &'a ApiClient,
}

impl<'a> RedirectResolver<'a> {
    pub fn new(client: &'a ApiClient) -> Self {
        Self { client }
    }

    /// Issues one prefetch request to `url`.
    pub async fn prefetch(&self, url: &Url, token: &str) -> Result<Prefetch, ApiError> {
        debug!(%url, "prefetch");
        let resp = self.client.get(url.clone(), token).send().await?;

        if let Some(target) = redirect_target(&resp, url) {
            return target.map(Prefetch::Redirect);
        }

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        parse_embedded_url(&body, url).map(Prefetch::Resolved)
    }
}
