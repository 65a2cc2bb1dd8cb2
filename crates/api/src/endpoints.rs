//! Endpoint URL construction for the `api2` repository API.
//!
//! Query values are percent-encoded explicitly (slashes kept readable in
//! `p=`), so the wire form does not depend on form-urlencoding rules.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::Url;

use crate::ApiError;

/// Characters left alone in a URL component: ALPHA / DIGIT / `-._~`.
pub const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// [`COMPONENT`] plus `/`, used for repository paths in query values.
const QUERY_PATH: &AsciiSet = &COMPONENT.remove(b'/');

/// One addressable blob in a remote repository plus the token to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub repo_id: String,
    /// Directory inside the repository, always `/`-prefixed and `/`-terminated.
    pub path: String,
    pub file_name: String,
    pub revision: Option<String>,
    /// Transfer URL known up front; such requests skip the prefetch phase.
    pub resolved_url: Option<Url>,
    pub auth_token: String,
}

impl TransferRequest {
    /// Creates a request, normalising `path` to `/dir/` form.
    pub fn new(repo_id: &str, path: &str, file_name: &str, auth_token: &str) -> Self {
        Self {
            repo_id: repo_id.to_string(),
            path: normalize_dir(path),
            file_name: file_name.to_string(),
            revision: None,
            resolved_url: None,
            auth_token: auth_token.to_string(),
        }
    }

    /// Pins the request to a commit.
    pub fn with_revision(mut self, revision: &str) -> Self {
        self.revision = Some(revision.to_string());
        self
    }

    /// Marks the request as already resolved to `url`.
    pub fn with_resolved_url(mut self, url: Url) -> Self {
        self.resolved_url = Some(url);
        self
    }

    /// Full path of the file inside the repository.
    pub fn remote_path(&self) -> String {
        format!("{}{}", self.path, self.file_name)
    }
}

/// Parses a server URL and makes it usable as a join base.
pub fn api_base(server_url: &str) -> Result<Url, ApiError> {
    let mut url = Url::parse(server_url)
        .map_err(|e| ApiError::InvalidUrl(format!("{server_url}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(ApiError::InvalidUrl(server_url.to_string()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// `GET api2/repos/{repo}/file/?p=...`, or the `file/revision/` variant
/// with `commit_id` when the request carries a revision.
pub fn download_url(base: &Url, req: &TransferRequest) -> Result<Url, ApiError> {
    let remote = req.remote_path();
    match &req.revision {
        Some(revision) => endpoint(
            base,
            &req.repo_id,
            "file/revision/",
            &[("p", &remote), ("commit_id", revision)],
        ),
        None => endpoint(base, &req.repo_id, "file/", &[("p", &remote)]),
    }
}

/// `GET api2/repos/{repo}/upload-link/?p=...`; answers with a quoted URL.
pub fn upload_link_url(base: &Url, req: &TransferRequest) -> Result<Url, ApiError> {
    endpoint(base, &req.repo_id, "upload-link/", &[("p", &req.path)])
}

/// `GET api2/repos/{repo}/dir/?p=...`
pub fn dir_url(base: &Url, repo_id: &str, path: &str) -> Result<Url, ApiError> {
    endpoint(base, repo_id, "dir/", &[("p", &normalize_dir(path))])
}

/// Multipart part name for an uploaded file.
pub fn part_name(file_name: &str) -> String {
    utf8_percent_encode(file_name, COMPONENT).to_string()
}

fn endpoint(
    base: &Url,
    repo_id: &str,
    suffix: &str,
    query: &[(&str, &str)],
) -> Result<Url, ApiError> {
    let relative = format!(
        "api2/repos/{}/{suffix}",
        utf8_percent_encode(repo_id, COMPONENT)
    );
    let mut url = base
        .join(&relative)
        .map_err(|e| ApiError::InvalidUrl(format!("{relative}: {e}")))?;

    let query = query
        .iter()
        .map(|(k, v)| format!("{k}={}", utf8_percent_encode(v, QUERY_PATH)))
        .collect::<Vec<_>>()
        .join("&");
    url.set_query(Some(&query));
    Ok(url)
}

fn normalize_dir(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        api_base("https://cloud.example.com").unwrap()
    }

    #[test]
    fn request_normalizes_directory() {
        assert_eq!(TransferRequest::new("r", "", "a", "t").path, "/");
        assert_eq!(TransferRequest::new("r", "docs", "a", "t").path, "/docs/");
        assert_eq!(TransferRequest::new("r", "/docs/x/", "a", "t").path, "/docs/x/");
    }

    #[test]
    fn remote_path_joins_dir_and_name() {
        let req = TransferRequest::new("r", "/docs", "a.txt", "t");
        assert_eq!(req.remote_path(), "/docs/a.txt");
    }

    #[test]
    fn download_url_plain() {
        let req = TransferRequest::new("repo-1", "/docs/", "report.pdf", "t");
        let url = download_url(&base(), &req).unwrap();
        assert_eq!(
            url.as_str(),
            "https://cloud.example.com/api2/repos/repo-1/file/?p=/docs/report.pdf"
        );
    }

    #[test]
    fn download_url_encodes_query() {
        let req = TransferRequest::new("repo-1", "/my docs/", "résumé & cv.txt", "t");
        let url = download_url(&base(), &req).unwrap();
        assert_eq!(
            url.query(),
            Some("p=/my%20docs/r%C3%A9sum%C3%A9%20%26%20cv.txt")
        );
    }

    #[test]
    fn download_url_with_revision() {
        let req = TransferRequest::new("repo-1", "/", "a.txt", "t").with_revision("abc123");
        let url = download_url(&base(), &req).unwrap();
        assert_eq!(url.path(), "/api2/repos/repo-1/file/revision/");
        assert_eq!(url.query(), Some("p=/a.txt&commit_id=abc123"));
    }

    #[test]
    fn base_with_subpath_is_kept() {
        let base = api_base("https://host/seafile").unwrap();
        let req = TransferRequest::new("r", "/", "a", "t");
        let url = download_url(&base, &req).unwrap();
        assert_eq!(url.path(), "/seafile/api2/repos/r/file/");
    }

    #[test]
    fn upload_link_uses_directory() {
        let req = TransferRequest::new("r", "/in box", "a.txt", "t");
        let url = upload_link_url(&base(), &req).unwrap();
        assert_eq!(url.path(), "/api2/repos/r/upload-link/");
        assert_eq!(url.query(), Some("p=/in%20box/"));
    }

    #[test]
    fn dir_url_normalizes_path() {
        let url = dir_url(&base(), "r", "photos").unwrap();
        assert_eq!(url.query(), Some("p=/photos/"));
    }

    #[test]
    fn part_name_encodes_everything_but_unreserved() {
        assert_eq!(part_name("a b/c.txt"), "a%20b%2Fc.txt");
        assert_eq!(part_name("plain-name_1.tar.gz"), "plain-name_1.tar.gz");
    }

    #[test]
    fn api_base_rejects_garbage() {
        assert!(api_base("not a url").is_err());
        assert!(api_base("mailto:someone@example.com").is_err());
    }
}
