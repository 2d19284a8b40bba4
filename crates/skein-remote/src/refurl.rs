//! `external_ref` canonicalisation.
//!
//! Canonical form: lowercase scheme and host, default ports and trailing
//! slashes dropped, path kept verbatim. The provider is recognised from the
//! host and the issue key extracted from the provider's path shape.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefError {
    #[error("external ref '{0}' is not an absolute http(s) URL")]
    NotAUrl(String),

    #[error("external ref '{0}' has no recognisable issue path")]
    NoIssueKey(String),
}

/// Tracker recognised from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Github,
    Gitlab,
    Jira,
    /// Anything else; the whole path serves as the key.
    Generic,
}

/// A canonicalised external reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRef {
    /// The cleaned URL.
    pub url: String,
    pub provider: Provider,
    /// Provider-shaped issue key, e.g. `owner/repo#123` or `PROJ-42`.
    pub key: String,
}

/// Canonicalises an external reference URL.
pub fn canonicalize_ref(raw: &str) -> Result<CanonicalRef, RefError> {
    let raw = raw.trim();
    let (scheme, rest) = raw
        .split_once("://")
        .ok_or_else(|| RefError::NotAUrl(raw.to_string()))?;
    let scheme = scheme.to_ascii_lowercase();
    if scheme != "http" && scheme != "https" {
        return Err(RefError::NotAUrl(raw.to_string()));
    }

    let (host_port, path) = match rest.split_once('/') {
        Some((h, p)) => (h, p),
        None => (rest, ""),
    };
    if host_port.is_empty() {
        return Err(RefError::NotAUrl(raw.to_string()));
    }

    let host_port = host_port.to_ascii_lowercase();
    let host = match host_port.rsplit_once(':') {
        Some((host, port))
            if (scheme == "http" && port == "80") || (scheme == "https" && port == "443") =>
        {
            host.to_string()
        }
        _ => host_port,
    };

    let path = path.trim_end_matches('/');
    let url = if path.is_empty() {
        format!("{scheme}://{host}")
    } else {
        format!("{scheme}://{host}/{path}")
    };

    let provider = detect_provider(&host);
    let key = extract_key(provider, path).ok_or_else(|| RefError::NoIssueKey(raw.to_string()))?;

    Ok(CanonicalRef { url, provider, key })
}

fn detect_provider(host: &str) -> Provider {
    if host == "github.com" || host.ends_with(".github.com") {
        Provider::Github
    } else if host == "gitlab.com" || host.contains("gitlab") {
        Provider::Gitlab
    } else if host.ends_with(".atlassian.net") || host.contains("jira") {
        Provider::Jira
    } else {
        Provider::Generic
    }
}

fn extract_key(provider: Provider, path: &str) -> Option<String> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match provider {
        // github.com/{owner}/{repo}/issues/{n}
        Provider::Github => match segments.as_slice() {
            [owner, repo, "issues", n] if n.chars().all(|c| c.is_ascii_digit()) => {
                Some(format!("{owner}/{repo}#{n}"))
            }
            _ => None,
        },
        // gitlab.com/{group...}/{project}/-/issues/{n}
        Provider::Gitlab => {
            let dash = segments.iter().position(|s| *s == "-")?;
            match segments.get(dash + 1..) {
                Some(["issues", n]) if n.chars().all(|c| c.is_ascii_digit()) => {
                    Some(format!("{}#{n}", segments[..dash].join("/")))
                }
                _ => None,
            }
        }
        // {host}/browse/{KEY-123}
        Provider::Jira => match segments.as_slice() {
            ["browse", key] if key.contains('-') => Some((*key).to_string()),
            _ => None,
        },
        Provider::Generic => {
            if path.is_empty() {
                None
            } else {
                Some(path.to_string())
            }
        }
    }
}
