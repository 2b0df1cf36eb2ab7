use std::fmt;
use std::sync::Arc;

use flowgate_core::{describe_tree, Interceptor, Request};
use http::Method;
use regex::Regex;

// ---------------------------------------------------------------------------
// PathMatch
// ---------------------------------------------------------------------------

/// How a rule matches the request path.
#[derive(Debug, Clone)]
pub enum PathMatch {
    /// Path starts with the given prefix.
    Prefix(String),
    /// Path matches the regex anywhere (anchor it explicitly if needed).
    Regex(Regex),
}

impl PathMatch {
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Prefix(prefix) => path.starts_with(prefix.as_str()),
            Self::Regex(regex) => regex.is_match(path),
        }
    }
}

impl fmt::Display for PathMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prefix(prefix) => write!(f, "{prefix}*"),
            Self::Regex(regex) => write!(f, "~{}", regex.as_str()),
        }
    }
}

// ---------------------------------------------------------------------------
// RuleKey
// ---------------------------------------------------------------------------

/// Request attributes a proxy is selected by. `None` matches anything.
#[derive(Debug, Clone, Default)]
pub struct RuleKey {
    /// Host name, `*`, or a `*.suffix` wildcard. Compared case-insensitively
    /// against the `Host` header without port.
    pub host: Option<String>,
    pub method: Option<Method>,
    pub path: Option<PathMatch>,
}

impl RuleKey {
    #[must_use]
    pub fn matches(&self, request: &Request) -> bool {
        if let Some(method) = &self.method {
            if *method != request.method {
                return false;
            }
        }
        if let Some(pattern) = &self.host {
            if !host_matches(pattern, request.host()) {
                return false;
            }
        }
        self.path
            .as_ref()
            .is_none_or(|path| path.matches(request.path()))
    }
}

fn host_matches(pattern: &str, host: Option<&str>) -> bool {
    if pattern == "*" {
        return true;
    }
    let Some(host) = host else {
        return false;
    };
    match pattern.strip_prefix("*.") {
        Some(suffix) => {
            let host = host.to_ascii_lowercase();
            let suffix = suffix.to_ascii_lowercase();
            host.len() > suffix.len() + 1
                && host.ends_with(&suffix)
                && host.as_bytes()[host.len() - suffix.len() - 1] == b'.'
        }
        None => pattern.eq_ignore_ascii_case(host),
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}{}",
            self.method.as_ref().map_or("*", Method::as_str),
            self.host.as_deref().unwrap_or("*"),
            self.path
                .as_ref()
                .map_or_else(|| "/*".to_string(), ToString::to_string),
        )
    }
}

// ---------------------------------------------------------------------------
// ServiceProxy
// ---------------------------------------------------------------------------

/// A routing rule: its key, its root interceptor chain and an optional
/// backend target.
pub struct ServiceProxy {
    name: String,
    key: RuleKey,
    target: Option<String>,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl ServiceProxy {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        key: RuleKey,
        target: Option<String>,
        interceptors: Vec<Arc<dyn Interceptor>>,
    ) -> Self {
        Self {
            name: name.into(),
            key,
            target: target.map(|t| t.trim_end_matches('/').to_string()),
            interceptors,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn key(&self) -> &RuleKey {
        &self.key
    }

    /// Backend base URL, without a trailing slash.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Root interceptor list, run by the flow controller.
    #[must_use]
    pub fn interceptors(&self) -> &[Arc<dyn Interceptor>] {
        &self.interceptors
    }

    /// Destination URL for `request`: the target joined with the request's
    /// path and query.
    #[must_use]
    pub fn destination_for(&self, request: &Request) -> Option<String> {
        self.target
            .as_ref()
            .map(|target| format!("{target}{}", request.path_and_query()))
    }
}

impl fmt::Debug for ServiceProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("name", &self.name)
            .field("key", &self.key.to_string())
            .field("target", &self.target)
            .field("interceptors", &describe_tree(&self.interceptors))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(host: Option<&str>, method: Option<Method>, path: Option<PathMatch>) -> RuleKey {
        RuleKey {
            host: host.map(str::to_string),
            method,
            path,
        }
    }

    #[test]
    fn empty_key_matches_everything() {
        assert!(RuleKey::default().matches(&Request::post("/any/thing")));
    }

    #[test]
    fn method_and_prefix_must_both_match() {
        let key = key(None, Some(Method::GET), Some(PathMatch::Prefix("/api".into())));
        assert!(key.matches(&Request::get("/api/users")));
        assert!(!key.matches(&Request::post("/api/users")));
        assert!(!key.matches(&Request::get("/web")));
    }

    #[test]
    fn regex_path_ignores_query() {
        let key = key(None, None, Some(PathMatch::Regex(Regex::new("^/users/\\d+$").unwrap())));
        assert!(key.matches(&Request::get("/users/42?verbose=1")));
        assert!(!key.matches(&Request::get("/users/me")));
    }

    #[test]
    fn host_patterns() {
        let exact = key(Some("api.example.com"), None, None);
        assert!(exact.matches(&Request::get("/").with_header("host", "API.example.com:8080")));
        assert!(!exact.matches(&Request::get("/").with_header("host", "example.com")));
        assert!(!exact.matches(&Request::get("/")));

        let wildcard = key(Some("*.example.com"), None, None);
        assert!(wildcard.matches(&Request::get("/").with_header("host", "a.example.com")));
        assert!(!wildcard.matches(&Request::get("/").with_header("host", "example.com")));
        assert!(!wildcard.matches(&Request::get("/").with_header("host", "badexample.com")));

        assert!(key(Some("*"), None, None).matches(&Request::get("/")));
    }

    #[test]
    fn destination_joins_target_and_path_and_query() {
        let proxy = ServiceProxy::new("api", RuleKey::default(), Some("http://backend:8080/".into()), vec![]);
        assert_eq!(proxy.target(), Some("http://backend:8080"));
        assert_eq!(
            proxy.destination_for(&Request::get("/users?page=2")).as_deref(),
            Some("http://backend:8080/users?page=2")
        );

        let no_target = ServiceProxy::new("internal", RuleKey::default(), None, vec![]);
        assert!(no_target.destination_for(&Request::get("/")).is_none());
    }

    #[test]
    fn key_display() {
        let key = key(Some("a.com"), Some(Method::PUT), Some(PathMatch::Prefix("/x".into())));
        assert_eq!(key.to_string(), "PUT a.com/x*");
        assert_eq!(RuleKey::default().to_string(), "* */*");
    }

    proptest::proptest! {
        #[test]
        fn prefix_matches_any_extension_of_itself(prefix in "/[a-z]{0,8}", rest in "[a-z/]{0,12}") {
            let rule = key(None, None, Some(PathMatch::Prefix(prefix.clone())));
            let request = Request::get(format!("{prefix}{rest}"));
            proptest::prop_assert!(rule.matches(&request));
        }
    }
}
