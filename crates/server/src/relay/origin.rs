//! Cross-origin policy shared by the socket upgrade and REST CORS

use std::collections::HashSet;

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    exact: HashSet<String>,
    suffix: Option<String>,
}

impl OriginPolicy {
    pub fn new(origins: impl IntoIterator<Item = String>, suffix: Option<String>) -> Self {
        Self {
            exact: origins.into_iter().collect(),
            suffix,
        }
    }

    /// Requests without an Origin header (non-browser clients) always pass
    pub fn allows(&self, origin: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return true;
        };
        if self.exact.contains(origin) {
            return true;
        }
        self.suffix
            .as_deref()
            .is_some_and(|suffix| origin.ends_with(suffix))
    }

    pub fn cors_layer(&self) -> CorsLayer {
        let policy = self.clone();
        CorsLayer::new()
            .allow_origin(AllowOrigin::predicate(
                move |origin: &HeaderValue, _parts| policy.allows(origin.to_str().ok()),
            ))
            .allow_credentials(true)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> OriginPolicy {
        OriginPolicy::new(
            vec!["http://localhost:5173".to_string()],
            Some(".vercel.app".to_string()),
        )
    }

    #[test]
    fn test_exact_and_suffix_matches() {
        let policy = policy();
        assert!(policy.allows(Some("http://localhost:5173")));
        assert!(policy.allows(Some("https://link2up-git-main.vercel.app")));
        assert!(!policy.allows(Some("http://localhost:5174")));
        assert!(!policy.allows(Some("https://vercel.app.evil.com")));
    }

    #[test]
    fn test_missing_origin_is_allowed() {
        assert!(policy().allows(None));
        assert!(OriginPolicy::default().allows(None));
        assert!(!OriginPolicy::default().allows(Some("http://localhost:5173")));
    }
}
