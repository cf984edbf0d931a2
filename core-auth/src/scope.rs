//! Which targets get a credential.
//!
//! Pure string and URL checks; nothing here touches the network.
//!
//! Prefix checks run on the path the server will actually see: dot segments
//! are resolved and repeated slashes collapsed first, so `/api/../admin`
//! is not protected and `/api//public/x` is still excluded.

use core_runtime::config::GatewayConfig;
use url::Url;

/// Stand-in origin for resolving relative targets when none is configured.
const RELATIVE_BASE: &str = "http://relative.invalid/";

/// Decides whether a request target belongs to the protected API.
///
/// A target is protected when its path equals the API prefix or continues it
/// with `/`, it is not under an excluded prefix, and (for absolute targets)
/// it has the API's origin. Absolute targets are never protected when no
/// origin is configured.
///
/// ```
/// use core_auth::AuthScope;
///
/// let scope = AuthScope::new("/api").exclude("/api/public");
///
/// assert!(scope.requires_auth("/api/articles/5?fields=title"));
/// assert!(!scope.requires_auth("/apidocs"));
/// assert!(!scope.requires_auth("/api/public/logo.png"));
/// assert!(!scope.requires_auth("https://cdn.example.com/api/x"));
/// ```
#[derive(Debug, Clone)]
pub struct AuthScope {
    prefix: String,
    origin: Option<Url>,
    excluded: Vec<String>,
}

impl AuthScope {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: trim_prefix(prefix.into()),
            origin: None,
            excluded: Vec::new(),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            prefix: trim_prefix(config.api_prefix.clone()),
            origin: config.api_origin.clone(),
            excluded: config
                .excluded_prefixes
                .iter()
                .cloned()
                .map(trim_prefix)
                .collect(),
        }
    }

    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn exclude(mut self, prefix: impl Into<String>) -> Self {
        self.excluded.push(trim_prefix(prefix.into()));
        self
    }

    pub fn requires_auth(&self, target: &str) -> bool {
        let Some(path) = self.same_origin_path(target) else {
            return false;
        };
        path_has_prefix(&path, &self.prefix) && !self.excluded_path(&path)
    }

    /// Whether `target` falls under an excluded prefix.
    pub fn excludes(&self, target: &str) -> bool {
        self.same_origin_path(target)
            .map_or(false, |path| self.excluded_path(&path))
    }

    /// URL handed to the transport: relative targets are joined onto the
    /// API origin when one is configured.
    pub fn resolve_url(&self, target: &str) -> String {
        if Url::parse(target).is_ok() {
            return target.to_string();
        }
        match &self.origin {
            Some(origin) => origin
                .join(target)
                .map(String::from)
                .unwrap_or_else(|_| target.to_string()),
            None => target.to_string(),
        }
    }

    /// Origin relative targets are resolved against.
    fn base(&self) -> Option<Url> {
        match &self.origin {
            Some(origin) => Some(origin.clone()),
            None => Url::parse(RELATIVE_BASE).ok(),
        }
    }

    fn excluded_path(&self, path: &str) -> bool {
        self.excluded
            .iter()
            .any(|prefix| path_has_prefix(path, prefix))
    }

    /// Normalized path of `target` if it lands on the API origin.
    ///
    /// Relative targets are joined exactly as [`resolve_url`](Self::resolve_url)
    /// joins them, so a scheme-relative `//host/api` leaves the origin here
    /// too.
    fn same_origin_path(&self, target: &str) -> Option<String> {
        let (url, expected) = match Url::parse(target) {
            Ok(url) => (url, self.origin.clone()?),
            Err(_) => {
                let base = self.base()?;
                (base.join(target).ok()?, base)
            }
        };
        (url.origin() == expected.origin()).then(|| collapse_slashes(url.path()))
    }
}

fn collapse_slashes(path: &str) -> String {
    let mut collapsed = String::with_capacity(path.len());
    for c in path.chars() {
        if c == '/' && collapsed.ends_with('/') {
            continue;
        }
        collapsed.push(c);
    }
    collapsed
}

fn trim_prefix(prefix: String) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn path_has_prefix(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return path.starts_with('/');
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
