//! Site-scoped page identifiers.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use super::error::DomainError;

pub type SiteId = u32;

/// Placeholder the content layer uses for the home page of a site.
const HOME_SENTINEL: &str = "__home__";

/// A cacheable page: a site plus a normalized path without surrounding slashes.
///
/// The home page is the empty path. Two values compare equal when both the
/// site and the path match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "SiteUriRepr")]
pub struct SiteUri {
    site_id: SiteId,
    uri: String,
}

#[derive(Deserialize)]
struct SiteUriRepr {
    site_id: SiteId,
    #[serde(default)]
    uri: String,
}

impl From<SiteUriRepr> for SiteUri {
    fn from(repr: SiteUriRepr) -> Self {
        Self::new(repr.site_id, repr.uri)
    }
}

impl SiteUri {
    pub fn new(site_id: SiteId, uri: impl AsRef<str>) -> Self {
        let uri = uri.as_ref().replace(HOME_SENTINEL, "");
        Self {
            site_id,
            uri: uri.trim_matches('/').to_string(),
        }
    }

    pub fn home(site_id: SiteId) -> Self {
        Self::new(site_id, "")
    }

    pub fn site_id(&self) -> SiteId {
        self.site_id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn is_home(&self) -> bool {
        self.uri.is_empty()
    }

    /// Absolute URL of this page on its site.
    pub fn url(&self, sites: &SiteUrls) -> Result<Url, DomainError> {
        let base = sites
            .base_url(self.site_id)
            .ok_or_else(|| DomainError::unknown_site(self.site_id))?;
        base.join(&self.uri)
            .map_err(|err| DomainError::invalid_url(self.site_id, err.to_string()))
    }
}

impl fmt::Display for SiteUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:/{}", self.site_id, self.uri)
    }
}

/// Base URL per site, used to turn a [`SiteUri`] into an absolute URL.
#[derive(Debug, Clone, Default)]
pub struct SiteUrls {
    bases: HashMap<SiteId, Url>,
}

impl SiteUrls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the base URL for a site.
    ///
    /// The base path always ends with `/` so that joining a page path appends
    /// to it instead of replacing its last segment.
    pub fn insert(&mut self, site_id: SiteId, base: &str) -> Result<(), DomainError> {
        let mut url =
            Url::parse(base).map_err(|err| DomainError::invalid_url(site_id, err.to_string()))?;
        if url.cannot_be_a_base() {
            return Err(DomainError::invalid_url(site_id, "url cannot be a base"));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        url.set_query(None);
        url.set_fragment(None);
        self.bases.insert(site_id, url);
        Ok(())
    }

    pub fn with_site(mut self, site_id: SiteId, base: &str) -> Result<Self, DomainError> {
        self.insert(site_id, base)?;
        Ok(self)
    }

    pub fn base_url(&self, site_id: SiteId) -> Option<&Url> {
        self.bases.get(&site_id)
    }

    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn home_sentinel_collapses_to_empty() {
        let uri = SiteUri::new(1, "__home__");
        assert_eq!(uri.uri(), "");
        assert!(uri.is_home());
        assert_eq!(uri, SiteUri::home(1));
    }

    #[test]
    fn surrounding_slashes_are_trimmed() {
        assert_eq!(SiteUri::new(1, "/blog/first/"), SiteUri::new(1, "blog/first"));
    }

    #[test]
    fn equality_includes_site() {
        let mut set = HashSet::new();
        set.insert(SiteUri::new(1, "about"));
        set.insert(SiteUri::new(1, "/about"));
        set.insert(SiteUri::new(2, "about"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn deserialization_normalizes() {
        let uri: SiteUri =
            serde_json::from_str(r#"{"site_id":3,"uri":"__home__"}"#).expect("valid json");
        assert_eq!(uri, SiteUri::home(3));
    }

    #[test]
    fn url_joins_onto_site_base() {
        let sites = SiteUrls::new()
            .with_site(1, "https://example.com/en")
            .expect("valid base");

        let url = SiteUri::new(1, "blog/hello").url(&sites).expect("url");
        assert_eq!(url.as_str(), "https://example.com/en/blog/hello");

        let home = SiteUri::home(1).url(&sites).expect("url");
        assert_eq!(home.as_str(), "https://example.com/en/");
    }

    #[test]
    fn url_for_unknown_site_fails() {
        let sites = SiteUrls::new();
        let err = SiteUri::new(9, "x").url(&sites).unwrap_err();
        assert!(matches!(err, DomainError::UnknownSite { site_id: 9 }));
    }

    #[test]
    fn display_includes_site_and_path() {
        assert_eq!(SiteUri::new(2, "a/b").to_string(), "2:/a/b");
    }
}
