use thiserror::Error;

use super::site_uri::SiteId;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("no base url configured for site `{site_id}`")]
    UnknownSite { site_id: SiteId },
    #[error("invalid url for site `{site_id}`: {message}")]
    InvalidUrl { site_id: SiteId, message: String },
}

impl DomainError {
    pub fn unknown_site(site_id: SiteId) -> Self {
        Self::UnknownSite { site_id }
    }

    pub fn invalid_url(site_id: SiteId, message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            site_id,
            message: message.into(),
        }
    }
}
