//! Locations of registry content referenced by events

use std::fmt;

use http::Uri;

use crate::error::UrlError;

/// A repository name qualified by a tag, a digest, or both
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryReference {
    /// Repository name, e.g. `library/alpine`
    pub name: String,

    /// Tag within the repository
    pub tag: Option<String>,

    /// Content digest
    pub digest: Option<String>,
}

impl RepositoryReference {
    /// An unqualified reference to a repository
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: None,
            digest: None,
        }
    }

    /// Qualify this reference with a tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Qualify this reference with a digest
    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    /// The most specific qualifier: the digest if present, otherwise the tag
    pub fn reference(&self) -> Option<&str> {
        self.digest.as_deref().or(self.tag.as_deref())
    }
}

impl fmt::Display for RepositoryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

/// Builds the URLs placed in event targets
pub trait UrlBuilder: fmt::Debug + Send + Sync {
    /// The URL of a manifest. The reference must carry a tag or a digest.
    fn manifest_url(&self, reference: &RepositoryReference) -> Result<String, UrlError>;

    /// The URL of a blob in a repository
    fn blob_url(&self, repository: &str, digest: &str) -> Result<String, UrlError>;
}

/// Builds distribution API routes, `/v2/<name>/manifests/<reference>` and
/// `/v2/<name>/blobs/<digest>`.
///
/// URLs are relative unless the builder was given a base URL.
#[derive(Debug, Clone, Default)]
pub struct RouteUrlBuilder {
    base: Option<String>,
}

impl RouteUrlBuilder {
    /// A builder producing relative URLs
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder producing absolute URLs below `base`
    pub fn with_base(base: Uri) -> Result<Self, UrlError> {
        let (Some(scheme), Some(authority)) = (base.scheme_str(), base.authority()) else {
            return Err(UrlError::Invalid(format!("base url {base} is not absolute")));
        };

        let path = base.path().trim_end_matches('/');
        Ok(Self {
            base: Some(format!("{scheme}://{authority}{path}")),
        })
    }

    fn route(&self, path: String) -> Result<String, UrlError> {
        let url = match &self.base {
            Some(base) => format!("{base}{path}"),
            None => path,
        };

        url.parse::<Uri>()
            .map_err(|error| UrlError::Invalid(format!("{url}: {error}")))?;
        Ok(url)
    }
}

impl UrlBuilder for RouteUrlBuilder {
    fn manifest_url(&self, reference: &RepositoryReference) -> Result<String, UrlError> {
        let Some(qualifier) = reference.reference() else {
            return Err(UrlError::MissingReference(reference.name.clone()));
        };

        self.route(format!("/v2/{}/manifests/{}", reference.name, qualifier))
    }

    fn blob_url(&self, repository: &str, digest: &str) -> Result<String, UrlError> {
        self.route(format!("/v2/{repository}/blobs/{digest}"))
    }
}
