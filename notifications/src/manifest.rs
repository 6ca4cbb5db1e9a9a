//! Introspection of manifests for notification events

use std::fmt;

use bytes::Bytes;
use serde::Deserialize;
use sha2::Digest as _;

use crate::error::ManifestError;
use crate::event::Descriptor;

/// Docker schema 1 image manifest
pub const DOCKER_MANIFEST_V1: &str = "application/vnd.docker.distribution.manifest.v1+json";

/// Docker schema 2 image manifest
pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Docker schema 2 manifest list
pub const DOCKER_MANIFEST_LIST_V2: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// OCI image manifest
pub const OCI_MANIFEST_V1: &str = "application/vnd.oci.image.manifest.v1+json";

/// A manifest, as seen by the notification bridge
pub trait Manifest: fmt::Debug + Send + Sync {
    /// The canonical media type and serialized bytes of this manifest
    fn payload(&self) -> Result<(String, Bytes), ManifestError>;

    /// Descriptors of the content this manifest references
    fn references(&self) -> Vec<Descriptor>;
}

/// The content digest of `data`, in `sha256:<hex>` form
pub fn digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(sha2::Sha256::digest(data)))
}

#[derive(Debug, Deserialize)]
struct FsLayer {
    #[serde(rename = "blobSum")]
    blob_sum: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    schema_version: Option<u64>,
    media_type: Option<String>,
    config: Option<Descriptor>,
    #[serde(default)]
    layers: Vec<Descriptor>,
    #[serde(default)]
    manifests: Vec<Descriptor>,
    #[serde(default)]
    fs_layers: Vec<FsLayer>,
}

impl Document {
    fn media_type(&self) -> Result<String, ManifestError> {
        if let Some(media_type) = self.media_type.as_deref().filter(|m| !m.is_empty()) {
            return Ok(media_type.to_owned());
        }

        match self.schema_version {
            Some(1) => Ok(DOCKER_MANIFEST_V1.to_owned()),
            Some(2) if !self.manifests.is_empty() => Ok(DOCKER_MANIFEST_LIST_V2.to_owned()),
            Some(2) => Ok(DOCKER_MANIFEST_V2.to_owned()),
            Some(other) => Err(ManifestError::Invalid(format!(
                "unsupported schemaVersion {other}"
            ))),
            None => Ok(OCI_MANIFEST_V1.to_owned()),
        }
    }

    fn into_references(self) -> Vec<Descriptor> {
        let blobs = self.fs_layers.into_iter().map(|layer| Descriptor {
            media_type: String::new(),
            digest: layer.blob_sum,
            size: 0,
        });

        self.config
            .into_iter()
            .chain(self.layers)
            .chain(self.manifests)
            .chain(blobs)
            .collect()
    }
}

/// A manifest held as the exact bytes a client uploaded.
///
/// The media type comes from the payload's `mediaType` field when present,
/// and is otherwise inferred from `schemaVersion` and the shape of the
/// document.
#[derive(Debug, Clone)]
pub struct RawManifest {
    media_type: String,
    data: Bytes,
    references: Vec<Descriptor>,
}

impl RawManifest {
    /// Parse a manifest payload
    pub fn new(data: impl Into<Bytes>) -> Result<Self, ManifestError> {
        let data = data.into();
        let document: Document = serde_json::from_slice(&data)?;
        let media_type = document.media_type()?;

        Ok(Self {
            media_type,
            references: document.into_references(),
            data,
        })
    }

    /// Parse a manifest payload uploaded with an explicit content type,
    /// which takes precedence over the one found in the payload.
    pub fn with_media_type(
        media_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Result<Self, ManifestError> {
        let mut manifest = Self::new(data)?;
        let media_type = media_type.into();
        if !media_type.is_empty() {
            manifest.media_type = media_type;
        }
        Ok(manifest)
    }

    /// The media type of this manifest
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// The digest of the manifest bytes
    pub fn digest(&self) -> String {
        digest(&self.data)
    }

    /// Size of the manifest in bytes
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

impl Manifest for RawManifest {
    fn payload(&self) -> Result<(String, Bytes), ManifestError> {
        Ok((self.media_type.clone(), self.data.clone()))
    }

    fn references(&self) -> Vec<Descriptor> {
        self.references.clone()
    }
}
