//! Conversion of registry operations into events
//!
//! A [`Bridge`] is created for each inbound registry request. Every event it
//! emits carries the same source, actor and request records.

use std::sync::Arc;

use crate::error::BridgeError;
use crate::event::{Action, ActorRecord, Descriptor, Event, RequestRecord, SourceRecord, Target};
use crate::manifest::{self, Manifest};
use crate::sink::Sink;
use crate::url::{RepositoryReference, UrlBuilder};

/// Extra details for manifest events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestOptions {
    /// The tag the manifest was pushed or pulled by
    pub tag: Option<String>,
}

impl ManifestOptions {
    /// Options for a manifest addressed by tag
    pub fn tagged(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
        }
    }
}

/// Emits events for one inbound request into a sink
#[derive(Debug, Clone)]
pub struct Bridge {
    sink: Arc<dyn Sink>,
    urls: Arc<dyn UrlBuilder>,
    source: SourceRecord,
    actor: ActorRecord,
    request: RequestRecord,
    include_references: bool,
}

impl Bridge {
    /// Create a bridge writing to `sink`
    pub fn new(
        sink: Arc<dyn Sink>,
        urls: Arc<dyn UrlBuilder>,
        source: SourceRecord,
        actor: ActorRecord,
        request: RequestRecord,
    ) -> Self {
        Self {
            sink,
            urls,
            source,
            actor,
            request,
            include_references: false,
        }
    }

    /// Attach the descriptors a manifest references to its push and pull events
    pub fn include_references(mut self, include: bool) -> Self {
        self.include_references = include;
        self
    }

    /// A manifest was uploaded
    pub async fn manifest_pushed(
        &self,
        repository: &str,
        manifest: &dyn Manifest,
        options: ManifestOptions,
    ) -> Result<(), BridgeError> {
        let event = self.manifest_event(Action::Push, repository, manifest, options)?;
        self.write(event).await
    }

    /// A manifest was downloaded
    pub async fn manifest_pulled(
        &self,
        repository: &str,
        manifest: &dyn Manifest,
        options: ManifestOptions,
    ) -> Result<(), BridgeError> {
        let event = self.manifest_event(Action::Pull, repository, manifest, options)?;
        self.write(event).await
    }

    /// A manifest was deleted by digest
    pub async fn manifest_deleted(&self, repository: &str, digest: &str) -> Result<(), BridgeError> {
        self.write(self.event(
            Action::Delete,
            Target {
                digest: digest.to_owned(),
                repository: repository.to_owned(),
                ..Default::default()
            },
        ))
        .await
    }

    /// A tag was deleted
    pub async fn tag_deleted(&self, repository: &str, tag: &str) -> Result<(), BridgeError> {
        self.write(self.event(
            Action::Delete,
            Target {
                tag: Some(tag.to_owned()),
                repository: repository.to_owned(),
                ..Default::default()
            },
        ))
        .await
    }

    /// A whole repository was deleted
    pub async fn repo_deleted(&self, repository: &str) -> Result<(), BridgeError> {
        self.write(self.event(
            Action::Delete,
            Target {
                repository: repository.to_owned(),
                ..Default::default()
            },
        ))
        .await
    }

    /// A blob upload completed
    pub async fn blob_pushed(&self, repository: &str, blob: &Descriptor) -> Result<(), BridgeError> {
        let event = self.event(Action::Push, self.blob_target(repository, blob)?);
        self.write(event).await
    }

    /// A blob was downloaded
    pub async fn blob_pulled(&self, repository: &str, blob: &Descriptor) -> Result<(), BridgeError> {
        let event = self.event(Action::Pull, self.blob_target(repository, blob)?);
        self.write(event).await
    }

    /// A blob was deleted
    pub async fn blob_deleted(&self, repository: &str, digest: &str) -> Result<(), BridgeError> {
        self.write(self.event(
            Action::Delete,
            Target {
                digest: digest.to_owned(),
                repository: repository.to_owned(),
                ..Default::default()
            },
        ))
        .await
    }

    /// A blob was mounted into `repository` from `from_repository`
    pub async fn blob_mounted(
        &self,
        repository: &str,
        blob: &Descriptor,
        from_repository: &str,
    ) -> Result<(), BridgeError> {
        let mut target = self.blob_target(repository, blob)?;
        target.from_repository = Some(from_repository.to_owned());
        self.write(self.event(Action::Mount, target)).await
    }

    fn manifest_event(
        &self,
        action: Action,
        repository: &str,
        manifest: &dyn Manifest,
        options: ManifestOptions,
    ) -> Result<Event, BridgeError> {
        let (media_type, payload) = manifest.payload()?;
        let digest = manifest::digest(&payload);
        let size = payload.len() as u64;

        let reference = RepositoryReference::new(repository).with_digest(digest.clone());
        let url = self.urls.manifest_url(&reference)?;

        let references = if self.include_references {
            manifest.references()
        } else {
            Vec::new()
        };

        Ok(self.event(
            action,
            Target {
                media_type,
                digest,
                size,
                length: size,
                repository: repository.to_owned(),
                url: Some(url),
                tag: options.tag,
                references,
                ..Default::default()
            },
        ))
    }

    fn blob_target(&self, repository: &str, blob: &Descriptor) -> Result<Target, BridgeError> {
        let url = self.urls.blob_url(repository, &blob.digest)?;

        Ok(Target {
            media_type: blob.media_type.clone(),
            digest: blob.digest.clone(),
            size: blob.size,
            length: blob.size,
            repository: repository.to_owned(),
            url: Some(url),
            ..Default::default()
        })
    }

    fn event(&self, action: Action, target: Target) -> Event {
        Event::new(
            action,
            target,
            self.request.clone(),
            self.actor.clone(),
            self.source.clone(),
        )
    }

    async fn write(&self, event: Event) -> Result<(), BridgeError> {
        tracing::trace!(
            id = %event.id,
            action = %event.action,
            repository = %event.target.repository,
            "emitting event"
        );
        self.sink.write(&event).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SinkError, UrlError};
    use crate::manifest::RawManifest;
    use crate::manifest::tests::IMAGE;
    use crate::sink::testing::RecordingSink;
    use crate::url::RouteUrlBuilder;

    fn bridge(sink: &Arc<RecordingSink>) -> Bridge {
        Bridge::new(
            sink.clone(),
            Arc::new(RouteUrlBuilder::new()),
            SourceRecord::new("registry-0:5000"),
            ActorRecord::new("alice"),
            RequestRecord {
                id: "req-1".into(),
                method: "PUT".into(),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn manifest_pushed() {
        let sink = Arc::new(RecordingSink::new());
        let bridge = bridge(&sink);
        let manifest = RawManifest::new(IMAGE).unwrap();

        bridge
            .manifest_pushed("library/alpine", &manifest, ManifestOptions::tagged("3.20"))
            .await
            .unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        let digest = manifest.digest();

        assert_eq!(event.action, Action::Push);
        assert_eq!(event.target.media_type, manifest.media_type());
        assert_eq!(event.target.digest, digest);
        assert_eq!(event.target.size, IMAGE.len() as u64);
        assert_eq!(event.target.length, event.target.size);
        assert_eq!(event.target.repository, "library/alpine");
        assert_eq!(
            event.target.url.as_deref(),
            Some(format!("/v2/library/alpine/manifests/{digest}").as_str())
        );
        assert_eq!(event.target.tag.as_deref(), Some("3.20"));
        assert!(event.target.references.is_empty());
        assert_eq!(event.actor.name, "alice");
        assert_eq!(event.request.id, "req-1");
    }

    #[tokio::test]
    async fn references_when_enabled() {
        let sink = Arc::new(RecordingSink::new());
        let bridge = bridge(&sink).include_references(true);
        let manifest = RawManifest::new(IMAGE).unwrap();

        bridge
            .manifest_pulled("library/alpine", &manifest, ManifestOptions::default())
            .await
            .unwrap();

        let event = &sink.events()[0];
        assert_eq!(event.action, Action::Pull);
        assert_eq!(event.target.references, manifest.references());
        assert_eq!(event.target.tag, None);
    }

    #[tokio::test]
    async fn delete_events_carry_only_their_subject() {
        let sink = Arc::new(RecordingSink::new());
        let bridge = bridge(&sink);

        bridge.manifest_deleted("app", "sha256:abc").await.unwrap();
        bridge.tag_deleted("app", "latest").await.unwrap();
        bridge.repo_deleted("app").await.unwrap();

        let events = sink.events();
        assert!(events.iter().all(|e| e.action == Action::Delete));
        assert_eq!(
            events[0].target,
            Target {
                digest: "sha256:abc".into(),
                repository: "app".into(),
                ..Default::default()
            }
        );
        assert_eq!(
            events[1].target,
            Target {
                tag: Some("latest".into()),
                repository: "app".into(),
                ..Default::default()
            }
        );
        assert_eq!(
            events[2].target,
            Target {
                repository: "app".into(),
                ..Default::default()
            }
        );
    }

    #[tokio::test]
    async fn blob_events() {
        let sink = Arc::new(RecordingSink::new());
        let bridge = bridge(&sink);
        let blob = Descriptor {
            media_type: "application/vnd.oci.image.layer.v1.tar+gzip".into(),
            digest: "sha256:1a7e5".into(),
            size: 3623807,
        };

        bridge.blob_pushed("app", &blob).await.unwrap();
        bridge.blob_pulled("app", &blob).await.unwrap();
        bridge.blob_mounted("app", &blob, "base").await.unwrap();
        bridge.blob_deleted("app", &blob.digest).await.unwrap();

        let events = sink.events();
        let actions: Vec<_> = events.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            [Action::Push, Action::Pull, Action::Mount, Action::Delete]
        );

        assert_eq!(events[0].target.url.as_deref(), Some("/v2/app/blobs/sha256:1a7e5"));
        assert_eq!(events[0].target.size, 3623807);
        assert_eq!(events[2].target.from_repository.as_deref(), Some("base"));
        assert_eq!(events[3].target.url, None);
        assert_eq!(events[3].target.digest, "sha256:1a7e5");
    }

    #[tokio::test]
    async fn every_event_is_new() {
        let sink = Arc::new(RecordingSink::new());
        let bridge = bridge(&sink);

        bridge.repo_deleted("app").await.unwrap();
        bridge.repo_deleted("app").await.unwrap();

        let events = sink.events();
        assert_ne!(events[0].id, events[1].id);
        assert_eq!(events[0].source, events[1].source);
    }

    #[tokio::test]
    async fn errors_are_reported() {
        let sink = Arc::new(RecordingSink::new());
        let bridge = bridge(&sink);

        let blob = Descriptor {
            media_type: String::new(),
            digest: "sha256:abc".into(),
            size: 1,
        };
        assert!(matches!(
            bridge.blob_pushed("not a repository", &blob).await,
            Err(BridgeError::Url(UrlError::Invalid(_)))
        ));

        sink.close().await.unwrap();
        assert!(matches!(
            bridge.repo_deleted("app").await,
            Err(BridgeError::Sink(SinkError::Closed))
        ));
    }
}
