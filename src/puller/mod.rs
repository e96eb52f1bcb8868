//! Pull an image from a registry into a local store.

mod download;
mod state;


use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{
    digest::Digest,
    error::try_store,
    manifest::{self, Manifest},
    platform::{Platform, Platforms},
    registry::Registry,
    store::{ImageRecord, LayerStore, RootFs},
    trust::UnparsedImage,
    EventHandler, NoEventHandler, PullError, Reference,
};

use download::{Download, Downloader, Staged};

pub use state::PullState;

/// Default number of threads to download layers.
const DEFAULT_CONCURRENCY: usize = 8;

/// Signal to cancel a pull.
///
/// Clones share the same signal, so one of them can be given to the
/// [`Puller`] and another one kept to call [`cancel`](Self::cancel)
/// from a different thread.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Result of a successful pull.
#[derive(Debug)]
pub struct Pulled<'a> {
    /// Reference after the trust checks. It is pinned to the manifest
    /// digest if a policy allowed the image.
    pub reference: Reference<'a>,

    /// ID of the image in the store.
    pub image_id: Digest,

    pub rootfs: RootFs,

    /// Error from storing the signatures. It does not prevent the image
    /// from being committed.
    pub signature_error: Option<PullError>,
}

/// Pull images from a registry into a [`LayerStore`].
///
/// # Examples
///
/// ```no_run
/// # use std::sync::Arc;
/// # use oci_pull::*;
/// let reference = Reference::try_from("debian:stable").unwrap();
///
/// let registry = RegistryClient::new(&reference, &NoEventHandler);
/// let store = FsStore::new("/tmp/images").unwrap();
/// let signatures = Arc::new(FsSignatureStore::new("/tmp/signatures"));
/// let platforms = Platforms::with_defaults(None, signatures);
///
/// let pulled = Puller::new(&registry, &store, &platforms)
///     .unwrap()
///     .concurrency(4)
///     .pull(&reference)
///     .unwrap();
///
/// println!("{} {:?}", pulled.image_id, pulled.rootfs.layers);
/// ```
pub struct Puller<'r> {
    registry: &'r dyn Registry,
    store: &'r dyn LayerStore,
    platform: Arc<dyn Platform>,
    event_handler: &'r dyn EventHandler,
    concurrency: usize,
    cancel_token: CancelToken,
}

impl<'r> Puller<'r> {
    /// Create a puller with the variant selected in `platforms`.
    pub fn new(
        registry: &'r dyn Registry,
        store: &'r dyn LayerStore,
        platforms: &Platforms,
    ) -> Result<Self, PullError> {
        Ok(Puller {
            registry,
            store,
            platform: platforms.selected()?,
            event_handler: &NoEventHandler,
            concurrency: DEFAULT_CONCURRENCY,
            cancel_token: CancelToken::new(),
        })
    }

    pub fn event_handler(mut self, event_handler: &'r dyn EventHandler) -> Self {
        self.event_handler = event_handler;
        self
    }

    /// Maximum number of layers to download in parallel.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn cancel_token(mut self, cancel_token: CancelToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    pub fn platform(&self) -> &dyn Platform {
        &*self.platform
    }

    /// Pull the image of `reference`.
    ///
    /// The image is visible in the store only if this function returns
    /// `Ok`. Layers written to the store before a failure are kept, and
    /// reused by the next pull.
    pub fn pull<'a>(&self, reference: &Reference<'a>) -> Result<Pulled<'a>, PullError> {
        tracing::info!(%reference, platform = self.platform.name(), "Pull started");

        let mut session = Session {
            puller: self,
            image: UnparsedImage::new(self.registry, reference),
            reference: reference.clone(),
            resolved: None,
            rootfs: RootFs::new(),
        };

        let mut state = PullState::Start;
        let mut signature_error = None;

        loop {
            self.event_handler.state_changed(&state);

            let result = if self.cancel_token.is_cancelled() {
                Err(PullError::Cancelled)
            } else {
                session.run(state)
            };

            let next = state.next(result.as_ref().map(|_| ()).map_err(PullError::kind));

            if let Err(error) = result {
                if let PullState::Failed(_) = next {
                    self.event_handler.state_changed(&next);
                    tracing::warn!(%reference, %state, %error, "Pull failed");
                    return Err(error);
                }

                tracing::warn!(%reference, %error, "Signatures not recorded");
                self.event_handler.signatures_failed(&error);
                signature_error = Some(error);
            }

            if state == PullState::Done {
                return session.finish(signature_error);
            }

            state = next;
        }
    }
}

/// Manifest after [`PullState::ResolvingManifest`].
struct Resolved {
    manifest: Manifest,
    digest: Digest,
}

/// Data for a single pull.
struct Session<'p, 'r, 'a> {
    puller: &'p Puller<'r>,
    image: UnparsedImage<'r, 'a>,
    reference: Reference<'a>,
    resolved: Option<Resolved>,
    rootfs: RootFs,
}

impl<'a> Session<'_, '_, 'a> {
    /// Run the action for `state`.
    fn run(&mut self, state: PullState) -> Result<(), PullError> {
        match state {
            PullState::Start | PullState::Failed(_) => Ok(()),
            PullState::ResolvingManifest => self.resolve_manifest(),
            PullState::PolicyCheck => self.check_policy(),
            PullState::FetchingLayers => self.fetch_layers(),
            PullState::ReconcilingBase => self.reconcile_base(),
            PullState::RecordingSignatures => self.record_signatures(),
            PullState::Done => self.commit(),
        }
    }

    fn resolve_manifest(&mut self) -> Result<(), PullError> {
        let raw = self.image.manifest()?;
        let manifest = Manifest::parse(raw)?;
        let digest = manifest::digest(raw)?;

        tracing::info!(
            reference = %self.reference,
            %digest,
            media_type = %manifest.media_type,
            layers = manifest.history.len(),
            "Manifest resolved"
        );

        self.puller
            .event_handler
            .manifest_resolved(&digest, manifest.history.len());

        self.resolved = Some(Resolved { manifest, digest });
        Ok(())
    }

    fn check_policy(&mut self) -> Result<(), PullError> {
        self.reference = self.puller.platform.check_trusted(&self.image)?;
        Ok(())
    }

    fn fetch_layers(&mut self) -> Result<(), PullError> {
        let Puller {
            registry,
            store,
            event_handler,
            ..
        } = *self.puller;

        let resolved = self.resolved.as_ref().ok_or_else(not_resolved)?;

        // Layers already in the store, or repeated in the history, are
        // not downloaded.
        let mut seen = HashSet::new();
        let tasks: Vec<_> = resolved
            .manifest
            .history
            .iter()
            .map(|entry| {
                let digest = &entry.layer.digest;
                let present = !seen.insert(digest) || store.has_layer(digest);
                Download::new(&entry.layer, present)
            })
            .collect();

        let downloader = Downloader {
            registry,
            platform: &*self.puller.platform,
            event_handler,
            cancel_token: &self.puller.cancel_token,
            concurrency: self.puller.concurrency,
        };

        let mut rootfs = RootFs::new();

        downloader.run(&tasks, |task, staged| {
            if self.puller.cancel_token.is_cancelled() {
                return Err(PullError::Cancelled);
            }

            let layer = task.layer;

            match staged {
                Staged::Present => {
                    tracing::debug!(digest = %layer.digest, "Layer reused");
                    event_handler.layer_reused(&layer.digest);
                }

                Staged::File(mut file) => {
                    try_store!(
                        format!("layer {}", layer.digest),
                        store.put_layer(&layer.digest, layer.media_type, &mut file)
                    );

                    tracing::debug!(digest = %layer.digest, "Layer committed");
                    event_handler.layer_committed(&layer.digest);
                }
            }

            rootfs.append(layer.digest.clone());
            Ok(())
        })?;

        self.rootfs = rootfs;
        Ok(())
    }

    fn reconcile_base(&mut self) -> Result<(), PullError> {
        let resolved = self.resolved.as_ref().ok_or_else(not_resolved)?;

        self.puller
            .platform
            .detect_base_layer(self.puller.store, &resolved.manifest, &mut self.rootfs)
    }

    fn record_signatures(&mut self) -> Result<(), PullError> {
        let resolved = self.resolved.as_ref().ok_or_else(not_resolved)?;

        self.puller
            .platform
            .store_signatures(&resolved.digest, &self.image)
    }

    fn commit(&mut self) -> Result<(), PullError> {
        let resolved = self.resolved.as_ref().ok_or_else(not_resolved)?;

        let image = ImageRecord {
            id: resolved.digest.clone(),
            reference: self.reference.to_string(),
            rootfs: self.rootfs.clone(),
        };

        try_store!(
            format!("image {}", image.id),
            self.puller.store.commit_image(&image)
        );

        tracing::info!(reference = %self.reference, id = %image.id, "Image committed");
        self.puller.event_handler.image_committed(&image.id);

        Ok(())
    }

    fn finish(self, signature_error: Option<PullError>) -> Result<Pulled<'a>, PullError> {
        let resolved = self.resolved.ok_or_else(not_resolved)?;

        Ok(Pulled {
            reference: self.reference,
            image_id: resolved.digest,
            rootfs: self.rootfs,
            signature_error,
        })
    }
}

fn not_resolved() -> PullError {
    PullError::MalformedManifest("manifest was not resolved".into())
}
