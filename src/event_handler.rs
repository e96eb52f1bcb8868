use std::fmt::Display;

use crate::{digest::Digest, puller::PullState, PullError};

/// Handler to receive notifications for events during the pull process.
///
/// All methods are optional. Methods related to downloads are invoked
/// from the download threads.
#[expect(unused_variables)]
pub trait EventHandler: Send + Sync {
    /// HTTP request to the registry.
    fn registry_request(&self, url: &str) {}

    /// Registry requires an [authentication token][token].
    ///
    /// [token]: https://distribution.github.io/distribution/spec/auth/token/
    fn registry_auth(&self, url: &str) {}

    /// The puller moved to a new state.
    fn state_changed(&self, state: &PullState) {}

    /// The manifest has been downloaded and parsed.
    ///
    /// `layers` is the number of entries in its history.
    fn manifest_resolved(&self, digest: &Digest, layers: usize) {}

    /// Start to download a layer.
    ///
    /// `size` is taken from the manifest, if present.
    fn layer_download_start(&self, digest: &Digest, size: Option<u64>) {}

    /// Some data (in `bytes`) has been received.
    ///
    /// This method is invoked very frequently.
    fn download_progress_bytes(&self, bytes: usize) {}

    /// A layer was already in the store, so it was not downloaded.
    fn layer_reused(&self, digest: &Digest) {}

    /// A URL for a foreign layer could not be opened. The next URL,
    /// if any, will be tried.
    fn foreign_url_failed(&self, url: &str, cause: &dyn Display) {}

    /// A layer has been written to the store.
    fn layer_committed(&self, digest: &Digest) {}

    /// Signatures could not be recorded. The pull continues.
    fn signatures_failed(&self, error: &PullError) {}

    /// The image is visible in the store.
    fn image_committed(&self, id: &Digest) {}
}

/// [`EventHandler`] instance to ignore all events.
pub struct NoEventHandler;

impl EventHandler for NoEventHandler {}
