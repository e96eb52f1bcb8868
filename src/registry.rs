use std::io::{Read, Seek};

use crate::{digest::Digest, manifest::RawManifest, PullError, Reference};

/// A readable and seekable stream, like the content of a blob.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Access to the registry hosting a repository.
///
/// [`RegistryClient`](crate::RegistryClient) implements it over HTTP.
/// Authentication and transport setup happen before the puller uses it.
pub trait Registry: Sync {
    /// Get the image manifest for `reference`.
    ///
    /// If the registry returns a manifest list, the implementation is
    /// expected to resolve it to the manifest for the target platform.
    fn fetch_manifest(&self, reference: &Reference) -> Result<RawManifest, PullError>;

    /// Open the blob with `digest`.
    ///
    /// Fails with [`PullError::NotFound`] if the registry does not know
    /// the digest.
    fn open_blob(&self, digest: &Digest) -> Result<Box<dyn ReadSeek + '_>, PullError>;

    /// Signatures attached to the manifest with `digest`.
    ///
    /// By default, there are no signatures.
    fn signatures(&self, digest: &Digest) -> Result<Vec<Vec<u8>>, PullError> {
        let _ = digest;
        Ok(Vec::new())
    }
}
