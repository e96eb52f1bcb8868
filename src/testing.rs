//! Helpers for unit tests.

use std::{
    collections::HashMap,
    io::Cursor,
    sync::Mutex,
};

use flate2::write::GzEncoder;

use crate::{
    digest::Digest,
    manifest::{MediaType, RawManifest},
    registry::{ReadSeek, Registry},
    PullError, Reference,
};

/// Build a gzip-compressed tar archive with a single file.
pub(crate) fn layer_archive(content: &str) -> Vec<u8> {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Default::default()));
    builder
        .append_data(&mut header, "file", content.as_bytes())
        .unwrap();

    builder.into_inner().unwrap().finish().unwrap()
}

/// Build a schema 2 manifest for `layers`.
pub(crate) fn image_manifest(layers: &[Vec<u8>]) -> RawManifest {
    let layers: Vec<_> = layers
        .iter()
        .map(|data| {
            serde_json::json!({
                "mediaType": MediaType::DockerFsTarGzip,
                "digest": Digest::sha256_of(data),
                "size": data.len(),
            })
        })
        .collect();

    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": MediaType::DockerManifestV2,
        "config": {
            "mediaType": MediaType::DockerImageV1,
            "digest": Digest::sha256_of(b"{}"),
            "size": 2,
        },
        "layers": layers,
    });

    RawManifest {
        media_type: MediaType::DockerManifestV2,
        bytes: serde_json::to_vec_pretty(&manifest).unwrap(),
    }
}

/// [`Registry`] with a single manifest, and blobs in memory.
///
/// It records the blobs requested by the puller.
pub(crate) struct MemoryRegistry {
    manifest: RawManifest,
    blobs: HashMap<Digest, Vec<u8>>,
    signatures: Vec<Vec<u8>>,
    blob_requests: Mutex<Vec<Digest>>,
}

impl MemoryRegistry {
    /// Registry with a schema 2 manifest for `layers`.
    pub fn new(layers: &[Vec<u8>]) -> Self {
        Self::with_manifest(image_manifest(layers), layers)
    }

    pub fn with_manifest(manifest: RawManifest, blobs: &[Vec<u8>]) -> Self {
        MemoryRegistry {
            manifest,
            blobs: blobs
                .iter()
                .map(|data| (Digest::sha256_of(data), data.clone()))
                .collect(),
            signatures: Vec::new(),
            blob_requests: Default::default(),
        }
    }

    pub fn signatures(mut self, signatures: &[&[u8]]) -> Self {
        self.signatures = signatures.iter().map(|s| s.to_vec()).collect();
        self
    }

    pub fn manifest_digest(&self) -> Digest {
        crate::manifest::digest(&self.manifest).unwrap()
    }

    /// Number of requests for the blob with `digest`.
    pub fn blob_requests(&self, digest: &Digest) -> usize {
        self.blob_requests
            .lock()
            .unwrap()
            .iter()
            .filter(|d| *d == digest)
            .count()
    }

    pub fn total_blob_requests(&self) -> usize {
        self.blob_requests.lock().unwrap().len()
    }
}

impl Registry for MemoryRegistry {
    fn fetch_manifest(&self, _: &Reference) -> Result<RawManifest, PullError> {
        Ok(self.manifest.clone())
    }

    fn open_blob(&self, digest: &Digest) -> Result<Box<dyn ReadSeek + '_>, PullError> {
        self.blob_requests.lock().unwrap().push(digest.clone());

        match self.blobs.get(digest) {
            Some(data) => Ok(Box::new(Cursor::new(data.clone()))),
            None => Err(PullError::NotFound(format!("blob {digest}"))),
        }
    }

    fn signatures(&self, _: &Digest) -> Result<Vec<Vec<u8>>, PullError> {
        Ok(self.signatures.clone())
    }
}
