//! Image manifests, reduced to what a pull needs: the ordered list of
//! layers, and the metadata embedded in schema 1 history entries.

mod mediatype;
mod schema1;

use std::borrow::Cow;

use crate::{digest::Digest, layer::LayerDescriptor, PullError};

pub use mediatype::{InvalidMediaType, MediaType};

/// Manifest as received from the registry, before parsing.
#[derive(Clone, Debug)]
pub struct RawManifest {
    pub media_type: MediaType,
    pub bytes: Vec<u8>,
}

/// An image manifest.
///
/// The history is ordered from the oldest to the newest layer, so each
/// layer applies on top of the previous one.
#[derive(Clone, Debug)]
pub struct Manifest {
    pub media_type: MediaType,
    pub history: Vec<HistoryEntry>,
}

/// One entry in the history of a [`Manifest`].
#[derive(Clone, Debug)]
pub struct HistoryEntry {
    pub layer: LayerDescriptor,

    /// Metadata of the layer (`v1Compatibility`), only present in
    /// schema 1 manifests.
    pub v1_compatibility: Option<String>,
}

/// Metadata embedded in a schema 1 history entry.
#[derive(serde::Deserialize, Debug, Default)]
pub struct V1Image {
    #[serde(default, alias = "Id")]
    pub id: String,

    #[serde(default, alias = "Parent")]
    pub parent: String,
}

impl Manifest {
    /// Parse a manifest received from the registry.
    pub fn parse(raw: &RawManifest) -> Result<Manifest, PullError> {
        let history = match raw.media_type {
            MediaType::DockerManifestV1 | MediaType::DockerManifestV1Signed => {
                schema1::history(&raw.bytes)?
            }

            MediaType::DockerManifestV2 | MediaType::OciManifestV1 => image_history(&raw.bytes)?,

            other => {
                return Err(PullError::MalformedManifest(format!(
                    "unexpected media type {other}"
                )))
            }
        };

        if history.is_empty() {
            return Err(PullError::MalformedManifest("no layers".into()));
        }

        Ok(Manifest {
            media_type: raw.media_type,
            history,
        })
    }
}

impl HistoryEntry {
    /// Decode the embedded metadata, if any.
    pub fn v1_image(&self) -> Result<Option<V1Image>, PullError> {
        self.v1_compatibility
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| PullError::MalformedManifest(format!("invalid v1Compatibility: {e}")))
    }
}

/// Layers of a Docker schema 2 or OCI manifest.
///
/// Refs:
///
/// * https://distribution.github.io/distribution/spec/manifest-v2-2/
/// * https://github.com/opencontainers/image-spec/blob/main/manifest.md
fn image_history(bytes: &[u8]) -> Result<Vec<HistoryEntry>, PullError> {
    #[derive(serde::Deserialize, Debug)]
    struct Image {
        layers: Vec<LayerDescriptor>,
    }

    let image: Image = serde_json::from_slice(bytes)
        .map_err(|e| PullError::MalformedManifest(e.to_string()))?;

    let history = image
        .layers
        .into_iter()
        .map(|layer| HistoryEntry {
            layer,
            v1_compatibility: None,
        })
        .collect();

    Ok(history)
}

/// Compute the canonical digest of a manifest.
///
/// For signed schema 1 manifests, the digest is computed over the
/// payload without the signatures. For any other type, it is the
/// digest of the bytes as served by the registry.
pub fn digest(raw: &RawManifest) -> Result<Digest, PullError> {
    Ok(Digest::sha256_of(&canonical_payload(raw)?))
}

/// Check if the manifest content matches `expected`.
pub(crate) fn verify(raw: &RawManifest, expected: &Digest) -> Result<bool, PullError> {
    Ok(expected.matches(&canonical_payload(raw)?))
}

fn canonical_payload(raw: &RawManifest) -> Result<Cow<'_, [u8]>, PullError> {
    match raw.media_type {
        MediaType::DockerManifestV1Signed => schema1::unsigned_payload(&raw.bytes)
            .map(Cow::Owned)
            .map_err(PullError::DigestComputation),

        _ => Ok(Cow::Borrowed(&raw.bytes)),
    }
}

#[test]
fn parse_image_manifest() {
    let layer_digest = Digest::sha256_of(b"layer");
    let json = format!(
        r#"{{
            "schemaVersion": 2,
            "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
            "config": {{ "mediaType": "application/vnd.docker.container.image.v1+json", "digest": "{layer_digest}", "size": 1 }},
            "layers": [
                {{ "mediaType": "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip",
                   "digest": "{layer_digest}",
                   "size": 5,
                   "urls": ["http://a.example/1", "http://b.example/1"] }},
                {{ "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                   "digest": "{layer_digest}",
                   "size": 5 }}
            ]
        }}"#
    );

    let raw = RawManifest {
        media_type: MediaType::DockerManifestV2,
        bytes: json.into_bytes(),
    };

    let manifest = Manifest::parse(&raw).unwrap();
    assert_eq!(manifest.history.len(), 2);

    let foreign = &manifest.history[0].layer;
    assert!(foreign.media_type.is_foreign());
    assert_eq!(foreign.urls.len(), 2);
    assert_eq!(foreign.size, Some(5));

    assert!(manifest.history[1].layer.urls.is_empty());
    assert!(manifest.history[1].v1_image().unwrap().is_none());

    assert_eq!(digest(&raw).unwrap(), Digest::sha256_of(&raw.bytes));
}

#[test]
fn reject_manifest_without_layers() {
    let raw = RawManifest {
        media_type: MediaType::OciManifestV1,
        bytes: br#"{"layers": []}"#.to_vec(),
    };

    assert!(matches!(
        Manifest::parse(&raw),
        Err(PullError::MalformedManifest(_))
    ));

    let raw = RawManifest {
        media_type: MediaType::OciImageIndex,
        bytes: br#"{"manifests": []}"#.to_vec(),
    };

    assert!(matches!(
        Manifest::parse(&raw),
        Err(PullError::MalformedManifest(_))
    ));
}
