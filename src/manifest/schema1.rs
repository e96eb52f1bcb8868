//! Docker image manifest, schema 1.
//!
//! Layers and history are listed from the newest to the oldest, so they
//! are reversed when building the [`HistoryEntry`] list.
//!
//! See <https://distribution.github.io/distribution/spec/manifest-v2-1/>.

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};

use crate::{digest::Digest, layer::LayerDescriptor, PullError};

use super::{HistoryEntry, MediaType};

/// Base64 (URL-safe) as used by JWS, with optional padding.
const JOSE_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(serde::Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Schema1 {
    fs_layers: Vec<FsLayer>,
    history: Vec<History>,
}

#[derive(serde::Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct FsLayer {
    blob_sum: Digest,
}

#[derive(serde::Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct History {
    v1_compatibility: String,
}

pub(super) fn history(bytes: &[u8]) -> Result<Vec<HistoryEntry>, PullError> {
    let Schema1 { fs_layers, history } =
        serde_json::from_slice(bytes).map_err(|e| PullError::MalformedManifest(e.to_string()))?;

    if fs_layers.len() != history.len() {
        return Err(PullError::MalformedManifest(format!(
            "{} layers, but {} history entries",
            fs_layers.len(),
            history.len()
        )));
    }

    let entries = fs_layers
        .into_iter()
        .zip(history)
        .rev()
        .map(|(layer, history)| HistoryEntry {
            layer: LayerDescriptor::new(layer.blob_sum, MediaType::DockerFsTarGzip),
            v1_compatibility: Some(history.v1_compatibility),
        })
        .collect();

    Ok(entries)
}

/// Rebuild the payload of a signed manifest, without its signatures.
///
/// The protected header of the first signature contains the length of
/// the payload before the `signatures` key (`formatLength`), and the
/// bytes that close the JSON object after removing it (`formatTail`).
///
/// See <https://github.com/docker/libtrust>.
pub(super) fn unsigned_payload(bytes: &[u8]) -> Result<Vec<u8>, String> {
    #[derive(serde::Deserialize, Debug)]
    struct Signed {
        #[serde(default)]
        signatures: Vec<Signature>,
    }

    #[derive(serde::Deserialize, Debug)]
    struct Signature {
        protected: String,
    }

    #[derive(serde::Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    struct Protected {
        format_length: usize,
        format_tail: String,
    }

    let signed: Signed = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;

    let signature = signed
        .signatures
        .first()
        .ok_or_else(|| "missing signatures".to_owned())?;

    let protected = JOSE_BASE64
        .decode(&signature.protected)
        .map_err(|e| format!("invalid protected header: {e}"))?;

    let protected: Protected =
        serde_json::from_slice(&protected).map_err(|e| format!("invalid protected header: {e}"))?;

    let tail = JOSE_BASE64
        .decode(&protected.format_tail)
        .map_err(|e| format!("invalid formatTail: {e}"))?;

    let head = bytes
        .get(..protected.format_length)
        .ok_or_else(|| format!("formatLength {} out of range", protected.format_length))?;

    let mut payload = Vec::with_capacity(head.len() + tail.len());
    payload.extend_from_slice(head);
    payload.extend_from_slice(&tail);
    Ok(payload)
}

#[cfg(test)]
pub(crate) fn sign(payload: &str) -> String {
    // Split the JSON object before its closing brace, as libtrust does.
    let close = payload.rfind('}').expect("JSON object");
    let (head, tail) = payload.split_at(close);
    let head = head.trim_end();

    let protected = format!(
        r#"{{"formatLength":{},"formatTail":"{}","time":"2016-01-01T00:00:00Z"}}"#,
        head.len(),
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(format!("\n{tail}"))
    );

    format!(
        r#"{head},
   "signatures": [
      {{
         "header": {{ "alg": "ES256" }},
         "signature": "c2lnbmF0dXJl",
         "protected": "{}"
      }}
   ]
}}"#,
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(protected)
    )
}

#[test]
fn reverse_schema1_history() {
    let d1 = Digest::sha256_of(b"1");
    let d2 = Digest::sha256_of(b"2");

    let json = format!(
        r#"{{
            "schemaVersion": 1,
            "fsLayers": [ {{ "blobSum": "{d2}" }}, {{ "blobSum": "{d1}" }} ],
            "history": [
                {{ "v1Compatibility": "{{\"id\":\"top\",\"parent\":\"base\"}}" }},
                {{ "v1Compatibility": "{{\"id\":\"base\",\"parent\":\"B\"}}" }}
            ]
        }}"#
    );

    let entries = history(json.as_bytes()).unwrap();

    assert_eq!(entries[0].layer.digest, d1);
    assert_eq!(entries[1].layer.digest, d2);

    let oldest = entries[0].v1_image().unwrap().unwrap();
    assert_eq!(oldest.id, "base");
    assert_eq!(oldest.parent, "B");
}

#[test]
fn digest_of_signed_manifest() {
    use super::RawManifest;

    let payload = r#"{
   "schemaVersion": 1,
   "name": "foo/bar",
   "fsLayers": [],
   "history": []
}"#;

    let signed = sign(payload);
    assert_ne!(signed, payload);

    let raw = RawManifest {
        media_type: MediaType::DockerManifestV1Signed,
        bytes: signed.into_bytes(),
    };

    assert_eq!(unsigned_payload(&raw.bytes).unwrap(), payload.as_bytes());
    assert_eq!(
        super::digest(&raw).unwrap(),
        Digest::sha256_of(payload.as_bytes())
    );

    // Without signatures, the digest can't be computed.
    let raw = RawManifest {
        media_type: MediaType::DockerManifestV1Signed,
        bytes: payload.as_bytes().to_vec(),
    };

    assert!(matches!(
        super::digest(&raw),
        Err(PullError::DigestComputation(_))
    ));
}
