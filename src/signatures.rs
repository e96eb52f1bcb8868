//! Storage for the signatures of pulled images.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use crate::{digest::Digest, manifest::Manifest, trust::UnparsedImage, PullError};

/// Prefix for the files with a signature.
const SIGNATURE_PREFIX: &str = "signature-";

/// Append-only storage for signatures, keyed by the identity of an
/// image.
pub trait SignatureStore: Send + Sync {
    /// Add `signature` for `identity`.
    ///
    /// Adding a signature that is already stored is not an error, and
    /// must not create a new entry.
    fn append_signature(&self, identity: &Digest, signature: &[u8]) -> io::Result<()>;
}

/// [`SignatureStore`] in a directory, with the layout of a "sigstore"
/// staging area: `$algorithm/$hash/signature-$N`, with `N` starting at
/// `1`.
pub struct FsSignatureStore {
    root: PathBuf,
}

impl FsSignatureStore {
    /// Default location used by container engines.
    pub const DEFAULT_ROOT: &'static str = "/var/lib/atomic/sigstore";

    /// Use `root` for the signatures. It is created when the first
    /// signature is appended.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsSignatureStore { root: root.into() }
    }

    fn identity_path(&self, identity: &Digest) -> PathBuf {
        self.root
            .join(identity.algorithm().as_str())
            .join(identity.hash_value().to_ascii_lowercase())
    }

    /// Signatures stored for `identity`, in the order they were added.
    pub fn signatures(&self, identity: &Digest) -> io::Result<Vec<Vec<u8>>> {
        let dir = self.identity_path(identity);

        indexed_entries(&dir)?
            .into_iter()
            .map(|(_, path)| fs::read(path))
            .collect()
    }
}

impl SignatureStore for FsSignatureStore {
    fn append_signature(&self, identity: &Digest, signature: &[u8]) -> io::Result<()> {
        let dir = self.identity_path(identity);
        fs::create_dir_all(&dir)?;

        loop {
            let entries = indexed_entries(&dir)?;

            for (_, path) in &entries {
                if fs::read(path)? == signature {
                    return Ok(());
                }
            }

            let index = entries.last().map(|(n, _)| n + 1).unwrap_or(1);

            let mut file = tempfile::Builder::new().prefix(".tmp-").tempfile_in(&dir)?;
            file.write_all(signature)?;
            file.as_file().sync_all()?;

            match file.persist_noclobber(dir.join(format!("{SIGNATURE_PREFIX}{index}"))) {
                Ok(_) => return Ok(()),

                // Another writer took the same index.
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => continue,

                Err(e) => return Err(e.error),
            }
        }
    }
}

/// Files with a signature in `dir`, sorted by their index.
fn indexed_entries(dir: &Path) -> io::Result<Vec<(u64, PathBuf)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut indexed = Vec::new();
    for entry in entries {
        let entry = entry?;

        let index = entry
            .file_name()
            .to_str()
            .and_then(|n| n.strip_prefix(SIGNATURE_PREFIX))
            .and_then(|n| n.parse::<u64>().ok());

        if let Some(index) = index {
            indexed.push((index, entry.path()));
        }
    }

    indexed.sort_unstable_by_key(|(n, _)| *n);
    Ok(indexed)
}

/// Store the signatures of `image` under `identity`.
///
/// The manifest is parsed before storing anything, so signatures are
/// only recorded for a valid image. Returns the number of signatures
/// received from the registry.
pub fn record(
    store: &dyn SignatureStore,
    identity: &Digest,
    image: &UnparsedImage,
) -> Result<usize, PullError> {
    Manifest::parse(image.manifest()?)?;

    let signatures = image.signatures()?;
    for signature in &signatures {
        store
            .append_signature(identity, signature)
            .map_err(PullError::StoreUnavailable)?;
    }

    tracing::debug!(%identity, count = signatures.len(), "Signatures recorded");

    Ok(signatures.len())
}

#[test]
fn append_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsSignatureStore::new(dir.path());
    let identity = Digest::sha256_of(b"image");

    assert!(store.signatures(&identity).unwrap().is_empty());

    store.append_signature(&identity, b"first").unwrap();
    store.append_signature(&identity, b"second").unwrap();
    store.append_signature(&identity, b"first").unwrap();

    assert_eq!(
        store.signatures(&identity).unwrap(),
        [b"first".to_vec(), b"second".to_vec()]
    );

    let path = dir
        .path()
        .join("sha256")
        .join(identity.hash_value())
        .join("signature-2");

    assert_eq!(fs::read(path).unwrap(), b"second");
}
