use std::{
    fs::{self, File},
    io::{self, BufReader, Read, Write},
    path::{Path, PathBuf},
};

use sha2::Digest as _;

use crate::{
    digest::{Digest, DigestAlgorithm},
    manifest::MediaType,
};

use super::{ImageRecord, LayerStore};

const LAYERS_PATH: &str = "layers";

const IMAGES_PATH: &str = "images";

/// File with the content of a layer, as downloaded.
const BLOB_FILE: &str = "blob";

/// File with the [`LayerInfo`] of a layer.
const LAYER_INFO_FILE: &str = "layer.json";

/// Prefix for entries that are not complete yet.
const TMP_PREFIX: &str = ".tmp-";

/// Metadata for a stored layer.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
pub struct LayerInfo {
    /// Digest of the content, as downloaded.
    pub digest: Digest,

    pub media_type: MediaType,

    /// Digest of the uncompressed archive.
    pub diff_id: Digest,

    /// Sum of the size of the files in the archive.
    pub size: u64,
}

/// [`LayerStore`] in a directory.
///
/// The directory contains:
///
/// * `layers/$algorithm/$hash/`, with the downloaded blob and its
///   [`LayerInfo`].
/// * `images/$algorithm/$hash.json`, with an [`ImageRecord`].
///
/// New entries are written with a temporary name, and then renamed, so
/// readers never see partial entries.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open the store in `root`. The directory is created if it does
    /// not exist.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(LAYERS_PATH))?;
        fs::create_dir_all(root.join(IMAGES_PATH))?;
        Ok(FsStore { root })
    }

    fn layer_path(&self, id: &Digest) -> PathBuf {
        self.root
            .join(LAYERS_PATH)
            .join(id.algorithm().as_str())
            .join(id.hash_value().to_ascii_lowercase())
    }

    fn image_path(&self, id: &Digest) -> PathBuf {
        self.root
            .join(IMAGES_PATH)
            .join(id.algorithm().as_str())
            .join(format!("{}.json", id.hash_value().to_ascii_lowercase()))
    }

    /// Metadata of a stored layer.
    pub fn layer(&self, id: &Digest) -> io::Result<Option<LayerInfo>> {
        match File::open(self.layer_path(id).join(LAYER_INFO_FILE)) {
            Ok(file) => Ok(Some(serde_json::from_reader(BufReader::new(file))?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Open the content of a stored layer.
    pub fn open_layer(&self, id: &Digest) -> io::Result<File> {
        File::open(self.layer_path(id).join(BLOB_FILE))
    }

    /// Get an image by its ID.
    pub fn image(&self, id: &Digest) -> io::Result<Option<ImageRecord>> {
        match File::open(self.image_path(id)) {
            Ok(file) => Ok(Some(serde_json::from_reader(BufReader::new(file))?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// All images in the store.
    pub fn images(&self) -> io::Result<Vec<ImageRecord>> {
        let mut images = Vec::new();

        for algorithm in [DigestAlgorithm::SHA256, DigestAlgorithm::SHA512] {
            let dir = self.root.join(IMAGES_PATH).join(algorithm.as_str());

            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };

            for entry in entries {
                let path = entry?.path();

                let visible = path.extension().is_some_and(|e| e == "json")
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| !n.starts_with(TMP_PREFIX));

                if visible {
                    let file = BufReader::new(File::open(&path)?);
                    images.push(serde_json::from_reader(file)?);
                }
            }
        }

        Ok(images)
    }
}

impl LayerStore for FsStore {
    fn has_layer(&self, id: &Digest) -> bool {
        self.layer_path(id).is_dir()
    }

    fn put_layer(
        &self,
        id: &Digest,
        media_type: MediaType,
        content: &mut dyn Read,
    ) -> io::Result<()> {
        let target = self.layer_path(id);
        if target.is_dir() {
            return Ok(());
        }

        let parent = parent_dir(&target)?;
        fs::create_dir_all(parent)?;

        let staging = tempfile::Builder::new()
            .prefix(TMP_PREFIX)
            .tempdir_in(parent)?;

        let blob_path = staging.path().join(BLOB_FILE);

        let mut blob = File::create(&blob_path)?;
        io::copy(content, &mut blob)?;
        blob.sync_all()?;
        drop(blob);

        let (diff_id, size) = inspect_archive(media_type, File::open(&blob_path)?)?;

        let info = LayerInfo {
            digest: id.clone(),
            media_type,
            diff_id,
            size,
        };

        fs::write(
            staging.path().join(LAYER_INFO_FILE),
            serde_json::to_vec_pretty(&info)?,
        )?;

        match fs::rename(staging.path(), &target) {
            Ok(()) => Ok(()),

            // Another pull stored the same layer.
            Err(_) if target.is_dir() => Ok(()),

            Err(e) => Err(e),
        }
    }

    fn find_images_by_base_layer(&self, parent: &str) -> io::Result<Vec<ImageRecord>> {
        let mut images = self.images()?;
        images.retain(|image| {
            image.rootfs.kind == super::RootFsType::LayersWithBase
                && image.rootfs.base_layer_id() == Some(parent)
        });

        Ok(images)
    }

    fn commit_image(&self, image: &ImageRecord) -> io::Result<()> {
        image
            .rootfs
            .validate()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        if let Some(missing) = image.rootfs.layers.iter().find(|l| !self.has_layer(l)) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Layer {missing} is not in the store."),
            ));
        }

        let target = self.image_path(&image.id);
        let parent = parent_dir(&target)?;
        fs::create_dir_all(parent)?;

        let mut file = tempfile::Builder::new()
            .prefix(TMP_PREFIX)
            .suffix(".json")
            .tempfile_in(parent)?;

        serde_json::to_writer_pretty(&mut file, image)?;
        file.flush()?;
        file.as_file().sync_all()?;

        file.persist(&target).map_err(|e| e.error)?;

        Ok(())
    }
}

fn parent_dir(path: &Path) -> io::Result<&Path> {
    path.parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Path without parent."))
}

/// Compute the digest of the uncompressed archive of a layer (its
/// "DiffID"), and the size of its files.
fn inspect_archive(media_type: MediaType, blob: File) -> io::Result<(Digest, u64)> {
    let reader: Box<dyn Read> = match media_type {
        MediaType::DockerFsTarGzip
        | MediaType::DockerForeignFsTarGzip
        | MediaType::OciFsTarGzip
        | MediaType::OciForeignFsTarGzip => {
            Box::new(flate2::read::GzDecoder::new(BufReader::new(blob)))
        }

        #[cfg(feature = "zstd")]
        MediaType::OciFsTarZstd | MediaType::OciForeignFsTarZstd => {
            Box::new(zstd::stream::read::Decoder::new(blob)?)
        }

        MediaType::OciFsTar | MediaType::OciForeignFsTar => Box::new(BufReader::new(blob)),

        unknown => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid media type for a layer: {unknown}"),
            ))
        }
    };

    let mut reader = HashingReader {
        hasher: sha2::Sha256::new(),
        reader,
    };

    let mut size = 0;
    let mut archive = tar::Archive::new(&mut reader);
    for entry in archive.entries()? {
        size += entry?.header().size()?;
    }

    drop(archive);

    // Include the padding after the last entry.
    io::copy(&mut reader, &mut io::sink())?;

    let diff_id = Digest::from_output(DigestAlgorithm::SHA256, &reader.hasher.finalize());
    Ok((diff_id, size))
}

/// Compute the digest of the data read from `reader`.
struct HashingReader<R> {
    hasher: sha2::Sha256,
    reader: R,
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}
