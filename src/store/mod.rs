//! Local storage for layers and images.

mod fs_store;

use std::io::{self, Read};

use crate::{digest::Digest, manifest::MediaType};

pub use fs_store::{FsStore, LayerInfo};

/// Type of a [`RootFs`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RootFsType {
    /// The layers contain the whole filesystem.
    #[default]
    #[serde(rename = "layers")]
    Layers,

    /// The layers extend a base layer that is already in the store.
    #[serde(rename = "layers+base")]
    LayersWithBase,
}

/// Ordered chain of layers for the filesystem of an image.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub kind: RootFsType,

    #[serde(default)]
    pub layers: Vec<Digest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_layer: Option<String>,
}

impl RootFs {
    pub fn new() -> Self {
        RootFs::default()
    }

    pub fn append(&mut self, layer: Digest) {
        self.layers.push(layer);
    }

    /// Identifier of the base layer, if it is not empty.
    pub fn base_layer_id(&self) -> Option<&str> {
        self.base_layer.as_deref().filter(|b| !b.is_empty())
    }

    /// Check that a [`RootFsType::LayersWithBase`] filesystem has a
    /// base layer.
    pub fn validate(&self) -> Result<(), String> {
        if self.kind == RootFsType::LayersWithBase && self.base_layer_id().is_none() {
            return Err("filesystem with base layer, but no base layer ID".into());
        }

        Ok(())
    }
}

/// An image in the store.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ImageRecord {
    /// Canonical digest of the manifest.
    pub id: Digest,

    /// Reference used to pull the image.
    pub reference: String,

    pub rootfs: RootFs,
}

/// Storage for layers and images, shared by concurrent pulls.
///
/// Layers are addressed by their digest, so storing the same layer twice
/// must not be an error. Images are only visible after
/// [`commit_image`](Self::commit_image) returns.
pub trait LayerStore: Sync {
    fn has_layer(&self, id: &Digest) -> bool;

    /// Store the content of a layer.
    ///
    /// `content` is read to the end. The layer must not be visible if
    /// reading fails.
    fn put_layer(&self, id: &Digest, media_type: MediaType, content: &mut dyn Read)
        -> io::Result<()>;

    /// Images whose filesystem extends the base layer `parent`.
    fn find_images_by_base_layer(&self, parent: &str) -> io::Result<Vec<ImageRecord>>;

    /// Make `image` visible, atomically.
    fn commit_image(&self, image: &ImageRecord) -> io::Result<()>;
}

#[test]
fn rootfs_in_json() {
    let rootfs = RootFs {
        kind: RootFsType::LayersWithBase,
        layers: vec![Digest::sha256_of(b"1")],
        base_layer: Some("B".into()),
    };

    let json = serde_json::to_value(&rootfs).unwrap();
    assert_eq!(json["type"], "layers+base");
    assert_eq!(json["base_layer"], "B");

    assert!(rootfs.validate().is_ok());

    let missing_base = RootFs {
        base_layer: Some(String::new()),
        ..rootfs
    };

    assert!(missing_base.validate().is_err());
    assert!(RootFs::new().validate().is_ok());
}
