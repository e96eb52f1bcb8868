//! Pull container images from a registry into a local layer store.
//!
//! The [`Puller`] resolves the manifest of an image, checks it with a
//! trust policy, downloads its layers, attaches them to a base layer
//! when the platform needs it, records the signatures of the image, and
//! finally commits the image to a [`LayerStore`].
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use oci_pull::*;
//! let reference = Reference::try_from("debian:stable").unwrap();
//!
//! let registry = RegistryClient::new(&reference, &NoEventHandler);
//! let store = FsStore::new("/var/lib/images").unwrap();
//!
//! let policy = PolicyContext::default_policy().unwrap();
//! let signatures = Arc::new(FsSignatureStore::new(FsSignatureStore::DEFAULT_ROOT));
//! let platforms = Platforms::with_defaults(policy, signatures);
//!
//! let pulled = Puller::new(&registry, &store, &platforms)
//!     .and_then(|puller| puller.pull(&reference))
//!     .unwrap();
//!
//! println!("{} is {}", pulled.reference, pulled.image_id);
//! ```

mod base_layer;
mod digest;
mod error;
mod event_handler;
mod http;
mod layer;
mod manifest;
mod platform;
mod puller;
mod registry;
mod signatures;
mod store;
mod trust;

#[cfg(test)]
mod testing;

pub mod reference;

pub use base_layer::detect_base_layer;
pub use digest::{Digest, DigestAlgorithm, DigestParseError, DigestReader};
pub use error::{ErrorKind, PullError};
pub use event_handler::{EventHandler, NoEventHandler};
pub use http::{HttpError, HttpReadSeeker, RegistryClient};
pub use layer::LayerDescriptor;
pub use manifest::{
    digest as manifest_digest, HistoryEntry, InvalidMediaType, Manifest, MediaType, RawManifest,
    V1Image,
};
pub use platform::{Platform, Platforms, SelfContained, SharedBase};
pub use puller::{CancelToken, PullState, Pulled, Puller};
pub use reference::Reference;
pub use registry::{ReadSeek, Registry};
pub use signatures::{record as record_signatures, FsSignatureStore, SignatureStore};
pub use store::{FsStore, ImageRecord, LayerInfo, LayerStore, RootFs, RootFsType};
pub use trust::{
    Policy, PolicyContext, PolicyEngine, PolicyError, Requirement, UnparsedImage, Verdict,
    DEFAULT_POLICY_PATH,
};
