//! Operations that depend on how a platform stores layers.
//!
//! Two variants are provided:
//!
//! * [`SelfContained`]: every image has all of its layers. Layers are
//!   read from the registry, and images are checked with the trust
//!   policy.
//! * [`SharedBase`]: images extend a base layer that is already in the
//!   local store. Layers can be read from external URLs, and there are
//!   no trust checks.
//!
//! Variants are registered in a [`Platforms`] instance, which is given
//! to the [`Puller`](crate::Puller).

use std::sync::Arc;

use crate::{
    base_layer,
    digest::Digest,
    layer::LayerDescriptor,
    manifest::Manifest,
    registry::{ReadSeek, Registry},
    signatures::{self, SignatureStore},
    store::{LayerStore, RootFs},
    trust::{PolicyContext, TrustGate, UnparsedImage},
    EventHandler, PullError, Reference,
};

/// Operations of a platform variant.
pub trait Platform: Send + Sync {
    /// Name to select the variant.
    fn name(&self) -> &'static str;

    /// Open the content of a layer.
    fn open_layer<'r>(
        &self,
        layer: &LayerDescriptor,
        registry: &'r dyn Registry,
        event_handler: &dyn EventHandler,
    ) -> Result<Box<dyn ReadSeek + 'r>, PullError>;

    /// Attach `rootfs` to a base layer, if needed.
    fn detect_base_layer(
        &self,
        store: &dyn LayerStore,
        manifest: &Manifest,
        rootfs: &mut RootFs,
    ) -> Result<(), PullError>;

    /// Check if the image can be pulled. Returns the reference to use
    /// for the rest of the pull.
    fn check_trusted<'a>(&self, image: &UnparsedImage<'_, 'a>) -> Result<Reference<'a>, PullError>;

    /// Store the signatures of the image.
    fn store_signatures(&self, identity: &Digest, image: &UnparsedImage) -> Result<(), PullError>;
}

/// Platform where layers are self-contained.
pub struct SelfContained {
    policy: Option<PolicyContext>,
    signatures: Arc<dyn SignatureStore>,
}

impl SelfContained {
    pub const NAME: &'static str = "self-contained";

    /// Create the variant. If `policy` is `None`, the trust checks are
    /// disabled.
    pub fn new(policy: Option<PolicyContext>, signatures: Arc<dyn SignatureStore>) -> Self {
        SelfContained { policy, signatures }
    }
}

impl Platform for SelfContained {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn open_layer<'r>(
        &self,
        layer: &LayerDescriptor,
        registry: &'r dyn Registry,
        _: &dyn EventHandler,
    ) -> Result<Box<dyn ReadSeek + 'r>, PullError> {
        registry.open_blob(&layer.digest)
    }

    fn detect_base_layer(
        &self,
        _: &dyn LayerStore,
        _: &Manifest,
        _: &mut RootFs,
    ) -> Result<(), PullError> {
        Ok(())
    }

    fn check_trusted<'a>(&self, image: &UnparsedImage<'_, 'a>) -> Result<Reference<'a>, PullError> {
        let mut gate = TrustGate::new(self.policy.as_ref());
        let result = gate.evaluate(image);

        tracing::debug!(reference = %image.reference(), state = ?gate.state(), "Trust gate");
        result
    }

    fn store_signatures(&self, identity: &Digest, image: &UnparsedImage) -> Result<(), PullError> {
        signatures::record(&*self.signatures, identity, image)?;
        Ok(())
    }
}

/// Platform where images extend a shared base layer.
pub struct SharedBase;

impl SharedBase {
    pub const NAME: &'static str = "shared-base";
}

impl Platform for SharedBase {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn open_layer<'r>(
        &self,
        layer: &LayerDescriptor,
        registry: &'r dyn Registry,
        event_handler: &dyn EventHandler,
    ) -> Result<Box<dyn ReadSeek + 'r>, PullError> {
        layer.open(registry, event_handler)
    }

    fn detect_base_layer(
        &self,
        store: &dyn LayerStore,
        manifest: &Manifest,
        rootfs: &mut RootFs,
    ) -> Result<(), PullError> {
        base_layer::detect_base_layer(store, manifest, rootfs)
    }

    fn check_trusted<'a>(&self, image: &UnparsedImage<'_, 'a>) -> Result<Reference<'a>, PullError> {
        Ok(image.reference().clone())
    }

    fn store_signatures(&self, _: &Digest, _: &UnparsedImage) -> Result<(), PullError> {
        Ok(())
    }
}

/// Set of platform variants, with one of them selected.
#[derive(Clone, Default)]
pub struct Platforms {
    variants: Vec<Arc<dyn Platform>>,
    selected: Option<&'static str>,
}

impl Platforms {
    /// Create an empty set.
    pub fn new() -> Self {
        Platforms::default()
    }

    /// Register both variants, and select [`host_default`](Self::host_default).
    pub fn with_defaults(
        policy: Option<PolicyContext>,
        signatures: Arc<dyn SignatureStore>,
    ) -> Self {
        Platforms::new()
            .register(SelfContained::new(policy, signatures))
            .register(SharedBase)
            .select_unchecked(Self::host_default())
    }

    /// Name of the variant for the target of this build.
    pub fn host_default() -> &'static str {
        if cfg!(windows) {
            SharedBase::NAME
        } else {
            SelfContained::NAME
        }
    }

    /// Add a variant. A variant with the same name is replaced.
    ///
    /// The first registered variant is selected, unless
    /// [`select`](Self::select) is called.
    pub fn register(mut self, platform: impl Platform + 'static) -> Self {
        let name = platform.name();
        self.variants.retain(|p| p.name() != name);
        self.variants.push(Arc::new(platform));
        self.selected.get_or_insert(name);
        self
    }

    /// Select the variant with `name`.
    pub fn select(self, name: &str) -> Result<Self, PullError> {
        match self.variants.iter().find(|p| p.name() == name) {
            Some(platform) => {
                let name = platform.name();
                Ok(self.select_unchecked(name))
            }

            None => Err(PullError::UnknownPlatform(name.to_owned())),
        }
    }

    fn select_unchecked(mut self, name: &'static str) -> Self {
        self.selected = Some(name);
        self
    }

    /// The selected variant.
    pub fn selected(&self) -> Result<Arc<dyn Platform>, PullError> {
        let name = self.selected.unwrap_or_default();
        self.variants
            .iter()
            .find(|p| p.name() == name)
            .cloned()
            .ok_or_else(|| PullError::UnknownPlatform(name.to_owned()))
    }

    /// Names of the registered variants.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.variants.iter().map(|p| p.name())
    }
}

#[test]
fn select_variants() {
    let signatures = Arc::new(signatures::FsSignatureStore::new("/nonexistent"));
    let platforms = Platforms::with_defaults(None, signatures);

    assert_eq!(
        platforms.names().collect::<Vec<_>>(),
        [SelfContained::NAME, SharedBase::NAME]
    );

    assert_eq!(platforms.selected().unwrap().name(), Platforms::host_default());

    let platforms = platforms.select("shared-base").unwrap();
    assert_eq!(platforms.selected().unwrap().name(), "shared-base");

    assert!(matches!(
        platforms.select("other"),
        Err(PullError::UnknownPlatform(name)) if name == "other"
    ));

    assert!(Platforms::new().selected().is_err());
}
