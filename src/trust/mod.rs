//! Trust policy gate.
//!
//! Before any layer is downloaded, the image is checked against a
//! [`PolicyContext`]. When a policy allows the image, the reference is
//! pinned to the digest of the manifest that was checked, so the
//! following requests are for the exact same content.

mod policy;

use std::{cell::OnceCell, path::Path, sync::Arc};

use crate::{
    digest::Digest,
    manifest::{self, RawManifest},
    registry::Registry,
    PullError, Reference,
};

pub use policy::{Policy, PolicyError, Requirement, DEFAULT_POLICY_PATH};

/// An image that has not been verified yet.
///
/// The manifest is fetched on first use, and then kept, so the policy
/// engine and the gate see the same content.
pub struct UnparsedImage<'r, 'a> {
    registry: &'r dyn Registry,
    reference: Reference<'a>,
    manifest: OnceCell<RawManifest>,
}

impl<'r, 'a> UnparsedImage<'r, 'a> {
    pub fn new(registry: &'r dyn Registry, reference: &Reference<'a>) -> Self {
        UnparsedImage {
            registry,
            reference: reference.clone(),
            manifest: OnceCell::new(),
        }
    }

    /// Reference used to locate the image.
    pub fn reference(&self) -> &Reference<'a> {
        &self.reference
    }

    /// Manifest of the image, as received from the registry.
    pub fn manifest(&self) -> Result<&RawManifest, PullError> {
        if let Some(manifest) = self.manifest.get() {
            return Ok(manifest);
        }

        let manifest = self.registry.fetch_manifest(&self.reference)?;
        Ok(self.manifest.get_or_init(|| manifest))
    }

    /// Canonical digest of the manifest.
    pub fn manifest_digest(&self) -> Result<Digest, PullError> {
        manifest::digest(self.manifest()?)
    }

    /// Signatures attached to the image in the registry.
    pub fn signatures(&self) -> Result<Vec<Vec<u8>>, PullError> {
        self.registry.signatures(&self.manifest_digest()?)
    }
}

/// Decision of a [`PolicyEngine`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Allowed,

    /// The image is rejected, with an optional reason for the user.
    Denied(Option<String>),
}

/// Engine to decide if an image can be used.
pub trait PolicyEngine: Send + Sync {
    fn evaluate(&self, image: &UnparsedImage) -> Result<Verdict, PullError>;
}

/// Configuration for the trust policy gate.
///
/// It does not keep any state between pulls, so it can be shared.
#[derive(Clone)]
pub struct PolicyContext {
    engine: Arc<dyn PolicyEngine>,
}

impl PolicyContext {
    pub fn new(engine: impl PolicyEngine + 'static) -> Self {
        PolicyContext {
            engine: Arc::new(engine),
        }
    }

    /// Load a policy file in the `containers-policy.json` format.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        Ok(Self::new(Policy::from_file(path)?))
    }

    /// Load the system policy from [`DEFAULT_POLICY_PATH`].
    ///
    /// Returns `None` if the file does not exist, which disables the
    /// policy checks.
    pub fn default_policy() -> Result<Option<Self>, PolicyError> {
        match Self::from_file(DEFAULT_POLICY_PATH) {
            Ok(context) => Ok(Some(context)),
            Err(PolicyError::Io(e, _)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn evaluate(&self, image: &UnparsedImage) -> Result<Verdict, PullError> {
        self.engine.evaluate(image)
    }
}

/// State of a [`TrustGate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum GateState {
    Unchecked,
    Decided { allowed: bool },
}

/// Gate to check an image before it is pulled.
pub(crate) struct TrustGate<'p> {
    policy: Option<&'p PolicyContext>,
    state: GateState,
}

impl<'p> TrustGate<'p> {
    /// Create a gate. If `policy` is `None`, all images are allowed.
    pub fn new(policy: Option<&'p PolicyContext>) -> Self {
        TrustGate {
            policy,
            state: GateState::Unchecked,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// Check `image`, and return the reference to use for the rest of
    /// the pull.
    ///
    /// Without a policy, the reference is returned unchanged. If the
    /// policy allows the image, the reference is pinned to the digest
    /// of its manifest, even if it already had a digest.
    pub fn evaluate<'a>(
        &mut self,
        image: &UnparsedImage<'_, 'a>,
    ) -> Result<Reference<'a>, PullError> {
        let reference = image.reference();

        let Some(policy) = self.policy else {
            self.state = GateState::Decided { allowed: true };
            return Ok(reference.clone());
        };

        let verdict = policy.evaluate(image)?;

        self.state = GateState::Decided {
            allowed: verdict == Verdict::Allowed,
        };

        if let Verdict::Denied(reason) = verdict {
            tracing::warn!(%reference, reason = reason.as_deref(), "Image rejected by policy");

            return Err(PullError::PolicyDenied {
                reference: reference.to_string(),
                reason,
            });
        }

        let digest = image.manifest_digest()?;
        tracing::debug!(%reference, %digest, "Image allowed by policy");

        Ok(reference.with_digest(digest))
    }
}
