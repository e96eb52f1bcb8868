use std::{collections::HashMap, fs, io, path::Path, path::PathBuf};

use super::{PolicyEngine, UnparsedImage, Verdict};
use crate::{PullError, Reference};

/// Location of the system policy.
pub const DEFAULT_POLICY_PATH: &str = "/etc/containers/policy.json";

/// Name of the transport for images in registries.
const DOCKER_TRANSPORT: &str = "docker";

/// Name used in scopes for the default registry.
const DOCKER_HUB_SCOPE: &str = "docker.io";

/// Errors from loading a [`Policy`].
#[derive(thiserror::Error, Debug)]
pub enum PolicyError {
    #[error("Can't read policy from {}: {0}", .1.display())]
    Io(#[source] io::Error, PathBuf),

    #[error("Invalid policy: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Default policy is empty.")]
    EmptyDefault,

    #[error("Policy for scope {0:?} is empty.")]
    EmptyScope(String),
}

/// A requirement in a policy.
#[derive(serde::Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(from = "RequirementType")]
pub enum Requirement {
    InsecureAcceptAnything,

    Reject,

    /// A requirement that can't be checked, like `signedBy`. Images in
    /// its scope are rejected.
    Unsupported(String),
}

/// The `type` field of a requirement. Other fields are ignored.
#[derive(serde::Deserialize)]
struct RequirementType {
    #[serde(rename = "type")]
    kind: String,
}

impl From<RequirementType> for Requirement {
    fn from(value: RequirementType) -> Self {
        match value.kind.as_str() {
            "insecureAcceptAnything" => Requirement::InsecureAcceptAnything,
            "reject" => Requirement::Reject,
            _ => Requirement::Unsupported(value.kind),
        }
    }
}

/// Trust policy, in the `containers-policy.json` format.
///
/// Only the `docker` transport, and the `insecureAcceptAnything` and
/// `reject` requirements are supported. Other requirement types can be
/// loaded, but deny every image in their scope.
///
/// ```
/// # use oci_pull::*;
/// let policy = Policy::from_json(br#"{
///     "default": [{ "type": "reject" }],
///     "transports": {
///         "docker": {
///             "example.com/trusted": [{ "type": "insecureAcceptAnything" }]
///         }
///     }
/// }"#).unwrap();
///
/// let reference = Reference::try_from("example.com/trusted/app:1").unwrap();
/// assert_eq!(policy.requirements_for(&reference), [Requirement::InsecureAcceptAnything]);
/// ```
#[derive(serde::Deserialize, Debug)]
pub struct Policy {
    default: Vec<Requirement>,

    #[serde(default)]
    transports: HashMap<String, HashMap<String, Vec<Requirement>>>,
}

impl Policy {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| PolicyError::Io(e, path.to_owned()))?;
        Self::from_json(&bytes)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, PolicyError> {
        let policy: Policy = serde_json::from_slice(bytes)?;

        if policy.default.is_empty() {
            return Err(PolicyError::EmptyDefault);
        }

        for scopes in policy.transports.values() {
            if let Some((scope, _)) = scopes.iter().find(|(_, r)| r.is_empty()) {
                return Err(PolicyError::EmptyScope(scope.clone()));
            }
        }

        Ok(policy)
    }

    /// Requirements for `reference`, from the most specific scope that
    /// matches it.
    pub fn requirements_for(&self, reference: &Reference) -> &[Requirement] {
        if let Some(scopes) = self.transports.get(DOCKER_TRANSPORT) {
            for scope in scopes_for(reference) {
                if let Some(requirements) = scopes.get(&scope) {
                    tracing::debug!(%reference, %scope, "Policy scope");
                    return requirements;
                }
            }
        }

        &self.default
    }
}

impl PolicyEngine for Policy {
    fn evaluate(&self, image: &UnparsedImage) -> Result<Verdict, PullError> {
        let reference = image.reference();

        for requirement in self.requirements_for(reference) {
            match requirement {
                Requirement::InsecureAcceptAnything => (),
                Requirement::Reject => {
                    return Ok(Verdict::Denied(Some(format!(
                        "Running image {reference} is rejected by policy."
                    ))))
                }

                Requirement::Unsupported(kind) => {
                    return Ok(Verdict::Denied(Some(format!(
                        "requirement type {kind:?} is not supported"
                    ))))
                }
            }
        }

        Ok(Verdict::Allowed)
    }
}

/// Scopes that can match `reference`, from the most specific to the
/// least: the reference with its tag or digest, the repository, every
/// namespace, and the registry.
fn scopes_for(reference: &Reference) -> Vec<String> {
    let registry = if reference.is_default_registry() {
        DOCKER_HUB_SCOPE
    } else {
        reference.registry
    };

    let repository = format!("{registry}/{}", reference.repository);

    let mut scopes = Vec::new();

    if let Some(digest) = &reference.digest {
        scopes.push(format!("{repository}@{digest}"));
    }

    if let Some(tag) = reference.tag {
        scopes.push(format!("{repository}:{tag}"));
    }

    let mut namespace = repository.as_str();
    scopes.push(namespace.to_owned());

    while let Some((parent, _)) = namespace.rsplit_once('/') {
        scopes.push(parent.to_owned());
        namespace = parent;
    }

    scopes
}

#[test]
fn scopes_from_most_specific() {
    let reference = Reference::try_from("debian:stable").unwrap();
    assert_eq!(
        scopes_for(&reference),
        [
            "docker.io/library/debian:stable",
            "docker.io/library/debian",
            "docker.io/library",
            "docker.io"
        ]
    );

    let reference = Reference::try_from("registry.example:5000/a/b/c").unwrap();
    assert_eq!(
        scopes_for(&reference),
        [
            "registry.example:5000/a/b/c",
            "registry.example:5000/a/b",
            "registry.example:5000/a",
            "registry.example:5000"
        ]
    );
}

#[test]
fn invalid_policies() {
    assert!(matches!(
        Policy::from_json(br#"{"default": []}"#),
        Err(PolicyError::EmptyDefault)
    ));

    assert!(matches!(
        Policy::from_json(
            br#"{"default": [{"type": "reject"}], "transports": {"docker": {"a.example": []}}}"#
        ),
        Err(PolicyError::EmptyScope(s)) if s == "a.example"
    ));

    assert!(matches!(
        Policy::from_json(br#"{"default": [{"kind": "reject"}]}"#),
        Err(PolicyError::Json(_))
    ));
}
