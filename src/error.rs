use std::io;

use crate::http::HttpError;

/// Errors from a pull operation.
///
/// Use [`PullError::kind`] to decide how to react to a failure.
#[derive(thiserror::Error, Debug)]
pub enum PullError {
    #[error("{0} not found in the registry.")]
    NotFound(String),

    #[error("Transfer failed for {context}: {source}")]
    Transfer {
        context: String,
        #[source]
        source: HttpError,
    },

    #[error("{reference} isn't allowed{}", denial_suffix(.reason))]
    PolicyDenied {
        reference: String,
        reason: Option<String>,
    },

    #[error("Malformed manifest: {0}")]
    MalformedManifest(String),

    #[error("Base layer {parent:?} is not in the local store. Pull an image with that base layer first.")]
    UnresolvedBaseLayer { parent: String },

    #[error("Can't compute the manifest digest: {0}")]
    DigestComputation(String),

    #[error("Signature store unavailable: {0}")]
    StoreUnavailable(#[source] io::Error),

    #[error("I/O error in the layer store for {1}: {0}")]
    Store(#[source] io::Error, String),

    #[error("Platform variant {0:?} is not registered.")]
    UnknownPlatform(String),

    #[error("Operation cancelled.")]
    Cancelled,
}

/// Classification of a [`PullError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Transfer,
    PolicyDenied,
    MalformedManifest,
    UnresolvedBaseLayer,
    DigestComputation,
    StoreUnavailable,
    Store,
    Configuration,
    Cancelled,
}

impl ErrorKind {
    /// Whether repeating the whole pull may succeed without any
    /// change in the configuration or in the local store.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transfer | ErrorKind::Cancelled)
    }
}

impl PullError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PullError::NotFound(_) => ErrorKind::NotFound,
            PullError::Transfer { .. } => ErrorKind::Transfer,
            PullError::PolicyDenied { .. } => ErrorKind::PolicyDenied,
            PullError::MalformedManifest(_) => ErrorKind::MalformedManifest,
            PullError::UnresolvedBaseLayer { .. } => ErrorKind::UnresolvedBaseLayer,
            PullError::DigestComputation(_) => ErrorKind::DigestComputation,
            PullError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            PullError::Store(..) => ErrorKind::Store,
            PullError::UnknownPlatform(_) => ErrorKind::Configuration,
            PullError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Build an error for a failed request.
    ///
    /// `404` responses are reported as [`PullError::NotFound`].
    pub(crate) fn transfer(context: impl Into<String>, error: HttpError) -> Self {
        let context = context.into();
        match error.status() {
            Some(404) => PullError::NotFound(context),
            _ => PullError::Transfer {
                context,
                source: error,
            },
        }
    }

    /// Like [`transfer`](Self::transfer), for errors from a stream.
    ///
    /// If the `io::Error` wraps an [`HttpError`], it is extracted to
    /// keep the status code of the response.
    pub(crate) fn transfer_io(context: impl Into<String>, error: io::Error) -> Self {
        Self::transfer(context, HttpError::from_io(error))
    }
}

fn denial_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(reason) => format!(": {reason}"),
        None => String::new(),
    }
}

/// Map I/O errors from the layer store to [`PullError::Store`].
macro_rules! try_store {
    ($context:expr, $e:expr $(,)?) => {
        $e.map_err(|e| $crate::PullError::Store(std::io::Error::from(e), $context.to_string()))?
    };
}

// Make visible to mods.
pub(crate) use try_store;

#[test]
fn not_found_from_status() {
    let response = ureq::Response::new(404, "Not Found", "").unwrap();
    let error = PullError::transfer("blob", ureq::Error::Status(404, response).into());
    assert_eq!(error.kind(), ErrorKind::NotFound);

    let error = PullError::transfer_io("blob", io::Error::other(HttpError::MissingTokens));
    assert_eq!(error.kind(), ErrorKind::Transfer);
    assert!(matches!(
        error,
        PullError::Transfer {
            source: HttpError::MissingTokens,
            ..
        }
    ));
}

#[test]
fn policy_denied_messages() {
    let error = PullError::PolicyDenied {
        reference: "example.com/foo:1".into(),
        reason: Some("Rejected.".into()),
    };

    assert_eq!(error.to_string(), "example.com/foo:1 isn't allowed: Rejected.");

    let error = PullError::PolicyDenied {
        reference: "example.com/foo:1".into(),
        reason: None,
    };

    assert_eq!(error.to_string(), "example.com/foo:1 isn't allowed");
    assert!(!error.kind().is_retryable());
}
