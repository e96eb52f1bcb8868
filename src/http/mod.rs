mod seeker;

use std::{
    borrow::Cow,
    env::consts,
    io::{self, Read, Seek, SeekFrom},
    net::SocketAddr,
    str::FromStr,
    sync::RwLock,
};

use base64::Engine;

use crate::{
    digest::Digest,
    manifest::{self, MediaType, RawManifest},
    registry::{ReadSeek, Registry},
    EventHandler, PullError, Reference,
};

pub use seeker::HttpReadSeeker;

pub(crate) const USER_AGENT: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Maximum size, in bytes, of a manifest.
const MAX_MANIFEST_SIZE: u64 = 4 * 1024 * 1024;

#[derive(thiserror::Error, Debug)]
pub enum HttpError {
    #[error("{0}")]
    Client(#[from] Box<ureq::Error>),

    #[error("Missing authentication tokens.")]
    MissingTokens,

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("Missing or invalid Content-Type.")]
    InvalidContentType,

    #[error("Invalid base64 data: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Manifest is larger than {MAX_MANIFEST_SIZE} bytes.")]
    ManifestTooLarge,
}

impl From<ureq::Error> for HttpError {
    fn from(value: ureq::Error) -> Self {
        HttpError::Client(Box::new(value))
    }
}

impl HttpError {
    /// Extract the `HttpError` wrapped in an `io::Error`, like the ones
    /// returned by [`HttpReadSeeker`].
    pub(crate) fn from_io(error: io::Error) -> Self {
        match error.downcast::<HttpError>() {
            Ok(http) => http,
            Err(error) => HttpError::Io(error),
        }
    }

    /// HTTP status of the response, if the server sent one.
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::Client(e) => match **e {
                ureq::Error::Status(status, _) => Some(status),
                _ => None,
            },

            _ => None,
        }
    }
}

/// HTTP client for the repository of an image [`Reference`].
///
/// It implements [`Registry`], so it can be used as the source of a
/// [`Puller`](crate::Puller).
pub struct RegistryClient<'a, E: ?Sized> {
    event_handler: &'a E,
    auth_token: RwLock<Option<String>>,
    base_url: String,
    repository: String,
    architecture: String,
    os: String,
}

impl<'a, E> RegistryClient<'a, E>
where
    E: EventHandler + ?Sized,
{
    /// Create a new HTTP client to the registry/image in `reference`.
    ///
    /// It tries to guess the URI scheme for the registry:
    ///
    /// * If it is a loopback IP (like `127.0.0.1`), or if the port
    ///   is `:80`, it uses `http://`.
    /// * In any other case, it uses `https://`.
    ///
    /// Manifest lists are resolved for the platform of the current
    /// process, unless [`architecture`](Self::architecture) or
    /// [`os`](Self::os) are set.
    pub fn new(reference: &Reference, event_handler: &'a E) -> Self {
        // Translate to golang architecture names.
        let architecture = match consts::ARCH {
            "aarch64" => "arm64",
            "x86" => "386",
            "x86_64" => "amd64",
            other => other,
        };

        RegistryClient {
            event_handler,
            auth_token: Default::default(),
            base_url: format!("{}{}", guess_scheme(reference.registry), reference.registry),
            repository: reference.repository.to_string(),
            architecture: architecture.to_owned(),
            os: consts::OS.to_owned(),
        }
    }

    /// Architecture to select from a manifest list.
    pub fn architecture(mut self, architecture: &str) -> Self {
        self.architecture = architecture.to_owned();
        self
    }

    /// Operating system to select from a manifest list.
    pub fn os(mut self, os: &str) -> Self {
        self.os = os.to_owned();
        self
    }

    /// Send a `GET` request to the registry.
    ///
    /// The path must not include the `v2/$image` prefix.
    pub fn get(&self, path: &str, accept: Option<&str>) -> Result<ureq::Response, HttpError> {
        let url = format!("{}/v2/{}/{}", self.base_url, self.repository, path);
        let mut request = ureq::get(&url);
        if let Some(accept) = accept {
            request = request.set("Accept", accept);
        }

        self.send(request)
    }

    /// Send a request to the registry.
    ///
    /// If it responds with a `401` error, get the token from the
    /// URL in the `WWW-Authenticate` header.
    fn send(&self, request: ureq::Request) -> Result<ureq::Response, HttpError> {
        let request = request.set("User-Agent", USER_AGENT);

        self.event_handler.registry_request(request.url());

        let auth_token = self.auth_token.read().unwrap();
        if let Some(auth) = auth_token.as_deref() {
            return Ok(request.set("Authorization", auth).call()?);
        }

        drop(auth_token);
        let mut auth_token = self.auth_token.write().unwrap();

        // Try a request with no token.

        let response = match request.clone().call() {
            Ok(r) => return Ok(r),
            Err(ureq::Error::Status(401, r)) => r,
            Err(e) => return Err(e.into()),
        };

        // Request a token if the response from the 401 includes the
        // WWW-Authenticate header.
        //
        // The response from the `realm` URL must include either
        // `token` or `access_token`.

        let Some(auth_request) = response
            .header("www-authenticate")
            .and_then(build_auth_request)
        else {
            return Err(ureq::Error::Status(401, response).into());
        };

        self.event_handler.registry_auth(auth_request.url());

        #[derive(serde::Deserialize, Debug)]
        struct Tokens {
            token: Option<String>,
            access_token: Option<String>,
        }

        let mut token = match serde_json::from_reader(auth_request.call()?.into_reader())? {
            Tokens { token: Some(t), .. } => t,
            Tokens {
                access_token: Some(t),
                ..
            } => t,
            _ => return Err(HttpError::MissingTokens),
        };

        token.insert_str(0, "Bearer ");
        *auth_token = Some(token);
        drop(auth_token);

        // Repeat the request, now that we have a token.
        self.send(request)
    }

    /// Download a manifest, and detect its type from the `Content-Type`
    /// header.
    fn get_manifest(&self, selector: &str) -> Result<RawManifest, HttpError> {
        let accept = MediaType::ALL.join(", ");
        let response = self.get(&format!("manifests/{selector}"), Some(&accept))?;

        let media_type = response
            .header("Content-Type")
            .and_then(|h| MediaType::from_str(h).ok())
            .ok_or(HttpError::InvalidContentType)?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_MANIFEST_SIZE + 1)
            .read_to_end(&mut bytes)?;

        if bytes.len() as u64 > MAX_MANIFEST_SIZE {
            return Err(HttpError::ManifestTooLarge);
        }

        Ok(RawManifest { media_type, bytes })
    }
}

impl<E> Registry for RegistryClient<'_, E>
where
    E: EventHandler + ?Sized,
{
    /// Download the manifest for `reference`.
    ///
    /// If the registry returns a manifest list, it follows the entry for
    /// the configured architecture and operating system.
    ///
    /// When the digest of the manifest is known (because it is in the
    /// reference, or it comes from a manifest list), the content is
    /// verified against it.
    fn fetch_manifest(&self, reference: &Reference) -> Result<RawManifest, PullError> {
        let mut selector = Cow::Borrowed(reference.manifest_selector());
        let mut expected = reference.digest.clone();

        loop {
            let raw = self.get_manifest(&selector).map_err(|e| match e {
                HttpError::ManifestTooLarge => {
                    PullError::MalformedManifest(format!("manifest {reference}: {e}"))
                }
                e => PullError::transfer(format!("manifest {reference}"), e),
            })?;

            if let Some(expected) = &expected {
                if !manifest::verify(&raw, expected)? {
                    let error = io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Manifest content does not match {expected}."),
                    );

                    return Err(PullError::transfer(
                        format!("manifest {reference}"),
                        HttpError::Io(error),
                    ));
                }
            }

            if !raw.media_type.is_index() {
                return Ok(raw);
            }

            let digest = parse_index(&self.architecture, &self.os, &raw.bytes)?;
            selector = Cow::Owned(digest.source().to_owned());
            expected = Some(digest);
        }
    }

    fn open_blob(&self, digest: &Digest) -> Result<Box<dyn ReadSeek + '_>, PullError> {
        let url = format!(
            "{}/v2/{}/blobs/{}",
            self.base_url, self.repository, digest
        );

        let mut blob = HttpReadSeeker::new(move |offset| {
            self.send(seeker::with_range(ureq::get(&url), offset))
        });

        // Send the request now, so a missing blob is detected here.
        blob.seek(SeekFrom::Start(0))
            .map_err(|e| PullError::transfer_io(format!("blob {digest}"), e))?;

        Ok(Box::new(blob))
    }

    /// Get the signatures of a manifest, using the registry API extension
    /// for signatures.
    ///
    /// If the registry does not support the extension, the manifest has
    /// no signatures.
    fn signatures(&self, digest: &Digest) -> Result<Vec<Vec<u8>>, PullError> {
        #[derive(serde::Deserialize, Debug)]
        struct List {
            #[serde(default)]
            signatures: Vec<Signature>,
        }

        #[derive(serde::Deserialize, Debug)]
        struct Signature {
            content: String,
        }

        let url = format!(
            "{}/extensions/v2/{}/signatures/{}",
            self.base_url, self.repository, digest
        );

        let context = || format!("signatures of {digest}");

        let response = match self.send(ureq::get(&url)) {
            Ok(r) => r,
            Err(e) if e.status() == Some(404) => return Ok(Vec::new()),
            Err(e) => return Err(PullError::transfer(context(), e)),
        };

        let list: List = serde_json::from_reader(response.into_reader())
            .map_err(|e| PullError::transfer(context(), e.into()))?;

        list.signatures
            .iter()
            .map(|s| base64::engine::general_purpose::STANDARD.decode(&s.content))
            .collect::<Result<_, _>>()
            .map_err(|e| PullError::transfer(context(), e.into()))
    }
}

/// Parse an image index to get the digest for the specified architecture and
/// operating system.
///
/// Refs:
///
/// * https://distribution.github.io/distribution/spec/manifest-v2-2/#manifest-list
/// * https://github.com/opencontainers/image-spec/blob/main/image-index.md
fn parse_index(architecture: &str, os: &str, bytes: &[u8]) -> Result<Digest, PullError> {
    #[derive(serde::Deserialize, Debug)]
    struct List {
        manifests: Vec<Manifest>,
    }

    #[derive(serde::Deserialize, Debug)]
    struct Manifest {
        digest: Digest,
        platform: Platform,
    }

    #[derive(serde::Deserialize, Debug)]
    struct Platform {
        architecture: String,
        os: String,
    }

    let List { manifests } =
        serde_json::from_slice(bytes).map_err(|e| PullError::MalformedManifest(e.to_string()))?;

    manifests
        .into_iter()
        .find(|i| i.platform.architecture == architecture && i.platform.os == os)
        .map(|i| i.digest)
        .ok_or_else(|| PullError::NotFound(format!("image for {os}/{architecture}")))
}

fn guess_scheme(registry: &str) -> &'static str {
    const HTTP: &str = "http://";
    const HTTPS: &str = "https://";

    if registry.ends_with(":80") {
        return HTTP;
    }

    if let Ok(address) = SocketAddr::from_str(registry) {
        let loopback = match address {
            SocketAddr::V4(v4) => v4.ip().is_loopback(),
            SocketAddr::V6(v6) => v6.ip().is_loopback(),
        };

        return if loopback { HTTP } else { HTTPS };
    }

    HTTPS
}

/// Parse a `WWW-Authenticate` header and build the request to
/// get the authentication token.
///
/// Return `None` if the header can't be parsed.
///
/// See <https://distribution.github.io/distribution/spec/auth/token/>
/// for more details.
fn build_auth_request(auth_spec: &str) -> Option<ureq::Request> {
    let mut request = None;
    let mut pending_params = vec![];
    let mut tail = auth_spec;

    // The first token must be `Bearer`
    tail = tail.strip_prefix("Bearer ")?;

    loop {
        let (key, value) = tail.split_once('=')?;
        let key = key.trim_ascii();
        let (value, after) = value.strip_prefix('"')?.split_once('"')?;

        if key == "realm" {
            request = Some(
                pending_params
                    .drain(..)
                    .fold(ureq::get(value), |r, (k, v)| r.query(k, v)),
            );
        } else {
            match request.take() {
                Some(r) => request = Some(r.query(key, value)),
                None => pending_params.push((key, value)),
            }
        }

        tail = match after.trim_ascii_start() {
            "" => return request,
            t => t.strip_prefix(',')?,
        };
    }
}
