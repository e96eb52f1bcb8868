use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use base64::Engine;
use oci_pull::MediaType;
use tiny_http::{Header, Request, Response, Server};

use super::blobs::{sha256, Blob};

pub const ARCH: &str = "ARCH";

pub const OS: &str = "OS";

/// Paths requested to a test server.
pub type RequestLog = Arc<Mutex<Vec<String>>>;

/// Content of a registry server.
pub struct TestRegistry {
    repository: &'static str,
    manifests: HashMap<String, (MediaType, Vec<u8>)>,
    blobs: Vec<Blob>,
    signatures: HashMap<String, Vec<Vec<u8>>>,
}

/// Registry server running in a background thread.
pub struct RunningRegistry {
    pub port: u16,
    repository: &'static str,
    log: RequestLog,
}

impl TestRegistry {
    pub fn new(repository: &'static str) -> Self {
        TestRegistry {
            repository,
            manifests: HashMap::new(),
            blobs: Vec::new(),
            signatures: HashMap::new(),
        }
    }

    /// Add a manifest, available with `tag` and with its digest.
    ///
    /// Returns the digest of the manifest.
    pub fn manifest(&mut self, tag: &str, media_type: MediaType, bytes: Vec<u8>) -> String {
        let digest = sha256(&bytes);
        self.manifests
            .insert(digest.clone(), (media_type, bytes.clone()));
        self.manifests.insert(tag.to_owned(), (media_type, bytes));
        digest
    }

    pub fn blobs(&mut self, blobs: impl IntoIterator<Item = Blob>) {
        self.blobs.extend(blobs);
    }

    pub fn signature(&mut self, manifest_digest: &str, signature: &[u8]) {
        self.signatures
            .entry(manifest_digest.to_owned())
            .or_default()
            .push(signature.to_vec());
    }

    /// Start a server in a random port.
    pub fn start(self) -> RunningRegistry {
        let repository = self.repository;
        let log = RequestLog::default();

        let port = start_server(log.clone(), move |request| self.handle(request));

        RunningRegistry {
            port,
            repository,
            log,
        }
    }

    fn handle(&self, request: Request) {
        let url = request.url().to_owned();

        let manifests = format!("/v2/{}/manifests/", self.repository);
        let blobs = format!("/v2/{}/blobs/sha256:", self.repository);
        let signatures = format!("/extensions/v2/{}/signatures/", self.repository);

        if let Some(selector) = url.strip_prefix(&manifests) {
            if let Some((media_type, bytes)) = self.manifests.get(selector) {
                return send_body(request, Some(*media_type), bytes.clone());
            }
        }

        if let Some(digest) = url.strip_prefix(&blobs) {
            if let Some(blob) = self.blobs.iter().find(|b| b.digest == digest) {
                return send_body(request, Some(blob.media_type), blob.data.clone());
            }
        }

        if let Some(digest) = url.strip_prefix(&signatures) {
            if let Some(signatures) = self.signatures.get(digest) {
                let signatures: Vec<_> = signatures
                    .iter()
                    .map(|s| {
                        let content = base64::engine::general_purpose::STANDARD.encode(s);
                        serde_json::json!({ "content": content })
                    })
                    .collect();

                let body = serde_json::json!({ "signatures": signatures });
                return send_body(request, None, serde_json::to_vec(&body).unwrap());
            }
        }

        send_status(request, 404);
    }
}

impl RunningRegistry {
    /// Reference to the image with `tag`.
    pub fn reference(&self, tag: &str) -> String {
        format!("127.0.0.1:{}/{}:{tag}", self.port, self.repository)
    }

    pub fn requests(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Number of requests for the blob with `digest` (without the
    /// algorithm prefix).
    pub fn blob_requests(&self, digest: &str) -> usize {
        let path = format!("/v2/{}/blobs/sha256:{digest}", self.repository);
        self.requests().iter().filter(|r| **r == path).count()
    }
}

/// Start a server that responds with the content in `files`, or with a
/// `500` error if the content is `None`.
///
/// Returns the port of the server and the log of its requests.
pub fn start_mirror(files: Vec<(&'static str, Option<Box<[u8]>>)>) -> (u16, RequestLog) {
    let log = RequestLog::default();

    let port = start_server(log.clone(), move |request| {
        match files.iter().find(|(path, _)| *path == request.url()) {
            Some((_, Some(data))) => send_body(request, None, data.clone()),
            Some((_, None)) => send_status(request, 500),
            None => send_status(request, 404),
        }
    });

    (port, log)
}

fn start_server<F>(log: RequestLog, handler: F) -> u16
where
    F: Fn(Request) + Send + 'static,
{
    let server = Server::http("127.1:0").expect("start test server");
    let port = server.server_addr().to_ip().unwrap().port();

    std::thread::spawn(move || {
        let timeout = Duration::from_secs(30);

        while let Ok(Some(request)) = server.recv_timeout(timeout) {
            log.lock().unwrap().push(request.url().to_owned());
            handler(request);
        }
    });

    port
}

fn send_body(request: Request, media_type: Option<MediaType>, body: impl Into<Vec<u8>>) {
    let mut response = Response::from_data(body).with_status_code(200);

    if let Some(media_type) = media_type {
        response =
            response.with_header(Header::from_bytes("Content-Type", media_type.as_str()).unwrap());
    }

    request.respond(response).expect("Send response");
}

fn send_status(request: Request, status: u16) {
    request
        .respond(Response::empty(status))
        .expect("Send response");
}

/// Serialize an image index with a single entry for [`ARCH`] and [`OS`].
pub fn image_index(manifest_digest: &str, manifest_size: usize) -> Vec<u8> {
    let index = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": MediaType::OciImageIndex.as_str(),
        "manifests": [
            {
                "mediaType": MediaType::OciManifestV1.as_str(),
                "digest": sha256(b"other"),
                "size": 1,
                "platform": { "architecture": "other", "os": OS },
            },
            {
                "mediaType": MediaType::OciManifestV1.as_str(),
                "digest": manifest_digest,
                "size": manifest_size,
                "platform": { "architecture": ARCH, "os": OS },
            },
        ],
    });

    serde_json::to_vec(&index).unwrap()
}
