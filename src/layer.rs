use std::io::{Seek, SeekFrom};

use crate::{
    digest::Digest,
    http::{HttpError, HttpReadSeeker},
    manifest::MediaType,
    registry::{ReadSeek, Registry},
    EventHandler, PullError,
};

/// Description of a layer in a manifest.
#[derive(serde::Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LayerDescriptor {
    pub digest: Digest,

    pub media_type: MediaType,

    #[serde(default)]
    pub size: Option<u64>,

    /// Alternate locations for the content, in order of preference.
    #[serde(default)]
    pub urls: Vec<String>,
}

impl LayerDescriptor {
    pub fn new(digest: Digest, media_type: MediaType) -> Self {
        LayerDescriptor {
            digest,
            media_type,
            size: None,
            urls: Vec::new(),
        }
    }

    /// A layer whose content is not hosted by the registry.
    pub fn is_foreign(&self) -> bool {
        self.media_type.is_foreign() && !self.urls.is_empty()
    }

    /// Open the content of the layer.
    ///
    /// If the descriptor has no URLs, the blob is read from the registry.
    /// Otherwise, the URLs are tried in order, and the first one that can
    /// be opened is used. The remaining URLs are never requested.
    ///
    /// The returned stream is not verified. Wrap it with
    /// [`Digest::wrap_reader`] to check its content.
    pub fn open<'r>(
        &self,
        registry: &'r dyn Registry,
        event_handler: &dyn EventHandler,
    ) -> Result<Box<dyn ReadSeek + 'r>, PullError> {
        if self.urls.is_empty() {
            return registry.open_blob(&self.digest);
        }

        let mut failure = None;

        for url in &self.urls {
            let mut stream = HttpReadSeeker::from_url(url);
            match stream.seek(SeekFrom::Start(0)) {
                Ok(_) => {
                    tracing::debug!(digest = %self.digest, %url, "Foreign layer source");
                    return Ok(Box::new(stream));
                }

                Err(e) => {
                    tracing::warn!(
                        digest = %self.digest,
                        %url,
                        error = %e,
                        "Foreign layer source failed"
                    );
                    event_handler.foreign_url_failed(url, &e);

                    failure = Some(PullError::Transfer {
                        context: format!("layer {} from {url}", self.digest),
                        source: HttpError::from_io(e),
                    });
                }
            }
        }

        Err(failure.unwrap_or_else(|| PullError::NotFound(format!("layer {}", self.digest))))
    }
}
