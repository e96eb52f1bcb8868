use std::io::{self, Read, Seek, SeekFrom};

use super::{HttpError, USER_AGENT};

type Opener<'a> = Box<dyn Fn(u64) -> Result<ureq::Response, HttpError> + Send + 'a>;

/// Seekable body of an HTTP resource.
///
/// Seeking to a new position sends a new request, with a `Range` header
/// if the position is not `0`. Thus, `seek(SeekFrom::Start(0))` can be
/// used to check that the resource is available before reading it.
pub struct HttpReadSeeker<'a> {
    open: Opener<'a>,
    offset: u64,
    size: Option<u64>,
    body: Option<Box<dyn Read + Send + Sync>>,
}

impl<'a> HttpReadSeeker<'a> {
    /// Create a seeker that uses `open` to send the requests.
    ///
    /// `open` receives the offset to start reading from. If it is not
    /// `0`, the request must include a `Range` header.
    pub fn new<F>(open: F) -> Self
    where
        F: Fn(u64) -> Result<ureq::Response, HttpError> + Send + 'a,
    {
        HttpReadSeeker {
            open: Box::new(open),
            offset: 0,
            size: None,
            body: None,
        }
    }

    /// Total size of the resource.
    ///
    /// If no request has been sent yet, a new one is sent to get it.
    fn size(&mut self) -> io::Result<u64> {
        if self.size.is_none() {
            self.open_at(self.offset)?;
        }

        self.size
            .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "Unknown content length."))
    }

    fn open_at(&mut self, offset: u64) -> io::Result<()> {
        let response = (self.open)(offset).map_err(io::Error::other)?;

        let partial = response.status() == 206;
        let size = if partial {
            response
                .header("Content-Range")
                .and_then(|h| h.rsplit_once('/'))
                .and_then(|(_, total)| total.parse().ok())
        } else {
            response
                .header("Content-Length")
                .and_then(|h| h.parse().ok())
        };

        let mut body = response.into_reader();

        // The server ignored the `Range` header, so discard the bytes
        // before the offset.
        if !partial && offset > 0 {
            io::copy(&mut (&mut body).take(offset), &mut io::sink())?;
        }

        if size.is_some() {
            self.size = size;
        }

        self.body = Some(body);
        self.offset = offset;
        Ok(())
    }
}

impl HttpReadSeeker<'static> {
    /// Seeker for a URL outside of the registry.
    pub fn from_url(url: &str) -> Self {
        let url = url.to_owned();
        HttpReadSeeker::new(move |offset| {
            let request = ureq::get(&url).set("User-Agent", USER_AGENT);
            Ok(with_range(request, offset).call()?)
        })
    }
}

/// Add a `Range` header to `request` when `offset` is not `0`.
pub(crate) fn with_range(request: ureq::Request, offset: u64) -> ureq::Request {
    if offset == 0 {
        request
    } else {
        request.set("Range", &format!("bytes={offset}-"))
    }
}

impl Read for HttpReadSeeker<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.body.is_none() {
            self.open_at(self.offset)?;
        }

        let n = match self.body.as_mut() {
            Some(body) => body.read(buf)?,
            None => 0,
        };

        self.offset += n as u64;
        Ok(n)
    }
}

impl Seek for HttpReadSeeker<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(delta) => self.offset.checked_add_signed(delta),
            SeekFrom::End(delta) => self.size()?.checked_add_signed(delta),
        };

        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "Invalid seek position.")
        })?;

        if self.body.is_some() && target == self.offset {
            return Ok(target);
        }

        match self.size {
            // Nothing to read after the end.
            Some(size) if target >= size => {
                self.body = Some(Box::new(io::empty()));
                self.offset = target;
            }

            _ => self.open_at(target)?,
        }

        Ok(target)
    }
}
