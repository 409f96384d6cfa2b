//! The seam between the sync engine and the network.

use std::io::Read;

use tracing::trace;

use crate::{error::DownloadError, http_client::SHARED_AGENT};

/// Largest buffer reserved up front from an announced length.
const MAX_PREALLOC: u64 = 1024 * 1024;

/// An open remote file.
pub struct RemoteFile {
    /// Size announced by the server, if any.
    pub content_length: Option<u64>,
    pub reader: Box<dyn Read + Send>,
}

impl RemoteFile {
    pub fn new<R: Read + Send + 'static>(reader: R, content_length: Option<u64>) -> Self {
        Self {
            content_length,
            reader: Box::new(reader),
        }
    }

    /// Reads the whole body into memory.
    pub fn into_bytes(mut self) -> Result<Vec<u8>, DownloadError> {
        let reserve = self.content_length.unwrap_or(0).min(MAX_PREALLOC);
        let mut buf = Vec::with_capacity(reserve as usize);
        self.reader.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// Opens remote files by URL.
///
/// Implementations must be usable from several blocking worker threads at
/// once.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<RemoteFile, DownloadError>;

    /// Fetches `url` and buffers the whole response.
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        self.fetch(url)?.into_bytes()
    }
}

/// [`Fetcher`] backed by the shared ureq agent.
#[derive(Clone, Debug, Default)]
pub struct HttpFetcher;

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<RemoteFile, DownloadError> {
        url::Url::parse(url).map_err(|source| {
            DownloadError::InvalidUrl {
                url: url.to_string(),
                source,
            }
        })?;

        trace!(url, "GET");
        let resp = SHARED_AGENT
            .get(url)
            .call()
            .map_err(|err| DownloadError::from_ureq(err, url))?;

        let content_length = resp
            .headers()
            .get(ureq::http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let reader = resp.into_body().into_reader();
        Ok(RemoteFile::new(reader, content_length))
    }
}
