use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum DownloadError {
    #[error("Invalid URL: {url}")]
    #[diagnostic(code(armi_dl::invalid_url))]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error(transparent)]
    #[diagnostic(
        code(armi_dl::network),
        help("Check your internet connection or try again later")
    )]
    Network(#[from] Box<ureq::Error>),

    #[error("HTTP {status}: {url}")]
    #[diagnostic(code(armi_dl::http_error))]
    HttpError { status: u16, url: String },

    #[error("I/O error: {0}")]
    #[diagnostic(code(armi_dl::io))]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// Whether retrying the same request may succeed.
    ///
    /// Server errors, throttling, timeouts, connection trouble and broken
    /// streams are transient. Client errors and malformed URLs are not.
    pub fn is_transient(&self) -> bool {
        match self {
            DownloadError::InvalidUrl { .. } => false,
            DownloadError::HttpError { status, .. } => {
                matches!(status, 408 | 425 | 429) || *status >= 500
            }
            DownloadError::Io(_) => true,
            DownloadError::Network(err) => {
                match err.as_ref() {
                    ureq::Error::StatusCode(status) => {
                        matches!(status, 408 | 425 | 429) || *status >= 500
                    }
                    ureq::Error::BadUri(_)
                    | ureq::Error::Http(_)
                    | ureq::Error::InvalidProxyUrl
                    | ureq::Error::RequireHttpsOnly(_)
                    | ureq::Error::TooManyRedirects
                    | ureq::Error::RedirectFailed => false,
                    _ => true,
                }
            }
        }
    }

    /// Converts a transport error, keeping the URL for status failures.
    pub fn from_ureq(err: ureq::Error, url: &str) -> Self {
        match err {
            ureq::Error::StatusCode(status) => {
                DownloadError::HttpError {
                    status,
                    url: url.to_string(),
                }
            }
            ureq::Error::Io(io) => DownloadError::Io(io),
            other => DownloadError::Network(Box::new(other)),
        }
    }
}

impl From<ureq::Error> for DownloadError {
    fn from(e: ureq::Error) -> Self {
        Self::Network(Box::new(e))
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> DownloadError {
        DownloadError::HttpError {
            status,
            url: "https://example.com/core.db.tar.gz".to_string(),
        }
    }

    #[test]
    fn test_http_error_display() {
        let msg = http(404).to_string();
        assert!(msg.contains("HTTP 404"));
        assert!(msg.contains("core.db.tar.gz"));
    }

    #[test]
    fn test_status_classification() {
        assert!(!http(404).is_transient());
        assert!(!http(403).is_transient());
        assert!(http(429).is_transient());
        assert!(http(503).is_transient());
        assert!(http(408).is_transient());
    }

    #[test]
    fn test_network_classification() {
        let err: DownloadError = ureq::Error::ConnectionFailed.into();
        assert!(err.is_transient());

        let err: DownloadError = ureq::Error::TooManyRedirects.into();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_io_is_transient() {
        let err = DownloadError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "stream ended early",
        ));
        assert!(err.is_transient());
        assert!(err.to_string().contains("stream ended early"));
    }

    #[test]
    fn test_from_ureq_status_keeps_url() {
        let err = DownloadError::from_ureq(ureq::Error::StatusCode(500), "https://m/x");
        match err {
            DownloadError::HttpError { status, url } => {
                assert_eq!(status, 500);
                assert_eq!(url, "https://m/x");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_url_not_transient() {
        let err = DownloadError::InvalidUrl {
            url: "nope".to_string(),
            source: url::ParseError::RelativeUrlWithoutBase,
        };
        assert!(!err.is_transient());
        assert!(err.to_string().contains("Invalid URL"));
    }
}
