//! The remote side of a mirror: a [`Fetcher`](fetcher::Fetcher) turns a URL
//! into a byte stream, and [`DownloadError`](error::DownloadError) says
//! whether a failure is worth retrying.

pub mod error;
pub mod fetcher;
pub mod http_client;
