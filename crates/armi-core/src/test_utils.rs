use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    io::Cursor,
    sync::{Mutex, PoisonError},
};

use armi_config::target::Target;
use armi_dl::{
    error::DownloadError,
    fetcher::{Fetcher, RemoteFile},
};
use armi_registry::{ArchiveWriter, Compression, PackageRecord};
use armi_utils::hash::{checksum_bytes, Checksum, HashAlgorithm};

pub const MIRROR: &str = "https://mirror.test/archlinux";

pub fn target() -> Target {
    Target {
        arch: "x86_64".to_string(),
        branch: "core".to_string(),
        mirror: MIRROR.to_string(),
        url_template: "{mirror}/{branch}/os/{arch}/{name}".to_string(),
    }
}

pub fn filename(name: &str, version: &str) -> String {
    format!("{name}-{version}-x86_64.pkg.tar.zst")
}

pub fn sha256(data: &[u8]) -> String {
    checksum_bytes(HashAlgorithm::Sha256, data)
}

pub fn record_for(name: &str, payload: &[u8]) -> PackageRecord {
    PackageRecord {
        name: name.to_string(),
        version: "1.0-1".to_string(),
        arch: "x86_64".to_string(),
        filename: filename(name, "1.0-1"),
        csize: Some(payload.len() as u64),
        checksum: Checksum::new(HashAlgorithm::Sha256, &sha256(payload)).unwrap(),
        build_date: None,
        entry_dir: format!("{name}-1.0-1"),
        extra: BTreeMap::new(),
    }
}

/// Builds gzip index archives from package payloads.
#[derive(Default)]
pub struct IndexBuilder {
    packages: Vec<(String, String, Vec<u8>)>,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn package(mut self, name: &str, version: &str, payload: &[u8]) -> Self {
        self.packages
            .push((name.to_string(), version.to_string(), payload.to_vec()));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut writer = ArchiveWriter::new(Compression::Gzip).unwrap();
        for (name, version, payload) in &self.packages {
            let dir = format!("{name}-{version}");
            let desc = format!(
                "%FILENAME%\n{}\n\n%NAME%\n{name}\n\n%VERSION%\n{version}\n\n\
                 %ARCH%\nx86_64\n\n%CSIZE%\n{}\n\n%SHA256SUM%\n{}\n\n",
                filename(name, version),
                payload.len(),
                sha256(payload)
            );
            writer.append_dir(&format!("{dir}/")).unwrap();
            writer
                .append_file(&format!("{dir}/desc"), desc.as_bytes())
                .unwrap();
        }
        writer.finish().unwrap()
    }

    /// A files database with one `files` entry per package.
    pub fn build_files(&self) -> Vec<u8> {
        let mut writer = ArchiveWriter::new(Compression::Gzip).unwrap();
        for (name, version, _) in &self.packages {
            let dir = format!("{name}-{version}");
            writer.append_dir(&format!("{dir}/")).unwrap();
            writer
                .append_file(&format!("{dir}/files"), format!("%FILES%\nusr/bin/{name}\n").as_bytes())
                .unwrap();
        }
        writer.finish().unwrap()
    }

    /// Serves the index and every payload of this builder from `fetcher`.
    pub fn serve(&self, fetcher: &MemoryFetcher) {
        let target = target();
        fetcher.serve(&target.url_for(&target.db_archive()), self.build());
        fetcher.serve(&target.url_for(&target.files_archive()), self.build_files());
        for (name, version, payload) in &self.packages {
            fetcher.serve(&target.url_for(&filename(name, version)), payload.clone());
        }
    }
}

/// One scripted response of a [`MemoryFetcher`].
pub enum Reply {
    Body(Vec<u8>),
    Status(u16),
    ConnectionReset,
}

type Hook = Box<dyn Fn(&str) + Send + Sync>;

/// In-memory [`Fetcher`] with scripted failures.
///
/// Scripted replies for a URL are consumed first, then the served body is
/// returned. Unknown URLs answer 404.
#[derive(Default)]
pub struct MemoryFetcher {
    served: Mutex<HashMap<String, Vec<u8>>>,
    scripted: Mutex<HashMap<String, VecDeque<Reply>>>,
    requests: Mutex<Vec<String>>,
    hook: Mutex<Option<Hook>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, body: Vec<u8>) {
        lock(&self.served).insert(url.to_string(), body);
    }

    pub fn script(&self, url: &str, replies: Vec<Reply>) {
        lock(&self.scripted)
            .entry(url.to_string())
            .or_default()
            .extend(replies);
    }

    /// Runs `hook` with the URL of every request before answering it.
    pub fn on_fetch<F: Fn(&str) + Send + Sync + 'static>(&self, hook: F) {
        *lock(&self.hook) = Some(Box::new(hook));
    }

    pub fn requests_for(&self, url: &str) -> usize {
        lock(&self.requests).iter().filter(|u| *u == url).count()
    }

    /// Requests for anything but index archives.
    pub fn package_requests(&self) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|u| !u.ends_with(".db.tar.gz") && !u.ends_with(".files.tar.gz"))
            .count()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Fetcher for MemoryFetcher {
    fn fetch(&self, url: &str) -> Result<RemoteFile, DownloadError> {
        lock(&self.requests).push(url.to_string());
        if let Some(hook) = lock(&self.hook).as_ref() {
            hook(url);
        }

        let scripted = lock(&self.scripted).get_mut(url).and_then(|q| q.pop_front());
        let reply = match scripted {
            Some(reply) => reply,
            None => {
                match lock(&self.served).get(url) {
                    Some(body) => Reply::Body(body.clone()),
                    None => Reply::Status(404),
                }
            }
        };

        match reply {
            Reply::Body(body) => {
                let len = body.len() as u64;
                Ok(RemoteFile::new(Cursor::new(body), Some(len)))
            }
            Reply::Status(status) => {
                Err(DownloadError::HttpError {
                    status,
                    url: url.to_string(),
                })
            }
            Reply::ConnectionReset => {
                Err(DownloadError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                )))
            }
        }
    }
}
