//! File persistence for certificates and signatures.
//!
//! Layout under the data directory:
//! - `<user_id_hex>.json`: certificate bytes, exactly as signed
//! - `<user_id_hex>.pem`: detached signature, base64 text
//!
//! Every write goes to a sibling temp file first and is renamed into place,
//! so a concurrent reader sees either the old file or the new one. A
//! certificate and its signature are replaced together under an exclusive
//! [`FileLock`] on `.certs.lock`; [`CertificateStore::load_pair`] reads
//! under a shared one, so it never pairs a new certificate with an old
//! signature.

use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::certificate::{Certificate, Signature};
use crate::encoding::user_id_hex;
use crate::error::{Error, Result};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn tmp_path(path: &Path) -> PathBuf {
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut name = path.file_name().map(|s| s.to_os_string()).unwrap_or_default();
    name.push(format!(".{}.{n}.tmp", std::process::id()));
    path.with_file_name(name)
}

fn write_via_temp(path: &Path, contents: &[u8], private: bool) -> io::Result<()> {
    let tmp = tmp_path(path);
    let result = (|| {
        let mut file = File::create(&tmp)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if private {
                file.set_permissions(fs::Permissions::from_mode(0o600))?;
            }
        }
        #[cfg(not(unix))]
        let _ = private;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Atomically replace `path` with `contents`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    write_via_temp(path, contents, false)
}

/// Like [`write_atomic`], but the file is readable by the owner only.
pub fn write_atomic_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    write_via_temp(path, contents, true)
}

/// Remove a file, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Default wait for a [`FileLock`] held by someone else.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(30);
const LOCK_RETRY: Duration = Duration::from_millis(25);

pub const CERT_LOCK_FILE: &str = ".certs.lock";

/// Advisory OS lock on a file, released on drop.
///
/// The lock file itself is never removed. The kernel drops the lock when
/// the holder closes the file or exits, so a crashed holder leaves nothing
/// to clean up.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

impl FileLock {
    /// Exclusive lock on `path`, creating the file (and its directory).
    pub fn exclusive(path: &Path, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut lock = Self::acquire(path, LockMode::Exclusive, timeout)?;
        // Holder pid, for whoever is left waiting on a hung writer.
        if let Err(e) = lock.record_pid() {
            debug!("could not record pid in {}: {e}", lock.path.display());
        }
        Ok(lock)
    }

    /// Shared lock on `path`.
    ///
    /// `None` when the directory does not exist yet: nothing has ever been
    /// written there, so there is nothing to guard.
    pub fn shared(path: &Path, timeout: Duration) -> Result<Option<Self>> {
        match Self::acquire(path, LockMode::Shared, timeout) {
            Ok(lock) => Ok(Some(lock)),
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn acquire(path: &Path, mode: LockMode, timeout: Duration) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let deadline = Instant::now() + timeout;

        loop {
            let attempt = match mode {
                LockMode::Shared => file.try_lock_shared(),
                LockMode::Exclusive => file.try_lock(),
            };
            match attempt {
                Ok(()) => {
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return Err(Error::LockTimeout(path.to_path_buf()));
                    }
                    thread::sleep(LOCK_RETRY);
                }
                Err(TryLockError::Error(e)) => return Err(e.into()),
            }
        }
    }

    fn record_pid(&mut self) -> io::Result<()> {
        self.file.set_len(0)?;
        writeln!(self.file, "{}", std::process::id())
    }
}

/// Directory of issued certificates and their signatures, keyed by user id.
#[derive(Debug, Clone)]
pub struct CertificateStore {
    dir: PathBuf,
}

impl CertificateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn certificate_path(&self, user_id: u64) -> PathBuf {
        self.dir.join(format!("{}.json", user_id_hex(user_id)))
    }

    pub fn signature_path(&self, user_id: u64) -> PathBuf {
        self.dir.join(format!("{}.pem", user_id_hex(user_id)))
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(CERT_LOCK_FILE)
    }

    /// Persist a certificate and its signature, replacing any earlier pair.
    pub fn save(&self, user_id: u64, certificate: &Certificate, signature: &Signature) -> Result<()> {
        let _lock = FileLock::exclusive(&self.lock_path(), LOCK_TIMEOUT)?;
        write_atomic(&self.certificate_path(user_id), certificate.as_bytes())?;
        write_atomic(&self.signature_path(user_id), signature.to_text().as_bytes())?;
        debug!(user_id = %user_id_hex(user_id), dir = %self.dir.display(), "stored certificate");
        Ok(())
    }

    /// Whether a certificate has been issued for `user_id`.
    pub fn contains(&self, user_id: u64) -> bool {
        self.certificate_path(user_id).is_file()
    }

    /// Load a certificate together with the signature stored with it.
    ///
    /// Unlike two separate loads, this cannot straddle a concurrent
    /// [`save`](Self::save) for the same id.
    pub fn load_pair(&self, user_id: u64) -> Result<(Certificate, Signature)> {
        let _lock = FileLock::shared(&self.lock_path(), LOCK_TIMEOUT)?;
        Ok((self.load_certificate(user_id)?, self.load_signature(user_id)?))
    }

    pub fn load_certificate(&self, user_id: u64) -> Result<Certificate> {
        let bytes = read_or_not_found(&self.certificate_path(user_id), "certificate", user_id)?;
        Ok(Certificate::from_bytes(bytes))
    }

    pub fn load_signature(&self, user_id: u64) -> Result<Signature> {
        let bytes = read_or_not_found(&self.signature_path(user_id), "signature", user_id)?;
        let text = String::from_utf8_lossy(&bytes);
        Signature::from_text(&text)
            .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
    }
}

fn read_or_not_found(path: &Path, what: &'static str, user_id: u64) -> Result<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::NotFound { what, user_id }),
        Err(e) => Err(e.into()),
    }
}
