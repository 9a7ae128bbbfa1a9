//! Remote filesystem access: one POSIX driver (a Bash helper script
//! fed over stdin, one JSON object per line on stdout) and one Windows
//! driver (a persistent PowerShell session fed line-protocol commands),
//! unified behind [`RemoteFs`]/[`RemoteFile`] so [`Upload`] doesn't care
//! which host it's talking to.

mod json;
mod posix;
mod windows;

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::runner::Runner;

pub use posix::PosixFs;
pub use windows::WindowsFs;

/// What `Stat`/`ReadDir` report about one remote path.
#[derive(Debug, Clone, PartialEq)]
pub struct FileStat {
    pub size: u64,
    pub mode: u32,
    pub mtime: i64,
    pub is_dir: bool,
}

/// How `OpenFile` should open the path, mirroring the POSIX open(2) flags
/// the spec names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode {
    pub create: bool,
    pub write: bool,
    pub truncate: bool,
    pub append: bool,
}

impl OpenMode {
    pub const READ_ONLY: OpenMode = OpenMode {
        create: false,
        write: false,
        truncate: false,
        append: false,
    };

    pub const CREATE_WRITE_TRUNCATE: OpenMode = OpenMode {
        create: true,
        write: true,
        truncate: true,
        append: false,
    };
}

/// An open remote file. Reads/writes at arbitrary offsets; the driver is
/// responsible for translating that into whatever primitive its transport
/// actually supports (aligned `dd` ranges, PowerShell stream seeks, ...).
#[async_trait]
pub trait RemoteFile: Send + Sync {
    async fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>>;
    async fn write(&self, offset: u64, data: &[u8]) -> Result<()>;
    async fn close(&self) -> Result<()>;

    /// Move this file's cursor, used as `copy_from_n`'s starting offset.
    async fn seek(&self, offset: u64) -> Result<()>;

    /// The cursor position last set by `seek` (0 until `seek` is called).
    fn position(&self) -> u64;

    /// Copy this file's full contents to `dst` on the remote side, without
    /// round-tripping the bytes through the caller.
    async fn copy(&self, dst: &str) -> Result<()>;

    /// Stream up to `n` bytes from `src` into this file starting at the
    /// current cursor position, optionally tee-ing every chunk through
    /// `tee` (used by [`upload`] for on-the-fly checksumming).
    async fn copy_from_n(
        &self,
        src: &mut (dyn tokio::io::AsyncRead + Send + Unpin),
        n: u64,
        mut tee: Option<&mut Sha256>,
    ) -> Result<u64> {
        use tokio::io::AsyncReadExt;
        let start = self.position();
        let mut remaining = n;
        let mut offset = start;
        let mut buf = vec![0u8; 64 * 1024];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let read = src.read(&mut buf[..want]).await.map_err(Error::Io)?;
            if read == 0 {
                break;
            }
            if let Some(hasher) = tee.as_deref_mut() {
                hasher.update(&buf[..read]);
            }
            self.write(offset, &buf[..read]).await?;
            offset += read as u64;
            remaining -= read as u64;
        }
        self.seek(offset).await?;
        Ok(offset - start)
    }
}

/// The remote filesystem surface both drivers implement.
#[async_trait]
pub trait RemoteFs: Send + Sync + std::fmt::Debug {
    async fn stat(&self, path: &str) -> Result<FileStat>;
    async fn read_dir(&self, path: &str) -> Result<Vec<(String, FileStat)>>;
    async fn open_file(&self, path: &str, mode: OpenMode, perm: u32) -> Result<Arc<dyn RemoteFile>>;
    async fn sha256(&self, path: &str) -> Result<String>;
    async fn delete(&self, path: &str) -> Result<()>;
    async fn mkdir_all(&self, path: &str) -> Result<()>;
    async fn rename(&self, src: &str, dst: &str) -> Result<()>;
    async fn chmod(&self, path: &str, mode: u32) -> Result<()>;
    async fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()>;
    async fn chtimes(&self, path: &str, atime: i64, mtime: i64) -> Result<()>;
    async fn truncate(&self, path: &str, size: u64) -> Result<()>;

    /// Open an existing file read-only.
    async fn open(&self, path: &str) -> Result<Arc<dyn RemoteFile>> {
        self.open_file(path, OpenMode::READ_ONLY, 0).await
    }
}

/// Pick the driver matching the connected host's platform.
pub async fn driver(runner: Arc<Runner>) -> Result<Arc<dyn RemoteFs>> {
    if runner.transport().is_windows().await? {
        Ok(Arc::new(WindowsFs::new(runner)))
    } else {
        Ok(Arc::new(PosixFs::new(runner)))
    }
}

/// Upload a local byte stream to `dst`, verifying the transfer by
/// comparing a local SHA-256 (computed while streaming) against the
/// remote's own `Sha256(dst)`. Mismatch surfaces as
/// [`Error::UploadFailed`] wrapping a [`Error::ChecksumMismatch`].
pub async fn upload(
    fs: &dyn RemoteFs,
    src: &mut (dyn tokio::io::AsyncRead + Send + Unpin),
    len: u64,
    dst: &str,
) -> Result<()> {
    let file = fs.open_file(dst, OpenMode::CREATE_WRITE_TRUNCATE, 0o644).await?;
    let mut hasher = Sha256::new();
    file.copy_from_n(src, len, Some(&mut hasher)).await?;
    file.close().await?;

    let local = to_hex(&hasher.finalize());
    let remote = fs.sha256(dst).await?;
    if local != remote {
        return Err(Error::UploadFailed(
            Error::ChecksumMismatch { local, remote }.to_string(),
        ));
    }
    Ok(())
}

/// `(block size, skip count, block count)` for a `dd`-based transfer of
/// `len` bytes starting at `offset`, chosen so `bs * skip == offset` and
/// `bs * count == len` — the largest block size that divides both,
/// i.e. `gcd(offset, len)` (or `len` itself when `offset == 0`).
pub(crate) fn dd_block_plan(offset: u64, len: u64) -> (u64, u64, u64) {
    if len == 0 {
        return (1, offset, 0);
    }
    let bs = gcd(offset, len).max(1);
    (bs, offset / bs, len / bs)
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").expect("writing to a String cannot fail");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_plan_picks_the_largest_aligned_block() {
        assert_eq!(dd_block_plan(4096, 8192), (4096, 1, 2));
        assert_eq!(dd_block_plan(0, 100), (100, 0, 1));
        assert_eq!(dd_block_plan(0, 0), (1, 0, 0));
        assert_eq!(dd_block_plan(7, 0), (1, 7, 0));
    }
}
