//! Windows remote-filesystem driver: one long-lived PowerShell process
//! fed line-protocol commands over its stdin, each command's output
//! terminated by a sentinel line so the reader knows where one response
//! ends and the next begins. A fresh `powershell.exe` per call is too
//! slow to be usable for anything beyond a handful of operations, hence
//! the persistent session.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write as _;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{Error, Result};
use crate::runner::Runner;
use crate::transport::Stdio;

use super::json::{parse_object, Value};
use super::{FileStat, OpenMode, RemoteFile, RemoteFs};

const SENTINEL: &str = "---RIG-EOM---";

struct Session {
    stdin: std::pin::Pin<Box<dyn tokio::io::AsyncWrite + Send>>,
    stdout: BufReader<std::pin::Pin<Box<dyn tokio::io::AsyncRead + Send>>>,
    // Never read, but dropping it would let the backing process get
    // reaped out from under the session.
    #[allow(dead_code)]
    waiter: Box<dyn crate::transport::Waiter>,
}

#[derive(Debug)]
pub struct WindowsFs {
    runner: Arc<Runner>,
    session: AsyncMutex<Option<Session>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish()
    }
}

impl WindowsFs {
    pub fn new(runner: Arc<Runner>) -> Self {
        WindowsFs {
            runner,
            session: AsyncMutex::new(None),
        }
    }

    async fn run(&self, powershell: &str) -> Result<std::collections::BTreeMap<String, Value>> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(self.spawn_session().await?);
        }
        let session = guard.as_mut().expect("just populated above");

        let command = format!("{powershell}; Write-Output '{SENTINEL}'\n");
        session
            .stdin
            .write_all(command.as_bytes())
            .await
            .map_err(Error::Io)?;
        session.stdin.flush().await.map_err(Error::Io)?;

        let mut line = String::new();
        loop {
            line.clear();
            let n = session.stdout.read_line(&mut line).await.map_err(Error::Io)?;
            if n == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "powershell session closed",
                )));
            }
            let trimmed = line.trim_end();
            if trimmed == SENTINEL {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "powershell session produced no response before the sentinel",
                )));
            }
            if trimmed.starts_with('{') {
                let fields = parse_object(trimmed)?;
                // Drain the sentinel line that follows.
                let mut sentinel_line = String::new();
                session
                    .stdout
                    .read_line(&mut sentinel_line)
                    .await
                    .map_err(Error::Io)?;
                if let Some(msg) = fields.get("error").and_then(Value::as_str) {
                    if !msg.is_empty() {
                        return Err(Error::Io(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            msg.to_string(),
                        )));
                    }
                }
                return Ok(fields);
            }
            // Non-JSON chatter (banners, progress) — keep reading.
        }
    }

    /// Like [`WindowsFs::run`], but collects every JSON line emitted
    /// before the sentinel instead of stopping at the first — used by
    /// `read_dir`, whose `ForEach-Object` prints one object per child.
    async fn run_lines(&self, powershell: &str) -> Result<Vec<std::collections::BTreeMap<String, Value>>> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(self.spawn_session().await?);
        }
        let session = guard.as_mut().expect("just populated above");

        let command = format!("{powershell}; Write-Output '{SENTINEL}'\n");
        session
            .stdin
            .write_all(command.as_bytes())
            .await
            .map_err(Error::Io)?;
        session.stdin.flush().await.map_err(Error::Io)?;

        let mut results = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            let n = session.stdout.read_line(&mut line).await.map_err(Error::Io)?;
            if n == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "powershell session closed",
                )));
            }
            let trimmed = line.trim_end();
            if trimmed == SENTINEL {
                return Ok(results);
            }
            if trimmed.starts_with('{') {
                results.push(parse_object(trimmed)?);
            }
        }
    }

    async fn spawn_session(&self) -> Result<Session> {
        let (waiter, io) = self
            .runner
            .start(
                "powershell",
                &["-NoLogo", "-NoProfile", "-Command", "-"],
                Stdio::Piped,
                Stdio::Piped,
                Stdio::Null,
            )
            .await?;
        let stdin = io.stdin.ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "transport did not provide a piped stdin",
            ))
        })?;
        let stdout = io.stdout.ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "transport did not provide a piped stdout",
            ))
        })?;
        Ok(Session {
            stdin,
            stdout: BufReader::new(stdout),
            waiter,
        })
    }
}

#[async_trait]
impl RemoteFs for WindowsFs {
    async fn stat(&self, path: &str) -> Result<FileStat> {
        let ps = format!(
            "$i = Get-Item -LiteralPath '{path}' -Force -ErrorAction Stop; \
             $o = @{{error='';size=$i.Length;mode=0;mtime=[int64](Get-Date $i.LastWriteTimeUtc -UFormat %s);is_dir=$i.PSIsContainer}}; \
             ConvertTo-Json -Compress $o"
        );
        let fields = self.run(&ps).await?;
        Ok(FileStat {
            size: fields.get("size").and_then(Value::as_u64).unwrap_or(0),
            mode: fields.get("mode").and_then(Value::as_u64).unwrap_or(0) as u32,
            mtime: fields.get("mtime").and_then(Value::as_i64).unwrap_or(0),
            is_dir: fields.get("is_dir").and_then(Value::as_bool).unwrap_or(false),
        })
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<(String, FileStat)>> {
        let ps = format!(
            "Get-ChildItem -LiteralPath '{path}' -Force | ForEach-Object {{ \
             ConvertTo-Json -Compress @{{error='';name=$_.Name;size=$_.Length;mode=0;mtime=0;is_dir=$_.PSIsContainer}} }}"
        );
        let lines = self.run_lines(&ps).await?;
        Ok(lines
            .into_iter()
            .map(|fields| {
                let name = fields.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                let stat = FileStat {
                    size: fields.get("size").and_then(Value::as_u64).unwrap_or(0),
                    mode: 0,
                    mtime: 0,
                    is_dir: fields.get("is_dir").and_then(Value::as_bool).unwrap_or(false),
                };
                (name, stat)
            })
            .collect())
    }

    async fn open_file(&self, path: &str, mode: OpenMode, perm: u32) -> Result<Arc<dyn RemoteFile>> {
        let _ = perm; // NTFS mode bits have no equivalent; accepted for surface parity.
        if mode.create && mode.truncate {
            let ps = format!(
                "[System.IO.File]::WriteAllBytes('{path}', [byte[]]@()); ConvertTo-Json -Compress @{{error=''}}"
            );
            self.run(&ps).await?;
        }
        Ok(Arc::new(WindowsFile {
            runner: self.runner.clone(),
            path: path.to_string(),
            position: std::sync::Mutex::new(0),
        }))
    }

    async fn sha256(&self, path: &str) -> Result<String> {
        let ps = format!(
            "$h = (Get-FileHash -LiteralPath '{path}' -Algorithm SHA256).Hash.ToLower(); \
             ConvertTo-Json -Compress @{{error='';sum=$h}}"
        );
        let fields = self.run(&ps).await?;
        Ok(fields.get("sum").and_then(Value::as_str).unwrap_or_default().to_string())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let ps = format!(
            "Remove-Item -LiteralPath '{path}' -Recurse -Force -ErrorAction Stop; ConvertTo-Json -Compress @{{error=''}}"
        );
        self.run(&ps).await.map(|_| ())
    }

    async fn mkdir_all(&self, path: &str) -> Result<()> {
        let ps = format!(
            "New-Item -ItemType Directory -Force -Path '{path}' | Out-Null; ConvertTo-Json -Compress @{{error=''}}"
        );
        self.run(&ps).await.map(|_| ())
    }

    async fn rename(&self, src: &str, dst: &str) -> Result<()> {
        let ps = format!(
            "Move-Item -LiteralPath '{src}' -Destination '{dst}' -Force -ErrorAction Stop; ConvertTo-Json -Compress @{{error=''}}"
        );
        self.run(&ps).await.map(|_| ())
    }

    async fn chmod(&self, _path: &str, _mode: u32) -> Result<()> {
        // NTFS has no POSIX mode bits; accepted as a no-op for parity with
        // the POSIX driver's surface.
        Ok(())
    }

    async fn chown(&self, _path: &str, _uid: u32, _gid: u32) -> Result<()> {
        Ok(())
    }

    async fn chtimes(&self, path: &str, atime: i64, mtime: i64) -> Result<()> {
        let ps = format!(
            "$i = Get-Item -LiteralPath '{path}' -Force -ErrorAction Stop; \
             $i.LastAccessTimeUtc = [DateTimeOffset]::FromUnixTimeSeconds({atime}).UtcDateTime; \
             $i.LastWriteTimeUtc = [DateTimeOffset]::FromUnixTimeSeconds({mtime}).UtcDateTime; \
             ConvertTo-Json -Compress @{{error=''}}"
        );
        self.run(&ps).await.map(|_| ())
    }

    async fn truncate(&self, path: &str, size: u64) -> Result<()> {
        let ps = format!(
            "$fs = [System.IO.File]::Open('{path}', 'OpenOrCreate'); $fs.SetLength({size}); $fs.Close(); \
             ConvertTo-Json -Compress @{{error=''}}"
        );
        self.run(&ps).await.map(|_| ())
    }
}

/// An open file on the Windows side: every write is gzip-then-base64
/// encoded and decoded/inflated by the PowerShell session, matching the
/// spec's reasoning for why uploads go through compression instead of a
/// raw-byte line protocol (base64 alone roughly doubles the wire size).
#[derive(Debug)]
struct WindowsFile {
    runner: Arc<Runner>,
    path: String,
    position: std::sync::Mutex<u64>,
}

#[async_trait]
impl RemoteFile for WindowsFile {
    async fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let fs = WindowsFs::new(self.runner.clone());
        let ps = format!(
            "$fs = [System.IO.File]::OpenRead('{path}'); $fs.Seek({offset}, 'Begin') | Out-Null; \
             $buf = New-Object byte[] {len}; $n = $fs.Read($buf, 0, {len}); $fs.Close(); \
             $gz = New-Object System.IO.MemoryStream; \
             $gzs = New-Object System.IO.Compression.GZipStream($gz, [System.IO.Compression.CompressionMode]::Compress); \
             $gzs.Write($buf, 0, $n); $gzs.Close(); \
             ConvertTo-Json -Compress @{{error='';data=[Convert]::ToBase64String($gz.ToArray())}}",
            path = self.path,
            offset = offset,
            len = len,
        );
        let fields = fs.run(&ps).await?;
        let data = fields.get("data").and_then(Value::as_str).unwrap_or_default();
        let compressed = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        gunzip(&compressed)
    }

    async fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let fs = WindowsFs::new(self.runner.clone());
        let compressed = gzip(data)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(compressed);
        let ps = format!(
            "$bytes = [System.IO.Compression.GZipStream]::new([System.IO.MemoryStream]::new([Convert]::FromBase64String('{encoded}')), [System.IO.Compression.CompressionMode]::Decompress); \
             $out = New-Object System.IO.MemoryStream; $bytes.CopyTo($out); \
             $fs = [System.IO.File]::Open('{path}', 'OpenOrCreate'); $fs.Seek({offset}, 'Begin') | Out-Null; \
             $fs.Write($out.ToArray(), 0, $out.Length); $fs.Close(); \
             ConvertTo-Json -Compress @{{error=''}}",
            path = self.path,
            offset = offset,
        );
        fs.run(&ps).await.map(|_| ())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn seek(&self, offset: u64) -> Result<()> {
        *self.position.lock().unwrap() = offset;
        Ok(())
    }

    fn position(&self) -> u64 {
        *self.position.lock().unwrap()
    }

    async fn copy(&self, dst: &str) -> Result<()> {
        let fs = WindowsFs::new(self.runner.clone());
        let ps = format!(
            "Copy-Item -LiteralPath '{src}' -Destination '{dst}' -Force -ErrorAction Stop; \
             ConvertTo-Json -Compress @{{error=''}}",
            src = self.path,
        );
        fs.run(&ps).await.map(|_| ())
    }
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(Error::Io)?;
    encoder.finish().map_err(Error::Io)
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::read::GzDecoder;
    use std::io::Read;
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(Error::Io)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_round_trips() {
        let original = b"hello from a remote windows host";
        let compressed = gzip(original).unwrap();
        let restored = gunzip(&compressed).unwrap();
        assert_eq!(restored, original);
    }
}
