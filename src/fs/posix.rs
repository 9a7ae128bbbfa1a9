//! POSIX remote-filesystem driver: a single embedded Bash script invoked
//! as `bash -s -- <subcmd> <args...>`, fed over stdin, emitting one JSON
//! object per line of output.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::escape::escape_posix;
use crate::runner::Runner;
use crate::transport::Stdio;

use super::json::{parse_object, Value};
use super::{dd_block_plan, FileStat, OpenMode, RemoteFile, RemoteFs};

/// Dispatches on `$1` (the subcommand) and prints exactly one JSON object
/// to stdout per invocation, the way every other subcommand here does;
/// `read`/`write` stream their payload through `dd` with the block/skip/
/// count triple the caller already computed.
const HELPER_SCRIPT: &str = r#"
set -u
sub="$1"; shift
json_escape() { printf '%s' "$1" | sed 's/\\/\\\\/g; s/"/\\"/g'; }
err() { printf '{"error":"%s"}\n' "$(json_escape "$1")"; }
case "$sub" in
  stat)
    if [ ! -e "$1" ]; then err "not found"; exit 0; fi
    sz=$(stat -c %s "$1" 2>/dev/null || stat -f %z "$1")
    md=$(stat -c %a "$1" 2>/dev/null || stat -f %p "$1")
    mt=$(stat -c %Y "$1" 2>/dev/null || stat -f %m "$1")
    if [ -d "$1" ]; then isdir=true; else isdir=false; fi
    printf '{"error":"","size":%s,"mode":%s,"mtime":%s,"is_dir":%s}\n' "$sz" "$md" "$mt" "$isdir"
    ;;
  readdir)
    for entry in "$1"/*; do
      [ -e "$entry" ] || continue
      name=$(basename "$entry")
      sz=$(stat -c %s "$entry" 2>/dev/null || stat -f %z "$entry")
      md=$(stat -c %a "$entry" 2>/dev/null || stat -f %p "$entry")
      mt=$(stat -c %Y "$entry" 2>/dev/null || stat -f %m "$entry")
      if [ -d "$entry" ]; then isdir=true; else isdir=false; fi
      printf '{"error":"","name":"%s","size":%s,"mode":%s,"mtime":%s,"is_dir":%s}\n' "$(json_escape "$name")" "$sz" "$md" "$mt" "$isdir"
    done
    ;;
  sha256)
    sum=$(sha256sum "$1" 2>/dev/null | cut -d' ' -f1)
    printf '{"error":"","sum":"%s"}\n' "$sum"
    ;;
  delete) rm -rf "$1" && printf '{"error":""}\n' || err "delete failed" ;;
  mkdirall) mkdir -p "$1" && printf '{"error":""}\n' || err "mkdir failed" ;;
  rename) mv "$1" "$2" && printf '{"error":""}\n' || err "rename failed" ;;
  chmod) chmod "$2" "$1" && printf '{"error":""}\n' || err "chmod failed" ;;
  chown) chown "$2:$3" "$1" && printf '{"error":""}\n' || err "chown failed" ;;
  chtimes) touch -a -d "@$2" "$1" && touch -m -d "@$3" "$1" && printf '{"error":""}\n' || err "chtimes failed" ;;
  truncate) truncate -s "$2" "$1" && printf '{"error":""}\n' || err "truncate failed" ;;
  read)
    path="$1"; bs="$2"; skip="$3"; count="$4"
    data=$(dd if="$path" bs="$bs" skip="$skip" count="$count" 2>/dev/null | base64 | tr -d '\n')
    printf '{"error":"","data":"%s"}\n' "$data"
    ;;
  write_append)
    path="$1"; data="$2"
    printf '%s' "$data" | base64 -d >> "$path" && printf '{"error":""}\n' || err "write failed"
    ;;
  write_in_place)
    path="$1"; bs="$2"; seek="$3"; data="$4"
    printf '%s' "$data" | base64 -d | dd of="$path" bs="$bs" seek="$seek" conv=notrunc 2>/dev/null && printf '{"error":""}\n' || err "write failed"
    ;;
  create_empty)
    (: > "$1" && chmod "$2" "$1") && printf '{"error":""}\n' || err "create failed"
    ;;
  copy) cp -p "$1" "$2" && printf '{"error":""}\n' || err "copy failed" ;;
  *) err "unknown subcommand: $sub" ;;
esac
"#;

#[derive(Debug)]
pub struct PosixFs {
    runner: Arc<Runner>,
}

impl PosixFs {
    pub fn new(runner: Arc<Runner>) -> Self {
        PosixFs { runner }
    }

    async fn invoke(&self, args: &[&str]) -> Result<std::collections::BTreeMap<String, Value>> {
        invoke(&self.runner, args).await
    }

    async fn invoke_lines(&self, args: &[&str]) -> Result<Vec<std::collections::BTreeMap<String, Value>>> {
        invoke_lines(&self.runner, args).await
    }
}

async fn run_helper(runner: &Runner, args: &[&str]) -> Result<(crate::transport::ExitStatus, String)> {
    let mut full_args: Vec<&str> = vec!["-s", "--"];
    full_args.extend_from_slice(args);

    let (waiter, mut io) = runner
        .start("bash", &full_args, Stdio::Piped, Stdio::Piped, Stdio::Null)
        .await?;

    if let Some(mut stdin) = io.stdin.take() {
        stdin
            .write_all(HELPER_SCRIPT.as_bytes())
            .await
            .map_err(Error::Io)?;
        stdin.shutdown().await.map_err(Error::Io)?;
    }

    let mut out = String::new();
    if let Some(mut stdout) = io.stdout.take() {
        stdout.read_to_string(&mut out).await.map_err(Error::Io)?;
    }
    let status = waiter.wait().await?;
    Ok((status, out))
}

async fn invoke(runner: &Runner, args: &[&str]) -> Result<std::collections::BTreeMap<String, Value>> {
    let (status, out) = run_helper(runner, args).await?;
    if !status.success() {
        return Err(Error::CommandFailed {
            code: status.code,
            stderr: Vec::new(),
        });
    }

    let line = out.lines().next().unwrap_or("{}");
    let fields = parse_object(line)?;
    if let Some(msg) = fields.get("error").and_then(Value::as_str) {
        if !msg.is_empty() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                msg.to_string(),
            )));
        }
    }
    Ok(fields)
}

async fn invoke_lines(
    runner: &Runner,
    args: &[&str],
) -> Result<Vec<std::collections::BTreeMap<String, Value>>> {
    let (_status, out) = run_helper(runner, args).await?;
    out.lines().map(parse_object).collect()
}

fn field_stat(fields: &std::collections::BTreeMap<String, Value>) -> Result<FileStat> {
    Ok(FileStat {
        size: fields.get("size").and_then(Value::as_u64).unwrap_or(0),
        mode: fields.get("mode").and_then(Value::as_u64).unwrap_or(0) as u32,
        mtime: fields.get("mtime").and_then(Value::as_i64).unwrap_or(0),
        is_dir: fields.get("is_dir").and_then(Value::as_bool).unwrap_or(false),
    })
}

#[async_trait]
impl RemoteFs for PosixFs {
    async fn stat(&self, path: &str) -> Result<FileStat> {
        let fields = self.invoke(&["stat", path]).await?;
        field_stat(&fields)
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<(String, FileStat)>> {
        let lines = self.invoke_lines(&["readdir", path]).await?;
        lines
            .into_iter()
            .map(|fields| {
                let name = fields
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                field_stat(&fields).map(|stat| (name, stat))
            })
            .collect()
    }

    async fn open_file(&self, path: &str, mode: OpenMode, perm: u32) -> Result<Arc<dyn RemoteFile>> {
        if mode.create && mode.truncate {
            self.invoke(&["create_empty", path, &format!("{perm:o}")]).await?;
        }
        Ok(Arc::new(PosixFile {
            runner: self.runner.clone(),
            path: path.to_string(),
            position: std::sync::Mutex::new(0),
        }))
    }

    async fn sha256(&self, path: &str) -> Result<String> {
        let fields = self.invoke(&["sha256", path]).await?;
        Ok(fields
            .get("sum")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.invoke(&["delete", path]).await.map(|_| ())
    }

    async fn mkdir_all(&self, path: &str) -> Result<()> {
        self.invoke(&["mkdirall", path]).await.map(|_| ())
    }

    async fn rename(&self, src: &str, dst: &str) -> Result<()> {
        self.invoke(&["rename", src, dst]).await.map(|_| ())
    }

    async fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        self.invoke(&["chmod", path, &format!("{mode:o}")]).await.map(|_| ())
    }

    async fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        self.invoke(&["chown", path, &uid.to_string(), &gid.to_string()])
            .await
            .map(|_| ())
    }

    async fn chtimes(&self, path: &str, atime: i64, mtime: i64) -> Result<()> {
        self.invoke(&["chtimes", path, &atime.to_string(), &mtime.to_string()])
            .await
            .map(|_| ())
    }

    async fn truncate(&self, path: &str, size: u64) -> Result<()> {
        self.invoke(&["truncate", path, &size.to_string()]).await.map(|_| ())
    }
}

/// An open file on the POSIX side: every `read`/`write` is its own
/// `dd`-backed helper invocation, aligned via [`dd_block_plan`].
#[derive(Debug)]
struct PosixFile {
    runner: Arc<Runner>,
    path: String,
    position: std::sync::Mutex<u64>,
}

#[async_trait]
impl RemoteFile for PosixFile {
    async fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let (bs, skip, count) = dd_block_plan(offset, len);
        let fields = invoke(
            &self.runner,
            &[
                "read",
                &self.path,
                &bs.to_string(),
                &skip.to_string(),
                &count.to_string(),
            ],
        )
        .await?;
        let data = fields.get("data").and_then(Value::as_str).unwrap_or_default();
        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }

    async fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let stat_fields = invoke(&self.runner, &["stat", &self.path]).await;
        let eof = stat_fields
            .ok()
            .and_then(|f| f.get("size").and_then(Value::as_u64))
            .unwrap_or(0);
        let encoded = base64::engine::general_purpose::STANDARD.encode(data);
        let escaped = escape_posix(&encoded);

        if offset >= eof {
            invoke(&self.runner, &["write_append", &self.path, &escaped]).await?;
        } else {
            let (bs, seek, _) = dd_block_plan(offset, data.len() as u64);
            invoke(
                &self.runner,
                &[
                    "write_in_place",
                    &self.path,
                    &bs.to_string(),
                    &seek.to_string(),
                    &escaped,
                ],
            )
            .await?;
        }
        Ok(())
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
        invoke(&self.runner, &["copy", &self.path, dst]).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockTransport, ScriptedResponse};
    use crate::transport::Transport;
    use std::time::Duration;

    #[tokio::test]
    async fn sha256_parses_the_helper_response() {
        let t = Arc::new(MockTransport::new(false));
        t.connect(Duration::from_secs(1)).await.unwrap();
        t.on(
            "bash -s -- sha256 /etc/hosts",
            ScriptedResponse::ok(
                br#"{"error":"","sum":"deadbeef"}"#.to_vec(),
            ),
        );
        let runner = Arc::new(Runner::new(t));
        let fs = PosixFs::new(runner);
        let sum = fs.sha256("/etc/hosts").await.unwrap();
        assert_eq!(sum, "deadbeef");
    }

    #[tokio::test]
    async fn stat_surfaces_the_helper_error_field() {
        let t = Arc::new(MockTransport::new(false));
        t.connect(Duration::from_secs(1)).await.unwrap();
        t.on(
            "bash -s -- stat /nope",
            ScriptedResponse::ok(br#"{"error":"not found"}"#.to_vec()),
        );
        let runner = Arc::new(Runner::new(t));
        let fs = PosixFs::new(runner);
        assert!(fs.stat("/nope").await.is_err());
    }

    #[tokio::test]
    async fn open_file_passes_perm_to_create_empty() {
        let t = Arc::new(MockTransport::new(false));
        t.connect(Duration::from_secs(1)).await.unwrap();
        t.on(
            "bash -s -- create_empty /tmp/new 600",
            ScriptedResponse::ok(br#"{"error":""}"#.to_vec()),
        );
        let runner = Arc::new(Runner::new(t));
        let fs = PosixFs::new(runner);
        fs.open_file("/tmp/new", OpenMode::CREATE_WRITE_TRUNCATE, 0o600)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn open_is_read_only_and_never_creates() {
        let t = Arc::new(MockTransport::new(false));
        t.connect(Duration::from_secs(1)).await.unwrap();
        let runner = Arc::new(Runner::new(t.clone()));
        let fs = PosixFs::new(runner);
        fs.open("/etc/hosts").await.unwrap();
        assert!(t.calls().is_empty());
    }

    #[tokio::test]
    async fn seek_moves_the_cursor_copy_from_n_starts_from() {
        let t = Arc::new(MockTransport::new(false));
        t.connect(Duration::from_secs(1)).await.unwrap();
        let runner = Arc::new(Runner::new(t));
        let fs = PosixFs::new(runner);
        let file = fs.open("/tmp/existing").await.unwrap();
        assert_eq!(file.position(), 0);
        file.seek(128).await.unwrap();
        assert_eq!(file.position(), 128);
    }

    #[tokio::test]
    async fn copy_invokes_the_helper_copy_subcommand() {
        let t = Arc::new(MockTransport::new(false));
        t.connect(Duration::from_secs(1)).await.unwrap();
        t.on(
            "bash -s -- copy /tmp/src /tmp/dst",
            ScriptedResponse::ok(br#"{"error":""}"#.to_vec()),
        );
        let runner = Arc::new(Runner::new(t));
        let fs = PosixFs::new(runner);
        let file = fs.open("/tmp/src").await.unwrap();
        file.copy("/tmp/dst").await.unwrap();
    }
}
