// ABOUTME: Full-table bulk transfer through a named FIFO into a COPY transaction
// ABOUTME: The channel is created before the producer starts and removed on every exit path

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use futures::SinkExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio_postgres::Client;

use crate::config::SyncTask;
use crate::sync::applier::quote_identifier;

const READ_BUF_SIZE: usize = 64 * 1024;

/// Removes the transfer channel on drop, so success, error, and interruption
/// paths all clean up without separate handling.
struct FifoGuard {
    path: PathBuf,
}

impl FifoGuard {
    #[cfg(unix)]
    fn create(path: &Path) -> Result<Self> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to remove stale transfer channel {:?}", path))?;
        }

        let c_path = CString::new(path.as_os_str().as_bytes())
            .context("Transfer channel path contains a NUL byte")?;
        let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
        if rc != 0 {
            bail!(
                "Failed to create transfer channel {:?}: {}",
                path,
                std::io::Error::last_os_error()
            );
        }

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    #[cfg(not(unix))]
    fn create(path: &Path) -> Result<Self> {
        let _ = path;
        bail!("Bulk transfer requires a Unix named pipe")
    }
}

impl Drop for FifoGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove transfer channel {:?}: {}", self.path, e);
            }
        }
    }
}

/// Substitute `{fifo}` and `{table}` placeholders into the producer template.
fn render_producer(template: &[String], fifo: &Path, table: &str) -> Vec<String> {
    let fifo_str = fifo.to_string_lossy();
    template
        .iter()
        .map(|arg| arg.replace("{fifo}", &fifo_str).replace("{table}", table))
        .collect()
}

/// Run a full-table load: the external producer writes the channel, we COPY
/// it into the target inside one transaction.
///
/// The channel exists before the producer starts and is gone by the time this
/// returns, no matter how the transfer ended. The call blocks until the
/// producer finishes; no timeout is applied.
pub async fn bulk_sync(target: &mut Client, task: &SyncTask) -> Result<u64> {
    if task.bulk_producer.is_empty() {
        bail!(
            "Table {} has no bulk_producer configured",
            task.qualified_name()
        );
    }
    which::which(&task.bulk_producer[0]).with_context(|| {
        format!(
            "Bulk producer '{}' not found in PATH",
            task.bulk_producer[0]
        )
    })?;

    let dir = tempfile::tempdir().context("Failed to create transfer directory")?;
    let fifo_path = dir.path().join(format!("{}.fifo", task.table));
    let _guard = FifoGuard::create(&fifo_path)?;

    tracing::info!(
        "Bulk sync start for {} via channel {:?}",
        task.qualified_name(),
        fifo_path
    );

    let argv = render_producer(&task.bulk_producer, &fifo_path, &task.qualified_name());
    let mut child = tokio::process::Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to start bulk producer '{}'", argv[0]))?;

    let copied = match run_copy(target, task, &fifo_path).await {
        Ok(copied) => copied,
        Err(e) => {
            // The producer may still be blocked writing into the channel;
            // reap it before the guard tears the channel down.
            let _ = child.kill().await;
            let _ = child.wait().await;
            return Err(e);
        }
    };

    let status = child
        .wait()
        .await
        .context("Failed to wait for bulk producer")?;
    if !status.success() {
        bail!("Bulk producer exited with {}", status);
    }

    tracing::info!(
        "Bulk sync complete for {}: {} rows copied",
        task.qualified_name(),
        copied
    );
    Ok(copied)
}

/// Consume the channel into `COPY ... FROM STDIN` within one transaction.
async fn run_copy(target: &mut Client, task: &SyncTask, fifo_path: &Path) -> Result<u64> {
    // Opening the read end blocks until the producer opens its write end.
    let mut fifo = tokio::fs::File::open(fifo_path)
        .await
        .with_context(|| format!("Failed to open transfer channel {:?}", fifo_path))?;

    let tx = target
        .transaction()
        .await
        .context("Failed to begin COPY transaction")?;

    let copy_query = format!(
        "COPY {}.{} FROM STDIN WITH CSV",
        quote_identifier(&task.schema),
        quote_identifier(&task.table)
    );
    let sink = tx
        .copy_in::<_, Bytes>(&copy_query)
        .await
        .context("Failed to start COPY")?;
    let mut sink = Box::pin(sink);

    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = fifo
            .read(&mut buf)
            .await
            .context("Failed to read from transfer channel")?;
        if n == 0 {
            break;
        }
        sink.send(Bytes::copy_from_slice(&buf[..n]))
            .await
            .context("Failed to feed COPY")?;
    }

    let copied = sink
        .as_mut()
        .finish()
        .await
        .context("Failed to finish COPY")?;
    tx.commit().await.context("Failed to commit COPY")?;

    Ok(copied)
}
