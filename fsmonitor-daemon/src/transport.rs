//! Shared protocol output.
//!
//! The command loop and every router worker write replies through one
//! [`CommandSender`]; the inner mutex keeps whole lines mutually exclusive
//! so concurrent notifications never interleave mid-line. Every line is
//! flushed before the lock is released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use fsmonitor_core::wire;

use crate::error::{io_err, MonitorError};

type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Cloneable handle for writing protocol lines.
#[derive(Clone)]
pub struct CommandSender {
    writer: SharedWriter,
    debug: Arc<AtomicBool>,
}

impl CommandSender {
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static, debug: Arc<AtomicBool>) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
            debug,
        }
    }

    /// Write one command line (keyword plus escaped arguments) and flush it.
    pub async fn send(&self, keyword: &str, args: &[&str]) -> Result<(), MonitorError> {
        let line = wire::encode_line(keyword, args);
        if self.debug.load(Ordering::Relaxed) {
            tracing::debug!(line = %line, "send");
        }

        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| io_err("protocol write", e))?;
        writer
            .write_all(b"\n")
            .await
            .map_err(|e| io_err("protocol write", e))?;
        writer
            .flush()
            .await
            .map_err(|e| io_err("protocol flush", e))?;
        Ok(())
    }

    pub async fn send_ok(&self) -> Result<(), MonitorError> {
        self.send("OK", &[]).await
    }

    pub async fn send_done(&self) -> Result<(), MonitorError> {
        self.send("DONE", &[]).await
    }

    pub async fn send_version(&self, version: u32) -> Result<(), MonitorError> {
        self.send("VERSION", &[&version.to_string()]).await
    }
}
