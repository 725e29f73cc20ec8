use crate::common::SOCKET_PATH;
use crate::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

const BANNER: &str = "OK MPGPU IPC";

pub struct IpcClient {
    socket_path: String,
}

impl IpcClient {
    pub fn new() -> Self {
        Self::with_path(SOCKET_PATH)
    }

    pub fn with_path(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Sends one command and returns the daemon's reply without the
    /// session banner and closing BYE.
    pub async fn send(&self, command: &str) -> Result<String> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .context("Failed to connect to daemon. Is it running?")?;

        stream
            .write_all(format!("{}\nQUIT\n", command).as_bytes())
            .await?;

        let mut response = String::new();
        stream.read_to_string(&mut response).await?;

        Ok(strip_session(&response))
    }

    pub async fn is_alive(&self) -> bool {
        UnixStream::connect(&self.socket_path).await.is_ok()
    }

    pub async fn ping(&self) -> Result<bool> {
        match self.send("PING").await {
            Ok(resp) => Ok(resp.contains("PONG")),
            Err(_) => Ok(false),
        }
    }
}

impl Default for IpcClient {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_session(raw: &str) -> String {
    let mut lines: Vec<&str> = raw.lines().collect();
    if lines.first() == Some(&BANNER) {
        lines.remove(0);
    }
    if lines.last() == Some(&"BYE") {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}
