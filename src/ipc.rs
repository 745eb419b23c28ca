//! Structured message channel between the supervisor and its child.
//!
//! The channel is a unix socketpair whose child end is installed as file
//! descriptor 3 of the child. Each message is one JSON value on a single
//! line. The child learns the descriptor from `RESPAWN_CHANNEL_FD`.

use crate::error::Result;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

/// Environment variable naming the channel descriptor in the child.
pub const CHANNEL_FD_ENV: &str = "RESPAWN_CHANNEL_FD";

/// Descriptor number of the channel inside the child.
pub const CHANNEL_FD: i32 = 3;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Receiving half of a message channel.
pub struct IpcReceiver {
    reader: BufReader<BoxedReader>,
    line: String,
}

impl IpcReceiver {
    /// Wait for the next message. Returns `None` once the peer closed the channel.
    pub async fn recv(&mut self) -> Result<Option<Value>> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line).await? == 0 {
                return Ok(None);
            }

            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let value = serde_json::from_str(trimmed)?;
            return Ok(Some(value));
        }
    }
}

/// Sending half of a message channel.
pub struct IpcSender {
    writer: BoxedWriter,
}

impl IpcSender {
    /// Write one message.
    pub async fn send(&mut self, message: &Value) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        debug!(bytes = line.len(), "Sent message");
        Ok(())
    }
}

/// A bidirectional newline-delimited JSON channel.
pub struct IpcChannel {
    receiver: IpcReceiver,
    sender: IpcSender,
}

impl IpcChannel {
    /// Build a channel over any async byte stream halves.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            receiver: IpcReceiver {
                reader: BufReader::new(Box::new(reader)),
                line: String::new(),
            },
            sender: IpcSender {
                writer: Box::new(writer),
            },
        }
    }

    pub async fn send(&mut self, message: &Value) -> Result<()> {
        self.sender.send(message).await
    }

    pub async fn recv(&mut self) -> Result<Option<Value>> {
        self.receiver.recv().await
    }

    /// Split into independently owned halves.
    pub fn into_split(self) -> (IpcReceiver, IpcSender) {
        (self.receiver, self.sender)
    }

    /// Open the channel handed to this process by a supervisor.
    ///
    /// Returns `Ok(None)` when the process was not started with a channel.
    /// Must be called from within a tokio runtime.
    #[cfg(unix)]
    pub fn from_env() -> Result<Option<Self>> {
        use std::os::unix::io::FromRawFd;

        let fd = match std::env::var(CHANNEL_FD_ENV)
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
        {
            Some(fd) => fd,
            None => return Ok(None),
        };

        // The descriptor was installed by the supervisor and is owned by us now
        let stream = unsafe { std::os::unix::net::UnixStream::from_raw_fd(fd) };
        stream.set_nonblocking(true)?;
        let stream = tokio::net::UnixStream::from_std(stream)?;
        let (reader, writer) = stream.into_split();
        Ok(Some(Self::new(reader, writer)))
    }
}

/// Parent side of a channel whose child end still has to be inherited.
#[cfg(unix)]
pub(crate) struct PendingChannel {
    parent: std::os::unix::net::UnixStream,
    child: std::os::unix::net::UnixStream,
}

#[cfg(unix)]
impl PendingChannel {
    /// Create the socketpair and arrange for the child end to become fd 3.
    pub(crate) fn install(cmd: &mut tokio::process::Command) -> Result<Self> {
        use std::os::unix::io::AsRawFd;

        let (parent, child) = std::os::unix::net::UnixStream::pair()?;
        let child_fd = child.as_raw_fd();

        cmd.env(CHANNEL_FD_ENV, CHANNEL_FD.to_string());

        // Only async-signal-safe calls between fork and exec
        unsafe {
            cmd.pre_exec(move || {
                if child_fd == CHANNEL_FD {
                    // dup2 onto itself keeps FD_CLOEXEC, clear it explicitly
                    if libc::fcntl(CHANNEL_FD, libc::F_SETFD, 0) == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                } else if libc::dup2(child_fd, CHANNEL_FD) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        Ok(Self { parent, child })
    }

    /// Close our copy of the child end and wrap the parent end.
    pub(crate) fn finish(self) -> Result<IpcChannel> {
        drop(self.child);
        self.parent.set_nonblocking(true)?;
        let stream = tokio::net::UnixStream::from_std(self.parent)?;
        let (reader, writer) = stream.into_split();
        Ok(IpcChannel::new(reader, writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_round_trip_over_duplex() {
        let (near, far) = tokio::io::duplex(1024);
        let (near_r, near_w) = tokio::io::split(near);
        let (far_r, far_w) = tokio::io::split(far);

        let mut parent = IpcChannel::new(near_r, near_w);
        let mut child = IpcChannel::new(far_r, far_w);

        parent.send(&json!({"cmd": "ping", "n": 1})).await.unwrap();
        let got = child.recv().await.unwrap().unwrap();
        assert_eq!(got["cmd"], "ping");
        assert_eq!(got["n"], 1);
    }

    #[tokio::test]
    async fn test_recv_none_on_close() {
        let (near, far) = tokio::io::duplex(64);
        let (far_r, far_w) = tokio::io::split(far);
        let mut child = IpcChannel::new(far_r, far_w);
        drop(near);
        assert!(child.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recv_skips_blank_lines_and_rejects_garbage() {
        let (mut near, far) = tokio::io::duplex(256);
        let (far_r, far_w) = tokio::io::split(far);
        let mut child = IpcChannel::new(far_r, far_w);

        near.write_all(b"\n\n\"hello\"\nnot json\n").await.unwrap();
        assert_eq!(child.recv().await.unwrap(), Some(json!("hello")));
        assert!(child.recv().await.is_err());
    }
}
