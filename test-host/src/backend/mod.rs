//! Guest backends: something that can be started, streams lines of output,
//! and can be stopped again.

pub mod emulated;
pub mod serial;

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::config::HostConfig;
use crate::error::HostError;
use crate::guest::{GuestKind, GuestSpec};

pub use emulated::EmulatedGuest;
pub use serial::SerialGuest;

#[allow(async_fn_in_trait)]
pub trait GuestBackend {
    /// Acquire the underlying resource.
    async fn start(&mut self) -> Result<(), HostError>;

    /// Next line of guest output, or `None` if nothing complete arrived
    /// within `timeout`. End of output is `HostError::StreamClosed`.
    async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, HostError>;

    /// Release the resource. Called once for every successful `start`.
    async fn stop(&mut self) -> Result<(), HostError>;
}

/// The backend chosen for a [`GuestSpec`].
pub enum Backend {
    Emulated(EmulatedGuest),
    Serial(SerialGuest),
}

impl Backend {
    pub fn for_spec(spec: &GuestSpec, config: &HostConfig) -> Self {
        match spec.kind() {
            GuestKind::Emulated => Backend::Emulated(EmulatedGuest::new(config.qemu.clone())),
            GuestKind::Serial => {
                let device = Path::new(spec.path_or_id());
                Backend::Serial(SerialGuest::new(device, config.serial.baud_rate))
            }
        }
    }
}

impl GuestBackend for Backend {
    async fn start(&mut self) -> Result<(), HostError> {
        match self {
            Backend::Emulated(b) => b.start().await,
            Backend::Serial(b) => b.start().await,
        }
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, HostError> {
        match self {
            Backend::Emulated(b) => b.read_line(timeout).await,
            Backend::Serial(b) => b.read_line(timeout).await,
        }
    }

    async fn stop(&mut self) -> Result<(), HostError> {
        match self {
            Backend::Emulated(b) => b.stop().await,
            Backend::Serial(b) => b.stop().await,
        }
    }
}

/// Splits a byte stream into lines across timed-out reads.
///
/// Bytes of an unfinished line survive a timeout in `pending`, since
/// `read_until` appends into the caller's buffer before it is cancelled.
pub struct LineReader<R> {
    inner: BufReader<R>,
    pending: Vec<u8>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            pending: Vec::new(),
            eof: false,
        }
    }

    pub async fn next_line(&mut self, timeout: Duration) -> Result<Option<String>, HostError> {
        if self.eof {
            return Err(HostError::StreamClosed);
        }

        let read = tokio::time::timeout(timeout, self.inner.read_until(b'\n', &mut self.pending));
        match read.await {
            Err(_elapsed) => Ok(None),
            Ok(Err(e)) => Err(HostError::BackendRead(e)),
            Ok(Ok(0)) => {
                self.eof = true;
                if self.pending.is_empty() {
                    Err(HostError::StreamClosed)
                } else {
                    Ok(Some(self.take_line()))
                }
            }
            Ok(Ok(_)) => Ok(Some(self.take_line())),
        }
    }

    fn take_line(&mut self) -> String {
        let bytes = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&bytes);
        line.trim_end_matches(['\n', '\r'])
            .trim_start_matches('\r')
            .to_string()
    }
}
