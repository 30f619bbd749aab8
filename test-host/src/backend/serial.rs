use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use nix::fcntl::OFlag;
use nix::sys::termios::{self, BaudRate, ControlFlags, SetArg};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, ReadBuf};
use tracing::info;

use super::{GuestBackend, LineReader};
use crate::error::HostError;

const BACKEND: &str = "serial";

/// Map a numeric baud rate onto the termios constant.
pub fn baud_rate(rate: u32) -> Result<BaudRate, HostError> {
    let baud = match rate {
        1200 => BaudRate::B1200,
        2400 => BaudRate::B2400,
        4800 => BaudRate::B4800,
        9600 => BaudRate::B9600,
        19_200 => BaudRate::B19200,
        38_400 => BaudRate::B38400,
        57_600 => BaudRate::B57600,
        115_200 => BaudRate::B115200,
        230_400 => BaudRate::B230400,
        460_800 => BaudRate::B460800,
        921_600 => BaudRate::B921600,
        other => {
            return Err(HostError::InvalidArgument(format!(
                "unsupported baud rate {other}"
            )))
        }
    };
    Ok(baud)
}

/// A physical guest attached over a UART.
pub struct SerialGuest {
    device: PathBuf,
    baud_rate: u32,
    reader: Option<LineReader<SerialPort>>,
}

impl SerialGuest {
    pub fn new(device: &Path, baud_rate: u32) -> Self {
        Self {
            device: device.to_path_buf(),
            baud_rate,
            reader: None,
        }
    }
}

impl GuestBackend for SerialGuest {
    async fn start(&mut self) -> Result<(), HostError> {
        if !self.device.exists() {
            return Err(HostError::DeviceNotFound(self.device.clone()));
        }

        let baud = baud_rate(self.baud_rate)?;
        let port = SerialPort::open(&self.device, baud).map_err(|e| {
            HostError::start(BACKEND, format!("{}: {e}", self.device.display()))
        })?;
        info!(device = %self.device.display(), baud = self.baud_rate, "serial device opened");

        self.reader = Some(LineReader::new(port));
        Ok(())
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, HostError> {
        match self.reader.as_mut() {
            Some(reader) => reader.next_line(timeout).await,
            None => Err(HostError::StreamClosed),
        }
    }

    async fn stop(&mut self) -> Result<(), HostError> {
        if self.reader.take().is_some() {
            info!(device = %self.device.display(), "serial device closed");
        }
        Ok(())
    }
}

/// Non-blocking tty descriptor driven by the reactor.
///
/// A pending read never occupies a blocking-pool thread, so dropping the
/// port is enough to abandon it.
pub struct SerialPort {
    fd: AsyncFd<File>,
}

impl SerialPort {
    pub fn open(path: &Path, baud: BaudRate) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags((OFlag::O_NOCTTY | OFlag::O_NONBLOCK).bits())
            .open(path)?;

        // raw 8N1, no flow control
        let mut tio = termios::tcgetattr(&file)?;
        termios::cfmakeraw(&mut tio);
        termios::cfsetspeed(&mut tio, baud)?;
        tio.control_flags &= !(ControlFlags::PARENB | ControlFlags::CSTOPB | ControlFlags::CRTSCTS);
        tio.control_flags |= ControlFlags::CS8 | ControlFlags::CLOCAL | ControlFlags::CREAD;
        termios::tcsetattr(&file, SetArg::TCSANOW, &tio)?;
        termios::tcflush(&file, termios::FlushArg::TCIFLUSH)?;

        Ok(Self {
            fd: AsyncFd::new(file)?,
        })
    }
}

impl AsyncRead for SerialPort {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.fd.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| inner.get_ref().read(unfilled)) {
                Ok(Ok(len)) => {
                    buf.advance(len);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }
}
