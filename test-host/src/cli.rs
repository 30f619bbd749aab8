use std::path::PathBuf;

use clap::Parser;

use crate::config::HostConfig;
use crate::error::HostError;

/// Exit code for usage errors (`EX_USAGE`).
pub const EXIT_USAGE: i32 = 64;

#[derive(Parser, Debug)]
#[command(
    name = "test-host",
    version,
    about = "Swink Test Host: run tests on QEMU or on a physical guest over UART"
)]
pub struct Cli {
    /// The type of the guest to run. For QEMU guests, enter 'qemu'. For
    /// physical guests, enter the path to the UART serial device.
    #[arg(value_name = "T")]
    pub guest: String,

    /// JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to the kernel image to boot under QEMU
    #[arg(short, long)]
    pub kernel: Option<PathBuf>,

    /// Overall timeout in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Longest a single read may block, in milliseconds
    #[arg(long, value_name = "MS")]
    pub line_timeout: Option<u64>,

    /// Emulator executable
    #[arg(long, value_name = "BIN")]
    pub qemu: Option<String>,

    /// Emulated machine
    #[arg(long)]
    pub machine: Option<String>,

    /// UART baud rate
    #[arg(long)]
    pub baud: Option<u32>,

    /// Extra line that ends the run as passed
    #[arg(long = "pass-marker", value_name = "LINE")]
    pub pass_markers: Vec<String>,

    /// Expected serial output pattern (regex); a matching line passes the run
    #[arg(short, long, value_name = "REGEX")]
    pub expect: Option<String>,

    /// Extra line that ends the run as failed
    #[arg(long = "fail-marker", value_name = "LINE")]
    pub fail_markers: Vec<String>,

    /// Don't echo guest output
    #[arg(short, long)]
    pub quiet: bool,

    /// Print the run result as JSON
    #[arg(long)]
    pub json: bool,

    /// Also write the run result as JSON to this file
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,
}

impl Cli {
    /// Load the config file (if any), apply flag overrides and validate.
    pub fn host_config(&self) -> Result<HostConfig, HostError> {
        let mut config = match &self.config {
            Some(path) => HostConfig::load(path)?,
            None => HostConfig::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut HostConfig) {
        if let Some(kernel) = &self.kernel {
            config.qemu.kernel = kernel.clone();
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(ms) = self.line_timeout {
            config.line_timeout_ms = ms;
        }
        if let Some(qemu) = &self.qemu {
            config.qemu.binary = qemu.clone();
        }
        if let Some(machine) = &self.machine {
            config.qemu.machine = machine.clone();
        }
        if let Some(baud) = self.baud {
            config.serial.baud_rate = baud;
        }
        if let Some(expect) = &self.expect {
            config.markers.expect = Some(expect.clone());
        }
        config.markers.pass.extend(self.pass_markers.iter().cloned());
        config.markers.fail.extend(self.fail_markers.iter().cloned());
    }

    /// Guest lines go to stdout unless silenced or stdout carries JSON.
    pub fn echo(&self) -> bool {
        !self.quiet && !self.json
    }
}
