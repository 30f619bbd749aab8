use std::fmt;

/// Name that selects the emulated backend.
pub const QEMU: &str = "qemu";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestKind {
    Emulated,
    Serial,
}

/// Resolved identity of the guest under test.
///
/// Built once from the positional argument and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestSpec {
    kind: GuestKind,
    path_or_id: String,
}

impl GuestSpec {
    /// Select a backend from the raw `T` argument.
    ///
    /// `qemu` (exact, case-sensitive) picks the emulator. Anything else is
    /// taken as a serial device path; whether it exists is checked when the
    /// backend starts.
    pub fn select(raw: &str) -> Self {
        if raw == QEMU {
            Self {
                kind: GuestKind::Emulated,
                path_or_id: String::new(),
            }
        } else {
            Self {
                kind: GuestKind::Serial,
                path_or_id: raw.to_string(),
            }
        }
    }

    pub fn kind(&self) -> GuestKind {
        self.kind
    }

    pub fn path_or_id(&self) -> &str {
        &self.path_or_id
    }
}

impl fmt::Display for GuestSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            GuestKind::Emulated => f.write_str(QEMU),
            GuestKind::Serial => write!(f, "serial:{}", self.path_or_id),
        }
    }
}
