//! Per-process subscriber identity.
//!
//! The identity names both the consumer tag and the queue, so a subscriber
//! that reconnects within the same process redeclares the same queue instead
//! of leaving an orphan behind.

use std::sync::OnceLock;

use sha2::{Digest, Sha256};

static IDENTITY: OnceLock<String> = OnceLock::new();

/// Returns the same host/process unique string for the lifetime of this process.
pub fn identity() -> &'static str {
    IDENTITY.get_or_init(|| {
        let hostname = hostname();
        derive_identity(
            hostname.as_ref().map(String::as_str).map_err(String::as_str),
            std::process::id(),
        )
    })
}

/// Hash the host name, the host lookup error (if any) and the pid.
///
/// A failed lookup still contributes its error text, so this never fails.
pub fn derive_identity(hostname: Result<&str, &str>, pid: u32) -> String {
    let mut hasher = Sha256::new();
    match hostname {
        Ok(name) => {
            hasher.update(name.as_bytes());
            hasher.update(b"\0");
        }
        Err(err) => {
            hasher.update(b"\0");
            hasher.update(err.as_bytes());
        }
    }
    hasher.update(b"\0");
    hasher.update(pid.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(unix)]
fn hostname() -> Result<String, String> {
    nix::unistd::gethostname()
        .map_err(|e| e.to_string())
        .map(|name| name.to_string_lossy().into_owned())
}

#[cfg(not(unix))]
fn hostname() -> Result<String, String> {
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .map_err(|e| e.to_string())
}
