//! Free-port discovery for sidecar servers.
//!
//! Ports are probed by binding and immediately releasing a listener; the
//! server binds the port itself later. Another process can take the port in
//! between, in which case startup fails and the caller retries.
//!
//! Ports handed out in this process are tracked in a claim set until the
//! [`PortClaim`] is dropped, so concurrent sidecars never get the same port.

use std::collections::HashSet;
use std::net::TcpListener;
use std::sync::{LazyLock, Mutex, MutexGuard};

use crate::sidecar::error::{Result, SidecarError};

/// Ports probed above the preferred one before falling back to the OS.
const DEFAULT_SEARCH_SPAN: u16 = 100;

/// OS-assigned ports tried after the linear search.
const EPHEMERAL_ATTEMPTS: u32 = 16;

static CLAIMED_PORTS: LazyLock<Mutex<HashSet<u16>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

fn claimed_ports() -> MutexGuard<'static, HashSet<u16>> {
    CLAIMED_PORTS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A port handed out by [`PortAllocator`]. Releases the claim on drop.
#[derive(Debug)]
pub struct PortClaim {
    port: u16,
}

impl PortClaim {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortClaim {
    fn drop(&mut self) {
        claimed_ports().remove(&self.port);
        tracing::trace!("Released port claim {}", self.port);
    }
}

/// Finds free TCP ports, preferring a given one.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    host: String,
    search_span: u16,
}

impl PortAllocator {
    /// Allocator probing on `host` (the address the server will bind).
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            search_span: DEFAULT_SEARCH_SPAN,
        }
    }

    /// Limit how many ports above the preferred one are probed.
    pub fn with_search_span(mut self, span: u16) -> Self {
        self.search_span = span;
        self
    }

    /// Find a free port, trying `preferred` first, then the ports above it,
    /// then OS-assigned ephemeral ports.
    ///
    /// No socket stays open once this returns.
    pub fn allocate(&self, preferred: u16) -> Result<PortClaim> {
        let mut claimed = claimed_ports();
        let mut attempts = 0u32;

        if preferred != 0 {
            let last = preferred.saturating_add(self.search_span);
            for candidate in preferred..=last {
                attempts += 1;
                if claimed.contains(&candidate) {
                    continue;
                }
                if self.probe(candidate).is_some() {
                    return Ok(Self::claim(&mut claimed, candidate, preferred));
                }
            }
        }

        for _ in 0..EPHEMERAL_ATTEMPTS {
            attempts += 1;
            if let Some(port) = self.probe(0)
                && !claimed.contains(&port)
            {
                return Ok(Self::claim(&mut claimed, port, preferred));
            }
        }

        Err(SidecarError::PortAllocation {
            preferred,
            attempts,
        })
    }

    fn claim(claimed: &mut HashSet<u16>, port: u16, preferred: u16) -> PortClaim {
        claimed.insert(port);
        if port == preferred {
            tracing::debug!("Allocated preferred port {}", port);
        } else {
            tracing::debug!("Port {} unavailable, allocated {}", preferred, port);
        }
        PortClaim { port }
    }

    /// Bind and release `port`, returning the bound port on success.
    fn probe(&self, port: u16) -> Option<u16> {
        let listener = TcpListener::bind((self.host.as_str(), port)).ok()?;
        let bound = listener.local_addr().ok()?.port();
        drop(listener);
        Some(bound)
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(crate::sidecar::config::DEFAULT_HOST)
    }
}
