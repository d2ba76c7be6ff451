#![warn(missing_docs)]
//! # weblease-probe
//!
//! ## Purpose
//! Produces best-effort network connectivity snapshots for the refresh loop.
//!
//! ## Responsibilities
//! - Define a backend-agnostic interface enumeration trait.
//! - Expose real enumeration through the host's network interface list.
//! - Expose a deterministic static source for CI and unit tests.
//! - Measure a single bounded TCP round trip to a fixed external target.
//!
//! ## Data flow
//! The lifecycle controller's probe worker calls
//! [`EnvironmentProbe::snapshot`] each tick; the resulting
//! [`weblease_core::ConnectivitySnapshot`] supersedes the previous one.
//!
//! ## Error model
//! Probe failures never escape [`EnvironmentProbe::snapshot`]: enumeration
//! failures degrade to "not connected" and latency failures degrade to
//! `Unavailable`. [`ProbeError`] is only visible on the latency trait seam,
//! where tests and alternate backends need to produce failures.

use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sysinfo::Networks;
use thiserror::Error;
use weblease_core::{ConnectivitySnapshot, LatencyReading};

/// One enumerated local network interface address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceRecord {
    /// Interface name as reported by the OS.
    pub name: String,
    /// Address bound to the interface.
    pub address: IpAddr,
}

/// Trait implemented by interface enumeration providers.
pub trait InterfaceSource: Send + Sync {
    /// Lists currently known interface addresses, in OS order.
    fn interfaces(&self) -> Vec<InterfaceRecord>;
}

/// Real interface enumeration through the host's network list.
#[derive(Debug, Default)]
pub struct SysinfoInterfaceSource;

impl InterfaceSource for SysinfoInterfaceSource {
    fn interfaces(&self) -> Vec<InterfaceRecord> {
        let networks = Networks::new_with_refreshed_list();
        let mut records = Vec::new();
        for (name, data) in networks.iter() {
            for ip_network in data.ip_networks() {
                records.push(InterfaceRecord {
                    name: name.clone(),
                    address: ip_network.addr,
                });
            }
        }
        records
    }
}

/// Deterministic fixture source for tests and headless CI.
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaceSource {
    records: Vec<InterfaceRecord>,
}

impl StaticInterfaceSource {
    /// Creates a source that reports exactly `records`.
    pub fn new(records: Vec<InterfaceRecord>) -> Self {
        Self { records }
    }
}

impl InterfaceSource for StaticInterfaceSource {
    fn interfaces(&self) -> Vec<InterfaceRecord> {
        self.records.clone()
    }
}

/// Trait implemented by round-trip latency providers.
pub trait LatencyProbe: Send + Sync {
    /// Performs one bounded round trip to the fixed external target.
    ///
    /// # Errors
    /// Returns [`ProbeError`] on resolution failure, connect failure, or
    /// timeout. Callers treat every failure as an `Unavailable` reading.
    fn round_trip(&self) -> Result<Duration, ProbeError>;
}

/// Latency probe measuring a TCP connect round trip.
///
/// # Notes
/// One connect per call; the stream is dropped immediately after the
/// handshake completes. The reading is telemetry, not a correctness signal.
#[derive(Debug, Clone)]
pub struct TcpLatencyProbe {
    target: String,
    timeout: Duration,
}

impl TcpLatencyProbe {
    /// Creates a validated probe against a `host:port` target.
    ///
    /// # Errors
    /// Returns [`ProbeError::InvalidTarget`] when the target is empty or has
    /// no port component.
    pub fn new(target: impl Into<String>, timeout: Duration) -> Result<Self, ProbeError> {
        let target = target.into();
        let (host, port) = target
            .rsplit_once(':')
            .ok_or_else(|| ProbeError::InvalidTarget(target.clone()))?;
        if host.is_empty() || port.parse::<u16>().is_err() {
            return Err(ProbeError::InvalidTarget(target));
        }

        Ok(Self { target, timeout })
    }

    /// Returns the configured `host:port` target.
    pub fn target(&self) -> &str {
        &self.target
    }

    fn resolve(&self) -> Result<SocketAddr, ProbeError> {
        self.target
            .to_socket_addrs()
            .map_err(|error| ProbeError::Resolve(format!("{}: {error}", self.target)))?
            .next()
            .ok_or_else(|| ProbeError::Resolve(format!("{}: no addresses", self.target)))
    }
}

impl LatencyProbe for TcpLatencyProbe {
    fn round_trip(&self) -> Result<Duration, ProbeError> {
        let address = self.resolve()?;
        let started = Instant::now();
        let stream = TcpStream::connect_timeout(&address, self.timeout)
            .map_err(ProbeError::RoundTrip)?;
        let elapsed = started.elapsed();
        drop(stream);
        Ok(elapsed)
    }
}

/// Fixture latency probe returning a fixed reading.
#[derive(Debug, Clone, Default)]
pub struct StaticLatencyProbe {
    millis: Option<u64>,
}

impl StaticLatencyProbe {
    /// Probe that always measures `millis`.
    pub fn measured(millis: u64) -> Self {
        Self {
            millis: Some(millis),
        }
    }

    /// Probe that always fails as if timed out.
    pub fn timing_out() -> Self {
        Self { millis: None }
    }
}

impl LatencyProbe for StaticLatencyProbe {
    fn round_trip(&self) -> Result<Duration, ProbeError> {
        match self.millis {
            Some(millis) => Ok(Duration::from_millis(millis)),
            None => Err(ProbeError::RoundTrip(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "static probe configured to time out",
            ))),
        }
    }
}

/// Trait implemented by connectivity snapshot providers.
///
/// The contract is infallible: implementations degrade internally rather
/// than surfacing errors to the refresh loop.
pub trait ConnectivityProbe: Send + Sync {
    /// Computes the current connectivity snapshot.
    fn snapshot(&self) -> ConnectivitySnapshot;
}

/// Environment probe composing interface enumeration with latency telemetry.
pub struct EnvironmentProbe {
    interfaces: Arc<dyn InterfaceSource>,
    latency: Option<Arc<dyn LatencyProbe>>,
}

impl EnvironmentProbe {
    /// Creates a probe over the given backends.
    ///
    /// Passing `None` for `latency` disables the round-trip measurement; the
    /// snapshot then always carries an `Unavailable` reading.
    pub fn new(
        interfaces: Arc<dyn InterfaceSource>,
        latency: Option<Arc<dyn LatencyProbe>>,
    ) -> Self {
        Self {
            interfaces,
            latency,
        }
    }
}

impl ConnectivityProbe for EnvironmentProbe {
    /// Computes the current connectivity snapshot.
    ///
    /// # Semantics
    /// Selects the first non-loopback IPv4 address as "connected". The
    /// latency probe runs only when connected, and any latency failure is
    /// absorbed into an `Unavailable` reading; this call never fails and
    /// never blocks beyond the latency probe's own timeout.
    fn snapshot(&self) -> ConnectivitySnapshot {
        let selected = self
            .interfaces
            .interfaces()
            .into_iter()
            .find(|record| match record.address {
                IpAddr::V4(address) => !address.is_loopback() && !address.is_unspecified(),
                IpAddr::V6(_) => false,
            });

        let Some(record) = selected else {
            return ConnectivitySnapshot::offline();
        };

        let latency = match &self.latency {
            Some(probe) => match probe.round_trip() {
                Ok(elapsed) => LatencyReading::Measured(elapsed.as_millis() as u64),
                Err(_) => LatencyReading::Unavailable,
            },
            None => LatencyReading::Unavailable,
        };

        ConnectivitySnapshot::online(record.address.to_string(), latency)
    }
}

/// Probe layer error type.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Latency target is not a usable `host:port` pair.
    #[error("invalid latency target: {0}")]
    InvalidTarget(String),
    /// Latency target did not resolve to any address.
    #[error("latency target resolution failed: {0}")]
    Resolve(String),
    /// Connect failed or timed out.
    #[error("latency round trip failed: {0}")]
    RoundTrip(std::io::Error),
}
