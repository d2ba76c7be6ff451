#![warn(missing_docs)]
//! # weblease-core
//!
//! ## Purpose
//! Defines the pure data model used across the `weblease` workspace.
//!
//! ## Responsibilities
//! - Represent the immutable expiry policy fixed at configuration time.
//! - Evaluate remaining time-to-live against a wall-clock instant.
//! - Represent connectivity snapshots and the combined status snapshot
//!   published to the presentation layer.
//! - Describe one-shot cleanup jobs for the destruction path.
//!
//! ## Data flow
//! The lifecycle controller evaluates [`RemainingTime`] from an
//! [`ExpiryPolicy`], pairs it with the probe's [`ConnectivitySnapshot`], and
//! publishes the resulting [`StatusSnapshot`]. On expiry the cleanup layer
//! materializes a [`CleanupJob`] that is consumed exactly once.
//!
//! ## Ownership and lifetimes
//! Snapshots and jobs own their backing strings and paths to avoid borrow
//! coupling between the refresh loop, the probe worker, and the presenter.
//!
//! ## Error model
//! The only fallible operation here is the snapshot JSON codec, reported as
//! [`CoreError`]. Time evaluation is total and never fails.
//!
//! ## Example
//! ```rust
//! use time::macros::datetime;
//! use weblease_core::{evaluate, RemainingTime};
//!
//! let remaining = evaluate(
//!     datetime!(2025-12-30 0:00 UTC),
//!     datetime!(2025-12-31 0:00 UTC),
//! );
//! assert_eq!(
//!     remaining,
//!     RemainingTime::Remaining { days: 1, hours: 0, minutes: 0, seconds: 0 }
//! );
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Duration, OffsetDateTime};

/// Immutable expiration policy fixed at process configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    /// Absolute UTC instant after which the lease is expired.
    pub deadline: OffsetDateTime,
    /// Whether the destructive cleanup action fires on expiry.
    pub destruct_enabled: bool,
}

impl ExpiryPolicy {
    /// Creates a policy from a deadline and destruct toggle.
    pub fn new(deadline: OffsetDateTime, destruct_enabled: bool) -> Self {
        Self {
            deadline,
            destruct_enabled,
        }
    }
}

/// Remaining time-to-live derived from a policy deadline.
///
/// # Semantics
/// `Expired` is terminal: once a caller has observed it for a fixed deadline,
/// later evaluations with later `now` values can never leave it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemainingTime {
    /// The deadline has passed.
    Expired,
    /// Whole-unit breakdown of the time left until the deadline.
    Remaining {
        /// Whole days remaining.
        days: u64,
        /// Whole hours remaining after days (0..24).
        hours: u8,
        /// Whole minutes remaining after hours (0..60).
        minutes: u8,
        /// Whole seconds remaining after minutes (0..60).
        seconds: u8,
    },
}

impl RemainingTime {
    /// Returns `true` for the terminal sentinel.
    pub fn is_expired(&self) -> bool {
        matches!(self, RemainingTime::Expired)
    }

    /// Returns the flat second count, or `None` when expired.
    pub fn total_seconds(&self) -> Option<u64> {
        match *self {
            RemainingTime::Expired => None,
            RemainingTime::Remaining {
                days,
                hours,
                minutes,
                seconds,
            } => Some(
                days * 86_400
                    + u64::from(hours) * 3_600
                    + u64::from(minutes) * 60
                    + u64::from(seconds),
            ),
        }
    }
}

/// Evaluates remaining time-to-live at `now` against `deadline`.
///
/// # Semantics
/// Pure and deterministic. A non-positive difference yields
/// [`RemainingTime::Expired`]; otherwise the difference is broken down with
/// floor division at each unit, so every field is non-negative.
pub fn evaluate(now: OffsetDateTime, deadline: OffsetDateTime) -> RemainingTime {
    let remaining = deadline - now;
    if remaining <= Duration::ZERO {
        return RemainingTime::Expired;
    }

    let total_seconds = remaining.whole_seconds().max(0) as u64;
    RemainingTime::Remaining {
        days: total_seconds / 86_400,
        hours: ((total_seconds % 86_400) / 3_600) as u8,
        minutes: ((total_seconds % 3_600) / 60) as u8,
        seconds: (total_seconds % 60) as u8,
    }
}

/// Best-effort round-trip latency reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LatencyReading {
    /// Round trip completed within the probe timeout, in milliseconds.
    Measured(u64),
    /// Probe failed, timed out, or was not attempted.
    Unavailable,
}

/// Point-in-time network connectivity facts.
///
/// Recomputed on each refresh tick; the next snapshot supersedes this one
/// entirely, no history is retained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivitySnapshot {
    /// Whether a non-loopback IPv4 interface is present.
    pub connected: bool,
    /// Textual address of the selected interface, when connected.
    pub local_address: Option<String>,
    /// Best-effort latency to the fixed external target.
    pub latency: LatencyReading,
}

impl ConnectivitySnapshot {
    /// Snapshot for a host with no usable interface.
    pub fn offline() -> Self {
        Self {
            connected: false,
            local_address: None,
            latency: LatencyReading::Unavailable,
        }
    }

    /// Snapshot for a connected host with the given local address.
    pub fn online(local_address: impl Into<String>, latency: LatencyReading) -> Self {
        Self {
            connected: true,
            local_address: Some(local_address.into()),
            latency,
        }
    }
}

/// Combined per-tick status published to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Connectivity facts from the environment probe.
    pub connectivity: ConnectivitySnapshot,
    /// Remaining time-to-live from the expiry oracle.
    pub remaining: RemainingTime,
}

impl StatusSnapshot {
    /// Serializes the snapshot to compact JSON bytes.
    ///
    /// # Errors
    /// Returns [`CoreError::Codec`] when JSON serialization fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, CoreError> {
        serde_json::to_vec(self).map_err(CoreError::Codec)
    }

    /// Deserializes a snapshot from JSON bytes.
    ///
    /// # Errors
    /// Returns [`CoreError::Codec`] when JSON decoding fails.
    pub fn from_json_bytes(raw: &[u8]) -> Result<Self, CoreError> {
        serde_json::from_slice(raw).map_err(CoreError::Codec)
    }
}

/// Host operating-system family used by the cleanup synthesizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    /// Windows targets (batch script, `cmd` launch).
    Windows,
    /// macOS targets (`.command` script, Terminal launch).
    MacOs,
    /// Other unix-like targets (`.sh` script, direct shell launch).
    Linux,
}

/// Program plus arguments used to launch a cleanup script detached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    /// Executable to spawn.
    pub program: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
}

/// Fully-described one-shot destruction job.
///
/// Constructed once by the synthesizer, consumed once by a job runner
/// (write file, set permissions, launch detached), then discarded. Never
/// retried or persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupJob {
    /// Install directory the script removes.
    ///
    /// # Invariant
    /// Derived from the running executable's own location, never from
    /// user-supplied input.
    pub target_directory: PathBuf,
    /// Temp-directory path the script is written to.
    pub script_path: PathBuf,
    /// Deterministic script content.
    pub script_body: String,
    /// Detached launch invocation.
    pub launch_command: LaunchCommand,
    /// OS family the script was synthesized for.
    pub os_family: OsFamily,
}

/// Error type for core codec failures.
#[derive(Debug, Error)]
pub enum CoreError {
    /// JSON encoding/decoding error.
    #[error("status snapshot codec failure: {0}")]
    Codec(#[from] serde_json::Error),
}
