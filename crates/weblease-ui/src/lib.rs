#![warn(missing_docs)]
//! # weblease-ui
//!
//! ## Purpose
//! Defines the presentation-facing state model for `weblease`.
//!
//! ## Responsibilities
//! - Build the refreshed menu's dynamic label lines from status snapshots.
//! - Clamp webview zoom factors to the supported range.
//! - Track registered shortcut accelerators so they can be released when
//!   the window goes away.
//! - Validate update URLs before they are handed to an external browser.
//!
//! ## Data flow
//! The session presenter applies each published
//! [`weblease_core::StatusSnapshot`] to [`MenuModel`], which the desktop
//! shell renders.
//!
//! ## Ownership and lifetimes
//! `MenuModel` owns all label strings; nothing here borrows from the
//! controller or keeps snapshot history.
//!
//! ## Error model
//! This crate favors explicit state over recoverable errors. Out-of-range
//! zoom inputs are clamped, unknown URLs are rejected by predicate.

use url::Url;
use weblease_core::{RemainingTime, StatusSnapshot};

/// Smallest allowed webview zoom factor.
pub const ZOOM_MIN: f64 = 0.5;
/// Largest allowed webview zoom factor.
pub const ZOOM_MAX: f64 = 2.0;
/// Zoom increment applied per key or wheel step.
pub const ZOOM_STEP: f64 = 0.1;

/// Shortcut accelerators registered by the desktop shell.
pub mod shortcuts {
    /// Reload the embedded page.
    pub const REFRESH: &str = "Ctrl+R";
    /// Open the developer tools.
    pub const DEV_TOOLS: &str = "F12";
    /// Zoom in one step.
    pub const ZOOM_IN: &str = "Ctrl+=";
    /// Zoom out one step.
    pub const ZOOM_OUT: &str = "Ctrl+-";
    /// Reset zoom to 1.0.
    pub const ZOOM_RESET: &str = "Ctrl+0";
    /// Quit the application.
    pub const QUIT: &str = "Ctrl+Q";
}

/// Clamps a zoom factor into the supported range.
pub fn clamp_zoom(value: f64) -> f64 {
    value.clamp(ZOOM_MIN, ZOOM_MAX)
}

/// Returns the zoom factor after one step in.
pub fn zoom_in(current: f64) -> f64 {
    clamp_zoom(current + ZOOM_STEP)
}

/// Returns the zoom factor after one step out.
pub fn zoom_out(current: f64) -> f64 {
    clamp_zoom(current - ZOOM_STEP)
}

/// Returns the reset zoom factor.
pub fn zoom_reset() -> f64 {
    1.0
}

/// Returns `true` when a URL may be opened in the external browser.
///
/// Only absolute `http`/`https` URLs qualify.
pub fn is_openable_update_url(candidate: &str) -> bool {
    Url::parse(candidate)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Dynamic menu label state rebuilt from each published snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuModel {
    version_line: String,
    network_line: String,
    countdown_line: String,
}

impl MenuModel {
    /// Creates the model with placeholder lines shown before the first
    /// snapshot arrives.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version_line: format!("Version: {}", version.into()),
            network_line: "Network: checking".to_string(),
            countdown_line: "Expires in: checking".to_string(),
        }
    }

    /// Rebuilds the dynamic lines from the latest snapshot.
    ///
    /// The previous lines are overwritten; the model keeps no history.
    pub fn apply_snapshot(&mut self, snapshot: &StatusSnapshot) {
        self.network_line = match (
            snapshot.connectivity.connected,
            snapshot.connectivity.local_address.as_deref(),
        ) {
            (true, Some(address)) => format!("Network: connected, local IP {address}"),
            _ => "Network: offline".to_string(),
        };

        self.countdown_line = match snapshot.remaining {
            RemainingTime::Expired => "Expired".to_string(),
            remaining => {
                // Whole minutes, the granularity the menu has always shown.
                let minutes = remaining.total_seconds().unwrap_or(0) / 60;
                format!("Expires in {minutes} min")
            }
        };
    }

    /// Returns the version label line.
    pub fn version_line(&self) -> &str {
        &self.version_line
    }

    /// Returns the network status label line.
    pub fn network_line(&self) -> &str {
        &self.network_line
    }

    /// Returns the countdown label line.
    pub fn countdown_line(&self) -> &str {
        &self.countdown_line
    }
}

/// Bookkeeping for globally-registered shortcut accelerators.
///
/// The shell registers accelerators at window creation and must release
/// them all when the window is destroyed, so no OS-level hook outlives the
/// UI it serves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShortcutRegistry {
    registered: Vec<String>,
}

impl ShortcutRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one accelerator registration.
    ///
    /// # Returns
    /// `false` when the accelerator was already registered.
    pub fn register(&mut self, accelerator: impl Into<String>) -> bool {
        let accelerator = accelerator.into();
        if self.registered.contains(&accelerator) {
            return false;
        }

        self.registered.push(accelerator);
        true
    }

    /// Releases every registered accelerator.
    pub fn release_all(&mut self) {
        self.registered.clear();
    }

    /// Returns the currently registered accelerators.
    pub fn registered(&self) -> &[String] {
        &self.registered
    }

    /// Returns `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }
}
