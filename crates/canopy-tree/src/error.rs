// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error types for the service-tree core.

use thiserror::Error;

/// A single snapshot entry could not be turned into a [`crate::ServiceSnapshot`].
///
/// Only the offending entry is dropped; the rest of its batch still applies.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The entry has no `ID`, or the `ID` is empty.
    #[error("snapshot has no ID")]
    MissingId,
    /// The entry is not a well-formed service object.
    #[error("malformed snapshot: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Failure reported by a [`crate::Transport`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// The HTTP client failed (connect, timeout, body read).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// The server answered with a non-success status.
    #[error("{url} answered {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Request URL.
        url: String,
    },
    /// The response body was not the expected JSON shape.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    /// The transport cannot serve the request right now.
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Failure reported by a [`crate::HealthAggregator`].
#[derive(Debug, Error)]
pub enum HealthError {
    /// The upstream health source failed.
    #[error("health source failed: {0}")]
    Source(String),
}

/// Error surfaced by [`crate::SyncEngine`] operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The transport call failed; nothing was applied.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The operation names a service the store does not hold.
    #[error("unknown service: {0}")]
    UnknownService(String),
}
