// SPDX-License-Identifier: Apache-2.0
//
// Unified error types for Etikett.
//
// The variants follow the daemon's failure taxonomy: protocol and
// authorization errors stay local to one request, driver and transport
// errors are terminal for one job (the printer stops, subsequent jobs
// queue), and store corruption drops the affected record.  Nothing here
// is fatal to the process.

use thiserror::Error;

/// Top-level error type for all Etikett operations.
#[derive(Debug, Error)]
pub enum EtikettError {
    // -- Request-scoped errors --
    #[error("malformed IPP request: {0}")]
    Protocol(String),

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    // -- Job-scoped errors --
    #[error("driver error: {0}")]
    Driver(String),

    #[error("transport error: {0}")]
    Transport(String),

    // -- Store / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("store corruption: {0}")]
    StoreCorruption(String),

    // -- Ambient --
    #[error("configuration error: {0}")]
    Config(String),

    #[error("discovery error: {0}")]
    Discovery(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, EtikettError>;
