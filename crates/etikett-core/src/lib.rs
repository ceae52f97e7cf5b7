// SPDX-License-Identifier: Apache-2.0
//
// Etikett — core types and error definitions shared across all crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::DaemonConfig;
pub use error::EtikettError;
pub use types::*;
