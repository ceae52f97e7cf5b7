// SPDX-License-Identifier: Apache-2.0
//
// Durable job storage for the Etikett print server.
//
// Jobs are persisted in a local SQLite database so the queue survives
// daemon restarts.  All access is synchronous (`rusqlite` has no async
// API); callers in async context wrap the store in a mutex and keep
// individual calls short.

pub mod store;

pub use store::{JobOutcome, JobStore};
