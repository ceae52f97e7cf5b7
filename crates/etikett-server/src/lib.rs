// SPDX-License-Identifier: Apache-2.0
//
// Etikett Server — the network-facing half of the daemon.
//
// Hosts the printer registry, the per-printer job processors, and the IPP
// dispatcher that binds them together.  IPP arrives as HTTP POST over raw
// TCP (RFC 8010 framing); each connection is handled on its own task and
// never touches printer hardware — hardware I/O belongs exclusively to
// the processors.

pub mod advertise;
pub mod auth;
pub mod ipp;
pub mod processor;
pub mod registry;
pub mod server;

pub use advertise::{Advertiser, DnssdAdvertiser, NullAdvertiser};
pub use auth::{AdminOperation, Authorizer, OpenPolicy, StaticAdmins};
pub use processor::{JobProcessor, ProcessorHandle};
pub use registry::PrinterRegistry;
pub use server::{IppServer, ServerState};
