// SPDX-License-Identifier: Apache-2.0
//
// DNS-SD advertisement of registered printers.
//
// The registry talks to discovery through the [`Advertiser`] trait and
// treats it as fire-and-forget: advertisement failures are logged, never
// propagated — a printer that cannot be announced still works via direct
// IP.  Production uses mDNS-SD (`_ipp._tcp.local.`); tests and daemons on
// discovery-less networks use [`NullAdvertiser`].

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{info, warn};

use etikett_core::types::{Printer, PrinterId};

/// mDNS service type for plain IPP.
const IPP_SERVICE_TYPE: &str = "_ipp._tcp.local.";

/// Discovery collaborator: announce and withdraw printers on the LAN.
pub trait Advertiser: Send + Sync {
    /// Announce a printer.  Must not fail the caller.
    fn advertise(&self, printer: &Printer);

    /// Withdraw a previously announced printer.  Must not fail the caller.
    fn withdraw(&self, printer: &Printer);
}

/// No-op advertiser for tests and closed networks.
pub struct NullAdvertiser;

impl Advertiser for NullAdvertiser {
    fn advertise(&self, _printer: &Printer) {}
    fn withdraw(&self, _printer: &Printer) {}
}

/// DNS-SD advertiser backed by an mDNS daemon.
pub struct DnssdAdvertiser {
    daemon: mdns_sd::ServiceDaemon,
    /// Hostname announced in SRV records, without the `.local.` suffix.
    hostname: String,
    /// IPP server port carried in the SRV record.
    port: u16,
    /// Registered service fullnames, for unregistration.
    fullnames: Mutex<HashMap<PrinterId, String>>,
}

impl DnssdAdvertiser {
    /// Create the mDNS daemon.  Returns `None` (with a warning) when the
    /// daemon cannot start; callers fall back to [`NullAdvertiser`].
    pub fn new(hostname: String, port: u16) -> Option<Self> {
        match mdns_sd::ServiceDaemon::new() {
            Ok(daemon) => Some(Self {
                daemon,
                hostname,
                port,
                fullnames: Mutex::new(HashMap::new()),
            }),
            Err(e) => {
                warn!(error = %e, "mDNS daemon unavailable; printers will not be advertised");
                None
            }
        }
    }
}

impl Advertiser for DnssdAdvertiser {
    fn advertise(&self, printer: &Printer) {
        let rp = format!("ipp/print/{}", printer.name);
        let properties = [
            ("txtvers", "1"),
            ("qtotal", "1"),
            ("rp", rp.as_str()),
            ("ty", printer.capabilities.make_and_model.as_str()),
            ("pdl", "image/png,image/jpeg,application/octet-stream"),
            ("Color", "F"),
            ("Duplex", "F"),
        ];

        let service_info = match mdns_sd::ServiceInfo::new(
            IPP_SERVICE_TYPE,
            &printer.name,
            &format!("{}.local.", self.hostname),
            "", // empty = auto-detect interface addresses
            self.port,
            &properties[..],
        ) {
            Ok(info) => info,
            Err(e) => {
                warn!(printer = %printer.name, error = %e, "failed to build mDNS service info");
                return;
            }
        };

        let fullname = service_info.get_fullname().to_owned();
        match self.daemon.register(service_info) {
            Ok(()) => {
                info!(printer = %printer.name, port = self.port, "printer advertised via DNS-SD");
                if let Ok(mut map) = self.fullnames.lock() {
                    map.insert(printer.id, fullname);
                }
            }
            Err(e) => {
                warn!(printer = %printer.name, error = %e, "failed to register mDNS service");
            }
        }
    }

    fn withdraw(&self, printer: &Printer) {
        let fullname = match self.fullnames.lock() {
            Ok(mut map) => map.remove(&printer.id),
            Err(_) => None,
        };
        let Some(fullname) = fullname else {
            return;
        };
        match self.daemon.unregister(&fullname) {
            Ok(_) => info!(printer = %printer.name, "printer withdrawn from DNS-SD"),
            Err(e) => {
                warn!(printer = %printer.name, error = %e, "failed to unregister mDNS service");
            }
        }
    }
}

impl Drop for DnssdAdvertiser {
    fn drop(&mut self) {
        if let Err(e) = self.daemon.shutdown() {
            warn!(error = %e, "failed to shut down mDNS daemon");
        }
    }
}
