// SPDX-License-Identifier: Apache-2.0
//
// Printer registry: the in-memory catalog of configured printers.
//
// The registry owns each `Printer` record for its lifetime; everything
// else refers to printers by id or name and works on cloned snapshots.
// Registration and deregistration fan out to the discovery collaborator,
// whose failures are logged and never surface to the caller.

use std::sync::{Arc, RwLock};

use chrono::Utc;
use tracing::{debug, info};

use etikett_core::config::PrinterConfig;
use etikett_core::error::{EtikettError, Result};
use etikett_core::types::{LabelMedia, Printer, PrinterId, PrinterState, StateReason};
use etikett_driver::Driver;

use crate::advertise::Advertiser;

/// Subset of printer description attributes an administrator may change
/// (Set-Printer-Attributes).  `None` fields are left untouched.
#[derive(Debug, Default, Clone)]
pub struct DescriptionUpdate {
    pub location: Option<String>,
    pub info: Option<String>,
    pub geo_location: Option<String>,
    pub organization: Option<String>,
    pub default_media: Option<LabelMedia>,
}

impl DescriptionUpdate {
    pub fn is_empty(&self) -> bool {
        self.location.is_none()
            && self.info.is_none()
            && self.geo_location.is_none()
            && self.organization.is_none()
            && self.default_media.is_none()
    }
}

/// Catalog of configured printers, in insertion order.
pub struct PrinterRegistry {
    printers: RwLock<Vec<Printer>>,
    advertiser: Arc<dyn Advertiser>,
}

impl PrinterRegistry {
    pub fn new(advertiser: Arc<dyn Advertiser>) -> Self {
        Self {
            printers: RwLock::new(Vec::new()),
            advertiser,
        }
    }

    /// Register a printer from its configuration.
    ///
    /// Capabilities come from the configured driver family.  Fails with
    /// `Conflict` when a printer of the same name already exists.
    pub fn register(&self, config: &PrinterConfig, uri: String) -> Result<Printer> {
        let capabilities = Driver::capabilities(config.driver);
        let printer = Printer {
            id: PrinterId::new(),
            name: config.name.clone(),
            uri,
            driver: config.driver,
            address: config.address.clone(),
            state: PrinterState::Idle,
            reasons: Vec::new(),
            default_media: config.default_media,
            capabilities,
            location: config.location.clone(),
            info: config.info.clone(),
            geo_location: None,
            organization: None,
            created_at: Utc::now(),
        };

        {
            let mut printers = self.write()?;
            if printers.iter().any(|p| p.name == printer.name) {
                return Err(EtikettError::Conflict(format!(
                    "printer {} already registered",
                    printer.name
                )));
            }
            printers.push(printer.clone());
        }

        info!(printer = %printer.name, driver = printer.driver.as_keyword(),
              address = %printer.address, "printer registered");
        self.advertiser.advertise(&printer);
        Ok(printer)
    }

    /// Remove a printer from the catalog.
    ///
    /// `active_jobs` is the caller's count of Pending + Processing jobs;
    /// a busy printer cannot be deregistered.
    pub fn deregister(&self, name: &str, active_jobs: u32) -> Result<Printer> {
        if active_jobs > 0 {
            return Err(EtikettError::Conflict(format!(
                "printer {name} has {active_jobs} active jobs"
            )));
        }

        let printer = {
            let mut printers = self.write()?;
            let index = printers
                .iter()
                .position(|p| p.name == name)
                .ok_or_else(|| EtikettError::NotFound(format!("printer {name}")))?;
            printers.remove(index)
        };

        info!(printer = %printer.name, "printer deregistered");
        self.advertiser.withdraw(&printer);
        Ok(printer)
    }

    /// Snapshot of one printer by name.
    pub fn get(&self, name: &str) -> Result<Option<Printer>> {
        Ok(self.read()?.iter().find(|p| p.name == name).cloned())
    }

    /// Snapshot of one printer by id.
    pub fn get_by_id(&self, id: PrinterId) -> Result<Option<Printer>> {
        Ok(self.read()?.iter().find(|p| p.id == id).cloned())
    }

    /// Snapshot of all printers, in registration order.
    pub fn list(&self) -> Result<Vec<Printer>> {
        Ok(self.read()?.clone())
    }

    /// Update a printer's state and reason keywords (job processor).
    pub fn set_state(
        &self,
        id: PrinterId,
        state: PrinterState,
        reasons: Vec<StateReason>,
    ) -> Result<()> {
        let mut printers = self.write()?;
        let printer = printers
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| EtikettError::NotFound(format!("printer id {id}")))?;
        debug!(printer = %printer.name, ?state, ?reasons, "printer state changed");
        printer.state = state;
        printer.reasons = reasons;
        Ok(())
    }

    /// Apply an administrative description update (Set-Printer-Attributes).
    pub fn update_description(&self, name: &str, update: DescriptionUpdate) -> Result<Printer> {
        let mut printers = self.write()?;
        let printer = printers
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| EtikettError::NotFound(format!("printer {name}")))?;

        if let Some(location) = update.location {
            printer.location = Some(location);
        }
        if let Some(info) = update.info {
            printer.info = Some(info);
        }
        if let Some(geo) = update.geo_location {
            printer.geo_location = Some(geo);
        }
        if let Some(org) = update.organization {
            printer.organization = Some(org);
        }
        if let Some(media) = update.default_media {
            printer.default_media = media;
        }

        info!(printer = %printer.name, "printer description updated");
        Ok(printer.clone())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<Printer>>> {
        self.printers
            .read()
            .map_err(|_| EtikettError::Server("printer registry lock poisoned".into()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Vec<Printer>>> {
        self.printers
            .write()
            .map_err(|_| EtikettError::Server("printer registry lock poisoned".into()))
    }
}
