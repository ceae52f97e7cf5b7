// SPDX-License-Identifier: Apache-2.0
//
// Service assembly: wires the job store, printer registry, DNS-SD
// advertiser, per-printer job processors, and the IPP server into one
// running daemon, and tears them down in the reverse order.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use etikett_core::config::DaemonConfig;
use etikett_core::error::Result;
use etikett_core::types::PrinterId;
use etikett_server::{
    Advertiser, Authorizer, DnssdAdvertiser, IppServer, JobProcessor, NullAdvertiser, OpenPolicy,
    PrinterRegistry, ProcessorHandle, ServerState, StaticAdmins,
};
use etikett_store::JobStore;

/// Open policy on a trusted network; a static admin list otherwise.
fn auth_for(admins: &[String]) -> Arc<dyn Authorizer> {
    if admins.is_empty() {
        Arc::new(OpenPolicy)
    } else {
        Arc::new(StaticAdmins::new(admins.iter().cloned()))
    }
}

/// A fully started daemon.  Dropping it without [`shutdown`]
/// (PrintService::shutdown) leaves the spawned tasks running until the
/// runtime itself exits.
pub struct PrintService {
    state: Arc<ServerState>,
    server: IppServer,
    processors: Vec<(PrinterId, ProcessorHandle)>,
    purge_stop: Arc<Notify>,
    purge_task: JoinHandle<()>,
}

impl PrintService {
    /// Bring everything up: store, registry, processors, purge loop,
    /// and finally the listening IPP server.
    pub async fn start(config: DaemonConfig) -> Result<Self> {
        let store = match &config.store_path {
            Some(path) => {
                info!(path = %path.display(), "opening job store");
                JobStore::open(path)?
            }
            None => {
                info!("no store path configured, jobs are in-memory only");
                JobStore::open_in_memory()?
            }
        };

        // Jobs stuck in Processing from a previous run can never finish.
        let recovered = store.recover_interrupted()?;
        if recovered > 0 {
            warn!(count = recovered, "aborted jobs interrupted by a previous shutdown");
        }
        let store = Arc::new(Mutex::new(store));

        let hostname = config
            .hostname
            .clone()
            .unwrap_or_else(|| "localhost".to_string());

        let advertiser: Arc<dyn Advertiser> =
            match DnssdAdvertiser::new(hostname.clone(), config.server_port) {
                Some(dnssd) => Arc::new(dnssd),
                None => {
                    warn!("DNS-SD unavailable, printers will not be advertised");
                    Arc::new(NullAdvertiser)
                }
            };

        let registry = Arc::new(PrinterRegistry::new(advertiser));
        let state = ServerState::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            auth_for(&config.admins),
            hostname,
            config.server_port,
        );

        let mut processors = Vec::with_capacity(config.printers.len());
        for printer_config in &config.printers {
            let uri = state.printer_uri(&printer_config.name);
            let printer = registry.register(printer_config, uri)?;
            info!(
                printer = %printer.name,
                driver = printer.driver.as_keyword(),
                address = %printer.address,
                "printer registered"
            );

            let address = printer_config.address.clone();
            let processor = JobProcessor::new(
                &printer,
                Arc::clone(&store),
                Arc::clone(&registry),
                move || {
                    let address = address.clone();
                    async move { etikett_transport::open(&address).await }
                },
                config.poll_interval(),
                config.backpressure_timeout(),
            );
            let handle = processor.spawn();
            state.register_waker(printer.id, handle.waker());
            processors.push((printer.id, handle));
        }

        let purge_stop = Arc::new(Notify::new());
        let purge_task = tokio::spawn(purge_loop(
            Arc::clone(&store),
            config.retention(),
            Arc::clone(&purge_stop),
        ));

        let mut server = IppServer::new();
        server.start(config.server_port, Arc::clone(&state)).await?;

        Ok(Self {
            state,
            server,
            processors,
            purge_stop,
            purge_task,
        })
    }

    /// Address the IPP server is bound to.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.server.local_addr()
    }

    /// Stop accepting work, let in-flight jobs wind down, and join all
    /// tasks.
    pub async fn shutdown(mut self) -> Result<()> {
        self.server.stop().await?;

        self.purge_stop.notify_one();
        if let Err(e) = self.purge_task.await {
            error!(error = %e, "purge task join failed");
        }

        for (id, handle) in self.processors {
            self.state.remove_waker(id);
            handle.shutdown().await;
        }

        info!("print service stopped");
        Ok(())
    }
}

/// Periodically drop terminal jobs older than the retention window.
async fn purge_loop(store: Arc<Mutex<JobStore>>, retention: Duration, stop: Arc<Notify>) {
    // Sweep at the retention interval, but no more than once a minute
    // and at least every hour.
    let sweep = retention.clamp(Duration::from_secs(60), Duration::from_secs(3_600));
    loop {
        tokio::select! {
            _ = stop.notified() => break,
            _ = tokio::time::sleep(sweep) => {}
        }

        let purged = match store.lock() {
            Ok(guard) => guard.purge_terminal(retention),
            Err(_) => {
                error!("job store lock poisoned, purge loop exiting");
                break;
            }
        };
        match purged {
            Ok(0) => {}
            Ok(count) => info!(count, "purged terminal jobs"),
            Err(e) => warn!(error = %e, "purge failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use etikett_core::types::{DocumentFormat, JobAttributes, JobState, PrinterId};

    #[tokio::test]
    async fn starts_and_stops_with_default_config() {
        let config = DaemonConfig {
            server_port: 0,
            ..Default::default()
        };
        let service = PrintService::start(config).await.expect("start service");
        assert!(service.local_addr().is_some());
        service.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn interrupted_jobs_are_aborted_on_restart() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store_path = dir.path().join("jobs.db");
        let config = DaemonConfig {
            server_port: 0,
            store_path: Some(store_path.clone()),
            ..Default::default()
        };

        let printer = PrinterId::new();
        {
            let service = PrintService::start(config.clone()).await.expect("start");
            {
                let mut store = service.state.store.lock().expect("lock");
                store
                    .enqueue(
                        printer,
                        "alice",
                        "stuck job",
                        DocumentFormat::Raw,
                        b"^XA^XZ",
                        JobAttributes::default(),
                    )
                    .expect("enqueue");
                // Leave the job mid-delivery, as a crash would.
                store.dequeue(printer).expect("dequeue").expect("job");
            }
            service.shutdown().await.expect("shutdown");
        }

        let service = PrintService::start(config).await.expect("restart");
        let job = {
            let store = service.state.store.lock().expect("lock");
            store.get_job(printer, 1).expect("get").expect("job")
        };
        assert_eq!(job.state, JobState::Aborted);
        service.shutdown().await.expect("shutdown");
    }
}
