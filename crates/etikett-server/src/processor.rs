// SPDX-License-Identifier: Apache-2.0
//
// Per-printer job processor.
//
// Exactly one long-lived task runs per registered printer.  It owns all
// hardware I/O for that printer: dequeue the oldest pending job, render
// it through the printer's driver, deliver the command stream over a
// fresh transport session, record the outcome.  Connection tasks never
// touch hardware; they enqueue and wake this task.
//
// Within one job the processor moves Rendering -> Delivering; on a
// hardware failure the job is aborted, the printer goes Stopped with a
// matching reason keyword, and later polls that report Ready clear it
// back to Idle.  Cancellation is cooperative and observed only at page
// boundaries, never mid-page.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use etikett_core::error::{EtikettError, Result};
use etikett_core::types::{
    DeviceStatus, DocumentFormat, JobAttributes, JobRecord, PrinterId, PrinterState, StateReason,
};
use etikett_driver::raster::{RasterOptions, RasterPage, decode_pages};
use etikett_driver::{CommandChunk, Driver, LabelDriver, MAX_CHUNK_BYTES};
use etikett_store::{JobOutcome, JobStore};
use etikett_transport::Transport;

use crate::registry::PrinterRegistry;

/// Run a closure against the locked job store.
///
/// The lock is never held across an await point; every store call is a
/// short synchronous critical section.
pub(crate) fn with_store<R>(
    store: &Arc<Mutex<JobStore>>,
    f: impl FnOnce(&mut JobStore) -> Result<R>,
) -> Result<R> {
    let mut guard = store
        .lock()
        .map_err(|_| EtikettError::Server("job store lock poisoned".into()))?;
    f(&mut guard)
}

/// How a delivery attempt ended without failing.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// All pages reached the device.
    Completed,
    /// A cancel request was honored at a page boundary.
    Canceled,
}

/// A failed delivery attempt.
#[derive(Debug)]
pub(crate) struct Failure {
    pub message: String,
    /// Hardware reason to surface on the printer.  `None` means the
    /// document itself was at fault; the job aborts but the printer
    /// stays available.
    pub reason: Option<StateReason>,
}

impl Failure {
    fn document(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            reason: None,
        }
    }

    fn hardware(message: impl Into<String>, reason: StateReason) -> Self {
        Self {
            message: message.into(),
            reason: Some(reason),
        }
    }
}

/// Handle to a spawned processor task.
pub struct ProcessorHandle {
    wake: Arc<Notify>,
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl ProcessorHandle {
    /// Signal that new work may be available.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Clone of the wake signal, for sharing with the dispatcher.
    pub fn waker(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// Stop the task after its current job finishes.
    pub async fn shutdown(self) {
        self.stop.store(true, Ordering::Relaxed);
        self.wake.notify_waiters();
        self.wake.notify_one();
        if let Err(e) = self.task.await {
            warn!(error = %e, "processor task join failed");
        }
    }
}

/// The per-printer worker.  Generic over the transport factory so tests
/// can substitute scripted sessions for real hardware.
pub struct JobProcessor<F> {
    printer_id: PrinterId,
    printer_name: String,
    driver: etikett_core::types::DriverKind,
    store: Arc<Mutex<JobStore>>,
    registry: Arc<PrinterRegistry>,
    /// Opens a fresh session; called once per job.
    connect: F,
    poll_interval: Duration,
    backpressure_timeout: Duration,
    wake: Arc<Notify>,
    stop: Arc<AtomicBool>,
}

impl<F, Fut, T> JobProcessor<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Transport + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        printer: &etikett_core::types::Printer,
        store: Arc<Mutex<JobStore>>,
        registry: Arc<PrinterRegistry>,
        connect: F,
        poll_interval: Duration,
        backpressure_timeout: Duration,
    ) -> Self {
        Self {
            printer_id: printer.id,
            printer_name: printer.name.clone(),
            driver: printer.driver,
            store,
            registry,
            connect,
            poll_interval,
            backpressure_timeout,
            wake: Arc::new(Notify::new()),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the worker onto the runtime.
    pub fn spawn(self) -> ProcessorHandle {
        let wake = Arc::clone(&self.wake);
        let stop = Arc::clone(&self.stop);
        let task = tokio::spawn(self.run());
        ProcessorHandle { wake, stop, task }
    }

    /// The worker loop: dequeue, process, park when the queue is empty.
    async fn run(self) {
        info!(printer = %self.printer_name, "job processor started");

        loop {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }

            // A Stopped printer holds its queue: jobs stay Pending until
            // the device reports Ready again.
            if self.is_stopped() {
                tokio::select! {
                    _ = self.wake.notified() => {}
                    _ = tokio::time::sleep(self.poll_interval) => {
                        self.clear_stopped_if_ready().await;
                    }
                }
                continue;
            }

            match with_store(&self.store, |s| s.dequeue(self.printer_id)) {
                Ok(Some(job)) => self.process_job(job).await,
                Ok(None) => {
                    // Park until a new job arrives.
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Err(EtikettError::StoreCorruption(msg)) => {
                    // Broken one-processing invariant: drop the affected
                    // records and start this printer over.
                    error!(printer = %self.printer_name, %msg, "store invariant violated");
                    if let Err(e) = with_store(&self.store, |s| s.recover_printer(self.printer_id))
                    {
                        error!(printer = %self.printer_name, error = %e, "store recovery failed");
                    }
                }
                Err(e) => {
                    error!(printer = %self.printer_name, error = %e, "dequeue failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        info!(printer = %self.printer_name, "job processor stopped");
    }

    /// Process one dequeued job end to end.
    async fn process_job(&self, job: JobRecord) {
        info!(printer = %self.printer_name, job_id = job.id, "job processing started");
        self.set_state(PrinterState::Processing, Vec::new());

        match self.deliver(&job).await {
            Ok(Delivery::Completed) => {
                self.finish_job(&job, JobOutcome::Completed);
                self.set_state(PrinterState::Idle, Vec::new());
                info!(printer = %self.printer_name, job_id = job.id, "job completed");
            }
            Ok(Delivery::Canceled) => {
                self.finish_job(&job, JobOutcome::Canceled);
                self.set_state(PrinterState::Idle, Vec::new());
                info!(printer = %self.printer_name, job_id = job.id, "job canceled");
            }
            Err(failure) => {
                warn!(
                    printer = %self.printer_name,
                    job_id = job.id,
                    reason = ?failure.reason,
                    "job failed: {}", failure.message
                );
                self.finish_job(&job, JobOutcome::Aborted(failure.message));
                match failure.reason {
                    Some(reason) => self.set_state(PrinterState::Stopped, vec![reason]),
                    None => self.set_state(PrinterState::Idle, Vec::new()),
                }
            }
        }
    }

    /// Open a session and stream the job's command bytes through it.
    async fn deliver(&self, job: &JobRecord) -> std::result::Result<Delivery, Failure> {
        let document = with_store(&self.store, |s| s.document(job.printer, job.id))
            .map_err(|e| Failure::document(format!("load document: {e}")))?;

        let mut session = (self.connect)()
            .await
            .map_err(|e| Failure::hardware(format!("open session: {e}"), StateReason::Offline))?;

        let cancel = || {
            with_store(&self.store, |s| s.cancel_requested(job.printer, job.id)).unwrap_or(false)
        };

        let outcome = match job.format {
            DocumentFormat::Raw => {
                deliver_raw(
                    &mut session,
                    &document,
                    cancel,
                    self.poll_interval,
                    self.backpressure_timeout,
                )
                .await
            }
            DocumentFormat::Png | DocumentFormat::Jpeg => {
                let mut driver = Driver::for_kind(self.driver);
                let caps = driver.identify();
                debug!(printer = %self.printer_name, job_id = job.id, "rendering document");
                let pages = decode_pages(
                    &document,
                    job.format,
                    &RasterOptions {
                        max_width_dots: caps.max_width_dots,
                        orientation: job.attributes.orientation,
                    },
                )
                .map_err(|e| Failure::document(format!("decode document: {e}")))?;

                deliver_pages(
                    &mut session,
                    &mut driver,
                    &job.attributes,
                    &pages,
                    cancel,
                    self.poll_interval,
                    self.backpressure_timeout,
                )
                .await
            }
        };

        if let Err(e) = session.close().await {
            debug!(printer = %self.printer_name, error = %e, "session close failed");
        }
        outcome
    }

    fn finish_job(&self, job: &JobRecord, outcome: JobOutcome) {
        if let Err(e) = with_store(&self.store, |s| s.complete(job.printer, job.id, outcome)) {
            error!(printer = %self.printer_name, job_id = job.id, error = %e,
                   "failed to record job outcome");
        }
    }

    fn set_state(&self, state: PrinterState, reasons: Vec<StateReason>) {
        if let Err(e) = self.registry.set_state(self.printer_id, state, reasons) {
            warn!(printer = %self.printer_name, error = %e, "failed to update printer state");
        }
    }

    fn is_stopped(&self) -> bool {
        matches!(
            self.registry.get_by_id(self.printer_id),
            Ok(Some(p)) if p.state == PrinterState::Stopped
        )
    }

    /// While parked: if the printer is Stopped, poll the device and clear
    /// back to Idle once it reports Ready again.
    async fn clear_stopped_if_ready(&self) {
        if !self.is_stopped() {
            return;
        }

        if let Ok(mut session) = (self.connect)().await {
            if let Ok(DeviceStatus::Ready) = session.poll().await {
                info!(printer = %self.printer_name, "device ready again, clearing stopped state");
                self.set_state(PrinterState::Idle, Vec::new());
            }
            let _ = session.close().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Delivery primitives
// ---------------------------------------------------------------------------

/// Render `pages` through `driver` and stream the chunks to `session`.
///
/// The cancel closure is consulted exactly once per page, at its
/// `PageEnd` marker; a cancel mid-stream still delivers the job trailer
/// so the printer is left in a sane state.
pub(crate) async fn deliver_pages<T, D, C>(
    session: &mut T,
    driver: &mut D,
    attrs: &JobAttributes,
    pages: &[RasterPage],
    cancel: C,
    poll_interval: Duration,
    backpressure_timeout: Duration,
) -> std::result::Result<Delivery, Failure>
where
    T: Transport,
    D: LabelDriver,
    C: Fn() -> bool,
{
    let lead = driver
        .start_job(attrs)
        .map_err(|e| Failure::document(format!("start job: {e}")))?;
    send(session, &lead, poll_interval, backpressure_timeout).await?;

    let mut canceled = false;
    for page in pages {
        let chunks = driver
            .render_page(page)
            .map_err(|e| Failure::document(format!("render page: {e}")))?;

        for chunk in chunks {
            match chunk {
                CommandChunk::Data(bytes) => {
                    send(session, &bytes, poll_interval, backpressure_timeout).await?;
                }
                CommandChunk::PageStart(n) => debug!(page = n, "page delivery started"),
                CommandChunk::PageEnd(n) => {
                    debug!(page = n, "page delivery finished");
                    if cancel() {
                        canceled = true;
                    }
                }
            }
        }

        if canceled {
            break;
        }
    }

    let trailer = driver
        .end_job()
        .map_err(|e| Failure::document(format!("end job: {e}")))?;
    send(session, &trailer, poll_interval, backpressure_timeout).await?;

    Ok(if canceled {
        Delivery::Canceled
    } else {
        Delivery::Completed
    })
}

/// Stream a printer-native document unchanged.  The whole document is one
/// page as far as cancellation is concerned.
pub(crate) async fn deliver_raw<T, C>(
    session: &mut T,
    document: &[u8],
    cancel: C,
    poll_interval: Duration,
    backpressure_timeout: Duration,
) -> std::result::Result<Delivery, Failure>
where
    T: Transport,
    C: Fn() -> bool,
{
    if cancel() {
        return Ok(Delivery::Canceled);
    }
    for piece in document.chunks(MAX_CHUNK_BYTES) {
        send(session, piece, poll_interval, backpressure_timeout).await?;
    }
    Ok(Delivery::Completed)
}

/// Write one chunk, honoring device backpressure.
///
/// Polls before the write: Busy/OutOfMedia/CoverOpen suspend delivery and
/// re-poll on `poll_interval` until the device is ready or
/// `backpressure_timeout` elapses; Offline fails immediately.
async fn send<T: Transport>(
    session: &mut T,
    bytes: &[u8],
    poll_interval: Duration,
    backpressure_timeout: Duration,
) -> std::result::Result<(), Failure> {
    if bytes.is_empty() {
        return Ok(());
    }

    let mut waited = Duration::ZERO;
    loop {
        let status = session
            .poll()
            .await
            .map_err(|e| Failure::hardware(format!("status poll: {e}"), StateReason::Offline))?;

        match status {
            DeviceStatus::Ready => break,
            DeviceStatus::Offline => {
                return Err(Failure::hardware(
                    "device went offline".to_string(),
                    StateReason::Offline,
                ));
            }
            blocking => {
                if waited >= backpressure_timeout {
                    let reason = StateReason::from_status(blocking).unwrap_or(StateReason::Other);
                    return Err(Failure::hardware(
                        format!("device blocked ({blocking:?}) past the backpressure timeout"),
                        reason,
                    ));
                }
                debug!(?blocking, "device not ready, waiting");
                tokio::time::sleep(poll_interval).await;
                waited += poll_interval;
            }
        }
    }

    session
        .write(bytes)
        .await
        .map_err(|e| Failure::hardware(format!("write: {e}"), StateReason::Offline))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;

    use etikett_core::config::PrinterConfig;
    use etikett_core::types::{DeviceAddress, DriverKind, JobState, LabelMedia, Printer};
    use etikett_driver::ZplDriver;
    use etikett_store::JobStore;

    use crate::advertise::NullAdvertiser;

    /// Transport whose poll answers follow a script; writes are recorded.
    struct ScriptedTransport {
        script: VecDeque<DeviceStatus>,
        /// Status reported once the script is exhausted.
        resting: DeviceStatus,
        writes: Arc<StdMutex<Vec<Vec<u8>>>>,
    }

    impl ScriptedTransport {
        fn ready(writes: Arc<StdMutex<Vec<Vec<u8>>>>) -> Self {
            Self {
                script: VecDeque::new(),
                resting: DeviceStatus::Ready,
                writes,
            }
        }

        fn with_script(
            script: Vec<DeviceStatus>,
            resting: DeviceStatus,
            writes: Arc<StdMutex<Vec<Vec<u8>>>>,
        ) -> Self {
            Self {
                script: script.into(),
                resting,
                writes,
            }
        }
    }

    impl Transport for ScriptedTransport {
        async fn write(&mut self, bytes: &[u8]) -> Result<usize> {
            self.writes.lock().expect("writes lock").push(bytes.to_vec());
            Ok(bytes.len())
        }

        async fn poll(&mut self) -> Result<DeviceStatus> {
            Ok(self.script.pop_front().unwrap_or(self.resting))
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn one_page() -> RasterPage {
        let width = 16u32;
        let height = 4u32;
        let bytes_per_row = width.div_ceil(8) as usize;
        RasterPage {
            width,
            height,
            bytes_per_row,
            data: vec![0xAA; bytes_per_row * height as usize],
        }
    }

    fn fast() -> (Duration, Duration) {
        (Duration::from_millis(5), Duration::from_millis(40))
    }

    fn written_bytes(writes: &Arc<StdMutex<Vec<Vec<u8>>>>) -> Vec<u8> {
        writes
            .lock()
            .expect("writes lock")
            .iter()
            .flat_map(|w| w.iter().copied())
            .collect()
    }

    // -- deliver_pages ------------------------------------------------------

    #[tokio::test]
    async fn driver_output_matches_transport_writes_byte_for_byte() {
        let writes = Arc::new(StdMutex::new(Vec::new()));
        let mut session = ScriptedTransport::ready(writes.clone());
        let mut driver = ZplDriver::new();
        let attrs = JobAttributes::default();
        let page = one_page();
        let (poll, timeout) = fast();

        let outcome = deliver_pages(
            &mut session,
            &mut driver,
            &attrs,
            std::slice::from_ref(&page),
            || false,
            poll,
            timeout,
        )
        .await
        .expect("deliver");
        assert_eq!(outcome, Delivery::Completed);

        // Render the identical stream with a fresh driver and compare.
        let mut reference = ZplDriver::new();
        let mut expected = reference.start_job(&attrs).expect("start");
        for chunk in reference.render_page(&page).expect("render") {
            if let CommandChunk::Data(bytes) = chunk {
                expected.extend_from_slice(&bytes);
            }
        }
        expected.extend_from_slice(&reference.end_job().expect("end"));

        assert_eq!(written_bytes(&writes), expected);
    }

    #[tokio::test]
    async fn backpressure_within_timeout_recovers() {
        let writes = Arc::new(StdMutex::new(Vec::new()));
        let mut session = ScriptedTransport::with_script(
            vec![DeviceStatus::OutOfMedia, DeviceStatus::Busy],
            DeviceStatus::Ready,
            writes.clone(),
        );
        let mut driver = ZplDriver::new();
        let (poll, timeout) = fast();

        let outcome = deliver_pages(
            &mut session,
            &mut driver,
            &JobAttributes::default(),
            &[one_page()],
            || false,
            poll,
            timeout,
        )
        .await
        .expect("deliver");

        assert_eq!(outcome, Delivery::Completed);
        assert!(!written_bytes(&writes).is_empty());
    }

    #[tokio::test]
    async fn persistent_out_of_media_aborts_with_media_empty() {
        let writes = Arc::new(StdMutex::new(Vec::new()));
        let mut session =
            ScriptedTransport::with_script(Vec::new(), DeviceStatus::OutOfMedia, writes);
        let mut driver = ZplDriver::new();
        let (poll, timeout) = fast();

        let failure = deliver_pages(
            &mut session,
            &mut driver,
            &JobAttributes::default(),
            &[one_page()],
            || false,
            poll,
            timeout,
        )
        .await
        .expect_err("must time out");

        assert_eq!(failure.reason, Some(StateReason::MediaEmpty));
    }

    #[tokio::test]
    async fn offline_fails_immediately() {
        let writes = Arc::new(StdMutex::new(Vec::new()));
        let mut session = ScriptedTransport::with_script(Vec::new(), DeviceStatus::Offline, writes);
        let mut driver = ZplDriver::new();
        let (poll, timeout) = fast();

        let start = std::time::Instant::now();
        let failure = deliver_pages(
            &mut session,
            &mut driver,
            &JobAttributes::default(),
            &[one_page()],
            || false,
            poll,
            timeout,
        )
        .await
        .expect_err("offline");

        assert_eq!(failure.reason, Some(StateReason::Offline));
        assert!(start.elapsed() < timeout);
    }

    #[tokio::test]
    async fn cancel_takes_effect_at_page_boundary() {
        let writes = Arc::new(StdMutex::new(Vec::new()));
        let mut session = ScriptedTransport::ready(writes.clone());
        let mut driver = ZplDriver::new();
        let (poll, timeout) = fast();

        // Request cancel from the first page boundary onwards.
        let checks = AtomicUsize::new(0);
        let cancel = || {
            checks.fetch_add(1, Ordering::Relaxed);
            true
        };

        let outcome = deliver_pages(
            &mut session,
            &mut driver,
            &JobAttributes::default(),
            &[one_page(), one_page(), one_page()],
            cancel,
            poll,
            timeout,
        )
        .await
        .expect("deliver");

        assert_eq!(outcome, Delivery::Canceled);
        // The first page is fully delivered, later pages never start.
        let all = written_bytes(&writes);
        let text = String::from_utf8_lossy(&all);
        assert_eq!(text.matches("^XA").count(), 1);
        // Cancel was checked exactly once: at the first page's end.
        assert_eq!(checks.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn raw_documents_stream_unchanged() {
        let writes = Arc::new(StdMutex::new(Vec::new()));
        let mut session = ScriptedTransport::ready(writes.clone());
        let (poll, timeout) = fast();

        let document = vec![0x42u8; MAX_CHUNK_BYTES + 100];
        let outcome = deliver_raw(&mut session, &document, || false, poll, timeout)
            .await
            .expect("deliver");

        assert_eq!(outcome, Delivery::Completed);
        assert_eq!(written_bytes(&writes), document);
        assert_eq!(writes.lock().expect("lock").len(), 2);
    }

    // -- full processor loop ------------------------------------------------

    struct Rig {
        store: Arc<Mutex<JobStore>>,
        registry: Arc<PrinterRegistry>,
        printer: Printer,
        writes: Arc<StdMutex<Vec<Vec<u8>>>>,
    }

    fn rig() -> Rig {
        let store = Arc::new(Mutex::new(
            JobStore::open_in_memory().expect("open store"),
        ));
        let registry = Arc::new(PrinterRegistry::new(Arc::new(NullAdvertiser)));
        let config = PrinterConfig {
            name: "bench".into(),
            driver: DriverKind::Zpl,
            address: DeviceAddress::Network {
                host: "127.0.0.1".into(),
                port: 9100,
            },
            default_media: LabelMedia::Address,
            location: None,
            info: None,
        };
        let printer = registry
            .register(&config, "ipp://localhost:8631/ipp/print/bench".into())
            .expect("register");
        Rig {
            store,
            registry,
            printer,
            writes: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    fn spawn_processor(rig: &Rig) -> ProcessorHandle {
        let writes = rig.writes.clone();
        let (poll, timeout) = fast();
        JobProcessor::new(
            &rig.printer,
            rig.store.clone(),
            rig.registry.clone(),
            move || {
                let writes = writes.clone();
                async move { Ok(ScriptedTransport::ready(writes)) }
            },
            poll,
            timeout,
        )
        .spawn()
    }

    fn tiny_png() -> Vec<u8> {
        let img = image::GrayImage::from_fn(16, 16, |x, _| {
            image::Luma([if x % 2 == 0 { 0 } else { 255 }])
        });
        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::ImageLuma8(img)
            .write_to(&mut buf, image::ImageFormat::Png)
            .expect("encode png");
        buf.into_inner()
    }

    async fn wait_terminal(rig: &Rig, job_id: i32) -> JobState {
        for _ in 0..400 {
            let state = with_store(&rig.store, |s| {
                Ok(s.get_job(rig.printer.id, job_id)
                    .expect("get job")
                    .expect("job exists")
                    .state)
            })
            .expect("store");
            if state.is_terminal() {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {job_id} never reached a terminal state");
    }

    #[tokio::test]
    async fn single_page_job_runs_to_completed() {
        let rig = rig();
        let handle = spawn_processor(&rig);

        let job = with_store(&rig.store, |s| {
            s.enqueue(
                rig.printer.id,
                "alice",
                "one label",
                DocumentFormat::Png,
                &tiny_png(),
                JobAttributes::default(),
            )
        })
        .expect("enqueue");
        handle.wake();

        assert_eq!(wait_terminal(&rig, job.id).await, JobState::Completed);
        assert!(!written_bytes(&rig.writes).is_empty());

        let printer = rig
            .registry
            .get_by_id(rig.printer.id)
            .expect("get")
            .expect("printer");
        assert_eq!(printer.state, PrinterState::Idle);
        assert!(printer.reasons.is_empty());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn jobs_start_in_fifo_order() {
        let rig = rig();
        let png = tiny_png();

        let ids: Vec<i32> = (0..3)
            .map(|i| {
                with_store(&rig.store, |s| {
                    s.enqueue(
                        rig.printer.id,
                        "alice",
                        &format!("label {i}"),
                        DocumentFormat::Png,
                        &png,
                        JobAttributes::default(),
                    )
                })
                .expect("enqueue")
                .id
            })
            .collect();

        let handle = spawn_processor(&rig);
        handle.wake();

        for &id in &ids {
            assert_eq!(wait_terminal(&rig, id).await, JobState::Completed);
        }

        let jobs = with_store(&rig.store, |s| s.jobs_for_printer(rig.printer.id)).expect("list");
        let mut last_start = None;
        for job in &jobs {
            let started = job.started_at.expect("started");
            if let Some(prev) = last_start {
                assert!(started >= prev, "processing started out of order");
            }
            last_start = Some(started);
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn hardware_failure_stops_printer_until_device_recovers() {
        let rig = rig();
        let (poll, timeout) = fast();

        // First session reports OutOfMedia forever; sessions opened after
        // the failure report Ready so the printer can clear itself.
        let opened = Arc::new(AtomicUsize::new(0));
        let writes = rig.writes.clone();
        let opened_in_factory = opened.clone();
        let handle = JobProcessor::new(
            &rig.printer,
            rig.store.clone(),
            rig.registry.clone(),
            move || {
                let writes = writes.clone();
                let n = opened_in_factory.fetch_add(1, Ordering::Relaxed);
                async move {
                    Ok(if n == 0 {
                        ScriptedTransport::with_script(
                            Vec::new(),
                            DeviceStatus::OutOfMedia,
                            writes,
                        )
                    } else {
                        ScriptedTransport::ready(writes)
                    })
                }
            },
            poll,
            timeout,
        )
        .spawn();

        let job = with_store(&rig.store, |s| {
            s.enqueue(
                rig.printer.id,
                "alice",
                "doomed",
                DocumentFormat::Png,
                &tiny_png(),
                JobAttributes::default(),
            )
        })
        .expect("enqueue");
        handle.wake();

        assert_eq!(wait_terminal(&rig, job.id).await, JobState::Aborted);
        let printer = rig
            .registry
            .get_by_id(rig.printer.id)
            .expect("get")
            .expect("printer");
        assert_eq!(printer.state, PrinterState::Stopped);
        assert_eq!(printer.reasons, vec![StateReason::MediaEmpty]);

        // The parked processor polls the device and clears the state.
        for _ in 0..400 {
            let printer = rig
                .registry
                .get_by_id(rig.printer.id)
                .expect("get")
                .expect("printer");
            if printer.state == PrinterState::Idle {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let printer = rig
            .registry
            .get_by_id(rig.printer.id)
            .expect("get")
            .expect("printer");
        assert_eq!(printer.state, PrinterState::Idle);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn stopped_printer_holds_queued_jobs_until_device_recovers() {
        let rig = rig();
        let (poll, timeout) = fast();

        // Every session reports OutOfMedia; the device never recovers
        // during the test.
        let writes = rig.writes.clone();
        let handle = JobProcessor::new(
            &rig.printer,
            rig.store.clone(),
            rig.registry.clone(),
            move || {
                let writes = writes.clone();
                async move {
                    Ok(ScriptedTransport::with_script(
                        Vec::new(),
                        DeviceStatus::OutOfMedia,
                        writes,
                    ))
                }
            },
            poll,
            timeout,
        )
        .spawn();

        let png = tiny_png();
        let first = with_store(&rig.store, |s| {
            s.enqueue(
                rig.printer.id,
                "alice",
                "first",
                DocumentFormat::Png,
                &png,
                JobAttributes::default(),
            )
        })
        .expect("enqueue");
        let second = with_store(&rig.store, |s| {
            s.enqueue(
                rig.printer.id,
                "alice",
                "second",
                DocumentFormat::Png,
                &png,
                JobAttributes::default(),
            )
        })
        .expect("enqueue");
        handle.wake();

        // The first job exhausts the backpressure timeout and stops the
        // printer.
        assert_eq!(wait_terminal(&rig, first.id).await, JobState::Aborted);

        // Queued jobs must wait for the device, not burn one by one.
        tokio::time::sleep(timeout * 4).await;
        let record = with_store(&rig.store, |s| {
            Ok(s.get_job(rig.printer.id, second.id)
                .expect("get job")
                .expect("job exists"))
        })
        .expect("store");
        assert_eq!(record.state, JobState::Pending);

        let printer = rig
            .registry
            .get_by_id(rig.printer.id)
            .expect("get")
            .expect("printer");
        assert_eq!(printer.state, PrinterState::Stopped);
        assert_eq!(printer.reasons, vec![StateReason::MediaEmpty]);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn undecodable_document_aborts_job_but_not_printer() {
        let rig = rig();
        let handle = spawn_processor(&rig);

        let job = with_store(&rig.store, |s| {
            s.enqueue(
                rig.printer.id,
                "alice",
                "garbage",
                DocumentFormat::Png,
                b"this is not a png",
                JobAttributes::default(),
            )
        })
        .expect("enqueue");
        handle.wake();

        assert_eq!(wait_terminal(&rig, job.id).await, JobState::Aborted);
        let printer = rig
            .registry
            .get_by_id(rig.printer.id)
            .expect("get")
            .expect("printer");
        assert_eq!(printer.state, PrinterState::Idle);

        let record = with_store(&rig.store, |s| {
            Ok(s.get_job(rig.printer.id, job.id).expect("get"))
        })
        .expect("store")
        .expect("job");
        assert!(record.error_message.expect("message").contains("decode"));

        handle.shutdown().await;
    }
}
