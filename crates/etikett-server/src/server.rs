// SPDX-License-Identifier: Apache-2.0
//
// The IPP request dispatcher and its TCP accept loop.
//
// IPP rides in HTTP POST bodies over raw TCP (RFC 8010 §3); the request
// path selects the printer (`/ipp/print/{name}`), matching the `rp` TXT
// record the advertiser announces.  Each connection runs on its own task,
// reads one request, dispatches it, writes one response, and closes.
//
// Supported operations:
//
//   - Print-Job               (0x0002)  RFC 8011 §4.2.1
//   - Validate-Job            (0x0004)  RFC 8011 §4.2.3
//   - Cancel-Job              (0x0008)  RFC 8011 §4.3.3
//   - Get-Job-Attributes      (0x0009)  RFC 8011 §4.3.4
//   - Get-Jobs                (0x000A)  RFC 8011 §4.2.6
//   - Get-Printer-Attributes  (0x000B)  RFC 8011 §4.2.5
//   - Set-Printer-Attributes  (0x0013)  RFC 3380 §4.1, authorized
//
// Malformed requests produce a client-error response and mutate nothing.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use etikett_core::error::{EtikettError, Result};
use etikett_core::types::{
    DocumentFormat, JobAttributes, JobRecord, JobState, LabelMedia, Orientation, Printer,
    PrinterId,
};
use etikett_store::JobStore;

use crate::auth::{AdminOperation, Authorizer};
use crate::ipp::{self, IppRequest, ResponseBuilder, error_response, op, status, tag};
use crate::processor::with_store;
use crate::registry::{DescriptionUpdate, PrinterRegistry};

/// Upper bound on one request, document included.
const MAX_REQUEST_BYTES: usize = 64 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Everything the dispatcher needs, shared across connection tasks.
pub struct ServerState {
    pub registry: Arc<PrinterRegistry>,
    pub store: Arc<Mutex<JobStore>>,
    pub authorizer: Arc<dyn Authorizer>,
    /// Hostname used when building printer URIs.
    pub hostname: String,
    /// Advertised IPP port, used in printer URIs.
    pub port: u16,
    /// Per-printer processor wake signals.
    wakers: Mutex<HashMap<PrinterId, Arc<Notify>>>,
}

impl ServerState {
    pub fn new(
        registry: Arc<PrinterRegistry>,
        store: Arc<Mutex<JobStore>>,
        authorizer: Arc<dyn Authorizer>,
        hostname: String,
        port: u16,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            store,
            authorizer,
            hostname,
            port,
            wakers: Mutex::new(HashMap::new()),
        })
    }

    /// Canonical URI for a printer name.
    pub fn printer_uri(&self, name: &str) -> String {
        format!("ipp://{}:{}/ipp/print/{}", self.hostname, self.port, name)
    }

    /// Attach a processor's wake signal for a printer.
    pub fn register_waker(&self, id: PrinterId, waker: Arc<Notify>) {
        if let Ok(mut map) = self.wakers.lock() {
            map.insert(id, waker);
        }
    }

    pub fn remove_waker(&self, id: PrinterId) {
        if let Ok(mut map) = self.wakers.lock() {
            map.remove(&id);
        }
    }

    fn wake_processor(&self, id: PrinterId) {
        if let Ok(map) = self.wakers.lock() {
            if let Some(waker) = map.get(&id) {
                waker.notify_one();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// The listening IPP server.
pub struct IppServer {
    shutdown: Arc<Notify>,
    task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl IppServer {
    pub fn new() -> Self {
        Self {
            shutdown: Arc::new(Notify::new()),
            task: None,
            local_addr: None,
        }
    }

    /// Bound address, available after [`start`](Self::start).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind `0.0.0.0:{port}` and start accepting connections.
    pub async fn start(&mut self, port: u16, state: Arc<ServerState>) -> Result<()> {
        let bind_addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| EtikettError::Server(format!("bind {bind_addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| EtikettError::Server(format!("local addr: {e}")))?;

        info!(addr = %local_addr, "IPP server listening");
        self.local_addr = Some(local_addr);

        let shutdown = Arc::clone(&self.shutdown);
        self.task = Some(tokio::spawn(accept_loop(listener, shutdown, state)));
        Ok(())
    }

    /// Signal the accept loop to exit and await it.  Connections already
    /// being handled finish on their own tasks.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        info!("stopping IPP server");
        self.shutdown.notify_one();
        task.await
            .map_err(|e| EtikettError::Server(format!("accept loop join: {e}")))?;
        info!("IPP server stopped");
        Ok(())
    }
}

impl Default for IppServer {
    fn default() -> Self {
        Self::new()
    }
}

async fn accept_loop(listener: TcpListener, shutdown: Arc<Notify>, state: Arc<ServerState>) {
    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                debug!("accept loop received shutdown signal");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "incoming IPP connection");
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, state).await {
                                warn!(peer = %peer, error = %e, "connection handler error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "accept failed"),
                }
            }
        }
    }
}

/// Read one request, dispatch it, write one response.
async fn handle_connection(
    mut stream: tokio::net::TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState>,
) -> Result<()> {
    let mut buf = Vec::with_capacity(8192);
    let mut limited = (&mut stream).take(MAX_REQUEST_BYTES as u64);
    let bytes_read = limited
        .read_to_end(&mut buf)
        .await
        .map_err(|e| EtikettError::Server(format!("read from {peer}: {e}")))?;

    if bytes_read == 0 {
        return Ok(());
    }

    // Strip the HTTP envelope when present; raw IPP is accepted too.
    let looks_like_http = buf.starts_with(b"POST ");
    let (path, body) = match ipp::parse_http_envelope(&buf).filter(|_| looks_like_http) {
        Some(envelope) => {
            let body = buf[envelope.body_offset..].to_vec();
            (envelope.path, body)
        }
        None => (None, buf),
    };

    let response = match ipp::parse_request(&body) {
        Ok(request) => {
            debug!(
                peer = %peer,
                operation = format!("0x{:04X}", request.operation_id),
                request_id = request.request_id,
                doc_bytes = request.document_data.len(),
                "dispatching IPP request"
            );
            dispatch(&request, path.as_deref(), &state)
        }
        Err(e) => {
            warn!(peer = %peer, error = %e, "malformed IPP request");
            error_response(status::CLIENT_ERROR_BAD_REQUEST, 0, &format!("malformed request: {e}"))
        }
    };

    let http_header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/ipp\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.len()
    );
    stream
        .write_all(http_header.as_bytes())
        .await
        .map_err(|e| EtikettError::Server(format!("write headers: {e}")))?;
    stream
        .write_all(&response)
        .await
        .map_err(|e| EtikettError::Server(format!("write body: {e}")))?;
    stream
        .flush()
        .await
        .map_err(|e| EtikettError::Server(format!("flush: {e}")))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// A request that cannot proceed; becomes an IPP error response.
struct RequestError {
    status: u16,
    message: String,
}

impl RequestError {
    fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<EtikettError> for RequestError {
    fn from(e: EtikettError) -> Self {
        let status = match &e {
            EtikettError::Protocol(_) => status::CLIENT_ERROR_BAD_REQUEST,
            EtikettError::Authorization(_) => status::CLIENT_ERROR_NOT_AUTHORIZED,
            EtikettError::NotFound(_) => status::CLIENT_ERROR_NOT_FOUND,
            EtikettError::Conflict(_) => status::CLIENT_ERROR_NOT_POSSIBLE,
            _ => status::SERVER_ERROR_INTERNAL,
        };
        Self::new(status, e.to_string())
    }
}

/// Route a parsed request to its operation handler.
pub fn dispatch(request: &IppRequest, path: Option<&str>, state: &ServerState) -> Vec<u8> {
    let result = match request.operation_id {
        op::PRINT_JOB => handle_print_job(request, path, state),
        op::VALIDATE_JOB => handle_validate_job(request, path, state),
        op::CANCEL_JOB => handle_cancel_job(request, path, state),
        op::GET_JOB_ATTRIBUTES => handle_get_job_attributes(request, path, state),
        op::GET_JOBS => handle_get_jobs(request, path, state),
        op::GET_PRINTER_ATTRIBUTES => handle_get_printer_attributes(request, path, state),
        op::SET_PRINTER_ATTRIBUTES => handle_set_printer_attributes(request, path, state),
        other => Err(RequestError::new(
            status::SERVER_ERROR_OPERATION_NOT_SUPPORTED,
            format!("operation 0x{other:04X} is not supported"),
        )),
    };

    match result {
        Ok(response) => response,
        Err(e) => {
            debug!(status = format!("0x{:04X}", e.status), "request refused: {}", e.message);
            error_response(e.status, request.request_id, &e.message)
        }
    }
}

/// Extract the printer name from a printer-uri attribute or HTTP path.
fn printer_name_from(request: &IppRequest, path: Option<&str>) -> Option<String> {
    let from_uri = request
        .operation_attributes()
        .and_then(|g| g.get_string("printer-uri"))
        .as_deref()
        .and_then(name_from_path);
    from_uri.or_else(|| path.and_then(name_from_path))
}

/// Last segment after `/ipp/print/` in a URI or path.
fn name_from_path(path: &str) -> Option<String> {
    let rest = path.split("/ipp/print/").nth(1)?;
    let name = rest.split(['/', '?']).next()?;
    (!name.is_empty()).then(|| name.to_string())
}

/// Resolve the target printer.  With a single registered printer the
/// name may be omitted entirely.
fn resolve_printer(
    request: &IppRequest,
    path: Option<&str>,
    state: &ServerState,
) -> std::result::Result<Printer, RequestError> {
    match printer_name_from(request, path) {
        Some(name) => state
            .registry
            .get(&name)?
            .ok_or_else(|| RequestError::new(status::CLIENT_ERROR_NOT_FOUND, format!("printer {name} not found"))),
        None => {
            let mut printers = state.registry.list()?;
            if printers.len() == 1 {
                Ok(printers.remove(0))
            } else {
                Err(RequestError::new(
                    status::CLIENT_ERROR_BAD_REQUEST,
                    "no printer specified",
                ))
            }
        }
    }
}

/// Parse and validate the document format requested for a job.
fn requested_format(
    request: &IppRequest,
    printer: &Printer,
) -> std::result::Result<DocumentFormat, RequestError> {
    let mime = request
        .operation_attributes()
        .and_then(|g| g.get_string("document-format"))
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let format = DocumentFormat::from_mime(&mime).ok_or_else(|| {
        RequestError::new(
            status::CLIENT_ERROR_DOCUMENT_FORMAT,
            format!("unsupported document format {mime}"),
        )
    })?;

    if !printer.capabilities.formats_supported.contains(&format) {
        return Err(RequestError::new(
            status::CLIENT_ERROR_DOCUMENT_FORMAT,
            format!("printer {} does not accept {mime}", printer.name),
        ));
    }
    Ok(format)
}

/// Build the job ticket from the request's job attributes group, filling
/// gaps from the printer's defaults.
fn requested_attributes(request: &IppRequest, printer: &Printer) -> JobAttributes {
    let job_group = request.job_attributes();

    let media = job_group
        .and_then(|g| g.get_string("media"))
        .as_deref()
        .and_then(LabelMedia::from_keyword)
        .unwrap_or(printer.default_media);

    let copies = job_group
        .and_then(|g| g.get_integer("copies"))
        .map(|c| c.clamp(1, 999) as u32)
        .unwrap_or(1);

    let orientation = job_group
        .and_then(|g| g.get_integer("orientation-requested"))
        .and_then(Orientation::from_ipp_enum)
        .unwrap_or(Orientation::Portrait);

    let darkness = job_group
        .and_then(|g| g.get_integer("print-darkness"))
        .map(|d| d.clamp(0, 100) as u8)
        .unwrap_or(JobAttributes::default().darkness);

    JobAttributes {
        media,
        copies,
        orientation,
        darkness,
    }
}

// ---------------------------------------------------------------------------
// Operation handlers
// ---------------------------------------------------------------------------

fn handle_print_job(
    request: &IppRequest,
    path: Option<&str>,
    state: &ServerState,
) -> std::result::Result<Vec<u8>, RequestError> {
    let printer = resolve_printer(request, path, state)?;
    let format = requested_format(request, &printer)?;

    if request.document_data.is_empty() {
        return Err(RequestError::new(
            status::CLIENT_ERROR_BAD_REQUEST,
            "no document data",
        ));
    }

    let user = request.requesting_user();
    let job_name = request
        .operation_attributes()
        .and_then(|g| g.get_string("job-name"))
        .unwrap_or_else(|| "untitled".to_string());
    let attributes = requested_attributes(request, &printer);

    let job = with_store(&state.store, |s| {
        s.enqueue(
            printer.id,
            &user,
            &job_name,
            format,
            &request.document_data,
            attributes,
        )
    })?;
    state.wake_processor(printer.id);

    info!(
        printer = %printer.name,
        job_id = job.id,
        user = %user,
        doc_bytes = job.document_len,
        "Print-Job accepted"
    );

    let printer_uri = state.printer_uri(&printer.name);
    let mut resp = ResponseBuilder::new(status::OK, request.request_id);
    resp.text("status-message", "successful-ok");
    resp.begin_group(tag::JOB_ATTRIBUTES)
        .integer("job-id", job.id)
        .uri("job-uri", &format!("{printer_uri}/jobs/{}", job.id))
        .enumeration("job-state", job.state.ipp_enum_value())
        .keyword("job-state-reasons", job.state.ipp_reason_keyword());
    Ok(resp.finish())
}

fn handle_validate_job(
    request: &IppRequest,
    path: Option<&str>,
    state: &ServerState,
) -> std::result::Result<Vec<u8>, RequestError> {
    let printer = resolve_printer(request, path, state)?;
    requested_format(request, &printer)?;

    let mut resp = ResponseBuilder::new(status::OK, request.request_id);
    resp.text("status-message", "successful-ok");
    Ok(resp.finish())
}

fn handle_cancel_job(
    request: &IppRequest,
    path: Option<&str>,
    state: &ServerState,
) -> std::result::Result<Vec<u8>, RequestError> {
    let printer = resolve_printer(request, path, state)?;
    let job_id = request
        .operation_attributes()
        .and_then(|g| g.get_integer("job-id"))
        .ok_or_else(|| {
            RequestError::new(status::CLIENT_ERROR_BAD_REQUEST, "missing job-id attribute")
        })?;

    let user = request.requesting_user();
    let job = with_store(&state.store, |s| s.get_job(printer.id, job_id))?
        .ok_or_else(|| {
            RequestError::new(status::CLIENT_ERROR_NOT_FOUND, format!("job {job_id} not found"))
        })?;

    if job.user != user
        && !state
            .authorizer
            .authorize(&user, AdminOperation::CancelForeignJob, &printer.name)
    {
        return Err(RequestError::new(
            status::CLIENT_ERROR_NOT_AUTHORIZED,
            format!("user {user} may not cancel jobs owned by {}", job.user),
        ));
    }

    let resulting = with_store(&state.store, |s| s.cancel(printer.id, job_id))?;
    info!(printer = %printer.name, job_id, user = %user, ?resulting, "Cancel-Job accepted");

    let message = match resulting {
        JobState::Processing => "cancel requested, takes effect at the next page boundary",
        _ => "successful-ok",
    };
    let mut resp = ResponseBuilder::new(status::OK, request.request_id);
    resp.text("status-message", message);
    Ok(resp.finish())
}

fn handle_get_job_attributes(
    request: &IppRequest,
    path: Option<&str>,
    state: &ServerState,
) -> std::result::Result<Vec<u8>, RequestError> {
    let printer = resolve_printer(request, path, state)?;
    let job_id = request
        .operation_attributes()
        .and_then(|g| g.get_integer("job-id"))
        .ok_or_else(|| {
            RequestError::new(status::CLIENT_ERROR_BAD_REQUEST, "missing job-id attribute")
        })?;

    let job = with_store(&state.store, |s| s.get_job(printer.id, job_id))?
        .ok_or_else(|| {
            RequestError::new(status::CLIENT_ERROR_NOT_FOUND, format!("job {job_id} not found"))
        })?;

    let printer_uri = state.printer_uri(&printer.name);
    let mut resp = ResponseBuilder::new(status::OK, request.request_id);
    resp.text("status-message", "successful-ok");
    append_job_group(&mut resp, &job, &printer_uri);
    Ok(resp.finish())
}

fn handle_get_jobs(
    request: &IppRequest,
    path: Option<&str>,
    state: &ServerState,
) -> std::result::Result<Vec<u8>, RequestError> {
    let printer = resolve_printer(request, path, state)?;

    // RFC 8011 §4.2.6.1: default is the not-completed set.
    let which = request
        .operation_attributes()
        .and_then(|g| g.get_string("which-jobs"))
        .unwrap_or_else(|| "not-completed".to_string());
    let limit = request
        .operation_attributes()
        .and_then(|g| g.get_integer("limit"))
        .filter(|&n| n > 0)
        .map(|n| n as usize)
        .unwrap_or(usize::MAX);

    let jobs = with_store(&state.store, |s| s.jobs_for_printer(printer.id))?;
    let selected = jobs.into_iter().filter(|job| match which.as_str() {
        "completed" => job.state.is_terminal(),
        "all" => true,
        _ => !job.state.is_terminal(),
    });

    let printer_uri = state.printer_uri(&printer.name);
    let mut resp = ResponseBuilder::new(status::OK, request.request_id);
    resp.text("status-message", "successful-ok");
    for job in selected.take(limit) {
        append_job_group(&mut resp, &job, &printer_uri);
    }
    Ok(resp.finish())
}

fn handle_get_printer_attributes(
    request: &IppRequest,
    path: Option<&str>,
    state: &ServerState,
) -> std::result::Result<Vec<u8>, RequestError> {
    let printer = resolve_printer(request, path, state)?;
    let queued = with_store(&state.store, |s| s.active_count(printer.id))?;
    let printer_uri = state.printer_uri(&printer.name);
    let caps = &printer.capabilities;

    let mut resp = ResponseBuilder::new(status::OK, request.request_id);
    resp.text("status-message", "successful-ok");
    resp.begin_group(tag::PRINTER_ATTRIBUTES)
        .uri("printer-uri-supported", &printer_uri)
        .name("printer-name", &printer.name)
        .text("printer-make-and-model", &caps.make_and_model)
        .enumeration("printer-state", printer.state.ipp_enum_value())
        .boolean("printer-is-accepting-jobs", true)
        .integer("queued-job-count", queued as i32);

    if printer.reasons.is_empty() {
        resp.keyword("printer-state-reasons", "none");
    } else {
        resp.keyword("printer-state-reasons", printer.reasons[0].ipp_keyword());
        for reason in &printer.reasons[1..] {
            resp.keyword_additional(reason.ipp_keyword());
        }
    }

    if let Some(location) = &printer.location {
        resp.text("printer-location", location);
    }
    if let Some(info) = &printer.info {
        resp.text("printer-info", info);
    }
    if let Some(geo) = &printer.geo_location {
        resp.text("printer-geo-location", geo);
    }
    if let Some(org) = &printer.organization {
        resp.text("printer-organization", org);
    }

    resp.keyword("ipp-versions-supported", "1.1");

    resp.enumeration("operations-supported", op::PRINT_JOB as i32);
    for operation in [
        op::VALIDATE_JOB,
        op::CANCEL_JOB,
        op::GET_JOB_ATTRIBUTES,
        op::GET_JOBS,
        op::GET_PRINTER_ATTRIBUTES,
        op::SET_PRINTER_ATTRIBUTES,
    ] {
        resp.enumeration_additional(operation as i32);
    }

    let formats: Vec<&str> = caps.formats_supported.iter().map(|f| f.mime_type()).collect();
    if let Some((first, rest)) = formats.split_first() {
        resp.keyword("document-format-supported", first);
        for mime in rest {
            resp.keyword_additional(mime);
        }
    }
    resp.keyword("document-format-default", "application/octet-stream");

    let media: Vec<&str> = caps
        .media_supported
        .iter()
        .map(|m| m.ipp_media_keyword())
        .collect();
    if let Some((first, rest)) = media.split_first() {
        resp.keyword("media-supported", first);
        for keyword in rest {
            resp.keyword_additional(keyword);
        }
    }
    resp.keyword("media-default", printer.default_media.ipp_media_keyword());

    resp.integer("printer-resolution-default", caps.resolution_dpi as i32)
        .charset("charset-configured", "utf-8")
        .charset("charset-supported", "utf-8")
        .natural_language("natural-language-configured", "en")
        .natural_language("generated-natural-language-supported", "en")
        .keyword("uri-security-supported", "none")
        .keyword("uri-authentication-supported", "requesting-user-name")
        .keyword("compression-supported", "none")
        .keyword("pdl-override-supported", "not-attempted");

    Ok(resp.finish())
}

fn handle_set_printer_attributes(
    request: &IppRequest,
    path: Option<&str>,
    state: &ServerState,
) -> std::result::Result<Vec<u8>, RequestError> {
    let printer = resolve_printer(request, path, state)?;
    let user = request.requesting_user();

    if !state
        .authorizer
        .authorize(&user, AdminOperation::SetPrinterAttributes, &printer.name)
    {
        return Err(RequestError::new(
            status::CLIENT_ERROR_NOT_AUTHORIZED,
            format!("user {user} may not modify printer {}", printer.name),
        ));
    }

    let Some(group) = request.printer_attributes() else {
        return Err(RequestError::new(
            status::CLIENT_ERROR_BAD_REQUEST,
            "missing printer-attributes group",
        ));
    };

    let default_media = match group.get_string("media-default") {
        Some(keyword) => Some(LabelMedia::from_keyword(&keyword).ok_or_else(|| {
            RequestError::new(
                status::CLIENT_ERROR_BAD_REQUEST,
                format!("unknown media keyword {keyword}"),
            )
        })?),
        None => None,
    };

    let update = DescriptionUpdate {
        location: group.get_string("printer-location"),
        info: group.get_string("printer-info"),
        geo_location: group.get_string("printer-geo-location"),
        organization: group.get_string("printer-organization"),
        default_media,
    };

    if update.is_empty() {
        return Err(RequestError::new(
            status::CLIENT_ERROR_BAD_REQUEST,
            "no settable attributes in request",
        ));
    }

    state.registry.update_description(&printer.name, update)?;
    info!(printer = %printer.name, user = %user, "Set-Printer-Attributes applied");

    let mut resp = ResponseBuilder::new(status::OK, request.request_id);
    resp.text("status-message", "successful-ok");
    Ok(resp.finish())
}

/// Append one job-attributes group describing `job`.
fn append_job_group(resp: &mut ResponseBuilder, job: &JobRecord, printer_uri: &str) {
    resp.begin_group(tag::JOB_ATTRIBUTES)
        .integer("job-id", job.id)
        .uri("job-uri", &format!("{printer_uri}/jobs/{}", job.id))
        .name("job-name", &job.name)
        .name("job-originating-user-name", &job.user)
        .enumeration("job-state", job.state.ipp_enum_value())
        .keyword("job-state-reasons", job.state.ipp_reason_keyword())
        .keyword("document-format", job.format.mime_type())
        .integer("copies", job.attributes.copies as i32)
        .keyword("media", job.attributes.media.ipp_media_keyword())
        .integer("time-at-creation", job.created_at.timestamp() as i32)
        .integer("job-k-octets", (job.document_len / 1024).max(1) as i32);

    if let Some(message) = &job.error_message {
        resp.text("job-state-message", message);
    }
    if let Some(started) = job.started_at {
        resp.integer("time-at-processing", started.timestamp() as i32);
    }
    if let Some(completed) = job.completed_at {
        resp.integer("time-at-completed", completed.timestamp() as i32);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
