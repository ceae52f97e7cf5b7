// SPDX-License-Identifier: Apache-2.0
//
// IPP/1.1 binary codec (RFC 8010) and the minimal HTTP envelope it rides
// in.
//
// IPP is transported as the body of an HTTP POST with Content-Type
// `application/ipp`.  The dispatcher operates on raw TCP and parses just
// enough HTTP to recover the request path (which selects the printer,
// `/ipp/print/{name}`) and the body offset; some clients and all of our
// tests also speak raw IPP without the HTTP wrapper, which is accepted
// too.
//
// The wire format (RFC 8010 §3.1):
//
// ```text
// version-number:   2 bytes (major, minor)
// operation-id /
// status-code:      2 bytes (big-endian u16)
// request-id:       4 bytes (big-endian u32)
// attribute groups: delimiter tag, then attributes
//   value-tag:      1 byte
//   name-length:    2 bytes (big-endian u16; 0 = additional value)
//   name:           name-length bytes
//   value-length:   2 bytes (big-endian u16)
//   value:          value-length bytes
// end-of-attributes-tag: 0x03
// document-data:    remainder
// ```

use tracing::warn;

/// IPP version emitted and accepted: 1.1.
pub const VERSION_MAJOR: u8 = 0x01;
pub const VERSION_MINOR: u8 = 0x01;

/// Delimiter tags (RFC 8010 §3.5.1).
pub mod tag {
    pub const OPERATION_ATTRIBUTES: u8 = 0x01;
    pub const JOB_ATTRIBUTES: u8 = 0x02;
    pub const END_OF_ATTRIBUTES: u8 = 0x03;
    pub const PRINTER_ATTRIBUTES: u8 = 0x04;
}

/// Value tags (RFC 8010 §3.5.2).
pub mod value {
    pub const INTEGER: u8 = 0x21;
    pub const BOOLEAN: u8 = 0x22;
    pub const ENUM: u8 = 0x23;
    pub const TEXT: u8 = 0x41;
    pub const NAME: u8 = 0x42;
    pub const KEYWORD: u8 = 0x44;
    pub const URI: u8 = 0x45;
    pub const CHARSET: u8 = 0x47;
    pub const NATURAL_LANGUAGE: u8 = 0x48;
}

/// Operation identifiers (RFC 8011 §4).
pub mod op {
    pub const PRINT_JOB: u16 = 0x0002;
    pub const VALIDATE_JOB: u16 = 0x0004;
    pub const CANCEL_JOB: u16 = 0x0008;
    pub const GET_JOB_ATTRIBUTES: u16 = 0x0009;
    pub const GET_JOBS: u16 = 0x000A;
    pub const GET_PRINTER_ATTRIBUTES: u16 = 0x000B;
    pub const SET_PRINTER_ATTRIBUTES: u16 = 0x0013;
}

/// Status codes (RFC 8011 §4.1.8).
pub mod status {
    pub const OK: u16 = 0x0000;
    pub const CLIENT_ERROR_BAD_REQUEST: u16 = 0x0400;
    pub const CLIENT_ERROR_NOT_AUTHORIZED: u16 = 0x0403;
    pub const CLIENT_ERROR_NOT_POSSIBLE: u16 = 0x0404;
    pub const CLIENT_ERROR_NOT_FOUND: u16 = 0x0406;
    pub const CLIENT_ERROR_DOCUMENT_FORMAT: u16 = 0x040A;
    pub const SERVER_ERROR_INTERNAL: u16 = 0x0500;
    pub const SERVER_ERROR_OPERATION_NOT_SUPPORTED: u16 = 0x0501;
}

// ---------------------------------------------------------------------------
// Parsed request
// ---------------------------------------------------------------------------

/// A single parsed attribute.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub value_tag: u8,
    /// Attribute name; empty for additional values in a 1setOf.
    pub name: String,
    pub value: Vec<u8>,
}

/// Attributes under one delimiter tag.
#[derive(Debug, Clone)]
pub struct AttributeGroup {
    pub delimiter: u8,
    pub attributes: Vec<Attribute>,
}

impl AttributeGroup {
    /// First attribute with the given name.
    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// First value of `name` as a UTF-8 string.
    pub fn get_string(&self, name: &str) -> Option<String> {
        self.get(name)
            .and_then(|a| String::from_utf8(a.value.clone()).ok())
    }

    /// First value of `name` as a big-endian i32 (integer or enum).
    pub fn get_integer(&self, name: &str) -> Option<i32> {
        self.get(name).and_then(|a| {
            let bytes: [u8; 4] = a.value.as_slice().try_into().ok()?;
            Some(i32::from_be_bytes(bytes))
        })
    }
}

/// A fully parsed IPP request.
#[derive(Debug)]
pub struct IppRequest {
    pub version_major: u8,
    pub version_minor: u8,
    pub operation_id: u16,
    /// Echoed back verbatim in the response.
    pub request_id: u32,
    pub groups: Vec<AttributeGroup>,
    /// Everything after the end-of-attributes tag.
    pub document_data: Vec<u8>,
}

impl IppRequest {
    pub fn operation_attributes(&self) -> Option<&AttributeGroup> {
        self.groups
            .iter()
            .find(|g| g.delimiter == tag::OPERATION_ATTRIBUTES)
    }

    pub fn job_attributes(&self) -> Option<&AttributeGroup> {
        self.groups
            .iter()
            .find(|g| g.delimiter == tag::JOB_ATTRIBUTES)
    }

    pub fn printer_attributes(&self) -> Option<&AttributeGroup> {
        self.groups
            .iter()
            .find(|g| g.delimiter == tag::PRINTER_ATTRIBUTES)
    }

    /// `requesting-user-name`, defaulting to "anonymous" per RFC 8011
    /// §9.3 when the client sends none.
    pub fn requesting_user(&self) -> String {
        self.operation_attributes()
            .and_then(|g| g.get_string("requesting-user-name"))
            .unwrap_or_else(|| "anonymous".to_string())
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse a raw IPP message body.
///
/// Errors are plain strings; the dispatcher wraps them into a
/// client-error-bad-request response.
pub fn parse_request(data: &[u8]) -> Result<IppRequest, String> {
    if data.len() < 8 {
        return Err(format!("message too short: {} bytes (minimum 8)", data.len()));
    }

    let version_major = data[0];
    let version_minor = data[1];
    let operation_id = u16::from_be_bytes([data[2], data[3]]);
    let request_id = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);

    let mut pos = 8;
    let mut groups: Vec<AttributeGroup> = Vec::new();
    let mut current: Option<AttributeGroup> = None;

    while pos < data.len() {
        let byte = data[pos];

        // Delimiter tags occupy 0x00..=0x0F.
        if byte <= 0x0F {
            if let Some(group) = current.take() {
                groups.push(group);
            }
            if byte == tag::END_OF_ATTRIBUTES {
                pos += 1;
                break;
            }
            current = Some(AttributeGroup {
                delimiter: byte,
                attributes: Vec::new(),
            });
            pos += 1;
            continue;
        }

        let value_tag = byte;
        pos += 1;

        if pos + 2 > data.len() {
            return Err("truncated name-length".into());
        }
        let name_len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
        pos += 2;

        if pos + name_len > data.len() {
            return Err("truncated attribute name".into());
        }
        let name = String::from_utf8_lossy(&data[pos..pos + name_len]).into_owned();
        pos += name_len;

        if pos + 2 > data.len() {
            return Err("truncated value-length".into());
        }
        let value_len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
        pos += 2;

        if pos + value_len > data.len() {
            return Err("truncated attribute value".into());
        }
        let value = data[pos..pos + value_len].to_vec();
        pos += value_len;

        match current.as_mut() {
            Some(group) => group.attributes.push(Attribute {
                value_tag,
                name,
                value,
            }),
            // Attribute before any delimiter tag is malformed; drop it.
            None => warn!(name, "attribute outside any group discarded"),
        }
    }

    if let Some(group) = current.take() {
        groups.push(group);
    }

    let document_data = data.get(pos..).unwrap_or_default().to_vec();

    Ok(IppRequest {
        version_major,
        version_minor,
        operation_id,
        request_id,
        groups,
        document_data,
    })
}

// ---------------------------------------------------------------------------
// Response builder
// ---------------------------------------------------------------------------

/// Builder for IPP response messages (RFC 8010 §3.4 encoding).
pub struct ResponseBuilder {
    buf: Vec<u8>,
}

impl ResponseBuilder {
    /// Start a response carrying `status_code`, echoing `request_id`.
    /// The mandatory charset/natural-language operation attributes are
    /// written immediately.
    pub fn new(status_code: u16, request_id: u32) -> Self {
        let mut buf = Vec::with_capacity(256);
        buf.push(VERSION_MAJOR);
        buf.push(VERSION_MINOR);
        buf.extend_from_slice(&status_code.to_be_bytes());
        buf.extend_from_slice(&request_id.to_be_bytes());
        let mut builder = Self { buf };
        builder
            .begin_group(tag::OPERATION_ATTRIBUTES)
            .write(value::CHARSET, "attributes-charset", b"utf-8")
            .write(
                value::NATURAL_LANGUAGE,
                "attributes-natural-language",
                b"en",
            );
        builder
    }

    pub fn begin_group(&mut self, delimiter: u8) -> &mut Self {
        self.buf.push(delimiter);
        self
    }

    pub fn text(&mut self, name: &str, v: &str) -> &mut Self {
        self.write(value::TEXT, name, v.as_bytes())
    }

    pub fn name(&mut self, name: &str, v: &str) -> &mut Self {
        self.write(value::NAME, name, v.as_bytes())
    }

    pub fn keyword(&mut self, name: &str, v: &str) -> &mut Self {
        self.write(value::KEYWORD, name, v.as_bytes())
    }

    /// Additional value in a 1setOf keyword (name-length 0, RFC 8010
    /// §3.1.4).
    pub fn keyword_additional(&mut self, v: &str) -> &mut Self {
        self.write(value::KEYWORD, "", v.as_bytes())
    }

    pub fn uri(&mut self, name: &str, v: &str) -> &mut Self {
        self.write(value::URI, name, v.as_bytes())
    }

    pub fn integer(&mut self, name: &str, v: i32) -> &mut Self {
        self.write(value::INTEGER, name, &v.to_be_bytes())
    }

    pub fn enumeration(&mut self, name: &str, v: i32) -> &mut Self {
        self.write(value::ENUM, name, &v.to_be_bytes())
    }

    /// Additional value in a 1setOf enum.
    pub fn enumeration_additional(&mut self, v: i32) -> &mut Self {
        self.write(value::ENUM, "", &v.to_be_bytes())
    }

    pub fn boolean(&mut self, name: &str, v: bool) -> &mut Self {
        self.write(value::BOOLEAN, name, &[u8::from(v)])
    }

    pub fn charset(&mut self, name: &str, v: &str) -> &mut Self {
        self.write(value::CHARSET, name, v.as_bytes())
    }

    pub fn natural_language(&mut self, name: &str, v: &str) -> &mut Self {
        self.write(value::NATURAL_LANGUAGE, name, v.as_bytes())
    }

    fn write(&mut self, value_tag: u8, name: &str, v: &[u8]) -> &mut Self {
        self.buf.push(value_tag);
        self.buf
            .extend_from_slice(&(name.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(name.as_bytes());
        self.buf.extend_from_slice(&(v.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(v);
        self
    }

    /// Append the end-of-attributes tag and return the wire bytes.
    pub fn finish(mut self) -> Vec<u8> {
        self.buf.push(tag::END_OF_ATTRIBUTES);
        self.buf
    }
}

/// Response carrying only a status and message (the error shape).
pub fn error_response(status_code: u16, request_id: u32, message: &str) -> Vec<u8> {
    let mut resp = ResponseBuilder::new(status_code, request_id);
    resp.text("status-message", message);
    resp.finish()
}

// ---------------------------------------------------------------------------
// HTTP envelope
// ---------------------------------------------------------------------------

/// The parts of an HTTP POST the dispatcher cares about.
#[derive(Debug)]
pub struct HttpEnvelope {
    /// Request path, e.g. `/ipp/print/label1`.
    pub path: Option<String>,
    pub content_length: Option<usize>,
    /// Offset of the IPP payload within the received bytes.
    pub body_offset: usize,
}

/// Find the HTTP body and request path, if the data is HTTP at all.
///
/// Returns `None` when no header terminator is present, in which case the
/// payload is treated as raw IPP.
pub fn parse_http_envelope(data: &[u8]) -> Option<HttpEnvelope> {
    let header_end = find_subsequence(data, b"\r\n\r\n")?;
    let body_offset = header_end + 4;

    let headers = String::from_utf8_lossy(&data[..header_end]);
    let mut lines = headers.lines();

    // Request line: "POST /ipp/print/label1 HTTP/1.1"
    let path = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .map(str::to_owned);

    let content_length = headers
        .lines()
        .find(|line| line.to_ascii_lowercase().starts_with("content-length:"))
        .and_then(|line| line.split(':').nth(1))
        .and_then(|v| v.trim().parse::<usize>().ok());

    Some(HttpEnvelope {
        path,
        content_length,
        body_offset,
    })
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a binary IPP request for tests.
    pub(crate) fn build_request(
        operation_id: u16,
        request_id: u32,
        attributes: &[(u8, &str, &[u8])],
        document_data: &[u8],
    ) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(VERSION_MAJOR);
        buf.push(VERSION_MINOR);
        buf.extend_from_slice(&operation_id.to_be_bytes());
        buf.extend_from_slice(&request_id.to_be_bytes());
        buf.push(tag::OPERATION_ATTRIBUTES);
        write_attr(&mut buf, value::CHARSET, "attributes-charset", b"utf-8");
        write_attr(
            &mut buf,
            value::NATURAL_LANGUAGE,
            "attributes-natural-language",
            b"en",
        );
        for &(tag_byte, name, val) in attributes {
            write_attr(&mut buf, tag_byte, name, val);
        }
        buf.push(tag::END_OF_ATTRIBUTES);
        buf.extend_from_slice(document_data);
        buf
    }

    fn write_attr(buf: &mut Vec<u8>, value_tag: u8, name: &str, val: &[u8]) {
        buf.push(value_tag);
        buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(&(val.len() as u16).to_be_bytes());
        buf.extend_from_slice(val);
    }

    #[test]
    fn parse_minimal_request() {
        let data = build_request(op::GET_PRINTER_ATTRIBUTES, 42, &[], &[]);
        let req = parse_request(&data).expect("parse");

        assert_eq!(req.version_major, 1);
        assert_eq!(req.version_minor, 1);
        assert_eq!(req.operation_id, op::GET_PRINTER_ATTRIBUTES);
        assert_eq!(req.request_id, 42);
        assert_eq!(req.groups.len(), 1);
        assert!(req.document_data.is_empty());
    }

    #[test]
    fn parse_request_with_document_data() {
        let doc = b"^XA^FDhello^FS^XZ";
        let data = build_request(op::PRINT_JOB, 7, &[], doc);
        let req = parse_request(&data).expect("parse");
        assert_eq!(req.document_data, doc);
    }

    #[test]
    fn parse_request_strings_and_integers() {
        let copies = 3i32.to_be_bytes();
        let attrs: Vec<(u8, &str, &[u8])> = vec![
            (value::NAME, "job-name", b"shipping batch"),
            (value::KEYWORD, "document-format", b"image/png"),
            (value::INTEGER, "copies", &copies),
        ];
        let data = build_request(op::PRINT_JOB, 9, &attrs, &[]);
        let req = parse_request(&data).expect("parse");

        let group = req.operation_attributes().expect("op attrs");
        assert_eq!(group.get_string("job-name").as_deref(), Some("shipping batch"));
        assert_eq!(group.get_string("document-format").as_deref(), Some("image/png"));
        assert_eq!(group.get_integer("copies"), Some(3));
        assert_eq!(group.get_integer("job-name"), None);
    }

    #[test]
    fn requesting_user_defaults_to_anonymous() {
        let data = build_request(op::PRINT_JOB, 1, &[], &[]);
        let req = parse_request(&data).expect("parse");
        assert_eq!(req.requesting_user(), "anonymous");

        let attrs: Vec<(u8, &str, &[u8])> =
            vec![(value::NAME, "requesting-user-name", b"alice")];
        let data = build_request(op::PRINT_JOB, 2, &attrs, &[]);
        let req = parse_request(&data).expect("parse");
        assert_eq!(req.requesting_user(), "alice");
    }

    #[test]
    fn truncated_messages_are_rejected() {
        assert!(parse_request(&[0x01, 0x01, 0x00]).is_err());

        // Attribute whose declared value length runs past the end.
        let mut data = build_request(op::PRINT_JOB, 1, &[], &[]);
        let end = data.len();
        data.truncate(end - 1); // drop end-of-attributes tag
        data.push(value::TEXT);
        data.extend_from_slice(&4u16.to_be_bytes());
        data.extend_from_slice(b"na");
        assert!(parse_request(&data).is_err());
    }

    #[test]
    fn response_round_trips_through_parser() {
        let mut resp = ResponseBuilder::new(status::OK, 77);
        resp.text("status-message", "successful-ok");
        resp.begin_group(tag::JOB_ATTRIBUTES)
            .integer("job-id", 4)
            .enumeration("job-state", 3)
            .keyword("job-state-reasons", "none")
            .keyword_additional("job-incoming");
        let bytes = resp.finish();

        // Responses share the request encoding; bytes 2-3 are the status.
        let parsed = parse_request(&bytes).expect("parse response");
        assert_eq!(parsed.operation_id, status::OK);
        assert_eq!(parsed.request_id, 77);

        let job = parsed.job_attributes().expect("job group");
        assert_eq!(job.get_integer("job-id"), Some(4));
        assert_eq!(job.get_integer("job-state"), Some(3));
        // 1setOf: named first value plus one additional value.
        let reasons: Vec<_> = job
            .attributes
            .iter()
            .filter(|a| a.value_tag == value::KEYWORD)
            .collect();
        assert_eq!(reasons.len(), 2);
        assert!(reasons[1].name.is_empty());
    }

    #[test]
    fn error_response_carries_message() {
        let bytes = error_response(status::CLIENT_ERROR_NOT_FOUND, 5, "no such job");
        let parsed = parse_request(&bytes).expect("parse");
        assert_eq!(parsed.operation_id, status::CLIENT_ERROR_NOT_FOUND);
        let group = parsed.operation_attributes().expect("op group");
        assert_eq!(group.get_string("status-message").as_deref(), Some("no such job"));
    }

    #[test]
    fn http_envelope_yields_path_and_body() {
        let ipp = build_request(op::VALIDATE_JOB, 1, &[], &[]);
        let mut raw = format!(
            "POST /ipp/print/label1 HTTP/1.1\r\nContent-Type: application/ipp\r\nContent-Length: {}\r\n\r\n",
            ipp.len()
        )
        .into_bytes();
        raw.extend_from_slice(&ipp);

        let envelope = parse_http_envelope(&raw).expect("envelope");
        assert_eq!(envelope.path.as_deref(), Some("/ipp/print/label1"));
        assert_eq!(envelope.content_length, Some(ipp.len()));
        assert_eq!(&raw[envelope.body_offset..], &ipp[..]);
    }

    #[test]
    fn raw_ipp_has_no_envelope() {
        let ipp = build_request(op::VALIDATE_JOB, 1, &[], &[]);
        assert!(parse_http_envelope(&ipp).is_none());
    }
}
