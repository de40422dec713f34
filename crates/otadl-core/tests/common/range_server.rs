//! Minimal HTTP/1.1 server that supports Range GET for integration tests.
//!
//! Serves a single static body. Can cut the connection part-way through the
//! body, answer every request with a fixed error status, trickle the body
//! slowly or misbehave on Range and framing. Records the `Range` header of
//! every request it receives.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RangeServerOptions {
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// Close the connection after this many body bytes...
    pub drop_after: Option<u64>,
    /// ...for this many of the first requests.
    pub drop_requests: usize,
    /// Answer every GET with this status and a short text body.
    pub status_override: Option<u16>,
    /// Body is written in pieces of this size...
    pub write_chunk: usize,
    /// ...with this pause between pieces.
    pub chunk_delay: Option<Duration>,
    /// Serve ranged requests from this many bytes past the requested start,
    /// with a Content-Range that says so.
    pub range_start_skew: u64,
    /// Send no Content-Length; the body ends when the connection closes.
    pub omit_content_length: bool,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            support_ranges: true,
            drop_after: None,
            drop_requests: 0,
            status_override: None,
            write_chunk: 16 * 1024,
            chunk_delay: None,
            range_start_skew: 0,
            omit_content_length: false,
        }
    }
}

/// Handle to a running server. The server runs until the process exits.
#[derive(Clone)]
pub struct RangeServer {
    /// Base URL, e.g. `http://127.0.0.1:12345/fw.bin`.
    pub url: String,
    ranges: Arc<Mutex<Vec<Option<String>>>>,
}

impl RangeServer {
    /// `Range` header of each GET received so far, in arrival order.
    pub fn range_headers(&self) -> Vec<Option<String>> {
        self.ranges.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.ranges.lock().unwrap().len()
    }
}

pub fn start(body: Vec<u8>) -> RangeServer {
    start_with_options(body, RangeServerOptions::default())
}

pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let ranges = Arc::new(Mutex::new(Vec::new()));
    let served = Arc::new(AtomicUsize::new(0));
    let log = Arc::clone(&ranges);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let log = Arc::clone(&log);
            let served = Arc::clone(&served);
            thread::spawn(move || handle(stream, &body, opts, &log, &served));
        }
    });
    RangeServer {
        url: format!("http://127.0.0.1:{}/fw.bin", port),
        ranges,
    }
}

fn handle(
    mut stream: std::net::TcpStream,
    body: &[u8],
    opts: RangeServerOptions,
    log: &Mutex<Vec<Option<String>>>,
    served: &AtomicUsize,
) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) => return,
        Ok(n) => n,
        Err(_) => return,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => return,
    };
    let (method, range_raw, range) = parse_request(request);
    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        return;
    }
    log.lock().unwrap().push(range_raw);
    let request_no = served.fetch_add(1, Ordering::SeqCst);

    if let Some(code) = opts.status_override {
        let text = reason(code);
        let response = format!(
            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            code,
            text,
            text.len(),
            text
        );
        let _ = stream.write_all(response.as_bytes());
        return;
    }

    let total = body.len() as u64;
    let range = range
        .filter(|_| opts.support_ranges)
        .map(|start| start + opts.range_start_skew);
    let (status, content_range, slice) = match range {
        Some(start) if start >= total => (
            "416 Range Not Satisfiable",
            Some(format!("bytes */{}", total)),
            &body[0..0],
        ),
        Some(start) => (
            "206 Partial Content",
            Some(format!("bytes {}-{}/{}", start, total - 1, total)),
            &body[start as usize..],
        ),
        None => ("200 OK", None, body),
    };
    let mut head = format!("HTTP/1.1 {}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n", status);
    if !opts.omit_content_length {
        head.push_str(&format!("Content-Length: {}\r\n", slice.len()));
    }
    if let Some(cr) = content_range {
        head.push_str(&format!("Content-Range: {}\r\n", cr));
    }
    head.push_str("\r\n");
    if stream.write_all(head.as_bytes()).is_err() {
        return;
    }

    let limit = match opts.drop_after {
        Some(n) if request_no < opts.drop_requests => (n as usize).min(slice.len()),
        _ => slice.len(),
    };
    for piece in slice[..limit].chunks(opts.write_chunk.max(1)) {
        if stream.write_all(piece).is_err() {
            return;
        }
        let _ = stream.flush();
        if let Some(delay) = opts.chunk_delay {
            thread::sleep(delay);
        }
    }
    if limit < slice.len() {
        let _ = stream.shutdown(std::net::Shutdown::Both);
    }
}

fn reason(code: u16) -> &'static str {
    match code {
        404 => "Not Found",
        403 => "Forbidden",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Error",
    }
}

/// Returns (method, raw Range header value, start offset of `bytes=<start>-`).
fn parse_request(request: &str) -> (&str, Option<String>, Option<u64>) {
    let mut method = "";
    let mut raw = None;
    let mut start = None;
    for line in request.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if method.is_empty() {
            method = line.split_whitespace().next().unwrap_or("");
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                let value = value.trim();
                raw = Some(value.to_string());
                if let Some(bounds) = value.strip_prefix("bytes=") {
                    if let Some((a, _)) = bounds.split_once('-') {
                        start = a.trim().parse::<u64>().ok();
                    }
                }
            }
        }
    }
    (method, raw, start)
}
