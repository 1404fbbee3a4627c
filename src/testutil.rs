//! A minimal single-purpose HTTP/1.1 server used only by this crate's own
//! tests, standing in for the embeddable test server the original project
//! used to exercise its HTTP range-seek engine against a real socket instead
//! of a mock transport.

#![cfg(test)]

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub(crate) struct TestServer {
    port: u16,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Starts a background server on `127.0.0.1:0` serving `body` for any
    /// GET request. When `supports_ranges` is true, `Range:` requests are
    /// honored with a 206 response and `Accept-Ranges: bytes` is advertised
    /// on every response; otherwise every request gets the full body with
    /// status 200 and no `Accept-Ranges` header.
    pub fn run(body: Vec<u8>, supports_ranges: bool) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
        listener.set_nonblocking(true).unwrap();
        let port = listener.local_addr().unwrap().port();
        let shutdown = Arc::new(AtomicBool::new(false));
        let server_shutdown = shutdown.clone();
        let body = Arc::new(body);

        let handle = thread::Builder::new()
            .name("seekio-test-server".into())
            .spawn(move || {
                while !server_shutdown.load(Ordering::Acquire) {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            let body = body.clone();
                            stream.set_nonblocking(false).unwrap();
                            handle_connection(stream, &body, supports_ranges);
                        }
                        Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                            thread::sleep(std::time::Duration::from_millis(5));
                        }
                        Err(_) => break,
                    }
                }
            })
            .expect("spawn test server thread");

        TestServer { port, shutdown, handle: Some(handle) }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        // Nudge the accept loop so it notices the shutdown flag promptly.
        let _ = TcpStream::connect(("127.0.0.1", self.port));
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

fn handle_connection(stream: TcpStream, body: &[u8], supports_ranges: bool) {
    let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).unwrap_or(0) == 0 {
        return;
    }

    let mut range: Option<(usize, usize)> = None;
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case("range") && supports_ranges {
                range = parse_range(value.trim(), body.len());
            }
        }
    }

    let mut writer = stream;
    let response = match range {
        Some((start, end)) => {
            let chunk = &body[start..=end];
            format!(
                "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes {}-{}/{}\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n",
                start, end, body.len(), chunk.len()
            )
        }
        None => {
            let mut head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n",
                body.len()
            );
            if supports_ranges {
                head.push_str("Accept-Ranges: bytes\r\n");
            }
            head.push_str("\r\n");
            head
        }
    };

    if writer.write_all(response.as_bytes()).is_err() {
        return;
    }
    let payload: &[u8] = match range {
        Some((start, end)) => &body[start..=end],
        None => body,
    };
    let _ = writer.write_all(payload);
    let _ = writer.flush();
}

fn parse_range(value: &str, total: usize) -> Option<(usize, usize)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start: usize = start.trim().parse().ok()?;
    let end: usize = if end.trim().is_empty() {
        total.saturating_sub(1)
    } else {
        end.trim().parse().ok()?
    };
    if start >= total || end >= total || start > end {
        return None;
    }
    Some((start, end))
}
