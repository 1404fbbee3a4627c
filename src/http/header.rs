//! Response header parsing for [`super::HttpStream`].
//!
//! Rules here mirror what a range-capable HTTP client needs to discover
//! before it can trust a server's `Accept-Ranges` claim: a 200 response to a
//! ranged request means the server ignored the range, and only a 206 with a
//! `Content-Range` total populates the stream's length with certainty.

/// Whether the server has been observed to honor byte-range requests.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum RangeAllowed {
    Unknown,
    Yes,
    No,
}

/// Header-derived facts accumulated across one response.
#[derive(Debug)]
pub(crate) struct HeaderState {
    pub status: u32,
    pub range_allowed: RangeAllowed,
    pub length: Option<u64>,
}

impl HeaderState {
    pub fn new() -> Self {
        HeaderState {
            status: 0,
            range_allowed: RangeAllowed::Unknown,
            length: None,
        }
    }

    /// Resets per-response fields ahead of a fresh request, keeping
    /// `range_allowed` once it has been determined (a server that has
    /// already shown it honors ranges will keep doing so).
    pub fn begin_response(&mut self) {
        self.status = 0;
    }

    /// Feeds one header line (without the trailing CRLF). `requested_offset`
    /// is the byte offset this request's `Range:` header asked for, used to
    /// detect a server silently ignoring the range. Returns `false` if
    /// processing should stop (curl treats that as a header-callback
    /// error), which happens only on a 416 status line.
    pub fn process(&mut self, line: &str, requested_offset: u64) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return true;
        }

        if let Some(status) = parse_status_line(line) {
            self.status = status;
            return status != 416;
        }

        let (key, value) = match line.split_once(':') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => return true,
        };
        if key.is_empty() || value.is_empty() {
            return true;
        }

        if key.eq_ignore_ascii_case("accept-ranges") {
            if self.range_allowed == RangeAllowed::Unknown {
                self.range_allowed = if value.eq_ignore_ascii_case("bytes") {
                    RangeAllowed::Yes
                } else {
                    RangeAllowed::No
                };
            }
        } else if key.eq_ignore_ascii_case("content-range") {
            if self.range_allowed == RangeAllowed::Unknown {
                self.range_allowed = RangeAllowed::Yes;
            }
            if let Some(total) = parse_content_range_total(value) {
                self.length.get_or_insert(total);
            }
        } else if key.eq_ignore_ascii_case("content-length") {
            if self.status == 200 {
                if let Ok(n) = value.parse::<u64>() {
                    self.length.get_or_insert(n);
                }
            }
        }

        if self.status == 200
            && requested_offset != 0
            && self.range_allowed == RangeAllowed::Unknown
        {
            self.range_allowed = RangeAllowed::No;
        }

        true
    }
}

fn parse_status_line(line: &str) -> Option<u32> {
    if !line.starts_with("HTTP/") {
        return None;
    }
    let mut parts = line.splitn(3, ' ');
    let _version = parts.next()?;
    let code = parts.next()?;
    code.parse::<u32>().ok()
}

/// Parses the `TOTAL` out of `bytes A-B/TOTAL`; returns `None` for `*`.
fn parse_content_range_total(value: &str) -> Option<u64> {
    let rest = value.strip_prefix("bytes ")?;
    let (_, total) = rest.split_once('/')?;
    let total = total.trim();
    if total == "*" {
        None
    } else {
        total.parse::<u64>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_parsed() {
        let mut h = HeaderState::new();
        assert!(h.process("HTTP/1.1 206 Partial Content", 100));
        assert_eq!(h.status, 206);
    }

    #[test]
    fn status_416_aborts() {
        let mut h = HeaderState::new();
        assert!(!h.process("HTTP/1.1 416 Range Not Satisfiable", 9999));
    }

    #[test]
    fn accept_ranges_bytes_sets_yes() {
        let mut h = HeaderState::new();
        h.process("HTTP/1.1 200 OK", 0);
        assert!(h.process("Accept-Ranges: bytes", 0));
        assert_eq!(h.range_allowed, RangeAllowed::Yes);
    }

    #[test]
    fn accept_ranges_none_sets_no() {
        let mut h = HeaderState::new();
        h.process("HTTP/1.1 200 OK", 0);
        h.process("Accept-Ranges: none", 0);
        assert_eq!(h.range_allowed, RangeAllowed::No);
    }

    #[test]
    fn ranged_request_answered_200_means_not_allowed() {
        let mut h = HeaderState::new();
        h.process("HTTP/1.1 200 OK", 1000);
        h.process("Content-Length: 5000", 1000);
        assert_eq!(h.range_allowed, RangeAllowed::No);
    }

    #[test]
    fn content_range_sets_length() {
        let mut h = HeaderState::new();
        h.process("HTTP/1.1 206 Partial Content", 100);
        h.process("Content-Range: bytes 100-999/1000", 100);
        assert_eq!(h.length, Some(1000));
        assert_eq!(h.range_allowed, RangeAllowed::Yes);
    }

    #[test]
    fn content_range_unknown_total_leaves_length_none() {
        let mut h = HeaderState::new();
        h.process("HTTP/1.1 206 Partial Content", 0);
        h.process("Content-Range: bytes 0-999/*", 0);
        assert_eq!(h.length, None);
    }

    #[test]
    fn content_length_on_200_sets_length() {
        let mut h = HeaderState::new();
        h.process("HTTP/1.1 200 OK", 0);
        h.process("Content-Length: 4096", 0);
        assert_eq!(h.length, Some(4096));
    }
}
