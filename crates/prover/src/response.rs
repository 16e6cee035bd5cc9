//! Response completion detection.

use http::StatusCode;

/// Detects when the server has finished responding.
///
/// The prover feeds the parser every piece of application data received from
/// the server and stops waiting for the response once it is complete.
pub trait ResponseParser: Send {
    /// Consumes application data received from the server.
    fn on_data(&mut self, data: &[u8]) -> Result<(), ResponseError>;

    /// Signals that the server closed the connection.
    fn on_close(&mut self) {}

    /// Returns `true` once the response is complete.
    fn is_complete(&self) -> bool;
}

/// HTTP/1.1 response parser.
///
/// Only the framing is parsed: the status line, the headers which determine the
/// body length, and chunked transfer encoding. Interim 1xx responses are
/// skipped.
#[derive(Debug, Default)]
pub struct HttpResponseParser {
    buf: Vec<u8>,
    state: State,
    status: Option<StatusCode>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum State {
    #[default]
    Head,
    Length(usize),
    ChunkSize,
    ChunkData(usize),
    Trailer,
    UntilClose,
    Complete,
}

impl HttpResponseParser {
    /// Creates a new parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the status of the final response, once its head was parsed.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    fn advance(&mut self) -> Result<bool, ResponseError> {
        match self.state {
            State::Head => {
                let Some(end) = find(&self.buf, b"\r\n\r\n") else {
                    return Ok(false);
                };
                let head: Vec<u8> = self.buf.drain(..end + 4).collect();
                self.state = self.parse_head(&head[..end])?;
            }
            State::Length(remaining) => {
                let n = remaining.min(self.buf.len());
                self.buf.drain(..n);
                self.state = match remaining - n {
                    0 => State::Complete,
                    rest => State::Length(rest),
                };
                return Ok(self.state == State::Complete);
            }
            State::ChunkSize => {
                let Some(end) = find(&self.buf, b"\r\n") else {
                    return Ok(false);
                };
                let line: Vec<u8> = self.buf.drain(..end + 2).collect();
                let size = parse_chunk_size(&line[..end])?;
                // Chunk data is followed by a CRLF.
                self.state = if size == 0 {
                    State::Trailer
                } else {
                    State::ChunkData(size + 2)
                };
            }
            State::ChunkData(remaining) => {
                if self.buf.is_empty() {
                    return Ok(false);
                }
                let n = remaining.min(self.buf.len());
                self.buf.drain(..n);
                self.state = match remaining - n {
                    0 => State::ChunkSize,
                    rest => State::ChunkData(rest),
                };
            }
            State::Trailer => {
                let Some(end) = find(&self.buf, b"\r\n") else {
                    return Ok(false);
                };
                self.buf.drain(..end + 2);
                if end == 0 {
                    self.state = State::Complete;
                }
            }
            State::UntilClose => {
                self.buf.clear();
                return Ok(false);
            }
            State::Complete => return Ok(false),
        }

        Ok(true)
    }

    fn parse_head(&mut self, head: &[u8]) -> Result<State, ResponseError> {
        let head = std::str::from_utf8(head).map_err(|_| ResponseError::new("head is not utf-8"))?;
        let mut lines = head.split("\r\n");

        let status_line = lines.next().unwrap_or_default();
        let mut parts = status_line.splitn(3, ' ');
        let (Some(version), Some(code)) = (parts.next(), parts.next()) else {
            return Err(ResponseError::new(format!("malformed status line: {status_line:?}")));
        };
        if !version.starts_with("HTTP/1.") {
            return Err(ResponseError::new(format!("unsupported version: {version:?}")));
        }
        let status = StatusCode::from_bytes(code.as_bytes())
            .map_err(|_| ResponseError::new(format!("invalid status code: {code:?}")))?;

        let mut content_length = None;
        let mut chunked = false;
        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                return Err(ResponseError::new(format!("malformed header: {line:?}")));
            };
            let (name, value) = (name.trim(), value.trim());

            if name.eq_ignore_ascii_case(http::header::CONTENT_LENGTH.as_str()) {
                let len = value
                    .parse::<usize>()
                    .map_err(|_| ResponseError::new(format!("invalid content length: {value:?}")))?;
                content_length = Some(len);
            } else if name.eq_ignore_ascii_case(http::header::TRANSFER_ENCODING.as_str()) {
                chunked = value
                    .rsplit(',')
                    .next()
                    .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
            }
        }

        if status.is_informational() {
            return Ok(State::Head);
        }

        self.status = Some(status);

        Ok(
            if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
                State::Complete
            } else if chunked {
                State::ChunkSize
            } else if let Some(len) = content_length {
                if len == 0 {
                    State::Complete
                } else {
                    State::Length(len)
                }
            } else {
                State::UntilClose
            },
        )
    }
}

impl ResponseParser for HttpResponseParser {
    fn on_data(&mut self, data: &[u8]) -> Result<(), ResponseError> {
        if self.state == State::Complete {
            return Ok(());
        }

        self.buf.extend_from_slice(data);
        while self.advance()? {}

        Ok(())
    }

    fn on_close(&mut self) {
        if self.state == State::UntilClose {
            self.state = State::Complete;
        }
    }

    fn is_complete(&self) -> bool {
        self.state == State::Complete
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, ResponseError> {
    let line =
        std::str::from_utf8(line).map_err(|_| ResponseError::new("chunk size is not utf-8"))?;
    // Chunk extensions are ignored.
    let size = line.split(';').next().unwrap_or_default().trim();
    usize::from_str_radix(size, 16)
        .map_err(|_| ResponseError::new(format!("invalid chunk size: {size:?}")))
}

/// Error for [`ResponseParser`].
#[derive(Debug, thiserror::Error)]
#[error("response error: {0}")]
pub struct ResponseError(String);

impl ResponseError {
    /// Creates a new response error.
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn feed(parser: &mut HttpResponseParser, parts: &[&[u8]]) -> bool {
        for part in parts {
            parser.on_data(part).unwrap();
        }
        parser.is_complete()
    }

    #[rstest]
    #[case::content_length(&[b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello" as &[u8]])]
    #[case::split_head(&[b"HTTP/1.1 200 OK\r\nConte" as &[u8], b"nt-Length: 2\r\n", b"\r\nhi"])]
    #[case::split_body(&[b"HTTP/1.1 200 OK\r\ncontent-length: 4\r\n\r\nab" as &[u8], b"cd"])]
    #[case::empty_body(&[b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n" as &[u8]])]
    #[case::no_content(&[b"HTTP/1.1 204 No Content\r\n\r\n" as &[u8]])]
    #[case::chunked(&[
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n" as &[u8],
    ])]
    #[case::chunked_split(&[
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: gzip, chunked\r\n\r\n3;ext=1\r\nab" as &[u8],
        b"c\r\n",
        b"0\r\nX-Trailer: 1\r\n",
        b"\r\n",
    ])]
    #[case::interim(&[
        b"HTTP/1.1 100 Continue\r\n\r\n" as &[u8],
        b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nx",
    ])]
    fn test_complete(#[case] parts: &[&[u8]]) {
        let mut parser = HttpResponseParser::new();
        assert!(feed(&mut parser, parts));
    }

    #[rstest]
    #[case::partial_head(&[b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n" as &[u8]])]
    #[case::partial_body(&[b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhel" as &[u8]])]
    #[case::partial_chunked(&[
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n" as &[u8],
    ])]
    #[case::until_close(&[b"HTTP/1.1 200 OK\r\n\r\nstreaming" as &[u8]])]
    fn test_incomplete(#[case] parts: &[&[u8]]) {
        let mut parser = HttpResponseParser::new();
        assert!(!feed(&mut parser, parts));
    }

    #[test]
    fn test_close_delimited_completes_on_close() {
        let mut parser = HttpResponseParser::new();
        assert!(!feed(&mut parser, &[b"HTTP/1.1 200 OK\r\n\r\nbody" as &[u8]]));
        parser.on_close();
        assert!(parser.is_complete());
        assert_eq!(parser.status(), Some(StatusCode::OK));
    }

    #[test]
    fn test_malformed_status_line() {
        let mut parser = HttpResponseParser::new();
        assert!(parser.on_data(b"garbage\r\n\r\n").is_err());

        let mut parser = HttpResponseParser::new();
        assert!(parser.on_data(b"HTTP/1.1 abc OK\r\n\r\n").is_err());
    }
}
