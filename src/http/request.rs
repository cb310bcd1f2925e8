use crate::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Delete,
    /// A syntactically valid verb this server does not implement (501).
    Other(String),
}

impl Method {
    pub fn from_token(token: &str) -> Method {
        match token {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "DELETE" => Method::Delete,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Other(s) => s.as_str(),
        }
    }

    pub fn is_allowed(&self, allowed: &[String]) -> bool {
        allowed.iter().any(|m| m == self.as_str())
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    MalformedRequestLine,
    UnsupportedVersion,
    MalformedHeader,
    BadContentLength,
    ConflictingFraming,
    MalformedChunk,
    HeadersTooLarge,
    PayloadTooLarge,
}

impl ParseError {
    pub fn status_code(&self) -> u16 {
        match self {
            ParseError::PayloadTooLarge => HTTP_PAYLOAD_TOO_LARGE,
            _ => HTTP_BAD_REQUEST,
        }
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::MalformedRequestLine => write!(f, "malformed request line"),
            ParseError::UnsupportedVersion => write!(f, "unsupported HTTP version"),
            ParseError::MalformedHeader => write!(f, "malformed header line"),
            ParseError::BadContentLength => write!(f, "invalid Content-Length"),
            ParseError::ConflictingFraming => {
                write!(f, "both Content-Length and chunked framing present")
            }
            ParseError::MalformedChunk => write!(f, "malformed chunked body"),
            ParseError::HeadersTooLarge => write!(f, "request head too large"),
            ParseError::PayloadTooLarge => write!(f, "payload too large"),
        }
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub version: String,
    /// Header names are lower-cased on insert.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    pub fn content_length(&self) -> usize {
        self.header("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .map(|v| v.eq_ignore_ascii_case("chunked"))
            .unwrap_or(false)
    }

    pub fn keep_alive(&self) -> bool {
        self.version == "HTTP/1.1"
            && !self
                .header("connection")
                .map(|v| v.eq_ignore_ascii_case("close"))
                .unwrap_or(false)
    }
}

#[derive(Debug)]
pub enum ParseOutcome {
    /// The buffer does not yet hold a complete request.
    NeedMore,
    /// A complete request and the byte count to drain from the buffer.
    Parsed { request: HttpRequest, consumed: usize },
}

/// Attempts to parse one request from the front of `buf`. Bytes past the
/// parsed request are left untouched so a keep-alive connection can pick
/// them up as the start of the next request.
pub fn parse_request(buf: &[u8], max_body_size: usize) -> std::result::Result<ParseOutcome, ParseError> {
    let header_end = match find_subsequence(buf, b"\r\n\r\n", 0) {
        Some(pos) => pos + 4,
        None => {
            if buf.len() > HEADER_HEADROOM {
                return Err(ParseError::HeadersTooLarge);
            }
            return Ok(ParseOutcome::NeedMore);
        }
    };
    if header_end > HEADER_HEADROOM {
        return Err(ParseError::HeadersTooLarge);
    }

    let head = std::str::from_utf8(&buf[..header_end - 4])
        .map_err(|_| ParseError::MalformedHeader)?;
    let mut lines = head.split("\r\n");
    let request_line = lines.next().ok_or(ParseError::MalformedRequestLine)?;
    let mut request = parse_request_line(request_line)?;

    let mut content_length: Option<usize> = None;
    let mut chunked = false;
    for line in lines {
        let sep = line.find(':').ok_or(ParseError::MalformedHeader)?;
        let name = line[..sep].trim();
        if name.is_empty() {
            return Err(ParseError::MalformedHeader);
        }
        let value = line[sep + 1..].trim();
        let key = name.to_ascii_lowercase();
        match key.as_str() {
            "content-length" => {
                if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(ParseError::BadContentLength);
                }
                content_length =
                    Some(value.parse().map_err(|_| ParseError::BadContentLength)?);
            }
            "transfer-encoding" => {
                chunked = value.eq_ignore_ascii_case("chunked");
            }
            _ => {}
        }
        request.headers.insert(key, value.to_string());
    }

    if chunked && content_length.is_some() {
        return Err(ParseError::ConflictingFraming);
    }

    let rest = &buf[header_end..];
    if chunked {
        match decode_chunked(rest, max_body_size)? {
            Some((body, used)) => {
                request.body = body;
                Ok(ParseOutcome::Parsed {
                    request,
                    consumed: header_end + used,
                })
            }
            None => Ok(ParseOutcome::NeedMore),
        }
    } else if let Some(length) = content_length {
        if length > max_body_size {
            return Err(ParseError::PayloadTooLarge);
        }
        if rest.len() < length {
            return Ok(ParseOutcome::NeedMore);
        }
        request.body = rest[..length].to_vec();
        Ok(ParseOutcome::Parsed {
            request,
            consumed: header_end + length,
        })
    } else {
        Ok(ParseOutcome::Parsed {
            request,
            consumed: header_end,
        })
    }
}

fn parse_request_line(line: &str) -> std::result::Result<HttpRequest, ParseError> {
    let parts: Vec<&str> = line.split(' ').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(ParseError::MalformedRequestLine);
    }
    if parts[2] != "HTTP/1.1" {
        return Err(ParseError::UnsupportedVersion);
    }

    let (path, query) = match parts[1].split_once('?') {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (parts[1].to_string(), String::new()),
    };

    Ok(HttpRequest {
        method: Method::from_token(parts[0]),
        path,
        query,
        version: parts[2].to_string(),
        headers: HashMap::new(),
        body: Vec::new(),
    })
}

// A chunk-size line is a short hex number plus optional extensions; anything
// longer than this without a CRLF is garbage, not a slow sender.
const CHUNK_SIZE_LINE_MAX: usize = 1024;

/// Decodes a chunked body from the front of `buf`. Returns the decoded bytes
/// and the encoded length consumed, or `None` when the terminator has not
/// arrived yet.
pub fn decode_chunked(
    buf: &[u8],
    max_body_size: usize,
) -> std::result::Result<Option<(Vec<u8>, usize)>, ParseError> {
    let mut body = Vec::new();
    let mut pos = 0;

    loop {
        let line_end = match find_subsequence(buf, b"\r\n", pos) {
            Some(i) => i,
            None => {
                if buf.len() - pos > CHUNK_SIZE_LINE_MAX {
                    return Err(ParseError::MalformedChunk);
                }
                return Ok(None);
            }
        };
        let line = std::str::from_utf8(&buf[pos..line_end])
            .map_err(|_| ParseError::MalformedChunk)?;
        // chunk extensions after ';' are permitted and ignored
        let size_field = line.split(';').next().unwrap_or("").trim();
        if size_field.is_empty() || !size_field.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseError::MalformedChunk);
        }
        let size =
            usize::from_str_radix(size_field, 16).map_err(|_| ParseError::MalformedChunk)?;
        pos = line_end + 2;

        if size == 0 {
            // trailer lines are skipped up to the terminating blank line
            loop {
                let trailer_end = match find_subsequence(buf, b"\r\n", pos) {
                    Some(i) => i,
                    None => return Ok(None),
                };
                let blank = trailer_end == pos;
                pos = trailer_end + 2;
                if blank {
                    return Ok(Some((body, pos)));
                }
            }
        }

        if body.len() + size > max_body_size {
            return Err(ParseError::PayloadTooLarge);
        }
        if buf.len() < pos + size + 2 {
            return Ok(None);
        }
        body.extend_from_slice(&buf[pos..pos + size]);
        if &buf[pos + size..pos + size + 2] != b"\r\n" {
            return Err(ParseError::MalformedChunk);
        }
        pos += size + 2;
    }
}

pub fn find_subsequence(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}
