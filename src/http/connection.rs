use crate::prelude::*;

#[derive(Debug, PartialEq)]
pub enum ConnState {
    /// Accumulating bytes until the parser yields a complete request.
    ReadingRequest,
    /// A CGI child owns this request; no further parsing until it is reaped.
    AwaitingCgi,
    /// Draining the write buffer (and any in-progress file stream).
    WritingResponse,
}

#[derive(Debug)]
pub enum ActiveAction {
    /// A static file being streamed into the write buffer chunk by chunk.
    FileStream { file: File, remaining: usize },
    None,
}

#[derive(Debug)]
pub struct Connection {
    pub stream: TcpStream,
    pub read_buf: Vec<u8>,
    pub write_buf: Vec<u8>,
    pub state: ConnState,
    pub action: ActiveAction,
    pub cgi: Option<CgiAttachment>,
    pub close_after_write: bool,
    pub peer_closed: bool,
    pub requests_served: u32,
    pub last_activity: Instant,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_buf: Vec::with_capacity(READ_BUF_SIZE),
            write_buf: Vec::new(),
            state: ConnState::ReadingRequest,
            action: ActiveAction::None,
            cgi: None,
            close_after_write: false,
            peer_closed: false,
            requests_served: 0,
            last_activity: Instant::now(),
        }
    }

    /// Drains the socket into the read buffer, stopping at `cap` bytes.
    /// Returns true when the peer closed its write half.
    pub fn fill_read_buf(&mut self, cap: usize) -> io::Result<bool> {
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            if self.read_buf.len() >= cap {
                return Ok(false);
            }
            match self.stream.read(&mut buf) {
                Ok(0) => return Ok(true),
                Ok(n) => self.read_buf.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Flushes the write buffer, refilling it from an in-progress file stream
    /// whenever it runs dry. Returns true on a fatal socket error.
    pub fn flush_write_buf(&mut self) -> bool {
        loop {
            if self.write_buf.is_empty() && !self.refill_from_file() {
                return false;
            }
            match self.stream.write(&self.write_buf) {
                Ok(0) => return true,
                Ok(n) => {
                    self.write_buf.drain(..n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return false,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => return true,
            }
        }
    }

    fn refill_from_file(&mut self) -> bool {
        if let ActiveAction::FileStream { file, remaining } = &mut self.action {
            let mut chunk = [0u8; FILE_CHUNK_SIZE];
            match file.read(&mut chunk) {
                Ok(0) => {
                    self.action = ActiveAction::None;
                    false
                }
                Ok(n) => {
                    self.write_buf.extend_from_slice(&chunk[..n]);
                    *remaining = remaining.saturating_sub(n);
                    if *remaining == 0 {
                        self.action = ActiveAction::None;
                    }
                    true
                }
                Err(_) => {
                    self.action = ActiveAction::None;
                    self.close_after_write = true;
                    false
                }
            }
        } else {
            false
        }
    }

    /// Serializes `res` into the write buffer and applies the keep-alive
    /// policy: reuse only when the request allowed it, the response does not
    /// force a close, and the per-connection request budget is not spent.
    pub fn queue_response(&mut self, mut res: HttpResponse, request_keep_alive: bool) {
        let keep = request_keep_alive
            && self.requests_served + 1 < KEEP_ALIVE_MAX_REQUESTS
            && self.headers_allow_reuse(&res);
        if keep {
            res.set_header("connection", "keep-alive");
            res.set_header("keep-alive", "timeout=5, max=100");
        } else {
            res.set_header("connection", "close");
            self.close_after_write = true;
        }
        self.requests_served += 1;
        self.write_buf.extend_from_slice(&res.to_bytes());
        self.state = ConnState::WritingResponse;
    }

    fn headers_allow_reuse(&self, res: &HttpResponse) -> bool {
        res.headers
            .get("connection")
            .map(|v| !v.eq_ignore_ascii_case("close"))
            .unwrap_or(true)
    }

    /// Exactly one direction is armed per client socket at any moment.
    pub fn interest(&self) -> Interest {
        match self.state {
            ConnState::WritingResponse => Interest::WRITABLE,
            _ => Interest::READABLE,
        }
    }

    pub fn response_drained(&self) -> bool {
        self.write_buf.is_empty() && matches!(self.action, ActiveAction::None)
    }

    pub fn should_close(&self) -> bool {
        self.close_after_write && self.response_drained()
    }

    pub fn reset_for_next_request(&mut self) {
        self.state = ConnState::ReadingRequest;
        self.action = ActiveAction::None;
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}
