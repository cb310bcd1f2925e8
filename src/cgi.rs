use crate::prelude::*;

use std::os::fd::{FromRawFd, IntoRawFd};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::process::{Child, Command, ExitStatus, Stdio};

use mio::net::UnixStream;

/// A resolved CGI target: the executable on disk plus the two URI-derived
/// environment values it is entitled to.
#[derive(Debug)]
pub struct CgiScript {
    pub script_path: PathBuf,
    pub script_name: String,
    pub path_info: String,
}

/// Finds the longest prefix of the URI-after-location that names an existing
/// executable under `cgi_root`, splitting only at segment boundaries. The
/// matched prefix becomes SCRIPT_NAME, the remainder PATH_INFO.
pub fn resolve_script(location: &Location, cgi_root: &Path, request_path: &str) -> Option<CgiScript> {
    let rel = request_path
        .strip_prefix(&location.path)?
        .trim_start_matches('/');
    if rel.is_empty() {
        return None;
    }

    let bytes = rel.as_bytes();
    for pos in (1..=rel.len()).rev() {
        if pos < rel.len() && bytes[pos] != b'/' {
            continue;
        }
        if bytes[pos - 1] == b'/' {
            continue;
        }
        let candidate = &rel[..pos];
        let full = cgi_root.join(candidate);
        if is_executable_file(&full) {
            return Some(CgiScript {
                script_path: full,
                script_name: format!("{}/{}", location.path.trim_end_matches('/'), candidate),
                path_info: rel[pos..].to_string(),
            });
        }
    }
    None
}

fn is_executable_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// CGI/1.1 environment for one request.
pub fn build_env(
    request: &HttpRequest,
    script: &CgiScript,
    peer: Option<SocketAddr>,
) -> HashMap<String, String> {
    let mut env = HashMap::new();

    env.insert("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string());
    env.insert("SERVER_PROTOCOL".to_string(), "HTTP/1.1".to_string());
    env.insert("SERVER_SOFTWARE".to_string(), SERVER_SOFTWARE.to_string());
    env.insert("REDIRECT_STATUS".to_string(), "200".to_string());
    env.insert("REQUEST_METHOD".to_string(), request.method.to_string());
    env.insert("SCRIPT_NAME".to_string(), script.script_name.clone());
    env.insert("QUERY_STRING".to_string(), request.query.clone());
    env.insert("PATH_INFO".to_string(), script.path_info.clone());
    env.insert(
        "SERVER_NAME".to_string(),
        request
            .header("host")
            .map(|h| h.split(':').next().unwrap_or(h).to_string())
            .unwrap_or_else(|| "localhost".to_string()),
    );

    if request.method == Method::Post {
        env.insert("CONTENT_LENGTH".to_string(), request.body.len().to_string());
        if let Some(ct) = request.header("content-type") {
            env.insert("CONTENT_TYPE".to_string(), ct.to_string());
        }
    }

    if let Some(addr) = peer {
        env.insert("REMOTE_ADDR".to_string(), addr.ip().to_string());
        env.insert("REMOTE_PORT".to_string(), addr.port().to_string());
    }

    for (key, value) in &request.headers {
        let env_key = format!("HTTP_{}", key.to_uppercase().replace('-', "_"));
        env.insert(env_key, value.clone());
    }

    env
}

#[derive(Debug)]
pub struct CgiAttachment {
    pub child: Child,
    pub stdin_pipe: Option<UnixStream>,
    pub stdout_pipe: UnixStream,
    pub stderr_pipe: UnixStream,
    pub stdin_token: Option<Token>,
    pub stdout_token: Token,
    pub stderr_token: Token,
    /// Request body still to be delivered to the child.
    pub stdin_buf: Vec<u8>,
    pub stdout_buf: Vec<u8>,
    pub stderr_buf: Vec<u8>,
    pub stdout_eof: bool,
    pub exit_status: Option<ExitStatus>,
    pub keep_alive: bool,
    pub started: Instant,
}

/// Spawns the script with its standard descriptors wired to socketpairs whose
/// parent ends join the poll set. The script path itself is the single argv
/// entry; the interpreter comes from the shebang line.
#[allow(clippy::too_many_arguments)]
pub fn spawn_script(
    script: &CgiScript,
    env: HashMap<String, String>,
    body: Vec<u8>,
    keep_alive: bool,
    poll: &Poll,
    next_token: &mut usize,
    cgi_to_client: &mut HashMap<Token, Token>,
    client_token: Token,
) -> io::Result<CgiAttachment> {
    let (parent_in, child_in) = StdUnixStream::pair()?;
    let (parent_out, child_out) = StdUnixStream::pair()?;
    let (parent_err, child_err) = StdUnixStream::pair()?;
    parent_in.set_nonblocking(true)?;
    parent_out.set_nonblocking(true)?;
    parent_err.set_nonblocking(true)?;

    let stdin_file = unsafe { File::from_raw_fd(child_in.into_raw_fd()) };
    let stdout_file = unsafe { File::from_raw_fd(child_out.into_raw_fd()) };
    let stderr_file = unsafe { File::from_raw_fd(child_err.into_raw_fd()) };

    let script_path = script.script_path.canonicalize()?;
    let mut cmd = Command::new(&script_path);
    cmd.envs(env)
        .stdin(Stdio::from(stdin_file))
        .stdout(Stdio::from(stdout_file))
        .stderr(Stdio::from(stderr_file));
    if let Some(dir) = script_path.parent() {
        cmd.current_dir(dir);
    }
    let child = cmd.spawn()?;

    let stdin_pipe = UnixStream::from_std(parent_in);
    let mut stdout_pipe = UnixStream::from_std(parent_out);
    let mut stderr_pipe = UnixStream::from_std(parent_err);

    let stdout_token = Token(*next_token);
    *next_token += 1;
    poll.registry()
        .register(&mut stdout_pipe, stdout_token, Interest::READABLE)?;
    cgi_to_client.insert(stdout_token, client_token);

    let stderr_token = Token(*next_token);
    *next_token += 1;
    poll.registry()
        .register(&mut stderr_pipe, stderr_token, Interest::READABLE)?;
    cgi_to_client.insert(stderr_token, client_token);

    // With no body to deliver, dropping our end right away gives the child
    // EOF on stdin.
    let (stdin_pipe, stdin_token) = if body.is_empty() {
        (None, None)
    } else {
        let mut pipe = stdin_pipe;
        let token = Token(*next_token);
        *next_token += 1;
        poll.registry()
            .register(&mut pipe, token, Interest::WRITABLE)?;
        cgi_to_client.insert(token, client_token);
        (Some(pipe), Some(token))
    };

    Ok(CgiAttachment {
        child,
        stdin_pipe,
        stdout_pipe,
        stderr_pipe,
        stdin_token,
        stdout_token,
        stderr_token,
        stdin_buf: body,
        stdout_buf: Vec::new(),
        stderr_buf: Vec::new(),
        stdout_eof: false,
        exit_status: None,
        keep_alive,
        started: Instant::now(),
    })
}

/// Drives one readiness event on a CGI pipe, then finalizes the exchange if
/// the child has exited and its stdout is drained.
pub fn handle_cgi_event(
    poll: &Poll,
    event: &Event,
    cgi_token: Token,
    client_token: Token,
    conn: &mut Connection,
    cgi_to_client: &mut HashMap<Token, Token>,
    config: &Config,
) {
    let Some(cgi) = conn.cgi.as_mut() else {
        cgi_to_client.remove(&cgi_token);
        return;
    };

    if event.is_readable() && cgi_token == cgi.stdout_token {
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match cgi.stdout_pipe.read(&mut buf) {
                Ok(0) => {
                    cgi.stdout_eof = true;
                    break;
                }
                Ok(n) => cgi.stdout_buf.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => {
                    cgi.stdout_eof = true;
                    break;
                }
            }
        }
    }

    if event.is_readable() && cgi_token == cgi.stderr_token {
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match cgi.stderr_pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => cgi.stderr_buf.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }

    if event.is_writable() && Some(cgi_token) == cgi.stdin_token {
        while !cgi.stdin_buf.is_empty() {
            let Some(pipe) = cgi.stdin_pipe.as_mut() else {
                break;
            };
            match pipe.write(&cgi.stdin_buf) {
                Ok(n) => {
                    cgi.stdin_buf.drain(..n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => {
                    // child closed its stdin early; stop delivering
                    cgi.stdin_buf.clear();
                    break;
                }
            }
        }
        if cgi.stdin_buf.is_empty() {
            if let Some(mut pipe) = cgi.stdin_pipe.take() {
                let _ = poll.registry().deregister(&mut pipe);
            }
            if let Some(token) = cgi.stdin_token.take() {
                cgi_to_client.remove(&token);
            }
        }
    }

    if cgi.exit_status.is_none() {
        if let Ok(status) = cgi.child.try_wait() {
            cgi.exit_status = status;
        }
    }

    try_finalize(poll, client_token, conn, cgi_to_client, config);
}

/// Sweep-driven progress check: catch a child that exited without a final
/// pipe event and drain whatever stdout still holds.
pub fn poll_child(
    poll: &Poll,
    client_token: Token,
    conn: &mut Connection,
    cgi_to_client: &mut HashMap<Token, Token>,
    config: &Config,
) {
    if let Some(cgi) = conn.cgi.as_mut() {
        if cgi.exit_status.is_none() {
            if let Ok(status) = cgi.child.try_wait() {
                cgi.exit_status = status;
            }
        }
        if cgi.exit_status.is_some() && !cgi.stdout_eof {
            let mut buf = [0u8; READ_BUF_SIZE];
            loop {
                match cgi.stdout_pipe.read(&mut buf) {
                    Ok(0) => {
                        cgi.stdout_eof = true;
                        break;
                    }
                    Ok(n) => cgi.stdout_buf.extend_from_slice(&buf[..n]),
                    Err(_) => break,
                }
            }
        }
    }
    try_finalize(poll, client_token, conn, cgi_to_client, config);
}

fn try_finalize(
    poll: &Poll,
    client_token: Token,
    conn: &mut Connection,
    cgi_to_client: &mut HashMap<Token, Token>,
    config: &Config,
) {
    let done = conn
        .cgi
        .as_ref()
        .map(|c| c.stdout_eof && c.exit_status.is_some())
        .unwrap_or(false);
    if !done {
        return;
    }

    let mut cgi = conn.cgi.take().unwrap();
    detach(&mut cgi, poll, cgi_to_client);
    drain_stderr_to_log(&mut cgi);

    let response = match parse_cgi_output(&cgi.stdout_buf) {
        Some(res) => res,
        None => {
            if let Some(status) = cgi.exit_status {
                warn!("cgi produced no valid header block (exit: {})", status);
            }
            error_response(HTTP_INTERNAL_SERVER_ERROR, Some(config))
        }
    };
    conn.queue_response(response, cgi.keep_alive);
    let interest = conn.interest();
    if let Err(e) = poll
        .registry()
        .reregister(&mut conn.stream, client_token, interest)
    {
        errors!("reregister after cgi failed: {}", e);
        conn.close_after_write = true;
    }
}

/// Removes every pipe of the attachment from the poll set and the token map.
pub fn detach(cgi: &mut CgiAttachment, poll: &Poll, cgi_to_client: &mut HashMap<Token, Token>) {
    if let Some(mut pipe) = cgi.stdin_pipe.take() {
        let _ = poll.registry().deregister(&mut pipe);
    }
    if let Some(token) = cgi.stdin_token.take() {
        cgi_to_client.remove(&token);
    }
    let _ = poll.registry().deregister(&mut cgi.stdout_pipe);
    cgi_to_client.remove(&cgi.stdout_token);
    let _ = poll.registry().deregister(&mut cgi.stderr_pipe);
    cgi_to_client.remove(&cgi.stderr_token);
}

fn drain_stderr_to_log(cgi: &mut CgiAttachment) {
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        match cgi.stderr_pipe.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => cgi.stderr_buf.extend_from_slice(&buf[..n]),
            Err(_) => break,
        }
    }
    if !cgi.stderr_buf.is_empty() {
        let text = String::from_utf8_lossy(&cgi.stderr_buf);
        for line in text.lines() {
            errors!("cgi stderr: {}", line);
        }
    }
}

/// Parses the script's stdout: headers up to a CRLF or LF blank line, then
/// the body. `Status` picks the response status; `Content-Type` is
/// mandatory. Returns `None` when no valid header block is present.
pub fn parse_cgi_output(raw: &[u8]) -> Option<HttpResponse> {
    let crlf = find_subsequence(raw, b"\r\n\r\n", 0);
    let lf = find_subsequence(raw, b"\n\n", 0);
    let (header_end, delimiter_len) = match (crlf, lf) {
        (Some(c), Some(l)) if l < c => (l, 2),
        (Some(c), _) => (c, 4),
        (None, Some(l)) => (l, 2),
        (None, None) => return None,
    };

    let head = String::from_utf8_lossy(&raw[..header_end]).into_owned();
    let mut res = HttpResponse::new(HTTP_OK);
    let mut has_content_type = false;

    for line in head.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let (key, value) = line.split_once(':')?;
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        if key.is_empty() {
            return None;
        }

        if key == "status" {
            // "Status: 404 Not Found" supplies the response status line
            let mut parts = value.splitn(2, ' ');
            let code = parts.next().and_then(|s| s.parse().ok()).unwrap_or(HTTP_OK);
            res.status_code = code;
            res.status_text = parts
                .next()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| HttpResponse::status_text(code).to_string());
        } else {
            if key == "content-type" {
                has_content_type = true;
            }
            res.set_header(&key, value);
        }
    }

    if !has_content_type {
        return None;
    }

    res.body = raw[header_end + delimiter_len..].to_vec();
    let length = res.body.len();
    res.set_header("content-length", &length.to_string());
    Some(res)
}

/// Wall-clock budget exceeded: kill and reap the child, discard pending
/// client bytes, answer 504.
pub fn force_timeout(
    poll: &Poll,
    client_token: Token,
    conn: &mut Connection,
    cgi_to_client: &mut HashMap<Token, Token>,
    config: &Config,
) {
    let Some(mut cgi) = conn.cgi.take() else {
        return;
    };

    let _ = cgi.child.kill();
    let _ = cgi.child.wait();
    detach(&mut cgi, poll, cgi_to_client);
    drain_stderr_to_log(&mut cgi);

    conn.read_buf.clear();
    conn.queue_response(error_response(HTTP_GATEWAY_TIMEOUT, Some(config)), false);
    let interest = conn.interest();
    let _ = poll
        .registry()
        .reregister(&mut conn.stream, client_token, interest);
}
