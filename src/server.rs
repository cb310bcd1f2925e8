use std::process::Child;

use crate::prelude::*;
use crate::{cgi, handlers, timeouts};

/// Owns every descriptor the process polls: listeners, client connections
/// and the CGI pipes attached to them. Connections own their buffers; the
/// maps here are non-owning token indexes.
pub struct Server {
    pub config: Arc<Config>,
    pub listeners: HashMap<Token, TcpListener>,
    pub connections: HashMap<Token, Connection>,
    /// CGI pipe token -> owning client token.
    pub cgi_to_client: HashMap<Token, Token>,
    pub next_token: usize,
    /// Killed children that did not reap immediately; collected each tick.
    pub zombie_purgatory: Vec<Child>,
}

impl Server {
    pub fn new(config: Config, poll: &Poll) -> Result<Server> {
        let mut listeners = HashMap::new();
        let mut next_token = 0;

        for port in &config.ports {
            let addr: SocketAddr = format!("{}:{}", config.host, port).parse()?;
            let mut listener = TcpListener::bind(addr)?;
            let token = Token(next_token);
            next_token += 1;
            poll.registry()
                .register(&mut listener, token, Interest::READABLE)?;
            info!("listening on http://{}", addr);
            listeners.insert(token, listener);
        }

        Ok(Server {
            config: Arc::new(config),
            listeners,
            connections: HashMap::new(),
            cgi_to_client: HashMap::new(),
            next_token,
            zombie_purgatory: Vec::new(),
        })
    }

    pub fn run(&mut self, mut poll: Poll) -> Result<()> {
        let mut events = Events::with_capacity(256);
        loop {
            // the bounded wait doubles as the idle-sweep cadence
            if let Err(e) = poll.poll(&mut events, Some(Duration::from_secs(1))) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            for event in events.iter() {
                let token = event.token();
                if self.listeners.contains_key(&token) {
                    self.accept_clients(&poll, token);
                } else if let Some(&client_token) = self.cgi_to_client.get(&token) {
                    self.handle_cgi_event(&poll, event, token, client_token);
                } else if self.connections.contains_key(&token) {
                    self.handle_client_event(&poll, event, token);
                }
            }

            timeouts::sweep(self, &poll);
            self.reap_zombies();
        }
    }

    fn accept_clients(&mut self, poll: &Poll, token: Token) {
        loop {
            let accepted = match self.listeners.get(&token) {
                Some(listener) => listener.accept(),
                None => return,
            };
            match accepted {
                Ok((mut stream, addr)) => {
                    let client_token = Token(self.next_token);
                    self.next_token += 1;
                    if let Err(e) =
                        poll.registry()
                            .register(&mut stream, client_token, Interest::READABLE)
                    {
                        errors!("cannot register client {}: {}", addr, e);
                        continue;
                    }
                    trace!("accepted connection from {}", addr);
                    self.connections.insert(client_token, Connection::new(stream));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    errors!("accept failed: {}", e);
                    break;
                }
            }
        }
    }

    fn handle_cgi_event(&mut self, poll: &Poll, event: &Event, cgi_token: Token, client_token: Token) {
        let Server {
            connections,
            cgi_to_client,
            config,
            ..
        } = self;

        match connections.get_mut(&client_token) {
            Some(conn) => {
                conn.touch();
                cgi::handle_cgi_event(
                    poll,
                    event,
                    cgi_token,
                    client_token,
                    conn,
                    cgi_to_client,
                    config.as_ref(),
                );
            }
            None => {
                // stale mapping left behind by a dead connection
                cgi_to_client.remove(&cgi_token);
            }
        }
    }

    fn handle_client_event(&mut self, poll: &Poll, event: &Event, token: Token) {
        let Server {
            connections,
            cgi_to_client,
            next_token,
            config,
            zombie_purgatory,
            ..
        } = self;

        let terminate = match connections.get_mut(&token) {
            Some(conn) => drive_client(poll, event, token, next_token, cgi_to_client, conn, config),
            None => return,
        };

        if terminate {
            terminate_connection(poll, connections, cgi_to_client, zombie_purgatory, token);
        } else if let Some(conn) = connections.get_mut(&token) {
            let interest = conn.interest();
            let _ = poll
                .registry()
                .reregister(&mut conn.stream, token, interest);
        }
    }

    fn reap_zombies(&mut self) {
        self.zombie_purgatory
            .retain_mut(|child| !matches!(child.try_wait(), Ok(Some(_))));
    }
}

/// Runs the connection state machine for one readiness event. Returns true
/// when the connection must be destroyed.
fn drive_client(
    poll: &Poll,
    event: &Event,
    token: Token,
    next_token: &mut usize,
    cgi_to_client: &mut HashMap<Token, Token>,
    conn: &mut Connection,
    config: &Arc<Config>,
) -> bool {
    conn.touch();

    if event.is_readable() {
        let cap = config.client_max_body_size + HEADER_HEADROOM;
        match conn.fill_read_buf(cap) {
            Ok(eof) => conn.peer_closed = conn.peer_closed || eof,
            Err(e) => {
                trace!("read error on {:?}: {}", token, e);
                return true;
            }
        }

        if conn.state == ConnState::ReadingRequest {
            if drive_requests(poll, token, next_token, cgi_to_client, conn, config).is_err() {
                return true;
            }
        }

        // EOF with nothing buffered and nothing owed: the peer is gone
        if conn.peer_closed
            && conn.state == ConnState::ReadingRequest
            && conn.read_buf.is_empty()
            && conn.response_drained()
        {
            return true;
        }
    }

    if event.is_writable() && conn.state == ConnState::WritingResponse {
        if conn.flush_write_buf() {
            return true;
        }
        if conn.response_drained() {
            if conn.close_after_write || conn.peer_closed {
                return true;
            }
            conn.reset_for_next_request();
            // bytes past the previous request stay buffered; they may
            // already hold the next request of a keep-alive exchange
            if !conn.read_buf.is_empty()
                && drive_requests(poll, token, next_token, cgi_to_client, conn, config).is_err()
            {
                return true;
            }
        }
    }

    conn.should_close()
}

/// Parses and dispatches as many buffered requests as the state machine
/// allows (at most one response is ever in flight per connection).
fn drive_requests(
    poll: &Poll,
    token: Token,
    next_token: &mut usize,
    cgi_to_client: &mut HashMap<Token, Token>,
    conn: &mut Connection,
    config: &Arc<Config>,
) -> Result<()> {
    while conn.state == ConnState::ReadingRequest && !conn.read_buf.is_empty() {
        match parse_request(&conn.read_buf, config.client_max_body_size) {
            Ok(ParseOutcome::NeedMore) => {
                let cap = config.client_max_body_size + HEADER_HEADROOM;
                if conn.read_buf.len() >= cap {
                    conn.queue_response(
                        error_response(HTTP_PAYLOAD_TOO_LARGE, Some(config.as_ref())),
                        false,
                    );
                } else if conn.peer_closed {
                    // a half request followed by FIN can never complete
                    conn.read_buf.clear();
                    conn.queue_response(
                        error_response(HTTP_BAD_REQUEST, Some(config.as_ref())),
                        false,
                    );
                }
                break;
            }
            Ok(ParseOutcome::Parsed { request, consumed }) => {
                conn.read_buf.drain(..consumed);
                trace!("{} {} parsed ({} bytes)", request.method, request.path, consumed);
                handlers::dispatch(
                    poll,
                    token,
                    next_token,
                    cgi_to_client,
                    conn,
                    config,
                    request,
                )?;
            }
            Err(e) => {
                trace!("parse error: {}", e);
                conn.read_buf.clear();
                conn.queue_response(error_response(e.status_code(), Some(config.as_ref())), false);
                break;
            }
        }
    }
    Ok(())
}

/// Destroys a connection: kills any attached CGI child (unreaped children go
/// to the purgatory), drops the descriptor from the poll set and closes the
/// socket.
pub fn terminate_connection(
    poll: &Poll,
    connections: &mut HashMap<Token, Connection>,
    cgi_to_client: &mut HashMap<Token, Token>,
    zombie_purgatory: &mut Vec<Child>,
    token: Token,
) {
    if let Some(mut conn) = connections.remove(&token) {
        trace!("closing connection {:?}", token);
        if let Some(mut cgi) = conn.cgi.take() {
            let _ = cgi.child.kill();
            cgi::detach(&mut cgi, poll, cgi_to_client);
            match cgi.child.try_wait() {
                Ok(Some(_)) => {}
                _ => zombie_purgatory.push(cgi.child),
            }
        }
        let _ = poll.registry().deregister(&mut conn.stream);
        let _ = conn.stream.shutdown(std::net::Shutdown::Both);
    }
}
