use crate::prelude::*;
use crate::{cgi, server};
use crate::server::Server;

/// Once-per-tick housekeeping: CGI wall-clock budgets, stalled children and
/// idle clients.
pub fn sweep(server: &mut Server, poll: &Poll) {
    let now = Instant::now();
    let Server {
        connections,
        cgi_to_client,
        zombie_purgatory,
        config,
        ..
    } = server;

    let mut expired: Vec<Token> = Vec::new();

    for (token, conn) in connections.iter_mut() {
        if conn.cgi.is_some() {
            let timed_out = conn
                .cgi
                .as_ref()
                .map(|a| a.started.elapsed() > CGI_TIMEOUT)
                .unwrap_or(false);
            if timed_out {
                warn!("cgi timed out after {:?}, killing child", CGI_TIMEOUT);
                cgi::force_timeout(poll, *token, conn, cgi_to_client, config.as_ref());
            } else {
                cgi::poll_child(poll, *token, conn, cgi_to_client, config.as_ref());
            }
            continue;
        }

        if now.duration_since(conn.last_activity) > CLIENT_TIMEOUT {
            let idle_with_nothing_buffered = conn.state == ConnState::ReadingRequest
                && conn.read_buf.is_empty()
                && conn.write_buf.is_empty();
            if idle_with_nothing_buffered || conn.state == ConnState::WritingResponse {
                // nothing promised, or a writer the peer stopped draining
                expired.push(*token);
            } else {
                // a partial request earns an answer before the close
                conn.read_buf.clear();
                conn.queue_response(
                    error_response(HTTP_REQUEST_TIMEOUT, Some(config.as_ref())),
                    false,
                );
                let interest = conn.interest();
                let _ = poll
                    .registry()
                    .reregister(&mut conn.stream, *token, interest);
                conn.touch();
            }
        }
    }

    for token in expired {
        server::terminate_connection(poll, connections, cgi_to_client, zombie_purgatory, token);
    }
}
