pub mod delete;
pub mod get;
pub mod post;

pub use delete::*;
pub use get::*;
pub use post::*;

use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::cgi::{self, CgiScript};
use crate::prelude::*;
use crate::router;

enum RoutePlan {
    Inline(HttpResponse, ActiveAction),
    Cgi(CgiScript),
}

/// Routes one complete request and queues its outcome on the connection:
/// either an in-memory response (plus an optional file stream) or a CGI
/// attachment whose pipes join the readiness set.
pub fn dispatch(
    poll: &Poll,
    client_token: Token,
    next_token: &mut usize,
    cgi_to_client: &mut HashMap<Token, Token>,
    conn: &mut Connection,
    config: &Arc<Config>,
    request: HttpRequest,
) -> Result<()> {
    let keep_alive = request.keep_alive();

    // A panicking handler costs one connection, not the server.
    let plan = match catch_unwind(AssertUnwindSafe(|| route(&request, config))) {
        Ok(plan) => plan,
        Err(_) => {
            errors!("handler panicked while serving {} {}", request.method, request.path);
            return Err("handler panic".into());
        }
    };

    match plan {
        RoutePlan::Inline(response, action) => {
            conn.action = action;
            conn.queue_response(response, keep_alive);
        }
        RoutePlan::Cgi(script) => {
            let env = cgi::build_env(&request, &script, conn.stream.peer_addr().ok());
            match cgi::spawn_script(
                &script,
                env,
                request.body,
                keep_alive,
                poll,
                next_token,
                cgi_to_client,
                client_token,
            ) {
                Ok(attachment) => {
                    info!("cgi started: {} (pid {})", script.script_name, attachment.child.id());
                    conn.cgi = Some(attachment);
                    conn.state = ConnState::AwaitingCgi;
                }
                Err(e) => {
                    errors!("cgi spawn failed for {}: {}", script.script_name, e);
                    conn.queue_response(
                        error_response(HTTP_INTERNAL_SERVER_ERROR, Some(config.as_ref())),
                        false,
                    );
                }
            }
        }
    }
    Ok(())
}

fn route(request: &HttpRequest, config: &Config) -> RoutePlan {
    if let Method::Other(verb) = &request.method {
        trace!("unimplemented method {} for {}", verb, request.path);
        return RoutePlan::Inline(
            error_response(HTTP_NOT_IMPLEMENTED, Some(config)),
            ActiveAction::None,
        );
    }
    if router::is_traversal(&request.path) {
        return RoutePlan::Inline(
            error_response(HTTP_FORBIDDEN, Some(config)),
            ActiveAction::None,
        );
    }

    let location = match config.find_location(&request.path) {
        Some(loc) => loc,
        None => {
            return RoutePlan::Inline(
                error_response(HTTP_NOT_FOUND, Some(config)),
                ActiveAction::None,
            );
        }
    };

    if let Some(redirect) = &location.redirect {
        return RoutePlan::Inline(
            HttpResponse::redirect(redirect.code, &redirect.url),
            ActiveAction::None,
        );
    }

    if !request.method.is_allowed(&location.methods) {
        let mut res = error_response(HTTP_METHOD_NOT_ALLOWED, Some(config));
        res.set_header("allow", &location.methods.join(", "));
        return RoutePlan::Inline(res, ActiveAction::None);
    }

    if location.cgi_extension.is_some() {
        let cgi_root = PathBuf::from(
            location
                .cgi_root
                .as_deref()
                .unwrap_or(router::effective_root(config, location)),
        );
        return match cgi::resolve_script(location, &cgi_root, &request.path) {
            Some(script) => RoutePlan::Cgi(script),
            None => RoutePlan::Inline(
                error_response(HTTP_NOT_FOUND, Some(config)),
                ActiveAction::None,
            ),
        };
    }

    match &request.method {
        Method::Get => {
            let (response, action) = get::handle_get(request, location, config);
            RoutePlan::Inline(response, action)
        }
        Method::Post => {
            if location.upload_dir.is_some() {
                RoutePlan::Inline(
                    post::handle_upload(request, location, config),
                    ActiveAction::None,
                )
            } else {
                RoutePlan::Inline(
                    error_response(HTTP_METHOD_NOT_ALLOWED, Some(config)),
                    ActiveAction::None,
                )
            }
        }
        Method::Delete => RoutePlan::Inline(
            delete::handle_delete(request, location, config),
            ActiveAction::None,
        ),
        Method::Other(_) => unreachable!("filtered above"),
    }
}
