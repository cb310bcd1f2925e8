use crate::prelude::*;
use crate::router;

pub fn handle_delete(request: &HttpRequest, location: &Location, config: &Config) -> HttpResponse {
    let path = router::resolve_path(config, location, &request.path);

    if !path.exists() {
        return error_response(HTTP_NOT_FOUND, Some(config));
    }
    if path.is_dir() {
        return error_response(HTTP_FORBIDDEN, Some(config));
    }
    if fs::metadata(&path)
        .map(|m| m.permissions().readonly())
        .unwrap_or(true)
    {
        return error_response(HTTP_FORBIDDEN, Some(config));
    }

    match fs::remove_file(&path) {
        Ok(()) => {
            let mut res = HttpResponse::new(HTTP_OK);
            res.set_body(
                format!(
                    "<html><body><h1>File deleted: {}</h1></body></html>",
                    request.path
                )
                .into_bytes(),
                "text/html",
            );
            res
        }
        Err(e) => match e.kind() {
            ErrorKind::PermissionDenied => error_response(HTTP_FORBIDDEN, Some(config)),
            _ => error_response(HTTP_INTERNAL_SERVER_ERROR, Some(config)),
        },
    }
}
