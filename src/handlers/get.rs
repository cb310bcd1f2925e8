use crate::prelude::*;
use crate::router;

/// Serves a static resource. Regular files are not read here; the returned
/// `FileStream` action feeds the write buffer as the socket drains, so a
/// large file never blocks the event loop.
pub fn handle_get(
    request: &HttpRequest,
    location: &Location,
    config: &Config,
) -> (HttpResponse, ActiveAction) {
    let mut path = router::resolve_path(config, location, &request.path);

    if path.is_dir() {
        let index = path.join(&location.index);
        if index.is_file() {
            path = index;
        } else if location.autoindex {
            return (generate_autoindex(&path, &request.path), ActiveAction::None);
        } else {
            return (
                error_response(HTTP_FORBIDDEN, Some(config)),
                ActiveAction::None,
            );
        }
    }

    match File::open(&path) {
        Ok(file) => {
            let metadata = match file.metadata() {
                Ok(m) => m,
                Err(_) => {
                    return (
                        error_response(HTTP_INTERNAL_SERVER_ERROR, Some(config)),
                        ActiveAction::None,
                    );
                }
            };
            let file_size = metadata.len() as usize;
            let mime = get_mime_type(path.extension().and_then(|s| s.to_str()));

            let mut res = HttpResponse::new(HTTP_OK);
            res.set_header("content-length", &file_size.to_string());
            res.set_header("content-type", mime);
            (
                res,
                ActiveAction::FileStream {
                    file,
                    remaining: file_size,
                },
            )
        }
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::NotFound => HTTP_NOT_FOUND,
                ErrorKind::PermissionDenied => HTTP_FORBIDDEN,
                _ => HTTP_INTERNAL_SERVER_ERROR,
            };
            (error_response(code, Some(config)), ActiveAction::None)
        }
    }
}
