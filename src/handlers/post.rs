use crate::prelude::*;
use crate::router;

/// Persists a POST body into the location's upload directory. The dispatcher
/// only routes here when `upload_dir` is configured.
pub fn handle_upload(request: &HttpRequest, location: &Location, config: &Config) -> HttpResponse {
    let upload_dir = location.upload_dir.as_deref().unwrap_or("");
    let upload_root = if Path::new(upload_dir).is_absolute() {
        PathBuf::from(upload_dir)
    } else {
        Path::new(router::effective_root(config, location)).join(upload_dir)
    };

    let (filename_hint, content) = extract_upload_content(request);

    let filename = if request.path.len() > location.path.len() {
        // POST /upload/name.txt stores under the trailing URI component
        let trailing = request.path[location.path.len()..].trim_start_matches('/');
        sanitize_filename(trailing)
    } else {
        format!(
            "{}_{}.txt",
            sanitize_filename(&filename_hint),
            origin_log::compact_time(SystemTime::now())
        )
    };
    let target = upload_root.join(&filename);

    // A pre-existing symlink may not smuggle the write outside the upload dir.
    if let Ok(meta) = fs::symlink_metadata(&target) {
        if meta.file_type().is_symlink() {
            let resolved = fs::canonicalize(&target);
            let base = fs::canonicalize(&upload_root);
            match (resolved, base) {
                (Ok(resolved), Ok(base)) if resolved.starts_with(&base) => {}
                _ => return error_response(HTTP_FORBIDDEN, Some(config)),
            }
        }
    }
    if let Ok(meta) = fs::metadata(&target) {
        if meta.permissions().readonly() {
            return error_response(HTTP_FORBIDDEN, Some(config));
        }
    }

    match OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&target)
    {
        Ok(mut file) => match file.write_all(&content) {
            Ok(()) => {
                let mut res = HttpResponse::new(HTTP_OK);
                res.set_body(
                    format!(
                        "<html><body><h1>File uploaded as {}</h1></body></html>",
                        target.display()
                    )
                    .into_bytes(),
                    "text/html",
                );
                res
            }
            Err(_) => error_response(HTTP_INTERNAL_SERVER_ERROR, Some(config)),
        },
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            error_response(HTTP_FORBIDDEN, Some(config))
        }
        Err(_) => error_response(HTTP_INTERNAL_SERVER_ERROR, Some(config)),
    }
}

/// The first file part of a multipart body, or the raw body when the request
/// is not multipart.
fn extract_upload_content(request: &HttpRequest) -> (String, Vec<u8>) {
    let content_type = request.header("content-type").unwrap_or("");
    if content_type.starts_with("multipart/form-data") {
        let boundary = content_type
            .split("boundary=")
            .nth(1)
            .map(|b| b.trim().trim_matches('"'))
            .unwrap_or("");
        if !boundary.is_empty() {
            if let Some((filename, data)) = parse_multipart_first_file(&request.body, boundary) {
                return (filename.unwrap_or_else(|| "upload".to_string()), data);
            }
        }
    }
    ("upload".to_string(), request.body.clone())
}

/// Extracts the first file part between `--<boundary>` markers. The part
/// content is treated as opaque bytes so binary payloads survive intact.
pub fn parse_multipart_first_file(
    body: &[u8],
    boundary: &str,
) -> Option<(Option<String>, Vec<u8>)> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let first = find_subsequence(body, &delimiter, 0)?;
    let headers_start = find_subsequence(body, b"\r\n", first)? + 2;
    let headers_end = find_subsequence(body, b"\r\n\r\n", headers_start)?;
    let part_headers = String::from_utf8_lossy(&body[headers_start..headers_end]);
    let info = parse_part_headers(&part_headers);

    let data_start = headers_end + 4;
    let closing = format!("\r\n--{}", boundary).into_bytes();
    let data_end = find_subsequence(body, &closing, data_start)?;

    Some((info.filename, body[data_start..data_end].to_vec()))
}

#[derive(Debug, Default)]
pub struct PartInfo {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: String,
}

pub fn parse_part_headers(headers: &str) -> PartInfo {
    let mut info = PartInfo::default();

    for line in headers.lines() {
        if line.starts_with("Content-Disposition:") {
            if let Some(n) = line.split(';').find(|s| s.trim().starts_with("name=")) {
                info.name = n
                    .split('=')
                    .nth(1)
                    .unwrap_or("")
                    .trim_matches('"')
                    .to_string();
            }
            if let Some(f) = line.split(';').find(|s| s.trim().starts_with("filename=")) {
                info.filename = Some(
                    f.split('=')
                        .nth(1)
                        .unwrap_or("")
                        .trim_matches('"')
                        .to_string(),
                );
            }
        } else if line.starts_with("Content-Type:") {
            info.content_type = line
                .split(':')
                .nth(1)
                .unwrap_or("text/plain")
                .trim()
                .to_string();
        }
    }
    info
}

/// Strips any path separators, keeping only the final component.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit('/').next().unwrap_or(name);
    let base = base.rsplit('\\').next().unwrap_or(base);
    if base.is_empty() || base == "." || base == ".." {
        "upload".to_string()
    } else {
        base.to_string()
    }
}
