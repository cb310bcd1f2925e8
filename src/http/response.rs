use crate::prelude::*;

#[derive(Debug)]
pub struct HttpResponse {
    pub status_code: u16,
    pub status_text: String,
    /// Keys are stored lower-case and rendered Pascal-Case on the wire.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            status_text: Self::status_text(status_code).to_string(),
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn status_text(code: u16) -> &'static str {
        match code {
            200 => "OK",
            201 => "Created",
            204 => "No Content",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            413 => "Payload Too Large",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            504 => "Gateway Timeout",
            _ => "Unknown",
        }
    }

    pub fn set_header(&mut self, key: &str, value: &str) -> &mut Self {
        self.headers
            .insert(key.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn set_body(&mut self, body: Vec<u8>, content_type: &str) -> &mut Self {
        self.headers
            .insert("content-length".to_string(), body.len().to_string());
        self.headers
            .insert("content-type".to_string(), content_type.to_string());
        self.body = body;
        self
    }

    pub fn redirect(code: u16, target_url: &str) -> Self {
        let mut res = HttpResponse::new(code);
        res.set_header("location", target_url);
        res
    }

    /// Serializes status line, headers, blank line and body. `Content-Length`,
    /// `Connection` and `Date` are filled in when the caller did not set them.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status_code, self.status_text).into_bytes();

        for (key, value) in &self.headers {
            out.extend_from_slice(format!("{}: {}\r\n", Self::to_pascal_case(key), value).as_bytes());
        }
        if !self.headers.contains_key("content-length") {
            out.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }
        if !self.headers.contains_key("connection") {
            out.extend_from_slice(b"Connection: close\r\n");
        }
        if !self.headers.contains_key("date") {
            out.extend_from_slice(
                format!("Date: {}\r\n", httpdate::fmt_http_date(SystemTime::now())).as_bytes(),
            );
        }

        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }

    fn to_pascal_case(s: &str) -> String {
        s.split('-')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    None => String::new(),
                    Some(f) => f.to_uppercase().collect::<String>() + chars.as_str(),
                }
            })
            .collect::<Vec<String>>()
            .join("-")
    }
}

pub fn get_mime_type(extension: Option<&str>) -> &'static str {
    match extension {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

/// HTML directory listing for autoindex locations.
pub fn generate_autoindex(path: &Path, original_url: &str) -> HttpResponse {
    let mut names: Vec<String> = Vec::new();
    if let Ok(entries) = path.read_dir() {
        for entry in entries.flatten() {
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
    }
    names.sort();

    let mut html = format!("<html><body><h1>Index of {}</h1><ul>", original_url);
    for name in names {
        html.push_str(&format!(
            "<li><a href=\"{}/{}\">{}</a></li>",
            original_url.trim_end_matches('/'),
            name,
            name
        ));
    }
    html.push_str("</ul></body></html>");

    let mut res = HttpResponse::new(HTTP_OK);
    res.set_body(html.into_bytes(), "text/html");
    res
}

/// Canonical status page: the configured error page when one is set and
/// readable, the built-in template otherwise. Error responses always close
/// the connection.
pub fn error_response(code: u16, config: Option<&Config>) -> HttpResponse {
    let mut res = HttpResponse::new(code);
    res.set_header("connection", "close");

    if let Some(cfg) = config {
        if let Some(page) = cfg.error_pages.get(&code) {
            let path = if Path::new(page).is_absolute() {
                PathBuf::from(page)
            } else {
                Path::new(&cfg.root).join(page.trim_start_matches('/'))
            };
            if let Ok(content) = fs::read(path) {
                res.set_body(content, "text/html");
                return res;
            }
        }
    }

    let text = HttpResponse::status_text(code);
    let body = format!(
        "<html><head><title>{} {}</title></head><body><h1>{} {}</h1></body></html>",
        code, text, code, text
    );
    res.set_body(body.into_bytes(), "text/html");
    res
}
