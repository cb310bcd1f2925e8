use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use origin_server::cgi::{build_env, parse_cgi_output, resolve_script, CgiScript};
use origin_server::config::Location;
use origin_server::http::{HttpRequest, Method};

fn cgi_location(prefix: &str) -> Location {
    Location {
        path: prefix.to_string(),
        cgi_extension: Some(".py".to_string()),
        ..Default::default()
    }
}

fn write_script(dir: &Path, rel: &str, executable: bool) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, "#!/bin/sh\necho hi\n").unwrap();
    let mode = if executable { 0o755 } else { 0o644 };
    fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
}

#[test]
fn test_resolve_script_simple() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "echo.py", true);

    let loc = cgi_location("/cgi-bin");
    let script = resolve_script(&loc, dir.path(), "/cgi-bin/echo.py").unwrap();
    assert_eq!(script.script_name, "/cgi-bin/echo.py");
    assert_eq!(script.path_info, "");
    assert_eq!(script.script_path, dir.path().join("echo.py"));
}

#[test]
fn test_resolve_script_with_path_info() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "echo.py", true);

    let loc = cgi_location("/cgi-bin");
    let script = resolve_script(&loc, dir.path(), "/cgi-bin/echo.py/foo/bar").unwrap();
    assert_eq!(script.script_name, "/cgi-bin/echo.py");
    assert_eq!(script.path_info, "/foo/bar");
}

#[test]
fn test_resolve_script_in_subdirectory() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "tools/run.py", true);

    let loc = cgi_location("/cgi-bin");
    let script = resolve_script(&loc, dir.path(), "/cgi-bin/tools/run.py/x").unwrap();
    assert_eq!(script.script_name, "/cgi-bin/tools/run.py");
    assert_eq!(script.path_info, "/x");
}

#[test]
fn test_resolve_script_requires_executable() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "plain.py", false);

    let loc = cgi_location("/cgi-bin");
    assert!(resolve_script(&loc, dir.path(), "/cgi-bin/plain.py").is_none());
}

#[test]
fn test_resolve_script_missing_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let loc = cgi_location("/cgi-bin");
    assert!(resolve_script(&loc, dir.path(), "/cgi-bin/ghost.py").is_none());
    assert!(resolve_script(&loc, dir.path(), "/cgi-bin/").is_none());
}

fn make_request(method: Method, path: &str, query: &str, body: &[u8]) -> HttpRequest {
    let mut headers = HashMap::new();
    headers.insert("host".to_string(), "example.test:8080".to_string());
    headers.insert("content-type".to_string(), "text/plain".to_string());
    headers.insert("x-forwarded-for".to_string(), "10.0.0.1".to_string());
    HttpRequest {
        method,
        path: path.to_string(),
        query: query.to_string(),
        version: "HTTP/1.1".to_string(),
        headers,
        body: body.to_vec(),
    }
}

fn make_script() -> CgiScript {
    CgiScript {
        script_path: "/srv/cgi/echo.py".into(),
        script_name: "/cgi-bin/echo.py".to_string(),
        path_info: String::new(),
    }
}

#[test]
fn test_build_env_for_post() {
    let req = make_request(Method::Post, "/cgi-bin/echo.py", "q=1", b"ping");
    let env = build_env(&req, &make_script(), None);

    assert_eq!(env.get("GATEWAY_INTERFACE").unwrap(), "CGI/1.1");
    assert_eq!(env.get("SERVER_PROTOCOL").unwrap(), "HTTP/1.1");
    assert_eq!(env.get("REDIRECT_STATUS").unwrap(), "200");
    assert_eq!(env.get("REQUEST_METHOD").unwrap(), "POST");
    assert_eq!(env.get("SCRIPT_NAME").unwrap(), "/cgi-bin/echo.py");
    assert_eq!(env.get("QUERY_STRING").unwrap(), "q=1");
    assert_eq!(env.get("PATH_INFO").unwrap(), "");
    assert_eq!(env.get("CONTENT_LENGTH").unwrap(), "4");
    assert_eq!(env.get("CONTENT_TYPE").unwrap(), "text/plain");
    assert_eq!(env.get("SERVER_NAME").unwrap(), "example.test");
    // request headers pass through with the HTTP_ prefix
    assert_eq!(env.get("HTTP_X_FORWARDED_FOR").unwrap(), "10.0.0.1");
}

#[test]
fn test_build_env_for_get_omits_content_fields() {
    let req = make_request(Method::Get, "/cgi-bin/echo.py", "", b"");
    let env = build_env(&req, &make_script(), None);
    assert_eq!(env.get("REQUEST_METHOD").unwrap(), "GET");
    assert_eq!(env.get("QUERY_STRING").unwrap(), "");
    assert!(env.get("CONTENT_LENGTH").is_none());
}

#[test]
fn test_parse_cgi_output_crlf() {
    let raw = b"Content-Type: text/plain\r\nX-Extra: yes\r\n\r\nping";
    let res = parse_cgi_output(raw).unwrap();
    assert_eq!(res.status_code, 200);
    assert_eq!(res.headers.get("content-type").map(String::as_str), Some("text/plain"));
    assert_eq!(res.headers.get("x-extra").map(String::as_str), Some("yes"));
    assert_eq!(res.body, b"ping");
}

#[test]
fn test_parse_cgi_output_lf_only() {
    let raw = b"Content-Type: text/html\n\n<h1>hi</h1>";
    let res = parse_cgi_output(raw).unwrap();
    assert_eq!(res.body, b"<h1>hi</h1>");
}

#[test]
fn test_parse_cgi_output_status_header() {
    let raw = b"Status: 404 Not Found\r\nContent-Type: text/plain\r\n\r\ngone";
    let res = parse_cgi_output(raw).unwrap();
    assert_eq!(res.status_code, 404);
    assert_eq!(res.status_text, "Not Found");
    // the pseudo-header is consumed, not forwarded
    assert!(!res.headers.contains_key("status"));
}

#[test]
fn test_parse_cgi_output_headers_then_no_body() {
    let raw = b"Content-Type: text/plain\r\n\r\n";
    let res = parse_cgi_output(raw).unwrap();
    assert_eq!(res.status_code, 200);
    assert!(res.body.is_empty());
    assert_eq!(res.headers.get("content-length").map(String::as_str), Some("0"));
}

#[test]
fn test_parse_cgi_output_without_content_type_is_invalid() {
    assert!(parse_cgi_output(b"X-Thing: 1\r\n\r\nbody").is_none());
}

#[test]
fn test_parse_cgi_output_without_header_block_is_invalid() {
    assert!(parse_cgi_output(b"").is_none());
    assert!(parse_cgi_output(b"no blank line anywhere").is_none());
}

#[test]
fn test_parse_cgi_output_content_length_matches_body() {
    let raw = b"Content-Type: application/octet-stream\r\n\r\n\x00\x01\x02";
    let res = parse_cgi_output(raw).unwrap();
    assert_eq!(res.headers.get("content-length").map(String::as_str), Some("3"));
    assert_eq!(res.body, b"\x00\x01\x02");
}
