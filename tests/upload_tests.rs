use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;

use origin_server::config::{Config, Location};
use origin_server::handlers::{self, parse_multipart_first_file, sanitize_filename};
use origin_server::http::{HttpRequest, Method};

fn make_request(method: Method, path: &str, body: &[u8], headers: &[(&str, &str)]) -> HttpRequest {
    let mut map = HashMap::new();
    for (k, v) in headers {
        map.insert(k.to_ascii_lowercase(), v.to_string());
    }
    HttpRequest {
        method,
        path: path.to_string(),
        query: String::new(),
        version: "HTTP/1.1".to_string(),
        headers: map,
        body: body.to_vec(),
    }
}

fn upload_location(prefix: &str, dir: &std::path::Path) -> Location {
    Location {
        path: prefix.to_string(),
        methods: vec!["GET".to_string(), "POST".to_string(), "DELETE".to_string()],
        upload_dir: Some(dir.to_str().unwrap().to_string()),
        ..Default::default()
    }
}

#[test]
fn test_sanitize_strips_path_components() {
    assert_eq!(sanitize_filename("report.txt"), "report.txt");
    assert_eq!(sanitize_filename("path/to/report.txt"), "report.txt");
    assert_eq!(sanitize_filename("..\\..\\evil.exe"), "evil.exe");
    assert_eq!(sanitize_filename(".."), "upload");
    assert_eq!(sanitize_filename(""), "upload");
}

#[test]
fn test_multipart_first_file_part() {
    let body = b"--XYZ\r\n\
Content-Disposition: form-data; name=\"file\"; filename=\"notes.txt\"\r\n\
Content-Type: text/plain\r\n\
\r\n\
first part\r\n\
--XYZ\r\n\
Content-Disposition: form-data; name=\"other\"\r\n\
\r\n\
second part\r\n\
--XYZ--\r\n";

    let (filename, data) = parse_multipart_first_file(body, "XYZ").unwrap();
    assert_eq!(filename.as_deref(), Some("notes.txt"));
    assert_eq!(data, b"first part");
}

#[test]
fn test_multipart_survives_binary_content() {
    // part data containing CR, LF and boundary-like fragments
    let payload: Vec<u8> = vec![0, 10, 13, 10, b'-', b'-', b'X', 255, 13, 10, 7];
    let mut body = Vec::new();
    body.extend_from_slice(
        b"--BOUND\r\nContent-Disposition: form-data; name=\"f\"; filename=\"bin.dat\"\r\n\r\n",
    );
    body.extend_from_slice(&payload);
    body.extend_from_slice(b"\r\n--BOUND--\r\n");

    let (filename, data) = parse_multipart_first_file(&body, "BOUND").unwrap();
    assert_eq!(filename.as_deref(), Some("bin.dat"));
    assert_eq!(data, payload);
}

#[test]
fn test_multipart_without_closing_boundary_is_rejected() {
    let body = b"--B\r\nContent-Disposition: form-data; filename=\"a\"\r\n\r\ndata";
    assert!(parse_multipart_first_file(body, "B").is_none());
}

#[test]
fn test_upload_with_uri_filename() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::default();
    let loc = upload_location("/upload", dir.path());

    let req = make_request(
        Method::Post,
        "/upload/test.txt",
        b"hello",
        &[("Content-Type", "text/plain")],
    );
    let res = handlers::handle_upload(&req, &loc, &config);

    assert_eq!(res.status_code, 200);
    assert_eq!(fs::read(dir.path().join("test.txt")).unwrap(), b"hello");
    assert!(String::from_utf8_lossy(&res.body).contains("uploaded"));
}

#[test]
fn test_upload_uri_filename_is_sanitized() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::default();
    let loc = upload_location("/upload", dir.path());

    let req = make_request(Method::Post, "/upload/deep/nested/f.txt", b"x", &[]);
    let res = handlers::handle_upload(&req, &loc, &config);

    assert_eq!(res.status_code, 200);
    assert!(dir.path().join("f.txt").is_file());
}

#[test]
fn test_upload_without_uri_filename_gets_timestamped_name() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::default();
    let loc = upload_location("/upload", dir.path());

    let req = make_request(Method::Post, "/upload", b"payload", &[]);
    let res = handlers::handle_upload(&req, &loc, &config);
    assert_eq!(res.status_code, 200);

    let names: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(names.len(), 1);
    // upload_YYYYMMDD_HHMMSS.txt
    assert!(names[0].starts_with("upload_"));
    assert!(names[0].ends_with(".txt"));
    assert_eq!(fs::read(dir.path().join(&names[0])).unwrap(), b"payload");
}

#[test]
fn test_upload_multipart_body() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::default();
    let loc = upload_location("/upload", dir.path());

    let body = b"--B\r\n\
Content-Disposition: form-data; name=\"file\"; filename=\"from_form.txt\"\r\n\
\r\n\
form content\r\n\
--B--\r\n";
    let req = make_request(
        Method::Post,
        "/upload/from_form.txt",
        body,
        &[("Content-Type", "multipart/form-data; boundary=B")],
    );
    let res = handlers::handle_upload(&req, &loc, &config);

    assert_eq!(res.status_code, 200);
    assert_eq!(
        fs::read(dir.path().join("from_form.txt")).unwrap(),
        b"form content"
    );
}

#[test]
fn test_upload_onto_readonly_file_is_forbidden() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("locked.txt");
    fs::write(&target, "original").unwrap();
    fs::set_permissions(&target, fs::Permissions::from_mode(0o444)).unwrap();

    let config = Config::default();
    let loc = upload_location("/upload", dir.path());
    let req = make_request(Method::Post, "/upload/locked.txt", b"new", &[]);
    let res = handlers::handle_upload(&req, &loc, &config);

    assert_eq!(res.status_code, 403);
    assert_eq!(fs::read(&target).unwrap(), b"original");
}

#[test]
fn test_delete_missing_file_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.root = dir.path().to_str().unwrap().to_string();
    let loc = Location::default();

    let req = make_request(Method::Delete, "/missing.txt", b"", &[]);
    let res = handlers::handle_delete(&req, &loc, &config);
    assert_eq!(res.status_code, 404);
}

#[test]
fn test_delete_readonly_file_is_403() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("readonly.txt");
    fs::write(&target, "keep me").unwrap();
    fs::set_permissions(&target, fs::Permissions::from_mode(0o444)).unwrap();

    let mut config = Config::default();
    config.root = dir.path().to_str().unwrap().to_string();
    let loc = Location::default();

    let req = make_request(Method::Delete, "/readonly.txt", b"", &[]);
    let res = handlers::handle_delete(&req, &loc, &config);
    assert_eq!(res.status_code, 403);
    assert!(target.is_file());
}

#[test]
fn test_delete_existing_file_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("bye.txt");
    fs::write(&target, "x").unwrap();

    let mut config = Config::default();
    config.root = dir.path().to_str().unwrap().to_string();
    let loc = Location::default();

    let req = make_request(Method::Delete, "/bye.txt", b"", &[]);
    let res = handlers::handle_delete(&req, &loc, &config);
    assert_eq!(res.status_code, 200);
    assert!(!target.exists());
    assert!(String::from_utf8_lossy(&res.body).contains("/bye.txt"));
}

#[test]
fn test_delete_directory_is_forbidden() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("subdir")).unwrap();

    let mut config = Config::default();
    config.root = dir.path().to_str().unwrap().to_string();
    let loc = Location::default();

    let req = make_request(Method::Delete, "/subdir", b"", &[]);
    let res = handlers::handle_delete(&req, &loc, &config);
    assert_eq!(res.status_code, 403);
}
