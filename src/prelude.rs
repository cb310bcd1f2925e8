pub use crate::cgi::CgiAttachment;
pub use crate::config::{Config, ConfigError, Location, Redirect};
pub use crate::error::{FatalError, Result};
pub use crate::http::*;

pub use mio::{
    Events, Interest, Poll, Token,
    event::Event,
    net::{TcpListener, TcpStream},
};
pub use origin_log::{debug, errors, info, trace, warn};

pub use std::collections::HashMap;
pub use std::fmt::{self, Display};
pub use std::fs::{self, File, OpenOptions};
pub use std::io::{self, ErrorKind, Read, Write};
pub use std::net::SocketAddr;
pub use std::path::{Path, PathBuf};
pub use std::sync::Arc;
pub use std::time::{Duration, Instant, SystemTime};

pub const READ_BUF_SIZE: usize = 4096;
pub const FILE_CHUNK_SIZE: usize = 8192;

/// Extra room on top of `client_max_body_size` for the request head.
pub const HEADER_HEADROOM: usize = 8 * 1024;

pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);
pub const CGI_TIMEOUT: Duration = Duration::from_secs(5);
pub const KEEP_ALIVE_MAX_REQUESTS: u32 = 100;

pub const SERVER_SOFTWARE: &str = "origin-server/0.1";

pub const HTTP_OK: u16 = 200;
pub const HTTP_MOVED_PERMANENTLY: u16 = 301;
pub const HTTP_FOUND: u16 = 302;

// 4xx client errors
pub const HTTP_BAD_REQUEST: u16 = 400;
pub const HTTP_FORBIDDEN: u16 = 403;
pub const HTTP_NOT_FOUND: u16 = 404;
pub const HTTP_METHOD_NOT_ALLOWED: u16 = 405;
pub const HTTP_REQUEST_TIMEOUT: u16 = 408;
pub const HTTP_PAYLOAD_TOO_LARGE: u16 = 413;

// 5xx server errors
pub const HTTP_INTERNAL_SERVER_ERROR: u16 = 500;
pub const HTTP_NOT_IMPLEMENTED: u16 = 501;
pub const HTTP_GATEWAY_TIMEOUT: u16 = 504;
