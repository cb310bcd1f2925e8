use std::collections::HashMap;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::fs;
use std::path::Path;

pub mod lexer;
pub mod parser;
pub mod validate;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_ROOT: &str = "./www";
pub const DEFAULT_INDEX: &str = "index.html";
pub const DEFAULT_MAX_BODY_SIZE: usize = 1_048_576; // 1MB

/// One server block, immutable once loaded.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub ports: Vec<u16>,
    pub root: String,
    pub client_max_body_size: usize,
    pub error_pages: HashMap<u16, String>,
    pub locations: Vec<Location>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            ports: vec![DEFAULT_PORT],
            root: DEFAULT_ROOT.to_string(),
            client_max_body_size: DEFAULT_MAX_BODY_SIZE,
            error_pages: HashMap::new(),
            locations: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let source = fs::read_to_string(path).map_err(ConfigError::Io)?;
        let config = parser::parse(&source)?;
        validate::validate(&config)?;
        Ok(config)
    }
}

/// A URI prefix rule selecting server behavior.
#[derive(Debug, Clone)]
pub struct Location {
    pub path: String,
    pub root: Option<String>,
    pub methods: Vec<String>,
    pub index: String,
    pub cgi_extension: Option<String>,
    pub cgi_root: Option<String>,
    pub upload_dir: Option<String>,
    pub autoindex: bool,
    pub redirect: Option<Redirect>,
}

impl Default for Location {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            root: None,
            methods: vec!["GET".to_string()],
            index: DEFAULT_INDEX.to_string(),
            cgi_extension: None,
            cgi_root: None,
            upload_dir: None,
            autoindex: false,
            redirect: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Redirect {
    pub code: u16,
    pub url: String,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Syntax { line: usize, message: String },
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "cannot read configuration: {}", e),
            ConfigError::Syntax { line, message } => {
                write!(f, "configuration syntax error at line {}: {}", line, message)
            }
            ConfigError::Invalid(message) => write!(f, "invalid configuration: {}", message),
        }
    }
}

impl Error for ConfigError {}
