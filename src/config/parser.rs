use super::lexer::{Token, TokenKind, tokenize};
use super::{Config, ConfigError, Location, Redirect};

/// Parses a configuration file: exactly one `server { ... }` block with
/// `;`-terminated directives and nested `location <prefix> { ... }` blocks.
pub fn parse(source: &str) -> Result<Config, ConfigError> {
    let mut parser = Parser {
        tokens: tokenize(source),
        pos: 0,
    };
    let config = parser.parse_server_block()?;
    if parser.peek().is_some() {
        return Err(parser.error("only one server block is supported"));
    }
    Ok(config)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn error(&self, message: &str) -> ConfigError {
        ConfigError::Syntax {
            line: self.line(),
            message: message.to_string(),
        }
    }

    fn expect_word(&mut self, what: &str) -> Result<String, ConfigError> {
        match self.advance() {
            Some(Token { kind: TokenKind::Word(w), .. }) => Ok(w),
            _ => Err(self.error(&format!("expected {}", what))),
        }
    }

    fn expect_open_brace(&mut self) -> Result<(), ConfigError> {
        match self.advance() {
            Some(Token { kind: TokenKind::OpenBrace, .. }) => Ok(()),
            _ => Err(self.error("expected '{'")),
        }
    }

    fn expect_semicolon(&mut self) -> Result<(), ConfigError> {
        match self.advance() {
            Some(Token { kind: TokenKind::Semicolon, .. }) => Ok(()),
            _ => Err(self.error("expected ';'")),
        }
    }

    fn parse_server_block(&mut self) -> Result<Config, ConfigError> {
        let keyword = self.expect_word("'server'")?;
        if keyword != "server" {
            return Err(self.error(&format!("unknown top-level directive '{}'", keyword)));
        }
        self.expect_open_brace()?;

        let mut config = Config::default();
        config.ports.clear(); // the default port applies only when no listen directive is given

        loop {
            match self.peek().map(|t| t.kind.clone()) {
                Some(TokenKind::CloseBrace) => {
                    self.advance();
                    break;
                }
                Some(TokenKind::Word(_)) => self.parse_server_directive(&mut config)?,
                Some(_) => return Err(self.error("expected directive or '}'")),
                None => return Err(self.error("unterminated server block")),
            }
        }

        if config.ports.is_empty() {
            config.ports.push(super::DEFAULT_PORT);
        }
        Ok(config)
    }

    fn parse_server_directive(&mut self, config: &mut Config) -> Result<(), ConfigError> {
        let name = self.expect_word("directive name")?;
        match name.as_str() {
            "listen" => {
                let word = self.expect_word("port number")?;
                config.ports.push(self.parse_port(&word)?);
                self.expect_semicolon()?;
            }
            "host" => {
                config.host = self.expect_word("host address")?;
                self.expect_semicolon()?;
            }
            "root" => {
                config.root = self.expect_word("root path")?;
                self.expect_semicolon()?;
            }
            "client_max_body_size" => {
                let word = self.expect_word("byte count")?;
                config.client_max_body_size = word
                    .parse()
                    .map_err(|_| self.error(&format!("invalid byte count '{}'", word)))?;
                self.expect_semicolon()?;
            }
            "error_page" => {
                let code_word = self.expect_word("status code")?;
                let code = self.parse_status_code(&code_word)?;
                let page = self.expect_word("error page path")?;
                config.error_pages.insert(code, page);
                self.expect_semicolon()?;
            }
            "location" => {
                let location = self.parse_location_block()?;
                config.locations.push(location);
            }
            other => return Err(self.error(&format!("unknown directive '{}'", other))),
        }
        Ok(())
    }

    fn parse_location_block(&mut self) -> Result<Location, ConfigError> {
        let prefix = self.expect_word("location prefix")?;
        if !prefix.starts_with('/') {
            return Err(self.error("location prefix must start with '/'"));
        }
        self.expect_open_brace()?;

        let mut location = Location {
            path: prefix,
            ..Default::default()
        };

        loop {
            match self.peek().map(|t| t.kind.clone()) {
                Some(TokenKind::CloseBrace) => {
                    self.advance();
                    break;
                }
                Some(TokenKind::Word(_)) => self.parse_location_directive(&mut location)?,
                Some(_) => return Err(self.error("expected directive or '}'")),
                None => return Err(self.error("unterminated location block")),
            }
        }

        Ok(location)
    }

    fn parse_location_directive(&mut self, location: &mut Location) -> Result<(), ConfigError> {
        let name = self.expect_word("directive name")?;
        match name.as_str() {
            "root" => {
                location.root = Some(self.expect_word("root path")?);
                self.expect_semicolon()?;
            }
            "index" => {
                location.index = self.expect_word("index filename")?;
                self.expect_semicolon()?;
            }
            "methods" => {
                let mut methods = Vec::new();
                loop {
                    let word = match self.peek() {
                        Some(Token { kind: TokenKind::Word(w), .. }) => w.clone(),
                        _ => break,
                    };
                    self.advance();
                    let verb = word.to_ascii_uppercase();
                    if !matches!(verb.as_str(), "GET" | "POST" | "DELETE") {
                        return Err(self.error(&format!("unsupported method '{}'", word)));
                    }
                    methods.push(verb);
                }
                if methods.is_empty() {
                    return Err(self.error("methods requires at least one verb"));
                }
                location.methods = methods;
                self.expect_semicolon()?;
            }
            "cgi_extension" => {
                location.cgi_extension = Some(self.expect_word("extension")?);
                self.expect_semicolon()?;
            }
            "cgi_root" => {
                location.cgi_root = Some(self.expect_word("cgi root path")?);
                self.expect_semicolon()?;
            }
            "upload_dir" => {
                location.upload_dir = Some(self.expect_word("upload directory")?);
                self.expect_semicolon()?;
            }
            "autoindex" => {
                let word = self.expect_word("'on' or 'off'")?;
                location.autoindex = match word.as_str() {
                    "on" => true,
                    "off" => false,
                    _ => return Err(self.error("autoindex takes 'on' or 'off'")),
                };
                self.expect_semicolon()?;
            }
            "return" => {
                let code_word = self.expect_word("redirect code")?;
                let code = self.parse_status_code(&code_word)?;
                if !(300..=399).contains(&code) {
                    return Err(self.error(&format!("'{}' is not a redirect code", code)));
                }
                let url = self.expect_word("redirect target")?;
                location.redirect = Some(Redirect { code, url });
                self.expect_semicolon()?;
            }
            other => return Err(self.error(&format!("unknown location directive '{}'", other))),
        }
        Ok(())
    }

    fn parse_port(&self, word: &str) -> Result<u16, ConfigError> {
        word.parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| self.error(&format!("invalid listen port '{}'", word)))
    }

    fn parse_status_code(&self, word: &str) -> Result<u16, ConfigError> {
        word.parse::<u16>()
            .ok()
            .filter(|c| (100..=599).contains(c))
            .ok_or_else(|| self.error(&format!("invalid status code '{}'", word)))
    }
}
