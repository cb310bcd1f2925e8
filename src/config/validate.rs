use std::collections::HashSet;

use super::{Config, ConfigError};

/// Load-time sanity checks. Any failure is fatal before the first bind.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.ports.is_empty() {
        return Err(ConfigError::Invalid(
            "at least one listen port is required".to_string(),
        ));
    }

    let mut seen_ports = HashSet::new();
    for port in &config.ports {
        if !seen_ports.insert(*port) {
            return Err(ConfigError::Invalid(format!(
                "port {} is listed more than once",
                port
            )));
        }
    }

    let mut seen_prefixes = HashSet::new();
    for location in &config.locations {
        if !seen_prefixes.insert(location.path.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "duplicate location prefix '{}'",
                location.path
            )));
        }
    }

    if config.root.is_empty() {
        return Err(ConfigError::Invalid("root must not be empty".to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Location;

    fn config_with_locations(prefixes: &[&str]) -> Config {
        let mut config = Config::default();
        for prefix in prefixes {
            config.locations.push(Location {
                path: prefix.to_string(),
                ..Default::default()
            });
        }
        config
    }

    #[test]
    fn accepts_distinct_prefixes() {
        let config = config_with_locations(&["/", "/upload", "/cgi-bin"]);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn rejects_duplicate_prefixes() {
        let config = config_with_locations(&["/", "/upload", "/upload"]);
        assert!(matches!(validate(&config), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_duplicate_ports() {
        let mut config = Config::default();
        config.ports = vec![8080, 8081, 8080];
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_empty_port_list() {
        let mut config = Config::default();
        config.ports.clear();
        assert!(validate(&config).is_err());
    }
}
