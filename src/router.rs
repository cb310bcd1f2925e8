use crate::prelude::*;

impl Config {
    /// Longest-prefix match of the request path against configured locations.
    /// Duplicate prefixes are rejected at load time, so the winner is unique.
    pub fn find_location(&self, path: &str) -> Option<&Location> {
        self.locations
            .iter()
            .filter(|loc| path.starts_with(&loc.path))
            .max_by_key(|loc| loc.path.len())
    }
}

pub fn effective_root<'a>(config: &'a Config, location: &'a Location) -> &'a str {
    location.root.as_deref().unwrap_or(&config.root)
}

/// Derives a filesystem path by swapping the matched location prefix for the
/// location's root. Directory/index selection stays with the GET handler.
pub fn resolve_path(config: &Config, location: &Location, request_path: &str) -> PathBuf {
    let relative = request_path
        .strip_prefix(&location.path)
        .unwrap_or(request_path);
    let mut path = PathBuf::from(effective_root(config, location));
    path.push(relative.trim_start_matches('/'));
    path
}

/// Paths with a `..` segment never reach the filesystem.
pub fn is_traversal(request_path: &str) -> bool {
    request_path.split('/').any(|segment| segment == "..")
}
