//! Address helpers

use std::sync::OnceLock;

use regex::Regex;

static SCHEME_OR_PATH: OnceLock<Regex> = OnceLock::new();

/// Strip a leading scheme and any path from a URL-ish string.
///
/// `https://api.example.com:8080/ws` becomes `api.example.com:8080`; a bare
/// host is returned unchanged.
pub fn host_from_url(url: &str) -> String {
    let re = SCHEME_OR_PATH.get_or_init(|| Regex::new(r"(.*://)|/.*").expect("Invalid regex"));
    re.replace_all(url.trim(), "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_from_url() {
        assert_eq!(host_from_url("https://apollo.example.com"), "apollo.example.com");
        assert_eq!(host_from_url("http://localhost:1970/oauth/token"), "localhost:1970");
        assert_eq!(host_from_url("localhost:1970"), "localhost:1970");
        assert_eq!(host_from_url("localhost:1970/ws"), "localhost:1970");
        assert_eq!(host_from_url(" ws://10.0.0.2 "), "10.0.0.2");
    }
}
