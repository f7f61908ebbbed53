//! Open-redirect protection for post-login targets.

use url::Url;

/// A target is safe when, resolved against `host_url`, it uses http(s) and
/// points at exactly the same network location as the portal itself.
pub fn is_safe_redirect_url(host_url: &Url, target: &str) -> bool {
    match host_url.join(target) {
        Ok(redirect_url) => {
            matches!(redirect_url.scheme(), "http" | "https") && netloc(&redirect_url) == netloc(host_url)
        }
        Err(_) => false,
    }
}

/// Picks `next` if safe, then `referrer` if safe, else the root path.
pub fn resolve_safe_redirect(host_url: &Url, next: Option<&str>, referrer: Option<&str>) -> String {
    [next, referrer]
        .into_iter()
        .flatten()
        .find(|target| !target.is_empty() && is_safe_redirect_url(host_url, target))
        .map(str::to_owned)
        .unwrap_or_else(|| "/".to_owned())
}

fn netloc(url: &Url) -> String {
    let mut netloc = String::new();
    if !url.username().is_empty() || url.password().is_some() {
        netloc.push_str(url.username());
        if let Some(password) = url.password() {
            netloc.push(':');
            netloc.push_str(password);
        }
        netloc.push('@');
    }
    if let Some(host) = url.host_str() {
        netloc.push_str(host);
    }
    if let Some(port) = url.port() {
        netloc.push_str(&format!(":{port}"));
    }
    netloc
}

#[cfg(test)]
mod test {
    use url::Url;

    use super::{is_safe_redirect_url, resolve_safe_redirect};

    fn host() -> Url {
        Url::parse("https://af.example.org/").unwrap()
    }

    #[test]
    fn relative_and_same_host_targets_are_safe() {
        assert!(is_safe_redirect_url(&host(), "/jupyterlab"));
        assert!(is_safe_redirect_url(&host(), "profile/edit?tab=1"));
        assert!(is_safe_redirect_url(&host(), "https://af.example.org/admin/users"));
        assert!(is_safe_redirect_url(&host(), "http://af.example.org/about"));
    }

    #[test]
    fn foreign_hosts_and_schemes_are_rejected() {
        assert!(!is_safe_redirect_url(&host(), "https://evil.example.com/"));
        assert!(!is_safe_redirect_url(&host(), "//evil.example.com/phish"));
        assert!(!is_safe_redirect_url(&host(), "https://af.example.org:8443/"));
        assert!(!is_safe_redirect_url(&host(), "https://user@af.example.org/"));
        assert!(!is_safe_redirect_url(&host(), "javascript:alert(1)"));
        assert!(!is_safe_redirect_url(&host(), "ftp://af.example.org/file"));
    }

    #[test]
    fn host_port_is_part_of_the_network_location() {
        let host = Url::parse("http://localhost:5000/").unwrap();

        assert!(is_safe_redirect_url(&host, "http://localhost:5000/profile"));
        assert!(!is_safe_redirect_url(&host, "http://localhost/profile"));
    }

    #[test]
    fn when_next_is_safe_then_next_is_returned_verbatim() {
        let target = resolve_safe_redirect(&host(), Some("/jupyterlab?x=1"), Some("/about"));

        assert_eq!(target, "/jupyterlab?x=1");
    }

    #[test]
    fn when_next_is_unsafe_then_safe_referrer_is_used() {
        let target =
            resolve_safe_redirect(&host(), Some("https://evil.example.com/"), Some("https://af.example.org/hardware"));

        assert_eq!(target, "https://af.example.org/hardware");
    }

    #[test]
    fn when_nothing_is_safe_then_root_is_used() {
        assert_eq!(resolve_safe_redirect(&host(), Some("https://evil.example.com/"), Some("//evil.example.com")), "/");
        assert_eq!(resolve_safe_redirect(&host(), None, None), "/");
        assert_eq!(resolve_safe_redirect(&host(), Some(""), None), "/");
    }
}
