//! URL normalization shared by analysis and rewriting.
//!
//! One canonical form for every URL the engine compares:
//! - scheme and host are stripped for the site's own hosts
//! - scheme and host of other absolute URLs are lower-cased
//! - runs of `/` collapse to one, except the `://` separator
//! - a trailing `/` is dropped, except for the root path
//! - query and fragment are kept verbatim

use url::Url;

/// Scheme + authority split off the front of an absolute URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Authority<'a> {
    /// Lower-cased scheme, empty for protocol-relative URLs
    pub scheme: String,
    /// Lower-cased `host[:port]`
    pub authority: String,
    /// Lower-cased host without port
    pub host: String,
    /// Everything after the authority
    pub rest: &'a str,
}

/// Normalize one URL.
pub fn normalize_url(raw: &str, site_hosts: &[String]) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let (prefix, rest) = match split_authority(trimmed) {
        Some(parts) if is_site_host(&parts.host, site_hosts) => (String::new(), parts.rest),
        Some(parts) if parts.scheme.is_empty() => (format!("//{}", parts.authority), parts.rest),
        Some(parts) => (format!("{}://{}", parts.scheme, parts.authority), parts.rest),
        None => (String::new(), trimmed),
    };

    let tail_at = rest.find(['?', '#']).unwrap_or(rest.len());
    let (path, tail) = rest.split_at(tail_at);

    let mut path = collapse_slashes(path);
    if prefix.is_empty() && !path.starts_with('/') {
        path.insert(0, '/');
    }
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    if !prefix.is_empty() && path == "/" {
        path.clear();
    }

    format!("{prefix}{path}{tail}")
}

/// Collapse every run of `/` into a single `/`.
pub fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if !prev_slash {
                out.push(c);
            }
            prev_slash = true;
        } else {
            out.push(c);
            prev_slash = false;
        }
    }
    out
}

/// True if `host` is one of the site's hosts, treating `www.` as optional.
pub fn is_site_host(host: &str, site_hosts: &[String]) -> bool {
    let host = strip_www(host);
    site_hosts
        .iter()
        .any(|h| strip_www(h).eq_ignore_ascii_case(host))
}

fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// Split `scheme://authority` (or `//authority`) off the front of `raw`.
pub(crate) fn split_authority(raw: &str) -> Option<Authority<'_>> {
    let (scheme, after) = if let Some(after) = raw.strip_prefix("//") {
        (String::new(), after)
    } else {
        let sep = raw.find("://")?;
        let scheme = &raw[..sep];
        let valid_scheme = !scheme.is_empty()
            && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !valid_scheme {
            return None;
        }
        (scheme.to_ascii_lowercase(), &raw[sep + 3..])
    };

    let end = after.find(['/', '?', '#']).unwrap_or(after.len());
    let authority = &after[..end];
    if authority.is_empty() {
        return None;
    }

    let probe = format!(
        "{}://{}",
        if scheme.is_empty() { "http" } else { scheme.as_str() },
        authority
    );
    let host = Url::parse(&probe).ok()?.host_str()?.to_ascii_lowercase();

    // `//old-page` is a doubled path slash, `//cdn.example.com` is a host
    if scheme.is_empty() && !host.contains('.') && host != "localhost" {
        return None;
    }

    Some(Authority {
        scheme,
        authority: authority.to_ascii_lowercase(),
        host,
        rest: &after[end..],
    })
}

/// True for characters that continue a URL path segment.
pub(crate) fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~' | '%' | '+')
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hosts() -> Vec<String> {
        vec!["example.com".to_string()]
    }

    #[test]
    fn strips_site_host_and_trailing_slash() {
        assert_eq!(normalize_url("https://example.com/old-page/", &hosts()), "/old-page");
        assert_eq!(normalize_url("http://WWW.Example.com/a", &hosts()), "/a");
        assert_eq!(normalize_url("//example.com/a/", &hosts()), "/a");
    }

    #[test]
    fn keeps_external_hosts_lowercased() {
        assert_eq!(
            normalize_url("HTTPS://Other.ORG/Path/", &hosts()),
            "https://other.org/Path"
        );
        assert_eq!(normalize_url("https://other.org/", &hosts()), "https://other.org");
    }

    #[test]
    fn collapses_duplicate_slashes() {
        assert_eq!(normalize_url("//old//page///", &[]), "/old/page");
        assert_eq!(normalize_url("https://other.org//a//b", &hosts()), "https://other.org/a/b");
    }

    #[test]
    fn adds_leading_slash_and_keeps_root() {
        assert_eq!(normalize_url("old-page", &[]), "/old-page");
        assert_eq!(normalize_url("/", &[]), "/");
        assert_eq!(normalize_url("https://example.com", &hosts()), "/");
    }

    #[test]
    fn query_and_fragment_survive() {
        assert_eq!(normalize_url("/a/?x=1//2#top", &[]), "/a?x=1//2#top");
    }

    #[test]
    fn rejects_bogus_schemes() {
        assert!(split_authority("1http://x.com").is_none());
        assert!(split_authority("/path").is_none());
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(raw in "[a-z/:.?=#-]{0,40}") {
            let once = normalize_url(&raw, &hosts());
            let twice = normalize_url(&once, &hosts());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn no_double_slash_in_normalized_paths(path in "(/{1,3}[a-z0-9-]{1,6}){1,5}/{0,3}") {
            let normalized = normalize_url(&path, &[]);
            prop_assert!(!normalized.contains("//"));
        }
    }
}
