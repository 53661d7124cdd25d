//! Literal URL substitution inside one content item.
//!
//! Matching rules:
//! - keys are tried longest first
//! - a match must sit on path boundaries, so `/page` never matches inside
//!   `/page-extra`, `/blog/page` or `/page/child`
//! - a `/` in a key matches any run of slashes in content, and trailing
//!   slashes after a key are absorbed
//! - absolute URLs on one of the site's hosts match by their path
//! - query strings and fragments after a match are left in place

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::normalize::{is_path_char, is_site_host};
use crate::types::mapping::ResolvedMapping;

lazy_static! {
    static ref DUPLICATE_PROTOCOL: Regex = Regex::new(r"(?i)\b(?:https?:/+)+(https?://)").unwrap();
    static ref ABSOLUTE_URL: Regex = Regex::new(r#"(?i)\bhttps?://[^\s"'<>()]+"#).unwrap();
    static ref URL_ATTRIBUTE: Regex =
        Regex::new(r#"(?i)\b(href|src)(\s*=\s*)(["'])([^"']*)(["'])"#).unwrap();
}

/// A mapping prepared for repeated matching.
#[derive(Debug, Clone)]
pub struct PreparedMapping {
    /// Path keys bucketed by their first path segment, longest first
    by_segment: HashMap<String, Vec<PreparedKey>>,
    /// Absolute (other-host) keys, longest first
    absolute: Vec<PreparedKey>,
}

#[derive(Debug, Clone)]
struct PreparedKey {
    key: String,
    destination: String,
    /// Bytes compared case-insensitively (scheme + authority)
    case_insensitive_len: usize,
    absorbs_trailing_slashes: bool,
}

/// Where a match landed and what replaces it.
struct Match<'a> {
    replace_from: usize,
    end: usize,
    destination: &'a str,
}

impl PreparedMapping {
    pub fn new(mapping: &ResolvedMapping) -> Self {
        let mut by_segment: HashMap<String, Vec<PreparedKey>> = HashMap::new();
        let mut absolute = Vec::new();

        for (key, destination) in mapping.iter() {
            if key.is_empty() {
                continue;
            }
            let absorbs_trailing_slashes = !key.ends_with('/') && !key.contains(['?', '#']);

            if key.starts_with('/') && !key.starts_with("//") {
                let segment = first_segment(key.as_bytes(), 0).to_string();
                by_segment.entry(segment).or_default().push(PreparedKey {
                    key: key.to_string(),
                    destination: destination.to_string(),
                    case_insensitive_len: 0,
                    absorbs_trailing_slashes,
                });
            } else {
                absolute.push(PreparedKey {
                    key: key.to_string(),
                    destination: destination.to_string(),
                    case_insensitive_len: authority_len(key),
                    absorbs_trailing_slashes,
                });
            }
        }

        for keys in by_segment.values_mut() {
            keys.sort_by(|a, b| b.key.len().cmp(&a.key.len()));
        }
        absolute.sort_by(|a, b| b.key.len().cmp(&a.key.len()));

        Self {
            by_segment,
            absolute,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_segment.is_empty() && self.absolute.is_empty()
    }
}

/// Rewrites mapped URLs inside content and repairs malformed URLs.
#[derive(Debug, Clone, Default)]
pub struct ContentRewriter {
    site_hosts: Vec<String>,
}

impl ContentRewriter {
    pub fn new(site_hosts: Vec<String>) -> Self {
        Self { site_hosts }
    }

    /// Replace every mapped URL; returns the new content and the replacement count.
    pub fn replace_urls(&self, content: &str, mapping: &ResolvedMapping) -> (String, usize) {
        self.replace_prepared(content, &PreparedMapping::new(mapping))
    }

    /// Count replacements without building the new content.
    pub fn count_urls(&self, content: &str, mapping: &ResolvedMapping) -> usize {
        self.count_prepared(content, &PreparedMapping::new(mapping))
    }

    pub fn replace_prepared(&self, content: &str, prepared: &PreparedMapping) -> (String, usize) {
        let (out, spans) = self.replace_with_spans(content, prepared);
        (out, spans.len())
    }

    /// Replace mapped URLs, then repair only the URLs a replacement landed in.
    ///
    /// Text outside the rewritten URLs is never touched by the repair.
    pub fn replace_and_repair(&self, content: &str, prepared: &PreparedMapping) -> (String, usize) {
        let (out, spans) = self.replace_with_spans(content, prepared);
        if spans.is_empty() {
            return (out, 0);
        }
        (repair_spans(&out, &spans), spans.len())
    }

    /// Output string plus the byte range of every inserted destination.
    fn replace_with_spans(&self, content: &str, prepared: &PreparedMapping) -> (String, Vec<(usize, usize)>) {
        if prepared.is_empty() {
            return (content.to_string(), Vec::new());
        }

        let bytes = content.as_bytes();
        let mut out = String::with_capacity(content.len());
        let mut spans = Vec::new();
        let mut last = 0;
        let mut i = 0;

        while i < bytes.len() {
            if let Some(m) = self.match_at(bytes, i, prepared) {
                let from = if m.replace_from < last { i } else { m.replace_from };
                out.push_str(&content[last..from]);
                let start = out.len();
                out.push_str(m.destination);
                spans.push((start, out.len()));
                last = m.end;
                i = m.end;
            } else {
                i += 1;
            }
        }
        out.push_str(&content[last..]);

        (out, spans)
    }

    pub fn count_prepared(&self, content: &str, prepared: &PreparedMapping) -> usize {
        if prepared.is_empty() {
            return 0;
        }

        let bytes = content.as_bytes();
        let mut count = 0;
        let mut i = 0;
        while i < bytes.len() {
            match self.match_at(bytes, i, prepared) {
                Some(m) => {
                    count += 1;
                    i = m.end;
                }
                None => i += 1,
            }
        }
        count
    }

    /// Repair URL artifacts; see [`fix_malformed_urls`].
    pub fn fix_malformed_urls(&self, content: &str) -> (String, usize) {
        fix_malformed_urls(content)
    }

    fn match_at<'p>(&self, bytes: &[u8], i: usize, prepared: &'p PreparedMapping) -> Option<Match<'p>> {
        let prev = i.checked_sub(1).map(|p| bytes[p]);

        if bytes[i] == b'/' {
            let site_prefix = self.site_prefix_start(bytes, i);
            let left_ok = match prev {
                None => true,
                Some(p) => !is_path_byte(p) && p != b'/' && p != b':',
            };

            if left_ok || site_prefix.is_some() {
                let mut after_slashes = i;
                while after_slashes < bytes.len() && bytes[after_slashes] == b'/' {
                    after_slashes += 1;
                }
                let segment = first_segment(bytes, after_slashes);
                let buckets = [prepared.by_segment.get(segment), prepared.by_segment.get("")];

                for key in buckets.into_iter().flatten().flatten() {
                    if let Some(end) = match_key(bytes, i, key) {
                        let replace_from = match site_prefix {
                            Some(start) if is_absolute(&key.destination) => start,
                            _ => i,
                        };
                        return Some(Match {
                            replace_from,
                            end,
                            destination: &key.destination,
                        });
                    }
                }
            }
        }

        if !prepared.absolute.is_empty() {
            let left_ok = match prev {
                None => true,
                Some(p) => !is_path_byte(p) && p != b'/' && p != b':',
            };
            if left_ok {
                for key in &prepared.absolute {
                    if let Some(end) = match_key(bytes, i, key) {
                        return Some(Match {
                            replace_from: i,
                            end,
                            destination: &key.destination,
                        });
                    }
                }
            }
        }

        None
    }

    /// Start of a `scheme://site-host` prefix ending right before `i`.
    fn site_prefix_start(&self, bytes: &[u8], i: usize) -> Option<usize> {
        if self.site_hosts.is_empty() {
            return None;
        }

        let mut start = i;
        while start > 0 && is_authority_byte(bytes[start - 1]) {
            start -= 1;
        }
        if start == i || start < 2 || &bytes[start - 2..start] != b"//" {
            return None;
        }

        let authority = std::str::from_utf8(&bytes[start..i]).ok()?;
        let host = authority.rsplit('@').next().unwrap_or(authority);
        let host = host.split(':').next().unwrap_or(host);
        if !is_site_host(host, &self.site_hosts) {
            return None;
        }

        let mut prefix = start - 2;
        for scheme in [&b"https:"[..], &b"http:"[..]] {
            if prefix >= scheme.len() && bytes[prefix - scheme.len()..prefix].eq_ignore_ascii_case(scheme) {
                prefix -= scheme.len();
                break;
            }
        }
        Some(prefix)
    }
}

/// Match `key` at `start`; returns the end of the match including absorbed
/// trailing slashes, or `None` if it is not a whole-URL match.
fn match_key(bytes: &[u8], start: usize, key: &PreparedKey) -> Option<usize> {
    let key_bytes = key.key.as_bytes();
    let mut k = 0;
    let mut p = start;

    while k < key_bytes.len() {
        let kc = key_bytes[k];
        if kc == b'/' {
            while k < key_bytes.len() && key_bytes[k] == b'/' {
                k += 1;
            }
            if p >= bytes.len() || bytes[p] != b'/' {
                return None;
            }
            while p < bytes.len() && bytes[p] == b'/' {
                p += 1;
            }
            continue;
        }

        let cc = *bytes.get(p)?;
        let equal = if k < key.case_insensitive_len {
            cc.eq_ignore_ascii_case(&kc)
        } else {
            cc == kc
        };
        if !equal {
            return None;
        }
        k += 1;
        p += 1;
    }

    let mut end = p;
    if key.absorbs_trailing_slashes {
        while end < bytes.len() && bytes[end] == b'/' {
            end += 1;
        }
    }

    match bytes.get(end) {
        None => Some(end),
        Some(b'/') => None,
        // "see /page." ends a sentence, "/page.html" is another URL
        Some(b'.') => match bytes.get(end + 1) {
            Some(&next) if is_path_byte(next) => None,
            _ => Some(end),
        },
        Some(&c) if is_path_byte(c) => None,
        Some(_) => Some(end),
    }
}

fn first_segment(bytes: &[u8], from: usize) -> &str {
    let mut start = from;
    while start < bytes.len() && bytes[start] == b'/' {
        start += 1;
    }
    let mut end = start;
    while end < bytes.len() && is_path_byte(bytes[end]) {
        end += 1;
    }
    std::str::from_utf8(&bytes[start..end]).unwrap_or("")
}

fn authority_len(key: &str) -> usize {
    let after_scheme = key.find("://").map(|p| p + 3).unwrap_or_else(|| {
        if key.starts_with("//") { 2 } else { 0 }
    });
    key[after_scheme..]
        .find(['/', '?', '#'])
        .map(|p| after_scheme + p)
        .unwrap_or(key.len())
}

fn is_absolute(url: &str) -> bool {
    url.contains("://") || url.starts_with("//")
}

fn is_path_byte(b: u8) -> bool {
    b >= 0x80 || is_path_char(b as char)
}

fn is_authority_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b':' | b'@' | b'[' | b']')
}

// ============================================================================
// Repair
// ============================================================================

/// Repair duplicated protocols and doubled path slashes.
///
/// Covers absolute `http(s)://` URLs anywhere in the text and `href`/`src`
/// attribute values. Protocol-relative `//host` prefixes are kept. Running it
/// on its own output changes nothing.
pub fn fix_malformed_urls(content: &str) -> (String, usize) {
    let mut fixes = 0;

    let content = DUPLICATE_PROTOCOL.replace_all(content, |caps: &Captures| {
        fixes += 1;
        caps[1].to_string()
    });

    let content = ABSOLUTE_URL.replace_all(&content, |caps: &Captures| {
        let url = &caps[0];
        let repaired = repair_absolute(url);
        if repaired != url {
            fixes += 1;
        }
        repaired
    });

    let content = URL_ATTRIBUTE.replace_all(&content, |caps: &Captures| {
        let value = &caps[4];
        let repaired = if value.contains("://") {
            value.to_string()
        } else {
            repair_relative(value)
        };
        if repaired != value {
            fixes += 1;
        }
        format!("{}{}{}{}{}", &caps[1], &caps[2], &caps[3], repaired, &caps[5])
    });

    (content.into_owned(), fixes)
}

fn repair_absolute(url: &str) -> String {
    let Some(sep) = url.find("://") else {
        return url.to_string();
    };
    let authority_start = sep + 3;
    let authority_end = url[authority_start..]
        .find(['/', '?', '#'])
        .map(|p| authority_start + p)
        .unwrap_or(url.len());

    let (head, rest) = url.split_at(authority_end);
    format!("{head}{}", collapse_path(rest))
}

/// Repair the URL tokens that contain `spans`, leaving the rest as is.
fn repair_spans(content: &str, spans: &[(usize, usize)]) -> String {
    let bytes = content.as_bytes();
    let mut tokens: Vec<(usize, usize)> = Vec::new();
    for &(start, end) in spans {
        let mut s = start;
        while s > 0 && !is_token_delimiter(bytes[s - 1]) {
            s -= 1;
        }
        let mut e = end;
        while e < bytes.len() && !is_token_delimiter(bytes[e]) {
            e += 1;
        }
        match tokens.last_mut() {
            Some(last) if s <= last.1 => last.1 = last.1.max(e),
            _ => tokens.push((s, e)),
        }
    }

    let mut out = String::with_capacity(content.len());
    let mut last = 0;
    for (s, e) in tokens {
        out.push_str(&content[last..s]);
        out.push_str(&repair_token(&content[s..e]));
        last = e;
    }
    out.push_str(&content[last..]);
    out
}

fn repair_token(token: &str) -> String {
    let token = DUPLICATE_PROTOCOL.replace_all(token, "$1");
    let absolute = ["http://", "https://"].iter().any(|scheme| {
        token
            .get(..scheme.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(scheme))
    });
    if absolute {
        repair_absolute(&token)
    } else {
        repair_relative(&token)
    }
}

fn is_token_delimiter(b: u8) -> bool {
    b.is_ascii_whitespace() || matches!(b, b'"' | b'\'' | b'<' | b'>' | b'(' | b')')
}

fn repair_relative(value: &str) -> String {
    if let Some(after) = value.strip_prefix("//") {
        let authority_end = after.find(['/', '?', '#']).unwrap_or(after.len());
        let authority = &after[..authority_end];
        if authority.contains('.') || authority.eq_ignore_ascii_case("localhost") {
            return format!("//{authority}{}", collapse_path(&after[authority_end..]));
        }
    }
    collapse_path(value)
}

/// Collapse slash runs before any query or fragment.
///
/// A run right after `http:` or `https:` starts a nested URL (archive and
/// proxy links) and is kept as written.
fn collapse_path(rest: &str) -> String {
    let tail_at = rest.find(['?', '#']).unwrap_or(rest.len());
    let (path, tail) = rest.split_at(tail_at);

    let mut out = String::with_capacity(rest.len());
    for c in path.chars() {
        if c == '/' && out.ends_with('/') && !ends_with_scheme(out.trim_end_matches('/')) {
            continue;
        }
        out.push(c);
    }
    out.push_str(tail);
    out
}

fn ends_with_scheme(s: &str) -> bool {
    let bytes = s.as_bytes();
    [&b"http:"[..], &b"https:"[..]].iter().any(|scheme| {
        bytes.len() >= scheme.len() && bytes[bytes.len() - scheme.len()..].eq_ignore_ascii_case(scheme)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mapping(pairs: &[(&str, &str)]) -> ResolvedMapping {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn rewriter() -> ContentRewriter {
        ContentRewriter::new(vec!["example.com".to_string()])
    }

    #[test]
    fn replaces_href() {
        let (out, n) = rewriter().replace_urls(
            r#"<a href="/old-page">x</a>"#,
            &mapping(&[("/old-page", "/final-page")]),
        );
        assert_eq!(out, r#"<a href="/final-page">x</a>"#);
        assert_eq!(n, 1);
    }

    #[test]
    fn respects_path_boundaries() {
        let m = mapping(&[("/page", "/new")]);
        let content = r#"<a href="/page-extra">a</a> <a href="/blog/page">b</a> <a href="/page/child">c</a> <a href="/page.html">d</a>"#;

        let (out, n) = rewriter().replace_urls(content, &m);
        assert_eq!(n, 0);
        assert_eq!(out, content);
    }

    #[test]
    fn longest_key_wins() {
        let m = mapping(&[("/page", "/a"), ("/page-extra", "/b")]);
        let (out, n) = rewriter().replace_urls(r#"href="/page-extra" href="/page""#, &m);

        assert_eq!(out, r#"href="/b" href="/a""#);
        assert_eq!(n, 2);
    }

    #[test]
    fn catches_slash_variants_and_keeps_query() {
        let m = mapping(&[("/old/page", "/new")]);
        let (out, n) = rewriter().replace_urls("/old/page/ //old//page /old/page?ref=1#top", &m);

        assert_eq!(out, "/new /new /new?ref=1#top");
        assert_eq!(n, 3);
    }

    #[test]
    fn rewrites_absolute_site_urls() {
        let m = mapping(&[("/old", "/new"), ("/gone", "https://other.org/here")]);
        let (out, n) = rewriter().replace_urls(
            "https://example.com/old and http://www.example.com/gone/ and https://elsewhere.com/old",
            &m,
        );

        assert_eq!(
            out,
            "https://example.com/new and https://other.org/here and https://elsewhere.com/old"
        );
        assert_eq!(n, 2);
    }

    #[test]
    fn rewrites_external_absolute_keys() {
        let m = mapping(&[("https://old.org/x", "/local")]);
        let (out, n) = rewriter().replace_urls("see HTTPS://OLD.org/x.", &m);

        assert_eq!(out, "see /local.");
        assert_eq!(n, 1);
    }

    #[test]
    fn replacing_twice_is_a_no_op() {
        let m = mapping(&[("/a", "/b/c"), ("/x", "/a-final")]);
        let (once, n1) = rewriter().replace_urls("/a /x", &m);
        let (twice, n2) = rewriter().replace_urls(&once, &m);

        assert_eq!(n1, 2);
        assert_eq!(n2, 0);
        assert_eq!(once, twice);
    }

    #[test]
    fn count_matches_replace() {
        let m = mapping(&[("/a", "/b")]);
        let content = "/a /a/ /ab";
        assert_eq!(rewriter().count_urls(content, &m), 2);
    }

    #[test]
    fn non_ascii_content_is_safe() {
        let m = mapping(&[("/café", "/coffee")]);
        let (out, n) = rewriter().replace_urls("älter /café ünd", &m);

        assert_eq!(out, "älter /coffee ünd");
        assert_eq!(n, 1);
    }

    #[test]
    fn repairs_duplicate_protocols() {
        let (out, n) = fix_malformed_urls("go to http://https://example.com/a now");
        assert_eq!(out, "go to https://example.com/a now");
        assert_eq!(n, 1);
    }

    #[test]
    fn repairs_doubled_slashes_but_keeps_protocol_relative() {
        let (out, _) = fix_malformed_urls(
            r#"<a href="https://example.com//a//b?q=//x">a</a><img src="//cdn.example.com//img.png"><a href='//old//page'>"#,
        );
        assert_eq!(
            out,
            r#"<a href="https://example.com/a/b?q=//x">a</a><img src="//cdn.example.com/img.png"><a href='/old/page'>"#
        );
    }

    #[test]
    fn repair_leaves_clean_content_alone() {
        let content = r#"<p>Visit <a href="https://example.com/a">us</a> // comment</p>"#;
        let (out, n) = fix_malformed_urls(content);
        assert_eq!(out, content);
        assert_eq!(n, 0);
    }

    #[test]
    fn repair_keeps_nested_urls() {
        let content = r#"<a href="https://web.archive.org/web/2020/https://other.org//page">y</a> <a href="/go/http://x.org/a">z</a>"#;
        let (out, n) = fix_malformed_urls(content);

        assert_eq!(
            out,
            r#"<a href="https://web.archive.org/web/2020/https://other.org/page">y</a> <a href="/go/http://x.org/a">z</a>"#
        );
        assert_eq!(n, 1);
    }

    #[test]
    fn replace_and_repair_only_touches_rewritten_urls() {
        let m = mapping(&[("/old", "/new")]);
        let prepared = PreparedMapping::new(&m);
        let content = r#"<a href="https://example.com//old">a</a> <a href="https://elsewhere.com//keep">b</a> <a href="https://web.archive.org/web/2020/https://other.org/page">c</a>"#;

        let (out, n) = rewriter().replace_and_repair(content, &prepared);

        assert_eq!(n, 1);
        assert_eq!(
            out,
            r#"<a href="https://example.com/new">a</a> <a href="https://elsewhere.com//keep">b</a> <a href="https://web.archive.org/web/2020/https://other.org/page">c</a>"#
        );
    }

    #[test]
    fn replace_and_repair_fixes_duplicate_protocol_around_a_match() {
        let m = mapping(&[("/old", "/new")]);
        let (out, n) = rewriter().replace_and_repair(
            "see http://https://example.com/old.",
            &PreparedMapping::new(&m),
        );

        assert_eq!(n, 1);
        assert_eq!(out, "see https://example.com/new.");
    }

    proptest! {
        #[test]
        fn repair_is_idempotent(
            protocols in "(https?://){1,3}",
            host in "[a-z]{1,5}\\.com",
            path in "(/{1,3}[a-z]{1,4}){0,4}",
        ) {
            let content = format!("<a href=\"{protocols}{host}{path}\">x</a> {protocols}{host}{path}");
            let (once, _) = fix_malformed_urls(&content);
            let (twice, fixes) = fix_malformed_urls(&once);

            prop_assert_eq!(&once, &twice);
            prop_assert_eq!(fixes, 0);
            prop_assert!(!DUPLICATE_PROTOCOL.is_match(&once));
        }
    }
}
