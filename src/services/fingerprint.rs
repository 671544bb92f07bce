//! Request fingerprinting.
//!
//! The seen-set is keyed by fingerprints, so fingerprints must be stable
//! across runs: two requests that fetch the same resource hash to the same
//! key no matter how their URLs were spelled.

use crate::models::{Fingerprint, WorkUnit};
use sha2::{Digest, Sha256};
use url::Url;

/// Turns a work unit into its deduplication key.
///
/// Implementations must be deterministic across processes. Any
/// `Fn(&WorkUnit) -> Fingerprint` closure is a fingerprinter.
pub trait Fingerprinter: Send + Sync {
    /// Returns the fingerprint of `unit`.
    fn fingerprint(&self, unit: &WorkUnit) -> Fingerprint;
}

impl<F> Fingerprinter for F
where
    F: Fn(&WorkUnit) -> Fingerprint + Send + Sync,
{
    fn fingerprint(&self, unit: &WorkUnit) -> Fingerprint {
        self(unit)
    }
}

/// Default fingerprinter: SHA-256 over method, canonical URL and body.
///
/// The fingerprint is the lowercase hex digest, so default keys are printable
/// and live in the same key space as string override keys.
///
/// # Example
///
/// ```rust
/// use deltafetch::{Fingerprinter, RequestFingerprinter, WorkUnit};
///
/// let a = WorkUnit::get("https://example.com/list?page=2&sort=asc").unwrap();
/// let b = WorkUnit::get("https://EXAMPLE.com:443/list?sort=asc&page=2#top").unwrap();
///
/// let fp = RequestFingerprinter::new();
/// assert_eq!(fp.fingerprint(&a), fp.fingerprint(&b));
/// assert_eq!(fp.fingerprint(&a).as_bytes().len(), 64);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestFingerprinter;

impl RequestFingerprinter {
    /// Creates the default request fingerprinter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Fingerprinter for RequestFingerprinter {
    fn fingerprint(&self, unit: &WorkUnit) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(unit.method.to_uppercase().as_bytes());
        hasher.update([0]);
        hasher.update(canonicalize_url(&unit.url).as_bytes());
        hasher.update([0]);
        hasher.update(unit.body.as_bytes());
        Fingerprint::from(hex::encode(hasher.finalize()))
    }
}

/// Returns the canonical form of a URL for fingerprinting.
///
/// Parsing already lowercases the scheme and host and drops default ports.
/// On top of that the fragment is removed and query arguments are sorted by
/// key, then value; an empty query is dropped entirely.
#[must_use]
pub fn canonicalize_url(url: &Url) -> String {
    let mut canonical = url.clone();
    canonical.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if pairs.is_empty() {
        canonical.set_query(None);
    } else {
        pairs.sort();
        canonical.query_pairs_mut().clear().extend_pairs(pairs);
    }

    canonical.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test_case("https://example.com/a?b=2&a=1", "https://example.com/a?a=1&b=2" ; "sorts query")]
    #[test_case("https://example.com/a#frag", "https://example.com/a" ; "drops fragment")]
    #[test_case("https://example.com/a?", "https://example.com/a" ; "drops empty query")]
    #[test_case("HTTPS://Example.COM:443/a", "https://example.com/a" ; "normalizes scheme host port")]
    #[test_case("https://example.com/a?x=1&x=0", "https://example.com/a?x=0&x=1" ; "sorts repeated keys by value")]
    fn test_canonicalize_url(input: &str, expected: &str) {
        assert_eq!(canonicalize_url(&url(input)), expected);
    }

    #[test]
    fn test_canonicalize_keeps_path_case() {
        assert_eq!(
            canonicalize_url(&url("https://example.com/Books/Index.html")),
            "https://example.com/Books/Index.html"
        );
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let unit = WorkUnit::get("https://example.com/").unwrap();
        let fp = RequestFingerprinter::new().fingerprint(&unit);
        assert_eq!(fp.as_bytes().len(), 64);
        assert!(fp.as_bytes().iter().all(u8::is_ascii_hexdigit));
    }

    #[test]
    fn test_fingerprint_ignores_query_order_and_fragment() {
        let fp = RequestFingerprinter::new();
        let a = WorkUnit::get("https://example.com/p?id=1&lang=en").unwrap();
        let b = WorkUnit::get("https://example.com/p?lang=en&id=1#reviews").unwrap();
        assert_eq!(fp.fingerprint(&a), fp.fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_distinguishes_method_and_body() {
        let fp = RequestFingerprinter::new();
        let get = WorkUnit::get("https://example.com/search").unwrap();
        let post = get.clone().with_method("POST").with_body("q=rust");
        let other_post = get.clone().with_method("POST").with_body("q=go");

        assert_ne!(fp.fingerprint(&get), fp.fingerprint(&post));
        assert_ne!(fp.fingerprint(&post), fp.fingerprint(&other_post));
    }

    #[test]
    fn test_fingerprint_method_is_case_insensitive() {
        let fp = RequestFingerprinter::new();
        let a = WorkUnit::get("https://example.com/").unwrap().with_method("get");
        let b = WorkUnit::get("https://example.com/").unwrap();
        assert_eq!(fp.fingerprint(&a), fp.fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_ignores_meta() {
        let fp = RequestFingerprinter::new();
        let a = WorkUnit::get("https://example.com/").unwrap();
        let b = a.clone().with_meta("depth", 3);
        assert_eq!(fp.fingerprint(&a), fp.fingerprint(&b));
    }

    #[test]
    fn test_closure_fingerprinter() {
        let by_path = |unit: &WorkUnit| Fingerprint::from(unit.url.path());
        let unit = WorkUnit::get("https://example.com/a/b").unwrap();
        assert_eq!(by_path.fingerprint(&unit), Fingerprint::from("/a/b"));
    }
}
