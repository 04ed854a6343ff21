//! Image locator extraction from rendered image elements.
//!
//! Lazy-loading readers park the real URL in a deferred attribute and put a
//! spinner or a 1×1 GIF in `src`. The deferred attribute therefore wins
//! whenever it is present. Locators are resolved against the chapter URL,
//! `data:` URIs are dropped, and duplicates are removed while keeping
//! first-seen (document) order, which is page order.

use reqwest::Url;
use std::collections::HashSet;
use tracing::debug;

/// Deferred-source attributes, checked in this order.
pub const DEFERRED_ATTRIBUTES: [&str; 3] = ["data-src", "data-lazy-src", "data-original"];

/// The two source candidates a renderer reports for one matched element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageElement {
    pub src: Option<String>,
    pub deferred_src: Option<String>,
}

impl ImageElement {
    /// Build from an attribute lookup, picking the first non-empty deferred
    /// attribute in [`DEFERRED_ATTRIBUTES`] order.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let deferred_src = DEFERRED_ATTRIBUTES
            .iter()
            .filter_map(|name| non_empty(lookup(name)))
            .next();
        Self {
            src: non_empty(lookup("src")),
            deferred_src,
        }
    }

    /// The raw locator this element contributes, before resolution.
    pub fn raw_locator(&self) -> Option<&str> {
        self.deferred_src.as_deref().or(self.src.as_deref())
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Ordered, de-duplicated absolute locators for `elements`.
///
/// Relative locators are joined onto `base`; without a base they are
/// dropped, since they could not be fetched.
pub fn extract_locators(elements: &[ImageElement], base: Option<&Url>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut locators = Vec::with_capacity(elements.len());

    for element in elements {
        let Some(raw) = element.raw_locator() else {
            continue;
        };
        if is_inline(raw) {
            continue;
        }
        let Some(url) = absolutize(raw, base) else {
            debug!("Dropping unresolvable locator: {}", raw);
            continue;
        };
        if seen.insert(url.clone()) {
            locators.push(url);
        }
    }

    locators
}

fn is_inline(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    lower.starts_with("data:") || lower.starts_with("javascript:") || lower == "about:blank"
}

fn absolutize(raw: &str, base: Option<&Url>) -> Option<String> {
    if let Ok(url) = Url::parse(raw) {
        return matches!(url.scheme(), "http" | "https").then(|| url.to_string());
    }
    let joined = base?.join(raw).ok()?;
    matches!(joined.scheme(), "http" | "https").then(|| joined.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn el(src: Option<&str>, deferred: Option<&str>) -> ImageElement {
        ImageElement {
            src: src.map(String::from),
            deferred_src: deferred.map(String::from),
        }
    }

    fn base() -> Url {
        Url::parse("https://reader.example/series/chapter-10/").unwrap()
    }

    #[test]
    fn deferred_attribute_wins() {
        let elements = [el(Some("https://cdn.example/spinner.gif"), Some("https://cdn.example/p1.jpg"))];
        assert_eq!(
            extract_locators(&elements, Some(&base())),
            vec!["https://cdn.example/p1.jpg"]
        );
    }

    #[test]
    fn deferred_precedence_follows_attribute_order() {
        let attrs = [
            ("src", "https://cdn.example/blank.gif"),
            ("data-original", "https://cdn.example/orig.jpg"),
            ("data-lazy-src", "https://cdn.example/lazy.jpg"),
        ];
        let e = ImageElement::from_lookup(|name| {
            attrs.iter().find(|(k, _)| *k == name).map(|(_, v)| v.to_string())
        });
        assert_eq!(e.raw_locator(), Some("https://cdn.example/lazy.jpg"));
    }

    #[test]
    fn blank_deferred_attribute_is_ignored() {
        let e = ImageElement::from_lookup(|name| match name {
            "src" => Some("https://cdn.example/p.jpg".into()),
            "data-src" => Some("   ".into()),
            _ => None,
        });
        assert_eq!(e.raw_locator(), Some("https://cdn.example/p.jpg"));
    }

    #[test]
    fn data_uris_are_excluded() {
        let elements = [
            el(Some("data:image/gif;base64,R0lGOD"), None),
            el(Some("https://cdn.example/p2.jpg"), None),
        ];
        assert_eq!(
            extract_locators(&elements, Some(&base())),
            vec!["https://cdn.example/p2.jpg"]
        );
    }

    #[test]
    fn relative_locators_resolve_against_base() {
        let elements = [el(Some("img/001.jpg"), None), el(Some("//cdn.example/002.jpg"), None)];
        assert_eq!(
            extract_locators(&elements, Some(&base())),
            vec![
                "https://reader.example/series/chapter-10/img/001.jpg",
                "https://cdn.example/002.jpg",
            ]
        );
        assert!(extract_locators(&elements[..1], None).is_empty());
    }

    #[test]
    fn duplicates_keep_first_position() {
        let elements = [
            el(Some("https://cdn.example/a.jpg"), None),
            el(Some("https://cdn.example/b.jpg"), None),
            el(None, Some("https://cdn.example/a.jpg")),
            el(Some("https://cdn.example/c.jpg"), None),
        ];
        assert_eq!(
            extract_locators(&elements, Some(&base())),
            vec![
                "https://cdn.example/a.jpg",
                "https://cdn.example/b.jpg",
                "https://cdn.example/c.jpg",
            ]
        );
    }

    #[test]
    fn elements_without_sources_are_skipped() {
        assert!(extract_locators(&[el(None, None)], Some(&base())).is_empty());
    }
}
