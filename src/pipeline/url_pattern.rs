//! URL pattern resolution: turn one seed URL into a chapter-URL template.
//!
//! The seed is scanned for a labeled chapter number (`chapter-12`,
//! `?no=12`, `&epi=12`, case-insensitive). The first label in table order
//! that matches wins, and only its first occurrence becomes the slot. A seed
//! with no recognized token yields a fixed template that can only address
//! that single page.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

struct Label {
    name: &'static str,
    re: Regex,
}

/// Recognized labels, in scan order.
static LABELS: Lazy<Vec<Label>> = Lazy::new(|| {
    vec![
        labeled("chapter", "chapter-"),
        labeled("no", "no="),
        labeled("epi", "epi="),
    ]
});

/// A label must start the URL or follow a character that is not a letter,
/// digit or underscore, so `subchapter-3` and `uno=3` never match.
fn labeled(name: &'static str, token: &str) -> Label {
    let pattern = format!(r"(?i)(?:^|[^A-Za-z0-9_]){}(\d+)", regex::escape(token));
    Label {
        name,
        re: Regex::new(&pattern).unwrap(),
    }
}

/// A URL with (at most) one chapter-number slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlTemplate {
    /// Seed contained a recognized token; `prefix` and `suffix` surround it.
    Slotted {
        prefix: String,
        suffix: String,
        /// Which label matched (`chapter`, `no`, `epi`).
        label: &'static str,
        /// Zero-pad width when the seed token had leading zeros.
        width: Option<usize>,
    },
    /// No token; the seed URL itself.
    Fixed(String),
}

impl UrlTemplate {
    /// Whether different chapter indices produce different URLs.
    pub fn is_parametrizable(&self) -> bool {
        matches!(self, UrlTemplate::Slotted { .. })
    }

    /// Label that produced the slot, if any.
    pub fn label(&self) -> Option<&'static str> {
        match self {
            UrlTemplate::Slotted { label, .. } => Some(label),
            UrlTemplate::Fixed(_) => None,
        }
    }

    /// URL for chapter `index`. Fixed templates ignore the index.
    pub fn format(&self, index: u32) -> String {
        match self {
            UrlTemplate::Slotted {
                prefix,
                suffix,
                width: Some(width),
                ..
            } => format!("{prefix}{index:0width$}{suffix}"),
            UrlTemplate::Slotted {
                prefix,
                suffix,
                width: None,
                ..
            } => format!("{prefix}{index}{suffix}"),
            UrlTemplate::Fixed(url) => url.clone(),
        }
    }
}

impl fmt::Display for UrlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlTemplate::Slotted { prefix, suffix, .. } => write!(f, "{prefix}{{}}{suffix}"),
            UrlTemplate::Fixed(url) => f.write_str(url),
        }
    }
}

/// Result of resolving a seed URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSeed {
    pub template: UrlTemplate,
    /// Chapter number captured from the seed, if a token matched.
    pub start: Option<u32>,
}

/// Infer a [`UrlTemplate`] and starting index from `seed`.
pub fn resolve(seed: &str) -> ResolvedSeed {
    for label in LABELS.iter() {
        let Some(caps) = label.re.captures(seed) else {
            continue;
        };
        let Some(digits) = caps.get(1) else {
            continue;
        };
        let Ok(value) = digits.as_str().parse::<u32>() else {
            continue;
        };

        let text = digits.as_str();
        let width = (text.len() > 1 && text.starts_with('0')).then_some(text.len());

        return ResolvedSeed {
            template: UrlTemplate::Slotted {
                prefix: seed[..digits.start()].to_string(),
                suffix: seed[digits.end()..].to_string(),
                label: label.name,
                width,
            },
            start: Some(value),
        };
    }

    ResolvedSeed {
        template: UrlTemplate::Fixed(seed.to_string()),
        start: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chapter_token_becomes_slot() {
        let r = resolve("https://site/chapter-10/page");
        assert_eq!(r.start, Some(10));
        assert_eq!(r.template.to_string(), "https://site/chapter-{}/page");
        assert_eq!(r.template.label(), Some("chapter"));
        assert_eq!(r.template.format(11), "https://site/chapter-11/page");
    }

    #[test]
    fn template_reproduces_seed() {
        let seeds = [
            "https://site/chapter-10/page",
            "https://site/Chapter-3",
            "https://comic.naver.com/webtoon/detail?titleId=7&no=45&week=mon",
            "https://example.org/viewer?EPI=9",
            "https://site/series/chapter-007/",
            "https://site/chapter-0",
        ];
        for seed in seeds {
            let r = resolve(seed);
            let start = r.start.expect(seed);
            assert_eq!(r.template.format(start), seed, "seed: {seed}");
        }
    }

    #[test]
    fn case_is_preserved_in_template() {
        let r = resolve("https://site/CHAPTER-5/x");
        assert_eq!(r.template.format(6), "https://site/CHAPTER-6/x");
    }

    #[test]
    fn only_first_occurrence_is_replaced() {
        let r = resolve("https://site/chapter-4/mirror/chapter-4");
        assert_eq!(r.template.format(5), "https://site/chapter-5/mirror/chapter-4");
    }

    #[test]
    fn zero_padding_is_kept() {
        let r = resolve("https://site/chapter-007");
        assert_eq!(r.start, Some(7));
        assert_eq!(r.template.format(8), "https://site/chapter-008");
        assert_eq!(r.template.format(1234), "https://site/chapter-1234");
    }

    #[test]
    fn label_order_decides_ambiguity() {
        let r = resolve("https://site/view?no=20&x=chapter-3");
        assert_eq!(r.template.label(), Some("chapter"));
        assert_eq!(r.start, Some(3));
    }

    #[test]
    fn labels_need_a_word_boundary() {
        for seed in [
            "https://site/view?uno=20",
            "https://site/subchapter-3/",
            "https://site/view?prepi=4",
            "https://site/my_chapter-3",
        ] {
            assert!(!resolve(seed).template.is_parametrizable(), "seed: {seed}");
        }
        for seed in [
            "chapter-3",
            "https://site/read.chapter-3",
            "https://site/view;no=20",
            "https://site/v?a=1&EPI=9",
        ] {
            assert!(resolve(seed).template.is_parametrizable(), "seed: {seed}");
        }
    }

    #[test]
    fn no_token_is_fixed() {
        let seed = "https://site/oneshot/read";
        let r = resolve(seed);
        assert!(!r.template.is_parametrizable());
        assert_eq!(r.start, None);
        assert_eq!(r.template.format(42), seed);
        assert_eq!(r.template.to_string(), seed);
    }

    #[test]
    fn oversized_number_falls_through() {
        let r = resolve("https://site/chapter-99999999999?no=4");
        assert_eq!(r.template.label(), Some("no"));
        assert_eq!(r.start, Some(4));
    }
}
