//! Classifier collaborator.
//!
//! The chain walker only reads the booleans, label and resource list from a
//! [`Classification`]; markup structure never leaks past this module.

use regex::{Regex, RegexBuilder};

use crate::config::ClassifierConfig;
use crate::fetch::RenderedDocument;

/// Location of one resource extracted from a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    /// Artifact name within the job (e.g. `front`)
    pub name: String,
    pub url: String,
    /// Tried when `url` cannot be downloaded
    pub fallback_url: Option<String>,
}

impl ResourceRef {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            fallback_url: None,
        }
    }

    pub fn with_fallback(mut self, url: impl Into<String>) -> Self {
        self.fallback_url = Some(url.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub matches_target_category: bool,
    pub excluded_subcategory: bool,
    /// Grade or other label used to group artifacts
    pub label: Option<String>,
    pub resources: Vec<ResourceRef>,
}

pub trait DocumentClassifier: Send + Sync {
    fn classify(&self, document: &RenderedDocument) -> Classification;
}

/// Names given to extracted images, in document order.
const RESOURCE_NAMES: [&str; 2] = ["front", "back"];

/// Keyword and pattern based classifier for certificate pages.
pub struct KeywordClassifier {
    config: ClassifierConfig,
    img_tag: Regex,
    content_url: Regex,
    src_attr: Regex,
    psa_grade: Regex,
    condition_grade: Regex,
}

impl KeywordClassifier {
    pub fn new(config: ClassifierConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            config,
            img_tag: Regex::new(r"(?is)<img\b[^>]*>")?,
            content_url: Regex::new(r#"(?i)itemprop\s*=\s*["']contentUrl["']"#)?,
            src_attr: Regex::new(r#"(?i)\bsrc\s*=\s*["']([^"']*)["']"#)?,
            psa_grade: RegexBuilder::new(r"\bPSA\s*([0-9]{1,2})\b")
                .case_insensitive(true)
                .build()?,
            condition_grade: RegexBuilder::new(
                r"\b(?:PR|GOOD|VG|VG-EX|EX|EX-MT|NM|NM-MT|MINT|GEM\s*MT)\s*([0-9]{1,2})\b",
            )
            .case_insensitive(true)
            .build()?,
        })
    }

    /// Sources of the content images, in document order.
    fn content_image_sources<'a>(&self, html: &'a str) -> Vec<Option<&'a str>> {
        self.img_tag
            .find_iter(html)
            .map(|tag| tag.as_str())
            .filter(|tag| self.content_url.is_match(tag))
            .map(|tag| {
                self.src_attr
                    .captures(tag)
                    .and_then(|caps| caps.get(1))
                    .map(|src| src.as_str())
            })
            .collect()
    }

    fn extract_resources(&self, html: &str) -> Vec<ResourceRef> {
        self.content_image_sources(html)
            .into_iter()
            .take(self.config.required_resources)
            .enumerate()
            .filter_map(|(index, src)| {
                // Lazy-loaded images carry base64 placeholders until rendered
                let src = src.filter(|s| s.starts_with("http"))?;
                let name = RESOURCE_NAMES
                    .get(index)
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| format!("image{}", index + 1));
                Some(upgrade_to_large(name, src))
            })
            .collect()
    }

    fn extract_grade(&self, html: &str) -> Option<String> {
        [&self.psa_grade, &self.condition_grade]
            .into_iter()
            .find_map(|pattern| {
                let grade: u8 = pattern.captures(html)?.get(1)?.as_str().parse().ok()?;
                (1..=10).contains(&grade).then(|| grade.to_string())
            })
    }
}

impl DocumentClassifier for KeywordClassifier {
    fn classify(&self, document: &RenderedDocument) -> Classification {
        let text = document.html.to_lowercase();
        let matches_target_category = text.contains(&self.config.target_keyword);
        let excluded_subcategory = self
            .config
            .excluded_keywords
            .iter()
            .any(|keyword| text.contains(keyword.as_str()));

        Classification {
            matches_target_category,
            excluded_subcategory,
            label: self.extract_grade(&document.html),
            resources: self.extract_resources(&document.html),
        }
    }
}

/// Prefer the large rendition, keeping the original as fallback.
fn upgrade_to_large(name: String, src: &str) -> ResourceRef {
    if src.contains("/small/") {
        ResourceRef::new(name, src.replace("/small/", "/large/")).with_fallback(src)
    } else {
        ResourceRef::new(name, src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> KeywordClassifier {
        KeywordClassifier::new(ClassifierConfig::default()).unwrap()
    }

    fn page(body: &str) -> RenderedDocument {
        RenderedDocument::new(1, "https://example.com/cert/1", body)
    }

    const CARD: &str = r#"
        <p class="text-subtitle1">#1</p>
        <dd>Pokemon Game</dd><dd>GEM MT 10</dd>
        <img itemprop="contentUrl" src="https://img.example.com/small/front.jpg">
        <img alt="back" itemprop="contentUrl" src="https://img.example.com/back.jpg">
        <img itemprop="contentUrl" src="https://img.example.com/extra.jpg">
    "#;

    #[test]
    fn test_target_card_is_classified() {
        let result = classifier().classify(&page(CARD));

        assert!(result.matches_target_category);
        assert!(!result.excluded_subcategory);
        assert_eq!(result.label.as_deref(), Some("10"));
        assert_eq!(
            result.resources,
            vec![
                ResourceRef::new("front", "https://img.example.com/large/front.jpg")
                    .with_fallback("https://img.example.com/small/front.jpg"),
                ResourceRef::new("back", "https://img.example.com/back.jpg"),
            ]
        );
    }

    #[test]
    fn test_excluded_subcategory() {
        let result = classifier().classify(&page("<dd>Pokemon Japanese Promo</dd>"));
        assert!(result.matches_target_category);
        assert!(result.excluded_subcategory);
    }

    #[test]
    fn test_other_category() {
        let result = classifier().classify(&page("<dd>Baseball 1952 Topps</dd>"));
        assert!(!result.matches_target_category);
    }

    #[test]
    fn test_placeholder_images_are_dropped() {
        let html = r#"
            <img itemprop="contentUrl" src="data:image/gif;base64,R0lGOD">
            <img itemprop="contentUrl" src="https://img.example.com/back.jpg">
        "#;
        let result = classifier().classify(&page(html));
        assert_eq!(result.resources.len(), 1);
        assert_eq!(result.resources[0].name, "back");
    }

    #[test]
    fn test_grade_from_psa_prefix() {
        let c = classifier();
        assert_eq!(c.extract_grade("Grade: PSA 9").as_deref(), Some("9"));
        assert_eq!(c.extract_grade("NM-MT 8").as_deref(), Some("8"));
        assert_eq!(c.extract_grade("PSA 42"), None);
        assert_eq!(c.extract_grade("no grade here"), None);
    }
}
