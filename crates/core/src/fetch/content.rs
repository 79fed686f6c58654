//! Payload clean-up: watermark removal and label extraction.

use std::sync::OnceLock;

use regex_lite::Regex;

fn title_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)<div[^>]*class\s*=\s*["'][^"']*tt-title[^"']*["'][^>]*>(.*?)</div>"#).ok()
    })
    .as_ref()
}

fn tag_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").ok()).as_ref()
}

/// Remove every occurrence of each watermark string.
pub fn strip_watermarks(content: &str, watermarks: &[String]) -> String {
    watermarks
        .iter()
        .filter(|w| !w.is_empty())
        .fold(content.to_string(), |acc, w| acc.replace(w.as_str(), ""))
}

/// Resolve a display label from the `tt-title` block, falling back to `hint`.
///
/// Nested markup inside the title block is dropped and whitespace collapsed.
pub fn extract_label(content: &str, hint: &str) -> String {
    title_pattern()
        .and_then(|re| re.captures(content))
        .and_then(|caps| caps.get(1))
        .map(|m| match tag_pattern() {
            Some(tags) => tags.replace_all(m.as_str(), " ").into_owned(),
            None => m.as_str().to_string(),
        })
        .map(|raw| raw.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|label| !label.is_empty())
        .unwrap_or_else(|| hint.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_watermarks() {
        let marks = vec!["妍希".to_string(), String::new()];
        assert_eq!(strip_watermarks("第一章妍希正文妍希", &marks), "第一章正文");
        assert_eq!(strip_watermarks("plain", &[]), "plain");
    }

    #[test]
    fn test_extract_label_plain_div() {
        let html = r#"<div class="tt-title">第1章 开局</div><p>body</p>"#;
        assert_eq!(extract_label(html, "hint"), "第1章 开局");
    }

    #[test]
    fn test_extract_label_tolerates_attributes_and_nesting() {
        let html = "<div id=\"t\" class='header tt-title'>\n  <span>Chapter</span>  7\n</div>";
        assert_eq!(extract_label(html, "hint"), "Chapter 7");
    }

    #[test]
    fn test_extract_label_falls_back_to_hint() {
        assert_eq!(extract_label("<p>no title</p>", "Chapter 9"), "Chapter 9");
        assert_eq!(
            extract_label(r#"<div class="tt-title">   </div>"#, "Chapter 9"),
            "Chapter 9"
        );
    }
}
