use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::html;
use crate::types::NotificationEntry;

static LIST_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<li(?:\s[^>]*)?>(.*?)</li>").unwrap());
static HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)<a\s[^>]*href\s*=\s*["']([^"']+)["']"#).unwrap());

const GOVERNMENT_DOMAIN: &str = ".gov.in";

/// Extracts government notifications (document links) from list items.
///
/// Only links to PDF documents or government domains are kept. Relative links
/// are resolved against `base`. List items without a matching link are
/// dropped.
pub fn extract_notifications(content: &str, base: &Url) -> Vec<NotificationEntry> {
    let content = html::strip_comments(content);

    LIST_ITEM
        .captures_iter(&content)
        .filter_map(|item| {
            let inner = &item[1];
            let href = HREF.captures(inner)?.get(1)?.as_str().trim();
            if !(href.to_lowercase().ends_with(".pdf") || href.contains(GOVERNMENT_DOMAIN)) {
                return None;
            }

            let link = match Url::parse(href) {
                Ok(absolute) => absolute.to_string(),
                Err(url::ParseError::RelativeUrlWithoutBase) => base.join(href).ok()?.to_string(),
                Err(err) => {
                    tracing::debug!(href, error = %err, "Skipping notification with invalid link");
                    return None;
                }
            };

            Some(NotificationEntry {
                title: html::text_content(inner),
                link,
            })
        })
        .collect()
}
