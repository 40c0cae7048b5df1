//! Data models for scraped news items and the persisted seen-set.
//!
//! This module defines the records that flow through the pipeline:
//! - [`NewsItem`]: One entry extracted from the listing page
//! - [`SeenSet`]: The durable document of already-delivered items
//!
//! Field names serialize in camelCase so the store file stays readable by
//! earlier deployments (`{"news": [...], "lastUpdate": ...}`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single news entry extracted from the listing page.
///
/// `id` is derived from `title` and `link` (see [`news_identity`]) and is the
/// dedup key. Records written by older versions may lack it, which is why it
/// defaults to empty on deserialization; [`NewsItem::identity`] recomputes it
/// in that case.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsItem {
    #[serde(default)]
    pub id: String,
    pub title: String,
    pub link: String,
    /// Raw time text or RFC 3339 timestamp. Defaults to fetch time.
    #[serde(default)]
    pub publish_time: Option<String>,
    /// At most 200 characters, possibly empty.
    #[serde(default)]
    pub summary: String,
}

impl NewsItem {
    /// Build an item and stamp its identity.
    pub fn new(
        title: impl Into<String>,
        link: impl Into<String>,
        publish_time: Option<String>,
        summary: impl Into<String>,
    ) -> Self {
        let title = title.into();
        let link = link.into();
        let id = news_identity(&title, &link);
        Self {
            id,
            title,
            link,
            publish_time,
            summary: summary.into(),
        }
    }

    /// The stored identity, or a freshly computed one for legacy records.
    pub fn identity(&self) -> String {
        if self.id.is_empty() {
            news_identity(&self.title, &self.link)
        } else {
            self.id.clone()
        }
    }
}

/// The persisted set of already-seen items, in append order.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeenSet {
    #[serde(default)]
    pub news: Vec<NewsItem>,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
}

/// Read-only snapshot of the dedup store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total_count: usize,
    pub last_update: Option<DateTime<Utc>>,
}

/// Compute the identity of a news item from its title and link.
///
/// 32-bit rolling hash (`h = h * 31 + unit`, wrapping) over the UTF-16 code
/// units of `"{title}_{link}"`, rendered as the absolute value in base 36.
/// Identities already on disk were produced by this exact algorithm, so any
/// change here makes every stored item look new again.
pub fn news_identity(title: &str, link: &str) -> String {
    let combined = format!("{title}_{link}");
    let hash = combined
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32));
    to_base36((hash as i64).unsigned_abs())
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_matches_known_values() {
        assert_eq!(news_identity("A", "http://x/1"), "h9ktl2");
        assert_eq!(
            news_identity("Hello World Title", "https://www.gov.cn/yaowen/2024/a.htm"),
            "o5tyf4"
        );
        assert_eq!(news_identity("", ""), "2n");
    }

    #[test]
    fn identity_hashes_utf16_units() {
        assert_eq!(
            news_identity(
                "国务院常务会议部署推进经济工作",
                "https://www.gov.cn/yaowen/liebiao/202410/content_1.htm"
            ),
            "noe3gp"
        );
    }

    #[test]
    fn identity_is_deterministic_and_discriminating() {
        let a = news_identity("Title one", "https://www.gov.cn/a");
        assert_eq!(a, news_identity("Title one", "https://www.gov.cn/a"));
        assert_ne!(a, news_identity("Title two", "https://www.gov.cn/a"));
        assert_ne!(a, news_identity("Title one", "https://www.gov.cn/b"));
    }

    #[test]
    fn base36_rendering() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(2_147_483_648), "zik0zk");
    }

    #[test]
    fn legacy_record_without_id_gets_computed_identity() {
        let json = r#"{"title": "A", "link": "http://x/1"}"#;
        let item: NewsItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.id, "");
        assert_eq!(item.identity(), "h9ktl2");
        assert_eq!(item.summary, "");
        assert_eq!(item.publish_time, None);
    }

    #[test]
    fn seen_set_uses_camel_case_layout() {
        let set = SeenSet {
            news: vec![NewsItem::new(
                "A",
                "http://x/1",
                Some("2024-10-01".into()),
                "",
            )],
            last_update: None,
        };
        let json = serde_json::to_string(&set).unwrap();
        assert!(json.contains("\"lastUpdate\":null"));
        assert!(json.contains("\"publishTime\":\"2024-10-01\""));
        assert!(json.contains("\"id\":\"h9ktl2\""));
    }

    #[test]
    fn seen_set_reads_iso_last_update() {
        let json = r#"{"news": [], "lastUpdate": "2024-10-01T08:00:00.000Z"}"#;
        let set: SeenSet = serde_json::from_str(json).unwrap();
        assert!(set.last_update.is_some());
    }
}
