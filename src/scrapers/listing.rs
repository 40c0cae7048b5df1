//! News listing page scraper.
//!
//! Fetches a single listing page (by default the State Council "要闻" list at
//! <https://www.gov.cn/yaowen/liebiao/>) and turns it into [`NewsItem`]s.
//!
//! # Extraction
//!
//! Candidate elements come from the first entry of [`LISTING_STRATEGIES`]
//! that matches anything. Matches are never merged across entries. The last
//! entry scans every link under the site's news path, so markup changes
//! degrade to link harvesting instead of an empty result.
//!
//! # URL Pattern
//!
//! Relative links are resolved by plain concatenation: a leading `/` is
//! appended to the site origin, anything else to the origin plus the section
//! prefix (`https://www.gov.cn/yaowen/`). Identities hash the resulting link
//! text, so this must not change to RFC 3986 resolution.

use super::NewsSource;
use crate::error::NewsError;
use crate::models::NewsItem;
use crate::utils::truncate_chars;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use itertools::Itertools;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub const DEFAULT_LISTING_URL: &str = "https://www.gov.cn/yaowen/liebiao/";

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const SUMMARY_MAX_CHARS: usize = 200;
const MIN_TITLE_CHARS: usize = 5;
/// Exclusive bounds on link text length for the link-scan fallback.
const LINK_TEXT_CHARS: (usize, usize) = (10, 200);

const TIME_SELECTORS: &[&str] = &[".time", ".date", "time", "[datetime]"];
const SUMMARY_SELECTORS: &[&str] = &[".summary", ".desc", ".excerpt", "p"];

/// How candidate elements are picked out of a listing document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matcher {
    /// Every element matching a CSS selector.
    Css(&'static str),
    /// Links under the site's news path whose text looks like a headline.
    NewsLinks,
}

/// Candidate matchers in priority order. The first one with a match wins.
pub const LISTING_STRATEGIES: &[Matcher] = &[
    Matcher::Css("ul.list li"),
    Matcher::Css(".news-list li"),
    Matcher::Css(".list li"),
    Matcher::Css("div.news-item"),
    Matcher::Css("article.news"),
    Matcher::NewsLinks,
];

impl Matcher {
    fn select<'a>(
        &self,
        document: &'a Html,
        site: &SiteProfile,
    ) -> Result<Vec<ElementRef<'a>>, NewsError> {
        match self {
            Matcher::Css(css) => {
                let selector = compile(css)?;
                Ok(document.select(&selector).collect())
            }
            Matcher::NewsLinks => {
                let selector = compile(&format!("a[href*=\"{}\"]", site.news_path))?;
                Ok(document
                    .select(&selector)
                    .filter(|link| !is_boilerplate_href(link.value().attr("href")))
                    .filter(|link| looks_like_headline(link))
                    .collect())
            }
        }
    }
}

/// Where the listing lives and how its relative links resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteProfile {
    pub listing_url: String,
    /// `scheme://host[:port]` without a trailing slash.
    pub origin: String,
    /// First path segment wrapped in slashes, e.g. `/yaowen/`.
    pub section_prefix: String,
    /// Substring an href must contain to count as a news link, e.g. `/yaowen`.
    pub news_path: String,
}

impl SiteProfile {
    pub fn from_listing_url(listing_url: &str) -> Result<Self, NewsError> {
        let url = Url::parse(listing_url)
            .map_err(|e| NewsError::Config(format!("invalid listing url {listing_url:?}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(NewsError::Config(format!(
                "listing url must be http(s), got {listing_url:?}"
            )));
        }
        let origin = url.origin().ascii_serialization();
        let section = url
            .path_segments()
            .and_then(|mut segments| segments.next())
            .filter(|segment| !segment.is_empty())
            .map(str::to_string);
        let (section_prefix, news_path) = match section {
            Some(segment) => (format!("/{segment}/"), format!("/{segment}")),
            None => ("/".to_string(), "/".to_string()),
        };
        Ok(Self {
            listing_url: listing_url.to_string(),
            origin,
            section_prefix,
            news_path,
        })
    }

    /// Resolve an href found on the listing page. Returns `None` for an
    /// empty href.
    pub fn absolutize(&self, href: &str) -> Option<String> {
        if href.is_empty() {
            return None;
        }
        if href.starts_with("http") {
            Some(href.to_string())
        } else if href.starts_with('/') {
            Some(format!("{}{}", self.origin, href))
        } else {
            Some(format!("{}{}{}", self.origin, self.section_prefix, href))
        }
    }
}

/// Scraper for one listing page.
#[derive(Debug, Clone)]
pub struct ListingScraper {
    client: Client,
    site: SiteProfile,
    timeout: Duration,
}

impl ListingScraper {
    pub fn new(listing_url: &str) -> Result<Self, NewsError> {
        Self::with_timeout(listing_url, FETCH_TIMEOUT)
    }

    /// Like [`ListingScraper::new`] with a custom request timeout.
    pub fn with_timeout(listing_url: &str, timeout: Duration) -> Result<Self, NewsError> {
        let site = SiteProfile::from_listing_url(listing_url)?;

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| NewsError::Config(format!("building http client: {e}")))?;

        Ok(Self {
            client,
            site,
            timeout,
        })
    }

    pub fn site(&self) -> &SiteProfile {
        &self.site
    }
}

#[async_trait]
impl NewsSource for ListingScraper {
    #[instrument(level = "info", skip_all, fields(url = %self.site.listing_url))]
    async fn fetch(&self) -> Result<Vec<NewsItem>, NewsError> {
        let url = &self.site.listing_url;
        info!("Fetching listing page");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| describe_request_error(url, self.timeout, e))?;

        let status = response.status();
        check_status(status)?;
        if !status.is_success() {
            warn!(%status, "Listing returned a non-success status; parsing the body anyway");
        }

        let body = response
            .text()
            .await
            .map_err(|e| describe_request_error(url, self.timeout, e))?;
        debug!(bytes = body.len(), "Downloaded listing body");

        let items = parse_listing(&body, &self.site, Utc::now())?;
        info!(count = items.len(), "Extracted news items");
        Ok(items)
    }
}

/// Only server errors abort the fetch; other statuses may still carry a
/// renderable page.
pub fn check_status(status: StatusCode) -> Result<(), NewsError> {
    if status.is_server_error() {
        return Err(NewsError::Network(format!("HTTP {status}")));
    }
    Ok(())
}

fn describe_request_error(url: &str, timeout: Duration, e: reqwest::Error) -> NewsError {
    if e.is_timeout() {
        NewsError::Network(format!(
            "request to {url} timed out after {}ms, check the network connection",
            timeout.as_millis()
        ))
    } else if e.is_connect() {
        NewsError::Network(format!("could not connect to {url}: {e}"))
    } else {
        NewsError::Network(format!("request to {url} failed: {e}"))
    }
}

/// Extract news items from a listing document.
///
/// `fetched_at` stamps items whose publish time cannot be found. The result
/// is deduplicated by identity, keeping the first occurrence.
pub fn parse_listing(
    html: &str,
    site: &SiteProfile,
    fetched_at: DateTime<Utc>,
) -> Result<Vec<NewsItem>, NewsError> {
    let document = Html::parse_document(html);

    let mut candidates = Vec::new();
    for matcher in LISTING_STRATEGIES {
        candidates = matcher.select(&document, site)?;
        if !candidates.is_empty() {
            debug!(?matcher, count = candidates.len(), "Listing strategy matched");
            break;
        }
    }
    if candidates.is_empty() {
        warn!("No listing strategy matched; page layout may have changed");
        return Ok(Vec::new());
    }

    let fields = FieldSelectors::compile()?;
    let default_time = fetched_at.to_rfc3339_opts(SecondsFormat::Millis, true);

    let items = candidates
        .into_iter()
        .filter_map(|element| extract_item(element, site, &fields, &default_time))
        .unique_by(|item| item.id.clone())
        .collect();
    Ok(items)
}

struct FieldSelectors {
    anchor: Selector,
    time: Vec<Selector>,
    summary: Vec<Selector>,
}

impl FieldSelectors {
    fn compile() -> Result<Self, NewsError> {
        Ok(Self {
            anchor: compile("a")?,
            time: TIME_SELECTORS
                .iter()
                .map(|s| compile(s))
                .collect::<Result<_, _>>()?,
            summary: SUMMARY_SELECTORS
                .iter()
                .map(|s| compile(s))
                .collect::<Result<_, _>>()?,
        })
    }
}

fn compile(css: &str) -> Result<Selector, NewsError> {
    Selector::parse(css).map_err(|e| NewsError::Parse(format!("invalid selector {css:?}: {e:?}")))
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Script and fragment links are page furniture, never articles.
fn is_boilerplate_href(href: Option<&str>) -> bool {
    let href = href.unwrap_or_default().trim();
    href.starts_with('#') || href.to_ascii_lowercase().starts_with("javascript:")
}

fn looks_like_headline(link: &ElementRef<'_>) -> bool {
    let len = text_of(*link).chars().count();
    len > LINK_TEXT_CHARS.0 && len < LINK_TEXT_CHARS.1
}

fn extract_item(
    element: ElementRef<'_>,
    site: &SiteProfile,
    fields: &FieldSelectors,
    default_time: &str,
) -> Option<NewsItem> {
    let anchor = if element.value().name() == "a" {
        element
    } else {
        element.select(&fields.anchor).next()?
    };

    let mut title = text_of(anchor);
    if title.is_empty() {
        title = text_of(element);
    }
    let link = site.absolutize(anchor.value().attr("href").unwrap_or_default())?;

    if title.chars().count() <= MIN_TITLE_CHARS {
        return None;
    }

    let publish_time = publish_time_of(element, fields).unwrap_or_else(|| default_time.to_string());
    let summary = summary_of(element, fields);

    Some(NewsItem::new(title, link, Some(publish_time), summary))
}

/// The first time-bearing descendant decides; a `datetime` attribute beats
/// the visible text.
fn publish_time_of(element: ElementRef<'_>, fields: &FieldSelectors) -> Option<String> {
    let found = fields
        .time
        .iter()
        .find_map(|selector| element.select(selector).next())?;
    let raw = match found.value().attr("datetime") {
        Some(attr) if !attr.trim().is_empty() => attr.trim().to_string(),
        _ => text_of(found),
    };
    (!raw.is_empty()).then_some(raw)
}

fn summary_of(element: ElementRef<'_>, fields: &FieldSelectors) -> String {
    fields
        .summary
        .iter()
        .filter_map(|selector| element.select(selector).next())
        .map(text_of)
        .find(|text| !text.is_empty())
        .map(|text| truncate_chars(&text, SUMMARY_MAX_CHARS))
        .unwrap_or_default()
}
