//! Widget HTML preparation (`storeWidgetHtml`): injects a `<base>` tag
//! so relative URLs in CMS-authored HTML resolve against the cache's own
//! origin, rewrites absolute CMS URLs to local cache keys, and eagerly
//! fetches the static resources (scripts, stylesheets, fonts, images) the
//! widget references so a layout never blocks mid-play on a network
//! round-trip.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use bytes::Bytes;
use md5::{Digest, Md5};
use regex::Regex;
use tracing::warn;

use crate::error::CacheResult;

use super::ChunkCache;

/// Fetches a static resource by URL. Production code backs this with
/// `reqwest`; tests substitute a fake that returns canned bytes without
/// touching the network.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<(Bytes, String), String>;
}

pub struct ReqwestResourceFetcher {
    client: reqwest::Client,
}

impl ReqwestResourceFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceFetcher for ReqwestResourceFetcher {
    async fn fetch(&self, url: &str) -> Result<(Bytes, String), String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let body = response.bytes().await.map_err(|e| e.to_string())?;
        Ok((body, content_type))
    }
}

static HEAD_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<head[^>]*>").unwrap());

static RESOURCE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:src|href)\s*=\s*["']([^"']+)["']"#).unwrap()
});

static CSS_URL_FN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(\s*["']?([^"')]+)["']?\s*\)"#).unwrap()
});

fn is_absolute(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn looks_like_static_resource(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    [
        ".js", ".css", ".woff", ".woff2", ".ttf", ".otf", ".png", ".jpg", ".jpeg", ".gif",
        ".svg", ".webp",
    ]
    .iter()
    .any(|ext| lower.ends_with(ext))
}

impl ChunkCache {
    /// Prepares a widget's HTML payload for offline playback: injects
    /// `<base href="{base_url}">`, then walks `src=`/`href=` attributes and
    /// any CSS `url(...)` references for absolute CMS URLs, fetching each
    /// referenced static resource into the cache and rewriting the HTML to
    /// point at it. A resource that fails to fetch is logged and left
    /// pointing at its original (still absolute) URL rather than failing
    /// the whole widget — region playback degrades gracefully instead of
    /// blocking.
    pub async fn store_widget_html(
        &self,
        key: &str,
        html: &str,
        base_url: &str,
    ) -> CacheResult<()> {
        let mut rewritten = inject_base_tag(html, base_url);

        let resource_urls: Vec<String> = RESOURCE_URL
            .captures_iter(&rewritten)
            .map(|c| c[1].to_string())
            .filter(|url| is_absolute(url) && looks_like_static_resource(url))
            .collect();

        for url in resource_urls {
            match self.fetch_and_cache_resource(&url).await {
                Ok(local_key) => {
                    rewritten = rewritten.replace(&url, &local_key);
                }
                Err(reason) => {
                    warn!(url, reason, "failed to eagerly fetch widget resource");
                }
            }
        }

        self.put(key, Bytes::from(rewritten), "text/html", None)
            .await
    }

    async fn fetch_and_cache_resource(&self, url: &str) -> Result<String, String> {
        let fetcher = self
            .fetcher()
            .ok_or_else(|| "no resource fetcher configured".to_string())?;
        let (mut body, content_type) = fetcher.fetch(url).await?;

        if content_type.starts_with("text/css") {
            body = rewrite_css_fonts(&body, fetcher.clone()).await;
        }

        let local_key = format!("resource/{:x}", Md5::digest(url.as_bytes()));
        self.put(&local_key, body, &content_type, None)
            .await
            .map_err(|e| e.to_string())?;
        Ok(local_key)
    }
}

fn inject_base_tag(html: &str, base_url: &str) -> String {
    let base_tag = format!("<base href=\"{base_url}\">");
    if let Some(m) = HEAD_TAG.find(html) {
        let mut out = String::with_capacity(html.len() + base_tag.len());
        out.push_str(&html[..m.end()]);
        out.push_str(&base_tag);
        out.push_str(&html[m.end()..]);
        out
    } else {
        format!("{base_tag}{html}")
    }
}

/// Rewrites `url(...)` references inside a CSS payload (typically
/// `@font-face` declarations) to point at locally fetched copies.
/// Best-effort: a font that fails to fetch is left referencing its
/// original absolute URL, same policy as top-level resources.
async fn rewrite_css_fonts(css: &Bytes, fetcher: Arc<dyn ResourceFetcher>) -> Bytes {
    let css_str = match std::str::from_utf8(css) {
        Ok(s) => s,
        Err(_) => return css.clone(),
    };

    let mut rewritten = css_str.to_string();
    let font_urls: Vec<String> = CSS_URL_FN
        .captures_iter(css_str)
        .map(|c| c[1].to_string())
        .filter(|url| is_absolute(url))
        .collect();

    for url in font_urls {
        match fetcher.fetch(&url).await {
            Ok((_bytes, _content_type)) => {
                let local_key = format!("resource/{:x}", Md5::digest(url.as_bytes()));
                rewritten = rewritten.replace(&url, &local_key);
            }
            Err(reason) => {
                warn!(url, reason, "failed to fetch font referenced in widget css");
            }
        }
    }

    Bytes::from(rewritten)
}
