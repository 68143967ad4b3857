use std::time::Duration;

use an_core::news::{ExtractOptions, Extractor};
use an_core::Result;
use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Node, Selector};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const USER_AGENT: &str = "Mozilla/5.0 (compatible; ai-news/0.1)";

/// Containers tried in order; the first one yielding text wins.
const ROOT_SELECTORS: &[&str] = &["article", "[itemprop='articleBody']", "main", "body"];
const BLOCK_SELECTOR: &str = "p, h1, h2, h3, h4, li, blockquote, pre";
const BLOCK_TAGS: &[&str] = &["p", "h1", "h2", "h3", "h4", "li", "blockquote", "pre"];
const SKIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "nav", "footer", "aside", "form", "figcaption", "button",
];

/// Downloads article pages and keeps their readable body text.
#[derive(Debug, Clone)]
pub struct HtmlExtractor {
    client: Client,
}

impl HtmlExtractor {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Extractor for HtmlExtractor {
    async fn fetch(&self, url: &str) -> Result<Option<String>> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            tracing::debug!("Fetching {} returned {}", url, response.status());
            return Ok(None);
        }
        let body = response.text().await?;
        Ok(if body.trim().is_empty() { None } else { Some(body) })
    }

    fn extract(&self, raw: &str, options: ExtractOptions) -> Option<String> {
        extract_text(raw, options)
    }
}

/// Readable text of an HTML page, paragraphs separated by blank lines.
pub fn extract_text(html: &str, options: ExtractOptions) -> Option<String> {
    let document = Html::parse_document(html);
    let blocks = Selector::parse(BLOCK_SELECTOR).ok()?;

    for root in ROOT_SELECTORS {
        let Ok(selector) = Selector::parse(root) else {
            continue;
        };
        for container in document.select(&selector) {
            let paragraphs: Vec<String> = container
                .select(&blocks)
                .filter(|block| !is_nested(block))
                .map(|block| render_block(block, options))
                .filter(|text| !text.is_empty())
                .collect();
            if !paragraphs.is_empty() {
                return Some(paragraphs.join("\n\n"));
            }
        }
    }
    None
}

fn is_nested(block: &ElementRef) -> bool {
    block
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| {
            let name = a.value().name();
            BLOCK_TAGS.contains(&name) || SKIP_TAGS.contains(&name)
        })
}

fn render_block(block: ElementRef, options: ExtractOptions) -> String {
    let mut out = String::new();
    render_inline(block, options, &mut out);
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn render_inline(element: ElementRef, options: ExtractOptions, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                let Some(child) = ElementRef::wrap(child) else {
                    continue;
                };
                let name = child.value().name();
                if SKIP_TAGS.contains(&name) {
                    continue;
                }
                if name == "br" {
                    out.push(' ');
                    continue;
                }
                match child.value().attr("href").filter(|_| name == "a" && options.include_links) {
                    Some(href) if is_followable(href) => {
                        let mut label = String::new();
                        render_inline(child, options, &mut label);
                        let label = label.split_whitespace().collect::<Vec<_>>().join(" ");
                        out.push_str(&format!("[{}]({})", label, href));
                    }
                    _ => render_inline(child, options, out),
                }
            }
            _ => {}
        }
    }
}

fn is_followable(href: &str) -> bool {
    !(href.is_empty() || href.starts_with('#') || href.starts_with("javascript:"))
}
