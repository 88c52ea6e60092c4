use std::collections::HashSet;

use anyhow::{Context, Result};
use scraper::{ElementRef, Html, Node};
use tracing::{debug, info, instrument};
use url::Url;

use crate::config::SiteConfig;
use crate::epub::chapter::{Body, Chapter};
use crate::utils::escape_xml;

#[derive(Clone)]
pub struct Parser {
    config: SiteConfig,
}

impl Parser {
    pub fn new(config: SiteConfig) -> Self {
        Self { config }
    }
}

impl Parser {
    /// 目录页中的章节链接，按页面顺序，重复链接只保留一次
    #[instrument(skip_all)]
    pub fn toc(&self, toc_url: &str, html: &str) -> Result<Vec<String>> {
        let base = Url::parse(toc_url).with_context(|| format!("目录链接无效: {}", toc_url))?;
        let document = Html::parse_document(html);

        let Some(container) = document.select(&self.config.toc_container).next() else {
            anyhow::bail!("目录页 {} 中没有找到目录容器", toc_url);
        };

        let mut seen = HashSet::new();
        let mut urls = Vec::new();
        let lists = container
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|child| self.config.toc_lists.matches(child));
        for list in lists {
            for item in list.select(&self.config.toc_items) {
                let Some(href) = item
                    .select(&self.config.toc_link)
                    .next()
                    .and_then(|link| link.value().attr("href"))
                else {
                    continue;
                };
                let url = resolve(&base, href)?;
                if seen.insert(url.clone()) {
                    urls.push(url);
                } else {
                    debug!(%url, "目录中重复的链接");
                }
            }
        }

        if urls.is_empty() {
            anyhow::bail!("目录页 {} 中没有找到章节链接", toc_url);
        }
        info!("目录解析完成，共 {} 个章节链接", urls.len());
        Ok(urls)
    }

    /// 解析章节页面；找不到标题、正文或段落都是结构错误，不重试
    pub fn chapter(&self, url: &str, html: &str) -> Result<Chapter> {
        let base = Url::parse(url).with_context(|| format!("章节链接无效: {}", url))?;
        let document = Html::parse_document(html);

        let title = document
            .select(&self.config.title)
            .next()
            .ok_or_else(|| anyhow::anyhow!("无法找到章节标题: {}", url))?
            .text()
            .collect::<String>()
            .trim()
            .to_string();

        let content = document
            .select(&self.config.content)
            .next()
            .ok_or_else(|| anyhow::anyhow!("无法找到章节内容: {}", url))?;

        let paragraphs: Vec<ElementRef> = content.select(&self.config.paragraphs).collect();
        let Some(nav) = paragraphs.first() else {
            anyhow::bail!("章节内容中没有段落: {}", url);
        };

        // 第一段是上一章/下一章导航
        let previous_marker = self.config.previous_marker.to_lowercase();
        let next_marker = self.config.next_marker.to_lowercase();
        let mut previous_url = None;
        let mut next_url = None;
        for link in nav.select(&self.config.nav_links) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let markup = link.html().to_lowercase();
            if markup.contains(&previous_marker) {
                previous_url = Some(resolve(&base, href)?);
            }
            if markup.contains(&next_marker) {
                next_url = Some(resolve(&base, href)?);
            }
        }

        // 去掉首段导航和末段
        let mut body = String::new();
        if paragraphs.len() > 2 {
            for p in &paragraphs[1..paragraphs.len() - 1] {
                write_xhtml(*p, &mut body);
            }
        }

        let mut chapter = Chapter::new(url, title, Body::new(body));
        chapter.is_bonus = self.config.bonus_pattern.is_match(&chapter.title);
        chapter.is_prologue = self.config.prologue_pattern.is_match(&chapter.title);
        chapter.is_epilogue = self.config.epilogue_pattern.is_match(&chapter.title);
        chapter.previous_url = previous_url;
        chapter.next_url = next_url;
        Ok(chapter)
    }
}

// XHTML 里不能出现 HTML 的命名实体和未闭合的空元素
static VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

fn write_xhtml(element: ElementRef, out: &mut String) {
    let name = element.value().name();
    out.push('<');
    out.push_str(name);
    for (attr, value) in element.value().attrs() {
        out.push_str(&format!(r#" {}="{}""#, attr, escape_xml(value)));
    }
    if VOID_ELEMENTS.contains(&name) {
        out.push_str("/>");
        return;
    }
    out.push('>');

    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(&escape_xml(text)),
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    write_xhtml(child, out);
                }
            }
            _ => {}
        }
    }

    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn resolve(base: &Url, href: &str) -> Result<String> {
    let mut url = base
        .join(href.trim())
        .with_context(|| format!("无效链接: {}", href))?;
    url.set_fragment(None);
    Ok(url.to_string())
}
