use std::path::{Path, PathBuf};

use anyhow::Result;
use regex::Regex;
use scraper::Selector;
use serde::{Deserialize, Deserializer};

use crate::sequence::OrphanPolicy;

static CONFIG_FILE: &str = "config.toml";

static ENV_PREFIX: &str = "TGAB";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub site: SiteConfig,
    pub fetch: FetchConfig,
    pub book: BookConfig,
    pub output: OutputConfig,
}

impl Config {
    /// 读取当前目录下的 config.toml（可不存在），再叠加 TGAB_ 开头的环境变量
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("{}文件反序列化失败: {}", path.display(), e))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub toc_url: String,
    /// 只取第一个匹配的容器
    #[serde(deserialize_with = "deserialize_selector")]
    pub toc_container: Selector,
    /// 容器的直接子元素中匹配的列表
    #[serde(deserialize_with = "deserialize_selector")]
    pub toc_lists: Selector,
    #[serde(deserialize_with = "deserialize_selector")]
    pub toc_items: Selector,
    /// 每个条目只取第一个匹配的链接
    #[serde(deserialize_with = "deserialize_selector")]
    pub toc_link: Selector,
    #[serde(deserialize_with = "deserialize_selector")]
    pub title: Selector,
    #[serde(deserialize_with = "deserialize_selector")]
    pub content: Selector,
    #[serde(deserialize_with = "deserialize_selector")]
    pub paragraphs: Selector,
    #[serde(deserialize_with = "deserialize_selector")]
    pub nav_links: Selector,
    pub previous_marker: String,
    pub next_marker: String,
    #[serde(deserialize_with = "deserialize_regex")]
    pub bonus_pattern: Regex,
    #[serde(deserialize_with = "deserialize_regex")]
    pub prologue_pattern: Regex,
    #[serde(deserialize_with = "deserialize_regex")]
    pub epilogue_pattern: Regex,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            toc_url: "https://tiraas.net/table-of-contents/".to_owned(),
            toc_container: selector("div.entry-content"),
            toc_lists: selector("ul"),
            toc_items: selector("li"),
            toc_link: selector("a[href]"),
            title: selector("h1.entry-title"),
            content: selector("div.site-content div.entry-content"),
            paragraphs: selector("p"),
            nav_links: selector("a[href]"),
            previous_marker: "previous".to_owned(),
            next_marker: "next".to_owned(),
            bonus_pattern: pattern("(?i)bonus"),
            prologue_pattern: pattern("(?i)prologue"),
            epilogue_pattern: pattern("(?i)epilogue"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// 同时进行的请求数上限
    pub concurrency_limit: usize,
    /// 每章最多尝试次数
    pub max_attempts: u32,
    pub pace_min_ms: u64,
    pub pace_max_ms: u64,
    pub timeout_secs: u64,
    pub user_agent: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 10,
            max_attempts: 3,
            pace_min_ms: 3000,
            pace_max_ms: 5000,
            timeout_secs: 30,
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BookConfig {
    pub title: String,
    pub author: String,
    pub lang: String,
    /// 为空时不设置封面
    pub cover_url: Option<String>,
    pub source_url: String,
    pub generator_url: String,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            title: "The Gods Are Bastards".to_owned(),
            author: "D. D. Webb".to_owned(),
            lang: "en".to_owned(),
            cover_url: Some(
                "https://www.royalroadcdn.com/public/covers-large/the-gods-are-bastards-aacauiaqzrm.jpg"
                    .to_owned(),
            ),
            source_url: "https://tiraas.net/".to_owned(),
            generator_url: "https://github.com/curohu/The-Gods-are-Bastards-Scrapper".to_owned(),
        }
    }
}

impl BookConfig {
    pub fn cover_url(&self) -> Option<&str> {
        self.cover_url.as_deref().filter(|url| !url.trim().is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub orphans: OrphanPolicy,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            orphans: OrphanPolicy::default(),
        }
    }
}

fn selector(s: &str) -> Selector {
    Selector::parse(s).expect("内置选择器无效")
}

fn pattern(s: &str) -> Regex {
    Regex::new(s).expect("内置正则表达式无效")
}

fn deserialize_selector<'de, D>(deserializer: D) -> Result<Selector, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;

    Selector::parse(&s).map_err(|e| serde::de::Error::custom(format!("Invalid selector: {}", e)))
}

fn deserialize_regex<'de, D>(deserializer: D) -> Result<Regex, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;

    Regex::new(&s).map_err(|e| serde::de::Error::custom(format!("Invalid pattern '{}': {}", s, e)))
}
