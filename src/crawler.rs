pub mod downloader;
pub mod parser;
pub mod processor;
pub mod task;

pub use task::TaskManager;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use tokio::fs;
use tracing::{info, instrument, warn};

pub use downloader::{Downloader, FetchError};
pub use parser::Parser;
pub use processor::Processor;

use crate::config::Config;
use crate::epub::{Chapter, Epub};
use crate::sequence;
use crate::utils::sanitize_filename;

pub struct TgabCrawler {
    config: Config,
    parser: Arc<Parser>,
    downloader: Downloader,
}

impl TgabCrawler {
    pub fn new(config: Config) -> Result<Self> {
        let downloader = Downloader::new(&config.fetch)?;
        let parser = Arc::new(Parser::new(config.site.clone()));
        Ok(Self {
            config,
            parser,
            downloader,
        })
    }

    /// 目录页中的全部章节链接，顺序不代表阅读顺序
    #[instrument(skip_all)]
    pub async fn chapter_urls(&self) -> Result<Vec<String>> {
        let toc_url = &self.config.site.toc_url;
        let html = self.downloader.text(toc_url).await?;
        self.parser.toc(toc_url, &html)
    }

    /// 并发获取所有章节，任何一章失败则整批失败
    #[instrument(skip_all, fields(count = urls.len()))]
    pub async fn fetch_chapters(&self, urls: Vec<String>) -> Result<Vec<Chapter>> {
        let mut tasks = TaskManager::new();

        for url in urls {
            let downloader = self.downloader.clone();
            let parser = self.parser.clone();
            tasks.spawn(async move {
                let html = downloader.text(&url).await?;
                let chapter = parser.chapter(&url, &html)?;
                info!("已获取章节: {}", url);
                Ok(chapter)
            });
        }

        info!("已提交 {} 个章节获取任务", tasks.len());
        tasks.wait().await
    }

    /// 获取、排序、装订，返回生成的EPUB路径
    pub async fn generate_epub(&self) -> Result<PathBuf> {
        let urls = self.chapter_urls().await?;
        info!("共有 {} 个章节待获取", urls.len());

        let chapters = self.fetch_chapters(urls).await?;
        info!("已获取 {} 个章节", chapters.len());

        let sequence = sequence::reconstruct(chapters)?;
        if !sequence.is_complete() {
            warn!("{} 个章节无法从序章到达", sequence.orphan_count());
        }
        let mut chapters = sequence.resolve(self.config.output.orphans)?;
        info!("章节已重新排序");

        let book = &self.config.book;
        chapters.push(Chapter::closing_notice(
            chapters.len(),
            Local::now(),
            &book.source_url,
            &book.generator_url,
        ));

        info!("正在装订电子书");
        self.bind(chapters).await
    }

    #[instrument(skip_all)]
    pub async fn bind(&self, chapters: Vec<Chapter>) -> Result<PathBuf> {
        let book = &self.config.book;
        let output_dir = &self.config.output.dir;
        fs::create_dir_all(output_dir).await?;

        let name = sanitize_filename(&book.title);
        let epub_dir = output_dir.join(format!(".{}.staging", name));
        let mut epub = Epub::new(book, &self.config.site.toc_url, chapters, epub_dir);
        epub.create_dirs().await?;

        let processor = Processor::new(epub.image_dir.clone(), epub.text_dir.clone());
        if let Some(cover_url) = book.cover_url() {
            let (cover_bytes, extension) = self.downloader.image(cover_url).await?;
            let cover_name = processor.write_cover(cover_bytes, &extension).await?;
            epub.cover = Some(cover_name);
        }

        for chapter in &epub.chapters {
            processor.write_chapter(chapter).await?;
        }

        epub.generate(&output_dir.join(format!("{}.epub", name)))
            .await
    }
}
