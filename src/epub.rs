pub mod chapter;
pub mod compression;
pub mod metadata;

pub use chapter::Chapter;
pub use compression::Compressor;
pub use metadata::Metadata;

use std::path::{Path, PathBuf};

use anyhow::Result;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::instrument;

use crate::config::BookConfig;

#[derive(Debug)]
pub struct Epub {
    pub id: String,
    pub title: String,
    pub lang: String,
    pub author: String,
    pub cover: Option<String>,  // images/ 下的封面文件名
    pub chapters: Vec<Chapter>, // 按位置升序
    pub epub_dir: PathBuf,
    pub meta_dir: PathBuf,
    pub oebps_dir: PathBuf,
    pub image_dir: PathBuf,
    pub text_dir: PathBuf,
}

impl Epub {
    /// `epub_dir` 是临时目录，打包后随 Epub 一起删除
    pub fn new(book: &BookConfig, source: &str, mut chapters: Vec<Chapter>, epub_dir: PathBuf) -> Self {
        chapters.sort_by_key(|c| c.position);

        let meta_dir = epub_dir.join("META-INF");
        let oebps_dir = epub_dir.join("OEBPS");
        let image_dir = oebps_dir.join("images");
        let text_dir = oebps_dir.join("text");

        Self {
            id: book_id(source),
            title: book.title.clone(),
            lang: book.lang.clone(),
            author: book.author.clone(),
            cover: None,
            chapters,
            epub_dir,
            meta_dir,
            oebps_dir,
            image_dir,
            text_dir,
        }
    }

    pub async fn create_dirs(&self) -> Result<()> {
        if self.epub_dir.exists() {
            fs::remove_dir_all(&self.epub_dir).await?;
        }
        fs::create_dir_all(&self.meta_dir).await?;
        fs::create_dir_all(&self.image_dir).await?;
        fs::create_dir_all(&self.text_dir).await?;
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn generate(&self, epub_path: &Path) -> Result<PathBuf> {
        tracing::info!("正在生成EPUB文件: {}", self.title);

        let metadata = Metadata::new();

        // 生成所有元数据文件
        metadata.generate(self).await?;

        // 压缩成EPUB文件
        let compressor = Compressor::new();
        compressor.compress_epub(&self.epub_dir, epub_path).await?;

        tracing::info!("EPUB文件生成成功: {}", epub_path.display());
        Ok(epub_path.to_path_buf())
    }
}

impl Drop for Epub {
    fn drop(&mut self) {
        if self.epub_dir.exists() {
            // 删除EPUB文件夹
            tracing::debug!("正在清理临时文件夹: {}", self.epub_dir.display());
            if let Err(e) = std::fs::remove_dir_all(&self.epub_dir) {
                tracing::error!("删除临时文件夹时出错: {}: {}", self.epub_dir.display(), e)
            }
        }
    }
}

/// 由目录页链接派生的稳定标识
pub fn book_id(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}
