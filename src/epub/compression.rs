use anyhow::Result;
use async_zip::tokio::write::ZipFileWriter;
use async_zip::{Compression, ZipEntryBuilder};
use std::path::Path;
use tokio::fs::{self, File};
use tracing::{debug, error, info, instrument};

pub struct Compressor;

impl Default for Compressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor {
    pub fn new() -> Self {
        Self
    }

    /// 压缩EPUB文件夹为EPUB文件，失败时删除写了一半的文件
    #[instrument(skip_all)]
    pub async fn compress_epub(&self, epub_dir: &Path, epub_path: &Path) -> Result<()> {
        info!("正在压缩EPUB文件: {}", epub_path.display());

        let result = Self::write_archive(epub_dir, epub_path).await;
        if result.is_err() && epub_path.exists() {
            if let Err(e) = fs::remove_file(epub_path).await {
                error!("删除不完整的EPUB文件时出错: {}: {}", epub_path.display(), e);
            }
        }
        result
    }

    async fn write_archive(epub_dir: &Path, epub_path: &Path) -> Result<()> {
        let file = File::create(epub_path).await?;
        let mut writer = ZipFileWriter::with_tokio(file);

        // mimetype 必须是第一个条目且不压缩
        Self::add_mimetype(&mut writer, epub_dir).await?;
        Self::add_directory(&mut writer, epub_dir).await?;

        writer.close().await?;
        Ok(())
    }

    async fn add_mimetype(writer: &mut ZipFileWriter<File>, dir: &Path) -> Result<()> {
        let path = dir.join("mimetype");
        let content = fs::read(&path).await?;

        if content != b"application/epub+zip" {
            anyhow::bail!("mimetype 内容无效");
        }

        let entry = ZipEntryBuilder::new("mimetype".into(), Compression::Stored);
        writer.write_entry_whole(entry, &content).await?;
        Ok(())
    }

    async fn add_directory(writer: &mut ZipFileWriter<File>, root_dir: &Path) -> Result<()> {
        // 使用栈存储待处理的目录和其在ZIP中的基础路径
        let mut stack = vec![(root_dir.to_path_buf(), String::new())];

        while let Some((current_dir, current_base_path)) = stack.pop() {
            let mut entries = fs::read_dir(&current_dir).await?;

            let mut sub_dirs = Vec::new();
            let mut files = Vec::new();

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().to_string();

                if name == "mimetype" && current_base_path.is_empty() {
                    continue;
                }

                let zip_path = if current_base_path.is_empty() {
                    name.clone()
                } else {
                    format!("{}/{}", current_base_path, name)
                };

                if entry.file_type().await?.is_dir() {
                    sub_dirs.push((path, zip_path));
                } else {
                    files.push((path, zip_path));
                }
            }

            // 目录读取顺序不固定，排序后打包结果可复现
            files.sort_by(|a, b| a.1.cmp(&b.1));
            sub_dirs.sort_by(|a, b| a.1.cmp(&b.1));

            for (file_path, zip_path) in files {
                Self::add_file(writer, &file_path, &zip_path).await?;
            }

            // 逆序压栈以保证按名称顺序处理
            for (dir_path, zip_path) in sub_dirs.into_iter().rev() {
                stack.push((dir_path, zip_path));
            }
        }

        Ok(())
    }

    async fn add_file(
        writer: &mut ZipFileWriter<File>,
        file_path: &Path,
        zip_path: &str,
    ) -> Result<()> {
        debug!("正在添加文件: {}", zip_path);

        let content = fs::read(file_path).await?;

        let entry = ZipEntryBuilder::new(zip_path.to_owned().into(), Compression::Deflate);
        writer.write_entry_whole(entry, &content).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn archive_written_from_directory() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join("stage");
        std::fs::create_dir_all(dir.join("OEBPS").join("text")).unwrap();
        std::fs::write(dir.join("mimetype"), "application/epub+zip").unwrap();
        std::fs::write(dir.join("OEBPS").join("text").join("1.xhtml"), "<html/>").unwrap();

        let out = temp.path().join("book.epub");
        Compressor::new().compress_epub(&dir, &out).await.unwrap();

        let bytes = std::fs::read(&out).unwrap();
        assert_eq!(&bytes[..2], b"PK");
        // 第一个条目的文件名紧跟在30字节的本地文件头之后
        assert_eq!(&bytes[30..38], b"mimetype");
    }

    #[tokio::test]
    async fn failed_archive_is_removed() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join("stage");
        std::fs::create_dir_all(&dir).unwrap();

        let out = temp.path().join("book.epub");
        assert!(Compressor::new().compress_epub(&dir, &out).await.is_err());
        assert!(!out.exists());
    }
}
