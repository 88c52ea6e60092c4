use std::path::PathBuf;

use anyhow::Result;
use bytes::Bytes;
use tokio::fs;
use tracing::{debug, instrument};

use crate::epub::chapter::Chapter;
use crate::utils::escape_xml;

static XML_CONTENT_1: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
    <title>"#;

static XML_CONTENT_2: &str = r#"</title>
    <meta http-equiv="Content-Type" content="text/html; charset=UTF-8"/>
</head>
<body>
    <h2>"#;

static XML_CONTENT_3: &str = r#"</h2>
    <p>"#;

static XML_CONTENT_4: &str = r#"</p>
    <div class="chapter-content">
"#;

static XML_CONTENT_5: &str = r#"
    </div>
</body>
</html>"#;

#[derive(Clone)]
pub struct Processor {
    image_dir: PathBuf,
    text_dir: PathBuf,
}

impl Processor {
    pub fn new(image_dir: PathBuf, text_dir: PathBuf) -> Self {
        Self {
            image_dir,
            text_dir,
        }
    }

    pub fn chapter_xhtml(chapter: &Chapter, position: usize) -> String {
        let title = escape_xml(&chapter.title);
        let mut xhtml_content = String::new();

        xhtml_content.push_str(XML_CONTENT_1);
        xhtml_content.push_str(&title);
        xhtml_content.push_str(XML_CONTENT_2);
        xhtml_content.push_str(&title);
        xhtml_content.push_str(XML_CONTENT_3);
        xhtml_content.push_str(&position.to_string());
        xhtml_content.push_str(XML_CONTENT_4);
        xhtml_content.push_str(chapter.body.as_html());
        xhtml_content.push_str(XML_CONTENT_5);
        xhtml_content
    }

    /// 写入 text/{位置}.xhtml
    #[instrument(skip_all)]
    pub async fn write_chapter(&self, chapter: &Chapter) -> Result<()> {
        let (Some(position), Some(filename)) = (chapter.position, chapter.filename()) else {
            anyhow::bail!("章节 {} 没有排序位置", chapter.url);
        };

        let xhtml_path = self.text_dir.join(&filename);
        fs::write(&xhtml_path, Self::chapter_xhtml(chapter, position)).await?;
        debug!("章节 XHTML 已保存到: {}", xhtml_path.display());
        Ok(())
    }

    /// 封面写入 images/cover.{扩展名}，返回文件名
    #[instrument(skip_all)]
    pub async fn write_cover(&self, image_bytes: Bytes, extension: &str) -> Result<String> {
        let filename = format!("cover.{}", extension);
        let image_path = self.image_dir.join(&filename);
        fs::write(&image_path, &image_bytes).await?;
        debug!("封面已保存到: {}", image_path.display());
        Ok(filename)
    }
}
