use anyhow::Result;
use tokio::fs;
use tracing::{info, instrument};

use crate::epub::chapter::Chapter;
use crate::utils::escape_xml;

use super::Epub;

static COVER_PAGE: &str = "cover.xhtml";

pub struct Metadata;

impl Default for Metadata {
    fn default() -> Self {
        Self::new()
    }
}

impl Metadata {
    pub fn new() -> Self {
        Self
    }

    /// 生成mimetype文件
    #[instrument(skip_all)]
    pub async fn mimetype(&self, epub: &Epub) -> Result<()> {
        let mimetype_content = "application/epub+zip";
        fs::write(epub.epub_dir.join("mimetype"), mimetype_content).await?;
        Ok(())
    }

    /// 生成container.xml文件
    #[instrument(skip_all)]
    pub async fn container_xml(&self, epub: &Epub) -> Result<()> {
        let container_content = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
    <rootfiles>
        <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
    </rootfiles>
</container>"#;
        fs::write(epub.meta_dir.join("container.xml"), container_content).await?;
        Ok(())
    }

    /// 有封面时生成封面页
    #[instrument(skip_all)]
    pub async fn cover_page(&self, epub: &Epub) -> Result<()> {
        let Some(cover_name) = &epub.cover else {
            return Ok(());
        };
        let title = escape_xml(&epub.title);
        let cover_html = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
    <title>{title}</title>
    <meta http-equiv="Content-Type" content="text/html; charset=UTF-8"/>
</head>
<body>
    <div class="cover">
        <img src="../images/{cover_name}" alt="{title}"/>
    </div>
</body>
</html>"#
        );
        fs::write(epub.text_dir.join(COVER_PAGE), cover_html).await?;
        Ok(())
    }

    /// 生成content.opf文件
    #[instrument(skip_all)]
    pub async fn content_opf(&self, epub: &Epub) -> Result<()> {
        fs::write(epub.oebps_dir.join("content.opf"), Self::opf(epub)).await?;
        Ok(())
    }

    pub fn opf(epub: &Epub) -> String {
        let mut content_opf = String::new();
        Self::opf_header(&mut content_opf);
        Self::opf_metadata(&mut content_opf, epub);
        Self::opf_manifest(&mut content_opf, epub);
        Self::opf_spine(&mut content_opf, epub);
        Self::opf_guide(&mut content_opf, epub);
        Self::opf_footer(&mut content_opf);
        content_opf
    }

    /// 生成toc.ncx文件
    #[instrument(skip_all)]
    pub async fn toc_ncx(&self, epub: &Epub) -> Result<()> {
        fs::write(epub.oebps_dir.join("toc.ncx"), Self::ncx(epub)).await?;
        Ok(())
    }

    pub fn ncx(epub: &Epub) -> String {
        let mut toc_ncx = String::new();

        toc_ncx.push_str(&format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx version="2005-1" xmlns="http://www.daisy.org/z3986/2005/ncx/">
    <head>
        <meta name="dtb:uid" content="{}"/>
        <meta name="dtb:depth" content="1"/>
        <meta name="dtb:totalPageCount" content="0"/>
        <meta name="dtb:maxPageNumber" content="0"/>
    </head>
    <docTitle>
        <text>{}</text>
    </docTitle>
    <navMap>"#,
            epub.id,
            escape_xml(&epub.title)
        ));

        // playOrder 需要连续，不能直接用章节位置
        for (play_order, (position, chapter)) in Self::placed(&epub.chapters).enumerate() {
            toc_ncx.push_str(&format!(
                r#"
        <navPoint id="navPoint{}" playOrder="{}">
            <navLabel>
                <text>{}</text>
            </navLabel>
            <content src="text/{}.xhtml"/>
        </navPoint>"#,
                position,
                play_order + 1,
                escape_xml(&chapter.title),
                position
            ));
        }

        toc_ncx.push_str(
            r#"
    </navMap>
</ncx>"#,
        );
        toc_ncx
    }

    /// 生成所有元数据文件
    #[instrument(skip_all)]
    pub async fn generate(&self, epub: &Epub) -> Result<()> {
        info!("正在生成EPUB元数据文件");
        self.mimetype(epub).await?;
        self.container_xml(epub).await?;
        self.cover_page(epub).await?;
        self.content_opf(epub).await?;
        self.toc_ncx(epub).await?;

        info!("EPUB元数据文件已生成");
        Ok(())
    }
}

impl Metadata {
    fn placed(chapters: &[Chapter]) -> impl Iterator<Item = (usize, &Chapter)> {
        chapters
            .iter()
            .filter_map(|c| c.position.map(|position| (position, c)))
    }

    fn opf_header(content_opf: &mut String) {
        content_opf.push_str(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package version="2.0" xmlns="http://www.idpf.org/2007/opf" unique-identifier="BookId">"#,
        );
    }

    fn opf_metadata(content_opf: &mut String, epub: &Epub) {
        content_opf.push_str(&format!(
            r#"
    <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
        <dc:identifier id="BookId">{}</dc:identifier>
        <dc:title>{}</dc:title>
        <dc:language>{}</dc:language>
        <dc:creator opf:role="aut">{}</dc:creator>
        <dc:date>{}</dc:date>"#,
            epub.id,
            escape_xml(&epub.title),
            escape_xml(&epub.lang),
            escape_xml(&epub.author),
            chrono::Local::now().format("%Y-%m-%d"),
        ));

        if epub.cover.is_some() {
            content_opf.push_str(
                r#"
        <meta name="cover" content="cover-image"/>"#,
            );
        }

        content_opf.push_str(
            r#"
        <meta name="generator" content="tgab-fetch"/>
    </metadata>"#,
        );
    }

    fn opf_manifest(content_opf: &mut String, epub: &Epub) {
        content_opf.push_str(
            r#"
    <manifest>
        <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>"#,
        );

        if let Some(cover_name) = &epub.cover {
            content_opf.push_str(&format!(
                r#"
        <item id="cover-image" href="images/{}" media-type="{}"/>
        <item id="cover" href="text/{}" media-type="application/xhtml+xml"/>"#,
                cover_name,
                Self::get_media_type(cover_name),
                COVER_PAGE
            ));
        }

        for (position, _) in Self::placed(&epub.chapters) {
            content_opf.push_str(&format!(
                r#"
        <item id="chap{}" href="text/{}.xhtml" media-type="application/xhtml+xml"/>"#,
                position, position
            ));
        }
        content_opf.push_str(
            r#"
    </manifest>"#,
        );
    }

    fn opf_spine(content_opf: &mut String, epub: &Epub) {
        content_opf.push_str(
            r#"
    <spine toc="ncx">"#,
        );

        if epub.cover.is_some() {
            content_opf.push_str(
                r#"
        <itemref idref="cover"/>"#,
            );
        }

        for (position, _) in Self::placed(&epub.chapters) {
            content_opf.push_str(&format!(
                r#"
        <itemref idref="chap{}"/>"#,
                position
            ));
        }

        content_opf.push_str(
            r#"
    </spine>"#,
        );
    }

    fn opf_guide(content_opf: &mut String, epub: &Epub) {
        if epub.cover.is_none() {
            return;
        }
        content_opf.push_str(&format!(
            r#"
    <guide>
        <reference type="cover" title="Cover" href="text/{}"/>
    </guide>"#,
            COVER_PAGE
        ));
    }

    fn opf_footer(content_opf: &mut String) {
        content_opf.push_str(
            r#"
</package>"#,
        );
    }

    fn get_media_type(filename: &str) -> &str {
        if filename.ends_with(".png") {
            "image/png"
        } else if filename.ends_with(".jpg") || filename.ends_with(".jpeg") {
            "image/jpeg"
        } else if filename.ends_with(".gif") {
            "image/gif"
        } else if filename.ends_with(".webp") {
            "image/webp"
        } else {
            "application/octet-stream"
        }
    }
}
