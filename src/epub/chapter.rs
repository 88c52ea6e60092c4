use chrono::{DateTime, Local};

use crate::utils::escape_xml;

/// 抓取到的章节正文，排序时不读取，只原样写出
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body(String);

impl Body {
    pub fn new(html: impl Into<String>) -> Self {
        Self(html.into())
    }

    pub fn as_html(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub url: String,
    pub title: String,
    pub body: Body,
    pub is_bonus: bool,
    pub is_prologue: bool,
    pub is_epilogue: bool,
    pub next_url: Option<String>,
    pub previous_url: Option<String>,
    /// 阅读位置（从1开始），只由 `sequence::reconstruct` 设置
    pub position: Option<usize>,
}

impl Chapter {
    pub fn new(url: impl Into<String>, title: impl Into<String>, body: Body) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            body,
            is_bonus: false,
            is_prologue: false,
            is_epilogue: false,
            next_url: None,
            previous_url: None,
            position: None,
        }
    }

    /// 唯一可以作为链起点的章节
    pub fn is_anchor(&self) -> bool {
        self.is_prologue && self.previous_url.is_none()
    }

    pub fn filename(&self) -> Option<String> {
        self.position.map(|p| format!("{}.xhtml", p))
    }

    /// 书末的装订说明
    ///
    /// 位置为 `chapter_count + 2`，空出 `chapter_count + 1`，与旧版电子书一致
    pub fn closing_notice(
        chapter_count: usize,
        generated: DateTime<Local>,
        source_url: &str,
        generator_url: &str,
    ) -> Self {
        let source_url = escape_xml(source_url);
        let generator_url = escape_xml(generator_url);
        let note = format!(
            r#"<p>This ebook was auto-generated on {}</p><p>See the original work at: <a href="{source_url}">{source_url}</a></p><p>See ebook generator at <a href="{generator_url}">{generator_url}</a></p>"#,
            generated.format("%B %d, %Y"),
        );

        let mut chapter = Self::new("", "Binder's Note", Body::new(note));
        chapter.position = Some(chapter_count + 2);
        chapter
    }
}
