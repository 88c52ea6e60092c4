//! 章节阅读顺序重建
//!
//! 目录中的番外章节位置不对，章节又是并发获取的，两者都给不出阅读顺序。
//! 每个章节页面都链接到下一章，从序章开始沿链接遍历是唯一可靠的顺序。

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::epub::Chapter;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SequenceError {
    #[error("expected exactly one prologue without a previous link, found {found}")]
    AmbiguousAnchor { found: usize },
    #[error("chapter {0} was supplied more than once")]
    DuplicateUrl(String),
    #[error("{count} chapters are not reachable from the prologue")]
    Orphaned { count: usize },
}

/// 遍历未到达的章节的处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrphanPolicy {
    Drop,
    #[default]
    Warn,
    Append,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    /// 已排序章节，位置为 `1..=len`
    pub chapters: Vec<Chapter>,
    /// 未到达的章节，按url排序，无位置
    pub orphans: Vec<Chapter>,
}

impl Sequence {
    pub fn is_complete(&self) -> bool {
        self.orphans.is_empty()
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    /// 按 `policy` 处理孤立章节，返回要装订的章节
    pub fn resolve(self, policy: OrphanPolicy) -> Result<Vec<Chapter>, SequenceError> {
        let Sequence {
            mut chapters,
            orphans,
        } = self;
        let count = orphans.len();
        if count == 0 {
            return Ok(chapters);
        }

        match policy {
            OrphanPolicy::Drop => debug!(count, "丢弃无法排序的章节"),
            OrphanPolicy::Warn => {
                for orphan in &orphans {
                    warn!(url = %orphan.url, title = %orphan.title, "章节无法从序章到达，已丢弃");
                }
            }
            OrphanPolicy::Append => {
                for mut orphan in orphans {
                    warn!(url = %orphan.url, title = %orphan.title, "章节无法从序章到达，追加到末尾");
                    orphan.position = Some(chapters.len() + 1);
                    chapters.push(orphan);
                }
            }
            OrphanPolicy::Fail => return Err(SequenceError::Orphaned { count }),
        }
        Ok(chapters)
    }
}

/// 从序章沿 `next_url` 链接为章节排序
///
/// 指向未获取或已排序章节的链接会提前结束遍历，未到达的章节放入 `orphans`。
#[instrument(skip_all, fields(total = chapters.len()))]
pub fn reconstruct(chapters: Vec<Chapter>) -> Result<Sequence, SequenceError> {
    let mut remaining: HashMap<String, Chapter> = HashMap::with_capacity(chapters.len());
    let mut anchors = Vec::new();

    for mut chapter in chapters {
        chapter.position = None;
        if chapter.is_anchor() {
            anchors.push(chapter.url.clone());
        }
        match remaining.entry(chapter.url.clone()) {
            Entry::Occupied(_) => return Err(SequenceError::DuplicateUrl(chapter.url)),
            Entry::Vacant(slot) => {
                slot.insert(chapter);
            }
        }
    }

    let [anchor] = anchors.as_slice() else {
        return Err(SequenceError::AmbiguousAnchor {
            found: anchors.len(),
        });
    };

    let mut ordered: Vec<Chapter> = Vec::with_capacity(remaining.len());
    let mut next = Some(anchor.clone());

    while let Some(url) = next {
        let Some(mut chapter) = remaining.remove(&url) else {
            debug!(%url, "下一章未获取或已排序，停止遍历");
            break;
        };
        chapter.position = Some(ordered.len() + 1);
        next = chapter.next_url.clone();
        ordered.push(chapter);
    }

    let mut orphans: Vec<Chapter> = remaining.into_values().collect();
    orphans.sort_by(|a, b| a.url.cmp(&b.url));

    info!(placed = ordered.len(), orphans = orphans.len(), "章节重新排序完成");
    Ok(Sequence {
        chapters: ordered,
        orphans,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epub::chapter::Body;

    fn chapter(url: &str, prev: Option<&str>, next: Option<&str>) -> Chapter {
        let mut chapter = Chapter::new(url, url.to_uppercase(), Body::new(format!("<p>{url}</p>")));
        chapter.previous_url = prev.map(str::to_owned);
        chapter.next_url = next.map(str::to_owned);
        chapter
    }

    fn prologue(url: &str, next: Option<&str>) -> Chapter {
        let mut chapter = chapter(url, None, next);
        chapter.title = "Prologue".to_owned();
        chapter.is_prologue = true;
        chapter
    }

    fn urls(chapters: &[Chapter]) -> Vec<&str> {
        chapters.iter().map(|c| c.url.as_str()).collect()
    }

    fn positions(chapters: &[Chapter]) -> Vec<usize> {
        chapters.iter().filter_map(|c| c.position).collect()
    }

    /// 序章、两章正文、目录里排在最后的番外、尾声
    fn book() -> Vec<Chapter> {
        let mut bonus = chapter("bonus", Some("c1"), Some("c2"));
        bonus.is_bonus = true;
        vec![
            chapter("c2", Some("bonus"), Some("epi")),
            chapter("epi", Some("c2"), None),
            prologue("pro", Some("c1")),
            chapter("c1", Some("pro"), Some("bonus")),
            bonus,
        ]
    }

    #[test]
    fn walks_links_not_input_order() {
        let sequence = reconstruct(book()).unwrap();

        assert_eq!(urls(&sequence.chapters), ["pro", "c1", "bonus", "c2", "epi"]);
        assert_eq!(positions(&sequence.chapters), [1, 2, 3, 4, 5]);
        assert!(sequence.is_complete());
    }

    #[test]
    fn same_result_for_any_input_order() {
        let expected = reconstruct(book()).unwrap();

        let mut reversed = book();
        reversed.reverse();
        assert_eq!(reconstruct(reversed).unwrap(), expected);

        let mut rotated = book();
        rotated.rotate_left(2);
        rotated.push(chapter("stray-b", None, None));
        rotated.insert(0, chapter("stray-a", None, None));
        let mut with_orphans = book();
        with_orphans.push(chapter("stray-a", None, None));
        with_orphans.push(chapter("stray-b", None, None));

        assert_eq!(
            reconstruct(rotated).unwrap(),
            reconstruct(with_orphans).unwrap()
        );
    }

    #[test]
    fn rerun_is_identical() {
        let input = book();
        let first = reconstruct(input.clone()).unwrap();
        let second = reconstruct(input.clone()).unwrap();
        assert_eq!(first, second);

        // 已排序的章节重新输入时从头开始
        let third = reconstruct(first.chapters.clone()).unwrap();
        assert_eq!(first, third);
    }

    #[test]
    fn positions_are_dense() {
        let mut input = book();
        input.push(chapter("x", None, None));
        let sequence = reconstruct(input).unwrap();

        let expected: Vec<usize> = (1..=sequence.chapters.len()).collect();
        assert_eq!(positions(&sequence.chapters), expected);
        assert!(sequence.orphans.iter().all(|c| c.position.is_none()));
    }

    #[test]
    fn no_anchor_is_ambiguous() {
        let input = vec![chapter("a", None, Some("b")), chapter("b", Some("a"), None)];
        assert_eq!(
            reconstruct(input),
            Err(SequenceError::AmbiguousAnchor { found: 0 })
        );
    }

    #[test]
    fn prologue_with_previous_link_is_not_an_anchor() {
        let mut late = prologue("p", None);
        late.previous_url = Some("earlier".to_owned());
        assert_eq!(
            reconstruct(vec![late]),
            Err(SequenceError::AmbiguousAnchor { found: 0 })
        );
    }

    #[test]
    fn two_anchors_are_ambiguous() {
        let input = vec![prologue("p1", Some("a")), prologue("p2", Some("a")), chapter("a", None, None)];
        assert_eq!(
            reconstruct(input),
            Err(SequenceError::AmbiguousAnchor { found: 2 })
        );
    }

    #[test]
    fn empty_input_is_ambiguous() {
        assert_eq!(
            reconstruct(Vec::new()),
            Err(SequenceError::AmbiguousAnchor { found: 0 })
        );
    }

    #[test]
    fn duplicate_urls_are_rejected() {
        let input = vec![prologue("p", Some("a")), chapter("a", None, None), chapter("a", None, None)];
        assert_eq!(
            reconstruct(input),
            Err(SequenceError::DuplicateUrl("a".to_owned()))
        );
    }

    #[test]
    fn dangling_link_ends_walk() {
        let input = vec![
            prologue("a", Some("b")),
            chapter("b", Some("a"), Some("c")),
            chapter("c", Some("b"), Some("missing")),
        ];
        let sequence = reconstruct(input).unwrap();

        assert_eq!(urls(&sequence.chapters), ["a", "b", "c"]);
        assert_eq!(positions(&sequence.chapters), [1, 2, 3]);
        assert!(sequence.is_complete());
    }

    #[test]
    fn unreachable_chapters_are_orphans() {
        let input = vec![
            chapter("x", None, None),
            prologue("a", Some("b")),
            chapter("b", Some("a"), None),
        ];
        let sequence = reconstruct(input).unwrap();

        assert_eq!(urls(&sequence.chapters), ["a", "b"]);
        assert_eq!(urls(&sequence.orphans), ["x"]);
        assert_eq!(sequence.orphan_count(), 1);
        assert!(!sequence.is_complete());
    }

    #[test]
    fn cycle_terminates() {
        let input = vec![prologue("a", Some("b")), chapter("b", Some("a"), Some("a"))];
        let sequence = reconstruct(input).unwrap();

        assert_eq!(urls(&sequence.chapters), ["a", "b"]);
        assert_eq!(positions(&sequence.chapters), [1, 2]);
    }

    #[test]
    fn self_link_terminates() {
        let sequence = reconstruct(vec![prologue("a", Some("a"))]).unwrap();
        assert_eq!(urls(&sequence.chapters), ["a"]);
    }

    #[test]
    fn first_claim_wins() {
        // a 和 b 都把 c 当作下一章，只有经过 a 的遍历能到达 c
        let input = vec![
            prologue("a", Some("c")),
            chapter("b", None, Some("c")),
            chapter("c", Some("a"), Some("b")),
        ];
        let sequence = reconstruct(input).unwrap();
        assert_eq!(urls(&sequence.chapters), ["a", "c", "b"]);
    }

    #[test]
    fn resolve_drop_and_warn_keep_walked_chapters() {
        let input = vec![prologue("a", None), chapter("x", None, None)];
        let sequence = reconstruct(input).unwrap();

        let dropped = sequence.clone().resolve(OrphanPolicy::Drop).unwrap();
        let warned = sequence.resolve(OrphanPolicy::Warn).unwrap();
        assert_eq!(urls(&dropped), ["a"]);
        assert_eq!(dropped, warned);
    }

    #[test]
    fn resolve_append_continues_positions() {
        let input = vec![
            chapter("z", None, None),
            prologue("a", Some("b")),
            chapter("b", Some("a"), None),
            chapter("y", None, None),
        ];
        let chapters = reconstruct(input)
            .unwrap()
            .resolve(OrphanPolicy::Append)
            .unwrap();

        assert_eq!(urls(&chapters), ["a", "b", "y", "z"]);
        assert_eq!(positions(&chapters), [1, 2, 3, 4]);
    }

    #[test]
    fn resolve_fail_reports_count() {
        let input = vec![prologue("a", None), chapter("x", None, None), chapter("y", None, None)];
        let result = reconstruct(input).unwrap().resolve(OrphanPolicy::Fail);
        assert_eq!(result, Err(SequenceError::Orphaned { count: 2 }));
    }

    #[test]
    fn resolve_fail_passes_complete_sequence() {
        let chapters = reconstruct(book())
            .unwrap()
            .resolve(OrphanPolicy::Fail)
            .unwrap();
        assert_eq!(chapters.len(), 5);
    }
}
