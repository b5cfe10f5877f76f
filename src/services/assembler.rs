//! 成卷组装 - 业务能力层
//!
//! 把已排序、已校验的选题结果转换成对外的试卷记录，并计算各类分布。
//! 组装本身是纯函数；唯一的副作用集中在 [`finalize`]：持久化一次、
//! 更新一次题目使用次数。

use std::collections::BTreeMap;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::infrastructure::QuestionRepository;
use crate::models::question::{Difficulty, Paper, Topic};
use crate::models::subject::Subject;
use crate::services::paper_writer::PaperSink;
use crate::services::planner::{answerable_marks, SelectionTarget};
use crate::services::selector::Picked;
use crate::services::validator::ValidationReport;

const IMG_PATTERN: &str = r#"<img\s+[^>]*src="([^"]+)""#;

/// 题干图片匹配规则，进程内只编译一次
fn image_pattern() -> Option<&'static Regex> {
    static IMAGE_RE: OnceLock<Option<Regex>> = OnceLock::new();
    IMAGE_RE
        .get_or_init(|| match Regex::new(IMG_PATTERN) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!("⚠️ 图片匹配规则无效，不提取图片: {}", e);
                None
            }
        })
        .as_ref()
}

/// 组卷过程统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttemptStats {
    pub attempts: u32,
    pub backtracks: u32,
    pub planner_draws: u32,
    pub used_fallback_plan: bool,
    pub seed: u64,
    pub elapsed_ms: u64,
}

/// 试卷中的一道题（渲染用）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaperQuestion {
    /// 卷面题号，从 1 开始
    pub number: u32,
    pub id: u64,
    pub section: String,
    pub body: String,
    pub answer: String,
    pub marks: u32,
    pub topic_id: String,
    pub topic_name: String,
    pub kind: String,
    pub difficulty: Difficulty,
    pub nested: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    /// 使用了替补分区时记录分区描述
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

/// 大题汇总
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<u32>,
    pub question_count: u32,
    pub raw_marks: u32,
    pub student_marks: u32,
    pub first_number: u32,
    pub last_number: u32,
}

/// 知识点分布
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicShare {
    pub name: String,
    pub questions: u32,
    pub marks: u32,
}

/// 一份生成好的试卷
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedPaperResult {
    pub id: String,
    pub paper_id: String,
    pub paper_name: String,
    pub subject: Subject,
    pub blueprint: String,
    pub question_ids: Vec<u64>,
    pub questions: Vec<PaperQuestion>,
    pub sections: Vec<SectionSummary>,
    pub raw_total_marks: u32,
    /// 学生可得满分（选做大题只计需作答部分）
    pub total_marks: u32,
    pub mark_distribution: BTreeMap<u32, u32>,
    pub topic_distribution: BTreeMap<String, TopicShare>,
    pub kind_distribution: BTreeMap<String, u32>,
    pub validation: ValidationReport,
    #[serde(flatten)]
    pub stats: AttemptStats,
    pub generated_at: DateTime<Utc>,
}

impl GeneratedPaperResult {
    pub fn question_count(&self) -> usize {
        self.question_ids.len()
    }

    /// 使用了替补分区的题目数
    pub fn fallback_count(&self) -> usize {
        self.questions.iter().filter(|q| q.fallback.is_some()).count()
    }
}

/// 组装试卷记录
pub fn assemble(
    paper: &Paper,
    blueprint_name: &str,
    topics: &[Topic],
    target: &SelectionTarget,
    picks: Vec<Picked>,
    validation: ValidationReport,
    stats: AttemptStats,
) -> GeneratedPaperResult {
    let topic_names: BTreeMap<&str, &str> = topics
        .iter()
        .map(|t| (t.id.as_str(), t.name.as_str()))
        .collect();
    let image_re = image_pattern();

    let mut mark_distribution = BTreeMap::new();
    let mut topic_distribution: BTreeMap<String, TopicShare> = BTreeMap::new();
    let mut kind_distribution = BTreeMap::new();
    let mut questions = Vec::with_capacity(picks.len());

    for (index, picked) in picks.into_iter().enumerate() {
        let q = picked.question;
        let topic_name = topic_names
            .get(q.topic_id.as_str())
            .map_or_else(|| q.topic_id.clone(), |n| n.to_string());

        *mark_distribution.entry(q.marks).or_insert(0u32) += 1;
        *kind_distribution.entry(q.kind.clone()).or_insert(0u32) += 1;
        let share = topic_distribution
            .entry(q.topic_id.clone())
            .or_insert_with(|| TopicShare {
                name: topic_name.clone(),
                questions: 0,
                marks: 0,
            });
        share.questions += 1;
        share.marks += q.marks;

        let images = image_re
            .map(|re| {
                re.captures_iter(&q.body)
                    .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
                    .collect()
            })
            .unwrap_or_default();

        questions.push(PaperQuestion {
            number: index as u32 + 1,
            id: q.id,
            section: picked.section,
            difficulty: q.effective_difficulty(),
            body: q.body,
            answer: q.answer,
            marks: q.marks,
            topic_id: q.topic_id,
            topic_name,
            kind: q.kind,
            nested: q.is_nested,
            images,
            fallback: picked.fallback,
        });
    }

    let sections = summarize_sections(target, &questions);
    let total_marks = sections.iter().map(|s| s.student_marks).sum();

    GeneratedPaperResult {
        id: format!("{}-{}-{:016x}", paper.id, Utc::now().format("%Y%m%d%H%M%S%3f"), stats.seed),
        paper_id: paper.id.clone(),
        paper_name: paper.name.clone(),
        subject: paper.subject,
        blueprint: blueprint_name.to_string(),
        question_ids: questions.iter().map(|q| q.id).collect(),
        raw_total_marks: questions.iter().map(|q| q.marks).sum(),
        total_marks,
        questions,
        sections,
        mark_distribution,
        topic_distribution,
        kind_distribution,
        validation,
        stats,
        generated_at: Utc::now(),
    }
}

fn summarize_sections(target: &SelectionTarget, questions: &[PaperQuestion]) -> Vec<SectionSummary> {
    target
        .sections
        .iter()
        .filter_map(|section| {
            let members: Vec<&PaperQuestion> =
                questions.iter().filter(|q| q.section == section.name).collect();
            let first = members.first()?;
            let last = members.last()?;
            let marks: Vec<u32> = members.iter().map(|q| q.marks).collect();
            Some(SectionSummary {
                name: section.name.clone(),
                answer: section.answer,
                question_count: members.len() as u32,
                raw_marks: marks.iter().sum(),
                student_marks: answerable_marks(section.answer, marks),
                first_number: first.number,
                last_number: last.number,
            })
        })
        .collect()
}

/// 成卷后的两个外部调用：持久化，然后更新题目使用次数
///
/// 持久化失败时不更新使用次数；使用次数更新失败只记录警告，
/// 不影响已经生成的试卷。
pub fn finalize(
    result: &GeneratedPaperResult,
    repository: &dyn QuestionRepository,
    sink: &dyn PaperSink,
) -> Result<String> {
    let location = sink
        .persist(result)
        .with_context(|| format!("保存试卷 {} 失败", result.id))?;
    info!("💾 试卷 {} 已保存: {}", result.id, location);

    if let Err(e) = repository.bump_usage(&result.question_ids) {
        warn!("⚠️ 试卷 {} 的题目使用次数更新失败: {:#}", result.id, e);
    }

    Ok(location)
}
