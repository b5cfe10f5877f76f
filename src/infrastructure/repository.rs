//! 题库仓储 - 基础设施层
//!
//! 持有题库数据，只暴露"按条件查题"和"更新使用次数"两种能力

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use chrono::Utc;
use tracing::debug;

use crate::error::ConfigError;
use crate::models::blueprint::Bounds;
use crate::models::question::{Paper, Question, Topic};

/// 查题条件，所有条件取交集
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestionFilter {
    pub section: Option<String>,
    pub mark_value: Option<u32>,
    pub mark_range: Option<Bounds>,
    pub nested: Option<bool>,
    pub kind: Option<String>,
    /// 题干包含该文本（不区分大小写）
    pub text_contains: Option<String>,
    /// 默认只返回启用中的题目
    pub include_inactive: bool,
}

impl QuestionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    pub fn marks(mut self, marks: u32) -> Self {
        self.mark_value = Some(marks);
        self
    }

    pub fn mark_range(mut self, range: Bounds) -> Self {
        self.mark_range = Some(range);
        self
    }

    pub fn nested(mut self, nested: bool) -> Self {
        self.nested = Some(nested);
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn text_contains(mut self, text: impl Into<String>) -> Self {
        self.text_contains = Some(text.into());
        self
    }

    /// 判断题目是否满足条件
    pub fn matches(&self, question: &Question) -> bool {
        if !self.include_inactive && !question.active {
            return false;
        }
        if let Some(section) = &self.section {
            if question.section.as_deref() != Some(section.as_str()) {
                return false;
            }
        }
        if let Some(marks) = self.mark_value {
            if question.marks != marks {
                return false;
            }
        }
        if let Some(range) = self.mark_range {
            if !range.contains(question.marks) {
                return false;
            }
        }
        if let Some(nested) = self.nested {
            if question.is_nested != nested {
                return false;
            }
        }
        if let Some(kind) = &self.kind {
            if &question.kind != kind {
                return false;
            }
        }
        if let Some(text) = &self.text_contains {
            if !question.body.to_lowercase().contains(&text.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

/// 题库仓储能力
///
/// 结果顺序不做保证，调用方自行打乱。
pub trait QuestionRepository: Send + Sync {
    /// 按ID获取试卷
    fn paper(&self, paper_id: &str) -> Option<Paper>;

    /// 获取试卷下的全部知识点（含停用的）
    fn topics(&self, paper_id: &str) -> Vec<Topic>;

    /// 按条件查询指定知识点下的题目
    fn find(&self, paper_id: &str, topic_ids: &[String], filter: &QuestionFilter) -> Vec<Question>;

    /// 成卷后更新题目使用次数和最近使用时间
    fn bump_usage(&self, question_ids: &[u64]) -> Result<()>;
}

/// 内存题库
///
/// 试卷和知识点在装载完成后只读，题目的使用计数通过 RwLock 更新，
/// 因此可以用 Arc 在多个组卷任务间共享。
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    papers: HashMap<String, Paper>,
    topics: HashMap<String, Vec<Topic>>,
    questions: RwLock<Vec<Question>>,
    index: HashMap<u64, usize>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_paper(&mut self, paper: Paper) -> std::result::Result<(), ConfigError> {
        if self.papers.contains_key(&paper.id) {
            return Err(ConfigError::DuplicatePaperId { id: paper.id });
        }
        self.papers.insert(paper.id.clone(), paper);
        Ok(())
    }

    pub fn add_topic(&mut self, topic: Topic) {
        self.topics
            .entry(topic.paper_id.clone())
            .or_default()
            .push(topic);
    }

    pub fn add_question(&mut self, question: Question) -> std::result::Result<(), ConfigError> {
        if self.index.contains_key(&question.id) {
            return Err(ConfigError::DuplicateQuestionId { id: question.id });
        }
        let questions = self
            .questions
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.index.insert(question.id, questions.len());
        questions.push(question);
        Ok(())
    }

    /// 获取题目快照
    pub fn question(&self, id: u64) -> Option<Question> {
        let position = *self.index.get(&id)?;
        let questions = self.questions.read().unwrap_or_else(|p| p.into_inner());
        questions.get(position).cloned()
    }

    pub fn paper_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.papers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn question_count(&self) -> usize {
        self.index.len()
    }
}

impl QuestionRepository for InMemoryRepository {
    fn paper(&self, paper_id: &str) -> Option<Paper> {
        self.papers.get(paper_id).cloned()
    }

    fn topics(&self, paper_id: &str) -> Vec<Topic> {
        self.topics.get(paper_id).cloned().unwrap_or_default()
    }

    fn find(&self, paper_id: &str, topic_ids: &[String], filter: &QuestionFilter) -> Vec<Question> {
        let questions = self.questions.read().unwrap_or_else(|p| p.into_inner());
        let found: Vec<Question> = questions
            .iter()
            .filter(|q| q.paper_id == paper_id)
            .filter(|q| topic_ids.iter().any(|t| t == &q.topic_id))
            .filter(|q| filter.matches(q))
            .cloned()
            .collect();

        debug!(
            "查询题库: 试卷 {} | 知识点 {} 个 | 条件 {:?} | 命中 {} 道",
            paper_id,
            topic_ids.len(),
            filter,
            found.len()
        );

        found
    }

    fn bump_usage(&self, question_ids: &[u64]) -> Result<()> {
        let mut questions = self
            .questions
            .write()
            .map_err(|_| anyhow::anyhow!("题库写锁已失效"))?;
        let now = Utc::now();
        let mut missing = Vec::new();

        for id in question_ids {
            match self.index.get(id).and_then(|&i| questions.get_mut(i)) {
                Some(question) => {
                    question.times_used += 1;
                    question.last_used = Some(now);
                }
                None => missing.push(*id),
            }
        }

        if !missing.is_empty() {
            anyhow::bail!("以下题目不存在，未能更新使用次数: {:?}", missing);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{question, topic};

    fn create_test_repository() -> InMemoryRepository {
        let mut repo = InMemoryRepository::new();
        repo.add_topic(topic("t1"));
        repo.add_topic(topic("t2"));
        repo.add_question(question(1, "t1", 2)).unwrap();
        repo.add_question(question(2, "t1", 5).nested_question()).unwrap();
        repo.add_question(question(3, "t2", 2).with_section("A")).unwrap();
        repo.add_question(question(4, "t2", 2).with_kind("graph").inactive())
            .unwrap();
        repo
    }

    #[test]
    fn test_find_combined_filters() {
        let repo = create_test_repository();
        let topics = vec!["t1".to_string(), "t2".to_string()];

        let two_mark = repo.find("p1", &topics, &QuestionFilter::new().marks(2));
        let mut ids: Vec<u64> = two_mark.iter().map(|q| q.id).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 3]);

        let section_a = repo.find("p1", &topics, &QuestionFilter::new().section("A").marks(2));
        assert_eq!(section_a.len(), 1);
        assert_eq!(section_a[0].id, 3);

        let nested = repo.find("p1", &topics, &QuestionFilter::new().nested(true));
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].id, 2);

        let ranged = repo.find(
            "p1",
            &topics,
            &QuestionFilter::new().mark_range(Bounds::new(3, 8)),
        );
        assert_eq!(ranged.len(), 1);
    }

    /// 停用题目默认不返回
    #[test]
    fn test_find_excludes_inactive() {
        let repo = create_test_repository();
        let topics = vec!["t2".to_string()];
        let graphs = repo.find("p1", &topics, &QuestionFilter::new().kind("graph"));
        assert!(graphs.is_empty());

        let mut filter = QuestionFilter::new().kind("graph");
        filter.include_inactive = true;
        assert_eq!(repo.find("p1", &topics, &filter).len(), 1);
    }

    #[test]
    fn test_find_text_contains_case_insensitive() {
        let mut repo = InMemoryRepository::new();
        let mut q = question(9, "t1", 3);
        q.body = "Describe the Process of Osmosis".to_string();
        repo.add_question(q).unwrap();

        let found = repo.find(
            "p1",
            &["t1".to_string()],
            &QuestionFilter::new().text_contains("osmosis"),
        );
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_bump_usage() {
        let repo = create_test_repository();
        repo.bump_usage(&[1, 3]).unwrap();
        repo.bump_usage(&[1]).unwrap();

        let q1 = repo.question(1).unwrap();
        assert_eq!(q1.times_used, 2);
        assert!(q1.last_used.is_some());
        assert_eq!(repo.question(2).unwrap().times_used, 0);

        assert!(repo.bump_usage(&[42]).is_err());
    }

    #[test]
    fn test_duplicate_question_rejected() {
        let mut repo = create_test_repository();
        assert!(repo.add_question(question(1, "t1", 2)).is_err());
    }
}
