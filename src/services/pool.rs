//! 候选题池 - 业务能力层
//!
//! 按 (分区标记, 分值, 是否多小问, 题型, 知识点分类) 对题库做分区。
//! 每个分区在一次组卷中只向仓储查询一次，每次尝试前重新打乱。

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tracing::debug;

use crate::infrastructure::{QuestionFilter, QuestionRepository};
use crate::models::blueprint::{Bounds, Fallback};
use crate::models::question::{Question, Topic};
use crate::services::planner::SelectionTarget;

/// 分区的分值条件
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkFilter {
    Exact(u32),
    Range { min: u32, max: u32 },
}

/// 分区键
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PartitionKey {
    pub section: Option<String>,
    pub marks: MarkFilter,
    pub nested: Option<bool>,
    pub kind: Option<String>,
    pub category: Option<String>,
}

impl PartitionKey {
    pub fn exact(marks: u32) -> Self {
        Self {
            section: None,
            marks: MarkFilter::Exact(marks),
            nested: None,
            kind: None,
            category: None,
        }
    }

    /// 用替补条件生成新的分区键（分区标记和分值保持不变）
    pub fn with_fallback(&self, fallback: &Fallback) -> Self {
        Self {
            section: self.section.clone(),
            marks: self.marks.clone(),
            nested: fallback.nested,
            kind: fallback.kind.clone(),
            category: fallback.category.clone(),
        }
    }

    /// 转换为仓储查询条件
    pub fn filter(&self, text_contains: Option<&str>) -> QuestionFilter {
        let mut filter = QuestionFilter::new();
        filter.section = self.section.clone();
        match self.marks {
            MarkFilter::Exact(marks) => filter.mark_value = Some(marks),
            MarkFilter::Range { min, max } => filter.mark_range = Some(Bounds::new(min, max)),
        }
        filter.nested = self.nested;
        filter.kind = self.kind.clone();
        filter.text_contains = text_contains.map(str::to_string);
        filter
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let any = "*";
        let marks = match self.marks {
            MarkFilter::Exact(m) => m.to_string(),
            MarkFilter::Range { min, max } => format!("{}-{}", min, max),
        };
        let nested = match self.nested {
            Some(true) => "nested",
            Some(false) => "standalone",
            None => any,
        };
        write!(
            f,
            "[大题标记={} 分值={} 形态={} 题型={} 分类={}]",
            self.section.as_deref().unwrap_or(any),
            marks,
            nested,
            self.kind.as_deref().unwrap_or(any),
            self.category.as_deref().unwrap_or(any),
        )
    }
}

/// 分区诊断：题库里有多少、配额需要多少、失败了几次
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionStat {
    pub partition: String,
    pub available: usize,
    pub required: u32,
    pub failures: u32,
}

impl std::fmt::Display for PartitionStat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} 可用 {} 道 / 需要 {} 道 (失败 {} 次)",
            self.partition, self.available, self.required, self.failures
        )
    }
}

/// 一次组卷使用的候选题池
pub struct CandidatePool<'a> {
    repository: &'a dyn QuestionRepository,
    paper_id: String,
    topics: Vec<Topic>,
    text_contains: Option<String>,
    partitions: HashMap<PartitionKey, Vec<Question>>,
}

impl<'a> CandidatePool<'a> {
    pub fn new(
        repository: &'a dyn QuestionRepository,
        paper_id: impl Into<String>,
        topics: Vec<Topic>,
        text_contains: Option<String>,
    ) -> Self {
        Self {
            repository,
            paper_id: paper_id.into(),
            topics,
            text_contains,
            partitions: HashMap::new(),
        }
    }

    /// 确保目标中所有分区（含替补分区）都已加载
    pub fn prepare(&mut self, target: &SelectionTarget) {
        for slot in target.slots() {
            self.load(&slot.key);
            for fallback in &slot.fallbacks {
                self.load(fallback);
            }
        }
    }

    fn load(&mut self, key: &PartitionKey) {
        if self.partitions.contains_key(key) {
            return;
        }

        // 带分类条件的分区只在具有该分类的知识点中查找
        let topic_ids: Vec<String> = self
            .topics
            .iter()
            .filter(|t| key.category.as_deref().map_or(true, |c| t.has_category(c)))
            .map(|t| t.id.clone())
            .collect();

        let questions = if topic_ids.is_empty() {
            Vec::new()
        } else {
            let filter = key.filter(self.text_contains.as_deref());
            self.repository.find(&self.paper_id, &topic_ids, &filter)
        };

        debug!("分区 {} 加载了 {} 道题", key, questions.len());
        self.partitions.insert(key.clone(), questions);
    }

    /// 分区中的题目数量（未加载的分区为 0）
    pub fn available(&self, key: &PartitionKey) -> usize {
        self.partitions.get(key).map_or(0, Vec::len)
    }

    /// 生成本次尝试使用的打乱视图
    pub fn shuffled<R: Rng + ?Sized>(&self, rng: &mut R) -> AttemptPool<'_> {
        let mut keys: Vec<&PartitionKey> = self.partitions.keys().collect();
        // HashMap 遍历顺序不稳定，先排序保证相同种子可复现
        keys.sort();

        let partitions = keys
            .into_iter()
            .map(|key| {
                let mut questions: Vec<&Question> = self.partitions[key].iter().collect();
                questions.shuffle(rng);
                (key.clone(), questions)
            })
            .collect();

        AttemptPool { partitions }
    }
}

/// 单次尝试内的已打乱题池
pub struct AttemptPool<'p> {
    partitions: HashMap<PartitionKey, Vec<&'p Question>>,
}

impl<'p> AttemptPool<'p> {
    pub fn candidates(&self, key: &PartitionKey) -> &[&'p Question] {
        self.partitions.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::InMemoryRepository;
    use crate::test_support::{question, topic};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_fallback_key_keeps_marks_and_section() {
        let mut key = PartitionKey::exact(12);
        key.section = Some("B".to_string());
        key.kind = Some("graph".to_string());
        key.nested = Some(true);

        let fallback = key.with_fallback(&Fallback::kind("structured"));
        assert_eq!(fallback.marks, MarkFilter::Exact(12));
        assert_eq!(fallback.section.as_deref(), Some("B"));
        assert_eq!(fallback.kind.as_deref(), Some("structured"));
        assert_eq!(fallback.nested, None);
    }

    /// 分类分区只查询带该分类的知识点
    #[test]
    fn test_category_partition_routes_topics() {
        let mut repo = InMemoryRepository::new();
        let mut comprehension = topic("reading");
        comprehension.categories = vec!["is_comprehension".to_string()];
        repo.add_topic(comprehension.clone());
        repo.add_topic(topic("grammar"));
        repo.add_question(question(1, "reading", 20)).unwrap();
        repo.add_question(question(2, "grammar", 20)).unwrap();

        let mut pool = CandidatePool::new(&repo, "p1", vec![comprehension, topic("grammar")], None);
        let mut key = PartitionKey::exact(20);
        key.category = Some("is_comprehension".to_string());
        pool.load(&key);
        pool.load(&PartitionKey::exact(20));

        assert_eq!(pool.available(&key), 1);
        assert_eq!(pool.available(&PartitionKey::exact(20)), 2);

        let mut rng = StdRng::seed_from_u64(1);
        let attempt = pool.shuffled(&mut rng);
        assert_eq!(attempt.candidates(&key)[0].id, 1);
        assert!(attempt.candidates(&PartitionKey::exact(3)).is_empty());
    }

    #[test]
    fn test_display_marks_wildcards() {
        let key = PartitionKey::exact(20);
        assert_eq!(
            key.to_string(),
            "[大题标记=* 分值=20 形态=* 题型=* 分类=*]"
        );
    }
}
