//! 选题 - 业务能力层
//!
//! 把规划好的配额落到真实题目上。一次调用就是一次"尝试"：
//! 从空状态开始逐个配额抽题，任何一个配额填不满都放弃整次尝试，
//! 由流程层换一个随机种子从头再来。

use std::collections::{BTreeMap, HashMap, HashSet};

use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tracing::debug;

use crate::models::blueprint::{Bounds, PaperBlueprint};
use crate::models::question::{Question, Topic};
use crate::services::planner::{answerable_marks, SectionTarget, SelectionTarget, Slot, SlotMarks};
use crate::services::pool::{AttemptPool, PartitionKey};

/// 选中的一道题
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Picked {
    pub question: Question,
    pub section: String,
    pub slot: String,
    #[serde(skip)]
    pub slot_id: usize,
    /// 来自替补分区时记录该分区
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

/// 单次尝试的可变状态，重试时整体丢弃
#[derive(Debug, Default)]
pub struct SelectionState {
    pub selected: Vec<Picked>,
    pub used: HashSet<u64>,
    pub raw_marks: u32,
    pub topic_marks: HashMap<String, u32>,
    pub mark_tally: BTreeMap<u32, u32>,
    /// 被拒绝的抽取、替补和微调替换次数
    pub backtracks: u32,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    fn commit(&mut self, picked: Picked) {
        let q = &picked.question;
        self.used.insert(q.id);
        self.raw_marks += q.marks;
        *self.topic_marks.entry(q.topic_id.clone()).or_default() += q.marks;
        *self.mark_tally.entry(q.marks).or_default() += 1;
        self.selected.push(picked);
    }

    fn replace(&mut self, index: usize, picked: Picked) {
        let old = &self.selected[index].question;
        self.used.remove(&old.id);
        self.raw_marks -= old.marks;
        if let Some(tally) = self.topic_marks.get_mut(&old.topic_id) {
            *tally -= old.marks;
        }
        if let Some(count) = self.mark_tally.get_mut(&old.marks) {
            *count -= 1;
        }

        let new = &picked.question;
        self.used.insert(new.id);
        self.raw_marks += new.marks;
        *self.topic_marks.entry(new.topic_id.clone()).or_default() += new.marks;
        *self.mark_tally.entry(new.marks).or_default() += 1;
        self.selected[index] = picked;
    }

    fn topic_tally(&self, topic_id: &str) -> u32 {
        self.topic_marks.get(topic_id).copied().unwrap_or(0)
    }
}

/// 一次成功尝试的选题结果（尚未排序、未校验）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    pub picks: Vec<Picked>,
    pub backtracks: u32,
}

impl Selection {
    pub fn question_ids(&self) -> Vec<u64> {
        self.picks.iter().map(|p| p.question.id).collect()
    }
}

/// 单次尝试失败的原因
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptFailure {
    /// 配额无法填满
    SlotUnfilled {
        slot: String,
        key: PartitionKey,
        needed: u32,
        filled: u32,
    },
    /// 凑分配额最后的分差无法通过替换消除
    FineTuneFailed {
        slot: String,
        key: PartitionKey,
        diff: i64,
    },
    /// 全部配额已填满但总分不符
    TotalMismatch { expected: u32, actual: u32 },
}

impl AttemptFailure {
    /// 失败对应的分区
    pub fn key(&self) -> Option<&PartitionKey> {
        match self {
            AttemptFailure::SlotUnfilled { key, .. } | AttemptFailure::FineTuneFailed { key, .. } => {
                Some(key)
            }
            AttemptFailure::TotalMismatch { .. } => None,
        }
    }
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptFailure::SlotUnfilled {
                slot,
                key,
                needed,
                filled,
            } => write!(f, "配额 {} 只填了 {}/{} 道 {}", slot, filled, needed, key),
            AttemptFailure::FineTuneFailed { slot, key, diff } => {
                write!(f, "配额 {} 分差 {} 无法微调 {}", slot, diff, key)
            }
            AttemptFailure::TotalMismatch { expected, actual } => {
                write!(f, "总分 {} 与目标 {} 不符", actual, expected)
            }
        }
    }
}

/// 选题器
pub struct Selector<'a> {
    blueprint: &'a PaperBlueprint,
    topics: HashMap<&'a str, &'a Topic>,
}

impl<'a> Selector<'a> {
    pub fn new(blueprint: &'a PaperBlueprint, topics: &'a [Topic]) -> Self {
        Self {
            blueprint,
            topics: topics.iter().map(|t| (t.id.as_str(), t)).collect(),
        }
    }

    /// 执行一次完整尝试
    pub fn select<R: Rng + ?Sized>(
        &self,
        target: &SelectionTarget,
        pool: &AttemptPool<'_>,
        rng: &mut R,
    ) -> Result<Selection, AttemptFailure> {
        let mut state = SelectionState::new();

        for (si, qi) in target.fill_order() {
            let section = &target.sections[si];
            let slot = &section.slots[qi];
            match slot.marks {
                SlotMarks::Exact(_) => self.fill_exact(section, slot, pool, &mut state, rng)?,
                SlotMarks::Fill {
                    total,
                    per_question,
                } => self.fill_marks(section, slot, total, per_question, pool, &mut state, rng)?,
            }
        }

        let actual: u32 = target
            .sections
            .iter()
            .map(|section| {
                let marks = state
                    .selected
                    .iter()
                    .filter(|p| p.section == section.name)
                    .map(|p| p.question.marks)
                    .collect();
                answerable_marks(section.answer, marks)
            })
            .sum();

        if actual != target.total_marks {
            return Err(AttemptFailure::TotalMismatch {
                expected: target.total_marks,
                actual,
            });
        }

        Ok(Selection {
            picks: state.selected,
            backtracks: state.backtracks,
        })
    }

    fn fill_exact<R: Rng + ?Sized>(
        &self,
        section: &SectionTarget,
        slot: &Slot,
        pool: &AttemptPool<'_>,
        state: &mut SelectionState,
        rng: &mut R,
    ) -> Result<(), AttemptFailure> {
        for filled in 0..slot.count {
            match self.draw(section, slot, pool, state, rng, |_| true) {
                Some(picked) => state.commit(picked),
                None => {
                    return Err(AttemptFailure::SlotUnfilled {
                        slot: slot.label.clone(),
                        key: slot.key.clone(),
                        needed: slot.count,
                        filled,
                    })
                }
            }
        }
        Ok(())
    }

    /// 凑分配额：count 道题合计 total 分
    ///
    /// 每抽一道题都保证剩余题目仍有可能凑出剩余分值；最后一道凑不准时
    /// 先取分值最接近的题，再交给微调。
    #[allow(clippy::too_many_arguments)]
    fn fill_marks<R: Rng + ?Sized>(
        &self,
        section: &SectionTarget,
        slot: &Slot,
        total: u32,
        per_question: Bounds,
        pool: &AttemptPool<'_>,
        state: &mut SelectionState,
        rng: &mut R,
    ) -> Result<(), AttemptFailure> {
        let unfilled = |filled: u32| AttemptFailure::SlotUnfilled {
            slot: slot.label.clone(),
            key: slot.key.clone(),
            needed: slot.count,
            filled,
        };

        let Some((lo, hi)) = self.mark_span(slot, pool, per_question) else {
            return Err(unfilled(0));
        };

        let delta = i64::from(self.blueprint.tolerances.fine_tune_delta);
        let mut got: i64 = 0;

        for filled in 0..slot.count {
            let left_after = i64::from(slot.count - filled - 1);
            let remaining = i64::from(total) - got;
            let feasible = |q: &Question| {
                let rest = remaining - i64::from(q.marks);
                rest >= left_after * lo && rest <= left_after * hi
            };

            let picked = match self.draw(section, slot, pool, state, rng, feasible) {
                Some(picked) => picked,
                None if left_after == 0 && delta > 0 => {
                    let near = |q: &Question| (remaining - i64::from(q.marks)).abs() <= delta;
                    self.draw(section, slot, pool, state, rng, near)
                        .ok_or_else(|| unfilled(filled))?
                }
                None => return Err(unfilled(filled)),
            };

            got += i64::from(picked.question.marks);
            state.commit(picked);
        }

        let diff = i64::from(total) - got;
        if diff != 0 {
            self.fine_tune(section, slot, diff, per_question, pool, state, rng)?;
        }
        Ok(())
    }

    /// 微调：把本配额中的某道题换成同知识点、分值相差 diff 的题
    #[allow(clippy::too_many_arguments)]
    fn fine_tune<R: Rng + ?Sized>(
        &self,
        section: &SectionTarget,
        slot: &Slot,
        diff: i64,
        per_question: Bounds,
        pool: &AttemptPool<'_>,
        state: &mut SelectionState,
        rng: &mut R,
    ) -> Result<(), AttemptFailure> {
        let mut indices: Vec<usize> = state
            .selected
            .iter()
            .enumerate()
            .filter(|(_, p)| p.slot_id == slot.id)
            .map(|(i, _)| i)
            .collect();
        indices.shuffle(rng);

        for index in indices {
            let current = state.selected[index].question.clone();
            let wanted = i64::from(current.marks) + diff;
            if wanted < i64::from(per_question.min) || wanted > i64::from(per_question.max) {
                continue;
            }

            for (ki, key) in std::iter::once(&slot.key).chain(&slot.fallbacks).enumerate() {
                let replacement = pool.candidates(key).iter().find(|q| {
                    !state.used.contains(&q.id)
                        && q.topic_id == current.topic_id
                        && i64::from(q.marks) == wanted
                        && self.fits_swap(&current, q, state)
                });

                if let Some(q) = replacement {
                    debug!(
                        "微调: 配额 {} 用题目 {} ({} 分) 替换题目 {} ({} 分)",
                        slot.label, q.id, q.marks, current.id, current.marks
                    );
                    let picked = Picked {
                        question: (*q).clone(),
                        section: section.name.clone(),
                        slot: slot.label.clone(),
                        slot_id: slot.id,
                        fallback: (ki > 0).then(|| key.to_string()),
                    };
                    state.replace(index, picked);
                    state.backtracks += 1;
                    return Ok(());
                }
            }
        }

        Err(AttemptFailure::FineTuneFailed {
            slot: slot.label.clone(),
            key: slot.key.clone(),
            diff,
        })
    }

    /// 配额可用题目的分值跨度（与单题分值区间取交集）
    fn mark_span(&self, slot: &Slot, pool: &AttemptPool<'_>, bounds: Bounds) -> Option<(i64, i64)> {
        let marks = std::iter::once(&slot.key)
            .chain(&slot.fallbacks)
            .flat_map(|key| pool.candidates(key).iter())
            .map(|q| q.marks)
            .filter(|m| bounds.contains(*m));

        let (lo, hi) = marks.fold((None, None), |(lo, hi): (Option<u32>, Option<u32>), m| {
            (Some(lo.map_or(m, |l| l.min(m))), Some(hi.map_or(m, |h| h.max(m))))
        });
        Some((i64::from(lo?), i64::from(hi?)))
    }

    /// 依次在主分区和替补分区中抽一道题
    fn draw<R, F>(
        &self,
        section: &SectionTarget,
        slot: &Slot,
        pool: &AttemptPool<'_>,
        state: &mut SelectionState,
        rng: &mut R,
        accept: F,
    ) -> Option<Picked>
    where
        R: Rng + ?Sized,
        F: Fn(&Question) -> bool,
    {
        for (ki, key) in std::iter::once(&slot.key).chain(&slot.fallbacks).enumerate() {
            if let Some(question) = self.draw_from(key, pool, state, rng, &accept) {
                if ki > 0 {
                    state.backtracks += 1;
                    debug!("配额 {} 使用替补分区 {}", slot.label, key);
                }
                return Some(Picked {
                    question: question.clone(),
                    section: section.name.clone(),
                    slot: slot.label.clone(),
                    slot_id: slot.id,
                    fallback: (ki > 0).then(|| key.to_string()),
                });
            }
        }
        None
    }

    /// 在单个分区中按知识点加权抽题
    ///
    /// 越低于平均分值（或低于下限）的知识点权重越高；选中的知识点
    /// 若没有满足约束的题目，就把它移出候选再抽。
    fn draw_from<'p, R, F>(
        &self,
        key: &PartitionKey,
        pool: &AttemptPool<'p>,
        state: &mut SelectionState,
        rng: &mut R,
        accept: &F,
    ) -> Option<&'p Question>
    where
        R: Rng + ?Sized,
        F: Fn(&Question) -> bool,
    {
        let mut by_topic: BTreeMap<&str, Vec<&'p Question>> = BTreeMap::new();
        for &q in pool.candidates(key) {
            if !state.used.contains(&q.id) {
                by_topic.entry(q.topic_id.as_str()).or_default().push(q);
            }
        }
        let mut groups: Vec<(&str, Vec<&'p Question>)> = by_topic.into_iter().collect();

        while !groups.is_empty() {
            let weights: Vec<f64> = groups
                .iter()
                .map(|(topic_id, _)| self.topic_weight(topic_id, state))
                .collect();
            let index = match WeightedIndex::new(&weights) {
                Ok(dist) => dist.sample(rng),
                Err(_) => 0,
            };

            let (topic_id, questions) = groups.remove(index);
            for q in questions {
                if self.fits(q, state) && accept(q) {
                    return Some(q);
                }
                state.backtracks += 1;
            }
            debug!("知识点 {} 在分区 {} 中没有满足约束的题目", topic_id, key);
        }

        None
    }

    fn topic_weight(&self, topic_id: &str, state: &SelectionState) -> f64 {
        let topic_count = self.topics.len().max(1) as f64;
        let mean = f64::from(state.raw_marks) / topic_count;
        let tally = f64::from(state.topic_tally(topic_id));

        let mut deficit = (mean - tally).max(0.0);
        if let Some(min) = self.topics.get(topic_id).and_then(|t| t.min_marks) {
            deficit += (f64::from(min) - tally).max(0.0);
        }
        1.0 + deficit
    }

    /// 知识点上限（含容差）与分值题量上限
    fn fits(&self, q: &Question, state: &SelectionState) -> bool {
        if let Some(topic) = self.topics.get(q.topic_id.as_str()) {
            if let Some(max) = topic.max_marks {
                let limit = max + topic.tolerance_or(self.blueprint.tolerances.topic_marks);
                if state.topic_tally(&q.topic_id) + q.marks > limit {
                    return false;
                }
            }
        }
        self.under_mark_cap(q.marks, state)
    }

    fn fits_swap(&self, old: &Question, new: &Question, state: &SelectionState) -> bool {
        if let Some(topic) = self.topics.get(new.topic_id.as_str()) {
            if let Some(max) = topic.max_marks {
                let limit = max + topic.tolerance_or(self.blueprint.tolerances.topic_marks);
                let mut after = state.topic_tally(&new.topic_id) + new.marks;
                if old.topic_id == new.topic_id {
                    after -= old.marks;
                }
                if after > limit {
                    return false;
                }
            }
        }
        self.under_mark_cap(new.marks, state)
    }

    fn under_mark_cap(&self, marks: u32, state: &SelectionState) -> bool {
        match self.blueprint.mark_cap(marks) {
            Some(cap) => state.mark_tally.get(&marks).copied().unwrap_or(0) < cap,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::InMemoryRepository;
    use crate::models::blueprint::{Fallback, MarkCap, Quota};
    use crate::services::planner::Planner;
    use crate::services::pool::CandidatePool;
    use crate::test_support::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn run(
        repo: &InMemoryRepository,
        blueprint: &PaperBlueprint,
        topics: &[Topic],
        total: u32,
        seed: u64,
    ) -> Result<Selection, AttemptFailure> {
        let mut rng = StdRng::seed_from_u64(seed);
        let target = Planner::new(blueprint, total).plan(&mut rng).unwrap();
        let mut pool = CandidatePool::new(repo, PAPER_ID, topics.to_vec(), None);
        pool.prepare(&target);
        let attempt = pool.shuffled(&mut rng);
        Selector::new(blueprint, topics).select(&target, &attempt, &mut rng)
    }

    /// 题库恰好够用时必须全部选中
    #[test]
    fn test_exact_pool_selects_everything() {
        let repo = exact_three_section_repository();
        let topics = vec![topic("t1"), topic("t2"), topic("t3")];
        let selection = run(&repo, &three_section_blueprint(), &topics, 90, 1).unwrap();

        let mut ids = selection.question_ids();
        ids.sort();
        assert_eq!(ids, (1..=22).collect::<Vec<u64>>());
        assert_eq!(selection.backtracks, 0);
    }

    #[test]
    fn test_missing_partition_fails_slot() {
        let mut repo = InMemoryRepository::new();
        for id in 1..=15 {
            repo.add_question(question(id, "t1", 2)).unwrap();
        }
        for id in 16..=19 {
            repo.add_question(question(id, "t1", 5)).unwrap();
        }
        let topics = vec![topic("t1")];
        let failure = run(&repo, &three_section_blueprint(), &topics, 90, 3).unwrap_err();

        match failure {
            AttemptFailure::SlotUnfilled { key, filled, .. } => {
                assert_eq!(key, PartitionKey::exact(20));
                assert_eq!(filled, 0);
            }
            other => panic!("意外的失败原因: {}", other),
        }
    }

    /// 主分区没有作图题时使用替补链
    #[test]
    fn test_fallback_chain_used() {
        let mut repo = InMemoryRepository::new();
        repo.add_question(question(1, "t1", 12).nested_question().with_kind("structured"))
            .unwrap();
        let blueprint = blueprint(vec![section(
            "B",
            None,
            vec![Quota::new(1, 12)
                .nested(true)
                .kind("graph")
                .fallback(Fallback::kind("structured").nested(true))],
        )]);
        let topics = vec![topic("t1")];
        let selection = run(&repo, &blueprint, &topics, 12, 0).unwrap();

        assert_eq!(selection.picks.len(), 1);
        assert!(selection.picks[0].fallback.is_some());
        assert_eq!(selection.backtracks, 1);
    }

    /// 知识点上限（含容差）不能被突破
    #[test]
    fn test_topic_max_respected() {
        let mut repo = InMemoryRepository::new();
        for id in 1..=10 {
            repo.add_question(question(id, "heavy", 2)).unwrap();
        }
        for id in 11..=20 {
            repo.add_question(question(id, "light", 2)).unwrap();
        }
        let mut heavy = topic("heavy");
        heavy.max_marks = Some(4);
        heavy.tolerance = Some(2);
        let topics = vec![heavy, topic("light")];
        let blueprint = blueprint(vec![section("A", None, vec![Quota::new(8, 2)])]);

        for seed in 0..10 {
            let selection = run(&repo, &blueprint, &topics, 16, seed).unwrap();
            let heavy_marks: u32 = selection
                .picks
                .iter()
                .filter(|p| p.question.topic_id == "heavy")
                .map(|p| p.question.marks)
                .sum();
            assert!(heavy_marks <= 6);
        }
    }

    #[test]
    fn test_mark_cap_respected() {
        let mut repo = InMemoryRepository::new();
        for id in 1..=6 {
            repo.add_question(question(id, "t1", 2)).unwrap();
        }
        let mut blueprint = blueprint(vec![section("A", None, vec![Quota::new(4, 2)])]);
        blueprint.mark_caps = vec![MarkCap {
            marks: 2,
            max_count: 3,
        }];
        let failure = run(&repo, &blueprint, &[topic("t1")], 8, 0).unwrap_err();
        assert!(matches!(failure, AttemptFailure::SlotUnfilled { filled: 3, .. }));
    }

    /// 凑分配额：题量和总分都必须精确
    #[test]
    fn test_fill_slot_hits_total() {
        let mut repo = InMemoryRepository::new();
        let mut id = 1;
        for marks in [2, 3, 4, 5, 6, 7, 8] {
            for t in ["t1", "t2"] {
                for _ in 0..12 {
                    repo.add_question(question(id, t, marks).nested_question()).unwrap();
                    id += 1;
                }
            }
        }
        let topics = vec![topic("t1"), topic("t2")];
        let blueprint = crate::models::presets::biology_flexible();
        let mut rng = StdRng::seed_from_u64(9);
        let target = Planner::new(&blueprint, 80).plan(&mut rng).unwrap();
        let nested = target.slots().find(|s| s.is_fill()).unwrap().clone();

        // 只保留凑分配额
        let only_nested = SelectionTarget {
            total_marks: nested.raw_marks(),
            sections: vec![SectionTarget {
                name: "I".to_string(),
                answer: None,
                flexible: true,
                slots: vec![nested.clone()],
            }],
            planner_draws: 1,
            used_fallback_plan: false,
        };

        let mut pool = CandidatePool::new(&repo, PAPER_ID, topics.clone(), None);
        pool.prepare(&only_nested);
        let attempt = pool.shuffled(&mut rng);
        let selection = Selector::new(&blueprint, &topics)
            .select(&only_nested, &attempt, &mut rng)
            .unwrap();

        assert_eq!(selection.picks.len() as u32, nested.count);
        let total: u32 = selection.picks.iter().map(|p| p.question.marks).sum();
        assert_eq!(total, nested.raw_marks());
    }

    /// 最后一题凑不准时通过同知识点替换微调
    #[test]
    fn test_fine_tune_swaps_same_topic() {
        let mut state = SelectionState::new();
        let blueprint = blueprint(Vec::new());
        let topics = vec![topic("t1")];
        let selector = Selector::new(&blueprint, &topics);
        let slot = Slot {
            id: 0,
            label: "nested".to_string(),
            count: 2,
            marks: SlotMarks::Fill {
                total: 10,
                per_question: Bounds::new(2, 8),
            },
            key: PartitionKey {
                section: None,
                marks: crate::services::pool::MarkFilter::Range { min: 2, max: 8 },
                nested: Some(true),
                kind: None,
                category: None,
            },
            fallbacks: Vec::new(),
        };
        let section = SectionTarget {
            name: "I".to_string(),
            answer: None,
            flexible: true,
            slots: vec![slot.clone()],
        };

        let mut repo = InMemoryRepository::new();
        repo.add_question(question(1, "t1", 4).nested_question()).unwrap();
        repo.add_question(question(2, "t1", 4).nested_question()).unwrap();
        repo.add_question(question(3, "t1", 6).nested_question()).unwrap();
        let mut pool = CandidatePool::new(&repo, PAPER_ID, topics.clone(), None);
        let target = SelectionTarget {
            total_marks: 10,
            sections: vec![section.clone()],
            planner_draws: 0,
            used_fallback_plan: false,
        };
        pool.prepare(&target);
        let mut rng = StdRng::seed_from_u64(4);
        let attempt = pool.shuffled(&mut rng);

        for id in [1, 2] {
            state.commit(Picked {
                question: repo.question(id).unwrap(),
                section: "I".to_string(),
                slot: "nested".to_string(),
                slot_id: 0,
                fallback: None,
            });
        }

        selector
            .fine_tune(&section, &slot, 2, Bounds::new(2, 8), &attempt, &mut state, &mut rng)
            .unwrap();

        assert_eq!(state.raw_marks, 10);
        assert!(state.used.contains(&3));
        assert_eq!(state.backtracks, 1);
    }
}
