//! 分值规划 - 业务能力层
//!
//! 在查询任何题目之前，先确定试卷的"形状"：每道大题要几道题、
//! 各是多少分。固定卷型的规划是确定的；弹性卷型在区间内随机抽取
//! 多小问题目的数量与总分，再把剩余分值拆成单问题目。

use std::collections::BTreeMap;

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::Serialize;
use tracing::debug;

use crate::error::{GenerationError, Result};
use crate::models::blueprint::{Bounds, Fallback, FlexibleLayout, MarkCount, PaperBlueprint, SectionSpec};
use crate::services::pool::{MarkFilter, PartitionKey};

/// 配额的分值要求
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotMarks {
    /// 每道题固定分值
    Exact(u32),
    /// count 道题合计 total 分，单题分值在区间内
    Fill { total: u32, per_question: Bounds },
}

/// 一个待填充的配额
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Slot {
    /// 在整份规划中唯一，选题和校验按它归属题目
    pub id: usize,
    pub label: String,
    pub count: u32,
    pub marks: SlotMarks,
    pub key: PartitionKey,
    /// 按顺序尝试的替补分区
    pub fallbacks: Vec<PartitionKey>,
}

impl Slot {
    pub fn raw_marks(&self) -> u32 {
        match self.marks {
            SlotMarks::Exact(marks) => marks * self.count,
            SlotMarks::Fill { total, .. } => total,
        }
    }

    pub fn is_fill(&self) -> bool {
        matches!(self.marks, SlotMarks::Fill { .. })
    }
}

/// 一道大题的规划
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionTarget {
    pub name: String,
    pub answer: Option<u32>,
    /// 是否包含弹性配额（校验时按百分比容差）
    pub flexible: bool,
    pub slots: Vec<Slot>,
}

impl SectionTarget {
    /// "M 选 N" 选做大题
    pub fn is_optional(&self) -> bool {
        self.answer.is_some()
    }

    pub fn question_count(&self) -> u32 {
        self.slots.iter().map(|s| s.count).sum()
    }

    pub fn raw_marks(&self) -> u32 {
        self.slots.iter().map(Slot::raw_marks).sum()
    }

    /// 学生可得分：选做大题只计分值最高的 N 题
    pub fn student_marks(&self) -> u32 {
        match self.answer {
            None => self.raw_marks(),
            Some(_) => {
                let marks = self
                    .slots
                    .iter()
                    .flat_map(|slot| {
                        let per_question = match slot.marks {
                            SlotMarks::Exact(m) => m,
                            SlotMarks::Fill { total, .. } => total / slot.count.max(1),
                        };
                        std::iter::repeat(per_question).take(slot.count as usize)
                    })
                    .collect();
                answerable_marks(self.answer, marks)
            }
        }
    }
}

/// 按"M 选 N"规则计算学生可得分
pub fn answerable_marks(answer: Option<u32>, mut marks: Vec<u32>) -> u32 {
    match answer {
        None => marks.iter().sum(),
        Some(answer) => {
            marks.sort_unstable_by(|a, b| b.cmp(a));
            marks.into_iter().take(answer as usize).sum()
        }
    }
}

/// 规划结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionTarget {
    pub total_marks: u32,
    pub sections: Vec<SectionTarget>,
    /// 弹性方案抽取次数（固定卷型为 0）
    pub planner_draws: u32,
    pub used_fallback_plan: bool,
}

impl SelectionTarget {
    pub fn question_count(&self) -> u32 {
        self.sections.iter().map(SectionTarget::question_count).sum()
    }

    pub fn raw_marks(&self) -> u32 {
        self.sections.iter().map(SectionTarget::raw_marks).sum()
    }

    pub fn student_marks(&self) -> u32 {
        self.sections.iter().map(SectionTarget::student_marks).sum()
    }

    pub fn section(&self, name: &str) -> Option<&SectionTarget> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.sections.iter().flat_map(|s| s.slots.iter())
    }

    /// 按声明顺序给全部配额编号
    fn numbered(mut self) -> Self {
        let mut next = 0;
        for slot in self.sections.iter_mut().flat_map(|s| s.slots.iter_mut()) {
            slot.id = next;
            next += 1;
        }
        self
    }

    /// 填充顺序：固定分值配额按声明顺序在前，凑分配额在最后
    pub fn fill_order(&self) -> Vec<(usize, usize)> {
        let mut order: Vec<(usize, usize)> = Vec::new();
        let mut fills = Vec::new();
        for (si, section) in self.sections.iter().enumerate() {
            for (qi, slot) in section.slots.iter().enumerate() {
                if slot.is_fill() {
                    fills.push((si, qi));
                } else {
                    order.push((si, qi));
                }
            }
        }
        order.extend(fills);
        order
    }
}

/// 分值规划器
pub struct Planner<'a> {
    blueprint: &'a PaperBlueprint,
    total_marks: u32,
}

impl<'a> Planner<'a> {
    pub fn new(blueprint: &'a PaperBlueprint, total_marks: u32) -> Self {
        Self {
            blueprint,
            total_marks,
        }
    }

    pub fn is_flexible(&self) -> bool {
        self.blueprint.flexible.is_some()
    }

    /// 生成规划
    ///
    /// 保证规划的学生可得分与试卷满分完全相等，否则返回 `PlanningInfeasible`
    pub fn plan<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<SelectionTarget> {
        let sections: Vec<SectionTarget> = self
            .blueprint
            .sections
            .iter()
            .map(section_target)
            .collect();

        match &self.blueprint.flexible {
            None => {
                let target = SelectionTarget {
                    total_marks: self.total_marks,
                    sections,
                    planner_draws: 0,
                    used_fallback_plan: false,
                };
                if target.student_marks() != self.total_marks {
                    return Err(GenerationError::infeasible(format!(
                        "布局 {} 各大题合计 {} 分，与试卷满分 {} 分不符",
                        self.blueprint.name,
                        target.student_marks(),
                        self.total_marks
                    )));
                }
                Ok(target.numbered())
            }
            Some(layout) => self.plan_flexible(layout, sections, rng),
        }
    }

    fn plan_flexible<R: Rng + ?Sized>(
        &self,
        layout: &FlexibleLayout,
        sections: Vec<SectionTarget>,
        rng: &mut R,
    ) -> Result<SelectionTarget> {
        let fixed_marks: u32 = sections.iter().map(SectionTarget::student_marks).sum();
        if fixed_marks > self.total_marks {
            return Err(GenerationError::infeasible(format!(
                "固定大题已占 {} 分，超过试卷满分 {} 分",
                fixed_marks, self.total_marks
            )));
        }

        let per_question = layout.nested_question_marks;
        let fixed_count: u32 = sections.iter().map(SectionTarget::question_count).sum();

        for draw in 1..=layout.max_draws {
            let nested_count = rng.gen_range(layout.nested_count.min..=layout.nested_count.max);
            let nested_marks = rng.gen_range(layout.nested_marks.min..=layout.nested_marks.max);

            let reachable = if nested_count == 0 {
                nested_marks == 0
            } else {
                nested_count * per_question.min <= nested_marks
                    && nested_marks <= nested_count * per_question.max
            };
            if !reachable {
                continue;
            }

            let Some(remaining) = self.total_marks.checked_sub(fixed_marks + nested_marks) else {
                continue;
            };

            let parts = match decompose(remaining, &layout.denominations, rng) {
                Ok(parts) => parts,
                Err(_) => continue,
            };

            let question_count = fixed_count + nested_count + parts.len() as u32;
            if !layout.question_count.contains(question_count) {
                continue;
            }

            debug!(
                "弹性方案第 {} 次抽取成功: 多小问 {} 道 {} 分, 单问 {} 道 {} 分",
                draw,
                nested_count,
                nested_marks,
                parts.len(),
                remaining
            );

            let standalone = group_marks(&parts);
            let target =
                self.flexible_target(layout, sections, nested_count, nested_marks, &standalone, draw, false);
            return self.ensure_exact(target);
        }

        let Some(plan) = &layout.fallback_plan else {
            return Err(GenerationError::infeasible(format!(
                "弹性方案抽取 {} 次均无法凑出 {} 分，且未配置备用方案",
                layout.max_draws, self.total_marks
            )));
        };

        debug!("弹性方案抽取 {} 次失败，使用备用方案", layout.max_draws);
        let target = self.flexible_target(
            layout,
            sections,
            plan.nested_count,
            plan.nested_marks,
            &plan.standalone,
            layout.max_draws,
            true,
        );
        self.ensure_exact(target)
    }

    #[allow(clippy::too_many_arguments)]
    fn flexible_target(
        &self,
        layout: &FlexibleLayout,
        mut sections: Vec<SectionTarget>,
        nested_count: u32,
        nested_marks: u32,
        standalone: &[MarkCount],
        draws: u32,
        used_fallback_plan: bool,
    ) -> SelectionTarget {
        let question_section = self
            .blueprint
            .section(&layout.section)
            .and_then(|s| s.question_section.clone());

        let mut slots = Vec::new();
        for part in standalone.iter().filter(|p| p.count > 0) {
            let key = PartitionKey {
                section: question_section.clone(),
                marks: MarkFilter::Exact(part.marks),
                nested: Some(false),
                kind: layout.standalone_kind.clone(),
                category: None,
            };
            let fallbacks = if layout.standalone_kind.is_some() {
                vec![key.with_fallback(&Fallback::any().nested(false))]
            } else {
                Vec::new()
            };
            slots.push(Slot {
                id: 0,
                label: format!("standalone-{}", part.marks),
                count: part.count,
                marks: SlotMarks::Exact(part.marks),
                key,
                fallbacks,
            });
        }

        if nested_count > 0 {
            let per_question = layout.nested_question_marks;
            slots.push(Slot {
                id: 0,
                label: "nested".to_string(),
                count: nested_count,
                marks: SlotMarks::Fill {
                    total: nested_marks,
                    per_question,
                },
                key: PartitionKey {
                    section: question_section,
                    marks: MarkFilter::Range {
                        min: per_question.min,
                        max: per_question.max,
                    },
                    nested: Some(true),
                    kind: None,
                    category: None,
                },
                fallbacks: Vec::new(),
            });
        }

        match sections.iter_mut().find(|s| s.name == layout.section) {
            Some(section) => {
                section.flexible = true;
                section.slots.extend(slots);
            }
            None => sections.push(SectionTarget {
                name: layout.section.clone(),
                answer: None,
                flexible: true,
                slots,
            }),
        }

        SelectionTarget {
            total_marks: self.total_marks,
            sections,
            planner_draws: draws,
            used_fallback_plan,
        }
    }

    fn ensure_exact(&self, target: SelectionTarget) -> Result<SelectionTarget> {
        if target.student_marks() != self.total_marks {
            return Err(GenerationError::infeasible(format!(
                "规划合计 {} 分，与试卷满分 {} 分不符",
                target.student_marks(),
                self.total_marks
            )));
        }
        Ok(target.numbered())
    }
}

fn section_target(spec: &SectionSpec) -> SectionTarget {
    let slots = spec
        .quotas
        .iter()
        .enumerate()
        .map(|(position, quota)| {
            let key = PartitionKey {
                section: spec.question_section.clone(),
                marks: MarkFilter::Exact(quota.marks),
                nested: quota.nested,
                kind: quota.kind.clone(),
                category: quota.category.clone(),
            };
            let fallbacks = quota.fallbacks.iter().map(|f| key.with_fallback(f)).collect();
            Slot {
                id: 0,
                label: quota.label.clone().unwrap_or_else(|| {
                    format!("{}{}-{}x{}", spec.name, position + 1, quota.count, quota.marks)
                }),
                count: quota.count,
                marks: SlotMarks::Exact(quota.marks),
                key,
                fallbacks,
            }
        })
        .collect();

    SectionTarget {
        name: spec.name.clone(),
        answer: spec.answer,
        flexible: false,
        slots,
    }
}

fn group_marks(parts: &[u32]) -> Vec<MarkCount> {
    let mut grouped: BTreeMap<u32, u32> = BTreeMap::new();
    for &marks in parts {
        *grouped.entry(marks).or_default() += 1;
    }
    grouped
        .into_iter()
        .rev()
        .map(|(marks, count)| MarkCount { marks, count })
        .collect()
}

/// 分值拆分
///
/// 把 `remaining` 分拆成若干个允许面额之和，随机但偏向大面额；
/// 最小面额只在其它面额都无法凑整时使用。
/// 结果之和必定等于 `remaining`，凑不出时返回 `PlanningInfeasible`。
pub fn decompose<R: Rng + ?Sized>(remaining: u32, denominations: &[u32], rng: &mut R) -> Result<Vec<u32>> {
    if denominations.is_empty() || denominations.contains(&0) {
        return Err(GenerationError::configuration(format!(
            "分值面额无效: {:?}",
            denominations
        )));
    }

    let mut denoms: Vec<u32> = denominations.to_vec();
    denoms.sort_unstable_by(|a, b| b.cmp(a));
    denoms.dedup();
    let smallest = denoms[denoms.len() - 1];

    // reachable[v]: v 能否由面额精确凑出
    let size = remaining as usize + 1;
    let mut reachable = vec![false; size];
    reachable[0] = true;
    for v in 1..size {
        reachable[v] = denoms
            .iter()
            .any(|&d| d as usize <= v && reachable[v - d as usize]);
    }

    if !reachable[remaining as usize] {
        return Err(GenerationError::infeasible(format!(
            "{} 分无法由面额 {:?} 凑出",
            remaining, denominations
        )));
    }

    let mut parts = Vec::new();
    let mut left = remaining as usize;
    while left > 0 {
        let options: Vec<u32> = denoms
            .iter()
            .copied()
            .filter(|&d| d as usize <= left && reachable[left - d as usize])
            .collect();
        let larger: Vec<u32> = options.iter().copied().filter(|&d| d != smallest).collect();
        let choices = if larger.is_empty() { options } else { larger };

        let pick = match WeightedIndex::new(choices.iter().copied()) {
            Ok(dist) => choices[dist.sample(rng)],
            Err(_) => choices[0],
        };
        parts.push(pick);
        left -= pick as usize;
    }

    parts.sort_unstable_by(|a, b| b.cmp(a));
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::blueprint::Quota;
    use crate::models::presets;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// 0–30 分在 {1,2,3} 下都能精确拆分
    #[test]
    fn test_decompose_exact_sum() {
        let mut rng = StdRng::seed_from_u64(7);
        for remaining in 0..=30u32 {
            let parts = decompose(remaining, &[1, 2, 3], &mut rng).unwrap();
            assert_eq!(parts.iter().sum::<u32>(), remaining);
            assert!(parts.iter().all(|p| [1, 2, 3].contains(p)));
            // 最小面额最多出现一次（只用于补齐余数）
            assert!(parts.iter().filter(|&&p| p == 1).count() <= 1);
        }
    }

    /// 没有 1 分题时，1 分无法拆分
    #[test]
    fn test_decompose_reports_infeasible() {
        let mut rng = StdRng::seed_from_u64(1);
        let err = decompose(1, &[2, 3], &mut rng).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PlanningInfeasible);

        let err = decompose(7, &[2, 4], &mut rng).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PlanningInfeasible);
    }

    #[test]
    fn test_decompose_only_even_still_exact() {
        let mut rng = StdRng::seed_from_u64(3);
        for remaining in (0..=40u32).step_by(2) {
            let parts = decompose(remaining, &[2, 4], &mut rng).unwrap();
            assert_eq!(parts.iter().sum::<u32>(), remaining);
        }
    }

    #[test]
    fn test_fixed_plan_student_marks() {
        let blueprint = presets::sectioned_standard();
        let planner = Planner::new(&blueprint, 90);
        let mut rng = StdRng::seed_from_u64(0);
        let target = planner.plan(&mut rng).unwrap();

        assert_eq!(target.raw_marks(), 110);
        assert_eq!(target.student_marks(), 90);
        assert_eq!(target.question_count(), 22);
        assert_eq!(target.section("C").unwrap().student_marks(), 40);
    }

    /// 固定布局与试卷满分不符是规划错误
    #[test]
    fn test_fixed_plan_total_mismatch() {
        let blueprint = presets::sectioned_standard();
        let planner = Planner::new(&blueprint, 100);
        let mut rng = StdRng::seed_from_u64(0);
        let err = planner.plan(&mut rng).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PlanningInfeasible);
    }

    #[test]
    fn test_flexible_plan_within_ranges() {
        let blueprint = presets::biology_flexible();
        let layout = blueprint.flexible.clone().unwrap();
        let planner = Planner::new(&blueprint, 80);

        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let target = planner.plan(&mut rng).unwrap();
            assert_eq!(target.student_marks(), 80);
            assert!(layout.question_count.contains(target.question_count()));

            let section = target.section("I").unwrap();
            assert!(section.flexible);
            let nested = section.slots.iter().find(|s| s.is_fill()).unwrap();
            assert!(layout.nested_count.contains(nested.count));
            assert!(layout.nested_marks.contains(nested.raw_marks()));
        }
    }

    /// 抽取全部失败时退回备用方案
    #[test]
    fn test_flexible_plan_uses_fallback() {
        let mut blueprint = presets::biology_flexible();
        if let Some(layout) = blueprint.flexible.as_mut() {
            // 剩余 15–30 分不可能由 40 分面额凑出
            layout.denominations = vec![40];
            layout.max_draws = 5;
        }
        let planner = Planner::new(&blueprint, 80);
        let mut rng = StdRng::seed_from_u64(11);
        let target = planner.plan(&mut rng).unwrap();

        assert!(target.used_fallback_plan);
        assert_eq!(target.student_marks(), 80);
        assert_eq!(target.question_count(), 22);
    }

    #[test]
    fn test_flexible_plan_without_fallback_is_infeasible() {
        let mut blueprint = presets::biology_flexible();
        if let Some(layout) = blueprint.flexible.as_mut() {
            layout.denominations = vec![40];
            layout.fallback_plan = None;
            layout.max_draws = 10;
        }
        let planner = Planner::new(&blueprint, 80);
        let mut rng = StdRng::seed_from_u64(2);
        let err = planner.plan(&mut rng).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PlanningInfeasible);
    }

    #[test]
    fn test_fill_order_puts_fill_slots_last() {
        let blueprint = presets::biology_flexible();
        let planner = Planner::new(&blueprint, 80);
        let mut rng = StdRng::seed_from_u64(5);
        let target = planner.plan(&mut rng).unwrap();
        let order = target.fill_order();
        let (si, qi) = *order.last().unwrap();
        assert!(target.sections[si].slots[qi].is_fill());
    }

    /// 生物卷加一道固定大题（5×2 分），满分 90
    fn create_test_mixed_blueprint() -> PaperBlueprint {
        let mut blueprint = presets::biology_flexible();
        blueprint.sections.push(SectionSpec {
            name: "II".to_string(),
            answer: None,
            question_section: None,
            quotas: vec![Quota::new(5, 2)],
        });
        blueprint
    }

    /// 总题量上限包含固定大题的题目
    #[test]
    fn test_question_cap_counts_fixed_sections() {
        let blueprint = create_test_mixed_blueprint();
        let planner = Planner::new(&blueprint, 90);
        for seed in 0..10 {
            let mut rng = StdRng::seed_from_u64(seed);
            let target = planner.plan(&mut rng).unwrap();
            assert_eq!(target.student_marks(), 90);
            assert!(
                (22..=30).contains(&target.question_count()),
                "种子 {} 题量 {}",
                seed,
                target.question_count()
            );
        }
    }

    /// 配额编号在整份规划中唯一；未命名配额的默认名称也不重复
    #[test]
    fn test_slot_ids_and_default_labels_unique() {
        let blueprint = PaperBlueprint {
            sections: vec![SectionSpec {
                name: "B".to_string(),
                answer: None,
                question_section: None,
                quotas: vec![Quota::new(1, 12).kind("graph"), Quota::new(1, 12).kind("essay")],
            }],
            flexible: None,
            ..presets::sectioned_standard()
        };
        let mut rng = StdRng::seed_from_u64(0);
        let target = Planner::new(&blueprint, 24).plan(&mut rng).unwrap();

        let ids: Vec<usize> = target.slots().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 1]);
        let labels: Vec<&str> = target.slots().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["B1-1x12", "B2-1x12"]);
    }
}
