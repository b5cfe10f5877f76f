//! 成卷校验 - 业务能力层
//!
//! 对完整选题结果做独立复核，不依赖选题器的内部记账。
//! 所有检查都会执行，即使前面的检查已经失败。

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::models::blueprint::PaperBlueprint;
use crate::models::question::Topic;
use crate::services::planner::{answerable_marks, SectionTarget, SelectionTarget, SlotMarks};
use crate::services::selector::Picked;

/// 单项检查结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl ValidationCheck {
    fn new(name: impl Into<String>, passed: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed,
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for ValidationCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.detail)
    }
}

/// 校验报告
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub all_passed: bool,
    pub passed: Vec<ValidationCheck>,
    pub failed: Vec<ValidationCheck>,
}

impl ValidationReport {
    fn from_checks(checks: Vec<ValidationCheck>) -> Self {
        let (passed, failed): (Vec<_>, Vec<_>) = checks.into_iter().partition(|c| c.passed);
        Self {
            all_passed: failed.is_empty(),
            passed,
            failed,
        }
    }

    /// 失败项的可读描述
    pub fn failure_messages(&self) -> Vec<String> {
        self.failed.iter().map(ToString::to_string).collect()
    }
}

/// 成卷校验器
pub struct Validator<'a> {
    blueprint: &'a PaperBlueprint,
    topics: &'a [Topic],
}

impl<'a> Validator<'a> {
    pub fn new(blueprint: &'a PaperBlueprint, topics: &'a [Topic]) -> Self {
        Self { blueprint, topics }
    }

    /// 校验选题结果（纯函数，同样的输入得到同样的报告）
    pub fn validate(&self, target: &SelectionTarget, picks: &[Picked]) -> ValidationReport {
        let mut checks = vec![self.check_total(target, picks)];

        for section in &target.sections {
            checks.push(self.check_section(section, picks));
            for slot in section.slots.iter().filter(|s| s.is_fill()) {
                if let SlotMarks::Fill { total, per_question } = slot.marks {
                    let slot_picks: Vec<&Picked> = picks
                        .iter()
                        .filter(|p| p.slot_id == slot.id)
                        .collect();
                    let sum: u32 = slot_picks.iter().map(|p| p.question.marks).sum();
                    let out_of_range = slot_picks
                        .iter()
                        .filter(|p| !per_question.contains(p.question.marks))
                        .count();
                    checks.push(ValidationCheck::new(
                        format!("配额 {} 凑分", slot.label),
                        sum == total && slot_picks.len() as u32 == slot.count && out_of_range == 0,
                        format!(
                            "{} 道共 {} 分 (目标 {} 道 {} 分, 单题 {} 分, 超出范围 {} 道)",
                            slot_picks.len(),
                            sum,
                            slot.count,
                            total,
                            per_question,
                            out_of_range
                        ),
                    ));
                }
            }
        }

        checks.extend(self.check_topics(picks));
        checks.push(check_duplicates(picks));
        checks.push(check_answers(picks));
        checks.push(check_active(picks));
        if !self.blueprint.mark_caps.is_empty() {
            checks.push(self.check_mark_caps(picks));
        }

        ValidationReport::from_checks(checks)
    }

    fn check_total(&self, target: &SelectionTarget, picks: &[Picked]) -> ValidationCheck {
        let raw: u32 = picks.iter().map(|p| p.question.marks).sum();
        let student: u32 = target
            .sections
            .iter()
            .map(|section| answerable_marks(section.answer, section_marks(section, picks)))
            .sum();

        ValidationCheck::new(
            "总分",
            student == target.total_marks,
            format!("可得分 {} / 满分 {} (题目原始分 {})", student, target.total_marks, raw),
        )
    }

    /// 题量与分值构成：固定卷型精确匹配，弹性大题按百分比容差
    fn check_section(&self, section: &SectionTarget, picks: &[Picked]) -> ValidationCheck {
        let in_section: Vec<&Picked> = picks.iter().filter(|p| p.section == section.name).collect();
        let planned_count = section.question_count();
        let actual_count = in_section.len() as u32;

        let mut planned: BTreeMap<u32, u32> = BTreeMap::new();
        let mut actual: BTreeMap<u32, u32> = BTreeMap::new();
        for slot in &section.slots {
            if let SlotMarks::Exact(marks) = slot.marks {
                *planned.entry(marks).or_default() += slot.count;
                let matched = in_section
                    .iter()
                    .filter(|p| p.slot_id == slot.id && p.question.marks == marks)
                    .count() as u32;
                *actual.entry(marks).or_default() += matched;
            }
        }

        let pct = self.blueprint.tolerances.composition_pct;
        let within = |expected: u32, got: u32| {
            if section.flexible {
                let slack = (f64::from(expected) * pct / 100.0).ceil();
                (f64::from(got) - f64::from(expected)).abs() <= slack
            } else {
                expected == got
            }
        };

        let count_ok = within(planned_count, actual_count);
        let composition_ok = planned
            .iter()
            .all(|(marks, &expected)| within(expected, actual.get(marks).copied().unwrap_or(0)));

        let composition: Vec<String> = planned
            .iter()
            .map(|(marks, expected)| {
                format!("{}分 {}/{}", marks, actual.get(marks).copied().unwrap_or(0), expected)
            })
            .collect();

        ValidationCheck::new(
            format!("大题 {} 题量与分值构成", section.name),
            count_ok && composition_ok,
            format!(
                "题量 {}/{} | {}",
                actual_count,
                planned_count,
                composition.join(", ")
            ),
        )
    }

    /// 每个有分值约束的知识点都在 [min - 容差, max + 容差] 之内
    fn check_topics(&self, picks: &[Picked]) -> Vec<ValidationCheck> {
        let mut tally: BTreeMap<&str, u32> = BTreeMap::new();
        for p in picks {
            *tally.entry(p.question.topic_id.as_str()).or_default() += p.question.marks;
        }

        let mut topics: Vec<&Topic> = self
            .topics
            .iter()
            .filter(|t| t.min_marks.is_some() || t.max_marks.is_some())
            .collect();
        topics.sort_by(|a, b| a.id.cmp(&b.id));

        topics
            .into_iter()
            .map(|topic| {
                let tolerance = topic.tolerance_or(self.blueprint.tolerances.topic_marks);
                let marks = tally.get(topic.id.as_str()).copied().unwrap_or(0);
                let low = topic.min_marks.map(|m| m.saturating_sub(tolerance));
                let high = topic.max_marks.map(|m| m + tolerance);
                let passed = low.map_or(true, |l| marks >= l) && high.map_or(true, |h| marks <= h);

                let fmt_bound = |b: Option<u32>| b.map_or_else(|| "-".to_string(), |v| v.to_string());
                ValidationCheck::new(
                    format!("知识点 {} 分值范围", topic.id),
                    passed,
                    format!(
                        "{} 分, 允许 [{}, {}] (容差 {})",
                        marks,
                        fmt_bound(low),
                        fmt_bound(high),
                        tolerance
                    ),
                )
            })
            .collect()
    }

    fn check_mark_caps(&self, picks: &[Picked]) -> ValidationCheck {
        let mut over = Vec::new();
        for cap in &self.blueprint.mark_caps {
            let count = picks.iter().filter(|p| p.question.marks == cap.marks).count() as u32;
            if count > cap.max_count {
                over.push(format!("{}分 {} 道 > {}", cap.marks, count, cap.max_count));
            }
        }
        ValidationCheck::new(
            "分值题量上限",
            over.is_empty(),
            if over.is_empty() {
                "未超出".to_string()
            } else {
                over.join(", ")
            },
        )
    }
}

fn section_marks(section: &SectionTarget, picks: &[Picked]) -> Vec<u32> {
    picks
        .iter()
        .filter(|p| p.section == section.name)
        .map(|p| p.question.marks)
        .collect()
}

fn check_duplicates(picks: &[Picked]) -> ValidationCheck {
    let mut seen = HashSet::new();
    let mut duplicates: Vec<u64> = picks
        .iter()
        .map(|p| p.question.id)
        .filter(|id| !seen.insert(*id))
        .collect();
    duplicates.sort_unstable();
    duplicates.dedup();

    ValidationCheck::new(
        "题目不重复",
        duplicates.is_empty(),
        if duplicates.is_empty() {
            format!("{} 道题均不重复", picks.len())
        } else {
            format!("重复题目: {:?}", duplicates)
        },
    )
}

fn check_answers(picks: &[Picked]) -> ValidationCheck {
    let missing: Vec<u64> = picks
        .iter()
        .filter(|p| !p.question.has_answer())
        .map(|p| p.question.id)
        .collect();

    ValidationCheck::new(
        "参考答案完整",
        missing.is_empty(),
        if missing.is_empty() {
            "全部题目均有答案".to_string()
        } else {
            format!("缺少答案: {:?}", missing)
        },
    )
}

fn check_active(picks: &[Picked]) -> ValidationCheck {
    let inactive: Vec<u64> = picks
        .iter()
        .filter(|p| !p.question.active)
        .map(|p| p.question.id)
        .collect();

    ValidationCheck::new(
        "题目均为启用状态",
        inactive.is_empty(),
        if inactive.is_empty() {
            "全部启用".to_string()
        } else {
            format!("已停用: {:?}", inactive)
        },
    )
}
