//! 内置试卷布局
//!
//! 题库文件可以直接写 `preset = "biology_flexible"` 引用这些布局，
//! 也可以在 `[paper.blueprint]` 里完整声明自己的布局。

use crate::models::blueprint::{
    Bounds, Fallback, FlexibleLayout, FlexiblePlan, MarkCount, OrderingPolicy, PaperBlueprint,
    Quota, SectionSpec, Tolerances,
};
use crate::models::subject::Subject;

/// 全部内置布局名称
pub const PRESET_NAMES: [&str; 4] = [
    "sectioned_standard",
    "science_structured",
    "language_comprehension",
    "biology_flexible",
];

/// 按名称查找布局
pub fn by_name(name: &str) -> Option<PaperBlueprint> {
    match name {
        "sectioned_standard" => Some(sectioned_standard()),
        "science_structured" => Some(science_structured()),
        "language_comprehension" => Some(language_comprehension()),
        "biology_flexible" => Some(biology_flexible()),
        _ => None,
    }
}

/// 科目默认布局
pub fn default_for(subject: Subject) -> Option<PaperBlueprint> {
    match subject {
        Subject::History | Subject::Geography | Subject::Religion | Subject::Business => {
            Some(sectioned_standard())
        }
        Subject::Physics | Subject::Chemistry => Some(science_structured()),
        Subject::English | Subject::Kiswahili => Some(language_comprehension()),
        Subject::Biology => Some(biology_flexible()),
        Subject::Mathematics => None,
    }
}

fn section(name: &str, answer: Option<u32>, quotas: Vec<Quota>) -> SectionSpec {
    SectionSpec {
        name: name.to_string(),
        answer,
        question_section: None,
        quotas,
    }
}

/// 三大题：A 15×2 必答，B 4×5 必答，C 3×20 任选 2（满分 90）
pub fn sectioned_standard() -> PaperBlueprint {
    PaperBlueprint {
        name: "sectioned_standard".to_string(),
        sections: vec![
            section("A", None, vec![Quota::new(15, 2).labeled("short")]),
            section("B", None, vec![Quota::new(4, 5).labeled("structured")]),
            section(
                "C",
                Some(2),
                vec![Quota::new(3, 20)
                    .labeled("essay")
                    .kind("essay")
                    .fallback(Fallback::any())],
            ),
        ],
        flexible: None,
        tolerances: Tolerances::default(),
        max_attempts: 30,
        ordering: OrderingPolicy::BySection,
        mark_caps: Vec::new(),
    }
}

/// 理科结构题：A 12×2 单问；B 1×12 作图题（无则改用结构题）+ 4×11 结构题（满分 80）
pub fn science_structured() -> PaperBlueprint {
    PaperBlueprint {
        name: "science_structured".to_string(),
        sections: vec![
            section(
                "A",
                None,
                vec![Quota::new(12, 2).labeled("short").nested(false)],
            ),
            section(
                "B",
                None,
                vec![
                    Quota::new(1, 12)
                        .labeled("graph")
                        .nested(true)
                        .kind("graph")
                        .fallback(Fallback::kind("structured").nested(true))
                        .fallback(Fallback::any().nested(true)),
                    Quota::new(4, 11)
                        .labeled("structured")
                        .nested(true)
                        .kind("structured"),
                ],
            ),
        ],
        flexible: None,
        tolerances: Tolerances {
            topic_marks: 3,
            ..Tolerances::default()
        },
        max_attempts: 50,
        ordering: OrderingPolicy::BySection,
        mark_caps: Vec::new(),
    }
}

/// 语言卷：A 阅读理解 20，B 文学选段 25，C 语法 15（满分 60）
pub fn language_comprehension() -> PaperBlueprint {
    PaperBlueprint {
        name: "language_comprehension".to_string(),
        sections: vec![
            section(
                "A",
                None,
                vec![Quota::new(1, 20)
                    .labeled("comprehension")
                    .nested(true)
                    .category("is_comprehension")],
            ),
            section(
                "B",
                None,
                vec![Quota::new(1, 25)
                    .labeled("excerpt")
                    .nested(true)
                    .category("is_literature")],
            ),
            section(
                "C",
                None,
                vec![Quota::new(1, 15)
                    .labeled("grammar")
                    .nested(true)
                    .kind("grammar")
                    .fallback(Fallback::any().nested(true))],
            ),
        ],
        flexible: None,
        tolerances: Tolerances {
            topic_marks: 5,
            ..Tolerances::default()
        },
        max_attempts: 10,
        ordering: OrderingPolicy::BySection,
        mark_caps: Vec::new(),
    }
}

/// 生物一卷：多小问题目 10–18 道共 50–65 分，其余用 1/2/3 分单问题目补足（满分 80，共 22–30 题）
pub fn biology_flexible() -> PaperBlueprint {
    PaperBlueprint {
        name: "biology_flexible".to_string(),
        sections: Vec::new(),
        flexible: Some(FlexibleLayout {
            section: "I".to_string(),
            nested_count: Bounds::new(10, 18),
            nested_marks: Bounds::new(50, 65),
            nested_question_marks: Bounds::new(2, 8),
            denominations: vec![1, 2, 3],
            question_count: Bounds::new(22, 30),
            max_draws: 100,
            standalone_kind: None,
            fallback_plan: Some(FlexiblePlan {
                nested_count: 12,
                nested_marks: 56,
                standalone: vec![
                    MarkCount { marks: 3, count: 4 },
                    MarkCount { marks: 2, count: 6 },
                ],
            }),
        }),
        tolerances: Tolerances::default(),
        max_attempts: 100,
        ordering: OrderingPolicy::MarkRamp {
            early_pct: 40,
            middle_pct: 40,
        },
        mark_caps: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_presets_pass_check() {
        for name in PRESET_NAMES {
            let blueprint = by_name(name).unwrap();
            assert_eq!(blueprint.name, name);
            assert!(blueprint.check().is_ok(), "布局 {} 应该通过检查", name);
        }
    }

    #[test]
    fn test_default_for_subject() {
        assert_eq!(
            default_for(Subject::Biology).map(|b| b.name),
            Some("biology_flexible".to_string())
        );
        assert!(default_for(Subject::Mathematics).is_none());
    }
}
