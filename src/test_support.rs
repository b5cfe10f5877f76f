//! 单元测试共用的题库构造工具

use crate::infrastructure::InMemoryRepository;
use crate::models::blueprint::{OrderingPolicy, PaperBlueprint, Quota, SectionSpec, Tolerances};
use crate::models::question::{Paper, Question, Topic};
use crate::models::subject::Subject;

pub const PAPER_ID: &str = "p1";

pub fn question(id: u64, topic_id: &str, marks: u32) -> Question {
    Question {
        id,
        paper_id: PAPER_ID.to_string(),
        topic_id: topic_id.to_string(),
        section: None,
        marks,
        is_nested: false,
        body: format!("Question {} ({} marks)", id, marks),
        answer: format!("Answer {}", id),
        kind: "structured".to_string(),
        difficulty: None,
        active: true,
        times_used: 0,
        last_used: None,
    }
}

pub fn topic(id: &str) -> Topic {
    Topic {
        id: id.to_string(),
        paper_id: PAPER_ID.to_string(),
        name: format!("Topic {}", id),
        min_marks: None,
        max_marks: None,
        tolerance: None,
        categories: Vec::new(),
        active: true,
    }
}

impl Question {
    pub fn nested_question(mut self) -> Self {
        self.is_nested = true;
        self
    }

    pub fn with_section(mut self, section: &str) -> Self {
        self.section = Some(section.to_string());
        self
    }

    pub fn with_kind(mut self, kind: &str) -> Self {
        self.kind = kind.to_string();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

pub fn section(name: &str, answer: Option<u32>, quotas: Vec<Quota>) -> SectionSpec {
    SectionSpec {
        name: name.to_string(),
        answer,
        question_section: None,
        quotas,
    }
}

pub fn blueprint(sections: Vec<SectionSpec>) -> PaperBlueprint {
    PaperBlueprint {
        name: "test".to_string(),
        sections,
        flexible: None,
        tolerances: Tolerances::default(),
        max_attempts: 10,
        ordering: OrderingPolicy::BySection,
        mark_caps: Vec::new(),
    }
}

pub fn paper(total_marks: u32, blueprint: PaperBlueprint) -> Paper {
    Paper {
        id: PAPER_ID.to_string(),
        subject: Subject::History,
        name: "Test Paper".to_string(),
        total_marks,
        active: true,
        preset: None,
        blueprint: Some(blueprint),
    }
}

/// A 15×2 必答、B 4×5 必答、C 3×20 任选 2，满分 90
pub fn three_section_blueprint() -> PaperBlueprint {
    blueprint(vec![
        section("A", None, vec![Quota::new(15, 2)]),
        section("B", None, vec![Quota::new(4, 5)]),
        section("C", Some(2), vec![Quota::new(3, 20)]),
    ])
}

/// 恰好够用的三大题题库：15 道 2 分、4 道 5 分、3 道 20 分，分布在三个知识点
pub fn exact_three_section_repository() -> InMemoryRepository {
    let mut repo = InMemoryRepository::new();
    repo.add_paper(paper(90, three_section_blueprint())).unwrap();
    for t in ["t1", "t2", "t3"] {
        repo.add_topic(topic(t));
    }

    let topics = ["t1", "t2", "t3"];
    let mut id = 1;
    for (count, marks) in [(15, 2), (4, 5), (3, 20)] {
        for i in 0..count {
            repo.add_question(question(id, topics[i % 3], marks)).unwrap();
            id += 1;
        }
    }
    repo
}

pub fn topic_ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}
