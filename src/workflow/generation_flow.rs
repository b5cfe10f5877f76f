//! 组卷流程 - 流程层
//!
//! 核心职责：定义"生成一份试卷"的完整流程
//!
//! 流程顺序：
//! 1. 校验试卷、知识点和布局配置（错误直接返回，不重试）
//! 2. 规划分值（固定卷型只规划一次，弹性卷型每次尝试重新抽取）
//! 3. 选题 → 排序 → 校验，任一步失败整次尝试作废
//! 4. 通过校验后组装结果；尝试次数耗尽后按失败情况归类报错

use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{GenerationError, Result};
use crate::infrastructure::QuestionRepository;
use crate::models::blueprint::PaperBlueprint;
use crate::models::question::{Paper, Topic};
use crate::services::arranger;
use crate::services::assembler::{self, AttemptStats, GeneratedPaperResult};
use crate::services::planner::{Planner, SelectionTarget};
use crate::services::pool::{CandidatePool, PartitionKey, PartitionStat};
use crate::services::selector::{AttemptFailure, Selector};
use crate::services::validator::Validator;
use crate::workflow::generation_ctx::GenerationCtx;

/// 一次组卷请求
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationRequest {
    pub paper_id: String,
    /// 为空表示使用试卷的全部启用知识点
    pub topic_ids: Vec<String>,
    /// 为空时随机取种，结果中会回显实际使用的种子
    pub seed: Option<u64>,
    /// 只使用题干包含该文本的题目
    pub text_contains: Option<String>,
    /// 请求序号（仅用于日志）
    pub index: usize,
}

impl GenerationRequest {
    pub fn new(paper_id: impl Into<String>) -> Self {
        Self {
            paper_id: paper_id.into(),
            ..Self::default()
        }
    }

    pub fn topics(mut self, topic_ids: Vec<String>) -> Self {
        self.topic_ids = topic_ids;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn text_contains(mut self, text: impl Into<String>) -> Self {
        self.text_contains = Some(text.into());
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }
}

/// 组卷流程
///
/// - 编排规划、选题、排序、校验、组装
/// - 决定何时重试、何时放弃以及如何归类失败
/// - 不持有题库，只通过仓储能力访问
/// - 不做持久化（由编排层负责）
#[derive(Debug, Clone, Default)]
pub struct GenerationFlow {
    max_attempts: Option<u32>,
    time_limit: Option<Duration>,
    verbose_logging: bool,
}

/// 尝试耗尽前累计的失败信息
#[derive(Default)]
struct FailureLog {
    /// 分区 -> (需要题量, 失败次数)
    partitions: BTreeMap<PartitionKey, (u32, u32)>,
    completed_selections: u32,
    last_failed_checks: Vec<String>,
}

impl FailureLog {
    fn record(&mut self, failure: &AttemptFailure, target: &SelectionTarget) {
        if let Some(key) = failure.key() {
            let required = target
                .slots()
                .filter(|s| &s.key == key)
                .map(|s| s.count)
                .max()
                .unwrap_or(0);
            let entry = self.partitions.entry(key.clone()).or_insert((required, 0));
            entry.0 = entry.0.max(required);
            entry.1 += 1;
        }
    }

    fn stats(&self, pool: &CandidatePool<'_>) -> Vec<PartitionStat> {
        let mut stats: Vec<PartitionStat> = self
            .partitions
            .iter()
            .map(|(key, &(required, failures))| PartitionStat {
                partition: key.to_string(),
                available: pool.available(key),
                required,
                failures,
            })
            .collect();
        stats.sort_by(|a, b| b.failures.cmp(&a.failures));
        stats
    }
}

impl GenerationFlow {
    /// 创建新的组卷流程
    pub fn new(config: &Config) -> Self {
        Self {
            max_attempts: config.max_attempts,
            time_limit: config.time_limit_secs.map(Duration::from_secs),
            verbose_logging: config.verbose_logging,
        }
    }

    /// 覆盖布局中的尝试次数
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    /// 生成一份试卷
    ///
    /// 成功时返回完整的试卷记录；失败时返回带诊断信息的 [`GenerationError`]，
    /// 不会返回不完整的试卷。
    pub fn generate(
        &self,
        repository: &dyn QuestionRepository,
        request: &GenerationRequest,
    ) -> Result<GeneratedPaperResult> {
        let started = Instant::now();

        let paper = load_paper(repository, &request.paper_id)?;
        let topics = resolve_topics(repository, &paper, &request.topic_ids)?;
        let blueprint = paper.resolve_blueprint()?;
        blueprint.check()?;

        let seed = request.seed.unwrap_or_else(|| rand::thread_rng().gen());
        let mut ctx = GenerationCtx::new(paper.id.clone(), request.index, seed);
        let budget = self.max_attempts.unwrap_or(blueprint.max_attempts).max(1);

        info!(
            "{} 🎯 开始组卷: {} | 布局 {} | 满分 {} | 知识点 {} 个 | 最多尝试 {} 次 | 种子 {}",
            ctx,
            paper.name,
            blueprint.name,
            paper.total_marks,
            topics.len(),
            budget,
            seed
        );

        let planner = Planner::new(&blueprint, paper.total_marks);
        // 固定卷型的规划与随机数无关，只做一次
        let fixed_target = if planner.is_flexible() {
            None
        } else {
            Some(planner.plan(&mut StdRng::seed_from_u64(seed))?)
        };

        let selector = Selector::new(&blueprint, &topics);
        let validator = Validator::new(&blueprint, &topics);
        let mut pool = CandidatePool::new(
            repository,
            paper.id.clone(),
            topics.clone(),
            request.text_contains.clone(),
        );

        let mut failures = FailureLog::default();
        let mut planner_draws = 0;

        while ctx.attempt < budget {
            if let Some(limit) = self.time_limit {
                if ctx.attempt > 0 && started.elapsed() >= limit {
                    warn!("{} ⏱️ 超过时间上限 {:?}，停止尝试", ctx, limit);
                    break;
                }
            }

            ctx.next_attempt();
            let mut rng = StdRng::seed_from_u64(ctx.attempt_seed());

            let drawn;
            let target = match &fixed_target {
                Some(target) => target,
                None => {
                    drawn = planner.plan(&mut rng)?;
                    &drawn
                }
            };
            planner_draws += target.planner_draws;

            pool.prepare(target);
            let attempt_pool = pool.shuffled(&mut rng);

            let selection = match selector.select(target, &attempt_pool, &mut rng) {
                Ok(selection) => selection,
                Err(failure) => {
                    debug!("{} 选题失败: {}", ctx, failure);
                    failures.record(&failure, target);
                    continue;
                }
            };

            let backtracks = selection.backtracks;
            let arranged = arranger::arrange(target, selection.picks, blueprint.ordering, &mut rng);
            let report = validator.validate(target, &arranged);

            if !report.all_passed {
                failures.completed_selections += 1;
                failures.last_failed_checks = report.failure_messages();
                debug!(
                    "{} 校验未通过: {}",
                    ctx,
                    failures.last_failed_checks.join("; ")
                );
                continue;
            }

            if self.verbose_logging {
                for check in &report.passed {
                    info!("{}   ✓ {}", ctx, check);
                }
            }

            let stats = AttemptStats {
                attempts: ctx.attempt,
                backtracks,
                planner_draws,
                used_fallback_plan: target.used_fallback_plan,
                seed,
                elapsed_ms: started.elapsed().as_millis() as u64,
            };
            let result = assembler::assemble(
                &paper,
                &blueprint.name,
                &topics,
                target,
                arranged,
                report,
                stats,
            );

            info!(
                "{} ✓ 组卷成功: {} 道题, 可得分 {} (原始分 {}), 回退 {} 次, 用时 {} ms",
                ctx,
                result.question_count(),
                result.total_marks,
                result.raw_total_marks,
                backtracks,
                stats.elapsed_ms
            );
            return Ok(result);
        }

        Err(exhausted(&paper, &blueprint, ctx.attempt, &failures, &pool))
    }
}

fn load_paper(repository: &dyn QuestionRepository, paper_id: &str) -> Result<Paper> {
    let paper = repository
        .paper(paper_id)
        .ok_or_else(|| GenerationError::configuration(format!("试卷不存在: {}", paper_id)))?;

    if !paper.active {
        return Err(GenerationError::configuration(format!(
            "试卷已停用: {}",
            paper_id
        )));
    }
    if paper.total_marks == 0 {
        return Err(GenerationError::configuration(format!(
            "试卷 {} 的满分必须大于 0",
            paper_id
        )));
    }
    Ok(paper)
}

/// 解析请求中的知识点
///
/// 未指定时使用试卷全部启用知识点；指定的知识点必须存在、属于该试卷且处于启用状态
fn resolve_topics(
    repository: &dyn QuestionRepository,
    paper: &Paper,
    topic_ids: &[String],
) -> Result<Vec<Topic>> {
    let all = repository.topics(&paper.id);

    let topics: Vec<Topic> = if topic_ids.is_empty() {
        all.into_iter().filter(|t| t.active).collect()
    } else {
        let mut seen = HashSet::new();
        let mut picked = Vec::new();
        for id in topic_ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            let topic = all.iter().find(|t| &t.id == id).ok_or_else(|| {
                GenerationError::configuration(format!(
                    "知识点 {} 不存在或不属于试卷 {}",
                    id, paper.id
                ))
            })?;
            if !topic.active {
                return Err(GenerationError::configuration(format!("知识点已停用: {}", id)));
            }
            picked.push(topic.clone());
        }
        picked
    };

    if topics.is_empty() {
        return Err(GenerationError::configuration(format!(
            "试卷 {} 没有可用的知识点",
            paper.id
        )));
    }

    for topic in &topics {
        if let (Some(min), Some(max)) = (topic.min_marks, topic.max_marks) {
            if min > max {
                return Err(GenerationError::configuration(format!(
                    "知识点 {} 的分值范围无效: min {} > max {}",
                    topic.id, min, max
                )));
            }
        }
    }

    Ok(topics)
}

/// 尝试耗尽后的错误归类
///
/// 有任何一次尝试完成了全部配额，说明题量本身够用，归为校验失败；
/// 否则归为题库不足，并列出失败的分区。
fn exhausted(
    paper: &Paper,
    blueprint: &PaperBlueprint,
    attempts: u32,
    failures: &FailureLog,
    pool: &CandidatePool<'_>,
) -> GenerationError {
    let stats = failures.stats(pool);

    let error = if failures.completed_selections > 0 {
        GenerationError::ValidationFailed {
            paper_id: paper.id.clone(),
            attempts,
            failed_checks: failures.last_failed_checks.clone(),
            pool: stats,
        }
    } else {
        GenerationError::InsufficientPool {
            paper_id: paper.id.clone(),
            attempts,
            deficits: stats,
        }
    };

    warn!(
        "[试卷 {}] ❌ 布局 {} 尝试 {} 次后放弃: {}",
        paper.id, blueprint.name, attempts, error
    );
    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::infrastructure::InMemoryRepository;
    use crate::models::blueprint::Quota;
    use crate::test_support::*;

    /// 题库恰好够用：第一次尝试就成功并选中全部题目
    #[test]
    fn test_exact_pool_succeeds_first_attempt() {
        let repo = exact_three_section_repository();
        let request = GenerationRequest::new(PAPER_ID)
            .topics(topic_ids(&["t1", "t2", "t3"]))
            .seed(7);

        let result = GenerationFlow::default().generate(&repo, &request).unwrap();
        assert_eq!(result.stats.attempts, 1);
        assert_eq!(result.raw_total_marks, 110);
        assert_eq!(result.total_marks, 90);

        let mut ids = result.question_ids.clone();
        ids.sort();
        assert_eq!(ids, (1..=22).collect::<Vec<u64>>());
    }

    /// 缺少 20 分题时终止并指出该分区
    #[test]
    fn test_missing_partition_reports_insufficient_pool() {
        let mut repo = InMemoryRepository::new();
        repo.add_paper(paper(90, three_section_blueprint())).unwrap();
        repo.add_topic(topic("t1"));
        for id in 1..=15 {
            repo.add_question(question(id, "t1", 2)).unwrap();
        }
        for id in 16..=19 {
            repo.add_question(question(id, "t1", 5)).unwrap();
        }

        let err = GenerationFlow::default()
            .generate(&repo, &GenerationRequest::new(PAPER_ID).seed(1))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InsufficientPool);
        assert!(!err.is_fatal());
        let deficits = err.diagnostics();
        assert_eq!(deficits.len(), 1);
        assert_eq!(deficits[0].partition, PartitionKey::exact(20).to_string());
        assert_eq!(deficits[0].available, 0);
        assert_eq!(deficits[0].required, 3);
        assert_eq!(deficits[0].failures, 10);
    }

    #[test]
    fn test_unknown_topic_is_configuration_error() {
        let repo = exact_three_section_repository();
        let request = GenerationRequest::new(PAPER_ID).topics(topic_ids(&["t1", "nope"]));
        let err = GenerationFlow::default().generate(&repo, &request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationInvalid);
        assert!(err.diagnostics().is_empty());
    }

    #[test]
    fn test_unknown_paper_is_configuration_error() {
        let repo = exact_three_section_repository();
        let err = GenerationFlow::default()
            .generate(&repo, &GenerationRequest::new("missing"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationInvalid);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_inverted_topic_bounds_rejected() {
        let mut repo = exact_three_section_repository();
        let mut bad = topic("t4");
        bad.min_marks = Some(20);
        bad.max_marks = Some(10);
        repo.add_topic(bad);

        let err = GenerationFlow::default()
            .generate(&repo, &GenerationRequest::new(PAPER_ID))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationInvalid);
    }

    /// 布局合计与满分不符属于规划错误，不重试
    #[test]
    fn test_layout_mismatch_is_planning_infeasible() {
        let mut repo = InMemoryRepository::new();
        repo.add_paper(paper(100, three_section_blueprint())).unwrap();
        repo.add_topic(topic("t1"));

        let err = GenerationFlow::default()
            .generate(&repo, &GenerationRequest::new(PAPER_ID))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PlanningInfeasible);
    }

    /// 题量够但知识点下限无法满足：归为校验失败
    #[test]
    fn test_unreachable_topic_minimum_is_validation_failure() {
        let mut repo = InMemoryRepository::new();
        repo.add_paper(paper(
            10,
            blueprint(vec![section("A", None, vec![Quota::new(5, 2)])]),
        ))
        .unwrap();
        let mut t1 = topic("t1");
        t1.min_marks = Some(40);
        repo.add_topic(t1);
        for id in 1..=5 {
            repo.add_question(question(id, "t1", 2)).unwrap();
        }

        let err = GenerationFlow::default()
            .with_max_attempts(3)
            .generate(&repo, &GenerationRequest::new(PAPER_ID).seed(3))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
        match err {
            GenerationError::ValidationFailed {
                attempts,
                failed_checks,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert!(failed_checks[0].contains("知识点 t1"));
            }
            other => panic!("意外的错误: {}", other),
        }
    }

    /// 同一大题里分值题量相同、只有题型不同的两个配额互不干扰
    #[test]
    fn test_same_shape_quotas_differing_by_kind() {
        let mut repo = InMemoryRepository::new();
        repo.add_paper(paper(
            24,
            blueprint(vec![section(
                "B",
                None,
                vec![Quota::new(1, 12).kind("graph"), Quota::new(1, 12).kind("essay")],
            )]),
        ))
        .unwrap();
        repo.add_topic(topic("t1"));
        for id in 1..=3 {
            repo.add_question(question(id, "t1", 12).with_kind("graph")).unwrap();
        }
        for id in 4..=6 {
            repo.add_question(question(id, "t1", 12).with_kind("essay")).unwrap();
        }

        let result = GenerationFlow::default()
            .generate(&repo, &GenerationRequest::new(PAPER_ID).seed(11))
            .unwrap();

        assert_eq!(result.stats.attempts, 1);
        assert!(result.validation.all_passed);
        assert_eq!(result.total_marks, 24);
        assert_eq!(result.kind_distribution.get("graph"), Some(&1));
        assert_eq!(result.kind_distribution.get("essay"), Some(&1));
    }

    /// 同一种子得到同样的试卷
    #[test]
    fn test_same_seed_replays() {
        let mut repo = InMemoryRepository::new();
        repo.add_paper(paper(90, three_section_blueprint())).unwrap();
        let mut id = 1;
        for t in ["t1", "t2", "t3"] {
            repo.add_topic(topic(t));
            for (count, marks) in [(10, 2), (3, 5), (2, 20)] {
                for _ in 0..count {
                    repo.add_question(question(id, t, marks)).unwrap();
                    id += 1;
                }
            }
        }

        let request = GenerationRequest::new(PAPER_ID).seed(99);
        let flow = GenerationFlow::default();
        let first = flow.generate(&repo, &request).unwrap();
        let second = flow.generate(&repo, &request).unwrap();
        assert_eq!(first.question_ids, second.question_ids);
        assert_eq!(first.stats.seed, 99);
    }

    /// 题干过滤会缩小所有分区
    #[test]
    fn test_text_filter_narrows_pool() {
        let repo = exact_three_section_repository();
        let request = GenerationRequest::new(PAPER_ID)
            .seed(5)
            .text_contains("(2 marks)");
        let err = GenerationFlow::default()
            .with_max_attempts(2)
            .generate(&repo, &request)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientPool);
    }
}
