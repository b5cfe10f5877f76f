//! 批量组卷处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责批量组卷请求的调度和资源管理。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：初始化日志文件、加载题库目录
//! 2. **构建请求**：每张试卷 × 份数，或配置中指定的单张试卷
//! 3. **并发控制**：使用 Semaphore 限制并发数量
//! 4. **分批处理**：每批完成后再开始下一批
//! 5. **全局统计**：汇总所有请求的结果
//!
//! ## 设计特点
//!
//! - **资源所有者**：唯一持有题库（`Arc`，只读共享）的模块
//! - **互不干扰**：每个请求有自己的随机数源，请求之间不共享可变状态
//! - **向下委托**：组卷是纯计算，放进 `spawn_blocking` 交给 paper_generator

use crate::config::Config;
use crate::infrastructure::InMemoryRepository;
use crate::models::load_repository;
use crate::orchestrator::paper_generator::{self, GenerationEnv, GenerationOutcome};
use crate::services::{JsonPaperWriter, WarnWriter};
use crate::utils::logging::{
    init_log_file, log_batch_complete, log_batch_start, log_requests_loaded, log_startup,
    print_final_stats,
};
use crate::workflow::{GenerationFlow, GenerationRequest};
use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// 应用主结构
pub struct App {
    config: Config,
    repository: Arc<InMemoryRepository>,
}

/// 运行统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    /// 错误类别 -> 次数
    pub failures_by_kind: BTreeMap<String, usize>,
    /// 成功保存的位置
    pub locations: Vec<String>,
}

/// 批次处理结果
#[derive(Debug, Default)]
struct BatchResult {
    success: usize,
    failed: usize,
    failures_by_kind: BTreeMap<String, usize>,
    locations: Vec<String>,
}

impl App {
    /// 初始化应用：准备日志文件并加载题库
    pub async fn initialize(config: Config) -> Result<Self> {
        init_log_file(&config.output_log_file)?;
        log_startup(config.max_concurrent_generations, &config.bank_folder);

        info!("\n📁 正在加载题库...");
        let repository = load_repository(&config.bank_folder).await?;
        info!(
            "✓ 题库加载完成: {} 张试卷, {} 道题目",
            repository.paper_ids().len(),
            repository.question_count()
        );

        Ok(Self::with_repository(config, repository))
    }

    /// 使用已构建好的题库创建应用
    pub fn with_repository(config: Config, repository: InMemoryRepository) -> Self {
        Self {
            config,
            repository: Arc::new(repository),
        }
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<RunStats> {
        let requests = self.build_requests();

        if requests.is_empty() {
            warn!("⚠️ 没有可生成的试卷，程序结束");
            return Ok(RunStats::default());
        }

        let paper_count = self.paper_count();
        log_requests_loaded(paper_count, requests.len(), self.max_concurrent());

        let stats = self.process_all_requests(requests).await?;

        let kinds: Vec<(String, usize)> = stats
            .failures_by_kind
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        print_final_stats(
            stats.success,
            stats.failed,
            stats.total,
            &kinds,
            &self.config.output_log_file,
        );

        Ok(stats)
    }

    fn max_concurrent(&self) -> usize {
        self.config.max_concurrent_generations.max(1)
    }

    fn paper_count(&self) -> usize {
        match &self.config.paper_id {
            Some(_) => 1,
            None => self.repository.paper_ids().len(),
        }
    }

    /// 构建组卷请求
    ///
    /// 指定了 PAPER_ID 时只生成该试卷（并使用 TOPIC_IDS）；否则每张试卷都生成。
    /// 指定了 SEED 时第 n 个请求使用 seed + n，整批可以复现。
    fn build_requests(&self) -> Vec<GenerationRequest> {
        let paper_ids = match &self.config.paper_id {
            Some(id) => vec![id.clone()],
            None => self.repository.paper_ids(),
        };

        let copies = self.config.generations_per_paper.max(1);
        let mut requests = Vec::with_capacity(paper_ids.len() * copies);

        for paper_id in paper_ids {
            for _ in 0..copies {
                let index = requests.len() + 1;
                let mut request = GenerationRequest::new(paper_id.clone()).index(index);
                if self.config.paper_id.is_some() {
                    request = request.topics(self.config.topic_ids.clone());
                }
                if let Some(seed) = self.config.seed {
                    request = request.seed(seed.wrapping_add(index as u64));
                }
                requests.push(request);
            }
        }

        requests
    }

    /// 处理所有请求
    async fn process_all_requests(&self, requests: Vec<GenerationRequest>) -> Result<RunStats> {
        let max_concurrent = self.max_concurrent();
        let semaphore = Arc::new(Semaphore::new(max_concurrent));
        let total = requests.len();
        let mut stats = RunStats {
            total,
            ..Default::default()
        };

        // 分批处理
        for batch_start in (0..total).step_by(max_concurrent) {
            let batch_end = (batch_start + max_concurrent).min(total);
            let batch_num = batch_start / max_concurrent + 1;
            let total_batches = (total + max_concurrent - 1) / max_concurrent;

            log_batch_start(batch_num, total_batches, batch_start + 1, batch_end, total);

            let batch_result = self
                .process_batch(&requests[batch_start..batch_end], semaphore.clone())
                .await?;

            log_batch_complete(
                batch_num,
                batch_result.success,
                batch_result.success + batch_result.failed,
            );

            stats.success += batch_result.success;
            stats.failed += batch_result.failed;
            stats.locations.extend(batch_result.locations);
            for (kind, count) in batch_result.failures_by_kind {
                *stats.failures_by_kind.entry(kind).or_default() += count;
            }
        }

        Ok(stats)
    }

    /// 处理单个批次
    async fn process_batch(
        &self,
        batch: &[GenerationRequest],
        semaphore: Arc<Semaphore>,
    ) -> Result<BatchResult> {
        let mut handles = Vec::new();

        for request in batch {
            let permit = semaphore.clone().acquire_owned().await?;
            let repository = Arc::clone(&self.repository);
            let config = self.config.clone();
            let request = request.clone();

            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let flow = GenerationFlow::new(&config);
                let sink = JsonPaperWriter::new(&config.output_dir);
                let warn_writer = WarnWriter::with_path(config.warn_file.clone());
                let env = GenerationEnv {
                    repository: repository.as_ref(),
                    sink: &sink,
                    warn_writer: &warn_writer,
                    log_file: &config.output_log_file,
                };

                match paper_generator::generate_paper(&flow, &request, &env) {
                    Ok(outcome) => Ok(outcome),
                    Err(e) => {
                        error!("[请求 {}] ❌ 收尾过程中发生错误: {:#}", request.index, e);
                        Err(e)
                    }
                }
            });
            handles.push(handle);
        }

        // 等待本批所有任务完成
        let mut result = BatchResult::default();

        for handle in handles {
            match handle.await {
                Ok(Ok(GenerationOutcome::Generated { location, .. })) => {
                    result.success += 1;
                    result.locations.push(location);
                }
                Ok(Ok(GenerationOutcome::Failed(kind))) => {
                    result.failed += 1;
                    *result.failures_by_kind.entry(kind.to_string()).or_default() += 1;
                }
                Ok(Err(_)) => {
                    result.failed += 1;
                    *result
                        .failures_by_kind
                        .entry("persist_failed".to_string())
                        .or_default() += 1;
                }
                Err(e) => {
                    error!("任务执行失败: {}", e);
                    result.failed += 1;
                }
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    fn create_test_app(config: Config) -> App {
        App::with_repository(config, exact_three_section_repository())
    }

    #[test]
    fn test_build_requests_per_paper() {
        let config = Config {
            generations_per_paper: 3,
            seed: Some(10),
            ..Config::default()
        };
        let requests = create_test_app(config).build_requests();

        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].index, 1);
        assert_eq!(requests[2].seed, Some(13));
        assert!(requests.iter().all(|r| r.topic_ids.is_empty()));
    }

    #[test]
    fn test_build_requests_single_paper_with_topics() {
        let config = Config {
            paper_id: Some(PAPER_ID.to_string()),
            topic_ids: topic_ids(&["t1", "t2"]),
            ..Config::default()
        };
        let requests = create_test_app(config).build_requests();

        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].topic_ids, topic_ids(&["t1", "t2"]));
        assert_eq!(requests[0].seed, None);
    }
}
