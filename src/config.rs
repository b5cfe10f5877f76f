use crate::error::ConfigError;

/// 程序配置文件
#[derive(Clone, Debug)]
pub struct Config {
    /// 同时进行的组卷任务数量
    pub max_concurrent_generations: usize,
    /// 题库 TOML 文件存放目录
    pub bank_folder: String,
    /// 生成试卷的输出目录
    pub output_dir: String,
    /// 输出日志文件
    pub output_log_file: String,
    /// 生成失败记录文件
    pub warn_file: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    // --- 组卷参数 ---
    /// 覆盖布局中的尝试次数
    pub max_attempts: Option<u32>,
    /// 固定随机种子，便于复现
    pub seed: Option<u64>,
    /// 只生成指定试卷
    pub paper_id: Option<String>,
    /// 只使用指定知识点（为空表示试卷的全部启用知识点）
    pub topic_ids: Vec<String>,
    /// 每张试卷生成的份数
    pub generations_per_paper: usize,
    /// 单次组卷的时间上限（秒）
    pub time_limit_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_generations: 4,
            bank_folder: "bank".to_string(),
            output_dir: "generated_papers".to_string(),
            output_log_file: "output.txt".to_string(),
            warn_file: "warn.txt".to_string(),
            verbose_logging: false,
            max_attempts: None,
            seed: None,
            paper_id: None,
            topic_ids: Vec::new(),
            generations_per_paper: 1,
            time_limit_secs: None,
        }
    }
}

impl Config {
    /// 从环境变量读取配置，未设置的项使用默认值
    pub fn from_env() -> Result<Self, ConfigError> {
        let default = Self::default();
        Ok(Self {
            max_concurrent_generations: parse_var("MAX_CONCURRENT_GENERATIONS", "usize")?
                .unwrap_or(default.max_concurrent_generations),
            bank_folder: std::env::var("BANK_FOLDER").unwrap_or(default.bank_folder),
            output_dir: std::env::var("OUTPUT_DIR").unwrap_or(default.output_dir),
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(default.output_log_file),
            warn_file: std::env::var("WARN_FILE").unwrap_or(default.warn_file),
            verbose_logging: parse_var("VERBOSE_LOGGING", "bool")?.unwrap_or(default.verbose_logging),
            max_attempts: parse_var("MAX_ATTEMPTS", "u32")?,
            seed: parse_var("SEED", "u64")?,
            paper_id: std::env::var("PAPER_ID").ok().filter(|v| !v.trim().is_empty()),
            topic_ids: std::env::var("TOPIC_IDS")
                .map(|v| split_list(&v))
                .unwrap_or(default.topic_ids),
            generations_per_paper: parse_var("GENERATIONS_PER_PAPER", "usize")?
                .unwrap_or(default.generations_per_paper),
            time_limit_secs: parse_var("TIME_LIMIT_SECS", "u64")?,
        })
    }
}

/// 读取并解析环境变量；未设置返回 None，无法解析返回错误
fn parse_var<T: std::str::FromStr>(name: &str, expected_type: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::EnvVarParseFailed {
                var_name: name.to_string(),
                value,
                expected_type: expected_type.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
