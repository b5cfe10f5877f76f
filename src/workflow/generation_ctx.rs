//! 组卷上下文
//!
//! 封装"我正在为哪张试卷做第几次尝试"这一信息，作为日志前缀使用

use std::fmt::Display;

/// 组卷上下文
#[derive(Debug, Clone)]
pub struct GenerationCtx {
    /// 试卷ID
    pub paper_id: String,

    /// 请求序号（仅用于日志显示）
    pub request_index: usize,

    /// 当前尝试次数（从1开始，0 表示尚未开始）
    pub attempt: u32,

    /// 本次组卷的随机种子
    pub seed: u64,
}

impl GenerationCtx {
    pub fn new(paper_id: impl Into<String>, request_index: usize, seed: u64) -> Self {
        Self {
            paper_id: paper_id.into(),
            request_index,
            attempt: 0,
            seed,
        }
    }

    /// 进入下一次尝试
    pub fn next_attempt(&mut self) {
        self.attempt += 1;
    }

    /// 本次尝试使用的随机种子
    ///
    /// 每次尝试独立取种，同一个 (seed, attempt) 总是得到同样的随机序列
    pub fn attempt_seed(&self) -> u64 {
        self.seed
            .wrapping_add(u64::from(self.attempt).wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }
}

impl Display for GenerationCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.attempt == 0 {
            write!(f, "[试卷 {} #{}]", self.paper_id, self.request_index)
        } else {
            write!(
                f,
                "[试卷 {} #{} 第 {} 次尝试]",
                self.paper_id, self.request_index, self.attempt
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_seeds_differ() {
        let mut ctx = GenerationCtx::new("p1", 1, 42);
        assert_eq!(ctx.to_string(), "[试卷 p1 #1]");

        ctx.next_attempt();
        let first = ctx.attempt_seed();
        ctx.next_attempt();
        assert_ne!(first, ctx.attempt_seed());
        assert_eq!(ctx.to_string(), "[试卷 p1 #1 第 2 次尝试]");
    }
}
