use crate::error::{AppError, AppResult, ConfigError, FileError};
use crate::infrastructure::InMemoryRepository;
use crate::models::question::{Paper, Question, Topic};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;

/// 一个题库文件：一张试卷及其知识点和题目
///
/// ```toml
/// [paper]
/// id = "hist-1"
/// subject = "History"
/// name = "History Paper 1"
/// total_marks = 90
/// preset = "sectioned_standard"
///
/// [[topics]]
/// id = "t1"
/// name = "Early civilisations"
///
/// [[questions]]
/// id = 1
/// topic_id = "t1"
/// marks = 2
/// body = "Name two early civilisations."
/// answer = "Egypt, Mesopotamia"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct BankFile {
    pub paper: Paper,
    #[serde(default)]
    pub topics: Vec<Topic>,
    #[serde(default)]
    pub questions: Vec<Question>,
    /// 文件来源路径
    #[serde(skip)]
    pub file_path: Option<String>,
}

impl BankFile {
    /// 写入内存题库，省略 paper_id 的知识点和题目归属到本试卷
    pub fn register(self, repository: &mut InMemoryRepository) -> Result<(), ConfigError> {
        let paper_id = self.paper.id.clone();
        repository.add_paper(self.paper)?;

        for mut topic in self.topics {
            if topic.paper_id.is_empty() {
                topic.paper_id = paper_id.clone();
            }
            repository.add_topic(topic);
        }

        for mut question in self.questions {
            if question.paper_id.is_empty() {
                question.paper_id = paper_id.clone();
            }
            repository.add_question(question)?;
        }

        Ok(())
    }
}

/// 从 TOML 文件加载一个题库文件
pub async fn load_bank_file(toml_file_path: &Path) -> AppResult<BankFile> {
    let path_str = toml_file_path.display().to_string();
    let content = fs::read_to_string(toml_file_path)
        .await
        .map_err(|e| AppError::file_read_failed(path_str.clone(), e))?;

    let mut bank: BankFile = toml::from_str(&content).map_err(|source| FileError::TomlParseFailed {
        path: path_str.clone(),
        source,
    })?;

    bank.file_path = Some(path_str);

    Ok(bank)
}

/// 从文件夹中加载所有 TOML 题库文件（按文件名排序）
///
/// 单个文件解析失败只记录警告并跳过
pub async fn load_all_bank_files(folder_path: &str) -> AppResult<Vec<BankFile>> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        return Err(FileError::DirectoryNotFound {
            path: folder_path.to_string(),
        }
        .into());
    }

    let mut toml_files = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .map_err(|e| AppError::file_read_failed(folder_path, e))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| AppError::file_read_failed(folder_path, e))?
    {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml_files.push(path);
        }
    }
    toml_files.sort();

    let mut banks = Vec::new();
    for path in toml_files {
        tracing::info!(
            "正在加载: {}",
            path.file_name().unwrap_or_default().to_string_lossy()
        );

        match load_bank_file(&path).await {
            Ok(bank) => {
                tracing::info!(
                    "成功加载试卷 {}: {} 个知识点, {} 道题目",
                    bank.paper.id,
                    bank.topics.len(),
                    bank.questions.len()
                );
                banks.push(bank);
            }
            Err(e) => {
                tracing::warn!("加载文件失败 {}: {}", path.display(), e);
            }
        }
    }

    Ok(banks)
}

/// 把多个题库文件合并成一个内存题库
///
/// 试卷ID或题目ID重复视为配置错误
pub fn build_repository(banks: Vec<BankFile>) -> AppResult<InMemoryRepository> {
    let mut repository = InMemoryRepository::new();
    for bank in banks {
        bank.register(&mut repository)?;
    }
    Ok(repository)
}

/// 加载题库目录并构建内存题库
pub async fn load_repository(folder_path: &str) -> AppResult<InMemoryRepository> {
    let banks = load_all_bank_files(folder_path).await?;
    build_repository(banks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{QuestionFilter, QuestionRepository};
    use crate::models::subject::Subject;

    const BANK: &str = r#"
[paper]
id = "hist-1"
subject = "History"
name = "History Paper 1"
total_marks = 90
preset = "sectioned_standard"

[[topics]]
id = "t1"
name = "Early civilisations"
max_marks = 40

[[questions]]
id = 1
topic_id = "t1"
marks = 2
body = "Name two early civilisations."
answer = "Egypt, Mesopotamia"

[[questions]]
id = 2
topic_id = "t1"
marks = 20
kind = "essay"
body = "Discuss the rise of city states."
answer = "..."
"#;

    #[test]
    fn test_parse_and_register() {
        let bank: BankFile = toml::from_str(BANK).unwrap();
        assert_eq!(bank.paper.subject, Subject::History);
        assert_eq!(bank.questions.len(), 2);

        let repo = build_repository(vec![bank]).unwrap();
        let topics = repo.topics("hist-1");
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].paper_id, "hist-1");

        let essays = repo.find(
            "hist-1",
            &["t1".to_string()],
            &QuestionFilter::new().kind("essay"),
        );
        assert_eq!(essays.len(), 1);
        assert_eq!(essays[0].paper_id, "hist-1");
    }

    #[test]
    fn test_duplicate_question_across_files() {
        let a: BankFile = toml::from_str(BANK).unwrap();
        let mut b: BankFile = toml::from_str(BANK).unwrap();
        b.paper.id = "hist-2".to_string();

        let err = build_repository(vec![a, b]).unwrap_err();
        assert!(matches!(
            err,
            AppError::Config(ConfigError::DuplicateQuestionId { id: 1 })
        ));
    }

    #[tokio::test]
    async fn test_missing_folder() {
        let err = load_all_bank_files("/definitely/not/here").await.unwrap_err();
        assert!(matches!(err, AppError::File(FileError::DirectoryNotFound { .. })));
    }

    /// 解析失败的文件被跳过
    #[tokio::test]
    async fn test_bad_file_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.toml"), BANK).unwrap();
        std::fs::write(dir.path().join("b.toml"), "[paper\nbroken").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let banks = load_all_bank_files(&dir.path().to_string_lossy())
            .await
            .unwrap();
        assert_eq!(banks.len(), 1);
        assert!(banks[0].file_path.as_deref().unwrap().ends_with("a.toml"));

        let err = load_bank_file(&dir.path().join("b.toml")).await.unwrap_err();
        assert!(matches!(err, AppError::File(FileError::TomlParseFailed { .. })));
    }
}
