use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// 无法判定类别时的标签
pub const UNKNOWN_LABEL: &str = "unknown";

/// 近邻匹配路径的判定依据
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchEvidence {
    /// 相对查询图片描述符数量的最大好匹配百分比
    pub best_test_percent: f32,
    /// 相对参考图片描述符数量的最大好匹配百分比
    pub best_training_percent: f32,
    /// 胜出参考图片的好匹配数量
    pub best_match_count: u32,
}

impl MatchEvidence {
    /// 两种归一化方式中较大的百分比
    pub fn best_percent(&self) -> f32 {
        self.best_test_percent.max(self.best_training_percent)
    }
}

/// 对一个候选类别做近邻匹配复核的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateMatch {
    pub label: String,
    /// 该类别的参考图片中是否有通过阈值的
    pub verified: bool,
    #[serde(flatten)]
    pub evidence: MatchEvidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f32,
}

/// 每个分类器给出的分数，顺序与分类器顺序一致
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassScore(pub Vec<LabelScore>);

impl ClassScore {
    pub fn get(&self, label: &str) -> Option<f32> {
        self.0.iter().find(|s| s.label == label).map(|s| s.score)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LabelScore> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Evidence {
    Scores {
        scores: ClassScore,
        /// 按分类器分数从高到低排列，未开启复核时为空
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        candidates: Vec<CandidateMatch>,
    },
    Matches(MatchEvidence),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub expected_label: String,
    pub evaluated_label: String,
    pub evidence: Evidence,
}

impl ClassificationResult {
    pub fn is_unknown(&self) -> bool {
        self.evaluated_label == UNKNOWN_LABEL
    }

    pub fn is_correct(&self) -> bool {
        self.evaluated_label == self.expected_label
    }
}

/// 单张图片的处理结果
///
/// 读取失败的图片单独记录，不与 unknown 混淆
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Outcome {
    Classified(ClassificationResult),
    Failed { expected_label: String, reason: String },
}

impl Outcome {
    pub fn expected_label(&self) -> &str {
        match self {
            Self::Classified(r) => &r.expected_label,
            Self::Failed { expected_label, .. } => expected_label,
        }
    }

    /// 分类错误或处理失败
    pub fn is_error(&self) -> bool {
        match self {
            Self::Classified(r) => !r.is_correct(),
            Self::Failed { .. } => true,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Classified(r) => match &r.evidence {
                Evidence::Matches(m) => write!(
                    f,
                    "{} -> {} (test {:.2}%, training {:.2}%, count {})",
                    r.expected_label,
                    r.evaluated_label,
                    m.best_test_percent,
                    m.best_training_percent,
                    m.best_match_count
                ),
                Evidence::Scores { scores, candidates } => {
                    write!(f, "{} -> {} [", r.expected_label, r.evaluated_label)?;
                    for (i, s) in scores.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}: {:.3}", s.label, s.score)?;
                    }
                    write!(f, "]")?;
                    for c in candidates {
                        write!(
                            f,
                            " {}{}({:.2}%/{:.2}%)",
                            if c.verified { "+" } else { "-" },
                            c.label,
                            c.evidence.best_test_percent,
                            c.evidence.best_training_percent
                        )?;
                    }
                    Ok(())
                }
            },
            Self::Failed { expected_label, reason } => {
                write!(f, "{} -> 失败: {}", expected_label, reason)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub key: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total: usize,
    pub error_count: usize,
    pub failed: usize,
    /// 错误率，取值 0 到 1
    pub error_rate: f64,
    /// 出错图片的 key，按记录顺序
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportState {
    Open,
    Closed,
}

/// 一次批处理的全部结果
///
/// 只能追加，`finalize` 之后不可再修改
#[derive(Debug)]
pub struct BatchReport {
    entries: Vec<ReportEntry>,
    keys: HashSet<String>,
    state: ReportState,
}

impl Default for BatchReport {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchReport {
    pub fn new() -> Self {
        Self { entries: vec![], keys: HashSet::new(), state: ReportState::Open }
    }

    pub fn record(&mut self, key: impl Into<String>, outcome: Outcome) -> Result<()> {
        let key = key.into();
        if self.state == ReportState::Closed {
            return Err(Error::InvalidState(format!("报告已关闭，无法记录 {}", key)));
        }
        if !self.keys.insert(key.clone()) {
            return Err(Error::DuplicateKey(key));
        }
        self.entries.push(ReportEntry { key, outcome });
        Ok(())
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state == ReportState::Closed
    }

    pub fn summary(&self) -> Summary {
        summarize(&self.entries)
    }

    /// 关闭报告并返回汇总
    pub fn finalize(&mut self) -> Result<Summary> {
        if self.state == ReportState::Closed {
            return Err(Error::InvalidState("报告已经关闭".to_string()));
        }
        self.state = ReportState::Closed;
        Ok(self.summary())
    }

    pub fn log_summary(&self) {
        for entry in &self.entries {
            match entry.outcome {
                Outcome::Failed { .. } => warn!("{}: {}", entry.key, entry.outcome),
                _ => info!("{}: {}", entry.key, entry.outcome),
            }
        }
        let summary = self.summary();
        info!(
            "共 {} 张图片，错误 {} 张（其中失败 {} 张），错误率 {:.2}%",
            summary.total,
            summary.error_count,
            summary.failed,
            summary.error_rate * 100.
        );
        if !summary.errors.is_empty() {
            info!("错误列表: {}", summary.errors.join(", "));
        }
    }

    /// 将结果写入 JSON 文件，只能在关闭后调用
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        if !self.is_closed() {
            return Err(Error::InvalidState("报告尚未关闭".to_string()));
        }
        let persisted = PersistedReport { results: self.entries.clone(), summary: self.summary() };
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &persisted)?;
        Ok(())
    }
}

fn summarize(entries: &[ReportEntry]) -> Summary {
    let errors = entries
        .iter()
        .filter(|e| e.outcome.is_error())
        .map(|e| e.key.clone())
        .collect::<Vec<_>>();
    let failed = entries.iter().filter(|e| matches!(e.outcome, Outcome::Failed { .. })).count();
    let total = entries.len();
    let error_rate = if total == 0 { 0. } else { errors.len() as f64 / total as f64 };
    Summary { total, error_count: errors.len(), failed, error_rate, errors }
}

/// 写入磁盘的报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedReport {
    pub results: Vec<ReportEntry>,
    pub summary: Summary,
}

impl PersistedReport {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
