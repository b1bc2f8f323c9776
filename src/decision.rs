use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::index::{NeighborMatch, ReferenceItem};
use crate::report::{CandidateMatch, ClassScore, MatchEvidence, UNKNOWN_LABEL};
use crate::vote::{VoteTally, aggregate_votes};

/// 判定参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// 比值测试的阈值
    pub ratio: f32,
    /// 好匹配数量不超过该值的参考图片被视为噪声
    pub good_match_count: u32,
    /// 好匹配百分比必须超过该值
    pub good_match_percent: f32,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self { ratio: 0.8, good_match_count: 10, good_match_percent: 4.499 }
    }
}

impl DecisionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.ratio > 0. && self.ratio <= 1.) {
            return Err(Error::config(format!("ratio 必须在 (0, 1] 之间: {}", self.ratio)));
        }
        if !(self.good_match_percent >= 0.) {
            return Err(Error::config(format!(
                "好匹配百分比阈值不能为负数或 NaN: {}",
                self.good_match_percent
            )));
        }
        Ok(())
    }
}

/// `count` 占 `total` 的百分比，`total` 为 0 时返回 0
#[inline]
pub fn percent(count: u32, total: usize) -> f32 {
    if total == 0 {
        return 0.;
    }
    (100. * count as f32 / total as f32).min(100.)
}

/// 近邻匹配路径的判定结果
#[derive(Debug, Clone, PartialEq)]
pub struct MatchDecision {
    pub label: String,
    /// 胜出的参考图片 ID
    pub winner: Option<usize>,
    pub evidence: MatchEvidence,
}

impl MatchDecision {
    fn unknown() -> Self {
        Self { label: UNKNOWN_LABEL.to_string(), winner: None, evidence: MatchEvidence::default() }
    }
}

/// 某一种归一化方式下的当前最优候选
#[derive(Debug, Clone, Copy)]
struct Candidate {
    reference: usize,
    percent: f32,
    votes: u32,
}

fn challenge(best: &mut Option<Candidate>, candidate: Candidate, threshold: f32) {
    if candidate.percent <= threshold {
        return;
    }
    // 严格大于，平局时保留先出现的参考图片
    if best.is_none_or(|b| candidate.percent > b.percent) {
        *best = Some(candidate);
    }
}

/// 将投票或分类器分数转换为最终标签
#[derive(Debug, Clone, Default)]
pub struct ThresholdDecisionEngine {
    config: DecisionConfig,
}

impl ThresholdDecisionEngine {
    pub fn new(config: DecisionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn tally(&self, matches: &[NeighborMatch], n_references: usize) -> VoteTally {
        aggregate_votes(matches, n_references, self.config.ratio)
    }

    /// 近邻匹配路径
    ///
    /// 分别以查询图片和参考图片的描述符数量做归一化，各自求出最大值，
    /// 取两者中较大的一个作为结果。两者相等时以查询图片一侧为准。
    pub fn decide_matches(
        &self,
        tally: &VoteTally,
        query_count: usize,
        references: &[ReferenceItem],
    ) -> MatchDecision {
        let DecisionConfig { good_match_count, good_match_percent, .. } = self.config;

        let mut best_test: Option<Candidate> = None;
        let mut best_training: Option<Candidate> = None;
        for (reference, votes) in tally.iter() {
            if votes <= good_match_count {
                continue;
            }
            let reference_count = references.get(reference).map_or(0, |r| r.descriptor_count);
            let test = Candidate { reference, percent: percent(votes, query_count), votes };
            let training = Candidate { reference, percent: percent(votes, reference_count), votes };
            challenge(&mut best_test, test, good_match_percent);
            challenge(&mut best_training, training, good_match_percent);
        }

        let winner = match (best_test, best_training) {
            (Some(t), Some(r)) if t.percent < r.percent => r,
            (Some(t), _) => t,
            (None, Some(r)) => r,
            (None, None) => return MatchDecision::unknown(),
        };
        let Some(item) = references.get(winner.reference) else {
            return MatchDecision::unknown();
        };

        MatchDecision {
            label: item.label.clone(),
            winner: Some(winner.reference),
            evidence: MatchEvidence {
                best_test_percent: best_test.map_or(0., |c| c.percent),
                best_training_percent: best_training.map_or(0., |c| c.percent),
                best_match_count: winner.votes,
            },
        }
    }

    /// 一对多分类器路径
    ///
    /// 取分数最高的分类器，分数超过该分类器自身的阈值才接受，否则为 unknown。
    /// 分数相同时取靠前的分类器。
    pub fn decide_scores(&self, scores: &ClassScore, thresholds: &[f32]) -> String {
        debug_assert_eq!(thresholds.len(), scores.len());
        let mut best: Option<(usize, f32)> = None;
        for (i, s) in scores.iter().enumerate() {
            if s.score.is_nan() {
                continue;
            }
            if best.is_none_or(|(_, b)| s.score > b) {
                best = Some((i, s.score));
            }
        }
        match best {
            Some((i, score)) if thresholds.get(i).is_some_and(|&t| score > t) => {
                scores.0[i].label.clone()
            }
            _ => UNKNOWN_LABEL.to_string(),
        }
    }

    /// 分类器 + 近邻复核路径
    ///
    /// 候选按分类器分数从高到低排列，只考虑通过复核的候选，取好匹配百分比最高的一个。
    /// 百分比相同时取分类器分数更高的候选，全部未通过时为 unknown。
    pub fn decide_candidates(&self, candidates: &[CandidateMatch]) -> String {
        let mut best: Option<(&CandidateMatch, f32)> = None;
        for candidate in candidates.iter().filter(|c| c.verified) {
            let percent = candidate.evidence.best_percent();
            if best.is_none_or(|(_, b)| percent > b) {
                best = Some((candidate, percent));
            }
        }
        best.map_or_else(|| UNKNOWN_LABEL.to_string(), |(c, _)| c.label.clone())
    }
}
