use log::debug;

use crate::bow::Vocabulary;
use crate::classifier::ClassifierBank;
use crate::decision::{DecisionConfig, ThresholdDecisionEngine};
use crate::descriptor::FeatureSet;
use crate::error::{Error, Result};
use crate::index::{NeighborIndex, ReferenceSet};
use crate::report::{CandidateMatch, ClassScore, ClassificationResult, Evidence, MatchEvidence};

/// 一条完整的分类流水线：描述符 -> 标签
///
/// 构建后只读，可以被多个工作线程同时使用
pub trait Classifier: Sync {
    fn classify(&self, features: &FeatureSet, expected: &str) -> Result<ClassificationResult>;
}

/// 近邻匹配路径：查询近邻 -> 比值测试投票 -> 阈值判定
pub struct MatchClassifier<I> {
    index: I,
    engine: ThresholdDecisionEngine,
}

impl<I: NeighborIndex> MatchClassifier<I> {
    pub fn new(index: I, config: DecisionConfig) -> Result<Self> {
        if index.is_empty() {
            return Err(Error::config("参考集合为空"));
        }
        let engine = ThresholdDecisionEngine::new(config)?;
        Ok(Self { index, engine })
    }
}

impl<I: NeighborIndex> Classifier for MatchClassifier<I> {
    fn classify(&self, features: &FeatureSet, expected: &str) -> Result<ClassificationResult> {
        let references = self.index.references();
        if features.dim() != references.dim() {
            return Err(Error::Dimension { expected: references.dim(), actual: features.dim() });
        }
        let matches = self.index.knn2(features);
        let tally = self.engine.tally(&matches, self.index.len());
        debug!("{} 个描述符中有 {} 个好匹配", features.len(), tally.total());

        let decision = self.engine.decide_matches(&tally, features.len(), references.items());
        Ok(ClassificationResult {
            expected_label: expected.to_string(),
            evaluated_label: decision.label,
            evidence: Evidence::Matches(decision.evidence),
        })
    }
}

/// 每个类别一个近邻索引，用来复核分类器分数最高的几个类别
pub struct MatchVerifier {
    indexes: Vec<(String, Box<dyn NeighborIndex>)>,
    engine: ThresholdDecisionEngine,
    candidates: usize,
    dim: usize,
}

impl MatchVerifier {
    /// `build` 为每个类别的参考子集构建近邻索引
    pub fn new<I, F>(
        references: &ReferenceSet,
        config: DecisionConfig,
        candidates: usize,
        build: F,
    ) -> Result<Self>
    where
        I: NeighborIndex + 'static,
        F: Fn(ReferenceSet) -> I,
    {
        if references.is_empty() {
            return Err(Error::config("参考集合为空"));
        }
        if candidates == 0 {
            return Err(Error::config("复核的候选类别数量必须大于 0"));
        }
        let engine = ThresholdDecisionEngine::new(config)?;
        let indexes = references
            .split_by_label()?
            .into_iter()
            .map(|(label, set)| (label, Box::new(build(set)) as Box<dyn NeighborIndex>))
            .collect::<Vec<_>>();
        debug!("已为 {} 个类别构建复核索引", indexes.len());
        Ok(Self { indexes, engine, candidates, dim: references.dim() })
    }

    fn index(&self, label: &str) -> Option<&dyn NeighborIndex> {
        self.indexes.iter().find(|(l, _)| l == label).map(|(_, index)| index.as_ref())
    }

    /// 按分数从高到低复核前 `candidates` 个类别
    pub fn verify(&self, features: &FeatureSet, scores: &ClassScore) -> Vec<CandidateMatch> {
        let mut ranked = scores.iter().filter(|s| !s.score.is_nan()).collect::<Vec<_>>();
        // 稳定排序，分数相同时保持分类器顺序
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked
            .into_iter()
            .take(self.candidates)
            .map(|s| {
                let Some(index) = self.index(&s.label) else {
                    return CandidateMatch {
                        label: s.label.clone(),
                        verified: false,
                        evidence: MatchEvidence::default(),
                    };
                };
                let matches = index.knn2(features);
                let tally = self.engine.tally(&matches, index.len());
                let decision = self.engine.decide_matches(&tally, features.len(), index.references().items());
                CandidateMatch {
                    label: s.label.clone(),
                    verified: decision.winner.is_some(),
                    evidence: decision.evidence,
                }
            })
            .collect()
    }
}

/// 词袋路径：词袋编码 -> 一对多分类器打分 -> 阈值判定
///
/// 设置了 [`MatchVerifier`] 时，改为对分数最高的几个类别做近邻匹配复核，
/// 由复核结果决定标签，分类器自身的阈值不再使用
pub struct BowClassifier {
    vocabulary: Vocabulary,
    bank: ClassifierBank,
    thresholds: Vec<f32>,
    engine: ThresholdDecisionEngine,
    verifier: Option<MatchVerifier>,
}

impl BowClassifier {
    pub fn new(vocabulary: Vocabulary, bank: ClassifierBank) -> Result<Self> {
        bank.validate(vocabulary.size())?;
        let thresholds = bank.thresholds();
        Ok(Self { vocabulary, bank, thresholds, engine: ThresholdDecisionEngine::default(), verifier: None })
    }

    /// 每个分类器的类别都必须有参考图片，描述符维度也必须与词典一致
    pub fn with_verifier(mut self, verifier: MatchVerifier) -> Result<Self> {
        if verifier.dim != self.vocabulary.dim() {
            return Err(Error::config(format!(
                "参考集合的描述符维度 {} 与词典维度 {} 不一致",
                verifier.dim,
                self.vocabulary.dim()
            )));
        }
        if let Some(label) = self.bank.labels().into_iter().find(|l| verifier.index(l).is_none()) {
            return Err(Error::config(format!("类别 {} 没有参考图片，无法复核", label)));
        }
        self.verifier = Some(verifier);
        Ok(self)
    }
}

impl Classifier for BowClassifier {
    fn classify(&self, features: &FeatureSet, expected: &str) -> Result<ClassificationResult> {
        let presence = self.vocabulary.encode(features)?;
        let scores = self.bank.score(&presence);
        let (evaluated_label, candidates) = match &self.verifier {
            Some(verifier) => {
                let candidates = verifier.verify(features, &scores);
                (self.engine.decide_candidates(&candidates), candidates)
            }
            None => (self.engine.decide_scores(&scores, &self.thresholds), vec![]),
        };
        Ok(ClassificationResult {
            expected_label: expected.to_string(),
            evaluated_label,
            evidence: Evidence::Scores { scores, candidates },
        })
    }
}
