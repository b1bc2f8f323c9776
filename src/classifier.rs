use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::report::{ClassScore, LabelScore, UNKNOWN_LABEL};

/// 训练样本：一张图片的词袋向量及其标签
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSample {
    pub label: String,
    pub vector: Vec<f32>,
}

/// 线性 SVM 的训练参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainOptions {
    /// 正则化参数，越大对误分类的惩罚越重
    pub c: f32,
    pub learning_rate: f32,
    pub max_iter: usize,
    /// 一轮迭代中权重变化小于该值时停止
    pub tol: f32,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self { c: 1.0, learning_rate: 0.1, max_iter: 1000, tol: 1e-4 }
    }
}

/// 某个类别对其余所有类别的二分类器
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearClassifier {
    pub label: String,
    pub weights: Vec<f32>,
    pub bias: f32,
    /// 分数超过该值才认为属于该类别
    #[serde(default)]
    pub threshold: f32,
}

impl LinearClassifier {
    /// w·x + b，正值表示属于该类别
    pub fn score(&self, x: &[f32]) -> f32 {
        self.weights.iter().zip(x).map(|(w, x)| w * x).sum::<f32>() + self.bias
    }
}

/// 使用 hinge loss 次梯度下降训练线性 SVM
///
/// `positive[i]` 表示第 i 个样本是否为正样本
pub fn train_binary(
    label: &str,
    samples: &[TrainingSample],
    positive: &[bool],
    opts: &TrainOptions,
) -> LinearClassifier {
    let n_features = samples.first().map_or(0, |s| s.vector.len());
    let mut w = vec![0.0f32; n_features];
    let mut b = 0.0f32;

    let lambda = 1.0 / (2.0 * samples.len().max(1) as f32 * opts.c);

    for epoch in 0..opts.max_iter {
        let eta = opts.learning_rate / (1.0 + epoch as f32 * 0.01);
        let prev_w = w.clone();
        let prev_b = b;

        for (sample, &pos) in samples.iter().zip(positive) {
            let y = if pos { 1.0 } else { -1.0 };
            let decision = w.iter().zip(&sample.vector).map(|(w, x)| w * x).sum::<f32>() + b;
            if y * decision < 1.0 {
                for (w, x) in w.iter_mut().zip(&sample.vector) {
                    *w -= eta * (2.0 * lambda * *w - y * x);
                }
                b += eta * y;
            } else {
                for w in w.iter_mut() {
                    *w -= eta * 2.0 * lambda * *w;
                }
            }
        }

        let change = w.iter().zip(&prev_w).map(|(a, b)| (a - b).powi(2)).sum::<f32>()
            + (b - prev_b).powi(2);
        if change.sqrt() < opts.tol {
            debug!("{}: 第 {} 轮收敛", label, epoch + 1);
            break;
        }
    }

    LinearClassifier { label: label.to_string(), weights: w, bias: b, threshold: 0.0 }
}

/// 一对多分类器组，每个已知类别一个分类器，顺序即平局时的优先级
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifierBank {
    classifiers: Vec<LinearClassifier>,
}

impl ClassifierBank {
    pub fn new(classifiers: Vec<LinearClassifier>) -> Self {
        Self { classifiers }
    }

    /// 为每个标签训练一个分类器，标签按字典序排列
    pub fn train(samples: &[TrainingSample], opts: &TrainOptions) -> Result<Self> {
        let mut labels = samples.iter().map(|s| s.label.as_str()).collect::<Vec<_>>();
        labels.sort();
        labels.dedup();
        if labels.len() < 2 {
            return Err(Error::config(format!("至少需要两个类别才能训练，当前 {} 个", labels.len())));
        }
        let dim = samples[0].vector.len();
        if samples.iter().any(|s| s.vector.len() != dim) {
            return Err(Error::config("训练样本的向量长度不一致"));
        }

        info!("训练 {} 个分类器，{} 个样本，向量长度 {}", labels.len(), samples.len(), dim);
        let classifiers = labels
            .par_iter()
            .map(|&label| {
                let positive = samples.iter().map(|s| s.label == label).collect::<Vec<_>>();
                train_binary(label, samples, &positive, opts)
            })
            .collect::<Vec<_>>();
        Ok(Self { classifiers })
    }

    pub fn classifiers(&self) -> &[LinearClassifier] {
        &self.classifiers
    }

    pub fn len(&self) -> usize {
        self.classifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classifiers.is_empty()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.classifiers.iter().map(|c| c.label.as_str()).collect()
    }

    pub fn thresholds(&self) -> Vec<f32> {
        self.classifiers.iter().map(|c| c.threshold).collect()
    }

    /// 用同一个阈值覆盖所有分类器的阈值
    pub fn set_threshold(&mut self, threshold: f32) {
        self.classifiers.iter_mut().for_each(|c| c.threshold = threshold);
    }

    pub fn score(&self, x: &[f32]) -> ClassScore {
        ClassScore(
            self.classifiers
                .iter()
                .map(|c| LabelScore { label: c.label.clone(), score: c.score(x) })
                .collect(),
        )
    }

    /// 检查分类器组与词袋向量长度是否一致
    pub fn validate(&self, dim: usize) -> Result<()> {
        if self.classifiers.is_empty() {
            return Err(Error::config("分类器组为空"));
        }
        let mut seen = HashSet::new();
        for c in &self.classifiers {
            if c.label == UNKNOWN_LABEL {
                return Err(Error::config(format!("分类器标签不能为 {}", UNKNOWN_LABEL)));
            }
            if !seen.insert(c.label.as_str()) {
                return Err(Error::config(format!("重复的分类器标签: {}", c.label)));
            }
            if c.weights.len() != dim {
                return Err(Error::config(format!(
                    "分类器 {} 的权重长度 {} 与词典大小 {} 不一致",
                    c.label,
                    c.weights.len(),
                    dim
                )));
            }
            if !c.threshold.is_finite() {
                return Err(Error::config(format!("分类器 {} 的阈值无效", c.label)));
            }
        }
        Ok(())
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let bank: Self = serde_json::from_reader(reader)?;
        info!("已加载 {} 个分类器", bank.len());
        Ok(bank)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::*;
    use tempfile::TempDir;

    use super::*;

    fn sample(label: &str, vector: [f32; 3]) -> TrainingSample {
        TrainingSample { label: label.to_string(), vector: vector.to_vec() }
    }

    #[fixture]
    fn samples() -> Vec<TrainingSample> {
        vec![
            sample("cat", [1.0, 0.0, 0.0]),
            sample("cat", [0.9, 0.1, 0.0]),
            sample("dog", [0.0, 1.0, 0.0]),
            sample("dog", [0.1, 0.9, 0.0]),
            sample("fox", [0.0, 0.0, 1.0]),
            sample("fox", [0.0, 0.1, 0.9]),
        ]
    }

    #[rstest]
    fn test_one_vs_all(samples: Vec<TrainingSample>) {
        let bank = ClassifierBank::train(&samples, &TrainOptions::default()).unwrap();
        assert_eq!(bank.labels(), ["cat", "dog", "fox"]);
        bank.validate(3).unwrap();

        for s in &samples {
            let scores = bank.score(&s.vector);
            let best = scores.iter().max_by(|a, b| a.score.total_cmp(&b.score)).unwrap();
            assert_eq!(best.label, s.label);
            assert!(scores.get(&s.label).unwrap() > 0.);
        }
    }

    #[rstest]
    fn test_train_is_deterministic(samples: Vec<TrainingSample>) {
        let a = ClassifierBank::train(&samples, &TrainOptions::default()).unwrap();
        let b = ClassifierBank::train(&samples, &TrainOptions::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_train_needs_two_labels() {
        let samples = [sample("cat", [1., 0., 0.])];
        assert!(matches!(
            ClassifierBank::train(&samples, &TrainOptions::default()),
            Err(Error::Configuration(_))
        ));
    }

    #[rstest]
    fn test_validate(samples: Vec<TrainingSample>) {
        let bank = ClassifierBank::train(&samples, &TrainOptions::default()).unwrap();
        assert!(bank.validate(4).is_err());
        assert!(ClassifierBank::default().validate(3).is_err());

        let mut dup = bank.classifiers().to_vec();
        dup.push(dup[0].clone());
        assert!(ClassifierBank::new(dup).validate(3).is_err());

        let mut unknown = bank.classifiers().to_vec();
        unknown[0].label = UNKNOWN_LABEL.to_string();
        assert!(ClassifierBank::new(unknown).validate(3).is_err());
    }

    #[rstest]
    fn test_bank_persist(samples: Vec<TrainingSample>) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("classifiers.json");
        let mut bank = ClassifierBank::train(&samples, &TrainOptions::default()).unwrap();
        bank.set_threshold(0.25);
        bank.save(&path).unwrap();

        let loaded = ClassifierBank::open(&path).unwrap();
        assert_eq!(loaded.labels(), bank.labels());
        assert_eq!(loaded.thresholds(), [0.25, 0.25, 0.25]);
        for (a, b) in loaded.classifiers()[1].weights.iter().zip(&bank.classifiers()[1].weights) {
            assert!((a - b).abs() < 1e-6);
        }
    }
}
