use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;

use super::classify_all;
use crate::bow::Vocabulary;
use crate::classifier::ClassifierBank;
use crate::classify::{BowClassifier, MatchVerifier};
use crate::cli::SubCommandExtend;
use crate::config::{ClassifierOptions, IndexKind, IndexOptions, InputOptions, MatchOptions, Opts};
use crate::decision::DecisionConfig;
use crate::index::{ExactIndex, HnswIndex, ReferenceSet};

#[derive(Parser, Debug, Clone)]
pub struct ClassifyCommand {
    #[command(flatten)]
    pub input: InputOptions,
    #[command(flatten)]
    pub classifier: ClassifierOptions,
    /// 用近邻匹配复核分数最高的 N 个类别，需要先执行 build，0 表示不复核
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub verify_candidates: usize,
    #[command(flatten)]
    pub matching: MatchOptions,
    #[command(flatten)]
    pub index: IndexOptions,
    /// 分类报告的输出路径
    #[arg(short, long, default_value = "result.json")]
    pub output: PathBuf,
}

impl ClassifyCommand {
    fn verifier(&self, opts: &Opts) -> Result<MatchVerifier> {
        let config = DecisionConfig::from(&self.matching);
        config.validate()?;
        let references = ReferenceSet::open(opts.model_dir.references())?;
        let n = self.verify_candidates;
        let ef_search = self.index.ef_search;
        let verifier = match self.index.index {
            IndexKind::Exact => MatchVerifier::new(&references, config, n, ExactIndex::new)?,
            IndexKind::Hnsw => {
                MatchVerifier::new(&references, config, n, |set| HnswIndex::build(set, ef_search))?
            }
        };
        info!("复核分数最高的 {} 个类别", n);
        Ok(verifier)
    }
}

impl SubCommandExtend for ClassifyCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let vocabulary = Vocabulary::open(opts.model_dir.vocabulary())?;
        let mut bank = ClassifierBank::open(opts.model_dir.classifiers())?;
        if let Some(threshold) = self.classifier.score_threshold {
            bank.set_threshold(threshold);
        }
        let mut classifier = BowClassifier::new(vocabulary, bank)?;
        if self.verify_candidates > 0 {
            classifier = classifier.with_verifier(self.verifier(opts)?)?;
        }
        let images = self.input.images()?;
        classify_all(&classifier, &images, &self.output)
    }
}
