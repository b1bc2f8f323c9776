use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use super::classify_all;
use crate::cli::SubCommandExtend;
use crate::classify::MatchClassifier;
use crate::config::{IndexKind, IndexOptions, InputOptions, MatchOptions, Opts};
use crate::decision::DecisionConfig;
use crate::index::{ExactIndex, HnswIndex, ReferenceSet};

#[derive(Parser, Debug, Clone)]
pub struct MatchCommand {
    #[command(flatten)]
    pub input: InputOptions,
    #[command(flatten)]
    pub matching: MatchOptions,
    #[command(flatten)]
    pub index: IndexOptions,
    /// 分类报告的输出路径
    #[arg(short, long, default_value = "result.json")]
    pub output: PathBuf,
}

impl SubCommandExtend for MatchCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let config = DecisionConfig::from(&self.matching);
        config.validate()?;
        let images = self.input.images()?;

        let references = ReferenceSet::open(opts.model_dir.references())?;
        match self.index.index {
            IndexKind::Exact => {
                let classifier = MatchClassifier::new(ExactIndex::new(references), config)?;
                classify_all(&classifier, &images, &self.output)
            }
            IndexKind::Hnsw => {
                let index = HnswIndex::build(references, self.index.ef_search);
                let classifier = MatchClassifier::new(index, config)?;
                classify_all(&classifier, &images, &self.output)
            }
        }
    }
}
