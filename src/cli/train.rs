use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use indicatif::{ParallelProgressIterator, ProgressBar};
use log::info;
use rayon::prelude::*;

use super::load_features;
use crate::Opts;
use crate::bow::Vocabulary;
use crate::classifier::{ClassifierBank, TrainOptions, TrainingSample};
use crate::cli::SubCommandExtend;
use crate::dataset::scan_labeled_dir;
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct TrainCommand {
    /// 按 <目录>/<标签>/<文件> 组织的训练图片
    pub dir: PathBuf,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "npy")]
    pub suffix: String,
    /// SVM 正则化参数
    #[arg(short = 'C', long, default_value_t = 1.0)]
    pub c: f32,
    /// 学习率
    #[arg(long, default_value_t = 0.1)]
    pub learning_rate: f32,
    /// 最大迭代次数
    #[arg(long, default_value_t = 1000)]
    pub max_iter: usize,
    /// 保存到每个分类器的接受阈值
    #[arg(long, value_name = "SCORE", default_value_t = 0.0, allow_negative_numbers = true)]
    pub score_threshold: f32,
}

impl SubCommandExtend for TrainCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let vocabulary = Vocabulary::open(opts.model_dir.vocabulary())?;
        let images = scan_labeled_dir(&self.dir, &self.suffix)?;
        let loaded = load_features(images);

        let pb = ProgressBar::new(loaded.len() as u64).with_style(pb_style());
        pb.set_message("计算词袋向量");
        let samples = loaded
            .par_iter()
            .progress_with(pb.clone())
            .map(|(image, features)| -> crate::Result<TrainingSample> {
                let vector = vocabulary.encode(features)?;
                Ok(TrainingSample { label: image.label.clone(), vector })
            })
            .collect::<crate::Result<Vec<_>>>()?;
        pb.finish_with_message("词袋向量计算完成");

        let train_opts = TrainOptions {
            c: self.c,
            learning_rate: self.learning_rate,
            max_iter: self.max_iter,
            ..Default::default()
        };
        let mut bank = ClassifierBank::train(&samples, &train_opts)?;
        bank.set_threshold(self.score_threshold);
        bank.validate(vocabulary.size())?;
        bank.save(opts.model_dir.classifiers())?;
        info!("分类器已保存: {}", bank.labels().join(", "));
        Ok(())
    }
}
