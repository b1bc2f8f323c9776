mod build;
mod classify;
mod r#match;
mod show;
mod train;
mod vocab;

use std::path::Path;

pub use build::*;
pub use classify::*;
use indicatif::{ParallelProgressIterator, ProgressBar};
use log::{info, warn};
pub use r#match::*;
use rayon::prelude::*;
pub use show::*;
pub use train::*;
pub use vocab::*;

use crate::Opts;
use crate::batch::run_batch;
use crate::classify::Classifier;
use crate::dataset::LabeledImage;
use crate::descriptor::{FeatureExtractor, FeatureSet, NpyExtractor};
use crate::utils::pb_style;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> anyhow::Result<()>;
}

/// 并行读取训练图片的描述符，读取失败的图片会被跳过
fn load_features(images: Vec<LabeledImage>) -> Vec<(LabeledImage, FeatureSet)> {
    let pb = ProgressBar::new(images.len() as u64).with_style(pb_style());
    pb.set_message("读取描述符");
    let loaded = images
        .into_par_iter()
        .progress_with(pb.clone())
        .filter_map(|image| match NpyExtractor.extract(&image.path) {
            Ok(features) => Some((image, features)),
            Err(e) => {
                pb.println(format!("[ERR] {}", e));
                None
            }
        })
        .collect::<Vec<_>>();
    pb.finish_with_message("描述符读取完成");
    info!("成功读取 {} 张图片", loaded.len());
    loaded
}

/// 对所有图片分类，输出日志并写入报告
fn classify_all(classifier: &dyn Classifier, images: &[LabeledImage], output: &Path) -> anyhow::Result<()> {
    if images.is_empty() {
        warn!("没有找到任何图片");
    }
    let pb = ProgressBar::new(images.len() as u64).with_style(pb_style());
    let mut report = run_batch(classifier, &NpyExtractor, images, &pb)?;
    pb.finish_and_clear();

    report.finalize()?;
    report.log_summary();
    report.write_json(output)?;
    info!("分类结果已写入 {}", output.display());
    Ok(())
}
