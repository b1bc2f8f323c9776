use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;

use super::load_features;
use crate::Opts;
use crate::bow::Vocabulary;
use crate::cli::SubCommandExtend;
use crate::dataset::scan_labeled_dir;
use crate::kmeans::kmeans;

#[derive(Parser, Debug, Clone)]
pub struct VocabCommand {
    /// 按 <目录>/<标签>/<文件> 组织的训练图片
    pub dir: PathBuf,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "npy")]
    pub suffix: String,
    /// 聚类中心点数量，即视觉词典大小
    #[arg(short, long, default_value_t = 1000)]
    pub clusters: usize,
    /// 最大迭代次数
    #[arg(long, default_value_t = 100)]
    pub max_iter: usize,
    /// 随机种子
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

impl SubCommandExtend for VocabCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let images = scan_labeled_dir(&self.dir, &self.suffix)?;
        let loaded = load_features(images);

        let mut iter = loaded.into_iter().map(|(_, features)| features);
        let Some(mut data) = iter.next() else {
            anyhow::bail!("没有可用的训练图片");
        };
        for features in iter {
            data.extend(&features)?;
        }
        info!("共 {} 个描述符，维度 {}", data.len(), data.dim());

        let state = kmeans(&data, self.clusters, self.max_iter, self.seed)?;
        let vocabulary = Vocabulary::new(state.centroids);

        fs::create_dir_all(opts.model_dir.path())?;
        vocabulary.save(opts.model_dir.vocabulary())?;
        info!("视觉词典已保存，大小 = {}", vocabulary.size());
        Ok(())
    }
}
