use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;

use super::load_features;
use crate::Opts;
use crate::cli::SubCommandExtend;
use crate::dataset::scan_labeled_dir;
use crate::index::ReferenceSet;

#[derive(Parser, Debug, Clone)]
pub struct BuildCommand {
    /// 按 <目录>/<标签>/<文件> 组织的参考图片
    pub dir: PathBuf,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "npy")]
    pub suffix: String,
}

impl SubCommandExtend for BuildCommand {
    fn run(&self, opts: &Opts) -> Result<()> {
        let images = scan_labeled_dir(&self.dir, &self.suffix)?;
        let loaded = load_features(images);

        let mut references = ReferenceSet::new();
        for (image, features) in &loaded {
            references.add(image.label.as_str(), image.name(), features)?;
        }
        if references.is_empty() {
            anyhow::bail!("没有可用的参考图片");
        }

        fs::create_dir_all(opts.model_dir.path())?;
        references.save(opts.model_dir.references())?;
        info!(
            "构建参考集合成功：{} 个类别，{} 张图片，{} 个描述符",
            references.labels().len(),
            references.len(),
            references.total_descriptors()
        );
        Ok(())
    }
}
