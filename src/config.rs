use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::cli::*;
use crate::dataset::{LabeledImage, scan_labeled_dir};
use crate::decision::DecisionConfig;

static MODEL_DIR: LazyLock<String> = LazyLock::new(|| {
    ProjectDirs::from("", "aloxaf", "imclassify")
        .map(|dirs| dirs.config_dir().to_string_lossy().to_string())
        .unwrap_or_else(|| ".".to_string())
});

fn default_model_dir() -> &'static str {
    MODEL_DIR.as_str()
}

#[derive(Parser, Debug, Clone)]
pub struct MatchOptions {
    /// 比值测试阈值，最近邻距离小于次近邻距离的该倍数才算好匹配
    #[arg(long, value_name = "RATIO", default_value_t = 0.8)]
    pub ratio: f32,
    /// 好匹配数量不超过该值的参考图片会被忽略
    #[arg(long, value_name = "N", default_value_t = 10)]
    pub good_match_count: u32,
    /// 好匹配占比（百分数）必须超过该值
    #[arg(long, value_name = "PERCENT", default_value_t = 4.499)]
    pub good_match_percent: f32,
}

impl From<&MatchOptions> for DecisionConfig {
    fn from(opts: &MatchOptions) -> Self {
        Self {
            ratio: opts.ratio,
            good_match_count: opts.good_match_count,
            good_match_percent: opts.good_match_percent,
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct IndexOptions {
    /// 近邻索引类型
    #[arg(long, value_enum, default_value_t = IndexKind::Hnsw)]
    pub index: IndexKind,
    /// HNSW 搜索时每次访问的节点数量
    #[arg(long, value_name = "EF", default_value_t = 64)]
    pub ef_search: usize,
}

#[derive(Parser, Debug, Clone)]
pub struct ClassifierOptions {
    /// 覆盖所有分类器保存的接受阈值
    #[arg(long, value_name = "SCORE", allow_negative_numbers = true)]
    pub score_threshold: Option<f32>,
}

#[derive(Parser, Debug, Clone)]
pub struct InputOptions {
    /// 按 <目录>/<标签>/<文件> 组织的数据集
    #[arg(required_unless_present = "image", conflicts_with = "image")]
    pub dir: Option<PathBuf>,
    /// 单张图片的描述符文件
    #[arg(long, requires = "label")]
    pub image: Option<PathBuf>,
    /// 单张图片的期望标签
    #[arg(long, requires = "image")]
    pub label: Option<String>,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "npy")]
    pub suffix: String,
}

impl InputOptions {
    /// 待分类的图片列表
    pub fn images(&self) -> crate::Result<Vec<LabeledImage>> {
        match (&self.image, &self.label, &self.dir) {
            (Some(image), Some(label), _) => Ok(vec![LabeledImage::new(label.as_str(), image)]),
            (_, _, Some(dir)) => scan_labeled_dir(dir, &self.suffix),
            _ => Err(crate::Error::config("需要指定数据集目录，或者 --image 和 --label")),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imclassify", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 模型目录，保存参考集合、视觉词典和分类器
    #[arg(short, long, default_value = default_model_dir())]
    pub model_dir: ModelDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 从带标签的数据集构建参考集合
    Build(BuildCommand),
    /// 使用近邻匹配对图片分类
    Match(MatchCommand),
    /// 对训练集的描述符聚类，生成视觉词典
    Vocab(VocabCommand),
    /// 训练一对多分类器
    Train(TrainCommand),
    /// 使用词袋和分类器对图片分类
    Classify(ClassifyCommand),
    /// 查看已保存的分类报告
    Show(ShowCommand),
}

#[derive(Debug, Clone)]
pub struct ModelDir {
    path: PathBuf,
}

impl ModelDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回参考集合文件的路径
    pub fn references(&self) -> PathBuf {
        self.path.join("references.bin")
    }

    /// 返回视觉词典文件的路径
    pub fn vocabulary(&self) -> PathBuf {
        self.path.join("vocabulary.npy")
    }

    /// 返回分类器文件的路径
    pub fn classifiers(&self) -> PathBuf {
        self.path.join("classifiers.json")
    }
}

impl FromStr for ModelDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// 暴力搜索，结果确定
    Exact,
    /// HNSW 近似搜索
    Hnsw,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = Opts::try_parse_from(["imclassify", "-m", "/tmp/model", "match", "data"]).unwrap();
        assert_eq!(opts.model_dir.references(), Path::new("/tmp/model/references.bin"));
        let SubCommand::Match(cmd) = opts.subcmd else { panic!("expected match") };
        assert_eq!(DecisionConfig::from(&cmd.matching), DecisionConfig::default());
        assert_eq!(cmd.index.index, IndexKind::Hnsw);
    }

    #[test]
    fn test_single_image_requires_label() {
        assert!(Opts::try_parse_from(["imclassify", "match", "--image", "a.npy"]).is_err());
        assert!(
            Opts::try_parse_from(["imclassify", "match", "--image", "a.npy", "--label", "cat"]).is_ok()
        );
        assert!(Opts::try_parse_from(["imclassify", "match"]).is_err());
    }

    #[test]
    fn test_classify_verification_defaults_off() {
        let opts = Opts::try_parse_from(["imclassify", "classify", "data"]).unwrap();
        let SubCommand::Classify(cmd) = opts.subcmd else { panic!("expected classify") };
        assert_eq!(cmd.verify_candidates, 0);
        assert_eq!(cmd.classifier.score_threshold, None);

        let opts =
            Opts::try_parse_from(["imclassify", "classify", "data", "--verify-candidates", "3", "--index", "exact"])
                .unwrap();
        let SubCommand::Classify(cmd) = opts.subcmd else { panic!("expected classify") };
        assert_eq!(cmd.verify_candidates, 3);
        assert_eq!(cmd.index.index, IndexKind::Exact);
    }

    #[test]
    fn test_label_requires_single_image() {
        assert!(Opts::try_parse_from(["imclassify", "match", "data", "--label", "cat"]).is_err());
        assert!(Opts::try_parse_from(["imclassify", "classify", "data", "--label", "cat"]).is_err());
    }
}
