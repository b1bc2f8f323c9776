use std::path::{Path, PathBuf};

use log::info;
use regex::Regex;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// 一张带标签的图片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledImage {
    pub label: String,
    pub path: PathBuf,
    /// 批处理中的唯一 key，形如 `<label>/<文件名>`
    ///
    /// 不同标签下可能存在同名文件，所以 key 必须带上标签。
    /// 分隔符不能出现在目录名和文件名中，否则 `a_b/c` 与 `a/b_c` 会冲突
    pub key: String,
}

impl LabeledImage {
    pub fn new(label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let label = label.into();
        let path = path.into();
        let filename = path.file_name().map(|s| s.to_string_lossy()).unwrap_or_default();
        let key = format!("{}/{}", label, filename);
        Self { label, path, key }
    }

    /// 不带后缀的文件名
    pub fn name(&self) -> String {
        self.path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default()
    }
}

/// 构建后缀过滤用的正则，多个后缀用逗号分隔
pub fn suffix_regex(suffix: &str) -> Result<Regex> {
    let re = format!("(?i)^({})$", suffix.replace(',', "|"));
    Regex::new(&re).map_err(|e| Error::config(format!("无效的后缀 {}: {}", suffix, e)))
}

/// 扫描 `root/<label>/<file>` 结构的目录
///
/// 返回结果按 (标签, 文件名) 排序，保证每次运行的顺序一致
pub fn scan_labeled_dir(root: impl AsRef<Path>, suffix: &str) -> Result<Vec<LabeledImage>> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(Error::config(format!("{} 不是目录", root.display())));
    }
    let re_suf = suffix_regex(suffix)?;

    info!("开始扫描目录: {}", root.display());
    let mut images = WalkDir::new(root)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let path = entry.path();
            if !path.is_file() {
                return None;
            }
            let ext = path.extension()?;
            if !re_suf.is_match(&ext.to_string_lossy()) {
                return None;
            }
            let label = path.parent()?.file_name()?.to_string_lossy().to_string();
            Some(LabeledImage::new(label, path))
        })
        .collect::<Vec<_>>();
    images.sort_by(|a, b| (&a.label, &a.path).cmp(&(&b.label, &b.path)));
    info!("扫描完成，共 {} 张图片", images.len());

    Ok(images)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_key_is_label_qualified() {
        let a = LabeledImage::new("cat", "/data/cat/001.npy");
        let b = LabeledImage::new("dog", "/data/dog/001.npy");
        assert_eq!(a.key, "cat/001.npy");
        assert_eq!(b.key, "dog/001.npy");
        assert_eq!(a.name(), "001");
        assert_ne!(a.key, b.key);
    }

    #[test]
    fn test_scan_labeled_dir() {
        let dir = TempDir::new().unwrap();
        for (label, file) in
            [("dog", "1.npy"), ("cat", "2.NPY"), ("cat", "1.npy"), ("cat", "readme.txt")]
        {
            fs::create_dir_all(dir.path().join(label)).unwrap();
            fs::write(dir.path().join(label).join(file), b"").unwrap();
        }
        // 顶层文件不属于任何标签
        fs::write(dir.path().join("stray.npy"), b"").unwrap();

        let images = scan_labeled_dir(dir.path(), "npy").unwrap();
        let keys = images.iter().map(|i| i.key.as_str()).collect::<Vec<_>>();
        assert_eq!(keys, ["cat/1.npy", "cat/2.NPY", "dog/1.npy"]);
        assert!(images.iter().all(|i| i.path.starts_with(dir.path())));
    }

    #[test]
    fn test_keys_with_underscores_do_not_collide() {
        let dir = TempDir::new().unwrap();
        for (label, file) in [("a_b", "c.npy"), ("a", "b_c.npy")] {
            fs::create_dir_all(dir.path().join(label)).unwrap();
            fs::write(dir.path().join(label).join(file), b"").unwrap();
        }

        let images = scan_labeled_dir(dir.path(), "npy").unwrap();
        let keys = images.iter().map(|i| i.key.as_str()).collect::<Vec<_>>();
        assert_eq!(keys, ["a/b_c.npy", "a_b/c.npy"]);
    }

    #[test]
    fn test_scan_missing_dir() {
        let err = scan_labeled_dir("/definitely/not/here", "npy").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
