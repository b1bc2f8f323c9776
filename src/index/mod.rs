mod exact;
mod hnsw;

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

pub use exact::{ExactIndex, l2_squared, top2_l2};
pub use hnsw::HnswIndex;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::descriptor::FeatureSet;
use crate::error::{Error, Result};
use crate::report::UNKNOWN_LABEL;

/// 某个查询描述符的一个近邻，`reference` 为参考图片的 ID
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub reference: usize,
    pub distance: f32,
}

/// 一个查询描述符的前两个近邻
///
/// 参考集合过小时可能不足两个近邻
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborMatch {
    pub query: usize,
    pub nearest: Option<Neighbor>,
    pub second: Option<Neighbor>,
}

/// 一张参考图片
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceItem {
    pub label: String,
    pub name: String,
    pub descriptor_count: usize,
}

/// 所有参考图片的描述符，以及每一行描述符所属的参考图片
///
/// 参考图片的 ID 即为其插入顺序，决策时的平局按该顺序处理
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceSet {
    dim: usize,
    items: Vec<ReferenceItem>,
    descriptors: Vec<f32>,
    owners: Vec<u32>,
}

impl ReferenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加一张参考图片，返回其 ID
    pub fn add(
        &mut self,
        label: impl Into<String>,
        name: impl Into<String>,
        features: &FeatureSet,
    ) -> Result<usize> {
        let label = label.into();
        if label == UNKNOWN_LABEL {
            return Err(Error::config(format!("标签不能为 {}", UNKNOWN_LABEL)));
        }
        if self.dim == 0 {
            self.dim = features.dim();
        } else if self.dim != features.dim() {
            return Err(Error::config(format!(
                "描述符维度不一致: {} != {}",
                features.dim(),
                self.dim
            )));
        }

        let id = self.items.len();
        self.items.push(ReferenceItem {
            label,
            name: name.into(),
            descriptor_count: features.len(),
        });
        self.descriptors.extend_from_slice(features.as_slice());
        self.owners.extend(std::iter::repeat_n(id as u32, features.len()));
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn items(&self) -> &[ReferenceItem] {
        &self.items
    }

    /// 所有不重复的标签，按首次出现的顺序
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = vec![];
        for item in &self.items {
            if !labels.contains(&item.label.as_str()) {
                labels.push(&item.label);
            }
        }
        labels
    }

    /// 按标签拆分为多个参考集合，标签按首次出现的顺序，每个子集合内保持原有顺序
    pub fn split_by_label(&self) -> Result<Vec<(String, ReferenceSet)>> {
        let mut parts: Vec<(String, ReferenceSet)> = vec![];
        let mut offset = 0;
        for item in &self.items {
            let end = offset + item.descriptor_count * self.dim;
            let features = FeatureSet::new(self.dim, self.descriptors[offset..end].to_vec())?;
            offset = end;

            let i = match parts.iter().position(|(label, _)| *label == item.label) {
                Some(i) => i,
                None => {
                    parts.push((item.label.clone(), ReferenceSet::new()));
                    parts.len() - 1
                }
            };
            parts[i].1.add(item.label.as_str(), item.name.as_str(), &features)?;
        }
        Ok(parts)
    }

    /// 描述符总行数
    pub fn total_descriptors(&self) -> usize {
        self.owners.len()
    }

    pub fn descriptors(&self) -> &[f32] {
        &self.descriptors
    }

    /// 第 `row` 行描述符所属的参考图片
    pub fn owner(&self, row: usize) -> usize {
        self.owners[row] as usize
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("读取参考集合: {}", path.display());
        let reader = BufReader::new(File::open(path)?);
        let set: Self = bincode::deserialize_from(reader)?;
        if set.descriptors.len() != set.owners.len() * set.dim {
            return Err(Error::config(format!("参考集合文件已损坏: {}", path.display())));
        }
        info!("已加载 {} 张参考图片，{} 个描述符", set.len(), set.total_descriptors());
        Ok(set)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, self)?;
        Ok(())
    }
}

/// 建立在全部参考描述符之上的近邻索引，构建后只读，可被多个线程同时查询
pub trait NeighborIndex: Sync {
    fn references(&self) -> &ReferenceSet;

    /// 为每个查询描述符搜索最近的两个参考描述符
    fn knn2(&self, features: &FeatureSet) -> Vec<NeighborMatch>;

    fn len(&self) -> usize {
        self.references().len()
    }

    fn is_empty(&self) -> bool {
        self.references().is_empty()
    }

    fn descriptor_count(&self, reference: usize) -> usize {
        self.references().items()[reference].descriptor_count
    }

    fn label(&self, reference: usize) -> &str {
        &self.references().items()[reference].label
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn features(rows: &[[f32; 2]]) -> FeatureSet {
        FeatureSet::from_rows(rows).unwrap()
    }

    #[test]
    fn test_reference_set_owners() {
        let mut set = ReferenceSet::new();
        assert_eq!(set.add("cat", "a", &features(&[[0., 0.], [1., 1.]])).unwrap(), 0);
        assert_eq!(set.add("dog", "b", &features(&[[5., 5.]])).unwrap(), 1);
        assert_eq!(set.add("cat", "c", &features(&[[9., 9.]])).unwrap(), 2);

        assert_eq!(set.total_descriptors(), 4);
        assert_eq!((set.owner(0), set.owner(1), set.owner(2), set.owner(3)), (0, 0, 1, 2));
        assert_eq!(set.labels(), ["cat", "dog"]);
        assert_eq!(set.items()[0].descriptor_count, 2);
    }

    #[test]
    fn test_reference_set_rejects_bad_input() {
        let mut set = ReferenceSet::new();
        set.add("cat", "a", &features(&[[0., 0.]])).unwrap();
        let wide = FeatureSet::from_rows(&[[0f32, 0., 0.]]).unwrap();
        assert!(matches!(set.add("cat", "b", &wide), Err(Error::Configuration(_))));
        assert!(matches!(
            set.add(UNKNOWN_LABEL, "c", &features(&[[0., 0.]])),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_split_by_label() {
        let mut set = ReferenceSet::new();
        set.add("cat", "a", &features(&[[0., 0.], [1., 1.]])).unwrap();
        set.add("dog", "b", &features(&[[5., 5.]])).unwrap();
        set.add("cat", "c", &features(&[[9., 9.]])).unwrap();

        let parts = set.split_by_label().unwrap();
        let labels = parts.iter().map(|(l, _)| l.as_str()).collect::<Vec<_>>();
        assert_eq!(labels, ["cat", "dog"]);

        let cat = &parts[0].1;
        assert_eq!(cat.len(), 2);
        assert_eq!(cat.items()[1].name, "c");
        assert_eq!(cat.descriptors(), [0., 0., 1., 1., 9., 9.]);
        assert_eq!((cat.owner(1), cat.owner(2)), (0, 1));
        assert_eq!(parts[1].1.descriptors(), [5., 5.]);
    }

    #[test]
    fn test_reference_set_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("references.bin");
        let mut set = ReferenceSet::new();
        set.add("cat", "a", &features(&[[0., 0.], [1., 1.]])).unwrap();
        set.add("dog", "b", &features(&[[5., 5.]])).unwrap();
        set.save(&path).unwrap();

        let loaded = ReferenceSet::open(&path).unwrap();
        assert_eq!(loaded.items(), set.items());
        assert_eq!(loaded.descriptors(), set.descriptors());
        assert_eq!(loaded.owner(2), 1);
    }
}
