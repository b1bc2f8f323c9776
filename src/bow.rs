use std::path::Path;

use log::info;
use ndarray::Array2;
use ndarray_npy::read_npy;
use rayon::prelude::*;

use crate::descriptor::FeatureSet;
use crate::error::{Error, Result};
use crate::index::l2_squared;

/// 视觉词典：K 个聚类中心
#[derive(Debug, Clone, PartialEq)]
pub struct Vocabulary {
    centers: FeatureSet,
}

impl Vocabulary {
    pub fn new(centers: FeatureSet) -> Self {
        Self { centers }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let array: Array2<f32> = read_npy(path)?;
        let centers = FeatureSet::from_array(array)?;
        if centers.is_empty() {
            return Err(Error::config(format!("视觉词典为空: {}", path.display())));
        }
        info!("已加载视觉词典，大小 = {}，维度 = {}", centers.len(), centers.dim());
        Ok(Self { centers })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.centers.write_npy(path)
    }

    /// 词典大小，即词袋向量的长度
    pub fn size(&self) -> usize {
        self.centers.len()
    }

    pub fn dim(&self) -> usize {
        self.centers.dim()
    }

    pub fn centers(&self) -> &FeatureSet {
        &self.centers
    }

    /// 离描述符最近的聚类中心，距离相同时取序号较小的
    pub fn nearest(&self, descriptor: &[f32]) -> usize {
        let mut best = (0, f32::MAX);
        for (i, center) in self.centers.rows().enumerate() {
            let d = l2_squared(descriptor, center);
            if d < best.1 {
                best = (i, d);
            }
        }
        best.0
    }

    /// 将描述符转换为归一化的词袋向量，各分量之和为 1
    pub fn encode(&self, features: &FeatureSet) -> Result<Vec<f32>> {
        if features.dim() != self.dim() {
            return Err(Error::Dimension { expected: self.dim(), actual: features.dim() });
        }
        let mut hist = vec![0.0f32; self.size()];
        if features.is_empty() {
            return Ok(hist);
        }
        let words = features
            .as_slice()
            .par_chunks_exact(features.dim())
            .map(|d| self.nearest(d))
            .collect::<Vec<_>>();
        for w in words {
            hist[w] += 1.0;
        }
        let n = features.len() as f32;
        hist.iter_mut().for_each(|h| *h /= n);
        Ok(hist)
    }
}
