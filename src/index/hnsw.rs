use std::time::Instant;

use hnsw_rs::prelude::*;
use log::info;
use rayon::prelude::*;

use super::exact::l2_squared;
use super::{Neighbor, NeighborIndex, NeighborMatch, ReferenceSet};
use crate::descriptor::FeatureSet;

struct DistEuclidean;

impl Distance<f32> for DistEuclidean {
    fn eval(&self, va: &[f32], vb: &[f32]) -> f32 {
        l2_squared(va, vb).sqrt()
    }
}

/// 基于 HNSW 的近似近邻索引
///
/// 图结构不落盘，每次加载参考集合时重新构建
pub struct HnswIndex {
    references: ReferenceSet,
    hnsw: Hnsw<'static, f32, DistEuclidean>,
    ef_search: usize,
}

impl HnswIndex {
    pub fn build(references: ReferenceSet, ef_search: usize) -> Self {
        let start = Instant::now();
        let total = references.total_descriptors();
        let hnsw = Hnsw::<f32, _>::new(32, total.max(1), 16, 200, DistEuclidean);
        if total > 0 {
            references
                .descriptors()
                .par_chunks_exact(references.dim())
                .enumerate()
                .for_each(|(i, row)| hnsw.insert((row, i)));
        }
        info!("HNSW 索引构建完成：{} 个描述符，耗时 {:.2}s", total, start.elapsed().as_secs_f32());
        Self { references, hnsw, ef_search: ef_search.max(2) }
    }
}

impl NeighborIndex for HnswIndex {
    fn references(&self) -> &ReferenceSet {
        &self.references
    }

    fn knn2(&self, features: &FeatureSet) -> Vec<NeighborMatch> {
        let refs = &self.references;
        let searchable = refs.total_descriptors() > 0 && refs.dim() == features.dim();
        features
            .as_slice()
            .par_chunks_exact(features.dim())
            .enumerate()
            .map(|(query, xq)| {
                if !searchable {
                    return NeighborMatch { query, nearest: None, second: None };
                }
                let mut found = self.hnsw.search(xq, 2, self.ef_search);
                found.sort_by(|a, b| a.distance.total_cmp(&b.distance));
                let mut found = found
                    .into_iter()
                    .map(|n| Neighbor { reference: refs.owner(n.d_id), distance: n.distance });
                NeighborMatch { query, nearest: found.next(), second: found.next() }
            })
            .collect()
    }
}
