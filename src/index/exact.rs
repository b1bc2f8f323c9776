use rayon::prelude::*;

use super::{Neighbor, NeighborIndex, NeighborMatch, ReferenceSet};
use crate::descriptor::FeatureSet;

#[inline(always)]
pub fn l2_squared(va: &[f32], vb: &[f32]) -> f32 {
    va.iter().zip(vb).map(|(a, b)| (a - b) * (a - b)).sum()
}

/// 计算向量 va 到 vb 中每一行的欧氏距离，返回距离最小的两个 (行号, 距离)
///
/// 距离相同时保留行号较小的
pub fn top2_l2(va: &[f32], vb: &[f32]) -> [Option<(usize, f32)>; 2] {
    let mut best: [Option<(usize, f32)>; 2] = [None, None];
    for (i, chunk) in vb.chunks_exact(va.len()).enumerate() {
        let d = l2_squared(va, chunk);
        match best {
            [Some((_, d0)), _] if d < d0 => {
                best[1] = best[0];
                best[0] = Some((i, d));
            }
            [None, _] => best[0] = Some((i, d)),
            [_, Some((_, d1))] if d < d1 => best[1] = Some((i, d)),
            [_, None] => best[1] = Some((i, d)),
            _ => {}
        }
    }
    best.map(|b| b.map(|(i, d)| (i, d.sqrt())))
}

/// 暴力搜索，结果确定，适合较小的参考集合
pub struct ExactIndex {
    references: ReferenceSet,
}

impl ExactIndex {
    pub fn new(references: ReferenceSet) -> Self {
        Self { references }
    }
}

impl NeighborIndex for ExactIndex {
    fn references(&self) -> &ReferenceSet {
        &self.references
    }

    fn knn2(&self, features: &FeatureSet) -> Vec<NeighborMatch> {
        let refs = &self.references;
        let searchable = !refs.is_empty() && refs.dim() == features.dim();
        features
            .as_slice()
            .par_chunks_exact(features.dim())
            .enumerate()
            .map(|(query, xq)| {
                let [nearest, second] = if searchable {
                    top2_l2(xq, refs.descriptors())
                } else {
                    [None, None]
                };
                let to_neighbor =
                    |(row, distance): (usize, f32)| Neighbor { reference: refs.owner(row), distance };
                NeighborMatch { query, nearest: nearest.map(to_neighbor), second: second.map(to_neighbor) }
            })
            .collect()
    }
}
