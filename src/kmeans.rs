use log::{debug, info};
use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;

use crate::descriptor::FeatureSet;
use crate::error::{Error, Result};
use crate::index::l2_squared;

fn imbalance_factor(hist: &[usize]) -> f32 {
    let (mut tot, mut uf) = (0.0, 0.0);
    for h in hist {
        let h = *h as f32;
        tot += h;
        uf += h.powf(2.0);
    }
    if tot == 0.0 {
        return 0.0;
    }
    uf * hist.len() as f32 / tot.powf(2.0)
}

#[derive(Debug, Clone)]
pub struct KMeansState {
    /// 所有向量到其聚类中心的距离平方和
    pub distsum: f32,
    /// 聚类中心
    pub centroids: FeatureSet,
    /// 每个聚类中心包含的向量数量
    pub centroid_frequency: Vec<usize>,
}

impl KMeansState {
    pub fn imbalance_factor(&self) -> f32 {
        imbalance_factor(&self.centroid_frequency)
    }
}

/// K-means 聚类，使用 k-means++ 初始化
///
/// 参数：
/// - data: 输入向量
/// - k: 聚类中心数量
/// - max_iter: 最大迭代次数
/// - seed: 随机种子，相同的输入和种子得到相同的结果
pub fn kmeans(data: &FeatureSet, k: usize, max_iter: usize, seed: u64) -> Result<KMeansState> {
    let n = data.len();
    if k == 0 || k > n {
        return Err(Error::config(format!("聚类中心数量 {} 必须在 1 到向量数量 {} 之间", k, n)));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut centroids = init_plusplus(data, k, &mut rng);
    info!("KMeans 初始化完成，{} 组向量，中心点数量 = {}", n, k);

    let (mut assignments, mut distances) = update_assignments(data, &centroids);
    let mut centroid_frequency = vec![0; k];

    for nr in 0..max_iter {
        let (new_centroids, frequency) = update_centroids(data, &assignments, &distances, k);
        centroids = new_centroids;
        centroid_frequency = frequency;

        let distsum_before: f32 = distances.iter().sum();
        let (new_assignments, new_distances) = update_assignments(data, &centroids);
        let changed = new_assignments.iter().zip(&assignments).filter(|(a, b)| a != b).count();
        assignments = new_assignments;
        distances = new_distances;

        debug!(
            "第 {} 轮 - 不平衡度：{:.2} | 距离和变化：{:+.2} | 重新分配：{}",
            nr + 1,
            imbalance_factor(&centroid_frequency),
            distances.iter().sum::<f32>() - distsum_before,
            changed
        );
        // 没有向量改变归属，则算法收敛
        if changed == 0 {
            break;
        }
    }

    let state = KMeansState {
        distsum: distances.iter().sum(),
        centroids: FeatureSet::new(data.dim(), centroids)?,
        centroid_frequency,
    };
    info!("聚类完成，总距离：{:.2}，不平衡度：{:.2}", state.distsum, state.imbalance_factor());
    Ok(state)
}

/// k-means++：按到已选中心的距离平方加权随机选取下一个中心
fn init_plusplus(data: &FeatureSet, k: usize, rng: &mut StdRng) -> Vec<f32> {
    let n = data.len();
    let mut centroids = Vec::with_capacity(k * data.dim());
    centroids.extend_from_slice(data.row(rng.random_range(0..n)));

    let mut min_dist = data.rows().map(|row| l2_squared(row, &centroids)).collect::<Vec<_>>();
    for _ in 1..k {
        let total: f32 = min_dist.iter().sum();
        let next = if total > 0.0 {
            let target = rng.random::<f32>() * total;
            let mut acc = 0.0;
            min_dist
                .iter()
                .position(|&d| {
                    acc += d;
                    acc >= target && d > 0.0
                })
                .unwrap_or_else(|| farthest(&min_dist))
        } else {
            // 剩余向量与已有中心完全重合
            rng.random_range(0..n)
        };

        let start = centroids.len();
        centroids.extend_from_slice(data.row(next));
        let centroid = &centroids[start..];
        min_dist
            .par_iter_mut()
            .zip(data.as_slice().par_chunks_exact(data.dim()))
            .for_each(|(d, row)| *d = d.min(l2_squared(row, centroid)));
    }
    centroids
}

fn farthest(distances: &[f32]) -> usize {
    distances
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// 将每个点分配给最近的聚类中心，返回聚类中心的序号和距离平方
fn update_assignments(data: &FeatureSet, centroids: &[f32]) -> (Vec<usize>, Vec<f32>) {
    data.as_slice()
        .par_chunks_exact(data.dim())
        .map(|point| {
            let mut min_distance = f32::MAX;
            let mut best_cluster = 0;
            for (j, centroid) in centroids.chunks_exact(data.dim()).enumerate() {
                let distance = l2_squared(point, centroid);
                if distance < min_distance {
                    min_distance = distance;
                    best_cluster = j;
                }
            }
            (best_cluster, min_distance)
        })
        .unzip()
}

/// 以每个聚类的均值作为新中心，空聚类用离其中心最远的点重新初始化
fn update_centroids(
    data: &FeatureSet,
    assignments: &[usize],
    distances: &[f32],
    k: usize,
) -> (Vec<f32>, Vec<usize>) {
    let dim = data.dim();
    let mut sums = vec![0.0f32; k * dim];
    let mut frequency = vec![0usize; k];
    for (point, &cluster) in data.rows().zip(assignments) {
        frequency[cluster] += 1;
        for (s, x) in sums[cluster * dim..(cluster + 1) * dim].iter_mut().zip(point) {
            *s += x;
        }
    }

    let mut distances = distances.to_vec();
    for cluster in 0..k {
        let centroid = &mut sums[cluster * dim..(cluster + 1) * dim];
        if frequency[cluster] == 0 {
            let i = farthest(&distances);
            centroid.copy_from_slice(data.row(i));
            distances[i] = 0.0;
        } else {
            let count = frequency[cluster] as f32;
            centroid.iter_mut().for_each(|s| *s /= count);
        }
    }
    (sums, frequency)
}
