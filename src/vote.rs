use crate::index::NeighborMatch;

/// 每张参考图片获得的好匹配数量，下标即参考图片 ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteTally {
    votes: Vec<u32>,
}

impl VoteTally {
    pub fn new(n_references: usize) -> Self {
        Self { votes: vec![0; n_references] }
    }

    /// 按参考图片 ID 顺序遍历 (ID, 票数)
    pub fn iter(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.votes.iter().copied().enumerate()
    }

    pub fn total(&self) -> u32 {
        self.votes.iter().sum()
    }

    /// 参考图片数量
    pub fn n_references(&self) -> usize {
        self.votes.len()
    }

    pub fn has_no_votes(&self) -> bool {
        self.votes.iter().all(|&v| v == 0)
    }
}

impl FromIterator<u32> for VoteTally {
    fn from_iter<T: IntoIterator<Item = u32>>(iter: T) -> Self {
        Self { votes: iter.into_iter().collect() }
    }
}

/// 比值测试：最近邻距离必须明显小于次近邻距离才算好匹配
#[inline]
pub fn is_good_match(m: &NeighborMatch, ratio: f32) -> bool {
    match (&m.nearest, &m.second) {
        (Some(a), Some(b)) => a.distance < ratio * b.distance,
        _ => false,
    }
}

/// 统计查询图片的好匹配，每个好匹配给其最近邻所属的参考图片投一票
pub fn aggregate_votes(matches: &[NeighborMatch], n_references: usize, ratio: f32) -> VoteTally {
    let mut tally = VoteTally::new(n_references);
    for m in matches.iter().filter(|m| is_good_match(m, ratio)) {
        if let Some(v) = m.nearest.and_then(|n| tally.votes.get_mut(n.reference)) {
            *v += 1;
        }
    }
    tally
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::index::Neighbor;

    fn m(first: Option<(usize, f32)>, second: Option<(usize, f32)>) -> NeighborMatch {
        let n = |(reference, distance)| Neighbor { reference, distance };
        NeighborMatch { query: 0, nearest: first.map(n), second: second.map(n) }
    }

    #[rstest]
    #[case::clear_winner(1.0, 2.0, true)]
    #[case::ambiguous(1.0, 1.2, false)]
    #[case::exactly_at_ratio(0.8, 1.0, false)]
    #[case::both_zero(0.0, 0.0, false)]
    #[case::zero_vs_positive(0.0, 0.1, true)]
    fn test_ratio_test(#[case] d1: f32, #[case] d2: f32, #[case] good: bool) {
        assert_eq!(is_good_match(&m(Some((0, d1)), Some((1, d2))), 0.8), good);
    }

    #[test]
    fn test_missing_second_neighbor_is_rejected() {
        assert!(!is_good_match(&m(Some((0, 0.1)), None), 0.8));
        assert!(!is_good_match(&m(None, None), 0.8));
    }

    #[test]
    fn test_aggregate_votes() {
        let matches = vec![
            m(Some((0, 1.0)), Some((1, 5.0))),
            m(Some((0, 1.0)), Some((0, 5.0))),
            m(Some((2, 1.0)), Some((1, 1.1))),
            m(Some((1, 0.5)), Some((2, 3.0))),
            m(Some((1, 0.5)), None),
        ];
        let tally = aggregate_votes(&matches, 3, 0.8);
        assert_eq!(tally.iter().collect::<Vec<_>>(), [(0, 2), (1, 1), (2, 0)]);
        assert_eq!(tally.total(), 3);
    }

    #[test]
    fn test_aggregate_empty() {
        let tally = aggregate_votes(&[], 4, 0.8);
        assert_eq!(tally.n_references(), 4);
        assert!(tally.has_no_votes());
        assert_eq!(tally.total(), 0);
    }

    #[test]
    fn test_out_of_range_reference_is_ignored() {
        let tally = aggregate_votes(&[m(Some((9, 0.1)), Some((0, 1.0)))], 2, 0.8);
        assert_eq!(tally.n_references(), 2);
        assert!(tally.has_no_votes());
    }
}
