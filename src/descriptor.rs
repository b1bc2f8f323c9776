use std::path::Path;

use log::debug;
use ndarray::Array2;
use ndarray_npy::{read_npy, write_npy};

use crate::error::{Error, Result};

/// 一张图片的全部局部描述符，按行存储，每行长度为 `dim`
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    dim: usize,
    data: Vec<f32>,
}

impl FeatureSet {
    pub fn new(dim: usize, data: Vec<f32>) -> Result<Self> {
        if dim == 0 {
            return Err(Error::config("描述符维度不能为 0"));
        }
        if data.len() % dim != 0 {
            return Err(Error::config(format!(
                "数据长度 {} 不是描述符维度 {} 的整数倍",
                data.len(),
                dim
            )));
        }
        Ok(Self { dim, data })
    }

    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<Self> {
        let dim = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * dim);
        for row in rows {
            if row.as_ref().len() != dim {
                return Err(Error::config("描述符长度不一致"));
            }
            data.extend_from_slice(row.as_ref());
        }
        Self::new(dim, data)
    }

    pub fn from_array(array: Array2<f32>) -> Result<Self> {
        let dim = array.ncols();
        Self::new(dim, array.iter().copied().collect())
    }

    pub fn to_array(&self) -> Result<Array2<f32>> {
        Ok(Array2::from_shape_vec((self.len(), self.dim), self.data.clone())?)
    }

    /// 描述符数量
    pub fn len(&self) -> usize {
        self.data.len() / self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    pub fn rows(&self) -> std::slice::ChunksExact<'_, f32> {
        self.data.chunks_exact(self.dim)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// 追加另一组描述符，维度必须一致
    pub fn extend(&mut self, other: &FeatureSet) -> Result<()> {
        if other.dim != self.dim {
            return Err(Error::config(format!(
                "描述符维度不一致: {} != {}",
                other.dim, self.dim
            )));
        }
        self.data.extend_from_slice(&other.data);
        Ok(())
    }

    pub fn write_npy(&self, path: impl AsRef<Path>) -> Result<()> {
        write_npy(path, &self.to_array()?)?;
        Ok(())
    }
}

/// 描述符来源：图片 -> 描述符序列
pub trait FeatureExtractor: Sync {
    /// 读取或计算一张图片的描述符，失败时必须返回 [`Error::Input`]
    fn extract(&self, path: &Path) -> Result<FeatureSet>;
}

/// 从外部检测器生成的 `.npy` 矩阵中读取描述符
///
/// 支持 `f32` 矩阵，以及二进制描述符常用的 `u8` 矩阵（按数值转换为 `f32`）
#[derive(Debug, Clone, Copy, Default)]
pub struct NpyExtractor;

impl NpyExtractor {
    fn read(path: &Path) -> Result<Array2<f32>> {
        match read_npy::<_, Array2<f32>>(path) {
            Ok(array) => Ok(array),
            Err(ndarray_npy::ReadNpyError::WrongDescriptor(_)) => {
                let array: Array2<u8> = read_npy(path)?;
                Ok(array.mapv(f32::from))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl FeatureExtractor for NpyExtractor {
    fn extract(&self, path: &Path) -> Result<FeatureSet> {
        let array = Self::read(path).map_err(|e| Error::input(path, e))?;
        if array.nrows() == 0 {
            return Err(Error::input(path, "没有检测到任何描述符"));
        }
        let features = FeatureSet::from_array(array).map_err(|e| Error::input(path, e))?;
        debug!("{}: {} 个描述符", path.display(), features.len());
        Ok(features)
    }
}
