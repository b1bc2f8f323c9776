use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// 单张图片的输入错误，只影响这一张图片
    #[error("无法读取 {}: {reason}", .path.display())]
    Input { path: PathBuf, reason: String },

    /// 查询描述符与模型的维度不一致，同样只影响这一张图片
    #[error("描述符维度不一致: 期望 {expected}，实际 {actual}")]
    Dimension { expected: usize, actual: usize },

    /// 配置错误，出现时任务不应开始
    #[error("配置错误: {0}")]
    Configuration(String),

    /// 同一个 key 被记录了两次
    #[error("重复的结果 key: {0}")]
    DuplicateKey(String),

    /// 在错误的状态下调用了报告的方法
    #[error("非法状态: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Bincode(#[from] bincode::Error),

    #[error(transparent)]
    ReadNpy(#[from] ndarray_npy::ReadNpyError),

    #[error(transparent)]
    WriteNpy(#[from] ndarray_npy::WriteNpyError),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

impl Error {
    pub fn input(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Input { path: path.into(), reason: reason.to_string() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// 是否为可以隔离的单图错误
    pub fn is_input(&self) -> bool {
        matches!(self, Self::Input { .. } | Self::Dimension { .. })
    }
}
