//! 指令 API 抽象
//!
//! 所有后端（HTTP / 模拟）实现 CommandApi：submit（提交指令）、job_status（查询任务状态）。
//! 两者都是一次性远程调用，不在此层重试。

use async_trait::async_trait;
use thiserror::Error;

use crate::api::{StatusResponse, SubmitResponse};
use crate::core::JobId;

/// 远程调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// 连接失败、超时等
    #[error("Transport error: {0}")]
    Transport(String),

    /// 非 2xx 响应；body 为能解析出的响应体
    #[error("HTTP {status}")]
    Http {
        status: u16,
        body: Option<SubmitResponse>,
    },

    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

/// 后端指令 API
#[async_trait]
pub trait CommandApi: Send + Sync {
    async fn submit(&self, text: &str) -> Result<SubmitResponse, ApiError>;

    async fn job_status(&self, job_id: &JobId) -> Result<StatusResponse, ApiError>;
}
