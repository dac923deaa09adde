//! 指令错误类型与归一化错误记录
//!
//! 各阶段（输入校验、语音采集、提交、轮询）的失败都归入 CommandError；
//! 编排器统一通过 to_record() 转为 { message, field_errors } 供 UI 渲染。

use serde::Serialize;
use thiserror::Error;

use crate::core::state::{FieldErrors, JobId};
use crate::speech::CaptureErrorCode;

pub const INVALID_INPUT_MESSAGE: &str = "Please enter a command.";
pub const TIMEOUT_MESSAGE: &str =
    "The server is taking too long to generate the report. Please try again later.";
pub const STATUS_UNAVAILABLE_MESSAGE: &str = "Could not check the report status. Please try again.";

/// 语音指令全流程可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    /// 空白指令，未发起任何网络请求
    #[error("Please enter a command.")]
    InvalidInput,

    #[error("{}", .0.user_message())]
    Capture(CaptureErrorCode),

    /// 后端拒绝或处理指令失败，可能带字段级校验信息
    #[error("{message}")]
    SubmissionFailure {
        message: String,
        field_errors: Option<FieldErrors>,
    },

    /// 次数或总时长预算耗尽时任务仍在处理中
    #[error("The server is taking too long to generate the report. Please try again later.")]
    PollingTimeout { job_id: JobId },

    /// 状态查询本身失败（网络 / 服务端错误），与任务结果无关
    #[error("Could not check the report status. Please try again.")]
    PollingTransport { job_id: JobId, reason: String },

    /// 后端已受理任务，随后报告任务失败
    #[error("{message}")]
    JobFailure {
        job_id: JobId,
        message: String,
        field_errors: Option<FieldErrors>,
    },

    /// 编排器后台任务已退出
    #[error("Voice command orchestrator is no longer running")]
    Closed,
}

impl CommandError {
    /// 关联的任务 ID（仅轮询阶段的错误携带）
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            CommandError::PollingTimeout { job_id }
            | CommandError::PollingTransport { job_id, .. }
            | CommandError::JobFailure { job_id, .. } => Some(job_id),
            _ => None,
        }
    }

    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            CommandError::SubmissionFailure { field_errors, .. }
            | CommandError::JobFailure { field_errors, .. } => field_errors.as_ref(),
            _ => None,
        }
    }

    /// 归一化为 UI 可直接渲染的错误记录
    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord {
            message: self.to_string(),
            field_errors: self.field_errors().cloned(),
        }
    }
}

/// 与产生阶段无关的统一错误形态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub field_errors: Option<FieldErrors>,
}
