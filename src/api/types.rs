//! 后端指令 API 的线上数据格式
//!
//! 字段全部可选：不同版本后端返回的形状并不统一（id / command_id、error / error_message 并存），
//! 由 Submitter / Poller 负责分类。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{FieldErrors, JobId};

/// POST 提交指令的请求体
#[derive(Debug, Clone, Serialize)]
pub struct SubmitRequest<'a> {
    pub text: &'a str,
}

/// 提交指令的响应
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub status: Option<String>,
    /// 任务 ID，后端可能返回字符串或数字
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub command_id: Option<Value>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub result_data: Option<Value>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<FieldErrors>,
}

impl SubmitResponse {
    pub fn with_status(status: &str) -> Self {
        Self {
            status: Some(status.to_string()),
            ..Self::default()
        }
    }

    /// 优先 id，其次 command_id
    pub fn job_id(&self) -> Option<JobId> {
        self.id
            .as_ref()
            .and_then(job_id_from_value)
            .or_else(|| self.command_id.as_ref().and_then(job_id_from_value))
    }

    /// 显式错误信息：非空的 error_message 优先于 error
    pub fn explicit_error(&self) -> Option<&str> {
        first_nonblank(&self.error_message, &self.error)
    }
}

/// GET 任务状态的响应
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub result_data: Option<Value>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<FieldErrors>,
}

impl StatusResponse {
    pub fn processing() -> Self {
        Self {
            status: Some("PROCESSING".to_string()),
            ..Self::default()
        }
    }

    pub fn executed(file_url: &str) -> Self {
        Self {
            status: Some("EXECUTED".to_string()),
            file_url: Some(file_url.to_string()),
            ..Self::default()
        }
    }

    pub fn failed(message: &str) -> Self {
        Self {
            status: Some("FAILED".to_string()),
            error_message: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn explicit_error(&self) -> Option<&str> {
        first_nonblank(&self.error_message, &self.error)
    }
}

fn nonblank(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|m| !m.trim().is_empty())
}

fn first_nonblank<'a>(
    primary: &'a Option<String>,
    fallback: &'a Option<String>,
) -> Option<&'a str> {
    nonblank(primary).or_else(|| nonblank(fallback))
}

fn job_id_from_value(value: &Value) -> Option<JobId> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(JobId::new(s.trim())),
        Value::Number(n) => Some(JobId::new(n.to_string())),
        _ => None,
    }
}

/// 后端状态字符串的分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Success,
    Failure,
    Processing,
    Unknown,
}

/// 不区分大小写地识别状态字符串
pub fn status_kind(status: Option<&str>) -> StatusKind {
    let Some(status) = status else {
        return StatusKind::Unknown;
    };
    match status.trim().to_ascii_uppercase().as_str() {
        "EXECUTED" | "COMPLETED" | "SUCCESS" | "DONE" => StatusKind::Success,
        "FAILED" | "ERROR" => StatusKind::Failure,
        "PROCESSING" | "PENDING" | "QUEUED" | "RUNNING" => StatusKind::Processing,
        _ => StatusKind::Unknown,
    }
}
