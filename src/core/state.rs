//! 状态定义：CommandState、任务与报表结果、对外快照
//!
//! 编排器内部持有唯一权威的 CommandSnapshot，每次状态转换后整体发布给观察者（watch 通道），
//! 观察者看到的永远是最近一次完整转换后的状态。

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// 字段级校验错误：字段名 -> 错误信息列表
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// 后端任务 ID
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 指令生命周期阶段
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    #[default]
    Idle,
    Listening,
    Processing,
    /// 即时成功后的展示过渡
    Generating,
    Success,
    Error,
}

impl CommandState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CommandState::Success | CommandState::Error)
    }
}

/// 一次指令提交；收到延迟结果时补上后端任务 ID
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CommandJob {
    /// 本地关联 ID（日志用）
    pub local_id: String,
    pub id: Option<JobId>,
    pub submitted_text: String,
    pub created_at: DateTime<Utc>,
}

impl CommandJob {
    pub fn new(submitted_text: impl Into<String>) -> Self {
        Self {
            local_id: format!("cmd_{}", uuid::Uuid::new_v4()),
            id: None,
            submitted_text: submitted_text.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Executed,
    Failed,
    Processing,
}

/// 交给 UI 的报表结果，对某次状态转换而言不可变
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReportResult {
    pub job_id: Option<JobId>,
    pub status: ReportStatus,
    pub file_url: Option<String>,
    pub error_message: Option<String>,
    pub field_errors: Option<FieldErrors>,
    /// 后端返回的原始结果数据（如有）
    pub result_data: Option<serde_json::Value>,
}

impl ReportResult {
    pub fn executed(job_id: Option<JobId>, file_url: Option<String>) -> Self {
        Self {
            job_id,
            status: ReportStatus::Executed,
            file_url,
            error_message: None,
            field_errors: None,
            result_data: None,
        }
    }

    /// 失败时合成的结果，便于 UI 与其他报表元数据一起展示失败详情
    pub fn failed(
        job_id: Option<JobId>,
        message: impl Into<String>,
        field_errors: Option<FieldErrors>,
    ) -> Self {
        Self {
            job_id,
            status: ReportStatus::Failed,
            file_url: None,
            error_message: Some(message.into()),
            field_errors,
            result_data: None,
        }
    }

    pub fn with_result_data(mut self, data: Option<serde_json::Value>) -> Self {
        self.result_data = data;
        self
    }
}

/// 观察者看到的只读状态
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CommandSnapshot {
    pub state: CommandState,
    pub transcribed_text: String,
    pub result: Option<ReportResult>,
    pub error: Option<String>,
    pub error_details: Option<FieldErrors>,
    pub is_capturing: bool,
    pub is_polling: bool,
    pub polling_attempts: u32,
    /// 延迟任务的进度提示
    pub progress_message: Option<String>,
    pub job: Option<CommandJob>,
}
