//! 指令提交：调用一次后端 submit，把原始响应分类为即时失败 / 即时成功 / 延迟处理
//!
//! 分类顺序：
//! 1. 传输错误 → 即时失败（通用提示）；非 2xx 且带响应体 → 即时失败（带后端错误与字段详情）
//! 2. 失败状态或显式错误信息 → 即时失败
//! 3. 处理中状态且带任务 ID → 延迟
//! 4. 成功状态，或带可用结果（file_url / result_data）→ 即时成功
//! 5. 其余形状：宽松模式视为即时成功，严格模式视为失败

use std::sync::Arc;

use crate::api::{status_kind, ApiError, CommandApi, StatusKind, SubmitResponse};
use crate::core::{CommandError, FieldErrors, JobId, ReportResult};

pub const SUBMIT_UNREACHABLE_MESSAGE: &str =
    "Could not reach the command service. Please try again.";
pub const UNRECOGNIZED_RESPONSE_MESSAGE: &str =
    "The command service returned an unrecognized response.";
const DEFAULT_FAILURE_MESSAGE: &str = "The command could not be processed.";

/// 一次提交的分类结果
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    ImmediateFailure {
        message: String,
        field_errors: Option<FieldErrors>,
    },
    ImmediateSuccess(ReportResult),
    Deferred {
        job_id: JobId,
        message: Option<String>,
    },
}

/// 无法识别的响应形状如何处理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    /// 视为成功，避免用户卡在处理中
    #[default]
    Permissive,
    Strict,
}

pub struct CommandSubmitter {
    api: Arc<dyn CommandApi>,
    fallback: FallbackPolicy,
}

impl CommandSubmitter {
    pub fn new(api: Arc<dyn CommandApi>) -> Self {
        Self {
            api,
            fallback: FallbackPolicy::default(),
        }
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    /// 提交指令；空白输入直接拒绝，不访问后端
    pub async fn submit(&self, text: &str) -> Result<SubmissionOutcome, CommandError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CommandError::InvalidInput);
        }

        let outcome = match self.api.submit(text).await {
            Ok(resp) => self.classify(resp),
            Err(ApiError::Http {
                status,
                body: Some(body),
            }) => {
                tracing::warn!("Command submission rejected with HTTP {}", status);
                SubmissionOutcome::ImmediateFailure {
                    message: failure_message(&body)
                        .unwrap_or_else(|| format!("Request failed with status {status}")),
                    field_errors: body.details,
                }
            }
            Err(e) => {
                tracing::warn!("Command submission failed: {}", e);
                SubmissionOutcome::ImmediateFailure {
                    message: SUBMIT_UNREACHABLE_MESSAGE.to_string(),
                    field_errors: None,
                }
            }
        };
        Ok(outcome)
    }

    /// 将 2xx 响应分类
    pub fn classify(&self, resp: SubmitResponse) -> SubmissionOutcome {
        let kind = status_kind(resp.status.as_deref());

        if kind == StatusKind::Failure || resp.explicit_error().is_some() {
            return SubmissionOutcome::ImmediateFailure {
                message: failure_message(&resp)
                    .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
                field_errors: resp.details,
            };
        }

        if kind == StatusKind::Processing {
            if let Some(job_id) = resp.job_id() {
                return SubmissionOutcome::Deferred {
                    job_id,
                    message: resp.message,
                };
            }
        }

        let has_payload = resp.file_url.is_some() || resp.result_data.is_some();
        if kind == StatusKind::Success || has_payload {
            return SubmissionOutcome::ImmediateSuccess(success_result(resp));
        }

        match self.fallback {
            FallbackPolicy::Permissive => {
                tracing::warn!(
                    "Unrecognized submit response (status {:?}), treating as success",
                    resp.status
                );
                SubmissionOutcome::ImmediateSuccess(success_result(resp))
            }
            FallbackPolicy::Strict => {
                tracing::warn!("Unrecognized submit response (status {:?})", resp.status);
                SubmissionOutcome::ImmediateFailure {
                    message: UNRECOGNIZED_RESPONSE_MESSAGE.to_string(),
                    field_errors: None,
                }
            }
        }
    }
}

fn failure_message(resp: &SubmitResponse) -> Option<String> {
    resp.explicit_error()
        .or(resp.message.as_deref())
        .map(str::to_string)
}

fn success_result(resp: SubmitResponse) -> ReportResult {
    ReportResult::executed(resp.job_id(), resp.file_url).with_result_data(resp.result_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SimulatedCommandApi;
    use serde_json::json;

    fn submitter(api: &Arc<SimulatedCommandApi>) -> CommandSubmitter {
        CommandSubmitter::new(api.clone())
    }

    fn parse(value: serde_json::Value) -> SubmitResponse {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_blank_input_never_reaches_backend() {
        let api = Arc::new(SimulatedCommandApi::new());
        let s = submitter(&api);
        assert_eq!(s.submit("").await, Err(CommandError::InvalidInput));
        assert_eq!(s.submit("   \t").await, Err(CommandError::InvalidInput));
        assert_eq!(api.submit_calls(), 0);
    }

    #[tokio::test]
    async fn test_executed_is_immediate_success() {
        let api = Arc::new(SimulatedCommandApi::new());
        api.reply_submit(parse(json!({"status": "EXECUTED", "file_url": "https://x/a.pdf"})));

        let outcome = submitter(&api).submit("  generate sales report ").await.unwrap();
        match outcome {
            SubmissionOutcome::ImmediateSuccess(result) => {
                assert_eq!(result.file_url.as_deref(), Some("https://x/a.pdf"));
            }
            other => panic!("Expected ImmediateSuccess, got {:?}", other),
        }
        // 提交前去掉首尾空白
        assert_eq!(api.submitted(), vec!["generate sales report".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_carries_details() {
        let api = Arc::new(SimulatedCommandApi::new());
        api.reply_submit(parse(json!({
            "status": "FAILED",
            "error": "Invalid params",
            "details": {"name": ["required"]}
        })));

        let outcome = submitter(&api).submit("bad command").await.unwrap();
        let mut details = FieldErrors::new();
        details.insert("name".to_string(), vec!["required".to_string()]);
        assert_eq!(
            outcome,
            SubmissionOutcome::ImmediateFailure {
                message: "Invalid params".to_string(),
                field_errors: Some(details),
            }
        );
    }

    #[test]
    fn test_error_message_wins_over_success_status() {
        let s = CommandSubmitter::new(Arc::new(SimulatedCommandApi::new()));
        let outcome = s.classify(parse(json!({
            "status": "EXECUTED",
            "error_message": "quota exceeded"
        })));
        assert!(matches!(
            outcome,
            SubmissionOutcome::ImmediateFailure { ref message, .. } if message == "quota exceeded"
        ));
    }

    #[test]
    fn test_blank_error_message_does_not_hide_error() {
        let s = CommandSubmitter::new(Arc::new(SimulatedCommandApi::new()));
        let outcome = s.classify(parse(json!({
            "status": "EXECUTED",
            "error_message": "",
            "error": "quota exceeded"
        })));
        assert_eq!(
            outcome,
            SubmissionOutcome::ImmediateFailure {
                message: "quota exceeded".to_string(),
                field_errors: None,
            }
        );
    }

    #[test]
    fn test_processing_with_id_is_deferred() {
        let s = CommandSubmitter::new(Arc::new(SimulatedCommandApi::new()));
        let outcome = s.classify(parse(json!({
            "status": "PROCESSING",
            "command_id": 17,
            "message": "Generating report"
        })));
        assert_eq!(
            outcome,
            SubmissionOutcome::Deferred {
                job_id: JobId::from("17"),
                message: Some("Generating report".to_string()),
            }
        );
    }

    #[test]
    fn test_payload_without_status_is_success() {
        let s = CommandSubmitter::new(Arc::new(SimulatedCommandApi::new()));
        let outcome = s.classify(parse(json!({"result_data": {"rows": 3}})));
        match outcome {
            SubmissionOutcome::ImmediateSuccess(result) => {
                assert_eq!(result.result_data, Some(json!({"rows": 3})));
            }
            other => panic!("Expected ImmediateSuccess, got {:?}", other),
        }
    }

    #[test]
    fn test_unrecognized_shape_permissive_vs_strict() {
        // 处理中但缺少任务 ID：无法轮询
        let resp = parse(json!({"status": "PROCESSING"}));

        let permissive = CommandSubmitter::new(Arc::new(SimulatedCommandApi::new()));
        assert!(matches!(
            permissive.classify(resp.clone()),
            SubmissionOutcome::ImmediateSuccess(_)
        ));

        let strict = CommandSubmitter::new(Arc::new(SimulatedCommandApi::new()))
            .with_fallback(FallbackPolicy::Strict);
        assert_eq!(
            strict.classify(resp),
            SubmissionOutcome::ImmediateFailure {
                message: UNRECOGNIZED_RESPONSE_MESSAGE.to_string(),
                field_errors: None,
            }
        );
    }

    #[tokio::test]
    async fn test_transport_error_is_generic_failure() {
        let api = Arc::new(SimulatedCommandApi::new());
        api.push_submit(crate::api::Scripted::Fail(ApiError::Transport(
            "connection refused".into(),
        )));

        let outcome = submitter(&api).submit("report").await.unwrap();
        assert_eq!(
            outcome,
            SubmissionOutcome::ImmediateFailure {
                message: SUBMIT_UNREACHABLE_MESSAGE.to_string(),
                field_errors: None,
            }
        );
        assert_eq!(api.submit_calls(), 1);
    }

    #[tokio::test]
    async fn test_http_rejection_uses_body() {
        let api = Arc::new(SimulatedCommandApi::new());
        api.push_submit(crate::api::Scripted::Fail(ApiError::Http {
            status: 422,
            body: Some(parse(json!({"message": "Unknown report type"}))),
        }));

        let outcome = submitter(&api).submit("report").await.unwrap();
        match outcome {
            SubmissionOutcome::ImmediateFailure { message, .. } => {
                assert_eq!(message, "Unknown report type");
            }
            other => panic!("Expected ImmediateFailure, got {:?}", other),
        }
    }
}
