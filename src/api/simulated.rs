//! 模拟指令后端（测试与本地开发，无需真实服务）
//!
//! 按脚本依次返回提交与状态响应；每个任务的最后一条状态响应会一直重复。
//! 开启 auto_jobs 时，未编排的提交自动生成一个「处理中 → 处理中 → 完成」的任务。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::api::{ApiError, CommandApi, StatusResponse, SubmitResponse};
use crate::core::JobId;

/// 一条脚本化的响应
#[derive(Debug, Clone)]
pub enum Scripted<T> {
    Reply(T),
    Fail(ApiError),
    /// 延迟后返回
    Delayed(Duration, T),
    /// 等到 gate 被 notify 后才返回，用于制造「请求在途」
    Gated(Arc<Notify>, T),
}

impl<T> Scripted<T> {
    async fn resolve(self) -> Result<T, ApiError> {
        match self {
            Scripted::Reply(value) => Ok(value),
            Scripted::Fail(err) => Err(err),
            Scripted::Delayed(delay, value) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            Scripted::Gated(gate, value) => {
                gate.notified().await;
                Ok(value)
            }
        }
    }
}

#[derive(Debug, Default)]
struct Script {
    submits: VecDeque<Scripted<SubmitResponse>>,
    statuses: HashMap<JobId, VecDeque<Scripted<StatusResponse>>>,
    submitted: Vec<String>,
    status_calls: Vec<(JobId, Instant)>,
}

#[derive(Debug, Default)]
pub struct SimulatedCommandApi {
    script: Mutex<Script>,
    auto_jobs: bool,
    next_job: AtomicU64,
}

impl SimulatedCommandApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开发模式：未编排的提交自动生成延迟任务
    pub fn with_auto_jobs() -> Self {
        Self {
            auto_jobs: true,
            ..Self::default()
        }
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push_submit(&self, reply: Scripted<SubmitResponse>) -> &Self {
        self.script().submits.push_back(reply);
        self
    }

    pub fn reply_submit(&self, resp: SubmitResponse) -> &Self {
        self.push_submit(Scripted::Reply(resp))
    }

    pub fn push_status(&self, job_id: &str, reply: Scripted<StatusResponse>) -> &Self {
        self.script()
            .statuses
            .entry(JobId::from(job_id))
            .or_default()
            .push_back(reply);
        self
    }

    pub fn reply_status(&self, job_id: &str, resp: StatusResponse) -> &Self {
        self.push_status(job_id, Scripted::Reply(resp))
    }

    /// 已提交的指令文本（按顺序）
    pub fn submitted(&self) -> Vec<String> {
        self.script().submitted.clone()
    }

    pub fn submit_calls(&self) -> usize {
        self.script().submitted.len()
    }

    /// 某任务的状态查询次数
    pub fn status_calls(&self, job_id: &str) -> usize {
        self.script()
            .status_calls
            .iter()
            .filter(|(id, _)| id.as_str() == job_id)
            .count()
    }

    /// 某任务每次状态查询发生的时刻
    pub fn status_call_times(&self, job_id: &str) -> Vec<Instant> {
        self.script()
            .status_calls
            .iter()
            .filter(|(id, _)| id.as_str() == job_id)
            .map(|(_, at)| *at)
            .collect()
    }

    fn auto_job(&self, script: &mut Script) -> SubmitResponse {
        let n = self.next_job.fetch_add(1, Ordering::Relaxed) + 1;
        let job_id = JobId::new(format!("sim-{n}"));
        let file_url = format!("https://reports.local/{job_id}.pdf");
        script.statuses.insert(
            job_id.clone(),
            VecDeque::from(vec![
                Scripted::Delayed(Duration::from_millis(300), StatusResponse::processing()),
                Scripted::Delayed(Duration::from_millis(300), StatusResponse::processing()),
                Scripted::Reply(StatusResponse::executed(&file_url)),
            ]),
        );
        SubmitResponse {
            status: Some("PROCESSING".to_string()),
            id: Some(serde_json::Value::String(job_id.to_string())),
            message: Some("Your report is being generated...".to_string()),
            ..SubmitResponse::default()
        }
    }
}

#[async_trait]
impl CommandApi for SimulatedCommandApi {
    async fn submit(&self, text: &str) -> Result<SubmitResponse, ApiError> {
        let reply = {
            let mut script = self.script();
            script.submitted.push(text.to_string());
            match script.submits.pop_front() {
                Some(reply) => reply,
                None if self.auto_jobs => Scripted::Reply(self.auto_job(&mut script)),
                None => Scripted::Fail(ApiError::Transport("no scripted submit reply".into())),
            }
        };
        reply.resolve().await
    }

    async fn job_status(&self, job_id: &JobId) -> Result<StatusResponse, ApiError> {
        let reply = {
            let mut script = self.script();
            script.status_calls.push((job_id.clone(), Instant::now()));
            match script.statuses.get_mut(job_id) {
                // 最后一条保持不变，重复返回
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };
        match reply {
            Some(reply) => reply.resolve().await,
            None => Err(ApiError::Http {
                status: 404,
                body: None,
            }),
        }
    }
}
