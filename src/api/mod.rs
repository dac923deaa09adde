//! 后端指令 API：抽象与实现（HTTP / 模拟）

pub mod http;
pub mod simulated;
pub mod traits;
pub mod types;

use std::sync::Arc;

pub use http::HttpCommandApi;
pub use simulated::{Scripted, SimulatedCommandApi};
pub use traits::{ApiError, CommandApi};
pub use types::{status_kind, StatusKind, StatusResponse, SubmitRequest, SubmitResponse};

use crate::config::{BackendMode, BackendSection};

/// 根据配置选择后端实现
pub fn create_api_from_config(cfg: &BackendSection) -> Arc<dyn CommandApi> {
    match cfg.mode {
        BackendMode::Http => {
            tracing::info!("Using HTTP command API ({})", cfg.base_url);
            Arc::new(HttpCommandApi::from_config(cfg))
        }
        BackendMode::Simulated => {
            tracing::warn!("Using simulated command API, no requests leave this process");
            Arc::new(SimulatedCommandApi::with_auto_jobs())
        }
    }
}
