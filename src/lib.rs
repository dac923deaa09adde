//! Voice Command - 语音指令编排引擎
//!
//! 模块划分：
//! - **api**: 后端指令 API 抽象与实现（HTTP / 模拟）
//! - **command**: 指令提交分类、任务状态轮询（指数退避、可取消）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 状态机编排器、状态快照、错误归一化、优雅关闭
//! - **observability**: 日志初始化
//! - **speech**: 语音采集适配接口

pub mod api;
pub mod command;
pub mod config;
pub mod core;
pub mod observability;
pub mod speech;

pub use crate::core::{
    create_orchestrator, spawn_orchestrator, CommandError, CommandHandle, CommandSnapshot,
    CommandState, OrchestratorSettings, ReportResult,
};
