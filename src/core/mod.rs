//! 核心编排层：错误归一化、状态快照、指令编排状态机、优雅关闭

pub mod error;
pub mod orchestrator;
pub mod shutdown;
pub mod state;

pub use error::{CommandError, ErrorRecord};
pub use orchestrator::{
    create_orchestrator, spawn_orchestrator, Command, CommandHandle, OrchestratorSettings,
};
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{
    CommandJob, CommandSnapshot, CommandState, FieldErrors, JobId, ReportResult, ReportStatus,
};
