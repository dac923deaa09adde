//! 指令服务层：提交分类与状态轮询（无状态服务，由编排器调用）

pub mod poller;
pub mod submitter;

pub use poller::{backoff_delay, PollEvent, PollOptions, PollUpdate, PollingSession, StatusPoller};
pub use submitter::{CommandSubmitter, FallbackPolicy, SubmissionOutcome};
