//! 语音采集：平台适配接口与手动驱动实现

pub mod capture;
pub mod manual;

pub use capture::{CaptureErrorCode, CaptureEvent, CaptureSink, SpeechCapture};
pub(crate) use capture::CaptureSignal;
pub use manual::ManualCapture;
