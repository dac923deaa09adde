//! 语音采集适配层：事件、错误码与采集接口
//!
//! 平台语音转文字能力被视为黑盒事件源：开始、临时/最终转写、错误码、结束。
//! 编排器在 start 时交出一个 CaptureSink，适配器通过它回推事件；每个 sink 带采集序号，
//! 编排器据此丢弃已退订采集的迟到事件。

use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc;

/// 平台采集错误码（取自语音识别错误字符串）
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum CaptureErrorCode {
    /// no-speech
    NoSpeech,
    /// not-allowed / service-not-allowed
    NotAllowed,
    /// audio-capture：没有可用麦克风
    AudioCapture,
    Network,
    Other(String),
}

impl CaptureErrorCode {
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "no-speech" => Self::NoSpeech,
            "not-allowed" | "service-not-allowed" => Self::NotAllowed,
            "audio-capture" => Self::AudioCapture,
            "network" => Self::Network,
            other => Self::Other(other.to_string()),
        }
    }

    /// 面向用户的提示文案
    pub fn user_message(&self) -> String {
        match self {
            Self::NoSpeech => "No speech was detected. Please try again.".to_string(),
            Self::NotAllowed => {
                "Microphone permission denied. Please allow microphone access and try again."
                    .to_string()
            }
            Self::AudioCapture => "No microphone was found. Please check your device.".to_string(),
            Self::Network => {
                "Network error during speech recognition. Please check your connection.".to_string()
            }
            Self::Other(code) => format!("Speech recognition error: {code}"),
        }
    }
}

impl fmt::Display for CaptureErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSpeech => f.write_str("no-speech"),
            Self::NotAllowed => f.write_str("not-allowed"),
            Self::AudioCapture => f.write_str("audio-capture"),
            Self::Network => f.write_str("network"),
            Self::Other(code) => f.write_str(code),
        }
    }
}

/// 适配器回推的生命周期事件
#[derive(Clone, Debug, PartialEq)]
pub enum CaptureEvent {
    Started,
    /// 临时或最终转写；text 为到目前为止的完整转写
    Transcript { text: String, is_final: bool },
    Error(CaptureErrorCode),
    Ended,
}

/// 带采集序号的事件（编排器内部通道的消息）
#[derive(Debug)]
pub(crate) struct CaptureSignal {
    pub capture_id: u64,
    pub event: CaptureEvent,
}

/// 一次采集订阅的事件出口
#[derive(Clone, Debug)]
pub struct CaptureSink {
    capture_id: u64,
    tx: mpsc::UnboundedSender<CaptureSignal>,
}

impl CaptureSink {
    pub(crate) fn new(capture_id: u64, tx: mpsc::UnboundedSender<CaptureSignal>) -> Self {
        Self { capture_id, tx }
    }

    pub fn capture_id(&self) -> u64 {
        self.capture_id
    }

    /// 推送事件；订阅方已退出时返回 false
    pub fn emit(&self, event: CaptureEvent) -> bool {
        self.tx
            .send(CaptureSignal {
                capture_id: self.capture_id,
                event,
            })
            .is_ok()
    }
}

/// 平台语音采集能力
///
/// start 失败时直接返回错误码（如权限被拒），编排器进入 Error；
/// stop 之后适配器不应再通过旧 sink 推送事件，即使推送也会被丢弃。
pub trait SpeechCapture: Send + Sync {
    fn start(&self, sink: CaptureSink) -> Result<(), CaptureErrorCode>;

    fn stop(&self);
}
