//! 手动驱动的采集适配器
//!
//! 宿主（平台层、CLI 或测试）把真实语音识别的回调转发进来；
//! 只有处于订阅中的采集才会收到事件。

use std::sync::{Mutex, MutexGuard};

use crate::speech::{CaptureErrorCode, CaptureEvent, CaptureSink, SpeechCapture};

#[derive(Debug, Default)]
pub struct ManualCapture {
    active: Mutex<Option<CaptureSink>>,
    /// 下一次 start 直接失败（模拟权限被拒等）
    start_error: Mutex<Option<CaptureErrorCode>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ManualCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_start(&self, code: CaptureErrorCode) {
        *lock(&self.start_error) = Some(code);
    }

    pub fn is_active(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// 转发事件到当前订阅；没有订阅时丢弃并返回 false
    pub fn emit(&self, event: CaptureEvent) -> bool {
        match lock(&self.active).as_ref() {
            Some(sink) => sink.emit(event),
            None => {
                tracing::debug!("Capture event dropped, no active subscription: {:?}", event);
                false
            }
        }
    }

    pub fn transcript(&self, text: impl Into<String>, is_final: bool) -> bool {
        self.emit(CaptureEvent::Transcript {
            text: text.into(),
            is_final,
        })
    }

    pub fn error(&self, code: &str) -> bool {
        self.emit(CaptureEvent::Error(CaptureErrorCode::from_code(code)))
    }

    /// 平台结束采集（onend）
    pub fn end(&self) -> bool {
        self.emit(CaptureEvent::Ended)
    }
}

impl SpeechCapture for ManualCapture {
    fn start(&self, sink: CaptureSink) -> Result<(), CaptureErrorCode> {
        if let Some(code) = lock(&self.start_error).take() {
            return Err(code);
        }
        sink.emit(CaptureEvent::Started);
        *lock(&self.active) = Some(sink);
        Ok(())
    }

    fn stop(&self) {
        lock(&self.active).take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_events_only_reach_active_subscription() {
        let capture = ManualCapture::new();
        assert!(!capture.transcript("lost", false));

        let (tx, mut rx) = mpsc::unbounded_channel();
        capture.start(CaptureSink::new(1, tx)).unwrap();
        assert!(capture.is_active());
        assert!(capture.transcript("sales report", true));

        let started = rx.try_recv().unwrap();
        assert_eq!(started.event, CaptureEvent::Started);
        let transcript = rx.try_recv().unwrap();
        assert_eq!(transcript.capture_id, 1);
        assert_eq!(
            transcript.event,
            CaptureEvent::Transcript {
                text: "sales report".to_string(),
                is_final: true
            }
        );

        capture.stop();
        assert!(!capture.end());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_fail_next_start_is_one_shot() {
        let capture = ManualCapture::new();
        capture.fail_next_start(CaptureErrorCode::NotAllowed);

        let (tx, _rx) = mpsc::unbounded_channel();
        let err = capture.start(CaptureSink::new(1, tx.clone())).unwrap_err();
        assert_eq!(err, CaptureErrorCode::NotAllowed);
        assert!(!capture.is_active());

        assert!(capture.start(CaptureSink::new(2, tx)).is_ok());
    }
}
