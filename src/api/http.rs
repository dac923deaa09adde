//! HTTP 指令 API 客户端
//!
//! POST submit_path 提交指令，GET status_path（`{id}` 替换为任务 ID）查询状态；
//! 非 2xx 响应尽量解析响应体，让后端的校验详情（details）能传到用户面前。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, Url};

use crate::api::{ApiError, CommandApi, StatusResponse, SubmitRequest, SubmitResponse};
use crate::config::BackendSection;
use crate::core::JobId;

pub struct HttpCommandApi {
    client: Client,
    base_url: String,
    submit_path: String,
    status_path: String,
}

impl HttpCommandApi {
    pub fn new(base_url: &str, timeout_secs: u64) -> Self {
        let defaults = BackendSection::default();
        Self::with_paths(
            base_url,
            &defaults.submit_path,
            &defaults.status_path,
            timeout_secs,
        )
    }

    pub fn with_paths(
        base_url: &str,
        submit_path: &str,
        status_path: &str,
        timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            submit_path: submit_path.to_string(),
            status_path: status_path.to_string(),
        }
    }

    pub fn from_config(cfg: &BackendSection) -> Self {
        Self::with_paths(
            &cfg.base_url,
            &cfg.submit_path,
            &cfg.status_path,
            cfg.request_timeout_secs,
        )
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// 按段拼接状态地址；任务 ID 作为单个路径段编码，不会改变路径结构
    fn status_url(&self, job_id: &JobId) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            ApiError::Transport(format!("Invalid base URL {}: {}", self.base_url, e))
        })?;
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                ApiError::Transport(format!("Base URL {} cannot carry a path", self.base_url))
            })?;
            path.pop_if_empty();
            let mut parts = self.status_path.trim_start_matches('/').split('/').peekable();
            while let Some(part) = parts.next() {
                // 中间的空段跳过，末尾的空段保留尾部斜杠
                if part.is_empty() && parts.peek().is_some() {
                    continue;
                }
                path.push(&part.replace("{id}", job_id.as_str()));
            }
        }
        Ok(url)
    }
}

/// 非 2xx 时读取响应体并转为 ApiError::Http
async fn reject(response: Response) -> ApiError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .ok()
        .and_then(|text| serde_json::from_str::<SubmitResponse>(&text).ok());
    ApiError::Http { status, body }
}

#[async_trait]
impl CommandApi for HttpCommandApi {
    async fn submit(&self, text: &str) -> Result<SubmitResponse, ApiError> {
        let url = self.url(&self.submit_path);
        tracing::debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .json(&SubmitRequest { text })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(reject(response).await);
        }
        Ok(response.json::<SubmitResponse>().await?)
    }

    async fn job_status(&self, job_id: &JobId) -> Result<StatusResponse, ApiError> {
        let url = self.status_url(job_id)?;
        tracing::debug!("GET {}", url);
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(reject(response).await);
        }
        Ok(response.json::<StatusResponse>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    #[tokio::test]
    async fn test_submit_posts_text() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/voice-commands/")
            .match_body(Matcher::Json(json!({"text": "generate sales report"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"EXECUTED","file_url":"https://x/a.pdf"}"#)
            .create_async()
            .await;

        let api = HttpCommandApi::new(&server.url(), 5);
        let resp = api.submit("generate sales report").await.unwrap();
        assert_eq!(resp.status.as_deref(), Some("EXECUTED"));
        assert_eq!(resp.file_url.as_deref(), Some("https://x/a.pdf"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_submit_rejection_keeps_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/voice-commands/")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"status":"FAILED","error":"Invalid params","details":{"name":["required"]}}"#,
            )
            .create_async()
            .await;

        let api = HttpCommandApi::new(&server.url(), 5);
        match api.submit("bad command").await {
            Err(ApiError::Http { status, body }) => {
                assert_eq!(status, 400);
                let body = body.expect("body should decode");
                assert_eq!(body.explicit_error(), Some("Invalid params"));
                assert_eq!(
                    body.details.unwrap().get("name"),
                    Some(&vec!["required".to_string()])
                );
            }
            other => panic!("Expected Http error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_job_status_uses_status_path() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/jobs/J1/state")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"PROCESSING"}"#)
            .create_async()
            .await;

        let api = HttpCommandApi::with_paths(&server.url(), "/jobs", "/jobs/{id}/state", 5);
        let resp = api.job_status(&JobId::from("J1")).await.unwrap();
        assert_eq!(resp, StatusResponse::processing());
        mock.assert_async().await;
    }

    #[test]
    fn test_status_url_encodes_job_id_segment() {
        let api = HttpCommandApi::new("http://localhost:8000/", 5);
        let url = api.status_url(&JobId::from("a/b?c#d")).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/api/voice-commands/a%2Fb%3Fc%23d/status/"
        );

        let prefixed = HttpCommandApi::with_paths("http://host/backend", "/jobs", "jobs/{id}", 5);
        assert_eq!(
            prefixed.status_url(&JobId::from("J1")).unwrap().as_str(),
            "http://host/backend/jobs/J1"
        );
    }

    #[tokio::test]
    async fn test_job_status_with_reserved_characters_in_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/voice-commands/2024%2F07%3Fdraft/status/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"EXECUTED","file_url":"https://x/c.pdf"}"#)
            .create_async()
            .await;

        let api = HttpCommandApi::new(&server.url(), 5);
        let resp = api.job_status(&JobId::from("2024/07?draft")).await.unwrap();
        assert_eq!(resp, StatusResponse::executed("https://x/c.pdf"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_without_json_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/voice-commands/J2/status/")
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let api = HttpCommandApi::new(&server.url(), 5);
        let err = api.job_status(&JobId::from("J2")).await.unwrap_err();
        assert_eq!(
            err,
            ApiError::Http {
                status: 502,
                body: None
            }
        );
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transport_error() {
        // 端口 9 (discard) 通常无服务监听
        let api = HttpCommandApi::new("http://127.0.0.1:9", 1);
        let err = api.submit("anything").await.unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
    }
}
