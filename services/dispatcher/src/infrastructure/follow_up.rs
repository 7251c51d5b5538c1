//! フォローアップ送信モジュール
//!
//! 遅延実行したコマンドの結果を、元のWebhook応答とは別経路で届ける。
//! 送信先は`{base}/webhooks/{application_id}/{token}`。

use async_trait::async_trait;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::domain::FollowUpTarget;

/// 最大再試行回数
const MAX_RETRIES: u32 = 3;

/// リクエストタイムアウト（秒）
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// メッセージ本文の最大文字数
pub const MAX_CONTENT_CHARS: usize = 2000;

/// フォローアップ送信のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FollowUpError {
    /// ベースURLが不正
    #[error("無効なURL: {0}")]
    InvalidUrl(String),

    /// HTTPクライアントの構築に失敗
    #[error("HTTPクライアント構築エラー: {0}")]
    ClientBuild(String),

    /// HTTPエラー（ステータスコード付き）
    #[error("HTTPエラー: status={status}, message={message}")]
    HttpError { status: u16, message: String },

    /// ネットワークエラー（再試行後）
    #[error("ネットワークエラー: {0}")]
    NetworkError(String),
}

/// フォローアップ送信トレイト
#[async_trait]
pub trait FollowUpSender: Send + Sync {
    /// メッセージを送信する
    async fn send(&self, target: &FollowUpTarget, content: &str) -> Result<(), FollowUpError>;
}

/// Webhook APIへ送信するFollowUpSender実装
#[derive(Clone)]
pub struct WebhookFollowUpSender {
    client: ClientWithMiddleware,
    api_base: Url,
}

impl std::fmt::Debug for WebhookFollowUpSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookFollowUpSender")
            .field("api_base", &self.api_base.as_str())
            .finish_non_exhaustive()
    }
}

impl WebhookFollowUpSender {
    /// ベースURLからクライアントを作成
    ///
    /// 一時的なエラー（5xx、429、接続エラー）は指数バックオフで再試行する。
    pub fn new(api_base: &str) -> Result<Self, FollowUpError> {
        let api_base = Url::parse(api_base).map_err(|e| FollowUpError::InvalidUrl(e.to_string()))?;
        if api_base.cannot_be_a_base() {
            return Err(FollowUpError::InvalidUrl(api_base.to_string()));
        }

        let base_client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| FollowUpError::ClientBuild(e.to_string()))?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES);

        let client = ClientBuilder::new(base_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        info!(api_base = %api_base, "フォローアップ送信クライアントを初期化");

        Ok(Self { client, api_base })
    }

    /// 送信先URLを構築
    ///
    /// トークンはパスセグメントとしてエンコードされる。
    fn webhook_url(&self, target: &FollowUpTarget) -> Result<Url, FollowUpError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| FollowUpError::InvalidUrl(self.api_base.to_string()))?
            .pop_if_empty()
            .extend(["webhooks", &target.application_id, &target.token]);
        Ok(url)
    }
}

#[async_trait]
impl FollowUpSender for WebhookFollowUpSender {
    async fn send(&self, target: &FollowUpTarget, content: &str) -> Result<(), FollowUpError> {
        let url = self.webhook_url(target)?;
        let body = json!({ "content": truncate_content(content) }).to_string();
        debug!(application_id = %target.application_id, "フォローアップ送信");

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "フォローアップ送信リクエスト失敗");
                FollowUpError::NetworkError(e.to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            info!(status = %status, "フォローアップ送信成功");
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        error!(status = %status, body = %message, "フォローアップ送信エラー");
        Err(FollowUpError::HttpError {
            status: status.as_u16(),
            message,
        })
    }
}

/// メッセージ本文を上限文字数に切り詰める
pub fn truncate_content(content: &str) -> String {
    match content.char_indices().nth(MAX_CONTENT_CHARS) {
        Some((index, _)) => content[..index].to_string(),
        None => content.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// テスト用のモックFollowUpSender
    #[derive(Debug, Clone, Default)]
    pub(crate) struct MockFollowUpSender {
        sent: Arc<Mutex<Vec<(FollowUpTarget, String)>>>,
        next_error: Arc<Mutex<Option<FollowUpError>>>,
    }

    impl MockFollowUpSender {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn sent(&self) -> Vec<(FollowUpTarget, String)> {
            self.sent.lock().unwrap().clone()
        }

        pub(crate) fn set_next_error(&self, error: FollowUpError) {
            *self.next_error.lock().unwrap() = Some(error);
        }
    }

    #[async_trait]
    impl FollowUpSender for MockFollowUpSender {
        async fn send(&self, target: &FollowUpTarget, content: &str) -> Result<(), FollowUpError> {
            if let Some(error) = self.next_error.lock().unwrap().take() {
                return Err(error);
            }
            self.sent
                .lock()
                .unwrap()
                .push((target.clone(), content.to_string()));
            Ok(())
        }
    }

    #[test]
    fn test_webhook_url() {
        let sender = WebhookFollowUpSender::new("https://discord.com/api/v10").unwrap();
        let url = sender
            .webhook_url(&FollowUpTarget::new("123", "tok"))
            .unwrap();

        assert_eq!(url.as_str(), "https://discord.com/api/v10/webhooks/123/tok");
    }

    #[test]
    fn test_webhook_url_with_trailing_slash_and_escaping() {
        let sender = WebhookFollowUpSender::new("http://localhost:8080/api/").unwrap();
        let url = sender
            .webhook_url(&FollowUpTarget::new("app", "a/b?c"))
            .unwrap();

        assert_eq!(url.as_str(), "http://localhost:8080/api/webhooks/app/a%2Fb%3Fc");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            WebhookFollowUpSender::new("not a url"),
            Err(FollowUpError::InvalidUrl(_))
        ));
        assert!(matches!(
            WebhookFollowUpSender::new("mailto:bot@example.com"),
            Err(FollowUpError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_truncate_content() {
        assert_eq!(truncate_content("short"), "short");

        let long = "あ".repeat(MAX_CONTENT_CHARS + 10);
        let truncated = truncate_content(&long);
        assert_eq!(truncated.chars().count(), MAX_CONTENT_CHARS);
    }

    #[test]
    fn test_error_display() {
        let error = FollowUpError::HttpError {
            status: 404,
            message: "Unknown Webhook".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "HTTPエラー: status=404, message=Unknown Webhook"
        );
    }
}
