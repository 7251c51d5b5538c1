/// 公開IPアドレス取得モジュール
///
/// executorが稼働しているホストの公開IPを外部サービスに問い合わせる。
use async_trait::async_trait;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// デフォルトの問い合わせ先
pub const DEFAULT_CHECK_IP_URL: &str = "https://checkip.amazonaws.com";

const MAX_RETRIES: u32 = 2;
const REQUEST_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum IpLookupError {
    #[error("HTTPクライアント構築エラー: {0}")]
    ClientBuild(String),

    #[error("リクエスト失敗: {0}")]
    RequestFailed(String),

    #[error("ステータスコード異常: {0}")]
    UnexpectedStatus(u16),

    #[error("IPアドレスとして解釈できません: {0}")]
    InvalidResponse(String),
}

/// 公開IP取得トレイト
#[async_trait]
pub trait IpLookup: Send + Sync {
    async fn public_ip(&self) -> Result<IpAddr, IpLookupError>;
}

/// checkip.amazonaws.com互換のテキスト応答を使うIpLookup実装
#[derive(Clone)]
pub struct CheckIpLookup {
    client: ClientWithMiddleware,
    url: String,
}

impl std::fmt::Debug for CheckIpLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckIpLookup")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl CheckIpLookup {
    pub fn new(url: impl Into<String>) -> Result<Self, IpLookupError> {
        let base_client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| IpLookupError::ClientBuild(e.to_string()))?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES);
        let client = ClientBuilder::new(base_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn with_default_url() -> Result<Self, IpLookupError> {
        Self::new(DEFAULT_CHECK_IP_URL)
    }
}

#[async_trait]
impl IpLookup for CheckIpLookup {
    async fn public_ip(&self) -> Result<IpAddr, IpLookupError> {
        let response = self.client.get(&self.url).send().await.map_err(|e| {
            warn!(url = %self.url, error = %e, "公開IP取得リクエスト失敗");
            IpLookupError::RequestFailed(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(IpLookupError::UnexpectedStatus(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| IpLookupError::RequestFailed(e.to_string()))?;

        let ip = parse_ip(&body)?;
        debug!(ip = %ip, "公開IP取得");
        Ok(ip)
    }
}

/// 応答本文（末尾に改行を含む）をIPアドレスとして解釈する
fn parse_ip(body: &str) -> Result<IpAddr, IpLookupError> {
    let trimmed = body.trim();
    trimmed
        .parse()
        .map_err(|_| IpLookupError::InvalidResponse(trimmed.to_string()))
}
