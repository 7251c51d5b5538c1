//! SSMパラメータストア操作モジュール
//!
//! コールドスタート時に公開鍵やexecutorのインスタンスIDを読み込むために使用する。

use async_trait::async_trait;
use aws_sdk_ssm::Client as SsmClient;
use thiserror::Error;
use tracing::{debug, warn};

/// SSM操作のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SsmOpsError {
    /// AWS SDK エラー
    #[error("AWS SSM APIエラー: {0}")]
    AwsSdkError(String),
    /// パラメータが存在しない、または値が空
    #[error("パラメータが見つかりません: {0}")]
    ParameterNotFound(String),
}

/// パラメータ取得トレイト（テスト用の抽象化）
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// パラメータの値を取得する
    ///
    /// # 引数
    /// * `name` - パラメータ名（フルパス）
    /// * `with_decryption` - SecureStringを復号するか
    async fn get_parameter(&self, name: &str, with_decryption: bool)
    -> Result<String, SsmOpsError>;
}

/// 実際のAWS SSM SDKを使用したパラメータ取得実装
pub struct AwsParameterStore {
    client: SsmClient,
}

impl AwsParameterStore {
    pub fn new(client: SsmClient) -> Self {
        Self { client }
    }

    /// AWS設定からデフォルトのクライアントを作成
    pub async fn from_config() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(SsmClient::new(&config))
    }
}

#[async_trait]
impl ParameterStore for AwsParameterStore {
    async fn get_parameter(
        &self,
        name: &str,
        with_decryption: bool,
    ) -> Result<String, SsmOpsError> {
        let response = self
            .client
            .get_parameter()
            .name(name)
            .with_decryption(with_decryption)
            .send()
            .await
            .map_err(|e| {
                warn!(parameter = %name, error = %e, "GetParameterエラー");
                SsmOpsError::AwsSdkError(e.to_string())
            })?;

        let value = response
            .parameter()
            .and_then(|p| p.value())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SsmOpsError::ParameterNotFound(name.to_string()))?;

        debug!(parameter = %name, "パラメータ取得完了");
        Ok(value.to_string())
    }
}

/// パスプレフィックスとキーからパラメータ名を組み立てる
///
/// プレフィックス末尾の`/`有無を吸収する。
pub fn parameter_name(prefix: &str, key: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), key)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// テスト用のモックパラメータストア
    #[derive(Debug, Clone, Default)]
    pub(crate) struct MockParameterStore {
        parameters: Arc<Mutex<HashMap<String, String>>>,
        /// get_parameterの呼び出し履歴: (name, with_decryption)
        calls: Arc<Mutex<Vec<(String, bool)>>>,
    }

    impl MockParameterStore {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn with_parameter(self, name: &str, value: &str) -> Self {
            self.parameters
                .lock()
                .unwrap()
                .insert(name.to_string(), value.to_string());
            self
        }

        pub(crate) fn calls(&self) -> Vec<(String, bool)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ParameterStore for MockParameterStore {
        async fn get_parameter(
            &self,
            name: &str,
            with_decryption: bool,
        ) -> Result<String, SsmOpsError> {
            self.calls
                .lock()
                .unwrap()
                .push((name.to_string(), with_decryption));

            self.parameters
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .ok_or_else(|| SsmOpsError::ParameterNotFound(name.to_string()))
        }
    }

    #[test]
    fn test_parameter_name() {
        assert_eq!(parameter_name("/bot", "pubkey"), "/bot/pubkey");
        assert_eq!(parameter_name("/bot/", "instanceid"), "/bot/instanceid");
    }

    #[test]
    fn test_ssm_ops_error_display() {
        let sdk_error = SsmOpsError::AwsSdkError("AccessDenied".to_string());
        assert_eq!(sdk_error.to_string(), "AWS SSM APIエラー: AccessDenied");

        let not_found = SsmOpsError::ParameterNotFound("/bot/pubkey".to_string());
        assert_eq!(not_found.to_string(), "パラメータが見つかりません: /bot/pubkey");
    }

    #[tokio::test]
    async fn test_mock_parameter_store() {
        let store = MockParameterStore::new().with_parameter("/bot/pubkey", "abcd");

        assert_eq!(store.get_parameter("/bot/pubkey", true).await.unwrap(), "abcd");
        assert_eq!(
            store.get_parameter("/bot/other", false).await,
            Err(SsmOpsError::ParameterNotFound("/bot/other".to_string()))
        );
        assert_eq!(
            store.calls(),
            vec![
                ("/bot/pubkey".to_string(), true),
                ("/bot/other".to_string(), false)
            ]
        );
    }
}
