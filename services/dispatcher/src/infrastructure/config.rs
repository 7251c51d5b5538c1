/// ディスパッチャー設定
///
/// コールドスタート時に環境変数から一度だけ読み込み、
/// 以降は不変の値として各コンポーネントに明示的に渡す。
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use super::ssm_ops::{ParameterStore, SsmOpsError, parameter_name};
use crate::domain::DEFAULT_MAX_SKEW_SECS;

/// 同期ハンドラー実行時間のデフォルト（ミリ秒）
///
/// Webhookは3秒以内に応答する必要があるため、余裕を残した値にする。
pub const DEFAULT_SYNC_HANDLER_TIMEOUT_MS: u64 = 2_500;

/// フォローアップAPIのデフォルトベースURL
pub const DEFAULT_FOLLOW_UP_API_BASE: &str = "https://discord.com/api/v10";

/// SSM上の公開鍵パラメータ名
const PUBKEY_PARAMETER: &str = "pubkey";
/// SSM上のexecutorインスタンスIDパラメータ名
const INSTANCE_ID_PARAMETER: &str = "instanceid";

/// 設定のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("環境変数が設定されていません: {0}")]
    MissingEnvVar(String),

    #[error("環境変数の値が不正です: {name}={value}")]
    InvalidValue { name: String, value: String },

    #[error("パラメータの取得に失敗しました: {0}")]
    ParameterLookup(#[from] SsmOpsError),
}

/// ワークキューの実装種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkQueueBackend {
    /// SQSキューへ送信（executorデーモン/commands Lambdaが受信）
    #[default]
    Sqs,
    /// commands Lambdaを非同期呼び出し
    Lambda,
}

impl WorkQueueBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqs" => Some(Self::Sqs),
            "lambda" => Some(Self::Lambda),
            _ => None,
        }
    }
}

/// ディスパッチャー設定
///
/// 以下の環境変数から読み込む:
/// - SSMPATH: SSMパラメータのパスプレフィックス（必須）
/// - PUBKEY: 署名検証用の公開鍵（16進数）。未設定時は`{SSMPATH}/pubkey`から取得
/// - QUEUEURL: 遅延実行用SQSキューURL（必須）
/// - TABLENAME: 状態保存用DynamoDBテーブル名（必須）
/// - CMDFUNC: 下流executorのLambda関数名（`lambda`バックエンド時のみ必須）
/// - WORK_QUEUE_BACKEND: `sqs`（デフォルト）または`lambda`
/// - SIGNATURE_MAX_SKEW_SECS: 署名タイムスタンプの許容誤差（秒）
/// - SYNC_HANDLER_TIMEOUT_MS: 同期ハンドラーの実行時間上限（ミリ秒）
/// - FOLLOW_UP_API_BASE: フォローアップAPIのベースURL
/// - EXECUTOR_STATE_ID: executorハートビートのレコードID
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    ssm_path: String,
    public_key: Option<String>,
    queue_url: String,
    table_name: String,
    command_function: Option<String>,
    work_queue_backend: WorkQueueBackend,
    max_skew_secs: i64,
    sync_handler_timeout: Duration,
    follow_up_api_base: String,
    executor_state_id: Option<String>,
}

impl DispatcherConfig {
    /// 環境変数から設定を読み込む
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// 任意の参照関数から設定を読み込む
    ///
    /// 空文字列は未設定として扱う。
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &str| {
            optional(name).ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
        };

        let ssm_path = required("SSMPATH")?;
        let queue_url = required("QUEUEURL")?;
        let table_name = required("TABLENAME")?;

        let work_queue_backend = match optional("WORK_QUEUE_BACKEND") {
            Some(value) => WorkQueueBackend::parse(&value).ok_or(ConfigError::InvalidValue {
                name: "WORK_QUEUE_BACKEND".to_string(),
                value,
            })?,
            None => WorkQueueBackend::default(),
        };

        let command_function = optional("CMDFUNC");
        if work_queue_backend == WorkQueueBackend::Lambda && command_function.is_none() {
            return Err(ConfigError::MissingEnvVar("CMDFUNC".to_string()));
        }

        let max_skew_secs: i64 = parse_number(
            "SIGNATURE_MAX_SKEW_SECS",
            optional("SIGNATURE_MAX_SKEW_SECS"),
            DEFAULT_MAX_SKEW_SECS,
        )?;
        if max_skew_secs <= 0 {
            return Err(ConfigError::InvalidValue {
                name: "SIGNATURE_MAX_SKEW_SECS".to_string(),
                value: max_skew_secs.to_string(),
            });
        }

        let sync_handler_timeout_ms: u64 = parse_number(
            "SYNC_HANDLER_TIMEOUT_MS",
            optional("SYNC_HANDLER_TIMEOUT_MS"),
            DEFAULT_SYNC_HANDLER_TIMEOUT_MS,
        )?;

        let follow_up_api_base = optional("FOLLOW_UP_API_BASE")
            .map(|base| base.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_FOLLOW_UP_API_BASE.to_string());

        Ok(Self {
            ssm_path,
            public_key: optional("PUBKEY"),
            queue_url,
            table_name,
            command_function,
            work_queue_backend,
            max_skew_secs,
            sync_handler_timeout: Duration::from_millis(sync_handler_timeout_ms),
            follow_up_api_base,
            executor_state_id: optional("EXECUTOR_STATE_ID"),
        })
    }

    pub fn ssm_path(&self) -> &str {
        &self.ssm_path
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn command_function(&self) -> Option<&str> {
        self.command_function.as_deref()
    }

    pub fn work_queue_backend(&self) -> WorkQueueBackend {
        self.work_queue_backend
    }

    pub fn max_skew_secs(&self) -> i64 {
        self.max_skew_secs
    }

    pub fn sync_handler_timeout(&self) -> Duration {
        self.sync_handler_timeout
    }

    pub fn follow_up_api_base(&self) -> &str {
        &self.follow_up_api_base
    }

    /// 環境変数で直接指定されたexecutorハートビートのレコードID
    pub fn executor_state_id(&self) -> Option<&str> {
        self.executor_state_id.as_deref()
    }

    /// executorのインスタンスIDを保持するSSMパラメータ名
    pub fn instance_id_parameter(&self) -> String {
        parameter_name(&self.ssm_path, INSTANCE_ID_PARAMETER)
    }

    /// 署名検証用の公開鍵を解決する
    ///
    /// `PUBKEY`が設定されていればそれを使い、なければSSMから復号して取得する。
    pub async fn resolve_public_key(
        &self,
        store: &dyn ParameterStore,
    ) -> Result<String, ConfigError> {
        if let Some(public_key) = &self.public_key {
            return Ok(public_key.clone());
        }

        let name = parameter_name(&self.ssm_path, PUBKEY_PARAMETER);
        info!(parameter = %name, "公開鍵をSSMから取得");
        Ok(store.get_parameter(&name, true).await?)
    }

    /// executorハートビートのレコードIDを解決する
    ///
    /// `EXECUTOR_STATE_ID`が設定されていればそれを使い、なければSSMから取得する。
    pub async fn resolve_executor_state_id(
        &self,
        store: &dyn ParameterStore,
    ) -> Result<String, ConfigError> {
        if let Some(state_id) = self.executor_state_id() {
            return Ok(state_id.to_string());
        }

        let name = self.instance_id_parameter();
        info!(parameter = %name, "インスタンスIDをSSMから取得");
        Ok(store.get_parameter(&name, false).await?)
    }
}

fn parse_number<T: std::str::FromStr>(
    name: &str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::ssm_ops::tests::MockParameterStore;
    use serial_test::serial;
    use std::collections::HashMap;

    fn base_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("SSMPATH", "/bot"),
            ("QUEUEURL", "https://sqs.ap-northeast-1.amazonaws.com/123/work"),
            ("TABLENAME", "bot-state"),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<DispatcherConfig, ConfigError> {
        DispatcherConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string()))
    }

    // ==================== 読み込み ====================

    #[test]
    fn test_defaults() {
        let config = load(&base_vars()).unwrap();

        assert_eq!(config.ssm_path(), "/bot");
        assert_eq!(config.table_name(), "bot-state");
        assert_eq!(config.work_queue_backend(), WorkQueueBackend::Sqs);
        assert_eq!(config.command_function(), None);
        assert_eq!(config.max_skew_secs(), DEFAULT_MAX_SKEW_SECS);
        assert_eq!(config.sync_handler_timeout(), Duration::from_millis(2_500));
        assert_eq!(config.follow_up_api_base(), DEFAULT_FOLLOW_UP_API_BASE);
    }

    #[test]
    fn test_overrides() {
        let mut vars = base_vars();
        vars.insert("WORK_QUEUE_BACKEND", "Lambda");
        vars.insert("CMDFUNC", "bot-commands");
        vars.insert("SIGNATURE_MAX_SKEW_SECS", "60");
        vars.insert("SYNC_HANDLER_TIMEOUT_MS", "1000");
        vars.insert("FOLLOW_UP_API_BASE", "http://localhost:8080/");

        let config = load(&vars).unwrap();
        assert_eq!(config.work_queue_backend(), WorkQueueBackend::Lambda);
        assert_eq!(config.command_function(), Some("bot-commands"));
        assert_eq!(config.max_skew_secs(), 60);
        assert_eq!(config.sync_handler_timeout(), Duration::from_secs(1));
        assert_eq!(config.follow_up_api_base(), "http://localhost:8080");
    }

    #[test]
    fn test_missing_required_vars() {
        for name in ["SSMPATH", "QUEUEURL", "TABLENAME"] {
            let mut vars = base_vars();
            vars.remove(name);
            assert_eq!(
                load(&vars),
                Err(ConfigError::MissingEnvVar(name.to_string())),
                "{} must be required",
                name
            );
        }
    }

    #[test]
    fn test_empty_value_treated_as_missing() {
        let mut vars = base_vars();
        vars.insert("TABLENAME", "  ");
        assert_eq!(
            load(&vars),
            Err(ConfigError::MissingEnvVar("TABLENAME".to_string()))
        );
    }

    #[test]
    fn test_lambda_backend_requires_cmdfunc() {
        let mut vars = base_vars();
        vars.insert("WORK_QUEUE_BACKEND", "lambda");
        assert_eq!(
            load(&vars),
            Err(ConfigError::MissingEnvVar("CMDFUNC".to_string()))
        );
    }

    #[test]
    fn test_invalid_values() {
        let cases = [
            ("WORK_QUEUE_BACKEND", "kafka"),
            ("SIGNATURE_MAX_SKEW_SECS", "five"),
            ("SIGNATURE_MAX_SKEW_SECS", "0"),
            ("SYNC_HANDLER_TIMEOUT_MS", "-1"),
        ];

        for (name, value) in cases {
            let mut vars = base_vars();
            vars.insert(name, value);
            assert!(
                matches!(load(&vars), Err(ConfigError::InvalidValue { name: n, .. }) if n == name),
                "{}={} must be rejected",
                name,
                value
            );
        }
    }

    #[test]
    #[serial]
    fn test_from_env() {
        // 安全性: #[serial]で環境変数を扱うテストを直列化している
        unsafe {
            std::env::set_var("SSMPATH", "/env-bot");
            std::env::set_var("QUEUEURL", "https://example.com/queue");
            std::env::set_var("TABLENAME", "env-table");
            std::env::remove_var("WORK_QUEUE_BACKEND");
        }

        let config = DispatcherConfig::from_env().unwrap();
        assert_eq!(config.ssm_path(), "/env-bot");
        assert_eq!(config.queue_url(), "https://example.com/queue");

        unsafe {
            std::env::remove_var("SSMPATH");
            std::env::remove_var("QUEUEURL");
            std::env::remove_var("TABLENAME");
        }
    }

    // ==================== SSMからの解決 ====================

    #[tokio::test]
    async fn test_public_key_from_env_skips_ssm() {
        let mut vars = base_vars();
        vars.insert("PUBKEY", "deadbeef");
        let config = load(&vars).unwrap();
        let store = MockParameterStore::new();

        assert_eq!(config.resolve_public_key(&store).await.unwrap(), "deadbeef");
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_public_key_from_ssm_with_decryption() {
        let config = load(&base_vars()).unwrap();
        let store = MockParameterStore::new().with_parameter("/bot/pubkey", "cafe");

        assert_eq!(config.resolve_public_key(&store).await.unwrap(), "cafe");
        assert_eq!(store.calls(), vec![("/bot/pubkey".to_string(), true)]);
    }

    #[tokio::test]
    async fn test_public_key_missing_in_ssm() {
        let config = load(&base_vars()).unwrap();
        let store = MockParameterStore::new();

        assert!(matches!(
            config.resolve_public_key(&store).await,
            Err(ConfigError::ParameterLookup(SsmOpsError::ParameterNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_executor_state_id_resolution() {
        let config = load(&base_vars()).unwrap();
        assert_eq!(config.executor_state_id(), None);
        assert_eq!(config.instance_id_parameter(), "/bot/instanceid");
        let store = MockParameterStore::new().with_parameter("/bot/instanceid", "i-0abc");
        assert_eq!(
            config.resolve_executor_state_id(&store).await.unwrap(),
            "i-0abc"
        );

        let mut vars = base_vars();
        vars.insert("EXECUTOR_STATE_ID", "executor-1");
        let config = load(&vars).unwrap();
        assert_eq!(
            config.resolve_executor_state_id(&MockParameterStore::new()).await.unwrap(),
            "executor-1"
        );
    }
}
