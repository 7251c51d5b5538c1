/// インタラクションHTTP Lambdaエントリポイント
///
/// Lambda Function URL経由のWebhookリクエストを署名検証し、
/// 登録済みコマンドへルーティングする。
///
/// # 環境変数
/// - SSMPATH / QUEUEURL / TABLENAME（必須）
/// - PUBKEY / CMDFUNC / WORK_QUEUE_BACKEND / SIGNATURE_MAX_SKEW_SECS /
///   SYNC_HANDLER_TIMEOUT_MS / EXECUTOR_STATE_ID（任意）
use std::sync::Arc;

use dispatcher::application::{
    CommandInvoker, InteractionEndpoint, RegistryError, RequestRouter, StateIdSource,
    default_registry, error_response,
};
use dispatcher::domain::{SignatureVerifier, VerificationError};
use dispatcher::infrastructure::{
    AwsParameterStore, ConfigError, ConfiguredWorkQueue, DispatcherConfig, DynamoProcessedLedger,
    DynamoStateStore, init_logging,
};
use lambda_http::http::StatusCode;
use lambda_http::{Body, Error, Request, Response, run, service_fn};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{error, info};

/// 初期化済みエンドポイント
///
/// warm start時にSSM取得やクライアント生成を繰り返さないよう静的に保持する。
static ENDPOINT: OnceCell<InteractionEndpoint<ConfiguredWorkQueue, DynamoProcessedLedger>> =
    OnceCell::const_new();

/// 初期化エラー
#[derive(Debug, Error)]
enum InitError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("public key error: {0}")]
    PublicKey(#[from] VerificationError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // 構造化ログを初期化
    init_logging();

    info!("interactions Lambda関数を初期化");

    run(service_fn(handler)).await
}

async fn endpoint()
-> Result<&'static InteractionEndpoint<ConfiguredWorkQueue, DynamoProcessedLedger>, InitError> {
    ENDPOINT
        .get_or_try_init(|| async {
            let config = DispatcherConfig::from_env()?;
            let parameters = Arc::new(AwsParameterStore::from_config().await);

            let public_key = config.resolve_public_key(parameters.as_ref()).await?;
            let verifier = SignatureVerifier::from_hex(&public_key, config.max_skew_secs())?;

            // インスタンスIDは`status`の初回実行時に取得する
            let state_id = match config.executor_state_id() {
                Some(state_id) => StateIdSource::from(state_id),
                None => StateIdSource::Parameter {
                    parameters,
                    name: config.instance_id_parameter(),
                },
            };

            let store = DynamoStateStore::from_config(config.table_name().to_string()).await;
            let registry = default_registry(store, state_id)?;
            let ledger = DynamoProcessedLedger::from_config(config.table_name().to_string()).await;
            let queue = ConfiguredWorkQueue::from_config(&config).await;

            info!(
                backend = ?config.work_queue_backend(),
                commands = ?registry.names(),
                "エンドポイント初期化完了"
            );

            let invoker = CommandInvoker::new(queue, config.sync_handler_timeout());
            let router = RequestRouter::new(Arc::new(registry), invoker);
            Ok(InteractionEndpoint::new(verifier, router, ledger))
        })
        .await
}

async fn handler(request: Request) -> Result<Response<Body>, Error> {
    match endpoint().await {
        Ok(endpoint) => Ok(endpoint.handle(&request).await),
        Err(err) => {
            error!(error = %err, "エンドポイント初期化失敗");
            Ok(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "dispatcher is not configured",
            ))
        }
    }
}
