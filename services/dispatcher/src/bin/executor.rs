/// executorデーモン
///
/// 常駐ホスト上でSQSキューをlong pollingし、遅延実行コマンドを実行する。
/// 実行中はステートテーブルへハートビートを書き込み、`status`コマンドの判定に使わせる。
///
/// # 使用方法
/// ```bash
/// export SSMPATH=/dispatcher QUEUEURL=https://sqs... TABLENAME=dispatcher-state
/// cargo run --bin executor
///
/// # キューとハートビートIDを上書き
/// cargo run --bin executor -- --queue-url https://sqs... --state-id i-0123456789
/// ```
use clap::Parser;
use dispatcher::application::{ExecutorLoop, WorkExecutor, default_jobs};
use dispatcher::infrastructure::{
    AwsParameterStore, CheckIpLookup, DispatcherConfig, DynamoProcessedLedger, DynamoStateStore,
    SqsWorkSource, WebhookFollowUpSender, init_logging,
};
use tracing::{error, info};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// コマンドライン引数
#[derive(Parser, Debug)]
#[command(name = "executor")]
#[command(about = "遅延実行コマンドをキューから受信して実行")]
struct CliArgs {
    /// 受信するキューURL（環境変数QUEUEURLより優先）
    #[arg(long, short = 'q')]
    queue_url: Option<String>,

    /// ハートビートのレコードID（環境変数EXECUTOR_STATE_IDとSSMより優先）
    #[arg(long, short = 's')]
    state_id: Option<String>,

    /// 公開IP取得先URL
    #[arg(long)]
    check_ip_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // 構造化ログを初期化
    init_logging();

    let args = CliArgs::parse();
    let config = DispatcherConfig::from_env()?;

    let state_id = match args.state_id {
        Some(state_id) => state_id,
        None => {
            let parameters = AwsParameterStore::from_config().await;
            config.resolve_executor_state_id(&parameters).await?
        }
    };
    let queue_url = args
        .queue_url
        .unwrap_or_else(|| config.queue_url().to_string());

    let ip_lookup = match args.check_ip_url {
        Some(url) => CheckIpLookup::new(url)?,
        None => CheckIpLookup::with_default_url()?,
    };
    let executor = WorkExecutor::new(
        default_jobs(ip_lookup)?,
        DynamoProcessedLedger::from_config(config.table_name().to_string()).await,
        WebhookFollowUpSender::new(config.follow_up_api_base())?,
    );

    let source = SqsWorkSource::from_config(queue_url.clone()).await;
    let store = DynamoStateStore::from_config(config.table_name().to_string()).await;

    info!(queue_url = %queue_url, state_id = %state_id, "executorデーモン起動");

    let mut executor_loop = ExecutorLoop::new(source, store, executor, state_id);
    executor_loop.run(shutdown_signal()).await;

    info!("executorデーモン停止");
    Ok(())
}

/// Ctrl+Cを待つ
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "シグナルハンドラー登録失敗");
        std::future::pending::<()>().await;
    }
}
