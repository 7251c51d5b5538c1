/// commands Lambdaエントリポイント
///
/// 遅延実行コマンドのワークアイテムを実行し、フォローアップを送信する。
/// - SQSイベントソース: レコードごとに実行し、失敗分を`batchItemFailures`で返す
/// - 直接の非同期呼び出し（`WORK_QUEUE_BACKEND=lambda`）: ペイロードをWorkItemとして実行
use aws_lambda_events::event::sqs::{BatchItemFailure, SqsBatchResponse};
use dispatcher::application::{
    ExecutionError, ExecutionOutcome, RegistryError, WorkExecutor, default_jobs,
};
use dispatcher::domain::WorkItem;
use dispatcher::infrastructure::{
    CheckIpLookup, ConfigError, DispatcherConfig, DynamoProcessedLedger, FollowUpError,
    IpLookupError, WebhookFollowUpSender, init_logging,
};
use lambda_runtime::{Error, LambdaEvent, service_fn};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

type Executor = WorkExecutor<DynamoProcessedLedger, WebhookFollowUpSender>;

static EXECUTOR: OnceCell<Executor> = OnceCell::const_new();

/// 初期化エラー
#[derive(Debug, Error)]
enum InitError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("follow-up client error: {0}")]
    FollowUp(#[from] FollowUpError),

    #[error("ip lookup client error: {0}")]
    IpLookup(#[from] IpLookupError),

    #[error("job registry error: {0}")]
    Registry(#[from] RegistryError),
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // 構造化ログを初期化
    init_logging();

    lambda_runtime::run(service_fn(handler)).await
}

async fn executor() -> Result<&'static Executor, InitError> {
    EXECUTOR
        .get_or_try_init(|| async {
            let config = DispatcherConfig::from_env()?;
            let jobs = default_jobs(CheckIpLookup::with_default_url()?)?;
            let ledger = DynamoProcessedLedger::from_config(config.table_name().to_string()).await;
            let follow_up = WebhookFollowUpSender::new(config.follow_up_api_base())?;
            Ok(WorkExecutor::new(jobs, ledger, follow_up))
        })
        .await
}

/// Lambda関数のメインハンドラー
async fn handler(event: LambdaEvent<Value>) -> Result<Value, Error> {
    let executor = executor().await.map_err(|err| {
        error!(error = %err, "executor初期化失敗");
        Error::from(err.to_string())
    })?;

    if is_sqs_event(&event.payload) {
        let response = handle_sqs_event(executor, &event.payload).await;
        return Ok(serde_json::to_value(response)?);
    }

    let item: WorkItem = serde_json::from_value(event.payload).map_err(|err| {
        warn!(error = %err, "解釈できないペイロード");
        Error::from(format!("malformed work item: {err}"))
    })?;

    let outcome = executor.execute(&item).await?;
    info!(outcome = ?outcome, "ワークアイテム実行完了");
    Ok(json!({ "outcome": outcome_label(outcome) }))
}

fn is_sqs_event(event: &Value) -> bool {
    event
        .get("Records")
        .and_then(Value::as_array)
        .is_some_and(|records| {
            !records.is_empty()
                && records.iter().all(|record| {
                    record.get("eventSource").and_then(Value::as_str) == Some("aws:sqs")
                })
        })
}

/// SQSイベントから`(messageId, body)`を取り出す
///
/// `messageId`のないレコードは失敗として報告できないため警告して読み飛ばす。
fn sqs_records(event: &Value) -> Vec<(&str, &str)> {
    let records = event
        .get("Records")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| {
            let Some(message_id) = record
                .get("messageId")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
            else {
                warn!(index, "messageIdのないレコードを読み飛ばし");
                return None;
            };
            let body = record.get("body").and_then(Value::as_str).unwrap_or_default();
            Some((message_id, body))
        })
        .collect()
}

/// SQSレコードを順に実行し、再配信すべきメッセージIDを集める
///
/// 解釈できないレコードは再配信しても成功しないため失敗扱いにしない。
async fn handle_sqs_event(executor: &Executor, event: &Value) -> SqsBatchResponse {
    let mut response = SqsBatchResponse::default();
    for (message_id, body) in sqs_records(event) {
        match executor.execute_body(body).await {
            Ok(outcome) => info!(message_id, outcome = ?outcome, "レコード処理完了"),
            Err(ExecutionError::MalformedItem(reason)) => {
                warn!(message_id, reason = %reason, "解釈できないレコードを破棄");
            }
            Err(err) => {
                warn!(message_id, error = %err, "レコード処理失敗");
                let mut failure = BatchItemFailure::default();
                failure.item_identifier = message_id.to_string();
                response.batch_item_failures.push(failure);
            }
        }
    }
    response
}

fn outcome_label(outcome: ExecutionOutcome) -> &'static str {
    match outcome {
        ExecutionOutcome::Completed => "completed",
        ExecutionOutcome::Duplicate => "duplicate",
        ExecutionOutcome::UnknownCommand => "unknown_command",
    }
}
