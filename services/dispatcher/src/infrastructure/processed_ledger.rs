/// 処理済み台帳
///
/// キューは少なくとも1回の配信を保証するのみのため、キーへの条件付き書き込みで
/// 再配信や再送を検出する。レコードは2状態を持つ。
/// - `in_progress`: 処理中。リース期限を過ぎれば別の実行が引き継げる
/// - `completed`: 結果の送信まで完了した
///
/// 台帳レコードはステートストアと同じテーブルに置き、TTLで自動削除させる。
use async_trait::async_trait;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::state_store::{PARTITION_KEY, StorageError};

/// 台帳レコードの保持期間（24時間を秒で）
pub const LEDGER_TTL_SECONDS: i64 = 24 * 60 * 60;

const ATTR_STATUS: &str = "status";
const ATTR_LEASE_UNTIL: &str = "lease_until";
const ATTR_CLAIMED_AT: &str = "claimed_at";
const ATTR_TTL: &str = "ttl";

const STATUS_IN_PROGRESS: &str = "in_progress";
const STATUS_COMPLETED: &str = "completed";

/// 台帳への登録結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimResult {
    /// 登録した（初回、またはリース切れの引き継ぎ）
    Claimed,
    /// 別の実行がリース期限内で処理中
    InProgress,
    /// 処理完了済み
    AlreadyProcessed,
}

/// 処理済み台帳トレイト
#[async_trait]
pub trait ProcessedLedger: Send + Sync {
    /// キーを処理中として登録する
    ///
    /// `lease`の間は他の実行からの登録を`InProgress`で拒否する。
    async fn claim(&self, key: &str, lease: Duration) -> Result<ClaimResult, StorageError>;

    /// 処理完了を記録する
    async fn complete(&self, key: &str) -> Result<(), StorageError>;

    /// 登録を取り消す（処理失敗時に再配信を受け付けるため）
    async fn release(&self, key: &str) -> Result<(), StorageError>;
}

/// ProcessedLedgerのDynamoDB実装
#[derive(Debug, Clone)]
pub struct DynamoProcessedLedger {
    client: DynamoDbClient,
    table_name: String,
}

impl DynamoProcessedLedger {
    pub fn new(client: DynamoDbClient, table_name: String) -> Self {
        Self { client, table_name }
    }

    /// AWS設定からデフォルトのクライアントを作成
    pub async fn from_config(table_name: String) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(DynamoDbClient::new(&config), table_name)
    }

    fn calculate_ttl(now: i64) -> i64 {
        now + LEDGER_TTL_SECONDS
    }

    fn lease_until(now: i64, lease: Duration) -> i64 {
        let lease_secs = i64::try_from(lease.as_secs()).unwrap_or(LEDGER_TTL_SECONDS);
        now.saturating_add(lease_secs.max(1))
    }

    /// 条件付き書き込みに失敗したときの既存レコードから結果を判定
    ///
    /// 読み取りまでに消えていた場合は処理中として扱い、再配信に任せる。
    fn classify_existing(item: Option<&HashMap<String, AttributeValue>>) -> ClaimResult {
        let status = item
            .and_then(|item| item.get(ATTR_STATUS))
            .and_then(|value| value.as_s().ok());

        match (item, status) {
            (None, _) => ClaimResult::InProgress,
            (Some(_), Some(status)) if status == STATUS_IN_PROGRESS => ClaimResult::InProgress,
            (Some(_), _) => ClaimResult::AlreadyProcessed,
        }
    }
}

#[async_trait]
impl ProcessedLedger for DynamoProcessedLedger {
    async fn claim(&self, key: &str, lease: Duration) -> Result<ClaimResult, StorageError> {
        let now = chrono::Utc::now().timestamp();

        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .item(PARTITION_KEY, AttributeValue::S(key.to_string()))
            .item(ATTR_STATUS, AttributeValue::S(STATUS_IN_PROGRESS.to_string()))
            .item(
                ATTR_LEASE_UNTIL,
                AttributeValue::N(Self::lease_until(now, lease).to_string()),
            )
            .item(ATTR_CLAIMED_AT, AttributeValue::N(now.to_string()))
            .item(
                ATTR_TTL,
                AttributeValue::N(Self::calculate_ttl(now).to_string()),
            )
            .condition_expression(
                "attribute_not_exists(id) OR (#status = :in_progress AND #lease_until < :now)",
            )
            .expression_attribute_names("#status", ATTR_STATUS)
            .expression_attribute_names("#lease_until", ATTR_LEASE_UNTIL)
            .expression_attribute_values(
                ":in_progress",
                AttributeValue::S(STATUS_IN_PROGRESS.to_string()),
            )
            .expression_attribute_values(":now", AttributeValue::N(now.to_string()))
            .send()
            .await;

        let service_error = match result {
            Ok(_) => return Ok(ClaimResult::Claimed),
            Err(err) => err.into_service_error(),
        };
        if !service_error.is_conditional_check_failed_exception() {
            return Err(StorageError::WriteError(service_error.to_string()));
        }

        let existing = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(PARTITION_KEY, AttributeValue::S(key.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| StorageError::ReadError(e.to_string()))?;

        let claim = Self::classify_existing(existing.item());
        debug!(key = %key, result = ?claim, "台帳登録済み");
        Ok(claim)
    }

    async fn complete(&self, key: &str) -> Result<(), StorageError> {
        let now = chrono::Utc::now().timestamp();

        self.client
            .update_item()
            .table_name(&self.table_name)
            .key(PARTITION_KEY, AttributeValue::S(key.to_string()))
            .update_expression("SET #status = :completed, #ttl = :ttl REMOVE #lease_until")
            .expression_attribute_names("#status", ATTR_STATUS)
            .expression_attribute_names("#ttl", ATTR_TTL)
            .expression_attribute_names("#lease_until", ATTR_LEASE_UNTIL)
            .expression_attribute_values(
                ":completed",
                AttributeValue::S(STATUS_COMPLETED.to_string()),
            )
            .expression_attribute_values(
                ":ttl",
                AttributeValue::N(Self::calculate_ttl(now).to_string()),
            )
            .send()
            .await
            .map_err(|e| StorageError::WriteError(e.to_string()))?;

        Ok(())
    }

    async fn release(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key(PARTITION_KEY, AttributeValue::S(key.to_string()))
            .send()
            .await
            .map_err(|e| StorageError::WriteError(e.to_string()))?;

        Ok(())
    }
}
