/// DynamoDBでエンティティ状態を管理するステートストア
///
/// `get`/`put`/`delete`のみを提供する単純なキーバリュー契約。
/// `put`はupsert（後勝ち）。バックエンドのエラーは再試行せずにそのまま返す。
use async_trait::async_trait;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_dynamodb::types::AttributeValue;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use crate::domain::StateRecord;

/// パーティションキーの属性名
pub const PARTITION_KEY: &str = "id";

/// ストレージ操作のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StorageError {
    /// DynamoDBへの書き込みに失敗
    #[error("Write error: {0}")]
    WriteError(String),

    /// DynamoDBからの読み取りに失敗
    #[error("Read error: {0}")]
    ReadError(String),

    /// 属性値の変換に失敗
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// 状態レコードの永続化トレイト
#[async_trait]
pub trait StateStore: Send + Sync {
    /// IDでレコードを取得
    ///
    /// # 戻り値
    /// * 見つかった場合は`Ok(Some(StateRecord))`
    /// * 見つからなかった場合は`Ok(None)`
    async fn get(&self, id: &str) -> Result<Option<StateRecord>, StorageError>;

    /// レコードを保存（既存レコードは置き換える）
    async fn put(&self, record: &StateRecord) -> Result<(), StorageError>;

    /// レコードを削除（存在しない場合も成功）
    async fn delete(&self, id: &str) -> Result<(), StorageError>;
}

/// StateStoreのDynamoDB実装
#[derive(Debug, Clone)]
pub struct DynamoStateStore {
    client: DynamoDbClient,
    table_name: String,
}

impl DynamoStateStore {
    pub fn new(client: DynamoDbClient, table_name: String) -> Self {
        Self { client, table_name }
    }

    /// AWS設定からデフォルトのクライアントを作成
    pub async fn from_config(table_name: String) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(DynamoDbClient::new(&config), table_name)
    }

    /// レコードをDynamoDBのアイテムに変換
    pub(crate) fn to_item(
        record: &StateRecord,
    ) -> Result<HashMap<String, AttributeValue>, StorageError> {
        let mut item = HashMap::with_capacity(record.attributes.len() + 1);
        for (name, value) in &record.attributes {
            if name == PARTITION_KEY {
                continue;
            }
            let value: AttributeValue = serde_dynamo::to_attribute_value(value)
                .map_err(|e| StorageError::SerializationError(e.to_string()))?;
            item.insert(name.clone(), value);
        }
        item.insert(
            PARTITION_KEY.to_string(),
            AttributeValue::S(record.id.clone()),
        );
        Ok(item)
    }

    /// DynamoDBのアイテムをレコードに変換
    pub(crate) fn from_item(
        mut item: HashMap<String, AttributeValue>,
    ) -> Result<StateRecord, StorageError> {
        let id = match item.remove(PARTITION_KEY) {
            Some(AttributeValue::S(id)) => id,
            _ => {
                return Err(StorageError::SerializationError(
                    "Missing id field".to_string(),
                ));
            }
        };

        let attributes = item
            .into_iter()
            .map(|(name, value)| {
                let value: Value = serde_dynamo::from_attribute_value(value)
                    .map_err(|e| StorageError::SerializationError(e.to_string()))?;
                Ok((name, value))
            })
            .collect::<Result<BTreeMap<_, _>, StorageError>>()?;

        Ok(StateRecord { id, attributes })
    }
}

#[async_trait]
impl StateStore for DynamoStateStore {
    async fn get(&self, id: &str) -> Result<Option<StateRecord>, StorageError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(PARTITION_KEY, AttributeValue::S(id.to_string()))
            .send()
            .await
            .map_err(|e| StorageError::ReadError(e.to_string()))?;

        result.item.map(Self::from_item).transpose()
    }

    async fn put(&self, record: &StateRecord) -> Result<(), StorageError> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(Self::to_item(record)?))
            .send()
            .await
            .map_err(|e| StorageError::WriteError(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key(PARTITION_KEY, AttributeValue::S(id.to_string()))
            .send()
            .await
            .map_err(|e| StorageError::WriteError(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// ユニットテスト用のモックStateStore
    #[derive(Debug, Clone, Default)]
    pub(crate) struct MockStateStore {
        records: Arc<Mutex<HashMap<String, StateRecord>>>,
        /// 書き込み操作（put/delete）の回数
        writes: Arc<Mutex<usize>>,
        /// 次の操作で返すエラー（エラーパスのテスト用）
        next_error: Arc<Mutex<Option<StorageError>>>,
    }

    impl MockStateStore {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn with_record(self, record: StateRecord) -> Self {
            self.records
                .lock()
                .unwrap()
                .insert(record.id.clone(), record);
            self
        }

        pub(crate) fn set_next_error(&self, error: StorageError) {
            *self.next_error.lock().unwrap() = Some(error);
        }

        pub(crate) fn record(&self, id: &str) -> Option<StateRecord> {
            self.records.lock().unwrap().get(id).cloned()
        }

        pub(crate) fn write_count(&self) -> usize {
            *self.writes.lock().unwrap()
        }

        fn take_error(&self) -> Option<StorageError> {
            self.next_error.lock().unwrap().take()
        }
    }

    #[async_trait]
    impl StateStore for MockStateStore {
        async fn get(&self, id: &str) -> Result<Option<StateRecord>, StorageError> {
            if let Some(error) = self.take_error() {
                return Err(error);
            }
            Ok(self.records.lock().unwrap().get(id).cloned())
        }

        async fn put(&self, record: &StateRecord) -> Result<(), StorageError> {
            if let Some(error) = self.take_error() {
                return Err(error);
            }
            *self.writes.lock().unwrap() += 1;
            self.records
                .lock()
                .unwrap()
                .insert(record.id.clone(), record.clone());
            Ok(())
        }

        async fn delete(&self, id: &str) -> Result<(), StorageError> {
            if let Some(error) = self.take_error() {
                return Err(error);
            }
            *self.writes.lock().unwrap() += 1;
            self.records.lock().unwrap().remove(id);
            Ok(())
        }
    }

    // ==================== 属性値の変換 ====================

    #[test]
    fn test_to_item_sets_partition_key() {
        let record = StateRecord::new("guild-1")
            .with_attribute("prefix", "!")
            .with_attribute("limit", 3)
            .with_attribute("enabled", true);

        let item = DynamoStateStore::to_item(&record).unwrap();
        assert_eq!(item.get("id"), Some(&AttributeValue::S("guild-1".to_string())));
        assert_eq!(item.get("prefix"), Some(&AttributeValue::S("!".to_string())));
        assert_eq!(item.get("limit"), Some(&AttributeValue::N("3".to_string())));
        assert_eq!(item.get("enabled"), Some(&AttributeValue::Bool(true)));
    }

    #[test]
    fn test_to_item_ignores_id_attribute() {
        let record = StateRecord::new("real").with_attribute("id", "shadow");
        let item = DynamoStateStore::to_item(&record).unwrap();

        assert_eq!(item.get("id"), Some(&AttributeValue::S("real".to_string())));
        assert_eq!(item.len(), 1);
    }

    #[test]
    fn test_nested_values_survive_conversion() {
        let record = StateRecord::new("user-1")
            .with_attribute("roles", json!(["admin", "mod"]))
            .with_attribute("settings", json!({"volume": 0.5, "lang": "ja", "extra": null}));

        let restored =
            DynamoStateStore::from_item(DynamoStateStore::to_item(&record).unwrap()).unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn test_large_integers_survive_conversion() {
        let record = StateRecord::new("counter")
            .with_attribute("big", json!(u64::MAX))
            .with_attribute("small", json!(i64::MIN));

        let item = DynamoStateStore::to_item(&record).unwrap();
        assert_eq!(
            item.get("big"),
            Some(&AttributeValue::N("18446744073709551615".to_string()))
        );

        let restored = DynamoStateStore::from_item(item).unwrap();
        assert_eq!(restored.attributes["big"].as_u64(), Some(u64::MAX));
        assert_eq!(restored.get_i64("small"), Some(i64::MIN));
        assert_eq!(restored, record);
    }

    #[test]
    fn test_from_item_reads_string_set() {
        let item = HashMap::from([
            ("id".to_string(), AttributeValue::S("x".to_string())),
            (
                "tags".to_string(),
                AttributeValue::Ss(vec!["a".to_string(), "b".to_string()]),
            ),
        ]);

        let record = DynamoStateStore::from_item(item).unwrap();
        assert_eq!(record.attributes["tags"], json!(["a", "b"]));
    }

    #[test]
    fn test_from_item_missing_id() {
        let item = HashMap::from([("state".to_string(), AttributeValue::S("x".to_string()))]);
        assert_eq!(
            DynamoStateStore::from_item(item),
            Err(StorageError::SerializationError("Missing id field".to_string()))
        );
    }

    #[test]
    fn test_from_item_non_string_id() {
        let item = HashMap::from([("id".to_string(), AttributeValue::N("1".to_string()))]);
        assert_eq!(
            DynamoStateStore::from_item(item),
            Err(StorageError::SerializationError("Missing id field".to_string()))
        );
    }

    #[test]
    fn test_storage_error_display() {
        assert_eq!(
            StorageError::WriteError("throttled".to_string()).to_string(),
            "Write error: throttled"
        );
        assert_eq!(
            StorageError::ReadError("timeout".to_string()).to_string(),
            "Read error: timeout"
        );
    }

    // ==================== モック ====================

    #[tokio::test]
    async fn test_mock_put_is_last_write_wins() {
        let store = MockStateStore::new();
        store
            .put(&StateRecord::new("g").with_attribute("v", 1))
            .await
            .unwrap();
        store
            .put(&StateRecord::new("g").with_attribute("v", 2))
            .await
            .unwrap();

        assert_eq!(store.get("g").await.unwrap().unwrap().get_i64("v"), Some(2));
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_delete_missing_is_ok() {
        let store = MockStateStore::new();
        assert!(store.delete("nothing").await.is_ok());
        assert!(store.get("nothing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mock_error_surfaces_once() {
        let store = MockStateStore::new();
        store.set_next_error(StorageError::ReadError("boom".to_string()));

        assert_eq!(
            store.get("a").await,
            Err(StorageError::ReadError("boom".to_string()))
        );
        assert_eq!(store.get("a").await, Ok(None));
    }
}
