//! ワークキュー操作モジュール
//!
//! 非同期コマンドのワークアイテムを下流executorへ届ける。
//! - SQSキューへの送信（executorデーモン/commands Lambdaが受信）
//! - commands Lambdaの非同期呼び出し
//!
//! 配信は少なくとも1回。順序は保証しない。送信失敗は再試行せず呼び出し元に返す。

use async_trait::async_trait;
use aws_sdk_lambda::Client as LambdaClient;
use aws_sdk_lambda::operation::RequestId;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::InvocationType;
use aws_sdk_sqs::Client as SqsClient;
use thiserror::Error;
use tracing::{debug, info};

use super::config::{DispatcherConfig, WorkQueueBackend};
use crate::domain::WorkItem;

/// long pollingの待機秒数（SQSの上限）
pub const RECEIVE_WAIT_SECONDS: i32 = 20;
/// 受信したメッセージの不可視時間（秒）
pub const VISIBILITY_TIMEOUT_SECONDS: i32 = 30;

/// キュー操作のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueueError {
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Send error: {0}")]
    SendError(String),

    #[error("Receive error: {0}")]
    ReceiveError(String),

    #[error("Delete error: {0}")]
    DeleteError(String),
}

/// ワークアイテム送信トレイト
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// ワークアイテムを送信し、送信IDを返す
    async fn enqueue(&self, item: &WorkItem) -> Result<String, QueueError>;
}

fn serialize(item: &WorkItem) -> Result<String, QueueError> {
    serde_json::to_string(item).map_err(|e| QueueError::SerializationError(e.to_string()))
}

/// SQSへ送信するWorkQueue実装
#[derive(Debug, Clone)]
pub struct SqsWorkQueue {
    client: SqsClient,
    queue_url: String,
}

impl SqsWorkQueue {
    pub fn new(client: SqsClient, queue_url: String) -> Self {
        Self { client, queue_url }
    }
}

#[async_trait]
impl WorkQueue for SqsWorkQueue {
    async fn enqueue(&self, item: &WorkItem) -> Result<String, QueueError> {
        let body = serialize(item)?;

        let output = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| QueueError::SendError(e.into_service_error().to_string()))?;

        let message_id = output
            .message_id()
            .ok_or_else(|| QueueError::SendError("Missing message id".to_string()))?
            .to_string();

        info!(
            origin_interaction_id = %item.origin_interaction_id,
            command_name = %item.command_name,
            message_id = %message_id,
            "ワークアイテムをSQSへ送信"
        );
        Ok(message_id)
    }
}

/// commands Lambdaを非同期呼び出しするWorkQueue実装
#[derive(Debug, Clone)]
pub struct LambdaWorkQueue {
    client: LambdaClient,
    function_name: String,
}

impl LambdaWorkQueue {
    pub fn new(client: LambdaClient, function_name: String) -> Self {
        Self {
            client,
            function_name,
        }
    }
}

#[async_trait]
impl WorkQueue for LambdaWorkQueue {
    async fn enqueue(&self, item: &WorkItem) -> Result<String, QueueError> {
        let body = serialize(item)?;

        // Eventタイプは応答を待たずに202で返る
        let output = self
            .client
            .invoke()
            .function_name(&self.function_name)
            .invocation_type(InvocationType::Event)
            .payload(Blob::new(body.into_bytes()))
            .send()
            .await
            .map_err(|e| QueueError::SendError(e.into_service_error().to_string()))?;

        let enqueue_id = output
            .request_id()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}:{}", self.function_name, item.origin_interaction_id));

        info!(
            origin_interaction_id = %item.origin_interaction_id,
            command_name = %item.command_name,
            function_name = %self.function_name,
            status_code = output.status_code(),
            "commands Lambdaを非同期呼び出し"
        );
        Ok(enqueue_id)
    }
}

/// 設定で選択されたWorkQueue実装
#[derive(Debug, Clone)]
pub enum ConfiguredWorkQueue {
    Sqs(SqsWorkQueue),
    Lambda(LambdaWorkQueue),
}

impl ConfiguredWorkQueue {
    /// 設定に従ってAWSクライアントを作成
    pub async fn from_config(config: &DispatcherConfig) -> Self {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

        match (config.work_queue_backend(), config.command_function()) {
            (WorkQueueBackend::Lambda, Some(function_name)) => Self::Lambda(LambdaWorkQueue::new(
                LambdaClient::new(&aws_config),
                function_name.to_string(),
            )),
            // CMDFUNC未設定のlambdaバックエンドは設定読み込み時に拒否済み
            _ => Self::Sqs(SqsWorkQueue::new(
                SqsClient::new(&aws_config),
                config.queue_url().to_string(),
            )),
        }
    }
}

#[async_trait]
impl WorkQueue for ConfiguredWorkQueue {
    async fn enqueue(&self, item: &WorkItem) -> Result<String, QueueError> {
        match self {
            Self::Sqs(queue) => queue.enqueue(item).await,
            Self::Lambda(queue) => queue.enqueue(item).await,
        }
    }
}

/// 受信したメッセージ
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub message_id: String,
    /// 削除時に使用するハンドル
    pub receipt_handle: String,
    pub body: String,
}

/// ワークアイテム受信トレイト（executorデーモン用）
#[async_trait]
pub trait WorkSource: Send + Sync {
    /// メッセージを1件受信する（long polling）
    ///
    /// 待機時間内にメッセージがなければ`Ok(None)`。
    async fn receive(&self) -> Result<Option<ReceivedMessage>, QueueError>;

    /// 処理済みメッセージを削除する
    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError>;
}

/// SQSから受信するWorkSource実装
#[derive(Debug, Clone)]
pub struct SqsWorkSource {
    client: SqsClient,
    queue_url: String,
}

impl SqsWorkSource {
    pub fn new(client: SqsClient, queue_url: String) -> Self {
        Self { client, queue_url }
    }

    /// AWS設定からデフォルトのクライアントを作成
    pub async fn from_config(queue_url: String) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(SqsClient::new(&config), queue_url)
    }
}

#[async_trait]
impl WorkSource for SqsWorkSource {
    async fn receive(&self) -> Result<Option<ReceivedMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(1)
            .wait_time_seconds(RECEIVE_WAIT_SECONDS)
            .visibility_timeout(VISIBILITY_TIMEOUT_SECONDS)
            .send()
            .await
            .map_err(|e| QueueError::ReceiveError(e.into_service_error().to_string()))?;

        let Some(message) = output.messages().first() else {
            debug!("受信メッセージなし");
            return Ok(None);
        };

        let receipt_handle = message
            .receipt_handle()
            .ok_or_else(|| QueueError::ReceiveError("Missing receipt handle".to_string()))?;

        Ok(Some(ReceivedMessage {
            message_id: message.message_id().unwrap_or_default().to_string(),
            receipt_handle: receipt_handle.to_string(),
            body: message.body().unwrap_or_default().to_string(),
        }))
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::DeleteError(e.into_service_error().to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::{FollowUpTarget, WorkPayload};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// テスト用のモックWorkQueue
    #[derive(Debug, Clone, Default)]
    pub(crate) struct MockWorkQueue {
        items: Arc<Mutex<Vec<WorkItem>>>,
        next_error: Arc<Mutex<Option<QueueError>>>,
    }

    impl MockWorkQueue {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn items(&self) -> Vec<WorkItem> {
            self.items.lock().unwrap().clone()
        }

        pub(crate) fn set_next_error(&self, error: QueueError) {
            *self.next_error.lock().unwrap() = Some(error);
        }
    }

    #[async_trait]
    impl WorkQueue for MockWorkQueue {
        async fn enqueue(&self, item: &WorkItem) -> Result<String, QueueError> {
            if let Some(error) = self.next_error.lock().unwrap().take() {
                return Err(error);
            }
            let mut items = self.items.lock().unwrap();
            items.push(item.clone());
            Ok(format!("msg-{}", items.len()))
        }
    }

    /// テスト用のモックWorkSource
    #[derive(Debug, Clone, Default)]
    pub(crate) struct MockWorkSource {
        /// 受信結果を順に返す
        responses: Arc<Mutex<VecDeque<Result<Option<ReceivedMessage>, QueueError>>>>,
        deleted: Arc<Mutex<Vec<String>>>,
    }

    impl MockWorkSource {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn push_message(&self, receipt_handle: &str, body: &str) {
            self.responses.lock().unwrap().push_back(Ok(Some(ReceivedMessage {
                message_id: format!("id-{}", receipt_handle),
                receipt_handle: receipt_handle.to_string(),
                body: body.to_string(),
            })));
        }

        pub(crate) fn push_error(&self, error: QueueError) {
            self.responses.lock().unwrap().push_back(Err(error));
        }

        pub(crate) fn deleted(&self) -> Vec<String> {
            self.deleted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WorkSource for MockWorkSource {
        async fn receive(&self) -> Result<Option<ReceivedMessage>, QueueError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(None))
        }

        async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
            self.deleted
                .lock()
                .unwrap()
                .push(receipt_handle.to_string());
            Ok(())
        }
    }

    pub(crate) fn sample_item(id: &str) -> WorkItem {
        WorkItem {
            command_name: "long-task".to_string(),
            origin_interaction_id: id.to_string(),
            payload: WorkPayload {
                follow_up: FollowUpTarget::new("app-1", format!("tok-{}", id)),
                options: Default::default(),
                guild_id: None,
                user_id: None,
            },
        }
    }

    #[test]
    fn test_serialize_work_item() {
        let body = serialize(&sample_item("int-1")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(value["commandName"], "long-task");
        assert_eq!(value["originInteractionId"], "int-1");
    }

    #[test]
    fn test_queue_error_display() {
        assert_eq!(
            QueueError::SendError("throttled".to_string()).to_string(),
            "Send error: throttled"
        );
        assert_eq!(
            QueueError::ReceiveError("denied".to_string()).to_string(),
            "Receive error: denied"
        );
    }

    #[tokio::test]
    async fn test_mock_queue_records_items() {
        let queue = MockWorkQueue::new();

        assert_eq!(queue.enqueue(&sample_item("a")).await.unwrap(), "msg-1");
        assert_eq!(queue.enqueue(&sample_item("b")).await.unwrap(), "msg-2");
        assert_eq!(queue.items().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_queue_error() {
        let queue = MockWorkQueue::new();
        queue.set_next_error(QueueError::SendError("down".to_string()));

        assert!(queue.enqueue(&sample_item("a")).await.is_err());
        assert!(queue.items().is_empty());
    }

    #[tokio::test]
    async fn test_mock_source_drains_then_empty() {
        let source = MockWorkSource::new();
        source.push_message("r1", "{}");

        assert!(source.receive().await.unwrap().is_some());
        assert!(source.receive().await.unwrap().is_none());
    }
}
