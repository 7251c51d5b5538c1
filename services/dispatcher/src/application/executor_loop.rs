/// executorデーモンのポーリングループ
///
/// キューをlong pollingで1件ずつ受信して実行し、定期的に
/// ハートビートをステートストアへ書き込む。
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::work_executor::{ExecutionError, ExecutionOutcome, WorkExecutor};
use crate::domain::StateRecord;
use crate::infrastructure::{
    FollowUpSender, ProcessedLedger, QueueError, ReceivedMessage, StateStore, WorkSource,
};

/// ハートビートの書き込み間隔
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3 * 60);

/// 受信エラー後の待機時間
pub const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// 1回のポーリングの結果
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// メッセージなし
    Idle,
    /// 実行してメッセージを削除した
    Processed(ExecutionOutcome),
    /// 解釈できないメッセージを削除した
    Discarded,
    /// 実行に失敗したため再配信を待つ
    Retry,
    /// 受信に失敗した
    ReceiveFailed,
}

pub struct ExecutorLoop<W, S, P, F>
where
    W: WorkSource,
    S: StateStore,
    P: ProcessedLedger,
    F: FollowUpSender,
{
    source: W,
    store: S,
    executor: WorkExecutor<P, F>,
    /// ハートビートのレコードID
    state_id: String,
    receive_error_backoff: Duration,
    last_heartbeat: Option<Instant>,
}

impl<W, S, P, F> ExecutorLoop<W, S, P, F>
where
    W: WorkSource,
    S: StateStore,
    P: ProcessedLedger,
    F: FollowUpSender,
{
    pub fn new(
        source: W,
        store: S,
        executor: WorkExecutor<P, F>,
        state_id: impl Into<String>,
    ) -> Self {
        Self {
            source,
            store,
            executor,
            state_id: state_id.into(),
            receive_error_backoff: RECEIVE_ERROR_BACKOFF,
            last_heartbeat: None,
        }
    }

    pub fn with_receive_error_backoff(mut self, backoff: Duration) -> Self {
        self.receive_error_backoff = backoff;
        self
    }

    /// 停止シグナルを受けるまでポーリングを続ける
    ///
    /// 停止シグナルは受信待ちの間だけ確認する。受信したメッセージは
    /// 実行と削除を終えてからループを抜ける。
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        info!(state_id = %self.state_id, "executorループ開始");

        loop {
            self.heartbeat_if_due(Instant::now()).await;

            let received = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("停止シグナル受信");
                    break;
                }
                received = self.source.receive() => received,
            };
            self.handle_received(received).await;
        }
    }

    /// ハートビートを確認してから1件ポーリングする
    pub async fn run_once(&mut self) -> PollOutcome {
        self.heartbeat_if_due(Instant::now()).await;

        let received = self.source.receive().await;
        self.handle_received(received).await
    }

    async fn handle_received(
        &self,
        received: Result<Option<ReceivedMessage>, QueueError>,
    ) -> PollOutcome {
        let message = match received {
            Ok(Some(message)) => message,
            Ok(None) => return PollOutcome::Idle,
            Err(err) => {
                error!(error = %err, "メッセージ受信エラー");
                tokio::time::sleep(self.receive_error_backoff).await;
                return PollOutcome::ReceiveFailed;
            }
        };

        debug!(message_id = %message.message_id, "メッセージ受信");

        let outcome = match self.executor.execute_body(&message.body).await {
            Ok(outcome) => PollOutcome::Processed(outcome),
            Err(ExecutionError::MalformedItem(reason)) => {
                warn!(
                    message_id = %message.message_id,
                    reason = %reason,
                    "解釈できないメッセージを破棄"
                );
                PollOutcome::Discarded
            }
            Err(err) => {
                // 削除しなければ不可視時間の経過後に再配信される
                warn!(message_id = %message.message_id, error = %err, "実行失敗");
                return PollOutcome::Retry;
            }
        };

        if let Err(err) = self.source.delete(&message.receipt_handle).await {
            warn!(message_id = %message.message_id, error = %err, "メッセージ削除失敗");
        }
        outcome
    }

    /// 前回から間隔が空いていればハートビートを書き込む
    ///
    /// 書き込みに失敗した場合は次のポーリングで再試行する。
    pub async fn heartbeat_if_due(&mut self, now: Instant) -> bool {
        let due = self
            .last_heartbeat
            .is_none_or(|last| now.duration_since(last) >= HEARTBEAT_INTERVAL);
        if !due {
            return false;
        }

        let wall_clock = chrono::Utc::now();
        let record =
            StateRecord::heartbeat(&self.state_id, wall_clock.timestamp(), wall_clock.to_rfc3339());

        match self.store.put(&record).await {
            Ok(()) => {
                debug!(state_id = %self.state_id, "ハートビート書き込み");
                self.last_heartbeat = Some(now);
                true
            }
            Err(err) => {
                warn!(state_id = %self.state_id, error = %err, "ハートビート書き込み失敗");
                false
            }
        }
    }
}
