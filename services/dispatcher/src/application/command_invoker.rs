/// コマンド実行
///
/// 同期コマンドは応答期限内にその場で実行し、非同期コマンドは
/// ワークアイテムをキューに送信して遅延応答を返す。
use std::time::Duration;
use tracing::{error, info, warn};

use super::command_registry::{CommandDescriptor, Execution};
use crate::domain::{CommandResult, Interaction, WorkItem};
use crate::infrastructure::WorkQueue;

pub struct CommandInvoker<Q>
where
    Q: WorkQueue,
{
    queue: Q,
    /// 同期ハンドラーの実行時間上限
    sync_timeout: Duration,
}

impl<Q> CommandInvoker<Q>
where
    Q: WorkQueue,
{
    pub fn new(queue: Q, sync_timeout: Duration) -> Self {
        Self {
            queue,
            sync_timeout,
        }
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// コマンドを実行する
    ///
    /// どの経路でも必ず`CommandResult`を返す。
    /// - 同期: ハンドラーのエラー・タイムアウトは`Failed`に変換する
    /// - 非同期: 送信成功で`Deferred`、送信失敗は再試行せず`Failed`
    pub async fn invoke(
        &self,
        descriptor: &CommandDescriptor,
        interaction: &Interaction,
    ) -> CommandResult {
        match descriptor.execution() {
            Execution::Inline(handler) => {
                match tokio::time::timeout(self.sync_timeout, handler.execute(interaction)).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(err)) => {
                        warn!(
                            interaction_id = %interaction.id,
                            command_name = %descriptor.name(),
                            error = %err,
                            "コマンド実行エラー"
                        );
                        CommandResult::failed(format!(
                            "command `{}` failed: {}",
                            descriptor.name(),
                            err
                        ))
                    }
                    Err(_) => {
                        warn!(
                            interaction_id = %interaction.id,
                            command_name = %descriptor.name(),
                            timeout_ms = self.sync_timeout.as_millis() as u64,
                            "コマンド実行タイムアウト"
                        );
                        CommandResult::failed(format!(
                            "command `{}` timed out after {}ms",
                            descriptor.name(),
                            self.sync_timeout.as_millis()
                        ))
                    }
                }
            }
            Execution::Deferred => self.defer(descriptor, interaction).await,
        }
    }

    async fn defer(&self, descriptor: &CommandDescriptor, interaction: &Interaction) -> CommandResult {
        let Some(item) = WorkItem::from_interaction(descriptor.name(), interaction) else {
            // パース時に検証済みのため通常は到達しない
            error!(
                interaction_id = %interaction.id,
                "フォローアップ送信先がないため遅延実行できません"
            );
            return CommandResult::failed(format!(
                "command `{}` cannot be deferred",
                descriptor.name()
            ));
        };

        match self.queue.enqueue(&item).await {
            Ok(enqueue_id) => {
                info!(
                    interaction_id = %interaction.id,
                    command_name = %descriptor.name(),
                    enqueue_id = %enqueue_id,
                    "ワークアイテムを送信"
                );
                CommandResult::deferred()
            }
            Err(err) => {
                error!(
                    interaction_id = %interaction.id,
                    command_name = %descriptor.name(),
                    error = %err,
                    "ワークアイテムの送信に失敗"
                );
                CommandResult::failed(format!(
                    "failed to schedule `{}`: {}",
                    descriptor.name(),
                    err
                ))
            }
        }
    }
}
