/// ワークアイテム実行
///
/// commands Lambdaとexecutorデーモンで共有する下流側の処理。
/// 1. 処理済み台帳にリース付きで登録し、再配信を検出
/// 2. コマンド名でジョブを引いて実行
/// 3. 結果をフォローアップで送信し、台帳に完了を記録
///
/// 失敗時は台帳の登録を取り消し、キューによる再配信に任せる。
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use super::builtin_commands::{LONG_TASK_COMMAND, SHOW_IP_COMMAND};
use super::command_registry::RegistryError;
use crate::domain::WorkItem;
use crate::infrastructure::{
    ClaimResult, FollowUpError, FollowUpSender, IpLookup, IpLookupError, ProcessedLedger,
    StorageError,
};

/// ジョブのエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum JobError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("IP lookup failed: {0}")]
    IpLookup(#[from] IpLookupError),

    #[error("{0}")]
    Failed(String),
}

/// 遅延実行されるジョブ
///
/// 戻り値はフォローアップで送信するメッセージ本文。
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, item: &WorkItem) -> Result<String, JobError>;
}

/// コマンド名からジョブを引く
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: HashMap<String, Arc<dyn JobHandler>>,
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.jobs.keys().collect();
        names.sort();
        f.debug_struct("JobRegistry").field("jobs", &names).finish()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// ジョブを登録する（同名は先勝ち）
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: impl JobHandler + 'static,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.jobs.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        self.jobs.insert(name, Arc::new(handler));
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&Arc<dyn JobHandler>> {
        self.jobs.get(name)
    }
}

/// executorホストの公開IPを返すジョブ
pub struct ShowIpJob<L>
where
    L: IpLookup,
{
    lookup: L,
}

impl<L> ShowIpJob<L>
where
    L: IpLookup,
{
    pub fn new(lookup: L) -> Self {
        Self { lookup }
    }
}

#[async_trait]
impl<L> JobHandler for ShowIpJob<L>
where
    L: IpLookup,
{
    async fn run(&self, _item: &WorkItem) -> Result<String, JobError> {
        let ip = self.lookup.public_ip().await?;
        Ok(format!("public IP: {}", ip))
    }
}

/// オプションをそのまま返すジョブ
pub struct EchoJob;

#[async_trait]
impl JobHandler for EchoJob {
    async fn run(&self, item: &WorkItem) -> Result<String, JobError> {
        if item.payload.options.is_empty() {
            return Ok(format!("{} completed", item.command_name));
        }

        let options: Vec<String> = item
            .payload
            .options
            .iter()
            .map(|(name, value)| match value.as_str() {
                Some(s) => format!("{}={}", name, s),
                None => format!("{}={}", name, value),
            })
            .collect();
        Ok(format!(
            "{} completed: {}",
            item.command_name,
            options.join(", ")
        ))
    }
}

/// 台帳登録のリース期間
///
/// キューの不可視時間より長くし、実行中の再配信を`InProgress`で退ける。
pub const DEFAULT_WORK_LEASE: Duration = Duration::from_secs(5 * 60);

/// 組み込みジョブを登録したレジストリを作成
pub fn default_jobs<L>(ip_lookup: L) -> Result<JobRegistry, RegistryError>
where
    L: IpLookup + 'static,
{
    let mut jobs = JobRegistry::new();
    jobs.register(SHOW_IP_COMMAND, ShowIpJob::new(ip_lookup))?;
    jobs.register(LONG_TASK_COMMAND, EchoJob)?;
    Ok(jobs)
}

/// 実行結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// ジョブを実行し結果を送信した
    Completed,
    /// 再配信のため何もしなかった
    Duplicate,
    /// 未登録のコマンド（エラーメッセージを送信済み）
    UnknownCommand,
}

/// 実行のエラー型
///
/// いずれもキューに再配信させるべき失敗。
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("malformed work item: {0}")]
    MalformedItem(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] StorageError),

    #[error("work item is in progress elsewhere: {0}")]
    InProgress(String),

    #[error("job `{command}` failed: {source}")]
    Job { command: String, source: JobError },

    #[error("follow-up delivery failed: {0}")]
    FollowUp(#[from] FollowUpError),
}

pub struct WorkExecutor<P, F>
where
    P: ProcessedLedger,
    F: FollowUpSender,
{
    jobs: JobRegistry,
    ledger: P,
    follow_up: F,
    lease: Duration,
}

impl<P, F> WorkExecutor<P, F>
where
    P: ProcessedLedger,
    F: FollowUpSender,
{
    pub fn new(jobs: JobRegistry, ledger: P, follow_up: F) -> Self {
        Self {
            jobs,
            ledger,
            follow_up,
            lease: DEFAULT_WORK_LEASE,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// キューのメッセージ本文をパースして実行する
    pub async fn execute_body(&self, body: &str) -> Result<ExecutionOutcome, ExecutionError> {
        let item: WorkItem = serde_json::from_str(body)
            .map_err(|e| ExecutionError::MalformedItem(e.to_string()))?;
        self.execute(&item).await
    }

    /// ワークアイテムを実行する
    pub async fn execute(&self, item: &WorkItem) -> Result<ExecutionOutcome, ExecutionError> {
        let key = item.dedup_key();

        match self.ledger.claim(&key, self.lease).await? {
            ClaimResult::Claimed => {}
            ClaimResult::AlreadyProcessed => {
                info!(
                    origin_interaction_id = %item.origin_interaction_id,
                    command_name = %item.command_name,
                    "処理済みのワークアイテム（再配信）"
                );
                return Ok(ExecutionOutcome::Duplicate);
            }
            ClaimResult::InProgress => {
                info!(
                    origin_interaction_id = %item.origin_interaction_id,
                    command_name = %item.command_name,
                    "別の実行が処理中"
                );
                return Err(ExecutionError::InProgress(key));
            }
        }

        let result = self.run_and_deliver(item).await;
        match &result {
            Ok(_) => {
                // 送信済みのため、記録に失敗してもリース切れまで再実行されない
                if let Err(err) = self.ledger.complete(&key).await {
                    error!(key = %key, error = %err, "台帳の完了記録に失敗");
                }
            }
            Err(_) => {
                // 再配信時に再実行できるよう登録を取り消す
                if let Err(err) = self.ledger.release(&key).await {
                    error!(key = %key, error = %err, "台帳の登録取り消しに失敗");
                }
            }
        }
        result
    }

    async fn run_and_deliver(&self, item: &WorkItem) -> Result<ExecutionOutcome, ExecutionError> {
        let target = &item.payload.follow_up;

        let Some(job) = self.jobs.lookup(&item.command_name) else {
            warn!(
                origin_interaction_id = %item.origin_interaction_id,
                command_name = %item.command_name,
                "未登録のジョブ"
            );
            self.follow_up
                .send(target, &format!("unknown command: `{}`", item.command_name))
                .await?;
            return Ok(ExecutionOutcome::UnknownCommand);
        };

        match job.run(item).await {
            Ok(content) => {
                self.follow_up.send(target, &content).await?;
                info!(
                    origin_interaction_id = %item.origin_interaction_id,
                    command_name = %item.command_name,
                    "ジョブ完了"
                );
                Ok(ExecutionOutcome::Completed)
            }
            Err(err) => {
                error!(
                    origin_interaction_id = %item.origin_interaction_id,
                    command_name = %item.command_name,
                    error = %err,
                    "ジョブ失敗"
                );
                let message = format!("command `{}` failed: {}", item.command_name, err);
                if let Err(send_err) = self.follow_up.send(target, &message).await {
                    warn!(error = %send_err, "エラーメッセージの送信に失敗");
                }
                Err(ExecutionError::Job {
                    command: item.command_name.clone(),
                    source: err,
                })
            }
        }
    }
}
