/// 組み込みコマンド
///
/// | コマンド | 実行方式 | 内容 |
/// |---|---|---|
/// | `ping` | 同期 | `pong`を返す |
/// | `status` | 同期 | executorのハートビートから稼働状態を返す |
/// | `showip` | 非同期 | executorホストの公開IPを返す |
/// | `long-task` | 非同期 | オプションをそのまま返す |
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use super::command_registry::{
    CommandDescriptor, CommandHandler, CommandRegistry, HandlerError, RegistryError,
};
use crate::domain::{CommandResult, InstanceStatus, Interaction};
use crate::infrastructure::{ParameterStore, SsmOpsError, StateStore};

pub const PING_COMMAND: &str = "ping";
pub const STATUS_COMMAND: &str = "status";
pub const SHOW_IP_COMMAND: &str = "showip";
pub const LONG_TASK_COMMAND: &str = "long-task";

pub struct PingCommand;

#[async_trait]
impl CommandHandler for PingCommand {
    async fn execute(&self, _interaction: &Interaction) -> Result<CommandResult, HandlerError> {
        Ok(CommandResult::message("pong"))
    }
}

/// executorハートビートのレコードIDの取得元
pub enum StateIdSource {
    /// 固定値
    Fixed(String),
    /// SSMパラメータ（初回の`status`実行時に取得）
    Parameter {
        parameters: Arc<dyn ParameterStore>,
        name: String,
    },
}

impl StateIdSource {
    async fn resolve(&self) -> Result<String, SsmOpsError> {
        match self {
            Self::Fixed(state_id) => Ok(state_id.clone()),
            Self::Parameter { parameters, name } => {
                info!(parameter = %name, "インスタンスIDをSSMから取得");
                parameters.get_parameter(name, false).await
            }
        }
    }
}

impl From<&str> for StateIdSource {
    fn from(state_id: &str) -> Self {
        Self::Fixed(state_id.to_string())
    }
}

impl From<String> for StateIdSource {
    fn from(state_id: String) -> Self {
        Self::Fixed(state_id)
    }
}

/// executorのハートビートレコードを読んで稼働状態を返す
///
/// レコードIDは初回実行時に解決してキャッシュする。解決に失敗した場合は
/// キャッシュせず、稼働状態を不明として返す。
pub struct StatusCommand<S>
where
    S: StateStore,
{
    store: S,
    source: StateIdSource,
    state_id: OnceCell<String>,
}

impl<S> StatusCommand<S>
where
    S: StateStore,
{
    pub fn new(store: S, source: impl Into<StateIdSource>) -> Self {
        Self {
            store,
            source: source.into(),
            state_id: OnceCell::new(),
        }
    }

    async fn state_id(&self) -> Result<&str, SsmOpsError> {
        let state_id = self
            .state_id
            .get_or_try_init(|| self.source.resolve())
            .await?;
        Ok(state_id.as_str())
    }
}

#[async_trait]
impl<S> CommandHandler for StatusCommand<S>
where
    S: StateStore,
{
    async fn execute(&self, interaction: &Interaction) -> Result<CommandResult, HandlerError> {
        let status = match self.state_id().await {
            Ok(state_id) => {
                let record = self.store.get(state_id).await?;
                InstanceStatus::from_record(record.as_ref(), interaction.issued_at)
            }
            Err(err) => {
                warn!(error = %err, "executorのレコードIDを解決できません");
                InstanceStatus::Unknown
            }
        };

        let content = match &status {
            InstanceStatus::Running { updated_at } => format!(
                "executor is running (last heartbeat: {})",
                updated_at.as_deref().unwrap_or("-")
            ),
            InstanceStatus::Stale { updated_at } => format!(
                "executor is not responding (last heartbeat: {})",
                updated_at.as_deref().unwrap_or("-")
            ),
            InstanceStatus::Unknown => "executor status is unknown".to_string(),
        };
        Ok(CommandResult::message(content))
    }
}

/// 組み込みコマンドを登録したレジストリを作成
pub fn default_registry<S>(
    store: S,
    executor_state_id: impl Into<StateIdSource>,
) -> Result<CommandRegistry, RegistryError>
where
    S: StateStore + 'static,
{
    CommandRegistry::from_descriptors([
        CommandDescriptor::inline(PING_COMMAND, PingCommand),
        CommandDescriptor::inline(STATUS_COMMAND, StatusCommand::new(store, executor_state_id)),
        CommandDescriptor::deferred(SHOW_IP_COMMAND),
        CommandDescriptor::deferred(LONG_TASK_COMMAND),
    ])
}
