/// リクエストルーター
///
/// 署名検証済みのボディをインタラクションにパースし、種別ごとに振り分ける。
/// - Ping: レジストリを参照せずにPongを返す
/// - それ以外: ルーティングキーでレジストリを引き、CommandInvokerに委譲する
use std::sync::Arc;
use tracing::{Instrument, info, info_span, warn};

use super::command_invoker::CommandInvoker;
use super::command_registry::CommandRegistry;
use crate::domain::{CommandResult, Interaction, InteractionKind, InteractionParseError};
use crate::infrastructure::WorkQueue;

pub struct RequestRouter<Q>
where
    Q: WorkQueue,
{
    registry: Arc<CommandRegistry>,
    invoker: CommandInvoker<Q>,
}

impl<Q> RequestRouter<Q>
where
    Q: WorkQueue,
{
    pub fn new(registry: Arc<CommandRegistry>, invoker: CommandInvoker<Q>) -> Self {
        Self { registry, invoker }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn invoker(&self) -> &CommandInvoker<Q> {
        &self.invoker
    }

    /// ボディをパースして振り分ける（受信時刻は現在時刻）
    pub async fn route(
        &self,
        raw_body: &[u8],
    ) -> Result<(Interaction, CommandResult), InteractionParseError> {
        self.route_at(raw_body, chrono::Utc::now().timestamp()).await
    }

    /// ボディをパースして振り分ける
    ///
    /// # 戻り値
    /// * `Ok((Interaction, CommandResult))` - 未登録コマンドも`Failed`として含む
    /// * `Err(InteractionParseError)` - ペイロード不正
    pub async fn route_at(
        &self,
        raw_body: &[u8],
        issued_at: i64,
    ) -> Result<(Interaction, CommandResult), InteractionParseError> {
        let interaction = Interaction::parse(raw_body, issued_at)?;
        let result = self.dispatch(&interaction).await;
        Ok((interaction, result))
    }

    /// パース済みのインタラクションを振り分ける
    pub async fn dispatch(&self, interaction: &Interaction) -> CommandResult {
        let span = info_span!(
            "interaction",
            interaction_id = %interaction.id,
            interaction_type = interaction.interaction_type().as_str(),
            command_name = interaction.route_key().unwrap_or("")
        );

        async {
            let result = match (&interaction.kind, interaction.route_key()) {
                (InteractionKind::Ping, _) => CommandResult::pong(),
                (_, None) => CommandResult::failed("interaction has no routable command"),
                (_, Some(key)) => match self.registry.lookup(key) {
                    Some(descriptor) => self.invoker.invoke(descriptor, interaction).await,
                    None => {
                        warn!("未登録のコマンド");
                        CommandResult::unknown_command(key)
                    }
                },
            };

            info!(status = result.status.as_str(), "インタラクション処理完了");
            result
        }
        .instrument(span)
        .await
    }
}
