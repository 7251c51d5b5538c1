/// 遅延実行されるワークアイテム
///
/// 下流executorはレジストリを共有しないため、フォローアップの再構築に
/// 必要な情報（インタラクションID、コマンド名、送信先）をすべて自身に含める。
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::interaction::Interaction;

/// 処理済み台帳のキー接頭辞
const DEDUP_KEY_PREFIX: &str = "work#";

/// フォローアップ送信先
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpTarget {
    pub application_id: String,
    pub token: String,
}

impl FollowUpTarget {
    pub fn new(application_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            token: token.into(),
        }
    }
}

/// ワークアイテムのペイロード
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkPayload {
    /// 結果の送信先
    pub follow_up: FollowUpTarget,
    /// コマンドオプション
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// キュー経由で下流executorに渡される作業単位
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub command_name: String,
    pub origin_interaction_id: String,
    pub payload: WorkPayload,
}

impl WorkItem {
    /// インタラクションからワークアイテムを作成
    ///
    /// フォローアップ送信先を持たないインタラクション（Ping等）からは作成できない。
    pub fn from_interaction(command_name: &str, interaction: &Interaction) -> Option<Self> {
        let follow_up = interaction.follow_up_target()?;

        Some(Self {
            command_name: command_name.to_string(),
            origin_interaction_id: interaction.id.clone(),
            payload: WorkPayload {
                follow_up,
                options: interaction.options(),
                guild_id: interaction.guild_id.clone(),
                user_id: interaction.user_id.clone(),
            },
        })
    }

    /// 再配信の重複排除に使うキー
    pub fn dedup_key(&self) -> String {
        format!("{}{}", DEDUP_KEY_PREFIX, self.origin_interaction_id)
    }

    /// オプションを文字列として取得
    pub fn option_str(&self, name: &str) -> Option<&str> {
        self.payload.options.get(name).and_then(|v| v.as_str())
    }
}
