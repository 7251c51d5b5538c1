/// コマンド実行結果
///
/// ペイロードはWebhookレスポンスのボディとしてそのまま返却される。
use serde_json::{Value, json};

/// レスポンス種別: PONG
const RESPONSE_PONG: u8 = 1;
/// レスポンス種別: メッセージ付き応答
const RESPONSE_CHANNEL_MESSAGE: u8 = 4;
/// レスポンス種別: 遅延応答（結果はフォローアップで届ける）
const RESPONSE_DEFERRED_CHANNEL_MESSAGE: u8 = 5;
/// 実行ユーザーにのみ表示するメッセージフラグ
const FLAG_EPHEMERAL: u64 = 64;

/// 実行ステータス
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Ok,
    Deferred,
    Failed,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Ok => "ok",
            CommandStatus::Deferred => "deferred",
            CommandStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    /// 実行ステータス
    pub status: CommandStatus,
    /// レスポンスボディ
    pub payload: Value,
    /// フォローアップでの結果送信が必要か
    pub follow_up_required: bool,
}

impl CommandResult {
    /// Pingへの応答
    pub fn pong() -> Self {
        Self {
            status: CommandStatus::Ok,
            payload: json!({ "type": RESPONSE_PONG }),
            follow_up_required: false,
        }
    }

    /// メッセージ付きの成功応答
    pub fn message(content: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Ok,
            payload: json!({
                "type": RESPONSE_CHANNEL_MESSAGE,
                "data": { "content": content.into() }
            }),
            follow_up_required: false,
        }
    }

    /// 遅延応答（結果はフォローアップチャネルで届ける）
    pub fn deferred() -> Self {
        Self {
            status: CommandStatus::Deferred,
            payload: json!({ "type": RESPONSE_DEFERRED_CHANNEL_MESSAGE }),
            follow_up_required: true,
        }
    }

    /// 処理済みインタラクションの再送への応答
    ///
    /// 新たな結果は生成せず、受信済みであることだけを返す。
    pub fn acknowledged() -> Self {
        Self {
            status: CommandStatus::Deferred,
            payload: json!({ "type": RESPONSE_DEFERRED_CHANNEL_MESSAGE }),
            follow_up_required: false,
        }
    }

    /// 失敗応答
    ///
    /// エラー内容は実行ユーザーにのみ表示する。
    pub fn failed(content: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Failed,
            payload: json!({
                "type": RESPONSE_CHANNEL_MESSAGE,
                "data": { "content": content.into(), "flags": FLAG_EPHEMERAL }
            }),
            follow_up_required: false,
        }
    }

    /// 未登録コマンドへの応答
    pub fn unknown_command(name: &str) -> Self {
        Self::failed(format!("unknown command: `{}`", name))
    }

    /// ペイロード中のメッセージ本文を取得
    pub fn content(&self) -> Option<&str> {
        self.payload
            .get("data")
            .and_then(|data| data.get("content"))
            .and_then(|content| content.as_str())
    }

    /// レスポンスボディをJSON文字列として取得
    pub fn to_json(&self) -> String {
        self.payload.to_string()
    }
}
