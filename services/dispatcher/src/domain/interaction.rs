/// Webhookインタラクションのドメインモデル
///
/// 受信したJSONペイロードをパースし、種別ごとのタグ付きユニオンとして保持する。
/// 一度受信したインタラクションは不変。
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use super::work_item::FollowUpTarget;

/// インタラクション種別のワイヤ値
const TYPE_PING: u8 = 1;
const TYPE_APPLICATION_COMMAND: u8 = 2;
const TYPE_MESSAGE_COMPONENT: u8 = 3;
const TYPE_MODAL_SUBMIT: u8 = 5;

const DEDUP_KEY_PREFIX: &str = "interaction#";

/// インタラクションペイロードのパースエラー（MalformedPayload）
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InteractionParseError {
    /// JSONとして解釈できない
    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),

    /// 必須フィールドが欠落
    #[error("missing required field: {0}")]
    MissingField(String),

    /// 対応していないインタラクション種別
    #[error("unsupported interaction type: {0}")]
    UnsupportedType(u8),
}

/// インタラクション種別（データを持たない判別子）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionType {
    Ping,
    ApplicationCommand,
    Component,
    ModalSubmit,
}

impl InteractionType {
    /// ログ出力用の名前
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionType::Ping => "ping",
            InteractionType::ApplicationCommand => "application_command",
            InteractionType::Component => "component",
            InteractionType::ModalSubmit => "modal_submit",
        }
    }
}

/// 種別ごとのペイロード
///
/// `command_name`はApplicationCommandの場合にのみ存在する。
#[derive(Debug, Clone, PartialEq)]
pub enum InteractionKind {
    /// Webhookの死活確認
    Ping,
    /// スラッシュコマンド
    ApplicationCommand {
        command_name: String,
        options: BTreeMap<String, Value>,
    },
    /// ボタン・セレクトメニュー等の操作
    Component { custom_id: String },
    /// モーダル送信
    ModalSubmit {
        custom_id: String,
        fields: BTreeMap<String, String>,
    },
}

/// 受信したインタラクション
#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    /// インタラクションID（一意）
    pub id: String,
    /// 種別とペイロード
    pub kind: InteractionKind,
    /// アプリケーションID（フォローアップ送信先の構築に使用）
    pub application_id: Option<String>,
    /// インタラクショントークン（フォローアップ送信先の構築に使用）
    pub token: Option<String>,
    /// ギルドID（DMの場合はNone）
    pub guild_id: Option<String>,
    /// 実行ユーザーID
    pub user_id: Option<String>,
    /// 署名検証に使用した生のリクエストボディ
    pub raw_payload: Vec<u8>,
    /// 受信時刻（Unixタイムスタンプ秒）
    pub issued_at: i64,
}

#[derive(Debug, Deserialize)]
struct RawInteraction {
    id: Option<String>,
    #[serde(rename = "type")]
    interaction_type: Option<u8>,
    application_id: Option<String>,
    token: Option<String>,
    guild_id: Option<String>,
    data: Option<RawData>,
    member: Option<RawMember>,
    user: Option<RawUser>,
}

#[derive(Debug, Deserialize)]
struct RawData {
    name: Option<String>,
    custom_id: Option<String>,
    #[serde(default)]
    options: Vec<RawOption>,
    #[serde(default)]
    components: Vec<RawComponentRow>,
}

#[derive(Debug, Deserialize)]
struct RawOption {
    name: String,
    value: Option<Value>,
    #[serde(default)]
    options: Vec<RawOption>,
}

#[derive(Debug, Deserialize)]
struct RawComponentRow {
    #[serde(default)]
    components: Vec<RawComponent>,
}

#[derive(Debug, Deserialize)]
struct RawComponent {
    custom_id: Option<String>,
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMember {
    user: Option<RawUser>,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    id: String,
}

impl Interaction {
    /// 生のリクエストボディをパースしてInteractionを構築
    ///
    /// # 引数
    /// * `raw_payload` - 署名検証済みのリクエストボディ
    /// * `issued_at` - 受信時刻（署名タイムスタンプ）
    ///
    /// # 戻り値
    /// * `Ok(Interaction)` - パース成功
    /// * `Err(InteractionParseError)` - ペイロード不正
    pub fn parse(raw_payload: &[u8], issued_at: i64) -> Result<Self, InteractionParseError> {
        let raw: RawInteraction = serde_json::from_slice(raw_payload)
            .map_err(|e| InteractionParseError::InvalidJson(e.to_string()))?;

        let id = raw
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| InteractionParseError::MissingField("id".to_string()))?;

        let interaction_type = raw
            .interaction_type
            .ok_or_else(|| InteractionParseError::MissingField("type".to_string()))?;

        let kind = match interaction_type {
            TYPE_PING => InteractionKind::Ping,
            TYPE_APPLICATION_COMMAND => {
                let data = raw.data.as_ref().ok_or_else(|| missing("data"))?;
                let command_name = data
                    .name
                    .clone()
                    .filter(|name| !name.is_empty())
                    .ok_or_else(|| missing("data.name"))?;
                InteractionKind::ApplicationCommand {
                    command_name,
                    options: flatten_options(&data.options),
                }
            }
            TYPE_MESSAGE_COMPONENT => InteractionKind::Component {
                custom_id: required_custom_id(raw.data.as_ref())?,
            },
            TYPE_MODAL_SUBMIT => {
                let custom_id = required_custom_id(raw.data.as_ref())?;
                let fields = raw
                    .data
                    .as_ref()
                    .map(|data| collect_modal_fields(&data.components))
                    .unwrap_or_default();
                InteractionKind::ModalSubmit { custom_id, fields }
            }
            other => return Err(InteractionParseError::UnsupportedType(other)),
        };

        // Ping以外はフォローアップに必要な認証情報を必須とする
        if kind != InteractionKind::Ping {
            if raw.application_id.as_deref().unwrap_or("").is_empty() {
                return Err(missing("application_id"));
            }
            if raw.token.as_deref().unwrap_or("").is_empty() {
                return Err(missing("token"));
            }
        }

        let user_id = raw
            .member
            .and_then(|member| member.user)
            .or(raw.user)
            .map(|user| user.id);

        Ok(Self {
            id,
            kind,
            application_id: raw.application_id,
            token: raw.token,
            guild_id: raw.guild_id,
            user_id,
            raw_payload: raw_payload.to_vec(),
            issued_at,
        })
    }

    /// 種別の判別子を取得
    pub fn interaction_type(&self) -> InteractionType {
        match self.kind {
            InteractionKind::Ping => InteractionType::Ping,
            InteractionKind::ApplicationCommand { .. } => InteractionType::ApplicationCommand,
            InteractionKind::Component { .. } => InteractionType::Component,
            InteractionKind::ModalSubmit { .. } => InteractionType::ModalSubmit,
        }
    }

    /// 再送検出に使う台帳キー
    pub fn dedup_key(&self) -> String {
        format!("{}{}", DEDUP_KEY_PREFIX, self.id)
    }

    /// コマンド名を取得（ApplicationCommandの場合のみ）
    pub fn command_name(&self) -> Option<&str> {
        match &self.kind {
            InteractionKind::ApplicationCommand { command_name, .. } => Some(command_name.as_str()),
            _ => None,
        }
    }

    /// レジストリ検索に使うキーを取得
    ///
    /// ApplicationCommandはコマンド名、Component/ModalSubmitは
    /// `custom_id`の最初の`:`より前の部分を使う。Pingはキーを持たない。
    pub fn route_key(&self) -> Option<&str> {
        match &self.kind {
            InteractionKind::Ping => None,
            InteractionKind::ApplicationCommand { command_name, .. } => Some(command_name.as_str()),
            InteractionKind::Component { custom_id }
            | InteractionKind::ModalSubmit { custom_id, .. } => {
                custom_id.split(':').next().filter(|key| !key.is_empty())
            }
        }
    }

    /// コマンドオプションを取得（ApplicationCommand以外は空）
    pub fn options(&self) -> BTreeMap<String, Value> {
        match &self.kind {
            InteractionKind::ApplicationCommand { options, .. } => options.clone(),
            InteractionKind::ModalSubmit { fields, .. } => fields
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
            _ => BTreeMap::new(),
        }
    }

    /// フォローアップ送信先を取得
    pub fn follow_up_target(&self) -> Option<FollowUpTarget> {
        match (&self.application_id, &self.token) {
            (Some(application_id), Some(token)) => {
                Some(FollowUpTarget::new(application_id.clone(), token.clone()))
            }
            _ => None,
        }
    }
}

fn missing(field: &str) -> InteractionParseError {
    InteractionParseError::MissingField(field.to_string())
}

fn required_custom_id(data: Option<&RawData>) -> Result<String, InteractionParseError> {
    data.and_then(|data| data.custom_id.clone())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| missing("data.custom_id"))
}

/// オプションを名前→値のマップに展開する
///
/// サブコマンドのように値を持たずネストしたオプションを持つ場合は、
/// ネスト部分をJSONオブジェクトとして格納する。
fn flatten_options(options: &[RawOption]) -> BTreeMap<String, Value> {
    options
        .iter()
        .map(|option| {
            let value = match &option.value {
                Some(value) => value.clone(),
                None => Value::Object(flatten_options(&option.options).into_iter().collect()),
            };
            (option.name.clone(), value)
        })
        .collect()
}

fn collect_modal_fields(rows: &[RawComponentRow]) -> BTreeMap<String, String> {
    rows.iter()
        .flat_map(|row| row.components.iter())
        .filter_map(|component| match (&component.custom_id, &component.value) {
            (Some(id), Some(value)) => Some((id.clone(), value.clone())),
            _ => None,
        })
        .collect()
}
