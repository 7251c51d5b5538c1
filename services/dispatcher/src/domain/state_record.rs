/// 永続化されるエンティティ状態
///
/// パーティションキー`id`と任意の属性マップを持つ。暗黙の有効期限はない。
use serde_json::Value;
use std::collections::BTreeMap;

/// 属性名: 状態
pub const ATTR_STATE: &str = "state";
/// 属性名: 有効期限（Unixタイムスタンプ秒）
pub const ATTR_TTL: &str = "ttl";
/// 属性名: 更新日時（RFC 3339）
pub const ATTR_UPDATED_AT: &str = "updated_at";

/// 状態値: 稼働中
pub const STATE_RUNNING: &str = "running";

/// ハートビートの有効期間（秒）
pub const HEARTBEAT_TTL_SECONDS: i64 = 4 * 60;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StateRecord {
    /// パーティションキー
    pub id: String,
    /// 属性マップ
    pub attributes: BTreeMap<String, Value>,
}

impl StateRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// 属性を追加したレコードを返す
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(|v| v.as_str())
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.attributes.get(name).and_then(|v| v.as_i64())
    }

    /// executorのハートビートレコードを作成
    ///
    /// `ttl`は明示的な属性であり、読み手が鮮度判定に使う。
    pub fn heartbeat(id: impl Into<String>, now: i64, updated_at: impl Into<String>) -> Self {
        Self::new(id)
            .with_attribute(ATTR_STATE, STATE_RUNNING)
            .with_attribute(ATTR_TTL, now + HEARTBEAT_TTL_SECONDS)
            .with_attribute(ATTR_UPDATED_AT, updated_at.into())
    }
}

/// ハートビートレコードから判定したexecutorの状態
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceStatus {
    /// 有効期限内のハートビートがある
    Running { updated_at: Option<String> },
    /// ハートビートが期限切れ
    Stale { updated_at: Option<String> },
    /// レコードが存在しない
    Unknown,
}

impl InstanceStatus {
    /// レコードと現在時刻から状態を判定
    pub fn from_record(record: Option<&StateRecord>, now: i64) -> Self {
        let Some(record) = record else {
            return InstanceStatus::Unknown;
        };

        let updated_at = record.get_str(ATTR_UPDATED_AT).map(str::to_string);
        let fresh = record.get_i64(ATTR_TTL).is_some_and(|ttl| ttl > now);

        if record.get_str(ATTR_STATE) == Some(STATE_RUNNING) && fresh {
            InstanceStatus::Running { updated_at }
        } else {
            InstanceStatus::Stale { updated_at }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Running { .. } => "running",
            InstanceStatus::Stale { .. } => "stale",
            InstanceStatus::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_with_attribute_and_getters() {
        let record = StateRecord::new("guild-1")
            .with_attribute("prefix", "!")
            .with_attribute("limit", 10);

        assert_eq!(record.id, "guild-1");
        assert_eq!(record.get_str("prefix"), Some("!"));
        assert_eq!(record.get_i64("limit"), Some(10));
        assert_eq!(record.get_str("limit"), None);
        assert_eq!(record.get_i64("missing"), None);
    }

    #[test]
    fn test_heartbeat_record() {
        let record = StateRecord::heartbeat("i-123", 1_000, "2026-01-01T00:00:00Z");

        assert_eq!(record.id, "i-123");
        assert_eq!(record.attributes[ATTR_STATE], json!("running"));
        assert_eq!(record.get_i64(ATTR_TTL), Some(1_000 + HEARTBEAT_TTL_SECONDS));
        assert_eq!(record.get_str(ATTR_UPDATED_AT), Some("2026-01-01T00:00:00Z"));
    }

    #[test]
    fn test_status_unknown_without_record() {
        assert_eq!(InstanceStatus::from_record(None, 0), InstanceStatus::Unknown);
    }

    #[test]
    fn test_status_running_within_ttl() {
        let record = StateRecord::heartbeat("i-123", 1_000, "t");
        let status = InstanceStatus::from_record(Some(&record), 1_100);

        assert_eq!(
            status,
            InstanceStatus::Running {
                updated_at: Some("t".to_string())
            }
        );
        assert_eq!(status.as_str(), "running");
    }

    #[test]
    fn test_status_stale_after_ttl() {
        let record = StateRecord::heartbeat("i-123", 1_000, "t");
        let status = InstanceStatus::from_record(Some(&record), 1_000 + HEARTBEAT_TTL_SECONDS);

        assert_eq!(status.as_str(), "stale");
    }

    #[test]
    fn test_status_stale_when_not_running() {
        let record = StateRecord::new("i-123")
            .with_attribute(ATTR_STATE, "stopped")
            .with_attribute(ATTR_TTL, 10_000);

        let status = InstanceStatus::from_record(Some(&record), 0);
        assert_eq!(status, InstanceStatus::Stale { updated_at: None });
    }
}
