/// Webhookリクエストの署名検証
///
/// `timestamp || body`に対するEd25519署名を公開鍵で検証する。
/// 検証はフェイルクローズで、不正な入力はすべて拒否として扱う。
use ed25519_dalek::{PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH, Signature, VerifyingKey};
use thiserror::Error;

/// タイムスタンプ許容誤差のデフォルト（秒）
pub const DEFAULT_MAX_SKEW_SECS: i64 = 300;

/// 署名検証エラー（AuthenticationError）
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VerificationError {
    /// 署名ヘッダーが欠落
    #[error("missing signature")]
    MissingSignature,

    /// タイムスタンプヘッダーが欠落
    #[error("missing timestamp")]
    MissingTimestamp,

    /// タイムスタンプが整数として解釈できない
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// タイムスタンプが許容範囲外（リプレイ対策）
    #[error("timestamp out of range: skew {skew_secs}s exceeds {max_skew_secs}s")]
    StaleTimestamp { skew_secs: i64, max_skew_secs: i64 },

    /// 署名が128文字の16進数でない
    #[error("malformed signature")]
    MalformedSignature,

    /// 公開鍵が不正
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// 署名が一致しない
    #[error("signature mismatch")]
    SignatureMismatch,
}

/// Ed25519署名検証器
///
/// 公開鍵はコールドスタート時に一度だけ読み込み、プロセス存続中は使い回す。
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    public_key: VerifyingKey,
    max_skew_secs: i64,
}

impl SignatureVerifier {
    pub fn new(public_key: VerifyingKey, max_skew_secs: i64) -> Self {
        Self {
            public_key,
            max_skew_secs,
        }
    }

    /// 16進数表記の公開鍵から検証器を作成
    pub fn from_hex(public_key_hex: &str, max_skew_secs: i64) -> Result<Self, VerificationError> {
        let bytes = hex::decode(public_key_hex.trim())
            .map_err(|e| VerificationError::InvalidPublicKey(e.to_string()))?;

        let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes.try_into().map_err(|_| {
            VerificationError::InvalidPublicKey(format!("expected {} bytes", PUBLIC_KEY_LENGTH))
        })?;

        let public_key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| VerificationError::InvalidPublicKey(e.to_string()))?;

        Ok(Self::new(public_key, max_skew_secs))
    }

    pub fn max_skew_secs(&self) -> i64 {
        self.max_skew_secs
    }

    /// 署名が有効かを判定
    ///
    /// 検証エラーの詳細が不要な呼び出し元向け。いずれの失敗も`false`になる。
    pub fn verify(&self, raw_body: &[u8], timestamp: &str, signature: &str) -> bool {
        self.check(raw_body, timestamp, signature).is_ok()
    }

    /// 現在時刻を基準に署名を検証し、検証済みのタイムスタンプを返す
    pub fn check(
        &self,
        raw_body: &[u8],
        timestamp: &str,
        signature: &str,
    ) -> Result<i64, VerificationError> {
        self.check_at(raw_body, timestamp, signature, chrono::Utc::now().timestamp())
    }

    /// 指定時刻を基準に署名を検証
    ///
    /// # 検証順序
    /// 1. ヘッダー値の存在
    /// 2. タイムスタンプの形式と鮮度
    /// 3. 署名の形式
    /// 4. `timestamp || body`に対する署名
    pub fn check_at(
        &self,
        raw_body: &[u8],
        timestamp: &str,
        signature: &str,
        now: i64,
    ) -> Result<i64, VerificationError> {
        if timestamp.is_empty() {
            return Err(VerificationError::MissingTimestamp);
        }
        if signature.is_empty() {
            return Err(VerificationError::MissingSignature);
        }

        let issued_at: i64 = timestamp
            .parse()
            .map_err(|_| VerificationError::InvalidTimestamp(timestamp.to_string()))?;

        // 未来方向のずれも同じ許容範囲で拒否する
        let skew_secs = now.saturating_sub(issued_at).saturating_abs();
        if skew_secs > self.max_skew_secs {
            return Err(VerificationError::StaleTimestamp {
                skew_secs,
                max_skew_secs: self.max_skew_secs,
            });
        }

        let signature = Self::parse_signature(signature)?;

        let mut message = Vec::with_capacity(timestamp.len() + raw_body.len());
        message.extend_from_slice(timestamp.as_bytes());
        message.extend_from_slice(raw_body);

        self.public_key
            .verify_strict(&message, &signature)
            .map_err(|_| VerificationError::SignatureMismatch)?;

        Ok(issued_at)
    }

    fn parse_signature(signature: &str) -> Result<Signature, VerificationError> {
        let bytes = hex::decode(signature).map_err(|_| VerificationError::MalformedSignature)?;
        let bytes: [u8; SIGNATURE_LENGTH] = bytes
            .try_into()
            .map_err(|_| VerificationError::MalformedSignature)?;
        Ok(Signature::from_bytes(&bytes))
    }
}
