/// インタラクションHTTPエンドポイント
///
/// 単一パスでGET/POSTを受け付ける。
/// - GET: 死活確認（署名検証なし）
/// - POST: 署名検証 → 再送検出 → ルーティング → `CommandResult.payload`を200で返却
///
/// 署名検証失敗は401、ペイロード不正は400。それ以外の失敗は
/// `Failed`結果として200で返す（Webhookの応答契約を満たすため）。
/// 同じインタラクションIDの再送は処理済み台帳で検出し、副作用なしで受信応答のみ返す。
use lambda_http::http::header::{CONTENT_TYPE, HeaderValue};
use lambda_http::http::{Method, StatusCode};
use lambda_http::{Body, Request, Response};
use serde_json::json;
use std::time::Duration;
use tracing::{error, info, warn};

use super::request_router::RequestRouter;
use crate::domain::{CommandResult, Interaction, InteractionKind, SignatureVerifier};
use crate::infrastructure::{ClaimResult, ProcessedLedger, WorkQueue};

/// 署名ヘッダー名
pub const SIGNATURE_HEADER: &str = "x-signature-ed25519";
/// タイムスタンプヘッダー名
pub const TIMESTAMP_HEADER: &str = "x-signature-timestamp";

/// インタラクション処理中の台帳リース
pub const INTERACTION_LEASE: Duration = Duration::from_secs(60);

pub struct InteractionEndpoint<Q, P>
where
    Q: WorkQueue,
    P: ProcessedLedger,
{
    verifier: SignatureVerifier,
    router: RequestRouter<Q>,
    ledger: P,
}

impl<Q, P> InteractionEndpoint<Q, P>
where
    Q: WorkQueue,
    P: ProcessedLedger,
{
    pub fn new(verifier: SignatureVerifier, router: RequestRouter<Q>, ledger: P) -> Self {
        Self {
            verifier,
            router,
            ledger,
        }
    }

    pub fn router(&self) -> &RequestRouter<Q> {
        &self.router
    }

    /// リクエストを処理する（現在時刻で署名を検証）
    pub async fn handle(&self, request: &Request) -> Response<Body> {
        self.handle_at(request, chrono::Utc::now().timestamp()).await
    }

    /// 指定時刻を基準にリクエストを処理する
    pub async fn handle_at(&self, request: &Request, now: i64) -> Response<Body> {
        match *request.method() {
            Method::GET => json_response(StatusCode::OK, json!({ "status": "ok" }).to_string()),
            Method::POST => self.handle_post(request, now).await,
            _ => error_response(
                StatusCode::METHOD_NOT_ALLOWED,
                "method_not_allowed",
                &format!("{} is not supported", request.method()),
            ),
        }
    }

    async fn handle_post(&self, request: &Request, now: i64) -> Response<Body> {
        let raw_body: &[u8] = request.body().as_ref();
        let signature = header_str(request, SIGNATURE_HEADER);
        let timestamp = header_str(request, TIMESTAMP_HEADER);

        let issued_at = match self.verifier.check_at(raw_body, timestamp, signature, now) {
            Ok(issued_at) => issued_at,
            Err(err) => {
                warn!(error = %err, "署名検証失敗");
                return error_response(StatusCode::UNAUTHORIZED, "unauthorized", &err.to_string());
            }
        };

        let interaction = match Interaction::parse(raw_body, issued_at) {
            Ok(interaction) => interaction,
            Err(err) => {
                warn!(error = %err, "ペイロード不正");
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "malformed_payload",
                    &err.to_string(),
                );
            }
        };

        let result = self.respond_once(&interaction).await;
        info!(
            interaction_id = %interaction.id,
            status = result.status.as_str(),
            follow_up_required = result.follow_up_required,
            "インタラクション応答"
        );
        json_response(StatusCode::OK, result.to_json())
    }

    /// インタラクションIDごとに1度だけルーティングする
    ///
    /// Pingは副作用を持たないため台帳を使わずに応答する。
    async fn respond_once(&self, interaction: &Interaction) -> CommandResult {
        if interaction.kind == InteractionKind::Ping {
            return self.router.dispatch(interaction).await;
        }

        let key = interaction.dedup_key();
        match self.ledger.claim(&key, INTERACTION_LEASE).await {
            Ok(ClaimResult::Claimed) => {
                let result = self.router.dispatch(interaction).await;
                if let Err(err) = self.ledger.complete(&key).await {
                    error!(key = %key, error = %err, "台帳の完了記録に失敗");
                }
                result
            }
            Ok(ClaimResult::InProgress | ClaimResult::AlreadyProcessed) => {
                info!(interaction_id = %interaction.id, "再送されたインタラクション");
                CommandResult::acknowledged()
            }
            Err(err) => {
                error!(key = %key, error = %err, "台帳への登録に失敗");
                CommandResult::failed("interaction could not be recorded, please retry")
            }
        }
    }
}

fn header_str<'a>(request: &'a Request, name: &str) -> &'a str {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// JSONボディのレスポンスを作成
pub fn json_response(status: StatusCode, body: String) -> Response<Body> {
    let mut response = Response::new(Body::Text(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// `{"error": .., "message": ..}`形式のエラーレスポンスを作成
pub fn error_response(status: StatusCode, error: &str, message: &str) -> Response<Body> {
    json_response(
        status,
        json!({ "error": error, "message": message }).to_string(),
    )
}
