// PostgREST RPC client for the session procedures.
//
// The backend exposes three stored procedures over its REST surface:
// `get_session_details`, `join_session`, and `place_bid`. The server is the
// authority for all state mutation; this client only invokes the procedures
// and maps failures into the session error taxonomy.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::session::error::SessionError;
use crate::session::model::{Participant, Session};

/// Full point-in-time session state as returned by `get_session_details`.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSnapshot {
    pub session: Session,
    #[serde(default)]
    pub participants: Vec<Participant>,
    /// Server-computed aggregate; the store recomputes its own from the rows
    /// and warns on disagreement.
    #[serde(default)]
    pub total_amount: f64,
    #[serde(default)]
    pub participant_count: u64,
}

/// Thin client over the backend's `/rest/v1/rpc/*` endpoints.
pub struct RpcClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl RpcClient {
    /// Build a client with a bounded per-request timeout. The timeout is what
    /// turns a hung bid call into a deterministic rollback upstream.
    pub fn new(base_url: &str, anon_key: &str, timeout: Duration) -> Result<Self, SessionError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::Transient(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        })
    }

    /// Fetch the full current state for a session code.
    ///
    /// Idempotent and side-effect free; the caller applies the result with a
    /// full `replace_all`, never a merge.
    pub async fn get_session_details(&self, code: &str) -> Result<SessionSnapshot, SessionError> {
        let body = self
            .call("get_session_details", &json!({ "p_session_code": code }), code)
            .await?;
        decode_snapshot(&body, code)
    }

    /// Join (or re-join) a session. The server upserts by device id, so
    /// calling this twice from the same installation updates the existing
    /// participant row.
    pub async fn join_session(
        &self,
        code: &str,
        display_name: &str,
        device_id: &str,
        mobile_number: &str,
    ) -> Result<(), SessionError> {
        let params = json!({
            "p_session_code": code,
            "p_display_name": display_name,
            "p_device_id": device_id,
            "p_mobile_number": mobile_number,
        });
        let body = self.call("join_session", &params, code).await?;
        if rpc_reported_failure(&body) {
            return Err(SessionError::Transient(
                "backend did not accept the join".to_string(),
            ));
        }
        Ok(())
    }

    /// Place one bid increment for the caller's own participant row.
    /// The server enforces its own min/max and ownership checks regardless of
    /// what the client validated.
    pub async fn place_bid(
        &self,
        code: &str,
        device_id: &str,
        amount: f64,
    ) -> Result<(), SessionError> {
        let params = json!({
            "p_session_code": code,
            "p_device_id": device_id,
            "p_amount": amount,
        });
        let body = self.call("place_bid", &params, code).await?;
        if rpc_reported_failure(&body) {
            return Err(SessionError::Transient(
                "backend did not accept the bid".to_string(),
            ));
        }
        Ok(())
    }

    /// POST one RPC and return the raw response body. Status-code and
    /// transport failures are mapped to the taxonomy here so the typed
    /// wrappers above only deal with payload shape.
    async fn call(&self, function: &str, params: &Value, code: &str) -> Result<String, SessionError> {
        let url = format!("{}/rest/v1/rpc/{function}", self.base_url);
        debug!(function, %url, "rpc call");

        let response = self
            .http
            .post(&url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.anon_key))
            .json(params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SessionError::Transient(format!("{function} timed out"))
                } else {
                    SessionError::Transient(format!("{function} failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SessionError::Transient(format!("{function} body read failed: {e}")))?;

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SessionError::NotFound {
                code: code.to_string(),
            });
        }
        if !status.is_success() {
            return Err(SessionError::Transient(format!(
                "{function} returned {status}: {}",
                extract_error_message(&body)
            )));
        }

        Ok(body)
    }
}

// ---------------------------------------------------------------------------
// Response decoding helpers
// ---------------------------------------------------------------------------

/// Decode a `get_session_details` body. The procedure returns SQL `null`
/// (serialized as the literal `null`) when no active session matches the
/// code, which PostgREST still wraps in a 200.
pub(crate) fn decode_snapshot(body: &str, code: &str) -> Result<SessionSnapshot, SessionError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| SessionError::Transient(format!("malformed snapshot response: {e}")))?;
    if value.is_null() {
        return Err(SessionError::NotFound {
            code: code.to_string(),
        });
    }
    serde_json::from_value(value)
        .map_err(|e| SessionError::Transient(format!("unexpected snapshot shape: {e}")))
}

/// Whether a 200 RPC body signals failure at the SQL level. The join/bid
/// procedures return a success boolean; `false` or `null` means the
/// procedure declined.
pub(crate) fn rpc_reported_failure(body: &str) -> bool {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Bool(ok)) => !ok,
        Ok(Value::Null) => true,
        // Objects/numbers/empty bodies are success: some deployments return
        // the affected row or nothing at all.
        Ok(_) => false,
        Err(_) => false,
    }
}

/// Pull the `message` field out of a PostgREST error body, falling back to
/// the raw text.
pub(crate) fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| body.trim().to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
