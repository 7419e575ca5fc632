//! Stratum v1 message types and JSON-RPC serialization.
//!
//! Defines the wire format for Stratum v1 messages using serde. The proxy
//! forwards most payload fields verbatim, so hex-encoded values (extranonce,
//! ntime, nonce, version bits) stay as strings end to end; only the fields
//! the proxy itself acts on (difficulty, extranonce size) are parsed into
//! numbers. Unknown methods are preserved as opaque envelopes and forwarded
//! untouched.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::{StratumError, StratumResult};

/// JSON-RPC message envelope.
///
/// Stratum uses a simplified JSON-RPC format where messages can be:
/// - Requests (have method and params, may have id)
/// - Responses (have id and result or error)
/// - Notifications (have method and params, `id: null`)
///
/// Stratum v1 predates JSON-RPC 2.0 and uses non-standard conventions
/// (notifications carry `id: null`, errors are plain arrays, no version
/// field), so the envelope is a small custom type rather than a JSON-RPC
/// library binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// Request or notification
    Request {
        /// Message ID (null for notifications)
        id: Option<u64>,
        /// Method name (e.g., "mining.notify", "mining.subscribe")
        method: String,
        /// Method parameters
        params: Value,
    },

    /// Response to a request
    Response {
        /// Message ID matching the request
        id: u64,
        /// Result value (present on success)
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        /// Error value (present on failure)
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
    },
}

impl JsonRpcMessage {
    /// Create a new request message.
    pub fn request(id: u64, method: impl Into<String>, params: Value) -> Self {
        JsonRpcMessage::Request {
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// Create a notification (request without ID).
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        JsonRpcMessage::Request {
            id: None,
            method: method.into(),
            params,
        }
    }

    /// Get the message ID if present.
    pub fn id(&self) -> Option<u64> {
        match self {
            JsonRpcMessage::Request { id, .. } => *id,
            JsonRpcMessage::Response { id, .. } => Some(*id),
        }
    }

    /// Get the method name for requests.
    pub fn method(&self) -> Option<&str> {
        match self {
            JsonRpcMessage::Request { method, .. } => Some(method),
            JsonRpcMessage::Response { .. } => None,
        }
    }
}

/// A decoded Stratum v1 message.
///
/// Known methods decode into typed variants; anything else passes through
/// as [`Message::Other`] so the proxy never drops protocol extensions it
/// does not understand.
#[derive(Debug, Clone)]
pub enum Message {
    /// `mining.subscribe` from a miner
    Subscribe(Subscribe),
    /// `mining.authorize` from a miner
    Authorize(Authorize),
    /// `mining.configure` (BIP 310) from a miner
    Configure(Configure),
    /// `mining.submit` from a miner
    Submit(Submit),
    /// `mining.notify` from a pool
    Notify(Notify),
    /// `mining.set_difficulty` from a pool
    SetDifficulty(SetDifficulty),
    /// `mining.set_extranonce` from a pool
    SetExtranonce(SetExtranonce),
    /// `mining.set_version_mask` from a pool
    SetVersionMask(SetVersionMask),
    /// A result correlated to an earlier request
    Result(ResultMsg),
    /// Any method the proxy does not interpret; forwarded verbatim
    Other(JsonRpcMessage),
}

impl Message {
    /// Decode an envelope into a typed message.
    ///
    /// Malformed params of a known method are a protocol error; unknown
    /// methods are preserved opaquely.
    pub fn from_envelope(env: JsonRpcMessage) -> StratumResult<Self> {
        let (id, method, params) = match env {
            JsonRpcMessage::Response { id, result, error } => {
                return Ok(Message::Result(ResultMsg { id, result, error }));
            }
            JsonRpcMessage::Request { id, method, params } => (id, method, params),
        };

        let msg = match method.as_str() {
            "mining.subscribe" => Message::Subscribe(Subscribe::from_params(req_id(&method, id)?, &params)?),
            "mining.authorize" => Message::Authorize(Authorize::from_params(req_id(&method, id)?, &params)?),
            "mining.configure" => Message::Configure(Configure::from_params(req_id(&method, id)?, &params)?),
            "mining.submit" => Message::Submit(Submit::from_params(req_id(&method, id)?, &params)?),
            "mining.notify" => Message::Notify(Notify::from_params(&params)?),
            "mining.set_difficulty" => Message::SetDifficulty(SetDifficulty::from_params(&params)?),
            "mining.set_extranonce" => Message::SetExtranonce(SetExtranonce::from_params(&params)?),
            "mining.set_version_mask" => Message::SetVersionMask(SetVersionMask::from_params(&params)?),
            _ => Message::Other(JsonRpcMessage::Request { id, method, params }),
        };
        Ok(msg)
    }

    /// Encode back into a JSON-RPC envelope for transmission.
    pub fn to_envelope(&self) -> JsonRpcMessage {
        match self {
            Message::Subscribe(m) => m.to_envelope(),
            Message::Authorize(m) => m.to_envelope(),
            Message::Configure(m) => m.to_envelope(),
            Message::Submit(m) => m.to_envelope(),
            Message::Notify(m) => m.to_envelope(),
            Message::SetDifficulty(m) => m.to_envelope(),
            Message::SetExtranonce(m) => m.to_envelope(),
            Message::SetVersionMask(m) => m.to_envelope(),
            Message::Result(m) => JsonRpcMessage::Response {
                id: m.id,
                result: m.result.clone(),
                error: m.error.clone(),
            },
            Message::Other(env) => env.clone(),
        }
    }

    /// Short method name for logging.
    pub fn method_name(&self) -> &str {
        match self {
            Message::Subscribe(_) => "mining.subscribe",
            Message::Authorize(_) => "mining.authorize",
            Message::Configure(_) => "mining.configure",
            Message::Submit(_) => "mining.submit",
            Message::Notify(_) => "mining.notify",
            Message::SetDifficulty(_) => "mining.set_difficulty",
            Message::SetExtranonce(_) => "mining.set_extranonce",
            Message::SetVersionMask(_) => "mining.set_version_mask",
            Message::Result(_) => "result",
            Message::Other(env) => env.method().unwrap_or("unknown"),
        }
    }
}

/// Requests must carry an id; notifications of these methods are malformed.
fn req_id(method: &str, id: Option<u64>) -> StratumResult<u64> {
    id.ok_or_else(|| StratumError::Protocol(format!("{} without id", method)))
}

fn param_str(params: &[Value], idx: usize, what: &str) -> StratumResult<String> {
    params
        .get(idx)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| StratumError::Protocol(format!("{} not a string", what)))
}

fn params_array<'a>(params: &'a Value, method: &str) -> StratumResult<&'a Vec<Value>> {
    params
        .as_array()
        .ok_or_else(|| StratumError::Protocol(format!("{} params not an array", method)))
}

/// Extranonce1 is hex on the wire. The proxy replays it to miners
/// verbatim, so a value that doesn't decode is rejected at the edge
/// rather than poisoning the session state.
fn validate_extranonce1(extranonce1: String) -> StratumResult<String> {
    hex::decode(&extranonce1)
        .map_err(|e| StratumError::Protocol(format!("extranonce1 not hex: {}", e)))?;
    Ok(extranonce1)
}

/// `mining.subscribe` request.
#[derive(Debug, Clone)]
pub struct Subscribe {
    pub id: u64,
    /// Raw params, usually `[user_agent]` or `[user_agent, session_id]`
    pub params: Vec<Value>,
}

impl Subscribe {
    /// Build a subscribe request with a user agent and version.
    pub fn new(id: u64, user_agent: &str, version: &str) -> Self {
        Self {
            id,
            params: vec![Value::String(format!("{}/{}", user_agent, version))],
        }
    }

    fn from_params(id: u64, params: &Value) -> StratumResult<Self> {
        let arr = params_array(params, "mining.subscribe")?;
        Ok(Self {
            id,
            params: arr.clone(),
        })
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.params.first().and_then(|v| v.as_str())
    }

    fn to_envelope(&self) -> JsonRpcMessage {
        JsonRpcMessage::request(self.id, "mining.subscribe", Value::Array(self.params.clone()))
    }
}

/// `mining.authorize` request.
#[derive(Debug, Clone)]
pub struct Authorize {
    pub id: u64,
    pub username: String,
    pub password: String,
}

impl Authorize {
    pub fn new(id: u64, username: &str, password: &str) -> Self {
        Self {
            id,
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    fn from_params(id: u64, params: &Value) -> StratumResult<Self> {
        let arr = params_array(params, "mining.authorize")?;
        Ok(Self {
            id,
            username: param_str(arr, 0, "authorize username")?,
            // Many miners omit the password entirely
            password: arr
                .get(1)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        })
    }

    fn to_envelope(&self) -> JsonRpcMessage {
        JsonRpcMessage::request(
            self.id,
            "mining.authorize",
            json!([self.username, self.password]),
        )
    }
}

/// `mining.configure` request (BIP 310).
#[derive(Debug, Clone)]
pub struct Configure {
    pub id: u64,
    /// Requested extension names, e.g. `["version-rolling"]`
    pub extensions: Vec<String>,
    /// Extension parameter map, e.g. `{"version-rolling.mask": "1fffe000"}`
    pub extension_params: serde_json::Map<String, Value>,
}

impl Configure {
    /// Build a version-rolling configure request with the given mask and
    /// minimum bit count.
    pub fn version_rolling(id: u64, mask: &str, min_bit_count: u32) -> Self {
        let mut extension_params = serde_json::Map::new();
        extension_params.insert("version-rolling.mask".into(), json!(mask));
        extension_params.insert("version-rolling.min-bit-count".into(), json!(min_bit_count));
        Self {
            id,
            extensions: vec!["version-rolling".to_string()],
            extension_params,
        }
    }

    fn from_params(id: u64, params: &Value) -> StratumResult<Self> {
        let arr = params_array(params, "mining.configure")?;
        let extensions = arr
            .first()
            .and_then(|v| v.as_array())
            .ok_or_else(|| StratumError::Protocol("configure extensions not an array".into()))?
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        let extension_params = arr
            .get(1)
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();
        Ok(Self {
            id,
            extensions,
            extension_params,
        })
    }

    /// The requested version-rolling mask, if version rolling was asked for.
    pub fn version_rolling_mask(&self) -> Option<&str> {
        self.extension_params
            .get("version-rolling.mask")
            .and_then(|v| v.as_str())
    }

    /// The requested minimum rollable bit count.
    pub fn min_bit_count(&self) -> Option<u32> {
        self.extension_params
            .get("version-rolling.min-bit-count")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
    }

    fn to_envelope(&self) -> JsonRpcMessage {
        JsonRpcMessage::request(
            self.id,
            "mining.configure",
            json!([self.extensions, self.extension_params]),
        )
    }
}

/// `mining.submit` request.
///
/// Hex fields are kept as strings; the proxy forwards them untouched and
/// only the worker name is ever rewritten.
#[derive(Debug, Clone)]
pub struct Submit {
    pub id: u64,
    pub worker_name: String,
    pub job_id: String,
    pub extranonce2: String,
    pub ntime: String,
    pub nonce: String,
    /// Version bits (hex), present when version rolling is active
    pub version_bits: Option<String>,
}

impl Submit {
    fn from_params(id: u64, params: &Value) -> StratumResult<Self> {
        let arr = params_array(params, "mining.submit")?;
        Ok(Self {
            id,
            worker_name: param_str(arr, 0, "submit worker name")?,
            job_id: param_str(arr, 1, "submit job id")?,
            extranonce2: param_str(arr, 2, "submit extranonce2")?,
            ntime: param_str(arr, 3, "submit ntime")?,
            nonce: param_str(arr, 4, "submit nonce")?,
            version_bits: arr.get(5).and_then(|v| v.as_str()).map(str::to_string),
        })
    }

    fn to_envelope(&self) -> JsonRpcMessage {
        let mut params = vec![
            json!(self.worker_name),
            json!(self.job_id),
            json!(self.extranonce2),
            json!(self.ntime),
            json!(self.nonce),
        ];
        if let Some(bits) = &self.version_bits {
            params.push(json!(bits));
        }
        JsonRpcMessage::request(self.id, "mining.submit", Value::Array(params))
    }
}

/// `mining.notify` work template.
///
/// All payload fields stay hex strings: the proxy caches and replays
/// templates but never reconstructs block headers from them.
#[derive(Debug, Clone)]
pub struct Notify {
    pub job_id: String,
    pub prev_hash: String,
    pub coinbase1: String,
    pub coinbase2: String,
    pub merkle_branches: Vec<String>,
    pub version: String,
    pub nbits: String,
    pub ntime: String,
    pub clean_jobs: bool,
}

impl Notify {
    fn from_params(params: &Value) -> StratumResult<Self> {
        let arr = params_array(params, "mining.notify")?;
        if arr.len() < 9 {
            return Err(StratumError::Protocol("mining.notify params too short".into()));
        }
        let merkle_branches = arr[4]
            .as_array()
            .ok_or_else(|| StratumError::Protocol("merkle branches not an array".into()))?
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| StratumError::Protocol("merkle branch not a string".into()))
            })
            .collect::<StratumResult<Vec<_>>>()?;
        Ok(Self {
            job_id: param_str(arr, 0, "notify job id")?,
            prev_hash: param_str(arr, 1, "notify prev hash")?,
            coinbase1: param_str(arr, 2, "notify coinbase1")?,
            coinbase2: param_str(arr, 3, "notify coinbase2")?,
            merkle_branches,
            version: param_str(arr, 5, "notify version")?,
            nbits: param_str(arr, 6, "notify nbits")?,
            ntime: param_str(arr, 7, "notify ntime")?,
            clean_jobs: arr[8]
                .as_bool()
                .ok_or_else(|| StratumError::Protocol("clean_jobs not a bool".into()))?,
        })
    }

    /// Copy of this template with `clean_jobs` forced, used when replaying
    /// a cached job after a destination swap.
    pub fn with_clean_jobs(&self, clean_jobs: bool) -> Self {
        let mut job = self.clone();
        job.clean_jobs = clean_jobs;
        job
    }

    fn to_envelope(&self) -> JsonRpcMessage {
        JsonRpcMessage::notification(
            "mining.notify",
            json!([
                self.job_id,
                self.prev_hash,
                self.coinbase1,
                self.coinbase2,
                self.merkle_branches,
                self.version,
                self.nbits,
                self.ntime,
                self.clean_jobs,
            ]),
        )
    }
}

/// `mining.set_difficulty` notification.
#[derive(Debug, Clone, Copy)]
pub struct SetDifficulty {
    pub difficulty: f64,
}

impl SetDifficulty {
    pub fn new(difficulty: f64) -> Self {
        Self { difficulty }
    }

    fn from_params(params: &Value) -> StratumResult<Self> {
        let arr = params_array(params, "mining.set_difficulty")?;
        let difficulty = arr
            .first()
            .and_then(|v| v.as_f64())
            .ok_or_else(|| StratumError::Protocol("difficulty not a number".into()))?;
        Ok(Self { difficulty })
    }

    fn to_envelope(&self) -> JsonRpcMessage {
        JsonRpcMessage::notification("mining.set_difficulty", json!([self.difficulty]))
    }
}

/// `mining.set_extranonce` notification.
#[derive(Debug, Clone)]
pub struct SetExtranonce {
    pub extranonce1: String,
    pub extranonce2_size: usize,
}

impl SetExtranonce {
    pub fn new(extranonce1: &str, extranonce2_size: usize) -> Self {
        Self {
            extranonce1: extranonce1.to_string(),
            extranonce2_size,
        }
    }

    fn from_params(params: &Value) -> StratumResult<Self> {
        let arr = params_array(params, "mining.set_extranonce")?;
        Ok(Self {
            extranonce1: validate_extranonce1(param_str(arr, 0, "extranonce1")?)?,
            extranonce2_size: arr
                .get(1)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| StratumError::Protocol("extranonce2 size not a number".into()))?
                as usize,
        })
    }

    fn to_envelope(&self) -> JsonRpcMessage {
        JsonRpcMessage::notification(
            "mining.set_extranonce",
            json!([self.extranonce1, self.extranonce2_size]),
        )
    }
}

/// `mining.set_version_mask` notification (BIP 310).
#[derive(Debug, Clone)]
pub struct SetVersionMask {
    /// Mask as lowercase hex, no 0x prefix
    pub mask: String,
}

impl SetVersionMask {
    pub fn new(mask: &str) -> Self {
        Self {
            mask: mask.to_string(),
        }
    }

    fn from_params(params: &Value) -> StratumResult<Self> {
        let arr = params_array(params, "mining.set_version_mask")?;
        Ok(Self {
            mask: param_str(arr, 0, "version mask")?,
        })
    }

    fn to_envelope(&self) -> JsonRpcMessage {
        JsonRpcMessage::notification("mining.set_version_mask", json!([self.mask]))
    }
}

/// A response correlated to an earlier request by id.
#[derive(Debug, Clone)]
pub struct ResultMsg {
    pub id: u64,
    pub result: Option<Value>,
    pub error: Option<Value>,
}

impl ResultMsg {
    /// Successful boolean result, the common shape for authorize/submit.
    pub fn ok(id: u64) -> Self {
        Self {
            id,
            result: Some(json!(true)),
            error: None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(&self.error, Some(e) if !e.is_null())
    }

    /// Human-readable error message.
    ///
    /// Stratum errors are usually `[code, "message", traceback]` arrays but
    /// some pools send bare strings.
    pub fn error_message(&self) -> String {
        match &self.error {
            Some(Value::Array(arr)) => arr
                .get(1)
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error")
                .to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    /// Whether the result value is boolean `true` (share accepted,
    /// authorization granted).
    pub fn is_true_result(&self) -> bool {
        !self.is_error() && matches!(&self.result, Some(v) if v.as_bool() == Some(true))
    }

    /// Parse a `mining.subscribe` result:
    /// `[[subscriptions...], extranonce1, extranonce2_size]`.
    pub fn parse_subscribe_result(&self) -> StratumResult<(String, usize)> {
        let arr = self
            .result
            .as_ref()
            .and_then(|v| v.as_array())
            .ok_or_else(|| StratumError::Protocol("subscribe result not an array".into()))?;
        if arr.len() < 3 {
            return Err(StratumError::Protocol("subscribe result too short".into()));
        }
        let extranonce1 = arr[1]
            .as_str()
            .ok_or_else(|| StratumError::Protocol("extranonce1 not a string".into()))?
            .to_string();
        let extranonce2_size = arr[2]
            .as_u64()
            .ok_or_else(|| StratumError::Protocol("extranonce2_size not a number".into()))?
            as usize;
        Ok((validate_extranonce1(extranonce1)?, extranonce2_size))
    }

    /// Parse a `mining.configure` result for version rolling. Returns the
    /// authorized mask, or `None` when the pool declined the extension.
    pub fn parse_configure_result(&self) -> StratumResult<Option<String>> {
        let obj = self
            .result
            .as_ref()
            .and_then(|v| v.as_object())
            .ok_or_else(|| StratumError::Protocol("configure result not an object".into()))?;
        let accepted = obj
            .get("version-rolling")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !accepted {
            return Ok(None);
        }
        let mask = obj
            .get("version-rolling.mask")
            .and_then(|v| v.as_str())
            .ok_or_else(|| StratumError::Protocol("missing version-rolling.mask".into()))?;
        Ok(Some(mask.trim_start_matches("0x").to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: Value) -> Message {
        let env: JsonRpcMessage = serde_json::from_value(json).unwrap();
        Message::from_envelope(env).unwrap()
    }

    #[test]
    fn parse_mining_notify() {
        let msg = parse(json!({
            "id": null,
            "method": "mining.notify",
            "params": [
                "j1", "prevhash", "cb1", "cb2",
                ["m1", "m2"], "20000000", "1a00ffff", "504e86b9", true
            ]
        }));

        match msg {
            Message::Notify(job) => {
                assert_eq!(job.job_id, "j1");
                assert_eq!(job.merkle_branches, vec!["m1", "m2"]);
                assert!(job.clean_jobs);
            }
            other => panic!("expected Notify, got {:?}", other),
        }
    }

    #[test]
    fn notify_roundtrip_preserves_fields() {
        let msg = parse(json!({
            "id": null,
            "method": "mining.notify",
            "params": ["j1", "ph", "cb1", "cb2", [], "20000000", "1d00ffff", "5a5a5a5a", false]
        }));
        let env = msg.to_envelope();
        let text = serde_json::to_string(&env).unwrap();
        assert!(text.contains("\"mining.notify\""));
        assert!(text.contains("\"j1\""));
        assert!(text.contains("false"));
    }

    #[test]
    fn parse_submit_with_version_bits() {
        let msg = parse(json!({
            "id": 8,
            "method": "mining.submit",
            "params": ["worker.1", "j1", "deadbeef", "65432100", "12345678", "00a00000"]
        }));
        match msg {
            Message::Submit(s) => {
                assert_eq!(s.id, 8);
                assert_eq!(s.worker_name, "worker.1");
                assert_eq!(s.version_bits.as_deref(), Some("00a00000"));
            }
            other => panic!("expected Submit, got {:?}", other),
        }
    }

    #[test]
    fn submit_worker_rename_roundtrip() {
        let msg = parse(json!({
            "id": 8,
            "method": "mining.submit",
            "params": ["worker.1", "j1", "deadbeef", "65432100", "12345678"]
        }));
        let Message::Submit(mut s) = msg else {
            panic!("expected Submit")
        };
        s.worker_name = "contract-worker".to_string();
        let text = serde_json::to_string(&s.to_envelope()).unwrap();
        assert!(text.contains("contract-worker"));
        assert!(!text.contains("worker.1"));
    }

    #[test]
    fn parse_set_difficulty() {
        let msg = parse(json!({
            "id": null,
            "method": "mining.set_difficulty",
            "params": [8192.5]
        }));
        match msg {
            Message::SetDifficulty(d) => assert_eq!(d.difficulty, 8192.5),
            other => panic!("expected SetDifficulty, got {:?}", other),
        }
    }

    #[test]
    fn parse_configure_accessors() {
        let msg = parse(json!({
            "id": 1,
            "method": "mining.configure",
            "params": [
                ["version-rolling"],
                {"version-rolling.mask": "1fffe000", "version-rolling.min-bit-count": 2}
            ]
        }));
        match msg {
            Message::Configure(c) => {
                assert_eq!(c.version_rolling_mask(), Some("1fffe000"));
                assert_eq!(c.min_bit_count(), Some(2));
            }
            other => panic!("expected Configure, got {:?}", other),
        }
    }

    #[test]
    fn unknown_method_passes_through() {
        let msg = parse(json!({
            "id": 5,
            "method": "mining.suggest_difficulty",
            "params": [1024]
        }));
        match &msg {
            Message::Other(env) => {
                assert_eq!(env.method(), Some("mining.suggest_difficulty"));
                assert_eq!(env.id(), Some(5));
            }
            other => panic!("expected Other, got {:?}", other),
        }
        // And survives re-encoding byte for byte
        let text = serde_json::to_string(&msg.to_envelope()).unwrap();
        assert!(text.contains("mining.suggest_difficulty"));
        assert!(text.contains("1024"));
    }

    #[test]
    fn known_method_with_bad_params_is_protocol_error() {
        let env: JsonRpcMessage = serde_json::from_value(json!({
            "id": null,
            "method": "mining.set_difficulty",
            "params": ["not a number"]
        }))
        .unwrap();
        assert!(matches!(
            Message::from_envelope(env),
            Err(StratumError::Protocol(_))
        ));
    }

    #[test]
    fn result_error_message_shapes() {
        let err_array = ResultMsg {
            id: 1,
            result: None,
            error: Some(json!([24, "Unauthorized worker", null])),
        };
        assert!(err_array.is_error());
        assert_eq!(err_array.error_message(), "Unauthorized worker");

        let err_string = ResultMsg {
            id: 1,
            result: None,
            error: Some(json!("unauthorized")),
        };
        assert_eq!(err_string.error_message(), "unauthorized");

        let null_error = ResultMsg {
            id: 1,
            result: Some(json!(true)),
            error: Some(Value::Null),
        };
        assert!(!null_error.is_error());
        assert!(null_error.is_true_result());
    }

    #[test]
    fn parse_subscribe_result_fields() {
        let res = ResultMsg {
            id: 2,
            result: Some(json!([
                [["mining.set_difficulty", "1"], ["mining.notify", "1"]],
                "08000002",
                4
            ])),
            error: None,
        };
        let (en1, size) = res.parse_subscribe_result().unwrap();
        assert_eq!(en1, "08000002");
        assert_eq!(size, 4);
    }

    #[test]
    fn non_hex_extranonce_is_rejected() {
        let env: JsonRpcMessage = serde_json::from_value(json!({
            "id": null,
            "method": "mining.set_extranonce",
            "params": ["not-hex", 4]
        }))
        .unwrap();
        assert!(matches!(
            Message::from_envelope(env),
            Err(StratumError::Protocol(_))
        ));

        let res = ResultMsg {
            id: 2,
            result: Some(json!([[], "0800000z", 4])),
            error: None,
        };
        assert!(matches!(
            res.parse_subscribe_result(),
            Err(StratumError::Protocol(_))
        ));
    }

    #[test]
    fn parse_configure_result_declined() {
        let res = ResultMsg {
            id: 1,
            result: Some(json!({"version-rolling": false})),
            error: None,
        };
        assert_eq!(res.parse_configure_result().unwrap(), None);

        let res = ResultMsg {
            id: 1,
            result: Some(json!({"version-rolling": true, "version-rolling.mask": "0x1fffe000"})),
            error: None,
        };
        assert_eq!(
            res.parse_configure_result().unwrap().as_deref(),
            Some("1fffe000")
        );
    }
}
