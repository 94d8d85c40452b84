//! Wire envelope for the HTTP API (spec §6): every response, success or
//! business error, is HTTP 200 with `{code, msg, data, hint}`; `code` is
//! `0` on success and a taxonomy code (spec §7) otherwise.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: i32,
    pub msg: String,
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Envelope {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
            hint: None,
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> Self {
        Envelope {
            code,
            msg: msg.into(),
            data: None,
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_envelope_round_trips() {
        let env = Envelope::ok(serde_json::json!({"taskId": 42}));
        let s = serde_json::to_string(&env).unwrap();
        assert!(s.contains("\"code\":0"));
        let back: Envelope<serde_json::Value> = serde_json::from_str(&s).unwrap();
        assert_eq!(back.code, 0);
    }

    #[test]
    fn error_envelope_omits_data() {
        let env: Envelope<()> = Envelope::error(10001, "args invalid");
        let s = serde_json::to_string(&env).unwrap();
        assert!(s.contains("\"data\":null"));
    }
}
