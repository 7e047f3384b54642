use super::{Event, Login};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 下游 WebSocket 信令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Event = 0,
    Ping = 1,
    Pong = 2,
    Identify = 3,
    Ready = 4,
    Meta = 5,
}

impl Opcode {
    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(Self::Event),
            1 => Some(Self::Ping),
            2 => Some(Self::Pong),
            3 => Some(Self::Identify),
            4 => Some(Self::Ready),
            5 => Some(Self::Meta),
            _ => None,
        }
    }
}

/// 原始信令帧 `{op, body}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub op: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Signal {
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_i64(self.op)
    }

    pub fn pong() -> Self {
        Self {
            op: Opcode::Pong as i64,
            body: None,
        }
    }

    pub fn event(event: &Event) -> serde_json::Result<Self> {
        Ok(Self {
            op: Opcode::Event as i64,
            body: Some(serde_json::to_value(event)?),
        })
    }

    pub fn ready(body: &ReadyBody) -> serde_json::Result<Self> {
        Ok(Self {
            op: Opcode::Ready as i64,
            body: Some(serde_json::to_value(body)?),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IdentifyBody {
    #[serde(default)]
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sn: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReadyBody {
    pub logins: Vec<Login>,
    pub proxy_urls: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identify_frame_decodes() {
        let signal: Signal =
            serde_json::from_str(r#"{"op":3,"body":{"token":"","sn":2}}"#).unwrap();
        assert_eq!(signal.opcode(), Some(Opcode::Identify));
        let body: IdentifyBody = serde_json::from_value(signal.body.unwrap()).unwrap();
        assert_eq!(body.sn, Some(2));
    }

    #[test]
    fn pong_has_no_body() {
        assert_eq!(serde_json::to_value(Signal::pong()).unwrap(), json!({"op": 2}));
    }
}
