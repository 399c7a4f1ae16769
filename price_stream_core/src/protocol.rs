// Wire frames exchanged with the price server
// Inbound: {"type":"pong"}, {"token":..,"price":..} (optionally "type":"price_update"), anything else passes through.
// Outbound: {"type":"ping"}.

use crate::error::StreamError;
use crate::models::PriceUpdate;
use serde::Deserialize;
use serde_json::{json, Value};

pub const PONG_TYPE: &str = "pong";
pub const PRICE_UPDATE_TYPE: &str = "price_update";

/// Price frame as sent by the server
#[derive(Debug, Clone, Deserialize)]
pub struct PriceFrame {
    /// Token mint address, any case, with or without the vanity suffix
    pub token: String,
    pub price: f64,
    #[serde(default)]
    pub sequence: Option<Value>,
    #[serde(default)]
    pub seq: Option<Value>,
    #[serde(default)]
    pub ts: Option<Value>,
}

impl PriceFrame {
    /// Ordering stamp, taken from `sequence`, then `seq`, then `ts`. Only the first
    /// field present counts, and it is ignored unless it is a non-negative integer.
    pub fn ordering(&self) -> Option<u64> {
        [&self.sequence, &self.seq, &self.ts]
            .into_iter()
            .flatten()
            .next()
            .and_then(Value::as_u64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Heartbeat acknowledgment
    Pong,
    /// Price frame; `raw` is the frame as received
    Price { update: PriceUpdate, raw: Value },
    /// Any other application frame
    Other(Value),
}

pub fn heartbeat_frame() -> String {
    json!({ "type": "ping" }).to_string()
}

pub fn decode_frame(text: &str) -> Result<InboundFrame, StreamError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| StreamError::Decode(format!("{} in frame {}", e, truncate(text))))?;

    let Some(obj) = value.as_object() else {
        return Err(StreamError::Schema(format!(
            "expected a JSON object, got {}",
            truncate(text)
        )));
    };

    let frame_type = obj.get("type").and_then(Value::as_str);
    if frame_type == Some(PONG_TYPE) {
        return Ok(InboundFrame::Pong);
    }

    let looks_like_price = obj.contains_key("token") && obj.contains_key("price");
    if frame_type == Some(PRICE_UPDATE_TYPE) || looks_like_price {
        let frame = PriceFrame::deserialize(&value)
            .map_err(|e| StreamError::Schema(format!("bad price frame: {}", e)))?;
        if !frame.price.is_finite() {
            return Err(StreamError::Schema(format!(
                "non-finite price for {}",
                frame.token
            )));
        }
        let sequence = frame.ordering();
        let update = PriceUpdate {
            key: frame.token,
            price: frame.price,
            sequence,
        };
        return Ok(InboundFrame::Price { update, raw: value });
    }

    Ok(InboundFrame::Other(value))
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(120) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
