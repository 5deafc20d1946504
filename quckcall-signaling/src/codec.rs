use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::{SignalingError, SignalingMessage};

/// One text frame on the signaling socket.
///
/// Events optionally carry an `ack` id; the peer answers such an event with
/// an acknowledgement frame `{"ack": id, "data": ...}` or
/// `{"ack": id, "error": "..."}`.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Event {
        ack: Option<u64>,
        message: SignalingMessage,
    },
    Ack {
        ack: u64,
        result: Result<Value, String>,
    },
}

pub fn encode(frame: &Frame) -> Result<String, SignalingError> {
    let value = match frame {
        Frame::Event { ack, message } => {
            let mut value = serde_json::to_value(message)?;
            if let (Some(ack), Value::Object(object)) = (ack, &mut value) {
                object.insert("ack".into(), Value::from(*ack));
            }
            value
        }
        Frame::Ack { ack, result } => {
            let mut object = Map::new();
            object.insert("ack".into(), Value::from(*ack));
            match result {
                Ok(data) => object.insert("data".into(), data.clone()),
                Err(reason) => object.insert("error".into(), Value::from(reason.as_str())),
            };
            Value::Object(object)
        }
    };
    Ok(serde_json::to_string(&value)?)
}

pub fn decode(text: &str) -> Result<Frame, SignalingError> {
    let mut object: Map<String, Value> = serde_json::from_str(text)?;
    let ack = object.remove("ack").and_then(|v| v.as_u64());
    let event = match object.get("event") {
        Some(Value::String(event)) => event.clone(),
        _ => {
            let ack = ack.ok_or_else(|| {
                SignalingError::Codec(serde::de::Error::custom("frame has neither event nor ack"))
            })?;
            let result = match object.remove("error") {
                Some(Value::String(reason)) => Err(reason),
                Some(other) => Err(other.to_string()),
                None => Ok(object.remove("data").unwrap_or(Value::Null)),
            };
            return Ok(Frame::Ack { ack, result });
        }
    };
    if !SignalingMessage::EVENTS.contains(&event.as_str()) {
        return Err(SignalingError::UnknownEvent(event));
    }
    let message = serde_json::from_value(Value::Object(object))?;
    Ok(Frame::Event { ack, message })
}

/// Decode the payload of an acknowledgement into the reply type the request expects.
pub fn decode_reply<T: DeserializeOwned>(data: Value) -> Result<T, SignalingError> {
    Ok(serde_json::from_value(data)?)
}
