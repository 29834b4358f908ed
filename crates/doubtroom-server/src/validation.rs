//! Structural checks run before a handler sees its payload.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ChatError;

/// Required fields and enum-constrained fields of one inbound event.
#[derive(Debug, Clone, Copy)]
pub struct Schema {
    pub required: &'static [&'static str],
    pub enums: &'static [(&'static str, &'static [&'static str])],
}

pub const JOIN_ROOM: Schema = Schema {
    required: &["roomId", "userId"],
    enums: &[
        ("userType", &["student", "teacher"]),
        ("doubtStatus", &["resolved", "unresolved"]),
    ],
};

pub const SEND_MESSAGE: Schema = Schema {
    required: &["roomId", "senderId", "senderModel"],
    enums: &[("senderModel", &["Student", "Teacher"])],
};

pub const TYPING_STATUS: Schema = Schema {
    required: &["roomId", "userId"],
    enums: &[],
};

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

impl Schema {
    pub fn check(&self, data: &Value) -> Result<(), ChatError> {
        let Some(fields) = data.as_object() else {
            return Err(ChatError::ValidationFailed("Data is required".into()));
        };

        for field in self.required {
            if !is_present(fields.get(*field)) {
                return Err(ChatError::ValidationFailed(format!("{field} is required")));
            }
        }

        for (field, allowed) in self.enums {
            let value = fields.get(*field);
            if !is_present(value) {
                continue;
            }
            let ok = value
                .and_then(Value::as_str)
                .is_some_and(|v| allowed.contains(&v));
            if !ok {
                return Err(ChatError::ValidationFailed(format!(
                    "{field} must be one of: {}",
                    allowed.join(", ")
                )));
            }
        }

        Ok(())
    }

    /// Check then deserialize into the typed request.
    pub fn parse<T: DeserializeOwned>(&self, data: Value) -> Result<T, ChatError> {
        self.check(&data)?;
        serde_json::from_value(data).map_err(|e| ChatError::ValidationFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doubtroom_shared::protocol::{JoinRoomRequest, SendMessageRequest};
    use serde_json::json;

    fn reason(result: Result<(), ChatError>) -> String {
        match result {
            Err(ChatError::ValidationFailed(reason)) => reason,
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn missing_payload() {
        assert_eq!(reason(JOIN_ROOM.check(&Value::Null)), "Data is required");
    }

    #[test]
    fn missing_and_empty_required_fields() {
        assert_eq!(
            reason(JOIN_ROOM.check(&json!({"userId": "u1"}))),
            "roomId is required"
        );
        assert_eq!(
            reason(SEND_MESSAGE.check(&json!({"roomId": "r1", "senderId": "", "senderModel": "Student"}))),
            "senderId is required"
        );
    }

    #[test]
    fn enum_constraints() {
        assert_eq!(
            reason(SEND_MESSAGE.check(&json!({"roomId": "r1", "senderId": "s1", "senderModel": "Admin"}))),
            "senderModel must be one of: Student, Teacher"
        );
        assert!(JOIN_ROOM
            .check(&json!({"roomId": "r1", "userId": "u1", "doubtStatus": "closed"}))
            .is_err());
        // Optional enum fields may be omitted.
        assert!(JOIN_ROOM.check(&json!({"roomId": "r1", "userId": "u1"})).is_ok());
    }

    #[test]
    fn parse_into_typed_requests() {
        let req: JoinRoomRequest = JOIN_ROOM
            .parse(json!({"roomId": "r1", "userId": "u1", "userType": "teacher"}))
            .unwrap();
        assert_eq!(req.user_type.as_deref(), Some("teacher"));

        let err = SEND_MESSAGE
            .parse::<SendMessageRequest>(json!({"roomId": "r1", "senderId": 5, "senderModel": "Student"}));
        assert!(matches!(err, Err(ChatError::ValidationFailed(_))));
    }
}
