use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(MessageRole {
    User => "user",
    Model => "model",
});

str_enum!(MessageStatus {
    Waiting => "waiting",
    Streaming => "streaming",
    Done => "done",
    Error => "error",
});

str_enum!(QuizStatus {
    Idle => "idle",
    Waiting => "waiting",
    Streaming => "streaming",
    Done => "done",
    Error => "error",
});

impl MessageStatus {
    /// Terminal states absorb all further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Valid transitions: waiting → streaming → done | error, with
    /// waiting allowed to jump straight to a terminal state (empty
    /// responses, early failures). Nothing leaves a terminal state.
    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        match self {
            Self::Waiting => matches!(
                next,
                Self::Streaming | Self::Done | Self::Error
            ),
            Self::Streaming => matches!(next, Self::Done | Self::Error),
            Self::Done | Self::Error => false,
        }
    }
}

impl QuizStatus {
    /// The quiz-level mirror of a message status, so the session list can
    /// show generation progress without reading the message table.
    pub fn mirroring(message: MessageStatus) -> Self {
        match message {
            MessageStatus::Waiting => Self::Waiting,
            MessageStatus::Streaming => Self::Streaming,
            MessageStatus::Done => Self::Done,
            MessageStatus::Error => Self::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn roles_round_trip_through_strings() {
        for role in [MessageRole::User, MessageRole::Model] {
            assert_eq!(MessageRole::from_str(role.as_str()).unwrap(), role);
        }
    }

    #[test]
    fn statuses_round_trip_through_strings() {
        for status in [
            MessageStatus::Waiting,
            MessageStatus::Streaming,
            MessageStatus::Done,
            MessageStatus::Error,
        ] {
            assert_eq!(MessageStatus::from_str(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn unknown_value_is_rejected() {
        let err = MessageStatus::from_str("pending").unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidEnum { .. }));
    }

    #[test]
    fn serde_uses_snake_case_strings() {
        assert_eq!(
            serde_json::to_string(&MessageRole::Model).unwrap(),
            "\"model\""
        );
        assert_eq!(
            serde_json::to_string(&MessageStatus::Waiting).unwrap(),
            "\"waiting\""
        );
    }

    #[test]
    fn waiting_can_reach_every_later_state() {
        let waiting = MessageStatus::Waiting;
        assert!(waiting.can_transition_to(MessageStatus::Streaming));
        assert!(waiting.can_transition_to(MessageStatus::Done));
        assert!(waiting.can_transition_to(MessageStatus::Error));
    }

    #[test]
    fn streaming_only_reaches_terminal_states() {
        let streaming = MessageStatus::Streaming;
        assert!(!streaming.can_transition_to(MessageStatus::Waiting));
        assert!(!streaming.can_transition_to(MessageStatus::Streaming));
        assert!(streaming.can_transition_to(MessageStatus::Done));
        assert!(streaming.can_transition_to(MessageStatus::Error));
    }

    #[test]
    fn terminal_states_absorb() {
        for terminal in [MessageStatus::Done, MessageStatus::Error] {
            assert!(terminal.is_terminal());
            for next in [
                MessageStatus::Waiting,
                MessageStatus::Streaming,
                MessageStatus::Done,
                MessageStatus::Error,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn quiz_status_mirrors_message_status() {
        assert_eq!(
            QuizStatus::mirroring(MessageStatus::Streaming),
            QuizStatus::Streaming
        );
        assert_eq!(QuizStatus::mirroring(MessageStatus::Done), QuizStatus::Done);
        assert_eq!(
            QuizStatus::mirroring(MessageStatus::Error),
            QuizStatus::Error
        );
    }
}
