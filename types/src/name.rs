use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Symbolic event name, e.g. `<<progress>>`.
///
/// Guaranteed non-empty after trimming. Names are compared verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventName(String);

#[derive(Debug, Error)]
#[error("event name must not be empty")]
pub struct EmptyNameError;

impl EventName {
    pub fn new(value: impl Into<String>) -> Result<Self, EmptyNameError> {
        let value = value.into();
        if value.trim().is_empty() {
            Err(EmptyNameError)
        } else {
            Ok(Self(value))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EventName {
    type Error = EmptyNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for EventName {
    type Error = EmptyNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EventName> for String {
    fn from(value: EventName) -> Self {
        value.0
    }
}

impl AsRef<str> for EventName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A compile-time checked event name for constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StaticEventName(&'static str);

impl StaticEventName {
    #[must_use]
    pub const fn new(value: &'static str) -> Self {
        assert!(!value.is_empty(), "StaticEventName must not be empty");
        Self(value)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        self.0
    }

    #[must_use]
    pub fn to_event_name(self) -> EventName {
        EventName(self.0.to_string())
    }
}

/// Event used to carry proxy calls when nothing else is configured.
pub const DEFAULT_CALL_EVENT: StaticEventName = StaticEventName::new("<<marshal-call>>");
