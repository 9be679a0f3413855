use std::fmt::Formatter;
use std::ops::Deref;
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};

pub const fn default_true() -> bool {
    true
}

pub const fn default_interval() -> Duration {
    Duration::from_secs(60)
}

/// A simple wrapper for sensitive strings containing credentials.
///
/// Configs get logged and serialized, the wrapped value never does.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        SecretString(value)
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        SecretString(value.to_string())
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("******")
    }
}

impl std::fmt::Display for SecretString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("******")
    }
}

impl Deref for SecretString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer).map(SecretString)
    }
}

impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str("******")
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn secret_is_masked() {
        let secret: SecretString = serde_yaml::from_str("hunter2").unwrap();

        assert_eq!(secret.expose(), "hunter2");
        assert_eq!(format!("{secret:?}"), "******");
        assert_eq!(secret.to_string(), "******");
        let text = serde_yaml::to_string(&secret).unwrap();
        assert!(!text.contains("hunter2"));
    }
}
