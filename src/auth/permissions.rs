//! Permission levels and the operation table for signer capabilities
//!
//! Every operation a caller can request maps to a fixed minimum level. An
//! origin may run an operation when its stored level is at least that
//! minimum; otherwise the broker has to ask the user.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::BrokerError;

/// Ordered permission tier granted to an origin
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PermissionLevel(pub u8);

impl PermissionLevel {
    /// No standing permission
    pub const NONE: Self = Self(0);
    pub const READ_PUBLIC_KEY: Self = Self(1);
    pub const READ_RELAYS: Self = Self(5);
    pub const SIGN_EVENT: Self = Self(10);
    /// Needed for both NIP-04 directions
    pub const NIP04: Self = Self(20);

    pub fn value(self) -> u8 {
        self.0
    }

    /// Whether this level covers `required`
    pub fn satisfies(self, required: PermissionLevel) -> bool {
        self >= required
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for PermissionLevel {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

/// Operations exposed to untrusted callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    #[serde(rename = "getPublicKey")]
    GetPublicKey,
    #[serde(rename = "getRelays")]
    GetRelays,
    #[serde(rename = "signEvent")]
    SignEvent,
    #[serde(rename = "nip04.encrypt")]
    Nip04Encrypt,
    #[serde(rename = "nip04.decrypt")]
    Nip04Decrypt,
}

/// Required level per operation, in ascending order
pub const PERMISSIONS_REQUIRED: [(OperationType, PermissionLevel); 5] = [
    required(OperationType::GetPublicKey),
    required(OperationType::GetRelays),
    required(OperationType::SignEvent),
    required(OperationType::Nip04Encrypt),
    required(OperationType::Nip04Decrypt),
];

const fn required(op: OperationType) -> (OperationType, PermissionLevel) {
    (op, op.required_permission())
}

impl OperationType {
    /// Wire name of the operation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetPublicKey => "getPublicKey",
            Self::GetRelays => "getRelays",
            Self::SignEvent => "signEvent",
            Self::Nip04Encrypt => "nip04.encrypt",
            Self::Nip04Decrypt => "nip04.decrypt",
        }
    }

    /// Minimum level an origin needs to run this operation
    pub const fn required_permission(self) -> PermissionLevel {
        match self {
            Self::GetPublicKey => PermissionLevel::READ_PUBLIC_KEY,
            Self::GetRelays => PermissionLevel::READ_RELAYS,
            Self::SignEvent => PermissionLevel::SIGN_EVENT,
            Self::Nip04Encrypt | Self::Nip04Decrypt => PermissionLevel::NIP04,
        }
    }

    /// Human-readable description shown on consent surfaces
    pub fn description(self) -> &'static str {
        match self {
            Self::GetPublicKey => "read your public key",
            Self::GetRelays => "read your list of preferred relays",
            Self::SignEvent => "sign events using your private key",
            Self::Nip04Encrypt => "encrypt messages to peers",
            Self::Nip04Decrypt => "decrypt messages from peers",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PERMISSIONS_REQUIRED
            .iter()
            .map(|(op, _)| *op)
            .find(|op| op.as_str() == s)
            .ok_or_else(|| BrokerError::UnknownOperation(s.to_string()))
    }
}

/// Operations unlocked by `level`
pub fn allowed_capabilities(level: PermissionLevel) -> Vec<OperationType> {
    PERMISSIONS_REQUIRED
        .iter()
        .filter(|(_, required)| level.satisfies(*required))
        .map(|(op, _)| *op)
        .collect()
}

/// Sentence describing everything `level` allows, e.g.
/// "read your public key and read your list of preferred relays".
pub fn permissions_string(level: PermissionLevel) -> String {
    let descriptions: Vec<&str> = allowed_capabilities(level)
        .into_iter()
        .map(OperationType::description)
        .collect();

    match descriptions.split_last() {
        None => "none".to_string(),
        Some((last, [])) => last.to_string(),
        Some((last, rest)) => format!("{} and {}", rest.join(", "), last),
    }
}

/// How long a user grant lasts, as reported by the consent surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantCondition {
    /// Persist until revoked
    Forever,
    /// Persist for a limited time
    Expirable,
    /// Allow only the request that triggered the prompt
    Single,
    /// Deny
    No,
}

impl GrantCondition {
    pub fn is_grant(self) -> bool {
        !matches!(self, Self::No)
    }

    /// Whether a grant with this condition becomes standing permission
    pub fn persists(self) -> bool {
        matches!(self, Self::Forever | Self::Expirable)
    }
}

impl fmt::Display for GrantCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forever => write!(f, "forever"),
            Self::Expirable => write!(f, "expirable"),
            Self::Single => write!(f, "single"),
            Self::No => write!(f, "no"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level_of(name: &str) -> Option<PermissionLevel> {
        name.parse::<OperationType>()
            .ok()
            .map(OperationType::required_permission)
    }

    #[test]
    fn test_required_levels() {
        assert_eq!(level_of("getPublicKey"), Some(PermissionLevel(1)));
        assert_eq!(level_of("getRelays"), Some(PermissionLevel(5)));
        assert_eq!(level_of("signEvent"), Some(PermissionLevel(10)));
        assert_eq!(level_of("nip04.encrypt"), Some(PermissionLevel(20)));
        assert_eq!(level_of("nip04.decrypt"), Some(PermissionLevel(20)));
    }

    #[test]
    fn test_table_agrees_with_operations() {
        for (op, level) in PERMISSIONS_REQUIRED {
            assert_eq!(op.required_permission(), level);
        }
        assert!(PERMISSIONS_REQUIRED.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_unknown_operations_blocked() {
        assert_eq!(level_of("replaceURL"), None);
        assert!(matches!(
            "nip44.encrypt".parse::<OperationType>(),
            Err(BrokerError::UnknownOperation(name)) if name == "nip44.encrypt"
        ));
    }

    #[test]
    fn test_level_ordering() {
        assert!(PermissionLevel::READ_RELAYS.satisfies(OperationType::GetPublicKey.required_permission()));
        assert!(!PermissionLevel::READ_RELAYS.satisfies(OperationType::SignEvent.required_permission()));
        assert!(PermissionLevel::SIGN_EVENT.satisfies(OperationType::SignEvent.required_permission()));
        assert!(PermissionLevel::NIP04 > PermissionLevel::SIGN_EVENT);
        assert!(!PermissionLevel::NONE.satisfies(PermissionLevel::READ_PUBLIC_KEY));
    }

    #[test]
    fn test_operation_names_round_trip_through_serde() {
        for (op, _) in PERMISSIONS_REQUIRED {
            let json = serde_json::to_value(op).unwrap();
            assert_eq!(json, serde_json::json!(op.as_str()));
            assert_eq!(op.as_str().parse::<OperationType>().unwrap(), op);
        }
    }

    #[test]
    fn test_allowed_capabilities() {
        assert!(allowed_capabilities(PermissionLevel::NONE).is_empty());
        assert_eq!(
            allowed_capabilities(PermissionLevel::SIGN_EVENT),
            vec![
                OperationType::GetPublicKey,
                OperationType::GetRelays,
                OperationType::SignEvent
            ]
        );
        assert_eq!(allowed_capabilities(PermissionLevel::NIP04).len(), 5);
    }

    #[test]
    fn test_permissions_string() {
        assert_eq!(permissions_string(PermissionLevel::NONE), "none");
        assert_eq!(
            permissions_string(PermissionLevel::READ_PUBLIC_KEY),
            "read your public key"
        );
        assert_eq!(
            permissions_string(PermissionLevel::SIGN_EVENT),
            "read your public key, read your list of preferred relays and sign events using your private key"
        );
    }

    #[test]
    fn test_grant_conditions() {
        let parsed: GrantCondition = serde_json::from_str("\"expirable\"").unwrap();
        assert_eq!(parsed, GrantCondition::Expirable);
        assert!(GrantCondition::Forever.persists());
        assert!(GrantCondition::Expirable.persists());
        assert!(!GrantCondition::Single.persists());
        assert!(GrantCondition::Single.is_grant());
        assert!(!GrantCondition::No.is_grant());
        assert!(!GrantCondition::No.persists());
    }
}
