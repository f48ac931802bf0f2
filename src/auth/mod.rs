//! Authorization for Keyward
//!
//! Provides:
//! - Permission levels and the per-operation requirement table
//! - Grant conditions reported by the consent surface
//! - Capability descriptions for consent prompts

pub mod permissions;

pub use permissions::{
    allowed_capabilities, permissions_string, GrantCondition, OperationType, PermissionLevel,
    PERMISSIONS_REQUIRED,
};
