//! Resource kinds and attribute snapshots.
//!
//! These types describe platform resources independently of whether they come
//! from a blueprint or a live listing.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::ResourceId;

/// The kinds of resource the engine manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ResourceKind {
    /// A role-like permission holder.
    Role = 1,
    /// A grouping container for channels.
    Category = 2,
    /// A leaf channel, optionally inside a category.
    Channel = 3,
}

impl ResourceKind {
    /// All kinds, in provisioning order.
    pub const ALL: [Self; 3] = [Self::Role, Self::Category, Self::Channel];

    /// Stable lowercase name used in step identifiers and URLs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Role => "role",
            Self::Category => "category",
            Self::Channel => "channel",
        }
    }

    /// Plural form used by the platform REST paths.
    #[must_use]
    pub const fn plural(self) -> &'static str {
        match self {
            Self::Role => "roles",
            Self::Category => "categories",
            Self::Channel => "channels",
        }
    }

    /// Convert the kind to its numeric representation.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The mutable attributes of a resource.
///
/// Used both as the payload of update calls and as the prior-state snapshot
/// recorded for reversible updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAttributes {
    /// Display name.
    pub name: String,
    /// Zero-based position within the sibling set.
    pub position: u32,
    /// Named permission template applied to the resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_template: Option<String>,
    /// Parent category (channels only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ResourceId>,
}
