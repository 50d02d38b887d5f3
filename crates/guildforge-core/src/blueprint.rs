//! Declarative desired-state model.
//!
//! A [`Blueprint`] lists roles and categories in the order they should appear
//! on the platform. Each category carries its channels, also in order. Array
//! order is the only source of positions: [`Blueprint::specs`] assigns dense,
//! zero-based positions and ignores anything the author may have intended
//! with gaps.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::resource::ResourceKind;

/// Desired state for one tenant (or a subset of it).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blueprint {
    /// Roles, highest first.
    #[serde(default)]
    pub roles: Vec<RoleSpec>,
    /// Categories (panel groups) with their channels.
    #[serde(default)]
    pub categories: Vec<CategorySpec>,
}

/// A role entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSpec {
    /// Role name.
    pub name: String,
    /// Permission template applied to the role.
    #[serde(default)]
    pub permission_template: Option<String>,
}

/// A category entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySpec {
    /// Category name.
    pub name: String,
    /// Permission template applied to the category.
    #[serde(default)]
    pub permission_template: Option<String>,
    /// Channels inside this category.
    #[serde(default)]
    pub channels: Vec<ChannelSpec>,
}

/// A channel entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Channel name.
    pub name: String,
    /// Permission template applied to the channel.
    #[serde(default)]
    pub permission_template: Option<String>,
}

/// A single desired resource with its derived position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceSpec {
    /// A role.
    Role {
        /// Role name.
        name: String,
        /// Position among roles.
        position: u32,
        /// Permission template.
        permission_template: Option<String>,
    },
    /// A category.
    Category {
        /// Category name.
        name: String,
        /// Position among categories.
        position: u32,
        /// Permission template.
        permission_template: Option<String>,
    },
    /// A channel inside a category.
    Channel {
        /// Channel name.
        name: String,
        /// Position among the channels of its category.
        position: u32,
        /// Permission template.
        permission_template: Option<String>,
        /// Name of the blueprint category that owns the channel.
        category: String,
    },
}

impl ResourceSpec {
    /// The resource kind.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Role { .. } => ResourceKind::Role,
            Self::Category { .. } => ResourceKind::Category,
            Self::Channel { .. } => ResourceKind::Channel,
        }
    }

    /// The desired name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Role { name, .. } | Self::Category { name, .. } | Self::Channel { name, .. } => {
                name
            }
        }
    }

    /// The derived position.
    #[must_use]
    pub const fn position(&self) -> u32 {
        match self {
            Self::Role { position, .. }
            | Self::Category { position, .. }
            | Self::Channel { position, .. } => *position,
        }
    }

    /// The permission template, if any.
    #[must_use]
    pub fn permission_template(&self) -> Option<&str> {
        match self {
            Self::Role {
                permission_template,
                ..
            }
            | Self::Category {
                permission_template,
                ..
            }
            | Self::Channel {
                permission_template,
                ..
            } => permission_template.as_deref(),
        }
    }

    /// The owning category name (channels only).
    #[must_use]
    pub fn parent_ref(&self) -> Option<&str> {
        match self {
            Self::Channel { category, .. } => Some(category),
            Self::Role { .. } | Self::Category { .. } => None,
        }
    }

    /// Stable identity of the blueprint entry.
    ///
    /// Does not depend on whether the entry ends up created or updated, so a
    /// step keeps its identifier when live state drifts between attempts.
    #[must_use]
    pub fn identity(&self) -> String {
        match self {
            Self::Channel { name, category, .. } => format!("channel:{category}/{name}"),
            other => format!("{}:{}", other.kind(), other.name()),
        }
    }
}

impl Blueprint {
    /// Parse a blueprint from JSON.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidBlueprint` if the document is malformed or
    /// contains an empty name.
    pub fn from_json(data: &str) -> Result<Self> {
        let blueprint: Self =
            serde_json::from_str(data).map_err(|e| CoreError::InvalidBlueprint(e.to_string()))?;
        blueprint.check_names()?;
        Ok(blueprint)
    }

    /// Returns true if the blueprint declares nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty() && self.categories.is_empty()
    }

    /// Select the given categories (panel groups) together with all roles.
    ///
    /// Categories keep their blueprint order, not the order of `names`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidBlueprint` naming the first unknown category.
    pub fn subset<S: AsRef<str>>(&self, names: &[S]) -> Result<Self> {
        for wanted in names {
            let wanted = wanted.as_ref();
            if !self.categories.iter().any(|c| c.name == wanted) {
                return Err(CoreError::InvalidBlueprint(format!(
                    "unknown category: {wanted}"
                )));
            }
        }

        Ok(Self {
            roles: self.roles.clone(),
            categories: self
                .categories
                .iter()
                .filter(|c| names.iter().any(|n| n.as_ref() == c.name))
                .cloned()
                .collect(),
        })
    }

    /// Flatten into resource specs in provisioning order.
    ///
    /// Roles come first, then categories, then the channels of each category.
    /// Positions are the array index within each sibling set.
    #[must_use]
    pub fn specs(&self) -> Vec<ResourceSpec> {
        let mut specs = Vec::new();

        for (position, role) in (0u32..).zip(&self.roles) {
            specs.push(ResourceSpec::Role {
                name: role.name.clone(),
                position,
                permission_template: role.permission_template.clone(),
            });
        }

        for (position, category) in (0u32..).zip(&self.categories) {
            specs.push(ResourceSpec::Category {
                name: category.name.clone(),
                position,
                permission_template: category.permission_template.clone(),
            });
        }

        for category in &self.categories {
            for (position, channel) in (0u32..).zip(&category.channels) {
                specs.push(ResourceSpec::Channel {
                    name: channel.name.clone(),
                    position,
                    permission_template: channel.permission_template.clone(),
                    category: category.name.clone(),
                });
            }
        }

        specs
    }

    fn check_names(&self) -> Result<()> {
        let empty = self.roles.iter().any(|r| r.name.trim().is_empty())
            || self.categories.iter().any(|c| {
                c.name.trim().is_empty() || c.channels.iter().any(|ch| ch.name.trim().is_empty())
            });
        if empty {
            return Err(CoreError::InvalidBlueprint(
                "resource names must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
