use crate::core::error::DeckError;
use serde::{Deserialize, Serialize};

/// The two package classes the front-end distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageCategory {
    Formula,
    Cask,
}

impl PackageCategory {
    pub const ALL: [PackageCategory; 2] = [PackageCategory::Formula, PackageCategory::Cask];
}

impl std::fmt::Display for PackageCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PackageCategory::Formula => write!(f, "formula"),
            PackageCategory::Cask => write!(f, "cask"),
        }
    }
}

impl std::str::FromStr for PackageCategory {
    type Err = DeckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "formula" | "formulae" => Ok(PackageCategory::Formula),
            "cask" | "casks" => Ok(PackageCategory::Cask),
            _ => Err(DeckError::InvalidConfig(format!(
                "Invalid package category: {s}"
            ))),
        }
    }
}

/// An install, uninstall, or update action against a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Install,
    Uninstall,
    Update,
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationKind::Install => write!(f, "install"),
            MutationKind::Uninstall => write!(f, "uninstall"),
            MutationKind::Update => write!(f, "update"),
        }
    }
}

/// Priority carried by background fetch requests. Ordered so that higher
/// priority compares greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrefetchPriority {
    Low,
    Medium,
    High,
}

/// One package as reported by the external data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub version: String,
    pub description: String,
    pub installed: bool,
    pub outdated: bool,
    pub homepage: String,
    pub dependencies: Vec<String>,
    pub conflicts: Vec<String>,
    /// Download count over the trailing year, used for popularity ranking.
    pub downloads_365d: u64,
    pub category: PackageCategory,
}

pub type PackageSet = Vec<Package>;

/// Dependency/conflict listing for a single package, used by
/// related-package prefetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageDetails {
    pub name: String,
    pub dependencies: Vec<String>,
    pub conflicts: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn category_round_trips_through_display() {
        for category in PackageCategory::ALL {
            let parsed = PackageCategory::from_str(&category.to_string()).unwrap();
            assert_eq!(parsed, category);
        }
    }

    #[test]
    fn category_rejects_unknown_names() {
        assert!(PackageCategory::from_str("tap").is_err());
    }
}
