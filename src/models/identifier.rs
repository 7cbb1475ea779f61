use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of an inspection, either minted on this device while the backend
/// was unreachable or assigned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "origin", content = "token", rename_all = "camelCase")]
pub enum InspectionId {
    Local(String),
    Remote(String),
}

impl InspectionId {
    pub fn mint_local() -> Self {
        InspectionId::Local(Uuid::new_v4().to_string())
    }

    pub fn token(&self) -> &str {
        match self {
            InspectionId::Local(token) | InspectionId::Remote(token) => token,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, InspectionId::Local(_))
    }

    pub fn remote(&self) -> Option<&str> {
        match self {
            InspectionId::Remote(token) => Some(token),
            InspectionId::Local(_) => None,
        }
    }

    pub fn origin_str(&self) -> &'static str {
        match self {
            InspectionId::Local(_) => "local",
            InspectionId::Remote(_) => "remote",
        }
    }

    pub fn from_parts(origin: &str, token: String) -> Option<Self> {
        match origin {
            "local" => Some(InspectionId::Local(token)),
            "remote" => Some(InspectionId::Remote(token)),
            _ => None,
        }
    }

    /// Replaces a local id with its server-assigned counterpart. Remote ids and
    /// unrelated local ids come back unchanged.
    pub fn remapped(&self, local: &str, remote: &str) -> Self {
        match self {
            InspectionId::Local(token) if token == local => {
                InspectionId::Remote(remote.to_string())
            }
            other => other.clone(),
        }
    }
}

impl fmt::Display for InspectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.origin_str(), self.token())
    }
}
