// ABOUTME: Package-install requests queued for deferred batch installation
// ABOUTME: Identity is (name, tool); the constraint is advisory and conflict-checked

use serde::{Deserialize, Serialize};

/// One requested third-party package install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRequest {
    pub name: String,
    /// Version constraint as given, e.g. `==2.0` or `>=1.2`. `None` means
    /// latest available.
    pub constraint: Option<String>,
    /// Installer tool tag as given; validated only when the queue drains.
    pub tool: String,
    /// Consecutive failed attempts classified as network timeouts.
    #[serde(default)]
    pub timeout_failures: u32,
    /// Consecutive failed attempts for any other reason.
    #[serde(default)]
    pub other_failures: u32,
}

impl PackageRequest {
    pub fn new(
        name: impl Into<String>,
        constraint: Option<String>,
        tool: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            constraint,
            tool: tool.into(),
            timeout_failures: 0,
            other_failures: 0,
        }
    }

    /// Queue identity: one live entry per (name, tool) pair.
    pub fn identity(&self) -> (&str, &str) {
        (&self.name, &self.tool)
    }

    pub fn same_identity(&self, other: &PackageRequest) -> bool {
        self.identity() == other.identity()
    }

    /// Name with the constraint glued on, the way replies print packages.
    pub fn display_name(&self) -> String {
        match &self.constraint {
            Some(constraint) => format!("{}{}", self.name, constraint),
            None => self.name.clone(),
        }
    }
}

/// The two installer back-ends the drain knows how to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallTool {
    Pip,
    Apt,
}

impl InstallTool {
    /// Parse a tool tag, tolerating case and surrounding whitespace.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_lowercase().as_str() {
            "pip" => Some(InstallTool::Pip),
            "apt" => Some(InstallTool::Apt),
            _ => None,
        }
    }
}

impl std::fmt::Display for InstallTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstallTool::Pip => write!(f, "pip"),
            InstallTool::Apt => write!(f, "apt"),
        }
    }
}
