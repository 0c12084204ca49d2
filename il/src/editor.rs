//! External editor kinds and their wire identities

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoordinatorError;

/// The external editor selected in the host's settings
///
/// Discriminants match the values stored by the host's editor setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExternalEditorId {
    None = 0,
    VisualStudio = 1,
    VisualStudioForMac = 2,
    MonoDevelop = 3,
    VsCode = 4,
    Rider = 5,
}

impl ExternalEditorId {
    pub const ALL: [ExternalEditorId; 6] = [
        ExternalEditorId::None,
        ExternalEditorId::VisualStudio,
        ExternalEditorId::VisualStudioForMac,
        ExternalEditorId::MonoDevelop,
        ExternalEditorId::VsCode,
        ExternalEditorId::Rider,
    ];

    /// Identity a peer of this kind announces in its handshake
    ///
    /// Independent of the variant names. `None` has no identity and no
    /// coordination is performed.
    pub fn identity(self) -> Option<&'static str> {
        match self {
            ExternalEditorId::None => None,
            ExternalEditorId::VisualStudio => Some("VisualStudio"),
            ExternalEditorId::VsCode => Some("VisualStudioCode"),
            ExternalEditorId::Rider => Some("Rider"),
            ExternalEditorId::VisualStudioForMac => Some("VisualStudioForMac"),
            ExternalEditorId::MonoDevelop => Some("MonoDevelop"),
        }
    }

    /// Handle slot used to launch this editor, or `NotLaunchable`
    pub fn launch_variant(self) -> Result<LaunchVariant, CoordinatorError> {
        self.launch_variant_for(cfg!(target_os = "macos"))
    }

    pub(crate) fn launch_variant_for(self, is_macos: bool) -> Result<LaunchVariant, CoordinatorError> {
        match self {
            ExternalEditorId::None | ExternalEditorId::VisualStudio => Err(CoordinatorError::NotLaunchable(self)),
            ExternalEditorId::VisualStudioForMac if is_macos => Ok(LaunchVariant::VisualStudioForMac),
            ExternalEditorId::VisualStudioForMac | ExternalEditorId::MonoDevelop => Ok(LaunchVariant::MonoDevelop),
            ExternalEditorId::Rider => Ok(LaunchVariant::Rider),
            ExternalEditorId::VsCode => Ok(LaunchVariant::VsCode),
        }
    }
}

impl TryFrom<i64> for ExternalEditorId {
    type Error = CoordinatorError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        ExternalEditorId::ALL
            .into_iter()
            .find(|id| *id as i64 == value)
            .ok_or(CoordinatorError::UnsupportedEditor(value))
    }
}

impl FromStr for ExternalEditorId {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "none" => Ok(ExternalEditorId::None),
            "visualstudio" | "vs" => Ok(ExternalEditorId::VisualStudio),
            "visualstudioformac" | "vsmac" => Ok(ExternalEditorId::VisualStudioForMac),
            "monodevelop" => Ok(ExternalEditorId::MonoDevelop),
            "vscode" | "visualstudiocode" | "code" => Ok(ExternalEditorId::VsCode),
            "rider" => Ok(ExternalEditorId::Rider),
            _ => Err(CoordinatorError::UnknownEditorName(s.to_string())),
        }
    }
}

impl fmt::Display for ExternalEditorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExternalEditorId::None => "None",
            ExternalEditorId::VisualStudio => "VisualStudio",
            ExternalEditorId::VisualStudioForMac => "VisualStudioForMac",
            ExternalEditorId::MonoDevelop => "MonoDevelop",
            ExternalEditorId::VsCode => "VsCode",
            ExternalEditorId::Rider => "Rider",
        };
        f.write_str(name)
    }
}

/// Distinct launchable flavours of an editor; each owns one process handle slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchVariant {
    MonoDevelop,
    VisualStudioForMac,
    Rider,
    VsCode,
}

impl LaunchVariant {
    /// Name shown to the user when the editor cannot be found
    pub fn display_name(self) -> &'static str {
        match self {
            LaunchVariant::MonoDevelop => "MonoDevelop",
            LaunchVariant::VisualStudioForMac => "Visual Studio",
            LaunchVariant::Rider => "Rider",
            LaunchVariant::VsCode => "Visual Studio Code",
        }
    }
}

impl fmt::Display for LaunchVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}
