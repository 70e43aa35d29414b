// SPDX-License-Identifier: GPL-3.0-only
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoftwareType {
    Gcs,
    SlimGcs,
    Updater,
    Firmware,
    Bootloader,
    Settings,
}

impl SoftwareType {
    pub const ALL: [SoftwareType; 6] = [
        SoftwareType::Gcs,
        SoftwareType::SlimGcs,
        SoftwareType::Updater,
        SoftwareType::Firmware,
        SoftwareType::Bootloader,
        SoftwareType::Settings,
    ];

    /// Tag used for the software-type level of the catalog XML
    pub fn tag(self) -> &'static str {
        match self {
            SoftwareType::Gcs => "gcs",
            SoftwareType::SlimGcs => "slim_gcs",
            SoftwareType::Updater => "updater",
            SoftwareType::Firmware => "firmware",
            SoftwareType::Bootloader => "bootloader",
            SoftwareType::Settings => "settings",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            SoftwareType::Gcs => "GCS",
            SoftwareType::SlimGcs => "TBS Agent",
            SoftwareType::Updater => "Updater",
            SoftwareType::Firmware => "Firmware",
            SoftwareType::Bootloader => "Bootloader",
            SoftwareType::Settings => "Settings",
        }
    }

    /// Software that only ships for the embedded board family
    pub fn is_embedded(self) -> bool {
        matches!(
            self,
            SoftwareType::Firmware | SoftwareType::Bootloader | SoftwareType::Settings
        )
    }
}

impl fmt::Display for SoftwareType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsType {
    Win32,
    Win64,
    Osx32,
    Osx64,
    Linux32,
    Linux64,
    Embedded,
}

impl OsType {
    /// Catalog XML order
    pub const ALL: [OsType; 7] = [
        OsType::Win32,
        OsType::Win64,
        OsType::Osx32,
        OsType::Osx64,
        OsType::Linux32,
        OsType::Linux64,
        OsType::Embedded,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            OsType::Win32 => "win32",
            OsType::Win64 => "win64",
            OsType::Osx32 => "osx32",
            OsType::Osx64 => "osx64",
            OsType::Linux32 => "linux32",
            OsType::Linux64 => "linux64",
            OsType::Embedded => "embeded",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|os| os.tag() == tag)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            OsType::Win32 => "Windows 32bit",
            OsType::Win64 => "Windows 64bit",
            OsType::Osx32 => "OSX 32bit",
            OsType::Osx64 => "OSX 64bit",
            OsType::Linux32 => "Linux 32bit",
            OsType::Linux64 => "Linux 64bit",
            OsType::Embedded => "Embeded",
        }
    }

    pub fn is_linux(self) -> bool {
        matches!(self, OsType::Linux32 | OsType::Linux64)
    }
}

impl fmt::Display for OsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Current,
    Test,
    Old,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Current, Category::Test, Category::Old];

    /// Catalog XML order
    pub const DOCUMENT_ORDER: [Category; 3] = [Category::Current, Category::Old, Category::Test];

    pub fn tag(self) -> &'static str {
        match self {
            Category::Current => "current_release",
            Category::Test => "test_release",
            Category::Old => "old_release",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.tag() == tag)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Current => "current",
            Category::Test => "test",
            Category::Old => "old",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown category: {}", s))
    }
}

/// Pending change of a catalog slot relative to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    None,
    CopyToServer,
    DeleteFromServer,
    ChangedMetadata,
}

/// Known embedded board identifiers
const HARDWARE_NAMES: &[(u16, &str)] = &[
    (0, "none"),
    (3, "PipXtreme"),
    (4, "CopterControl"),
    (9, "RevoMini"),
    (127, "Revolution"),
    (129, "Freedom"),
    (131, "Flyingf3"),
    (132, "Flyingf4"),
    (133, "Discoveryf4"),
    (134, "Quanton"),
    (136, "Sparky"),
    (137, "SparkyBGC"),
    (145, "Colibri"),
];

pub fn hardware_name(hardware_type: u16) -> Option<&'static str> {
    HARDWARE_NAMES
        .iter()
        .find(|(id, _)| *id == hardware_type)
        .map(|(_, name)| *name)
}

/// Supersession key: a new artifact replaces any live artifact with the same key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictKey {
    Hardware {
        hardware_type: u16,
        software_type: SoftwareType,
    },
    Os {
        os_type: OsType,
        software_type: SoftwareType,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub software_type: SoftwareType,
    pub os_type: OsType,

    /// Board identifier, only meaningful for embedded software
    #[serde(default)]
    pub hardware_type: u16,

    pub name: String,
    pub uavo_hash: String,
    pub md5: String,
    pub package_link: String,
    pub release_link: String,

    /// Manifest sidecar, empty when the artifact has none
    #[serde(default)]
    pub script_link: String,

    pub date: NaiveDate,
}

impl Artifact {
    pub fn conflict_key(&self) -> Option<ConflictKey> {
        match self.software_type {
            SoftwareType::Firmware | SoftwareType::Bootloader => Some(ConflictKey::Hardware {
                hardware_type: self.hardware_type,
                software_type: self.software_type,
            }),
            SoftwareType::Updater | SoftwareType::Gcs | SoftwareType::SlimGcs => {
                Some(ConflictKey::Os {
                    os_type: self.os_type,
                    software_type: self.software_type,
                })
            }
            SoftwareType::Settings => None,
        }
    }

    /// Embedded software must target the embedded OS and desktop software must not
    pub fn is_well_formed(&self) -> bool {
        self.software_type.is_embedded() == (self.os_type == OsType::Embedded)
    }

    pub fn has_script(&self) -> bool {
        !self.script_link.trim().is_empty()
    }
}
