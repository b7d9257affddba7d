// SPDX-FileCopyrightText: 2024-2026 apticket contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Typed view over a signed build manifest.
//!
//! A build manifest carries one build identity per signed board/chip/restore
//! type combination. The integer-valued identity fields are stored as base-16
//! strings in the source plist and are parsed eagerly; everything that is
//! genuinely open-ended (per-component hash fields) stays in a generic
//! [`Dictionary`].

use std::io::Cursor;

use plist::{Dictionary, Value};
use thiserror::Error;

use crate::device::Device;

/// Manifest fields merged into a TSS request for the baseband, when present
/// on the identity.
const BASEBAND_KEY_HASH_FIELDS: &[&str] = &[
    "BbActivationManifestKeyHash",
    "BbCalibrationManifestKeyHash",
    "BbFDRSecurityKeyHash",
    "BbFactoryActivationManifestKeyHash",
    "BbProvisioningManifestKeyHash",
    "BbSkeyId",
];

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to decode build manifest plist")]
    Plist(#[from] plist::Error),
    #[error("Build manifest has no BuildIdentities array")]
    NoIdentities,
    #[error("Build identity entry is not a dictionary")]
    BadIdentity,
    #[error("Build identity is missing field: {0}")]
    MissingField(&'static str),
    #[error("Invalid base-16 value for {0}: {1:?}")]
    InvalidHexField(&'static str, String),
    #[error("Unknown restore behavior: {0:?}")]
    UnknownRestoreBehavior(String),
    #[error(
        "No build identity matches board 0x{board_id:X}, chip 0x{chip_id:X}, {restore_type:?} restore"
    )]
    IdentityNotFound {
        board_id: u32,
        chip_id: u16,
        restore_type: RestoreType,
    },
    #[error(
        "{count} build identities match board 0x{board_id:X}, chip 0x{chip_id:X}, {restore_type:?} restore"
    )]
    AmbiguousIdentity {
        board_id: u32,
        chip_id: u16,
        restore_type: RestoreType,
        count: usize,
    },
    #[error("Component not found in build identity: {0}")]
    ComponentNotFound(String),
    #[error("Build identity has no baseband firmware")]
    NoBaseband,
}

type Result<T> = std::result::Result<T, Error>;

/// Restore variant an identity is signed for, from `Info.RestoreBehavior`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestoreType {
    Erase,
    Update,
}

impl RestoreType {
    pub fn behavior(self) -> &'static str {
        match self {
            Self::Erase => "Erase",
            Self::Update => "Update",
        }
    }

    fn from_behavior(value: &str) -> Result<Self> {
        match value {
            "Erase" => Ok(Self::Erase),
            "Update" => Ok(Self::Update),
            b => Err(Error::UnknownRestoreBehavior(b.to_owned())),
        }
    }
}

/// One component descriptor from an identity's `Manifest` mapping. The raw
/// dictionary is kept as-is; request construction strips the manifest-only
/// metadata (`Info`) when attaching the entry.
#[derive(Clone, Debug)]
pub struct ManifestComponent {
    entry: Dictionary,
}

impl ManifestComponent {
    pub fn digest(&self) -> Option<&[u8]> {
        self.entry.get("Digest").and_then(Value::as_data)
    }

    pub fn trusted(&self) -> bool {
        self.entry
            .get("Trusted")
            .and_then(Value::as_boolean)
            .unwrap_or(false)
    }

    pub fn info(&self) -> Option<&Dictionary> {
        self.entry.get("Info").and_then(Value::as_dictionary)
    }

    /// Raw `RestoreRequestRules` array, wherever the manifest put it.
    pub fn raw_rules(&self) -> Option<&[Value]> {
        self.info()
            .and_then(|i| i.get("RestoreRequestRules"))
            .or_else(|| self.entry.get("RestoreRequestRules"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
    }

    pub fn to_dictionary(&self) -> Dictionary {
        self.entry.clone()
    }
}

fn hex_field(identity: &Dictionary, key: &'static str) -> Result<u32> {
    match identity.get(key) {
        Some(Value::String(s)) => {
            let trimmed = s.strip_prefix("0x").unwrap_or(s);
            u32::from_str_radix(trimmed, 16).map_err(|_| Error::InvalidHexField(key, s.clone()))
        }
        Some(Value::Integer(i)) => i
            .as_unsigned()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| Error::InvalidHexField(key, format!("{i:?}"))),
        Some(_) | None => Err(Error::MissingField(key)),
    }
}

/// One build identity, scoped to a single board/chip/restore-type.
#[derive(Clone, Debug)]
pub struct BuildIdentity {
    board_id: u32,
    chip_id: u32,
    security_domain: u32,
    restore_type: RestoreType,
    unique_build_id: Vec<u8>,
    pearl_cert_root_pub: Option<Vec<u8>>,
    device_class: Option<String>,
    components: Dictionary,
    raw: Dictionary,
}

impl BuildIdentity {
    fn parse(value: &Value) -> Result<Self> {
        let identity = value.as_dictionary().ok_or(Error::BadIdentity)?;

        let info = identity
            .get("Info")
            .and_then(Value::as_dictionary)
            .ok_or(Error::MissingField("Info"))?;
        let behavior = info
            .get("RestoreBehavior")
            .and_then(Value::as_string)
            .ok_or(Error::MissingField("Info.RestoreBehavior"))?;

        // Every signed identity must carry a UniqueBuildID. A manifest
        // without one is corrupt, not merely incomplete.
        let unique_build_id = identity
            .get("UniqueBuildID")
            .and_then(Value::as_data)
            .ok_or(Error::MissingField("UniqueBuildID"))?
            .to_vec();

        let components = identity
            .get("Manifest")
            .and_then(Value::as_dictionary)
            .cloned()
            .ok_or(Error::MissingField("Manifest"))?;

        Ok(Self {
            board_id: hex_field(identity, "ApBoardID")?,
            chip_id: hex_field(identity, "ApChipID")?,
            security_domain: hex_field(identity, "ApSecurityDomain")?,
            restore_type: RestoreType::from_behavior(behavior)?,
            unique_build_id,
            pearl_cert_root_pub: identity
                .get("PearlCertificationRootPub")
                .and_then(Value::as_data)
                .map(<[u8]>::to_vec),
            device_class: info
                .get("DeviceClass")
                .and_then(Value::as_string)
                .map(str::to_owned),
            components,
            raw: identity.clone(),
        })
    }

    pub fn board_id(&self) -> u32 {
        self.board_id
    }

    pub fn chip_id(&self) -> u32 {
        self.chip_id
    }

    pub fn security_domain(&self) -> u32 {
        self.security_domain
    }

    pub fn restore_type(&self) -> RestoreType {
        self.restore_type
    }

    pub fn unique_build_id(&self) -> &[u8] {
        &self.unique_build_id
    }

    pub fn pearl_cert_root_pub(&self) -> Option<&[u8]> {
        self.pearl_cert_root_pub.as_deref()
    }

    /// Board config string (e.g. `d22ap`) from the identity info.
    pub fn device_class(&self) -> Option<&str> {
        self.device_class.as_deref()
    }

    /// Component names in manifest order.
    pub fn component_names(&self) -> impl Iterator<Item = &str> {
        self.components.keys().map(String::as_str)
    }

    pub fn get_component(&self, name: &str) -> Result<ManifestComponent> {
        self.components
            .get(name)
            .and_then(Value::as_dictionary)
            .map(|entry| ManifestComponent {
                entry: entry.clone(),
            })
            .ok_or_else(|| Error::ComponentNotFound(name.to_owned()))
    }

    pub fn has_component(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    /// Baseband chip ID from the identity, if the identity carries one.
    pub fn bb_chip_id(&self) -> Option<u64> {
        match self.raw.get("BbChipID") {
            Some(Value::Integer(i)) => i.as_unsigned(),
            Some(Value::String(s)) => {
                let trimmed = s.strip_prefix("0x").unwrap_or(s);
                u64::from_str_radix(trimmed, 16).ok()
            }
            _ => None,
        }
    }

    /// Baseband-related identity fields to merge into a TSS request: the
    /// baseband chip ID plus whichever manifest key-hash fields are present.
    /// Fails if the identity has no baseband firmware (non-cellular device).
    pub fn baseband_data(&self) -> Result<Dictionary> {
        if !self.has_component("BasebandFirmware") {
            return Err(Error::NoBaseband);
        }

        let mut data = Dictionary::new();

        if let Some(chip_id) = self.raw.get("BbChipID") {
            data.insert("BbChipID".to_owned(), chip_id.clone());
        }
        for &key in BASEBAND_KEY_HASH_FIELDS {
            if let Some(value) = self.raw.get(key) {
                data.insert(key.to_owned(), value.clone());
            }
        }

        Ok(data)
    }
}

/// Ordered collection of build identities from one manifest.
#[derive(Clone, Debug)]
pub struct BuildManifest {
    identities: Vec<BuildIdentity>,
    product_version: Option<String>,
    product_build_version: Option<String>,
}

impl BuildManifest {
    /// Decode a binary or XML `BuildManifest.plist`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let root = Value::from_reader(Cursor::new(data))?;
        let root = root.as_dictionary().ok_or(Error::NoIdentities)?;

        let identities = root
            .get("BuildIdentities")
            .and_then(Value::as_array)
            .ok_or(Error::NoIdentities)?
            .iter()
            .map(BuildIdentity::parse)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            identities,
            product_version: root
                .get("ProductVersion")
                .and_then(Value::as_string)
                .map(str::to_owned),
            product_build_version: root
                .get("ProductBuildVersion")
                .and_then(Value::as_string)
                .map(str::to_owned),
        })
    }

    pub fn identities(&self) -> &[BuildIdentity] {
        &self.identities
    }

    pub fn product_version(&self) -> Option<&str> {
        self.product_version.as_deref()
    }

    pub fn product_build_version(&self) -> Option<&str> {
        self.product_build_version.as_deref()
    }

    /// Select the unique identity signed for this device and restore type.
    /// Multiple matches cannot occur in a well-formed manifest and are
    /// treated as a fatal consistency error, never resolved by picking the
    /// first.
    pub fn get_identity(
        &self,
        device: &Device,
        restore_type: RestoreType,
    ) -> Result<&BuildIdentity> {
        let mut matches = self.identities.iter().filter(|identity| {
            identity.board_id == device.board_id()
                && identity.chip_id == u32::from(device.chip_id())
                && identity.restore_type == restore_type
        });

        let found = matches.next().ok_or(Error::IdentityNotFound {
            board_id: device.board_id(),
            chip_id: device.chip_id(),
            restore_type,
        })?;

        let extra = matches.count();
        if extra > 0 {
            return Err(Error::AmbiguousIdentity {
                board_id: device.board_id(),
                chip_id: device.chip_id(),
                restore_type,
                count: extra + 1,
            });
        }

        Ok(found)
    }
}
