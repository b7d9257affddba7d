// SPDX-FileCopyrightText: 2024-2026 apticket contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Device and firmware catalog lookups.
//!
//! These are thin wrappers over public web APIs and sit outside the signing
//! core; they exist so the CLI can go from a model string to a device
//! identity and a build manifest URL.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub const DEVICE_API: &str = "https://api.ipsw.me/v4/devices";
pub const RELEASE_API: &str = "https://api.ipsw.me/v4/device";
pub const BETA_API: &str = "https://api.m1sta.xyz/betas";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Catalog request failed")]
    Http(#[from] reqwest::Error),
    #[error("Catalog {0} returned HTTP {1}")]
    HttpStatus(String, u16),
    #[error("Unknown device identifier: {0}")]
    UnknownDevice(String),
    #[error("Unknown board config {board:?} for device: {identifier}")]
    UnknownBoard { identifier: String, board: String },
    #[error("Device {0} has multiple boards; pass a board config explicitly")]
    AmbiguousBoard(String),
    #[error("Must select a firmware by either build ID or version")]
    MissingSelector,
    #[error("No matching firmware found for device: {0}")]
    FirmwareNotFound(String),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Deserialize)]
struct CatalogBoard {
    boardconfig: String,
    cpid: u16,
    bdid: u32,
}

#[derive(Debug, Deserialize)]
struct CatalogDevice {
    identifier: String,
    boards: Vec<CatalogBoard>,
}

#[derive(Debug, Deserialize)]
struct FirmwareList {
    firmwares: Vec<Firmware>,
}

/// One device identity as reported by the device catalog.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub identifier: String,
    pub board_config: String,
    pub chip_id: u16,
    pub board_id: u32,
}

/// One published firmware build.
#[derive(Clone, Debug, Deserialize)]
pub struct Firmware {
    #[serde(rename = "buildid")]
    pub build_id: String,
    pub version: String,
    pub url: String,
    #[serde(default, rename = "releasedate")]
    pub release_date: Option<DateTime<Utc>>,
    #[serde(default, rename = "uploaddate")]
    pub upload_date: Option<DateTime<Utc>>,
}

fn normalized_version(version: &str) -> String {
    version
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

pub struct CatalogClient {
    client: reqwest::blocking::Client,
}

impl CatalogClient {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: reqwest::blocking::Client::builder().build()?,
        })
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!("Fetching catalog data from {url}");

        let response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus(url.to_owned(), status.as_u16()));
        }

        Ok(response.json()?)
    }

    /// Resolve a model string to its canonical identifier, chip ID, and
    /// board ID. Development boards (boardconfigs not ending in `ap`) are
    /// excluded; if more than one production board remains, the caller must
    /// disambiguate with an explicit board config.
    pub fn lookup_device(&self, identifier: &str, board: Option<&str>) -> Result<DeviceInfo> {
        let devices: Vec<CatalogDevice> = self.get_json(DEVICE_API)?;

        let device = devices
            .into_iter()
            .find(|d| d.identifier.eq_ignore_ascii_case(identifier))
            .ok_or_else(|| Error::UnknownDevice(identifier.to_owned()))?;

        let mut valid_boards = device
            .boards
            .into_iter()
            .filter(|b| b.boardconfig.to_lowercase().ends_with("ap"))
            .collect::<Vec<_>>();

        let selected = match board {
            Some(board) => valid_boards
                .into_iter()
                .find(|b| b.boardconfig.eq_ignore_ascii_case(board))
                .ok_or_else(|| Error::UnknownBoard {
                    identifier: device.identifier.clone(),
                    board: board.to_owned(),
                })?,
            None => {
                if valid_boards.len() != 1 {
                    return Err(Error::AmbiguousBoard(device.identifier));
                }
                valid_boards.remove(0)
            }
        };

        Ok(DeviceInfo {
            identifier: device.identifier,
            board_config: selected.boardconfig,
            chip_id: selected.cpid,
            board_id: selected.bdid,
        })
    }

    /// All published builds for a device, releases and betas merged,
    /// de-duplicated by build ID, newest build ID first.
    pub fn fetch_all_firmwares(&self, identifier: &str) -> Result<Vec<Firmware>> {
        let mut firmwares = self
            .get_json::<FirmwareList>(&format!("{RELEASE_API}/{identifier}"))?
            .firmwares;

        // Beta catalog failures are not fatal; the release list alone is
        // still usable.
        match self.get_json::<Vec<Firmware>>(&format!("{BETA_API}/{identifier}")) {
            Ok(betas) => {
                for beta in betas {
                    if !firmwares
                        .iter()
                        .any(|f| f.build_id.eq_ignore_ascii_case(&beta.build_id))
                    {
                        firmwares.push(beta);
                    }
                }
            }
            Err(e) => debug!("Ignoring beta catalog failure: {e}"),
        }

        firmwares.sort_by(|a, b| b.build_id.cmp(&a.build_id));

        Ok(firmwares)
    }

    /// Select one build by build ID or version string.
    pub fn fetch_firmware(
        &self,
        identifier: &str,
        build_id: Option<&str>,
        version: Option<&str>,
    ) -> Result<Firmware> {
        if build_id.is_none() && version.is_none() {
            return Err(Error::MissingSelector);
        }

        let firmwares = self.fetch_all_firmwares(identifier)?;

        if let Some(build_id) = build_id {
            if let Some(firmware) = firmwares
                .iter()
                .find(|f| f.build_id.eq_ignore_ascii_case(build_id))
            {
                return Ok(firmware.clone());
            }
        }

        if let Some(version) = version {
            let wanted = normalized_version(version);
            if let Some(firmware) = firmwares
                .iter()
                .find(|f| normalized_version(&f.version) == wanted)
            {
                return Ok(firmware.clone());
            }
        }

        Err(Error::FirmwareNotFound(identifier.to_owned()))
    }
}
