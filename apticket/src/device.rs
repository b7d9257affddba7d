// SPDX-FileCopyrightText: 2024-2026 apticket contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Validated identity, capability, and nonce data for a single device.
//!
//! All nonce lengths are derived from the SoC chip ID. This module is the
//! only place (besides the baseband serial in [`crate::tss::request`]) that
//! consumes entropy, and it only does so through an injected [`RngCore`] so
//! that tests can supply deterministic bytes.

use rand::RngCore;
use sha1::Sha1;
use sha2::{Digest, Sha384};
use thiserror::Error;

pub const AP_NONCE_LEN_SHORT: usize = 20;
pub const AP_NONCE_LEN_LONG: usize = 32;
pub const SEP_NONCE_LEN: usize = 20;
pub const BOOT_NONCE_LEN: usize = 8;
pub const BB_NONCE_LEN: usize = 20;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid hex encoding for {0}: {1:?}")]
    InvalidHex(&'static str, String),
    #[error("Invalid length for {field}: expected {expected} bytes, but have {actual}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Device has no Secure Enclave; cannot set SEP nonce")]
    NoSecureEnclave,
    #[error("Boot nonce does not derive the supplied AP nonce")]
    NonceMismatch,
}

type Result<T> = std::result::Result<T, Error>;

fn decode_hex(field: &'static str, value: &str) -> Result<Vec<u8>> {
    let trimmed = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(trimmed).map_err(|_| Error::InvalidHex(field, value.to_owned()))
}

fn decode_hex_exact(field: &'static str, value: &str, expected: usize) -> Result<Vec<u8>> {
    let data = decode_hex(field, value)?;
    if data.len() != expected {
        return Err(Error::InvalidLength {
            field,
            expected,
            actual: data.len(),
        });
    }

    Ok(data)
}

fn random_bytes(rng: &mut dyn RngCore, len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rng.fill_bytes(&mut data);
    data
}

/// AP nonce length for a SoC generation. A10 (0x8010) and later 64-bit SoCs
/// use a SHA-384-derived 32-byte nonce; everything else uses SHA-1's 20.
pub fn ap_nonce_len(chip_id: u16) -> usize {
    if (0x8010..0x8900).contains(&chip_id) {
        AP_NONCE_LEN_LONG
    } else {
        AP_NONCE_LEN_SHORT
    }
}

/// One device taking part in a restore attempt. Immutable after nonce
/// assignment except for explicit regeneration.
#[derive(Clone, Debug)]
pub struct Device {
    identifier: String,
    chip_id: u16,
    board_id: u32,
    ecid: u64,
    ap_nonce: Vec<u8>,
    sep_nonce: Option<Vec<u8>>,
    boot_nonce: Option<Vec<u8>>,
    bb_nonce: Option<Vec<u8>>,
    bb_serial: Option<Vec<u8>>,
}

impl Device {
    /// Create a device with freshly generated AP (and, when the SoC has a
    /// Secure Enclave, SEP) nonces.
    pub fn new(
        identifier: impl Into<String>,
        chip_id: u16,
        board_id: u32,
        ecid: u64,
        rng: &mut dyn RngCore,
    ) -> Self {
        let has_sep = !(0x8900 < chip_id && chip_id < 0x8955);
        let sep_nonce = has_sep.then(|| random_bytes(rng, SEP_NONCE_LEN));

        Self {
            identifier: identifier.into(),
            chip_id,
            board_id,
            ecid,
            ap_nonce: random_bytes(rng, ap_nonce_len(chip_id)),
            sep_nonce,
            boot_nonce: None,
            bb_nonce: None,
            bb_serial: None,
        }
    }

    /// Parse an ECID from its hexadecimal string form.
    pub fn parse_ecid(value: &str) -> Result<u64> {
        let trimmed = value.strip_prefix("0x").unwrap_or(value);
        u64::from_str_radix(trimmed, 16).map_err(|_| Error::InvalidHex("ECID", value.to_owned()))
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn chip_id(&self) -> u16 {
        self.chip_id
    }

    pub fn board_id(&self) -> u32 {
        self.board_id
    }

    pub fn ecid(&self) -> u64 {
        self.ecid
    }

    pub fn ap_nonce(&self) -> &[u8] {
        &self.ap_nonce
    }

    pub fn sep_nonce(&self) -> Option<&[u8]> {
        self.sep_nonce.as_deref()
    }

    pub fn boot_nonce(&self) -> Option<&[u8]> {
        self.boot_nonce.as_deref()
    }

    pub fn bb_nonce(&self) -> Option<&[u8]> {
        self.bb_nonce.as_deref()
    }

    pub fn bb_serial(&self) -> Option<&[u8]> {
        self.bb_serial.as_deref()
    }

    /// Whether the SoC has a Secure Enclave. The 32-bit-only S5L8920..S5L8955
    /// range is the only generation without one.
    pub fn has_sep(&self) -> bool {
        !(0x8900 < self.chip_id && self.chip_id < 0x8955)
    }

    /// Whether the device expects IMG4-format tickets. This is derived from
    /// the chip ID and gates which request variant is produced.
    pub fn supports_img4(&self) -> bool {
        !(0x8900 < self.chip_id && self.chip_id < 0x8955)
    }

    pub fn set_ap_nonce(&mut self, value: &str) -> Result<()> {
        self.ap_nonce = decode_hex_exact("ApNonce", value, ap_nonce_len(self.chip_id))?;
        Ok(())
    }

    pub fn set_sep_nonce(&mut self, value: &str) -> Result<()> {
        if !self.has_sep() {
            return Err(Error::NoSecureEnclave);
        }

        self.sep_nonce = Some(decode_hex_exact("SepNonce", value, SEP_NONCE_LEN)?);
        Ok(())
    }

    pub fn set_boot_nonce(&mut self, value: &str) -> Result<()> {
        self.boot_nonce = Some(decode_hex_exact("BootNonce", value, BOOT_NONCE_LEN)?);
        Ok(())
    }

    pub fn set_bb_nonce(&mut self, value: &str) -> Result<()> {
        self.bb_nonce = Some(decode_hex_exact("BbNonce", value, BB_NONCE_LEN)?);
        Ok(())
    }

    /// The serial length varies by baseband chip, so it is only validated
    /// against the per-model table when the baseband image is added to a
    /// request.
    pub fn set_bb_serial(&mut self, value: &str) -> Result<()> {
        self.bb_serial = Some(decode_hex("BbSNUM", value)?);
        Ok(())
    }

    /// Throw away the current AP/SEP nonces and generate new ones.
    pub fn regenerate_nonces(&mut self, rng: &mut dyn RngCore) {
        self.ap_nonce = random_bytes(rng, ap_nonce_len(self.chip_id));
        if self.has_sep() {
            self.sep_nonce = Some(random_bytes(rng, SEP_NONCE_LEN));
        }
    }

    /// Verify that the boot nonce (generator) hashes to the AP nonce. Only
    /// meaningful for SoCs outside the 0x8020..0x8900 range, where the
    /// mapping is a plain digest of the generator bytes.
    pub fn verify_ap_nonce_pair(&self) -> Result<()> {
        let Some(boot_nonce) = &self.boot_nonce else {
            return Ok(());
        };
        if (0x8020..0x8900).contains(&self.chip_id) {
            return Ok(());
        }

        let derived = match self.ap_nonce.len() {
            AP_NONCE_LEN_LONG => Sha384::digest(boot_nonce)[..AP_NONCE_LEN_LONG].to_vec(),
            _ => Sha1::digest(boot_nonce).to_vec(),
        };

        if derived != self.ap_nonce {
            return Err(Error::NonceMismatch);
        }

        Ok(())
    }
}
