// SPDX-FileCopyrightText: 2024-2026 apticket contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Static per-model baseband signing parameters.
//!
//! The gold certificate ID and the serial number length are properties of the
//! baseband chip soldered into each model and are not discoverable from the
//! build manifest, so they are kept in a fixed table.

use phf::phf_map;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BasebandInfo {
    pub gold_cert_id: u64,
    pub serial_len: usize,
}

const fn bb(gold_cert_id: u64, serial_len: usize) -> BasebandInfo {
    BasebandInfo {
        gold_cert_id,
        serial_len,
    }
}

static CELLULAR_DEVICES: phf::Map<&'static str, BasebandInfo> = phf_map! {
    // iPhone
    "iPhone3,1" => bb(257, 12),
    "iPhone3,2" => bb(257, 12),
    "iPhone3,3" => bb(2, 4),
    "iPhone4,1" => bb(2, 4),
    "iPhone5,1" => bb(3255536192, 4),
    "iPhone5,2" => bb(3255536192, 4),
    "iPhone5,3" => bb(3554301762, 4),
    "iPhone5,4" => bb(3554301762, 4),
    "iPhone6,1" => bb(3554301762, 4),
    "iPhone6,2" => bb(3554301762, 4),
    "iPhone7,1" => bb(3840149528, 4),
    "iPhone7,2" => bb(3840149528, 4),
    "iPhone8,1" => bb(3840149528, 4),
    "iPhone8,2" => bb(3840149528, 4),
    "iPhone8,4" => bb(3840149528, 4),
    "iPhone9,1" => bb(2315222105, 4),
    "iPhone9,2" => bb(2315222105, 4),
    "iPhone9,3" => bb(1421084145, 12),
    "iPhone9,4" => bb(1421084145, 12),
    "iPhone10,1" => bb(2315222105, 4),
    "iPhone10,2" => bb(2315222105, 4),
    "iPhone10,3" => bb(2315222105, 4),
    "iPhone10,4" => bb(524245983, 12),
    "iPhone10,5" => bb(524245983, 12),
    "iPhone10,6" => bb(524245983, 12),
    "iPhone11,2" => bb(165673526, 12),
    "iPhone11,4" => bb(165673526, 12),
    "iPhone11,6" => bb(165673526, 12),
    "iPhone11,8" => bb(165673526, 12),
    "iPhone12,1" => bb(524245983, 12),
    "iPhone12,3" => bb(524245983, 12),
    "iPhone12,5" => bb(524245983, 12),
    "iPhone12,8" => bb(524245983, 12),
    "iPhone13,1" => bb(3095201109, 4),
    "iPhone13,2" => bb(3095201109, 4),
    "iPhone13,3" => bb(3095201109, 4),
    "iPhone13,4" => bb(3095201109, 4),
    "iPhone14,2" => bb(495958265, 4),
    "iPhone14,3" => bb(495958265, 4),
    "iPhone14,4" => bb(495958265, 4),
    "iPhone14,5" => bb(495958265, 4),
    "iPhone14,6" => bb(2241363181, 4),
    // iPad
    "iPad2,2" => bb(257, 12),
    "iPad2,3" => bb(257, 12),
    "iPad2,6" => bb(3255536192, 4),
    "iPad2,7" => bb(3255536192, 4),
    "iPad3,2" => bb(4, 4),
    "iPad3,3" => bb(4, 4),
    "iPad3,5" => bb(3255536192, 4),
    "iPad3,6" => bb(3255536192, 4),
    "iPad4,2" => bb(3554301762, 4),
    "iPad4,3" => bb(3554301762, 4),
    "iPad4,5" => bb(3554301762, 4),
    "iPad4,6" => bb(3554301762, 4),
    "iPad4,8" => bb(3554301762, 4),
    "iPad4,9" => bb(3554301762, 4),
    "iPad5,2" => bb(3840149528, 4),
    "iPad5,4" => bb(3840149528, 4),
    "iPad6,4" => bb(3840149528, 4),
    "iPad6,8" => bb(3840149528, 4),
    "iPad6,12" => bb(3840149528, 4),
    "iPad7,2" => bb(2315222105, 4),
    "iPad7,4" => bb(2315222105, 4),
    "iPad7,6" => bb(3840149528, 4),
    "iPad7,12" => bb(165673526, 12),
    "iPad8,3" => bb(165673526, 12),
    "iPad8,4" => bb(165673526, 12),
    "iPad8,7" => bb(165673526, 12),
    "iPad8,8" => bb(165673526, 12),
    "iPad8,10" => bb(524245983, 12),
    "iPad8,12" => bb(524245983, 12),
    "iPad11,2" => bb(165673526, 12),
    "iPad11,4" => bb(165673526, 12),
    "iPad11,7" => bb(165673526, 12),
    "iPad12,2" => bb(165673526, 12),
    "iPad13,2" => bb(524245983, 12),
    "iPad13,6" => bb(3095201109, 4),
    "iPad13,7" => bb(3095201109, 4),
    "iPad13,10" => bb(3095201109, 4),
    "iPad13,11" => bb(3095201109, 4),
    "iPad13,17" => bb(495958265, 4),
    "iPad14,2" => bb(495958265, 4),
    // Apple Watch
    "Watch3,1" => bb(3840149528, 4),
    "Watch3,2" => bb(3840149528, 4),
    "Watch4,3" => bb(744114402, 12),
    "Watch4,4" => bb(744114402, 12),
    "Watch5,3" => bb(744114402, 12),
    "Watch5,4" => bb(744114402, 12),
};

/// Look up baseband parameters for a device model. Device identifiers are
/// matched case-insensitively since catalog data is not consistent about
/// casing.
pub fn lookup(identifier: &str) -> Option<BasebandInfo> {
    if let Some(info) = CELLULAR_DEVICES.get(identifier) {
        return Some(*info);
    }

    CELLULAR_DEVICES
        .entries()
        .find(|(model, _)| model.eq_ignore_ascii_case(identifier))
        .map(|(_, info)| *info)
}
