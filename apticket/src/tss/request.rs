// SPDX-FileCopyrightText: 2024-2026 apticket contributors
// SPDX-License-Identifier: GPL-3.0-only

//! TSS signing request construction.
//!
//! The request is an ordered plist dictionary built in two phases: the base
//! request (locality/version tags, AP identity fields, and the per-component
//! AP firmware entries) is synthesized once at creation, then zero or more
//! subsystem images may be attached, each at most once. Field presence is
//! highly conditional on the device's chip generation and on the manifest's
//! restore request rules; any divergence produces a ticket the device will
//! silently reject.

use std::collections::BTreeSet;

use clap::ValueEnum;
use plist::{Dictionary, Value};
use rand::RngCore;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::{
    baseband,
    device::{Device, BB_NONCE_LEN},
    manifest::{self, BuildIdentity},
    tss::rules::{self, RestoreRequestRule},
};

pub const TSS_CLIENT_VERSION: &str = "libauthinstall-776.140.3";
pub const TSS_LOCALITY: &str = "en_US";
pub const TSS_HOST_PLATFORM: &str = "mac";

/// Baseband chip revision that splits its PSI digests into two schemes.
const BB_CHIP_MAV7_MAV8: u64 = 0x68;

/// Gold certificate IDs on that revision using the secondary partial-image
/// digest scheme.
const BB_SECONDARY_DIGEST_GC_IDS: &[u64] = &[0x26F3FACC, 0x5CF2EC4E, 0x8399785A];

/// Component names never included in the signing payload. `BasebandFirmware`
/// is handled by the baseband extension instead; the prefixed families each
/// belong to a dedicated subsystem request.
const RESERVED_COMPONENTS: &[&str] = &["BaseSystem", "Diags", "BasebandFirmware"];
const RESERVED_PREFIXES: &[&str] = &[
    "Baobab,", "BMU,", "eUICC,", "Rap,", "Savage,", "SE,", "Timer,", "Yonkers,",
];

#[derive(Debug, Error)]
pub enum Error {
    #[error("Image already added to request: {0:?}")]
    DuplicateImage(ImageKind),
    #[error("Image kind is not a subsystem extension: {0:?}")]
    NotAnExtension(ImageKind),
    #[error("Image kind not implemented: {0:?}")]
    NotImplemented(ImageKind),
    #[error("No baseband data known for device model: {0}")]
    UnknownBasebandDevice(String),
    #[error("Invalid baseband serial length: expected {expected} bytes, but have {actual}")]
    InvalidSerialLength { expected: usize, actual: usize },
    #[error("Build manifest error")]
    Manifest(#[from] manifest::Error),
    #[error("Failed to serialize request plist")]
    Plist(#[from] plist::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Closed set of image kinds a ticket can cover. `Ap` is built
/// unconditionally as part of the base request; the rest are optional
/// subsystem extensions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
pub enum ImageKind {
    Ap,
    Baseband,
    SecureElement,
    Savage,
    Yonkers,
    Vinyl,
    Rose,
    Veridian,
}

fn is_reserved(name: &str) -> bool {
    RESERVED_COMPONENTS.contains(&name)
        || RESERVED_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

fn random_bytes(rng: &mut dyn RngCore, len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rng.fill_bytes(&mut data);
    data
}

/// MAV7/MAV8 basebands (chip 0x68) carry two partial-digest pairs in the
/// manifest, but each gold certificate only signs one of them.
fn strip_partial_digests(entry: &mut Dictionary, bb_chip_id: Option<u64>, gold_cert_id: u64) {
    if bb_chip_id != Some(BB_CHIP_MAV7_MAV8) {
        return;
    }

    if BB_SECONDARY_DIGEST_GC_IDS.contains(&gold_cert_id) {
        entry.remove("PSI2-PartialDigest");
        entry.remove("RestorePSI2-PartialDigest");
    } else {
        entry.remove("PSI-PartialDigest");
        entry.remove("RestorePSI-PartialDigest");
    }
}

fn uppercase_uuid(rng: &mut dyn RngCore) -> String {
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);
    let uuid = uuid::Builder::from_random_bytes(bytes).into_uuid();

    let mut buf = Uuid::encode_buffer();
    uuid.hyphenated().encode_upper(&mut buf).to_owned()
}

/// A signing request under construction. Exclusively owned by the caller
/// driving it, per the single-request lifecycle.
pub struct TssRequest {
    request: Dictionary,
    supports_img4: bool,
    images: BTreeSet<ImageKind>,
    // Device state needed for subsystem extensions.
    identifier: String,
    bb_nonce: Option<Vec<u8>>,
    bb_serial: Option<Vec<u8>>,
}

impl TssRequest {
    /// Build the base request for one device and its selected build
    /// identity.
    pub fn new(
        device: &Device,
        identity: &BuildIdentity,
        rng: &mut dyn RngCore,
    ) -> Result<Self> {
        let mut request = Dictionary::new();

        request.insert("@Locality".to_owned(), Value::String(TSS_LOCALITY.to_owned()));
        request.insert(
            "@HostPlatformInfo".to_owned(),
            Value::String(TSS_HOST_PLATFORM.to_owned()),
        );
        request.insert(
            "@VersionInfo".to_owned(),
            Value::String(TSS_CLIENT_VERSION.to_owned()),
        );
        request.insert("@UUID".to_owned(), Value::String(uppercase_uuid(rng)));

        request.insert(
            "ApBoardID".to_owned(),
            Value::Integer(u64::from(identity.board_id()).into()),
        );
        request.insert(
            "ApChipID".to_owned(),
            Value::Integer(u64::from(identity.chip_id()).into()),
        );
        request.insert("ApECID".to_owned(), Value::Integer(device.ecid().into()));
        request.insert(
            "ApSecurityDomain".to_owned(),
            Value::Integer(u64::from(identity.security_domain()).into()),
        );
        request.insert(
            "UniqueBuildID".to_owned(),
            Value::Data(identity.unique_build_id().to_vec()),
        );
        request.insert("ApNonce".to_owned(), Value::Data(device.ap_nonce().to_vec()));
        request.insert("ApProductionMode".to_owned(), Value::Boolean(true));

        if device.supports_img4() {
            request.insert("@ApImg4Ticket".to_owned(), Value::Boolean(true));
            request.insert("ApSecurityMode".to_owned(), Value::Boolean(true));
            if let Some(sep_nonce) = device.sep_nonce() {
                request.insert("SepNonce".to_owned(), Value::Data(sep_nonce.to_vec()));
            }
            if let Some(pearl) = identity.pearl_cert_root_pub() {
                request.insert(
                    "PearlCertificationRootPub".to_owned(),
                    Value::Data(pearl.to_vec()),
                );
            }
        } else {
            request.insert("@APTicket".to_owned(), Value::Boolean(true));
        }

        let mut result = Self {
            request,
            supports_img4: device.supports_img4(),
            images: BTreeSet::from([ImageKind::Ap]),
            identifier: device.identifier().to_owned(),
            bb_nonce: device.bb_nonce().map(<[u8]>::to_vec),
            bb_serial: device.bb_serial().map(<[u8]>::to_vec),
        };
        result.add_ap_components(identity)?;

        Ok(result)
    }

    /// Attach every non-reserved AP firmware component from the identity's
    /// manifest.
    fn add_ap_components(&mut self, identity: &BuildIdentity) -> Result<()> {
        let names = identity
            .component_names()
            .map(str::to_owned)
            .collect::<Vec<_>>();

        for name in names {
            if is_reserved(&name) {
                continue;
            }

            let component = identity.get_component(&name)?;
            let rules = component.raw_rules().map(RestoreRequestRule::parse_all);

            // The IMG4 request format can only express components that carry
            // restore request rules.
            if self.supports_img4 && rules.is_none() {
                debug!("Skipping component without rules: {name}");
                continue;
            }

            let mut entry = component.to_dictionary();
            if let Some(rules) = &rules {
                rules::evaluate(rules, &mut self.request, self.supports_img4, &mut entry);
            }

            // Info is manifest-only metadata and is never sent.
            entry.remove("Info");
            entry.remove("RestoreRequestRules");

            if component.trusted() && component.digest().is_none() {
                debug!("Trusted component has no digest, using a placeholder: {name}");
                entry.insert("Digest".to_owned(), Value::Data(Vec::new()));
            }

            self.request.insert(name, Value::Dictionary(entry));
        }

        Ok(())
    }

    /// Attach one subsystem image to the request. Each subsystem can be
    /// added at most once; the request is left unchanged on failure.
    pub fn add_image(
        &mut self,
        kind: ImageKind,
        identity: &BuildIdentity,
        rng: &mut dyn RngCore,
    ) -> Result<()> {
        if kind == ImageKind::Ap {
            return Err(Error::NotAnExtension(kind));
        }
        if self.images.contains(&kind) {
            return Err(Error::DuplicateImage(kind));
        }

        match kind {
            ImageKind::Ap => unreachable!(),
            ImageKind::Baseband => self.add_baseband(identity, rng)?,
            ImageKind::SecureElement
            | ImageKind::Savage
            | ImageKind::Yonkers
            | ImageKind::Vinyl
            | ImageKind::Rose
            | ImageKind::Veridian => {
                // Deliberate extension points. The per-subsystem field sets
                // are not known yet, and guessing them would produce tickets
                // the hardware rejects.
                return Err(Error::NotImplemented(kind));
            }
        }

        self.images.insert(kind);
        Ok(())
    }

    fn add_baseband(&mut self, identity: &BuildIdentity, rng: &mut dyn RngCore) -> Result<()> {
        // Validate everything before touching the request so that a failed
        // add leaves it unchanged.
        let bb_data = identity.baseband_data()?;
        let info = baseband::lookup(&self.identifier)
            .ok_or_else(|| Error::UnknownBasebandDevice(self.identifier.clone()))?;

        let serial = match &self.bb_serial {
            Some(serial) => {
                if serial.len() != info.serial_len {
                    return Err(Error::InvalidSerialLength {
                        expected: info.serial_len,
                        actual: serial.len(),
                    });
                }
                serial.clone()
            }
            None => random_bytes(rng, info.serial_len),
        };
        let nonce = self
            .bb_nonce
            .clone()
            .unwrap_or_else(|| random_bytes(rng, BB_NONCE_LEN));

        let component = identity.get_component("BasebandFirmware")?;
        let mut entry = component.to_dictionary();
        entry.remove("Info");

        strip_partial_digests(&mut entry, identity.bb_chip_id(), info.gold_cert_id);

        self.request.insert("@BBTicket".to_owned(), Value::Boolean(true));
        self.request.insert("BbNonce".to_owned(), Value::Data(nonce));
        self.request.insert(
            "BbGoldCertId".to_owned(),
            Value::Integer(info.gold_cert_id.into()),
        );
        self.request.insert("BbSNUM".to_owned(), Value::Data(serial));
        for (key, value) in bb_data.iter() {
            self.request.insert(key.clone(), value.clone());
        }
        self.request
            .insert("BasebandFirmware".to_owned(), Value::Dictionary(entry));

        Ok(())
    }

    /// The request entries built so far, in insertion order.
    pub fn entries(&self) -> &Dictionary {
        &self.request
    }

    /// Serialize the request as an XML plist document.
    pub fn to_xml(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        Value::Dictionary(self.request.clone()).to_writer_xml(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use rand::{rngs::StdRng, SeedableRng};

    use crate::manifest::{BuildManifest, RestoreType};

    use super::*;

    fn component(digest: Option<&[u8]>, trusted: bool, with_rules: bool) -> Value {
        let mut entry = Dictionary::new();
        if let Some(digest) = digest {
            entry.insert("Digest".to_owned(), Value::Data(digest.to_vec()));
        }
        entry.insert("Trusted".to_owned(), Value::Boolean(trusted));

        let mut info = Dictionary::new();
        info.insert("Path".to_owned(), Value::String("Firmware/x".to_owned()));
        if with_rules {
            let mut conditions = Dictionary::new();
            conditions.insert("ApRawProductionMode".to_owned(), Value::Boolean(true));
            let mut actions = Dictionary::new();
            actions.insert("EPRO".to_owned(), Value::Boolean(true));
            let mut rule = Dictionary::new();
            rule.insert("Conditions".to_owned(), Value::Dictionary(conditions));
            rule.insert("Actions".to_owned(), Value::Dictionary(actions));
            info.insert(
                "RestoreRequestRules".to_owned(),
                Value::Array(vec![Value::Dictionary(rule)]),
            );
        }
        entry.insert("Info".to_owned(), Value::Dictionary(info));

        Value::Dictionary(entry)
    }

    fn build_identity(chip_id: &str, baseband: Option<(u64, &[(&str, &[u8])])>) -> BuildIdentity {
        let mut manifest = Dictionary::new();
        manifest.insert("OS".to_owned(), component(Some(&[1, 2, 3]), true, true));
        manifest.insert("iBSS".to_owned(), component(Some(&[4, 5, 6]), true, true));
        manifest.insert("NoRules".to_owned(), component(Some(&[7, 8, 9]), true, false));
        manifest.insert("Diags".to_owned(), component(Some(&[1]), true, true));
        manifest.insert("BaseSystem".to_owned(), component(Some(&[2]), true, true));
        manifest.insert("SE,Firmware".to_owned(), component(Some(&[3]), true, true));
        manifest.insert("Savage,B0-Prod".to_owned(), component(Some(&[4]), true, true));
        manifest.insert("TrustedNoDigest".to_owned(), component(None, true, true));

        let mut identity = Dictionary::new();
        identity.insert("ApBoardID".to_owned(), Value::String("0x06".to_owned()));
        identity.insert("ApChipID".to_owned(), Value::String(chip_id.to_owned()));
        identity.insert("ApSecurityDomain".to_owned(), Value::String("0x01".to_owned()));
        identity.insert("UniqueBuildID".to_owned(), Value::Data(vec![0xaa; 20]));

        if let Some((bb_chip_id, digests)) = baseband {
            let mut bb = Dictionary::new();
            for (key, digest) in digests {
                bb.insert((*key).to_owned(), Value::Data(digest.to_vec()));
            }
            let mut info = Dictionary::new();
            info.insert("Path".to_owned(), Value::String("Firmware/bb".to_owned()));
            bb.insert("Info".to_owned(), Value::Dictionary(info));
            manifest.insert("BasebandFirmware".to_owned(), Value::Dictionary(bb));

            identity.insert(
                "BbChipID".to_owned(),
                Value::Integer(bb_chip_id.into()),
            );
            identity.insert("BbSkeyId".to_owned(), Value::Data(vec![0xbb; 20]));
        }

        let mut info = Dictionary::new();
        info.insert("DeviceClass".to_owned(), Value::String("d22ap".to_owned()));
        info.insert("RestoreBehavior".to_owned(), Value::String("Erase".to_owned()));
        identity.insert("Info".to_owned(), Value::Dictionary(info));
        identity.insert("Manifest".to_owned(), Value::Dictionary(manifest));

        let mut root = Dictionary::new();
        root.insert(
            "BuildIdentities".to_owned(),
            Value::Array(vec![Value::Dictionary(identity)]),
        );
        let mut buf = Vec::new();
        Value::Dictionary(root).to_writer_xml(&mut buf).unwrap();

        BuildManifest::parse(&buf).unwrap().identities()[0].clone()
    }

    fn test_device(identifier: &str, chip_id: u16) -> Device {
        let mut rng = StdRng::seed_from_u64(0);
        Device::new(identifier, chip_id, 0x06, 0x1234567890ab, &mut rng)
    }

    fn build_request(identifier: &str, chip_id: u16, chip_hex: &str) -> TssRequest {
        let mut rng = StdRng::seed_from_u64(7);
        let device = test_device(identifier, chip_id);
        let identity = build_identity(chip_hex, None);
        TssRequest::new(&device, &identity, &mut rng).unwrap()
    }

    #[test]
    fn img4_request_fields() {
        let request = build_request("iPhone10,3", 0x8015, "0x8015");
        let entries = request.entries();

        assert_eq!(entries.get("@ApImg4Ticket"), Some(&Value::Boolean(true)));
        assert_eq!(entries.get("ApSecurityMode"), Some(&Value::Boolean(true)));
        assert!(entries.get("SepNonce").is_some());
        assert!(entries.get("@APTicket").is_none());
        assert_eq!(entries.get("ApProductionMode"), Some(&Value::Boolean(true)));
        assert_eq!(
            entries.get("ApChipID"),
            Some(&Value::Integer(0x8015u64.into()))
        );
        assert_eq!(
            entries.get("UniqueBuildID"),
            Some(&Value::Data(vec![0xaa; 20]))
        );

        let uuid = entries.get("@UUID").unwrap().as_string().unwrap();
        assert_eq!(uuid.len(), 36);
        assert_eq!(uuid, uuid.to_uppercase());
    }

    #[test]
    fn legacy_request_fields() {
        let request = build_request("iPhone5,1", 0x8950, "0x8950");
        let entries = request.entries();

        assert_eq!(entries.get("@APTicket"), Some(&Value::Boolean(true)));
        assert!(entries.get("@ApImg4Ticket").is_none());
        assert!(entries.get("ApSecurityMode").is_none());
        assert!(entries.get("SepNonce").is_none());
    }

    #[test]
    fn reserved_components_are_skipped() {
        let request = build_request("iPhone10,3", 0x8015, "0x8015");
        let entries = request.entries();

        assert!(entries.get("OS").is_some());
        assert!(entries.get("iBSS").is_some());
        for name in ["Diags", "BaseSystem", "SE,Firmware", "Savage,B0-Prod"] {
            assert!(entries.get(name).is_none(), "{name} must not be attached");
        }
    }

    #[test]
    fn img4_skips_components_without_rules() {
        let request = build_request("iPhone10,3", 0x8015, "0x8015");
        assert!(request.entries().get("NoRules").is_none());

        // Legacy requests include them.
        let request = build_request("iPhone5,1", 0x8950, "0x8950");
        assert!(request.entries().get("NoRules").is_some());
    }

    #[test]
    fn attached_components_are_stripped() {
        let request = build_request("iPhone10,3", 0x8015, "0x8015");
        let os = request.entries().get("OS").unwrap().as_dictionary().unwrap();

        assert!(os.get("Info").is_none());
        assert!(os.get("RestoreRequestRules").is_none());
        assert_eq!(os.get("Digest"), Some(&Value::Data(vec![1, 2, 3])));
        // The rule's action landed on the entry.
        assert_eq!(os.get("EPRO"), Some(&Value::Boolean(true)));
    }

    #[test]
    fn trusted_component_without_digest_gets_placeholder() {
        let request = build_request("iPhone10,3", 0x8015, "0x8015");
        let entry = request
            .entries()
            .get("TrustedNoDigest")
            .unwrap()
            .as_dictionary()
            .unwrap();

        assert_eq!(entry.get("Digest"), Some(&Value::Data(Vec::new())));
    }

    #[test]
    fn ap_kind_is_not_an_extension() {
        let mut rng = StdRng::seed_from_u64(7);
        let identity = build_identity("0x8015", None);
        let device = test_device("iPhone10,3", 0x8015);
        let mut request = TssRequest::new(&device, &identity, &mut rng).unwrap();

        assert_matches!(
            request.add_image(ImageKind::Ap, &identity, &mut rng),
            Err(Error::NotAnExtension(ImageKind::Ap))
        );
    }

    #[test]
    fn unimplemented_subsystems_are_rejected() {
        let mut rng = StdRng::seed_from_u64(7);
        let identity = build_identity("0x8015", None);
        let device = test_device("iPhone10,3", 0x8015);
        let mut request = TssRequest::new(&device, &identity, &mut rng).unwrap();

        for kind in [
            ImageKind::SecureElement,
            ImageKind::Savage,
            ImageKind::Yonkers,
            ImageKind::Vinyl,
            ImageKind::Rose,
            ImageKind::Veridian,
        ] {
            assert_matches!(
                request.add_image(kind, &identity, &mut rng),
                Err(Error::NotImplemented(k)) if k == kind
            );
        }
    }

    #[test]
    fn baseband_requires_cellular_identity() {
        let mut rng = StdRng::seed_from_u64(7);
        let identity = build_identity("0x8015", None);
        let device = test_device("iPhone10,3", 0x8015);
        let mut request = TssRequest::new(&device, &identity, &mut rng).unwrap();

        assert_matches!(
            request.add_image(ImageKind::Baseband, &identity, &mut rng),
            Err(Error::Manifest(manifest::Error::NoBaseband))
        );
    }

    fn baseband_identity(bb_chip_id: u64) -> BuildIdentity {
        build_identity(
            "0x8015",
            Some((
                bb_chip_id,
                &[
                    ("PSI-PartialDigest", b"psi1" as &[u8]),
                    ("RestorePSI-PartialDigest", b"rpsi1"),
                    ("PSI2-PartialDigest", b"psi2"),
                    ("RestorePSI2-PartialDigest", b"rpsi2"),
                ],
            )),
        )
    }

    #[test]
    fn baseband_extension_fields() {
        let mut rng = StdRng::seed_from_u64(7);
        let identity = baseband_identity(0x20);
        let device = test_device("iPhone10,3", 0x8015);
        let mut request = TssRequest::new(&device, &identity, &mut rng).unwrap();

        request
            .add_image(ImageKind::Baseband, &identity, &mut rng)
            .unwrap();
        let entries = request.entries();

        assert_eq!(entries.get("@BBTicket"), Some(&Value::Boolean(true)));
        // iPhone10,3 carries gold cert 2315222105 with 4-byte serials.
        assert_eq!(
            entries.get("BbGoldCertId"),
            Some(&Value::Integer(2315222105u64.into()))
        );
        assert_eq!(
            entries.get("BbNonce").unwrap().as_data().unwrap().len(),
            20
        );
        assert_eq!(entries.get("BbSNUM").unwrap().as_data().unwrap().len(), 4);
        assert_eq!(
            entries.get("BbChipID"),
            Some(&Value::Integer(0x20u64.into()))
        );
        assert_eq!(entries.get("BbSkeyId"), Some(&Value::Data(vec![0xbb; 20])));

        let bb = entries
            .get("BasebandFirmware")
            .unwrap()
            .as_dictionary()
            .unwrap();
        assert!(bb.get("Info").is_none());
        // Not the 0x68 revision, so all partial digests survive.
        assert!(bb.get("PSI-PartialDigest").is_some());
        assert!(bb.get("PSI2-PartialDigest").is_some());
    }

    #[test]
    fn baseband_serial_length_is_validated() {
        let mut rng = StdRng::seed_from_u64(7);
        let identity = baseband_identity(0x20);
        let mut device = test_device("iPhone10,3", 0x8015);
        device.set_bb_serial("aabbccddeeff").unwrap(); // 6 bytes, table wants 4
        let mut request = TssRequest::new(&device, &identity, &mut rng).unwrap();

        assert_matches!(
            request.add_image(ImageKind::Baseband, &identity, &mut rng),
            Err(Error::InvalidSerialLength {
                expected: 4,
                actual: 6,
            })
        );
        // The failed add keeps the slot free and the request untouched.
        assert!(request.entries().get("@BBTicket").is_none());

        device.set_bb_serial("aabbccdd").unwrap();
        let mut request = TssRequest::new(&device, &identity, &mut rng).unwrap();
        request
            .add_image(ImageKind::Baseband, &identity, &mut rng)
            .unwrap();
        assert_eq!(
            request.entries().get("BbSNUM"),
            Some(&Value::Data(vec![0xaa, 0xbb, 0xcc, 0xdd]))
        );
    }

    #[test]
    fn duplicate_baseband_is_rejected() {
        let mut rng = StdRng::seed_from_u64(7);
        let identity = baseband_identity(0x20);
        let device = test_device("iPhone10,3", 0x8015);
        let mut request = TssRequest::new(&device, &identity, &mut rng).unwrap();

        request
            .add_image(ImageKind::Baseband, &identity, &mut rng)
            .unwrap();
        let snapshot = request.entries().clone();

        assert_matches!(
            request.add_image(ImageKind::Baseband, &identity, &mut rng),
            Err(Error::DuplicateImage(ImageKind::Baseband))
        );
        assert_eq!(request.entries(), &snapshot);
    }

    fn digest_entry() -> Dictionary {
        let mut entry = Dictionary::new();
        for key in [
            "PSI-PartialDigest",
            "RestorePSI-PartialDigest",
            "PSI2-PartialDigest",
            "RestorePSI2-PartialDigest",
        ] {
            entry.insert(key.to_owned(), Value::Data(vec![1]));
        }
        entry
    }

    #[test]
    fn mav7_mav8_digest_selection() {
        // Allowlisted gold certs keep the primary PSI pair.
        for gold_cert_id in [0x26F3FACCu64, 0x5CF2EC4E, 0x8399785A] {
            let mut entry = digest_entry();
            strip_partial_digests(&mut entry, Some(0x68), gold_cert_id);

            assert!(entry.get("PSI-PartialDigest").is_some());
            assert!(entry.get("RestorePSI-PartialDigest").is_some());
            assert!(entry.get("PSI2-PartialDigest").is_none());
            assert!(entry.get("RestorePSI2-PartialDigest").is_none());
        }

        // Any other gold cert on chip 0x68 keeps the secondary pair.
        let mut entry = digest_entry();
        strip_partial_digests(&mut entry, Some(0x68), 2315222105);

        assert!(entry.get("PSI-PartialDigest").is_none());
        assert!(entry.get("RestorePSI-PartialDigest").is_none());
        assert!(entry.get("PSI2-PartialDigest").is_some());
        assert!(entry.get("RestorePSI2-PartialDigest").is_some());

        // Other chips are untouched.
        let mut entry = digest_entry();
        strip_partial_digests(&mut entry, Some(0x20), 2315222105);
        assert_eq!(entry.len(), 4);
    }

    #[test]
    fn mav7_mav8_digest_selection_through_builder() {
        // iPhone9,1's gold cert (2315222105) is not in the allowlist, so the
        // primary PSI pair is removed and PSI2 kept.
        let identity = baseband_identity(0x68);
        let mut rng = StdRng::seed_from_u64(7);
        let device = test_device("iPhone9,1", 0x8010);
        let mut request = TssRequest::new(&device, &identity, &mut rng).unwrap();
        request
            .add_image(ImageKind::Baseband, &identity, &mut rng)
            .unwrap();

        let bb = request
            .entries()
            .get("BasebandFirmware")
            .unwrap()
            .as_dictionary()
            .unwrap();
        assert!(bb.get("PSI-PartialDigest").is_none());
        assert!(bb.get("RestorePSI-PartialDigest").is_none());
        assert!(bb.get("PSI2-PartialDigest").is_some());
        assert!(bb.get("RestorePSI2-PartialDigest").is_some());
    }

    #[test]
    fn xml_serialization_round_trips() {
        let request = build_request("iPhone10,3", 0x8015, "0x8015");
        let xml = request.to_xml().unwrap();

        let parsed = Value::from_reader(std::io::Cursor::new(&xml)).unwrap();
        assert_eq!(
            parsed.as_dictionary().unwrap().get("@ApImg4Ticket"),
            Some(&Value::Boolean(true))
        );
    }
}
