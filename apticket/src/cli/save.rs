/*
 * SPDX-FileCopyrightText: 2024-2026 apticket contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{fs, path::PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{ArgGroup, Args};
use plist::{Dictionary, Value};
use rand::rngs::OsRng;
use tracing::info;

use crate::{
    api::CatalogClient,
    baseband,
    cli::status,
    device::Device,
    manifest::{BuildManifest, RestoreType},
    remotezip::RemoteZip,
    tss::{
        request::{ImageKind, TssRequest},
        response::{self, TicketFormat},
        transport::TssClient,
    },
};

const MANIFEST_ENTRY: &str = "BuildManifest.plist";

/// Request a signed restore ticket and save it to disk.
#[derive(Debug, Args)]
#[command(group = ArgGroup::new("build").required(true).multiple(false))]
pub struct SaveCli {
    /// Device identifier (e.g. iPhone10,3).
    #[arg(short, long, value_name = "IDENTIFIER")]
    pub device: String,

    /// Device ECID as a hexadecimal string.
    #[arg(short, long, value_name = "ECID")]
    pub ecid: String,

    /// Board config (e.g. d22ap) when the device has multiple boards.
    #[arg(long, value_name = "BOARD")]
    pub board: Option<String>,

    /// AP nonce as a hexadecimal string (random if omitted).
    #[arg(long, value_name = "HEX")]
    pub apnonce: Option<String>,

    /// SEP nonce as a hexadecimal string (random if omitted).
    #[arg(long, value_name = "HEX")]
    pub sepnonce: Option<String>,

    /// Boot nonce (generator) the AP nonce was derived from.
    #[arg(long, value_name = "HEX")]
    pub boot_nonce: Option<String>,

    /// Request a ticket for an update restore instead of an erase restore.
    #[arg(short, long)]
    pub update: bool,

    /// Firmware version (e.g. 15.7).
    #[arg(short = 'v', long, group = "build", value_name = "VERSION")]
    pub version: Option<String>,

    /// Firmware build ID (e.g. 19H12).
    #[arg(short = 'b', long, group = "build", value_name = "BUILDID")]
    pub build_id: Option<String>,

    /// Local build manifest instead of a catalog lookup.
    #[arg(short = 'm', long, group = "build", value_name = "FILE")]
    pub build_manifest: Option<PathBuf>,

    /// Skip the baseband image even on cellular devices.
    #[arg(long)]
    pub no_baseband: bool,

    /// Extra subsystem images to request.
    #[arg(long, value_name = "KIND")]
    pub image: Vec<ImageKind>,

    /// Output path for the saved ticket.
    #[arg(short, long, value_name = "FILE", default_value = "apticket.shsh2")]
    pub output: PathBuf,
}

fn fetch_manifest(cli: &SaveCli, api: &CatalogClient, identifier: &str) -> Result<Vec<u8>> {
    if let Some(path) = &cli.build_manifest {
        return fs::read(path).with_context(|| format!("Failed to read manifest: {path:?}"));
    }

    status!("Fetching firmware information");
    let firmware = api
        .fetch_firmware(identifier, cli.build_id.as_deref(), cli.version.as_deref())
        .context("Failed to look up firmware")?;
    info!(
        "Selected firmware {} ({}) released {:?}",
        firmware.version, firmware.build_id, firmware.release_date,
    );

    status!("Fetching build manifest");
    let archive = RemoteZip::open(&firmware.url)
        .with_context(|| format!("Failed to open archive: {}", firmware.url))?;

    archive
        .read_entry(MANIFEST_ENTRY)
        .context("Failed to read build manifest from archive")
}

fn write_ticket(cli: &SaveCli, device: &Device, ticket: &[u8]) -> Result<()> {
    let mut blob = Dictionary::new();
    blob.insert(
        TicketFormat::for_device(device).key().to_owned(),
        Value::Data(ticket.to_vec()),
    );
    if let Some(boot_nonce) = device.boot_nonce() {
        blob.insert(
            "generator".to_owned(),
            Value::String(format!("0x{}", hex::encode(boot_nonce))),
        );
    }

    let mut buf = Vec::new();
    Value::Dictionary(blob)
        .to_writer_xml(&mut buf)
        .context("Failed to serialize ticket")?;
    fs::write(&cli.output, buf)
        .with_context(|| format!("Failed to write ticket: {:?}", cli.output))
}

pub fn save_main(cli: &SaveCli) -> Result<()> {
    let mut rng = OsRng;

    status!("Fetching device information for {}", cli.device);
    let api = CatalogClient::new()?;
    let info = api
        .lookup_device(&cli.device, cli.board.as_deref())
        .context("Failed to look up device")?;
    info!(
        "Resolved {} ({}) to chip 0x{:04X}, board 0x{:02X}",
        info.identifier, info.board_config, info.chip_id, info.board_id,
    );

    let ecid = Device::parse_ecid(&cli.ecid)?;
    let mut device =
        Device::new(info.identifier.clone(), info.chip_id, info.board_id, ecid, &mut rng);
    if let Some(apnonce) = &cli.apnonce {
        device.set_ap_nonce(apnonce)?;
    }
    if let Some(sepnonce) = &cli.sepnonce {
        device.set_sep_nonce(sepnonce)?;
    }
    if let Some(boot_nonce) = &cli.boot_nonce {
        device.set_boot_nonce(boot_nonce)?;
        device.verify_ap_nonce_pair()?;
    }

    let manifest_data = fetch_manifest(cli, &api, &info.identifier)?;
    let manifest = BuildManifest::parse(&manifest_data).context("Failed to parse build manifest")?;

    let restore_type = if cli.update {
        RestoreType::Update
    } else {
        RestoreType::Erase
    };
    let identity = manifest.get_identity(&device, restore_type)?;

    status!("Creating TSS request");
    let mut request = TssRequest::new(&device, identity, &mut rng)?;

    let cellular = baseband::lookup(device.identifier()).is_some()
        && identity.has_component("BasebandFirmware");
    if cellular && !cli.no_baseband && !cli.image.contains(&ImageKind::Baseband) {
        request.add_image(ImageKind::Baseband, identity, &mut rng)?;
    }
    for &kind in &cli.image {
        request.add_image(kind, identity, &mut rng)?;
    }

    status!("Sending TSS request");
    let client = TssClient::new()?;
    let raw = client.send(&request)?;
    let response = response::parse(&raw, TicketFormat::for_device(&device))?;
    let ticket = response
        .ticket
        .ok_or_else(|| anyhow!("TSS response contained no ticket"))?;

    write_ticket(cli, &device, &ticket)?;
    status!("Saved {} byte ticket to {:?}", ticket.len(), cli.output);

    Ok(())
}
