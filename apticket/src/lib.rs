/*
 * SPDX-FileCopyrightText: 2024-2026 apticket contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! apticket is primarily an application and not a library. The semver
//! versioning covers the CLI only; all Rust APIs can change at any time, even
//! in patch releases.
//!
//! The CLI source files use concrete types wherever possible for simplicity,
//! while the "library"-style source files aim to be generic.

pub mod api;
pub mod baseband;
pub mod cli;
pub mod device;
pub mod manifest;
pub mod remotezip;
pub mod tss;
