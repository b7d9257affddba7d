/*
 * SPDX-FileCopyrightText: 2024-2026 apticket contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

pub mod request;
pub mod response;
pub mod rules;
pub mod transport;

pub use request::{ImageKind, TssRequest};
pub use response::{TicketFormat, TssResponse};
pub use transport::TssClient;
