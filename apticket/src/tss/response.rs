// SPDX-FileCopyrightText: 2024-2026 apticket contributors
// SPDX-License-Identifier: GPL-3.0-only

//! TSS signing response parsing.
//!
//! The server replies with `&`-joined `KEY=VALUE` text. This protocol has no
//! extension mechanism: an unrecognized key means the reply is not something
//! this client understands, and the whole response is rejected rather than
//! partially trusted.

use std::{io::Cursor, sync::LazyLock};

use plist::Value;
use regex::Regex;
use thiserror::Error;

use crate::device::Device;

/// Shape every response must have before segment parsing is attempted.
static RESPONSE_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^STATUS=[0-9]+&MESSAGE=[A-Za-z]+").unwrap());

#[derive(Debug, Error)]
pub enum Error {
    #[error("Response does not match STATUS=<digits>&MESSAGE=<letters>")]
    BadShape,
    #[error("Invalid response segment: {0:?}")]
    InvalidSegment(String),
    #[error("Unrecognized response field: {0:?}")]
    UnrecognizedField(String),
    #[error("TSS server returned status {0}")]
    Status(u64),
    #[error("Ticket payload is not a dictionary")]
    BadTicketPayload,
    #[error("Ticket payload has no {0} entry")]
    MissingTicket(&'static str),
    #[error("Failed to decode ticket payload plist")]
    Plist(#[from] plist::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Which key the signed ticket lives under in the response payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TicketFormat {
    /// Legacy ticket for pre-IMG4 devices.
    ApTicket,
    /// Next-generation IMG4 ticket.
    ApImg4Ticket,
}

impl TicketFormat {
    pub fn for_device(device: &Device) -> Self {
        if device.supports_img4() {
            Self::ApImg4Ticket
        } else {
            Self::ApTicket
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::ApTicket => "APTicket",
            Self::ApImg4Ticket => "ApImg4Ticket",
        }
    }
}

/// Parsed signing server reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TssResponse {
    pub status: u64,
    pub message: String,
    /// Present when the reply carried a `REQUEST_STRING` payload.
    pub ticket: Option<Vec<u8>>,
}

/// Parse and validate a raw response body. A non-zero status, a malformed
/// shape, an unrecognized field, or a payload without the expected ticket
/// key are all fatal.
pub fn parse(raw: &str, format: TicketFormat) -> Result<TssResponse> {
    if !RESPONSE_SHAPE.is_match(raw) {
        return Err(Error::BadShape);
    }

    // The payload is a plist document that may itself contain `&` and `=`,
    // so everything after `REQUEST_STRING=` is taken verbatim.
    let (head, payload) = match raw.split_once("REQUEST_STRING=") {
        Some((head, payload)) => (head, Some(payload)),
        None => (raw, None),
    };

    let mut status = None;
    let mut message = None;

    for segment in head.split('&') {
        if segment.is_empty() {
            continue;
        }

        let (key, value) = segment
            .split_once('=')
            .ok_or_else(|| Error::InvalidSegment(segment.to_owned()))?;

        match key {
            "STATUS" => {
                status = Some(
                    value
                        .parse::<u64>()
                        .map_err(|_| Error::InvalidSegment(segment.to_owned()))?,
                );
            }
            "MESSAGE" => message = Some(value.to_owned()),
            _ => return Err(Error::UnrecognizedField(key.to_owned())),
        }
    }

    // The shape check guarantees both are present.
    let status = status.ok_or(Error::BadShape)?;
    let message = message.ok_or(Error::BadShape)?;

    if status != 0 {
        return Err(Error::Status(status));
    }

    let ticket = match payload {
        Some(payload) => {
            let value = Value::from_reader(Cursor::new(payload.as_bytes()))?;
            let dict = value.as_dictionary().ok_or(Error::BadTicketPayload)?;
            let data = dict
                .get(format.key())
                .and_then(Value::as_data)
                .ok_or(Error::MissingTicket(format.key()))?;

            Some(data.to_vec())
        }
        None => None,
    };

    Ok(TssResponse {
        status,
        message,
        ticket,
    })
}
