/*
 * SPDX-FileCopyrightText: 2024-2026 apticket contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

pub mod args;
pub mod save;

macro_rules! status {
    ($($arg:tt)*) => {
        println!("\x1b[1m[*] {}\x1b[0m", format!($($arg)*))
    }
}

pub(crate) use status;
