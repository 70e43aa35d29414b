// SPDX-License-Identifier: GPL-3.0-only
pub mod xml;

pub use xml::{decode, encode};
