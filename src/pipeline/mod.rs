// SPDX-License-Identifier: GPL-3.0-only
pub mod build_info;
pub mod item;
pub mod layout;
pub mod naming;
pub mod process;

pub use item::{ItemBuilder, NewItemRequest, PreparedItem};
pub use layout::PackagePaths;
pub use process::ProcessRunner;
