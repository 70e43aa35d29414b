// SPDX-License-Identifier: GPL-3.0-only
pub mod traits;
pub mod client;

pub use traits::Downloader;
pub use client::HttpClient;
