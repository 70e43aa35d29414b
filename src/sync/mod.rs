// SPDX-License-Identifier: GPL-3.0-only
pub mod changeset;
pub mod ftp;
pub mod push;
pub mod session;
pub mod traits;

pub use changeset::Changeset;
pub use ftp::FtpTransport;
pub use push::{PushReport, push};
pub use session::{SessionState, SyncSession};
pub use traits::Transport;
