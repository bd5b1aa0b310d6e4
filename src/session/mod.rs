//! Session state - accounts, presence, backlogs and open transfers.

mod directory;
mod model;

pub use directory::{Delivery, Departed, Directory, DownloadCursor, LoginBacklog};
pub use model::{FileNotice, FileRecord, Message, TransferBinding, TransferDirection, User};
