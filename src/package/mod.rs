//! On-disk package state: directory layout, the lockfile of desired
//! packages, and per-install receipts.

mod layout;
mod lockfile;
mod receipt;

pub use layout::Layout;
pub use lockfile::{LockedPackage, Lockfile};
pub use receipt::{RECEIPT_FILE, Receipt, ReceiptStore};
