//! Operations against tenant infrastructure: the Odoo service provisioner
//! and the backup catalog.

pub mod backup;
pub mod provisioner;

pub use backup::BackupCatalog;
pub use provisioner::{HttpOdooProvisioner, InMemoryProvisioner, OdooProvisioner};
