//! Custom Resource Definitions for the MariaDB operator

mod mariadb;
pub mod types;

pub use mariadb::{HaKind, HaMode, MariaDB, MariaDBSpec, MariaDBStatus, MAX_TIMEOUT_SECONDS};
pub use types::*;
