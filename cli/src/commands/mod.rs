//! Command implementations for the `cqlshift` binary.

pub mod clean;
pub mod create;
pub mod info;
pub mod init;
pub mod migrate;
pub mod repair;
pub mod rollback;
pub mod status;
pub mod validate;
