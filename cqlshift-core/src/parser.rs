//! Migration file parsing.

use std::fs;

use crate::checksum;
use crate::error::{CoreError, CoreResult};
use crate::splitter::split_statements;
use crate::types::Migration;

/// Read and parse a migration file in place: normalize the content, compute
/// the checksum, and split it into statements. Idempotent; parsing twice
/// yields the same result.
pub fn parse_migration(mig: &mut Migration) -> CoreResult<()> {
    let raw = fs::read(&mig.file_path).map_err(|e| CoreError::io(&mig.file_path, e))?;

    let normalized = checksum::normalize_content(&raw);
    mig.checksum = checksum::checksum_of(&normalized);
    mig.statements = split_statements(&normalized).map_err(|e| CoreError::Parse {
        file: mig.filename.clone(),
        message: e.to_string(),
    })?;
    mig.raw_content = normalized;

    Ok(())
}
