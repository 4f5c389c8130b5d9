//! Public id generation.

use gatehouse_errors::{Code, Error, Result};
use rand::{Rng, distr::Alphanumeric};

/// Number of random characters following the prefix.
pub const PUBLIC_ID_RANDOM_LEN: usize = 10;

/// Generates `<prefix>_<10 alphanumerics>`.
pub fn new_public_id(prefix: &str) -> Result<String> {
    if prefix.is_empty() {
        return Err(Error::new(Code::GenerateId, "store.new_public_id").with_msg("missing prefix"));
    }
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(PUBLIC_ID_RANDOM_LEN)
        .map(char::from)
        .collect();
    Ok(format!("{prefix}_{suffix}"))
}

/// Reports whether `id` has the shape produced by [`new_public_id`] for
/// `prefix`.
pub fn has_prefix(id: &str, prefix: &str) -> bool {
    id.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|rest| !rest.is_empty())
}
