pub(crate) mod async_task;
pub(crate) mod file_io;

use nanoid::nanoid;

use crate::constants::ID_ALPHABET;
use crate::constants::ID_SUFFIX_LEN;

/// `"{prefix}-{random suffix}"`, lowercase alphanumeric suffix
pub(crate) fn generate_id(prefix: &str) -> String {
    format!("{}-{}", prefix, nanoid!(ID_SUFFIX_LEN, &ID_ALPHABET))
}
