// -
// Identifiers

/// Alphabet for application and instance id suffixes
pub(crate) const ID_ALPHABET: [char; 36] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i',
    'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];
pub(crate) const ID_SUFFIX_LEN: usize = 10;

// -
// Resource staging

/// Hidden prefix for in-flight materialization targets
pub(crate) const MATERIALIZE_TMP_PREFIX: &str = ".d-fleet-partial-";

/// gzip member header
pub(crate) const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

// -
// Configuration

pub(crate) const CONFIG_ENV_PREFIX: &str = "FLEET";
pub(crate) const CONFIG_PATH_ENV: &str = "CONFIG_PATH";
