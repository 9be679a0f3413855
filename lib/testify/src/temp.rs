use std::path::PathBuf;

use rand::Rng;
use rand::distr::Alphanumeric;

fn random_string(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// A path in the temp dir, the file itself is not created.
pub fn temp_file() -> PathBuf {
    std::env::temp_dir().join(random_string(16))
}
