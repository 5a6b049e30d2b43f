//! Content checksums used for diff comparison.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const READ_BUF_SIZE: usize = 64 * 1024;

/// BLAKE3 digest of a file's contents, hex encoded
pub fn file_checksum(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}
