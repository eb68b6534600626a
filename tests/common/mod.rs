pub mod mocks;

use std::path::{Path, PathBuf};

#[allow(unused_imports)]
pub use mocks::MemoryStore;

pub const KIB: u64 = 1024;

/// Deterministic, non-repeating-looking payload so misordered parts show up.
#[allow(dead_code)]
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 256) as u8).collect()
}

#[allow(dead_code)]
pub fn write_file(dir: &Path, name: &str, len: usize) -> (PathBuf, Vec<u8>) {
    let path = dir.join(name);
    let bytes = payload(len);
    std::fs::write(&path, &bytes).expect("write test file");
    (path, bytes)
}
