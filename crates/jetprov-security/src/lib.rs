mod checksum;

pub use checksum::{is_sha256_hex, sha256_hex, verify_sha256_file, verify_sha256_reader};
