use std::io::{self, Write};

use flate2::{Compression, write::GzEncoder};

const LEVEL: u32 = 6;

/// Gzip `data` at a fixed level.
///
/// The header carries no timestamp or file name, so equal input gives equal output.
pub fn compress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder =
        GzEncoder::new(Vec::with_capacity(data.len() / 4 + 64), Compression::new(LEVEL));
    encoder.write_all(data)?;
    encoder.finish()
}
