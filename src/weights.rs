//! Binary weights file
//!
//! Layout, little-endian and unpadded:
//!
//! ```text
//! i32 major | i32 minor | i32 revision | seen (u64 when major·10 + minor >= 2, else i32)
//! per parameterized layer, in network order: the layer's write_weights payload
//! ```
//!
//! A convolutional layer writes its biases, then (with batch normalization)
//! scales, rolling mean and rolling variance, then weights, then (with a
//! parametric ReLU) its slopes.
//!
//! Loading checks the payload length against the network before any layer is
//! touched, so a short or oversized file leaves the network as it was.

use crate::error::{Error, Result};
use crate::network::Network;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

pub const MAJOR_VERSION: i32 = 0;
pub const MINOR_VERSION: i32 = 2;
pub const REVISION: i32 = 0;

/// Leading block of a weights file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightsHeader {
    pub major: i32,
    pub minor: i32,
    pub revision: i32,
    /// Training samples seen when the file was written.
    pub seen: u64,
}

impl WeightsHeader {
    pub fn current(seen: u64) -> Self {
        Self {
            major: MAJOR_VERSION,
            minor: MINOR_VERSION,
            revision: REVISION,
            seen,
        }
    }

    /// Files from version 0.2 on store `seen` as 64 bits.
    fn wide_seen(&self) -> bool {
        self.major * 10 + self.minor >= 2
    }

    pub fn write_to(&self, writer: &mut dyn Write) -> Result<()> {
        writer.write_all(&self.major.to_le_bytes())?;
        writer.write_all(&self.minor.to_le_bytes())?;
        writer.write_all(&self.revision.to_le_bytes())?;
        if self.wide_seen() {
            writer.write_all(&self.seen.to_le_bytes())?;
        } else {
            writer.write_all(&(self.seen as i32).to_le_bytes())?;
        }
        Ok(())
    }

    pub fn read_from(reader: &mut dyn Read) -> Result<Self> {
        let major = read_i32(reader)?;
        let minor = read_i32(reader)?;
        let revision = read_i32(reader)?;
        let mut header = Self {
            major,
            minor,
            revision,
            seen: 0,
        };
        header.seen = if header.wide_seen() {
            let mut bytes = [0u8; 8];
            read_exact(reader, &mut bytes)?;
            u64::from_le_bytes(bytes)
        } else {
            read_i32(reader)?.max(0) as u64
        };
        Ok(header)
    }
}

fn read_exact(reader: &mut dyn Read, bytes: &mut [u8]) -> Result<()> {
    reader.read_exact(bytes).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => {
            Error::WeightFile(format!("truncated weights file: {} bytes missing", bytes.len()))
        }
        _ => Error::Io(err),
    })
}

fn read_i32(reader: &mut dyn Read) -> Result<i32> {
    let mut bytes = [0u8; 4];
    read_exact(reader, &mut bytes)?;
    Ok(i32::from_le_bytes(bytes))
}

/// Write `values` as little-endian f32.
pub fn write_floats(writer: &mut dyn Write, values: &[f32]) -> Result<()> {
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    writer.write_all(&bytes)?;
    Ok(())
}

/// Fill `values` with little-endian f32 read from `reader`.
///
/// Running out of input is reported as [`Error::WeightFile`].
pub fn read_floats(reader: &mut dyn Read, values: &mut [f32]) -> Result<()> {
    let mut bytes = vec![0u8; values.len() * 4];
    read_exact(reader, &mut bytes)?;
    for (value, chunk) in values.iter_mut().zip(bytes.chunks_exact(4)) {
        *value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(())
}

/// Serialize the header and every layer's learned state.
pub fn write_network(network: &Network, writer: &mut dyn Write) -> Result<()> {
    WeightsHeader::current(network.seen()).write_to(writer)?;
    for layer in network.layers() {
        layer.write_weights(writer)?;
    }
    Ok(())
}

/// Restore state written by [`write_network`] and return its header.
///
/// The whole payload is read and its length checked before any layer is
/// written.
pub fn read_network(network: &mut Network, reader: &mut dyn Read) -> Result<WeightsHeader> {
    let header = WeightsHeader::read_from(reader)?;
    let expected = network
        .layers()
        .iter()
        .map(|layer| layer.weights_len())
        .sum::<usize>()
        * 4;

    let mut payload = Vec::with_capacity(expected);
    reader.read_to_end(&mut payload)?;
    if payload.len() < expected {
        return Err(Error::WeightFile(format!(
            "truncated weights file: {} bytes missing",
            expected - payload.len()
        )));
    }
    if payload.len() > expected {
        return Err(Error::WeightFile(format!(
            "weights file has {} bytes past the last layer",
            payload.len() - expected
        )));
    }

    let mut remaining = payload.as_slice();
    for layer in network.layers_mut() {
        layer.read_weights(&mut remaining)?;
    }
    network.set_seen(header.seen);
    Ok(header)
}

pub fn save_weights<P: AsRef<Path>>(network: &Network, path: P) -> Result<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path)?);
    write_network(network, &mut writer)?;
    writer.flush()?;
    log::info!("saved weights to {} (seen {})", path.display(), network.seen());
    Ok(())
}

pub fn load_weights<P: AsRef<Path>>(network: &mut Network, path: P) -> Result<WeightsHeader> {
    let path = path.as_ref();
    let mut reader = BufReader::new(File::open(path)?);
    let header = read_network(network, &mut reader)?;
    log::info!(
        "loaded weights from {} (version {}.{}.{}, seen {})",
        path.display(),
        header.major,
        header.minor,
        header.revision,
        header.seen
    );
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_header_layout() {
        let mut bytes = Vec::new();
        WeightsHeader::current(7).write_to(&mut bytes).unwrap();

        assert_eq!(bytes.len(), 20);
        assert_eq!(&bytes[0..4], &0i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &2i32.to_le_bytes());
        assert_eq!(&bytes[12..20], &7u64.to_le_bytes());
    }

    #[test]
    fn test_header_legacy_narrow_seen() {
        let mut bytes = Vec::new();
        for v in [0i32, 1, 0, 42] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let header = WeightsHeader::read_from(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(header.minor, 1);
        assert_eq!(header.seen, 42);
    }

    #[test]
    fn test_floats_little_endian() {
        let mut bytes = Vec::new();
        write_floats(&mut bytes, &[1.0, -2.5]).unwrap();
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());

        let mut values = [0.0f32; 2];
        read_floats(&mut Cursor::new(bytes), &mut values).unwrap();
        assert_eq!(values, [1.0, -2.5]);
    }

    #[test]
    fn test_read_floats_truncated() {
        let mut values = [0.0f32; 3];
        let err = read_floats(&mut Cursor::new(vec![0u8; 8]), &mut values).unwrap_err();
        assert!(matches!(err, Error::WeightFile(ref msg) if msg.contains("truncated")));
    }
}
