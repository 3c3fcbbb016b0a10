use std::io::{self, Read, Write};

use thiserror::Error;

/// Upper bound on a single frame body. Anything larger is treated as a
/// protocol violation rather than an allocation request.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Error raised by the frame codec.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame io failed: {0}")]
    Io(#[from] io::Error),
    #[error("frame length {len} exceeds the {MAX_FRAME_LEN} byte cap")]
    Oversize { len: usize },
}

/// Write one length-prefixed frame: 4-byte little-endian length, then the
/// payload bytes, as a single buffered write.
pub fn write_frame<W: Write>(writer: &mut W, frame: &[u8]) -> Result<(), FrameError> {
    if frame.len() > MAX_FRAME_LEN {
        return Err(FrameError::Oversize { len: frame.len() });
    }
    let len = frame.len() as u32;
    let mut buffer = Vec::with_capacity(4 + frame.len());
    buffer.extend_from_slice(&len.to_le_bytes());
    buffer.extend_from_slice(frame);
    writer.write_all(&buffer)?;
    Ok(())
}

/// Read one length-prefixed frame. Blocks until a full frame arrives or the
/// stream ends, which surfaces as an io error.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>, FrameError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::Oversize { len });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}
