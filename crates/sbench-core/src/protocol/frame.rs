//! Length-prefixed framing: 4-byte little-endian length, then exactly that
//! many payload bytes.

use std::io::{Read, Write};

use super::error::ProtocolError;

/// Upper bound on a single frame. A full stat chunk of 2^20 records encodes
/// well below this; anything larger is a corrupt or hostile stream.
pub const MAX_FRAME_LEN: usize = 256 << 20;

/// Write one frame. The caller serializes sends (the transport holds a lock)
/// so frames never interleave on the stream.
pub fn write_frame(w: &mut impl Write, payload: &[u8]) -> Result<(), ProtocolError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::Framing(format!(
            "frame of {} bytes exceeds maximum {}",
            payload.len(),
            MAX_FRAME_LEN
        )));
    }
    let len = (payload.len() as u32).to_le_bytes();
    w.write_all(&len)?;
    w.write_all(payload)?;
    w.flush()?;
    Ok(())
}

/// Read one frame, looping over short reads until the declared length is
/// satisfied. Returns `None` when the peer half-closed before a new frame
/// started; EOF in the middle of a frame is a framing error.
pub fn read_frame(r: &mut impl Read) -> Result<Option<Vec<u8>>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = r.read(&mut len_buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ProtocolError::Framing(
                "connection closed inside length prefix".into(),
            ));
        }
        filled += n;
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::Framing(format!(
            "declared frame length {} exceeds maximum {}",
            len, MAX_FRAME_LEN
        )));
    }

    let mut payload = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = r.read(&mut payload[filled..])?;
        if n == 0 {
            return Err(ProtocolError::Framing(format!(
                "connection closed inside payload ({} of {} bytes)",
                filled, len
            )));
        }
        filled += n;
    }
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader that hands out at most one byte per call, to exercise the
    /// short-read loop.
    struct OneByte<R>(R);

    impl<R: Read> Read for OneByte<R> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if buf.is_empty() {
                return Ok(0);
            }
            self.0.read(&mut buf[..1])
        }
    }

    #[test]
    fn roundtrip_no_trailing_consumption() {
        let bodies: [&[u8]; 4] = [b"", b"x", b"hello frame", &[0u8; 4096]];
        for body in bodies {
            let mut buf = Vec::new();
            write_frame(&mut buf, body).unwrap();
            let mut cursor = Cursor::new(buf);
            let out = read_frame(&mut cursor).unwrap().unwrap();
            assert_eq!(out.as_slice(), body);
            assert_eq!(cursor.position() as usize, cursor.get_ref().len());
        }
    }

    #[test]
    fn two_frames_survive_one_byte_reads() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"first").unwrap();
        write_frame(&mut buf, b"second message").unwrap();
        let mut reader = OneByte(Cursor::new(buf));
        assert_eq!(read_frame(&mut reader).unwrap().unwrap(), b"first");
        assert_eq!(read_frame(&mut reader).unwrap().unwrap(), b"second message");
        assert!(read_frame(&mut reader).unwrap().is_none());
    }

    #[test]
    fn clean_eof_is_none_dirty_eof_is_error() {
        let mut empty = Cursor::new(Vec::new());
        assert!(read_frame(&mut empty).unwrap().is_none());

        // Length promises 10 bytes but only 3 follow.
        let mut truncated = Vec::new();
        truncated.extend_from_slice(&10u32.to_le_bytes());
        truncated.extend_from_slice(b"abc");
        let mut cursor = Cursor::new(truncated);
        assert!(matches!(
            read_frame(&mut cursor),
            Err(ProtocolError::Framing(_))
        ));
    }

    #[test]
    fn oversized_declared_length_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(u32::MAX).to_le_bytes());
        let mut cursor = Cursor::new(buf);
        assert!(matches!(
            read_frame(&mut cursor),
            Err(ProtocolError::Framing(_))
        ));
    }
}
