use crate::growatt::packet::{ProtocolVersion, RawHeader, HEADER_LEN};

use bytes::BytesMut;
use log::{trace, warn};
use std::convert::TryFrom;
use tokio_util::codec::Decoder;

/// Splits the datalogger byte stream into whole frames using the length
/// field in each header. Frames are handed on unvalidated.
#[derive(Debug, Default)]
pub struct PacketDecoder {}

impl PacketDecoder {
    pub fn new() -> Self {
        Self {}
    }
}

impl Decoder for PacketDecoder {
    type Item = BytesMut;
    type Error = anyhow::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match RawHeader::read(&src[..]) {
            Ok(header) => header,
            Err(_) => return Ok(None), // need more header
        };

        // without a known protocol tag there is no trusting the length
        // field either, so there is nothing to resync on
        if ProtocolVersion::try_from(header.protocol).is_err() {
            warn!(
                "unrecognised frame header {:02x?}, discarding {} buffered bytes",
                &src[..HEADER_LEN],
                src.len()
            );
            src.clear();
            return Ok(None);
        }

        let frame_len = HEADER_LEN + usize::from(header.length);
        if src.len() < frame_len {
            trace!("have {} of {} frame bytes", src.len(), frame_len);
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        Ok(Some(src.split_to(frame_len)))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            // a truncated tail still goes to the validator so it gets reported
            None if !buf.is_empty() => Ok(Some(buf.split())),
            None => Ok(None),
        }
    }
}
