use crate::error::FrameError;
use crate::growatt::layout::Layouts;
use crate::growatt::packet::{self, Header, MessageType, RawHeader, Validator, ACK_PAYLOAD};
use crate::growatt::record::{Extractor, Record};
use crate::growatt::scrambler;

use log::{debug, warn};
use std::borrow::Cow;
use std::convert::TryFrom;

/// What became of a frame that passed validation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    Record(Box<Record>),
    /// datalogger acknowledgement, nothing to decode
    Ack,
    /// a type we deliberately don't decode
    Ignored(MessageType),
    /// no layout in the catalog fits; the frame is only forwarded
    NoLayout(String),
}

impl Outcome {
    pub fn record(self) -> Option<Record> {
        match self {
            Outcome::Record(r) => Some(*r),
            _ => None,
        }
    }
}

pub struct Message;
impl Message {
    /// Runs one complete frame through validation, classification, layout
    /// resolution, unscrambling and extraction.
    pub fn read(frame: &[u8], layouts: &Layouts, inverter_type: &str) -> Result<Outcome, FrameError> {
        Validator::validate(frame)?;
        let header = Header::try_from(RawHeader::read(frame)?)?;

        if packet::payload(frame) == ACK_PAYLOAD {
            debug!("ACK packet received");
            return Ok(Outcome::Ack);
        }

        if header.message_type.is_ignored() {
            debug!(
                "{:?} message won't be processed, it is in the list of ignored types",
                header.message_type
            );
            return Ok(Outcome::Ignored(header.message_type));
        }

        let layout = match layouts.resolve(
            frame.len(),
            header.protocol,
            header.message_type,
            inverter_type,
        ) {
            Ok(layout) => layout,
            Err(FrameError::NoValidRecord { layout }) => {
                warn!("Data record layout {} not defined, no processing done", layout);
                return Ok(Outcome::NoLayout(layout));
            }
            Err(e) => return Err(e),
        };

        let plain: Cow<[u8]> = if layout.decrypt {
            Cow::Owned(scrambler::scramble(frame))
        } else {
            Cow::Borrowed(frame)
        };
        debug!("plain frame: {:02x?}", plain);

        let extracted = Extractor::extract(packet::payload(&plain), layout)?;
        debug!("processed data: {:?}", extracted);

        Ok(Outcome::Record(Box::new(Record {
            datalogger_serial: extracted.datalogger_serial,
            inverter_serial: extracted.inverter_serial,
            protocol: header.protocol,
            message_type: header.message_type,
            date: extracted.date,
            data: extracted.data,
            ack: false,
        })))
    }
}
