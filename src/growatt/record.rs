use crate::error::FrameError;
use crate::growatt::decoder::Decoder;
use crate::growatt::layout::{FieldKind, FieldSpec, Layout};
use crate::growatt::packet::{MessageType, ProtocolVersion};

use chrono::NaiveDateTime;
use log::error;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Int(i128),
    Uint(u128),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{}", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Uint(u) => write!(f, "{}", u),
        }
    }
}

/// One decoded datalogger frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    pub datalogger_serial: String,
    pub inverter_serial: String,
    pub protocol: ProtocolVersion,
    pub message_type: MessageType,
    pub date: NaiveDateTime,
    pub data: BTreeMap<String, Value>,
    pub ack: bool,
}

impl Record {
    /// Smart meter records are keyed by the datalogger, everything else by
    /// the inverter.
    pub fn device(&self) -> &str {
        if self.message_type.is_smart_meter() {
            &self.datalogger_serial
        } else {
            &self.inverter_serial
        }
    }

    pub fn is_buffered(&self) -> bool {
        self.message_type == MessageType::Buffered
    }
}

/// Values pulled out of a payload by a layout, before they become a [`Record`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Extracted {
    pub datalogger_serial: String,
    pub inverter_serial: String,
    pub date: NaiveDateTime,
    pub data: BTreeMap<String, Value>,
}

pub struct Extractor;
impl Extractor {
    /// Decodes every field `layout` names out of an unscrambled payload
    /// (header and CRC already removed). One bad field fails the lot.
    pub fn extract(payload: &[u8], layout: &Layout) -> Result<Extracted, FrameError> {
        let datalogger_serial = Self::text("datalogserial", &layout.datalogserial, payload)?;
        let inverter_serial = Self::text("pvserial", &layout.pvserial, payload)?;

        let date = match &layout.date {
            Some(spec) => spec
                .slice(payload)
                .and_then(Decoder::datetime)
                .map_err(|source| Self::failed("date", spec, payload, source))?,
            // no date in this layout; use receipt time
            None => chrono::Local::now().naive_local(),
        };

        let mut data = BTreeMap::new();
        for (name, spec) in layout.included_fields() {
            let value = Self::value(spec, payload)
                .map_err(|source| Self::failed(name, spec, payload, source))?;
            data.insert(name.to_owned(), value);
        }

        Ok(Extracted {
            datalogger_serial,
            inverter_serial,
            date,
            data,
        })
    }

    fn text(name: &str, spec: &FieldSpec, payload: &[u8]) -> Result<String, FrameError> {
        spec.slice(payload)
            .and_then(Decoder::text)
            .map_err(|source| Self::failed(name, spec, payload, source))
    }

    fn value(spec: &FieldSpec, payload: &[u8]) -> Result<Value, crate::error::DecodeError> {
        let bytes = spec.slice(payload)?;
        Ok(match spec.kind {
            FieldKind::Text => Value::Text(Decoder::text(bytes)?),
            FieldKind::Uint => Value::Uint(Decoder::unsigned(bytes)?),
            FieldKind::Int => Value::Int(Decoder::signed(bytes)?),
        })
    }

    fn failed(
        name: &str,
        spec: &FieldSpec,
        payload: &[u8],
        source: crate::error::DecodeError,
    ) -> FrameError {
        error!(
            "failed to decode field {} (offset={}, length={}, kind={:?}) from payload {:02x?}: {}",
            name, spec.offset, spec.length, spec.kind, payload, source
        );
        FrameError::Field {
            field: name.to_owned(),
            source,
        }
    }
}
