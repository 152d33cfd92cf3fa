pub use crate::{
    channels::Channels,
    config::{self, Config, ConfigWrapper},
    coordinator::{self, Coordinator, FrameStats},
    datalog_writer::DatalogWriter,
    error::{DecodeError, FrameError, LayoutError},
    growatt::{
        self,
        layout::{Layout, Layouts},
        message::{Message, Outcome},
        packet::{MessageType, ProtocolVersion},
        record::{Record, Value},
    },
    mqtt::{self, Mqtt},
    options::Options,
    proxy::{self, Proxy},
    sink::RecordSink,
};

pub use anyhow::{anyhow, bail, Error, Result};
pub use log::{debug, error, info, trace, warn};
pub use std::io::Write;
pub use std::str::FromStr;
pub use tokio::sync::broadcast;
