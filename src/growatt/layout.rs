use crate::error::{DecodeError, FrameError, LayoutError};
use crate::growatt::decoder::MAX_NUMERIC_WIDTH;
use crate::growatt::packet::{MessageType, ProtocolVersion, NORMAL_PACKET_SIZE};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Field name that layouts carry in `data` but which never becomes a value.
const SKIPPED_FIELDS: &[&str] = &["logstart"];

const GENERIC_MESSAGE_TYPE: &str = "NNNN";

pub const DEFAULT_INVERTER_TYPE: &str = "default";

// {{{ FieldSpec
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Int,
    Uint,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FieldSpec {
    pub offset: usize,
    pub length: usize,
    pub kind: FieldKind,
    pub include: bool,
}

impl FieldSpec {
    pub fn slice<'a>(&self, payload: &'a [u8]) -> Result<&'a [u8], DecodeError> {
        self.offset
            .checked_add(self.length)
            .and_then(|end| payload.get(self.offset..end))
            .ok_or(DecodeError::OutOfRange {
                offset: self.offset,
                length: self.length,
                available: payload.len(),
            })
    }
} // }}}

#[derive(Clone, Debug, PartialEq)]
pub struct Layout {
    pub name: String,
    pub decrypt: bool,
    pub datalogserial: FieldSpec,
    pub pvserial: FieldSpec,
    pub date: Option<FieldSpec>,
    pub data: BTreeMap<String, FieldSpec>,
}

impl Layout {
    /// Fields from `data` that end up in a record.
    pub fn included_fields(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.data
            .iter()
            .filter(|(name, spec)| spec.include && !SKIPPED_FIELDS.contains(&name.as_str()))
            .map(|(name, spec)| (name.as_str(), spec))
    }
}

// {{{ on-disk documents
#[derive(Debug, Deserialize)]
struct LayoutDocument {
    name: String,
    #[serde(default = "default_true")]
    decrypt: bool,
    datalogserial: FieldDocument,
    pvserial: FieldDocument,
    date: Option<FieldDocument>,
    #[serde(default)]
    data: BTreeMap<String, FieldDocument>,
}

#[derive(Debug, Deserialize)]
struct FieldDocument {
    offset: usize,
    length: usize,
    #[serde(rename = "type")]
    kind: Option<String>,
    incl: Option<Flag>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

fn default_true() -> bool {
    true
}

impl LayoutDocument {
    fn into_layout(self) -> Result<Layout, LayoutError> {
        let name = self.name;
        let field = |field: &str, doc: FieldDocument| FieldDocument::into_spec(doc, &name, field);

        let datalogserial = field("datalogserial", self.datalogserial)?;
        let pvserial = field("pvserial", self.pvserial)?;

        let date = match self.date {
            Some(doc) => {
                let spec = field("date", doc)?;
                if spec.length != 6 {
                    return Err(LayoutError::InvalidField {
                        layout: name.clone(),
                        field: "date".to_owned(),
                        reason: format!("date must be 6 bytes, got {}", spec.length),
                    });
                }
                Some(spec)
            }
            None => None,
        };

        let mut data = BTreeMap::new();
        for (key, doc) in self.data {
            let spec = field(&key, doc)?;
            data.insert(key, spec);
        }

        Ok(Layout {
            name,
            decrypt: self.decrypt,
            datalogserial,
            pvserial,
            date,
            data,
        })
    }
}

impl FieldDocument {
    fn into_spec(self, layout: &str, field: &str) -> Result<FieldSpec, LayoutError> {
        let invalid = |reason: String| LayoutError::InvalidField {
            layout: layout.to_owned(),
            field: field.to_owned(),
            reason,
        };

        // anything other than text/int/uint is the plain numeric kind
        let kind = match self.kind.as_deref() {
            Some("text") => FieldKind::Text,
            Some("int") => FieldKind::Int,
            _ => FieldKind::Uint,
        };

        let include = match self.incl {
            None => true,
            Some(Flag::Bool(b)) => b,
            Some(Flag::Text(s)) => match s.to_ascii_lowercase().as_str() {
                "yes" | "y" | "true" => true,
                "no" | "n" | "false" => false,
                other => return Err(invalid(format!("incl must be yes/no, got {:?}", other))),
            },
        };

        if self.length == 0 {
            return Err(invalid("length must be at least 1".to_owned()));
        }
        if kind != FieldKind::Text && self.length > MAX_NUMERIC_WIDTH {
            return Err(invalid(format!(
                "numeric fields are at most {} bytes, got {}",
                MAX_NUMERIC_WIDTH, self.length
            )));
        }
        if self.offset.checked_add(self.length).is_none() {
            return Err(invalid(format!(
                "offset {} plus length {} overflows",
                self.offset, self.length
            )));
        }

        Ok(FieldSpec {
            offset: self.offset,
            length: self.length,
            kind,
            include,
        })
    }
} // }}}

/// Read-only catalog of layouts keyed by name.
#[derive(Clone, Debug, Default)]
pub struct Layouts {
    layouts: HashMap<String, Layout>,
}

impl Layouts {
    pub fn new(layouts: Vec<Layout>) -> Result<Self, LayoutError> {
        let mut r = HashMap::new();
        for layout in layouts {
            if r.contains_key(&layout.name) {
                return Err(LayoutError::Duplicate(layout.name));
            }
            r.insert(layout.name.clone(), layout);
        }
        Ok(Self { layouts: r })
    }

    /// Loads every `.json`, `.yaml` and `.yml` document in `dir`.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, LayoutError> {
        let dir = dir.as_ref();
        let io_err = |source| LayoutError::Io {
            path: dir.display().to_string(),
            source,
        };

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("json" | "yaml" | "yml")
            ) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut layouts = Vec::with_capacity(paths.len());
        for path in paths {
            debug!("Loading layout file: {}", path.display());
            layouts.push(Self::load_file(&path)?);
        }

        let r = Self::new(layouts)?;
        info!("loaded {} layouts from {}", r.len(), dir.display());
        Ok(r)
    }

    pub fn load_file(path: &Path) -> Result<Layout, LayoutError> {
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| LayoutError::Io {
            path: display.clone(),
            source,
        })?;

        let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
        let document: LayoutDocument = if is_json {
            serde_json::from_str(&content).map_err(|e| LayoutError::Parse {
                path: display,
                message: e.to_string(),
            })?
        } else {
            serde_yaml::from_str(&content).map_err(|e| LayoutError::Parse {
                path: display,
                message: e.to_string(),
            })?
        };

        document.into_layout()
    }

    pub fn from_json(content: &str) -> Result<Layout, LayoutError> {
        let document: LayoutDocument =
            serde_json::from_str(content).map_err(|e| LayoutError::Parse {
                path: "<inline>".to_owned(),
                message: e.to_string(),
            })?;
        document.into_layout()
    }

    pub fn get(&self, name: &str) -> Option<&Layout> {
        self.layouts.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.layouts.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut r: Vec<&str> = self.layouts.keys().map(String::as_str).collect();
        r.sort_unstable();
        r
    }

    /// Picks the layout for a frame: the specific key first, then the
    /// wildcard message-type key for inverter and buffered data.
    pub fn resolve(
        &self,
        frame_len: usize,
        protocol: ProtocolVersion,
        message_type: MessageType,
        inverter_type: &str,
    ) -> Result<&Layout, FrameError> {
        debug!("Automatic layout detection, record length {}", frame_len);

        let key = LayoutKey::new(frame_len, protocol, message_type, inverter_type);

        let specific = key.specific();
        debug!("Checking if layout [{}] exists", specific);
        if let Some(layout) = self.get(&specific) {
            debug!("Record layout used: {}", specific);
            return Ok(layout);
        }

        if message_type.has_generic_layout() {
            let generic = key.generic();
            debug!("No matching record layout, checking generic layout [{}]", generic);
            if let Some(layout) = self.get(&generic) {
                debug!("Record layout used: {}", generic);
                return Ok(layout);
            }
        }

        Err(FrameError::NoValidRecord { layout: specific })
    }
}

/// The pieces of a catalog key, `T<protocol><type>[X][INVTYPE]`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LayoutKey {
    protocol: String,
    message_type: String,
    suffix: String,
}

impl LayoutKey {
    pub fn new(
        frame_len: usize,
        protocol: ProtocolVersion,
        message_type: MessageType,
        inverter_type: &str,
    ) -> Self {
        let is_smart_meter = message_type.is_smart_meter();
        let mut suffix = String::new();

        // smart meter records never get the extended or inverter-type suffix
        if frame_len > NORMAL_PACKET_SIZE && !is_smart_meter {
            suffix.push('X');
        }
        if inverter_type != DEFAULT_INVERTER_TYPE && !is_smart_meter {
            suffix.push_str(&inverter_type.to_uppercase());
        }

        Self {
            protocol: format!("{:02x}", protocol.key_byte()),
            message_type: message_type.key_hex(),
            suffix,
        }
    }

    pub fn specific(&self) -> String {
        format!("T{}{}{}", self.protocol, self.message_type, self.suffix)
    }

    pub fn generic(&self) -> String {
        format!("T{}{}{}", self.protocol, GENERIC_MESSAGE_TYPE, self.suffix)
    }
}
