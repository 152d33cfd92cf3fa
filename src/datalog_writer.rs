use crate::prelude::*;

use async_trait::async_trait;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Appends every decoded record to a file as one JSON object per line.
#[derive(Debug, Clone)]
pub struct DatalogWriter {
    file: Arc<Mutex<std::fs::File>>,
    path: String,
    records_written: Arc<Mutex<u64>>,
}

impl DatalogWriter {
    pub fn new(path: &str) -> Result<Self> {
        info!("Opening datalog file at {}", path);

        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => f,
            Err(e) => {
                error!("Failed to open datalog file {}: {}", path, e);
                return Err(e.into());
            }
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)) {
                error!("Failed to set permissions on datalog file {}: {}", path, e);
                return Err(e.into());
            }
        }

        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            path: path.to_string(),
            records_written: Arc::new(Mutex::new(0)),
        })
    }

    pub fn write_record(&self, record: &Record) -> Result<()> {
        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();

        let mut line = serde_json::Map::new();
        line.insert("utc_timestamp".to_string(), timestamp.into());
        line.insert("datalogserial".to_string(), record.datalogger_serial.clone().into());
        line.insert("pvserial".to_string(), record.inverter_serial.clone().into());
        line.insert("protocol".to_string(), serde_json::to_value(record.protocol)?);
        line.insert(
            "message_type".to_string(),
            format!("{:04x}", u16::from(record.message_type)).into(),
        );
        line.insert(
            "time".to_string(),
            record.date.format("%Y-%m-%dT%H:%M:%S").to_string().into(),
        );
        line.insert("values".to_string(), serde_json::to_value(&record.data)?);

        let json_string = serde_json::to_string(&serde_json::Value::Object(line))?;

        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("Failed to lock datalog file"))?;
        if let Err(e) = writeln!(file, "{}", json_string).and_then(|_| file.flush()) {
            error!("Failed to write to datalog file {}: {}", self.path, e);
            return Err(e.into());
        }

        let mut written = self
            .records_written
            .lock()
            .map_err(|_| anyhow!("Failed to lock records counter"))?;
        *written += 1;
        debug!("Total records stored in datalog file: {}", *written);

        Ok(())
    }

    pub fn records_written(&self) -> u64 {
        self.records_written.lock().map(|n| *n).unwrap_or(0)
    }
}

#[async_trait]
impl RecordSink for DatalogWriter {
    fn name(&self) -> &str {
        "datalog"
    }

    async fn handle(&self, record: &Record) -> Result<()> {
        self.write_record(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;
    use tempfile::NamedTempFile;

    fn record() -> Record {
        let mut data = BTreeMap::new();
        data.insert("pvpowerin".to_string(), Value::Uint(2364));
        data.insert("pvtemperature".to_string(), Value::Int(-12));

        Record {
            datalogger_serial: "XGD6CLC86C".to_string(),
            inverter_serial: "AFK0BHN01J".to_string(),
            protocol: ProtocolVersion::V6,
            message_type: MessageType::InverterData,
            date: NaiveDate::from_ymd_opt(2024, 6, 10)
                .and_then(|d| d.and_hms_opt(8, 56, 19))
                .unwrap(),
            data,
            ack: false,
        }
    }

    #[test]
    fn test_write_record() -> Result<()> {
        let temp_file = NamedTempFile::new()?;
        let writer = DatalogWriter::new(temp_file.path().to_str().unwrap())?;

        writer.write_record(&record())?;
        writer.write_record(&record())?;
        assert_eq!(writer.records_written(), 2);

        let contents = std::fs::read_to_string(temp_file.path())?;
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let json: serde_json::Value = serde_json::from_str(lines[0])?;
        assert_eq!(json["datalogserial"], "XGD6CLC86C");
        assert_eq!(json["pvserial"], "AFK0BHN01J");
        assert_eq!(json["message_type"], "0104");
        assert_eq!(json["time"], "2024-06-10T08:56:19");
        assert_eq!(json["values"]["pvpowerin"], 2364);
        assert_eq!(json["values"]["pvtemperature"], -12);

        Ok(())
    }
}
