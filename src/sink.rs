use crate::prelude::*;

use async_trait::async_trait;

/// Anything that wants decoded records. The decoding pipeline knows nothing
/// about sinks; the coordinator hands every record to each registered one.
#[async_trait]
pub trait RecordSink: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, record: &Record) -> Result<()>;
}
