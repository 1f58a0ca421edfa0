use std::collections::HashMap;

use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};

use super::{Batch, Sink};
use crate::codec::RowLayout;
use crate::payload::PartitionKey;

/// Writes rows to a stream as they arrive. A header line is written for a partition whenever its
/// column list has grown since the last header line, so the stream can always be read back.
pub struct ConsoleSink<W = Stdout> {
    writer: W,
    header_widths: HashMap<PartitionKey, usize>,
}

impl ConsoleSink<Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W> ConsoleSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            header_widths: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn into_inner(self) -> W {
        self.writer
    }
}

impl<W> Sink for ConsoleSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, batch: Batch<'_>) -> crate::Result<()> {
        let layout = RowLayout::Source;
        let mut out = String::new();

        let width = self.header_widths.entry(batch.key.clone()).or_default();
        if batch.headers.len() > *width {
            out.push_str(&layout.header_line(batch.headers));
            *width = batch.headers.len();
        }

        for payload in batch.rows {
            out.push_str(&layout.row_line(payload, batch.headers));
        }

        self.writer.write_all(out.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
