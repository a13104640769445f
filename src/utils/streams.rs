// src/utils/streams.rs
use std::collections::VecDeque;
use std::io;

use log::debug;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio_stream::wrappers::SplitStream;
use tokio_stream::StreamExt;


/// What to do with each line of a child's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSink {
    /// Log every line at debug level, keep only the last `tail` lines.
    Log { tail: usize },
    /// Keep every line.
    Keep,
}

/// Reads a child's output line by line as it is produced. Bytes that are not
/// UTF-8 are replaced, never an error.
///
/// # Arguments
///
/// * `reader` - Child stdout or stderr.
/// * `tag` - Tool name used to prefix logged lines.
/// * `sink` - Whether to log and keep a tail, or keep everything.
///
/// # Returns
/// The retained lines, oldest first.
pub async fn read_child_lines<R>(reader: R, tag: String, sink: LineSink) -> io::Result<Vec<String>>
where
    R: AsyncRead + Unpin,
{
    let mut lines = SplitStream::new(BufReader::new(reader).split(b'\n'));
    let mut kept: VecDeque<String> = VecDeque::new();

    while let Some(raw) = lines.next().await {
        let mut raw = raw?;
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        let line = String::from_utf8_lossy(&raw).into_owned();
        match sink {
            LineSink::Log { tail } => {
                debug!("[{}] {}", tag, line);
                if tail == 0 {
                    continue;
                }
                if kept.len() == tail {
                    kept.pop_front();
                }
                kept.push_back(line);
            }
            LineSink::Keep => kept.push_back(line),
        }
    }
    Ok(kept.into_iter().collect())
}

/// Reads a child's output to the end as lossy UTF-8.
pub async fn read_child_to_string<R>(mut reader: R) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
