#![cfg(feature = "async")]

use std::io::{Read, Seek};
use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::extract::{scanner_from_path, scanner_from_reader, ExtractionConfig, KeyframeInfo};
use crate::Error;

/// Create a Tokio `Stream` of selected-keyframe events from an MP4 file
/// on disk.
///
/// This API is enabled by default (crate feature `async`).
///
/// Implementation detail: demuxing requires `Seek`, so this function
/// runs the synchronous scanner on a blocking thread
/// (`tokio::task::spawn_blocking`) and forwards events over a bounded
/// channel.
///
/// `buffer` controls the channel capacity. Larger buffers can improve
/// throughput if the consumer occasionally stalls.
pub fn keyframes_from_path(
    path: impl Into<PathBuf>,
    config: ExtractionConfig,
    buffer: usize,
) -> ReceiverStream<Result<KeyframeInfo, Error>> {
    let path = path.into();
    let (tx, rx) = mpsc::channel(buffer.max(1));

    tokio::task::spawn_blocking(move || {
        let mut scanner = match scanner_from_path(&path, config) {
            Ok(s) => s,
            Err(err) => {
                let _ = tx.blocking_send(Err(err));
                return;
            }
        };

        for item in &mut scanner {
            if tx.blocking_send(item).is_err() {
                break;
            }
        }
    });

    ReceiverStream::new(rx)
}

/// Create a Tokio `Stream` of selected-keyframe events from any
/// seekable reader.
///
/// The reader must be `Send + 'static` because scanning runs in
/// `spawn_blocking`.
pub fn keyframes_from_reader<R>(
    reader: R,
    config: ExtractionConfig,
    buffer: usize,
) -> ReceiverStream<Result<KeyframeInfo, Error>>
where
    R: Read + Seek + Send + 'static,
{
    let (tx, rx) = mpsc::channel(buffer.max(1));

    tokio::task::spawn_blocking(move || {
        let mut scanner = match scanner_from_reader(reader, config) {
            Ok(s) => s,
            Err(err) => {
                let _ = tx.blocking_send(Err(err));
                return;
            }
        };

        for item in &mut scanner {
            if tx.blocking_send(item).is_err() {
                break;
            }
        }
    });

    ReceiverStream::new(rx)
}
