//! Inbound certificate stream.
//!
//! A [`StreamSource`] pushes decoded messages into a message channel and
//! transport/decode failures into a parallel error channel. It returns when
//! its input ends or when the message receiver is dropped.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

use certhunt_core::RawEvent;

use crate::error::SourceError;

#[async_trait]
pub trait StreamSource: Send {
    async fn run(
        self: Box<Self>,
        messages: mpsc::Sender<RawEvent>,
        errors: mpsc::Sender<SourceError>,
    );
}

// ── JSON lines ──────────────────────────────────────────────────────

/// Newline-delimited certstream JSON from stdin or a file/pipe.
pub struct JsonLinesSource {
    input: Input,
}

enum Input {
    Stdin,
    File(PathBuf),
}

impl JsonLinesSource {
    /// `-` reads stdin; anything else is opened as a path.
    pub fn from_arg(input: &str) -> Self {
        if input == "-" {
            Self::stdin()
        } else {
            Self::file(input)
        }
    }

    pub fn stdin() -> Self {
        Self {
            input: Input::Stdin,
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            input: Input::File(path.into()),
        }
    }
}

#[async_trait]
impl StreamSource for JsonLinesSource {
    async fn run(
        self: Box<Self>,
        messages: mpsc::Sender<RawEvent>,
        errors: mpsc::Sender<SourceError>,
    ) {
        match self.input {
            Input::Stdin => {
                info!("reading certificate stream from stdin");
                read_lines(tokio::io::stdin(), &messages, &errors).await;
            }
            Input::File(path) => {
                info!(path = %path.display(), "reading certificate stream from file");
                match tokio::fs::File::open(&path).await {
                    Ok(file) => read_lines(file, &messages, &errors).await,
                    Err(e) => {
                        let _ = errors.send(SourceError::Io(e)).await;
                    }
                }
            }
        }
    }
}

async fn read_lines<R: AsyncRead + Unpin>(
    reader: R,
    messages: &mpsc::Sender<RawEvent>,
    errors: &mpsc::Sender<SourceError>,
) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                let _ = errors.send(SourceError::Io(e)).await;
                break;
            }
        }

        // Lines are decoded as bytes so one non-UTF-8 line is a decode
        // error for that line only.
        let line = buf.trim_ascii();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_slice::<RawEvent>(line) {
            Ok(event) => {
                if messages.send(event).await.is_err() {
                    debug!("message receiver dropped, stopping stream");
                    return;
                }
            }
            Err(e) => {
                if errors.send(SourceError::Decode(e)).await.is_err() {
                    return;
                }
            }
        }
    }
    debug!("certificate stream ended");
}

// ── In-process channel ──────────────────────────────────────────────

/// Forwards messages from an in-process channel; ends when every sender of
/// the wrapped channel is dropped.
pub struct ChannelSource {
    inbound: mpsc::Receiver<RawEvent>,
}

impl ChannelSource {
    pub fn new(inbound: mpsc::Receiver<RawEvent>) -> Self {
        Self { inbound }
    }

    /// A source plus the sender that feeds it.
    pub fn channel(capacity: usize) -> (mpsc::Sender<RawEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl StreamSource for ChannelSource {
    async fn run(
        mut self: Box<Self>,
        messages: mpsc::Sender<RawEvent>,
        _errors: mpsc::Sender<SourceError>,
    ) {
        while let Some(event) = self.inbound.recv().await {
            if messages.send(event).await.is_err() {
                break;
            }
        }
    }
}
