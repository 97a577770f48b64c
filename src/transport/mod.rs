//! The seam between command sequencing and the wire.
//!
//! A `Connector` opens a `Transport` to one host; the transport runs one
//! command at a time and only returns once the remote side has signalled
//! end-of-stream and reported an exit status.
//!
//! | Implementation | Used for                                   |
//! |----------------|--------------------------------------------|
//! | `ssh`          | real remote hosts (`ssh2`)                 |
//! | `local`        | `--local` runs and end-to-end tests (`sh -c`) |

pub mod local;
#[cfg(test)]
pub(crate) mod mock;
pub mod ssh;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::errors::TransportError;
use crate::target::{Credential, HostTarget};

pub use local::LocalConnector;
pub use ssh::SshConnector;

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A piece of live output, tagged with the index of the step producing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub step: usize,
    pub stream: OutputStream,
    pub data: String,
}

pub type OutputSink = mpsc::UnboundedSender<OutputChunk>;

/// Forwards output of a single exec to one or more `OutputSink`s.
#[derive(Debug, Clone)]
pub struct StreamTarget {
    sinks: Vec<OutputSink>,
    step: usize,
}

impl StreamTarget {
    pub fn new(sink: OutputSink, step: usize) -> Self {
        Self {
            sinks: vec![sink],
            step,
        }
    }

    /// Also forward to `sink`.
    pub fn also_to(mut self, sink: OutputSink) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn send(&self, stream: OutputStream, data: &str) {
        for sink in &self.sinks {
            // A dropped receiver only means nobody is watching.
            let _ = sink.send(OutputChunk {
                step: self.step,
                stream,
                data: data.to_string(),
            });
        }
    }

    /// A writer for raw bytes of one stream.
    pub fn writer(&self, stream: OutputStream) -> StreamWriter {
        StreamWriter {
            target: self.clone(),
            stream,
            pending: Vec::new(),
        }
    }
}

/// Decodes raw reads of one stream as UTF-8 and forwards the text.
///
/// A character split across two reads is held back until its remaining
/// bytes arrive. Bytes that can never be valid UTF-8 become U+FFFD.
#[derive(Debug)]
pub struct StreamWriter {
    target: StreamTarget,
    stream: OutputStream,
    pending: Vec<u8>,
}

impl StreamWriter {
    pub fn write(&mut self, data: &[u8]) {
        let text = self.decode(data);
        if !text.is_empty() {
            self.target.send(self.stream, &text);
        }
    }

    /// Forward any incomplete trailing character left at end of stream.
    pub fn finish(&mut self) {
        if !self.pending.is_empty() {
            let rest = String::from_utf8_lossy(&self.pending).into_owned();
            self.pending.clear();
            self.target.send(self.stream, &rest);
        }
    }

    fn decode(&mut self, data: &[u8]) -> String {
        self.pending.extend_from_slice(data);
        let mut text = String::new();
        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(valid) => {
                    text.push_str(valid);
                    start = self.pending.len();
                    break;
                }
                Err(e) => {
                    let end = start + e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[start..end]));
                    match e.error_len() {
                        Some(bad) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            start = end + bad;
                        }
                        None => {
                            start = end;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..start);
        text
    }
}

/// Opens authenticated transports.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        target: &HostTarget,
        credential: &Credential,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

/// An open command channel to one host.
///
/// `exec` must be cancel-safe: if its future is dropped, the command must
/// not bleed into a later `exec`. `close` terminates anything in flight.
#[async_trait]
pub trait Transport: Send {
    async fn exec(
        &mut self,
        command: &str,
        stream: Option<StreamTarget>,
    ) -> Result<CommandOutput, TransportError>;

    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_output_success() {
        let ok = CommandOutput::default();
        assert!(ok.success());
        let failed = CommandOutput {
            exit_status: 2,
            ..Default::default()
        };
        assert!(!failed.success());
    }

    #[test]
    fn test_stream_target_tags_step() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let target = StreamTarget::new(tx, 3);
        target.send(OutputStream::Stderr, "oops\n");
        let chunk = rx.try_recv().unwrap();
        assert_eq!(chunk.step, 3);
        assert_eq!(chunk.stream, OutputStream::Stderr);
        assert_eq!(chunk.data, "oops\n");
    }

    #[test]
    fn test_stream_target_ignores_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        StreamTarget::new(tx, 0).send(OutputStream::Stdout, "nobody listening");
    }

    #[test]
    fn test_stream_target_feeds_every_sink() {
        let (first_tx, mut first_rx) = mpsc::unbounded_channel();
        let (second_tx, mut second_rx) = mpsc::unbounded_channel();
        let target = StreamTarget::new(first_tx, 1).also_to(second_tx);
        target.send(OutputStream::Stdout, "both\n");
        assert_eq!(first_rx.try_recv().unwrap().data, "both\n");
        assert_eq!(second_rx.try_recv().unwrap().data, "both\n");
    }

    fn collect(rx: &mut mpsc::UnboundedReceiver<OutputChunk>) -> String {
        let mut text = String::new();
        while let Ok(chunk) = rx.try_recv() {
            text.push_str(&chunk.data);
        }
        text
    }

    #[test]
    fn test_writer_joins_character_split_across_reads() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut writer = StreamTarget::new(tx, 0).writer(OutputStream::Stdout);
        let bytes = "caf\u{e9}\n".as_bytes();
        writer.write(&bytes[..4]);
        writer.write(&bytes[4..]);
        writer.finish();
        let text = collect(&mut rx);
        assert_eq!(text, "caf\u{e9}\n");
        assert!(!text.contains(char::REPLACEMENT_CHARACTER));
    }

    #[test]
    fn test_writer_replaces_invalid_bytes_and_keeps_going() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut writer = StreamTarget::new(tx, 0).writer(OutputStream::Stdout);
        writer.write(b"a\xffb");
        writer.finish();
        assert_eq!(collect(&mut rx), "a\u{fffd}b");
    }

    #[test]
    fn test_writer_finish_flushes_truncated_character() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut writer = StreamTarget::new(tx, 0).writer(OutputStream::Stderr);
        writer.write(b"x\xc3");
        assert_eq!(collect(&mut rx), "x");
        writer.finish();
        assert_eq!(collect(&mut rx), "\u{fffd}");
    }
}
