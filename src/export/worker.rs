//! Exporter worker thread
//!
//! Export runs on its own thread so a large WAV build never stalls the
//! session task. Jobs carry a read-only copy of the decoded blocks.

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};
use tokio::sync::oneshot;

use super::wav::{export_wav, WavFormat};
use crate::codec::DecodedBlock;
use crate::error::ExportError;

/// Requests accepted by the exporter
#[derive(Debug)]
pub enum ExportRequest {
    ExportWav {
        blocks: Vec<DecodedBlock>,
        format: WavFormat,
        reply: oneshot::Sender<Result<Bytes, ExportError>>,
    },
}

/// Handle to the exporter thread; cheap to clone
#[derive(Clone)]
pub struct ExporterHandle {
    tx: Sender<ExportRequest>,
}

impl ExporterHandle {
    pub fn spawn() -> std::io::Result<Self> {
        let (tx, rx) = unbounded();
        std::thread::Builder::new()
            .name("exporter".into())
            .spawn(move || run_exporter(rx))?;
        Ok(Self { tx })
    }

    /// Build a WAV file from `blocks`
    pub async fn export_wav(
        &self,
        blocks: Vec<DecodedBlock>,
        format: WavFormat,
    ) -> Result<Bytes, ExportError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ExportRequest::ExportWav {
                blocks,
                format,
                reply,
            })
            .map_err(|_| ExportError::WorkerGone)?;
        rx.await.map_err(|_| ExportError::WorkerGone)?
    }
}

fn run_exporter(rx: Receiver<ExportRequest>) {
    for request in rx.iter() {
        match request {
            ExportRequest::ExportWav {
                blocks,
                format,
                reply,
            } => {
                let result = export_wav(&blocks, format);
                match &result {
                    Ok(wav) => tracing::debug!(blocks = blocks.len(), bytes = wav.len(), "WAV exported"),
                    Err(e) => tracing::error!("WAV export failed: {}", e),
                }
                let _ = reply.send(result);
            }
        }
    }
    tracing::debug!("Exporter worker exiting");
}
