use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::{Error, Result};

/// Owns the OS audio output stream on a dedicated thread.
///
/// The rodio output stream is not `Send`, so a thread keeps it alive and
/// hands back a `Sink` (which is). The stream is released when the handle
/// is closed or dropped.
pub struct OutputHandle {
    sink: rodio::Sink,
    shutdown_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl OutputHandle {
    /// Open the default output device.
    pub fn open() -> Result<Self> {
        let (ready_tx, ready_rx) = std_mpsc::channel::<std::result::Result<rodio::Sink, String>>();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let stream = match rodio::OutputStreamBuilder::open_default_stream() {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let sink = rodio::Sink::connect_new(stream.mixer());
                let _ = ready_tx.send(Ok(sink));

                // Keep the stream alive until the handle closes.
                let _ = shutdown_rx.recv();
                debug!("audio output released");
            })
            .map_err(|e| Error::SinkInit(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(sink)) => Ok(Self {
                sink,
                shutdown_tx: Some(shutdown_tx),
                thread: Some(thread),
            }),
            Ok(Err(msg)) => {
                let _ = thread.join();
                Err(Error::SinkInit(msg))
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::SinkInit("audio output thread exited".to_string()))
            }
        }
    }

    pub fn sink(&self) -> &rodio::Sink {
        &self.sink
    }

    /// Stop playback and release the output device.
    pub fn close(&mut self) {
        self.sink.stop();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("audio output thread panicked");
            }
        }
    }
}

impl Drop for OutputHandle {
    fn drop(&mut self) {
        self.close();
    }
}
