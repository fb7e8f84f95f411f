// Integration tests for the streaming append playback strategy
//
// These tests drive the player against a scripted sink to verify that
// chunks reach the sink exactly once, in arrival order, under interleaved
// busy/ready signals, and that end-of-stream never cuts off queued audio.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use convo_stream::{AudioChunk, AudioPlayer, Error, StreamSink, StreamingPlayer};
use tokio::sync::Notify;

#[derive(Default)]
struct SinkState {
    busy: AtomicBool,
    appends: Mutex<Vec<u64>>,
    fail_append_seqs: Mutex<HashSet<u64>>,
    fail_init_mimes: Mutex<HashSet<String>>,
    inited_mime: Mutex<Option<String>>,
    finalizes: AtomicUsize,
    appends_at_finalize: Mutex<Vec<usize>>,
    aborted: AtomicBool,
    volumes: Mutex<Vec<f32>>,
}

impl SinkState {
    fn appends(&self) -> Vec<u64> {
        self.appends.lock().unwrap().clone()
    }

    fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }
}

struct ScriptedSink {
    state: Arc<SinkState>,
    ready: Arc<Notify>,
}

impl ScriptedSink {
    fn new() -> (Self, Arc<SinkState>, Arc<Notify>) {
        let state = Arc::new(SinkState::default());
        let ready = Arc::new(Notify::new());
        (
            Self {
                state: state.clone(),
                ready: ready.clone(),
            },
            state,
            ready,
        )
    }
}

impl StreamSink for ScriptedSink {
    fn init(&mut self, mime: &str) -> convo_stream::Result<()> {
        if self.state.fail_init_mimes.lock().unwrap().contains(mime) {
            return Err(Error::SinkInit(format!("mime {} rejected", mime)));
        }
        *self.state.inited_mime.lock().unwrap() = Some(mime.to_string());
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.state.busy.load(Ordering::SeqCst)
    }

    fn append(&mut self, chunk: &AudioChunk) -> convo_stream::Result<()> {
        if self
            .state
            .fail_append_seqs
            .lock()
            .unwrap()
            .contains(&chunk.sequence)
        {
            return Err(Error::Append(format!("chunk {} rejected", chunk.sequence)));
        }
        self.state.appends.lock().unwrap().push(chunk.sequence);
        Ok(())
    }

    fn finalize(&mut self) {
        let appended = self.state.appends.lock().unwrap().len();
        self.state.appends_at_finalize.lock().unwrap().push(appended);
        self.state.finalizes.fetch_add(1, Ordering::SeqCst);
    }

    fn abort(&mut self) {
        self.state.aborted.store(true, Ordering::SeqCst);
    }

    fn set_volume(&mut self, volume: f32) {
        self.state.volumes.lock().unwrap().push(volume);
    }

    fn readiness(&self) -> Arc<Notify> {
        self.ready.clone()
    }

    fn request_ready(&self) {
        // Tests drive readiness explicitly.
    }
}

fn chunk(seq: u64) -> AudioChunk {
    AudioChunk::new(seq, Bytes::from(format!("chunk-{}", seq)))
}

async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn test_appends_all_chunks_in_order() -> Result<()> {
    let (sink, state, _ready) = ScriptedSink::new();
    let mut player = StreamingPlayer::new(Box::new(sink), "audio/mpeg", 1.0);
    player.initialize().await?;

    for seq in 0..20 {
        player.submit_chunk(chunk(seq)).await?;
    }
    player.signal_end().await?;

    wait_for("finalize", || state.finalizes.load(Ordering::SeqCst) == 1).await;

    assert_eq!(state.appends(), (0..20).collect::<Vec<_>>());
    assert_eq!(state.finalizes.load(Ordering::SeqCst), 1);
    // Finalize only ever runs with nothing left pending.
    assert_eq!(*state.appends_at_finalize.lock().unwrap(), vec![20]);

    player.teardown().await;
    Ok(())
}

#[tokio::test]
async fn test_busy_sink_defers_appends_until_ready() -> Result<()> {
    let (sink, state, ready) = ScriptedSink::new();
    let mut player = StreamingPlayer::new(Box::new(sink), "audio/mpeg", 1.0);
    player.initialize().await?;

    state.set_busy(true);
    for seq in 0..5 {
        player.submit_chunk(chunk(seq)).await?;
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(state.appends().is_empty(), "busy sink must not be fed");

    state.set_busy(false);
    ready.notify_one();

    wait_for("all appends", || state.appends().len() == 5).await;
    assert_eq!(state.appends(), vec![0, 1, 2, 3, 4]);

    player.teardown().await;
    Ok(())
}

#[tokio::test]
async fn test_busy_ready_interleaving_preserves_order() -> Result<()> {
    let (sink, state, ready) = ScriptedSink::new();
    let mut player = StreamingPlayer::new(Box::new(sink), "audio/mpeg", 1.0);
    player.initialize().await?;

    // Alternate busy windows while chunks keep arriving.
    for seq in 0..4 {
        state.set_busy(true);
        player.submit_chunk(chunk(seq * 2)).await?;
        player.submit_chunk(chunk(seq * 2 + 1)).await?;
        tokio::time::sleep(Duration::from_millis(20)).await;
        state.set_busy(false);
        ready.notify_one();
        wait_for("drain", || state.appends().len() == ((seq as usize) + 1) * 2).await;
    }

    assert_eq!(state.appends(), (0..8).collect::<Vec<_>>());

    player.teardown().await;
    Ok(())
}

#[tokio::test]
async fn test_end_of_stream_waits_for_queue_to_drain() -> Result<()> {
    let (sink, state, ready) = ScriptedSink::new();
    let mut player = StreamingPlayer::new(Box::new(sink), "audio/mpeg", 1.0);
    player.initialize().await?;

    state.set_busy(true);
    for seq in 0..3 {
        player.submit_chunk(chunk(seq)).await?;
    }
    player.signal_end().await?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        state.finalizes.load(Ordering::SeqCst),
        0,
        "end-of-stream must not discard queued audio"
    );

    state.set_busy(false);
    ready.notify_one();

    wait_for("finalize", || state.finalizes.load(Ordering::SeqCst) == 1).await;
    assert_eq!(state.appends(), vec![0, 1, 2]);
    assert_eq!(*state.appends_at_finalize.lock().unwrap(), vec![3]);

    player.teardown().await;
    Ok(())
}

#[tokio::test]
async fn test_repeated_append_failures_demote_strategy() -> Result<()> {
    let (sink, state, _ready) = ScriptedSink::new();
    state.fail_append_seqs.lock().unwrap().extend([1, 2]);

    let mut player = StreamingPlayer::new(Box::new(sink), "audio/mpeg", 1.0);
    player.initialize().await?;

    player.submit_chunk(chunk(0)).await?;
    player.submit_chunk(chunk(1)).await?;
    player.submit_chunk(chunk(2)).await?;

    wait_for("demotion", || state.aborted.load(Ordering::SeqCst)).await;

    // The strategy tore itself down; later chunks are refused unconsumed.
    assert!(player.submit_chunk(chunk(3)).await.is_err());
    assert_eq!(state.appends(), vec![0]);

    player.teardown().await;
    Ok(())
}

#[tokio::test]
async fn test_unsupported_mime_substitutes_default() -> Result<()> {
    let (sink, state, _ready) = ScriptedSink::new();
    state
        .fail_init_mimes
        .lock()
        .unwrap()
        .insert("audio/x-custom".to_string());

    let mut player = StreamingPlayer::new(Box::new(sink), "audio/x-custom", 1.0);
    player.initialize().await?;

    assert_eq!(
        state.inited_mime.lock().unwrap().as_deref(),
        Some("audio/mpeg")
    );

    player.teardown().await;
    Ok(())
}

#[tokio::test]
async fn test_init_failure_reports_sink_init() {
    let (sink, state, _ready) = ScriptedSink::new();
    {
        let mut fail = state.fail_init_mimes.lock().unwrap();
        fail.insert("audio/x-custom".to_string());
        fail.insert("audio/mpeg".to_string());
    }

    let mut player = StreamingPlayer::new(Box::new(sink), "audio/x-custom", 1.0);
    let err = player.initialize().await.expect_err("init should fail");
    assert!(matches!(err, Error::SinkInit(_)));

    player.teardown().await;
}

#[tokio::test]
async fn test_teardown_safe_from_any_state() -> Result<()> {
    // Before initialize.
    let (sink, state, _ready) = ScriptedSink::new();
    let mut player = StreamingPlayer::new(Box::new(sink), "audio/mpeg", 1.0);
    player.teardown().await;
    assert!(state.aborted.load(Ordering::SeqCst));

    // Mid-stream, with chunks still queued behind a busy sink.
    let (sink, state, _ready) = ScriptedSink::new();
    let mut player = StreamingPlayer::new(Box::new(sink), "audio/mpeg", 1.0);
    player.initialize().await?;
    state.set_busy(true);
    player.submit_chunk(chunk(0)).await?;
    player.teardown().await;
    assert!(state.aborted.load(Ordering::SeqCst));

    // Teardown twice is a no-op.
    player.teardown().await;
    Ok(())
}

#[tokio::test]
async fn test_five_chunk_scenario() -> Result<()> {
    let (sink, state, _ready) = ScriptedSink::new();
    let mut player = StreamingPlayer::new(Box::new(sink), "audio/mpeg", 1.0);
    player.initialize().await?;

    for seq in 0..5 {
        player.submit_chunk(chunk(seq)).await?;
    }
    player.signal_end().await?;

    wait_for("finalize", || state.finalizes.load(Ordering::SeqCst) == 1).await;

    assert_eq!(state.appends(), vec![0, 1, 2, 3, 4]);
    assert_eq!(state.finalizes.load(Ordering::SeqCst), 1);

    player.teardown().await;
    Ok(())
}

#[tokio::test]
async fn test_volume_reaches_sink_immediately() -> Result<()> {
    let (sink, state, _ready) = ScriptedSink::new();
    let mut player = StreamingPlayer::new(Box::new(sink), "audio/mpeg", 0.8);
    player.initialize().await?;

    player.set_volume(0.3);
    wait_for("volume change", || {
        state.volumes.lock().unwrap().contains(&0.3)
    })
    .await;

    // Out-of-range values are clamped.
    player.set_volume(2.5);
    wait_for("clamped volume", || {
        state.volumes.lock().unwrap().contains(&1.0)
    })
    .await;

    player.teardown().await;
    Ok(())
}
