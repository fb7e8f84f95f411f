// Tests for microphone chunk slicing
//
// The chunker is the device-independent half of capture: f32 samples in,
// fixed-duration s16le chunks out.

use convo_stream::Chunker;

#[test]
fn test_chunk_size_matches_duration() {
    // 40ms at 48kHz mono = 1920 samples = 3840 bytes.
    let chunker = Chunker::new(48000, 1, 40);
    assert_eq!(chunker.samples_per_chunk(), 1920);

    let chunker = Chunker::new(16000, 1, 100);
    assert_eq!(chunker.samples_per_chunk(), 1600);

    let chunker = Chunker::new(48000, 2, 40);
    assert_eq!(chunker.samples_per_chunk(), 3840);
}

#[test]
fn test_partial_input_stays_pending() {
    let mut chunker = Chunker::new(48000, 1, 40);

    let chunks = chunker.push(&vec![0.0; 1000]);
    assert!(chunks.is_empty(), "below one chunk duration, nothing emitted");

    let chunks = chunker.push(&vec![0.0; 1000]);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].len(), 1920 * 2);
}

#[test]
fn test_multiple_chunks_from_one_push() {
    let mut chunker = Chunker::new(48000, 1, 40);

    let chunks = chunker.push(&vec![0.5; 1920 * 3 + 100]);
    assert_eq!(chunks.len(), 3);
    for chunk in &chunks {
        assert_eq!(chunk.len(), 1920 * 2);
    }

    // The 100-sample remainder flushes as a short final chunk.
    let tail = chunker.flush().expect("pending samples remain");
    assert_eq!(tail.len(), 100 * 2);
    assert!(chunker.flush().is_none());
}

#[test]
fn test_sample_conversion_is_little_endian_i16() {
    let mut chunker = Chunker::new(48000, 1, 40);

    let mut samples = vec![0.0f32; 1920];
    samples[0] = 1.0;
    samples[1] = -1.0;
    samples[2] = 0.5;

    let chunks = chunker.push(&samples);
    assert_eq!(chunks.len(), 1);

    let bytes = &chunks[0];
    assert_eq!(&bytes[0..2], &32767i16.to_le_bytes());
    assert_eq!(&bytes[2..4], &(-32767i16).to_le_bytes());
    let half = i16::from_le_bytes([bytes[4], bytes[5]]);
    assert!((half as i32 - 16383).abs() <= 1);
    assert_eq!(&bytes[6..8], &0i16.to_le_bytes());
}

#[test]
fn test_order_preserved_across_pushes() {
    let mut chunker = Chunker::new(48000, 1, 40);

    let first: Vec<f32> = (0..1920).map(|i| (i % 100) as f32 / 1000.0).collect();
    let second: Vec<f32> = (0..1920).map(|i| ((i + 7) % 100) as f32 / 1000.0).collect();

    let mut sequential = Chunker::new(48000, 1, 40);
    let mut joined = first.clone();
    joined.extend_from_slice(&second);
    let expected = sequential.push(&joined);

    let mut got = chunker.push(&first);
    got.extend(chunker.push(&second));

    assert_eq!(got, expected);
}
