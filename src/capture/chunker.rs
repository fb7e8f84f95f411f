use bytes::Bytes;

/// Slices an incoming sample stream into fixed-duration PCM chunks.
///
/// Samples arrive as f32 frames from the capture callback and leave as
/// little-endian i16 byte chunks of exactly one chunk duration each.
/// Partial data stays pending until enough samples accumulate.
pub struct Chunker {
    samples_per_chunk: usize,
    pending: Vec<i16>,
}

impl Chunker {
    pub fn new(sample_rate: u32, channels: u16, chunk_ms: u32) -> Self {
        let per_ms = sample_rate as usize * channels as usize;
        let samples_per_chunk = (per_ms * chunk_ms as usize / 1000).max(1);
        Self {
            samples_per_chunk,
            pending: Vec::with_capacity(samples_per_chunk),
        }
    }

    /// Number of i16 samples per emitted chunk.
    pub fn samples_per_chunk(&self) -> usize {
        self.samples_per_chunk
    }

    /// Feed captured samples, returning every full chunk now available.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Bytes> {
        self.pending.reserve(samples.len());
        for &sample in samples {
            let clamped = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            self.pending.push(clamped);
        }

        let mut chunks = Vec::new();
        while self.pending.len() >= self.samples_per_chunk {
            let rest = self.pending.split_off(self.samples_per_chunk);
            let full = std::mem::replace(&mut self.pending, rest);
            chunks.push(encode_s16le(&full));
        }
        chunks
    }

    /// Emit whatever is pending as a final short chunk.
    pub fn flush(&mut self) -> Option<Bytes> {
        if self.pending.is_empty() {
            return None;
        }
        let samples = std::mem::take(&mut self.pending);
        Some(encode_s16le(&samples))
    }
}

fn encode_s16le(samples: &[i16]) -> Bytes {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    Bytes::from(bytes)
}
