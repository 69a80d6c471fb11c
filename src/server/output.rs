use parking_lot::{Condvar, Mutex};
use std::io::Write;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Receives every chunk of bytes the collector reads from a connection.
///
/// Chunks follow TCP segmentation, not record boundaries: one forwarded line
/// may arrive split over several chunks, or several lines in one chunk.
/// Called from the collector's control thread, or from a handler thread in
/// thread-per-connection mode, so implementations must be thread-safe.
pub trait ChunkHandler: Send + Sync {
    fn on_chunk(&self, peer: SocketAddr, chunk: &[u8]);

    fn on_connect(&self, _peer: SocketAddr) {}

    fn on_disconnect(&self, _peer: SocketAddr) {}
}

/// Prints each chunk to stdout as `[collector] <chunk>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleOutput;

impl ChunkHandler for ConsoleOutput {
    fn on_chunk(&self, _peer: SocketAddr, chunk: &[u8]) {
        let text = String::from_utf8_lossy(chunk);
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "[collector] {}", text.trim_end_matches('\n'));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub peer: SocketAddr,
    pub bytes: Vec<u8>,
}

/// Keeps every chunk in memory.
#[derive(Debug, Default)]
pub struct CapturedOutput {
    chunks: Mutex<Vec<Chunk>>,
    arrived: Condvar,
}

impl CapturedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks(&self) -> Vec<Chunk> {
        self.chunks.lock().clone()
    }

    /// All received bytes concatenated, lossily decoded.
    pub fn contents(&self) -> String {
        concat(&self.chunks.lock())
    }

    /// Concatenation of the chunks received from one peer, in arrival order.
    pub fn contents_from(&self, peer: SocketAddr) -> String {
        let chunks = self.chunks.lock();
        let bytes: Vec<u8> = chunks
            .iter()
            .filter(|chunk| chunk.peer == peer)
            .flat_map(|chunk| chunk.bytes.iter().copied())
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Waits until `predicate` holds for the received contents or `timeout`
    /// expires. Returns whether the predicate was met.
    pub fn wait_for<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&str) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut chunks = self.chunks.lock();
        loop {
            if predicate(&concat(&chunks)) {
                return true;
            }
            if self.arrived.wait_until(&mut chunks, deadline).timed_out() {
                return predicate(&concat(&chunks));
            }
        }
    }

    pub fn wait_until_contains(&self, needle: &str, timeout: Duration) -> bool {
        self.wait_for(timeout, |contents| contents.contains(needle))
    }
}

impl ChunkHandler for CapturedOutput {
    fn on_chunk(&self, peer: SocketAddr, chunk: &[u8]) {
        self.chunks.lock().push(Chunk {
            peer,
            bytes: chunk.to_vec(),
        });
        self.arrived.notify_all();
    }
}

fn concat(chunks: &[Chunk]) -> String {
    let bytes: Vec<u8> = chunks
        .iter()
        .flat_map(|chunk| chunk.bytes.iter().copied())
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_contents_concatenates_split_chunks() {
        let output = CapturedOutput::new();
        output.on_chunk(peer(1), b"hel");
        output.on_chunk(peer(2), b"other\n");
        output.on_chunk(peer(1), b"lo\n");

        assert_eq!(output.contents_from(peer(1)), "hello\n");
        assert_eq!(output.chunks().len(), 3);
    }

    #[test]
    fn test_wait_until_contains_wakes_on_arrival() {
        let output = Arc::new(CapturedOutput::new());
        let writer = {
            let output = Arc::clone(&output);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                output.on_chunk(peer(1), b"tag-42\n");
            })
        };

        assert!(output.wait_until_contains("tag-42", Duration::from_secs(5)));
        writer.join().unwrap();
        assert!(!output.wait_until_contains("missing", Duration::from_millis(10)));
    }
}
