use std::collections::HashMap;

/// Accumulates ordered partial-result fragments per originating request.
///
/// Fragments are appended in arrival order; no reordering is attempted,
/// because a single worker communicates over one ordered byte stream per
/// direction. Deliberately decoupled from request completion: fragments
/// are a progressive-UI side channel, and the authoritative completion of
/// a request is its formal response, matched by id.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    buffers: HashMap<u64, StreamBuffer>,
}

#[derive(Debug, Default)]
struct StreamBuffer {
    fragments: Vec<String>,
    finished: bool,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment to the request's buffer, creating it on first
    /// use. Fragments arriving after the final one are dropped.
    pub fn append(&mut self, request_id: u64, fragment: &str, is_final: bool) {
        let buffer = self.buffers.entry(request_id).or_default();
        if buffer.finished {
            tracing::debug!(request_id, "dropping fragment after final chunk");
            return;
        }
        buffer.fragments.push(fragment.to_string());
        buffer.finished = is_final;
    }

    /// Current concatenation without consuming the buffer.
    pub fn peek(&self, request_id: u64) -> Option<String> {
        self.buffers
            .get(&request_id)
            .map(|buffer| buffer.fragments.concat())
    }

    /// Full concatenation, freeing the buffer. Only valid once the final
    /// fragment has arrived; returns `None` (and keeps the buffer)
    /// otherwise.
    pub fn take_final(&mut self, request_id: u64) -> Option<String> {
        if !self
            .buffers
            .get(&request_id)
            .is_some_and(|buffer| buffer.finished)
        {
            return None;
        }
        self.buffers
            .remove(&request_id)
            .map(|buffer| buffer.fragments.concat())
    }

    /// Free a request's buffer regardless of completion, e.g. when the
    /// request resolves or is invalidated before its stream finishes.
    pub fn discard(&mut self, request_id: u64) {
        self.buffers.remove(&request_id);
    }

    /// Free every buffer (bulk invalidation on crash or stop).
    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenates_in_arrival_order() {
        let mut assembler = StreamAssembler::new();
        assembler.append(7, "Hel", false);
        assembler.append(7, "lo, ", false);
        assembler.append(7, "world", true);

        assert_eq!(assembler.peek(7).unwrap(), "Hello, world");
        assert_eq!(assembler.take_final(7).unwrap(), "Hello, world");
        assert!(assembler.is_empty());
    }

    #[test]
    fn take_final_requires_final_fragment() {
        let mut assembler = StreamAssembler::new();
        assembler.append(1, "partial", false);

        assert!(assembler.take_final(1).is_none());
        assert_eq!(assembler.peek(1).unwrap(), "partial");

        assembler.append(1, " done", true);
        assert_eq!(assembler.take_final(1).unwrap(), "partial done");
        assert!(assembler.take_final(1).is_none());
    }

    #[test]
    fn streams_are_independent_per_request() {
        let mut assembler = StreamAssembler::new();
        assembler.append(1, "a", false);
        assembler.append(2, "x", false);
        assembler.append(1, "b", true);
        assembler.append(2, "y", true);

        assert_eq!(assembler.take_final(1).unwrap(), "ab");
        assert_eq!(assembler.take_final(2).unwrap(), "xy");
    }

    #[test]
    fn fragments_after_final_are_dropped() {
        let mut assembler = StreamAssembler::new();
        assembler.append(3, "done", true);
        assembler.append(3, "straggler", false);

        assert_eq!(assembler.take_final(3).unwrap(), "done");
    }

    #[test]
    fn discard_frees_unfinished_buffers() {
        let mut assembler = StreamAssembler::new();
        assembler.append(4, "orphan", false);
        assembler.discard(4);

        assert!(assembler.peek(4).is_none());
        assert!(assembler.is_empty());
    }

    #[test]
    fn peek_on_unknown_request_is_none() {
        let assembler = StreamAssembler::new();
        assert!(assembler.peek(42).is_none());
    }
}
