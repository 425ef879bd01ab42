//! Output marker detection

/// Watches a stream of output chunks for an optional start marker followed
/// by a completion marker. Markers split across chunks are still found.
#[derive(Debug, Clone)]
pub struct MarkerWatcher {
    pending: Vec<String>,
    tail: String,
}

impl MarkerWatcher {
    /// Watch for `start` (if any), then `completion`
    pub fn new(start: Option<&str>, completion: &str) -> Self {
        let mut pending = vec![completion.to_string()];
        if let Some(start) = start.filter(|s| !s.is_empty()) {
            pending.push(start.to_string());
        }
        // Stored last-first so the next marker is popped from the end.
        Self {
            pending,
            tail: String::new(),
        }
    }

    /// Feed one chunk of output. Returns true once every marker was seen.
    pub fn feed(&mut self, chunk: &str) -> bool {
        self.tail.push_str(chunk);

        while let Some(marker) = self.pending.last() {
            match self.tail.find(marker.as_str()) {
                Some(at) => {
                    let end = at + marker.len();
                    self.tail.drain(..end);
                    self.pending.pop();
                }
                None => {
                    let keep = marker.len().saturating_sub(1);
                    trim_front(&mut self.tail, keep);
                    return false;
                }
            }
        }

        self.tail.clear();
        true
    }

    /// Whether every marker was seen
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Keep at least the last `keep` bytes, cutting on a char boundary
fn trim_front(buf: &mut String, keep: usize) {
    if buf.len() <= keep {
        return;
    }
    let mut cut = buf.len() - keep;
    while !buf.is_char_boundary(cut) {
        cut -= 1;
    }
    buf.drain(..cut);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_in_one_chunk() {
        let mut watcher = MarkerWatcher::new(None, "audit done");
        assert!(!watcher.feed("running...\r\n"));
        assert!(watcher.feed("audit done\r\n"));
        assert!(watcher.is_complete());
    }

    #[test]
    fn test_marker_split_across_chunks() {
        let mut watcher = MarkerWatcher::new(None, "audit done");
        assert!(!watcher.feed("xxxxau"));
        assert!(!watcher.feed("dit d"));
        assert!(watcher.feed("one\r\n"));
    }

    #[test]
    fn test_start_marker_must_come_first() {
        let mut watcher = MarkerWatcher::new(Some("BEGIN"), "END");
        assert!(!watcher.feed("END before start\r\n"));
        assert!(!watcher.feed("BEGIN\r\n"));
        assert!(watcher.feed("...END"));
    }

    #[test]
    fn test_both_markers_in_one_chunk() {
        let mut watcher = MarkerWatcher::new(Some("BEGIN"), "END");
        assert!(watcher.feed("BEGIN work END"));
    }

    #[test]
    fn test_split_echo_does_not_match() {
        let mut watcher = MarkerWatcher::new(None, "audit done");
        assert!(!watcher.feed("$ sh audit.sh; echo 'audi''t done'\r\n"));
        assert!(watcher.feed("audit done\r\n"));
    }

    #[test]
    fn test_tail_is_bounded() {
        let mut watcher = MarkerWatcher::new(None, "marker");
        for _ in 0..1000 {
            watcher.feed("some long line of output without it ");
        }
        assert!(watcher.tail.len() < "marker".len());
    }

    #[test]
    fn test_multibyte_tail() {
        let mut watcher = MarkerWatcher::new(None, "héllo wörld");
        assert!(!watcher.feed("ééééé héllo w"));
        assert!(watcher.feed("örld"));
    }
}
