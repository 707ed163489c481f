//! Output capture for one submission.
//!
//! [`OutputSink`] collects everything the engine prints, enforces the output
//! cap, and optionally forwards output to a fragment channel as it is
//! produced. Fragments are flushed at every newline and once more when the
//! submission finishes, so a live client sees each printed line without
//! waiting for the whole snippet to complete.
//!
//! A partial line (for example `print(..., end='')`) is held until its
//! newline arrives or the submission ends.

use tokio::sync::mpsc::UnboundedSender;

/// Sender half of a fragment stream.
pub type FragmentSender = UnboundedSender<String>;

/// Collects and optionally streams engine output, bounded by a byte cap.
#[derive(Debug)]
pub struct OutputSink {
    /// Everything captured so far (never exceeds `limit` bytes).
    captured: String,
    /// Text written since the last flushed fragment.
    pending: String,
    /// Where fragments go, if anyone is listening.
    fragments: Option<FragmentSender>,
    /// Output cap in bytes.
    limit: usize,
    /// Set once output has been dropped because of the cap.
    truncated: bool,
}

impl OutputSink {
    /// Creates a sink that only collects output.
    #[must_use]
    pub fn collecting(limit: usize) -> Self {
        Self {
            captured: String::new(),
            pending: String::new(),
            fragments: None,
            limit,
            truncated: false,
        }
    }

    /// Creates a sink that collects output and streams it to `fragments`.
    #[must_use]
    pub fn streaming(limit: usize, fragments: FragmentSender) -> Self {
        Self {
            fragments: Some(fragments),
            ..Self::collecting(limit)
        }
    }

    /// Appends text, dropping whatever does not fit under the cap.
    pub fn write(&mut self, text: &str) {
        if self.truncated || text.is_empty() {
            return;
        }
        let room = self.limit.saturating_sub(self.captured.len());
        let accepted = if text.len() <= room {
            text
        } else {
            self.truncated = true;
            &text[..floor_char_boundary(text, room)]
        };
        self.captured.push_str(accepted);
        self.pending.push_str(accepted);

        if accepted.contains('\n') {
            self.flush_lines();
        }
    }

    /// Appends a single character.
    pub fn push(&mut self, ch: char) {
        let mut buf = [0u8; 4];
        self.write(ch.encode_utf8(&mut buf));
    }

    /// Returns `true` once output has been dropped because of the cap.
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Flushes any pending partial line and returns the captured output and
    /// truncation flag.
    #[must_use]
    pub fn finish(mut self) -> (String, bool) {
        self.flush_all();
        (std::mem::take(&mut self.captured), self.truncated)
    }

    /// Sends every complete line in `pending` as one fragment.
    fn flush_lines(&mut self) {
        let Some(last_newline) = self.pending.rfind('\n') else {
            return;
        };
        let rest = self.pending.split_off(last_newline + 1);
        let fragment = std::mem::replace(&mut self.pending, rest);
        self.send(fragment);
    }

    fn flush_all(&mut self) {
        if !self.pending.is_empty() {
            let fragment = std::mem::take(&mut self.pending);
            self.send(fragment);
        }
    }

    fn send(&mut self, fragment: String) {
        if let Some(sender) = &self.fragments
            && sender.send(fragment).is_err()
        {
            // receiver gone; keep collecting, stop streaming
            self.fragments = None;
        }
    }
}

/// Largest index `<= index` that falls on a char boundary of `text`.
fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
