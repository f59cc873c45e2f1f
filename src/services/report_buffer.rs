//! Rolling text window of analyzer output.
//!
//! Lines are appended whole and truncation only ever cuts at a line boundary,
//! so a parse never sees half a table row. The byte offsets of report marker
//! lines are tracked so that callers can hand the parser just the last few
//! report cycles.

use std::collections::VecDeque;

use crate::parser::REPORT_MARKER;

#[derive(Debug)]
pub struct RawBuffer {
    text: String,
    /// End offsets (exclusive, after the newline) of retained marker lines
    markers: VecDeque<usize>,
    max_bytes: usize,
}

impl RawBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            text: String::new(),
            markers: VecDeque::new(),
            max_bytes: max_bytes.max(1),
        }
    }

    /// Append one line; returns true when it closes a report cycle.
    ///
    /// Enforces the hard cap of twice the maximum size, truncating to the
    /// maximum when it is exceeded.
    pub fn push_line(&mut self, line: &str) -> bool {
        let line = line.trim_end_matches(['\r', '\n']);
        self.text.push_str(line);
        self.text.push('\n');

        let is_marker = line.contains(REPORT_MARKER);
        if is_marker {
            self.markers.push_back(self.text.len());
        }

        if self.text.len() > self.max_bytes.saturating_mul(2) {
            self.truncate_to(self.max_bytes);
        }

        is_marker
    }

    /// Text of the most recent `cycles` report cycles, or everything for 0
    pub fn window(&self, cycles: usize) -> &str {
        if cycles == 0 || self.markers.len() <= cycles {
            return &self.text;
        }
        let start = self.markers[self.markers.len() - cycles - 1];
        &self.text[start..]
    }

    /// Post-parse trim: keep the most recent half once over the maximum
    pub fn compact(&mut self) {
        if self.text.len() > self.max_bytes {
            self.truncate_to(self.max_bytes / 2);
        }
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.markers.clear();
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    /// Drop leading text so at most `keep` bytes remain, cutting at a line
    /// boundary
    fn truncate_to(&mut self, keep: usize) {
        if self.text.len() <= keep {
            return;
        }

        let rough_cut = self.text.len() - keep;
        let bytes = self.text.as_bytes();
        let cut = if bytes[rough_cut - 1] == b'\n' {
            rough_cut
        } else {
            bytes[rough_cut..]
                .iter()
                .position(|b| *b == b'\n')
                .map_or(bytes.len(), |pos| rough_cut + pos + 1)
        };

        self.text.drain(..cut);
        while self.markers.front().is_some_and(|end| *end <= cut) {
            self.markers.pop_front();
        }
        for end in self.markers.iter_mut() {
            *end -= cut;
        }
    }
}
