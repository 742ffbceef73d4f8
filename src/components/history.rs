use std::collections::VecDeque;

use tracing::warn;

use crate::canvas::PixelBuffer;
use crate::components::strokes::StrokeRecord;

// ============================================================================
// HISTORY ENTRY
// ============================================================================

/// Full snapshot of a canvas's pixels and edit log at one point in time.
#[derive(Clone, Debug)]
pub struct HistoryEntry {
    pub pixels: PixelBuffer,
    pub edit_log: Vec<StrokeRecord>,
}

impl HistoryEntry {
    pub fn capture(pixels: &PixelBuffer, edit_log: &[StrokeRecord]) -> Self {
        Self {
            pixels: pixels.clone(),
            edit_log: edit_log.to_vec(),
        }
    }

    fn memory_bytes(&self) -> usize {
        self.pixels.memory_bytes() + self.edit_log.iter().map(StrokeRecord::memory_bytes).sum::<usize>()
    }
}

// ============================================================================
// HISTORY STACK - bounded snapshot undo/redo for one canvas
// ============================================================================

/// Linear undo/redo over `(pixels, edit log)` snapshots. The oldest undo
/// entry is evicted once `max_undo` is exceeded.
#[derive(Debug)]
pub struct HistoryStack {
    undo_stack: VecDeque<HistoryEntry>,
    redo_stack: VecDeque<HistoryEntry>,
    max_undo: usize,
    /// Running memory total across both stacks.
    total_memory: usize,
}

impl Default for HistoryStack {
    fn default() -> Self {
        Self::new(crate::canvas::DEFAULT_MAX_UNDO)
    }
}

impl HistoryStack {
    pub fn new(max_undo: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_undo: max_undo.max(1),
            total_memory: 0,
        }
    }

    /// Record the state before a stroke/shape session mutates it.
    /// A new edit invalidates everything on the redo stack.
    pub fn begin_snapshot(&mut self, pixels: &PixelBuffer, edit_log: &[StrokeRecord]) {
        for entry in self.redo_stack.drain(..) {
            self.total_memory = self.total_memory.saturating_sub(entry.memory_bytes());
        }
        self.push_undo(HistoryEntry::capture(pixels, edit_log));
    }

    /// Restore the most recent snapshot into the live buffer/log.
    /// Returns `false` when there is nothing to undo.
    pub fn undo(&mut self, pixels: &mut PixelBuffer, edit_log: &mut Vec<StrokeRecord>) -> bool {
        let Some(entry) = self.undo_stack.back() else {
            return false;
        };
        if entry.pixels.dimensions() != pixels.dimensions() {
            self.discard_mismatched(pixels);
            return false;
        }
        let Some(entry) = self.undo_stack.pop_back() else {
            return false;
        };
        self.total_memory = self.total_memory.saturating_sub(entry.memory_bytes());

        let current = HistoryEntry::capture(pixels, edit_log);
        self.total_memory += current.memory_bytes();
        self.redo_stack.push_back(current);

        Self::adopt(entry, pixels, edit_log);
        true
    }

    /// Re-apply the most recently undone snapshot.
    /// Returns `false` when there is nothing to redo.
    pub fn redo(&mut self, pixels: &mut PixelBuffer, edit_log: &mut Vec<StrokeRecord>) -> bool {
        let Some(entry) = self.redo_stack.back() else {
            return false;
        };
        if entry.pixels.dimensions() != pixels.dimensions() {
            self.discard_mismatched(pixels);
            return false;
        }
        let Some(entry) = self.redo_stack.pop_back() else {
            return false;
        };
        self.total_memory = self.total_memory.saturating_sub(entry.memory_bytes());

        self.push_undo(HistoryEntry::capture(pixels, edit_log));
        Self::adopt(entry, pixels, edit_log);
        true
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn max_undo(&self) -> usize {
        self.max_undo
    }

    pub fn set_max_undo(&mut self, max_undo: usize) {
        self.max_undo = max_undo.max(1);
        self.prune();
    }

    /// Current memory usage of both stacks (O(1) via cached total).
    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.total_memory = 0;
    }

    fn push_undo(&mut self, entry: HistoryEntry) {
        self.total_memory += entry.memory_bytes();
        self.undo_stack.push_back(entry);
        self.prune();
    }

    /// Evict the oldest entries beyond `max_undo` from both stacks.
    fn prune(&mut self) {
        while self.undo_stack.len() > self.max_undo {
            if let Some(removed) = self.undo_stack.pop_front() {
                self.total_memory = self.total_memory.saturating_sub(removed.memory_bytes());
            }
        }
        while self.redo_stack.len() > self.max_undo {
            if let Some(removed) = self.redo_stack.pop_front() {
                self.total_memory = self.total_memory.saturating_sub(removed.memory_bytes());
            }
        }
    }

    /// Copy the snapshot into the live buffer so its allocation stays stable.
    fn adopt(entry: HistoryEntry, pixels: &mut PixelBuffer, edit_log: &mut Vec<StrokeRecord>) {
        pixels.copy_from(&entry.pixels);
        *edit_log = entry.edit_log;
    }

    /// Snapshots sized for another resolution are unusable; drop them all.
    fn discard_mismatched(&mut self, pixels: &PixelBuffer) {
        warn!(
            "history snapshot does not match canvas size {}x{}, clearing history",
            pixels.width(),
            pixels.height()
        );
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Color;

    /// Simulates one stroke: snapshot then write a unique pixel value.
    fn stroke(history: &mut HistoryStack, pixels: &mut PixelBuffer, log: &mut Vec<StrokeRecord>, n: u8) {
        history.begin_snapshot(pixels, log);
        pixels.set(0, 0, Color::from_rgba8([n, n, n, 255]));
        log.push(StrokeRecord::Circle {
            color: Color::BLACK,
            center: [n as i32, 0],
            radius: 1,
        });
    }

    #[test]
    fn undo_redo_restores_byte_identical_state() {
        let mut history = HistoryStack::new(8);
        let mut pixels = PixelBuffer::new(4, 4, Color::TRANSPARENT);
        let mut log = Vec::new();
        for n in 1..=5 {
            stroke(&mut history, &mut pixels, &mut log, n);
        }
        let before_undo = pixels.clone();
        let log_before = log.clone();

        assert!(history.undo(&mut pixels, &mut log));
        assert_eq!(pixels.get_rgba(0, 0).0, [4, 4, 4, 255]);
        assert_eq!(log.len(), 4);

        assert!(history.redo(&mut pixels, &mut log));
        assert_eq!(pixels.as_raw(), before_undo.as_raw());
        assert_eq!(log, log_before);
    }

    #[test]
    fn eviction_beyond_max_undo() {
        let max = 4;
        let mut history = HistoryStack::new(max);
        let mut pixels = PixelBuffer::new(2, 2, Color::TRANSPARENT);
        let mut log = Vec::new();
        for n in 1..=(max as u8 + 1) {
            stroke(&mut history, &mut pixels, &mut log, n);
        }
        assert_eq!(history.undo_count(), max);

        let mut undone = 0;
        while history.undo(&mut pixels, &mut log) {
            undone += 1;
        }
        assert_eq!(undone, max);
        // The pre-first-stroke (transparent) state was evicted; the oldest
        // reachable state is the one after stroke 1.
        assert_eq!(pixels.get_rgba(0, 0).0, [1, 1, 1, 255]);
        assert_eq!(log.len(), 1);

        // Everything undone can be redone
        let mut redone = 0;
        while history.redo(&mut pixels, &mut log) {
            redone += 1;
        }
        assert_eq!(redone, max);
        assert_eq!(pixels.get_rgba(0, 0).0, [5, 5, 5, 255]);
    }

    #[test]
    fn new_stroke_after_undo_clears_redo() {
        let mut history = HistoryStack::new(8);
        let mut pixels = PixelBuffer::new(2, 2, Color::TRANSPARENT);
        let mut log = Vec::new();
        stroke(&mut history, &mut pixels, &mut log, 1);
        stroke(&mut history, &mut pixels, &mut log, 2);
        assert!(history.undo(&mut pixels, &mut log));
        assert!(history.can_redo());

        stroke(&mut history, &mut pixels, &mut log, 3);
        assert!(!history.can_redo());
        let snapshot = pixels.clone();
        assert!(!history.redo(&mut pixels, &mut log));
        assert_eq!(pixels, snapshot);
    }

    #[test]
    fn empty_stacks_are_noops() {
        let mut history = HistoryStack::new(4);
        let mut pixels = PixelBuffer::new(2, 2, Color::WHITE);
        let mut log = Vec::new();
        assert!(!history.undo(&mut pixels, &mut log));
        assert!(!history.redo(&mut pixels, &mut log));
        assert_eq!(history.memory_usage(), 0);
    }

    #[test]
    fn mismatched_snapshot_clears_history() {
        let mut history = HistoryStack::new(4);
        let mut pixels = PixelBuffer::new(2, 2, Color::WHITE);
        let mut log = Vec::new();
        stroke(&mut history, &mut pixels, &mut log, 9);
        let mut resized = pixels.resized(3, 3);
        let before = resized.clone();
        assert!(!history.undo(&mut resized, &mut log));
        assert_eq!(resized, before);
        assert!(!history.can_undo());
        assert_eq!(history.memory_usage(), 0);
    }

    #[test]
    fn lowering_max_undo_bounds_both_stacks() {
        let mut history = HistoryStack::new(8);
        let mut pixels = PixelBuffer::new(2, 2, Color::TRANSPARENT);
        let mut log = Vec::new();
        for n in 1..=6 {
            stroke(&mut history, &mut pixels, &mut log, n);
        }
        for _ in 0..5 {
            assert!(history.undo(&mut pixels, &mut log));
        }
        assert_eq!(history.redo_count(), 5);

        let before = history.memory_usage();
        history.set_max_undo(2);
        assert_eq!(history.undo_count(), 1);
        assert_eq!(history.redo_count(), 2);
        assert!(history.memory_usage() < before);

        // The nearest redo states survive: stroke 2 then stroke 3
        assert!(history.redo(&mut pixels, &mut log));
        assert_eq!(pixels.get_rgba(0, 0).0, [2, 2, 2, 255]);
        assert!(history.redo(&mut pixels, &mut log));
        assert_eq!(pixels.get_rgba(0, 0).0, [3, 3, 3, 255]);
        assert!(!history.redo(&mut pixels, &mut log));
    }

    #[test]
    fn memory_usage_tracks_entries() {
        let mut history = HistoryStack::new(2);
        let mut pixels = PixelBuffer::new(4, 4, Color::WHITE);
        let mut log = Vec::new();
        stroke(&mut history, &mut pixels, &mut log, 1);
        let one = history.memory_usage();
        assert!(one >= 64);
        stroke(&mut history, &mut pixels, &mut log, 2);
        stroke(&mut history, &mut pixels, &mut log, 3);
        assert_eq!(history.undo_count(), 2);
        history.clear();
        assert_eq!(history.memory_usage(), 0);
    }
}
