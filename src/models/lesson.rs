use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// A record of a failure, fed back into subsequent developer prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub project: String,
    pub stage: String,
    pub task: String,
    pub error: String,
    pub timestamp: String,
}

/// Bounded FIFO of lessons, global to the process. Cap is 50; pushing past
/// capacity evicts the oldest entry.
pub const LESSONS_CAP: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LessonLog {
    entries: VecDeque<Lesson>,
}

impl LessonLog {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, mut lesson: Lesson) {
        if lesson.error.len() > 500 {
            lesson.error.truncate(500);
        }
        self.entries.push_back(lesson);
        while self.entries.len() > LESSONS_CAP {
            self.entries.pop_front();
        }
    }

    pub fn remove(&mut self, timestamp: &str) -> Option<Lesson> {
        let idx = self.entries.iter().position(|l| l.timestamp == timestamp)?;
        self.entries.remove(idx)
    }

    pub fn all(&self) -> impl Iterator<Item = &Lesson> {
        self.entries.iter()
    }

    /// The most recent `n` lessons, oldest first.
    pub fn recent(&self, n: usize) -> Vec<&Lesson> {
        let len = self.entries.len();
        let skip = len.saturating_sub(n);
        self.entries.iter().skip(skip).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lesson(ts: &str) -> Lesson {
        Lesson {
            project: "p".into(),
            stage: "s".into(),
            task: "t".into(),
            error: "boom".into(),
            timestamp: ts.into(),
        }
    }

    #[test]
    fn fifo_evicts_oldest_past_cap() {
        let mut log = LessonLog::new();
        for i in 0..(LESSONS_CAP + 5) {
            log.push(lesson(&i.to_string()));
        }
        assert_eq!(log.len(), LESSONS_CAP);
        assert_eq!(log.entries.front().unwrap().timestamp, "5");
    }

    #[test]
    fn error_truncated_to_500_chars() {
        let mut log = LessonLog::new();
        let mut l = lesson("1");
        l.error = "x".repeat(600);
        log.push(l);
        assert_eq!(log.entries[0].error.len(), 500);
    }

    #[test]
    fn recent_returns_last_n_oldest_first() {
        let mut log = LessonLog::new();
        for i in 0..5 {
            log.push(lesson(&i.to_string()));
        }
        let recent = log.recent(3);
        let ts: Vec<_> = recent.iter().map(|l| l.timestamp.as_str()).collect();
        assert_eq!(ts, vec!["2", "3", "4"]);
    }
}
