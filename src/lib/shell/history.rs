//! Command history: an in-memory list mirrored to `HISTFILE`, one entry
//! per line, with periodic autosave while interactive.

use crate::{ast::HistoryEventKind, types::Str};
use std::{
    fs,
    io::Write,
    path::PathBuf,
    time::{Duration, Instant},
};

const DEFAULT_AUTOSAVE_MS: u64 = 10_000;

pub struct History {
    entries: Vec<Str>,
    path: Option<PathBuf>,
    /// How many leading entries already live in the file.
    saved_count: usize,
    last_autosave: Instant,
    autosave_interval: Duration,
}

impl Default for History {
    fn default() -> Self {
        History {
            entries: Vec::new(),
            path: None,
            saved_count: 0,
            last_autosave: Instant::now(),
            autosave_interval: Duration::from_millis(DEFAULT_AUTOSAVE_MS),
        }
    }
}

impl History {
    pub fn with_environment() -> Self {
        let mut history = History::default();
        let path = std::env::var("HISTFILE").map(PathBuf::from).ok().or_else(|| {
            std::env::var("HOME").ok().map(|home| PathBuf::from(home).join(".history"))
        });
        if let Ok(ms) = std::env::var("HISTORY_AUTOSAVE_TIME_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                history.autosave_interval = Duration::from_millis(ms);
            }
        }
        if let Some(path) = path {
            history.load(path);
        }
        history
    }

    pub fn load(&mut self, path: PathBuf) {
        if let Ok(contents) = fs::read_to_string(&path) {
            self.entries = contents.lines().map(Str::from).collect();
            self.saved_count = self.entries.len();
        }
        self.path = Some(path);
    }

    pub fn entries(&self) -> &[Str] { &self.entries }

    pub fn add(&mut self, entry: &str) {
        let entry = entry.trim_end();
        if entry.is_empty() {
            return;
        }
        if self.entries.last().map(|last| last == entry).unwrap_or(false) {
            return;
        }
        self.entries.push(Str::from(entry));
    }

    /// Selects an entry for a `!` history event.
    pub fn find(&self, event: &HistoryEventKind) -> Option<Str> {
        match event {
            HistoryEventKind::IndexFromStart(index) => self.entries.get(*index).cloned(),
            HistoryEventKind::IndexFromEnd(index) => {
                let length = self.entries.len();
                if *index == 0 || *index > length {
                    return None;
                }
                self.entries.get(length - index).cloned()
            }
            HistoryEventKind::Containing(text) => self
                .entries
                .iter()
                .rev()
                .find(|entry| entry.contains(text.as_str()))
                .cloned(),
            HistoryEventKind::Starting(text) => self
                .entries
                .iter()
                .rev()
                .find(|entry| entry.starts_with(text.as_str()))
                .cloned(),
        }
    }

    /// Appends entries the file has not seen yet.
    pub fn save(&mut self) {
        let path = match &self.path {
            Some(path) => path.clone(),
            None => return,
        };
        if self.saved_count >= self.entries.len() {
            return;
        }
        let result = fs::OpenOptions::new().create(true).append(true).open(&path).and_then(
            |mut file| {
                for entry in &self.entries[self.saved_count..] {
                    writeln!(file, "{}", entry)?;
                }
                Ok(())
            },
        );
        if result.is_ok() {
            self.saved_count = self.entries.len();
        }
    }

    /// Called from the interactive loop; writes when the poll interval
    /// has elapsed.
    pub fn maybe_autosave(&mut self) {
        if self.last_autosave.elapsed() >= self.autosave_interval {
            self.save();
            self.last_autosave = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> History {
        let mut history = History::default();
        history.add("echo one");
        history.add("grep two file");
        history.add("echo three");
        history
    }

    #[test]
    fn index_from_start_and_end() {
        let history = sample();
        assert_eq!(
            history.find(&HistoryEventKind::IndexFromStart(0)).as_deref(),
            Some("echo one")
        );
        assert_eq!(
            history.find(&HistoryEventKind::IndexFromEnd(1)).as_deref(),
            Some("echo three")
        );
        assert_eq!(history.find(&HistoryEventKind::IndexFromEnd(9)), None);
    }

    #[test]
    fn substring_and_prefix_lookup_prefer_recent() {
        let history = sample();
        assert_eq!(
            history.find(&HistoryEventKind::Containing("two".into())).as_deref(),
            Some("grep two file")
        );
        assert_eq!(
            history.find(&HistoryEventKind::Starting("echo".into())).as_deref(),
            Some("echo three")
        );
    }

    #[test]
    fn consecutive_duplicates_collapse() {
        let mut history = History::default();
        history.add("ls");
        history.add("ls");
        assert_eq!(history.entries().len(), 1);
    }
}
