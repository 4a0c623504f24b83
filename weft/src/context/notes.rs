//! Notes ledger: a Markdown file of per-cycle records, re-injected as
//! context on later cycles.
//!
//! Record shape: `## [ISO8601] — Agent: <name> (Step <k>)` followed by input
//! summary, tools used, and a truncated outcome. Writers serialize on a
//! mutex; injection prepends one System message carrying the last N records
//! and replaces any previously injected copy.

use std::path::PathBuf;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::EngineError;
use crate::message::Message;

/// Marker the injected System message starts with.
const INJECT_PREFIX: &str = "Recent workflow notes:";

/// Outcome text is truncated to this many characters in the ledger.
const OUTCOME_LIMIT: usize = 500;

/// One cycle's record.
#[derive(Debug, Clone)]
pub struct NoteRecord {
    pub agent: String,
    pub step: u64,
    pub input: String,
    pub tools: Vec<String>,
    pub outcome: String,
}

pub struct NotesLedger {
    path: PathBuf,
    inject_last: usize,
    lock: Mutex<()>,
}

impl NotesLedger {
    pub fn new(path: PathBuf, inject_last: usize) -> Self {
        Self {
            path,
            inject_last,
            lock: Mutex::new(()),
        }
    }

    /// Appends one record under the ledger lock.
    pub async fn append(&self, record: &NoteRecord) -> Result<(), EngineError> {
        let _guard = self.lock.lock().await;
        let mut outcome = record.outcome.clone();
        if outcome.chars().count() > OUTCOME_LIMIT {
            outcome = outcome.chars().take(OUTCOME_LIMIT).collect::<String>() + "...";
        }
        let tools = if record.tools.is_empty() {
            "none".to_string()
        } else {
            record.tools.join(", ")
        };
        let entry = format!(
            "## [{}] — Agent: {} (Step {})\n\nInput: {}\nTools: {}\nOutcome: {}\n\n",
            Utc::now().to_rfc3339(),
            record.agent,
            record.step,
            record.input,
            tools,
            outcome
        );
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let existing = match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        tokio::fs::write(&self.path, existing + &entry).await?;
        Ok(())
    }

    /// Returns the last `n` records, oldest first.
    pub async fn read_last(&self, n: usize) -> Result<Vec<String>, EngineError> {
        let _guard = self.lock.lock().await;
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records: Vec<String> = content
            .split("\n## ")
            .enumerate()
            .map(|(i, chunk)| {
                let chunk = chunk.trim();
                if i == 0 || chunk.starts_with("## ") {
                    chunk.to_string()
                } else {
                    format!("## {}", chunk)
                }
            })
            .filter(|r| !r.is_empty())
            .collect();
        if records.len() > n {
            records = records.split_off(records.len() - n);
        }
        Ok(records)
    }

    /// Prepends the notes System message, replacing an earlier injection.
    /// A leading system prompt stays first.
    pub async fn inject(&self, conversation: &mut Vec<Message>) -> Result<(), EngineError> {
        let records = self.read_last(self.inject_last).await?;
        conversation.retain(|m| !matches!(m, Message::System(s) if s.starts_with(INJECT_PREFIX)));
        if records.is_empty() {
            return Ok(());
        }
        let note = Message::system(format!("{}\n\n{}", INJECT_PREFIX, records.join("\n")));
        let at = usize::from(matches!(conversation.first(), Some(Message::System(_))));
        conversation.insert(at, note);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(step: u64, outcome: &str) -> NoteRecord {
        NoteRecord {
            agent: "writer".into(),
            step,
            input: "draft the intro".into(),
            tools: vec!["grep".into()],
            outcome: outcome.into(),
        }
    }

    /// **Scenario**: appended records carry the ledger header shape.
    #[tokio::test]
    async fn append_formats_records() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = NotesLedger::new(dir.path().join("notes.md"), 5);
        ledger.append(&record(1, "wrote intro")).await.unwrap();
        let content = std::fs::read_to_string(dir.path().join("notes.md")).unwrap();
        assert!(content.contains("— Agent: writer (Step 1)"), "{content}");
        assert!(content.contains("Tools: grep"), "{content}");
        assert!(content.contains("Outcome: wrote intro"), "{content}");
    }

    /// **Scenario**: read_last returns the trailing N records oldest-first.
    #[tokio::test]
    async fn read_last_trailing() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = NotesLedger::new(dir.path().join("notes.md"), 5);
        for i in 1..=4 {
            ledger.append(&record(i, &format!("out {}", i))).await.unwrap();
        }
        let last = ledger.read_last(2).await.unwrap();
        assert_eq!(last.len(), 2);
        assert!(last[0].contains("Step 3"), "{}", last[0]);
        assert!(last[1].contains("Step 4"), "{}", last[1]);
    }

    /// **Scenario**: long outcomes are truncated in the ledger.
    #[tokio::test]
    async fn outcome_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = NotesLedger::new(dir.path().join("notes.md"), 5);
        ledger.append(&record(1, &"z".repeat(900))).await.unwrap();
        let content = std::fs::read_to_string(dir.path().join("notes.md")).unwrap();
        assert!(content.contains(&("z".repeat(500) + "...")));
        assert!(!content.contains(&"z".repeat(501)));
    }

    /// **Scenario**: injection keeps the system prompt first and replaces an
    /// earlier injection instead of stacking.
    #[tokio::test]
    async fn inject_replaces_previous() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = NotesLedger::new(dir.path().join("notes.md"), 5);
        ledger.append(&record(1, "first")).await.unwrap();

        let mut conversation = vec![Message::system("prompt"), Message::user("go")];
        ledger.inject(&mut conversation).await.unwrap();
        assert_eq!(conversation.len(), 3);
        assert!(matches!(&conversation[0], Message::System(s) if s == "prompt"));
        assert!(conversation[1].content().starts_with(INJECT_PREFIX));

        ledger.append(&record(2, "second")).await.unwrap();
        ledger.inject(&mut conversation).await.unwrap();
        assert_eq!(conversation.len(), 3);
        assert!(conversation[1].content().contains("Step 2"));
    }

    /// **Scenario**: missing ledger file injects nothing.
    #[tokio::test]
    async fn missing_file_injects_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = NotesLedger::new(dir.path().join("none.md"), 5);
        let mut conversation = vec![Message::user("go")];
        ledger.inject(&mut conversation).await.unwrap();
        assert_eq!(conversation.len(), 1);
    }
}
