//! Line input for the interactive consultation

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;

const OPENING_PROMPT: &str = "patient> ";

/// Patient-side line reader
///
/// Blank lines are skipped. Lines are kept in the editor history and, when a
/// history file is set, written back on [`InputHandler::save_history`].
pub struct InputHandler {
    editor: DefaultEditor,
    history_path: Option<PathBuf>,
    prompt: String,
}

impl InputHandler {
    pub fn open(history_path: Option<PathBuf>) -> Result<Self> {
        let mut editor = DefaultEditor::new().context("terminal input unavailable")?;
        if let Some(path) = history_path.as_deref().filter(|p| p.exists()) {
            // Unreadable history is ignored
            let _ = editor.load_history(path);
        }

        Ok(Self {
            editor,
            history_path,
            prompt: OPENING_PROMPT.to_string(),
        })
    }

    /// Switch the prompt to the consultation's short id
    pub fn enter_consultation(&mut self, short_id: &str) {
        self.prompt = format!("{}> ", short_id);
    }

    /// Next non-blank line, or `None` once the patient leaves (EOF or
    /// Ctrl-C at the prompt)
    pub fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            match self.editor.readline(&self.prompt) {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let _ = self.editor.add_history_entry(line);
                    return Ok(Some(line.to_string()));
                }
                Err(ReadlineError::Interrupted | ReadlineError::Eof) => return Ok(None),
                Err(err) => return Err(err).context("reading patient input"),
            }
        }
    }

    pub fn save_history(&mut self) -> Result<()> {
        match &self.history_path {
            Some(path) => self
                .editor
                .save_history(path)
                .with_context(|| format!("saving input history to {}", path.display())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prompt_follows_consultation() {
        let mut handler = InputHandler::open(None).unwrap();
        assert_eq!(handler.prompt, OPENING_PROMPT);
        handler.enter_consultation("3f2a9c1b");
        assert_eq!(handler.prompt, "3f2a9c1b> ");
    }

    #[test]
    fn test_history_written_on_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history");

        let mut handler = InputHandler::open(Some(path.clone())).unwrap();
        let _ = handler.editor.add_history_entry("my head hurts");
        handler.save_history().unwrap();
        assert!(path.exists());

        let reopened = InputHandler::open(Some(path)).unwrap();
        assert!(reopened.history_path.is_some());
    }
}
