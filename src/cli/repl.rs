//! Interactive consultation loop

use super::commands::{self, Command};
use super::display;
use super::input::InputHandler;
use crate::orchestrator::Orchestrator;
use crate::types::{ContinueRequest, ContinueResponse, MessageType};
use anyhow::Result;
use std::future::Future;
use tracing::debug;

/// Drives one consultation from the terminal
pub struct ConsultationRepl<'a> {
    orchestrator: &'a Orchestrator,
    consultation_id: String,
    input: InputHandler,
    details: bool,
}

impl<'a> ConsultationRepl<'a> {
    pub fn new(
        orchestrator: &'a Orchestrator,
        consultation_id: impl Into<String>,
        input: InputHandler,
        details: bool,
    ) -> Self {
        Self {
            orchestrator,
            consultation_id: consultation_id.into(),
            input,
            details,
        }
    }

    /// Run until `/exit`, `/close`, EOF or a terminal status
    pub async fn run(&mut self) -> Result<()> {
        display::show_banner(env!("CARGO_PKG_VERSION"), &self.consultation_id);

        while let Some(line) = self.input.next_line()? {
            let keep_going = match commands::parse(&line) {
                Some(command) => self.execute(command).await?,
                None => self.ask(ContinueRequest::new(line)).await,
            };
            if !keep_going {
                break;
            }
        }

        self.input.save_history()?;
        self.orchestrator.flush_audit().await;
        Ok(())
    }

    /// Returns whether the loop should continue
    async fn execute(&mut self, command: Command) -> Result<bool> {
        let id = self.consultation_id.as_str();
        match command {
            Command::Help => display::show_help(commands::HELP),
            Command::Exit => {
                display::show_info(&format!("Consultation {} saved", id));
                return Ok(false);
            }
            Command::History => match self.orchestrator.get_history(id).await {
                Ok(view) => display::show_history(&view),
                Err(e) => display::show_error(&e.to_string()),
            },
            Command::Status => {
                let view = self.orchestrator.get_history(id).await?;
                let stats = self.orchestrator.task_stats(id).await?;
                display::show_stats(view.status, &stats);
                let pending = self.orchestrator.pending_tasks(id).await?;
                for task in pending {
                    display::show_info(&format!("suspended task: {}", task));
                }
            }
            Command::Pause => self.report(self.orchestrator.pause_consultation(id).await),
            Command::Close => {
                self.report(self.orchestrator.close_consultation(id).await);
                return Ok(false);
            }
            Command::Resume { task_id: None } => {
                self.report(self.orchestrator.resume_consultation(id).await)
            }
            Command::Resume {
                task_id: Some(task_id),
            } => {
                let turn = self.orchestrator.resume_task(id, &task_id);
                let result = self.cancellable(turn).await;
                return Ok(self.show(result));
            }
            Command::Ask { kind, text } => {
                return Ok(self.ask(ContinueRequest::new(text).with_type(kind)).await);
            }
            Command::Unknown { input } => {
                display::show_error(&format!("Unknown command: {} (try /help)", input));
            }
        }
        Ok(true)
    }

    async fn ask(&self, request: ContinueRequest) -> bool {
        let turn = self
            .orchestrator
            .continue_consultation(&self.consultation_id, request);
        let result = self.cancellable(turn).await;
        self.show(result)
    }

    /// Await a turn; Ctrl-C cancels it and waits for the settled response
    async fn cancellable<F>(&self, turn: F) -> crate::errors::Result<ContinueResponse>
    where
        F: Future<Output = crate::errors::Result<ContinueResponse>>,
    {
        tokio::pin!(turn);
        tokio::select! {
            result = &mut turn => result,
            _ = tokio::signal::ctrl_c() => {
                if self.orchestrator.cancel_task(&self.consultation_id) {
                    display::show_info("Cancelling...");
                }
                turn.await
            }
        }
    }

    fn show(&self, result: crate::errors::Result<ContinueResponse>) -> bool {
        match result {
            Ok(response) => {
                display::show_reply(&response, self.details);
                !response.status.is_terminal()
            }
            Err(e) => {
                debug!(error = %e, kind = e.kind(), "turn failed");
                display::show_error(&e.to_string());
                true
            }
        }
    }

    fn report<T: std::fmt::Display>(&self, result: crate::errors::Result<T>) {
        match result {
            Ok(status) => display::show_info(&format!("Consultation is now {}", status)),
            Err(e) => display::show_error(&e.to_string()),
        }
    }
}

/// Message type for the opening query when none was given explicitly
pub fn opening_type(query: &str, requested: MessageType) -> MessageType {
    if requested == MessageType::Query && crate::types::is_acute_marker(query) {
        MessageType::Emergency
    } else {
        requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opening_type_escalates_acute_query() {
        assert_eq!(
            opening_type("crushing chest pain", MessageType::Query),
            MessageType::Emergency
        );
        assert_eq!(
            opening_type("crushing chest pain", MessageType::Research),
            MessageType::Research
        );
        assert_eq!(opening_type("mild cough", MessageType::Query), MessageType::Query);
    }
}
