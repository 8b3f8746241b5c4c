//! Built-in commands of the interactive consultation
//!
//! Lines starting with `/` are commands; anything else is a patient turn.

use crate::types::MessageType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    History,
    Status,
    Pause,
    Resume { task_id: Option<String> },
    Close,
    /// Send the rest of the line with an explicit message type
    Ask { kind: MessageType, text: String },
    Exit,
    Unknown { input: String },
}

/// Parse a `/command`; returns `None` for an ordinary patient message
pub fn parse(input: &str) -> Option<Command> {
    let trimmed = input.trim();
    let rest = trimmed.strip_prefix('/')?;

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    let command = match name.to_lowercase().as_str() {
        "help" | "h" => Command::Help,
        "exit" | "quit" | "q" => Command::Exit,
        "history" => Command::History,
        "status" => Command::Status,
        "pause" => Command::Pause,
        "resume" => Command::Resume {
            task_id: (!args.is_empty()).then(|| args.to_string()),
        },
        "close" | "done" => Command::Close,
        "emergency" => ask(MessageType::Emergency, args, trimmed),
        "symptom" => ask(MessageType::Symptom, args, trimmed),
        "diagnose" => ask(MessageType::Diagnosis, args, trimmed),
        "treat" => ask(MessageType::Treatment, args, trimmed),
        "research" => ask(MessageType::Research, args, trimmed),
        "refer" => ask(MessageType::Referral, args, trimmed),
        "second" => ask(MessageType::SecondOpinion, args, trimmed),
        "assess" => ask(MessageType::FullAssessment, args, trimmed),
        _ => Command::Unknown {
            input: trimmed.to_string(),
        },
    };
    Some(command)
}

fn ask(kind: MessageType, text: &str, input: &str) -> Command {
    if text.is_empty() {
        Command::Unknown {
            input: input.to_string(),
        }
    } else {
        Command::Ask {
            kind,
            text: text.to_string(),
        }
    }
}

pub const HELP: &[(&str, &str)] = &[
    ("/help", "Show this help"),
    ("/history", "Show the transcript and summary"),
    ("/status", "Show status and task counts"),
    ("/pause", "Pause the consultation"),
    ("/resume [task]", "Resume the consultation, or a suspended task"),
    ("/close", "Close the consultation"),
    ("/emergency <text>", "Report an emergency"),
    ("/diagnose <text>", "Ask the diagnosis agent"),
    ("/treat <text>", "Ask the treatment agent"),
    ("/research <text>", "Ask the research agent"),
    ("/refer <text>", "Ask for a specialist referral"),
    ("/second <text>", "Second opinion from several specialists"),
    ("/assess <text>", "Full assessment: triage to referral"),
    ("/exit", "Leave (the consultation stays stored)"),
    ("Ctrl-C", "Cancel the running turn"),
];
