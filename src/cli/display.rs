//! Terminal rendering of consultation responses

use crate::orchestrator::TaskStats;
use crate::types::{ContinueResponse, HistoryView, SenderRole, StartResponse};
use crate::workflow::ConsultationStatus;
use colored::*;

/// Show welcome banner
pub fn show_banner(version: &str, consultation_id: &str) {
    let width = 64;
    let rule = "=".repeat(width);

    println!("\n{}", rule.cyan());
    println!("{}", format!("  careflow {} - Consultation", version).bold().cyan());
    println!("{}", format!("  Consultation: {}", consultation_id).dimmed());
    println!("{}\n", rule.cyan());
    println!(
        "Describe your concern (or {} for commands, {} to leave)\n",
        "/help".green(),
        "/exit".green()
    );
}

pub fn show_start(response: &StartResponse, details: bool) {
    print_answer(
        response.agent_assigned.map(|a| a.display_name()),
        &response.initial_response,
    );
    print_flags(response.status, response.needs_human_review);
    if details {
        if let Some(task) = &response.pending_task {
            println!("  {} {}", "suspended task:".dimmed(), task);
        }
    }
}

pub fn show_reply(response: &ContinueResponse, details: bool) {
    print_answer(
        response.agent_responded.map(|a| a.display_name()),
        &response.response,
    );

    if !response.next_steps.is_empty() {
        println!("{}", "Next steps:".bold());
        for step in &response.next_steps {
            println!("  - {}", step);
        }
    }

    print_flags(response.status, response.needs_human_review);
    if details {
        println!(
            "  {} {:.2}",
            "confidence:".dimmed(),
            response.confidence_level
        );
        if let Some(task) = &response.pending_task {
            println!("  {} {}", "suspended task:".dimmed(), task);
        }
    }
    println!();
}

pub fn show_history(view: &HistoryView) {
    println!(
        "{} {} [{}]",
        "Consultation".bold(),
        view.consultation_id,
        status_label(view.status)
    );
    println!(
        "{}",
        format!("  started {} | updated {}", view.created_at, view.updated_at).dimmed()
    );
    println!();

    for message in &view.messages {
        let who = match message.role {
            SenderRole::Patient => "patient".blue().bold(),
            SenderRole::System => "system".yellow().bold(),
            SenderRole::Agent => message
                .agent
                .map(|a| a.as_str())
                .unwrap_or("agent")
                .green()
                .bold(),
        };
        println!("{:>4} {}: {}", message.sequence, who, message.content);
    }

    println!();
    println!("{} {}", "Summary:".bold(), view.summary);
    if !view.recommended_followup.is_empty() {
        println!("{}", "Recommended follow-up:".bold());
        for item in &view.recommended_followup {
            println!("  - {}", item);
        }
    }
    if view.needs_human_review {
        println!("{}", "Flagged for clinician review".yellow());
    }
}

pub fn show_stats(status: ConsultationStatus, stats: &TaskStats) {
    println!("Status: {}", status_label(status));
    println!(
        "Tasks: {} total, {} succeeded, {} failed, {} suspended, {} cancelled",
        stats.total, stats.succeeded, stats.failed, stats.suspended, stats.cancelled
    );
}

pub fn show_help(commands: &[(&str, &str)]) {
    println!("\n{}", "Available Commands:".bold().cyan());
    for (name, description) in commands {
        println!("  {:<20} {}", name.green(), description);
    }
    println!();
}

pub fn show_error(message: &str) {
    eprintln!("{} {}", "Error:".red().bold(), message);
}

pub fn show_info(message: &str) {
    println!("{}", message.dimmed());
}

fn print_answer(agent: Option<&str>, text: &str) {
    let label = agent.unwrap_or("careflow");
    println!("\n{} {}", format!("[{}]", label).green().bold(), text);
}

fn print_flags(status: ConsultationStatus, review: bool) {
    if status == ConsultationStatus::Transferred {
        println!("{}", "Transferred to emergency care".red().bold());
    }
    if review {
        println!("{}", "A clinician will review this consultation".yellow());
    }
}

fn status_label(status: ConsultationStatus) -> ColoredString {
    match status {
        ConsultationStatus::Transferred | ConsultationStatus::Failed => {
            status.display_name().red()
        }
        ConsultationStatus::Completed => status.display_name().green(),
        ConsultationStatus::Paused => status.display_name().yellow(),
        _ => status.display_name().normal(),
    }
}
