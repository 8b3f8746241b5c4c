//! Command-line argument parsing for careflow
//!
//! Provides clap-based CLI with subcommands and verbosity control.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// careflow - multi-agent medical consultation engine
#[derive(Parser, Debug)]
#[command(name = "careflow")]
#[command(author = "Jerome (Kubashen) Naidoo")]
#[command(version)]
#[command(about = "Route patient questions through triage, diagnosis, treatment and research agents", long_about = None)]
pub struct Args {
    /// Configuration file path (default: ~/.careflow/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Storage directory for consultations and checkpoints
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Verbosity level: -q (quiet), default (normal), -v (verbose), -vv (very verbose)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (only agent answers are printed)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start an interactive consultation
    Consult {
        /// Opening question; prompted for when omitted
        query: Option<String>,

        /// Patient age in years
        #[arg(long)]
        age: Option<u32>,

        /// Patient sex
        #[arg(long)]
        sex: Option<String>,

        /// Known symptom (repeatable)
        #[arg(long = "symptom")]
        symptoms: Vec<String>,

        /// Current medication (repeatable)
        #[arg(long = "medication")]
        medications: Vec<String>,

        /// Routing hint for the opening question
        #[arg(long, value_enum, default_value_t = KindArg::Query)]
        kind: KindArg,
    },

    /// Show the transcript and summary of a consultation
    History {
        consultation_id: String,
    },

    /// Resume a suspended agent task
    Resume {
        consultation_id: String,
        task_id: String,
    },

    /// List stored consultations
    List,

    /// Display current configuration
    Config,
}

/// Message classification accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Query,
    Symptom,
    Emergency,
    Diagnosis,
    Treatment,
    Research,
    Referral,
    SecondOpinion,
    FullAssessment,
    FollowUp,
}

impl From<KindArg> for crate::types::MessageType {
    fn from(kind: KindArg) -> Self {
        use crate::types::MessageType;
        match kind {
            KindArg::Query => MessageType::Query,
            KindArg::Symptom => MessageType::Symptom,
            KindArg::Emergency => MessageType::Emergency,
            KindArg::Diagnosis => MessageType::Diagnosis,
            KindArg::Treatment => MessageType::Treatment,
            KindArg::Research => MessageType::Research,
            KindArg::Referral => MessageType::Referral,
            KindArg::SecondOpinion => MessageType::SecondOpinion,
            KindArg::FullAssessment => MessageType::FullAssessment,
            KindArg::FollowUp => MessageType::FollowUp,
        }
    }
}

/// Verbosity level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    VeryVerbose,
}

impl Args {
    /// Get verbosity level based on flags
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            match self.verbose {
                0 => Verbosity::Normal,
                1 => Verbosity::Verbose,
                _ => Verbosity::VeryVerbose,
            }
        }
    }
}

impl Verbosity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "quiet",
            Verbosity::Normal => "normal",
            Verbosity::Verbose => "verbose",
            Verbosity::VeryVerbose => "very_verbose",
        }
    }

    /// Default `tracing` filter directive for this level
    pub fn filter_directive(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "careflow=error",
            Verbosity::Normal => "careflow=warn",
            Verbosity::Verbose => "careflow=info",
            Verbosity::VeryVerbose => "careflow=debug",
        }
    }

    /// Whether routing and task details are printed after each answer
    pub fn show_details(&self) -> bool {
        matches!(self, Verbosity::Verbose | Verbosity::VeryVerbose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(parse(&["careflow", "-q", "list"]).verbosity(), Verbosity::Quiet);
        assert_eq!(parse(&["careflow", "list"]).verbosity(), Verbosity::Normal);
        assert_eq!(parse(&["careflow", "-v", "list"]).verbosity(), Verbosity::Verbose);
        assert_eq!(
            parse(&["careflow", "list", "-vv"]).verbosity(),
            Verbosity::VeryVerbose
        );
    }

    #[test]
    fn test_consult_arguments() {
        let args = parse(&[
            "careflow",
            "consult",
            "my chest hurts",
            "--age",
            "58",
            "--symptom",
            "chest pain",
            "--symptom",
            "sweating",
            "--kind",
            "emergency",
        ]);
        match args.command {
            Commands::Consult {
                query,
                age,
                symptoms,
                kind,
                ..
            } => {
                assert_eq!(query.as_deref(), Some("my chest hurts"));
                assert_eq!(age, Some(58));
                assert_eq!(symptoms.len(), 2);
                assert_eq!(kind, KindArg::Emergency);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_resume_requires_task() {
        assert!(Args::try_parse_from(["careflow", "resume", "c-1"]).is_err());
        assert!(Args::try_parse_from(["careflow", "resume", "c-1", "t-1"]).is_ok());
    }

    #[test]
    fn test_verbosity_methods() {
        assert!(!Verbosity::Normal.show_details());
        assert!(Verbosity::Verbose.show_details());
        assert_eq!(Verbosity::VeryVerbose.filter_directive(), "careflow=debug");
    }
}
