//! Terminal output: status banners and diagnosis formatting.

use colored::Colorize;

use crate::runner::interpret_exit_code;

/// Section labels emphasized in diagnosis text
const LABELS: [&str; 4] = ["issue", "fix", "command", "solution"];

/// One line of diagnosis text, classified for presentation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosisLine {
    /// Starts with a recognized section label
    Label(String),
    Plain(String),
}

/// Recognized section label at the start of `line`, handling:
/// - "Issue:" (case-insensitive)
/// - "**Fix:**" or "**Fix**:"
pub fn extract_section_label(line: &str) -> Option<&'static str> {
    let cleaned = line.trim_start().trim_start_matches('*');

    LABELS.into_iter().find(|label| {
        let Some(head) = cleaned.get(..label.len()) else {
            return false;
        };
        let after = &cleaned[label.len()..];
        head.eq_ignore_ascii_case(label)
            && (after.starts_with(':') || after.starts_with("**:") || after.starts_with("*:"))
    })
}

/// Split diagnosis text into lines and mark the labelled ones.
///
/// Text without any labels is still returned line for line.
pub fn format_diagnosis(text: &str) -> Vec<DiagnosisLine> {
    text.trim()
        .lines()
        .map(|line| {
            if extract_section_label(line).is_some() {
                DiagnosisLine::Label(line.to_string())
            } else {
                DiagnosisLine::Plain(line.to_string())
            }
        })
        .collect()
}

pub fn print_diagnosis(text: &str) {
    println!();
    for line in format_diagnosis(text) {
        match line {
            DiagnosisLine::Label(l) => println!("{}", l.yellow().bold()),
            DiagnosisLine::Plain(l) => println!("{l}"),
        }
    }
}

pub fn print_running(command: &str) {
    println!("{}", format!("▶ shellpilot running: {command}\n").dimmed());
}

pub fn print_success() {
    println!("{}", "\n✔ shellpilot: command completed successfully\n".green());
}

pub fn print_failure(exit_code: Option<i32>) {
    let detail = match exit_code {
        Some(code) => format!(" (exit {code}: {})", interpret_exit_code(code)),
        None => " (terminated by signal)".to_string(),
    };
    println!("{}", format!("\n✖ Command failed{detail} (shellpilot)\n").red());
}

pub fn print_no_output() {
    println!(
        "{}",
        "No output was captured, so there is nothing to diagnose.".dimmed()
    );
}

pub fn print_cached_header() {
    println!("{}", "🤖 shellpilot (Cached Explanation):".dimmed());
}

pub fn print_consulting() {
    println!("{}", "Consulting AI for a fix...".cyan());
}

pub fn print_analysis_complete() {
    println!("{} {}", "✔".green(), "AI analysis complete:".green());
}

pub fn print_cache_cleared(count: usize) {
    println!(
        "{} {}",
        "✔".green(),
        format!("Cache cleared successfully. ({count} removed)").green()
    );
}

/// Format an error with an optional tip
pub fn format_error(message: &str, tip: Option<&str>) -> String {
    let mut out = format!("{} {}", "✖".red(), message.red());
    if let Some(tip) = tip {
        out.push_str(&format!("\n  {} {}", "tip:".yellow(), tip));
    }
    out
}
