use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    CleanResult, ConsolidateResult, HarvestResult, PlanResult, ProgressEvent, ProgressSink,
    ProgressSinkKind, RunResult, ScoreResult,
};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_plan(result: &PlanResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_harvest(result: &HarvestResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_consolidate(result: &ConsolidateResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_score(result: &ScoreResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_run(result: &RunResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_clean(result: &CleanResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Progress lines on stderr for interactive runs.
pub struct ConsoleProgress {
    kind: ProgressSinkKind,
}

impl ConsoleProgress {
    pub fn new(kind: ProgressSinkKind) -> Self {
        Self { kind }
    }

    fn label(&self) -> &'static str {
        match self.kind {
            ProgressSinkKind::Plan => "plan",
            ProgressSinkKind::Harvest => "harvest",
            ProgressSinkKind::Consolidate => "consolidate",
            ProgressSinkKind::Score => "score",
            ProgressSinkKind::Clean => "clean",
        }
    }
}

impl ProgressSink for ConsoleProgress {
    fn event(&self, event: ProgressEvent) {
        let line = format_event(self.label(), &event);
        let _ = writeln!(io::stderr(), "{line}");
    }
}

fn format_event(label: &str, event: &ProgressEvent) -> String {
    let (phase, message) = match event.message.split_once("; ") {
        Some((phase, message)) => (phase.trim_start_matches("phase="), message),
        None => ("", event.message.as_str()),
    };
    let mut line = if phase.is_empty() {
        format!("[{label}] {message}")
    } else {
        format!("[{label}:{}] {message}", phase.to_lowercase())
    };
    if let Some(elapsed) = event.elapsed {
        line.push_str(&format!(" ({:.1}s)", elapsed.as_secs_f64()));
    }
    line
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

pub fn print_plan_summary(result: &PlanResult) {
    let plan = &result.plan;
    println!("{CYAN}Harvest plan ({}){RESET}", plan.order);
    println!("  listed partitions: {}", result.enumerated);
    println!("{GREEN}  already harvested: {}{RESET}", plan.already_done);
    println!("{YELLOW}  remaining: {}{RESET}", plan.remaining);
    if plan.resumable > 0 {
        println!("  resuming from staged pages: {}", plan.resumable);
    }
    for partition in &plan.work {
        println!("    {partition}");
    }
}

pub fn print_harvest_summary(result: &HarvestResult) {
    println!("{CYAN}Harvest summary ({}){RESET}", result.order);
    println!("  processed: {}", result.processed);
    println!("{GREEN}  completed: {}{RESET}", result.completed);
    println!("  skipped (already harvested): {}", result.skipped);
    println!("  pages written: {}", result.pages_written);
    if result.failed > 0 {
        println!("{RED}  failed: {}{RESET}", result.failed);
        for outcome in result.failures() {
            println!(
                "{RED}    {} ({}): {}{RESET}",
                outcome.partition,
                outcome.failed_in.as_deref().unwrap_or("unknown"),
                outcome.error.as_deref().unwrap_or("no detail")
            );
        }
    }
}

pub fn print_consolidate_summary(result: &ConsolidateResult) {
    println!("{CYAN}Consolidated {} row(s){RESET}", result.total_rows);
    println!("  partitions: {}", result.partitions);
    println!("  files read: {}", result.files_read);
    println!("  duplicates removed: {}", result.duplicates_removed);
    if !result.skipped.is_empty() {
        println!("{YELLOW}  files skipped: {}{RESET}", result.skipped.len());
    }
    println!("{GREEN}  dataset: {}{RESET}", result.merged_path);
    println!("{GREEN}  summary: {}{RESET}", result.summary_path);
}

pub fn print_score_summary(result: &ScoreResult) {
    println!("{CYAN}Quality subsets of {} row(s){RESET}", result.total_rows);
    for subset in &result.subsets {
        let color = if subset.path.is_some() { GREEN } else { YELLOW };
        println!(
            "{color}  {:<30} {:>8} ({:.1}%){RESET}",
            subset.name, subset.rows, subset.percent
        );
    }
    println!("{GREEN}  report: {}{RESET}", result.report_path);
}

pub fn print_clean_summary(result: &CleanResult) {
    println!("{CYAN}Removed {} stray download(s){RESET}", result.removed.len());
    for path in &result.removed {
        println!("    {path}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn phase_prefix_becomes_label() {
        let event = ProgressEvent {
            message: "phase=Fetch; ALAMEDA page 2".to_string(),
            elapsed: Some(Duration::from_millis(1500)),
        };
        assert_eq!(
            format_event("harvest", &event),
            "[harvest:fetch] ALAMEDA page 2 (1.5s)"
        );
    }

    #[test]
    fn plain_message_keeps_label() {
        let event = ProgressEvent {
            message: "starting".to_string(),
            elapsed: None,
        };
        assert_eq!(format_event("clean", &event), "[clean] starting");
    }
}
