use std::io::{self, Write};
use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::app::{BatchReport, ProgressEvent, ProgressSink, StatusResult};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(result: &BatchReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_status(result: &StatusResult) -> io::Result<()> {
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

/// Terminal view: one progress bar per year, failures left to the error records.
#[derive(Default)]
pub struct ConsoleProgress {
    bar: Mutex<Option<(i32, ProgressBar)>>,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn year_bar(year: i32, items: usize) -> ProgressBar {
        let bar = ProgressBar::new(items as u64);
        bar.set_style(
            ProgressStyle::with_template("{msg:<24} {wide_bar} {pos}/{len} ({elapsed}<{eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        bar.set_message(format!("Year {year}"));
        bar
    }
}

impl ProgressSink for ConsoleProgress {
    fn event(&self, event: ProgressEvent) {
        let mut guard = match self.bar.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match event {
            ProgressEvent::Planned {
                points,
                years,
                total,
            } => {
                println!("Planned requests: {total} ({points} points × {years} years)");
            }
            ProgressEvent::YearStarted { year, items } => {
                if let Some((_, bar)) = guard.take() {
                    bar.finish();
                }
                *guard = Some((year, Self::year_bar(year, items)));
            }
            ProgressEvent::Retrying {
                attempt, delay, ..
            } => {
                if let Some((year, bar)) = guard.as_ref() {
                    bar.set_message(format!(
                        "Year {year} (retry {attempt}, {}s)",
                        delay.as_secs()
                    ));
                }
            }
            ProgressEvent::ItemFinished { .. } => {
                if let Some((year, bar)) = guard.as_ref() {
                    bar.set_message(format!("Year {year}"));
                    bar.inc(1);
                }
            }
            ProgressEvent::Finished {
                skipped,
                pending,
                published,
                failed,
            } => {
                if let Some((_, bar)) = guard.take() {
                    bar.finish();
                }
                println!(
                    "Done. downloaded: {published}, already present: {skipped}, failed: {failed}{}",
                    if pending > 0 {
                        format!(", would download: {pending}")
                    } else {
                        String::new()
                    }
                );
            }
        }
    }
}

pub fn print_status_summary(result: &StatusResult) {
    println!("Planned artifacts: {}", result.planned);
    println!("  valid:   {}", result.valid);
    println!("  invalid: {}", result.invalid);
    println!("  missing: {}", result.missing);
    println!("  with error records: {}", result.failures.len());
    for failure in &result.failures {
        println!(
            "    {} ({:.4}, {:.4}): {}",
            failure.year, failure.lat, failure.lon, failure.error
        );
    }
}
