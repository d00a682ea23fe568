use std::fmt;
use std::fmt::Write;

use console::Style;
use console::StyledObject;
use flume::Receiver;

use crate::interpreter::Outcome;
use crate::interpreter::Provenance;
use crate::interpreter::Verdict;
use crate::runner::ProbeEvent;
use crate::runner::ProbeReport;

// Raw bodies can be whole HTML error pages.
const MAX_BODY_CHARS: usize = 300;

pub struct OutPutter;

impl OutPutter {
    pub async fn start(rx: Receiver<ProbeEvent>, plan_name: &str, base_url: &str, n_probes: usize) {
        let style = Style::new().bold().cyan();
        let open_text = format!("Probing {base_url} with {plan_name}: {n_probes} probes");
        println!("{}", style.apply_to(open_text));

        while let Ok(event) = rx.recv_async().await {
            print!("{}", render(&event, n_probes));
        }
    }
}

/// Renders one event as one or more newline-terminated lines.
pub fn render(event: &ProbeEvent, n_probes: usize) -> String {
    match event {
        ProbeEvent::Started {
            index,
            name,
            method,
            url,
        } => format!(
            "[{}/{n_probes}] {} {name}... {} {}\n",
            index + 1,
            console::style("→").cyan().bold(),
            console::style(method).dim(),
            console::style(url).dim(),
        ),
        ProbeEvent::Finished(report) => render_report(report, n_probes),
    }
}

fn verdict_mark(verdict: Verdict) -> StyledObject<&'static str> {
    match verdict {
        Verdict::Pass => console::style("✔").green().bold(),
        Verdict::Warn => console::style("⚠").yellow().bold(),
        Verdict::Fail => console::style("✘").red().bold(),
    }
}

fn verdict_label(verdict: Verdict) -> StyledObject<String> {
    let label = format!("{verdict}!");
    match verdict {
        Verdict::Pass => console::style(label).green().bold(),
        Verdict::Warn => console::style(label).yellow().bold(),
        Verdict::Fail => console::style(label).red().bold(),
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_BODY_CHARS {
        return text.to_string();
    }

    let cut: String = text.chars().take(MAX_BODY_CHARS).collect();
    format!("{cut}…")
}

fn render_report(report: &ProbeReport, n_probes: usize) -> String {
    let verdict = report.outcome.verdict();
    let status = report
        .outcome
        .status()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "no response".into());

    let mut out = format!(
        "[{}/{n_probes}] {}  {}: {status} ({} ms) {}\n",
        report.index + 1,
        verdict_mark(verdict),
        report.name,
        report.elapsed.as_millis(),
        verdict_label(verdict),
    );

    // Writing to a String can't fail.
    let _ = write_details(&mut out, &report.outcome);

    out
}

fn write_details(out: &mut String, outcome: &Outcome) -> fmt::Result {
    match outcome {
        Outcome::Success {
            body,
            provenance,
            notes,
            ..
        } => {
            writeln!(out, "  body: {body}")?;
            match provenance {
                Some(Provenance::Mock) => writeln!(
                    out,
                    "  data: {}",
                    console::style(Provenance::Mock).yellow().bold()
                )?,
                Some(Provenance::Real) => writeln!(
                    out,
                    "  data: {}",
                    console::style(Provenance::Real).green().bold()
                )?,
                None => {}
            }
            for note in notes {
                writeln!(out, "  {} {}", console::style("note:").yellow(), note)?;
            }
            Ok(())
        }
        Outcome::Reclassified { note, body, .. } => {
            writeln!(out, "  {note}")?;
            match body {
                Some(body) => writeln!(out, "  body: {body}"),
                None => Ok(()),
            }
        }
        Outcome::UnexpectedStatus {
            body, body_text, ..
        } => {
            writeln!(out, "  {}", console::style("unexpected status").yellow())?;
            match body {
                Some(body) => writeln!(out, "  body: {body}"),
                None if body_text.is_empty() => writeln!(out, "  body: <empty>"),
                None => writeln!(out, "  body: {}", truncate(body_text)),
            }
        }
        Outcome::DecodeError {
            error, body_text, ..
        } => {
            writeln!(
                out,
                "  {} {}",
                console::style("response is not valid JSON:").red(),
                error
            )?;
            writeln!(out, "  body: {}", truncate(body_text))
        }
        Outcome::TransportError { error } => writeln!(
            out,
            "  {} {}",
            console::style("request failed:").red(),
            console::style(error).red().bold()
        ),
    }
}
