use std::{
    env,
    io::{self, Write},
    process::{Command, Stdio},
};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};

use famsync::{
    app::FamilyOrganizer,
    calendar::CalendarEvent,
    family::FamilyData,
    storage::Config,
};

pub const USAGE: &str = "Usage: famsync [--agenda [YYYY/MM/DD]] [--mock|--remote]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Configured,
    Mock,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliMode {
    Status { backend: Backend },
    AgendaDate { date: NaiveDate, backend: Backend },
    Help,
}

pub fn parse_cli_mode<I>(args: I, today: NaiveDate) -> Result<CliMode, String>
where
    I: IntoIterator<Item = String>,
{
    let mut backend = Backend::Configured;
    let mut agenda_date = None;
    let mut args = args.into_iter().peekable();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--mock" => backend = Backend::Mock,
            "--remote" => backend = Backend::Remote,
            "--agenda" => {
                let target_date = match args.next_if(|next| !next.starts_with("--")) {
                    Some(date_str) => NaiveDate::parse_from_str(&date_str, "%Y/%m/%d")
                        .map_err(|_| format!("Invalid date '{}'. Use YYYY/MM/DD.", date_str))?,
                    None => today,
                };
                agenda_date = Some(target_date);
            }
            "--help" | "-h" => return Ok(CliMode::Help),
            _ => return Err(format!("Unknown argument: {}", arg)),
        }
    }

    Ok(match agenda_date {
        Some(date) => CliMode::AgendaDate { date, backend },
        None => CliMode::Status { backend },
    })
}

pub fn build_organizer(backend: Backend) -> Result<FamilyOrganizer> {
    let config = Config::load_or_create().context("Failed to load configuration")?;
    let organizer = FamilyOrganizer::from_config(config).context("Failed to open local storage")?;
    match backend {
        Backend::Mock => organizer.set_use_mock(true),
        Backend::Remote => organizer.set_use_mock(false),
        Backend::Configured => {}
    }
    Ok(organizer)
}

pub async fn run_status_mode(organizer: &FamilyOrganizer) -> Result<()> {
    organizer.hydrate().await;
    let backend = if organizer.is_mock() { "mock" } else { "remote" };
    println!("Backend: {}", backend);

    match organizer.family_store().family() {
        Some(family) => print!("{}", format_family(&family)),
        None => println!("No family set up yet."),
    }
    Ok(())
}

pub async fn run_agenda_mode(organizer: &FamilyOrganizer, date: NaiveDate) -> Result<()> {
    organizer.hydrate().await;
    organizer.reconcile_filter();
    let family = organizer.family_store().family();

    let events = match organizer.agenda(date).await {
        Ok(list) => list,
        Err(e) => {
            eprintln!("Failed to fetch events: {}", e);
            tracing::error!("Agenda fetch failed: {}", e);
            Vec::new()
        }
    };

    let agenda = format_agenda_text(date, &events, family.as_ref(), terminal_width());
    display_with_pager(&agenda).context("Failed to show agenda")
}

fn format_family(family: &FamilyData) -> String {
    let mut lines = vec![format!("Family: {} ({} members)", family.name, family.members.len())];
    for member in &family.members {
        lines.push(format!("  {:<30} {}", member.name, member.color));
    }
    lines.push(String::new());
    lines.join("\n")
}

fn format_agenda_text(
    date: NaiveDate,
    events: &[CalendarEvent],
    family: Option<&FamilyData>,
    width: usize,
) -> String {
    let mut lines = Vec::new();
    lines.push(format!("Agenda for {}", date.format("%A, %B %d, %Y")));
    lines.push(String::new());

    if events.is_empty() {
        lines.push("No events scheduled.".to_string());
    } else {
        for event in events {
            let owner = family
                .and_then(|f| f.member(&event.member_id))
                .map(|m| m.name.as_str());
            lines.push(format!("- {}", build_agenda_line(event, owner, width.saturating_sub(2))));
        }
    }

    lines.join("\n")
}

fn build_agenda_line(event: &CalendarEvent, owner: Option<&str>, width: usize) -> String {
    let time_label = if event.is_all_day {
        "All Day".to_string()
    } else {
        format!("{}-{}", event.start_time, event.end_time)
    };

    let mut line = format!("{:<19} {}", time_label, event.title);
    if let Some(owner) = owner {
        line.push_str(&format!(" [{}]", owner));
    }
    if let Some(location) = &event.location
        && !location.is_empty()
    {
        line.push_str(&format!(" @ {}", location));
    }
    truncate_to_width(&line, width)
}

/// Width advertised by the shell through `COLUMNS`; 0 disables truncation.
fn terminal_width() -> usize {
    env::var("COLUMNS")
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}

fn truncate_to_width(line: &str, width: usize) -> String {
    if width > 0 && line.chars().count() > width {
        let mut truncated = line.chars().take(width.saturating_sub(1)).collect::<String>();
        truncated.push('…');
        truncated
    } else {
        line.to_string()
    }
}

fn display_with_pager(text: &str) -> Result<(), io::Error> {
    let pager_value = env::var("PAGER").unwrap_or_else(|_| "less".to_string());
    let mut parts = pager_value.split_whitespace();
    let cmd = match parts.next() {
        Some(c) => c,
        None => {
            print!("{text}");
            return Ok(());
        }
    };
    let args: Vec<&str> = parts.collect();

    match Command::new(cmd)
        .args(&args)
        .stdin(Stdio::piped())
        .spawn()
    {
        Ok(mut child) => {
            if let Some(stdin) = child.stdin.as_mut() {
                stdin.write_all(text.as_bytes())?;
            }
            let _ = child.wait();
        }
        Err(_) => {
            print!("{text}");
        }
    }

    Ok(())
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}
