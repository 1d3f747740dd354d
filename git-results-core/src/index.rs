//! The per-experiment `INDEX` ledger: append-only lines of the form
//! `N (SSSS) - message`, where `SSSS` is one of the four-character status
//! codes. Later lines for the same N supersede earlier ones.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::errors::{Error, Result};
use crate::tagpath::parse_instance_dir;

pub const INDEX_FILE: &str = "INDEX";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Ok,
    Fail,
    Gone,
    Move,
}

impl EntryStatus {
    /// Exactly four characters, space-padded.
    pub fn code(self) -> &'static str {
        match self {
            EntryStatus::Ok => "  ok",
            EntryStatus::Fail => "fail",
            EntryStatus::Gone => "gone",
            EntryStatus::Move => "move",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "  ok" => Some(EntryStatus::Ok),
            "fail" => Some(EntryStatus::Fail),
            "gone" => Some(EntryStatus::Gone),
            "move" => Some(EntryStatus::Move),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub number: u32,
    pub status: EntryStatus,
    pub message: String,
}

/// Messages are single-line: embedded newlines become spaces, surrounding
/// whitespace is trimmed.
fn clean_message(message: &str) -> String {
    message.replace(['\n', '\r'], " ").trim().to_string()
}

fn format_line(number: u32, status: EntryStatus, message: &str) -> String {
    format!("{} ({}) - {}\n", number, status.code(), clean_message(message))
}

fn parse_line(line: &str) -> Option<Entry> {
    let (number, rest) = line.split_once(" (")?;
    let number: u32 = number.parse().ok()?;
    let status = EntryStatus::parse(rest.get(..4)?)?;
    let message = rest.get(4..)?.strip_prefix(") - ")?;
    Some(Entry {
        number,
        status,
        message: message.to_string(),
    })
}

fn read_lines(experiment_dir: &Path) -> Result<Vec<String>> {
    let path = experiment_dir.join(INDEX_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }
    Ok(fs::read_to_string(path)?.lines().map(str::to_string).collect())
}

fn write_lines(experiment_dir: &Path, lines: &[String]) -> Result<()> {
    let mut contents = lines.join("\n");
    if !contents.is_empty() {
        contents.push('\n');
    }
    fs::write(experiment_dir.join(INDEX_FILE), contents)?;
    Ok(())
}

/// Append a fresh line, creating the experiment directory (and INDEX) when
/// missing.
pub fn append(experiment_dir: &Path, number: u32, status: EntryStatus, message: &str) -> Result<()> {
    fs::create_dir_all(experiment_dir)?;
    let mut lines = read_lines(experiment_dir)?;
    lines.push(format_line(number, status, message).trim_end().to_string());
    write_lines(experiment_dir, &lines)
}

/// Overwrite the newest line for `number` in place, preserving every other
/// line verbatim. Appends when no line matches.
pub fn rewrite(experiment_dir: &Path, number: u32, status: EntryStatus, message: &str) -> Result<()> {
    let mut lines = read_lines(experiment_dir)?;
    let target = lines
        .iter()
        .rposition(|line| parse_line(line).is_some_and(|entry| entry.number == number));

    match target {
        Some(position) => {
            lines[position] = format_line(number, status, message).trim_end().to_string();
            write_lines(experiment_dir, &lines)
        }
        None => append(experiment_dir, number, status, message),
    }
}

/// The newest entry for `number`, by file order.
pub fn read(experiment_dir: &Path, number: u32) -> Result<Entry> {
    let lines = read_lines(experiment_dir)?;
    lines
        .iter()
        .filter_map(|line| parse_line(line))
        .filter(|entry| entry.number == number)
        .next_back()
        .ok_or(Error::NotIndexed(number))
}

/// Newest entry per instance number, for whole-experiment operations.
pub fn latest_entries(experiment_dir: &Path) -> Result<BTreeMap<u32, Entry>> {
    let mut entries = BTreeMap::new();
    for line in read_lines(experiment_dir)? {
        if let Some(entry) = parse_line(&line) {
            entries.insert(entry.number, entry);
        }
    }
    Ok(entries)
}

/// 1 + the highest instance number in use, counting both instance
/// directories (whatever their suffix) and INDEX lines, so a deleted
/// directory never frees its number. A number whose newest line is `gone`
/// is reusable: the commit behind it was reset out of existence, and the
/// retake keeps the historical `gone` line above its own.
pub fn next_number(experiment_dir: &Path) -> Result<u32> {
    let mut highest = 0;

    if experiment_dir.is_dir() {
        for entry in fs::read_dir(experiment_dir)? {
            let entry = entry?;
            if let Some((number, _)) = entry.file_name().to_str().and_then(parse_instance_dir) {
                highest = highest.max(number);
            }
        }
    }

    for (number, entry) in latest_entries(experiment_dir)? {
        if entry.status != EntryStatus::Gone {
            highest = highest.max(number);
        }
    }

    Ok(highest + 1)
}
