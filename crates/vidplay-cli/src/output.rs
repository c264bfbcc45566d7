//! Output formatting for CLI

use console::style;
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use vidplay_core::{EventRecord, PlayerEvent, SessionSnapshot};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Table,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "table" => OutputFormat::Table,
            _ => OutputFormat::Text,
        }
    }
}

/// Key/value row for tables
#[derive(Tabled)]
pub struct Field {
    #[tabled(rename = "Field")]
    pub name: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

impl Field {
    pub fn new(name: &str, value: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// Render key/value pairs as text lines or a table
pub fn fields(rows: Vec<Field>, format: OutputFormat) -> String {
    match format {
        OutputFormat::Table => Table::new(rows).with(Style::rounded()).to_string(),
        _ => rows
            .iter()
            .map(|f| format!("  {}: {}", f.name, f.value))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Pretty JSON
pub fn json<T: Serialize>(data: &T) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
}

/// One line per delivered event
pub fn event_line(record: &EventRecord, format: OutputFormat) -> String {
    if format == OutputFormat::Json {
        return serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string());
    }

    let name = match &record.event {
        PlayerEvent::Error { .. } => style(record.event.name()).red().bold(),
        PlayerEvent::BufferingStart | PlayerEvent::Retry { .. } => {
            style(record.event.name()).yellow()
        }
        _ => style(record.event.name()).cyan(),
    };

    format!(
        "{} #{:<3} {} {}",
        style(record.timestamp.format("%H:%M:%S%.3f")).dim(),
        record.sequence,
        name,
        event_details(&record.event)
    )
}

fn event_details(event: &PlayerEvent) -> String {
    match event {
        PlayerEvent::Initialized {
            key,
            duration,
            width,
            height,
            tracks,
        } => {
            let size = match (width, height) {
                (Some(w), Some(h)) => format!("{w}x{h}"),
                _ => "audio-only".to_string(),
            };
            format!(
                "key={key} duration={} size={size} audio={} video={}",
                format_ms(*duration),
                tracks.audio.len(),
                tracks.video.len()
            )
        }
        PlayerEvent::BufferingUpdate { ranges } => ranges
            .iter()
            .map(|(start, end)| format!("[{}..{}]", format_ms(*start), format_ms(*end)))
            .collect::<Vec<_>>()
            .join(" "),
        PlayerEvent::Seek { position } => format!("position={}", format_ms(*position)),
        PlayerEvent::PipStateChanged { active } => format!("active={active}"),
        PlayerEvent::Retry { attempt } => format!("attempt={attempt}"),
        PlayerEvent::Error { kind, message } => format!("{kind}: {message}"),
        PlayerEvent::BufferingStart | PlayerEvent::BufferingEnd | PlayerEvent::Completed => {
            String::new()
        }
    }
}

/// Snapshot as rows
pub fn snapshot_fields(snapshot: &SessionSnapshot) -> Vec<Field> {
    vec![
        Field::new("State", snapshot.state),
        Field::new("Source", snapshot.source_key.as_deref().unwrap_or("-")),
        Field::new("Position", format_ms(snapshot.position_ms)),
        Field::new("Duration", format_ms(snapshot.duration_ms)),
        Field::new("Rate", snapshot.playback_rate),
        Field::new("Volume", snapshot.volume),
        Field::new("Looping", snapshot.is_looping),
        Field::new("Failed attempts", snapshot.failed_attempts),
        Field::new("Stalls", snapshot.stall_count),
        Field::new("PiP", format!("enabled={} active={}", snapshot.pip_enabled, snapshot.pip_active)),
    ]
}

/// `mm:ss.mmm`, or `live` for an unknown duration
pub fn format_ms(ms: i64) -> String {
    if ms < 0 {
        return "live".to_string();
    }
    let minutes = ms / 60_000;
    let seconds = (ms % 60_000) / 1000;
    let millis = ms % 1000;
    format!("{minutes:02}:{seconds:02}.{millis:03}")
}
