//! Read-only monitoring of the ingestion service.
//!
//! The [`Monitor`] reads store snapshots and re-reads the persisted files on
//! its own schedule. It only mutates state through the two administrative
//! actions, [`Monitor::clear_logs`] and [`Monitor::reset_counters`].

use std::fmt;
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{Local, TimeZone};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::protocol::ProtocolHandler;
use crate::sample::{normalize_timestamp, AppUsage, Location, TrafficRecord};
use crate::storage::{PersistenceWriter, TelephonyEntry};
use crate::store::{HistoryEntry, RecordStore, Snapshot};

/// Longest uninterrupted sleep while waiting for the next refresh.
const STOP_POLL: Duration = Duration::from_millis(50);

/// Render epoch milliseconds as local `YYYY-mm-dd HH:MM:SS`, or `N/A` for 0.
#[must_use]
pub fn format_timestamp(ms: i64) -> String {
    if ms == 0 {
        return "N/A".to_string();
    }
    Local
        .timestamp_millis_opt(ms)
        .single()
        .map_or_else(|| "N/A".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// A history entry paired with its display id.
#[derive(Debug, Clone, PartialEq)]
pub struct RecentRow {
    /// Counter minus the row's distance from the newest entry.
    pub id: u64,
    /// The history entry.
    pub entry: HistoryEntry,
}

impl RecentRow {
    /// The position fix, for location entries.
    #[must_use]
    pub fn fix(&self) -> Option<&Location> {
        self.entry.fix.as_ref()
    }

    /// Client timestamp in epoch milliseconds, 0 when absent.
    #[must_use]
    pub fn timestamp_ms(&self) -> i64 {
        self.entry.timestamp_ms
    }
}

/// A point-in-time view of the service, rendered as console text.
#[derive(Debug, Clone)]
pub struct Dashboard {
    snapshot: Snapshot,
    capacity: usize,
    rows: Vec<RecentRow>,
    traffic: TrafficSummary,
    telephony: Option<TelephonyEntry>,
}

impl Dashboard {
    fn write_position(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let position = self.snapshot.position;
        writeln!(f, "=== CURRENT POSITION ===")?;
        writeln!(f, "Total Records: {}", self.snapshot.counter)?;
        writeln!(f, "Latitude:      {:.6}°", position.latitude)?;
        writeln!(f, "Longitude:     {:.6}°", position.longitude)?;
        writeln!(f, "Altitude:      {:.2} m", position.altitude)?;
        writeln!(f, "Timestamp:     {}", format_timestamp(position.timestamp_ms))
    }

    fn write_activity(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.snapshot.client_connected {
            "receiving data"
        } else {
            "waiting for client"
        };
        writeln!(f, "=== ACTIVITY ===")?;
        writeln!(f, "Client:        {status}")?;
        writeln!(
            f,
            "History:       {}/{}",
            self.snapshot.history.len(),
            self.capacity
        )
    }

    fn write_recent(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== RECENT RECORDS ===")?;
        if self.rows.is_empty() {
            return writeln!(f, "No records yet...");
        }
        writeln!(
            f,
            "{:>6}  {:<9}  {:>10}  {:>10}  {:>8}  {}",
            "ID", "Kind", "Latitude", "Longitude", "Altitude", "Time"
        )?;
        for row in &self.rows {
            let (latitude, longitude) = row.fix().map_or_else(
                || ("-".to_string(), "-".to_string()),
                |fix| (format!("{:.4}", fix.latitude), format!("{:.4}", fix.longitude)),
            );
            writeln!(
                f,
                "{:>6}  {:<9}  {:>10}  {:>10}  {:>8.1}  {}",
                row.id,
                row.entry.kind.to_string(),
                latitude,
                longitude,
                row.fix().map_or(0.0, |fix| fix.altitude),
                format_timestamp(row.timestamp_ms())
            )?;
        }
        Ok(())
    }

    fn write_traffic(&self, f: &mut fmt::Formatter<'_>, latest: &TrafficRecord) -> fmt::Result {
        writeln!(f, "=== TRAFFIC ===")?;
        writeln!(f, "Records:       {}", self.traffic.records)?;
        writeln!(f, "Total bytes:   {}", latest.total_bytes)?;
        writeln!(f, "Mobile bytes:  {}", latest.mobile_total_bytes)?;
        for (package, usage) in self.traffic.top_apps.iter().take(5) {
            let name = if usage.app_name.is_empty() {
                package.as_str()
            } else {
                usage.app_name.as_str()
            };
            writeln!(f, "  {name:<24} {:>12}", usage.total_bytes)?;
        }
        Ok(())
    }
}

impl fmt::Display for Dashboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_position(f)?;
        writeln!(f)?;
        self.write_activity(f)?;
        writeln!(f)?;
        self.write_recent(f)?;

        if let Some(latest) = &self.traffic.latest {
            writeln!(f)?;
            self.write_traffic(f, latest)?;
        }
        if let Some(entry) = &self.telephony {
            writeln!(f)?;
            writeln!(f, "=== TELEPHONY ===")?;
            writeln!(
                f,
                "{}  {}",
                format_timestamp(normalize_timestamp(Some(entry.timestamp))),
                entry.data
            )?;
        }
        Ok(())
    }
}

/// Summary of the traffic collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrafficSummary {
    /// Records in the collection.
    pub records: usize,
    /// The most recently persisted record.
    pub latest: Option<TrafficRecord>,
    /// Top applications of the latest record, largest first.
    pub top_apps: Vec<(String, AppUsage)>,
}

/// An administrative command read from the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCommand {
    /// Truncate every persisted file.
    Clear,
    /// Reset the counter and history.
    Reset,
    /// List the commands.
    Help,
}

impl AdminCommand {
    /// Parse one console line; surrounding whitespace is ignored.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "clear" => Some(Self::Clear),
            "reset" => Some(Self::Reset),
            "help" | "?" => Some(Self::Help),
            _ => None,
        }
    }
}

/// A cloneable stop signal for the console loop.
#[derive(Debug, Clone, Default)]
pub struct MonitorHandle {
    stop_signal: Arc<AtomicBool>,
}

impl MonitorHandle {
    /// Create a handle that has not been stopped.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the console loop to stop.
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Check if the stop signal has been sent.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }

    /// Sleep for `interval`, waking early on stop.
    ///
    /// Returns `true` if the stop signal was seen.
    fn wait(&self, interval: Duration) -> bool {
        let deadline = Instant::now() + interval;
        loop {
            if self.should_stop() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep((deadline - now).min(STOP_POLL));
        }
    }
}

/// Read side of the service plus its administrative actions.
#[derive(Debug)]
pub struct Monitor {
    store: Arc<RecordStore>,
    files: Arc<PersistenceWriter>,
}

impl Monitor {
    /// Create a monitor over the shared store and writer.
    ///
    /// The writer must be the one the ingestion side appends through, so
    /// that [`Monitor::clear_logs`] is serialized with appends.
    #[must_use]
    pub fn new(store: Arc<RecordStore>, files: Arc<PersistenceWriter>) -> Self {
        Self { store, files }
    }

    /// Create a monitor sharing the handler's store and writer.
    #[must_use]
    pub fn for_handler(handler: &ProtocolHandler) -> Self {
        Self::new(Arc::clone(handler.store()), Arc::clone(handler.writer()))
    }

    /// A consistent copy of the store.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    /// Up to `rows` history entries, newest first.
    #[must_use]
    pub fn recent(&self, rows: usize) -> Vec<RecentRow> {
        Self::recent_rows(&self.snapshot(), rows)
    }

    fn recent_rows(snapshot: &Snapshot, rows: usize) -> Vec<RecentRow> {
        snapshot
            .history
            .iter()
            .rev()
            .take(rows)
            .zip(0u64..)
            .map(|(entry, distance)| RecentRow {
                id: snapshot.counter.saturating_sub(distance),
                entry: entry.clone(),
            })
            .collect()
    }

    /// Altitudes of the history in insertion order; 0 for non-location entries.
    #[must_use]
    pub fn altitude_trend(&self) -> Vec<f64> {
        self.snapshot()
            .history
            .iter()
            .map(|entry| entry.fix.map_or(0.0, |fix| fix.altitude))
            .collect()
    }

    /// Summarize the traffic collection.
    #[must_use]
    pub fn traffic_summary(&self) -> TrafficSummary {
        let mut records = self.files.load_traffic();
        let count = records.len();
        let latest = records.pop();
        let top_apps = latest.as_ref().map(TrafficRecord::ranked_apps).unwrap_or_default();
        TrafficSummary {
            records: count,
            latest,
            top_apps,
        }
    }

    /// Up to `limit` telephony entries, newest first.
    #[must_use]
    pub fn telephony_entries(&self, limit: usize) -> Vec<TelephonyEntry> {
        self.files.load_telephony().into_iter().rev().take(limit).collect()
    }

    /// Truncate every persisted file to empty.
    ///
    /// # Errors
    ///
    /// Returns the first file that could not be truncated.
    pub fn clear_logs(&self) -> Result<()> {
        self.files.clear_all()
    }

    /// Reset the counter and history; the position is kept.
    pub fn reset_counters(&self) {
        self.store.reset();
        info!("Counters reset");
    }

    /// Apply one administrative command and describe the outcome.
    pub fn apply(&self, command: AdminCommand) -> String {
        match command {
            AdminCommand::Clear => match self.clear_logs() {
                Ok(()) => "Log files cleared".to_string(),
                Err(e) => format!("Clear failed: {e}"),
            },
            AdminCommand::Reset => {
                self.reset_counters();
                "Counter reset".to_string()
            }
            AdminCommand::Help => "Commands: clear, reset, help".to_string(),
        }
    }

    /// Gather everything the dashboard shows.
    #[must_use]
    pub fn dashboard(&self, rows: usize) -> Dashboard {
        let snapshot = self.snapshot();
        Dashboard {
            rows: Self::recent_rows(&snapshot, rows),
            capacity: self.store.capacity(),
            traffic: self.traffic_summary(),
            telephony: self.telephony_entries(1).into_iter().next(),
            snapshot,
        }
    }

    /// Render the text dashboard.
    #[must_use]
    pub fn render(&self, rows: usize) -> String {
        self.dashboard(rows).to_string()
    }

    /// Render the dashboard to `out` every `interval` until stopped.
    ///
    /// Renders at least once.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `out` fails.
    pub fn run_console<W: Write>(
        &self,
        interval: Duration,
        rows: usize,
        handle: &MonitorHandle,
        out: &mut W,
    ) -> Result<()> {
        debug!(?interval, rows, "Console monitor started");
        loop {
            writeln!(out, "{}", self.dashboard(rows))?;
            out.flush()?;
            if handle.wait(interval) {
                debug!("Console monitor stopped");
                return Ok(());
            }
        }
    }

    /// Apply administrative commands read line by line until end of input.
    ///
    /// # Errors
    ///
    /// Returns an error if reading `input` or writing `out` fails.
    pub fn run_admin_input<R: BufRead, W: Write>(&self, input: R, out: &mut W) -> Result<()> {
        for line in input.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let message = match AdminCommand::parse(&line) {
                Some(command) => self.apply(command),
                None => {
                    warn!(input = %line.trim(), "Unknown admin command");
                    format!("Unknown command: {}", line.trim())
                }
            };
            writeln!(out, "{message}")?;
            out.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageFormat;
    use crate::storage::{ArrayFile, Collection, StoragePaths};

    fn create_test_monitor() -> (tempfile::TempDir, ProtocolHandler, Monitor) {
        let dir = tempfile::tempdir().unwrap();
        let writer =
            PersistenceWriter::open(StoragePaths::in_dir(dir.path()), StorageFormat::Array).unwrap();
        let handler = ProtocolHandler::new(Arc::new(RecordStore::default()), Arc::new(writer));
        let monitor = Monitor::for_handler(&handler);
        (dir, handler, monitor)
    }

    #[test]
    fn test_format_timestamp_zero() {
        assert_eq!(format_timestamp(0), "N/A");
    }

    #[test]
    fn test_format_timestamp_shape() {
        let text = format_timestamp(1_700_000_000_000);
        assert_eq!(text.len(), 19);
        assert!(text.starts_with("2023-11-1"));
        assert_eq!(&text[4..5], "-");
        assert_eq!(&text[13..14], ":");
    }

    #[test]
    fn test_admin_command_parse() {
        assert_eq!(AdminCommand::parse("clear"), Some(AdminCommand::Clear));
        assert_eq!(AdminCommand::parse("  RESET\n"), Some(AdminCommand::Reset));
        assert_eq!(AdminCommand::parse("?"), Some(AdminCommand::Help));
        assert_eq!(AdminCommand::parse("drop tables"), None);
    }

    #[test]
    fn test_monitor_handle_clone_shares_signal() {
        let handle = MonitorHandle::new();
        let other = handle.clone();
        assert!(!other.should_stop());

        handle.stop();

        assert!(other.should_stop());
        assert!(other.wait(Duration::from_secs(60)));
    }

    #[test]
    fn test_recent_ids_count_down() {
        let (_dir, handler, monitor) = create_test_monitor();
        for i in 0..5 {
            handler.handle(format!(r#"{{"latitude": {i}, "longitude": 0}}"#).as_bytes());
        }

        let rows = monitor.recent(3);

        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![5, 4, 3]);
        assert!(rows.iter().all(|r| r.id == r.entry.id));
        assert_eq!(rows[0].entry.payload["latitude"], 4);
    }

    #[test]
    fn test_recent_row_timestamp() {
        let (_dir, handler, monitor) = create_test_monitor();
        handler.handle(br#"{"latitude": 1, "longitude": 2, "time": 1700000000}"#);

        assert_eq!(monitor.recent(1)[0].timestamp_ms(), 1_700_000_000_000);
    }

    #[test]
    fn test_recent_row_matches_ingested_timestamp() {
        let (_dir, handler, monitor) = create_test_monitor();
        handler.handle(br#"{"latitude": 1, "longitude": 2, "timestamp": null, "time": 1700000000}"#);

        let row = &monitor.recent(1)[0];
        assert_eq!(monitor.snapshot().position.timestamp_ms, 1_700_000_000_000);
        assert_eq!(row.timestamp_ms(), 1_700_000_000_000);
        assert_eq!(row.fix().map(|fix| fix.latitude), Some(1.0));
    }

    #[test]
    fn test_recent_row_without_fix() {
        let (_dir, handler, monitor) = create_test_monitor();
        handler.handle(br#"{"traffic": {"total_bytes": 1}, "altitude": 99, "time": 5}"#);

        let row = &monitor.recent(1)[0];
        assert_eq!(row.fix(), None);
        assert_eq!(row.timestamp_ms(), 5000);
        assert_eq!(monitor.altitude_trend(), vec![0.0]);
    }

    #[test]
    fn test_altitude_trend() {
        let (_dir, handler, monitor) = create_test_monitor();
        handler.handle(br#"{"latitude": 1, "longitude": 2, "altitude": 10.5}"#);
        handler.handle(br#"{"traffic": {"total_bytes": 1}}"#);
        handler.handle(br#"{"latitude": 1, "longitude": 2, "altitude": 12}"#);

        assert_eq!(monitor.altitude_trend(), vec![10.5, 0.0, 12.0]);
    }

    #[test]
    fn test_traffic_summary() {
        let (_dir, handler, monitor) = create_test_monitor();
        assert_eq!(monitor.traffic_summary(), TrafficSummary::default());

        handler.handle(br#"{"traffic": {"total_bytes": 100}}"#);
        handler.handle(
            br#"{"traffic": {"total_bytes": 300, "top_apps": {
                "com.a": {"app_name": "A", "total_bytes": 10},
                "com.b": {"app_name": "B", "total_bytes": 200}}}}"#,
        );

        let summary = monitor.traffic_summary();
        assert_eq!(summary.records, 2);
        assert_eq!(summary.latest.unwrap().total_bytes, 300);
        let names: Vec<_> = summary.top_apps.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(names, vec!["com.b", "com.a"]);
    }

    #[test]
    fn test_telephony_entries_newest_first() {
        let (dir, _handler, monitor) = create_test_monitor();
        std::fs::write(
            dir.path().join("telephony_data.json"),
            r#"[{"timestamp": 1, "data": "a"}, {"timestamp": 2, "data": "b"}, {"timestamp": 3, "data": "c"}]"#,
        )
        .unwrap();

        let entries = monitor.telephony_entries(2);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].timestamp, 3);
        assert_eq!(entries[1].timestamp, 2);
    }

    #[test]
    fn test_telephony_missing_file_is_empty() {
        let (_dir, _handler, monitor) = create_test_monitor();
        assert!(monitor.telephony_entries(10).is_empty());
    }

    #[test]
    fn test_reset_keeps_position() {
        let (_dir, handler, monitor) = create_test_monitor();
        handler.handle(br#"{"latitude": 1.5, "longitude": 2.5}"#);

        monitor.reset_counters();

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.counter, 0);
        assert!(snapshot.history.is_empty());
        assert!((snapshot.position.latitude - 1.5).abs() < f64::EPSILON);
        assert_eq!(handler.handle(br#"{"latitude": 0, "longitude": 0}"#).to_string(), "OK:1");
    }

    #[test]
    fn test_clear_logs_keeps_store() {
        let (dir, handler, monitor) = create_test_monitor();
        handler.handle(br#"{"latitude": 1, "longitude": 2}"#);

        monitor.clear_logs().unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("location_data.json")).unwrap(),
            ""
        );
        assert_eq!(monitor.snapshot().counter, 1);
        assert_eq!(handler.handle(br#"{"latitude": 3, "longitude": 4}"#).to_string(), "OK:2");
    }

    #[test]
    fn test_clear_serialized_with_appends() {
        let (dir, handler, monitor) = create_test_monitor();
        let handler = Arc::new(handler);
        let ingest = Arc::clone(&handler);

        let writer = thread::spawn(move || {
            for i in 0..200 {
                ingest.handle(format!(r#"{{"latitude": {i}, "longitude": 0}}"#).as_bytes());
            }
        });
        for _ in 0..50 {
            monitor.clear_logs().unwrap();
            thread::yield_now();
        }
        writer.join().unwrap();

        // Each append writes the collection and the text log together, so a
        // clear can never land between them.
        let records = ArrayFile::new(dir.path().join("location_data.json")).load();
        let log = std::fs::read_to_string(dir.path().join("location_log.txt")).unwrap();
        assert_eq!(records.len(), log.matches("Record #").count());
        assert_eq!(handler.store().counter(), 200);
    }

    #[test]
    fn test_render_empty() {
        let (_dir, _handler, monitor) = create_test_monitor();

        let text = monitor.render(20);

        assert!(text.contains("Total Records: 0"));
        assert!(text.contains("Timestamp:     N/A"));
        assert!(text.contains("waiting for client"));
        assert!(text.contains("No records yet..."));
        assert!(!text.contains("=== TRAFFIC ==="));
    }

    #[test]
    fn test_render_with_data() {
        let (_dir, handler, monitor) = create_test_monitor();
        handler.handle(br#"{"latitude": 55.75, "longitude": 37.62, "altitude": 144.5}"#);
        handler.handle(br#"{"traffic": {"total_bytes": 42, "top_apps": {"com.x": {"total_bytes": 42}}}}"#);

        let text = monitor.render(20);

        assert!(text.contains("Total Records: 2"));
        assert!(text.contains("Latitude:      55.750000°"));
        assert!(text.contains("receiving data"));
        assert!(text.contains("55.7500"));
        assert!(text.contains("=== TRAFFIC ==="));
        assert!(text.contains("com.x"));
    }

    #[test]
    fn test_dashboard_recent_rows() {
        let (_dir, handler, monitor) = create_test_monitor();
        handler.handle(br#"{"latitude": 10.5, "longitude": 20.25, "altitude": 7}"#);
        handler.handle(br#"{"telephony": {"operator": "x"}}"#);

        let text = monitor.dashboard(5).to_string();
        let rows: Vec<&str> = text
            .lines()
            .skip_while(|line| !line.starts_with("=== RECENT RECORDS ==="))
            .skip(2)
            .take(2)
            .collect();

        assert!(rows[0].contains("telephony"));
        assert!(rows[0].contains(" - "));
        assert!(rows[1].contains("10.5000"));
        assert!(rows[1].contains("20.2500"));
        assert!(rows[1].contains("7.0"));
    }

    #[test]
    fn test_dashboard_telephony_section() {
        let (dir, _handler, monitor) = create_test_monitor();
        std::fs::write(
            dir.path().join("telephony_data.json"),
            r#"[{"timestamp": 0, "data": "cell 7"}]"#,
        )
        .unwrap();

        let text = monitor.render(5);

        assert!(text.contains("=== TELEPHONY ==="));
        assert!(text.contains(r#"N/A  "cell 7""#));
    }

    #[test]
    fn test_run_console_stops() {
        let (_dir, _handler, monitor) = create_test_monitor();
        let handle = MonitorHandle::new();
        handle.stop();
        let mut out = Vec::new();

        monitor
            .run_console(Duration::from_secs(60), 5, &handle, &mut out)
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("=== CURRENT POSITION ===").count(), 1);
    }

    #[test]
    fn test_run_admin_input() {
        let (dir, handler, monitor) = create_test_monitor();
        handler.handle(br#"{"latitude": 1, "longitude": 2}"#);
        let input = b"reset\n\nbogus\nclear\n".as_slice();
        let mut out = Vec::new();

        monitor.run_admin_input(input, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "Counter reset\nUnknown command: bogus\nLog files cleared\n"
        );
        assert_eq!(monitor.snapshot().counter, 0);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("location_log.txt")).unwrap(),
            ""
        );
    }
}
