//! Persistence module: writes collected lines to a CSV file.
//!
//! Saving never fails loudly. The result is a [`SaveOutcome`] whose display
//! text is the status message to show the user.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, TimeZone};
use tracing::{info, warn};

/// Minimum share of printable characters for a line to count as data.
const PRINTABLE_THRESHOLD: f64 = 0.7;

/// Suffix format used when the output file already exists.
const COLLISION_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Counter suffixes tried after the timestamped name is taken.
const MAX_NAME_ATTEMPTS: u32 = 1_000;

/// Errors that can occur while writing the CSV file.
#[derive(Debug)]
pub enum PersistError {
    /// Creating or writing the file failed
    Io(io::Error),

    /// The CSV encoder failed
    Csv(csv::Error),
}

impl std::fmt::Display for PersistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistError::Io(e) => write!(f, "{}", e),
            PersistError::Csv(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for PersistError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PersistError::Io(e) => Some(e),
            PersistError::Csv(e) => Some(e),
        }
    }
}

impl From<io::Error> for PersistError {
    fn from(err: io::Error) -> Self {
        PersistError::Io(err)
    }
}

impl From<csv::Error> for PersistError {
    fn from(err: csv::Error) -> Self {
        PersistError::Csv(err)
    }
}

/// Result of a save attempt.
#[derive(Debug)]
pub enum SaveOutcome {
    /// The file was written
    Saved { path: PathBuf, rows: usize },

    /// No line was collected, so no file was created
    NothingToSave,

    /// Writing failed
    Failed { path: PathBuf, error: PersistError },
}

impl SaveOutcome {
    /// Path of the written file, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            SaveOutcome::Saved { path, .. } => Some(path),
            _ => None,
        }
    }
}

impl std::fmt::Display for SaveOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaveOutcome::Saved { path, .. } => write!(f, "Data saved to {}", path.display()),
            SaveOutcome::NothingToSave => write!(f, "No data to save"),
            SaveOutcome::Failed { error, .. } => write!(f, "Error saving data: {}", error),
        }
    }
}

/// Whether `c` is in the standard printable set: ASCII letters, digits,
/// punctuation, and space, tab, LF, CR, VT, FF.
fn is_printable(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || c.is_ascii_punctuation()
        || matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0b' | '\x0c')
}

/// A line is garbled if it is empty or less than 70% printable.
pub fn is_garbled(line: &str) -> bool {
    let total = line.chars().count();
    if total == 0 {
        return true;
    }
    let printable = line.chars().filter(|c| is_printable(*c)).count();
    (printable as f64 / total as f64) < PRINTABLE_THRESHOLD
}

/// The lines that get written: everything, minus a garbled first line.
///
/// Only the first line is checked; later lines are kept as received.
pub fn retained_lines(lines: &[String]) -> &[String] {
    match lines.first() {
        Some(first) if is_garbled(first) => &lines[1..],
        _ => lines,
    }
}

/// Candidate output path for the given attempt.
///
/// Attempt 0 is `requested` itself. Later attempts insert a timestamp, then a
/// counter: `data.csv`, `data_2024-03-01_14-05-09.csv`,
/// `data_2024-03-01_14-05-09_1.csv`, ...
pub fn candidate_path<Tz: TimeZone>(requested: &Path, now: &DateTime<Tz>, attempt: u32) -> PathBuf
where
    Tz::Offset: std::fmt::Display,
{
    if attempt == 0 {
        return requested.to_path_buf();
    }

    let stem = requested
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut base = format!("{}_{}", stem, now.format(COLLISION_TIMESTAMP_FORMAT));
    if attempt > 1 {
        base = format!("{}_{}", base, attempt - 1);
    }
    let file_name = match requested.extension() {
        Some(ext) => format!("{}.{}", base, ext.to_string_lossy()),
        None => base,
    };

    requested.with_file_name(file_name)
}

/// Create a new output file next to `requested` without touching existing files.
///
/// Each candidate from [`candidate_path`] is opened with `create_new`, so the
/// existence check and the create are a single step.
pub fn create_output_file<Tz: TimeZone>(
    requested: &Path,
    now: &DateTime<Tz>,
) -> io::Result<(PathBuf, File)>
where
    Tz::Offset: std::fmt::Display,
{
    for attempt in 0..=MAX_NAME_ATTEMPTS {
        let path = candidate_path(requested, now, attempt);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free file name for {}", requested.display()),
    ))
}

/// Write each line as one CSV row, splitting fields on commas.
///
/// Returns the number of rows written.
pub fn write_csv<W: Write>(out: W, lines: &[String]) -> Result<usize, PersistError> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .terminator(csv::Terminator::CRLF)
        .from_writer(out);

    for line in lines {
        writer.write_record(line.split(','))?;
    }
    writer.flush()?;

    Ok(lines.len())
}

/// Save a run's lines to `requested`, never overwriting an existing file.
///
/// A garbled first line is dropped. Nothing is written when `lines` is empty.
pub fn save_lines(lines: &[String], requested: &Path) -> SaveOutcome {
    if lines.is_empty() {
        return SaveOutcome::NothingToSave;
    }

    let retained = retained_lines(lines);
    if retained.len() < lines.len() {
        info!(line = %lines[0], "Dropping garbled first line");
    }

    let (path, file) = match create_output_file(requested, &Local::now()) {
        Ok(created) => created,
        Err(e) => {
            warn!(path = %requested.display(), error = %e, "Failed to create output file");
            return SaveOutcome::Failed {
                path: requested.to_path_buf(),
                error: PersistError::Io(e),
            };
        }
    };

    match write_csv(file, retained) {
        Ok(rows) => {
            info!(path = %path.display(), rows = rows, "Data saved");
            SaveOutcome::Saved { path, rows }
        }
        Err(error) => {
            warn!(path = %path.display(), error = %error, "Failed to save data");
            SaveOutcome::Failed { path, error }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn read_rows(path: &Path) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(|f| f.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_numeric_line_is_not_garbled() {
        assert!(!is_garbled("12,34,56"));
        assert!(!is_garbled("time (ms),strain"));
        assert!(!is_garbled("\tA"));
    }

    #[test]
    fn test_empty_line_is_garbled() {
        assert!(is_garbled(""));
    }

    #[test]
    fn test_mostly_replacement_chars_is_garbled() {
        assert!(is_garbled("\u{fffd}\u{fffd}\u{fffd}1"));
        assert!(is_garbled("\u{0}\u{1}\u{2}ab"));
    }

    #[test]
    fn test_garbled_threshold_boundary() {
        // 7 of 10 printable is exactly 70%, which is kept
        assert!(!is_garbled("abcdefg\u{fffd}\u{fffd}\u{fffd}"));
        // 6 of 10 is below
        assert!(is_garbled("abcdef\u{fffd}\u{fffd}\u{fffd}\u{fffd}"));
    }

    #[test]
    fn test_retained_lines_drops_only_garbled_first() {
        let data = lines(&["\u{fffd}\u{fffd}\u{fffd}", "1,2", "\u{fffd}\u{fffd}"]);
        assert_eq!(retained_lines(&data), &data[1..]);

        let data = lines(&["a,b", "1,2"]);
        assert_eq!(retained_lines(&data), &data[..]);

        assert!(retained_lines(&[]).is_empty());
    }

    #[test]
    fn test_candidate_path_sequence() {
        let dir = TempDir::new().unwrap();
        let requested = dir.path().join("data.csv");
        let now = Local.with_ymd_and_hms(2024, 3, 1, 14, 5, 9).unwrap();

        assert_eq!(candidate_path(&requested, &now, 0), requested);
        assert_eq!(
            candidate_path(&requested, &now, 1),
            dir.path().join("data_2024-03-01_14-05-09.csv")
        );
        assert_eq!(
            candidate_path(&requested, &now, 2),
            dir.path().join("data_2024-03-01_14-05-09_1.csv")
        );

        let bare = dir.path().join("data");
        assert_eq!(
            candidate_path(&bare, &now, 1),
            dir.path().join("data_2024-03-01_14-05-09")
        );
    }

    #[test]
    fn test_create_output_file_skips_taken_names() {
        let dir = TempDir::new().unwrap();
        let requested = dir.path().join("data.csv");
        let now = Local.with_ymd_and_hms(2024, 3, 1, 14, 5, 9).unwrap();

        let (first, _) = create_output_file(&requested, &now).unwrap();
        assert_eq!(first, requested);

        fs::write(dir.path().join("data_2024-03-01_14-05-09.csv"), "taken").unwrap();
        let (second, _) = create_output_file(&requested, &now).unwrap();
        assert_eq!(second, dir.path().join("data_2024-03-01_14-05-09_1.csv"));

        // Existing files are left as they were
        assert_eq!(
            fs::read_to_string(dir.path().join("data_2024-03-01_14-05-09.csv")).unwrap(),
            "taken"
        );
    }

    #[test]
    fn test_write_csv_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows.csv");
        let data = lines(&["1,2,3", "4,5,6", "7,8,9", "-1.5,0,1e3"]);

        let rows = write_csv(File::create(&path).unwrap(), &data).unwrap();
        assert_eq!(rows, 4);

        let read = read_rows(&path);
        assert_eq!(read.len(), 4);
        for (row, line) in read.iter().zip(&data) {
            assert_eq!(row.len(), 3);
            assert_eq!(row.join(","), *line);
        }
    }

    #[test]
    fn test_write_csv_uses_crlf_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows.csv");

        write_csv(File::create(&path).unwrap(), &lines(&["a,b", "1,2"])).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "a,b\r\n1,2\r\n");
    }

    #[test]
    fn test_write_csv_quotes_when_needed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows.csv");
        let data = lines(&["say \"hi\",2", "single"]);

        write_csv(File::create(&path).unwrap(), &data).unwrap();
        assert_eq!(
            read_rows(&path),
            vec![vec!["say \"hi\"".to_string(), "2".to_string()], vec!["single".to_string()]]
        );
    }

    #[test]
    fn test_save_lines_drops_garbled_header() {
        let dir = TempDir::new().unwrap();
        let requested = dir.path().join("data.csv");
        let data = lines(&["\u{fffd}\u{fffd}\u{fffd}\u{fffd}", "1,10", "2,20"]);

        let outcome = save_lines(&data, &requested);
        match &outcome {
            SaveOutcome::Saved { path, rows } => {
                assert_eq!(path, &requested);
                assert_eq!(*rows, 2);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(read_rows(&requested), vec![vec!["1", "10"], vec!["2", "20"]]);
        assert!(outcome.to_string().starts_with("Data saved to "));
    }

    #[test]
    fn test_save_lines_keeps_clean_header() {
        let dir = TempDir::new().unwrap();
        let requested = dir.path().join("data.csv");
        let data = lines(&["time,value", "1,10"]);

        save_lines(&data, &requested);
        assert_eq!(
            read_rows(&requested),
            vec![vec!["time", "value"], vec!["1", "10"]]
        );
    }

    #[test]
    fn test_save_twice_creates_distinct_files() {
        let dir = TempDir::new().unwrap();
        let requested = dir.path().join("data.csv");

        let first = save_lines(&lines(&["a,b", "1,2"]), &requested);
        let second = save_lines(&lines(&["c,d", "3,4"]), &requested);

        let first_path = first.path().unwrap().to_path_buf();
        let second_path = second.path().unwrap().to_path_buf();
        assert_eq!(first_path, requested);
        assert_ne!(first_path, second_path);

        let name = second_path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("data_"));
        assert!(name.ends_with(".csv"));
        // data_YYYY-MM-DD_HH-MM-SS.csv
        assert_eq!(name.len(), "data_".len() + 19 + ".csv".len());

        assert_eq!(read_rows(&first_path), vec![vec!["a", "b"], vec!["1", "2"]]);
        assert_eq!(read_rows(&second_path), vec![vec!["c", "d"], vec!["3", "4"]]);
    }

    #[test]
    fn test_repeated_saves_never_overwrite() {
        let dir = TempDir::new().unwrap();
        let requested = dir.path().join("data.csv");

        let outcomes: Vec<SaveOutcome> = (0..3)
            .map(|i| {
                let line = format!("run,{}", i);
                save_lines(&lines(&[line.as_str()]), &requested)
            })
            .collect();
        let paths: Vec<PathBuf> = outcomes
            .iter()
            .map(|o| o.path().unwrap().to_path_buf())
            .collect();

        assert_eq!(paths[0], requested);
        assert_ne!(paths[0], paths[1]);
        assert_ne!(paths[1], paths[2]);
        assert_ne!(paths[0], paths[2]);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 3);

        for (i, path) in paths.iter().enumerate() {
            assert_eq!(read_rows(path), vec![vec!["run".to_string(), i.to_string()]]);
        }
    }

    #[test]
    fn test_save_nothing() {
        let dir = TempDir::new().unwrap();
        let requested = dir.path().join("data.csv");

        let outcome = save_lines(&[], &requested);
        assert!(matches!(outcome, SaveOutcome::NothingToSave));
        assert_eq!(outcome.to_string(), "No data to save");
        assert!(!requested.exists());
    }

    #[test]
    fn test_save_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let requested = dir.path().join("missing-dir").join("data.csv");

        let outcome = save_lines(&lines(&["1,2"]), &requested);
        assert!(matches!(outcome, SaveOutcome::Failed { .. }));
        assert!(outcome.to_string().starts_with("Error saving data: "));
    }
}
