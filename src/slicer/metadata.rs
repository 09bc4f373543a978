//! Reads the print estimate the slicer embeds as comments in its G-code.
//!
//! Only three comment lines matter; the toolpath body is skipped. Anything
//! unreadable or malformed yields [`PrintEstimate::default`] instead of an
//! error, since the slice itself already succeeded by the time this runs.

use std::io::{self, BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};

const PRINT_TIME_KEY: &str = "; estimated printing time";
const FILAMENT_GRAMS_KEY: &str = "; total filament used [g]";
const FILAMENT_COST_KEY: &str = "; total filament cost";

/// Figures extracted from a finished slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintEstimate {
    pub print_time: String,
    pub material_grams: f64,
    pub cost: f64,
}

impl Default for PrintEstimate {
    fn default() -> Self {
        Self {
            print_time: "0h 0m".to_string(),
            material_grams: 0.0,
            cost: 0.0,
        }
    }
}

/// Reads the estimate from a G-code file on disk.
pub fn read_print_estimate(path: &Path) -> PrintEstimate {
    let parsed = std::fs::File::open(path).and_then(|f| parse_print_estimate(BufReader::new(f)));
    match parsed {
        Ok(estimate) => estimate,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not read print estimate, using defaults");
            PrintEstimate::default()
        }
    }
}

/// Scans `reader` once. Fails on I/O errors and on unparsable numeric values.
pub fn parse_print_estimate(reader: impl BufRead) -> io::Result<PrintEstimate> {
    let mut estimate = PrintEstimate::default();

    for line in reader.lines() {
        let line = line?;
        if line.starts_with(PRINT_TIME_KEY) {
            estimate.print_time = value_of(&line)?.to_string();
        } else if line.starts_with(FILAMENT_GRAMS_KEY) {
            estimate.material_grams = parse_number(value_of(&line)?)?;
        } else if line.starts_with(FILAMENT_COST_KEY) {
            estimate.cost = parse_number(strip_currency(value_of(&line)?))?;
        }
    }

    Ok(estimate)
}

fn value_of(line: &str) -> io::Result<&str> {
    line.split_once('=')
        .map(|(_, value)| value.trim())
        .ok_or_else(|| invalid(format!("missing '=' in {line:?}")))
}

fn strip_currency(value: &str) -> &str {
    value
        .trim_matches(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
        .trim()
}

fn parse_number(value: &str) -> io::Result<f64> {
    value
        .parse::<f64>()
        .map_err(|e| invalid(format!("bad number {value:?}: {e}")))
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    const GCODE: &str = "\
G1 X10 Y10 E0.5
; some unrelated comment = 12
; filament used [mm] = 1234.5
; total filament used [g] = 12.34
; total filament cost = $0.31
; estimated printing time (normal mode) = 1h 23m 5s
; estimated printing time (silent mode) = 1h 30m 0s
";

    #[test]
    fn extracts_all_three_fields() {
        let estimate = parse_print_estimate(Cursor::new(GCODE)).unwrap();
        assert_eq!(estimate.material_grams, 12.34);
        assert_eq!(estimate.cost, 0.31);
        // Last matching line wins.
        assert_eq!(estimate.print_time, "1h 30m 0s");
    }

    #[test]
    fn missing_lines_yield_defaults() {
        let estimate = parse_print_estimate(Cursor::new("G28\nG1 X0 Y0\n")).unwrap();
        assert_eq!(estimate, PrintEstimate::default());
        assert_eq!(estimate.print_time, "0h 0m");
    }

    #[test]
    fn currency_symbols_are_stripped() {
        for raw in ["$1.50", "1.50 €", "1.50"] {
            let gcode = format!("; total filament cost = {raw}\n");
            let estimate = parse_print_estimate(Cursor::new(gcode)).unwrap();
            assert_eq!(estimate.cost, 1.5, "{raw}");
        }
    }

    #[test]
    fn malformed_number_is_an_error_for_the_parser() {
        let gcode = "; total filament used [g] = lots\n";
        assert!(parse_print_estimate(Cursor::new(gcode)).is_err());
    }

    #[test]
    fn malformed_file_reads_as_all_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("output.gcode");
        std::fs::write(
            &path,
            "; estimated printing time = 2h 0m\n; total filament used [g] = lots\n",
        )
        .unwrap();

        assert_eq!(read_print_estimate(&path), PrintEstimate::default());
    }

    #[test]
    fn missing_file_reads_as_all_defaults() {
        let estimate = read_print_estimate(Path::new("/nonexistent/output.gcode"));
        assert_eq!(estimate, PrintEstimate::default());
    }

    #[test]
    fn reads_file_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("output.gcode");
        std::fs::write(&path, GCODE).unwrap();

        let estimate = read_print_estimate(&path);
        assert_eq!(estimate.material_grams, 12.34);
    }
}
