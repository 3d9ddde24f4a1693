//! Incident input and result output.
//!
//! Input is a directory (searched recursively) or a single file of `.csv`
//! tables with a header row or `.json` arrays of objects. Output is one
//! `results_{model}_{technique}` file per run, CSV or JSON, using the
//! record's serialized field names.

use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::runner::Incident;
use crate::technique::ClassificationRecord;

/// Column that supplies [`Incident::id`].
pub const ID_COLUMN: &str = "id";

// ── Input ──────────────────────────────────────────────────────────

/// Load every incident under `path`, in file-name order.
///
/// Files with other extensions are ignored and empty files are skipped
/// with a warning. Finding no supported files, or no rows in them, is an
/// error.
pub fn load_incidents(path: impl AsRef<Path>) -> Result<Vec<Incident>, String> {
    let path = path.as_ref();
    let files = if path.is_file() {
        vec![path.to_path_buf()]
    } else if path.is_dir() {
        let mut files = Vec::new();
        collect_files(path, &mut files)?;
        files
    } else {
        return Err(format!("input path '{}' does not exist", path.display()));
    };

    let files: Vec<PathBuf> = files.into_iter().filter(|f| input_kind(f).is_some()).collect();
    if files.is_empty() {
        return Err(format!("no .csv or .json files found in '{}'", path.display()));
    }

    let mut incidents = Vec::new();
    for file in &files {
        let rows = match input_kind(file) {
            Some(InputKind::Csv) => read_csv(file)?,
            Some(InputKind::Json) => read_json(file)?,
            None => continue,
        };
        if rows.is_empty() {
            warn!("Skipping empty file {}", file.display());
            continue;
        }
        info!("Loaded {} row(s) from {}", rows.len(), file.display());
        incidents.extend(rows);
    }

    if incidents.is_empty() {
        return Err(format!("no incidents found in '{}'", path.display()));
    }
    Ok(incidents)
}

/// Check that every requested column appears in at least one incident.
pub fn validate_columns(incidents: &[Incident], columns: &[String]) -> Result<(), String> {
    if columns.is_empty() {
        return Err("no columns given".into());
    }
    let missing: Vec<&str> = columns
        .iter()
        .filter(|c| !incidents.iter().any(|i| i.columns().any(|have| have == c.as_str())))
        .map(String::as_str)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "column(s) not found in any input row: {}",
            missing.join(", ")
        ))
    }
}

enum InputKind {
    Csv,
    Json,
}

fn input_kind(path: &Path) -> Option<InputKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "csv" => Some(InputKind::Csv),
        "json" => Some(InputKind::Json),
        _ => None,
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), String> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| format!("failed to read '{}': {e}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();
    for entry in entries {
        if entry.is_dir() {
            collect_files(&entry, out)?;
        } else {
            out.push(entry);
        }
    }
    Ok(())
}

fn read_csv(path: &Path) -> Result<Vec<Incident>, String> {
    if fs::metadata(path).map(|m| m.len() == 0).unwrap_or(false) {
        return Ok(Vec::new());
    }
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| format!("failed to open '{}': {e}", path.display()))?;
    let headers = reader
        .headers()
        .map_err(|e| format!("failed to read header of '{}': {e}", path.display()))?
        .clone();

    let mut incidents = Vec::new();
    for (line, row) in reader.records().enumerate() {
        let row = row.map_err(|e| format!("{}: row {}: {e}", path.display(), line + 1))?;
        let mut incident = Incident::new(None);
        for (column, value) in headers.iter().zip(row.iter()) {
            incident.set(column, value);
        }
        incident.id = incident.get(ID_COLUMN).map(str::to_string);
        incidents.push(incident);
    }
    Ok(incidents)
}

fn read_json(path: &Path) -> Result<Vec<Incident>, String> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("failed to read '{}': {e}", path.display()))?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_str(&text)
        .map_err(|e| format!("failed to parse '{}': {e}", path.display()))?;
    let Value::Array(rows) = value else {
        return Err(format!(
            "'{}' must contain a JSON array of objects",
            path.display()
        ));
    };

    rows.into_iter()
        .enumerate()
        .map(|(i, row)| {
            let Value::Object(fields) = row else {
                return Err(format!("{}: element {i} is not an object", path.display()));
            };
            let mut incident = Incident::new(None);
            for (column, value) in fields {
                match value {
                    Value::Null => {}
                    Value::String(s) => incident.set(column, s),
                    other => incident.set(column, other.to_string()),
                }
            }
            incident.id = incident.get(ID_COLUMN).map(str::to_string);
            Ok(incident)
        })
        .collect()
}

// ── Output ─────────────────────────────────────────────────────────

/// Result file format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
        }
    }
}

const CSV_HEADER: [&str; 9] = [
    "id",
    "informacoes_das_colunas",
    "categoria",
    "explicacao",
    "rouge",
    "qualidade",
    "iteracao",
    "categoria_testada",
    "erro",
];

/// Flat CSV row: every column always present, `None` as an empty cell.
#[derive(Serialize)]
struct CsvRow<'a> {
    id: &'a str,
    incident_info: &'a str,
    category: &'a str,
    explanation: &'a str,
    rouge: Option<f64>,
    quality: Option<f64>,
    iteration: Option<u32>,
    tested_category: Option<&'a str>,
    error: bool,
}

impl<'a> From<&'a ClassificationRecord> for CsvRow<'a> {
    fn from(r: &'a ClassificationRecord) -> Self {
        Self {
            id: &r.id,
            incident_info: &r.incident_info,
            category: &r.category,
            explanation: &r.explanation,
            rouge: r.rouge,
            quality: r.quality,
            iteration: r.iteration,
            tested_category: r.tested_category.as_deref(),
            error: r.error,
        }
    }
}

/// Path of the result file for a model/technique pair.
pub fn results_path(dir: &Path, model: &str, technique: &str, format: OutputFormat) -> PathBuf {
    dir.join(format!(
        "results_{}_{}.{}",
        file_safe(model),
        file_safe(technique),
        format.extension()
    ))
}

/// Write `records` to `{dir}/results_{model}_{technique}.{ext}`, creating
/// `dir` if needed. A file is written even when there are no records.
pub fn save_results(
    records: &[ClassificationRecord],
    dir: &Path,
    model: &str,
    technique: &str,
    format: OutputFormat,
) -> Result<PathBuf, String> {
    fs::create_dir_all(dir).map_err(|e| format!("failed to create '{}': {e}", dir.display()))?;
    let path = results_path(dir, model, technique, format);

    match format {
        OutputFormat::Csv => write_csv(records, &path)?,
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(records)
                .map_err(|e| format!("failed to serialize results: {e}"))?;
            fs::write(&path, json)
                .map_err(|e| format!("failed to write '{}': {e}", path.display()))?;
        }
    }
    debug!("Wrote {} record(s) to {}", records.len(), path.display());
    Ok(path)
}

fn write_csv(records: &[ClassificationRecord], path: &Path) -> Result<(), String> {
    let err = |e: csv::Error| format!("failed to write '{}': {e}", path.display());
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(err)?;
    writer.write_record(CSV_HEADER).map_err(err)?;
    for record in records {
        writer.serialize(CsvRow::from(record)).map_err(err)?;
    }
    writer
        .flush()
        .map_err(|e| format!("failed to write '{}': {e}", path.display()))
}

/// Read a result file written by [`save_results`].
pub fn load_results(path: &Path) -> Result<Vec<ClassificationRecord>, String> {
    match input_kind(path) {
        Some(InputKind::Csv) => {
            let mut reader = csv::Reader::from_path(path)
                .map_err(|e| format!("failed to open '{}': {e}", path.display()))?;
            reader
                .deserialize()
                .map(|row| row.map_err(|e| format!("{}: {e}", path.display())))
                .collect()
        }
        Some(InputKind::Json) => {
            let text = fs::read_to_string(path)
                .map_err(|e| format!("failed to read '{}': {e}", path.display()))?;
            serde_json::from_str(&text).map_err(|e| format!("{}: {e}", path.display()))
        }
        None => Err(format!("unsupported result file '{}'", path.display())),
    }
}

/// Replace anything but ASCII alphanumerics, `-` and `.` with `_`.
pub fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, body).unwrap();
    }

    #[test]
    fn loads_csv_and_json_recursively_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.csv", "id,title,notes\nINC-2,Port scan,\n,Phish,\"x, y\"\n");
        write(
            dir.path(),
            "a/nested.json",
            r#"[{"id": 7, "title": "Ransomware", "severity": null, "hosts": ["h1"]}]"#,
        );
        write(dir.path(), "c.csv", "");
        write(dir.path(), "readme.txt", "ignored");

        let incidents = load_incidents(dir.path()).unwrap();
        assert_eq!(incidents.len(), 3);

        assert_eq!(incidents[0].id.as_deref(), Some("7"));
        assert_eq!(incidents[0].get("title"), Some("Ransomware"));
        assert_eq!(incidents[0].get("severity"), None);
        assert_eq!(incidents[0].get("hosts"), Some(r#"["h1"]"#));

        assert_eq!(incidents[1].id.as_deref(), Some("INC-2"));
        assert_eq!(incidents[1].get("notes"), None);
        assert_eq!(incidents[2].id, None);
        assert_eq!(incidents[2].get("notes"), Some("x, y"));
    }

    #[test]
    fn empty_or_unsupported_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_incidents(dir.path()).unwrap_err().contains("no .csv or .json"));
        write(dir.path(), "only.json", "[]");
        assert!(load_incidents(dir.path()).unwrap_err().contains("no incidents"));
        assert!(load_incidents(dir.path().join("absent")).is_err());
        write(dir.path(), "bad.json", r#"{"id": 1}"#);
        assert!(load_incidents(dir.path().join("bad.json")).is_err());
    }

    #[test]
    fn column_validation_names_missing_columns() {
        let incidents = vec![Incident::new(None).with_field("title", "x")];
        assert!(validate_columns(&incidents, &["title".into()]).is_ok());
        let err = validate_columns(&incidents, &["title".into(), "body".into(), "os".into()])
            .unwrap_err();
        assert!(err.ends_with("body, os"));
        assert!(validate_columns(&incidents, &[]).is_err());
    }

    fn records() -> Vec<ClassificationRecord> {
        vec![
            ClassificationRecord::new("INC-1", "title: a", "CAT2", "malware, clearly")
                .with_rouge(1.0)
                .with_iteration(2),
            ClassificationRecord::new("INC-2", "title: b", "UNKNOWN", "none")
                .with_tested_category("ALL")
                .with_rouge(0.0)
                .with_iteration(12),
            ClassificationRecord::failed("INC-3", "title: c", "timeout"),
        ]
    }

    #[test]
    fn csv_has_fixed_header_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_results(&records(), dir.path(), "openai/gpt-4o", "php", OutputFormat::Csv)
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "results_openai_gpt-4o_php.csv");

        let body = fs::read_to_string(&path).unwrap();
        assert_eq!(body.lines().next().unwrap(), CSV_HEADER.join(","));
        assert_eq!(load_results(&path).unwrap(), records());
    }

    #[test]
    fn json_omits_unset_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path =
            save_results(&records(), dir.path(), "mock", "htp", OutputFormat::Json).unwrap();
        let json: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(json[0].get("categoria_testada").is_none());
        assert_eq!(json[1]["categoria_testada"], "ALL");
        assert_eq!(json[2]["erro"], true);
        assert_eq!(load_results(&path).unwrap(), records());
    }

    #[test]
    fn empty_results_still_write_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let csv = save_results(&[], &out, "mock", "shp", OutputFormat::Csv).unwrap();
        assert_eq!(fs::read_to_string(csv).unwrap().trim(), CSV_HEADER.join(","));
        let json = save_results(&[], &out, "mock", "shp", OutputFormat::Json).unwrap();
        assert_eq!(fs::read_to_string(json).unwrap(), "[]");
    }
}
