//! Dataset loading
//!
//! Reads a split of the task dataset from JSON-lines files and turns tasks
//! into prompt rows. Schema problems are fatal and reported before any
//! generation work starts.

use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use swefix_common::config::DatasetConfig;
use swefix_common::{PromptRow, Result, SwefixError, Task};
use swefix_worker::prompt_for;
use tracing::{debug, info, warn};

/// Columns every dataset must provide
pub const REQUIRED_COLUMNS: [&str; 2] = ["instance_id", "problem_statement"];

/// Tasks of one split
#[derive(Debug, Clone)]
pub struct Dataset {
    pub tasks: Vec<Task>,

    /// Union of the columns seen across all rows
    pub columns: BTreeSet<String>,

    /// Files the tasks were read from
    pub files: Vec<PathBuf>,
}

/// Raw row with its origin, kept for error messages
struct RawRow {
    file: PathBuf,
    line: usize,
    fields: Map<String, Value>,
}

/// Glob pattern for the configured split
pub fn split_pattern(config: &DatasetConfig) -> PathBuf {
    config
        .path
        .join(config.file_pattern.replace("{split}", config.split.as_str()))
}

/// Load every task of the configured split
pub fn load_tasks(config: &DatasetConfig) -> Result<Dataset> {
    let pattern = split_pattern(config);
    let pattern_str = pattern
        .to_str()
        .ok_or_else(|| SwefixError::dataset(format!("Dataset path {} is not valid UTF-8", pattern.display())))?;

    info!("Reading dataset files matching {}", pattern_str);

    let mut files: Vec<PathBuf> = glob::glob(pattern_str)
        .map_err(|e| SwefixError::dataset(format!("Invalid dataset pattern {}: {}", pattern_str, e)))?
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(SwefixError::dataset(format!(
            "No dataset files match {}",
            pattern_str
        )));
    }

    let mut rows = Vec::new();
    let mut columns = BTreeSet::new();
    for file in &files {
        read_rows(file, &mut rows, &mut columns)?;
    }

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|column| !columns.contains(**column))
        .map(|column| column.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(SwefixError::MissingColumns {
            missing,
            found: columns.into_iter().collect(),
        });
    }

    let tasks = rows
        .into_iter()
        .map(into_task)
        .collect::<Result<Vec<Task>>>()?;

    let mut seen = HashSet::with_capacity(tasks.len());
    for task in &tasks {
        if !seen.insert(task.instance_id.as_str()) {
            warn!("Duplicate instance_id in dataset: {}", task.instance_id);
        }
    }

    info!("Dataset loaded: {} tasks from {} file(s)", tasks.len(), files.len());

    Ok(Dataset {
        tasks,
        columns,
        files,
    })
}

fn read_rows(file: &Path, rows: &mut Vec<RawRow>, columns: &mut BTreeSet<String>) -> Result<()> {
    let reader = BufReader::new(File::open(file).map_err(|e| {
        SwefixError::dataset(format!("Failed to open {}: {}", file.display(), e))
    })?);

    let before = rows.len();
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| {
            SwefixError::dataset(format!("Failed to read {}: {}", file.display(), e))
        })?;
        if line.trim().is_empty() {
            continue;
        }

        let value: Value = serde_json::from_str(&line).map_err(|e| {
            SwefixError::dataset(format!("{}:{}: invalid JSON: {}", file.display(), index + 1, e))
        })?;
        let Value::Object(fields) = value else {
            return Err(SwefixError::dataset(format!(
                "{}:{}: expected a JSON object",
                file.display(),
                index + 1
            )));
        };

        columns.extend(fields.keys().cloned());
        rows.push(RawRow {
            file: file.to_path_buf(),
            line: index + 1,
            fields,
        });
    }

    debug!("Read {} rows from {}", rows.len() - before, file.display());
    Ok(())
}

fn into_task(mut row: RawRow) -> Result<Task> {
    let instance_id = match row.fields.remove("instance_id") {
        Some(Value::String(id)) => id,
        _ => {
            return Err(SwefixError::dataset(format!(
                "{}:{}: instance_id must be a string",
                row.file.display(),
                row.line
            )))
        }
    };

    let problem_statement = match row.fields.remove("problem_statement") {
        Some(Value::String(statement)) => Some(statement),
        None | Some(Value::Null) => None,
        Some(_) => {
            return Err(SwefixError::dataset(format!(
                "{}:{}: problem_statement must be a string or null",
                row.file.display(),
                row.line
            )))
        }
    };

    Ok(Task {
        instance_id,
        problem_statement,
    })
}

/// Format prompts, dropping tasks without a problem statement
///
/// Returns the prompt rows in input order and the number of dropped tasks.
pub fn build_prompts(tasks: Vec<Task>) -> (Vec<PromptRow>, usize) {
    let total = tasks.len();
    let rows: Vec<PromptRow> = tasks
        .into_iter()
        .filter_map(|task| {
            prompt_for(task.problem_statement.as_deref()).map(|prompt| PromptRow {
                instance_id: task.instance_id,
                prompt,
            })
        })
        .collect();
    let dropped = total - rows.len();
    (rows, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use swefix_common::DatasetSplit;

    fn dataset_config(root: &Path, split: DatasetSplit) -> DatasetConfig {
        DatasetConfig {
            path: root.to_path_buf(),
            split,
            ..Default::default()
        }
    }

    fn write_split(root: &Path, name: &str, lines: &[&str]) {
        let data = root.join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join(name), lines.join("\n")).unwrap();
    }

    #[test]
    fn test_load_tasks_reads_matching_split_only() {
        let dir = tempfile::tempdir().unwrap();
        write_split(
            dir.path(),
            "test-00000.jsonl",
            &[
                r#"{"instance_id": "a", "problem_statement": "fix off-by-one", "repo": "x/y"}"#,
                "",
                r#"{"instance_id": "b", "problem_statement": null}"#,
            ],
        );
        write_split(
            dir.path(),
            "test-00001.jsonl",
            &[r#"{"instance_id": "c"}"#],
        );
        write_split(
            dir.path(),
            "train-00000.jsonl",
            &[r#"{"instance_id": "t", "problem_statement": "train row"}"#],
        );

        let dataset = load_tasks(&dataset_config(dir.path(), DatasetSplit::Test)).unwrap();

        let ids: Vec<&str> = dataset.tasks.iter().map(|t| t.instance_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(dataset.files.len(), 2);
        assert!(dataset.columns.contains("repo"));
        assert_eq!(dataset.tasks[1].problem_statement, None);
        assert_eq!(dataset.tasks[2].problem_statement, None);
    }

    #[test]
    fn test_missing_columns_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_split(
            dir.path(),
            "dev.jsonl",
            &[r#"{"instance_id": "a", "text": "no statement column"}"#],
        );

        let err = load_tasks(&dataset_config(dir.path(), DatasetSplit::Dev)).unwrap_err();

        match err {
            SwefixError::MissingColumns { missing, found } => {
                assert_eq!(missing, vec!["problem_statement".to_string()]);
                assert_eq!(found, vec!["instance_id".to_string(), "text".to_string()]);
            }
            other => panic!("expected missing columns, got {:?}", other),
        }
    }

    #[test]
    fn test_no_files_is_fatal() {
        let dir = tempfile::tempdir().unwrap();

        let err = load_tasks(&dataset_config(dir.path(), DatasetSplit::Test)).unwrap_err();

        assert!(matches!(err, SwefixError::Dataset(_)));
    }

    #[test]
    fn test_non_string_instance_id_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_split(
            dir.path(),
            "test.jsonl",
            &[r#"{"instance_id": 7, "problem_statement": "x"}"#],
        );

        let err = load_tasks(&dataset_config(dir.path(), DatasetSplit::Test)).unwrap_err();

        assert!(err.to_string().contains("test.jsonl:1"));
    }

    #[test]
    fn test_build_prompts_drops_empty_statements() {
        let tasks = vec![
            Task::new("a", "fix off-by-one in loop bound"),
            Task::new("b", ""),
            Task {
                instance_id: "c".to_string(),
                problem_statement: None,
            },
        ];

        let (rows, dropped) = build_prompts(tasks);

        assert_eq!(dropped, 2);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].instance_id, "a");
        assert!(rows[0].prompt.contains("fix off-by-one in loop bound"));
    }
}
