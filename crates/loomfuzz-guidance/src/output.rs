//! On-disk campaign state: the output directory layout, seed loading, and
//! the binary branch-hit-count snapshot.
//!
//! Layout under the configured output root:
//!
//! ```text
//! corpus/             admitted inputs (bytes, or .structure/.value pairs)
//! failures/           failing inputs + .stacktrace siblings
//! plot_data           CSV of campaign progress over time
//! branch_hit_counts   optional binary counter snapshot
//! fuzz.log            human-readable event log
//! session.json        end-of-session summary
//! ```

use crate::choice::SplitRecord;
use crate::corpus::{InputBytes, SavedInput};
use crate::coverage::CoverageMap;
use crate::failures::FailureInfo;
use log::debug;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed split seed file {path}: {reason}")]
    BadSeedFile { path: PathBuf, reason: String },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> OutputError + '_ {
    move |source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// File stem for an input id: `id_000042`.
pub fn input_file_name(id: u64) -> String {
    format!("id_{:06}", id)
}

/// Handles all writes below the output root.
pub struct OutputDir {
    root: PathBuf,
    corpus_dir: PathBuf,
    failures_dir: PathBuf,
    plot: BufWriter<File>,
    log: BufWriter<File>,
}

impl OutputDir {
    /// Create the directory tree and the append-mode report files.
    pub fn create(root: &Path) -> Result<Self, OutputError> {
        let corpus_dir = root.join("corpus");
        let failures_dir = root.join("failures");
        fs::create_dir_all(&corpus_dir).map_err(io_err(&corpus_dir))?;
        fs::create_dir_all(&failures_dir).map_err(io_err(&failures_dir))?;

        let plot_path = root.join("plot_data");
        let mut plot = BufWriter::new(File::create(&plot_path).map_err(io_err(&plot_path))?);
        writeln!(
            plot,
            "# elapsed_ms, total_execs, valid_execs, corpus_size, covered_branches, h1, h2"
        )
        .map_err(io_err(&plot_path))?;

        let log_path = root.join("fuzz.log");
        let log = BufWriter::new(File::create(&log_path).map_err(io_err(&log_path))?);

        Ok(Self {
            root: root.to_path_buf(),
            corpus_dir,
            failures_dir,
            plot,
            log,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn failures_dir(&self) -> &Path {
        &self.failures_dir
    }

    /// Persist an admitted input's bytes and metadata sidecar.
    pub fn save_corpus_input(&mut self, input: &SavedInput) -> Result<(), OutputError> {
        let stem = self.corpus_dir.join(input_file_name(input.id));
        write_input_bytes(&stem, &input.bytes)?;

        let meta_path = stem.with_extension("json");
        let meta = serde_json::to_vec_pretty(input)?;
        fs::write(&meta_path, meta).map_err(io_err(&meta_path))?;
        debug!("saved corpus input {}", input.id);
        Ok(())
    }

    /// Persist a failing input and its stack trace sibling.
    pub fn save_failure(
        &mut self,
        id: u64,
        bytes: &InputBytes,
        failure: &FailureInfo,
    ) -> Result<(), OutputError> {
        let stem = self.failures_dir.join(input_file_name(id));
        write_input_bytes(&stem, bytes)?;

        let trace_path = stem.with_extension("stacktrace");
        let body = format!(
            "{}: {}\n{}\n",
            failure.class, failure.message, failure.stacktrace
        );
        fs::write(&trace_path, body).map_err(io_err(&trace_path))?;
        Ok(())
    }

    /// Append one progress row to plot_data. The first column is elapsed
    /// campaign time; wall-clock stamps would break run-to-run
    /// reproducibility of the remaining columns.
    #[allow(clippy::too_many_arguments)]
    pub fn append_plot_row(
        &mut self,
        elapsed_ms: u64,
        total_execs: u64,
        valid_execs: u64,
        corpus_size: usize,
        covered_branches: usize,
        h1: f64,
        h2: f64,
    ) -> Result<(), OutputError> {
        let path = self.root.join("plot_data");
        writeln!(
            self.plot,
            "{}, {}, {}, {}, {}, {:.6}, {:.6}",
            elapsed_ms, total_execs, valid_execs, corpus_size, covered_branches, h1, h2
        )
        .map_err(io_err(&path))?;
        self.plot.flush().map_err(io_err(&path))?;
        Ok(())
    }

    /// Append a line to fuzz.log, stamped with elapsed campaign time.
    pub fn log_line(&mut self, elapsed_ms: u128, message: &str) -> Result<(), OutputError> {
        let path = self.root.join("fuzz.log");
        writeln!(self.log, "[{:>10} ms] {}", elapsed_ms, message).map_err(io_err(&path))?;
        self.log.flush().map_err(io_err(&path))?;
        Ok(())
    }

    /// Persist the cumulative counters as `(u32 branch_id, u32 hits)`
    /// little-endian pairs for non-zero cells, in branch-id order.
    pub fn write_branch_hit_counts(&self, map: &CoverageMap) -> Result<(), OutputError> {
        let path = self.root.join("branch_hit_counts");
        let mut indices: Vec<usize> = map.non_zero_indices().to_vec();
        indices.sort_unstable();

        let mut body = Vec::with_capacity(indices.len() * 8);
        for idx in indices {
            let hits = map.value_at(idx).min(u64::from(u32::MAX)) as u32;
            body.extend_from_slice(&(idx as u32).to_le_bytes());
            body.extend_from_slice(&hits.to_le_bytes());
        }
        fs::write(&path, body).map_err(io_err(&path))
    }

    /// Write the JSON session summary.
    pub fn write_session_summary(&self, summary: &impl serde::Serialize) -> Result<(), OutputError> {
        let path = self.root.join("session.json");
        let body = serde_json::to_vec_pretty(summary)?;
        fs::write(&path, body).map_err(io_err(&path))
    }
}

fn write_input_bytes(stem: &Path, bytes: &InputBytes) -> Result<(), OutputError> {
    match bytes {
        InputBytes::Linear(data) => fs::write(stem, data).map_err(io_err(stem)),
        InputBytes::Split(record) => {
            let s_path = stem.with_extension("structure");
            let v_path = stem.with_extension("value");
            fs::write(&s_path, &record.structure).map_err(io_err(&s_path))?;
            fs::write(&v_path, &record.value).map_err(io_err(&v_path))
        }
    }
}

/// Read back a branch-hit-count snapshot. Used by reproduction tooling and
/// tests.
pub fn read_branch_hit_counts(path: &Path) -> Result<Vec<(u32, u32)>, OutputError> {
    let mut body = Vec::new();
    File::open(path)
        .map_err(io_err(path))?
        .read_to_end(&mut body)
        .map_err(io_err(path))?;
    let mut pairs = Vec::with_capacity(body.len() / 8);
    for chunk in body.chunks_exact(8) {
        let id = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let hits = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
        pairs.push((id, hits));
    }
    Ok(pairs)
}

/// Load seed inputs from a directory, sorted by file name.
///
/// Linear engines read each file as raw bytes. Split engines accept
/// `<name>.structure` / `<name>.value` pairs, or a single file whose first
/// four bytes are the big-endian structural length followed by the
/// structure and value bytes concatenated.
pub fn load_seed_inputs(dir: &Path, split: bool) -> Result<Vec<InputBytes>, OutputError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(io_err(dir))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err(dir))?
        .into_iter()
        .map(|entry| entry.path())
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    let mut seeds = Vec::new();
    for path in &paths {
        let bytes = fs::read(path).map_err(io_err(path))?;
        if !split {
            seeds.push(InputBytes::Linear(bytes));
            continue;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some("value") => {
                // Consumed as the sibling of its .structure file.
                continue;
            }
            Some("structure") => {
                let value_path = path.with_extension("value");
                let value = fs::read(&value_path).map_err(io_err(&value_path))?;
                seeds.push(InputBytes::Split(SplitRecord {
                    structure: bytes,
                    value,
                    access_log: Vec::new(),
                }));
            }
            _ => seeds.push(parse_prefixed_split_seed(path, &bytes)?),
        }
    }
    Ok(seeds)
}

fn parse_prefixed_split_seed(path: &Path, bytes: &[u8]) -> Result<InputBytes, OutputError> {
    if bytes.len() < 4 {
        return Err(OutputError::BadSeedFile {
            path: path.to_path_buf(),
            reason: "missing 4-byte structural length prefix".to_string(),
        });
    }
    let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let rest = &bytes[4..];
    if rest.len() < len {
        return Err(OutputError::BadSeedFile {
            path: path.to_path_buf(),
            reason: format!(
                "structural length {} exceeds remaining {} bytes",
                len,
                rest.len()
            ),
        });
    }
    Ok(InputBytes::Split(SplitRecord {
        structure: rest[..len].to_vec(),
        value: rest[len..].to_vec(),
        access_log: Vec::new(),
    }))
}
