//! The on-disk layout of a fuzzing campaign.
//!
//! ```text
//! out/
//!   corpus/      saved inputs, one raw byte file per id (`id_000000`, ...)
//!   failures/    failure-triggering inputs, same naming
//!   plot_data    append-only CSV, one line per stats refresh
//!   fuzz.log     human-readable guidance journal
//!   .cur_input   the input of the current trial, overwritten per mutation
//! ```
//!
//! Directory names follow AFL. Prior contents of `corpus/` and `failures/`
//! are purged when the campaign starts.

use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::Error;

/// Writers and paths for one campaign's output directory.
#[derive(Debug)]
pub struct OutputDirectory {
    corpus_dir: PathBuf,
    failures_dir: PathBuf,
    log_path: PathBuf,
    cur_input_path: PathBuf,
    plot_writer: BufWriter<File>,
}

/// Removes all files directly inside `dir`, ignoring individual failures.
fn purge_dir(dir: &Path) {
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let _ = fs::remove_file(entry.path());
        }
    }
}

impl OutputDirectory {
    /// Prepares the output directory: creates it and its subdirectories,
    /// purges stale corpus and failure files, and opens a fresh stats file.
    ///
    /// # Errors
    ///
    /// If the directory cannot be created or is not writable.
    pub fn prepare(root: &Path) -> Result<Self, Error> {
        fs::create_dir_all(root).map_err(|err| {
            Error::os_error(
                err,
                format!("could not create output directory {}", root.display()),
            )
        })?;

        let corpus_dir = root.join("corpus");
        let failures_dir = root.join("failures");
        fs::create_dir_all(&corpus_dir)
            .map_err(|err| Error::os_error(err, "could not create corpus directory"))?;
        fs::create_dir_all(&failures_dir)
            .map_err(|err| Error::os_error(err, "could not create failures directory"))?;

        // Delete everything a previous campaign may have left behind. Stay
        // away from a recursive delete of the whole root in case of a typo'd
        // path; individual failed deletes are not checked.
        purge_dir(&corpus_dir);
        purge_dir(&failures_dir);
        let log_path = root.join("fuzz.log");
        let _ = fs::remove_file(&log_path);

        let plot_path = root.join("plot_data");
        let plot_file = File::create(&plot_path).map_err(|err| {
            Error::os_error(
                err,
                format!("output directory {} is not writable", root.display()),
            )
        })?;
        let mut plot_writer = BufWriter::new(plot_file);
        writeln!(
            plot_writer,
            "# unix_time, cycles_done, cur_path, paths_total, pending_total, \
             pending_favs, unique_crashes, unique_hangs, max_depth, execs_per_sec, \
             valid_inputs, invalid_inputs"
        )
        .map_err(|err| Error::os_error(err, "could not write stats header"))?;

        Ok(Self {
            corpus_dir,
            failures_dir,
            log_path,
            cur_input_path: root.join(".cur_input"),
            plot_writer,
        })
    }

    /// The path a saved input with the given id lives at.
    #[must_use]
    pub fn corpus_file(&self, id: usize) -> PathBuf {
        self.corpus_dir.join(format!("id_{id:06}"))
    }

    /// The path a failure input with the given id lives at.
    #[must_use]
    pub fn failure_file(&self, id: usize) -> PathBuf {
        self.failures_dir.join(format!("id_{id:06}"))
    }

    /// Writes an input's bytes to the given path.
    ///
    /// # Errors
    ///
    /// On I/O failure during the corpus write.
    pub fn write_input(&self, path: &Path, bytes: &[u8]) -> Result<(), Error> {
        fs::write(path, bytes)
            .map_err(|err| Error::os_error(err, format!("could not write input {}", path.display())))
    }

    /// Overwrites the `.cur_input` scratch file with the current trial.
    ///
    /// # Errors
    ///
    /// On I/O failure.
    pub fn write_cur_input(&self, bytes: &[u8]) -> Result<(), Error> {
        fs::write(&self.cur_input_path, bytes)
            .map_err(|err| Error::os_error(err, "could not write .cur_input"))
    }

    /// Appends one line to the `fuzz.log` journal.
    ///
    /// # Errors
    ///
    /// On I/O failure.
    pub fn log(&self, line: &str) -> Result<(), Error> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|err| Error::os_error(err, "could not open fuzz.log"))?;
        writeln!(file, "{line}").map_err(|err| Error::os_error(err, "could not append to fuzz.log"))
    }

    /// Appends one CSV line to `plot_data`.
    ///
    /// # Errors
    ///
    /// On I/O failure.
    pub fn append_plot(&mut self, line: &str) -> Result<(), Error> {
        writeln!(self.plot_writer, "{line}")
            .map_err(|err| Error::os_error(err, "could not append to plot_data"))
    }

    /// Flushes the stats writer.
    pub fn flush(&mut self) {
        let _ = self.plot_writer.flush();
    }
}

impl Drop for OutputDirectory {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::OutputDirectory;

    fn scratch_dir(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("seedling_out_{tag}_{}", std::process::id()))
    }

    #[test]
    fn prepare_creates_layout_and_purges_stale_files() {
        let root = scratch_dir("layout");
        fs::create_dir_all(root.join("corpus")).unwrap();
        fs::write(root.join("corpus").join("id_000000"), b"stale").unwrap();

        let output = OutputDirectory::prepare(&root).unwrap();
        assert!(root.join("corpus").is_dir());
        assert!(root.join("failures").is_dir());
        assert!(root.join("plot_data").is_file());
        assert!(!root.join("corpus").join("id_000000").exists());

        output.write_input(&output.corpus_file(0), b"hello").unwrap();
        assert_eq!(fs::read(root.join("corpus").join("id_000000")).unwrap(), b"hello");

        drop(output);
        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn plot_lines_end_up_on_disk_after_flush() {
        let root = scratch_dir("plot");
        let mut output = OutputDirectory::prepare(&root).unwrap();
        output.append_plot("1, 2, 3").unwrap();
        drop(output);

        let contents = fs::read_to_string(root.join("plot_data")).unwrap();
        assert!(contents.lines().count() == 2);
        assert!(contents.ends_with("1, 2, 3\n"));
        fs::remove_dir_all(&root).ok();
    }
}
