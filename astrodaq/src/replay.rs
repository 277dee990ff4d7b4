/*!
Run log replay.

Two stages connected by a bounded channel:
1. Reader thread: run log lines -> [`Readout`]s
2. Decode loop (caller's thread): readouts -> hits -> output sinks

The decode loop owns the retry budget. Each readout that fails to decode
counts as one error and leaves a failure row behind; the run stops once the
error count exceeds the budget.
*/

use anyhow::{bail, Context, Result};
use astropix::HitDecoder;
use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::output::HitSink;
use crate::runlog::{Readout, RunLogParser};

/// Replay settings
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Decode failures tolerated before the run is stopped
    pub max_errors: u32,

    /// Stop after this many readouts
    pub max_runs: Option<u64>,

    /// Readouts buffered between reader and decoder
    pub channel_buffer_size: usize,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            max_errors: 0,
            max_runs: None,
            channel_buffer_size: 1000,
        }
    }
}

/// Why a replay ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndOfLog,
    MaxRuns,
    TooManyErrors,
    Interrupted,
}

/// Final replay statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayStats {
    pub readouts: u64,
    pub hits: u64,
    pub errors: u32,
    pub stop_reason: StopReason,
}

/// Replays one run log into a set of hit sinks
pub struct RunReplay {
    path: PathBuf,
    decoder: HitDecoder,
    options: ReplayOptions,
    running: Arc<AtomicBool>,
}

impl RunReplay {
    pub fn new(path: PathBuf, decoder: HitDecoder, options: ReplayOptions) -> Self {
        Self {
            path,
            decoder,
            options,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Get a reference to the running flag for external control
    pub fn get_running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Replay the whole log, blocking until it ends or is stopped
    pub fn run(&self, sink: &mut dyn HitSink) -> Result<ReplayStats> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open run log: {}", self.path.display()))?;
        let parser = RunLogParser::new()?;

        let (readout_tx, readout_rx) = bounded::<Readout>(self.options.channel_buffer_size.max(1));
        let running_reader = Arc::clone(&self.running);

        let reader_handle = thread::spawn(move || {
            match Self::reader_thread(BufReader::new(file), parser, readout_tx, running_reader) {
                Ok(count) => {
                    debug!("Run log reader finished after {} readouts", count);
                    Ok(())
                }
                Err(e) => {
                    error!("Run log reader failed: {:#}", e);
                    Err(e)
                }
            }
        });

        let result = self.decode_loop(readout_rx, sink);

        // the reader may be blocked on a full channel; the receiver is gone by now
        self.running.store(false, Ordering::SeqCst);
        let reader_result = match reader_handle.join() {
            Ok(result) => result,
            Err(_) => bail!("Run log reader thread panicked"),
        };

        let stats = result?;
        reader_result?;
        Ok(stats)
    }

    /// Parse log lines and forward readouts until the log ends or the replay stops
    fn reader_thread<R: BufRead>(
        reader: R,
        parser: RunLogParser,
        readout_tx: Sender<Readout>,
        running: Arc<AtomicBool>,
    ) -> Result<u64> {
        let mut count = 0u64;
        for (line_number, line) in reader.lines().enumerate() {
            if !running.load(Ordering::SeqCst) {
                break;
            }
            let line = line.with_context(|| format!("Failed to read run log line {}", line_number + 1))?;
            let Some(readout) = parser
                .parse_line(&line)
                .with_context(|| format!("Bad run log line {}", line_number + 1))?
            else {
                continue;
            };

            if readout_tx.send(readout).is_err() {
                // decoder stopped early
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    fn decode_loop(&self, readout_rx: Receiver<Readout>, sink: &mut dyn HitSink) -> Result<ReplayStats> {
        let max_errors = self.options.max_errors;
        let mut readouts = 0u64;
        let mut hits = 0u64;
        let mut errors = 0u32;
        let start_time = Instant::now();

        let stop_reason = loop {
            if !self.running.load(Ordering::SeqCst) {
                break StopReason::Interrupted;
            }
            if self.options.max_runs.is_some_and(|max_runs| readouts >= max_runs) {
                break StopReason::MaxRuns;
            }

            let readout = match readout_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(readout) => readout,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break StopReason::EndOfLog,
            };
            readouts += 1;

            let capture_time = Utc::now();
            match self.decoder.decode_readout_at(&readout.data, readout.index, capture_time) {
                Ok(decoded) => {
                    for hit in &decoded {
                        sink.write_hit(hit)?;
                    }
                    hits += decoded.len() as u64;
                }
                Err(e) if e.is_decode_error() => {
                    errors += 1;
                    warn!(
                        "Decoding failed. Failure {} of {} on readout {}: {}",
                        errors, max_errors, readout.index, e
                    );
                    sink.write_failure(readout.index, capture_time)?;
                    if errors > max_errors {
                        warn!("Decoding failed {} times. Stopping run", errors);
                        break StopReason::TooManyErrors;
                    }
                }
                Err(e) => return Err(e).context(format!("Failed to decode readout {}", readout.index)),
            }
        };

        sink.flush()?;

        info!("Replay final stats:");
        info!("   Readouts: {}", readouts);
        info!("   Hits: {}", hits);
        info!("   Decode errors: {}", errors);
        info!("   Stopped: {:?}", stop_reason);
        info!("   Duration: {:.1}s", start_time.elapsed().as_secs_f64());

        Ok(ReplayStats {
            readouts,
            hits,
            errors,
            stop_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::CsvSink;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const GOOD: &str = "bcbc1081a0400cbc";
    const TRUNCATED: &str = "bc1081a0400cbc010203";

    fn write_log(lines: &[String]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[dac]").unwrap();
        writeln!(file, "vn1 = 20 (6)").unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn replay(file: &NamedTempFile, options: ReplayOptions) -> (ReplayStats, String) {
        let replay = RunReplay::new(file.path().to_path_buf(), HitDecoder::default(), options);
        let mut sink = CsvSink::from_writer(Vec::new());
        let stats = replay.run(&mut sink).unwrap();
        (stats, String::from_utf8(sink.into_inner().unwrap()).unwrap())
    }

    #[test]
    fn test_replay_whole_log() {
        let lines: Vec<String> = (0..5).map(|i| format!("{}\t{}", i, GOOD)).collect();
        let file = write_log(&lines);

        let (stats, csv) = replay(&file, ReplayOptions::default());
        assert_eq!(stats.readouts, 5);
        assert_eq!(stats.hits, 5);
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.stop_reason, StopReason::EndOfLog);
        assert_eq!(csv.lines().count(), 6);
    }

    #[test]
    fn test_error_budget() {
        let lines = vec![
            format!("0\t{}", GOOD),
            format!("1\t{}", TRUNCATED),
            format!("2\tb'{}'", GOOD),
            format!("3\t{}", TRUNCATED),
            format!("4\t{}", GOOD),
        ];
        let file = write_log(&lines);

        let options = ReplayOptions {
            max_errors: 1,
            ..Default::default()
        };
        let (stats, csv) = replay(&file, options);
        assert_eq!(stats.stop_reason, StopReason::TooManyErrors);
        assert_eq!(stats.readouts, 4);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.errors, 2);

        let failure_rows: Vec<&str> = csv.lines().filter(|line| line.contains(",,,")).collect();
        assert_eq!(failure_rows.len(), 2);
        assert!(failure_rows[0].starts_with("1,"));
        assert!(failure_rows[1].starts_with("3,"));
    }

    #[test]
    fn test_errors_within_budget() {
        let lines = vec![format!("0\t{}", TRUNCATED), format!("1\t{}", GOOD)];
        let file = write_log(&lines);

        let options = ReplayOptions {
            max_errors: 1,
            ..Default::default()
        };
        let (stats, _) = replay(&file, options);
        assert_eq!(stats.stop_reason, StopReason::EndOfLog);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_max_runs() {
        let lines: Vec<String> = (0..50).map(|i| format!("{}\t{}", i, GOOD)).collect();
        let file = write_log(&lines);

        let options = ReplayOptions {
            max_runs: Some(3),
            channel_buffer_size: 2,
            ..Default::default()
        };
        let (stats, _) = replay(&file, options);
        assert_eq!(stats.stop_reason, StopReason::MaxRuns);
        assert_eq!(stats.readouts, 3);
    }

    #[test]
    fn test_stopped_before_start() {
        let lines = vec![format!("0\t{}", GOOD)];
        let file = write_log(&lines);

        let replay = RunReplay::new(file.path().to_path_buf(), HitDecoder::default(), ReplayOptions::default());
        replay.get_running_flag().store(false, Ordering::SeqCst);
        let mut sink = CsvSink::from_writer(Vec::new());
        let stats = replay.run(&mut sink).unwrap();
        assert_eq!(stats.stop_reason, StopReason::Interrupted);
        assert_eq!(stats.readouts, 0);
    }

    #[test]
    fn test_bad_log_line_is_an_error() {
        let lines = vec![format!("0\t{}", GOOD), "1\tbcb".to_string()];
        let file = write_log(&lines);

        let replay = RunReplay::new(file.path().to_path_buf(), HitDecoder::default(), ReplayOptions::default());
        let mut sink = CsvSink::from_writer(Vec::new());
        assert!(replay.run(&mut sink).is_err());
    }

    #[test]
    fn test_missing_log() {
        let replay = RunReplay::new(PathBuf::from("/nonexistent/run.log"), HitDecoder::default(), ReplayOptions::default());
        let mut sink = CsvSink::from_writer(Vec::new());
        assert!(replay.run(&mut sink).is_err());
    }
}
