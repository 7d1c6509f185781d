//! Evaluation Harness
//!
//! Replays recorded assessment logs to check how well a fitted model
//! predicts a held-out response.
//!
//! For every user (a run of contiguous lines with the same user id) the
//! response at the held-out position is withheld from the history. A fresh
//! engine then predicts that exercise from the remaining responses and one
//! `<truth>,<probability>` line is written, ready for ROC analysis.
//!
//! Users are independent, so each batch of users is evaluated in parallel
//! and written back in input order.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufRead, Write};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::engine::{AdaptiveEngine, EngineOptions, MirtEngine};
use crate::error::Result;
use crate::params::ParameterSet;
use crate::types::ItemResponse;

/// 1-based position of the analytics card in each assessment
pub const DEFAULT_HELD_OUT_POSITION: usize = 5;

/// Users evaluated per parallel batch
pub const DEFAULT_BATCH_USERS: usize = 256;

// ==================== Log Parsing ====================

/// Field offsets of a comma-separated response log
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLayout {
    pub user_idx: usize,
    pub exercise_idx: usize,
    pub time_idx: usize,
    pub correct_idx: usize,
}

impl Default for LogLayout {
    fn default() -> Self {
        Self {
            user_idx: 0,
            exercise_idx: 3,
            time_idx: 6,
            correct_idx: 8,
        }
    }
}

/// One parsed log line
#[derive(Clone, Debug, PartialEq)]
pub struct LogRecord {
    pub user: String,
    pub exercise: String,
    /// `None` when the field does not parse as a number
    pub time_taken: Option<f64>,
    pub correct: bool,
}

/// Parses a line, or `None` if it lacks one of the configured fields.
///
/// Only `true` and `True` count as correct.
pub fn parse_line(line: &str, layout: &LogLayout) -> Option<LogRecord> {
    let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(',').collect();
    let field = |idx: usize| fields.get(idx).map(|f| f.trim());

    let correct = matches!(field(layout.correct_idx)?, "true" | "True");
    Some(LogRecord {
        user: field(layout.user_idx)?.to_string(),
        exercise: field(layout.exercise_idx)?.to_string(),
        time_taken: field(layout.time_idx)?.parse::<f64>().ok(),
        correct,
    })
}

// ==================== Output ====================

/// Observed outcome paired with the model's prediction
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PredictionRecord {
    pub truth: bool,
    pub predicted: f64,
}

impl fmt::Display for PredictionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", u8::from(self.truth), self.predicted)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    /// Distinct user runs seen
    pub users: usize,
    /// Prediction lines written
    pub emitted: usize,
    /// Users with a held-out item whose prediction failed
    pub skipped: usize,
    /// Lines missing a configured field
    pub malformed_lines: usize,
}

// ==================== Replay ====================

/// One user's responses, split into history and held-out target
#[derive(Clone, Debug)]
struct UserReplay {
    user: String,
    ordinal: u64,
    count: usize,
    history: Vec<ItemResponse>,
    target: Option<(String, bool)>,
}

impl UserReplay {
    fn new(user: String, ordinal: u64) -> Self {
        Self {
            user,
            ordinal,
            count: 0,
            history: Vec::new(),
            target: None,
        }
    }

    fn push(&mut self, record: LogRecord, held_out_position: usize) {
        self.count += 1;
        if self.count == held_out_position {
            self.target = Some((record.exercise, record.correct));
        } else {
            self.history.push(ItemResponse::new(
                record.exercise,
                record.correct,
                record.time_taken,
            ));
        }
    }
}

pub struct EvaluationHarness {
    params: Arc<ParameterSet>,
    layout: LogLayout,
    held_out_position: usize,
    seed: u64,
    batch_users: usize,
    engine_options: EngineOptions,
}

impl EvaluationHarness {
    pub fn new(params: Arc<ParameterSet>) -> Self {
        Self {
            params,
            layout: LogLayout::default(),
            held_out_position: DEFAULT_HELD_OUT_POSITION,
            seed: 0,
            batch_users: DEFAULT_BATCH_USERS,
            engine_options: EngineOptions::default(),
        }
    }

    pub fn with_layout(mut self, layout: LogLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_held_out_position(mut self, position: usize) -> Self {
        self.held_out_position = position;
        self
    }

    /// Base seed; user `n` gets an engine seeded with `seed + n`
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_batch_users(mut self, batch_users: usize) -> Self {
        self.batch_users = batch_users.max(1);
        self
    }

    /// Sampling options for the per-user engines; the seed is always derived
    pub fn with_engine_options(mut self, options: EngineOptions) -> Self {
        self.engine_options = options;
        self
    }

    fn evaluate_user(&self, replay: &UserReplay) -> Option<PredictionRecord> {
        let (exercise, truth) = replay.target.as_ref()?;

        let options = EngineOptions {
            seed: Some(self.seed.wrapping_add(replay.ordinal)),
            ..self.engine_options.clone()
        };
        let mut engine = MirtEngine::with_options(Arc::clone(&self.params), options);

        match engine.estimated_exercise_accuracy(&replay.history, exercise, true) {
            Ok(predicted) => Some(PredictionRecord {
                truth: *truth,
                predicted,
            }),
            Err(err) => {
                debug!(user = %replay.user, error = %err, "skipping user");
                None
            }
        }
    }

    fn flush<W: Write>(
        &self,
        batch: &mut Vec<UserReplay>,
        output: &mut W,
        summary: &mut EvaluationSummary,
    ) -> Result<()> {
        let results: Vec<Option<PredictionRecord>> = batch
            .par_iter()
            .map(|replay| self.evaluate_user(replay))
            .collect();

        for (replay, result) in batch.drain(..).zip(results) {
            summary.users += 1;
            match result {
                Some(record) => {
                    writeln!(output, "{record}")?;
                    summary.emitted += 1;
                }
                None if replay.target.is_some() => summary.skipped += 1,
                None => {}
            }
        }
        Ok(())
    }

    /// Replays `input` and writes one prediction line per evaluated user.
    pub fn run<R: BufRead, W: Write>(&self, mut input: R, mut output: W) -> Result<EvaluationSummary> {
        let mut summary = EvaluationSummary::default();
        let mut batch: Vec<UserReplay> = Vec::new();
        let mut current: Option<UserReplay> = None;
        let mut next_ordinal = 0u64;

        let mut buf = Vec::new();
        let mut line_no = 0usize;

        loop {
            buf.clear();
            if input.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            line_no += 1;

            let line = match std::str::from_utf8(&buf) {
                Ok(line) => line,
                Err(_) => {
                    warn!(line = line_no, "skipping log line that is not valid UTF-8");
                    summary.malformed_lines += 1;
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let record = match parse_line(line, &self.layout) {
                Some(record) => record,
                None => {
                    warn!(line = line_no, "skipping malformed log line");
                    summary.malformed_lines += 1;
                    continue;
                }
            };

            let same_user = current
                .as_ref()
                .is_some_and(|replay| replay.user == record.user);
            if !same_user {
                if let Some(done) = current.take() {
                    batch.push(done);
                    if batch.len() >= self.batch_users {
                        self.flush(&mut batch, &mut output, &mut summary)?;
                    }
                }
                current = Some(UserReplay::new(record.user.clone(), next_ordinal));
                next_ordinal += 1;
            }

            if let Some(replay) = current.as_mut() {
                replay.push(record, self.held_out_position);
            }
        }

        if let Some(done) = current.take() {
            batch.push(done);
        }
        self.flush(&mut batch, &mut output, &mut summary)?;
        output.flush()?;

        info!(
            users = summary.users,
            emitted = summary.emitted,
            skipped = summary.skipped,
            malformed_lines = summary.malformed_lines,
            "evaluation finished"
        );
        Ok(summary)
    }
}
