use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use mirt_algo::{EngineOptions, EvaluationHarness, EvaluationSummary, ParameterSet};
use tracing::info;

use crate::config::{Config, ModelSource};
use crate::error::EvaluatorError;

fn open(path: &Path) -> Result<File, EvaluatorError> {
    File::open(path).map_err(|source| EvaluatorError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_parameters(source: &ModelSource) -> Result<ParameterSet, EvaluatorError> {
    let params = match source {
        ModelSource::ModelFile(path) => {
            ParameterSet::from_model_reader(BufReader::new(open(path)?))?
        }
        ModelSource::Snapshot(path) => ParameterSet::from_snapshot(BufReader::new(open(path)?))?,
    };
    info!(
        exercises = params.num_exercises(),
        abilities = params.num_abilities(),
        max_length = params.max_length(),
        "model loaded"
    );
    Ok(params)
}

/// Replays the response log and writes one `correct,probability` line per
/// user with a held-out response.
pub fn run(config: &Config) -> Result<EvaluationSummary, EvaluatorError> {
    let params = Arc::new(load_parameters(&config.model)?);
    let responses = BufReader::new(open(&config.responses_file)?);

    let harness = EvaluationHarness::new(params)
        .with_layout(config.layout)
        .with_held_out_position(config.held_out_position)
        .with_seed(config.seed)
        .with_batch_users(config.batch_users)
        .with_engine_options(EngineOptions {
            live_steps: config.live_steps,
            ..EngineOptions::default()
        });

    let summary = match &config.output_file {
        Some(path) => {
            let file = File::create(path).map_err(|source| EvaluatorError::Io {
                path: path.clone(),
                source,
            })?;
            let mut writer = BufWriter::new(file);
            let summary = harness.run(responses, &mut writer)?;
            writer.flush().map_err(|source| EvaluatorError::Io {
                path: path.clone(),
                source,
            })?;
            summary
        }
        None => {
            let stdout = io::stdout();
            let mut writer = BufWriter::new(stdout.lock());
            let summary = harness.run(responses, &mut writer)?;
            writer.flush().map_err(mirt_algo::EngineError::from)?;
            summary
        }
    };

    Ok(summary)
}
