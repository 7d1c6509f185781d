use std::process::ExitCode;

use mirt_evaluator::{init_tracing, run, Config};
use tracing::{error, info};

fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(2);
        }
    };

    let _log_guard = init_tracing(&config.logging);

    info!(
        responses = %config.responses_file.display(),
        seed = config.seed,
        held_out_position = config.held_out_position,
        "starting evaluation"
    );

    match run(&config) {
        Ok(summary) => {
            info!(
                users = summary.users,
                emitted = summary.emitted,
                "predictions written"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "evaluation failed");
            ExitCode::FAILURE
        }
    }
}
