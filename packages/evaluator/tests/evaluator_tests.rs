//! End-to-end runs of the evaluator over temporary model and log files.

use std::io::Write;
use std::path::PathBuf;

use mirt_algo::LogLayout;
use mirt_evaluator::{run, Config, EvaluatorError, LoggingConfig, ModelSource};
use serde_json::json;
use tempfile::{NamedTempFile, TempDir};

fn write_temp(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", contents).unwrap();
    file
}

fn model_file() -> NamedTempFile {
    write_temp(
        &json!({
            "params": {
                "exercise_index": {"addition_1": 0, "subtraction_1": 1, "division_1": 2},
                "max_length": 10,
                "couplings": [[1.4, 0.2], [1.0, -0.1], [0.7, -0.6]]
            }
        })
        .to_string(),
    )
}

fn line(user: &str, exercise: &str, correct: &str) -> String {
    format!("{user},2013-01-01,p,{exercise},q,r,20,s,{correct}\n")
}

fn responses_file() -> NamedTempFile {
    let mut log = String::new();
    // alice: five responses, the fifth is held out
    for (exercise, correct) in [
        ("addition_1", "true"),
        ("subtraction_1", "true"),
        ("division_1", "false"),
        ("addition_1", "true"),
        ("subtraction_1", "true"),
    ] {
        log.push_str(&line("alice", exercise, correct));
    }
    // bob: too short to produce a prediction
    log.push_str(&line("bob", "addition_1", "false"));
    log.push_str("garbage\n");
    write_temp(&log)
}

fn config(model: ModelSource, responses: PathBuf, output: Option<PathBuf>) -> Config {
    Config {
        model,
        responses_file: responses,
        output_file: output,
        layout: LogLayout::default(),
        held_out_position: 5,
        seed: 11,
        batch_users: 4,
        live_steps: Some(50),
        logging: LoggingConfig::default(),
    }
}

#[test]
fn writes_one_prediction_per_eligible_user() {
    let model = model_file();
    let responses = responses_file();
    let out_dir = TempDir::new().unwrap();
    let output = out_dir.path().join("predictions.csv");

    let summary = run(&config(
        ModelSource::ModelFile(model.path().to_path_buf()),
        responses.path().to_path_buf(),
        Some(output.clone()),
    ))
    .unwrap();

    assert_eq!(summary.users, 2);
    assert_eq!(summary.emitted, 1);
    assert_eq!(summary.malformed_lines, 1);

    let written = std::fs::read_to_string(&output).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines.len(), 1);
    let (truth, probability) = lines[0].split_once(',').unwrap();
    assert_eq!(truth, "1");
    let probability: f64 = probability.parse().unwrap();
    assert!(probability > 0.0 && probability < 1.0);
}

#[test]
fn same_seed_gives_identical_output() {
    let model = model_file();
    let responses = responses_file();
    let out_dir = TempDir::new().unwrap();

    let outputs: Vec<String> = ["first.csv", "second.csv"]
        .iter()
        .map(|name| {
            let output = out_dir.path().join(name);
            run(&config(
                ModelSource::ModelFile(model.path().to_path_buf()),
                responses.path().to_path_buf(),
                Some(output.clone()),
            ))
            .unwrap();
            std::fs::read_to_string(output).unwrap()
        })
        .collect();

    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn snapshot_source_is_accepted() {
    let snapshot = write_temp(
        &json!({
            "theta": {
                "num_abilities": 1,
                "W_correct": [[1.4, 0.2], [1.0, -0.1], [0.7, -0.6]],
                "W_time": [[0.1, 3.0], [0.1, 3.0], [0.2, 3.2]],
                "sigma_time": [0.8, 0.8, 0.9]
            },
            "exercise_ind_dict": {"addition_1": 0, "subtraction_1": 1, "division_1": 2}
        })
        .to_string(),
    );
    let responses = responses_file();
    let out_dir = TempDir::new().unwrap();
    let output = out_dir.path().join("predictions.csv");

    let summary = run(&config(
        ModelSource::Snapshot(snapshot.path().to_path_buf()),
        responses.path().to_path_buf(),
        Some(output),
    ))
    .unwrap();
    assert_eq!(summary.emitted, 1);
}

#[test]
fn missing_responses_file_reports_path() {
    let model = model_file();
    let missing = PathBuf::from("/nonexistent/responses.csv");

    let err = run(&config(
        ModelSource::ModelFile(model.path().to_path_buf()),
        missing.clone(),
        None,
    ))
    .unwrap_err();

    match err {
        EvaluatorError::Io { path, .. } => assert_eq!(path, missing),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn invalid_model_is_an_engine_error() {
    let model = write_temp(&json!({"params": {"exercise_index": {"a_1": 0}}}).to_string());
    let responses = responses_file();

    let err = run(&config(
        ModelSource::ModelFile(model.path().to_path_buf()),
        responses.path().to_path_buf(),
        None,
    ))
    .unwrap_err();
    assert!(matches!(err, EvaluatorError::Engine(_)));
}
