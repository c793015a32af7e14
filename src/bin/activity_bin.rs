use std::path::{Path, PathBuf};

use actibin::{
    init_logging, log_app_start, log_output_written, logging_config_from_env, read_csv_path,
    reshape_then_bin, run_config_from_env, write_csv_path, RunHooks,
};

const APP: &str = "activity-bin";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(APP, &logging_cfg);

    let mut args = std::env::args_os().skip(1);
    let (input, output) = match (args.next(), args.next()) {
        (Some(input), Some(output)) => (PathBuf::from(input), PathBuf::from(output)),
        _ => return Err("usage: activity-bin <input.csv> <output.csv>".into()),
    };

    let run_cfg = run_config_from_env()?;
    let request = run_cfg.pipeline_request()?;

    let progress = |message: &str| eprintln!("{message}");
    let raw = read_csv_path(&input)?;
    let result = reshape_then_bin(&raw, &request, RunHooks::with_progress(&progress))?;

    write_csv_path(&result.binned.to_raw_table(), &output)?;
    log_output_written(APP, &output, result.binned.len());
    if run_cfg.write_long {
        let long_path = long_output_path(&output);
        write_csv_path(&result.long.to_raw_table(), &long_path)?;
        log_output_written(APP, &long_path, result.long.len());
    }

    println!("{}", serde_json::to_string_pretty(&result.report)?);
    Ok(())
}

// `out/binned.csv` -> `out/binned.long.csv`
fn long_output_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    output.with_file_name(format!("{stem}.long.csv"))
}
