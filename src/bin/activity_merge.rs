use std::path::PathBuf;

use actibin::{
    export_merged, init_logging, log_app_start, log_output_written, logging_config_from_env,
    merge_folder, MergeConfig, RunHooks,
};

const APP: &str = "activity-merge";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(APP, &logging_cfg);

    let mut args = std::env::args_os().skip(1);
    let folder = args
        .next()
        .map(PathBuf::from)
        .ok_or("usage: activity-merge <folder> [export_dir]")?;
    let export_dir = args.next().map(PathBuf::from);

    let progress = |message: &str| eprintln!("{message}");
    let hooks = RunHooks::with_progress(&progress);

    let Some(outcome) = merge_folder(&folder, &MergeConfig::default(), hooks)? else {
        eprintln!("No data found in {}", folder.display());
        return Ok(());
    };

    for skipped in &outcome.skipped {
        eprintln!("skipped {}: {}", skipped.path.display(), skipped.reason);
    }

    let out_path = export_merged(&outcome, &folder, export_dir.as_deref())?;
    log_output_written(APP, &out_path, outcome.table.len());
    println!(
        "Merged {} rows from {} datasets into {}",
        outcome.table.len(),
        outcome.datasets.len(),
        out_path.display()
    );

    Ok(())
}
