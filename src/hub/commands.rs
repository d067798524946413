// src/hub/commands.rs

//! Command lines for each upgrade step.

use std::path::Path;

use crate::config::HubConfig;
use crate::exec::CommandSpec;

/// Shell used for steps that need the Greenplum environment sourced first.
pub const SHELL: &str = "sh";

/// `pg_upgrade` against the old and new master, run from
/// `<state_dir>/pg_upgrade`.
pub fn convert_master(
    cfg: &HubConfig,
    old_bin_dir: &Path,
    new_bin_dir: &Path,
    old_data_dir: &Path,
    new_data_dir: &Path,
) -> CommandSpec {
    CommandSpec::new(cfg.pg_upgrade_path(new_bin_dir))
        .arg(format!("--old-bindir={}", old_bin_dir.display()))
        .arg(format!("--old-datadir={}", old_data_dir.display()))
        .arg(format!("--new-bindir={}", new_bin_dir.display()))
        .arg(format!("--new-datadir={}", new_data_dir.display()))
        .arg("--dispatcher-mode")
        .args(cfg.pg_upgrade_args.iter().cloned())
        .current_dir(cfg.pg_upgrade_dir())
}

/// `gpstop` on the old cluster, then on the new one, each with its own
/// environment.
pub fn shutdown_clusters(
    old_bin_dir: &Path,
    new_bin_dir: &Path,
    old_data_dir: &Path,
    new_data_dir: &Path,
) -> CommandSpec {
    let script = format!(
        "({}) && ({})",
        with_greenplum_env(old_bin_dir, "gpstop", old_data_dir),
        with_greenplum_env(new_bin_dir, "gpstop", new_data_dir),
    );
    CommandSpec::new(SHELL).arg("-c").arg(script)
}

/// `gpstart` on the upgraded cluster.
pub fn validate_start_cluster(new_bin_dir: &Path, new_data_dir: &Path) -> CommandSpec {
    let script = with_greenplum_env(new_bin_dir, "gpstart", new_data_dir);
    CommandSpec::new(SHELL).arg("-c").arg(script)
}

/// `. <gphome>/greenplum_path.sh && <bin_dir>/<utility> -a -d <data_dir>`
fn with_greenplum_env(bin_dir: &Path, utility: &str, data_dir: &Path) -> String {
    let gphome = bin_dir.parent().unwrap_or(bin_dir);
    format!(
        ". {} && {} -a -d {}",
        shell_quote(&gphome.join("greenplum_path.sh")),
        shell_quote(&bin_dir.join(utility)),
        shell_quote(data_dir),
    )
}

fn shell_quote(path: &Path) -> String {
    let raw = path.to_string_lossy();
    format!("'{}'", raw.replace('\'', r"'\''"))
}
