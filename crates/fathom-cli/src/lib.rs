//! Index audit CLI.
//!
//! Compares each tenant's on-disk corpus fingerprint against its active
//! segment and optionally rebuilds mismatches.
//!
//! Exit codes: `0` all ok, `1` invalid invocation or configuration, `2`
//! mismatches detected without `--rebuild`, `3` audit errors or
//! post-rebuild mismatches.

use std::path::PathBuf;

use clap::Parser;
use fathom_core::audit::audit_deployment;
use fathom_core::DeploymentConfig;
use tracing::error;

/// Audit tenant search indexes against their document trees.
#[derive(Debug, Parser)]
#[command(name = "fathom-audit", version, about)]
pub struct Args {
    /// Path to deployment.json.
    #[arg(long, default_value = "deployment.json")]
    pub config: PathBuf,

    /// Audit a single tenant instead of all of them.
    #[arg(long)]
    pub tenant: Option<String>,

    /// Rebuild segments for mismatching tenants and re-verify.
    #[arg(long)]
    pub rebuild: bool,

    /// Emit the report as JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

/// Run the audit; the return value is the process exit code.
#[must_use]
pub fn run(args: &Args) -> u8 {
    let config = match DeploymentConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load deployment configuration");
            eprintln!("error: {e}");
            return 1;
        },
    };

    if let Some(tenant) = &args.tenant {
        if config.tenant(tenant).is_none() {
            eprintln!("error: unknown tenant '{tenant}'");
            return 1;
        }
    }

    let summary = audit_deployment(&config, args.tenant.as_deref(), args.rebuild);

    if args.json {
        match serde_json::to_string_pretty(&summary) {
            Ok(encoded) => println!("{encoded}"),
            Err(e) => {
                eprintln!("error: {e}");
                return 3;
            },
        }
    } else {
        for report in &summary.reports {
            let state = match (&report.error, report.needs_rebuild, report.post_rebuild_ok) {
                (Some(e), _, _) => format!("error: {e}"),
                (None, _, Some(true)) => "rebuilt".to_string(),
                (None, _, Some(false)) => "rebuild did not converge".to_string(),
                (None, true, None) => "mismatch".to_string(),
                (None, false, None) => "ok".to_string(),
            };
            println!(
                "{:<24} {:<10} segment={}",
                report.codename,
                state,
                report.current_segment_id.as_deref().unwrap_or("-")
            );
        }
    }

    let code = summary.exit_code(args.rebuild);
    u8::try_from(code).unwrap_or(3)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn args_parse_defaults() {
        let args = Args::parse_from(["fathom-audit"]);
        assert_eq!(args.config, PathBuf::from("deployment.json"));
        assert!(args.tenant.is_none());
        assert!(!args.rebuild);
        assert!(!args.json);
    }

    #[test]
    fn missing_config_exits_with_one() {
        let args = Args::parse_from(["fathom-audit", "--config", "/does/not/exist.json"]);
        assert_eq!(run(&args), 1);
    }

    #[test]
    fn unknown_tenant_exits_with_one() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("deployment.json");
        fs::write(
            &config_path,
            format!(
                r#"{{ "infrastructure": {{ "data_root_dir": "{}" }}, "tenants": [] }}"#,
                dir.path().display()
            ),
        )
        .unwrap();

        let args = Args::parse_from([
            "fathom-audit",
            "--config",
            config_path.to_str().unwrap(),
            "--tenant",
            "nope",
        ]);
        assert_eq!(run(&args), 1);
    }

    #[test]
    fn empty_deployment_is_clean() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("deployment.json");
        fs::write(
            &config_path,
            format!(
                r#"{{ "infrastructure": {{ "data_root_dir": "{}" }}, "tenants": [] }}"#,
                dir.path().display()
            ),
        )
        .unwrap();

        let args = Args::parse_from(["fathom-audit", "--config", config_path.to_str().unwrap()]);
        assert_eq!(run(&args), 0);
    }
}
