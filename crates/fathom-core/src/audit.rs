//! Index audit: verify that each tenant's on-disk corpus matches its
//! active segment, optionally rebuilding mismatches.

use serde::Serialize;
use tracing::{info, warn};

use crate::config::DeploymentConfig;
use crate::indexer::{BuildOptions, Indexer, IndexerContext};
use crate::url_translator::SEGMENTS_DIR;

/// Per-tenant audit outcome.
#[derive(Debug, Clone, Serialize)]
pub struct TenantAuditReport {
    /// Tenant codename.
    pub codename: String,
    /// Corpus fingerprint, when computable.
    pub fingerprint: Option<String>,
    /// Active segment id per the manifest.
    pub current_segment_id: Option<String>,
    /// Whether corpus and segment disagree.
    pub needs_rebuild: bool,
    /// Whether a rebuild ran.
    pub rebuilt: bool,
    /// After a rebuild: whether the audit now passes.
    pub post_rebuild_ok: Option<bool>,
    /// Audit or rebuild failure.
    pub error: Option<String>,
}

/// Audit outcome across tenants.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditSummary {
    /// Per-tenant reports.
    pub reports: Vec<TenantAuditReport>,
}

impl AuditSummary {
    /// Tenants whose corpus and segment disagree (after any rebuild).
    #[must_use]
    pub fn mismatches(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| match r.post_rebuild_ok {
                Some(ok) => !ok,
                None => r.needs_rebuild,
            })
            .count()
    }

    /// Tenants whose audit errored outright.
    #[must_use]
    pub fn errors(&self) -> usize {
        self.reports.iter().filter(|r| r.error.is_some()).count()
    }

    /// Process exit code: `0` all ok, `2` mismatches without a rebuild,
    /// `3` audit errors or post-rebuild mismatches.
    #[must_use]
    pub fn exit_code(&self, rebuild_requested: bool) -> i32 {
        if self.errors() > 0 {
            return 3;
        }
        let mismatches = self.mismatches();
        if mismatches == 0 {
            return 0;
        }
        if rebuild_requested {
            // A rebuild ran and the corpus still disagrees.
            3
        } else {
            2
        }
    }
}

/// Audit every tenant in a deployment (or one, when `tenant_filter` is
/// set), rebuilding mismatching segments when asked.
#[must_use]
pub fn audit_deployment(
    config: &DeploymentConfig,
    tenant_filter: Option<&str>,
    rebuild: bool,
) -> AuditSummary {
    let mut summary = AuditSummary::default();

    for tenant in &config.tenants {
        if tenant_filter.is_some_and(|f| f != tenant.codename) {
            continue;
        }
        let docs_root = tenant.docs_root(&config.infrastructure);
        let context = IndexerContext {
            codename: tenant.codename.clone(),
            docs_root: docs_root.clone(),
            segments_dir: docs_root.join(SEGMENTS_DIR),
            source_type: tenant.source_type,
            url_whitelist_prefixes: tenant.url_whitelist_prefixes.clone(),
            url_blacklist_prefixes: tenant.url_blacklist_prefixes.clone(),
            analyzer_profile: tenant.search.analyzer_profile.clone(),
            max_segments: config.infrastructure.max_segments,
        };
        summary
            .reports
            .push(audit_tenant(&tenant.codename, context, rebuild));
    }
    summary
}

fn audit_tenant(codename: &str, context: IndexerContext, rebuild: bool) -> TenantAuditReport {
    let mut report = TenantAuditReport {
        codename: codename.to_string(),
        fingerprint: None,
        current_segment_id: None,
        needs_rebuild: false,
        rebuilt: false,
        post_rebuild_ok: None,
        error: None,
    };

    let indexer = match Indexer::new(context) {
        Ok(indexer) => indexer,
        Err(e) => {
            report.error = Some(e.to_string());
            return report;
        },
    };

    match indexer.fingerprint_audit() {
        Ok(audit) => {
            report.fingerprint = Some(audit.fingerprint);
            report.current_segment_id = audit.current_segment_id;
            report.needs_rebuild = audit.needs_rebuild;
        },
        Err(e) => {
            report.error = Some(e.to_string());
            return report;
        },
    }

    if report.needs_rebuild {
        warn!(tenant = codename, "Index fingerprint mismatch");
    } else {
        info!(tenant = codename, "Index up to date");
    }

    if rebuild && report.needs_rebuild {
        match indexer.build_segment(&BuildOptions {
            persist: true,
            ..BuildOptions::default()
        }) {
            Ok(_) => {
                report.rebuilt = true;
                match indexer.fingerprint_audit() {
                    Ok(after) => report.post_rebuild_ok = Some(!after.needs_rebuild),
                    Err(e) => report.error = Some(e.to_string()),
                }
            },
            Err(e) => report.error = Some(e.to_string()),
        }
    }
    report
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::document::DocumentSidecar;
    use crate::url_translator::UrlTranslator;
    use std::fs;
    use tempfile::TempDir;

    fn deployment(dir: &TempDir) -> DeploymentConfig {
        let raw = format!(
            r#"{{
                "infrastructure": {{ "data_root_dir": "{}" }},
                "tenants": [ {{
                    "codename": "audit-docs",
                    "docs_name": "Audit Docs",
                    "source_type": "online",
                    "docs_sitemap_url": "https://ex.com/sitemap.xml"
                }} ]
            }}"#,
            dir.path().display()
        );
        DeploymentConfig::from_json(&raw).unwrap()
    }

    fn write_doc(root: &std::path::Path, url: &str, markdown: &str) {
        let translator = UrlTranslator::new(root);
        let md = translator.markdown_path(url).unwrap();
        fs::create_dir_all(md.parent().unwrap()).unwrap();
        fs::write(&md, markdown).unwrap();
        let meta = translator.metadata_path(url).unwrap();
        fs::create_dir_all(meta.parent().unwrap()).unwrap();
        let sidecar = DocumentSidecar {
            url: url.to_string(),
            title: "T".to_string(),
            ..DocumentSidecar::default()
        };
        fs::write(meta, serde_json::to_string(&sidecar).unwrap()).unwrap();
    }

    #[test]
    fn unindexed_corpus_needs_rebuild() {
        let dir = TempDir::new().unwrap();
        let config = deployment(&dir);
        write_doc(
            &dir.path().join("audit-docs"),
            "https://ex.com/docs/",
            "# Doc\n\nBody.",
        );

        let summary = audit_deployment(&config, None, false);
        assert_eq!(summary.reports.len(), 1);
        assert!(summary.reports[0].needs_rebuild);
        assert_eq!(summary.mismatches(), 1);
        assert_eq!(summary.exit_code(false), 2);
    }

    #[test]
    fn rebuild_fixes_the_mismatch() {
        let dir = TempDir::new().unwrap();
        let config = deployment(&dir);
        write_doc(
            &dir.path().join("audit-docs"),
            "https://ex.com/docs/",
            "# Doc\n\nBody.",
        );

        let summary = audit_deployment(&config, None, true);
        let report = &summary.reports[0];
        assert!(report.rebuilt);
        assert_eq!(report.post_rebuild_ok, Some(true));
        assert_eq!(summary.mismatches(), 0);
        assert_eq!(summary.exit_code(true), 0);

        // A second audit is clean without rebuilding.
        let summary = audit_deployment(&config, None, false);
        assert!(!summary.reports[0].needs_rebuild);
        assert_eq!(summary.exit_code(false), 0);
    }

    #[test]
    fn tenant_filter_limits_the_audit() {
        let dir = TempDir::new().unwrap();
        let config = deployment(&dir);

        let summary = audit_deployment(&config, Some("other"), false);
        assert!(summary.reports.is_empty());

        let summary = audit_deployment(&config, Some("audit-docs"), false);
        assert_eq!(summary.reports.len(), 1);
    }
}
