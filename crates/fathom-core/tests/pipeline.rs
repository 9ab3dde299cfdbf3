//! End-to-end pipeline test: sitemap discovery through fetch, commit,
//! index rebuild, and the tenant search/fetch/browse API.

use std::time::Duration;

use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fathom_core::tenant::FetchContext;
use fathom_core::{DeploymentConfig, TenantRegistry};

fn page(title: &str, body: &str) -> String {
    format!(
        "<html><head><title>{title}</title></head><body><main>\
         <h1>{title}</h1><p>{body}</p></main></body></html>"
    )
}

async fn mount_site(server: &MockServer) {
    let urls: String = ["/docs/settings/", "/docs/routing/", "/docs/caching/"]
        .iter()
        .map(|p| format!("<url><loc>{}{p}</loc></url>", server.uri()))
        .collect();
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(format!("<urlset>{urls}</urlset>")),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/docs/settings/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page(
            "Settings Reference",
            "The settings module controls runtime configuration for every deployment.",
        )))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/docs/routing/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page(
            "URL Routing",
            "Routing dispatches incoming requests to the matching view handlers.",
        )))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/docs/caching/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page(
            "Caching",
            "Caching stores rendered responses so repeated requests stay fast.",
        )))
        .mount(server)
        .await;
}

fn deployment(server_uri: &str, data_root: &TempDir) -> DeploymentConfig {
    let raw = format!(
        r#"{{
            "infrastructure": {{ "data_root_dir": "{}" }},
            "tenants": [ {{
                "codename": "example-docs",
                "docs_name": "Example Docs",
                "source_type": "online",
                "docs_sitemap_url": "{server_uri}/sitemap.xml"
            }} ]
        }}"#,
        data_root.path().display()
    );
    DeploymentConfig::from_json(&raw).expect("deployment config should validate")
}

#[tokio::test]
async fn online_tenant_syncs_indexes_and_serves_queries() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let data_root = TempDir::new().expect("tempdir");

    let config = deployment(&server.uri(), &data_root);
    let registry = TenantRegistry::from_config(&config).expect("registry builds");
    let runtime = registry.resolve("example-docs").expect("tenant resolves");

    // Initial sync runs in the background; the post-sync hook rebuilds
    // the index and swaps the active segment.
    runtime.initialize(true).expect("initialize");

    let mut indexed = false;
    for _ in 0..100 {
        if runtime.health().document_count >= 3 {
            indexed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(indexed, "sync + index rebuild never completed");

    // Search finds the right page with a highlighted snippet.
    let response = runtime.search("settings configuration", 10, false).await;
    assert!(response.error.is_none());
    assert!(response.total_results >= 1);
    let top = &response.results[0];
    assert!(top.url.ends_with("/docs/settings/"));
    assert_eq!(top.title, "Settings Reference");
    assert!(top.snippet.contains("[["));
    assert!(top.score > 0.0);

    // Scores come back non-increasing.
    for pair in response.results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }

    // Fetch serves the stored markdown for the same URL.
    let fetched = runtime.fetch(&top.url, FetchContext::Full).await;
    assert!(fetched.error.is_none());
    assert!(fetched.content.contains("settings module controls"));

    // Fragment-only variations resolve to the same document.
    let with_fragment = runtime
        .fetch(&format!("{}#section", top.url), FetchContext::Full)
        .await;
    assert!(with_fragment.error.is_none());

    // Sync status reflects the completed run.
    let status = runtime.sync_status();
    assert_eq!(status["scheduler_initialized"], true);
    assert!(status["stats"]["metadata_successful"].as_u64().unwrap_or(0) >= 3);

    // A repeat sync over an unchanged corpus keeps the same segment.
    let trigger = runtime.trigger_sync(false, false);
    assert!(trigger.success);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(runtime.health().document_count, 3);

    registry.shutdown_all().await;
}

#[tokio::test]
async fn unknown_tenant_resolution_fails_cleanly() {
    let data_root = TempDir::new().expect("tempdir");
    let server = MockServer::start().await;
    let config = deployment(&server.uri(), &data_root);
    let registry = TenantRegistry::from_config(&config).expect("registry builds");

    let err = registry.resolve("not-a-tenant").expect_err("must fail");
    assert!(err.to_string().contains("Unknown tenant"));
}
