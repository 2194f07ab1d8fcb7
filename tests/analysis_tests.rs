//! End-to-end library tests against a mock npm registry

use deps_inspect::{
    AnalysisConfig, Analyzer, CacheConfig, ErrorKind, LicenseRisk, NetworkConfig, UpdateClass,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn copy_sample_project(dir: &Path) {
    let fixture = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("sample_project");
    for file in ["package.json", "package-lock.json"] {
        std::fs::copy(fixture.join(file), dir.join(file)).unwrap();
    }
}

fn packument(name: &str, latest: &str, license: &str) -> String {
    format!(
        r#"{{
            "name": "{name}",
            "dist-tags": {{"latest": "{latest}"}},
            "versions": {{"{latest}": {{"license": "{license}"}}}},
            "time": {{"{latest}": "2023-10-08T21:20:00.000Z"}}
        }}"#
    )
}

fn config_for(registry_url: String, cache_path: PathBuf) -> AnalysisConfig {
    AnalysisConfig::builder()
        .network(NetworkConfig {
            registry_url,
            max_retries: 0,
            auth_token: None,
            ..NetworkConfig::default()
        })
        .cache(CacheConfig {
            path: Some(cache_path),
            ..CacheConfig::default()
        })
        .build()
}

#[tokio::test]
async fn test_analyze_project_persists_and_reuses_cache() {
    let mut server = mockito::Server::new_async().await;
    let express = server
        .mock("GET", "/express")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(packument("express", "4.18.2", "MIT"))
        .expect(1)
        .create_async()
        .await;
    let debug = server
        .mock("GET", "/debug")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(packument("debug", "4.3.4", "MIT"))
        .expect(1)
        .create_async()
        .await;
    let es5_ext = server
        .mock("GET", "/es5-ext")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(packument("es5-ext", "0.10.64", "ISC"))
        .expect(1)
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    copy_sample_project(dir.path());
    let cache_path = dir.path().join("cache").join("registry.json");
    let config = config_for(server.url(), cache_path.clone());

    let report = Analyzer::new(config.clone())
        .unwrap()
        .analyze_project(dir.path())
        .await
        .unwrap();

    assert_eq!(report.project_name, "sample-app");
    let names: Vec<_> = report
        .analysis
        .records
        .iter()
        .map(|r| r.name.as_str())
        .collect();
    assert_eq!(names, vec!["express", "debug", "es5-ext"]);

    let express_record = &report.analysis.records[0];
    assert_eq!(express_record.resolved_version.as_deref(), Some("4.17.1"));
    assert_eq!(express_record.latest_version.as_deref(), Some("4.18.2"));
    assert_eq!(express_record.update_class, UpdateClass::Minor);
    assert_eq!(express_record.license_risk, LicenseRisk::Permissive);
    assert!(express_record.latest_published_at.is_some());

    assert_eq!(report.analysis.records[1].update_class, UpdateClass::Current);
    assert_eq!(report.analysis.records[2].update_class, UpdateClass::Patch);
    assert_eq!(report.analysis.summary.minor, 1);
    assert_eq!(report.analysis.summary.patch, 1);
    assert_eq!(report.analysis.summary.current, 1);

    assert!(report
        .structure
        .cycles
        .iter()
        .any(|cycle| cycle.contains(&"es6-iterator".to_string())));
    assert!(report
        .structure
        .duplicates
        .iter()
        .any(|dup| dup.name == "debug" && dup.versions == vec!["2.6.9", "4.3.4"]));

    assert!(cache_path.exists());

    // A second analyzer starts from the persisted cache and makes no requests.
    let second = Analyzer::new(config).unwrap();
    let report = second.analyze_project(dir.path()).await.unwrap();
    assert_eq!(report.analysis.records[0].update_class, UpdateClass::Minor);
    assert_eq!(second.cache_stats().hits, 3);

    express.assert_async().await;
    debug.assert_async().await;
    es5_ext.assert_async().await;
}

#[tokio::test]
async fn test_analyze_project_reports_missing_packages() {
    let mut server = mockito::Server::new_async().await;
    let _missing = server
        .mock("GET", mockito::Matcher::Any)
        .with_status(404)
        .with_body(r#"{"error":"Not found"}"#)
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    copy_sample_project(dir.path());
    let config = AnalysisConfig::builder()
        .network(NetworkConfig {
            registry_url: server.url(),
            max_retries: 0,
            auth_token: None,
            ..NetworkConfig::default()
        })
        .build();

    let report = Analyzer::new(config)
        .unwrap()
        .analyze_project(dir.path())
        .await
        .unwrap();

    assert_eq!(report.analysis.records.len(), 3);
    assert!(report.analysis.records.iter().all(|r| r.is_error()));
    assert_eq!(report.analysis.errors.len(), 3);
    assert!(report
        .analysis
        .errors
        .iter()
        .all(|e| e.kind == ErrorKind::NotFound));
    assert_eq!(report.analysis.summary.failed, 3);
}

#[tokio::test]
async fn test_analyze_project_without_manifest_fails() {
    let dir = TempDir::new().unwrap();
    let result = Analyzer::new(AnalysisConfig::default())
        .unwrap()
        .analyze_project(dir.path())
        .await;

    assert!(result.is_err());
}
