mod common;

use common::*;
use corral_bootstrap::{BootstrapError, bootstrap_image_metadata, find_available_tools, set_bootstrap_tools};
use corral_cloud::Environ;
use corral_core::arch::host_arch;
use corral_core::{Tools, ToolsList};

fn versions(list: &ToolsList) -> Vec<String> {
    list.iter().map(|t| t.version.to_string()).collect()
}

fn list(vs: &[&str]) -> ToolsList {
    vs.iter()
        .map(|v| Tools::new(v.parse().unwrap(), format!("https://tools.example.com/{v}.tgz")))
        .collect()
}

#[tokio::test]
async fn test_find_tools_by_arch_and_series() {
    let environ = FakeEnviron::new(config(&[]));
    let dir = metadata_dir();
    let ctx = context(dir.path(), "1.2.3");

    let all = find_available_tools(&ctx, &environ, None, None, None, false).await.unwrap();
    assert_eq!(all.len(), 3);

    let arm = find_available_tools(&ctx, &environ, None, Some("arm64"), Some("trusty"), false)
        .await
        .unwrap();
    assert_eq!(versions(&arm), vec!["1.2.3-trusty-arm64"]);
}

#[tokio::test]
async fn test_find_tools_exact_version() {
    let environ = FakeEnviron::new(config(&[]));
    let dir = metadata_dir();
    let ctx = context(dir.path(), "1.3.0");

    let found = find_available_tools(&ctx, &environ, Some(&"1.3.0".parse().unwrap()), None, None, false)
        .await
        .unwrap();
    assert_eq!(versions(&found), vec!["1.3.0-trusty-amd64"]);

    let err = find_available_tools(&ctx, &environ, Some(&"1.3.1".parse().unwrap()), None, None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, BootstrapError::NoTools));
}

#[tokio::test]
async fn test_find_tools_honours_configured_agent_version() {
    let environ = FakeEnviron::new(config(&[("agent-version", "1.2.3")]));
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "tools/released.json",
        r#"[
            {"version": "1.2.3-trusty-amd64", "url": "a.tgz"},
            {"version": "1.2.4-trusty-amd64", "url": "b.tgz"}
        ]"#,
    );
    let ctx = context(dir.path(), "1.2.4");
    let found = find_available_tools(&ctx, &environ, None, None, None, false).await.unwrap();
    assert_eq!(versions(&found), vec!["1.2.3-trusty-amd64"]);
}

#[tokio::test]
async fn test_find_tools_uses_agent_stream() {
    let environ = FakeEnviron::new(config(&[("agent-stream", "devel")]));
    let dir = metadata_dir();
    write(
        dir.path(),
        "tools/devel.json",
        r#"[{"version": "1.2.5-trusty-amd64", "url": "devel.tgz"}]"#,
    );
    let ctx = context(dir.path(), "1.2.3");
    let found = find_available_tools(&ctx, &environ, None, None, None, false).await.unwrap();
    assert_eq!(versions(&found), vec!["1.2.5-trusty-amd64"]);
    assert!(found.first().unwrap().url.ends_with("/tools/devel.tgz"));
}

#[tokio::test]
async fn test_dev_version_falls_back_to_local_build() {
    let environ = FakeEnviron::new(config(&[]));
    let dir = metadata_dir();
    let ctx = context(dir.path(), "1.5.0.3");
    let found = find_available_tools(&ctx, &environ, None, None, None, false).await.unwrap();
    assert_eq!(versions(&found), vec![format!("1.5.0.4-trusty-{}", host_arch())]);
    assert!(found.first().unwrap().url.is_empty());
}

#[tokio::test]
async fn test_upload_tools_for_host_arch_only() {
    let environ = FakeEnviron::new(config(&[]));
    let ctx = context(tempfile::tempdir().unwrap().path(), "1.2.3");

    let found = find_available_tools(&ctx, &environ, None, None, Some("xenial"), true)
        .await
        .unwrap();
    assert_eq!(versions(&found), vec![format!("1.2.3.1-xenial-{}", host_arch())]);

    let other = if host_arch() == "arm64" { "amd64" } else { "arm64" };
    let err = find_available_tools(&ctx, &environ, None, Some(other), None, true)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        format!(
            "cannot build tools for {:?} using a machine running on {:?}",
            other,
            host_arch()
        )
    );
}

#[test]
fn test_set_bootstrap_tools_prefers_client_version() {
    let environ = FakeEnviron::new(config(&[]));
    let possible = list(&["1.2.3.1-trusty-amd64", "1.2.4-trusty-amd64"]);
    let tools = set_bootstrap_tools(&environ, &possible, &"1.2.3".parse().unwrap()).unwrap();
    assert_eq!(tools.version.to_string(), "1.2.3.1-trusty-amd64");
    // The environment still upgrades to the newest version
    assert_eq!(environ.config().get_str("agent-version"), Some("1.2.4"));
}

#[test]
fn test_set_bootstrap_tools_without_compatible() {
    let environ = FakeEnviron::new(config(&[("agent-version", "1.2.4")]));
    let possible = list(&["1.2.4-trusty-amd64", "1.2.4-trusty-arm64"]);
    let tools = set_bootstrap_tools(&environ, &possible, &"1.2.3".parse().unwrap()).unwrap();
    assert_eq!(tools.version.number.to_string(), "1.2.4");
    assert_eq!(environ.config().get_str("agent-version"), Some("1.2.4"));
}

#[test]
fn test_set_bootstrap_tools_empty() {
    let environ = FakeEnviron::new(config(&[]));
    let err = set_bootstrap_tools(&environ, &ToolsList::default(), &"1.2.3".parse().unwrap()).unwrap_err();
    assert_eq!(err.to_string(), "no bootstrap tools available");
}

#[tokio::test]
async fn test_image_metadata_without_region() {
    let environ = FakeEnviron::new(config(&[])).without_region();
    let ctx = context(metadata_dir().path(), "1.2.3");
    let tools = list(&["1.2.3-trusty-amd64"]);
    let mut custom = Vec::new();

    let none = bootstrap_image_metadata(&ctx, &environ, &tools, None, &mut custom)
        .await
        .unwrap();
    assert!(none.is_empty());

    let err = bootstrap_image_metadata(&ctx, &environ, &tools, Some("img-1"), &mut custom)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "specifying bootstrap image for \"openstack\" provider not supported"
    );
    assert!(custom.is_empty());
}

#[tokio::test]
async fn test_image_metadata_override_needs_one_series() {
    let environ = FakeEnviron::new(config(&[]));
    let ctx = context(metadata_dir().path(), "1.2.3");
    let tools = list(&["1.2.3-trusty-amd64", "1.2.3-xenial-amd64"]);
    let mut custom = Vec::new();
    let err = bootstrap_image_metadata(&ctx, &environ, &tools, Some("img-1"), &mut custom)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "multiple series with bootstrap image not valid");
}

#[tokio::test]
async fn test_image_metadata_filters_by_stream() {
    let environ = FakeEnviron::new(config(&[("image-stream", "daily")]));
    let dir = metadata_dir();
    write(
        dir.path(),
        "images/daily.json",
        r#"[
            {"id": "daily-amd64", "arch": "amd64", "version": "14.04", "region-name": "region-a", "stream": "daily"},
            {"id": "released-amd64", "arch": "amd64", "version": "14.04", "region-name": "region-a"}
        ]"#,
    );
    let ctx = context(dir.path(), "1.2.3");
    let tools = list(&["1.2.3-trusty-amd64"]);
    let mut custom = Vec::new();
    let images = bootstrap_image_metadata(&ctx, &environ, &tools, None, &mut custom)
        .await
        .unwrap();
    let ids: Vec<&str> = images.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["daily-amd64"]);
}
