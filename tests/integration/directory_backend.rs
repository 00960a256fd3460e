//! End-to-end generation against real template directories

use crate::integration::test_utils::test_config;
use scaffold::backend::directory::MANIFEST_FILE;
use scaffold::{DirectoryBackend, GenerationCoordinator, GenerationRequest};
use serde_json::json;
use std::path::Path;
use tempfile::TempDir;

fn write_template(root: &Path) {
    let svc = root.join("svc");
    std::fs::create_dir_all(svc.join("src")).unwrap();
    std::fs::write(
        svc.join(MANIFEST_FILE),
        "description = \"Minimal service\"\nvariables = [\"name\"]\n",
    )
    .unwrap();
    std::fs::write(svc.join("README.md"), "# {{name}}\n").unwrap();
    std::fs::write(svc.join("src").join("main.rs"), "fn main() { println!(\"{{name}}\"); }\n").unwrap();
}

#[tokio::test]
async fn test_generate_project_from_directory_template() {
    let templates = TempDir::new().unwrap();
    write_template(templates.path());
    let out = TempDir::new().unwrap();
    let target = out.path().join("billing");

    let coordinator = GenerationCoordinator::new(DirectoryBackend::new(templates.path()), test_config(2));
    let result = coordinator
        .submit(GenerationRequest::new("svc", &target).with_variable("name", "billing"))
        .await;

    assert!(result.success, "{:?}", result.message);
    assert_eq!(result.generated_files.len(), 2);
    assert_eq!(std::fs::read_to_string(target.join("README.md")).unwrap(), "# billing\n");
    assert!(target.join("src").join("main.rs").is_file());
    assert!(!target.join(MANIFEST_FILE).exists());

    // second run: cached template, but the output now exists
    let again = coordinator
        .submit(GenerationRequest::new("svc", &target).with_variable("name", "billing"))
        .await;
    assert_eq!(again.error_kind(), Some("output_path_conflict"));
    let stats = coordinator.cache().statistics();
    assert_eq!(stats.per_template["svc"].hits, 1);
    assert_eq!(stats.per_template["svc"].precompiles, 1);
}

#[tokio::test]
async fn test_unknown_template_and_missing_variable() {
    let templates = TempDir::new().unwrap();
    write_template(templates.path());
    let out = TempDir::new().unwrap();
    let coordinator = GenerationCoordinator::new(DirectoryBackend::new(templates.path()), test_config(2));

    let missing = coordinator
        .submit(GenerationRequest::new("nope", out.path().join("a")))
        .await;
    assert_eq!(missing.error_kind(), Some("template_not_found"));

    let invalid = coordinator
        .submit(GenerationRequest::new("svc", out.path().join("b")))
        .await;
    assert_eq!(invalid.error_kind(), Some("variable_validation_failed"));
    assert!(!out.path().join("b").exists());

    let stats = coordinator.recovery().statistics();
    assert_eq!(stats.total_attempts, 2);
    assert_eq!(stats.successful, 0);
    assert_eq!(
        serde_json::to_value(&stats.by_error_kind).unwrap(),
        json!({"TemplateNotFound": 1, "VariableValidationFailed": 1})
    );
}

#[tokio::test]
async fn test_failed_generation_leaves_no_directories_behind() {
    let templates = TempDir::new().unwrap();
    let nested = templates.path().join("nested");
    std::fs::create_dir_all(nested.join("a")).unwrap();
    std::fs::write(nested.join("a").join("one.txt"), "one").unwrap();
    std::fs::write(nested.join("{{name}}.txt"), "{{name}}").unwrap();
    let out = TempDir::new().unwrap();
    let target = out.path().join("project");

    let coordinator = GenerationCoordinator::new(DirectoryBackend::new(templates.path()), test_config(2));
    // NUL cannot appear in a file name, so the second file fails after `a/one.txt` is written
    let first = coordinator
        .submit(GenerationRequest::new("nested", &target).with_variable("name", "bad\0"))
        .await;
    assert!(!first.success);
    assert_eq!(first.error_kind(), Some("file_system_error"));
    assert!(!target.exists());

    let second = coordinator
        .submit(GenerationRequest::new("nested", &target).with_variable("name", "good"))
        .await;
    assert!(second.success, "{:?}", second.message);
    assert_eq!(std::fs::read_to_string(target.join("good.txt")).unwrap(), "good");
    assert!(target.join("a").join("one.txt").is_file());
}

#[tokio::test]
async fn test_paths_cannot_escape_roots() {
    let templates = TempDir::new().unwrap();
    write_template(templates.path());
    let sneaky = templates.path().join("sneaky");
    std::fs::create_dir_all(&sneaky).unwrap();
    std::fs::write(sneaky.join("{{name}}.txt"), "x").unwrap();
    let out = TempDir::new().unwrap();
    let coordinator = GenerationCoordinator::new(DirectoryBackend::new(templates.path().join("svc")), test_config(2));

    let escaped = coordinator
        .submit(GenerationRequest::new("../sneaky", out.path().join("a")))
        .await;
    assert_eq!(escaped.error_kind(), Some("template_not_found"));

    let coordinator = GenerationCoordinator::new(DirectoryBackend::new(templates.path()), test_config(2));
    let target = out.path().join("inner");
    let traversal = coordinator
        .submit(GenerationRequest::new("sneaky", &target).with_variable("name", "../outside"))
        .await;
    assert!(!traversal.success);
    assert_eq!(traversal.error_kind(), Some("invalid_template_format"));
    assert!(!out.path().join("outside.txt").exists());
    assert!(!target.exists());
}
