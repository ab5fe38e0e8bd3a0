use pl_promote::{FsBlobStore, JobOutcome, PromotionPipeline};
use pl_tracking::InMemoryTracking;
use pl_types::{ModelVersion, APPROVAL_TAG};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write_model_dir(dir: &Path) {
    fs::create_dir_all(dir.join("data")).unwrap();
    fs::write(dir.join("MLmodel"), "artifact_path: model\n").unwrap();
    fs::write(dir.join("data/model.json"), "{\"c\":0.25}").unwrap();
    fs::write(dir.join("conda.yaml"), "name: plinth\n").unwrap();
    fs::write(dir.join("python_env.yaml"), "python: 3.11\n").unwrap();
    fs::write(dir.join("requirements.txt"), "plinth\n").unwrap();
}

#[tokio::test]
async fn mirrors_local_sources_into_container_directory() {
    let artifacts = tempdir().unwrap();
    let source = artifacts.path().join("run-1/model");
    write_model_dir(&source);

    let tracking = InMemoryTracking::new();
    tracking.insert_model_version(
        ModelVersion::new("Iris Classification Model", 4, source.to_string_lossy())
            .with_tag(APPROVAL_TAG, "approved"),
    );
    tracking.insert_model_version(
        ModelVersion::new("Other", 1, source.to_string_lossy()).with_tag(APPROVAL_TAG, "pending"),
    );

    let target = tempdir().unwrap();
    let store = FsBlobStore::new(target.path(), "models");
    let pipeline = PromotionPipeline::new(&tracking, &tracking, &store);

    let report = pipeline.promote().await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.jobs.len(), 1);
    let JobOutcome::Synced(sync) = &report.jobs[0].outcome else {
        panic!("download failed");
    };
    assert_eq!(sync.uploaded(), 2);
    assert_eq!(sync.excluded(), 3);

    let mirrored = target.path().join("models/Iris Classification Model_v4");
    assert_eq!(
        fs::read_to_string(mirrored.join("data/model.json")).unwrap(),
        "{\"c\":0.25}"
    );
    assert!(mirrored.join("MLmodel").is_file());
    assert!(!mirrored.join("conda.yaml").exists());
    assert!(!mirrored.join("requirements.txt").exists());
    assert!(!target.path().join("models/Other_v1").exists());

    // second pass rewrites the same files
    let again = pipeline.promote().await.unwrap();
    assert!(again.is_complete());
    assert_eq!(fs::read_dir(&mirrored).unwrap().count(), 2);
}
