use nightly_publish::config::ReleaseConfig;
use nightly_publish::release::packager::GENERATED_PREFIX;
use nightly_publish::release::{
    BuildJob, BuiltArtifact, Packager, ReleaseContext, ReleaseTag, build_matrix,
};
use std::path::Path;

fn job(id: &str) -> BuildJob {
    build_matrix(&ReleaseConfig::default())
        .unwrap()
        .into_iter()
        .find(|j| j.id == id)
        .unwrap()
}

/// Writes every binary of `job` (plus a `.d` sidecar) under `target_dir`
async fn fake_build(job: &BuildJob, target_dir: &Path) -> Vec<BuiltArtifact> {
    let dir = target_dir.join(job.triple()).join("release");
    std::fs::create_dir_all(&dir).unwrap();
    let mut artifacts = Vec::new();
    for binary in &job.binaries {
        let path = dir.join(format!("{}{}", binary.name, job.os.exe_extension()));
        std::fs::write(&path, format!("bin:{}", binary.name)).unwrap();
        std::fs::write(dir.join(format!("{}.d", binary.name)), "deps").unwrap();
        artifacts.push(BuiltArtifact::from_path(job, binary, path).await.unwrap());
    }
    artifacts
}

fn ctx() -> ReleaseContext {
    ReleaseContext::new("qsv", "nightly", ReleaseTag::new("v1.2.0"))
}

#[tokio::test]
async fn bundle_is_deterministic_except_generated_line() {
    let dir = tempfile::tempdir().unwrap();
    let job = job("x86_64-unknown-linux-gnu");
    let artifacts = fake_build(&job, &dir.path().join("target")).await;
    let packager = Packager::new(&["*.d".to_string()]).unwrap();

    let first = packager
        .package(&ctx(), &job, &artifacts, "rustc 1.89.0-nightly", &dir.path().join("a"))
        .await
        .unwrap();
    let second = packager
        .package(&ctx(), &job, &artifacts, "rustc 1.89.0-nightly", &dir.path().join("b"))
        .await
        .unwrap();

    let names = |b: &nightly_publish::release::Bundle| {
        b.files().iter().map(|f| f.name.clone()).collect::<Vec<_>>()
    };
    assert_eq!(names(&first), names(&second));
    assert_eq!(
        names(&first),
        vec![
            "qsv_nightly",
            "qsv_nightly_rust_version_info.txt",
            "qsvdp_nightly",
            "qsvlite_nightly",
        ]
    );

    for (a, b) in first.files().iter().zip(second.files()) {
        let a_data = std::fs::read_to_string(&a.path).unwrap();
        let b_data = std::fs::read_to_string(&b.path).unwrap();
        if a.name == first.version_report() {
            let (a_head, a_rest) = a_data.split_once('\n').unwrap();
            let (b_head, b_rest) = b_data.split_once('\n').unwrap();
            assert!(a_head.starts_with(GENERATED_PREFIX));
            assert!(b_head.starts_with(GENERATED_PREFIX));
            assert_eq!(a_rest, b_rest);
        } else {
            assert_eq!(a_data, b_data);
            assert_eq!(a.unix_mode, 0o755);
        }
    }
}

#[tokio::test]
async fn sidecars_are_stripped_from_staging() {
    let dir = tempfile::tempdir().unwrap();
    let job = job("x86_64-apple-darwin");
    let artifacts = fake_build(&job, &dir.path().join("target")).await;
    let packager = Packager::new(&["*.d".to_string()]).unwrap();

    let bundle = packager
        .package(&ctx(), &job, &artifacts, "rustc", dir.path())
        .await
        .unwrap();

    assert_eq!(bundle.stripped(), ["qsv.d", "qsvdp.d", "qsvlite.d"]);
    assert_eq!(bundle.staging_dir(), dir.path().join("v1.2.0"));
    let on_disk: Vec<String> = std::fs::read_dir(bundle.staging_dir())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(on_disk.iter().all(|n| !n.ends_with(".d")));
    assert_eq!(on_disk.len(), 4);
}

#[tokio::test]
async fn windows_binaries_keep_exe_extension() {
    let dir = tempfile::tempdir().unwrap();
    let job = job("x86_64-pc-windows-msvc");
    let artifacts = fake_build(&job, &dir.path().join("target")).await;
    let packager = Packager::new(&["*.d".to_string()]).unwrap();

    let bundle = packager
        .package(&ctx(), &job, &artifacts, "rustc", dir.path())
        .await
        .unwrap();

    let names: Vec<&str> = bundle.files().iter().map(|f| f.name.as_str()).collect();
    assert!(names.contains(&"qsv_nightly.exe"));
    assert!(names.contains(&"qsvlite_nightly.exe"));
    assert!(names.contains(&"qsvdp_nightly.exe"));
}

#[tokio::test]
async fn staging_is_erased_between_runs() {
    let dir = tempfile::tempdir().unwrap();
    let job = job("x86_64-unknown-linux-gnu");
    let artifacts = fake_build(&job, &dir.path().join("target")).await;
    let packager = Packager::new(&["*.d".to_string()]).unwrap();

    let staging = dir.path().join("v1.2.0");
    std::fs::create_dir_all(&staging).unwrap();
    std::fs::write(staging.join("leftover"), "stale").unwrap();

    let bundle = packager
        .package(&ctx(), &job, &artifacts, "rustc", dir.path())
        .await
        .unwrap();

    assert!(!staging.join("leftover").exists());
    assert!(bundle.files().iter().all(|f| f.name != "leftover"));
}
