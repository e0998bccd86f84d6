//! `cargo` toolchain invocation.

use super::tool_detection::{CARGO, RUSTC};
use super::{BuiltArtifact, Toolchain};
use crate::config::ToolchainConfig;
use crate::release::error::{BuildError, PrepError};
use crate::release::matrix::{BinarySpec, BuildJob};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Builds binaries with `cargo +<pinned channel>`.
///
/// Every invocation uses the pinned channel, the configured profile and a
/// job-scoped `--target-dir`, so concurrent jobs never share build output.
#[derive(Debug, Clone)]
pub struct CargoToolchain {
    manifest_dir: PathBuf,
    profile: String,
    build_std: bool,
    locked: bool,
    timeout: Duration,
}

/// Outcome of one toolchain process
struct ProcessOutput {
    status: std::process::ExitStatus,
    stderr: String,
}

impl CargoToolchain {
    /// Creates a toolchain that builds the crate rooted at `manifest_dir`
    pub fn new(manifest_dir: impl Into<PathBuf>, config: &ToolchainConfig) -> Self {
        Self {
            manifest_dir: manifest_dir.into(),
            profile: config.profile.clone(),
            build_std: config.build_std,
            locked: config.locked,
            timeout: Duration::from_secs(config.timeout_minutes * 60),
        }
    }

    /// Arguments passed to `cargo` for one binary
    pub fn build_args(&self, job: &BuildJob, binary: &BinarySpec, target_dir: &Path) -> Vec<String> {
        let mut args = vec![
            format!("+{}", job.toolchain_channel),
            "build".to_string(),
            "--profile".to_string(),
            self.profile.clone(),
            "--bin".to_string(),
            binary.name.clone(),
            "--target".to_string(),
            job.triple().to_string(),
            "--target-dir".to_string(),
            target_dir.display().to_string(),
        ];

        if self.locked {
            args.push("--locked".to_string());
        }
        if !binary.default_features {
            args.push("--no-default-features".to_string());
        }
        if !binary.features.is_empty() {
            args.push("--features".to_string());
            args.push(binary.features.to_cargo_arg());
        }
        if self.build_std {
            args.extend(
                [
                    "-Z",
                    "build-std=std,panic_abort",
                    "-Z",
                    "build-std-features=panic_immediate_abort",
                ]
                .map(String::from),
            );
        }

        args
    }

    /// Where cargo places the binary for this job and profile
    pub fn artifact_path(&self, job: &BuildJob, binary: &BinarySpec, target_dir: &Path) -> PathBuf {
        // cargo names the output directory of the dev profile "debug"
        let profile_dir = match self.profile.as_str() {
            "dev" => "debug",
            other => other,
        };
        target_dir
            .join(job.triple())
            .join(profile_dir)
            .join(format!("{}{}", binary.name, job.os.exe_extension()))
    }

    /// Runs a process, streaming stdout to the debug log and capturing stderr
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<Option<ProcessOutput>> {
        let mut child = Command::new(program)
            .args(args)
            .current_dir(&self.manifest_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Drain both pipes concurrently so neither blocks the child
        let streams = async {
            tokio::join!(
                async {
                    if let Some(stdout) = stdout {
                        let mut lines = BufReader::new(stdout).lines();
                        while let Ok(Some(line)) = lines.next_line().await {
                            log::debug!("{}", line);
                        }
                    }
                },
                async {
                    let mut captured = Vec::new();
                    if let Some(stderr) = stderr {
                        let mut lines = BufReader::new(stderr).lines();
                        while let Ok(Some(line)) = lines.next_line().await {
                            log::trace!("{}", line);
                            captured.push(line);
                        }
                    }
                    captured
                }
            )
        };

        let finished = tokio::time::timeout(self.timeout, async {
            let (_, stderr_lines) = streams.await;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>(ProcessOutput {
                status,
                stderr: stderr_lines.join("\n"),
            })
        })
        .await;

        match finished {
            Ok(result) => result.map(Some),
            Err(_elapsed) => {
                if let Err(e) = child.kill().await {
                    log::warn!("Failed to kill timed out toolchain process: {}", e);
                }
                Ok(None)
            }
        }
    }
}

impl Toolchain for CargoToolchain {
    async fn prepare(&self, job: &BuildJob) -> Result<(), PrepError> {
        let Some(prep) = &job.prep else {
            return Ok(());
        };
        let Some((program, args)) = prep.command.split_first() else {
            return Ok(());
        };

        log::info!("[{}] Running prep step: {}", job.id, prep.display());

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| PrepError::Spawn {
                job: job.id.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(PrepError::Failed {
                job: job.id.clone(),
                command: prep.display(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }

    async fn build(
        &self,
        job: &BuildJob,
        binary: &BinarySpec,
        target_dir: &Path,
    ) -> Result<BuiltArtifact, BuildError> {
        let cargo = CARGO.as_ref().ok_or_else(|| BuildError::Spawn {
            job: job.id.clone(),
            binary: binary.name.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "cargo not found in PATH"),
        })?;

        let args = self.build_args(job, binary, target_dir);
        log::info!(
            "[{}] Building {} ({}) with {}",
            job.id,
            binary.name,
            binary.variant,
            job.toolchain_channel
        );
        log::debug!("[{}] cargo {}", job.id, args.join(" "));

        let output = self
            .run(cargo, &args)
            .await
            .map_err(|source| BuildError::Spawn {
                job: job.id.clone(),
                binary: binary.name.clone(),
                source,
            })?
            .ok_or_else(|| BuildError::Timeout {
                job: job.id.clone(),
                binary: binary.name.clone(),
                minutes: self.timeout.as_secs() / 60,
            })?;

        if !output.status.success() {
            return Err(BuildError::Toolchain {
                job: job.id.clone(),
                binary: binary.name.clone(),
                diagnostics: output.stderr,
            });
        }

        let path = self.artifact_path(job, binary, target_dir);
        BuiltArtifact::from_path(job, binary, path).await
    }

    async fn version_report(&self, job: &BuildJob) -> Result<String, BuildError> {
        let spawn_error = |source: std::io::Error| BuildError::Spawn {
            job: job.id.clone(),
            binary: "rustc".to_string(),
            source,
        };
        let rustc = RUSTC.as_ref().ok_or_else(|| {
            spawn_error(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "rustc not found in PATH",
            ))
        })?;

        let output = Command::new(rustc)
            .arg(format!("+{}", job.toolchain_channel))
            .args(["--version", "--verbose"])
            .output()
            .await
            .map_err(spawn_error)?;

        if !output.status.success() {
            return Err(BuildError::Toolchain {
                job: job.id.clone(),
                binary: "rustc".to_string(),
                diagnostics: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReleaseConfig;
    use crate::release::matrix::build_matrix;

    fn toolchain(config: &ReleaseConfig) -> CargoToolchain {
        CargoToolchain::new(".", &config.toolchain)
    }

    #[test]
    fn build_args_pin_channel_and_isolate_target_dir() {
        let config = ReleaseConfig::default();
        let jobs = build_matrix(&config).unwrap();
        let job = &jobs[0];
        let lite = &job.binaries[1];

        let args = toolchain(&config).build_args(job, lite, Path::new("/work/linux/target"));

        assert_eq!(args[0], "+nightly-2025-06-01");
        assert!(args.windows(2).any(|w| w == ["--target-dir", "/work/linux/target"]));
        assert!(args.windows(2).any(|w| w == ["--bin", "qsvlite"]));
        assert!(args.windows(2).any(|w| w == ["--features", "lite,nightly,self_update"]));
        assert!(args.contains(&"--no-default-features".to_string()));
        assert!(args.contains(&"--locked".to_string()));
        assert!(args.contains(&"build-std-features=panic_immediate_abort".to_string()));
    }

    #[test]
    fn build_std_can_be_disabled() {
        let mut config = ReleaseConfig::default();
        config.toolchain.build_std = false;
        let jobs = build_matrix(&config).unwrap();
        let args = toolchain(&config).build_args(&jobs[0], &jobs[0].binaries[0], Path::new("t"));
        assert!(!args.iter().any(|a| a == "-Z"));
        assert!(!args.contains(&"--no-default-features".to_string()));
    }

    #[test]
    fn windows_artifacts_have_exe_extension() {
        let config = ReleaseConfig::default();
        let jobs = build_matrix(&config).unwrap();
        let windows = jobs.iter().find(|j| j.id == "x86_64-pc-windows-msvc").unwrap();
        let path = toolchain(&config).artifact_path(windows, &windows.binaries[0], Path::new("t"));
        assert_eq!(
            path,
            Path::new("t/x86_64-pc-windows-msvc/release/qsv.exe")
        );
    }
}
