//! Python interpreter environment preparation.
//!
//! Produces the command prefix that launches the job's code:
//! - `uv`: a `uv run` invocation with `--with` dependency pins;
//! - `venv`: the interpreter inside a caller-provided virtual environment;
//! - `system`: an ephemeral virtual environment created for this run and
//!   deleted afterwards, so inline code never installs into the host
//!   interpreter.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use tempfile::TempDir;
use tokio::process::Command;

use crate::models::{PythonEnvironment, PythonEnvironmentKind};

/// Launch prefix plus the scratch directory keeping an ephemeral venv alive
/// until the run finishes.
pub struct PreparedPython {
    pub command: Vec<String>,
    _scratch: Option<TempDir>,
}

fn venv_python_path(venv_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        venv_dir.join("Scripts").join("python.exe")
    } else {
        venv_dir.join("bin").join("python")
    }
}

fn resolve_python_binary(version: Option<&str>, default: &str) -> String {
    match version.map(str::trim) {
        None | Some("") => default.to_string(),
        Some(v) if v.starts_with("python") => v.to_string(),
        Some(v) => format!("python{v}"),
    }
}

async fn run_checked(program: &str, args: &[String]) -> Result<()> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .with_context(|| format!("failed to launch {program}"))?;
    if !output.status.success() {
        bail!(
            "{program} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

async fn install_requirements(
    python_bin: &str,
    requirements: &[String],
    requirements_file: Option<&str>,
) -> Result<()> {
    if !requirements.is_empty() {
        let mut args = vec![
            "-m".to_string(),
            "pip".to_string(),
            "install".to_string(),
        ];
        args.extend(requirements.iter().cloned());
        run_checked(python_bin, &args).await?;
    }
    if let Some(file) = requirements_file {
        let args = vec![
            "-m".to_string(),
            "pip".to_string(),
            "install".to_string(),
            "-r".to_string(),
            file.to_string(),
        ];
        run_checked(python_bin, &args).await?;
    }
    Ok(())
}

/// Build the interpreter launch prefix for a python executor.
pub async fn prepare_python_command(
    environment: &PythonEnvironment,
    interpreter: &str,
) -> Result<PreparedPython> {
    if environment.kind == PythonEnvironmentKind::Uv {
        let mut command = vec!["uv".to_string(), "run".to_string()];
        if let Some(version) = &environment.python_version {
            command.push("--python".to_string());
            command.push(version.clone());
        }
        for requirement in &environment.requirements {
            command.push("--with".to_string());
            command.push(requirement.clone());
        }
        if let Some(file) = &environment.requirements_file {
            command.push("--requirements".to_string());
            command.push(file.clone());
        }
        command.push(interpreter.to_string());
        return Ok(PreparedPython {
            command,
            _scratch: None,
        });
    }

    // Non-uv execution always goes through a venv for isolation; `system`
    // means "use the system interpreter to create one".
    let (python_bin, scratch) = match &environment.venv_path {
        Some(venv_path) => (
            venv_python_path(Path::new(venv_path))
                .to_string_lossy()
                .into_owned(),
            None,
        ),
        None => {
            let base_python =
                resolve_python_binary(environment.python_version.as_deref(), interpreter);
            let scratch = TempDir::with_prefix("hydra-venv-")
                .context("failed to create venv scratch directory")?;
            run_checked(
                &base_python,
                &[
                    "-m".to_string(),
                    "venv".to_string(),
                    scratch.path().to_string_lossy().into_owned(),
                ],
            )
            .await
            .context("failed to create virtual environment")?;
            (
                venv_python_path(scratch.path()).to_string_lossy().into_owned(),
                Some(scratch),
            )
        }
    };

    if !environment.requirements.is_empty() || environment.requirements_file.is_some() {
        install_requirements(
            &python_bin,
            &environment.requirements,
            environment.requirements_file.as_deref(),
        )
        .await?;
    }

    Ok(PreparedPython {
        command: vec![python_bin],
        _scratch: scratch,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_binary_handles_versions() {
        assert_eq!(resolve_python_binary(None, "python3"), "python3");
        assert_eq!(resolve_python_binary(Some(""), "python3"), "python3");
        assert_eq!(resolve_python_binary(Some("3.12"), "python3"), "python3.12");
        assert_eq!(
            resolve_python_binary(Some("python3.11"), "python3"),
            "python3.11"
        );
    }

    #[cfg(unix)]
    #[test]
    fn venv_python_is_under_bin() {
        let path = venv_python_path(Path::new("/opt/venv"));
        assert_eq!(path, PathBuf::from("/opt/venv/bin/python"));
    }

    #[tokio::test]
    async fn uv_environment_builds_run_prefix() {
        let environment = PythonEnvironment {
            kind: PythonEnvironmentKind::Uv,
            python_version: Some("3.12".to_string()),
            requirements: vec!["requests".to_string()],
            requirements_file: None,
            venv_path: None,
        };
        let prepared = prepare_python_command(&environment, "python3")
            .await
            .unwrap();
        assert_eq!(
            prepared.command,
            vec!["uv", "run", "--python", "3.12", "--with", "requests", "python3"]
        );
    }

    #[tokio::test]
    async fn explicit_venv_uses_its_interpreter() {
        let environment = PythonEnvironment {
            kind: PythonEnvironmentKind::Venv,
            venv_path: Some("/opt/venv".to_string()),
            ..Default::default()
        };
        let prepared = prepare_python_command(&environment, "python3")
            .await
            .unwrap();
        assert_eq!(prepared.command.len(), 1);
        assert!(prepared.command[0].contains("venv"));
    }
}
