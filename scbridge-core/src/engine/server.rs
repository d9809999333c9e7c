use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use crate::config::{config_dir, EngineSettings};

const SCSYNTH_PATHS: [&str; 4] = [
    "scsynth",
    "/Applications/SuperCollider.app/Contents/Resources/scsynth",
    "/usr/local/bin/scsynth",
    "/usr/bin/scsynth",
];

/// A scsynth child process started by the bridge.
pub struct EngineProcess {
    child: Option<Child>,
    log_path: PathBuf,
}

/// Command-line arguments for a UDP scsynth on `port`.
pub fn scsynth_args(port: u16, extra: &[String]) -> Vec<String> {
    let mut args = vec!["-u".to_string(), port.to_string()];
    args.extend(extra.iter().cloned());
    args
}

impl EngineProcess {
    /// Spawn scsynth listening on the engine port from `settings`.
    /// Output goes to `scsynth.log` in the config dir for crash diagnostics.
    pub fn spawn(settings: &EngineSettings) -> Result<Self, String> {
        let port = settings.port().ok_or_else(|| {
            format!("Cannot spawn scsynth: no port in engine address '{}'", settings.address)
        })?;
        let args = scsynth_args(port, &settings.scsynth_args);

        let log_path = config_dir().join("scsynth.log");
        if let Some(parent) = log_path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let log_file = fs::File::create(&log_path).ok();

        let mut candidates: Vec<String> = Vec::new();
        if let Some(path) = &settings.scsynth_path {
            candidates.push(path.to_string_lossy().to_string());
        }
        candidates.extend(SCSYNTH_PATHS.iter().map(|s| s.to_string()));

        for path in &candidates {
            let stdout = log_file
                .as_ref()
                .and_then(|f| f.try_clone().ok())
                .map(Stdio::from)
                .unwrap_or_else(Stdio::null);
            let stderr = log_file
                .as_ref()
                .and_then(|f| f.try_clone().ok())
                .map(Stdio::from)
                .unwrap_or_else(Stdio::null);
            match Command::new(path).args(&args).stdout(stdout).stderr(stderr).spawn() {
                Ok(child) => {
                    log::info!(target: "engine::server", "spawned {} {} (pid {})", path, args.join(" "), child.id());
                    return Ok(Self {
                        child: Some(child),
                        log_path,
                    });
                }
                Err(e) => {
                    log::debug!(target: "engine::server", "could not spawn {}: {}", path, e);
                }
            }
        }

        Err("Could not find scsynth. Install SuperCollider.".to_string())
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Check whether the child has exited. Returns a message if it died.
    pub fn check_health(&mut self) -> Option<String> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => {
                self.child = None;
                Some(format!("scsynth exited ({})", status))
            }
            _ => None,
        }
    }

    pub fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            log::info!(target: "engine::server", "stopping scsynth (pid {})", child.id());
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        self.stop();
    }
}
