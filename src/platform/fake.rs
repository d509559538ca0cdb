//! Recording `SystemActions` used by unit tests

use super::runner::{ProcessOutput, RunError};
use super::{PowerAction, SoftwareEntry, SystemActions};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use lab_agent_shared::ProcessInfo;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub struct FakeState {
    pub interactive: bool,
    /// Every side effect, in call order
    pub calls: Vec<String>,
    pub lock_fails: bool,
    pub alert_fails: bool,
    pub rename_fails: bool,
    /// Canned shell result; `None` means the command timed out
    pub shell_result: Option<ProcessOutput>,
    /// Canned result for `run_program`, keyed by program name
    pub program_results: Vec<(String, ProcessOutput)>,
    pub processes: Vec<ProcessInfo>,
    pub delivery_dirs: Vec<PathBuf>,
    pub fallback_dir: PathBuf,
    pub wallpaper: Option<PathBuf>,
    pub software: Vec<SoftwareEntry>,
}

pub struct FakeSystem {
    pub platform: &'static str,
    pub state: Mutex<FakeState>,
}

impl FakeSystem {
    pub fn new(platform: &'static str) -> Self {
        Self {
            platform,
            state: Mutex::new(FakeState {
                interactive: true,
                shell_result: Some(ProcessOutput {
                    code: Some(0),
                    ..Default::default()
                }),
                ..Default::default()
            }),
        }
    }

    pub fn with_state(platform: &'static str, f: impl FnOnce(&mut FakeState)) -> Self {
        let fake = Self::new(platform);
        f(&mut fake.state.lock().unwrap());
        fake
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl SystemActions for FakeSystem {
    fn platform(&self) -> &'static str {
        self.platform
    }

    fn hostname(&self) -> String {
        "fake-host".into()
    }

    fn has_interactive_session(&self) -> bool {
        self.state.lock().unwrap().interactive
    }

    async fn power(&self, action: PowerAction, delay: Duration) -> Result<()> {
        self.record(format!("power {:?} {}", action, delay.as_secs()));
        Ok(())
    }

    async fn lock_session(&self) -> Result<String> {
        self.record("lock".into());
        if self.state.lock().unwrap().lock_fails {
            return Err(anyhow!("loginctl: exit code 1; xdg-screensaver: not found"));
        }
        Ok("loginctl".into())
    }

    async fn show_alert(&self, text: &str) -> Result<()> {
        self.record(format!("alert {text}"));
        if self.state.lock().unwrap().alert_fails {
            return Err(anyhow!("no display"));
        }
        Ok(())
    }

    async fn notify(&self, title: &str, body: &str) -> Result<()> {
        self.record(format!("notify {title}: {body}"));
        Err(anyhow!("no notification daemon"))
    }

    async fn rename_host(&self, new_name: &str) -> Result<()> {
        self.record(format!("rename {new_name}"));
        if self.state.lock().unwrap().rename_fails {
            return Err(anyhow!("access denied"));
        }
        Ok(())
    }

    async fn run_shell(&self, command_line: &str, limit: Duration) -> Result<ProcessOutput, RunError> {
        self.record(format!("shell {command_line}"));
        self.state
            .lock()
            .unwrap()
            .shell_result
            .clone()
            .ok_or(RunError::TimedOut(limit))
    }

    async fn run_program(
        &self,
        program: &str,
        args: &[String],
        _cwd: Option<&Path>,
        _limit: Duration,
    ) -> Result<ProcessOutput, RunError> {
        self.record(format!("run {} {}", program, args.join(" ")));
        let state = self.state.lock().unwrap();
        let name = Path::new(program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(state
            .program_results
            .iter()
            .find(|(p, _)| *p == name || p == program)
            .map(|(_, out)| out.clone())
            .unwrap_or(ProcessOutput {
                code: Some(0),
                ..Default::default()
            }))
    }

    fn spawn_detached(&self, program: &Path, args: &[String]) -> Result<()> {
        self.record(format!("spawn {} {}", program.display(), args.join(" ")));
        Ok(())
    }

    async fn processes(&self, limit: usize) -> Vec<ProcessInfo> {
        let mut rows = self.state.lock().unwrap().processes.clone();
        rows.truncate(limit);
        rows
    }

    async fn terminate(&self, pid: u32, _grace: Duration) -> Result<()> {
        self.record(format!("terminate {pid}"));
        let known = self
            .state
            .lock()
            .unwrap()
            .processes
            .iter()
            .any(|p| p.pid == pid);
        if known {
            Ok(())
        } else {
            Err(anyhow!("Process {pid} not found"))
        }
    }

    fn delivery_dirs(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().delivery_dirs.clone()
    }

    fn fallback_delivery_dir(&self) -> PathBuf {
        self.state.lock().unwrap().fallback_dir.clone()
    }

    async fn installed_software(&self) -> Vec<SoftwareEntry> {
        self.state.lock().unwrap().software.clone()
    }

    async fn current_wallpaper(&self) -> Option<PathBuf> {
        self.state.lock().unwrap().wallpaper.clone()
    }

    async fn apply_wallpaper(&self, image: &Path) -> Result<()> {
        self.record(format!("wallpaper {}", image.display()));
        self.state.lock().unwrap().wallpaper = Some(image.to_path_buf());
        Ok(())
    }
}
