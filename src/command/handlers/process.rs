//! Process listing and termination handlers

use crate::command::{CommandHandler, CommandResult, HandlerContext};
use async_trait::async_trait;
use lab_agent_shared::limits;
use std::time::Duration;

/// Top processes by CPU share, as JSON
pub struct ProcessListHandler;

#[async_trait]
impl CommandHandler for ProcessListHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> CommandResult {
        let rows = ctx.services.system.processes(limits::PROCESS_LIST_LIMIT).await;
        match serde_json::to_string(&rows) {
            Ok(json) => CommandResult::completed(json),
            Err(e) => CommandResult::failed(format!("Failed to encode process list: {e}")),
        }
    }
}

pub struct ProcessKillHandler;

#[async_trait]
impl CommandHandler for ProcessKillHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> CommandResult {
        let Some(pid) = ctx.params().u64("pid") else {
            return CommandResult::failed("Missing required parameter: pid");
        };
        let Ok(pid) = u32::try_from(pid) else {
            return CommandResult::failed(format!("Invalid pid: {pid}"));
        };

        let grace = Duration::from_millis(limits::KILL_GRACE_MS);
        match ctx.services.system.terminate(pid, grace).await {
            Ok(()) => CommandResult::completed(format!("Process {pid} killed.")),
            Err(e) => CommandResult::failed(format!("Failed to kill process {pid}: {e:#}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::handlers::testing::run;
    use crate::platform::fake::FakeSystem;
    use lab_agent_shared::{CommandParams, ProcessInfo};
    use std::sync::Arc;

    fn proc(pid: u32, name: &str, cpu: f32) -> ProcessInfo {
        ProcessInfo {
            pid,
            name: name.into(),
            cpu_percent: cpu,
            memory_percent: 1.0,
            create_time: 0,
        }
    }

    #[tokio::test]
    async fn test_list_is_json() {
        let system = Arc::new(FakeSystem::with_state("linux", |s| {
            s.processes = vec![proc(10, "firefox", 40.0), proc(11, "code", 12.5)];
        }));
        let result = run(&ProcessListHandler, system, CommandParams::new()).await;
        let rows: Vec<ProcessInfo> = serde_json::from_str(result.message()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "firefox");
    }

    #[tokio::test]
    async fn test_kill_accepts_string_pid() {
        let system = Arc::new(FakeSystem::with_state("linux", |s| {
            s.processes = vec![proc(4321, "game", 90.0)];
        }));
        let result = run(&ProcessKillHandler, system.clone(), CommandParams::new().with("pid", "4321")).await;
        assert_eq!(result, CommandResult::completed("Process 4321 killed."));
        assert_eq!(system.calls(), vec!["terminate 4321".to_string()]);
    }

    #[tokio::test]
    async fn test_kill_unknown_pid_fails() {
        let system = Arc::new(FakeSystem::new("linux"));
        let result = run(&ProcessKillHandler, system, CommandParams::new().with("pid", 77)).await;
        assert!(result.message().starts_with("Failed to kill process 77"));
    }
}
