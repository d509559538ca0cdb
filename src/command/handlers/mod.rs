//! Command handlers for the built-in command kinds

mod file;
mod hostname;
mod install;
mod lock;
mod message;
mod power;
mod process;
mod shell;
mod update;
mod wol;

pub use file::ReceiveFileHandler;
pub use hostname::HostnameHandler;
pub use install::InstallHandler;
pub use lock::LockHandler;
pub use message::MessageHandler;
pub use power::PowerHandler;
pub use process::{ProcessKillHandler, ProcessListHandler};
pub use shell::ShellHandler;
pub use update::UpdateHandler;
pub use wol::WolHandler;

#[cfg(test)]
pub(crate) mod testing {
    use crate::command::{test_services, CommandHandler, CommandResult, HandlerContext, HandlerServices};
    use crate::config::Deployment;
    use crate::platform::fake::FakeSystem;
    use crate::rpc::fake::FakeRpc;
    use lab_agent_shared::{Command, CommandParams};
    use std::sync::Arc;

    pub const COMMAND_ID: u64 = 1;

    /// Services backed by fakes in a scratch directory
    pub struct Harness {
        pub root: tempfile::TempDir,
        pub rpc: Arc<FakeRpc>,
        pub system: Arc<FakeSystem>,
        pub services: HandlerServices,
    }

    impl Harness {
        pub fn new(rpc: Arc<FakeRpc>, system: Arc<FakeSystem>) -> Self {
            let root = tempfile::tempdir().unwrap();
            let services = test_services(rpc.clone(), system.clone(), root.path(), Deployment::InPlace);
            Self {
                root,
                rpc,
                system,
                services,
            }
        }

        pub async fn run(&self, handler: &dyn CommandHandler, params: CommandParams) -> CommandResult {
            let command = Command::new(COMMAND_ID, "test", params);
            let ctx = HandlerContext {
                command: &command,
                token: "tok",
                server_id: 42,
                services: &self.services,
            };
            handler.handle(&ctx).await
        }
    }

    pub async fn run(
        handler: &dyn CommandHandler,
        system: Arc<FakeSystem>,
        params: CommandParams,
    ) -> CommandResult {
        Harness::new(Arc::new(FakeRpc::new()), system)
            .run(handler, params)
            .await
    }
}
