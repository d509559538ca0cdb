//! File delivery handler

use crate::acquire::{is_http_url, SourceKind};
use crate::command::{CommandHandler, CommandResult, HandlerContext};
use async_trait::async_trait;
use lab_agent_shared::limits;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Name used for uploads when the server gives none
const UPLOAD_DEFAULT_NAME: &str = "downloaded_file.dat";

pub struct ReceiveFileHandler;

impl ReceiveFileHandler {
    async fn receive(&self, ctx: &HandlerContext<'_>, url: &str) -> anyhow::Result<PathBuf> {
        let params = ctx.params();
        let source = match params.str("source_type") {
            Some(raw) => SourceKind::parse(raw)
                .ok_or_else(|| anyhow::anyhow!("Unknown source_type: {raw}"))?,
            None if is_http_url(url) => SourceKind::Link,
            None => SourceKind::NetworkPath,
        };
        let name = match (params.str("filename"), source) {
            (Some(name), _) => Some(name),
            (None, SourceKind::Upload) => Some(UPLOAD_DEFAULT_NAME),
            (None, _) => None,
        };

        let acquirer = &ctx.services.acquirer;
        let dest_dir = acquirer.resolve_destination()?;
        info!("[CMD] Receiving {} into {}", url, dest_dir.display());

        let path = match source {
            SourceKind::Upload => self.fetch(ctx, url, &dest_dir, name).await?,
            SourceKind::Link if is_http_url(url) => self.fetch(ctx, url, &dest_dir, name).await?,
            SourceKind::Link | SourceKind::NetworkPath => {
                acquirer.copy(Path::new(url), &dest_dir, name).await?
            }
        };
        acquirer.notify_placed(&path).await;
        Ok(path)
    }

    async fn fetch(
        &self,
        ctx: &HandlerContext<'_>,
        url: &str,
        dest_dir: &Path,
        name: Option<&str>,
    ) -> anyhow::Result<PathBuf> {
        let token = ctx.params().bool("auth_required", false).then_some(ctx.token);
        let url = ctx.services.config.absolute_url(url);
        ctx.services
            .acquirer
            .download(
                token,
                &url,
                dest_dir,
                name,
                Duration::from_millis(limits::FILE_TRANSFER_TIMEOUT_MS),
            )
            .await
    }
}

#[async_trait]
impl CommandHandler for ReceiveFileHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> CommandResult {
        let url = match ctx.require(&["url"]) {
            Ok(url) => url,
            Err(missing) => return missing,
        };
        match self.receive(ctx, url).await {
            Ok(path) => CommandResult::completed(format!("File successfully saved to {}", path.display())),
            Err(e) => CommandResult::failed(format!("Error: {e:#}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::handlers::testing::Harness;
    use crate::platform::fake::FakeSystem;
    use crate::rpc::fake::FakeRpc;
    use lab_agent_shared::CommandParams;
    use std::fs;
    use std::sync::Arc;

    fn system_with_drop(dir: &Path) -> Arc<FakeSystem> {
        let received = dir.join("Received");
        let fallback = dir.join("fallback");
        Arc::new(FakeSystem::with_state("linux", |s| {
            s.delivery_dirs = vec![received];
            s.fallback_dir = fallback;
        }))
    }

    #[tokio::test]
    async fn test_authenticated_upload_uses_default_name() {
        let drop = tempfile::tempdir().unwrap();
        let rpc = Arc::new(FakeRpc::new());
        rpc.add_download("http://inventory.test/files/9", None, b"slides");
        let h = Harness::new(rpc.clone(), system_with_drop(drop.path()));

        let result = h
            .run(
                &ReceiveFileHandler,
                CommandParams::new()
                    .with("source_type", "upload")
                    .with("url", "http://inventory.test/files/9")
                    .with("auth_required", true),
            )
            .await;

        let saved = drop.path().join("Received").join(UPLOAD_DEFAULT_NAME);
        assert_eq!(
            result,
            CommandResult::completed(format!("File successfully saved to {}", saved.display()))
        );
        assert_eq!(fs::read(&saved).unwrap(), b"slides");
        assert_eq!(
            rpc.state.lock().unwrap().download_tokens,
            vec![Some("tok".to_string())]
        );
        // notification failing does not fail the delivery
        assert!(h.system.calls().iter().any(|c| c.starts_with("notify")));
    }

    #[tokio::test]
    async fn test_network_path_is_copied_with_sanitized_name() {
        let drop = tempfile::tempdir().unwrap();
        let share = tempfile::tempdir().unwrap();
        let source = share.path().join("handout.pdf");
        fs::write(&source, b"pdf").unwrap();
        let h = Harness::new(Arc::new(FakeRpc::new()), system_with_drop(drop.path()));

        let result = h
            .run(
                &ReceiveFileHandler,
                CommandParams::new()
                    .with("source_type", "network_path")
                    .with("url", source.display().to_string())
                    .with("filename", "week<1>.pdf"),
            )
            .await;

        assert!(result.is_success(), "{result:?}");
        assert_eq!(fs::read(drop.path().join("Received").join("week1.pdf")).unwrap(), b"pdf");
    }

    #[tokio::test]
    async fn test_missing_source_fails() {
        let drop = tempfile::tempdir().unwrap();
        let h = Harness::new(Arc::new(FakeRpc::new()), system_with_drop(drop.path()));
        let result = h
            .run(
                &ReceiveFileHandler,
                CommandParams::new()
                    .with("source_type", "link")
                    .with("url", drop.path().join("nope.txt").display().to_string()),
            )
            .await;
        assert!(result.message().starts_with("Error: source file not found"));
    }

    #[tokio::test]
    async fn test_missing_url_fails() {
        let drop = tempfile::tempdir().unwrap();
        let h = Harness::new(Arc::new(FakeRpc::new()), system_with_drop(drop.path()));
        let result = h.run(&ReceiveFileHandler, CommandParams::new()).await;
        assert_eq!(result, CommandResult::failed("Missing required parameter: url"));
    }
}
