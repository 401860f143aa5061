use std::sync::Arc;

use config::shared::DumpConfig;

use crate::concurrency::pause::create_pause_channel;
use crate::concurrency::shutdown::create_shutdown_channel;
use crate::context::RunContext;
use crate::test_utils::server::mysql_server_info;

/// Builds a run context for a MySQL server with fresh pause and shutdown channels.
pub fn test_context(config: DumpConfig) -> Arc<RunContext> {
    test_context_with(config, |_| {})
}

/// Like [`test_context`], running `setup` on the context before it is shared.
pub fn test_context_with<F>(config: DumpConfig, setup: F) -> Arc<RunContext>
where
    F: FnOnce(&RunContext),
{
    let (pause_tx, _) = create_pause_channel();
    let (shutdown_tx, _) = create_shutdown_channel();

    let context = RunContext::new(
        Arc::new(config),
        mysql_server_info(),
        Vec::new(),
        pause_tx,
        shutdown_tx,
    );
    setup(&context);

    Arc::new(context)
}
