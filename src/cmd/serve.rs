//! Board server command for `taskboard serve`.

use anyhow::Result;

use taskboard::config::BoardConfig;

pub async fn cmd_serve(config: BoardConfig) -> Result<()> {
    taskboard::board::server::start_server(config).await
}
