//! Database setup command for `taskboard init`.

use anyhow::Result;

use taskboard::board::server::build_state;
use taskboard::config::BoardConfig;

/// Open the database (running migrations) and create the attachment
/// directory. Safe to run against an existing installation.
pub async fn cmd_init(config: &BoardConfig) -> Result<()> {
    build_state(config).await?;
    tracing::debug!(path = %config.database.path.display(), "migrations applied");
    println!(
        "Initialized taskboard database at {}",
        config.database.path.display()
    );
    println!(
        "Attachments will be stored in {}",
        config.attachments.dir.display()
    );
    Ok(())
}
