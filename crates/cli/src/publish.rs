use console::style;

use crate::Context;

#[derive(Debug, Clone, PartialEq, clap::Args)]
pub struct PublishCommand {
    /// Message payload
    pub message: String,

    /// Number of copies to publish
    #[arg(long, default_value = "1")]
    pub count: usize,
}

impl PublishCommand {
    pub async fn execute(&self, ctx: &Context) -> anyhow::Result<()> {
        ctx.config.validate(false)?;

        let publisher = ctx.publisher(ctx.open_log(false).await?);
        let ids = publisher
            .publish_batch(std::iter::repeat_n(self.message.as_str(), self.count.max(1)))
            .await?;

        for id in &ids {
            println!("{} {}", style("✓").green(), id);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, clap::Args)]
pub struct PendingCommand {}

impl PendingCommand {
    pub async fn execute(&self, ctx: &Context) -> anyhow::Result<()> {
        ctx.config.validate(false)?;

        let publisher = ctx.publisher(ctx.open_log(false).await?);
        let count = publisher
            .pending_messages_count(&ctx.config.redis.streamgroup)
            .await?;

        println!("{}", count);
        Ok(())
    }
}
