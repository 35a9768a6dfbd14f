use anyhow::Context as _;
use console::style;
use workstream_sdk::{ConsumerGroupClient, WorkQueueError};

use crate::{Context, shutdown_token};

#[derive(Debug, Clone, PartialEq, clap::Args)]
pub struct ConsumeCommand {
    /// Fixed consumer identity (a random one is generated when unset)
    #[arg(long = "consumer-id")]
    pub consumer_id: Option<String>,
}

impl ConsumeCommand {
    pub async fn execute(&self, ctx: &Context) -> anyhow::Result<()> {
        ctx.config.validate(false)?;

        let log = ctx.open_log(false).await?;

        let mut config = ctx.consumer_config();
        if let Some(id) = &self.consumer_id {
            config = config.with_consumer_id(id);
        }

        println!();
        println!("{}", style("Workstream consumer").green());
        println!("{} {}", style("Stream").dim(), config.stream_name);
        println!("{} {}", style("Group").dim(), config.group_name);
        println!("{} {} bytes", style("Work").dim(), config.data_size_bytes);
        println!("{}", style("Press Ctrl+C to stop").dim());
        println!();

        let client = ConsumerGroupClient::new(log, config);
        client
            .init_group()
            .await
            .context("Failed to initialize the consumer group")?;

        match client.run(shutdown_token()).await {
            Ok(()) | Err(WorkQueueError::Cancelled) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
