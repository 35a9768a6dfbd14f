use std::sync::Arc;

use anyhow::Context as _;
use console::style;
use workstream_sdk::{ConsumerGroupClient, WorkQueueError};

use crate::{
    Context,
    controller::Controller,
    server::{self, AppState},
    shutdown_token,
};

#[derive(Debug, Clone, PartialEq, clap::Args)]
pub struct ServeCommand {
    /// Port to run the server on
    #[arg(long, default_value = "3000", env = "PORT")]
    pub port: u16,

    /// Keep the stream in process instead of connecting to Redis
    #[arg(long)]
    pub in_memory: bool,

    /// Run a consumer alongside the server
    #[arg(long)]
    pub with_consumer: bool,
}

impl ServeCommand {
    pub async fn execute(&self, ctx: &Context) -> anyhow::Result<()> {
        ctx.config.validate(self.in_memory)?;

        let log = ctx.open_log(self.in_memory).await?;
        let consumer = ConsumerGroupClient::new(log.clone(), ctx.consumer_config());
        // The status page counts the group's backlog, so make sure it exists
        consumer
            .init_group()
            .await
            .context("Failed to initialize the consumer group")?;

        let transport = if self.in_memory { "memory" } else { "redis" };
        println!();
        println!("{}", style("Workstream").green());
        println!("{} {}", style("Transport").dim(), transport);
        println!("{} {}", style("Stream").dim(), ctx.config.redis.streamname);
        println!("{} {}", style("Group").dim(), ctx.config.redis.streamgroup);
        println!("{} {}", style("Port").dim(), self.port);
        println!();
        println!("{}", style("Endpoints").dim());
        println!("  GET  http://localhost:{}/", self.port);
        println!("  GET  http://localhost:{}/liveness", self.port);
        println!("  GET  http://localhost:{}/readiness", self.port);
        println!("  POST http://localhost:{}/publish-time?count=1", self.port);
        println!();

        let shutdown = shutdown_token();

        let consumer_handle = if self.with_consumer {
            let cancel = shutdown.child_token();
            Some(tokio::spawn(async move { consumer.run(cancel).await }))
        } else {
            None
        };

        let state = AppState {
            controller: Arc::new(Controller::new()),
            publisher: ctx.publisher(log.clone()),
            log,
            group: ctx.config.redis.streamgroup.clone(),
        };
        let served = server::start_server(state, self.port, shutdown.clone()).await;

        // Stop the consumer whether the server exited cleanly or not
        shutdown.cancel();
        if let Some(handle) = consumer_handle {
            match handle.await? {
                Ok(()) | Err(WorkQueueError::Cancelled) => {}
                Err(e) => tracing::error!(error = %e, "Consumer exited with an error"),
            }
        }

        served.context("Server failed")
    }
}
