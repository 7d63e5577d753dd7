mod args;

use args::Args;

mod core;

use crate::core::{CoordinatorServer, MrdCoordinator};

mod clients;
mod failures;
mod fault;
mod job;
mod phase;
mod registry;
mod tasks;

#[cfg(test)]
mod doubles;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tonic::transport::Server;
use tracing::info;

use crate::clients::{Clients, GrpcEventLog, GrpcMapResultsGc, GrpcOobStore, GrpcWorkerPool};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let addr: SocketAddr = format!("[::1]:{}", args.port).parse()?;

    let clients = Clients {
        worker: Arc::new(GrpcWorkerPool::connect(args.worker_pool_url).await?),
        events: Arc::new(GrpcEventLog::connect(args.event_log_url).await?),
        oob: Arc::new(GrpcOobStore::connect(args.oob_url).await?),
        gc: Arc::new(GrpcMapResultsGc::connect(args.gc_url).await?),
    };

    let coordinator = MrdCoordinator::new(clients, args.max_failure_rate);

    info!("CoordinatorServer listening on {}", addr);
    Server::builder()
        .add_service(CoordinatorServer::new(coordinator))
        .serve(addr)
        .await?;

    Ok(())
}
