use std::panic;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::core::domain::ExecutionOutcome;
use crate::core::pipeline::validating::Validator;
use crate::core::traits::executor::Executor;
use crate::dataset::FsDataset;
use crate::native::executor::NativeExecutor;
use crate::server::services::ValidationService;
use crate::stubs::executor::ExecutorStub;

mod config;
mod constants;
mod core;
mod dataset;
mod native;
mod server;
mod stubs;

#[tokio::main]
#[tracing::instrument]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    set_panic_hook();

    let config = Config::from_env()?;
    tracing::info!("Configuration: {:?}", config);

    let executor: Arc<dyn Executor> = if config.use_stub_executor {
        tracing::warn!("Using stub executor, submissions are not compiled");
        Arc::new(ExecutorStub::new(
            vec![Ok(ExecutionOutcome {
                stdout: "Hello World\n".to_string(),
                elapsed_ms: 100,
                entry_point_invoked: true,
                ..Default::default()
            })],
            Duration::from_millis(100),
        ))
    } else {
        tokio::fs::create_dir_all(&config.work_dir).await?;
        Arc::new(
            NativeExecutor::new(&config.work_dir, &config.gnucpp_path)
                .with_output_limit(config.output_limit_bytes),
        )
    };

    let validator = Validator::new(Arc::new(FsDataset::new(&config.contests_dir)), executor);
    let service = Arc::new(ValidationService::new(
        validator,
        config.default_timeout_ms,
    ));

    let listener = TcpListener::bind(config.listen_addr).await?;
    tracing::info!("Validation server listening on {}", config.listen_addr);
    server::serve(listener, service).await?;

    Ok(())
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
