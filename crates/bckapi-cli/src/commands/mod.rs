mod get;
mod list;
mod root;

use bckapi_core::config::parse_origin;
use bckapi_core::ApiService;

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub async fn run(cli: &Cli) -> Result<(), CliError> {
    let service = build_service(cli)?;

    match &cli.command {
        Command::Root => root::run(&service, cli.pretty).await,
        Command::Get(args) => get::run(args, &service, cli.pretty).await,
        Command::List(args) => list::run(args, &service).await,
    }
}

/// Environment first, then command-line overrides. Discovery runs once per
/// command, so the background registry refresh stays off.
fn build_service(cli: &Cli) -> Result<ApiService, CliError> {
    let mut builder = ApiService::builder().with_env()?.with_root_refresh(false);
    if let Some(origin) = &cli.origin {
        builder = builder.with_origin(parse_origin(origin)?);
    }
    if let Some(root) = &cli.root {
        builder = builder.with_api_root(root.clone());
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        builder = builder.with_timeout_ms(timeout_ms);
    }
    Ok(builder.build())
}
