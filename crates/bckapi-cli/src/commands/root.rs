use bckapi_core::ApiService;
use serde_json::json;

use crate::error::CliError;
use crate::output;

pub async fn run(service: &ApiService, pretty: bool) -> Result<(), CliError> {
    service.refresh_root().await?;
    let registry = service.registry();

    output::render(
        &json!({
            "origin": registry.origin().as_str(),
            "root": registry.root_path(),
            "resources": registry.snapshot(),
        }),
        pretty,
    )
}
