use bckapi_core::{lock, shared, ApiObject, ApiService, OnError, Resource};

use crate::cli::GetArgs;
use crate::error::CliError;
use crate::output;

pub async fn run(args: &GetArgs, service: &ApiService, pretty: bool) -> Result<(), CliError> {
    service.refresh_root().await?;

    let resource = shared(ApiObject::named(args.name.as_str()));
    {
        let mut item = lock(&resource);
        let locator = item.locator_mut();
        locator.set_identifier(&args.id, service.registry())?;
        locator.add_filter(args.filters.iter().cloned());
    }

    service.read_async(&resource, OnError::Propagate).await?;

    let item = serde_json::to_value(&*lock(&resource))?;
    output::render(&item, pretty)
}
