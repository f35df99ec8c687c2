use strata_core::Config;

// mimalloc keeps fragmentation low under many concurrent streaming buffers,
// especially on musl-based container images.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env();

    let (_state, router) = strata_api::setup::initialize_app(config.clone()).await?;

    strata_api::setup::server::start_server(&config, router).await?;

    Ok(())
}
