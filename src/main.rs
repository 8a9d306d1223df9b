use mapdl::{
    commands,
    config::{self, Command, LogFormat},
};
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mapdl=info"));
    // stderr, so `list --json` output stays clean
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    let config = config::config();
    init_tracing(config.log_format);
    color_eyre::install()?;

    tracing::debug!(
        maps_dir = ?config.paths.maps_dir(),
        temp_dir = ?config.paths.temp_dir(),
        mirrors = config.mirrors.mirrors.len(),
        "Loaded configuration"
    );

    match &config.command {
        Command::List {
            search,
            all_mirrors,
            json,
        } => commands::list(&config, search.as_deref(), *all_mirrors, *json).await,
        Command::Download { search, names } => {
            commands::download(&config, search.as_deref(), names).await
        }
        Command::Delete { names } => commands::delete(&config, names).await,
        Command::Installed => commands::installed(&config),
        Command::Watch => commands::watch(&config).await,
    }
}
