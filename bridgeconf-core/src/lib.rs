pub mod autoconf;
pub mod bridge;
pub mod clock;
pub mod config;
pub mod console;
pub mod country;
pub mod error;
pub mod http;
pub mod logging;
pub mod moat;
pub mod on_demand;
pub mod paths;
pub mod registry;
pub mod settings;
pub mod signing;
pub mod storage;
pub mod transport;

pub use autoconf::{AutoConf, Decision};
pub use bridge::{BridgeLine, Descriptor};
pub use error::ApiError;
pub use registry::{BridgeKind, BridgeRegistry};
pub use transport::Transport;

use anyhow::Context;

pub fn run_console(args: &[String]) -> anyhow::Result<()> {
  let base = paths::base_dir()?;
  let config_path = paths::config_path(&base);
  let cfg = config::load_or_create_default(&config_path)?;

  logging::init_file_and_stderr(
    &paths::logs_dir(&base),
    &cfg.logging.level,
    cfg.logging.retention_days,
  )?;

  let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
  ctrlc::set_handler(move || {
    let _ = stop_tx.send(true);
  })?;

  let runtime = tokio::runtime::Builder::new_multi_thread()
    .enable_all()
    .build()
    .context("start async runtime")?;

  tracing::debug!(base = %base.display(), "bridgeconf starting");
  let console = console::Console::new(&base, cfg, stop_rx);
  runtime.block_on(console.run(args))
}
