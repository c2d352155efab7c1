use crate::autoconf::AutoConf;
use crate::bridge::BridgeLine;
use crate::clock::SystemClock;
use crate::config::Config;
use crate::country::CountryCode;
use crate::error::ApiError;
use crate::http::{ReqwestTransport, TransportOptions};
use crate::moat::MoatClient;
use crate::on_demand::OnDemand;
use crate::paths;
use crate::registry::{BridgeKind, BridgeRegistry, RegistryFiles, SnapshotSource};
use crate::settings::{FileSettingsStore, SettingsStore};
use crate::transport::Transport;
use anyhow::Context;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

// Ten years; anything longer means "never refresh".
const MAX_AGE_HOURS_CAP: u64 = 24 * 365 * 10;

pub struct Console {
  base: PathBuf,
  cfg: Config,
  stop: watch::Receiver<bool>,
}

impl Console {
  pub fn new(base: &Path, cfg: Config, stop: watch::Receiver<bool>) -> Self {
    Self {
      base: base.to_path_buf(),
      cfg,
      stop,
    }
  }

  pub async fn run(&self, args: &[String]) -> anyhow::Result<()> {
    if args.iter().any(|a| a == "--help" || a == "-h") {
      print_help();
      return Ok(());
    }

    if let Some(i) = args.iter().position(|a| a == "--parse") {
      return run_parse(&args[i + 1..]);
    }

    if args.iter().any(|a| a == "--negotiate") {
      return self.run_negotiate(args).await;
    }

    if let Some(i) = args.iter().position(|a| a == "--builtin") {
      return self.run_builtin(&args[i + 1..]).await;
    }

    if args.iter().any(|a| a == "--map") {
      return self.run_map().await;
    }

    if args.iter().any(|a| a == "--countries") {
      let client = self.moat_client()?;
      let countries = self.until_stopped(client.countries()).await?;
      for code in countries {
        let flag = code.parse::<CountryCode>().map(|c| c.flag()).unwrap_or_default();
        println!("{flag} {code}");
      }
      return Ok(());
    }

    if args.iter().any(|a| a == "--on-demand") {
      return self.run_on_demand().await;
    }

    if let Some(i) = args.iter().position(|a| a == "--custom-bridges") {
      return self.run_custom_bridges(&args[i + 1..]);
    }

    if args.iter().any(|a| a == "--status") {
      return self.run_status();
    }

    print_help();
    Ok(())
  }

  async fn run_negotiate(&self, args: &[String]) -> anyhow::Result<()> {
    let country = flag_value(args, "--country")
      .map(|c| c.parse::<CountryCode>())
      .transpose()?;
    let force = args.iter().any(|a| a == "--force");

    let mut autoconf = AutoConf::new(self.moat_client()?, self.registry());
    let mut stop = self.stop.clone();
    let decision = until_stopped(&mut stop, autoconf.negotiate(country.as_ref(), force)).await?;

    let store = self.settings_store();
    let mut settings = store.load()?;
    settings.apply_decision(&decision);
    store.save(&settings)?;

    match decision.transport {
      Transport::None => println!("No bridges needed."),
      t => println!("Use {} ({t}).", t.description()),
    }
    let lines = decision.transport.bridge_lines(
      autoconf.registry(),
      &settings.custom_bridges,
      &settings.on_demand_bridges,
    );
    for line in lines {
      println!("  {line}");
    }
    Ok(())
  }

  async fn run_builtin(&self, tail: &[String]) -> anyhow::Result<()> {
    let sub = tail.first().map(|s| s.as_str()).unwrap_or("");
    match sub {
      "status" => {
        let registry = self.registry();
        print_registry(&registry);
        Ok(())
      }
      "refresh" => {
        let client = self.moat_client()?;
        let bytes = self.until_stopped(client.builtin_raw()).await?;
        let mut registry = self.registry();
        registry.install_snapshot(&bytes)?;
        println!("Built-in bridges updated.");
        print_registry(&registry);
        Ok(())
      }
      _ => {
        eprintln!("Unknown `--builtin` subcommand. Expected: status|refresh");
        print_help();
        Ok(())
      }
    }
  }

  async fn run_map(&self) -> anyhow::Result<()> {
    let client = self.moat_client()?;
    let map = self.until_stopped(client.map()).await?;
    for (country, resp) in map {
      if !resp.has_settings() {
        println!("{country}: no bridges needed");
        continue;
      }
      let kinds: Vec<String> = resp
        .settings()
        .iter()
        .map(|s| format!("{}/{}", s.kind, String::from(s.source.clone())))
        .collect();
      println!("{country}: {}", kinds.join(", "));
    }
    Ok(())
  }

  async fn run_on_demand(&self) -> anyhow::Result<()> {
    let od_cfg = self
      .cfg
      .on_demand
      .clone()
      .ok_or_else(|| {
        anyhow::anyhow!(
          "no [on_demand] section in {}",
          paths::config_path(&self.base).display()
        )
      })?;

    let transport = ReqwestTransport::new(&TransportOptions {
      timeout: Duration::from_secs(self.cfg.moat.timeout_seconds),
      ..TransportOptions::default()
    })?;
    let provisioner = OnDemand::new(transport, Arc::new(SystemClock));
    let Some(bridge) = self.until_stopped(provisioner.fetch(&od_cfg)).await? else {
      println!("Server claimed, but it carried no bridge.");
      return Ok(());
    };

    let store = self.settings_store();
    let mut settings = store.load()?;
    settings.on_demand_bridges = vec![bridge.raw().to_string()];
    settings.transport = Transport::OnDemand;
    store.save(&settings)?;
    println!("{bridge}");
    Ok(())
  }

  fn run_custom_bridges(&self, tail: &[String]) -> anyhow::Result<()> {
    let path = tail
      .first()
      .ok_or_else(|| anyhow::anyhow!("expected: --custom-bridges <file>"))?;
    let text = std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;

    let store = self.settings_store();
    let mut settings = store.load()?;
    settings.apply_custom_bridges_text(&text);
    store.save(&settings)?;
    println!(
      "{} custom bridge(s) stored; transport is now {}.",
      settings.custom_bridges.len(),
      settings.transport
    );
    Ok(())
  }

  fn run_status(&self) -> anyhow::Result<()> {
    let settings = self.settings_store().load()?;
    let registry = self.registry();
    println!("Transport: {}", settings.transport);
    println!("Custom bridges: {}", settings.custom_bridges.len());
    println!("On-demand bridges: {}", settings.on_demand_bridges.len());

    let plugins: Vec<String> = settings
      .transport
      .plugins(&settings.custom_bridges)
      .into_iter()
      .collect();
    if !plugins.is_empty() {
      println!("Plugins: {}", plugins.join(", "));
    }
    for line in settings
      .transport
      .bridge_lines(&registry, &settings.custom_bridges, &settings.on_demand_bridges)
    {
      println!("Bridge {line}");
    }
    Ok(())
  }

  fn moat_client(&self) -> anyhow::Result<MoatClient<ReqwestTransport>> {
    let transport = ReqwestTransport::new(&TransportOptions {
      timeout: Duration::from_secs(self.cfg.moat.timeout_seconds),
      proxy: self.cfg.moat.proxy_url()?,
      ..TransportOptions::default()
    })?;
    Ok(
      MoatClient::new(transport, self.cfg.moat.base_url()?)
        .with_transports(self.cfg.moat.transports.clone()),
    )
  }

  fn registry(&self) -> BridgeRegistry {
    let files = RegistryFiles {
      update_file: Some(paths::updated_bridges_path(&self.base)),
      bundled_file: Some(
        self
          .cfg
          .registry
          .bundled_file
          .clone()
          .unwrap_or_else(|| paths::bundled_bridges_path(&self.base)),
      ),
    };
    let hours = self.cfg.registry.max_age_hours.min(MAX_AGE_HOURS_CAP) as i64;
    BridgeRegistry::load(files, Arc::new(SystemClock)).with_max_age(chrono::Duration::hours(hours))
  }

  fn settings_store(&self) -> FileSettingsStore {
    FileSettingsStore::new(paths::settings_path(&self.base))
  }

  async fn until_stopped<T>(
    &self,
    fut: impl Future<Output = Result<T, ApiError>>,
  ) -> Result<T, ApiError> {
    let mut stop = self.stop.clone();
    until_stopped(&mut stop, fut).await
  }
}

async fn until_stopped<T>(
  stop: &mut watch::Receiver<bool>,
  fut: impl Future<Output = Result<T, ApiError>>,
) -> Result<T, ApiError> {
  tokio::select! {
    res = fut => res,
    Ok(_) = stop.wait_for(|stopped| *stopped) => {
      tracing::info!("cancelled by user");
      Err(ApiError::Aborted("cancelled by user".to_string()))
    }
  }
}

fn run_parse(tail: &[String]) -> anyhow::Result<()> {
  if tail.is_empty() {
    anyhow::bail!("expected: --parse <bridge line>");
  }
  let line = BridgeLine::new(tail.join(" "));
  println!("{line:#?}");
  Ok(())
}

fn print_registry(registry: &BridgeRegistry) {
  let source = match registry.source() {
    SnapshotSource::Update => "cached update",
    SnapshotSource::Bundled => "bundled default",
    SnapshotSource::Empty => "none",
  };
  println!("Source: {source}");
  match registry.last_updated() {
    Some(ts) => println!("Last updated: {}", ts.to_rfc3339()),
    None => println!("Last updated: never"),
  }
  println!("Stale: {}", if registry.is_stale() { "yes" } else { "no" });
  if registry.snapshot().is_empty() {
    println!("No built-in bridges available.");
    return;
  }
  for kind in BridgeKind::ALL {
    println!("  {kind}: {}", registry.get(kind).len());
  }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
  let i = args.iter().position(|a| a == flag)?;
  args.get(i + 1).map(|s| s.as_str()).filter(|v| !v.starts_with("--"))
}

fn print_help() {
  println!("bridgeconf v{}", env!("CARGO_PKG_VERSION"));
  println!("Commands:");
  println!("  --parse <bridge line>");
  println!("  --negotiate [--country CC] [--force]");
  println!("  --builtin status");
  println!("  --builtin refresh");
  println!("  --map");
  println!("  --countries");
  println!("  --on-demand");
  println!("  --custom-bridges <file>");
  println!("  --status");
  println!("  --version");
}
