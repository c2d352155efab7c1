use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let args: Vec<String> = std::env::args().collect();

  if args.iter().any(|a| a == "--version") {
    println!("{}", env!("CARGO_PKG_VERSION"));
    return Ok(());
  }

  tracing_subscriber::fmt()
    .with_ansi(false)
    .with_target(false)
    .with_writer(std::io::stderr)
    .init();

  let cfg = bridge_updater::UpdateConfig::from_args(&args)?;
  let outcome = bridge_updater::run(&cfg).await.context("bridge update")?;
  println!("{outcome}");
  Ok(())
}
