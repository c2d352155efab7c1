use anyhow::Context;
use reqwest::Url;
use serde::{Deserialize, Serialize};

const MEEK_ARGS: &str = "url=https://1723079976.rsc.cdn77.org;front=www.phpmyadmin.net";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoatTunnel {
  Meek,
}

impl MoatTunnel {
  pub fn args(self) -> &'static str {
    match self {
      MoatTunnel::Meek => MEEK_ARGS,
    }
  }

  /// SOCKS5 URL for a transport client listening on `port`. The argument
  /// string does not fit the 255 byte username field for every transport,
  /// so it is split in half across username and password.
  pub fn proxy_url(self, port: u16) -> anyhow::Result<Url> {
    let args = self.args();
    let mid = args
      .char_indices()
      .nth(args.chars().count() / 2)
      .map(|(i, _)| i)
      .unwrap_or(args.len());
    let (user, pass) = args.split_at(mid);

    let mut url =
      Url::parse(&format!("socks5h://127.0.0.1:{port}")).context("build tunnel proxy URL")?;
    url
      .set_username(user)
      .map_err(|_| anyhow::anyhow!("tunnel proxy URL rejects a username"))?;
    url
      .set_password(Some(pass))
      .map_err(|_| anyhow::anyhow!("tunnel proxy URL rejects a password"))?;
    Ok(url)
  }
}
