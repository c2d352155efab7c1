//! A bridge line looks like
//! `obfs4 192.0.2.1:443 <FINGERPRINT> cert=... iat-mode=0`. The raw text is
//! the only stored state; every accessor re-derives its value from it, so a
//! line read from disk or from the network is never "half parsed".

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

const MIN_TRANSPORT_TOKENS: usize = 3;

const FINGERPRINT_LEN: usize = 40;

#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BridgeLine {
  raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
  pub host: String,
  pub port: u16,
}

impl fmt::Display for Address {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.host, self.port)
  }
}

impl BridgeLine {
  pub fn new(raw: impl Into<String>) -> Self {
    Self { raw: raw.into() }
  }

  pub fn parse(raw: &str) -> Self {
    Self::new(raw)
  }

  pub fn raw(&self) -> &str {
    &self.raw
  }

  fn pieces(&self) -> Vec<&str> {
    let mut pieces: Vec<&str> = self.raw.split(' ').filter(|p| !p.is_empty()).collect();
    if pieces.len() < MIN_TRANSPORT_TOKENS {
      pieces.insert(0, "");
    }
    pieces
  }

  fn param(&self, key: &str) -> Option<&str> {
    self.pieces().into_iter().skip(2).find_map(|piece| {
      let (k, v) = piece.split_once('=')?;
      (k == key).then_some(v)
    })
  }

  pub fn transport(&self) -> Option<&str> {
    self.pieces().first().copied().filter(|t| !t.is_empty())
  }

  pub fn address(&self) -> Option<Address> {
    let raw = self.pieces().get(1).copied()?;
    let (host, port) = raw.rsplit_once(':')?;
    let port = port.parse().ok()?;
    Some(Address {
      host: host.to_string(),
      port,
    })
  }

  pub fn host(&self) -> Option<String> {
    self.address().map(|a| a.host)
  }

  pub fn port(&self) -> Option<u16> {
    self.address().map(|a| a.port)
  }

  /// The positional relay fingerprint. Anything that is not 40 hex digits
  /// in that position is treated as absent.
  pub fn fingerprint1(&self) -> Option<&str> {
    self
      .pieces()
      .get(2)
      .copied()
      .filter(|piece| is_fingerprint(piece))
  }

  pub fn fingerprint2(&self) -> Option<&str> {
    self.param("fingerprint")
  }

  pub fn url(&self) -> Option<Url> {
    Url::parse(self.param("url")?).ok()
  }

  /// The `url=` value exactly as written.
  pub fn url_str(&self) -> Option<&str> {
    self.param("url")
  }

  pub fn front(&self) -> Option<&str> {
    self.param("front")
  }

  pub fn fronts(&self) -> BTreeSet<String> {
    self
      .param("fronts")
      .map(|v| {
        v.split(',')
          .filter(|f| !f.is_empty())
          .map(str::to_string)
          .collect()
      })
      .unwrap_or_default()
  }

  pub fn cert(&self) -> Option<&str> {
    self.param("cert")
  }

  pub fn iat_mode(&self) -> Option<i32> {
    self.param("iat-mode")?.parse().ok()
  }

  pub fn ice(&self) -> Option<&str> {
    self.param("ice")
  }

  pub fn utls(&self) -> Option<&str> {
    self.param("utls")
  }

  pub fn utls_imitate(&self) -> Option<&str> {
    self.param("utls-imitate")
  }

  pub fn ver(&self) -> Option<&str> {
    self.param("ver")
  }
}

pub fn is_fingerprint(piece: &str) -> bool {
  piece.len() == FINGERPRINT_LEN && piece.bytes().all(|b| b.is_ascii_hexdigit())
}

impl From<String> for BridgeLine {
  fn from(raw: String) -> Self {
    Self::new(raw)
  }
}

impl From<&str> for BridgeLine {
  fn from(raw: &str) -> Self {
    Self::new(raw)
  }
}

impl fmt::Display for BridgeLine {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.raw)
  }
}

impl fmt::Debug for BridgeLine {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BridgeLine")
      .field("raw", &self.raw)
      .field("transport", &self.transport())
      .field("address", &self.address())
      .field("fingerprint1", &self.fingerprint1())
      .field("fingerprint2", &self.fingerprint2())
      .field("url", &self.url_str())
      .field("front", &self.front())
      .field("fronts", &self.fronts())
      .field("cert", &self.cert())
      .field("iat_mode", &self.iat_mode())
      .field("ice", &self.ice())
      .field("utls", &self.utls())
      .field("utls_imitate", &self.utls_imitate())
      .field("ver", &self.ver())
      .finish()
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Descriptor {
  pub transport: Option<String>,
  pub host: String,
  pub port: u16,
  pub fingerprint1: Option<String>,
  pub fingerprint2: Option<String>,
  pub url: Option<Url>,
  pub front: Option<String>,
  pub fronts: BTreeSet<String>,
  pub cert: Option<String>,
  pub iat_mode: Option<i32>,
  pub ice: Option<String>,
  pub utls: Option<String>,
  pub utls_imitate: Option<String>,
  pub ver: Option<String>,
}

impl Descriptor {
  pub fn from_line(line: &BridgeLine) -> Option<Self> {
    let address = line.address()?;
    Some(Self {
      transport: line.transport().map(str::to_string),
      host: address.host,
      port: address.port,
      fingerprint1: line.fingerprint1().map(str::to_string),
      fingerprint2: line.fingerprint2().map(str::to_string),
      url: line.url(),
      front: line.front().map(str::to_string),
      fronts: line.fronts(),
      cert: line.cert().map(str::to_string),
      iat_mode: line.iat_mode(),
      ice: line.ice().map(str::to_string),
      utls: line.utls().map(str::to_string),
      utls_imitate: line.utls_imitate().map(str::to_string),
      ver: line.ver().map(str::to_string),
    })
  }

  pub fn build(&self) -> BridgeLine {
    let mut params: Vec<String> = Vec::new();

    if let Some(transport) = non_empty(&self.transport) {
      params.push(transport.to_string());
    }

    params.push(format!("{}:{}", self.host, self.port));

    if let Some(fp) = non_empty(&self.fingerprint1) {
      params.push(fp.to_string());
    }
    push_param(&mut params, "fingerprint", &self.fingerprint2);
    if let Some(url) = &self.url {
      params.push(format!("url={url}"));
    }
    push_param(&mut params, "front", &self.front);

    let fronts: Vec<&str> = self
      .fronts
      .iter()
      .map(String::as_str)
      .filter(|f| !f.is_empty())
      .collect();
    if !fronts.is_empty() {
      params.push(format!("fronts={}", fronts.join(",")));
    }

    push_param(&mut params, "cert", &self.cert);
    if let Some(iat_mode) = self.iat_mode {
      params.push(format!("iat-mode={iat_mode}"));
    }
    push_param(&mut params, "ice", &self.ice);
    push_param(&mut params, "utls", &self.utls);
    push_param(&mut params, "utls-imitate", &self.utls_imitate);
    push_param(&mut params, "ver", &self.ver);

    BridgeLine::new(params.join(" "))
  }
}

fn non_empty(v: &Option<String>) -> Option<&str> {
  v.as_deref().filter(|s| !s.is_empty())
}

fn push_param(params: &mut Vec<String>, key: &str, value: &Option<String>) {
  if let Some(v) = non_empty(value) {
    params.push(format!("{key}={v}"));
  }
}
