use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// ISO 3166-1 alpha-2 code, stored lowercase as the MOAT service expects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CountryCode(String);

impl CountryCode {
  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn flag(&self) -> String {
    const REGIONAL_INDICATOR_A: u32 = 0x1F1E6;
    self
      .0
      .bytes()
      .map(|b| REGIONAL_INDICATOR_A + u32::from(b.to_ascii_uppercase() - b'A'))
      .filter_map(char::from_u32)
      .collect()
  }
}

impl FromStr for CountryCode {
  type Err = anyhow::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let code = s.trim();
    if code.len() != 2 || !code.bytes().all(|b| b.is_ascii_alphabetic()) {
      anyhow::bail!("country code must be two ASCII letters, got {s:?}");
    }
    Ok(Self(code.to_ascii_lowercase()))
  }
}

impl TryFrom<String> for CountryCode {
  type Error = anyhow::Error;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<CountryCode> for String {
  fn from(value: CountryCode) -> Self {
    value.0
  }
}

impl fmt::Display for CountryCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}
