use crate::bridge::BridgeLine;
use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Plist {
  array: PlistArray,
}

#[derive(Debug, Deserialize)]
struct PlistArray {
  #[serde(rename = "string", default)]
  items: Vec<String>,
}

pub fn import_legacy_plist(xml: &str) -> anyhow::Result<Vec<BridgeLine>> {
  let plist: Plist = quick_xml::de::from_str(xml).context("parse bridge plist")?;
  Ok(
    plist
      .array
      .items
      .into_iter()
      .map(|s| s.trim().to_string())
      .filter(|s| !s.is_empty())
      .map(BridgeLine::new)
      .collect(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reads_string_array() {
    let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<array>
	<string>obfs4 192.0.2.1:443 C5B7CD6946FF10C5B3E89691A7D3F2C122D2117C cert=abc iat-mode=0</string>
	<string>   </string>
	<string>obfs4 192.0.2.2:443 07C77888D2367C25CA875E2174D9B225140940E9 cert=def iat-mode=1</string>
</array>
</plist>"#;

    let lines = import_legacy_plist(xml).unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].port(), Some(443));
    assert_eq!(lines[1].iat_mode(), Some(1));
  }

  #[test]
  fn empty_array_is_empty() {
    let lines = import_legacy_plist("<plist version=\"1.0\"><array></array></plist>").unwrap();
    assert!(lines.is_empty());
  }

  #[test]
  fn garbage_is_an_error() {
    assert!(import_legacy_plist("not xml at all").is_err());
  }
}
