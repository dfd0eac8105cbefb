use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::record::AttributeRecord;

pub const WHOIS_PORT: u16 = 43;

/// Sends one query to a WHOIS server and returns the full reply
#[async_trait]
pub trait WhoisClient: Send + Sync {
    async fn query(&self, host: &str, query: &str) -> Result<String>;
}

/// RFC 3912 client: one TCP connection per query, reply read to EOF
#[derive(Debug, Clone)]
pub struct TcpWhois {
    timeout: Duration,
}

impl TcpWhois {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn exchange(&self, host: &str, query: &str) -> Result<String> {
        let mut stream = TcpStream::connect((host, WHOIS_PORT))
            .await
            .with_context(|| format!("unable to connect to {host}:{WHOIS_PORT}"))?;
        stream.write_all(format!("{query}\r\n").as_bytes()).await?;

        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await?;
        debug!("{} answered {} bytes for {}", host, reply.len(), query.trim());

        Ok(String::from_utf8_lossy(&reply).into_owned())
    }
}

#[async_trait]
impl WhoisClient for TcpWhois {
    async fn query(&self, host: &str, query: &str) -> Result<String> {
        timeout(self.timeout, self.exchange(host, query))
            .await
            .with_context(|| format!("{host} did not answer within {:?}", self.timeout))?
    }
}

/// Query sent to the Team Cymru whois service for `asn`
pub fn cymru_query(asn: u32) -> String {
    format!(" -v AS{asn}")
}

/// Reads the `AS | CC | Registry | Allocated | AS Name` row of a Cymru reply.
/// The AS name field holds `NAME - Organisation` when both are known.
pub fn parse_cymru_reply(text: &str) -> AttributeRecord {
    let mut record = AttributeRecord::new();

    let row = text
        .lines()
        .map(|line| line.split('|').map(str::trim).collect::<Vec<_>>())
        .find(|fields| {
            fields.len() >= 5 && fields[0].chars().next().map_or(false, |c| c.is_ascii_digit())
        });

    let Some(fields) = row else {
        return record;
    };
    if fields[4].is_empty() || fields[4] == "NA" {
        return record;
    }

    let name = fields[4].replace('"', "");
    let (as_name, org_name) = match name.split_once(" - ") {
        Some((as_name, org)) => (as_name.trim().to_string(), org.trim().to_string()),
        None => (name.trim().to_string(), name.trim().to_string()),
    };

    record.set("as_name", as_name);
    record.set("org_name", org_name);
    if !fields[1].is_empty() {
        record.set("country", fields[1]);
    }
    record.set("source", format!("cymru-{}", fields[2]));
    record
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Canned replies keyed by host and query; anything else gets an empty reply
    #[derive(Default)]
    pub(crate) struct FakeWhois {
        pub replies: HashMap<(String, String), String>,
        pub asked: Mutex<Vec<(String, String)>>,
    }

    impl FakeWhois {
        pub fn reply(mut self, host: &str, query: &str, text: &str) -> Self {
            self.replies
                .insert((host.to_string(), query.to_string()), text.to_string());
            self
        }
    }

    #[async_trait]
    impl WhoisClient for FakeWhois {
        async fn query(&self, host: &str, query: &str) -> Result<String> {
            self.asked
                .lock()
                .unwrap()
                .push((host.to_string(), query.to_string()));
            let key = (host.to_string(), query.to_string());
            Ok(self.replies.get(&key).cloned().unwrap_or_default())
        }
    }

    #[test]
    fn cymru_row_with_organisation() {
        let reply = "AS      | CC | Registry | Allocated  | AS Name\n\
                     13335   | US | arin     | 2010-07-14 | CLOUDFLARENET - Cloudflare, Inc., US\n";
        let record = parse_cymru_reply(reply);
        assert_eq!(record.get("as_name"), Some("CLOUDFLARENET"));
        assert_eq!(record.get("org_name"), Some("Cloudflare, Inc., US"));
        assert_eq!(record.get("country"), Some("US"));
        assert_eq!(record.get("source"), Some("cymru-arin"));
    }

    #[test]
    fn cymru_row_without_organisation() {
        let reply = "AS      | CC | Registry | Allocated  | AS Name\n\
                     3333    | NL | ripencc  | 1994-01-01 | RIPE-NCC-AS\n";
        let record = parse_cymru_reply(reply);
        assert_eq!(record.get("as_name"), Some("RIPE-NCC-AS"));
        assert_eq!(record.get("org_name"), Some("RIPE-NCC-AS"));
    }

    #[test]
    fn cymru_unknown_asn() {
        let reply = "AS      | CC | Registry | Allocated  | AS Name\n\
                     4294967 |    |          |            | NA\n";
        assert!(parse_cymru_reply(reply).is_empty());
        assert!(parse_cymru_reply("Error: no ASN or IP match on line 1.\n").is_empty());
    }

    #[test]
    fn cymru_query_format() {
        assert_eq!(cymru_query(64500), " -v AS64500");
    }
}
