//! Proxy list parsers for the document layouts served by known sources
//!
//! Every parser is a pure function from a fetched document to raw candidate
//! tuples. Malformed markup yields fewer tuples, never an error; only the JSON
//! layout can fail outright when the body is not JSON at all.

use crate::error::SourceError;
use crate::proxy::geo::country_name;
use crate::proxy::models::{RawCandidate, UNKNOWN_ORIGIN};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static FIRST_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<table\b[^>]*>(.*?)</table>").expect("Invalid table regex"));

static ROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr>").expect("Invalid row regex"));

static CELL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<td\b[^>]*>(.*?)</td>").expect("Invalid cell regex"));

static SCRIPT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>(.*?)</script>").expect("Invalid script regex")
});

static LINE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").expect("Invalid line break regex"));

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("Invalid tag regex"));

/// `proto://host:port` lines in local proxy files
static URL_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^([a-z0-9]+)://([^:/\s]+):(\d+)/?$").expect("Invalid URL line regex")
});

/// Document layout of a proxy list source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParseMethod {
    Table,
    Text,
    HideMyName,
    ProxyScan,
    OpenProxy,
    SpysOne,
    Json,
    MyProxy,
    ProxyNova,
    ProxyRack,
    ProxyScrape,
}

impl fmt::Display for ParseMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParseMethod::Table => "table",
            ParseMethod::Text => "text",
            ParseMethod::HideMyName => "hidemyname",
            ParseMethod::ProxyScan => "proxyscan",
            ParseMethod::OpenProxy => "openproxy",
            ParseMethod::SpysOne => "spysone",
            ParseMethod::Json => "json",
            ParseMethod::MyProxy => "myproxy",
            ParseMethod::ProxyNova => "proxynova",
            ParseMethod::ProxyRack => "proxyrack",
            ParseMethod::ProxyScrape => "proxyscrape",
        };
        f.pad(name)
    }
}

/// Parser for proxy list documents and local proxy files
pub struct ProxyParser;

impl ProxyParser {
    /// Extract raw candidates from `document` fetched from `url`
    pub fn parse(
        method: ParseMethod,
        document: &str,
        url: &str,
    ) -> Result<Vec<RawCandidate>, SourceError> {
        let candidates = match method {
            ParseMethod::Table => Self::parse_table(document, url),
            ParseMethod::Text => Self::parse_text(document),
            ParseMethod::HideMyName => {
                let table = find_element(document, "table", "class", "proxy__t");
                Self::parse_typed_table(table)
            }
            ParseMethod::ProxyScan => Self::parse_typed_table(first_table(document)),
            ParseMethod::OpenProxy => Self::parse_openproxy(document),
            ParseMethod::SpysOne => Self::parse_spysone(document),
            ParseMethod::Json => Self::parse_json(document)?,
            ParseMethod::MyProxy => find_element(document, "div", "class", "list")
                .map(|list| host_port_lines(&element_text(list), "HTTP"))
                .unwrap_or_default(),
            ParseMethod::ProxyNova => Self::parse_proxynova(document),
            ParseMethod::ProxyRack => find_element(document, "pre", "", "")
                .map(|pre| host_port_lines(&element_text(pre), "HTTP"))
                .unwrap_or_default(),
            ParseMethod::ProxyScrape => Self::parse_proxyscrape(document),
        };
        Ok(candidates)
    }

    /// Generic listing table: host, port, country code in the first three cells
    fn parse_table(document: &str, url: &str) -> Vec<RawCandidate> {
        let Some(table) = first_table(document) else {
            tracing::warn!(url, "No table found");
            return Vec::new();
        };

        let url = url.to_lowercase();
        let protocol = if url.contains("sslproxies") {
            "HTTPS"
        } else if url.contains("socks") {
            if url.contains("socks5") {
                "SOCKS5"
            } else {
                "SOCKS4"
            }
        } else {
            "HTTP"
        };

        rows(table)
            .skip(1)
            .filter_map(|cells| {
                if cells.len() < 3 {
                    return None;
                }
                Some(RawCandidate::new(
                    &cells[0],
                    &cells[1],
                    protocol,
                    Some(country_name(&cells[2])),
                ))
            })
            .collect()
    }

    /// Table whose fifth cell names the protocol
    fn parse_typed_table(table: Option<&str>) -> Vec<RawCandidate> {
        let Some(table) = table else {
            tracing::warn!("No typed proxy table found");
            return Vec::new();
        };

        rows(table)
            .skip(1)
            .filter(|cells| cells.len() >= 5)
            .map(|cells| {
                RawCandidate::new(
                    &cells[0],
                    &cells[1],
                    &cells[4].to_uppercase(),
                    Some(country_name(&cells[2])),
                )
            })
            .collect()
    }

    /// Plain `host:port` list, one per line
    pub fn parse_text(document: &str) -> Vec<RawCandidate> {
        host_port_lines(document, "HTTP")
    }

    fn parse_openproxy(document: &str) -> Vec<RawCandidate> {
        let Some(start) = find_open_tag(document, "div", "class", "proxy-list") else {
            tracing::warn!("No proxy list container found");
            return Vec::new();
        };

        let Some(items) = element_regex("div", "class", "proxy-item") else {
            return Vec::new();
        };
        items
            .captures_iter(&document[start..])
            .filter_map(|caps| split_host_port(&element_text(&caps[1])))
            .map(|(host, port)| RawCandidate::new(&host, &port, "HTTP", Some(UNKNOWN_ORIGIN)))
            .collect()
    }

    fn parse_spysone(document: &str) -> Vec<RawCandidate> {
        let Some(table) = find_element(document, "table", "width", "100%") else {
            tracing::warn!("No spys.one table found");
            return Vec::new();
        };

        rows(table)
            .skip(3)
            .filter(|cells| cells.len() >= 5)
            .filter_map(|cells| {
                let parts: Vec<&str> = cells[0].split(':').collect();
                if parts.len() != 2 {
                    return None;
                }
                Some(RawCandidate::new(
                    parts[0],
                    parts[1],
                    &cells[2].to_uppercase(),
                    Some(country_name(&cells[1])),
                ))
            })
            .collect()
    }

    fn parse_json(document: &str) -> Result<Vec<RawCandidate>, SourceError> {
        #[derive(Deserialize)]
        struct Listing {
            #[serde(default)]
            data: Vec<serde_json::Value>,
        }

        let listing: Listing = serde_json::from_str(document)?;
        let candidates = listing
            .data
            .iter()
            .filter_map(|entry| {
                let host = entry.get("ip")?.as_str()?;
                let port = match entry.get("port")? {
                    serde_json::Value::String(port) => port.clone(),
                    serde_json::Value::Number(port) => port.to_string(),
                    _ => return None,
                };
                let country = entry
                    .get("country")
                    .and_then(|c| c.as_str())
                    .unwrap_or(UNKNOWN_ORIGIN);
                let protocol = entry
                    .get("protocols")
                    .and_then(|p| p.as_array())
                    .and_then(|p| p.first())
                    .and_then(|p| p.as_str())
                    .unwrap_or("HTTP")
                    .to_uppercase();
                Some(RawCandidate::new(
                    host,
                    &port,
                    &protocol,
                    Some(country_name(country)),
                ))
            })
            .collect();
        Ok(candidates)
    }

    fn parse_proxynova(document: &str) -> Vec<RawCandidate> {
        let Some(table) = find_element(document, "table", "id", "tbl_proxy_list") else {
            tracing::warn!("No proxynova table found");
            return Vec::new();
        };

        ROW.captures_iter(table)
            .skip(1)
            .filter_map(|row| {
                let raw_cells: Vec<&str> = CELL
                    .captures_iter(&row[1])
                    .filter_map(|c| c.get(1).map(|m| m.as_str()))
                    .collect();
                if raw_cells.len() < 3 {
                    return None;
                }
                // the address is often written by an inline script
                let host = SCRIPT
                    .captures(raw_cells[0])
                    .and_then(|script| script[1].split('"').nth(1).map(String::from))
                    .unwrap_or_else(|| element_text(raw_cells[0]));
                Some(RawCandidate::new(
                    &host,
                    &element_text(raw_cells[1]),
                    "HTTP",
                    Some(country_name(&element_text(raw_cells[2]))),
                ))
            })
            .collect()
    }

    fn parse_proxyscrape(document: &str) -> Vec<RawCandidate> {
        let Some(area) = find_element(document, "textarea", "class", "form-control") else {
            tracing::warn!("No proxyscrape textarea found");
            return Vec::new();
        };

        element_text(area)
            .lines()
            .filter_map(|line| {
                let parts: Vec<&str> = line.split(':').collect();
                if parts.len() < 2 {
                    return None;
                }
                let protocol = parts.get(2).map_or("HTTP".to_string(), |p| p.trim().to_uppercase());
                Some(RawCandidate::new(
                    parts[0].trim(),
                    parts[1].trim(),
                    &protocol,
                    Some(UNKNOWN_ORIGIN),
                ))
            })
            .collect()
    }

    /// Parse one line of a local proxy file
    ///
    /// Supports formats:
    /// - IP:PORT
    /// - scheme://IP:PORT
    ///
    /// optionally followed by whitespace and an origin label.
    pub fn parse_line(line: &str, default_protocol: &str) -> Option<RawCandidate> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let (address, origin) = match line.split_once(char::is_whitespace) {
            Some((address, origin)) => (address, Some(origin.trim())),
            None => (line, None),
        };

        if let Some(caps) = URL_LINE.captures(address) {
            return Some(RawCandidate::new(&caps[2], &caps[3], &caps[1], origin));
        }

        let (host, port) = address.split_once(':')?;
        if host.is_empty() || port.contains(':') {
            return None;
        }
        Some(RawCandidate::new(host, port, default_protocol, origin))
    }

    /// Parse a whole local proxy file
    pub fn parse_string(content: &str, default_protocol: &str) -> Vec<RawCandidate> {
        content
            .lines()
            .filter_map(|line| Self::parse_line(line, default_protocol))
            .collect()
    }
}

fn first_table(document: &str) -> Option<&str> {
    FIRST_TABLE
        .captures(document)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Pattern for an opening tag, optionally carrying `value` in attribute `attr`
fn open_tag_pattern(tag: &str, attr: &str, value: &str) -> String {
    let tag = regex::escape(tag);
    if attr.is_empty() {
        return format!(r"(?is)<{tag}\b[^>]*>");
    }
    format!(
        r#"(?is)<{tag}\b[^>]*\b{attr}\s*=\s*["']?[^"'>]*?(?:^|[\s"'=]){value}(?:$|[\s"'>])[^>]*>"#,
        attr = regex::escape(attr),
        value = regex::escape(value),
    )
}

/// Regex capturing the inner markup of matching elements, lazily
fn element_regex(tag: &str, attr: &str, value: &str) -> Option<Regex> {
    let pattern = format!(
        "{}(.*?)</{}>",
        open_tag_pattern(tag, attr, value),
        regex::escape(tag)
    );
    Regex::new(&pattern).ok()
}

/// Inner markup of the first element matching tag and attribute value
fn find_element<'a>(document: &'a str, tag: &str, attr: &str, value: &str) -> Option<&'a str> {
    element_regex(tag, attr, value)?
        .captures(document)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Byte offset just past the first opening tag matching tag and attribute value
fn find_open_tag(document: &str, tag: &str, attr: &str, value: &str) -> Option<usize> {
    Regex::new(&open_tag_pattern(tag, attr, value))
        .ok()?
        .find(document)
        .map(|m| m.end())
}

/// Text cells of every table row
fn rows(table: &str) -> impl Iterator<Item = Vec<String>> + '_ {
    ROW.captures_iter(table).map(|row| {
        CELL.captures_iter(&row[1])
            .map(|cell| element_text(&cell[1]))
            .collect()
    })
}

/// Visible text of a markup fragment
fn element_text(fragment: &str) -> String {
    let with_breaks = LINE_BREAK.replace_all(fragment, "\n");
    TAG.replace_all(&with_breaks, "")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

fn split_host_port(text: &str) -> Option<(String, String)> {
    let (host, port) = text.split_once(':')?;
    Some((host.trim().to_string(), port.trim().to_string()))
}

fn host_port_lines(text: &str, protocol: &str) -> Vec<RawCandidate> {
    text.lines()
        .filter_map(|line| split_host_port(line.trim()))
        .map(|(host, port)| RawCandidate::new(&host, &port, protocol, Some(UNKNOWN_ORIGIN)))
        .collect()
}
