pub use rcon_client::RconClient;

use lazy_static::lazy_static;
use regex::Regex;

mod rcon_client;

lazy_static! {
    static ref LIST_PATTERN: Regex =
        Regex::new(r"There are (\d+) of a max(?: of)? (\d+) players online:?\s*(.*)")
            .expect("Failed to compile LIST_PATTERN regex");
}

/// Parsed `list` command response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub online: u32,
    pub max: u32,
    pub names: Vec<String>,
}

/// Parses the vanilla `list` response ("There are N of a max of M players
/// online: a, b"). Returns None on anything unrecognized; the caller
/// treats that as "no live data".
pub fn parse_list_response(response: &str) -> Option<ListQuery> {
    let caps = LIST_PATTERN.captures(response)?;
    let online = caps.get(1)?.as_str().parse().ok()?;
    let max = caps.get(2)?.as_str().parse().ok()?;
    let names = caps
        .get(3)
        .map(|m| {
            m.as_str()
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some(ListQuery { online, max, names })
}
