//! Parsers for the plain-text world data formats.

use chrono::{TimeZone, Utc};

use crate::error::{Result, TwError};
use crate::types::{ConquerRecord, KillRecord, PlayerRecord, ServerListing, TribeRecord, VillageRecord};

pub(crate) fn parse_players(body: &str) -> Result<Vec<PlayerRecord>> {
    rows("player.txt", body, 6)
        .map(|row| {
            let (line, f) = row?;
            Ok(PlayerRecord {
                id: int("player.txt", line, f[0])?,
                name: name("player.txt", line, f[1])?,
                tribe_id: int("player.txt", line, f[2])?,
                villages: int("player.txt", line, f[3])?,
                points: int("player.txt", line, f[4])?,
                rank: int("player.txt", line, f[5])?,
            })
        })
        .collect()
}

pub(crate) fn parse_tribes(body: &str) -> Result<Vec<TribeRecord>> {
    rows("ally.txt", body, 8)
        .map(|row| {
            let (line, f) = row?;
            Ok(TribeRecord {
                id: int("ally.txt", line, f[0])?,
                name: name("ally.txt", line, f[1])?,
                tag: name("ally.txt", line, f[2])?,
                members: int("ally.txt", line, f[3])?,
                villages: int("ally.txt", line, f[4])?,
                points: int("ally.txt", line, f[5])?,
                all_points: int("ally.txt", line, f[6])?,
                rank: int("ally.txt", line, f[7])?,
            })
        })
        .collect()
}

pub(crate) fn parse_villages(body: &str) -> Result<Vec<VillageRecord>> {
    rows("village.txt", body, 7)
        .map(|row| {
            let (line, f) = row?;
            Ok(VillageRecord {
                id: int("village.txt", line, f[0])?,
                name: name("village.txt", line, f[1])?,
                x: int("village.txt", line, f[2])?,
                y: int("village.txt", line, f[3])?,
                player_id: int("village.txt", line, f[4])?,
                points: int("village.txt", line, f[5])?,
                bonus: int("village.txt", line, f[6])?,
            })
        })
        .collect()
}

pub(crate) fn parse_kills(body: &str) -> Result<Vec<KillRecord>> {
    rows("kill_*.txt", body, 3)
        .map(|row| {
            let (line, f) = row?;
            Ok(KillRecord {
                rank: int("kill_*.txt", line, f[0])?,
                id: int("kill_*.txt", line, f[1])?,
                score: int("kill_*.txt", line, f[2])?,
            })
        })
        .collect()
}

pub(crate) fn parse_conquers(body: &str) -> Result<Vec<ConquerRecord>> {
    if let Some(message) = body.trim_start().strip_prefix("ERROR") {
        return Err(TwError::Api {
            status: 200,
            message: message.trim_start_matches(':').trim().to_string(),
        });
    }

    rows("get_conquer_extended", body, 7)
        .map(|row| {
            let (line, f) = row?;
            let ts: i64 = f[1]
                .trim()
                .parse()
                .map_err(|_| TwError::parse("get_conquer_extended", line, format!("bad timestamp {:?}", f[1])))?;
            let ennobled_at = Utc
                .timestamp_opt(ts, 0)
                .single()
                .ok_or_else(|| TwError::parse("get_conquer_extended", line, format!("timestamp out of range: {ts}")))?;
            Ok(ConquerRecord {
                village_id: int("get_conquer_extended", line, f[0])?,
                ennobled_at,
                new_owner_id: int("get_conquer_extended", line, f[2])?,
                old_owner_id: int("get_conquer_extended", line, f[3])?,
                old_owner_tribe_id: int("get_conquer_extended", line, f[4])?,
                new_owner_tribe_id: int("get_conquer_extended", line, f[5])?,
                points: int("get_conquer_extended", line, f[6])?,
            })
        })
        .collect()
}

/// Parse the PHP-serialized `key => url` map served by `get_servers.php`.
pub(crate) fn parse_server_map(body: &str) -> Result<Vec<ServerListing>> {
    let mut cursor = PhpCursor { input: body.trim(), pos: 0 };

    cursor.expect("a:")?;
    let count: usize = cursor.number()?;
    cursor.expect(":{")?;

    // The count comes off the wire; let the entries themselves bound the allocation.
    let mut servers = Vec::new();
    for _ in 0..count {
        let key = cursor.string()?;
        let url = cursor.string()?;
        servers.push(ServerListing { key, url });
    }
    cursor.expect("}")?;

    Ok(servers)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn rows<'a>(
    resource: &'static str,
    body: &'a str,
    width: usize,
) -> impl Iterator<Item = Result<(usize, Vec<&'a str>)>> + 'a {
    body.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(move |(idx, line)| {
            let fields: Vec<&str> = line.trim_end_matches('\r').split(',').collect();
            if fields.len() != width {
                return Err(TwError::parse(
                    resource,
                    idx + 1,
                    format!("expected {width} fields, got {}", fields.len()),
                ));
            }
            Ok((idx + 1, fields))
        })
}

fn int(resource: &'static str, line: usize, raw: &str) -> Result<i32> {
    raw.trim()
        .parse()
        .map_err(|_| TwError::parse(resource, line, format!("not an integer: {raw:?}")))
}

/// Names are URL-encoded with `+` standing in for spaces.
fn name(resource: &'static str, line: usize, raw: &str) -> Result<String> {
    urlencoding::decode(&raw.replace('+', " "))
        .map(|decoded| decoded.into_owned())
        .map_err(|e| TwError::parse(resource, line, e.to_string()))
}

struct PhpCursor<'a> {
    input: &'a str,
    pos: usize,
}

impl PhpCursor<'_> {
    fn err(&self, message: impl Into<String>) -> TwError {
        TwError::parse("get_servers.php", 1, format!("{} (offset {})", message.into(), self.pos))
    }

    fn expect(&mut self, token: &str) -> Result<()> {
        if self.input[self.pos..].starts_with(token) {
            self.pos += token.len();
            Ok(())
        } else {
            Err(self.err(format!("expected {token:?}")))
        }
    }

    fn number(&mut self) -> Result<usize> {
        let rest = &self.input[self.pos..];
        let len = rest.bytes().take_while(u8::is_ascii_digit).count();
        let value = rest[..len].parse().map_err(|_| self.err("expected a length"))?;
        self.pos += len;
        Ok(value)
    }

    /// `s:<byte length>:"<bytes>";`
    fn string(&mut self) -> Result<String> {
        self.expect("s:")?;
        let len = self.number()?;
        self.expect(":\"")?;
        let end = self
            .pos
            .checked_add(len)
            .ok_or_else(|| self.err("string length overflows"))?;
        let value = self
            .input
            .get(self.pos..end)
            .ok_or_else(|| self.err("string runs past end of input"))?
            .to_string();
        self.pos = end;
        self.expect("\";")?;
        Ok(value)
    }
}
