//! CLI command implementations.
//!
//! Each command is a thin loop over a client call that writes one JSON
//! document per line to the output.

use futures::{pin_mut, StreamExt};
use serde_json::Value;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

use crate::config::{Command, RulesCommand};
use crate::error::{Error, Result};
use crate::sdk::{Client, SearchOptions, StopToken, StreamConsumer, StreamItem, StreamRule};

/// Open a file for writing, or stdout.
pub fn open_output(path: Option<&Path>) -> Result<Box<dyn Write + Send>> {
    Ok(match path {
        Some(p) if p != Path::new("-") => Box::new(BufWriter::new(File::create(p)?)),
        _ => Box::new(BufWriter::new(io::stdout())),
    })
}

/// Read non-empty trimmed lines from a file, or stdin.
pub fn read_lines(path: Option<&Path>) -> Result<Vec<String>> {
    let reader: Box<dyn BufRead> = match path {
        Some(p) if p != Path::new("-") => Box::new(BufReader::new(File::open(p)?)),
        _ => Box::new(BufReader::new(io::stdin())),
    };
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    Ok(lines)
}

fn write_json(out: &mut dyn Write, value: &impl serde::Serialize) -> Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    out.write_all(b"\n")?;
    Ok(())
}

/// Run one subcommand.
pub async fn run(client: &Client, command: Command) -> Result<()> {
    match command {
        Command::Search {
            query,
            outfile,
            since_id,
            until_id,
            start_time,
            end_time,
            archive,
            limit,
        } => {
            let options = SearchOptions {
                since_id,
                until_id,
                start_time,
                end_time,
                archive,
            };
            let mut out = open_output(outfile.as_deref())?;
            search(client, &query, &options, limit, &mut *out).await
        }
        Command::Sample { outfile, limit } => {
            let mut out = open_output(outfile.as_deref())?;
            let stop = StopToken::new();
            let consumer = client.sample(stop.clone(), false);
            consume_stream(consumer, &stop, limit, &mut *out).await
        }
        Command::Stream { outfile, limit } => {
            let mut out = open_output(outfile.as_deref())?;
            let stop = StopToken::new();
            let consumer = client.stream(stop.clone(), false);
            consume_stream(consumer, &stop, limit, &mut *out).await
        }
        Command::Hydrate { infile, outfile } => {
            let ids = read_lines(infile.as_deref())?;
            let mut out = open_output(outfile.as_deref())?;
            write_pages(client.tweet_lookup(ids), &mut *out).await
        }
        Command::Users {
            infile,
            outfile,
            usernames,
        } => {
            let users = read_lines(infile.as_deref())?;
            let mut out = open_output(outfile.as_deref())?;
            write_pages(client.user_lookup(users, usernames), &mut *out).await
        }
        Command::StreamRules(rules) => {
            let mut out = io::stdout();
            stream_rules(client, rules, &mut out).await
        }
    }
}

/// Write stream records until `limit` is reached (0 = forever).
///
/// The limit is enforced through the stop token so the consumer closes the
/// connection itself.
pub async fn consume_stream(
    consumer: StreamConsumer<'_>,
    stop: &StopToken,
    limit: usize,
    out: &mut dyn Write,
) -> Result<()> {
    let stream = consumer.into_stream();
    pin_mut!(stream);

    let mut count = 0;
    while let Some(item) = stream.next().await {
        let StreamItem::Record(record) = item? else {
            continue;
        };
        count += 1;
        if limit != 0 && count >= limit {
            info!(limit, "reached limit");
            stop.cancel();
        }
        write_json(out, &record)?;
        out.flush()?;
    }
    Ok(())
}

/// Write search pages until `limit` tweets have been seen (0 = all).
pub async fn search(
    client: &Client,
    query: &str,
    options: &SearchOptions,
    limit: usize,
    out: &mut dyn Write,
) -> Result<()> {
    let pages = client.search(query, options);
    pin_mut!(pages);

    let mut count = 0;
    while let Some(page) = pages.next().await {
        let page = page?;
        count += page["data"].as_array().map_or(0, Vec::len);
        write_json(out, &page)?;
        if limit != 0 && count >= limit {
            info!(limit, "reached limit");
            break;
        }
    }
    out.flush()?;
    Ok(())
}

async fn write_pages(pages: impl futures::Stream<Item = Result<Value>>, out: &mut dyn Write) -> Result<()> {
    pin_mut!(pages);
    while let Some(page) = pages.next().await {
        write_json(out, &page?)?;
    }
    out.flush()?;
    Ok(())
}

/// Render API error objects as one line each.
pub fn error_lines(errors: &Value) -> Vec<String> {
    let items = match errors {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    };
    items
        .iter()
        .map(|part| {
            let text = part["message"]
                .as_str()
                .or_else(|| part["title"].as_str())
                .unwrap_or("Unknown error");
            match part["type"].as_str() {
                Some(kind) => format!("{text} see: {kind}"),
                None => text.to_string(),
            }
        })
        .collect()
}

/// Stream rule management.
pub async fn stream_rules(client: &Client, command: RulesCommand, out: &mut dyn Write) -> Result<()> {
    match command {
        RulesCommand::List => {
            let rules = client.get_stream_rules().await?;
            if rules.data.is_empty() {
                writeln!(out, "No rules yet. Add them with: twarc2 stream-rules add")?;
            }
            for rule in rules.data {
                match rule.tag {
                    Some(tag) => writeln!(out, "{} (tag: {})", rule.value, tag)?,
                    None => writeln!(out, "{}", rule.value)?,
                }
            }
        }
        RulesCommand::Add { value, tag } => {
            let result = client.add_stream_rules(&[StreamRule::new(value.clone(), tag)]).await?;
            if let Some(errors) = result.get("errors") {
                return Err(Error::Internal(error_lines(errors).join("\n")));
            }
            writeln!(out, "Added rule for \"{value}\"")?;
        }
        RulesCommand::Delete { value } => {
            let rules = client.get_stream_rules().await?;
            let Some(rule) = rules.data.into_iter().find(|r| r.value == value) else {
                return Err(Error::Internal(format!("No rule could be found for \"{value}\"")));
            };
            let result = client.delete_stream_rule_ids(&[rule.id]).await?;
            if let Some(errors) = result.get("errors") {
                return Err(Error::Internal(error_lines(errors).join("\n")));
            }
            writeln!(out, "Deleted stream rule for {value}")?;
        }
        RulesCommand::DeleteAll => {
            let rules = client.get_stream_rules().await?;
            if rules.data.is_empty() {
                writeln!(out, "There are no rules to delete")?;
                return Ok(());
            }
            let ids: Vec<String> = rules.data.into_iter().map(|r| r.id).collect();
            client.delete_stream_rule_ids(&ids).await?;
            writeln!(out, "Deleted {} rules.", ids.len())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_error_lines() {
        let errors = json!([
            {"message": "Rule is too long", "type": "https://api.twitter.com/2/problems/invalid-rules"},
            {"title": "Duplicate rule"},
            {}
        ]);
        assert_eq!(
            error_lines(&errors),
            vec![
                "Rule is too long see: https://api.twitter.com/2/problems/invalid-rules".to_string(),
                "Duplicate rule".to_string(),
                "Unknown error".to_string(),
            ]
        );

        let single = json!({"message": "nope"});
        assert_eq!(error_lines(&single), vec!["nope".to_string()]);
    }

    #[test]
    fn test_read_lines_skips_blanks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ids.txt");
        std::fs::write(&path, "1\n\n  2  \n3\n").unwrap();

        assert_eq!(read_lines(Some(path.as_path())).unwrap(), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_write_json_lines() {
        let mut out = Vec::new();
        write_json(&mut out, &json!({"id": "1"})).unwrap();
        write_json(&mut out, &json!({"id": "2"})).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "{\"id\":\"1\"}\n{\"id\":\"2\"}\n");
    }
}
