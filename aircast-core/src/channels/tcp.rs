use std::time::Duration;

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    time::timeout,
};

use super::{ChannelError, QueueChannel, QueueSong, QueueStatus, Result};

const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

/// A queue control socket speaking the mixer's line protocol: one command
/// per line, `key: value` response lines, terminated by `OK` or `ACK`.
pub struct TcpQueueChannel {
    addr: String,
}

impl TcpQueueChannel {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Connects, runs the given commands in order, and returns the response
    /// pairs of the last one.
    async fn exchange(&self, commands: &[String]) -> Result<Vec<(String, String)>> {
        timeout(EXCHANGE_TIMEOUT, self.exchange_inner(commands))
            .await
            .map_err(|_| ChannelError::Timeout)?
    }

    async fn exchange_inner(&self, commands: &[String]) -> Result<Vec<(String, String)>> {
        let stream = TcpStream::connect(&self.addr).await?;
        let mut reader = BufReader::new(stream);

        let mut banner = String::new();
        reader.read_line(&mut banner).await?;

        if !banner.starts_with("OK") {
            return Err(ChannelError::Protocol(format!(
                "unexpected banner: {}",
                banner.trim_end()
            )));
        }

        let mut pairs = vec![];

        for command in commands {
            reader
                .get_mut()
                .write_all(format!("{command}\n").as_bytes())
                .await?;

            pairs = read_response(&mut reader).await?;
        }

        Ok(pairs)
    }

    async fn run(&self, command: impl Into<String>) -> Result<Vec<(String, String)>> {
        self.exchange(&[command.into()]).await
    }
}

async fn read_response(
    reader: &mut BufReader<TcpStream>,
) -> Result<Vec<(String, String)>> {
    let mut pairs = vec![];

    loop {
        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;

        if read == 0 {
            return Err(ChannelError::Protocol(
                "connection closed mid-response".to_string(),
            ));
        }

        let line = line.trim_end();

        if line == "OK" {
            return Ok(pairs);
        }

        if let Some(reason) = line.strip_prefix("ACK") {
            return Err(ChannelError::Protocol(reason.trim().to_string()));
        }

        if let Some((key, value)) = line.split_once(": ") {
            pairs.push((key.to_string(), value.to_string()));
        }
    }
}

fn field<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

/// Splits response pairs into one group per song, starting at each `file`
/// key, and parses the groups.
fn parse_songs(pairs: &[(String, String)]) -> Vec<QueueSong> {
    let mut songs = vec![];
    let mut group: Vec<(String, String)> = vec![];

    for pair in pairs {
        if pair.0.eq_ignore_ascii_case("file") && !group.is_empty() {
            songs.extend(parse_song(&group));
            group.clear();
        }

        group.push(pair.clone());
    }

    songs.extend(parse_song(&group));
    songs
}

fn parse_song(pairs: &[(String, String)]) -> Option<QueueSong> {
    let file = field(pairs, "file")?.to_string();

    Some(QueueSong {
        file,
        id: field(pairs, "Id").and_then(|v| v.parse().ok())?,
        position: field(pairs, "Pos").and_then(|v| v.parse().ok()).unwrap_or(0),
        title: field(pairs, "Title").map(str::to_string),
        artist: field(pairs, "Artist").map(str::to_string),
        genre: field(pairs, "Genre").map(str::to_string),
        duration_seconds: field(pairs, "duration").and_then(|v| v.parse().ok()),
    })
}

fn quote(argument: &str) -> String {
    format!("\"{}\"", argument.replace('\\', "\\\\").replace('"', "\\\""))
}

#[async_trait]
impl QueueChannel for TcpQueueChannel {
    async fn status(&self) -> Result<QueueStatus> {
        let pairs = self.run("status").await?;

        Ok(QueueStatus {
            playing: field(&pairs, "state") == Some("play"),
            queue_length: field(&pairs, "playlistlength")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        })
    }

    async fn current(&self) -> Result<Option<QueueSong>> {
        let pairs = self.run("currentsong").await?;
        Ok(parse_song(&pairs))
    }

    async fn songs(&self) -> Result<Vec<QueueSong>> {
        let pairs = self.run("playlistinfo").await?;
        Ok(parse_songs(&pairs))
    }

    async fn add(&self, file: &str) -> Result<u64> {
        let pairs = self
            .exchange(&["update".to_string(), format!("addid {}", quote(file))])
            .await?;

        field(&pairs, "Id")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| ChannelError::Protocol("addid returned no song id".to_string()))
    }

    async fn remove(&self, id: u64) -> Result<()> {
        self.run(format!("deleteid {id}")).await.map(|_| ())
    }

    async fn clear(&self) -> Result<()> {
        self.run("clear").await.map(|_| ())
    }

    async fn play(&self) -> Result<()> {
        self.run("play").await.map(|_| ())
    }

    async fn pause(&self) -> Result<()> {
        self.run("pause 1").await.map(|_| ())
    }

    async fn resume(&self) -> Result<()> {
        self.run("pause 0").await.map(|_| ())
    }

    async fn set_consume(&self, enabled: bool) -> Result<()> {
        self.run(format!("consume {}", enabled as u8)).await.map(|_| ())
    }

    async fn set_repeat(&self, enabled: bool) -> Result<()> {
        self.run(format!("repeat {}", enabled as u8)).await.map(|_| ())
    }

    async fn set_random(&self, enabled: bool) -> Result<()> {
        self.run(format!("random {}", enabled as u8)).await.map(|_| ())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_song() {
        let song = parse_song(&pairs(&[
            ("file", "abc123.mp3"),
            ("Title", "Midnight"),
            ("Artist", "Someone"),
            ("duration", "183.4"),
            ("Pos", "2"),
            ("Id", "17"),
        ]))
        .expect("a song with file and Id should parse");

        assert_eq!(song.id, 17);
        assert_eq!(song.position, 2);
        assert_eq!(song.title.as_deref(), Some("Midnight"));
        assert_eq!(song.duration_seconds, Some(183.4));
    }

    #[test]
    fn test_parse_song_requires_identity() {
        assert!(
            parse_song(&pairs(&[("state", "play")])).is_none(),
            "status output should not parse as a song"
        );
    }

    #[test]
    fn test_parse_songs_splits_on_file_key() {
        let songs = parse_songs(&pairs(&[
            ("file", "first.mp3"),
            ("Id", "1"),
            ("Pos", "0"),
            ("file", "second.mp3"),
            ("Title", "Second"),
            ("Id", "2"),
            ("Pos", "1"),
        ]));

        assert_eq!(songs.len(), 2);
        assert_eq!(songs[0].file, "first.mp3");
        assert_eq!(songs[1].title.as_deref(), Some("Second"));
    }

    #[test]
    fn test_quote_escapes_arguments() {
        assert_eq!(quote(r#"a "b" c"#), r#""a \"b\" c""#);
    }
}
