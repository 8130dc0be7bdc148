//! Textual command language of `fabrickv-client`
//!
//! ```text
//! get <key>
//! set <key> <value> [EX <seconds>]
//! delete <key>
//! test <key>
//! expire <key> <seconds>
//! keys <pattern>
//! nrkeys <pattern>
//! ```
//!
//! Every command prints `status(<code>): <description>`; a successful get
//! first prints `GET value[<len>]=<value>`.

use super::session::Session;
use crate::common::{Error, Result};
use crate::protocol::Status;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get { key: String },
    Set { key: String, value: String, ttl: Option<u64> },
    Delete { key: String },
    Test { key: String },
    Expire { key: String, seconds: u64 },
    Keys { pattern: String },
    NrKeys { pattern: String },
}

fn parse_seconds(s: &str) -> Result<u64> {
    s.parse()
        .map_err(|_| Error::Status(Status::InvalidCommand))
}

impl FromStr for Command {
    type Err = Error;

    /// Unknown verbs fail with NO_SUCH_COMMAND, malformed arguments with
    /// INVALID_COMMAND.
    fn from_str(line: &str) -> Result<Self> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((verb, args)) = words.split_first() else {
            return Err(Error::Status(Status::InvalidCommand));
        };
        let invalid = || Error::Status(Status::InvalidCommand);

        match (verb.to_ascii_lowercase().as_str(), args) {
            ("get", [key]) => Ok(Command::Get {
                key: key.to_string(),
            }),
            ("set", [key, value]) => Ok(Command::Set {
                key: key.to_string(),
                value: value.to_string(),
                ttl: None,
            }),
            ("set", [key, value, ex, seconds]) if ex.eq_ignore_ascii_case("ex") => {
                Ok(Command::Set {
                    key: key.to_string(),
                    value: value.to_string(),
                    ttl: Some(parse_seconds(seconds)?),
                })
            }
            ("delete", [key]) => Ok(Command::Delete {
                key: key.to_string(),
            }),
            ("test", [key]) => Ok(Command::Test {
                key: key.to_string(),
            }),
            ("expire", [key, seconds]) => Ok(Command::Expire {
                key: key.to_string(),
                seconds: parse_seconds(seconds)?,
            }),
            ("keys", [pattern]) => Ok(Command::Keys {
                pattern: pattern.to_string(),
            }),
            ("nrkeys", [pattern]) => Ok(Command::NrKeys {
                pattern: pattern.to_string(),
            }),
            ("get" | "set" | "delete" | "test" | "expire" | "keys" | "nrkeys", _) => Err(invalid()),
            _ => Err(Error::Status(Status::NoSuchCommand)),
        }
    }
}

/// Outcome of one command: result lines plus the final status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub lines: Vec<String>,
    pub status: Status,
}

impl CommandOutput {
    fn status(status: Status) -> Self {
        Self {
            lines: Vec::new(),
            status,
        }
    }

    /// Result lines followed by the status marker line
    pub fn render(&self) -> Vec<String> {
        let mut out = self.lines.clone();
        out.push(self.status.to_string());
        out
    }
}

impl Command {
    /// Run against `session`. Values go through registered regions:
    /// `set` registers the value bytes, `get` a destination of
    /// `value_size` bytes.
    pub fn execute(&self, session: &mut Session, value_size: usize) -> Result<CommandOutput> {
        match self {
            Command::Get { key } => {
                let mut region = session.reg_memory(vec![0u8; value_size.max(1)])?;
                let sgl = region.sgl()?;
                let result = session.get_value_len(key, &sgl, sgl.len());
                session.dereg_memory(&mut region)?;

                let (status, len) = result?;
                let mut output = CommandOutput::status(status);
                if status.is_ok() {
                    let value = region.read(|bytes| String::from_utf8_lossy(&bytes[..len]).into_owned());
                    output.lines.push(format!("GET value[{}]={}", len, value));
                }
                Ok(output)
            }
            Command::Set { key, value, ttl } => {
                let mut region = session.reg_memory(value.as_bytes().to_vec())?;
                let sgl = region.sgl()?;
                let result = session.set(key, &sgl, *ttl);
                session.dereg_memory(&mut region)?;
                Ok(CommandOutput::status(result?))
            }
            Command::Delete { key } => Ok(CommandOutput::status(session.delete(key)?)),
            Command::Test { key } => {
                let exists = session.test(key)?;
                let mut output = CommandOutput::status(if exists {
                    Status::Ok
                } else {
                    Status::NoSuchKey
                });
                output.lines.push(format!("TEST {}", exists));
                Ok(output)
            }
            Command::Expire { key, seconds } => {
                Ok(CommandOutput::status(session.expire(key, *seconds)?))
            }
            Command::Keys { pattern } => {
                let keys = session.keys(pattern)?;
                let mut output = CommandOutput::status(Status::Ok);
                output.lines.push(format!("KEYS count={}", keys.len()));
                output
                    .lines
                    .extend(keys.iter().enumerate().map(|(i, key)| format!("KEY[{}]={}", i, key)));
                Ok(output)
            }
            Command::NrKeys { pattern } => {
                let count = session.nrkeys(pattern)?;
                let mut output = CommandOutput::status(Status::Ok);
                output.lines.push(format!("NRKEYS {}", count));
                Ok(output)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::LoopbackTransport;
    use crate::common::StoreLimits;
    use crate::memory::MemoryRegistry;
    use crate::server::KeyStore;
    use std::sync::Arc;

    #[test]
    fn test_parse() {
        assert_eq!(
            "set 123 456 EX 5".parse::<Command>().unwrap(),
            Command::Set {
                key: "123".into(),
                value: "456".into(),
                ttl: Some(5)
            }
        );
        assert_eq!(
            "  GET   123 ".parse::<Command>().unwrap(),
            Command::Get { key: "123".into() }
        );
        assert_eq!(
            "expire 123 5".parse::<Command>().unwrap(),
            Command::Expire {
                key: "123".into(),
                seconds: 5
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        let status = |line: &str| match line.parse::<Command>() {
            Err(e) => e.status(),
            Ok(_) => Status::Ok,
        };
        assert_eq!(status("flush"), Status::NoSuchCommand);
        assert_eq!(status("get"), Status::InvalidCommand);
        assert_eq!(status("set 1 2 PX 5"), Status::InvalidCommand);
        assert_eq!(status("expire k soon"), Status::InvalidCommand);
        assert_eq!(status(""), Status::InvalidCommand);
    }

    #[test]
    fn test_execute_renders_markers() {
        let store = Arc::new(KeyStore::new(StoreLimits::default()));
        let registry = MemoryRegistry::default();
        let mut session = Session::with_transport(
            Box::new(LoopbackTransport::new(store)),
            registry.clone(),
        );

        let miss = Command::Get { key: "123".into() }
            .execute(&mut session, 64)
            .unwrap();
        assert_eq!(miss.render(), vec!["status(262): No such key"]);

        "set 123 456"
            .parse::<Command>()
            .unwrap()
            .execute(&mut session, 64)
            .unwrap();
        let hit = Command::Get { key: "123".into() }
            .execute(&mut session, 64)
            .unwrap();
        assert_eq!(
            hit.render(),
            vec!["GET value[3]=456", "status(0): OK"]
        );

        // every region was released
        assert_eq!(registry.live_regions(), 0);
    }
}
