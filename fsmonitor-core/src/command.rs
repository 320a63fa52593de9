//! Typed protocol commands.
//!
//! The daemon never dispatches on raw keyword strings: every input line is
//! parsed into a [`Command`] at the boundary, with arity validated there.
//! Invalid input becomes a [`ProtocolError`], which the daemon treats as
//! fatal.

use crate::error::ProtocolError;
use crate::wire;

/// One parsed protocol command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `VERSION <n>` — protocol version handshake from the caller.
    Version(String),
    /// `DEBUG` — enable verbose wire logging (debugging aid, not part of the
    /// protocol proper).
    Debug,
    /// `START <replica> <root> [<subpath>]` — begin or extend watching
    /// `root`. An omitted subpath means the root itself.
    Start {
        replica: String,
        root: String,
        path: String,
    },
    /// `DIR [<subpath>]` — register an additional sub-path while collecting.
    Dir { path: String },
    /// `LINK ...` — symbolic-link following; always rejected.
    Link,
    /// `DONE` — end of sub-path enumeration.
    Done,
    /// `WAIT <replica>` — caller blocks until this replica has changes.
    Wait { replica: String },
    /// `CHANGES <replica>` — report and drain the accumulated change set.
    Changes { replica: String },
    /// `RESET <replica>` — stop the watch and discard all replica state.
    Reset { replica: String },
    /// `QUIT` — orderly shutdown.
    Quit,
}

impl Command {
    /// Parse one wire line into a command, validating arity.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let (keyword, args) = wire::decode_line(line)?;
        Self::from_parts(&keyword, args)
    }

    /// Build a command from an already-decoded keyword and argument list.
    pub fn from_parts(keyword: &str, mut args: Vec<String>) -> Result<Self, ProtocolError> {
        let bad_arity = |args: &[String]| ProtocolError::BadArity {
            keyword: keyword.to_string(),
            args: args.to_vec(),
        };

        match keyword {
            "VERSION" => {
                if args.len() != 1 {
                    return Err(bad_arity(&args));
                }
                Ok(Command::Version(args.remove(0)))
            }
            "DEBUG" => {
                if !args.is_empty() {
                    return Err(bad_arity(&args));
                }
                Ok(Command::Debug)
            }
            "START" => match args.len() {
                2 => {
                    let root = args.remove(1);
                    let replica = args.remove(0);
                    Ok(Command::Start {
                        replica,
                        root,
                        path: String::new(),
                    })
                }
                3 => {
                    let path = args.remove(2);
                    let root = args.remove(1);
                    let replica = args.remove(0);
                    Ok(Command::Start {
                        replica,
                        root,
                        path,
                    })
                }
                _ => Err(bad_arity(&args)),
            },
            "DIR" => match args.len() {
                0 => Ok(Command::Dir {
                    path: String::new(),
                }),
                1 => Ok(Command::Dir {
                    path: args.remove(0),
                }),
                _ => Err(bad_arity(&args)),
            },
            // LINK arguments are irrelevant: the command is rejected outright.
            "LINK" => Ok(Command::Link),
            "DONE" => {
                if !args.is_empty() {
                    return Err(bad_arity(&args));
                }
                Ok(Command::Done)
            }
            "WAIT" => Ok(Command::Wait {
                replica: single_argument(keyword, args)?,
            }),
            "CHANGES" => Ok(Command::Changes {
                replica: single_argument(keyword, args)?,
            }),
            "RESET" => Ok(Command::Reset {
                replica: single_argument(keyword, args)?,
            }),
            "QUIT" => {
                if !args.is_empty() {
                    return Err(bad_arity(&args));
                }
                Ok(Command::Quit)
            }
            _ => Err(ProtocolError::UnknownCommand {
                keyword: keyword.to_string(),
            }),
        }
    }

    /// Wire keyword for this command.
    pub fn keyword(&self) -> &'static str {
        match self {
            Command::Version(_) => "VERSION",
            Command::Debug => "DEBUG",
            Command::Start { .. } => "START",
            Command::Dir { .. } => "DIR",
            Command::Link => "LINK",
            Command::Done => "DONE",
            Command::Wait { .. } => "WAIT",
            Command::Changes { .. } => "CHANGES",
            Command::Reset { .. } => "RESET",
            Command::Quit => "QUIT",
        }
    }

    /// True for `WAIT`. Any non-`WAIT` command cancels all pending waits.
    pub fn is_wait(&self) -> bool {
        matches!(self, Command::Wait { .. })
    }
}

fn single_argument(keyword: &str, mut args: Vec<String>) -> Result<String, ProtocolError> {
    if args.len() != 1 {
        return Err(ProtocolError::BadArity {
            keyword: keyword.to_string(),
            args,
        });
    }
    Ok(args.remove(0))
}
